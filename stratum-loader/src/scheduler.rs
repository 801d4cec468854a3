//! Cooperative single-flight scheduler
//!
//! Exactly one unit runs at a time. A unit that touches an unsettled
//! dependency is aborted and replayed from its start once the dependency
//! settles. Circular waits are broken by allowing one edge of the cycle.

use crate::config::{ContextConfig, LoaderConfig};
use crate::context::{CloneKey, Context, ContextId, ContextRecord, UnitInfo};
use crate::executor::{Completion, UnitExecutor, VehicleRequest};
use crate::resolver::{is_relative, is_rooted, PathResolver, UrlResolver};
use crate::scope::Scope;
use crate::unit::{find_cycle, satisfied, Unit, UnitId, UnitSource, UnitStatus};
use crate::value::{Exports, Module, Value};
use crate::{LoadError, Result};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, info, trace, warn};

type QuiescenceListener = Box<dyn FnOnce(&LoaderStats)>;

/// Resolved form of a requested id
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Target {
    pub key: String,
    pub location: Option<String>,
    pub remaining: VecDeque<String>,
    pub request: String,
}

/// Mutable scheduler state. Never borrowed across a call into unit code or
/// the executor.
#[derive(Default)]
pub(crate) struct State {
    pub units: Vec<Unit>,
    pub contexts: Vec<ContextRecord>,
    pub running: Option<UnitId>,
    /// Units whose bodies are on the call stack, innermost last
    pub active: Vec<UnitId>,
    pub ambient: Vec<ContextId>,
    pub clones: FxHashMap<CloneKey, ContextId>,
    pub batch_known: bool,
    pub quiesced: bool,
    pub advancing: bool,
    pub anonymous: u64,
}

impl State {
    /// Canonical key and first location for `raw` as requested from
    /// `requester` in `context`.
    ///
    /// Relative ids resolve against the requester's location and get no
    /// fallbacks. Rooted ids name their location. Bare ids try each base
    /// path of the context in order.
    pub fn resolve_target(
        &self,
        resolver: &dyn PathResolver,
        context: ContextId,
        raw: &str,
        requester: Option<UnitId>,
    ) -> Result<Target> {
        if raw.trim().is_empty() || raw.contains('\0') {
            return Err(LoadError::InvalidId { id: raw.to_string() });
        }

        let base_paths = &self.contexts[context.0].base_paths;

        if is_relative(raw) {
            let base = requester
                .and_then(|unit| self.units[unit.0].location.clone())
                .or_else(|| base_paths.first().cloned())
                .unwrap_or_default();
            let location = resolver.absolute(raw, &base);
            return Ok(Target {
                key: location.clone(),
                location: Some(location),
                remaining: VecDeque::new(),
                request: raw.to_string(),
            });
        }

        if is_rooted(raw) {
            let location = resolver.absolute(raw, "");
            return Ok(Target {
                key: location.clone(),
                location: Some(location),
                remaining: VecDeque::new(),
                request: raw.to_string(),
            });
        }

        let mut bases = base_paths.iter();
        let location = match bases.next() {
            Some(base) => resolver.absolute(raw, base),
            None => raw.to_string(),
        };
        Ok(Target {
            key: raw.to_string(),
            location: Some(location),
            remaining: bases.cloned().collect(),
            request: raw.to_string(),
        })
    }

    /// The unit `raw` names in `context`, created pending if new
    pub fn find_or_create(
        &mut self,
        resolver: &dyn PathResolver,
        context: ContextId,
        raw: &str,
        requester: Option<UnitId>,
    ) -> Result<UnitId> {
        let target = self.resolve_target(resolver, context, raw, requester)?;
        if let Some(existing) = self.existing(context, &target) {
            return Ok(existing);
        }

        let Target { key, location, remaining, request } = target;
        let unit = self.create_unit(
            context,
            key.clone(),
            UnitSource::Location { request },
            location,
            remaining,
            requester,
        );
        trace!(context = %context, id = %key, unit = %unit, "queued");
        Ok(unit)
    }

    /// The unit `target` names in `context`: by key, else a unit that is
    /// not failed and sits at the same first location
    pub fn existing(&self, context: ContextId, target: &Target) -> Option<UnitId> {
        let record = &self.contexts[context.0];
        record.lookup(&target.key).or_else(|| {
            let location = target.location.as_deref()?;
            record
                .lookup(location)
                .filter(|unit| self.units[unit.0].status != UnitStatus::Failed)
        })
    }

    /// Add a pending unit to `context`
    pub fn create_unit(
        &mut self,
        context: ContextId,
        key: String,
        source: UnitSource,
        location: Option<String>,
        remaining: VecDeque<String>,
        requester: Option<UnitId>,
    ) -> UnitId {
        let id = UnitId(self.units.len());
        let record = &mut self.contexts[context.0];
        record.mark_pending(&key, id);
        if let Some(location) = &location {
            record.aliases.entry(location.clone()).or_insert(id);
        }
        self.units
            .push(Unit::new(id, key, context, source, location, remaining, requester));
        id
    }

    /// Batch known and nothing pending or running
    fn is_idle(&self) -> bool {
        self.batch_known && !self.advancing && self.running.is_none() && !self.has_pending()
    }

    fn has_pending(&self) -> bool {
        self.contexts.iter().any(|context| !context.pending.is_empty())
    }

    fn pending_units(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.contexts
            .iter()
            .flat_map(|context| context.pending.values().copied())
    }

    /// First pending unit whose dependencies are all settled or allowed
    fn next_runnable(&self) -> Option<UnitId> {
        self.pending_units().find(|&unit| {
            self.units[unit.0].status == UnitStatus::Pending && satisfied(&self.units, unit)
        })
    }

    fn find_any_cycle(&self) -> Option<(UnitId, UnitId)> {
        self.pending_units().find_map(|unit| find_cycle(&self.units, unit))
    }

    /// Fail every pending unit after a stall
    fn fail_stalled(&mut self) -> Vec<String> {
        let stalled: Vec<UnitId> = self.pending_units().collect();
        let keys: Vec<String> = stalled
            .iter()
            .map(|unit| self.units[unit.0].key.clone())
            .collect();

        for unit in stalled {
            let record = &mut self.units[unit.0];
            record.status = UnitStatus::Failed;
            record.failure = Some(LoadError::Stalled { units: keys.clone() });
            let (context, key) = (record.context, record.key.clone());
            self.contexts[context.0].mark_failed(&key, unit);
        }
        keys
    }

    pub fn unit_info(&self, id: UnitId) -> UnitInfo {
        let unit = &self.units[id.0];
        let key_of = |dep: &UnitId| self.units[dep.0].key.clone();
        let mut allowed: Vec<UnitId> = unit.allowed.iter().copied().collect();
        allowed.sort();

        UnitInfo {
            id: unit.key.clone(),
            status: unit.status,
            location: unit.location.clone(),
            tried: unit.tried.clone(),
            dependencies: unit.dependencies.iter().map(key_of).collect(),
            allowed: allowed.iter().map(key_of).collect(),
            requester: unit.requester.map(|requester| key_of(&requester)),
            error: unit.failure.as_ref().map(ToString::to_string),
        }
    }

    fn stats(&self) -> LoaderStats {
        let count = |status| self.units.iter().filter(|unit| unit.status == status).count();
        LoaderStats {
            contexts: self.contexts.len(),
            units: self.units.len(),
            loaded: count(UnitStatus::Loaded),
            failed: count(UnitStatus::Failed),
            pending: count(UnitStatus::Pending),
            running: self.running.map(|unit| self.units[unit.0].key.clone()),
            quiescent: self.is_idle(),
        }
    }
}

/// Counters reported to quiescence listeners
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoaderStats {
    /// Number of contexts
    pub contexts: usize,
    /// Number of units across all contexts
    pub units: usize,
    /// Units loaded successfully
    pub loaded: usize,
    /// Units failed for good
    pub failed: usize,
    /// Units waiting to run
    pub pending: usize,
    /// Id of the running unit
    pub running: Option<String>,
    /// Whether nothing is pending or running, with the batch known
    pub quiescent: bool,
}

pub(crate) struct Shared {
    state: RefCell<State>,
    executor: Rc<dyn UnitExecutor>,
    resolver: Rc<dyn PathResolver>,
    listeners: RefCell<Vec<QuiescenceListener>>,
    config: LoaderConfig,
}

/// Handle to a scheduler and every context it owns.
///
/// Clones share the same scheduler. Nothing is global: two schedulers
/// never see each other's units.
#[derive(Clone)]
pub struct Scheduler {
    shared: Rc<Shared>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("stats", &self.stats())
            .finish()
    }
}

impl Scheduler {
    /// Create a scheduler whose root context follows `config`
    pub fn new(config: LoaderConfig, executor: Rc<dyn UnitExecutor>) -> Result<Self> {
        Self::with_resolver(config, executor, Rc::new(UrlResolver))
    }

    /// Create a scheduler with a custom path resolver
    pub fn with_resolver(
        config: LoaderConfig,
        executor: Rc<dyn UnitExecutor>,
        resolver: Rc<dyn PathResolver>,
    ) -> Result<Self> {
        let root = config.root.clone();
        let scheduler = Self {
            shared: Rc::new(Shared {
                state: RefCell::new(State::default()),
                executor,
                resolver,
                listeners: RefCell::new(Vec::new()),
                config,
            }),
        };
        scheduler.context(root)?;
        info!(paths = ?scheduler.root().base_paths(), "scheduler created");
        Ok(scheduler)
    }

    pub(crate) fn from_weak(shared: &Weak<Shared>) -> Option<Self> {
        shared.upgrade().map(|shared| Self { shared })
    }

    pub(crate) fn downgrade(&self) -> Weak<Shared> {
        Rc::downgrade(&self.shared)
    }

    pub(crate) fn state(&self) -> Ref<'_, State> {
        self.shared.state.borrow()
    }

    pub(crate) fn state_mut(&self) -> RefMut<'_, State> {
        self.shared.state.borrow_mut()
    }

    pub(crate) fn resolver(&self) -> &dyn PathResolver {
        &*self.shared.resolver
    }

    /// Scheduler configuration
    pub fn config(&self) -> &LoaderConfig {
        &self.shared.config
    }

    /// The root context
    pub fn root(&self) -> Context {
        Context::new(self.clone(), ContextId(0))
    }

    /// The context `require` currently resolves through: the innermost
    /// [`Context::use_with`], else the root
    pub fn ambient(&self) -> Context {
        let id = self.state().ambient.last().copied().unwrap_or(ContextId(0));
        Context::new(self.clone(), id)
    }

    /// Create a fresh context. Base paths are taken as given.
    pub fn context(&self, config: ContextConfig) -> Result<Context> {
        let id = {
            let mut state = self.state_mut();
            let id = ContextId(state.contexts.len());
            state.contexts.push(ContextRecord::new(config.base_paths));
            id
        };
        let context = Context::new(self.clone(), id);
        for (key, value) in config.preloaded {
            context.preload(&key, Value::from(value))?;
        }
        Ok(context)
    }

    /// Every context, root first
    pub fn contexts(&self) -> Vec<Context> {
        let count = self.state().contexts.len();
        (0..count)
            .map(|index| Context::new(self.clone(), ContextId(index)))
            .collect()
    }

    /// [`Context::require`] through the ambient context
    pub fn require(&self, id: &str) -> Result<Exports> {
        self.ambient().require(id)
    }

    /// [`Context::request`] through the ambient context
    pub fn request(&self, id: &str) -> Result<Module> {
        self.ambient().request(id)
    }

    /// [`Context::define`] through the ambient context
    pub fn define<F>(&self, id: Option<&str>, dependencies: &[&str], factory: F) -> Result<Module>
    where
        F: Fn(&Scope, &[Exports]) -> anyhow::Result<Option<Value>> + 'static,
    {
        self.ambient().define(id, dependencies, factory)
    }

    /// The unit currently executing
    pub fn running(&self) -> Option<UnitId> {
        self.state().running
    }

    /// Id of the unit currently executing
    pub fn running_id(&self) -> Option<String> {
        let state = self.state();
        state.running.map(|unit| state.units[unit.0].key.clone())
    }

    /// Number of units with status running; never more than one
    pub fn running_count(&self) -> usize {
        self.state()
            .units
            .iter()
            .filter(|unit| unit.status == UnitStatus::Running)
            .count()
    }

    /// Status of a unit by arena index
    pub fn status_of(&self, unit: UnitId) -> Option<UnitStatus> {
        self.state().units.get(unit.0).map(|unit| unit.status)
    }

    /// Declare that the initial batch of units is fully known. Quiescence
    /// can only be reported after this.
    pub fn mark_batch_known(&self) {
        debug!("batch known");
        self.state_mut().batch_known = true;
        self.settle();
    }

    /// Call `listener` once nothing is pending or running after the batch
    /// is known. Called immediately if that already happened.
    pub fn on_quiescent(&self, listener: impl FnOnce(&LoaderStats) + 'static) {
        let stats = {
            let state = self.state();
            if !state.quiesced {
                drop(state);
                self.shared.listeners.borrow_mut().push(Box::new(listener));
                return;
            }
            state.stats()
        };
        listener(&stats);
    }

    /// Whether nothing is pending or running right now, with the batch
    /// known. Unlike the quiescence event, this turns false again when new
    /// work is queued.
    pub fn is_quiescent(&self) -> bool {
        self.state().is_idle()
    }

    /// Number of units not yet settled
    pub fn pending_count(&self) -> usize {
        self.state()
            .units
            .iter()
            .filter(|unit| !unit.status.is_settled())
            .count()
    }

    /// Snapshot of the scheduler counters
    pub fn stats(&self) -> LoaderStats {
        self.state().stats()
    }

    /// Run every unit that can run, one at a time.
    ///
    /// Returns early while a unit is running; its completion advances
    /// again. Fails with [`LoadError::Stalled`] when pending units can never
    /// run, which requires cycle breaking to be disabled.
    pub fn advance(&self) -> Result<()> {
        {
            let mut state = self.state_mut();
            if state.advancing || state.running.is_some() {
                return Ok(());
            }
            state.advancing = true;
        }

        let result = self.advance_loop();
        self.state_mut().advancing = false;
        self.check_quiescence();
        result
    }

    fn advance_loop(&self) -> Result<()> {
        loop {
            let next = {
                let mut state = self.state_mut();
                if state.running.is_some() {
                    return Ok(());
                }
                if let Some(unit) = state.next_runnable() {
                    Ok(unit)
                } else if !state.has_pending() {
                    return Ok(());
                } else {
                    let cycle = if self.shared.config.break_cycles {
                        state.find_any_cycle()
                    } else {
                        None
                    };
                    match cycle {
                        Some((parent, target)) => {
                            state.units[parent.0].allow(target);
                            debug!(
                                unit = %state.units[parent.0].key,
                                dependency = %state.units[target.0].key,
                                "allow"
                            );
                            continue;
                        }
                        None => Err(state.fail_stalled()),
                    }
                }
            };

            match next {
                Ok(unit) => {
                    trace!(unit = %unit, "next");
                    self.run_unit(unit);
                }
                Err(units) => {
                    warn!(units = ?units, "scheduler stalled");
                    return Err(LoadError::Stalled { units });
                }
            }
        }
    }

    /// Advance, logging instead of returning a stall
    pub(crate) fn settle(&self) {
        if let Err(err) = self.advance() {
            debug!(error = %err, "advance failed");
        }
    }

    fn run_unit(&self, id: UnitId) {
        let max_replays = self.shared.config.max_replays;
        let launch = {
            let mut state = self.state_mut();
            let unit = &mut state.units[id.0];

            if unit.replays > max_replays {
                None
            } else {
                unit.status = UnitStatus::Running;
                unit.attempt += 1;
                unit.defines = 0;
                let attempt = unit.attempt;
                let source = unit.source.clone();
                let key = unit.key.clone();
                let location = unit.location.clone();
                debug!(unit = %key, location = ?location, attempt, "loading");

                state.running = Some(id);
                Some((attempt, source, key, location))
            }
        };

        let Some((attempt, source, key, location)) = launch else {
            let error = LoadError::ExecutionFailed {
                id: self.unit_key(id),
                message: format!("aborted more than {} times", max_replays),
            };
            self.settle_failed(id, error);
            return;
        };

        let completion = Completion::new(self.downgrade(), id, attempt);
        match source {
            UnitSource::Callback(body) => completion.execute(&body),
            UnitSource::Location { .. } => {
                let request = VehicleRequest {
                    unit: key.clone(),
                    location: location.unwrap_or(key),
                    attempt,
                };
                let vehicle = self.shared.executor.create_vehicle(&request);
                if let Some(unit) = self.state_mut().units.get_mut(id.0) {
                    if unit.is_current(attempt) {
                        unit.vehicle = Some(vehicle);
                    }
                }
                self.shared.executor.start(vehicle, completion);
            }
            UnitSource::Preloaded => {
                self.finish_loaded(id, attempt);
            }
        }
    }

    pub(crate) fn is_current(&self, unit: UnitId, attempt: u32) -> bool {
        self.state().units[unit.0].is_current(attempt)
    }

    pub(crate) fn scope(&self, unit: UnitId, attempt: u32) -> Scope {
        let (module, context) = {
            let state = self.state();
            let record = &state.units[unit.0];
            (record.module.clone(), record.context)
        };
        Scope::new(self.clone(), unit, attempt, module, Context::new(self.clone(), context))
    }

    pub(crate) fn unit_key(&self, unit: UnitId) -> String {
        self.state().units[unit.0].key.clone()
    }

    pub(crate) fn unit_location(&self, unit: UnitId) -> Option<String> {
        self.state().units[unit.0].location.clone()
    }

    /// Resolve a dependency edge from `requester` (or from the top level)
    /// to `dependency`.
    pub(crate) fn require_unit(&self, requester: Option<UnitId>, dependency: UnitId) -> Result<Exports> {
        {
            let mut state = self.state_mut();
            if let Some(outcome) = settled_exports(&state, requester, dependency) {
                return outcome;
            }
            if let Some(requester) = requester {
                if state.units[requester.0].allowed.contains(&dependency) {
                    trace!(unit = %requester, dependency = %dependency, "allowed early access");
                    return Ok(state.units[dependency.0].module.exports());
                }
                if state.units[requester.0].depend(dependency) {
                    debug!(
                        unit = %state.units[requester.0].key,
                        dependency = %state.units[dependency.0].key,
                        "depend"
                    );
                }
            }
        }

        self.settle();

        let state = self.state();
        if let Some(outcome) = settled_exports(&state, requester, dependency) {
            return outcome;
        }
        match requester {
            Some(requester) => {
                let satisfied = satisfied(&state.units, requester);
                if satisfied {
                    return Ok(state.units[dependency.0].module.exports());
                }
                drop(state);
                self.abort(requester);
                Err(LoadError::Abort)
            }
            None => Err(LoadError::Unsettled {
                id: state.units[dependency.0].key.clone(),
            }),
        }
    }

    /// Stop a running unit so it can be replayed later
    pub(crate) fn abort(&self, id: UnitId) {
        let vehicle = {
            let mut state = self.state_mut();
            let unit = &mut state.units[id.0];
            if unit.status != UnitStatus::Running {
                return;
            }
            unit.status = UnitStatus::Pending;
            unit.attempt += 1;
            unit.replays += 1;
            let vehicle = unit.vehicle.take();
            debug!(unit = %unit.key, replays = unit.replays, "stopped");
            if state.running == Some(id) {
                state.running = None;
            }
            vehicle
        };

        if let Some(vehicle) = vehicle {
            self.shared.executor.destroy(vehicle);
        }
    }

    /// Record a successful run. Returns false for a stale completion.
    pub(crate) fn finish_loaded(&self, id: UnitId, attempt: u32) -> bool {
        let mut state = self.state_mut();
        let unit = &mut state.units[id.0];
        if !unit.is_current(attempt) {
            return false;
        }
        unit.status = UnitStatus::Loaded;
        unit.vehicle = None;
        let (context, key) = (unit.context, unit.key.clone());
        debug!(unit = %key, "loaded");

        if state.running == Some(id) {
            state.running = None;
        }
        state.contexts[context.0].mark_loaded(&key, id);
        true
    }

    /// Record a failed run, moving on to the next fallback location if one
    /// remains. Returns false for a stale completion.
    pub(crate) fn finish_failed(&self, id: UnitId, attempt: u32, error: LoadError) -> bool {
        if !self.is_current(id, attempt) {
            return false;
        }
        self.fail_unit(id, error);
        true
    }

    fn settle_failed(&self, id: UnitId, error: LoadError) {
        let mut state = self.state_mut();
        let unit = &mut state.units[id.0];
        unit.status = UnitStatus::Failed;
        unit.failure = Some(error);
        let (context, key) = (unit.context, unit.key.clone());
        warn!(unit = %key, "failed");
        state.contexts[context.0].mark_failed(&key, id);
    }

    fn fail_unit(&self, id: UnitId, error: LoadError) {
        let mut state = self.state_mut();
        if state.running == Some(id) {
            state.running = None;
        }

        let unit = &mut state.units[id.0];
        unit.vehicle = None;
        let failed_location = unit.location.clone();
        if let Some(location) = &failed_location {
            unit.tried.push(location.clone());
        }
        let retry = unit.next_location(self.resolver());
        let (context, key, requester) = (unit.context, unit.key.clone(), unit.requester);

        if let Some(location) = failed_location {
            let aliases = &mut state.contexts[context.0].aliases;
            if aliases.get(&location) == Some(&id) {
                aliases.remove(&location);
            }
        }

        if retry {
            let unit = &mut state.units[id.0];
            unit.status = UnitStatus::Pending;
            debug!(unit = %key, error = %error, next = ?unit.location, "trying next location");
            if matches!(error, LoadError::ExecutionFailed { .. }) && unit.first_error.is_none() {
                unit.first_error = Some(error);
            }
            if let Some(next) = unit.location.clone() {
                state.contexts[context.0].aliases.entry(next).or_insert(id);
            }
            return;
        }

        let requester = requester.map(|requester| state.units[requester.0].key.clone());
        let unit = &mut state.units[id.0];
        // Code that ran and failed beats a later location that does not exist
        let failure = match (error, unit.first_error.take()) {
            (LoadError::NotFound { .. }, Some(earlier)) => earlier,
            (LoadError::NotFound { .. }, None) => LoadError::NotFound {
                id: key.clone(),
                tried: unit.tried.clone(),
                requester,
            },
            (other, _) => other,
        };
        warn!(unit = %key, error = %failure, "failed");
        unit.status = UnitStatus::Failed;
        unit.failure = Some(failure);
        state.contexts[context.0].mark_failed(&key, id);
    }

    /// Run `f` with `context` on top of the ambient stack
    pub(crate) fn with_ambient<R>(&self, context: ContextId, f: impl FnOnce() -> R) -> R {
        self.state_mut().ambient.push(context);
        let _guard = StackGuard {
            scheduler: self,
            unit: false,
        };
        f()
    }

    /// Run the body of `unit`: it becomes the requester of every load made
    /// by `f`, and its context becomes ambient
    pub(crate) fn enter<R>(&self, unit: UnitId, context: ContextId, f: impl FnOnce() -> R) -> R {
        {
            let mut state = self.state_mut();
            state.active.push(unit);
            state.ambient.push(context);
        }
        let _guard = StackGuard {
            scheduler: self,
            unit: true,
        };
        f()
    }

    /// The unit on whose behalf loads are made right now
    pub(crate) fn requester(&self) -> Option<UnitId> {
        self.state().active.last().copied()
    }

    fn check_quiescence(&self) {
        let stats = {
            let mut state = self.state_mut();
            if state.quiesced || !state.is_idle() {
                return;
            }
            state.quiesced = true;
            state.stats()
        };

        info!(loaded = stats.loaded, failed = stats.failed, "quiescent");
        let listeners = std::mem::take(&mut *self.shared.listeners.borrow_mut());
        for listener in listeners {
            listener(&stats);
        }
    }
}

struct StackGuard<'a> {
    scheduler: &'a Scheduler,
    unit: bool,
}

impl Drop for StackGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.scheduler.state_mut();
        state.ambient.pop();
        if self.unit {
            state.active.pop();
        }
    }
}

/// Outcome of requiring `dependency` if it needs no waiting
fn settled_exports(
    state: &State,
    requester: Option<UnitId>,
    dependency: UnitId,
) -> Option<Result<Exports>> {
    let unit = &state.units[dependency.0];
    if requester == Some(dependency) {
        return Some(Ok(unit.module.exports()));
    }
    match unit.status {
        UnitStatus::Loaded => Some(Ok(unit.module.exports())),
        UnitStatus::Failed => Some(Err(unit.failure.clone().unwrap_or_else(|| {
            LoadError::ExecutionFailed {
                id: unit.key.clone(),
                message: "failed".to_string(),
            }
        }))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::MemoryExecutor;

    fn scheduler(paths: &[&str]) -> (Scheduler, Rc<MemoryExecutor>) {
        let executor = Rc::new(MemoryExecutor::new());
        let scheduler =
            Scheduler::new(LoaderConfig::with_paths(paths.iter().copied()), executor.clone()).unwrap();
        (scheduler, executor)
    }

    #[test]
    fn test_resolve_targets() {
        let (scheduler, _) = scheduler(&["/a/", "/b/"]);
        let state = scheduler.state();

        let bare = state
            .resolve_target(&UrlResolver, ContextId(0), "x", None)
            .unwrap();
        assert_eq!(bare.key, "x");
        assert_eq!(bare.location.as_deref(), Some("/a/x"));
        assert_eq!(bare.remaining, VecDeque::from(vec!["/b/".to_string()]));

        let relative = state
            .resolve_target(&UrlResolver, ContextId(0), "./y", None)
            .unwrap();
        assert_eq!(relative.key, "/a/y");
        assert!(relative.remaining.is_empty());

        let rooted = state
            .resolve_target(&UrlResolver, ContextId(0), "/lib/../z", None)
            .unwrap();
        assert_eq!(rooted.key, "/z");
    }

    #[test]
    fn test_invalid_ids_are_rejected() {
        let (scheduler, _) = scheduler(&["/"]);
        assert!(matches!(
            scheduler.require(""),
            Err(LoadError::InvalidId { .. })
        ));
        assert!(matches!(
            scheduler.require("a\0b"),
            Err(LoadError::InvalidId { .. })
        ));
    }

    #[test]
    fn test_same_id_same_unit() {
        let (scheduler, _) = scheduler(&["/a/"]);
        let mut state = scheduler.state_mut();
        let first = state
            .find_or_create(&UrlResolver, ContextId(0), "x", None)
            .unwrap();
        let second = state
            .find_or_create(&UrlResolver, ContextId(0), "x", None)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(state.units.len(), 1);
    }

    #[test]
    fn test_stats_count_statuses() {
        let (scheduler, executor) = scheduler(&["/"]);
        executor.insert_value("/a", Value::from(1));
        scheduler.require("a").unwrap();
        let _ = scheduler.require("missing");

        let stats = scheduler.stats();
        assert_eq!(stats.units, 2);
        assert_eq!(stats.loaded, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.running, None);
    }

    #[test]
    fn test_on_quiescent_after_the_fact_fires_immediately() {
        let (scheduler, _) = scheduler(&["/"]);
        scheduler.mark_batch_known();
        assert!(scheduler.is_quiescent());

        let fired = Rc::new(RefCell::new(0));
        let counter = fired.clone();
        scheduler.on_quiescent(move |_| *counter.borrow_mut() += 1);
        assert_eq!(*fired.borrow(), 1);
    }
}
