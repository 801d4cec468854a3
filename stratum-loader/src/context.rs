//! Loading contexts: caches of units sharing a base-location search list

use crate::config::ContextConfig;
use crate::executor::UnitBody;
use crate::scheduler::{Scheduler, State};
use crate::scope::Scope;
use crate::unit::{satisfied, UnitId, UnitSource, UnitStatus};
use crate::value::{Exports, Module, Value};
use crate::{LoadError, Result};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace};

/// Index of a context within its scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ContextId(pub(crate) usize);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0)
    }
}

/// Unit cache of one context. `loaded`, `failed` and `pending` are disjoint
/// and together hold every unit ever created here; running units stay in
/// `pending`.
#[derive(Debug)]
pub(crate) struct ContextRecord {
    pub base_paths: Vec<String>,
    pub loaded: IndexMap<String, UnitId>,
    pub failed: IndexMap<String, UnitId>,
    pub pending: IndexMap<String, UnitId>,
    /// Current fetch location of every unit that is not failed, so ids
    /// written differently but naming one location share a unit
    pub aliases: FxHashMap<String, UnitId>,
}

impl ContextRecord {
    pub fn new(base_paths: Vec<String>) -> Self {
        Self {
            base_paths,
            loaded: IndexMap::new(),
            failed: IndexMap::new(),
            pending: IndexMap::new(),
            aliases: FxHashMap::default(),
        }
    }

    pub fn lookup(&self, key: &str) -> Option<UnitId> {
        self.loaded
            .get(key)
            .or_else(|| self.pending.get(key))
            .or_else(|| self.failed.get(key))
            .or_else(|| self.aliases.get(key))
            .copied()
    }

    fn detach(&mut self, key: &str) {
        self.loaded.shift_remove(key);
        self.failed.shift_remove(key);
        self.pending.shift_remove(key);
    }

    pub fn mark_pending(&mut self, key: &str, unit: UnitId) {
        self.detach(key);
        self.pending.insert(key.to_string(), unit);
    }

    pub fn mark_loaded(&mut self, key: &str, unit: UnitId) {
        self.detach(key);
        self.loaded.insert(key.to_string(), unit);
    }

    pub fn mark_failed(&mut self, key: &str, unit: UnitId) {
        self.detach(key);
        self.failed.insert(key.to_string(), unit);
    }

    pub fn unit_ids(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.loaded
            .values()
            .chain(self.failed.values())
            .chain(self.pending.values())
            .copied()
    }
}

/// Memo key for derived contexts: a replayed call site must get back the
/// context it created the first time
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CloneKey {
    pub parent: ContextId,
    pub origin: Option<String>,
    pub call_site: String,
    pub paths: Vec<String>,
}

/// Snapshot of a unit for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct UnitInfo {
    /// Canonical id
    pub id: String,
    /// Current status
    pub status: UnitStatus,
    /// Current or final fetch location
    pub location: Option<String>,
    /// Locations that failed, in order
    pub tried: Vec<String>,
    /// Declared dependencies
    pub dependencies: Vec<String>,
    /// Dependencies allowed to break a cycle
    pub allowed: Vec<String>,
    /// Unit that first requested this one
    pub requester: Option<String>,
    /// Failure, once failed
    pub error: Option<String>,
}

/// Handle to a loading context.
///
/// All units are owned by exactly one context. Handles are cheap to clone
/// and share the scheduler they were created by.
#[derive(Clone)]
pub struct Context {
    scheduler: Scheduler,
    id: ContextId,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("base_paths", &self.base_paths())
            .finish()
    }
}

impl Context {
    pub(crate) fn new(scheduler: Scheduler, id: ContextId) -> Self {
        Self { scheduler, id }
    }

    /// Identifier of this context
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// The scheduler owning this context
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Ordered base locations searched for bare ids
    pub fn base_paths(&self) -> Vec<String> {
        self.scheduler.state().contexts[self.id.0].base_paths.clone()
    }

    /// Resolve `id` and return its exports.
    ///
    /// Inside a running unit, an unsettled dependency aborts the unit with
    /// [`LoadError::Abort`]; propagate it with `?` and the unit is replayed
    /// from its start once the dependency settles. Outside of any unit an
    /// unsettled dependency yields [`LoadError::Unsettled`].
    pub fn require(&self, id: &str) -> Result<Exports> {
        let requester = self.scheduler.requester();
        debug!(context = %self.id, id, "require");

        let dependency = {
            let mut state = self.scheduler.state_mut();
            state.find_or_create(self.scheduler.resolver(), self.id, id, requester)?
        };
        self.scheduler.require_unit(requester, dependency)
    }

    /// Queue `id` for loading without waiting for it, as a host does with
    /// its initial batch of units. Returns the unit's module, whose exports
    /// fill in once it loads.
    pub fn request(&self, id: &str) -> Result<Module> {
        let requester = self.scheduler.requester();
        let unit = {
            let mut state = self.scheduler.state_mut();
            state.find_or_create(self.scheduler.resolver(), self.id, id, requester)?
        };
        debug!(context = %self.id, id, "queued");

        self.scheduler.settle();
        Ok(self.scheduler.state().units[unit.0].module.clone())
    }

    /// Define a unit from a factory and explicit dependency ids.
    ///
    /// The factory receives the dependencies' exports in order; a returned
    /// value replaces the unit's exports. Without an `id`, a deterministic
    /// synthetic id is derived from the calling unit, so a replayed caller
    /// defines the same unit again rather than a new one. A calling unit
    /// that is left unsatisfied by the definition is aborted and replayed.
    pub fn define<F>(&self, id: Option<&str>, dependencies: &[&str], factory: F) -> Result<Module>
    where
        F: Fn(&Scope, &[Exports]) -> anyhow::Result<Option<Value>> + 'static,
    {
        let requester = self.scheduler.requester();

        let unit = {
            let mut state = self.scheduler.state_mut();
            let key = define_key(&mut state, id, requester)?;

            let deps = dependencies
                .iter()
                .map(|dep| state.find_or_create(self.scheduler.resolver(), self.id, dep, requester))
                .collect::<Result<Vec<_>>>()?;
            let body = define_body(deps.clone(), factory);

            let unit = match state.contexts[self.id.0].lookup(&key) {
                Some(existing) => {
                    let record = &mut state.units[existing.0];
                    let replaceable = record.status == UnitStatus::Pending
                        && matches!(record.source, UnitSource::Location { .. });
                    if replaceable {
                        record.source = UnitSource::Callback(body);
                        record.remaining.clear();
                        if let Some(location) = record.location.take() {
                            let aliases = &mut state.contexts[self.id.0].aliases;
                            if aliases.get(&location) == Some(&existing) {
                                aliases.remove(&location);
                            }
                        }
                    } else {
                        trace!(context = %self.id, id = %key, "already defined");
                    }
                    existing
                }
                None => state.create_unit(
                    self.id,
                    key.clone(),
                    UnitSource::Callback(body),
                    None,
                    Default::default(),
                    requester,
                ),
            };

            if state.units[unit.0].status == UnitStatus::Pending {
                for dep in deps {
                    state.units[unit.0].depend(dep);
                }
            }
            if let Some(requester) = requester {
                state.units[requester.0].depend(unit);
            }
            debug!(context = %self.id, id = %key, "define");
            unit
        };

        self.scheduler.settle();

        if let Some(requester) = requester {
            let unsatisfied = {
                let state = self.scheduler.state();
                state.units[requester.0].status == UnitStatus::Running
                    && !satisfied(&state.units, requester)
            };
            if unsatisfied {
                self.scheduler.abort(requester);
                return Err(LoadError::Abort);
            }
        }

        Ok(self.scheduler.state().units[unit.0].module.clone())
    }

    /// Derive a context searching `config.base_paths`.
    ///
    /// Derived contexts are memoized per call site, calling unit and paths,
    /// so a unit replayed after an abort gets the same context (and its
    /// cache) back.
    #[track_caller]
    pub fn derive(&self, config: ContextConfig) -> Result<Context> {
        let caller = std::panic::Location::caller();
        let call_site = format!("{}:{}:{}", caller.file(), caller.line(), caller.column());
        self.derive_at(&call_site, config)
    }

    /// [`Context::derive`] with an explicit call-site identifier
    pub fn derive_at(&self, call_site: &str, config: ContextConfig) -> Result<Context> {
        let requester = self.scheduler.requester();

        let (key, base) = {
            let state = self.scheduler.state();
            let origin = requester.map(|unit| state.units[unit.0].key.clone());
            let key = CloneKey {
                parent: self.id,
                origin,
                call_site: call_site.to_string(),
                paths: config.base_paths.clone(),
            };
            if let Some(&existing) = state.clones.get(&key) {
                trace!(context = %existing, call_site, "reusing derived context");
                return Ok(Context::new(self.scheduler.clone(), existing));
            }

            let base = requester
                .and_then(|unit| state.units[unit.0].location.clone())
                .or_else(|| state.contexts[self.id.0].base_paths.first().cloned())
                .unwrap_or_default();
            (key, base)
        };

        let resolver = self.scheduler.resolver();
        let config = ContextConfig {
            base_paths: config
                .base_paths
                .iter()
                .map(|path| resolver.absolute(path, &base))
                .collect(),
            preloaded: config.preloaded,
        };
        let context = self.scheduler.context(config)?;
        self.scheduler.state_mut().clones.insert(key, context.id);
        debug!(parent = %self.id, context = %context.id, "derived context");
        Ok(context)
    }

    /// Run `f` with this context as the ambient default, so
    /// [`Scheduler::require`] and [`Scope::require`] resolve through it.
    pub fn use_with<R>(&self, f: impl FnOnce() -> R) -> R {
        debug!(context = %self.id, paths = ?self.base_paths(), "use");
        self.scheduler.with_ambient(self.id, f)
    }

    /// Seed `id` as already loaded with `value` as its exports
    pub fn preload(&self, id: &str, value: impl Into<Value>) -> Result<Module> {
        let mut state = self.scheduler.state_mut();
        let target = state.resolve_target(self.scheduler.resolver(), self.id, id, None)?;
        if state.existing(self.id, &target).is_some() {
            return Err(LoadError::AlreadyLoaded { id: target.key });
        }

        let unit = state.create_unit(
            self.id,
            target.key.clone(),
            UnitSource::Preloaded,
            target.location,
            Default::default(),
            None,
        );
        let record = &mut state.units[unit.0];
        record.status = UnitStatus::Loaded;
        record.module.exports().replace(value);
        let module = record.module.clone();
        state.contexts[self.id.0].mark_loaded(&target.key, unit);
        trace!(context = %self.id, id = %target.key, "preloaded");
        Ok(module)
    }

    fn find(&self, id: &str) -> Option<UnitId> {
        let requester = self.scheduler.requester();
        let state = self.scheduler.state();
        let target = state
            .resolve_target(self.scheduler.resolver(), self.id, id, requester)
            .ok()?;
        state.existing(self.id, &target)
    }

    /// Status of `id`, if it has been requested in this context
    pub fn status(&self, id: &str) -> Option<UnitStatus> {
        let unit = self.find(id)?;
        Some(self.scheduler.state().units[unit.0].status)
    }

    /// Module of `id`, if it has been requested in this context
    pub fn module(&self, id: &str) -> Option<Module> {
        let unit = self.find(id)?;
        Some(self.scheduler.state().units[unit.0].module.clone())
    }

    /// Current fetch location of `id`; the final one once loaded
    pub fn location(&self, id: &str) -> Option<String> {
        let unit = self.find(id)?;
        self.scheduler.state().units[unit.0].location.clone()
    }

    /// Snapshot of every unit in this context: loaded, then failed, then
    /// pending
    pub fn units(&self) -> Vec<UnitInfo> {
        let state = self.scheduler.state();
        state.contexts[self.id.0]
            .unit_ids()
            .map(|unit| state.unit_info(unit))
            .collect()
    }

    /// Render `id` relative to the first base path containing it
    pub fn relative(&self, id: &str) -> String {
        let state = self.scheduler.state();
        state.contexts[self.id.0]
            .base_paths
            .iter()
            .filter(|base| !base.is_empty())
            .find_map(|base| id.strip_prefix(base.as_str()))
            .unwrap_or(id)
            .to_string()
    }
}

fn define_key(state: &mut State, id: Option<&str>, requester: Option<UnitId>) -> Result<String> {
    match (id, requester) {
        (Some(name), _) => {
            if name.trim().is_empty() || name.contains('\0') {
                return Err(LoadError::InvalidId { id: name.to_string() });
            }
            Ok(name.to_string())
        }
        (None, Some(requester)) => {
            let unit = &mut state.units[requester.0];
            unit.defines += 1;
            Ok(format!("{}#define{}", unit.key, unit.defines))
        }
        (None, None) => {
            state.anonymous += 1;
            Ok(format!("<define:{}>", state.anonymous))
        }
    }
}

fn define_body<F>(dependencies: Vec<UnitId>, factory: F) -> UnitBody
where
    F: Fn(&Scope, &[Exports]) -> anyhow::Result<Option<Value>> + 'static,
{
    Rc::new(move |scope: &Scope| {
        let exports = dependencies
            .iter()
            .map(|dep| scope.require_unit(*dep))
            .collect::<Result<Vec<_>>>()?;
        if let Some(value) = factory(scope, &exports)? {
            scope.exports().replace(value);
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_partitions_units() {
        let mut record = ContextRecord::new(vec!["/".to_string()]);
        record.mark_pending("a", UnitId(0));
        record.mark_pending("b", UnitId(1));
        assert_eq!(record.lookup("a"), Some(UnitId(0)));

        record.mark_loaded("a", UnitId(0));
        record.mark_failed("b", UnitId(1));
        assert!(record.pending.is_empty());
        assert_eq!(record.loaded.len(), 1);
        assert_eq!(record.failed.len(), 1);
        assert_eq!(record.unit_ids().collect::<Vec<_>>(), vec![UnitId(0), UnitId(1)]);
    }

    #[test]
    fn test_aliases_resolve_after_maps() {
        let mut record = ContextRecord::new(vec![]);
        record.mark_loaded("x", UnitId(0));
        record.aliases.insert("/lib/x".to_string(), UnitId(0));
        assert_eq!(record.lookup("/lib/x"), Some(UnitId(0)));
        assert_eq!(record.lookup("/lib/y"), None);
    }
}
