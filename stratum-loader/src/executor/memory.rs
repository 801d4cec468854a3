//! In-memory executor serving unit code registered by location

use super::{Completion, UnitBody, UnitExecutor, VehicleHandle, VehicleRequest};
use crate::scope::Scope;
use crate::value::Value;
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::trace;

/// When started units actually run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dispatch {
    /// Run inside `start`
    #[default]
    Immediate,
    /// Queue until [`MemoryExecutor::pump`]
    Deferred,
}

#[derive(Clone)]
enum Source {
    Body(UnitBody),
    Value(Value),
}

/// Executor backed by a map from location to code.
///
/// Locations with nothing registered report not-found, so fallback order
/// can be observed through [`MemoryExecutor::fetch_log`].
#[derive(Default)]
pub struct MemoryExecutor {
    dispatch: Dispatch,
    sources: RefCell<FxHashMap<String, Source>>,
    vehicles: RefCell<FxHashMap<VehicleHandle, VehicleRequest>>,
    queue: RefCell<VecDeque<(VehicleHandle, Completion)>>,
    fetches: RefCell<Vec<String>>,
    next_vehicle: Cell<u64>,
}

impl MemoryExecutor {
    /// Executor running units as soon as they start
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor holding started units until pumped
    pub fn deferred() -> Self {
        Self {
            dispatch: Dispatch::Deferred,
            ..Self::default()
        }
    }

    /// Register code at `location`
    pub fn insert<F>(&self, location: impl Into<String>, body: F)
    where
        F: Fn(&Scope) -> anyhow::Result<()> + 'static,
    {
        self.sources
            .borrow_mut()
            .insert(location.into(), Source::Body(Rc::new(body)));
    }

    /// Register a unit at `location` whose exports are `value`
    pub fn insert_value(&self, location: impl Into<String>, value: impl Into<Value>) {
        self.sources
            .borrow_mut()
            .insert(location.into(), Source::Value(value.into()));
    }

    /// Every location fetched so far, in order
    pub fn fetch_log(&self) -> Vec<String> {
        self.fetches.borrow().clone()
    }

    /// Vehicles created and not yet run or destroyed
    pub fn live_vehicles(&self) -> usize {
        self.vehicles.borrow().len()
    }

    /// Number of started units waiting to run
    pub fn queued(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Run the oldest queued unit. Returns false when nothing was queued.
    pub fn pump(&self) -> bool {
        let next = self.queue.borrow_mut().pop_front();
        match next {
            Some((vehicle, completion)) => {
                self.run(vehicle, completion);
                true
            }
            None => false,
        }
    }

    /// Pump until the queue is empty, returning how many units ran
    pub fn run_until_idle(&self) -> usize {
        let mut count = 0;
        while self.pump() {
            count += 1;
        }
        count
    }

    fn run(&self, vehicle: VehicleHandle, completion: Completion) {
        let Some(request) = self.vehicles.borrow_mut().remove(&vehicle) else {
            trace!(%vehicle, "vehicle destroyed before running");
            return;
        };

        self.fetches.borrow_mut().push(request.location.clone());
        let source = self.sources.borrow().get(&request.location).cloned();
        match source {
            Some(Source::Body(body)) => completion.execute(&body),
            Some(Source::Value(value)) => completion.resolve_with(value),
            None => completion.not_found(),
        }
    }
}

impl UnitExecutor for MemoryExecutor {
    fn create_vehicle(&self, request: &VehicleRequest) -> VehicleHandle {
        let vehicle = VehicleHandle(self.next_vehicle.get());
        self.next_vehicle.set(vehicle.0 + 1);
        self.vehicles.borrow_mut().insert(vehicle, request.clone());
        trace!(%vehicle, unit = %request.unit, location = %request.location, "vehicle created");
        vehicle
    }

    fn start(&self, vehicle: VehicleHandle, completion: Completion) {
        match self.dispatch {
            Dispatch::Immediate => self.run(vehicle, completion),
            Dispatch::Deferred => self.queue.borrow_mut().push_back((vehicle, completion)),
        }
    }

    fn destroy(&self, vehicle: VehicleHandle) {
        if self.vehicles.borrow_mut().remove(&vehicle).is_some() {
            trace!(%vehicle, "vehicle destroyed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LoaderConfig, Scheduler, UnitStatus};

    #[test]
    fn test_unregistered_location_is_not_found() {
        let executor = Rc::new(MemoryExecutor::new());
        let scheduler = Scheduler::new(LoaderConfig::with_paths(["/"]), executor.clone()).unwrap();

        let err = scheduler.require("nothing").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(executor.fetch_log(), vec!["/nothing"]);
        assert_eq!(executor.live_vehicles(), 0);
    }

    #[test]
    fn test_deferred_runs_on_pump() {
        let executor = Rc::new(MemoryExecutor::deferred());
        executor.insert_value("/a", Value::from("ready"));
        let scheduler = Scheduler::new(LoaderConfig::with_paths(["/"]), executor.clone()).unwrap();

        let module = scheduler.request("a").unwrap();
        assert_eq!(scheduler.root().status("a"), Some(UnitStatus::Running));
        assert_eq!(executor.queued(), 1);

        assert!(executor.pump());
        assert!(!executor.pump());
        assert_eq!(module.exports().value(), Value::from("ready"));
        assert_eq!(scheduler.root().status("a"), Some(UnitStatus::Loaded));
    }
}
