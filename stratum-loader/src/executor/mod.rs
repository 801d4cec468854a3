//! Executors fetch and run unit code on behalf of the scheduler

mod manifest;
mod memory;

pub use manifest::{ManifestExecutor, UnitManifest};
pub use memory::{Dispatch, MemoryExecutor};

use crate::error::is_abort;
use crate::scheduler::{Scheduler, Shared};
use crate::scope::Scope;
use crate::unit::UnitId;
use crate::value::Value;
use crate::LoadError;
use serde::Serialize;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{trace, warn};

/// Code of a unit. Bodies must be replay-safe: an aborted body runs again
/// from its start.
pub type UnitBody = Rc<dyn Fn(&Scope) -> anyhow::Result<()>>;

/// Opaque handle to whatever carries one run of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct VehicleHandle(pub u64);

impl fmt::Display for VehicleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vehicle-{}", self.0)
    }
}

/// What the scheduler asks an executor to fetch and run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleRequest {
    /// Canonical id of the unit
    pub unit: String,
    /// Location to fetch the code from
    pub location: String,
    /// Attempt number of this run
    pub attempt: u32,
}

/// Host-side mechanism for fetching and running units.
///
/// None of these methods may call back into the scheduler synchronously
/// except through the [`Completion`] handed to `start`.
pub trait UnitExecutor {
    /// Prepare a vehicle for one run
    fn create_vehicle(&self, request: &VehicleRequest) -> VehicleHandle;

    /// Fetch and run the unit; report the outcome through `completion`,
    /// now or later
    fn start(&self, vehicle: VehicleHandle, completion: Completion);

    /// Tear down a vehicle. Its pending completion may still arrive and is
    /// ignored.
    fn destroy(&self, vehicle: VehicleHandle);
}

/// Single-use report of how one run of a unit ended.
///
/// Completions for an aborted or superseded run are ignored.
pub struct Completion {
    shared: Weak<Shared>,
    unit: UnitId,
    attempt: u32,
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("unit", &self.unit)
            .field("attempt", &self.attempt)
            .finish()
    }
}

impl Completion {
    pub(crate) fn new(shared: Weak<Shared>, unit: UnitId, attempt: u32) -> Self {
        Self {
            shared,
            unit,
            attempt,
        }
    }

    /// The unit this completion reports for
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// Whether the run is still live
    pub fn is_current(&self) -> bool {
        self.live().is_some()
    }

    fn live(&self) -> Option<Scheduler> {
        let scheduler = Scheduler::from_weak(&self.shared)?;
        if scheduler.is_current(self.unit, self.attempt) {
            Some(scheduler)
        } else {
            trace!(unit = %self.unit, attempt = self.attempt, "stale completion");
            None
        }
    }

    /// Run `body` as the unit, with the unit's context ambient, and record
    /// the outcome
    pub fn execute(self, body: &UnitBody) {
        let Some(scheduler) = self.live() else {
            return;
        };

        let scope = scheduler.scope(self.unit, self.attempt);
        let context = scope.context().id();
        let outcome = scheduler.enter(self.unit, context, || body(&scope));

        match outcome {
            Ok(()) => {
                if !scheduler.finish_loaded(self.unit, self.attempt) {
                    warn!(unit = %scope.id(), "unit finished after being aborted; result discarded");
                }
            }
            Err(err) => self.record_error(&scheduler, err),
        }
        scheduler.settle();
    }

    /// Mark the unit loaded, leaving its exports as they are
    pub fn resolve(self) {
        let Some(scheduler) = self.live() else {
            return;
        };
        scheduler.finish_loaded(self.unit, self.attempt);
        scheduler.settle();
    }

    /// Mark the unit loaded with `value` as its exports
    pub fn resolve_with(self, value: impl Into<Value>) {
        let Some(scheduler) = self.live() else {
            return;
        };
        scheduler
            .scope(self.unit, self.attempt)
            .exports()
            .replace(value);
        scheduler.finish_loaded(self.unit, self.attempt);
        scheduler.settle();
    }

    /// Report that the code failed. An abort error is recognised and
    /// treated as an abort.
    pub fn fail(self, error: anyhow::Error) {
        let Some(scheduler) = self.live() else {
            return;
        };
        self.record_error(&scheduler, error);
        scheduler.settle();
    }

    /// Report that nothing exists at the requested location. The next
    /// fallback location is tried, if any.
    pub fn not_found(self) {
        let Some(scheduler) = self.live() else {
            return;
        };
        let location = scheduler
            .unit_location(self.unit)
            .unwrap_or_else(|| scheduler.unit_key(self.unit));
        scheduler.finish_failed(
            self.unit,
            self.attempt,
            LoadError::NotFound {
                id: location.clone(),
                tried: vec![location],
                requester: None,
            },
        );
        scheduler.settle();
    }

    fn record_error(&self, scheduler: &Scheduler, error: anyhow::Error) {
        if is_abort(&error) {
            if scheduler.is_current(self.unit, self.attempt) {
                scheduler.abort(self.unit);
            } else {
                trace!(unit = %self.unit, "abort trapped");
            }
            return;
        }

        let failure = LoadError::ExecutionFailed {
            id: scheduler.unit_key(self.unit),
            message: format!("{:#}", error),
        };
        scheduler.finish_failed(self.unit, self.attempt, failure);
    }
}
