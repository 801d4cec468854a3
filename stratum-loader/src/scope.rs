//! What a running unit body sees of the loader

use crate::config::ContextConfig;
use crate::context::Context;
use crate::scheduler::Scheduler;
use crate::unit::UnitId;
use crate::value::{Exports, Module, Value};
use crate::{LoadError, Result};
use std::fmt;

/// Handle passed to a unit body for one run.
///
/// A scope belongs to a single attempt. Once the unit has been aborted,
/// every loader call through the scope fails with [`LoadError::Abort`].
pub struct Scope {
    scheduler: Scheduler,
    unit: UnitId,
    attempt: u32,
    module: Module,
    context: Context,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("unit", &self.module.id())
            .field("attempt", &self.attempt)
            .finish()
    }
}

impl Scope {
    pub(crate) fn new(
        scheduler: Scheduler,
        unit: UnitId,
        attempt: u32,
        module: Module,
        context: Context,
    ) -> Self {
        Self {
            scheduler,
            unit,
            attempt,
            module,
            context,
        }
    }

    /// Canonical id of the running unit
    pub fn id(&self) -> &str {
        self.module.id()
    }

    /// Arena index of the running unit
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// The unit's module
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// The unit's exports container
    pub fn exports(&self) -> Exports {
        self.module.exports()
    }

    /// The scheduler running this unit
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The context owning this unit
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Location the unit is running from
    pub fn location(&self) -> Option<String> {
        self.scheduler.unit_location(self.unit)
    }

    /// Whether this run is still the live attempt of its unit
    pub fn is_current(&self) -> bool {
        self.scheduler.is_current(self.unit, self.attempt)
    }

    fn check(&self) -> Result<()> {
        if self.is_current() {
            Ok(())
        } else {
            Err(LoadError::Abort)
        }
    }

    /// Require `id` through the ambient context. Propagate the error with
    /// `?`: an [`LoadError::Abort`] means this run is over.
    pub fn require(&self, id: &str) -> Result<Exports> {
        self.check()?;
        self.scheduler.ambient().require(id)
    }

    /// Define a unit through the ambient context
    pub fn define<F>(&self, id: Option<&str>, dependencies: &[&str], factory: F) -> Result<Module>
    where
        F: Fn(&Scope, &[Exports]) -> anyhow::Result<Option<Value>> + 'static,
    {
        self.check()?;
        self.scheduler.ambient().define(id, dependencies, factory)
    }

    /// Derive a context from the unit's own context, with paths resolved
    /// against the unit's location
    #[track_caller]
    pub fn derive(&self, config: ContextConfig) -> Result<Context> {
        self.check()?;
        self.context.derive(config)
    }

    pub(crate) fn require_unit(&self, dependency: UnitId) -> Result<Exports> {
        self.check()?;
        self.scheduler.require_unit(Some(self.unit), dependency)
    }
}
