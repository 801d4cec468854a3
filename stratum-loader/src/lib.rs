//! Stratum unit loader
//!
//! This crate loads interdependent units of code with a cooperative
//! scheduler, including:
//! - One unit running at a time, replayed from its start after an abort
//! - Fallback through ordered base locations
//! - Circular dependency breaking
//! - Isolated, memoized loading contexts
//! - Quiescence notification once the initial batch has settled
//!
//! ```ignore
//! let executor = Rc::new(MemoryExecutor::new());
//! executor.insert("/lib/a", |scope| {
//!     let b = scope.require("./b")?;
//!     scope.exports().set("value", b.get("value").and_then(|v| v.as_i64()).unwrap_or(0) + 1);
//!     Ok(())
//! });
//! executor.insert_value("/lib/b", serde_json::json!({"value": 41}));
//!
//! let scheduler = Scheduler::new(LoaderConfig::with_paths(["/lib/"]), executor)?;
//! let a = scheduler.require("a")?;
//! assert_eq!(a.get("value"), Some(Value::Integer(42)));
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod resolver;
pub mod scheduler;
pub mod scope;
pub mod unit;
pub mod value;

pub use config::{ContextConfig, LoaderConfig};
pub use context::{Context, ContextId, UnitInfo};
pub use error::{filter, LoadError, Result};
pub use executor::{
    Completion, Dispatch, ManifestExecutor, MemoryExecutor, UnitBody, UnitExecutor, UnitManifest,
    VehicleHandle, VehicleRequest,
};
pub use resolver::{PathResolver, UrlResolver};
pub use scheduler::{LoaderStats, Scheduler};
pub use scope::Scope;
pub use unit::{UnitId, UnitStatus};
pub use value::{Exports, Module, Value};
