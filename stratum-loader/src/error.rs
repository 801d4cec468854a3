//! Loader error types

use thiserror::Error;

/// Type alias for loader results
pub type Result<T> = std::result::Result<T, LoadError>;

/// Errors that can occur while loading units
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    /// Control-flow signal used to unwind a unit that requested an
    /// unsatisfied dependency. The unit is replayed from its start once the
    /// dependency settles. Application code must re-raise it, see
    /// [`LoadError::filter`].
    #[error("Unit aborted pending dependencies")]
    Abort,

    /// Every candidate location was tried without success
    #[error("No such file: {id} (tried: {}){}", joined(.tried), included_from(.requester))]
    NotFound {
        /// Canonical id of the unit
        id: String,
        /// Locations attempted, in order
        tried: Vec<String>,
        /// Unit that first requested this one
        requester: Option<String>,
    },

    /// The unit's own code raised an error while running
    #[error("Execution of {id} failed: {message}")]
    ExecutionFailed {
        /// Canonical id of the unit
        id: String,
        /// Rendered error raised by the unit
        message: String,
    },

    /// Requested outside of any running unit and not settled yet
    #[error("Unit has not settled yet: {id}")]
    Unsettled {
        /// Canonical id of the unit
        id: String,
    },

    /// No pending unit can run and no cycle edge can be allowed
    #[error("Dependency graph stalled: {}", joined(.units))]
    Stalled {
        /// Units left waiting on each other
        units: Vec<String>,
    },

    /// Malformed unit identifier
    #[error("Invalid unit id: {id:?}")]
    InvalidId {
        /// The rejected identifier
        id: String,
    },

    /// Unit has already been loaded into the context
    #[error("Unit already loaded: {id}")]
    AlreadyLoaded {
        /// Canonical id of the unit
        id: String,
    },

    /// Configuration could not be read or parsed
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the problem
        message: String,
    },
}

fn joined(items: &[String]) -> String {
    items.join(", ")
}

fn included_from(requester: &Option<String>) -> String {
    match requester {
        Some(requester) => format!(", included from {}", requester),
        None => String::new(),
    }
}

impl LoadError {
    /// Whether this is the abort sentinel
    pub fn is_abort(&self) -> bool {
        matches!(self, LoadError::Abort)
    }

    /// Separate the abort sentinel from genuine errors.
    ///
    /// Returns `Err` for the sentinel, so `?` hands it back to the loader,
    /// and `Ok` with the error otherwise:
    ///
    /// ```ignore
    /// match scope.require("./optional") {
    ///     Ok(exports) => use_it(exports),
    ///     Err(err) => {
    ///         let err = err.filter()?;
    ///         tracing::warn!("optional unit unavailable: {}", err);
    ///     }
    /// }
    /// ```
    pub fn filter(self) -> Result<LoadError> {
        match self {
            LoadError::Abort => Err(LoadError::Abort),
            other => Ok(other),
        }
    }

    /// Whether this failure means the unit could not be located
    pub fn is_not_found(&self) -> bool {
        matches!(self, LoadError::NotFound { .. })
    }
}

/// [`LoadError::filter`] for errors that have been widened into
/// `anyhow::Error` inside a unit body.
pub fn filter(error: anyhow::Error) -> anyhow::Result<anyhow::Error> {
    match error.downcast_ref::<LoadError>() {
        Some(LoadError::Abort) => Err(error),
        _ => Ok(error),
    }
}

/// Whether an error raised by a unit body is the abort sentinel
pub(crate) fn is_abort(error: &anyhow::Error) -> bool {
    matches!(error.downcast_ref::<LoadError>(), Some(LoadError::Abort))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_reraises_abort() {
        assert_eq!(LoadError::Abort.filter(), Err(LoadError::Abort));

        let missing = LoadError::Unsettled { id: "x".to_string() };
        assert_eq!(missing.clone().filter(), Ok(missing));
    }

    #[test]
    fn test_anyhow_filter() {
        let abort = anyhow::Error::new(LoadError::Abort);
        assert!(filter(abort).is_err());

        let other = anyhow::anyhow!("boom");
        let kept = filter(other).unwrap();
        assert_eq!(kept.to_string(), "boom");
    }

    #[test]
    fn test_not_found_message() {
        let err = LoadError::NotFound {
            id: "x".to_string(),
            tried: vec!["/a/x".to_string(), "/b/x".to_string()],
            requester: Some("/main".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "No such file: x (tried: /a/x, /b/x), included from /main"
        );
        assert!(err.is_not_found());
        assert!(!err.is_abort());
    }
}
