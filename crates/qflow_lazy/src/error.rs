//! Component loading errors.

/// Result type for component loading
pub type LoadResult<T> = Result<T, LoadError>;

/// Errors surfaced to whoever asked for a component
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// Nothing is registered under the id
    #[error("component not registered: {0}")]
    NotRegistered(String),

    /// The id is already registered
    #[error("component already registered: {0}")]
    DuplicateComponent(String),

    /// The loader did not finish in time
    #[error("loading {id} timed out after {timeout_ms}ms")]
    Timeout {
        /// Component id
        id: String,
        /// Limit that was hit
        timeout_ms: u64,
    },

    /// Dependencies loop back on themselves
    #[error("circular component dependency: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    /// The component can never fit in the cache
    #[error("component {id} needs {size} bytes, cache holds {limit}")]
    TooLarge {
        /// Component id
        id: String,
        /// Bytes the component takes once cached
        size: usize,
        /// Cache capacity
        limit: usize,
    },

    /// A dependency failed to load
    #[error("dependency {dependency} of {id} failed: {reason}")]
    Dependency {
        /// Component id
        id: String,
        /// Dependency that failed
        dependency: String,
        /// Why it failed
        reason: String,
    },

    /// The loader itself failed
    #[error("loader for {id} failed: {reason}")]
    Loader {
        /// Component id
        id: String,
        /// Loader message
        reason: String,
    },
}

impl LoadError {
    /// Loader failure for `id`
    pub fn loader(id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Loader {
            id: id.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message() {
        let err = LoadError::Cycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "circular component dependency: a -> b -> a");
    }
}
