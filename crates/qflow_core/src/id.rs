//! Unique identifiers for Qflow entities.
//!
//! Step ids are chosen by flow authors and referenced textually from other
//! steps' parameters, so they are strings. Everything the engine mints on its
//! own is a UUID.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Step identifier - the author-chosen name of a flow step
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    /// Create a step id from a name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get as string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StepId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for StepId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random id
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from UUID bytes
            #[must_use]
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            /// Get as UUID
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "_{}"), self.0)
            }
        }
    };
}

uuid_id!(
    /// Run identifier - one submitted flow execution
    RunId,
    "run"
);
uuid_id!(
    /// Resource identifier - one pooled resource instance
    ResourceId,
    "res"
);
uuid_id!(
    /// Pre-warming job identifier
    JobId,
    "job"
);
uuid_id!(
    /// Pool optimization record identifier
    OptimizationId,
    "opt"
);
uuid_id!(
    /// Load prediction identifier
    PredictionId,
    "pred"
);
uuid_id!(
    /// Optimization recommendation identifier
    RecommendationId,
    "rec"
);
uuid_id!(
    /// Optimization execution identifier
    ExecutionId,
    "exec"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_creation() {
        assert_ne!(RunId::new(), RunId::new());
        assert_ne!(ResourceId::new(), ResourceId::new());
    }

    #[test]
    fn test_id_from_bytes() {
        let bytes = [7u8; 16];
        let id = JobId::from_bytes(bytes);
        assert_eq!(id.as_uuid().as_bytes(), &bytes);
    }

    #[test]
    fn test_id_display() {
        assert!(RunId::new().to_string().starts_with("run_"));
        assert!(RecommendationId::new().to_string().starts_with("rec_"));
    }

    #[test]
    fn test_step_id() {
        let id = StepId::from("fetch");
        assert_eq!(id.as_str(), "fetch");
        assert_eq!(id, StepId::new("fetch".to_string()));
        assert_eq!(format!("{}", id), "fetch");
    }

    #[test]
    fn test_step_id_serde_transparent() {
        let id = StepId::from("a");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"a\"");
    }
}
