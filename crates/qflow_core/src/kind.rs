//! Kinds of pooled resources a step may need.

use serde::{Deserialize, Serialize};

/// Resource kind required by an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Sandboxed WASM runtime instance
    SandboxRuntime,
    /// Outbound network connection
    Connection,
}

impl ResourceKind {
    /// Infer the resource kind from an action reference.
    ///
    /// `wasm:` actions run in a sandbox, `http:`/`net:`/`tcp:` actions need a
    /// connection. Anything else runs without a pooled resource.
    #[must_use]
    pub fn for_action(action: &str) -> Option<Self> {
        let scheme = action.split_once(':').map(|(scheme, _)| scheme)?;
        match scheme.to_ascii_lowercase().as_str() {
            "wasm" => Some(Self::SandboxRuntime),
            "http" | "https" | "net" | "tcp" => Some(Self::Connection),
            _ => None,
        }
    }

    /// Stable name used in logs and event payloads
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SandboxRuntime => "sandbox_runtime",
            Self::Connection => "connection",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_action() {
        assert_eq!(ResourceKind::for_action("wasm:validator"), Some(ResourceKind::SandboxRuntime));
        assert_eq!(ResourceKind::for_action("WASM:x"), Some(ResourceKind::SandboxRuntime));
        assert_eq!(ResourceKind::for_action("http:fetch"), Some(ResourceKind::Connection));
        assert_eq!(ResourceKind::for_action("tcp:ping"), Some(ResourceKind::Connection));
        assert_eq!(ResourceKind::for_action("echo"), None);
        assert_eq!(ResourceKind::for_action("local:transform"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(ResourceKind::Connection.to_string(), "connection");
    }
}
