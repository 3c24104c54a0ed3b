//! Preload selection strategies.

use serde::{Deserialize, Serialize};

/// A registered component that is not cached yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreloadCandidate {
    /// Component id
    pub id: String,
    /// Registered priority
    pub priority: u8,
    /// Times the component was requested
    pub access_count: u64,
    /// Expected size in bytes
    pub estimated_size: usize,
}

/// Picks components worth loading before anyone asks for them
pub trait PreloadStrategy: Send + Sync + 'static {
    /// Strategy name, for logs
    fn name(&self) -> &'static str;

    /// Ids to preload out of `candidates`
    fn select(&self, candidates: &[PreloadCandidate]) -> Vec<String>;
}

/// Preloads components at or above a priority
#[derive(Debug, Clone, Copy)]
pub struct PriorityStrategy {
    /// Lowest priority that qualifies
    pub min_priority: u8,
}

impl PreloadStrategy for PriorityStrategy {
    fn name(&self) -> &'static str {
        "priority"
    }

    fn select(&self, candidates: &[PreloadCandidate]) -> Vec<String> {
        candidates
            .iter()
            .filter(|c| c.priority >= self.min_priority)
            .map(|c| c.id.clone())
            .collect()
    }
}

/// Preloads components requested more than a threshold
#[derive(Debug, Clone, Copy)]
pub struct AccessCountStrategy {
    /// Requests that must be exceeded
    pub threshold: u64,
}

impl PreloadStrategy for AccessCountStrategy {
    fn name(&self) -> &'static str {
        "access-count"
    }

    fn select(&self, candidates: &[PreloadCandidate]) -> Vec<String> {
        candidates
            .iter()
            .filter(|c| c.access_count > self.threshold)
            .map(|c| c.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, priority: u8, access_count: u64) -> PreloadCandidate {
        PreloadCandidate {
            id: id.to_string(),
            priority,
            access_count,
            estimated_size: 0,
        }
    }

    #[test]
    fn test_default_strategies() {
        let candidates = [candidate("a", 9, 0), candidate("b", 2, 6), candidate("c", 7, 5)];
        assert_eq!(PriorityStrategy { min_priority: 8 }.select(&candidates), vec!["a"]);
        assert_eq!(AccessCountStrategy { threshold: 5 }.select(&candidates), vec!["b"]);
    }
}
