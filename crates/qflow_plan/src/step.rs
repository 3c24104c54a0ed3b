//! Flow steps and flow definitions.

use qflow_core::{ResourceKind, StepId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::time::Duration;

/// Default per-step timeout in milliseconds
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 30_000;

fn default_timeout_ms() -> u64 {
    DEFAULT_STEP_TIMEOUT_MS
}

/// One unit of work in a flow
///
/// Steps are immutable once a flow is submitted. Dependencies come from
/// three places: textual references to other step ids inside `parameters`,
/// `on_success`/`on_failure` links (the successor depends on this step),
/// and the explicit `depends_on` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStep {
    /// Unique step id within the flow
    pub id: StepId,
    /// Action reference, e.g. `echo` or `wasm:validator`
    pub action: String,
    /// Opaque action parameters
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Per-attempt timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Step to run after success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<StepId>,
    /// Step to run after failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<StepId>,
    /// Explicit dependencies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<StepId>,
    /// Targets this step reads
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub reads: BTreeSet<String>,
    /// Targets this step writes
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub writes: BTreeSet<String>,
    /// Resources no other step may hold at the same time
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub exclusive_resources: BTreeSet<String>,
    /// Whether the step is on the flow's critical path
    #[serde(default)]
    pub critical: bool,
}

impl FlowStep {
    /// Create a step with default timeout and no links
    pub fn new(id: impl Into<StepId>, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            parameters: Map::new(),
            timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
            on_success: None,
            on_failure: None,
            depends_on: Vec::new(),
            reads: BTreeSet::new(),
            writes: BTreeSet::new(),
            exclusive_resources: BTreeSet::new(),
            critical: false,
        }
    }

    /// Set a parameter
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Set the timeout
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the success successor
    #[must_use]
    pub fn on_success(mut self, next: impl Into<StepId>) -> Self {
        self.on_success = Some(next.into());
        self
    }

    /// Set the failure successor
    #[must_use]
    pub fn on_failure(mut self, next: impl Into<StepId>) -> Self {
        self.on_failure = Some(next.into());
        self
    }

    /// Add an explicit dependency
    #[must_use]
    pub fn depends_on(mut self, dep: impl Into<StepId>) -> Self {
        self.depends_on.push(dep.into());
        self
    }

    /// Declare a read target
    #[must_use]
    pub fn reads(mut self, target: impl Into<String>) -> Self {
        self.reads.insert(target.into());
        self
    }

    /// Declare a write target
    #[must_use]
    pub fn writes(mut self, target: impl Into<String>) -> Self {
        self.writes.insert(target.into());
        self
    }

    /// Declare an exclusive resource
    #[must_use]
    pub fn exclusive(mut self, resource: impl Into<String>) -> Self {
        self.exclusive_resources.insert(resource.into());
        self
    }

    /// Mark the step critical
    #[must_use]
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Timeout as a duration
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Pooled resource kind the action needs, if any
    #[must_use]
    pub fn resource_kind(&self) -> Option<ResourceKind> {
        ResourceKind::for_action(&self.action)
    }

    /// Scheduling priority: shorter timeouts and critical steps go first
    #[must_use]
    pub fn priority(&self) -> u32 {
        let by_timeout = (60_000 / self.timeout_ms.max(1)).min(100) as u32;
        if self.critical { by_timeout + 50 } else { by_timeout }
    }

    /// Every string value nested in the parameters
    pub fn parameter_strings(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for value in self.parameters.values() {
            collect_strings(value, &mut out);
        }
        out
    }
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|item| collect_strings(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_strings(item, out)),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// A submitted flow: its type tag plus ordered steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// Flow type, used to bucket execution patterns
    pub flow_type: String,
    /// Validation layers the flow passes through
    #[serde(default)]
    pub validation_layers: Vec<String>,
    /// Ordered steps
    pub steps: Vec<FlowStep>,
}

impl FlowDefinition {
    /// Parse a flow from JSON
    ///
    /// # Errors
    ///
    /// Returns the decoder error if the JSON does not describe a flow
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
