//! Action handlers.
//!
//! A step's `action` is resolved to a handler by exact name first, then by
//! the scheme before the first `:`. The built-in registry knows `noop`,
//! `echo`, `sleep`, `fail`, `wasm:` and the connection schemes.

use crate::error::ActionError;
use async_trait::async_trait;
use qflow_core::ExecutionId;
use qflow_plan::FlowStep;
use qflow_pool::{Lease, TcpConnection};
use qflow_wasm::SandboxRuntime;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// What a handler sees of the step it runs
#[derive(Debug)]
pub struct StepContext<'a> {
    /// Flow execution
    pub execution: ExecutionId,
    /// The step
    pub step: &'a FlowStep,
    /// Attempt number, starting at 1
    pub attempt: u32,
    /// Pooled resource leased for the attempt
    pub lease: Option<&'a Lease>,
}

impl StepContext<'_> {
    fn param(&self, name: &str) -> Option<&Value> {
        self.step.parameters.get(name)
    }

    fn u64_param(&self, name: &str) -> Result<Option<u64>, ActionError> {
        match self.param(name) {
            None => Ok(None),
            Some(value) => value
                .as_u64()
                .map(Some)
                .ok_or_else(|| ActionError::parameter(name, "expected a non-negative integer")),
        }
    }

    fn leased<R: Send + Sync + 'static>(&self) -> Result<Arc<R>, ActionError> {
        self.lease
            .and_then(Lease::downcast::<R>)
            .ok_or_else(|| ActionError::Resource(format!("{} needs a pooled resource", self.step.action)))
    }
}

/// Runs one attempt of an action
#[async_trait]
pub trait ActionHandler: Send + Sync + 'static {
    /// Run the action, returning its output
    async fn run(&self, ctx: &StepContext<'_>) -> Result<Value, ActionError>;
}

/// Does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAction;

#[async_trait]
impl ActionHandler for NoopAction {
    async fn run(&self, _ctx: &StepContext<'_>) -> Result<Value, ActionError> {
        Ok(Value::Null)
    }
}

/// Returns the step parameters
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoAction;

#[async_trait]
impl ActionHandler for EchoAction {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<Value, ActionError> {
        Ok(Value::Object(ctx.step.parameters.clone()))
    }
}

/// Sleeps for the `ms` parameter
#[derive(Debug, Clone, Copy, Default)]
pub struct SleepAction;

#[async_trait]
impl ActionHandler for SleepAction {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<Value, ActionError> {
        let ms = ctx
            .u64_param("ms")?
            .ok_or_else(|| ActionError::parameter("ms", "missing"))?;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({ "slept_ms": ms }))
    }
}

/// Fails with the `message` parameter. With `fail_times`, only the first
/// that many attempts fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailAction;

#[async_trait]
impl ActionHandler for FailAction {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<Value, ActionError> {
        if let Some(times) = ctx.u64_param("fail_times")? {
            if u64::from(ctx.attempt) > times {
                return Ok(json!({ "recovered_on": ctx.attempt }));
            }
        }
        let message = ctx
            .param("message")
            .and_then(Value::as_str)
            .unwrap_or("requested failure");
        Err(ActionError::Failed(message.to_string()))
    }
}

/// Calls an export of the leased sandbox runtime.
///
/// Parameters: `export` (default `run`) and `args`, an array of integers.
#[derive(Debug, Clone, Copy, Default)]
pub struct WasmAction;

#[async_trait]
impl ActionHandler for WasmAction {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<Value, ActionError> {
        let runtime = ctx.leased::<SandboxRuntime>()?;
        let export = ctx.param("export").and_then(Value::as_str).unwrap_or("run").to_string();
        let args = match ctx.param("args") {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| v.as_i64().ok_or_else(|| ActionError::parameter("args", "expected integers")))
                .collect::<Result<Vec<i64>, _>>()?,
            Some(_) => return Err(ActionError::parameter("args", "expected an array")),
        };
        let invocation = runtime
            .invoke_blocking(export, args)
            .await
            .map_err(|e| ActionError::Failed(e.to_string()))?;
        Ok(json!({
            "export": invocation.export,
            "value": invocation.value,
            "fuel_consumed": invocation.fuel_consumed,
            "elapsed_us": invocation.elapsed_us,
        }))
    }
}

/// Reports the peer of the leased connection
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionProbe;

#[async_trait]
impl ActionHandler for ConnectionProbe {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<Value, ActionError> {
        let connection = ctx.leased::<TcpConnection>()?;
        Ok(json!({ "peer": connection.peer().to_string() }))
    }
}

/// Handlers by action name and by scheme
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn ActionHandler>>,
    schemes: HashMap<String, Arc<dyn ActionHandler>>,
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut actions: Vec<&String> = self.actions.keys().collect();
        actions.sort();
        let mut schemes: Vec<&String> = self.schemes.keys().collect();
        schemes.sort();
        f.debug_struct("ActionRegistry")
            .field("actions", &actions)
            .field("schemes", &schemes)
            .finish()
    }
}

impl ActionRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in handlers
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("noop", Arc::new(NoopAction));
        registry.register("echo", Arc::new(EchoAction));
        registry.register("sleep", Arc::new(SleepAction));
        registry.register("fail", Arc::new(FailAction));
        registry.register_scheme("wasm", Arc::new(WasmAction));
        for scheme in ["http", "https", "net", "tcp"] {
            registry.register_scheme(scheme, Arc::new(ConnectionProbe));
        }
        registry
    }

    /// Handle `action` exactly
    pub fn register(&mut self, action: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.actions.insert(action.into(), handler);
    }

    /// Handle every `scheme:...` action
    pub fn register_scheme(&mut self, scheme: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.schemes.insert(scheme.into().to_ascii_lowercase(), handler);
    }

    /// Handler for `action`
    #[must_use]
    pub fn resolve(&self, action: &str) -> Option<Arc<dyn ActionHandler>> {
        if let Some(handler) = self.actions.get(action) {
            return Some(Arc::clone(handler));
        }
        let (scheme, _) = action.split_once(':')?;
        self.schemes.get(&scheme.to_ascii_lowercase()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(step: &FlowStep, attempt: u32) -> StepContext<'_> {
        StepContext {
            execution: ExecutionId::new(),
            step,
            attempt,
            lease: None,
        }
    }

    #[tokio::test]
    async fn test_resolution() {
        let registry = ActionRegistry::with_builtins();
        assert!(registry.resolve("echo").is_some());
        assert!(registry.resolve("wasm:validator").is_some());
        assert!(registry.resolve("HTTP:example").is_some());
        assert!(registry.resolve("unknown").is_none());
        assert!(registry.resolve("ftp:x").is_none());
    }

    #[tokio::test]
    async fn test_echo_and_fail() {
        let step = FlowStep::new("e", "echo").with_param("greeting", "hi");
        let out = EchoAction.run(&ctx(&step, 1)).await.unwrap();
        assert_eq!(out, json!({"greeting": "hi"}));

        let step = FlowStep::new("f", "fail").with_param("fail_times", 1);
        assert_eq!(
            FailAction.run(&ctx(&step, 1)).await,
            Err(ActionError::Failed("requested failure".into()))
        );
        assert_eq!(FailAction.run(&ctx(&step, 2)).await.unwrap(), json!({"recovered_on": 2}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_parameters() {
        let step = FlowStep::new("s", "sleep").with_param("ms", 250);
        assert_eq!(SleepAction.run(&ctx(&step, 1)).await.unwrap(), json!({"slept_ms": 250}));
        let bad = FlowStep::new("s", "sleep").with_param("ms", "soon");
        assert!(matches!(
            SleepAction.run(&ctx(&bad, 1)).await,
            Err(ActionError::Parameter { .. })
        ));
    }

    #[tokio::test]
    async fn test_resource_actions_need_a_lease() {
        let step = FlowStep::new("w", "wasm:validator");
        assert!(matches!(WasmAction.run(&ctx(&step, 1)).await, Err(ActionError::Resource(_))));
        let step = FlowStep::new("h", "http:api");
        assert!(matches!(ConnectionProbe.run(&ctx(&step, 1)).await, Err(ActionError::Resource(_))));
    }
}
