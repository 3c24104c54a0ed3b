//! Parallel execution engine.
//!
//! Plans a flow into ordered groups of independent steps, runs the groups
//! one after another and the steps of a group concurrently under a
//! semaphore. Each attempt of a step leases its pooled resource, runs under
//! the step timeout and hands the lease back with the attempt's outcome.

use crate::action::{ActionHandler, ActionRegistry, StepContext};
use crate::config::{EngineConfig, EngineConfigPatch, FailureStrategy};
use crate::error::{ActionError, EngineError, EngineResult};
use crate::monitor::{ExecutionObserver, StepTelemetry};
use crate::result::{ExecutionResult, StepOutcome, StepStatus};
use crate::retry::RetryPolicy;
use chrono::Utc;
use futures::FutureExt;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use qflow_core::{ExecutionId, ResourceKind, StepId};
use qflow_events::{EventBus, Topic};
use qflow_plan::{AnalyzerConfig, DependencyAnalyzer, ExecutionPlan, FlowStep};
use qflow_pool::{Lease, PoolManager, ReleaseOutcome};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const SOURCE: &str = "execution-engine";

/// Runs flows group by group
pub struct ParallelExecutionEngine {
    registry: Arc<ActionRegistry>,
    pools: Option<PoolManager>,
    routes: RwLock<HashMap<String, String>>,
    config: RwLock<EngineConfig>,
    observers: RwLock<Vec<Arc<dyn ExecutionObserver>>>,
    events: Option<EventBus>,
}

impl std::fmt::Debug for ParallelExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelExecutionEngine")
            .field("config", &*self.config.read())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl ParallelExecutionEngine {
    /// Engine dispatching actions through `registry`
    pub fn new(config: EngineConfig, registry: ActionRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            pools: None,
            routes: RwLock::new(HashMap::new()),
            config: RwLock::new(config),
            observers: RwLock::new(Vec::new()),
            events: None,
        }
    }

    /// Lease pooled resources from `pools`
    #[must_use]
    pub fn with_pools(mut self, pools: PoolManager) -> Self {
        self.pools = Some(pools);
        self
    }

    /// Report group and step events to `events`
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Deliver telemetry to `observer`
    pub fn add_observer(&self, observer: Arc<dyn ExecutionObserver>) {
        self.observers.write().push(observer);
    }

    /// Send `scheme:target` actions to the pool named `pool`
    pub fn route(&self, target: impl Into<String>, pool: impl Into<String>) {
        self.routes.write().insert(target.into(), pool.into());
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> EngineConfig {
        self.config.read().clone()
    }

    /// Apply a configuration patch
    pub fn update_config(&self, patch: &EngineConfigPatch) {
        self.config.write().apply(patch);
        info!(?patch, "engine config updated");
    }

    /// Plan `steps` without running them
    ///
    /// # Errors
    ///
    /// Planning errors, such as `CircularDependency`
    pub fn plan(&self, steps: &[FlowStep]) -> EngineResult<ExecutionPlan> {
        let config = self.config();
        let analyzer = DependencyAnalyzer::new(AnalyzerConfig {
            max_group_size: config.max_group_size,
        });
        Ok(analyzer.analyze(steps)?)
    }

    fn emit(&self, topic: Topic, payload: Value) {
        if let Some(bus) = &self.events {
            bus.emit(topic, SOURCE, payload);
        }
    }

    fn notify_step(&self, execution: ExecutionId, outcome: &StepOutcome) {
        let telemetry = StepTelemetry {
            execution,
            step: outcome.step.clone(),
            group: outcome.group,
            status: outcome.status,
            attempts: outcome.attempts,
            duration_us: outcome.duration_us,
            resource: outcome.resource,
        };
        for observer in self.observers.read().iter() {
            observer.on_step(&telemetry);
        }
    }

    fn notify_flow(&self, result: &ExecutionResult) {
        for observer in self.observers.read().iter() {
            observer.on_flow(result);
        }
    }

    /// Run a flow.
    ///
    /// Step failures are reported in the result. Only planning errors and,
    /// under fail-fast, the first failing group surface as errors.
    ///
    /// # Errors
    ///
    /// `Plan` if the flow cannot be planned, `FlowAborted` under fail-fast
    pub async fn execute(&self, steps: &[FlowStep]) -> EngineResult<ExecutionResult> {
        let config = self.config();
        let plan = self.plan(steps)?;
        let execution = ExecutionId::new();
        let started_at = Utc::now();
        let started = Instant::now();
        info!(%execution, steps = steps.len(), groups = plan.groups.len(), "flow started");

        let runner = Arc::new(StepRunner {
            execution,
            registry: Arc::clone(&self.registry),
            pools: self.pools.clone(),
            routes: self.routes.read().clone(),
            retry: config.retry,
            events: self.events.clone(),
            samples: Mutex::new(Vec::new()),
        });
        let failure_links: HashSet<(StepId, StepId)> = steps
            .iter()
            .filter_map(|s| s.on_failure.clone().map(|handler| (handler, s.id.clone())))
            .collect();

        let mut outcomes: IndexMap<StepId, StepOutcome> = IndexMap::new();
        let mut errors = Vec::new();
        let mut aborted = None;

        for group in &plan.groups {
            let group_started = Instant::now();
            self.emit(
                Topic::GroupStarted,
                json!({ "execution": execution, "group": group.index, "steps": group.step_ids() }),
            );

            let mut runnable = Vec::new();
            let mut group_outcomes = Vec::new();
            for step in &group.steps {
                match gate(step, &plan, &outcomes, &failure_links) {
                    Gate::Run => runnable.push(step.clone()),
                    Gate::Skip => {
                        debug!(step = %step.id, "failure handler skipped");
                        group_outcomes.push(StepOutcome::not_run(step.id.clone(), group.index, StepStatus::Skipped, None));
                    }
                    Gate::Cancel(dependency) => {
                        let reason = format!("step {} cancelled: dependency {dependency} did not complete", step.id);
                        self.emit(
                            Topic::StepCancelled,
                            json!({ "execution": execution, "step": step.id, "dependency": dependency }),
                        );
                        group_outcomes.push(StepOutcome::not_run(
                            step.id.clone(),
                            group.index,
                            StepStatus::Cancelled,
                            Some(reason),
                        ));
                    }
                }
            }

            let first_pass = runnable.iter().map(|s| (s.clone(), 0)).collect();
            let mut ran = run_group(&runner, group.index, first_pass, config.max_concurrent_steps).await;
            if config.failure_strategy == FailureStrategy::RetryFailed {
                let failed: Vec<(FlowStep, u32)> = runnable
                    .iter()
                    .filter_map(|s| {
                        let first = ran.get(&s.id)?;
                        first.status.is_failure().then(|| (s.clone(), first.attempts))
                    })
                    .collect();
                if !failed.is_empty() {
                    debug!(group = group.index, steps = failed.len(), "re-queueing failed steps");
                    for mut second in run_group(&runner, group.index, failed, config.max_concurrent_steps)
                        .await
                        .into_values()
                    {
                        if let Some(first) = ran.get(&second.step) {
                            second.duration_us += first.duration_us;
                        }
                        ran.insert(second.step.clone(), second);
                    }
                }
            }

            // plan order within the group
            group_outcomes.extend(ran.into_values());
            group_outcomes.sort_by_key(|o| group.steps.iter().position(|s| s.id == o.step));

            let mut group_errors = Vec::new();
            for outcome in group_outcomes {
                if outcome.status.is_failure() {
                    group_errors.push(format!(
                        "step {} failed after {} attempt(s): {}",
                        outcome.step,
                        outcome.attempts,
                        outcome.error.as_deref().unwrap_or("unknown error")
                    ));
                } else if let Some(error) = &outcome.error {
                    errors.push(error.clone());
                }
                self.notify_step(execution, &outcome);
                outcomes.insert(outcome.step.clone(), outcome);
            }

            let group_us = group_started.elapsed().as_micros() as u64;
            if group_errors.is_empty() {
                self.emit(
                    Topic::GroupCompleted,
                    json!({ "execution": execution, "group": group.index, "duration_us": group_us }),
                );
            } else {
                warn!(%execution, group = group.index, failed = group_errors.len(), "group failed");
                self.emit(
                    Topic::GroupFailed,
                    json!({ "execution": execution, "group": group.index, "errors": group_errors, "duration_us": group_us }),
                );
                errors.extend(group_errors.iter().cloned());
                if config.failure_strategy == FailureStrategy::FailFast {
                    aborted = Some((group.index, group_errors));
                    break;
                }
            }
        }

        let wall = started.elapsed();
        let busy_us: u64 = outcomes.values().map(|o| o.duration_us).sum();
        let wall_us = wall.as_micros() as f64;
        let parallel_efficiency = if wall_us > 0.0 { (busy_us as f64 / wall_us).min(1.0) } else { 0.0 };
        let samples = runner.samples.lock().clone();
        let resource_utilization = if samples.is_empty() {
            0.0
        } else {
            samples.iter().sum::<f64>() / samples.len() as f64
        };
        let success = aborted.is_none() && outcomes.len() == steps.len() && outcomes
            .values()
            .all(|o| matches!(o.status, StepStatus::Completed | StepStatus::Skipped));

        let result = ExecutionResult {
            execution,
            success,
            groups: plan.groups.len(),
            steps: outcomes,
            errors,
            started_at,
            total_ms: wall.as_millis() as u64,
            parallel_efficiency,
            resource_utilization,
        };
        self.notify_flow(&result);
        info!(
            %execution,
            success,
            total_ms = result.total_ms,
            efficiency = result.parallel_efficiency,
            "flow finished"
        );

        match aborted {
            Some((group, errors)) => Err(EngineError::FlowAborted { group, errors }),
            None => Ok(result),
        }
    }
}

enum Gate {
    Run,
    Skip,
    Cancel(StepId),
}

fn gate(
    step: &FlowStep,
    plan: &ExecutionPlan,
    outcomes: &IndexMap<StepId, StepOutcome>,
    failure_links: &HashSet<(StepId, StepId)>,
) -> Gate {
    let Some(dependencies) = plan.dependencies_of(&step.id) else {
        return Gate::Run;
    };
    let mut skip = false;
    for dependency in dependencies {
        let Some(outcome) = outcomes.get(dependency) else {
            continue;
        };
        let handles_failure = failure_links.contains(&(step.id.clone(), dependency.clone()));
        match outcome.status {
            StepStatus::Completed if handles_failure => skip = true,
            StepStatus::Completed => {}
            StepStatus::Failed | StepStatus::TimedOut if handles_failure => {}
            StepStatus::Skipped => skip = true,
            StepStatus::Failed | StepStatus::TimedOut | StepStatus::Cancelled => {
                return Gate::Cancel(dependency.clone());
            }
        }
    }
    if skip { Gate::Skip } else { Gate::Run }
}

/// Run `steps` concurrently. Each step carries the attempts it already made.
async fn run_group(
    runner: &Arc<StepRunner>,
    group: usize,
    steps: Vec<(FlowStep, u32)>,
    max_concurrent: usize,
) -> IndexMap<StepId, StepOutcome> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut tasks = JoinSet::new();
    for (step, prior) in steps {
        let runner = Arc::clone(runner);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let id = step.id.clone();
            let resource = step.resource_kind();
            match AssertUnwindSafe(runner.run(step, group, prior)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let mut outcome = StepOutcome::not_run(id, group, StepStatus::Failed, Some("step panicked".to_string()));
                    outcome.attempts = prior + 1;
                    outcome.resource = resource;
                    outcome
                }
            }
        });
    }

    let mut outcomes = IndexMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => {
                outcomes.insert(outcome.step.clone(), outcome);
            }
            Err(e) => warn!(group, error = %e, "step task ended abnormally"),
        }
    }
    outcomes
}

struct StepRunner {
    execution: ExecutionId,
    registry: Arc<ActionRegistry>,
    pools: Option<PoolManager>,
    routes: HashMap<String, String>,
    retry: RetryPolicy,
    events: Option<EventBus>,
    samples: Mutex<Vec<f64>>,
}

impl StepRunner {
    fn emit(&self, topic: Topic, payload: Value) {
        if let Some(bus) = &self.events {
            bus.emit(topic, SOURCE, payload);
        }
    }

    async fn run(&self, step: FlowStep, group: usize, prior: u32) -> StepOutcome {
        let kind = step.resource_kind();
        let handler = self.registry.resolve(&step.action);
        let started = Instant::now();
        self.emit(
            Topic::StepStarted,
            json!({ "execution": self.execution, "step": step.id, "group": group, "action": step.action }),
        );

        let last = prior + self.retry.attempts();
        let mut attempt = prior;
        let result = loop {
            attempt += 1;
            let result = match &handler {
                Some(handler) => self.attempt(handler.as_ref(), &step, kind, attempt).await,
                None => Err(ActionError::UnknownAction(step.action.clone())),
            };
            match result {
                Err(e) if e.is_retryable() && attempt < last => {
                    let delay = self.retry.delay(attempt);
                    warn!(step = %step.id, attempt, error = %e, delay_ms = delay.as_millis() as u64, "step attempt failed, retrying");
                    self.emit(
                        Topic::StepRetried,
                        json!({
                            "execution": self.execution,
                            "step": step.id,
                            "attempt": attempt,
                            "error": e.to_string(),
                            "delay_ms": delay.as_millis() as u64,
                        }),
                    );
                    tokio::time::sleep(delay).await;
                }
                other => break other,
            }
        };

        let duration_us = started.elapsed().as_micros() as u64;
        match result {
            Ok(output) => {
                debug!(step = %step.id, attempt, "step completed");
                self.emit(
                    Topic::StepCompleted,
                    json!({ "execution": self.execution, "step": step.id, "attempts": attempt, "duration_us": duration_us }),
                );
                StepOutcome {
                    step: step.id,
                    group,
                    status: StepStatus::Completed,
                    attempts: attempt,
                    output: Some(output),
                    error: None,
                    duration_us,
                    resource: kind,
                }
            }
            Err(e) => {
                let status = if matches!(e, ActionError::Timeout(_)) {
                    StepStatus::TimedOut
                } else {
                    StepStatus::Failed
                };
                warn!(step = %step.id, attempts = attempt, error = %e, "step failed");
                self.emit(
                    Topic::StepFailed,
                    json!({
                        "execution": self.execution,
                        "step": step.id,
                        "attempts": attempt,
                        "error": e.to_string(),
                        "duration_us": duration_us
                    }),
                );
                StepOutcome {
                    step: step.id,
                    group,
                    status,
                    attempts: attempt,
                    output: None,
                    error: Some(e.to_string()),
                    duration_us,
                    resource: kind,
                }
            }
        }
    }

    async fn attempt(
        &self,
        handler: &dyn ActionHandler,
        step: &FlowStep,
        kind: Option<ResourceKind>,
        attempt: u32,
    ) -> Result<Value, ActionError> {
        let lease = match kind {
            Some(kind) => Some(self.lease(step, kind).await?),
            None => None,
        };
        let result = {
            let ctx = StepContext {
                execution: self.execution,
                step,
                attempt,
                lease: lease.as_ref(),
            };
            match tokio::time::timeout(step.timeout(), handler.run(&ctx)).await {
                Ok(result) => result,
                Err(_) => Err(ActionError::Timeout(step.timeout_ms)),
            }
        };
        if let (Some(lease), Some(pools)) = (lease, &self.pools) {
            let outcome = ReleaseOutcome::from_success(result.is_ok());
            if let Err(e) = pools.release(lease, outcome).await {
                warn!(step = %step.id, error = %e, "lease release failed");
            }
        }
        result
    }

    async fn lease(&self, step: &FlowStep, kind: ResourceKind) -> Result<Lease, ActionError> {
        let pools = self
            .pools
            .as_ref()
            .ok_or_else(|| ActionError::Resource(format!("no pools configured for {kind}")))?;
        let target = step.action.split_once(':').map(|(_, target)| target).unwrap_or_default();
        let named = self
            .routes
            .get(target)
            .cloned()
            .or_else(|| pools.contains(target).then(|| target.to_string()));
        let lease = match named.and_then(|name| pools.get(&name)) {
            Some(pool) => pool.acquire_lease().await,
            None => pools.acquire(kind).await,
        }
        .map_err(|e| ActionError::Resource(e.to_string()))?;
        self.samples.lock().push(pools.utilization());
        Ok(lease)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::ExecutionMonitor;
    use qflow_plan::PlanError;
    use qflow_pool::{PoolConfig, ResourcePool};
    use qflow_wasm::{ModuleCache, SandboxConfig, SandboxFactory};

    fn engine(config: EngineConfig) -> ParallelExecutionEngine {
        ParallelExecutionEngine::new(config, ActionRegistry::with_builtins())
    }

    fn no_retry() -> EngineConfig {
        EngineConfig {
            retry: RetryPolicy::NONE,
            ..EngineConfig::default()
        }
    }

    fn diamond() -> Vec<FlowStep> {
        vec![
            FlowStep::new("fetch", "echo"),
            FlowStep::new("left", "echo").with_param("source", "fetch"),
            FlowStep::new("right", "echo").with_param("source", "fetch"),
            FlowStep::new("merge", "echo")
                .with_param("a", "left")
                .with_param("b", "right"),
        ]
    }

    #[tokio::test]
    async fn test_diamond_runs_in_three_groups() {
        let engine = engine(EngineConfig::default());
        let plan = engine.plan(&diamond()).unwrap();
        assert_eq!(
            plan.group_ids(),
            vec![
                vec![StepId::from("fetch")],
                vec![StepId::from("left"), StepId::from("right")],
                vec![StepId::from("merge")]
            ]
        );

        let result = engine.execute(&diamond()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.groups, 3);
        assert_eq!(result.count(StepStatus::Completed), 4);
        assert_eq!(result.outcome("left").unwrap().output, Some(json!({"source": "fetch"})));
        assert!(result.parallel_efficiency <= 1.0);
        assert!(result.errors.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let engine = engine(EngineConfig {
            max_concurrent_steps: 2,
            ..EngineConfig::default()
        });
        let steps: Vec<FlowStep> = (0..4)
            .map(|i| FlowStep::new(format!("s{i}"), "sleep").with_param("ms", 100))
            .collect();
        let result = engine.execute(&steps).await.unwrap();
        assert_eq!(result.groups, 1);
        assert!(result.total_ms >= 200 && result.total_ms < 300, "took {}ms", result.total_ms);
        assert_eq!(result.parallel_efficiency, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_backoff() {
        let engine = engine(EngineConfig::default());
        let steps = vec![FlowStep::new("flaky", "fail").with_param("fail_times", 2)];
        let result = engine.execute(&steps).await.unwrap();
        let outcome = result.outcome("flaky").unwrap();
        assert_eq!(outcome.status, StepStatus::Completed);
        assert_eq!(outcome.attempts, 3);
        assert!(result.total_ms >= 3_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let engine = engine(no_retry());
        let steps = vec![FlowStep::new("slow", "sleep").with_param("ms", 5_000).with_timeout_ms(100)];
        let result = engine.execute(&steps).await.unwrap();
        let outcome = result.outcome("slow").unwrap();
        assert_eq!(outcome.status, StepStatus::TimedOut);
        assert_eq!(outcome.error.as_deref(), Some("timed out after 100ms"));
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_failure_links() {
        let engine = engine(no_retry());
        let steps = vec![
            FlowStep::new("charge", "fail").on_success("ship").on_failure("refund"),
            FlowStep::new("ship", "noop"),
            FlowStep::new("refund", "noop"),
            FlowStep::new("audit", "noop"),
        ];
        let result = engine.execute(&steps).await.unwrap();
        assert_eq!(result.outcome("charge").unwrap().status, StepStatus::Failed);
        assert_eq!(result.outcome("ship").unwrap().status, StepStatus::Cancelled);
        assert_eq!(result.outcome("refund").unwrap().status, StepStatus::Completed);
        assert_eq!(result.outcome("audit").unwrap().status, StepStatus::Completed);
        assert_eq!(result.errors.len(), 2);
        assert!(!result.success);

        let steps = vec![
            FlowStep::new("charge", "noop").on_success("ship").on_failure("refund"),
            FlowStep::new("ship", "noop"),
            FlowStep::new("refund", "noop"),
        ];
        let result = engine.execute(&steps).await.unwrap();
        assert_eq!(result.outcome("refund").unwrap().status, StepStatus::Skipped);
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_fail_fast_aborts() {
        let engine = engine(EngineConfig {
            failure_strategy: FailureStrategy::FailFast,
            ..no_retry()
        });
        let monitor = Arc::new(ExecutionMonitor::default());
        engine.add_observer(monitor.clone());
        let steps = vec![
            FlowStep::new("first", "fail").with_param("message", "card declined"),
            FlowStep::new("second", "noop").depends_on("first"),
        ];
        let err = engine.execute(&steps).await.unwrap_err();
        assert_eq!(
            err,
            EngineError::FlowAborted {
                group: 0,
                errors: vec!["step first failed after 1 attempt(s): card declined".to_string()],
            }
        );
        let metrics = monitor.metrics();
        assert_eq!(metrics.steps_executed, 1);
        assert_eq!(metrics.flows_executed, 1);
        assert_eq!(metrics.flows_succeeded, 0);
    }

    #[tokio::test]
    async fn test_retry_failed_requeues_once() {
        let engine = engine(EngineConfig {
            failure_strategy: FailureStrategy::RetryFailed,
            ..no_retry()
        });
        let steps = vec![
            FlowStep::new("once", "fail").with_param("fail_times", 1),
            FlowStep::new("always", "fail"),
        ];
        let result = engine.execute(&steps).await.unwrap();
        let once = result.outcome("once").unwrap();
        assert_eq!(once.status, StepStatus::Completed);
        assert_eq!(once.attempts, 2);
        assert_eq!(result.outcome("always").unwrap().attempts, 2);
        assert_eq!(result.outcome("always").unwrap().status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_unknown_action_is_not_retried() {
        let engine = engine(EngineConfig::default());
        let result = engine.execute(&[FlowStep::new("x", "teleport")]).await.unwrap();
        let outcome = result.outcome("x").unwrap();
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.error.as_deref(), Some("no handler for action teleport"));
    }

    #[tokio::test]
    async fn test_cycle_is_rejected() {
        let engine = engine(EngineConfig::default());
        let steps = vec![
            FlowStep::new("a", "noop").depends_on("b"),
            FlowStep::new("b", "noop").depends_on("a"),
        ];
        assert!(matches!(
            engine.execute(&steps).await,
            Err(EngineError::Plan(PlanError::CircularDependency { .. }))
        ));
    }

    #[tokio::test]
    async fn test_wasm_step_uses_routed_pool() {
        let wasm = wat::parse_str(
            r#"(module (func (export "add") (param i32 i32) (result i32) local.get 0 local.get 1 i32.add))"#,
        )
        .unwrap();
        let cache = ModuleCache::new(SandboxConfig::default()).unwrap();
        let module = cache.compile(&wasm).unwrap();
        let pool = ResourcePool::new(
            PoolConfig::new("wasm-adder", ResourceKind::SandboxRuntime).with_bounds(0, 2),
            SandboxFactory::new(module, SandboxConfig::default()),
        )
        .unwrap();
        let pools = PoolManager::new();
        pools.register(Arc::new(pool.clone())).unwrap();

        let engine = engine(no_retry()).with_pools(pools);
        engine.route("adder", "wasm-adder");
        let steps = vec![
            FlowStep::new("sum", "wasm:adder")
                .with_param("export", "add")
                .with_param("args", json!([2, 3])),
        ];
        let result = engine.execute(&steps).await.unwrap();
        let outcome = result.outcome("sum").unwrap();
        assert_eq!(outcome.status, StepStatus::Completed);
        assert_eq!(outcome.output.as_ref().unwrap()["value"], json!(5));
        assert_eq!(outcome.resource, Some(ResourceKind::SandboxRuntime));
        assert_eq!(result.resource_utilization, 1.0);
        assert_eq!(pool.stats().in_use, 0);
        assert_eq!(pool.stats().available, 1);
    }

    #[tokio::test]
    async fn test_resource_step_without_pools_fails() {
        let engine = engine(no_retry());
        let result = engine.execute(&[FlowStep::new("call", "http:api")]).await.unwrap();
        assert_eq!(result.outcome("call").unwrap().status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_events_in_order() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let engine = engine(EngineConfig::default()).with_events(bus);
        engine.execute(&[FlowStep::new("only", "noop")]).await.unwrap();
        let topics: Vec<Topic> = (0..4).map(|_| rx.try_recv().unwrap().topic).collect();
        assert_eq!(
            topics,
            vec![Topic::GroupStarted, Topic::StepStarted, Topic::StepCompleted, Topic::GroupCompleted]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_events_carry_duration() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let engine = engine(no_retry()).with_events(bus);
        let steps = vec![FlowStep::new("slow", "sleep").with_param("ms", 5_000).with_timeout_ms(100)];
        engine.execute(&steps).await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        let step_failed = events.iter().find(|e| e.topic == Topic::StepFailed).unwrap();
        let group_failed = events.iter().find(|e| e.topic == Topic::GroupFailed).unwrap();
        assert!(step_failed.payload["duration_us"].as_u64().unwrap() >= 100_000);
        assert!(group_failed.payload["duration_us"].as_u64().unwrap() >= 100_000);
        assert_eq!(group_failed.payload["errors"].as_array().unwrap().len(), 1);
    }
}
