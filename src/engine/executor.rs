//! Workflow execution engine
//!
//! The `Engine` owns the definition store, the handler registry and every
//! workflow instance. Work flows through a shared queue of
//! `(instance, step index)` units:
//!
//! 1. `start_workflow` creates an instance and queues its first eligible step
//! 2. a worker dequeues the unit, runs the step's handler and applies the
//!    result or the retry / error policy
//! 3. the follow-on step is queued until the instance reaches a terminal state
//!
//! An instance never has more than one unit queued or running, so steps of one
//! instance always run in order. With `worker_pool_size: 1` (the default)
//! every step of every instance is serialized through a single worker.

use chrono::{Local, NaiveDateTime, Utc};
use futures::FutureExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::error::EngineError;
use super::handlers::{self, DatabaseQueryHandler, QueryExecutor};
use super::instance::{InstanceStatus, LogEntry, LogEvent, StepRuntime, StepStatus, WorkflowInstance};
use super::registry::{HandlerRegistry, StepHandler};
use super::retry::RetryQueue;
use super::scheduler::{ScheduledRun, Scheduler};
use super::status::{sanitize_logs, InstanceFilter, InstanceSummary, Sanitizer, StatusView};
use super::store::{DefinitionStore, DefinitionSummary, LoadedDefinition};
use crate::workflow::condition;
use crate::workflow::config::EngineConfig;
use crate::workflow::definition::{ErrorPolicy, WorkflowDefinition};
use crate::workflow::interpolate::interpolate_params;
use crate::workflow::loader::{DefinitionSource, RawDefinition};

/// One unit of work: run step `step_index` of an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub instance_id: String,
    pub step_index: usize,
    /// Re-run of the same step after a failure
    pub retry: bool,
}

/// A document a `DefinitionSource` provided that could not be loaded
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedDefinition {
    pub origin: String,
    pub error: String,
}

/// Outcome of `Engine::load_from_source`
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub loaded: Vec<LoadedDefinition>,
    pub rejected: Vec<RejectedDefinition>,
}

impl LoadReport {
    pub fn warnings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.loaded.iter().flat_map(|l| {
            l.warnings
                .iter()
                .map(move |w| (l.definition.id.as_str(), w.as_str()))
        })
    }
}

// ============================================================================
// Shared state
// ============================================================================

struct EngineInner {
    config: EngineConfig,
    sanitizer: Sanitizer,
    store: RwLock<DefinitionStore>,
    registry: RwLock<HandlerRegistry>,
    instances: RwLock<HashMap<String, WorkflowInstance>>,
    scheduler: Mutex<Scheduler>,
    work_tx: async_channel::Sender<WorkItem>,
    retry: RetryQueue,
    /// Signalled whenever an instance may have reached a terminal state
    finished: Notify,
    cancel: CancellationToken,
    sequence: AtomicU64,
}

impl EngineInner {
    fn next_instance_id(&self, workflow_id: &str) -> String {
        format!(
            "{}_{}_{}_{}",
            workflow_id,
            Utc::now().timestamp_millis(),
            std::process::id(),
            self.sequence.fetch_add(1, Ordering::Relaxed)
        )
    }

    #[instrument(skip(self, variables))]
    async fn start_workflow(
        &self,
        workflow_id: &str,
        variables: HashMap<String, Value>,
    ) -> Result<String, EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::ShutDown);
        }

        let definition = self.store.read().await.get(workflow_id)?;
        let instance_id = self.next_instance_id(&definition.id);

        let mut instance = WorkflowInstance::new(instance_id.clone(), &definition, variables);
        instance.status = InstanceStatus::Running;
        instance.log(
            LogEvent::WorkflowStarted,
            json!({
                "workflow_id": definition.id,
                "workflow_name": definition.name,
                "version": definition.version,
                "step_count": definition.steps.len(),
            }),
        );

        {
            let mut instances = self.instances.write().await;
            let instance = instances.entry(instance_id.clone()).or_insert(instance);
            self.queue_next_step(instance);
        }
        self.finished.notify_waiters();

        Ok(instance_id)
    }

    /// Queue the step at the cursor, skipping steps whose condition is false.
    /// Completes the instance once the cursor runs past the last step.
    fn queue_next_step(&self, instance: &mut WorkflowInstance) {
        loop {
            let index = instance.current_step_index;
            let Some(step) = instance.steps.get(index) else {
                instance.complete();
                return;
            };

            if let Some(expr) = step.condition.clone() {
                if !condition::evaluate(&expr, &instance.variables) {
                    let step_id = step.id.clone();
                    let step = &mut instance.steps[index];
                    step.status = StepStatus::Skipped;
                    step.end_time = Some(Utc::now());
                    instance.log(
                        LogEvent::StepSkipped,
                        json!({ "step_id": step_id, "condition": expr }),
                    );
                    instance.current_step_index += 1;
                    continue;
                }
            }

            let item = WorkItem {
                instance_id: instance.id.clone(),
                step_index: index,
                retry: false,
            };
            if self.work_tx.try_send(item).is_err() {
                let step_id = step.id.clone();
                instance.fail(Some(&step_id), &EngineError::ShutDown.to_string());
            }
            return;
        }
    }

    /// Mark the step running and build the handler's inputs.
    ///
    /// Every entry into a step counts against `max_step_executions`; retries
    /// of the step already entered do not.
    fn begin_step(
        &self,
        instance: &mut WorkflowInstance,
        index: usize,
        retry: bool,
    ) -> Option<(WorkflowInstance, StepRuntime)> {
        if instance.is_terminal() {
            debug!(instance_id = %instance.id, "Instance already finished, dropping work item");
            return None;
        }
        if index >= instance.steps.len() {
            warn!(instance_id = %instance.id, index, "Work item points past the last step");
            return None;
        }

        if !retry {
            if instance.step_executions >= self.config.max_step_executions {
                let step_id = instance.steps[index].id.clone();
                let message = format!(
                    "Exceeded maximum of {} step executions",
                    self.config.max_step_executions
                );
                instance.fail(Some(&step_id), &message);
                return None;
            }
            instance.step_executions += 1;
        }
        instance.current_step_index = index;

        let step = &mut instance.steps[index];
        step.status = StepStatus::Running;
        step.start_time = Some(Utc::now());
        step.end_time = None;
        step.error = None;
        step.attempts += 1;
        let details = json!({
            "step_id": step.id,
            "step_name": step.name,
            "step_type": step.step_type,
            "attempt": step.attempts,
        });
        instance.log(LogEvent::StepStarted, details);

        let mut call_step = instance.steps[index].clone();
        call_step.parameters = interpolate_params(&call_step.parameters, &instance.variables);
        Some((instance.clone(), call_step))
    }

    /// Run a handler, converting every failure mode into an error message
    async fn invoke(
        &self,
        handler: Arc<dyn StepHandler>,
        snapshot: &WorkflowInstance,
        step: &StepRuntime,
    ) -> Result<Value, String> {
        let call = AssertUnwindSafe(handler.execute(snapshot, step)).catch_unwind();

        let outcome = if self.config.enforce_step_timeouts {
            let limit = Duration::from_secs(step.timeout_seconds);
            match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(format!(
                        "Step '{}' timed out after {}s",
                        step.id, step.timeout_seconds
                    ))
                }
            }
        } else {
            call.await
        };

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("Handler for step '{}' panicked", step.id)),
        }
    }

    #[instrument(skip(self, item), fields(instance_id = %item.instance_id, step_index = item.step_index))]
    async fn execute_step(&self, item: WorkItem) {
        let prepared = {
            let mut instances = self.instances.write().await;
            match instances.get_mut(&item.instance_id) {
                Some(instance) => self.begin_step(instance, item.step_index, item.retry),
                None => {
                    warn!("Work item for unknown instance");
                    None
                }
            }
        };

        if let Some((snapshot, step)) = prepared {
            let handler = self.registry.read().await.lookup(&step.step_type);
            let outcome = match handler {
                Some(handler) => self.invoke(handler, &snapshot, &step).await,
                None => Err(EngineError::HandlerNotFound {
                    step_id: step.id.clone(),
                    step_type: step.step_type.clone(),
                }
                .to_string()),
            };

            let mut instances = self.instances.write().await;
            if let Some(instance) = instances.get_mut(&item.instance_id) {
                self.finish_step(instance, item.step_index, outcome);
            }
        }

        self.finished.notify_waiters();
    }

    fn finish_step(
        &self,
        instance: &mut WorkflowInstance,
        index: usize,
        outcome: Result<Value, String>,
    ) {
        if instance.is_terminal() {
            return;
        }

        match outcome {
            Ok(result) => {
                let step = &mut instance.steps[index];
                step.status = StepStatus::Completed;
                step.end_time = Some(Utc::now());
                step.result = Some(result.clone());
                let step_id = step.id.clone();
                let details = json!({ "step_id": step.id, "duration_ms": step.duration_ms() });
                instance.log(LogEvent::StepCompleted, details);

                instance.record_result(&step_id, &result);
                instance.current_step_index = index + 1;
                self.queue_next_step(instance);
            }
            Err(message) => self.handle_failure(instance, index, message),
        }
    }

    fn handle_failure(&self, instance: &mut WorkflowInstance, index: usize, message: String) {
        let step = &mut instance.steps[index];
        step.status = StepStatus::Failed;
        step.error = Some(message.clone());
        step.end_time = Some(Utc::now());
        let step_id = step.id.clone();
        let attempt = step.attempts;
        let delay_seconds = step.retry_delay_seconds;

        instance.log(
            LogEvent::StepFailed,
            json!({ "step_id": step_id, "error": message, "attempt": attempt }),
        );

        let step = &mut instance.steps[index];
        if step.retry_count > 0 {
            step.retry_count -= 1;
            step.status = StepStatus::Pending;
            let remaining = step.retry_count;
            instance.log(
                LogEvent::StepRetry,
                json!({
                    "step_id": step_id,
                    "retries_remaining": remaining,
                    "delay_seconds": delay_seconds,
                }),
            );

            let item = WorkItem {
                instance_id: instance.id.clone(),
                step_index: index,
                retry: true,
            };
            if !self.retry.schedule(item, Duration::from_secs(delay_seconds)) {
                instance.fail(Some(&step_id), &EngineError::ShutDown.to_string());
            }
            return;
        }

        match instance.error_policy.clone() {
            ErrorPolicy::Continue => {
                instance.log(
                    LogEvent::ErrorHandled,
                    json!({ "step_id": step_id, "action": "continue", "error": message }),
                );
                instance.current_step_index = index + 1;
                self.queue_next_step(instance);
            }
            ErrorPolicy::Goto(target) => {
                let target_index = target
                    .as_deref()
                    .and_then(|t| instance.steps.iter().position(|s| s.id == t));
                match target_index {
                    Some(target_index) => {
                        instance.log(
                            LogEvent::ErrorHandled,
                            json!({
                                "step_id": step_id,
                                "action": "goto",
                                "target": target,
                                "error": message,
                            }),
                        );
                        instance.current_step_index = target_index;
                        self.queue_next_step(instance);
                    }
                    None => {
                        warn!(instance_id = %instance.id, step_id = %step_id, target = ?target, "Goto target not found, aborting");
                        instance.log(
                            LogEvent::ErrorHandled,
                            json!({
                                "step_id": step_id,
                                "action": "goto",
                                "target": target,
                                "error": message,
                                "target_found": false,
                            }),
                        );
                        Self::abort(instance, step_id, message);
                    }
                }
            }
            ErrorPolicy::Abort => Self::abort(instance, step_id, message),
        }
    }

    fn abort(instance: &mut WorkflowInstance, step_id: String, message: String) {
        let error = EngineError::StepExecution {
            step_id: step_id.clone(),
            message,
        };
        instance.fail(Some(&step_id), &error.to_string());
    }

    async fn sync_schedules(&self, now: NaiveDateTime) {
        let definitions = self.store.read().await.scheduled();
        self.scheduler.lock().await.sync(&definitions, now);
    }

    async fn scheduler_tick(&self, now: NaiveDateTime) {
        let due = {
            let definitions = self.store.read().await.scheduled();
            let mut scheduler = self.scheduler.lock().await;
            scheduler.sync(&definitions, now);
            scheduler.due(now)
        };

        for workflow_id in due {
            match self.start_workflow(&workflow_id, HashMap::new()).await {
                Ok(instance_id) => {
                    info!(workflow_id = %workflow_id, instance_id = %instance_id, "Scheduled workflow triggered")
                }
                Err(e) => {
                    error!(workflow_id = %workflow_id, error = %e, "Failed to start scheduled workflow")
                }
            }
        }
    }
}

// ============================================================================
// Background loops
// ============================================================================

async fn worker_loop(inner: Arc<EngineInner>, rx: async_channel::Receiver<WorkItem>, worker_id: usize) {
    debug!(worker_id, "Worker started");
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            item = rx.recv() => match item {
                Ok(item) => inner.execute_step(item).await,
                Err(_) => break,
            },
        }
    }
    debug!(worker_id, "Worker stopped");
}

async fn scheduler_loop(inner: Arc<EngineInner>) {
    let tick = Duration::from_millis(inner.config.scheduler_tick_ms.max(10));
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = ticker.tick() => inner.scheduler_tick(Local::now().naive_local()).await,
        }
    }
    debug!("Scheduler stopped");
}

// ============================================================================
// Engine
// ============================================================================

/// Handle to a running engine. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Engine {
    /// Create an engine with the built-in handlers and spawn its workers,
    /// retry queue and scheduler. Must be called inside a Tokio runtime.
    pub fn new(config: EngineConfig) -> Self {
        let (work_tx, work_rx) = async_channel::unbounded();
        let cancel = CancellationToken::new();
        let (retry, retry_task) = RetryQueue::spawn(work_tx.clone(), cancel.clone());

        let mut registry = HandlerRegistry::new();
        handlers::register_builtins(&mut registry, &config);

        let workers = config.workers();
        let inner = Arc::new(EngineInner {
            sanitizer: Sanitizer::new(&config.display),
            config,
            store: RwLock::new(DefinitionStore::new()),
            registry: RwLock::new(registry),
            instances: RwLock::new(HashMap::new()),
            scheduler: Mutex::new(Scheduler::new()),
            work_tx,
            retry,
            finished: Notify::new(),
            cancel,
            sequence: AtomicU64::new(0),
        });

        let mut tasks = vec![retry_task];
        for worker_id in 0..workers {
            tasks.push(tokio::spawn(worker_loop(
                Arc::clone(&inner),
                work_rx.clone(),
                worker_id,
            )));
        }
        tasks.push(tokio::spawn(scheduler_loop(Arc::clone(&inner))));

        info!(workers, "Workflow engine started");

        Self {
            inner,
            tasks: Arc::new(Mutex::new(tasks)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------------

    /// Register a handler for a step type; the last registration wins
    pub async fn register_step_type(
        &self,
        step_type: impl Into<String>,
        handler: Arc<dyn StepHandler>,
    ) {
        self.inner.registry.write().await.register(step_type, handler);
    }

    /// Back the `database_query` step type with a query executor
    pub async fn register_query_executor(&self, executor: Arc<dyn QueryExecutor>) {
        self.register_step_type(
            handlers::DATABASE_QUERY,
            Arc::new(DatabaseQueryHandler::new(executor)),
        )
        .await;
    }

    pub async fn step_types(&self) -> Vec<String> {
        self.inner.registry.read().await.types()
    }

    // ------------------------------------------------------------------------
    // Definitions
    // ------------------------------------------------------------------------

    /// Parse, validate and store one definition document
    pub async fn load_definition(&self, raw: &RawDefinition) -> Result<LoadedDefinition, EngineError> {
        let loaded = {
            let registry = self.inner.registry.read().await;
            self.inner.store.write().await.load(raw, &registry)?
        };
        self.inner.sync_schedules(Local::now().naive_local()).await;
        Ok(loaded)
    }

    /// Store an already validated definition
    pub async fn register_definition(&self, definition: WorkflowDefinition) -> LoadedDefinition {
        let loaded = {
            let registry = self.inner.registry.read().await;
            self.inner.store.write().await.insert(definition, &registry)
        };
        self.inner.sync_schedules(Local::now().naive_local()).await;
        loaded
    }

    /// Load every document a source provides. Invalid documents are reported
    /// in the returned report and do not stop the rest from loading.
    #[instrument(skip(self, source), fields(source = %source.describe()))]
    pub async fn load_from_source(
        &self,
        source: &dyn DefinitionSource,
    ) -> Result<LoadReport, EngineError> {
        let documents = source.fetch().await?;
        let mut report = LoadReport::default();

        for raw in &documents {
            match self.load_definition(raw).await {
                Ok(loaded) => report.loaded.push(loaded),
                Err(e) => {
                    warn!(origin = %raw.origin, error = %e, "Rejected workflow definition");
                    report.rejected.push(RejectedDefinition {
                        origin: raw.origin.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            loaded = report.loaded.len(),
            rejected = report.rejected.len(),
            "Loaded workflow definitions"
        );
        Ok(report)
    }

    pub async fn get_definition(&self, workflow_id: &str) -> Result<Arc<WorkflowDefinition>, EngineError> {
        self.inner.store.read().await.get(workflow_id)
    }

    pub async fn list_workflows(&self) -> Vec<DefinitionSummary> {
        self.inner.store.read().await.list()
    }

    /// Next fire time of every scheduled definition
    pub async fn upcoming_runs(&self) -> Vec<ScheduledRun> {
        self.inner.scheduler.lock().await.upcoming()
    }

    // ------------------------------------------------------------------------
    // Instances
    // ------------------------------------------------------------------------

    /// Start an instance of a definition and return its id
    pub async fn start_workflow(
        &self,
        workflow_id: &str,
        variables: HashMap<String, Value>,
    ) -> Result<String, EngineError> {
        self.inner.start_workflow(workflow_id, variables).await
    }

    /// Start an instance and wait for it to finish
    pub async fn run_workflow(
        &self,
        workflow_id: &str,
        variables: HashMap<String, Value>,
        timeout: Duration,
    ) -> Result<StatusView, EngineError> {
        let instance_id = self.start_workflow(workflow_id, variables).await?;
        self.wait_for_completion(&instance_id, timeout).await
    }

    pub async fn get_status(&self, instance_id: &str) -> Result<StatusView, EngineError> {
        let instances = self.inner.instances.read().await;
        let instance = instances
            .get(instance_id)
            .ok_or_else(|| EngineError::InstanceNotFound(instance_id.to_string()))?;
        Ok(StatusView::build(instance, &self.inner.sanitizer))
    }

    pub async fn get_logs(&self, instance_id: &str) -> Result<Vec<LogEntry>, EngineError> {
        let instances = self.inner.instances.read().await;
        let instance = instances
            .get(instance_id)
            .ok_or_else(|| EngineError::InstanceNotFound(instance_id.to_string()))?;
        Ok(sanitize_logs(&instance.logs, &self.inner.sanitizer))
    }

    /// Instances matching `filter`, oldest first
    pub async fn list_instances(&self, filter: &InstanceFilter) -> Vec<InstanceSummary> {
        let instances = self.inner.instances.read().await;
        let mut summaries: Vec<InstanceSummary> = instances
            .values()
            .filter(|instance| filter.matches(instance))
            .map(InstanceSummary::from)
            .collect();
        summaries.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.instance_id.cmp(&b.instance_id))
        });
        summaries
    }

    /// Unsanitized snapshot of an instance
    pub async fn get_instance(&self, instance_id: &str) -> Option<WorkflowInstance> {
        self.inner.instances.read().await.get(instance_id).cloned()
    }

    /// Wait until the instance is completed or failed
    pub async fn wait_for_completion(
        &self,
        instance_id: &str,
        timeout: Duration,
    ) -> Result<StatusView, EngineError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let status = self.get_status(instance_id).await?;
            if status.status.is_terminal() {
                return Ok(status);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(EngineError::WaitTimeout(instance_id.to_string()));
            }
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Stop the workers, retry queue and scheduler and wait for them to exit.
    /// A step already running is allowed to finish.
    pub async fn shutdown(&self) {
        if !self.inner.cancel.is_cancelled() {
            info!("Shutting down workflow engine");
        }
        self.inner.cancel.cancel();
        self.inner.work_tx.close();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Engine task ended abnormally");
            }
        }
        self.inner.finished.notify_waiters();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
