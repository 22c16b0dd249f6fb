//! The evaluator: a four-stage state machine per task, with resume.
//!
//! Stages: setup → execute → verify → cleanup, then persist. A setup
//! failure short-circuits to persist with a retryable `State Duplication
//! Error`. On resume, tasks with a recorded success or non-retryable
//! failure are skipped; retryable failures are wiped and re-executed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use serde_json::Value;

use mark_agent::{Agent, AgentConfig, LoopVariant, ServiceConfigSource};
use mark_domain::error::is_retryable_message;
use mark_domain::{Result, ServiceConfig, ServiceKind, Task, TaskResult};
use mark_providers::{LlmClient, ModelCatalog};
use mark_state::{create_state_manager, StateManager, VerificationEnv};
use mark_tasks::{execute_task, TaskCatalog};

use crate::results::{ModelRunConfig, ResultStore};

/// Shared handle to the run's single state manager.
type SharedStateManager = Arc<tokio::sync::Mutex<Box<dyn StateManager>>>;

struct StateConfigSource(SharedStateManager);

#[async_trait]
impl ServiceConfigSource for StateConfigSource {
    async fn service_config(&self) -> ServiceConfig {
        self.0.lock().await.service_config_for_agent()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Options / report
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct EvaluatorOptions {
    pub model: String,
    pub service: ServiceKind,
    pub timeout: Duration,
    pub exp_name: String,
    pub output_dir: PathBuf,
    pub reasoning_effort: String,
    pub loop_variant: LoopVariant,
    pub tasks_root: PathBuf,
}

/// Aggregated outcome of one evaluation run.
#[derive(Debug, Clone)]
pub struct EvaluationReport {
    pub model_name: String,
    pub total_tasks: usize,
    pub successful_tasks: usize,
    pub failed_tasks: usize,
    pub task_results: Vec<TaskResult>,
    pub tasks_filter: String,
}

impl EvaluationReport {
    pub fn success_rate(&self) -> f64 {
        if self.total_tasks == 0 {
            0.0
        } else {
            self.successful_tasks as f64 / self.total_tasks as f64 * 100.0
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Evaluator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Evaluator {
    options: EvaluatorOptions,
    catalog: TaskCatalog,
    state: SharedStateManager,
    agent: Agent,
    store: ResultStore,
    /// Model id the provider reported serving; learned from the first
    /// agent response.
    actual_model_name: Option<String>,
}

impl Evaluator {
    /// Resolve the model, build the state manager and agent, and prepare
    /// the result store. Configuration errors surface here, before any
    /// task runs.
    pub async fn new(options: EvaluatorOptions) -> Result<Self> {
        let spec = ModelCatalog::resolve(&options.model)?;
        let llm = LlmClient::new(spec)?;

        let mut manager = create_state_manager(options.service)?;
        manager.initialize().await?;
        let state: SharedStateManager = Arc::new(tokio::sync::Mutex::new(manager));

        let catalog = TaskCatalog::discover(&options.tasks_root, options.service)?;

        let agent_config = AgentConfig::new(options.service, options.timeout)
            .with_variant(options.loop_variant)
            .with_reasoning_effort(Some(options.reasoning_effort.clone()));
        let agent = Agent::new(
            llm,
            agent_config,
            Arc::new(StateConfigSource(state.clone())),
        );

        let store = ResultStore::new(
            &options.output_dir,
            &options.model,
            &options.reasoning_effort,
            options.service.results_dir_name(),
            &options.exp_name,
        )?;

        Ok(Self {
            options,
            catalog,
            state,
            agent,
            store,
            actual_model_name: None,
        })
    }

    pub fn result_dir(&self) -> &Path {
        self.store.base_dir()
    }

    fn model_run_config(&self) -> ModelRunConfig {
        ModelRunConfig {
            mcp_service: self.options.service.as_str().to_string(),
            model_name: self.options.model.clone(),
            actual_model_name: self.actual_model_name.clone(),
            reasoning_effort: self.options.reasoning_effort.clone(),
            timeout_secs: self.options.timeout.as_secs(),
        }
    }

    // ── Single task ───────────────────────────────────────────────

    async fn run_single_task(&mut self, task: &mut Task) -> TaskResult {
        let task_started = std::time::Instant::now();

        // Stage 1: setup.
        tracing::info!(task = %task.name(), "stage 1: setup");
        let setup_ok = self.state.lock().await.setup(task).await;
        if !setup_ok {
            tracing::error!(task = %task.name(), "state setup failed");
            return TaskResult::setup_failure(
                task.name(),
                task.category_id.clone(),
                task.task_id.clone(),
                task_started.elapsed().as_secs_f64(),
            );
        }

        // Stages 2–3. Once setup has succeeded, stage 4 cleanup must run
        // no matter how execution or verification went.
        let mut result = self.execute_and_verify(task).await;

        // Stage 4: cleanup. Failure is reported but does not change the
        // verdict.
        tracing::info!(task = %task.name(), "stage 4: cleanup");
        if !self.state.lock().await.cleanup(task).await {
            tracing::warn!(task = %task.name(), "state cleanup reported failures");
        }

        result.task_execution_time = task_started.elapsed().as_secs_f64();
        result
    }

    /// Stages 2–3: render the instruction, drive the agent, verify. Every
    /// exit path returns a `TaskResult`; the caller owns cleanup.
    async fn execute_and_verify(&mut self, task: &mut Task) -> TaskResult {
        // Stage 2: execute.
        tracing::info!(task = %task.name(), "stage 2: execute");
        let instruction = match self.catalog.task_instruction(task) {
            Ok(instruction) => instruction,
            Err(e) => {
                tracing::error!(task = %task.name(), error = %e, "cannot render task instruction");
                return TaskResult {
                    task_name: task.name(),
                    success: false,
                    error_message: Some(e.to_string()),
                    verification_error: None,
                    verification_output: None,
                    category_id: task.category_id.clone(),
                    task_id: task.task_id.clone(),
                    token_usage: Default::default(),
                    turn_count: 0,
                    agent_execution_time: 0.0,
                    task_execution_time: 0.0,
                };
            }
        };

        if let Err(e) = std::fs::create_dir_all(self.store.task_dir(task)) {
            tracing::error!(error = %e, "cannot create task output directory");
        }
        let log_path = self.store.execution_log_path(task);
        // A retry starts from a clean log.
        let _ = std::fs::remove_file(&log_path);

        let agent_outcome = self.agent.execute(&instruction, &log_path).await;
        if let Some(model) = &agent_outcome.actual_model {
            self.actual_model_name = Some(model.clone());
        }

        if let Err(e) = self.store.write_messages(task, &agent_outcome.transcript) {
            tracing::error!(error = %e, "failed to write messages.json");
        }

        // Stage 3: verify, with the verification environment scoped to
        // exactly this stage.
        tracing::info!(task = %task.name(), "stage 3: verify");
        let mut result = {
            let messages_path = self.store.messages_path(task);
            let vars = self
                .state
                .lock()
                .await
                .verification_environment(&messages_path);
            let _env = VerificationEnv::set(vars);
            execute_task(task, &agent_outcome).await
        };

        result.agent_execution_time = agent_outcome.execution_time;
        result
    }

    // ── Full run ──────────────────────────────────────────────────

    pub async fn run(&mut self, task_filter: &str) -> Result<EvaluationReport> {
        let tasks = self.catalog.filter(task_filter);
        if tasks.is_empty() {
            // A degenerate but legal run: nothing to execute, but on-disk
            // results matching the filter still merge into the summary.
            tracing::warn!(
                filter = task_filter,
                service = %self.options.service,
                "no tasks match the filter"
            );
        }
        tracing::info!(count = tasks.len(), filter = task_filter, "starting evaluation");

        let mut results: Vec<TaskResult> = Vec::new();
        for task in tasks {
            let mut task = task;

            // Resume: a recorded success or non-retryable failure stands; a
            // retryable failure is wiped and re-run.
            if let Some(existing) = self.store.load_meta(&task) {
                let retry = !existing.success
                    && existing
                        .error_message
                        .as_deref()
                        .map(is_retryable_message)
                        .unwrap_or(false);
                if retry {
                    tracing::info!(
                        task = %task.name(),
                        error = existing.error_message.as_deref().unwrap_or(""),
                        "retrying task recorded with a retryable error"
                    );
                    self.store.remove_task_dir(&task)?;
                } else {
                    tracing::info!(task = %task.name(), "skipping already-completed task (resume)");
                    results.push(existing);
                    continue;
                }
            }

            let task_start = Local::now();
            let result = self.run_single_task(&mut task).await;
            let task_end = Local::now();

            if !self.store.messages_path(&task).exists() {
                self.store.write_messages(&task, &[])?;
            }
            self.store
                .write_meta(&task, &result, &self.model_run_config(), task_start, task_end)?;

            tracing::info!(
                task = %task.name(),
                success = result.success,
                "task finished"
            );
            results.push(result);
        }

        // Merge with every on-disk result matching the filter; fresh
        // results win over previously recorded ones.
        let mut merged: Vec<TaskResult> = Vec::new();
        for existing in self.store.load_all_results() {
            if result_matches_filter(&existing, task_filter)
                && !results.iter().any(|r| r.task_name == existing.task_name)
            {
                merged.push(existing);
            }
        }
        merged.extend(results);
        merged.sort_by(|a, b| a.task_name.cmp(&b.task_name));

        let report = EvaluationReport {
            model_name: self.options.model.clone(),
            total_tasks: merged.len(),
            successful_tasks: merged.iter().filter(|r| r.success).count(),
            failed_tasks: merged.iter().filter(|r| !r.success).count(),
            task_results: merged,
            tasks_filter: task_filter.to_string(),
        };

        self.store.write_summary(&report_to_json(&report, &self.model_run_config()))?;

        tracing::info!(
            passed = report.successful_tasks,
            total = report.total_tasks,
            rate = format!("{:.1}%", report.success_rate()),
            "evaluation complete"
        );
        Ok(report)
    }
}

/// Whether a recorded result matches a task filter.
fn result_matches_filter(result: &TaskResult, filter: &str) -> bool {
    if filter.eq_ignore_ascii_case("all") {
        return true;
    }
    match filter.split_once('/') {
        Some((category, task_id)) => result.category_id == category && result.task_id == task_id,
        None => result.category_id == filter,
    }
}

fn report_to_json(report: &EvaluationReport, model_config: &ModelRunConfig) -> Value {
    let total_time: f64 = report.task_results.iter().map(|r| r.task_execution_time).sum();
    serde_json::json!({
        "model_name": report.model_name,
        "model_config": {
            "mcp_service": model_config.mcp_service,
            "model_name": model_config.model_name,
            "actual_model_name": model_config.actual_model_name,
            "reasoning_effort": model_config.reasoning_effort,
            "timeout": model_config.timeout_secs,
        },
        "tasks_filter": report.tasks_filter,
        "total_tasks": report.total_tasks,
        "successful_tasks": report.successful_tasks,
        "failed_tasks": report.failed_tasks,
        "success_rate": report.success_rate(),
        "total_task_execution_time": total_time,
        "task_results": report.task_results.iter().map(|r| serde_json::json!({
            "task_name": r.task_name,
            "success": r.success,
            "error_message": r.error_message,
            "turn_count": r.turn_count,
            "token_usage": r.token_usage,
            "agent_execution_time": r.agent_execution_time,
            "task_execution_time": r.task_execution_time,
        })).collect::<Vec<_>>(),
    })
}
