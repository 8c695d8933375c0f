use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::computer::Computer;
use crate::config::Settings;
use crate::cua::{CuaAction, Planner, PlannerResponse, ResponseId, TurnInput};
use crate::executor::{ActionExecutor, ActionOutcome};
use crate::input_request::{InputRequestDetector, KeywordDetector};
use crate::operator::{header, is_quit_command, Operator};
use crate::retry::{safe_api_call, RetryPolicy};
use crate::safety::{PendingSafetyCheck, SafetyGate, Verdict};
use crate::snapshot::{Observation, SnapshotStore};

// ========================= Core Types =========================

#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentError {
    #[error("computer error: {0}")]
    Computer(String),
    #[error("planner error: {0}")]
    Planner(String),
    #[error("operator error: {0}")]
    Operator(String),
    #[error("snapshot error: {0}")]
    Snapshot(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbortReason {
    SafetyDeclined,
    UserQuit,
    Error { message: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Done,
    Aborted(AbortReason),
    Exhausted,
}

impl RunStatus {
    pub fn stopped_by_user(&self) -> bool {
        matches!(self, RunStatus::Aborted(AbortReason::SafetyDeclined | AbortReason::UserQuit))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Action,
    GatedAction,
    UserInput,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepLog {
    pub iteration: usize,
    pub kind: StepKind,
    pub call_id: Option<String>,
    pub action: Option<String>,
    pub result_hint: String,
    pub timestamp_ms: u128,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub iterations: usize,
    pub final_message: Option<String>,
    pub steps: Vec<StepLog>,
    pub time_ms: u128,
}

// ========================= Engine =========================

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub max_iterations: usize,
    /// Pause between an action and its screenshot.
    pub settle_delay: Duration,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_iterations: 50, settle_delay: Duration::from_secs(1), retry: RetryPolicy::default() }
    }
}

impl EngineConfig {
    pub fn from_settings(s: &Settings) -> Self {
        Self { max_iterations: s.max_iterations, retry: s.retry_policy(), ..Self::default() }
    }
}

struct LoopState {
    iteration: usize,
    response: PlannerResponse,
    final_message: Option<String>,
}

enum Cycle {
    Continue,
    Finish(RunStatus),
}

/// Drives the observe/act cycle between a planner and a computer.
pub struct AutomationEngine<'a, P, C, O>
where
    P: Planner + ?Sized,
    C: Computer + ?Sized,
    O: Operator + ?Sized,
{
    planner: &'a P,
    computer: &'a C,
    operator: &'a O,
    executor: ActionExecutor,
    gate: SafetyGate,
    detector: Box<dyn InputRequestDetector>,
    snapshot_store: Option<Arc<dyn SnapshotStore>>,
    cfg: EngineConfig,
}

impl<'a, P, C, O> AutomationEngine<'a, P, C, O>
where
    P: Planner + ?Sized,
    C: Computer + ?Sized,
    O: Operator + ?Sized,
{
    pub fn new(planner: &'a P, computer: &'a C, operator: &'a O, cfg: EngineConfig) -> Self {
        Self {
            planner,
            computer,
            operator,
            executor: ActionExecutor::default(),
            gate: SafetyGate,
            detector: Box::new(KeywordDetector::default()),
            snapshot_store: None,
            cfg,
        }
    }

    pub fn with_executor(mut self, executor: ActionExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_detector(mut self, detector: Box<dyn InputRequestDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshot_store = Some(store);
        self
    }

    /// Runs one task to completion.
    ///
    /// Only planner failures that survive the retry policy are returned as
    /// `Err`; every other outcome, including aborts, is an `Ok` report.
    pub async fn run(&self, prompt: &str) -> Result<RunReport, AgentError> {
        let run_id = nanoid!();
        let start = Instant::now();
        info!(run_id = %run_id, max_iterations = self.cfg.max_iterations, "automation run started");

        let response = self.call_planner(move || self.planner.initial(prompt)).await?;
        let mut state = LoopState { iteration: 0, response, final_message: None };
        let mut steps: Vec<StepLog> = Vec::new();

        let status = loop {
            if state.iteration >= self.cfg.max_iterations {
                warn!(iterations = state.iteration, "iteration budget exhausted");
                break RunStatus::Exhausted;
            }
            match self.cycle(&run_id, start, &mut state, &mut steps).await {
                Ok(Cycle::Continue) => {
                    state.iteration += 1;
                    info!(iteration = state.iteration, response_id = %state.response.id.0, "cycle complete");
                }
                Ok(Cycle::Finish(status)) => break status,
                Err(e @ AgentError::Planner(_)) => {
                    error!(iteration = state.iteration + 1, error = %e, "planner unavailable, giving up");
                    return Err(e);
                }
                Err(e) => {
                    error!(iteration = state.iteration + 1, error = %e, "error in computer use loop");
                    break RunStatus::Aborted(AbortReason::Error { message: e.to_string() });
                }
            }
        };

        info!(run_id = %run_id, status = ?status, iterations = state.iteration, "automation run finished");
        Ok(RunReport {
            run_id,
            status,
            iterations: state.iteration,
            final_message: state.final_message,
            steps,
            time_ms: start.elapsed().as_millis(),
        })
    }

    async fn cycle(
        &self,
        run_id: &str,
        start: Instant,
        state: &mut LoopState,
        steps: &mut Vec<StepLog>,
    ) -> Result<Cycle, AgentError> {
        if let Some(summary) = state.response.reasoning_summary() {
            debug!(summary = %summary, "planner reasoning");
        }
        let Some(call) = state.response.first_computer_call() else {
            let message = state.response.message_text();
            if self.detector.is_requesting_input(&message) {
                return self.exchange_with_operator(start, state, steps, message).await;
            }
            info!("no more computer calls, task completed");
            if !message.is_empty() {
                state.final_message = Some(message);
            }
            return Ok(Cycle::Finish(RunStatus::Done));
        };
        let call_id = call.call_id.to_string();
        let action = call.action.clone();
        let checks = call.pending_safety_checks.to_vec();

        let mut step = StepLog {
            iteration: state.iteration,
            kind: if checks.is_empty() { StepKind::Action } else { StepKind::GatedAction },
            call_id: Some(call_id.clone()),
            action: Some(action.kind().to_string()),
            result_hint: String::new(),
            timestamp_ms: start.elapsed().as_millis(),
        };

        let acknowledged = match self.gate_action(&checks).await {
            Some(acks) => acks,
            None => {
                step.result_hint = "declined".into();
                steps.push(step);
                return Ok(Cycle::Finish(RunStatus::Aborted(AbortReason::SafetyDeclined)));
            }
        };

        let input = self.act_and_observe(run_id, state.iteration, call_id, &action, acknowledged, &mut step).await;
        steps.push(step);
        let input = input?;

        let previous = state.response.id.clone();
        state.response = self.follow_up(&previous, vec![input]).await?;
        Ok(Cycle::Continue)
    }

    /// `None` when the operator refused; otherwise the acknowledgment records.
    async fn gate_action(&self, checks: &[PendingSafetyCheck]) -> Option<Vec<PendingSafetyCheck>> {
        if checks.is_empty() {
            return Some(Vec::new());
        }
        match self.gate.review(self.operator, checks).await {
            Verdict::Approved(acks) => {
                self.operator.show("Safety checks acknowledged. Proceeding...");
                Some(acks)
            }
            Verdict::Declined => {
                self.operator.show("User declined to proceed. Ending session...");
                None
            }
        }
    }

    async fn act_and_observe(
        &self,
        run_id: &str,
        iteration: usize,
        call_id: String,
        action: &CuaAction,
        acknowledged: Vec<PendingSafetyCheck>,
        step: &mut StepLog,
    ) -> Result<TurnInput, AgentError> {
        info!(iteration = iteration + 1, call_id = %call_id, action = ?action, "executing action");
        let outcome = self.executor.execute(self.computer, action).await;
        step.result_hint = match &outcome {
            ActionOutcome::Performed => "performed".into(),
            ActionOutcome::Ignored => "ignored".into(),
            ActionOutcome::Failed(e) => format!("failed: {e}"),
        };

        tokio::time::sleep(self.cfg.settle_delay).await;
        let png = self.computer.screenshot().await?;
        let observation = Observation { call_id, png };
        if let Some(store) = &self.snapshot_store {
            if let Err(e) = store.save(run_id, iteration, &observation).await {
                warn!(error = %e, "could not store snapshot");
            }
        }

        Ok(TurnInput::ComputerCallOutput {
            call_id: observation.call_id,
            screenshot_png: observation.png,
            acknowledged_safety_checks: acknowledged,
        })
    }

    async fn exchange_with_operator(
        &self,
        start: Instant,
        state: &mut LoopState,
        steps: &mut Vec<StepLog>,
        message: String,
    ) -> Result<Cycle, AgentError> {
        self.operator.show(&header("AGENT MESSAGE:", 60));
        self.operator.show(&message);
        self.operator.show(&"=".repeat(60));
        self.operator.show("Tip: Type 'quit', 'bye', 'exit', or 'stop' to end the session");

        let reply = self
            .operator
            .ask("Your response: ")
            .await
            .map_err(|e| AgentError::Operator(e.to_string()))?;

        let mut step = StepLog {
            iteration: state.iteration,
            kind: StepKind::UserInput,
            call_id: None,
            action: None,
            result_hint: String::new(),
            timestamp_ms: start.elapsed().as_millis(),
        };

        if is_quit_command(&reply) {
            self.operator.show("User requested to stop the session. Ending...");
            step.result_hint = "quit".into();
            steps.push(step);
            return Ok(Cycle::Finish(RunStatus::Aborted(AbortReason::UserQuit)));
        }
        if reply.is_empty() {
            // same response comes round again and the question is repeated
            step.result_hint = "empty".into();
            steps.push(step);
            return Ok(Cycle::Continue);
        }

        self.operator.show(&format!("Sending to agent: {reply}"));
        step.result_hint = "answered".into();
        steps.push(step);
        let previous = state.response.id.clone();
        state.response = self.follow_up(&previous, vec![TurnInput::UserMessage(reply)]).await?;
        Ok(Cycle::Continue)
    }

    async fn follow_up(&self, previous: &ResponseId, input: Vec<TurnInput>) -> Result<PlannerResponse, AgentError> {
        self.call_planner(move || self.planner.follow_up(previous, input.clone())).await
    }

    async fn call_planner<F, Fut>(&self, op: F) -> Result<PlannerResponse, AgentError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<PlannerResponse>>,
    {
        safe_api_call(&self.cfg.retry, op)
            .await
            .map_err(|e| AgentError::Planner(format!("{:#}", e)))
    }
}
