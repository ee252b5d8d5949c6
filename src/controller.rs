//! The iteration loop state machine.
//!
//! Drives repeated agent invocations against the task queue (execute phase)
//! or the vision document (plan phase), bounded by an iteration budget,
//! classifying failures at each iteration boundary.

use std::fs;
use std::path::PathBuf;

use crate::agent::{AgentInvoker, FailureKind, FailurePolicy, InvocationRequest, InvocationStatus};
use crate::budget::IterationBudget;
use crate::error::Result;
use crate::progress::ProgressLog;
use crate::task_store::{Task, TaskStore};

/// Phase of a loop run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Turning the vision document into queued tasks.
    Plan,
    /// Draining the task queue.
    Execute,
}

impl Phase {
    /// Returns the phase name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Plan => "plan",
            Phase::Execute => "execute",
        }
    }
}

/// Why a loop run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The iteration budget was exhausted. A normal stop, not a failure.
    BudgetExhausted,
    /// The task store had no pending work.
    NoWorkRemaining,
    /// The agent signaled that the phase is complete.
    CompletionSignaled,
    /// The agent failed in a way classified as unrecoverable.
    AgentFailureFatal(String),
}

impl StopReason {
    /// True for the fatal stop, false for all controlled terminations.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StopReason::AgentFailureFatal(_))
    }
}

/// Controller state: `Idle` until the run starts, `Running` between
/// iterations, terminal once `Stopped`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopped(StopReason),
}

/// Outcome of a single loop pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// The agent ran and exited cleanly.
    Success,
    /// The agent ran and failed (transient or fatal).
    Failure,
    /// The budget check refused the pass.
    BudgetExhausted,
    /// The store had no pending work.
    NoWork,
}

/// Ephemeral record of one loop pass; feeds logging only.
#[derive(Debug, Clone)]
pub struct IterationRecord {
    /// 1-based iteration index (agent calls consumed so far).
    pub index: u32,
    pub phase: Phase,
    pub model: Option<String>,
    pub outcome: IterationOutcome,
}

/// Prompts driving a loop run.
#[derive(Debug, Clone)]
pub struct PhasePrompts {
    /// Prompt sent on every iteration.
    pub base: String,
    /// Compaction prompt substituted on cleanup iterations during planning.
    pub cleanup: Option<String>,
}

impl PhasePrompts {
    /// Prompts without a cleanup pass.
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            cleanup: None,
        }
    }

    /// Sets the cleanup prompt.
    pub fn with_cleanup(mut self, cleanup: impl Into<String>) -> Self {
        self.cleanup = Some(cleanup.into());
        self
    }
}

/// Result of a completed loop run.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    /// Why the loop stopped.
    pub reason: StopReason,
    /// Agent invocations performed.
    pub iterations: u32,
    /// Tasks marked done during the run.
    pub tasks_completed: u32,
}

/// The iteration loop state machine.
///
/// Iterations run strictly sequentially; the task store is re-read on every
/// pass and the budget is consumed before every agent call, so a run always
/// terminates within the configured maximum.
pub struct LoopController<'a, I: AgentInvoker> {
    phase: Phase,
    store: &'a TaskStore,
    invoker: &'a I,
    progress: &'a ProgressLog,
    budget: IterationBudget,
    policy: FailurePolicy,
    prompts: PhasePrompts,
    /// Every Nth plan iteration runs the cleanup prompt (0 = never).
    cleanup_every: u32,
    model: Option<String>,
    work_dir: PathBuf,
    /// Raw agent output is written here per iteration when set.
    run_log_dir: Option<PathBuf>,
    state: LoopState,
    records: Vec<IterationRecord>,
}

impl<'a, I: AgentInvoker> LoopController<'a, I> {
    /// Creates a controller for one phase run.
    pub fn new(
        phase: Phase,
        store: &'a TaskStore,
        invoker: &'a I,
        progress: &'a ProgressLog,
        max_iterations: u32,
        prompts: PhasePrompts,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            phase,
            store,
            invoker,
            progress,
            budget: IterationBudget::new(max_iterations),
            policy: FailurePolicy::default(),
            prompts,
            cleanup_every: 0,
            model: None,
            work_dir: work_dir.into(),
            run_log_dir: None,
            state: LoopState::Idle,
            records: Vec::new(),
        }
    }

    /// Sets the model passed to the agent.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Sets the failure classification policy.
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Enables the cleanup pass every `n` iterations (plan phase).
    pub fn with_cleanup_every(mut self, n: u32) -> Self {
        self.cleanup_every = n;
        self
    }

    /// Directs raw agent output into per-iteration files under `dir`.
    pub fn with_run_log_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.run_log_dir = dir;
        self
    }

    /// Returns the current controller state.
    pub fn state(&self) -> &LoopState {
        &self.state
    }

    /// Returns the iteration budget.
    pub fn budget(&self) -> &IterationBudget {
        &self.budget
    }

    /// Returns the records of completed passes.
    pub fn records(&self) -> &[IterationRecord] {
        &self.records
    }

    /// Runs the loop to a terminal state.
    pub async fn run(&mut self) -> Result<LoopOutcome> {
        self.state = LoopState::Running;
        let mut tasks_completed = 0u32;

        self.progress.append(&format!(
            "[{}] loop started (budget {})",
            self.phase.as_str(),
            self.budget.max()
        ))?;

        loop {
            // The store is the single source of truth for remaining work:
            // re-read every pass, never cached. The plan phase works from
            // the vision document instead, whose presence is validated
            // before the loop starts.
            let current = match self.phase {
                Phase::Execute => match self.store.next_pending()? {
                    Some(task) => Some(task),
                    None => {
                        self.record_pass(IterationOutcome::NoWork);
                        return self.stop(StopReason::NoWorkRemaining, tasks_completed);
                    }
                },
                Phase::Plan => None,
            };

            if !self.budget.try_consume() {
                self.record_pass(IterationOutcome::BudgetExhausted);
                return self.stop(StopReason::BudgetExhausted, tasks_completed);
            }
            let index = self.budget.used();

            let request = InvocationRequest {
                prompt: self.prompt_for(index, current.as_ref()),
                model: self.model.clone(),
                work_dir: self.work_dir.clone(),
            };

            tracing::info!(
                iteration = index,
                phase = self.phase.as_str(),
                task = current.as_ref().map(|t| t.id.as_str()),
                "invoking agent"
            );
            let result = self.invoker.invoke(request).await?;
            self.write_run_log(index, &result.output)?;

            match result.status {
                InvocationStatus::Success if result.completion_signaled => {
                    self.record_pass(IterationOutcome::Success);
                    if let Some(task) = &current {
                        self.store.mark_done(&task.id)?;
                        tasks_completed += 1;
                        self.progress.append(&format!(
                            "[{} #{}] task {} completed",
                            self.phase.as_str(),
                            index,
                            task.id
                        ))?;
                    } else {
                        // Plan phase: the agent declared planning finished.
                        self.progress.append(&format!(
                            "[{} #{}] completion signaled",
                            self.phase.as_str(),
                            index
                        ))?;
                        return self.stop(StopReason::CompletionSignaled, tasks_completed);
                    }
                }
                InvocationStatus::Success => {
                    self.record_pass(IterationOutcome::Success);
                    self.progress.append(&format!(
                        "[{} #{}] progress made, work continues",
                        self.phase.as_str(),
                        index
                    ))?;
                }
                InvocationStatus::Failure | InvocationStatus::Timeout => {
                    self.record_pass(IterationOutcome::Failure);
                    match self.policy.classify(&result) {
                        FailureKind::Transient => {
                            tracing::warn!(
                                iteration = index,
                                exit_code = ?result.exit_code,
                                "transient agent failure, retrying within budget"
                            );
                            self.progress.append(&format!(
                                "[{} #{}] transient failure, retrying",
                                self.phase.as_str(),
                                index
                            ))?;
                        }
                        FailureKind::Fatal => {
                            let reason = self.policy.describe(&result);
                            self.progress.append(&format!(
                                "[{} #{}] fatal failure: {}",
                                self.phase.as_str(),
                                index,
                                reason
                            ))?;
                            return self.stop(
                                StopReason::AgentFailureFatal(reason),
                                tasks_completed,
                            );
                        }
                    }
                }
            }
        }
    }

    /// Builds the prompt for one iteration.
    ///
    /// Cleanup iterations substitute the compaction prompt; execute
    /// iterations append the current task context.
    fn prompt_for(&self, index: u32, task: Option<&Task>) -> String {
        if self.cleanup_every > 0 && index % self.cleanup_every == 0 {
            if let Some(cleanup) = &self.prompts.cleanup {
                return cleanup.clone();
            }
        }
        match task {
            Some(task) => format!(
                "{}\n\n## Current Task ({})\n\n{}",
                self.prompts.base, task.id, task.description
            ),
            None => self.prompts.base.clone(),
        }
    }

    fn write_run_log(&self, index: u32, output: &str) -> Result<()> {
        if let Some(dir) = &self.run_log_dir {
            fs::create_dir_all(dir)?;
            fs::write(dir.join(format!("iter-{index:03}.log")), output)?;
        }
        Ok(())
    }

    fn record_pass(&mut self, outcome: IterationOutcome) {
        self.records.push(IterationRecord {
            index: self.budget.used(),
            phase: self.phase,
            model: self.model.clone(),
            outcome,
        });
    }

    fn stop(&mut self, reason: StopReason, tasks_completed: u32) -> Result<LoopOutcome> {
        let iterations = self.budget.used();
        tracing::info!(
            phase = self.phase.as_str(),
            reason = ?reason,
            iterations,
            tasks_completed,
            "loop stopped"
        );
        self.progress.append(&format!(
            "[{}] loop stopped after {} iteration(s): {:?}",
            self.phase.as_str(),
            iterations,
            reason
        ))?;
        self.state = LoopState::Stopped(reason.clone());
        Ok(LoopOutcome {
            reason,
            iterations,
            tasks_completed,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Scripted invoker for deterministic loop tests.

    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::agent::{AgentInvoker, InvocationRequest, InvocationResult, InvocationStatus};
    use crate::error::Result;

    /// Returns scripted results in order; panics if invoked past the script.
    pub struct ScriptedInvoker {
        script: Mutex<Vec<InvocationResult>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedInvoker {
        pub fn new(script: Vec<InvocationResult>) -> Self {
            let mut script = script;
            script.reverse();
            Self {
                script: Mutex::new(script),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl AgentInvoker for ScriptedInvoker {
        async fn invoke(&self, request: InvocationRequest) -> Result<InvocationResult> {
            self.prompts.lock().unwrap().push(request.prompt);
            Ok(self
                .script
                .lock()
                .unwrap()
                .pop()
                .expect("invoked past the scripted results"))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    /// Successful invocation with the completion marker.
    pub fn success_signaled() -> InvocationResult {
        InvocationResult {
            status: InvocationStatus::Success,
            completion_signaled: true,
            output: "LOOP_COMPLETE\n".to_string(),
            exit_code: Some(0),
        }
    }

    /// Successful invocation without the marker.
    pub fn success_partial() -> InvocationResult {
        InvocationResult {
            status: InvocationStatus::Success,
            completion_signaled: false,
            output: "made some progress\n".to_string(),
            exit_code: Some(0),
        }
    }

    /// Failed invocation with the given output.
    pub fn failure(output: &str) -> InvocationResult {
        InvocationResult {
            status: InvocationStatus::Failure,
            completion_signaled: false,
            output: output.to_string(),
            exit_code: Some(1),
        }
    }
}
