//! Burn-mode phase orchestration.
//!
//! Sequences a planning loop and an execution loop over the same workspace.
//! The phases share the run configuration's model and flags but carry
//! independent iteration budgets; a fatal planning stop aborts the run
//! before the execute phase can observe a half-built task queue.

use std::path::PathBuf;

use crate::agent::{
    AgentInvoker, FailurePolicy, InvocationRequest, InvocationStatus,
};
use crate::config::RunConfig;
use crate::controller::{LoopController, LoopOutcome, Phase, PhasePrompts, StopReason};
use crate::error::Result;
use crate::progress::ProgressLog;
use crate::task_store::TaskStore;

/// Result of a burn run.
#[derive(Debug, Clone)]
pub struct BurnOutcome {
    /// Plan-phase outcome.
    pub plan: LoopOutcome,
    /// Execute-phase outcome; `None` when the plan phase stopped fatally.
    pub execute: Option<LoopOutcome>,
}

impl BurnOutcome {
    /// True when neither phase stopped fatally.
    pub fn success(&self) -> bool {
        !self.plan.reason.is_fatal()
            && self
                .execute
                .as_ref()
                .is_some_and(|outcome| !outcome.reason.is_fatal())
    }

    /// Returns the fatal reason, if either phase stopped fatally.
    pub fn fatal_reason(&self) -> Option<&str> {
        if let StopReason::AgentFailureFatal(reason) = &self.plan.reason {
            return Some(reason);
        }
        if let Some(outcome) = &self.execute {
            if let StopReason::AgentFailureFatal(reason) = &outcome.reason {
                return Some(reason);
            }
        }
        None
    }
}

/// Orchestrates the plan → execute handoff.
pub struct PhaseOrchestrator<'a, I: AgentInvoker> {
    store: &'a TaskStore,
    invoker: &'a I,
    progress: &'a ProgressLog,
    config: &'a RunConfig,
    plan_prompts: PhasePrompts,
    exec_prompts: PhasePrompts,
    policy: FailurePolicy,
    work_dir: PathBuf,
    run_log_dir: Option<PathBuf>,
}

impl<'a, I: AgentInvoker> PhaseOrchestrator<'a, I> {
    /// Creates an orchestrator over a shared workspace.
    pub fn new(
        store: &'a TaskStore,
        invoker: &'a I,
        progress: &'a ProgressLog,
        config: &'a RunConfig,
        plan_prompts: PhasePrompts,
        exec_prompts: PhasePrompts,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            invoker,
            progress,
            config,
            plan_prompts,
            exec_prompts,
            policy: FailurePolicy::default(),
            work_dir: work_dir.into(),
            run_log_dir: None,
        }
    }

    /// Sets the failure classification policy for both phases.
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Directs raw agent output into per-phase subdirectories of `dir`.
    pub fn with_run_log_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.run_log_dir = dir;
        self
    }

    /// Runs plan then execute, aborting after a fatal plan stop.
    pub async fn run(&self) -> Result<BurnOutcome> {
        tracing::info!(
            plan_max = self.config.plan_max,
            exec_max = self.config.exec_max,
            model = %self.config.model,
            "burn started"
        );
        self.progress.append("[burn] plan phase starting")?;

        let mut plan = LoopController::new(
            Phase::Plan,
            self.store,
            self.invoker,
            self.progress,
            self.config.plan_max,
            self.plan_prompts.clone(),
            self.work_dir.clone(),
        )
        .with_model(Some(self.config.model.clone()))
        .with_policy(self.policy.clone())
        .with_cleanup_every(self.config.cleanup_every)
        .with_run_log_dir(self.run_log_dir.as_ref().map(|d| d.join("plan")));

        let plan_outcome = plan.run().await?;

        if let StopReason::AgentFailureFatal(reason) = &plan_outcome.reason {
            tracing::error!(reason = %reason, "plan phase failed fatally, aborting burn");
            self.progress
                .append("[burn] aborted: plan phase stopped fatally")?;
            return Ok(BurnOutcome {
                plan: plan_outcome,
                execute: None,
            });
        }

        self.compact_queue().await?;

        self.progress.append("[burn] execute phase starting")?;

        // Fresh controller, independent budget; only the populated task
        // store crosses the phase boundary.
        let mut exec = LoopController::new(
            Phase::Execute,
            self.store,
            self.invoker,
            self.progress,
            self.config.exec_max,
            self.exec_prompts.clone(),
            self.work_dir.clone(),
        )
        .with_model(Some(self.config.model.clone()))
        .with_policy(self.policy.clone())
        .with_run_log_dir(self.run_log_dir.as_ref().map(|d| d.join("execute")));

        let exec_outcome = exec.run().await?;

        Ok(BurnOutcome {
            plan: plan_outcome,
            execute: Some(exec_outcome),
        })
    }

    /// One compaction pass at the phase boundary: consolidate whatever the
    /// plan loop queued before execution starts. A local side-effecting
    /// step outside both budgets; failures are logged and execution
    /// proceeds on the uncompacted queue.
    async fn compact_queue(&self) -> Result<()> {
        let Some(cleanup) = &self.plan_prompts.cleanup else {
            return Ok(());
        };

        let request = InvocationRequest {
            prompt: cleanup.clone(),
            model: Some(self.config.model.clone()),
            work_dir: self.work_dir.clone(),
        };
        match self.invoker.invoke(request).await {
            Ok(result) if result.status == InvocationStatus::Success => {
                self.progress.append("[burn] queue compaction completed")?;
            }
            Ok(_) => {
                tracing::warn!("queue compaction failed, executing uncompacted queue");
                self.progress
                    .append("[burn] queue compaction failed, continuing")?;
            }
            Err(e) => {
                tracing::warn!(error = %e, "queue compaction could not run");
            }
        }
        Ok(())
    }
}
