//! The run-submission seam exposed to the HTTP layer.
//!
//! A [`RunService`] owns the process-wide shared state (uid pool, broker,
//! engine handle, limits) and turns each submission into a fresh
//! [`Runner`](crate::runner::Runner). Submission is synchronous: the call
//! resolves once the run has concluded and its resources are released.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::broker::{Broker, SubscriberId, Subscription};
use crate::engine::ContainerRuntime;
use crate::error::Result;
use crate::runner::{RunOutcome, Runner, SandboxLimits};
use crate::uidpool::UidPool;

/// One submission: the program, its language tag, and the run's wall-clock
/// budget.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// The submitted language tag.
    pub language: String,
    /// The submitted source code, verbatim.
    pub code: String,
    /// Wall-clock budget before the stop escalation begins.
    pub timeout: Duration,
}

/// The caller-visible account of a concluded run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// The run's topic identifier.
    pub run_id: String,
    /// Whether the run completed normally or timed out.
    pub outcome: RunOutcome,
}

/// Shared orchestration state handed to every request handler.
pub struct RunService<R: ContainerRuntime + 'static> {
    runtime: Arc<R>,
    uid_pool: Arc<UidPool>,
    broker: Arc<Broker>,
    limits: SandboxLimits,
    isolation: bool,
}

impl<R: ContainerRuntime + 'static> RunService<R> {
    /// Wire the shared collaborators into a service.
    pub fn new(
        runtime: Arc<R>,
        uid_pool: Arc<UidPool>,
        broker: Arc<Broker>,
        limits: SandboxLimits,
        isolation: bool,
    ) -> Self {
        Self {
            runtime,
            uid_pool,
            broker,
            limits,
            isolation,
        }
    }

    /// The broker carrying this service's run topics.
    #[must_use]
    pub const fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Run a submission to completion.
    ///
    /// A blank or absent `run_id` is replaced with a fresh v4 UUID. The call
    /// blocks until the run concludes; live output is observable through
    /// [`Self::subscribe`] under the returned run id.
    ///
    /// # Errors
    ///
    /// Propagates the controller's errors: unsupported language, workspace
    /// I/O, pool exhaustion, and container-engine failures.
    pub async fn submit(&self, run_id: Option<String>, request: RunRequest) -> Result<RunReport> {
        let run_id = run_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        tracing::info!(run_id = %run_id, language = %request.language, "submitting run");
        let uid_pool = self.isolation.then(|| Arc::clone(&self.uid_pool));
        let runner = Runner::new(
            run_id.clone(),
            request.language,
            request.code,
            self.limits.clone(),
            Arc::clone(&self.runtime),
            uid_pool,
            Arc::clone(&self.broker),
        );

        let outcome = runner.run(request.timeout).await?;
        Ok(RunReport { run_id, outcome })
    }

    /// Attach a live listener to a run's topic.
    pub async fn subscribe(&self, run_id: &str) -> Subscription {
        self.broker.subscribe(run_id).await
    }

    /// Detach one listener from a run's topic.
    pub async fn unsubscribe(&self, run_id: &str, id: SubscriberId) {
        self.broker.unsubscribe(run_id, id).await;
    }
}
