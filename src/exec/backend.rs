// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime submits stage attempts, each carrying its resource request, to
//! an `ExecutorBackend`. Completion comes back asynchronously as
//! `RuntimeEvent::StageCompleted`.
//!
//! - `LocalExecutorBackend` runs every attempt as a local process in its own
//!   Tokio task. The global budget is enforced before submission, so the
//!   backend does no admission control of its own.
//! - Tests provide their own backend that records submissions and emits
//!   scripted completions.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::dag::ScheduledStage;
use crate::engine::RuntimeEvent;
use crate::errors::Result;
use crate::exec::{run_stage, ExecContext};

/// Trait abstracting where and how stage attempts run.
pub trait ExecutorBackend: Send {
    /// Submit the given attempts. Each one must eventually produce exactly
    /// one `StageCompleted` event.
    fn submit(
        &mut self,
        stages: Vec<ScheduledStage>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Backend that runs attempts as local processes.
pub struct LocalExecutorBackend {
    ctx: Arc<ExecContext>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
}

impl LocalExecutorBackend {
    pub fn new(ctx: ExecContext, runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            ctx: Arc::new(ctx),
            runtime_tx,
        }
    }
}

impl ExecutorBackend for LocalExecutorBackend {
    fn submit(
        &mut self,
        stages: Vec<ScheduledStage>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone handles so the future doesn't borrow `self` across `await`.
        let ctx = Arc::clone(&self.ctx);
        let tx = self.runtime_tx.clone();

        Box::pin(async move {
            for stage in stages {
                let ctx = Arc::clone(&ctx);
                let tx = tx.clone();

                tokio::spawn(async move {
                    let outcome = run_stage(&ctx, &stage).await;
                    debug!(stage = %stage.id, attempt = stage.attempt, ?outcome, "attempt finished");

                    let event = RuntimeEvent::StageCompleted {
                        stage: stage.id.clone(),
                        attempt: stage.attempt,
                        outcome,
                    };
                    if tx.send(event).await.is_err() {
                        warn!(stage = %stage.id, "runtime gone; dropping completion event");
                    }
                });
            }
            Ok(())
        })
    }
}
