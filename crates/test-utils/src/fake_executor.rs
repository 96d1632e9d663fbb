use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use countdag::dag::{NodeKind, ScheduledStage};
use countdag::engine::{RuntimeEvent, StageOutcome};
use countdag::errors::Result;
use countdag::exec::ExecutorBackend;
use countdag::plan::ResourceRequest;
use tokio::sync::mpsc;

/// One attempt handed to the fake executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub stage: String,
    pub attempt: u32,
    pub request: ResourceRequest,
}

/// A fake executor that:
/// - records every submitted attempt with its resource request
/// - immediately reports a scripted outcome for each one.
///
/// By default every stage succeeds and every checkpoint resolves to zero
/// units. Use the `with_*` methods to script other outcomes.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    submitted: Arc<Mutex<Vec<Submission>>>,
    checkpoint_units: BTreeMap<String, u64>,
    resource_failures: BTreeMap<String, u32>,
    structural: BTreeMap<String, String>,
}

impl FakeExecutor {
    pub fn new(
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        submitted: Arc<Mutex<Vec<Submission>>>,
    ) -> Self {
        Self {
            runtime_tx,
            submitted,
            checkpoint_units: BTreeMap::new(),
            resource_failures: BTreeMap::new(),
            structural: BTreeMap::new(),
        }
    }

    /// Checkpoint `stage` resolves to `units`.
    pub fn with_checkpoint_units(mut self, stage: &str, units: u64) -> Self {
        self.checkpoint_units.insert(stage.to_string(), units);
        self
    }

    /// The first `attempts` attempts of `stage` fail with a resource error.
    pub fn with_failures(mut self, stage: &str, attempts: u32) -> Self {
        self.resource_failures.insert(stage.to_string(), attempts);
        self
    }

    /// Every attempt of `stage` fails structurally.
    pub fn with_structural_failure(mut self, stage: &str, message: &str) -> Self {
        self.structural.insert(stage.to_string(), message.to_string());
        self
    }

    fn outcome_for(&self, stage: &ScheduledStage) -> StageOutcome {
        if let Some(msg) = self.structural.get(&stage.id) {
            return StageOutcome::structural(msg.clone());
        }
        if self
            .resource_failures
            .get(&stage.id)
            .is_some_and(|n| stage.attempt <= *n)
        {
            return StageOutcome::resource_failure(Some(137));
        }
        match stage.kind {
            NodeKind::Checkpoint(_) => StageOutcome::Resolved {
                units: self.checkpoint_units.get(&stage.id).copied().unwrap_or(0),
            },
            _ => StageOutcome::Success,
        }
    }
}

impl ExecutorBackend for FakeExecutor {
    fn submit(
        &mut self,
        stages: Vec<ScheduledStage>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let submitted = Arc::clone(&self.submitted);
        let events: Vec<RuntimeEvent> = stages
            .iter()
            .map(|s| RuntimeEvent::StageCompleted {
                stage: s.id.clone(),
                attempt: s.attempt,
                outcome: self.outcome_for(s),
            })
            .collect();

        Box::pin(async move {
            {
                let mut guard = submitted.lock().unwrap();
                guard.extend(stages.iter().map(|s| Submission {
                    stage: s.id.clone(),
                    attempt: s.attempt,
                    request: s.request,
                }));
            }

            for event in events {
                tx.send(event).await.map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }
}
