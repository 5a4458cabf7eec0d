//! Run Record - lifecycle of one pipeline run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run is created but not yet started.
    Pending,
    /// Run is currently executing.
    Running,
    /// Run completed and produced a metrics table.
    Success,
    /// Run aborted on a fatal error; no table was produced.
    Failed,
}

/// Run Record tracks one execution of the pipeline.
///
/// There is no cancellation: a run either completes every fold or fails.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunRecord {
    run_id: String,
    seed: u64,
    status: RunStatus,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    n_samples: usize,
    n_excluded: usize,
    failure: Option<String>,
}

impl RunRecord {
    /// Create a new run record in Pending status.
    ///
    /// # Arguments
    ///
    /// * `run_id` - Unique identifier for the run
    /// * `seed` - Root seed every stochastic step derives from
    #[must_use]
    pub fn new(run_id: impl Into<String>, seed: u64) -> Self {
        Self {
            run_id: run_id.into(),
            seed,
            status: RunStatus::Pending,
            started_at: None,
            ended_at: None,
            n_samples: 0,
            n_excluded: 0,
            failure: None,
        }
    }

    /// Get the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the root seed.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Get the current run status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Get the start timestamp, if the run has started.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Get the end timestamp, if the run has completed.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Samples used for fitting and evaluation.
    #[must_use]
    pub const fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Samples excluded because a derived feature was missing.
    #[must_use]
    pub const fn n_excluded(&self) -> usize {
        self.n_excluded
    }

    /// Rendered fatal error, for failed runs.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Start the run, transitioning from Pending to Running.
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Record how many samples were used and excluded.
    pub fn record_samples(&mut self, used: usize, excluded: usize) {
        self.n_samples = used;
        self.n_excluded = excluded;
    }

    /// Complete the run successfully.
    pub fn succeed(&mut self) {
        self.status = RunStatus::Success;
        self.ended_at = Some(Utc::now());
    }

    /// Mark the run failed with the fatal error that stopped it.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.failure = Some(reason.into());
        self.ended_at = Some(Utc::now());
    }
}
