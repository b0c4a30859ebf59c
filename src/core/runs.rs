//! Single-writer leases per project and the cancellation token of each
//! active run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::error::RunError;

struct ActiveRun {
    run_id: String,
    token: CancellationToken,
}

#[derive(Clone, Default)]
pub struct RunRegistry {
    active: Arc<Mutex<HashMap<String, ActiveRun>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `project_id` for `run_id`, or fail at once if it is taken.
    pub fn try_acquire(&self, project_id: &str, run_id: &str) -> Result<RunLease, RunError> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| RunError::Concurrency(project_id.to_string()))?;
        if let Some(existing) = active.get(project_id) {
            debug!(
                "Project {} busy with run {}, rejecting {}",
                project_id, existing.run_id, run_id
            );
            return Err(RunError::Concurrency(project_id.to_string()));
        }
        let token = CancellationToken::new();
        active.insert(
            project_id.to_string(),
            ActiveRun {
                run_id: run_id.to_string(),
                token: token.clone(),
            },
        );
        Ok(RunLease {
            registry: self.clone(),
            project_id: project_id.to_string(),
            run_id: run_id.to_string(),
            token,
        })
    }

    pub fn is_active(&self, project_id: &str) -> bool {
        self.active
            .lock()
            .map(|a| a.contains_key(project_id))
            .unwrap_or(false)
    }

    pub fn active_run(&self, project_id: &str) -> Option<String> {
        self.active
            .lock()
            .ok()
            .and_then(|a| a.get(project_id).map(|r| r.run_id.clone()))
    }

    /// Trip the active run's token. Returns the run id if there was one.
    pub fn cancel(&self, project_id: &str) -> Option<String> {
        let active = self.active.lock().ok()?;
        let run = active.get(project_id)?;
        info!("Cancelling run {} for project {}", run.run_id, project_id);
        run.token.cancel();
        Some(run.run_id.clone())
    }

    fn release(&self, project_id: &str, run_id: &str) {
        if let Ok(mut active) = self.active.lock()
            && active.get(project_id).is_some_and(|r| r.run_id == run_id)
        {
            active.remove(project_id);
        }
    }
}

/// Held for the duration of one run; the project is released on drop.
pub struct RunLease {
    registry: RunRegistry,
    project_id: String,
    run_id: String,
    token: CancellationToken,
}

impl RunLease {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        self.registry.release(&self.project_id, &self.run_id);
        debug!("Released project {} from run {}", self.project_id, self.run_id);
    }
}
