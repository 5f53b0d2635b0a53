//! In-memory processing queue

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::{AgentError, Result};
use crate::types::TaskId;

use super::task::{OfferTrigger, Task, TaskStatus};

#[derive(Default)]
struct QueueState {
    tasks: BTreeMap<TaskId, Task>,
    next_id: u64,
}

/// Pull-based task queue shared by the workers
#[derive(Clone, Default)]
pub struct TaskQueue {
    state: Arc<RwLock<QueueState>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a trigger. A pending task for the same offer is reused.
    pub async fn enqueue(&self, trigger: OfferTrigger, not_before: DateTime<Utc>) -> TaskId {
        let mut state = self.state.write().await;

        if let Some(existing) = state
            .tasks
            .values()
            .find(|t| t.status == TaskStatus::Pending && t.trigger.offer_id == trigger.offer_id)
        {
            tracing::debug!(task = %existing.id, offer = %trigger.offer_id, "Offer already queued");
            return existing.id;
        }

        state.next_id += 1;
        let id = TaskId(state.next_id);
        let now = Utc::now();
        tracing::debug!(task = %id, negotiation = %trigger.negotiation_id, "Task queued");
        state.tasks.insert(
            id,
            Task {
                id,
                trigger,
                status: TaskStatus::Pending,
                attempts: 0,
                not_before,
                created_at: now,
                updated_at: now,
                note: None,
            },
        );
        id
    }

    /// Oldest task that is ready to run, without claiming it
    pub async fn next_pending(&self, now: DateTime<Utc>) -> Option<Task> {
        self.state
            .read()
            .await
            .tasks
            .values()
            .find(|t| t.is_ready(now))
            .cloned()
    }

    /// Claim a pending task. Fails if another worker got there first.
    pub async fn mark_processing(&self, id: TaskId) -> Result<Task> {
        let mut state = self.state.write().await;
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| AgentError::TaskNotFound(id.to_string()))?;
        if task.status != TaskStatus::Pending {
            return Err(AgentError::InvalidTaskTransition(format!(
                "{} is {}, not pending",
                id, task.status
            )));
        }
        task.status = TaskStatus::Processing;
        task.attempts += 1;
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    /// Find and claim the next ready task in one step
    pub async fn claim_next(&self, now: DateTime<Utc>) -> Option<Task> {
        let mut state = self.state.write().await;
        let task = state.tasks.values_mut().find(|t| t.is_ready(now))?;
        task.status = TaskStatus::Processing;
        task.attempts += 1;
        task.updated_at = now;
        Some(task.clone())
    }

    pub async fn mark_completed(&self, id: TaskId, note: Option<String>) -> Result<()> {
        self.finish(id, TaskStatus::Completed, note).await
    }

    pub async fn mark_failed(&self, id: TaskId, error: impl Into<String>) -> Result<()> {
        self.finish(id, TaskStatus::Failed, Some(error.into())).await
    }

    async fn finish(&self, id: TaskId, status: TaskStatus, note: Option<String>) -> Result<()> {
        let mut state = self.state.write().await;
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| AgentError::TaskNotFound(id.to_string()))?;
        if task.status != TaskStatus::Processing {
            return Err(AgentError::InvalidTaskTransition(format!(
                "{} is {}, cannot become {}",
                id, task.status, status
            )));
        }
        task.status = status;
        task.note = note;
        task.updated_at = Utc::now();
        Ok(())
    }

    pub async fn get(&self, id: TaskId) -> Option<Task> {
        self.state.read().await.tasks.get(&id).cloned()
    }

    pub async fn count(&self, status: TaskStatus) -> usize {
        self.state
            .read()
            .await
            .tasks
            .values()
            .filter(|t| t.status == status)
            .count()
    }

    /// Tasks that are not finished yet
    pub async fn outstanding(&self) -> usize {
        self.state
            .read()
            .await
            .tasks
            .values()
            .filter(|t| !t.status.is_finished())
            .count()
    }

    /// Drop completed and failed tasks last touched before `cutoff`
    pub async fn prune_finished(&self, cutoff: DateTime<Utc>) -> usize {
        let mut state = self.state.write().await;
        let before = state.tasks.len();
        state
            .tasks
            .retain(|_, t| !(t.status.is_finished() && t.updated_at < cutoff));
        before - state.tasks.len()
    }

    /// Wait until every task is finished
    pub async fn wait_idle(&self, poll: Duration) {
        while self.outstanding().await > 0 {
            tokio::time::sleep(poll).await;
        }
    }
}
