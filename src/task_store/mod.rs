//! Task Store: read-only view of features and tasks, plus a `SetStatus`
//! mutation side-channel (spec §3, §9). The core only depends on this
//! trait; a Markdown-backed implementation is out of scope here — tests
//! and the scheduler drive it through [`InMemoryTaskStore`].

use crate::error::{HermesError, Result};
use crate::models::{FeatureId, Status, Task, TaskId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn list_tasks(&self) -> Result<Vec<Task>>;
    async fn get_task(&self, id: &TaskId) -> Result<Task>;
    async fn set_status(&self, id: &TaskId, status: Status) -> Result<()>;

    /// All tasks belonging to one feature, used to detect feature completion
    /// for the commit/log line in spec §9 ("feat(<featureID>): complete
    /// <featureName>").
    async fn tasks_for_feature(&self, feature_id: &FeatureId) -> Result<Vec<Task>>;
}

/// In-process task store backed by a map, keyed by [`TaskId`]. Construct
/// from a fixed task list; `set_status` mutates in place.
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl InMemoryTaskStore {
    pub fn new(tasks: Vec<Task>) -> Self {
        let tasks = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
        Self {
            tasks: RwLock::new(tasks),
        }
    }

}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn list_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.tasks.read().unwrap().values().cloned().collect())
    }

    async fn get_task(&self, id: &TaskId) -> Result<Task> {
        self.tasks
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| HermesError::TaskNotFound(id.to_string()))
    }

    async fn set_status(&self, id: &TaskId, status: Status) -> Result<()> {
        let mut tasks = self.tasks.write().unwrap();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| HermesError::TaskNotFound(id.to_string()))?;
        task.status = status;
        Ok(())
    }

    async fn tasks_for_feature(&self, feature_id: &FeatureId) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .read()
            .unwrap()
            .values()
            .filter(|t| &t.feature_id == feature_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Task;

    #[tokio::test]
    async fn set_status_persists_for_subsequent_reads() {
        let store = InMemoryTaskStore::new(vec![Task::new("T1", "First", "F1")]);
        store
            .set_status(&TaskId::from("T1"), Status::Completed)
            .await
            .unwrap();
        let task = store.get_task(&TaskId::from("T1")).await.unwrap();
        assert_eq!(task.status, Status::Completed);
    }

    #[tokio::test]
    async fn unknown_task_is_reported() {
        let store = InMemoryTaskStore::new(vec![]);
        let err = store.get_task(&TaskId::from("T9")).await.unwrap_err();
        assert!(matches!(err, HermesError::TaskNotFound(_)));
    }
}
