//! Boundary to the task backend.
//!
//! The store only needs these five calls; transport and persistence are the
//! implementor's business. [`MemoryTaskApi`] keeps tasks in a map and can be
//! told to fail, which is how the store's rollback path is exercised.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::error::ApiError;
use crate::task::{Task, TaskDraft};

pub trait TaskApi {
    fn list(&mut self) -> Result<Vec<Task>, ApiError>;

    /// Persist a new task and return it with its assigned id.
    fn create(&mut self, draft: &TaskDraft, now: DateTime<Utc>) -> Result<Task, ApiError>;

    /// Replace the stored fields of an existing task.
    fn update(&mut self, task: &Task) -> Result<(), ApiError>;

    fn toggle_complete(
        &mut self,
        id: Uuid,
        complete: bool,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), ApiError>;

    fn delete(&mut self, id: Uuid) -> Result<(), ApiError>;
}

impl<A: TaskApi + ?Sized> TaskApi for Box<A> {
    fn list(&mut self) -> Result<Vec<Task>, ApiError> {
        (**self).list()
    }

    fn create(&mut self, draft: &TaskDraft, now: DateTime<Utc>) -> Result<Task, ApiError> {
        (**self).create(draft, now)
    }

    fn update(&mut self, task: &Task) -> Result<(), ApiError> {
        (**self).update(task)
    }

    fn toggle_complete(
        &mut self,
        id: Uuid,
        complete: bool,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), ApiError> {
        (**self).toggle_complete(id, complete, completed_at)
    }

    fn delete(&mut self, id: Uuid) -> Result<(), ApiError> {
        (**self).delete(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiCall {
    List,
    Create,
    Update(Uuid),
    ToggleComplete(Uuid),
    Delete(Uuid),
}

#[derive(Debug, Default)]
pub struct MemoryTaskApi {
    tasks: HashMap<Uuid, Task>,
    offline: bool,
    fail_next: usize,
    calls: Vec<ApiCall>,
}

impl MemoryTaskApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks<I>(tasks: I) -> Self
    where
        I: IntoIterator<Item = Task>,
    {
        Self {
            tasks: tasks.into_iter().map(|task| (task.id, task)).collect(),
            ..Self::default()
        }
    }

    /// Every call fails until [`MemoryTaskApi::go_online`].
    pub fn go_offline(&mut self) {
        self.offline = true;
    }

    pub fn go_online(&mut self) {
        self.offline = false;
    }

    /// The next `count` calls fail, then calls succeed again.
    pub fn fail_next(&mut self, count: usize) {
        self.fail_next = count;
    }

    pub fn calls(&self) -> &[ApiCall] {
        &self.calls
    }

    pub fn stored(&self, id: Uuid) -> Option<&Task> {
        self.tasks.get(&id)
    }

    fn begin(&mut self, call: ApiCall) -> Result<(), ApiError> {
        self.calls.push(call);
        debug!(?call, offline = self.offline, "memory task api call");
        if self.offline {
            return Err(ApiError::Unavailable("backend offline".to_string()));
        }
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(ApiError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }

    fn existing(&mut self, id: Uuid) -> Result<&mut Task, ApiError> {
        self.tasks.get_mut(&id).ok_or(ApiError::NotFound(id))
    }
}

impl TaskApi for MemoryTaskApi {
    fn list(&mut self) -> Result<Vec<Task>, ApiError> {
        self.begin(ApiCall::List)?;
        Ok(self.tasks.values().cloned().collect())
    }

    fn create(&mut self, draft: &TaskDraft, now: DateTime<Utc>) -> Result<Task, ApiError> {
        self.begin(ApiCall::Create)?;
        let task = Task::from_draft(Uuid::new_v4(), draft.clone(), now);
        self.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    fn update(&mut self, task: &Task) -> Result<(), ApiError> {
        self.begin(ApiCall::Update(task.id))?;
        *self.existing(task.id)? = task.clone();
        Ok(())
    }

    fn toggle_complete(
        &mut self,
        id: Uuid,
        complete: bool,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), ApiError> {
        self.begin(ApiCall::ToggleComplete(id))?;
        let stored = self.existing(id)?;
        stored.complete = complete;
        stored.completed_at = completed_at;
        Ok(())
    }

    fn delete(&mut self, id: Uuid) -> Result<(), ApiError> {
        self.begin(ApiCall::Delete(id))?;
        self.tasks.remove(&id).map(|_| ()).ok_or(ApiError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_assigns_fresh_ids() {
        let mut api = MemoryTaskApi::new();
        let now = Utc::now();
        let a = api.create(&TaskDraft::new("a", now), now).expect("create a");
        let b = api.create(&TaskDraft::new("b", now), now).expect("create b");
        assert_ne!(a.id, b.id);
        assert_eq!(api.list().expect("list").len(), 2);
    }

    #[test]
    fn injected_failures_are_consumed() {
        let mut api = MemoryTaskApi::new();
        api.fail_next(1);
        assert!(matches!(api.list(), Err(ApiError::Unavailable(_))));
        assert!(api.list().is_ok());
        assert_eq!(api.calls(), &[ApiCall::List, ApiCall::List]);
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let mut api = MemoryTaskApi::new();
        let id = Uuid::new_v4();
        assert!(matches!(api.delete(id), Err(ApiError::NotFound(missing)) if missing == id));
    }
}
