//! The in-memory task collection and everything derived from it.
//!
//! [`TaskStore`] is the single writer of the collection. Mutations are
//! applied locally first, announced to subscribers, and only then sent to
//! the [`TaskApi`]. When the API refuses, the [`RollbackPolicy`] decides
//! whether the local change is undone; either way an error alert goes out
//! through the [`Notifier`].
//!
//! Derived views ([`TaskStore::by_status`], [`TaskStore::tasks_in_range`])
//! are computed on every call against the `now` the caller supplies.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::alert::{AlertKind, Notifier};
use crate::api::TaskApi;
use crate::datetime::end_of_day;
use crate::error::{ApiError, StoreError, StoreResult};
use crate::interval::DateInterval;
use crate::task::{Task, TaskDraft, TaskPatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Overdue,
    TodayDue,
    TodayWork,
    Upcoming,
}

impl Bucket {
    pub const ALL: [Bucket; 4] = [
        Bucket::Overdue,
        Bucket::TodayDue,
        Bucket::TodayWork,
        Bucket::Upcoming,
    ];

    /// Place a task relative to `now`. Checks run in order, so every task
    /// gets exactly one bucket: due at or before now is overdue; due before
    /// the next local midnight is due today; started (start at or before
    /// now) is today's work; anything else is upcoming.
    pub fn classify(task: &Task, now: DateTime<Utc>) -> Bucket {
        if task.due <= now {
            Bucket::Overdue
        } else if task.due < end_of_day(now) {
            Bucket::TodayDue
        } else if task.start.is_some_and(|start| start <= now) {
            Bucket::TodayWork
        } else {
            Bucket::Upcoming
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Bucket::Overdue => "Overdue",
            Bucket::TodayDue => "Due today",
            Bucket::TodayWork => "Work on today",
            Bucket::Upcoming => "Upcoming",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Tasks grouped by [`Bucket`], each group sorted incomplete first, then by
/// due.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Buckets<'a> {
    pub overdue: Vec<&'a Task>,
    pub today_due: Vec<&'a Task>,
    pub today_work: Vec<&'a Task>,
    pub upcoming: Vec<&'a Task>,
}

impl<'a> Buckets<'a> {
    pub fn get(&self, bucket: Bucket) -> &[&'a Task] {
        match bucket {
            Bucket::Overdue => &self.overdue,
            Bucket::TodayDue => &self.today_due,
            Bucket::TodayWork => &self.today_work,
            Bucket::Upcoming => &self.upcoming,
        }
    }

    fn get_mut(&mut self, bucket: Bucket) -> &mut Vec<&'a Task> {
        match bucket {
            Bucket::Overdue => &mut self.overdue,
            Bucket::TodayDue => &mut self.today_due,
            Bucket::TodayWork => &mut self.today_work,
            Bucket::Upcoming => &mut self.upcoming,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Bucket, &[&'a Task])> {
        Bucket::ALL.into_iter().map(move |bucket| (bucket, self.get(bucket)))
    }

    pub fn total(&self) -> usize {
        Bucket::ALL.iter().map(|bucket| self.get(*bucket).len()).sum()
    }

    /// Which bucket holds `id`, if any.
    pub fn bucket_of(&self, id: Uuid) -> Option<Bucket> {
        self.iter()
            .find(|(_, tasks)| tasks.iter().any(|task| task.id == id))
            .map(|(bucket, _)| bucket)
    }
}

/// Display order inside a bucket.
pub fn bucket_order(a: &Task, b: &Task) -> Ordering {
    a.complete
        .cmp(&b.complete)
        .then(a.due.cmp(&b.due))
        .then_with(|| a.title.cmp(&b.title))
        .then(a.id.cmp(&b.id))
}

/// What happens to an optimistic change when the API call fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RollbackPolicy {
    /// Restore the collection to its state before the change.
    #[default]
    Revert,
    /// Keep the local change; only the alert is raised.
    Retain,
}

/// Committed change announced to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// The whole collection was replaced from the API.
    Loaded(Vec<Task>),
    Created(Task),
    Updated { before: Task, after: Task },
    Deleted(Task),
    /// An earlier optimistic change was undone; the inner event describes
    /// the undoing change.
    RolledBack(Box<StoreEvent>),
    FocusChanged(Option<Uuid>),
}

pub type SubscriptionId = u64;

type Listener = Box<dyn FnMut(&StoreEvent)>;

pub struct TaskStore<A, N> {
    tasks: HashMap<Uuid, Task>,
    api: A,
    notifier: N,
    policy: RollbackPolicy,
    loaded: bool,
    failed_loads: usize,
    focused: Option<Uuid>,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: SubscriptionId,
}

impl<A, N> fmt::Debug for TaskStore<A, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskStore")
            .field("tasks", &self.tasks.len())
            .field("policy", &self.policy)
            .field("loaded", &self.loaded)
            .field("focused", &self.focused)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl<A: TaskApi, N: Notifier> TaskStore<A, N> {
    pub fn new(api: A, notifier: N) -> Self {
        Self {
            tasks: HashMap::new(),
            api,
            notifier,
            policy: RollbackPolicy::default(),
            loaded: false,
            failed_loads: 0,
            focused: None,
            listeners: Vec::new(),
            next_subscription: 0,
        }
    }

    pub fn with_policy(mut self, policy: RollbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> RollbackPolicy {
        self.policy
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn api_mut(&mut self) -> &mut A {
        &mut self.api
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Register a listener called after every committed change.
    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&StoreEvent) + 'static,
    {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.listeners.push((id, Box::new(listener)));
        debug!(subscription = id, "listener subscribed");
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sub, _)| *sub != id);
        before != self.listeners.len()
    }

    fn emit(&mut self, event: StoreEvent) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(&event);
        }
    }

    fn alert(&mut self, kind: AlertKind, message: String) {
        self.notifier.notify(kind, &message);
    }

    /// Replace the collection with the API's list. On failure the previous
    /// collection stays in place.
    #[instrument(skip(self))]
    pub fn load(&mut self) -> StoreResult<usize> {
        let fetched = match self.api.list() {
            Ok(fetched) => fetched,
            Err(err) => {
                self.failed_loads += 1;
                warn!(error = %err, attempt = self.failed_loads, "loading tasks failed");
                self.alert(AlertKind::Error, format!("Could not load tasks - {err}"));
                return Err(err.into());
            }
        };

        if self.failed_loads > 0 {
            self.failed_loads = 0;
            self.notifier.dismiss(AlertKind::Error);
            self.alert(AlertKind::Success, "Re-established connection".to_string());
        }

        self.tasks = fetched.into_iter().map(|task| (task.id, task)).collect();
        self.loaded = true;
        let count = self.tasks.len();
        info!(count, "loaded tasks");

        if let Some(focused) = self.focused
            && !self.tasks.contains_key(&focused)
        {
            self.focused = None;
            self.emit(StoreEvent::FocusChanged(None));
        }
        let snapshot = self.tasks.values().cloned().collect();
        self.emit(StoreEvent::Loaded(snapshot));
        Ok(count)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Resolve a full id or a unique id prefix.
    pub fn resolve(&self, token: &str) -> StoreResult<Uuid> {
        if token.is_empty() {
            return Err(StoreError::NoMatch(String::new()));
        }
        if let Ok(id) = Uuid::parse_str(token) {
            return self
                .tasks
                .contains_key(&id)
                .then_some(id)
                .ok_or(StoreError::UnknownTask(id));
        }

        let needle = token.to_ascii_lowercase();
        let mut matches = self
            .tasks
            .keys()
            .filter(|id| id.to_string().starts_with(&needle));
        match (matches.next(), matches.next()) {
            (Some(id), None) => Ok(*id),
            (Some(_), Some(_)) => Err(StoreError::AmbiguousId(token.to_string())),
            (None, _) => Err(StoreError::NoMatch(token.to_string())),
        }
    }

    /// The four buckets as of `now`.
    pub fn by_status(&self, now: DateTime<Utc>) -> Buckets<'_> {
        let end = end_of_day(now);
        debug!(%now, %end, count = self.tasks.len(), "classifying tasks");

        let mut buckets = Buckets::default();
        for task in self.tasks.values() {
            buckets.get_mut(Bucket::classify(task, now)).push(task);
        }
        for bucket in Bucket::ALL {
            buckets.get_mut(bucket).sort_by(|a, b| bucket_order(a, b));
        }
        buckets
    }

    /// Tasks whose due or start lies in `[start, end)`, earliest due first.
    pub fn tasks_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<&Task> {
        let Some(range) = DateInterval::new(start, end) else {
            return Vec::new();
        };
        self.tasks_in_interval(&range)
    }

    pub fn tasks_in_interval(&self, range: &DateInterval) -> Vec<&Task> {
        let mut found: Vec<&Task> = self
            .tasks
            .values()
            .filter(|task| task.falls_within(range))
            .collect();
        found.sort_by(|a, b| a.due.cmp(&b.due).then(a.id.cmp(&b.id)));
        found
    }

    /// Validate, persist through the API, then insert. There is no local id
    /// until the API assigns one, so nothing is inserted on failure.
    #[instrument(skip(self, draft, now), fields(title = %draft.title))]
    pub fn create(&mut self, draft: TaskDraft, now: DateTime<Utc>) -> StoreResult<Uuid> {
        draft.validate()?;

        let task = match self.api.create(&draft, now) {
            Ok(task) => task,
            Err(err) => {
                warn!(error = %err, "task creation failed");
                self.alert(AlertKind::Error, format!("Could not add task - {err}"));
                return Err(err.into());
            }
        };

        let id = task.id;
        info!(%id, "created task");
        self.tasks.insert(id, task.clone());
        self.alert(AlertKind::Success, format!("Added task '{}'", task.title));
        self.emit(StoreEvent::Created(task));
        Ok(id)
    }

    /// Flip completion locally, then sync. Returns the new state.
    #[instrument(skip(self, now))]
    pub fn toggle_complete(&mut self, id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        let task = self.tasks.get_mut(&id).ok_or(StoreError::UnknownTask(id))?;
        let before = task.clone();
        task.toggle_complete(now);
        let after = task.clone();
        debug!(%id, complete = after.complete, "toggled completion");

        self.emit(StoreEvent::Updated {
            before: before.clone(),
            after: after.clone(),
        });

        match self
            .api
            .toggle_complete(id, after.complete, after.completed_at)
        {
            Ok(()) => Ok(after.complete),
            Err(err) => Err(self.update_failed(before, after, err)),
        }
    }

    /// Apply a validated patch locally, then sync. An empty patch is a
    /// no-op and makes no API call.
    #[instrument(skip(self, patch))]
    pub fn edit(&mut self, id: Uuid, patch: &TaskPatch) -> StoreResult<Task> {
        let current = self.tasks.get(&id).ok_or(StoreError::UnknownTask(id))?;
        if patch.is_empty() {
            return Ok(current.clone());
        }

        let after = patch.applied_to(current)?;
        let before = current.clone();
        self.tasks.insert(id, after.clone());
        self.emit(StoreEvent::Updated {
            before: before.clone(),
            after: after.clone(),
        });

        match self.api.update(&after) {
            Ok(()) => Ok(after),
            Err(err) => Err(self.update_failed(before, after, err)),
        }
    }

    #[instrument(skip(self))]
    pub fn delete(&mut self, id: Uuid) -> StoreResult<()> {
        let task = self.tasks.remove(&id).ok_or(StoreError::UnknownTask(id))?;
        let was_focused = self.focused == Some(id);
        if was_focused {
            self.focused = None;
            self.emit(StoreEvent::FocusChanged(None));
        }
        self.emit(StoreEvent::Deleted(task.clone()));

        let err = match self.api.delete(id) {
            Ok(()) => {
                info!(%id, "deleted task");
                return Ok(());
            }
            Err(err) => err,
        };

        warn!(%id, error = %err, policy = ?self.policy, "task deletion failed");
        self.alert(AlertKind::Error, format!("Task could not be deleted - {err}"));
        if self.policy == RollbackPolicy::Revert {
            self.tasks.insert(id, task.clone());
            self.emit(StoreEvent::RolledBack(Box::new(StoreEvent::Created(task))));
            if was_focused {
                self.focused = Some(id);
                self.emit(StoreEvent::FocusChanged(Some(id)));
            }
        }
        Err(err.into())
    }

    fn update_failed(&mut self, before: Task, after: Task, err: ApiError) -> StoreError {
        warn!(id = %before.id, error = %err, policy = ?self.policy, "task update failed");
        self.alert(AlertKind::Error, format!("Task could not be updated - {err}"));
        if self.policy == RollbackPolicy::Revert {
            self.tasks.insert(before.id, before.clone());
            self.emit(StoreEvent::RolledBack(Box::new(StoreEvent::Updated {
                before: after,
                after: before,
            })));
        }
        err.into()
    }

    /// Mark the task whose details should be shown.
    pub fn set_focus(&mut self, id: Uuid) -> StoreResult<()> {
        if !self.tasks.contains_key(&id) {
            return Err(StoreError::UnknownTask(id));
        }
        if self.focused != Some(id) {
            self.focused = Some(id);
            self.emit(StoreEvent::FocusChanged(Some(id)));
        }
        Ok(())
    }

    pub fn remove_focus(&mut self) {
        if self.focused.take().is_some() {
            self.emit(StoreEvent::FocusChanged(None));
        }
    }

    pub fn focused(&self) -> Option<&Task> {
        self.focused.and_then(|id| self.tasks.get(&id))
    }
}
