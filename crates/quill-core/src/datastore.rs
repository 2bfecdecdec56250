use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::TaskApi;
use crate::error::ApiError;
use crate::task::{Task, TaskDraft};

/// Task API backed by a JSON-lines file, one task per line. Every write
/// replaces the file atomically.
#[derive(Debug)]
pub struct JsonlTaskApi {
    pub data_dir: PathBuf,
    pub tasks_path: PathBuf,
}

impl JsonlTaskApi {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let tasks_path = data_dir.join("tasks.data");
        if !tasks_path.exists() {
            fs::write(&tasks_path, "")
                .with_context(|| format!("failed to create {}", tasks_path.display()))?;
        }

        info!(
            data_dir = %data_dir.display(),
            tasks = %tasks_path.display(),
            "opened task file"
        );

        Ok(Self {
            data_dir,
            tasks_path,
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn load_tasks(&self) -> Result<Vec<Task>, ApiError> {
        load_jsonl(&self.tasks_path)
    }

    #[tracing::instrument(skip(self, tasks))]
    pub fn save_tasks(&self, tasks: &[Task]) -> Result<(), ApiError> {
        save_jsonl_atomic(&self.tasks_path, tasks)
    }

    fn modify<F>(&self, id: Uuid, apply: F) -> Result<(), ApiError>
    where
        F: FnOnce(&mut Task),
    {
        let mut tasks = self.load_tasks()?;
        let task = tasks
            .iter_mut()
            .find(|task| task.id == id)
            .ok_or(ApiError::NotFound(id))?;
        apply(task);
        self.save_tasks(&tasks)
    }
}

impl TaskApi for JsonlTaskApi {
    fn list(&mut self) -> Result<Vec<Task>, ApiError> {
        self.load_tasks()
    }

    #[tracing::instrument(skip(self, draft, now))]
    fn create(&mut self, draft: &TaskDraft, now: DateTime<Utc>) -> Result<Task, ApiError> {
        let mut tasks = self.load_tasks()?;
        let task = Task::from_draft(Uuid::new_v4(), draft.clone(), now);
        tasks.push(task.clone());
        tasks.sort_by_key(|t| (t.due, t.complete));
        self.save_tasks(&tasks)?;
        Ok(task)
    }

    #[tracing::instrument(skip(self, task), fields(id = %task.id))]
    fn update(&mut self, task: &Task) -> Result<(), ApiError> {
        self.modify(task.id, |stored| *stored = task.clone())
    }

    #[tracing::instrument(skip(self))]
    fn toggle_complete(
        &mut self,
        id: Uuid,
        complete: bool,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), ApiError> {
        self.modify(id, |stored| {
            stored.complete = complete;
            stored.completed_at = completed_at;
        })
    }

    #[tracing::instrument(skip(self))]
    fn delete(&mut self, id: Uuid) -> Result<(), ApiError> {
        let mut tasks = self.load_tasks()?;
        let before = tasks.len();
        tasks.retain(|task| task.id != id);
        if tasks.len() == before {
            return Err(ApiError::NotFound(id));
        }
        self.save_tasks(&tasks)
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> Result<Vec<Task>, ApiError> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let task: Task = serde_json::from_str(trimmed).map_err(|err| {
            ApiError::Rejected(format!(
                "failed parsing {} line {}: {err}",
                path.display(),
                idx + 1
            ))
        })?;
        out.push(task);
    }

    debug!(count = out.len(), "loaded tasks from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, tasks))]
fn save_jsonl_atomic(path: &Path, tasks: &[Task]) -> Result<(), ApiError> {
    debug!(file = %path.display(), count = tasks.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for task in tasks {
        let serialized = serde_json::to_string(task)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path).map_err(|err| err.error)?;

    Ok(())
}
