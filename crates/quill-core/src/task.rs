use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datetime::{default_due, parse_date_expr, to_project_date};
use crate::error::{ValidationError, ValidationErrors};
use crate::interval::DateInterval;

pub const MAX_TITLE_LENGTH: usize = 100;
pub const MAX_DESCRIPTION_LENGTH: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,

    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub start: Option<DateTime<Utc>>,

    pub due: DateTime<Utc>,

    #[serde(default)]
    pub complete: bool,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn from_draft(id: Uuid, draft: TaskDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: draft.title,
            description: draft.description,
            start: draft.start,
            due: draft.due,
            complete: false,
            completed_at: None,
            created_at: now,
        }
    }

    /// Flip completion, stamping or clearing `completed_at`.
    pub fn toggle_complete(&mut self, now: DateTime<Utc>) {
        self.set_complete(!self.complete, now);
    }

    pub fn set_complete(&mut self, complete: bool, now: DateTime<Utc>) {
        self.complete = complete;
        self.completed_at = complete.then_some(now);
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.complete && self.due <= now
    }

    /// `[start, due)` when a start is set.
    pub fn work_interval(&self) -> Option<DateInterval> {
        self.start.and_then(|start| DateInterval::new(start, self.due))
    }

    /// True if the due instant or the start instant lies in `range`.
    pub fn falls_within(&self, range: &DateInterval) -> bool {
        range.contains(self.due) || self.start.is_some_and(|start| range.contains(start))
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        validate_fields(&self.title, &self.description, self.start, self.due)
    }
}

/// Input for creating a task; the API assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    pub due: DateTime<Utc>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>, due: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            start: None,
            due,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    /// Build a draft from user-entered strings. A missing due defaults to
    /// the end of the current local day.
    #[tracing::instrument(skip(description, now))]
    pub fn parse(
        title: &str,
        description: &str,
        start: Option<&str>,
        due: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationErrors> {
        let mut errors = Vec::new();

        let start = match start.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => parse_field("start", raw, now).map_err(|e| errors.push(e)).ok(),
            None => None,
        };
        let due = match due.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => parse_field("due", raw, now)
                .map_err(|e| errors.push(e))
                .ok(),
            None => Some(default_due(now)),
        };

        if !errors.is_empty() {
            return Err(ValidationErrors(errors));
        }

        let draft = Self {
            title: title.trim().to_string(),
            description: description.to_string(),
            start,
            due: due.unwrap_or_else(|| default_due(now)),
        };
        draft.validate()?;
        Ok(draft)
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        validate_fields(&self.title, &self.description, self.start, self.due)
    }
}

/// Partial edit. `start: Some(None)` clears the start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start: Option<Option<DateTime<Utc>>>,
    pub due: Option<DateTime<Utc>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.start.is_none()
            && self.due.is_none()
    }

    /// Parse `field:value` modifiers such as `due:tomorrow` or `start:`.
    pub fn parse_modifiers(args: &[String], now: DateTime<Utc>) -> Result<Self, ValidationErrors> {
        let mut patch = Self::default();
        let mut errors = Vec::new();
        let mut title_words = Vec::new();

        for arg in args {
            match arg.split_once(':') {
                Some(("due", raw)) => match parse_field("due", raw, now) {
                    Ok(due) => patch.due = Some(due),
                    Err(err) => errors.push(err),
                },
                Some(("start", "")) => patch.start = Some(None),
                Some(("start", raw)) => match parse_field("start", raw, now) {
                    Ok(start) => patch.start = Some(Some(start)),
                    Err(err) => errors.push(err),
                },
                Some(("description" | "desc", raw)) => {
                    patch.description = Some(raw.to_string());
                }
                _ => title_words.push(arg.as_str()),
            }
        }

        if !title_words.is_empty() {
            patch.title = Some(title_words.join(" "));
        }

        if errors.is_empty() {
            Ok(patch)
        } else {
            Err(ValidationErrors(errors))
        }
    }

    /// The task as it would look after this patch; validated.
    pub fn applied_to(&self, task: &Task) -> Result<Task, ValidationErrors> {
        let mut next = task.clone();
        if let Some(title) = &self.title {
            next.title = title.trim().to_string();
        }
        if let Some(description) = &self.description {
            next.description = description.clone();
        }
        if let Some(start) = self.start {
            next.start = start;
        }
        if let Some(due) = self.due {
            next.due = due;
        }
        next.validate()?;
        Ok(next)
    }
}

fn parse_field(
    field: &'static str,
    raw: &str,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ValidationError> {
    parse_date_expr(raw, now).map_err(|err| ValidationError::UnparseableDateTime {
        field,
        input: raw.to_string(),
        reason: format!("{err:#}"),
    })
}

fn validate_fields(
    title: &str,
    description: &str,
    start: Option<DateTime<Utc>>,
    due: DateTime<Utc>,
) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();

    let title_len = title.chars().count();
    if title.trim().is_empty() {
        errors.push(ValidationError::TitleEmpty);
    } else if title_len > MAX_TITLE_LENGTH {
        errors.push(ValidationError::TitleTooLong {
            over: title_len - MAX_TITLE_LENGTH,
        });
    }

    let description_len = description.chars().count();
    if description_len > MAX_DESCRIPTION_LENGTH {
        errors.push(ValidationError::DescriptionTooLong {
            over: description_len - MAX_DESCRIPTION_LENGTH,
        });
    }

    if let Some(start) = start
        && start > due
    {
        if to_project_date(start) == to_project_date(due) {
            errors.push(ValidationError::StartTimeAfterDueTime);
        } else {
            errors.push(ValidationError::StartAfterDue);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0)
            .single()
            .expect("valid now")
    }

    #[test]
    fn title_over_limit_reports_excess() {
        let draft = TaskDraft::new("x".repeat(105), now());
        let errs = draft.validate().expect_err("too long");
        assert!(errs.contains(&ValidationError::TitleTooLong { over: 5 }));
        assert!(errs.to_string().contains("5 characters too long"));
    }

    #[test]
    fn overdue_includes_the_due_instant() {
        let mut task = Task::from_draft(Uuid::new_v4(), TaskDraft::new("t", now()), now());
        assert!(task.is_overdue(now()));
        assert!(!task.is_overdue(now() - Duration::seconds(1)));
        task.set_complete(true, now());
        assert!(!task.is_overdue(now()));
    }

    #[test]
    fn title_at_limit_is_accepted() {
        assert!(TaskDraft::new("x".repeat(100), now()).validate().is_ok());
    }

    #[test]
    fn blank_title_is_rejected() {
        let errs = TaskDraft::new("   ", now()).validate().expect_err("blank");
        assert!(errs.contains(&ValidationError::TitleEmpty));
    }

    #[test]
    fn description_limit_counts_chars_not_bytes() {
        let draft = TaskDraft::new("t", now()).with_description("é".repeat(1000));
        assert!(draft.validate().is_ok());
        let draft = TaskDraft::new("t", now()).with_description("é".repeat(1002));
        let errs = draft.validate().expect_err("too long");
        assert!(errs.contains(&ValidationError::DescriptionTooLong { over: 2 }));
    }

    #[test]
    fn start_after_due_distinguishes_same_day() {
        let due = now();
        let same_day = TaskDraft::new("t", due).with_start(due + Duration::minutes(30));
        assert!(
            same_day
                .validate()
                .expect_err("same day")
                .contains(&ValidationError::StartTimeAfterDueTime)
        );

        let later_day = TaskDraft::new("t", due).with_start(due + Duration::days(2));
        assert!(
            later_day
                .validate()
                .expect_err("later day")
                .contains(&ValidationError::StartAfterDue)
        );

        assert!(TaskDraft::new("t", due).with_start(due).validate().is_ok());
    }

    #[test]
    fn parse_defaults_due_to_end_of_day() {
        let draft = TaskDraft::parse("Buy milk", "", None, None, now()).expect("valid draft");
        assert_eq!(draft.due, default_due(now()));
        assert_eq!(draft.start, None);
    }

    #[test]
    fn parse_reports_unparseable_dates() {
        let errs = TaskDraft::parse("t", "", Some("soonish"), Some("whenever"), now())
            .expect_err("bad dates");
        assert_eq!(errs.0.len(), 2);
        assert!(matches!(
            errs.0[0],
            ValidationError::UnparseableDateTime { field: "start", .. }
        ));
    }

    #[test]
    fn toggle_complete_stamps_and_clears_completed_at() {
        let mut task = Task::from_draft(Uuid::new_v4(), TaskDraft::new("t", now()), now());
        let later = now() + Duration::hours(1);
        task.toggle_complete(later);
        assert!(task.complete);
        assert_eq!(task.completed_at, Some(later));
        task.toggle_complete(later);
        assert!(!task.complete);
        assert_eq!(task.completed_at, None);
    }

    #[test]
    fn patch_modifiers_split_fields_from_title() {
        let args = vec![
            "Call".to_string(),
            "plumber".to_string(),
            "due:+2d".to_string(),
            "start:".to_string(),
        ];
        let patch = TaskPatch::parse_modifiers(&args, now()).expect("valid patch");
        assert_eq!(patch.title.as_deref(), Some("Call plumber"));
        assert_eq!(patch.due, Some(now() + Duration::days(2)));
        assert_eq!(patch.start, Some(None));
    }

    #[test]
    fn patch_is_validated_against_the_result() {
        let task = Task::from_draft(Uuid::new_v4(), TaskDraft::new("t", now()), now());
        let patch = TaskPatch {
            start: Some(Some(now() + Duration::days(3))),
            ..TaskPatch::default()
        };
        assert!(patch.applied_to(&task).is_err());
    }
}
