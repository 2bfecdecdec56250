//! Error taxonomy for the task core.
//!
//! Validation failures are raised before anything is mutated. API failures
//! come back from a [`crate::api::TaskApi`] after an optimistic change was
//! already applied, so the store decides whether to roll it back.

use uuid::Uuid;

fn characters(count: &usize) -> String {
    if *count == 1 {
        "1 character".to_string()
    } else {
        format!("{count} characters")
    }
}

fn join_messages(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A single rejected field of a task draft or patch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Title is blank after trimming
    #[error("Title cannot be empty")]
    TitleEmpty,

    /// Title exceeds `MAX_TITLE_LENGTH`
    #[error("Title is {} too long", characters(.over))]
    TitleTooLong { over: usize },

    /// Description exceeds `MAX_DESCRIPTION_LENGTH`
    #[error("Description is {} too long", characters(.over))]
    DescriptionTooLong { over: usize },

    /// Start lands after due on the same calendar day
    #[error("Start time must come before due time")]
    StartTimeAfterDueTime,

    /// Start lands on a later day than due
    #[error("Start must come before due")]
    StartAfterDue,

    /// A date or time string could not be understood
    #[error("could not parse {field} '{input}': {reason}")]
    UnparseableDateTime {
        field: &'static str,
        input: String,
        reason: String,
    },
}

/// Every validation failure found in one input, in field order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", join_messages(.0))]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    pub fn contains(&self, err: &ValidationError) -> bool {
        self.0.contains(err)
    }
}

/// Failure reported by a task API collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The backend could not be reached
    #[error("task api unavailable: {0}")]
    Unavailable(String),

    /// The backend does not know this task
    #[error("task not found: {0}")]
    NotFound(Uuid),

    /// The backend refused the request
    #[error("task api rejected request: {0}")]
    Rejected(String),

    #[error("task file i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("task file is malformed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors surfaced by [`crate::store::TaskStore`] operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid task: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("task api call failed: {0}")]
    Api(#[from] ApiError),

    #[error("no task with id {0} in store")]
    UnknownTask(Uuid),

    #[error("no task matches '{0}'")]
    NoMatch(String),

    #[error("'{0}' matches more than one task; use a longer id")]
    AmbiguousId(String),
}

/// Errors surfaced by [`crate::timeline::Timeline`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimelineError {
    /// Requested window would materialise too many days at once
    #[error("window spans {days} days; at most {max} can be loaded at once")]
    WindowTooLarge { days: i64, max: i64 },

    #[error("requested window is empty")]
    EmptyWindow,
}

pub type StoreResult<T> = Result<T, StoreError>;
