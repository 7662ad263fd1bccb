use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    InReview,
    Done,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::InReview => "in_review",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(TaskStatus::Todo),
            "in_progress" => Ok(TaskStatus::InProgress),
            "in_review" => Ok(TaskStatus::InReview),
            "done" => Ok(TaskStatus::Done),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(AppError::validation(format!("unknown task status: {other}"))),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Lowest,
    Low,
    Medium,
    High,
    Highest,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Lowest => "lowest",
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Highest => "highest",
        }
    }
}

impl FromStr for TaskPriority {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lowest" => Ok(TaskPriority::Lowest),
            "low" => Ok(TaskPriority::Low),
            "medium" => Ok(TaskPriority::Medium),
            "high" => Ok(TaskPriority::High),
            "highest" => Ok(TaskPriority::Highest),
            other => Err(AppError::validation(format!(
                "unknown task priority: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Task,
    Bug,
    Feature,
    Epic,
    Story,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Task => "task",
            TaskType::Bug => "bug",
            TaskType::Feature => "feature",
            TaskType::Epic => "epic",
            TaskType::Story => "story",
        }
    }
}

impl FromStr for TaskType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(TaskType::Task),
            "bug" => Ok(TaskType::Bug),
            "feature" => Ok(TaskType::Feature),
            "epic" => Ok(TaskType::Epic),
            "story" => Ok(TaskType::Story),
            other => Err(AppError::validation(format!("unknown task type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Task {
    pub id: Uuid,
    pub team_id: Uuid,
    pub project_id: Uuid,
    pub creator_id: Uuid,
    /// Project-key-prefixed identifier, e.g. BACK-17.
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub story_points: Option<i32>,
    pub due_date: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub position: i32,
    pub assignee_ids: Vec<Uuid>,
    pub label_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl crate::events::Loggable for Task {
    fn entity_type() -> &'static str {
        "task"
    }
    fn subject_id(&self) -> Uuid {
        self.id
    }
}

/// Row shape; enum columns come back as TEXT and are parsed in the
/// conversion below. Assignees and labels live in join tables and are
/// attached by the caller.
#[derive(Debug, Clone, FromRow)]
pub struct DbTask {
    pub id: Uuid,
    pub team_id: Uuid,
    pub project_id: Uuid,
    pub creator_id: Uuid,
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: String,
    #[sqlx(rename = "type")]
    pub task_type: String,
    pub story_points: Option<i32>,
    pub due_date: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub position: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbTask> for Task {
    type Error = AppError;

    fn try_from(value: DbTask) -> Result<Self, Self::Error> {
        Ok(Task {
            id: value.id,
            team_id: value.team_id,
            project_id: value.project_id,
            creator_id: value.creator_id,
            key: value.key,
            title: value.title,
            description: value.description,
            status: value.status.parse()?,
            priority: value.priority.parse()?,
            task_type: value.task_type.parse()?,
            story_points: value.story_points,
            due_date: value.due_date,
            started_at: value.started_at,
            completed_at: value.completed_at,
            position: value.position,
            assignee_ids: Vec::new(),
            label_ids: Vec::new(),
            created_at: value.created_at,
            updated_at: value.updated_at,
            deleted_at: value.deleted_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskCreateRequest {
    pub project_id: Uuid,
    #[schema(example = "Define launch checklist")]
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    #[serde(rename = "type")]
    pub task_type: Option<TaskType>,
    pub story_points: Option<i32>,
    pub due_date: Option<DateTime<Utc>>,
    pub position: Option<i32>,
    pub assignee_ids: Option<Vec<Uuid>>,
    pub label_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskUpdateRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    #[serde(rename = "type")]
    pub task_type: Option<TaskType>,
    pub story_points: Option<i32>,
    pub due_date: Option<DateTime<Utc>>,
    pub position: Option<i32>,
    pub assignee_ids: Option<Vec<Uuid>>,
    pub label_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskAssignRequest {
    pub assignee_ids: Vec<Uuid>,
}

/// List filters, all optional and combined with AND.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TaskListQuery {
    pub project_id: Option<Uuid>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee_id: Option<Uuid>,
}

/// Status-driven timestamp maintenance:
/// - entering `in_progress` sets `started_at` once, never overwriting it
/// - `done` sets `completed_at` once; any other status clears it
///
/// Returns the new `(started_at, completed_at)` pair.
pub fn transition_timestamps(
    new_status: TaskStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let started_at = match (new_status, started_at) {
        (TaskStatus::InProgress, None) => Some(now),
        (_, existing) => existing,
    };

    let completed_at = match (new_status, completed_at) {
        (TaskStatus::Done, None) => Some(now),
        (TaskStatus::Done, existing) => existing,
        (_, _) => None,
    };

    (started_at, completed_at)
}

/// Next numeric suffix for a task key within a project: one past the
/// highest suffix among the existing keys, starting at 1.
pub fn next_key_number<'a>(
    project_key: &str,
    existing_keys: impl IntoIterator<Item = &'a str>,
) -> u32 {
    let prefix = format!("{project_key}-");
    let max = existing_keys
        .into_iter()
        .filter_map(|key| key.strip_prefix(&prefix))
        .filter_map(|suffix| suffix.parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    max + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn entering_in_progress_sets_started_once() {
        let now = ts(100);
        let (started, completed) = transition_timestamps(TaskStatus::InProgress, None, None, now);
        assert_eq!(started, Some(now));
        assert_eq!(completed, None);

        let earlier = ts(50);
        let (started, _) =
            transition_timestamps(TaskStatus::InProgress, Some(earlier), None, now);
        assert_eq!(started, Some(earlier));
    }

    #[test]
    fn done_sets_completed_and_leaving_done_clears_it() {
        let now = ts(200);
        let (_, completed) = transition_timestamps(TaskStatus::Done, Some(ts(100)), None, now);
        assert_eq!(completed, Some(now));

        let (_, completed) =
            transition_timestamps(TaskStatus::Done, Some(ts(100)), Some(ts(150)), now);
        assert_eq!(completed, Some(ts(150)));

        let (_, completed) =
            transition_timestamps(TaskStatus::InReview, Some(ts(100)), Some(ts(150)), now);
        assert_eq!(completed, None);
    }

    #[test]
    fn cancelled_keeps_started_but_clears_completed() {
        let now = ts(300);
        let (started, completed) =
            transition_timestamps(TaskStatus::Cancelled, Some(ts(100)), Some(ts(200)), now);
        assert_eq!(started, Some(ts(100)));
        assert_eq!(completed, None);
    }

    #[test]
    fn key_numbers_scan_the_highest_suffix() {
        assert_eq!(next_key_number("BACK", []), 1);
        assert_eq!(next_key_number("BACK", ["BACK-1", "BACK-3", "BACK-2"]), 4);
        // Foreign prefixes and malformed suffixes are ignored.
        assert_eq!(
            next_key_number("BACK", ["BACK-9", "FRNT-40", "BACK-x", "BACKUP-12"]),
            10
        );
    }

    #[test]
    fn enum_round_trips_match_storage_strings() {
        for status in [
            TaskStatus::Todo,
            TaskStatus::InProgress,
            TaskStatus::InReview,
            TaskStatus::Done,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("urgent".parse::<TaskPriority>().is_err());
        assert!("subtask".parse::<TaskType>().is_err());
    }
}
