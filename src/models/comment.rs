use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;

/// What a comment is attached to. Stored as a type discriminator column so
/// one table serves both entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CommentTarget {
    Task,
    Project,
}

impl CommentTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommentTarget::Task => "task",
            CommentTarget::Project => "project",
        }
    }
}

impl FromStr for CommentTarget {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(CommentTarget::Task),
            "project" => Ok(CommentTarget::Project),
            other => Err(AppError::validation(format!(
                "unknown comment target: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Comment {
    pub id: Uuid,
    pub team_id: Uuid,
    pub user_id: Uuid,
    pub target: CommentTarget,
    pub target_id: Uuid,
    pub body: String,
    /// Parent comment for threaded replies.
    pub parent_id: Option<Uuid>,
    pub is_edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl crate::events::Loggable for Comment {
    fn entity_type() -> &'static str {
        "comment"
    }
    fn subject_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbComment {
    pub id: Uuid,
    pub team_id: Uuid,
    pub user_id: Uuid,
    pub commentable_type: String,
    pub commentable_id: Uuid,
    pub body: String,
    pub parent_id: Option<Uuid>,
    pub is_edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbComment> for Comment {
    type Error = AppError;

    fn try_from(value: DbComment) -> Result<Self, Self::Error> {
        Ok(Comment {
            id: value.id,
            team_id: value.team_id,
            user_id: value.user_id,
            target: value.commentable_type.parse()?,
            target_id: value.commentable_id,
            body: value.body,
            parent_id: value.parent_id,
            is_edited: value.is_edited,
            created_at: value.created_at,
            updated_at: value.updated_at,
            deleted_at: value.deleted_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CommentCreateRequest {
    pub target: CommentTarget,
    pub target_id: Uuid,
    #[schema(example = "Blocked on the schema migration.")]
    pub body: String,
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CommentUpdateRequest {
    pub body: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CommentListQuery {
    pub target: Option<CommentTarget>,
    pub target_id: Option<Uuid>,
    pub parent_id: Option<Uuid>,
    /// Restrict to thread roots (comments with no parent).
    pub top_level_only: Option<bool>,
}
