use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Label {
    pub id: Uuid,
    pub team_id: Uuid,
    /// Scoping project; team-wide when absent.
    pub project_id: Option<Uuid>,
    pub name: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl crate::events::Loggable for Label {
    fn entity_type() -> &'static str {
        "label"
    }
    fn subject_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbLabel {
    pub id: Uuid,
    pub team_id: Uuid,
    pub project_id: Option<Uuid>,
    pub name: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbLabel> for Label {
    type Error = AppError;

    fn try_from(value: DbLabel) -> Result<Self, Self::Error> {
        Ok(Label {
            id: value.id,
            team_id: value.team_id,
            project_id: value.project_id,
            name: value.name,
            color: value.color,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LabelCreateRequest {
    #[schema(example = "regression")]
    pub name: String,
    #[schema(example = "#6B7280")]
    pub color: Option<String>,
    pub project_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LabelUpdateRequest {
    pub name: Option<String>,
    pub color: Option<String>,
}
