use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl crate::events::Loggable for Team {
    fn entity_type() -> &'static str {
        "team"
    }
    fn subject_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbTeam {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbTeam> for Team {
    type Error = AppError;

    fn try_from(value: DbTeam) -> Result<Self, Self::Error> {
        Ok(Team {
            id: value.id,
            name: value.name,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TeamCreateRequest {
    #[schema(example = "Platform Engineering")]
    pub name: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TeamUpdateRequest {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TeamMemberAddRequest {
    pub user_id: Uuid,
    /// System role name granted in this team, e.g. "member".
    #[schema(example = "member")]
    pub role: String,
}

/// A user's membership in a team, with the role names they hold there.
#[derive(Debug, Serialize, ToSchema)]
pub struct TeamMember {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub roles: Vec<String>,
}
