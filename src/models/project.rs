use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;

const KEY_LENGTH: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Project {
    pub id: Uuid,
    pub team_id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    /// Short uppercase identifier, globally unique, used as the task key
    /// prefix (e.g. BACK-17).
    pub key: String,
    pub description: Option<String>,
    pub color: String,
    pub is_active: bool,
    pub settings: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl crate::events::Loggable for Project {
    fn entity_type() -> &'static str {
        "project"
    }
    fn subject_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbProject {
    pub id: Uuid,
    pub team_id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub key: String,
    pub description: Option<String>,
    pub color: String,
    pub is_active: bool,
    pub settings: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbProject> for Project {
    type Error = AppError;

    fn try_from(value: DbProject) -> Result<Self, Self::Error> {
        let settings = value
            .settings
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|err| AppError::internal(format!("corrupt project settings: {err}")))?;

        Ok(Project {
            id: value.id,
            team_id: value.team_id,
            owner_id: value.owner_id,
            name: value.name,
            key: value.key,
            description: value.description,
            color: value.color,
            is_active: value.is_active,
            settings,
            created_at: value.created_at,
            updated_at: value.updated_at,
            deleted_at: value.deleted_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProjectCreateRequest {
    #[schema(example = "Backend Services")]
    pub name: String,
    pub description: Option<String>,
    /// Optional explicit key; derived from the name when absent.
    #[schema(example = "BACK")]
    pub key: Option<String>,
    #[schema(example = "#3B82F6")]
    pub color: Option<String>,
    pub settings: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProjectUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub is_active: Option<bool>,
    pub settings: Option<serde_json::Value>,
}

/// Derive the base project key from a name: the first four alphanumeric
/// characters, uppercased. Names with fewer than four usable characters are
/// padded with random uppercase letters so keys keep a uniform shape.
/// Global uniqueness is the caller's concern (numeric-suffix retry).
pub fn derive_base_key(name: &str) -> String {
    let mut key: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(KEY_LENGTH)
        .collect::<String>()
        .to_ascii_uppercase();

    let mut rng = rand::thread_rng();
    while key.len() < KEY_LENGTH {
        key.push(rng.gen_range(b'A'..=b'Z') as char);
    }
    key
}

/// The nth disambiguation candidate for a taken base key: the base itself,
/// then BASE1, BASE2, ...
pub fn key_candidate(base: &str, attempt: u32) -> String {
    if attempt == 0 {
        base.to_string()
    } else {
        format!("{base}{attempt}")
    }
}
