use std::collections::HashSet;

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::errors::AppError;

use super::{catalog, roles};

/// The acting user with roles and permissions resolved for their current
/// team. All policy decisions are synchronous reads against this loaded
/// state; no I/O happens between a check and the action it guards.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    /// The team the user is operating in right now. `None` while a user is
    /// between teams (e.g. mid-onboarding); every scoped query then yields
    /// the empty set.
    pub current_team_id: Option<Uuid>,
    /// Role names held in the current team.
    pub roles: HashSet<String>,
    /// Union of permission names over all roles held in the current team.
    pub permissions: HashSet<String>,
}

impl Principal {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            current_team_id: None,
            roles: HashSet::new(),
            permissions: HashSet::new(),
        }
    }

    pub fn with_team(mut self, team_id: Uuid) -> Self {
        self.current_team_id = Some(team_id);
        self
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = String>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    pub fn with_permissions(mut self, perms: impl IntoIterator<Item = String>) -> Self {
        self.permissions = perms.into_iter().collect();
        self
    }

    /// Resolve the principal from storage: current team pointer plus the
    /// role/permission sets granted in that team.
    pub async fn load(pool: &SqlitePool, user_id: Uuid) -> Result<Self, AppError> {
        let current_team_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT current_team_id FROM users WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::unauthorized("user not found"))?;

        let mut principal = Principal::new(user_id);

        let Some(team_id) = current_team_id else {
            return Ok(principal);
        };
        principal.current_team_id = Some(team_id);

        let role_names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT r.name
            FROM roles r
            INNER JOIN user_roles ur ON r.id = ur.role_id
            WHERE ur.user_id = ? AND ur.team_id = ?
            "#,
        )
        .bind(user_id)
        .bind(team_id)
        .fetch_all(pool)
        .await?;
        principal.roles = role_names.into_iter().collect();

        let permission_names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT p.name
            FROM permissions p
            INNER JOIN role_permissions rp ON p.id = rp.permission_id
            INNER JOIN user_roles ur ON ur.role_id = rp.role_id
            WHERE ur.user_id = ? AND ur.team_id = ?
            "#,
        )
        .bind(user_id)
        .bind(team_id)
        .fetch_all(pool)
        .await?;
        principal.permissions = permission_names.into_iter().collect();

        Ok(principal)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn is_owner(&self) -> bool {
        self.has_role(roles::OWNER)
    }

    /// Permission check for the current team.
    ///
    /// The owner role keeps wildcard semantics at check time: it matches any
    /// permission present in the live catalog, so owners automatically gain
    /// permissions added after their role rows were provisioned.
    pub fn has_permission(&self, permission: &str) -> bool {
        if self.current_team_id.is_none() {
            return false;
        }

        if self.is_owner() {
            return catalog::permission_exists(permission);
        }

        self.permissions.contains(permission)
    }
}
