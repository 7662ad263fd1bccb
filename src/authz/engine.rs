//! Policy engine: per-action decisions over a loaded `Principal`.
//!
//! Instance-level evaluation order, first match wins:
//! 1. cross-team guard (entity team must equal the actor's current team)
//! 2. ownership override (owner/creator/author may update, delete, restore)
//! 3. assignment override (any current assignee may update a task)
//! 4. permission fallback (`<entity>.<verb>`; restore shares `.delete`)
//!
//! Force-delete never falls back to a permission: permanent erasure belongs
//! to the owning user alone. `assign` is permission-only even for the
//! task's creator.

use uuid::Uuid;

use crate::errors::AppError;

use super::scope;
use super::Principal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    View,
    Update,
    Delete,
    Restore,
    ForceDelete,
    Assign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Project,
    Task,
    Comment,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Project => "project",
            EntityKind::Task => "task",
            EntityKind::Comment => "comment",
        }
    }

    fn permission(&self, verb: &str) -> String {
        format!("{}.{}", self.as_str(), verb)
    }
}

/// Snapshot of the entity fields the engine needs. Built from an
/// already-loaded row so evaluation stays synchronous and read-only.
#[derive(Debug, Clone)]
pub struct ResourceRef {
    pub kind: EntityKind,
    pub team_id: Uuid,
    /// Project owner, task creator, or comment author.
    pub owner_id: Uuid,
    /// Current assignees; only populated for tasks.
    pub assignee_ids: Vec<Uuid>,
}

impl ResourceRef {
    pub fn new(kind: EntityKind, team_id: Uuid, owner_id: Uuid) -> Self {
        Self {
            kind,
            team_id,
            owner_id,
            assignee_ids: Vec::new(),
        }
    }

    pub fn with_assignees(mut self, assignee_ids: Vec<Uuid>) -> Self {
        self.assignee_ids = assignee_ids;
        self
    }
}

/// Class-level check: may the principal list entities of this kind?
pub fn can_view_any(principal: &Principal, kind: EntityKind) -> bool {
    principal.has_permission(&kind.permission("view"))
}

/// Class-level check: may the principal create entities of this kind?
pub fn can_create(principal: &Principal, kind: EntityKind) -> bool {
    principal.has_permission(&kind.permission("create"))
}

/// Instance-level check. Returns false for cross-team targets; callers that
/// need NotFound-vs-Forbidden semantics use [`authorize`] instead.
pub fn can(principal: &Principal, action: Action, resource: &ResourceRef) -> bool {
    if scope::ensure_same_team(principal, resource.team_id).is_err() {
        return false;
    }

    let is_owner = resource.owner_id == principal.user_id;

    match action {
        // Permanent erasure is never delegable, regardless of role.
        Action::ForceDelete => is_owner,

        // Assignment is privileged even for the task's creator.
        Action::Assign => {
            resource.kind == EntityKind::Task
                && principal.has_permission(&resource.kind.permission("assign"))
        }

        // View has no ownership override.
        Action::View => principal.has_permission(&resource.kind.permission("view")),

        Action::Update => {
            if is_owner {
                return true;
            }
            if resource.kind == EntityKind::Task
                && resource.assignee_ids.contains(&principal.user_id)
            {
                return true;
            }
            principal.has_permission(&resource.kind.permission("update"))
        }

        Action::Delete => {
            is_owner || principal.has_permission(&resource.kind.permission("delete"))
        }

        // Restore shares the delete permission: both are destructive-state
        // operations.
        Action::Restore => {
            is_owner || principal.has_permission(&resource.kind.permission("delete"))
        }
    }
}

/// Instance-level check with caller-visible failure shape: cross-team
/// targets fail as NotFound, same-team denials as Forbidden.
pub fn authorize(
    principal: &Principal,
    action: Action,
    resource: &ResourceRef,
) -> Result<(), AppError> {
    scope::ensure_same_team(principal, resource.team_id)?;

    if can(principal, action, resource) {
        Ok(())
    } else {
        Err(AppError::forbidden(format!(
            "not allowed to {:?} this {}",
            action,
            resource.kind.as_str()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::permissions;

    fn member(team: Uuid, perms: &[&str]) -> Principal {
        Principal::new(Uuid::new_v4())
            .with_team(team)
            .with_roles(vec!["member".to_string()])
            .with_permissions(perms.iter().map(|p| p.to_string()))
    }

    #[test]
    fn cross_team_denies_every_action() {
        let team = Uuid::new_v4();
        let other_team = Uuid::new_v4();
        let actor = Principal::new(Uuid::new_v4())
            .with_team(other_team)
            .with_roles(vec!["owner".to_string()]);
        let task = ResourceRef::new(EntityKind::Task, team, actor.user_id);

        for action in [
            Action::View,
            Action::Update,
            Action::Delete,
            Action::Restore,
            Action::ForceDelete,
            Action::Assign,
        ] {
            assert!(!can(&actor, action, &task), "{action:?} allowed cross-team");
            let err = authorize(&actor, action, &task).unwrap_err();
            assert!(matches!(err, crate::errors::AppError::NotFound(_)));
        }
    }

    #[test]
    fn project_owner_overrides_missing_permissions() {
        let team = Uuid::new_v4();
        let owner = Principal::new(Uuid::new_v4()).with_team(team);
        let project = ResourceRef::new(EntityKind::Project, team, owner.user_id);

        assert!(can(&owner, Action::Update, &project));
        assert!(can(&owner, Action::Delete, &project));
        assert!(can(&owner, Action::Restore, &project));
        assert!(can(&owner, Action::ForceDelete, &project));
        // View stays permission-gated even for the owner.
        assert!(!can(&owner, Action::View, &project));
    }

    #[test]
    fn task_creator_may_update_and_delete() {
        let team = Uuid::new_v4();
        let creator = member(team, &[permissions::TASK_VIEW]);
        let task = ResourceRef::new(EntityKind::Task, team, creator.user_id);

        assert!(can(&creator, Action::Update, &task));
        assert!(can(&creator, Action::Delete, &task));
    }

    #[test]
    fn assignee_may_update_without_permission() {
        let team = Uuid::new_v4();
        let assignee = member(team, &[]);
        let task = ResourceRef::new(EntityKind::Task, team, Uuid::new_v4())
            .with_assignees(vec![assignee.user_id]);

        assert!(can(&assignee, Action::Update, &task));
        assert!(!can(&assignee, Action::Delete, &task));
    }

    #[test]
    fn assign_has_no_ownership_override() {
        let team = Uuid::new_v4();
        let creator = member(team, &[permissions::TASK_UPDATE]);
        let task = ResourceRef::new(EntityKind::Task, team, creator.user_id);
        assert!(!can(&creator, Action::Assign, &task));

        let assigner = member(team, &[permissions::TASK_ASSIGN]);
        let foreign_task = ResourceRef::new(EntityKind::Task, team, Uuid::new_v4());
        assert!(can(&assigner, Action::Assign, &foreign_task));
    }

    #[test]
    fn restore_falls_back_to_delete_permission() {
        let team = Uuid::new_v4();
        let janitor = member(team, &[permissions::TASK_DELETE]);
        let task = ResourceRef::new(EntityKind::Task, team, Uuid::new_v4());

        assert!(can(&janitor, Action::Restore, &task));

        let bystander = member(team, &[permissions::TASK_UPDATE]);
        assert!(!can(&bystander, Action::Restore, &task));
    }

    #[test]
    fn force_delete_is_author_only() {
        let team = Uuid::new_v4();
        let admin = member(
            team,
            &[permissions::COMMENT_DELETE, permissions::COMMENT_UPDATE],
        );
        let comment = ResourceRef::new(EntityKind::Comment, team, Uuid::new_v4());
        assert!(!can(&admin, Action::ForceDelete, &comment));

        let author = member(team, &[]);
        let own_comment = ResourceRef::new(EntityKind::Comment, team, author.user_id);
        assert!(can(&author, Action::ForceDelete, &own_comment));
    }

    #[test]
    fn permission_fallback_for_non_owners() {
        let team = Uuid::new_v4();
        let viewer = member(team, &[permissions::PROJECT_VIEW]);
        let project = ResourceRef::new(EntityKind::Project, team, Uuid::new_v4());

        assert!(can(&viewer, Action::View, &project));
        assert!(!can(&viewer, Action::Update, &project));
        let err = authorize(&viewer, Action::Update, &project).unwrap_err();
        assert!(matches!(err, crate::errors::AppError::Forbidden(_)));
    }
}
