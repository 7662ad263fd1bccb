//! Authorization core: team-scoped RBAC.
//!
//! Layers, leaf to root:
//! - `catalog`: static permission/role definitions (pure data)
//! - `provision`: idempotent catalog sync into the database, with strict
//!   post-sync integrity checks
//! - `principal`: the acting user with their roles/permissions loaded for
//!   their current team
//! - `scope`: the mandatory team predicate applied at every repository
//!   boundary
//! - `engine`: per-action policy decisions (ownership/assignment overrides
//!   plus permission fallback)

pub mod catalog;
pub mod engine;
pub mod principal;
pub mod provision;
pub mod scope;

pub use engine::{Action, EntityKind, ResourceRef};
pub use principal::Principal;
pub use scope::TeamScope;

/// Well-known system role names
pub mod roles {
    pub const OWNER: &str = "owner";
    pub const ADMIN: &str = "admin";
    pub const MEMBER: &str = "member";
    pub const VIEWER: &str = "viewer";
}

/// Well-known permission names
pub mod permissions {
    // Project
    pub const PROJECT_CREATE: &str = "project.create";
    pub const PROJECT_VIEW: &str = "project.view";
    pub const PROJECT_UPDATE: &str = "project.update";
    pub const PROJECT_DELETE: &str = "project.delete";

    // Task
    pub const TASK_CREATE: &str = "task.create";
    pub const TASK_VIEW: &str = "task.view";
    pub const TASK_UPDATE: &str = "task.update";
    pub const TASK_DELETE: &str = "task.delete";
    pub const TASK_ASSIGN: &str = "task.assign";

    // Comment
    pub const COMMENT_CREATE: &str = "comment.create";
    pub const COMMENT_VIEW: &str = "comment.view";
    pub const COMMENT_UPDATE: &str = "comment.update";
    pub const COMMENT_DELETE: &str = "comment.delete";

    // Team
    pub const TEAM_MANAGE: &str = "team.manage";
    pub const TEAM_INVITE: &str = "team.invite";
    pub const TEAM_REMOVE: &str = "team.remove";
}
