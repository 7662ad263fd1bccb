//! Declarative permission and role catalogs.
//!
//! This module is the single source of truth for every permission and
//! system role in the application. The tables are pure data compiled into
//! the binary; provisioning (see `authz::provision`) mirrors them into the
//! database idempotently. They are never mutated at runtime.

use super::{permissions, roles};

#[derive(Debug, Clone, Copy)]
pub struct PermissionDef {
    pub name: &'static str,
    pub group: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
}

/// A role's permission grant: either the full catalog (wildcard) or an
/// explicit list of permission names.
#[derive(Debug, Clone, Copy)]
pub enum RoleGrant {
    All,
    Named(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
pub struct RoleDef {
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub grant: RoleGrant,
}

pub const PERMISSION_CATALOG: &[PermissionDef] = &[
    // Projects
    PermissionDef {
        name: permissions::PROJECT_CREATE,
        group: "projects",
        display_name: "Create Project",
        description: "Allows creating new projects",
    },
    PermissionDef {
        name: permissions::PROJECT_VIEW,
        group: "projects",
        display_name: "View Project",
        description: "Allows viewing projects",
    },
    PermissionDef {
        name: permissions::PROJECT_UPDATE,
        group: "projects",
        display_name: "Update Project",
        description: "Allows updating projects",
    },
    PermissionDef {
        name: permissions::PROJECT_DELETE,
        group: "projects",
        display_name: "Delete Project",
        description: "Allows deleting projects",
    },
    // Tasks
    PermissionDef {
        name: permissions::TASK_CREATE,
        group: "tasks",
        display_name: "Create Task",
        description: "Allows creating new tasks",
    },
    PermissionDef {
        name: permissions::TASK_VIEW,
        group: "tasks",
        display_name: "View Task",
        description: "Allows viewing tasks",
    },
    PermissionDef {
        name: permissions::TASK_UPDATE,
        group: "tasks",
        display_name: "Update Task",
        description: "Allows updating tasks",
    },
    PermissionDef {
        name: permissions::TASK_DELETE,
        group: "tasks",
        display_name: "Delete Task",
        description: "Allows deleting tasks",
    },
    PermissionDef {
        name: permissions::TASK_ASSIGN,
        group: "tasks",
        display_name: "Assign Task",
        description: "Allows assigning tasks to users",
    },
    // Comments
    PermissionDef {
        name: permissions::COMMENT_CREATE,
        group: "comments",
        display_name: "Create Comment",
        description: "Allows creating comments",
    },
    PermissionDef {
        name: permissions::COMMENT_VIEW,
        group: "comments",
        display_name: "View Comment",
        description: "Allows viewing comments",
    },
    PermissionDef {
        name: permissions::COMMENT_UPDATE,
        group: "comments",
        display_name: "Update Comment",
        description: "Allows updating comments",
    },
    PermissionDef {
        name: permissions::COMMENT_DELETE,
        group: "comments",
        display_name: "Delete Comment",
        description: "Allows deleting comments",
    },
    // Teams
    PermissionDef {
        name: permissions::TEAM_MANAGE,
        group: "teams",
        display_name: "Manage Team",
        description: "Allows managing the team",
    },
    PermissionDef {
        name: permissions::TEAM_INVITE,
        group: "teams",
        display_name: "Invite Members",
        description: "Allows inviting members to the team",
    },
    PermissionDef {
        name: permissions::TEAM_REMOVE,
        group: "teams",
        display_name: "Remove Members",
        description: "Allows removing members from the team",
    },
];

pub const ROLE_CATALOG: &[RoleDef] = &[
    RoleDef {
        name: roles::OWNER,
        display_name: "Owner",
        description: "Team owner with every permission",
        grant: RoleGrant::All,
    },
    RoleDef {
        name: roles::ADMIN,
        display_name: "Administrator",
        description: "Administrator with management permissions",
        grant: RoleGrant::Named(&[
            permissions::PROJECT_CREATE,
            permissions::PROJECT_VIEW,
            permissions::PROJECT_UPDATE,
            permissions::PROJECT_DELETE,
            permissions::TASK_CREATE,
            permissions::TASK_VIEW,
            permissions::TASK_UPDATE,
            permissions::TASK_DELETE,
            permissions::TASK_ASSIGN,
            permissions::COMMENT_CREATE,
            permissions::COMMENT_VIEW,
            permissions::COMMENT_UPDATE,
            permissions::COMMENT_DELETE,
            permissions::TEAM_INVITE,
        ]),
    },
    RoleDef {
        name: roles::MEMBER,
        display_name: "Member",
        description: "Team member with day-to-day permissions",
        grant: RoleGrant::Named(&[
            permissions::PROJECT_VIEW,
            permissions::PROJECT_UPDATE,
            permissions::TASK_CREATE,
            permissions::TASK_VIEW,
            permissions::TASK_UPDATE,
            permissions::TASK_ASSIGN,
            permissions::COMMENT_CREATE,
            permissions::COMMENT_VIEW,
            permissions::COMMENT_UPDATE,
        ]),
    },
    RoleDef {
        name: roles::VIEWER,
        display_name: "Viewer",
        description: "Read-only access",
        grant: RoleGrant::Named(&[
            permissions::PROJECT_VIEW,
            permissions::TASK_VIEW,
            permissions::COMMENT_VIEW,
        ]),
    },
];

pub fn permission_exists(name: &str) -> bool {
    PERMISSION_CATALOG.iter().any(|p| p.name == name)
}

pub fn find_role(name: &str) -> Option<&'static RoleDef> {
    ROLE_CATALOG.iter().find(|r| r.name == name)
}

/// Expand a role's grant to concrete permission names. The owner wildcard
/// expands to the whole current catalog.
pub fn expanded_permissions(role: &RoleDef) -> Vec<&'static str> {
    match role.grant {
        RoleGrant::All => PERMISSION_CATALOG.iter().map(|p| p.name).collect(),
        RoleGrant::Named(names) => names.to_vec(),
    }
}
