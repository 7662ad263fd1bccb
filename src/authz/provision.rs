//! Idempotent catalog provisioning.
//!
//! Mirrors `authz::catalog` into the database: every permission row, every
//! system role (team_id NULL), and each role's permission grants. Safe to
//! run on every startup; existing rows are reused by name, grants are
//! re-synced to the catalog, and nothing user-created is touched.
//!
//! After syncing, strict integrity checks verify that the stored shape
//! matches the catalog exactly. A mismatch aborts startup rather than
//! letting the service run with a partially provisioned permission matrix.

use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::errors::AppError;
use crate::utils::utc_now;

use super::catalog::{self, RoleDef};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub permissions_created: usize,
    pub roles_created: usize,
    pub grants_written: usize,
}

/// Sync the permission and role catalogs into the database and verify the
/// result. Runs in a single transaction.
pub async fn provision(pool: &SqlitePool) -> Result<ProvisionReport, AppError> {
    let mut tx = pool.begin().await?;
    let mut report = ProvisionReport::default();

    for perm in catalog::PERMISSION_CATALOG {
        if ensure_permission(&mut tx, perm.name, perm.group, perm.display_name, perm.description)
            .await?
        {
            report.permissions_created += 1;
        }
    }

    for role in catalog::ROLE_CATALOG {
        let (role_id, created) = ensure_system_role(&mut tx, role).await?;
        if created {
            report.roles_created += 1;
        }
        report.grants_written += sync_role_grants(&mut tx, role_id, role).await?;
    }

    verify(&mut tx).await?;
    tx.commit().await?;

    tracing::info!(
        permissions_created = report.permissions_created,
        roles_created = report.roles_created,
        grants_written = report.grants_written,
        "rbac catalog provisioned"
    );

    Ok(report)
}

/// Insert the permission if it does not exist yet. Returns true when a row
/// was created. Lookup is by name; existing rows keep their metadata.
async fn ensure_permission(
    tx: &mut Transaction<'_, Sqlite>,
    name: &str,
    group: &str,
    display_name: &str,
    description: &str,
) -> Result<bool, AppError> {
    let existing: Option<Uuid> = sqlx::query_scalar("SELECT id FROM permissions WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut **tx)
        .await?;

    if existing.is_some() {
        return Ok(false);
    }

    let now = utc_now();
    sqlx::query(
        r#"
        INSERT INTO permissions (id, name, perm_group, display_name, description, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(group)
    .bind(display_name)
    .bind(description)
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(true)
}

/// Find or create a system role (team_id NULL). SQLite treats NULLs as
/// distinct in unique indexes, so the lookup must be explicit rather than
/// relying on INSERT OR IGNORE.
async fn ensure_system_role(
    tx: &mut Transaction<'_, Sqlite>,
    role: &RoleDef,
) -> Result<(Uuid, bool), AppError> {
    let existing: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM roles WHERE team_id IS NULL AND name = ?")
            .bind(role.name)
            .fetch_optional(&mut **tx)
            .await?;

    if let Some(id) = existing {
        return Ok((id, false));
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        r#"
        INSERT INTO roles (id, team_id, name, display_name, description, is_system, created_at, updated_at)
        VALUES (?, NULL, ?, ?, ?, 1, ?, ?)
        "#,
    )
    .bind(id)
    .bind(role.name)
    .bind(role.display_name)
    .bind(role.description)
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok((id, true))
}

/// Replace the role's grants with the catalog's expansion. The owner
/// wildcard expands to the full current catalog, so re-running after a
/// catalog addition widens the stored grant set too.
async fn sync_role_grants(
    tx: &mut Transaction<'_, Sqlite>,
    role_id: Uuid,
    role: &RoleDef,
) -> Result<usize, AppError> {
    sqlx::query("DELETE FROM role_permissions WHERE role_id = ?")
        .bind(role_id)
        .execute(&mut **tx)
        .await?;

    let now = utc_now();
    let names = catalog::expanded_permissions(role);
    for name in &names {
        let inserted = sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id, created_at)
            SELECT ?, id, ? FROM permissions WHERE name = ?
            "#,
        )
        .bind(role_id)
        .bind(now)
        .bind(name)
        .execute(&mut **tx)
        .await?;

        if inserted.rows_affected() != 1 {
            return Err(AppError::integrity(format!(
                "permission {name} missing while granting role {}",
                role.name
            )));
        }
    }

    Ok(names.len())
}

/// Post-sync checks: every catalog permission and system role must exist,
/// and each role's stored grant count must equal its catalog expansion.
async fn verify(tx: &mut Transaction<'_, Sqlite>) -> Result<(), AppError> {
    let names: Vec<String> = catalog::PERMISSION_CATALOG
        .iter()
        .map(|p| p.name.to_string())
        .collect();
    for name in &names {
        let found: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM permissions WHERE name = ?")
            .bind(name)
            .fetch_one(&mut **tx)
            .await?;
        if found != 1 {
            return Err(AppError::integrity(format!(
                "expected exactly one permission row for {name}, found {found}"
            )));
        }
    }

    for role in catalog::ROLE_CATALOG {
        let role_id: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM roles WHERE team_id IS NULL AND name = ?")
                .bind(role.name)
                .fetch_optional(&mut **tx)
                .await?;
        let Some(role_id) = role_id else {
            return Err(AppError::integrity(format!(
                "system role {} missing after provisioning",
                role.name
            )));
        };

        let expected = catalog::expanded_permissions(role).len() as i64;
        let granted: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM role_permissions WHERE role_id = ?")
                .bind(role_id)
                .fetch_one(&mut **tx)
                .await?;
        if granted != expected {
            return Err(AppError::integrity(format!(
                "role {} holds {granted} grants, catalog expects {expected}",
                role.name
            )));
        }
    }

    Ok(())
}
