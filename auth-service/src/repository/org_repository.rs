//! # Organization Repository
//!
//! Data access layer for the role graph: organizations, memberships,
//! groups, group membership and permission grants, plus the one query the
//! policy decision point lives on - authorization resolution.
//!
//! ## The Role Graph
//!
//! ```text
//!   User ──member──► Organization
//!     │                   │
//!     └──member──► Group ─┘ (org-scoped)
//!                    │
//!                    └──grant──► Permission ("resource:action")
//! ```
//!
//! Resolution flattens the graph for one `(user, org)` pair into
//! `[{permission, group}]`; the authorization engine caches that set and
//! decides in memory.
//!
//! ## Invariant Enforcement
//!
//! - `(user_id, org_id)` membership is a primary key
//! - Each org retains at least one owner: demotions and removals of an
//!   owner are guarded sub-queries that fail when they would orphan the org
//! - `(org_id, name)` unique among non-deleted groups; slugs unique among
//!   non-deleted orgs

use shared::errors::ApiError;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{
    Group, Membership, NewOrganization, Organization, OrgSummary, Permission, PermissionGrant,
};

/// Row shape of the resolution query; mapped into [`PermissionGrant`]
/// because `group` is not a usable column alias.
#[derive(sqlx::FromRow)]
struct GrantRow {
    permission: String,
    group_name: String,
}

/// Repository for organizations, groups and permissions.
#[derive(Debug, Clone)]
pub struct OrgRepository {
    /// PostgreSQL connection pool
    pool: PgPool,
}

impl OrgRepository {
    /// Creates a new repository instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // ORGANIZATIONS
    // =========================================================================

    /// Creates an organization.
    ///
    /// # Errors
    ///
    /// - `ApiError::Conflict` if the slug is taken among non-deleted orgs
    pub async fn create_org(&self, new_org: NewOrganization) -> Result<Organization, ApiError> {
        let org = sqlx::query_as::<_, Organization>(
            r#"
            INSERT INTO organizations (name, slug, description)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(&new_org.name)
        .bind(&new_org.slug)
        .bind(&new_org.description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("organizations_slug_live_key") {
                    return ApiError::Conflict { resource: "slug".to_string() };
                }
            }
            ApiError::InternalError { message: format!("Database error: {}", e) }
        })?;

        Ok(org)
    }

    /// Finds a live organization by id.
    pub async fn find_org(&self, org_id: Uuid) -> Result<Option<Organization>, ApiError> {
        let org = sqlx::query_as::<_, Organization>(
            r#"
            SELECT * FROM organizations
            WHERE org_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(org)
    }

    /// Lists the organizations a user belongs to, with their role.
    ///
    /// This backs login's org-selection step.
    pub async fn list_orgs_for_user(&self, user_id: Uuid) -> Result<Vec<OrgSummary>, ApiError> {
        let orgs = sqlx::query_as::<_, OrgSummary>(
            r#"
            SELECT o.org_id, o.name, o.slug, m.role
            FROM memberships m
            JOIN organizations o ON o.org_id = m.org_id AND o.deleted_at IS NULL
            WHERE m.user_id = $1
            ORDER BY m.joined_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(orgs)
    }

    // =========================================================================
    // MEMBERSHIPS
    // =========================================================================

    /// Adds a member to an organization.
    ///
    /// # Errors
    ///
    /// - `ApiError::Conflict` if the membership already exists
    pub async fn add_member(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        role: &str,
        invited_by: Option<Uuid>,
    ) -> Result<Membership, ApiError> {
        let membership = sqlx::query_as::<_, Membership>(
            r#"
            INSERT INTO memberships (user_id, org_id, role, invited_by)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(org_id)
        .bind(role)
        .bind(invited_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("memberships_pkey") {
                    return ApiError::Conflict { resource: "membership".to_string() };
                }
            }
            ApiError::InternalError { message: format!("Database error: {}", e) }
        })?;

        Ok(membership)
    }

    /// Looks up one membership.
    pub async fn find_membership(
        &self,
        user_id: Uuid,
        org_id: Uuid,
    ) -> Result<Option<Membership>, ApiError> {
        let membership = sqlx::query_as::<_, Membership>(
            r#"
            SELECT * FROM memberships
            WHERE user_id = $1 AND org_id = $2
            "#,
        )
        .bind(user_id)
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(membership)
    }

    /// Removes a member from an organization.
    ///
    /// The guard refuses to remove the last owner of a non-empty org; the
    /// database arbitrates the race between two concurrent removals.
    ///
    /// # Errors
    ///
    /// - `ApiError::Conflict` when the removal would orphan the org
    /// - `ApiError::NotFound` when the membership does not exist
    pub async fn remove_member(&self, org_id: Uuid, user_id: Uuid) -> Result<(), ApiError> {
        if self.find_membership(user_id, org_id).await?.is_none() {
            return Err(ApiError::NotFound { resource: "membership".to_string() });
        }

        let result = sqlx::query(
            r#"
            DELETE FROM memberships
            WHERE user_id = $1 AND org_id = $2
              AND (role <> 'owner'
                   OR (SELECT COUNT(*) FROM memberships
                       WHERE org_id = $2 AND role = 'owner') > 1
                   OR (SELECT COUNT(*) FROM memberships WHERE org_id = $2) = 1)
            "#,
        )
        .bind(user_id)
        .bind(org_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        if result.rows_affected() == 0 {
            // Membership existed but the guard blocked the delete
            return Err(ApiError::Conflict {
                resource: "organization must retain an owner".to_string(),
            });
        }

        Ok(())
    }

    /// Changes a member's role, refusing to demote the last owner.
    pub async fn update_member_role(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        role: &str,
    ) -> Result<(), ApiError> {
        let result = sqlx::query(
            r#"
            UPDATE memberships
            SET role = $3
            WHERE user_id = $1 AND org_id = $2
              AND (role <> 'owner'
                   OR $3 = 'owner'
                   OR (SELECT COUNT(*) FROM memberships
                       WHERE org_id = $2 AND role = 'owner') > 1)
            "#,
        )
        .bind(user_id)
        .bind(org_id)
        .bind(role)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        if result.rows_affected() == 0 {
            return Err(ApiError::Conflict {
                resource: "organization must retain an owner".to_string(),
            });
        }

        Ok(())
    }

    // =========================================================================
    // GROUPS
    // =========================================================================

    /// Creates a group inside an organization.
    ///
    /// # Errors
    ///
    /// - `ApiError::Conflict` if the name is taken among non-deleted groups
    pub async fn create_group(
        &self,
        org_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<Group, ApiError> {
        let group = sqlx::query_as::<_, Group>(
            r#"
            INSERT INTO groups (org_id, name, description)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(org_id)
        .bind(name)
        .bind(description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("groups_org_name_live_key") {
                    return ApiError::Conflict { resource: "group name".to_string() };
                }
            }
            ApiError::InternalError { message: format!("Database error: {}", e) }
        })?;

        Ok(group)
    }

    /// Finds a live group by id.
    pub async fn find_group(&self, group_id: Uuid) -> Result<Option<Group>, ApiError> {
        let group = sqlx::query_as::<_, Group>(
            r#"
            SELECT * FROM groups
            WHERE group_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(group)
    }

    /// Lists live groups of an organization.
    pub async fn list_groups(&self, org_id: Uuid) -> Result<Vec<Group>, ApiError> {
        let groups = sqlx::query_as::<_, Group>(
            r#"
            SELECT * FROM groups
            WHERE org_id = $1 AND deleted_at IS NULL
            ORDER BY name
            "#,
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(groups)
    }

    /// Soft-deletes a group.
    pub async fn delete_group(&self, group_id: Uuid) -> Result<(), ApiError> {
        let result = sqlx::query(
            r#"
            UPDATE groups
            SET deleted_at = NOW()
            WHERE group_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(group_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound { resource: format!("group:{}", group_id) });
        }

        Ok(())
    }

    // =========================================================================
    // GROUP MEMBERSHIP & PERMISSION GRANTS
    // =========================================================================

    /// Adds a user to a group. Idempotent (`ON CONFLICT DO NOTHING`).
    pub async fn add_group_member(&self, group_id: Uuid, user_id: Uuid) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            INSERT INTO group_members (group_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(())
    }

    /// Removes a user from a group.
    pub async fn remove_group_member(&self, group_id: Uuid, user_id: Uuid) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            DELETE FROM group_members
            WHERE group_id = $1 AND user_id = $2
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(())
    }

    /// Lists the user ids in a group.
    ///
    /// Drives per-user cache invalidation when the group's grants change.
    pub async fn list_group_member_ids(&self, group_id: Uuid) -> Result<Vec<Uuid>, ApiError> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT user_id FROM group_members
            WHERE group_id = $1
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    /// Grants a permission to a group. Idempotent.
    pub async fn grant_permission(
        &self,
        group_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            INSERT INTO group_permissions (group_id, permission_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(group_id)
        .bind(permission_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(())
    }

    /// Revokes a permission from a group.
    pub async fn revoke_permission(
        &self,
        group_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            DELETE FROM group_permissions
            WHERE group_id = $1 AND permission_id = $2
            "#,
        )
        .bind(group_id)
        .bind(permission_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(())
    }

    // =========================================================================
    // PERMISSION CATALOG
    // =========================================================================

    /// Lists the permission catalog.
    pub async fn list_permissions(&self) -> Result<Vec<Permission>, ApiError> {
        let permissions = sqlx::query_as::<_, Permission>(
            r#"
            SELECT * FROM permissions
            ORDER BY resource, action
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(permissions)
    }

    /// Finds a permission by its canonical halves.
    pub async fn find_permission(
        &self,
        resource: &str,
        action: &str,
    ) -> Result<Option<Permission>, ApiError> {
        let permission = sqlx::query_as::<_, Permission>(
            r#"
            SELECT * FROM permissions
            WHERE resource = $1 AND action = $2
            "#,
        )
        .bind(resource)
        .bind(action)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(permission)
    }

    // =========================================================================
    // AUTHORIZATION RESOLUTION
    // =========================================================================

    /// Resolves every permission a user holds in an org, with the granting
    /// group's name.
    ///
    /// This is the single query the policy decision point depends on; its
    /// result is what the L2 cache stores.
    pub async fn resolve_grants(
        &self,
        user_id: Uuid,
        org_id: Uuid,
    ) -> Result<Vec<PermissionGrant>, ApiError> {
        let rows = sqlx::query_as::<_, GrantRow>(
            r#"
            SELECT p.resource || ':' || p.action AS permission,
                   g.name AS group_name
            FROM group_members gm
            JOIN groups g
              ON g.group_id = gm.group_id
             AND g.org_id = $2
             AND g.deleted_at IS NULL
            JOIN group_permissions gp ON gp.group_id = g.group_id
            JOIN permissions p ON p.permission_id = gp.permission_id
            WHERE gm.user_id = $1
            ORDER BY permission, group_name
            "#,
        )
        .bind(user_id)
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(rows
            .into_iter()
            .map(|row| PermissionGrant { permission: row.permission, group: row.group_name })
            .collect())
    }
}
