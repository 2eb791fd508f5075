//! # Organization & Group Management Handlers
//!
//! CRUD over the role graph. Every mutation that can change an
//! authorization decision invokes the matching cache invalidation, so the
//! decision point converges within one L1 TTL even if a concurrent
//! request raced the change.
//!
//! ## Authorization Rules
//!
//! | Operation | Required role |
//! |-----------|---------------|
//! | create organization | any authenticated user (becomes owner) |
//! | read org / groups | member |
//! | membership & group mutations | admin or owner |

use actix_web::{web, HttpRequest, HttpResponse};
use shared::auth::authenticate;
use shared::{errors::ApiError, validation};
use uuid::Uuid;

use crate::api::dto::{
    AddGroupMemberRequest, AddMemberRequest, CreateGroupRequest, CreateOrgRequest,
    GroupPermissionRequest, MessageResponse, UpdateMemberRoleRequest,
};
use crate::domain::{Group, NewOrganization, OrgRole};
use crate::AppState;

// =============================================================================
// ORGANIZATIONS
// =============================================================================

/// Creates an organization; the creator becomes its first owner.
///
/// # Route
///
/// `POST /api/v1/organizations`
///
/// # Responses
///
/// - **201 Created**: the organization
/// - **409 Conflict**: slug already in use
pub async fn create_org(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreateOrgRequest>,
) -> Result<HttpResponse, ApiError> {
    let bearer = authenticate(&req, &state.mint, &state.store).await?;
    let user_id = bearer.require_user()?;

    let body = body.into_inner();
    validation::validate_request(&body)?;

    let org = state
        .org_repository
        .create_org(NewOrganization {
            name: body.name,
            slug: body.slug,
            description: body.description,
        })
        .await?;

    state
        .org_repository
        .add_member(org.org_id, user_id, OrgRole::Owner.as_str(), None)
        .await?;

    Ok(HttpResponse::Created().json(org))
}

/// Lists the authenticated user's organizations.
///
/// # Route
///
/// `GET /api/v1/organizations`
pub async fn list_orgs(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let bearer = authenticate(&req, &state.mint, &state.store).await?;
    let user_id = bearer.require_user()?;

    let orgs = state.org_repository.list_orgs_for_user(user_id).await?;
    Ok(HttpResponse::Ok().json(orgs))
}

/// Fetches one organization.
///
/// # Route
///
/// `GET /api/v1/organizations/{org_id}`
pub async fn get_org(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let org_id = path.into_inner();
    require_member(&req, &state, org_id).await?;

    let org = state
        .org_repository
        .find_org(org_id)
        .await?
        .ok_or_else(|| ApiError::NotFound { resource: format!("organization:{}", org_id) })?;

    Ok(HttpResponse::Ok().json(org))
}

// =============================================================================
// MEMBERSHIPS
// =============================================================================

/// Adds a member to an organization.
///
/// # Route
///
/// `POST /api/v1/organizations/{org_id}/members`
pub async fn add_member(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<AddMemberRequest>,
) -> Result<HttpResponse, ApiError> {
    let org_id = path.into_inner();
    let actor = require_manager(&req, &state, org_id).await?;

    let body = body.into_inner();
    validation::validate_request(&body)?;

    let membership = state
        .org_repository
        .add_member(org_id, body.user_id, &body.role, Some(actor))
        .await?;

    // A cached "not a member" deny may exist for the new member
    state
        .authz_service
        .invalidate_user_org(body.user_id, org_id)
        .await;

    Ok(HttpResponse::Created().json(membership))
}

/// Changes a member's role.
///
/// The last owner cannot be demoted.
///
/// # Route
///
/// `PUT /api/v1/organizations/{org_id}/members/{user_id}`
pub async fn update_member_role(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(Uuid, Uuid)>,
    body: web::Json<UpdateMemberRoleRequest>,
) -> Result<HttpResponse, ApiError> {
    let (org_id, user_id) = path.into_inner();
    require_manager(&req, &state, org_id).await?;

    let body = body.into_inner();
    validation::validate_request(&body)?;

    state
        .org_repository
        .update_member_role(org_id, user_id, &body.role)
        .await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new("Role updated")))
}

/// Removes a member from an organization.
///
/// The last owner of a non-empty org cannot be removed.
///
/// # Route
///
/// `DELETE /api/v1/organizations/{org_id}/members/{user_id}`
pub async fn remove_member(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(Uuid, Uuid)>,
) -> Result<HttpResponse, ApiError> {
    let (org_id, user_id) = path.into_inner();
    require_manager(&req, &state, org_id).await?;

    state.org_repository.remove_member(org_id, user_id).await?;

    // The departed user's decisions in this org must stop answering allow
    state.authz_service.invalidate_user_org(user_id, org_id).await;

    Ok(HttpResponse::Ok().json(MessageResponse::new("Member removed")))
}

// =============================================================================
// GROUPS
// =============================================================================

/// Creates a group inside an organization.
///
/// # Route
///
/// `POST /api/v1/organizations/{org_id}/groups`
///
/// # Responses
///
/// - **201 Created**: the group
/// - **409 Conflict**: name taken inside this org
pub async fn create_group(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<CreateGroupRequest>,
) -> Result<HttpResponse, ApiError> {
    let org_id = path.into_inner();
    require_manager(&req, &state, org_id).await?;

    let body = body.into_inner();
    validation::validate_request(&body)?;

    let group = state
        .org_repository
        .create_group(org_id, &body.name, body.description.as_deref())
        .await?;

    Ok(HttpResponse::Created().json(group))
}

/// Lists an organization's groups.
///
/// # Route
///
/// `GET /api/v1/organizations/{org_id}/groups`
pub async fn list_groups(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let org_id = path.into_inner();
    require_member(&req, &state, org_id).await?;

    let groups = state.org_repository.list_groups(org_id).await?;
    Ok(HttpResponse::Ok().json(groups))
}

/// Soft-deletes a group.
///
/// # Route
///
/// `DELETE /api/v1/groups/{group_id}`
pub async fn delete_group(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let group_id = path.into_inner();
    let group = require_group(&state, group_id).await?;
    require_manager(&req, &state, group.org_id).await?;

    // Invalidate while the membership rows still exist to enumerate
    state
        .authz_service
        .invalidate_group_members(group_id, group.org_id)
        .await;
    state.org_repository.delete_group(group_id).await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new("Group deleted")))
}

// =============================================================================
// GROUP MEMBERS
// =============================================================================

/// Adds an org member to a group.
///
/// # Route
///
/// `POST /api/v1/groups/{group_id}/members`
pub async fn add_group_member(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<AddGroupMemberRequest>,
) -> Result<HttpResponse, ApiError> {
    let group_id = path.into_inner();
    let group = require_group(&state, group_id).await?;
    require_manager(&req, &state, group.org_id).await?;

    // Group membership only makes sense for org members
    if state
        .org_repository
        .find_membership(body.user_id, group.org_id)
        .await?
        .is_none()
    {
        return Err(ApiError::BadRequest {
            message: "User is not a member of the organization".to_string(),
        });
    }

    state
        .org_repository
        .add_group_member(group_id, body.user_id)
        .await?;
    state
        .authz_service
        .invalidate_user_org(body.user_id, group.org_id)
        .await;

    Ok(HttpResponse::Created().json(MessageResponse::new("Member added to group")))
}

/// Removes a user from a group.
///
/// # Route
///
/// `DELETE /api/v1/groups/{group_id}/members/{user_id}`
pub async fn remove_group_member(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(Uuid, Uuid)>,
) -> Result<HttpResponse, ApiError> {
    let (group_id, user_id) = path.into_inner();
    let group = require_group(&state, group_id).await?;
    require_manager(&req, &state, group.org_id).await?;

    state
        .org_repository
        .remove_group_member(group_id, user_id)
        .await?;
    state
        .authz_service
        .invalidate_user_org(user_id, group.org_id)
        .await;

    Ok(HttpResponse::Ok().json(MessageResponse::new("Member removed from group")))
}

// =============================================================================
// GROUP PERMISSIONS
// =============================================================================

/// Grants a catalog permission to a group.
///
/// # Route
///
/// `POST /api/v1/groups/{group_id}/permissions`
pub async fn grant_permission(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<GroupPermissionRequest>,
) -> Result<HttpResponse, ApiError> {
    let group_id = path.into_inner();
    let group = require_group(&state, group_id).await?;
    require_manager(&req, &state, group.org_id).await?;

    let body = body.into_inner();
    validation::validate_request(&body)?;

    let permission = require_permission(&state, &body.permission).await?;
    state
        .org_repository
        .grant_permission(group_id, permission.permission_id)
        .await?;

    // Every member of this group may now decide differently
    state
        .authz_service
        .invalidate_group_members(group_id, group.org_id)
        .await;

    Ok(HttpResponse::Created().json(MessageResponse::new("Permission granted")))
}

/// Revokes a permission from a group.
///
/// # Route
///
/// `DELETE /api/v1/groups/{group_id}/permissions/{permission}`
///
/// `{permission}` is the canonical `resource:action` string.
pub async fn revoke_permission(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(Uuid, String)>,
) -> Result<HttpResponse, ApiError> {
    let (group_id, permission) = path.into_inner();
    let group = require_group(&state, group_id).await?;
    require_manager(&req, &state, group.org_id).await?;

    let permission = require_permission(&state, &permission).await?;
    state
        .org_repository
        .revoke_permission(group_id, permission.permission_id)
        .await?;
    state
        .authz_service
        .invalidate_group_members(group_id, group.org_id)
        .await;

    Ok(HttpResponse::Ok().json(MessageResponse::new("Permission revoked")))
}

// =============================================================================
// HELPERS
// =============================================================================

/// Authenticates the caller and requires an admin/owner role in the org.
async fn require_manager(
    req: &HttpRequest,
    state: &web::Data<AppState>,
    org_id: Uuid,
) -> Result<Uuid, ApiError> {
    let bearer = authenticate(req, &state.mint, &state.store).await?;
    let user_id = bearer.require_user()?;

    let membership = state
        .org_repository
        .find_membership(user_id, org_id)
        .await?
        .ok_or(ApiError::PermissionDenied)?;
    if !membership.org_role().can_manage() {
        return Err(ApiError::PermissionDenied);
    }

    Ok(user_id)
}

/// Authenticates the caller and requires plain membership in the org.
async fn require_member(
    req: &HttpRequest,
    state: &web::Data<AppState>,
    org_id: Uuid,
) -> Result<Uuid, ApiError> {
    let bearer = authenticate(req, &state.mint, &state.store).await?;
    let user_id = bearer.require_user()?;

    state
        .org_repository
        .find_membership(user_id, org_id)
        .await?
        .ok_or(ApiError::PermissionDenied)?;

    Ok(user_id)
}

/// Resolves a live group or 404s.
async fn require_group(state: &web::Data<AppState>, group_id: Uuid) -> Result<Group, ApiError> {
    state
        .org_repository
        .find_group(group_id)
        .await?
        .ok_or_else(|| ApiError::NotFound { resource: format!("group:{}", group_id) })
}

/// Resolves a catalog permission from its canonical string or 404s.
async fn require_permission(
    state: &web::Data<AppState>,
    canonical: &str,
) -> Result<crate::domain::Permission, ApiError> {
    let (resource, action) = canonical.split_once(':').ok_or(ApiError::BadRequest {
        message: "Permission must be resource:action".to_string(),
    })?;

    state
        .org_repository
        .find_permission(resource, action)
        .await?
        .ok_or_else(|| ApiError::NotFound { resource: format!("permission:{}", canonical) })
}
