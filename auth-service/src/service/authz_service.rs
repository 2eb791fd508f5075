//! # Authorization Engine
//!
//! The policy decision point: answers "may principal P perform action A in
//! organization O?" with a two-level cache in front of the role graph.
//!
//! ## Decision Pipeline
//!
//! ```text
//! authorize(user, org, permission)
//!     │
//!     ├─ 1. input validation (UUIDs, ^[a-z_]+:[a-z_]+$)
//!     │        └─ fail → {allowed: false, reason: "Invalid ID format"}
//!     │
//!     ├─ 2. L1  auth:check:{u}:{o}:{perm} → "1" | "0"      (TTL 60 s)
//!     │        └─ hit → answer immediately, groups = null
//!     │
//!     ├─ 3. L2  auth:perms:{u}:{o} → [{permission, group}] (TTL 5 min)
//!     │        └─ hit → decide in memory, fill L1, groups recoverable
//!     │
//!     ├─ 4. membership gate (persistent store)
//!     │        └─ not a member → {allowed: false, reason: "Not a member..."}
//!     │
//!     └─ 5. resolution query → fill L2, decide, fill L1
//! ```
//!
//! ## The L1 Group-Attribution Limitation
//!
//! L1 stores a single boolean. When a decision is served from a warm L1,
//! the names of the granting groups are not recoverable and `groups` is
//! `null` in the response. This is a documented semantic limitation of the
//! two-level design, not a bug; callers that need attribution must
//! tolerate null.
//!
//! ## Staleness & Invalidation
//!
//! A decision may be stale for up to L1's TTL after a permission change if
//! invalidation fails - documented, bounded. The invalidation API:
//!
//! | Change | Call |
//! |--------|------|
//! | user added to / removed from group | [`AuthzService::invalidate_user_org`] |
//! | group granted / revoked a permission | [`AuthzService::invalidate_group_members`] |
//! | user leaves org | [`AuthzService::invalidate_user_org`] |
//! | password reset | nothing here (permissions unchanged) |
//!
//! ## Degradation
//!
//! If the cache store is down, both levels are bypassed and the persistent
//! store answers directly. The membership gate never fails open.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::ephemeral::{keys, EphemeralStore};
use shared::errors::ApiError;
use shared::metrics::Metrics;
use shared::validation::validators;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::domain::PermissionGrant;
use crate::repository::OrgRepository;

// =============================================================================
// Role Graph Abstraction
// =============================================================================

/// The slice of the persistent store the engine needs.
///
/// A trait so the cache behavior is testable without PostgreSQL; the
/// production implementation is [`OrgRepository`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoleGraph: Send + Sync {
    /// The user's role in the org, or `None` for non-members.
    async fn membership_role(&self, user_id: Uuid, org_id: Uuid)
        -> Result<Option<String>, ApiError>;

    /// Flattened `(permission, group)` grants for the pair.
    async fn resolve_grants(
        &self,
        user_id: Uuid,
        org_id: Uuid,
    ) -> Result<Vec<PermissionGrant>, ApiError>;

    /// Members of one group, for grant-change invalidation.
    async fn group_member_ids(&self, group_id: Uuid) -> Result<Vec<Uuid>, ApiError>;
}

#[async_trait]
impl RoleGraph for OrgRepository {
    async fn membership_role(
        &self,
        user_id: Uuid,
        org_id: Uuid,
    ) -> Result<Option<String>, ApiError> {
        Ok(self
            .find_membership(user_id, org_id)
            .await?
            .map(|m| m.role))
    }

    async fn resolve_grants(
        &self,
        user_id: Uuid,
        org_id: Uuid,
    ) -> Result<Vec<PermissionGrant>, ApiError> {
        OrgRepository::resolve_grants(self, user_id, org_id).await
    }

    async fn group_member_ids(&self, group_id: Uuid) -> Result<Vec<Uuid>, ApiError> {
        OrgRepository::list_group_member_ids(self, group_id).await
    }
}

// =============================================================================
// Decision
// =============================================================================

/// The `{allowed, reason, groups}` tuple, always delivered over HTTP 200.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Decision {
    /// Whether the action is permitted
    pub allowed: bool,
    /// Denial reason, `None` on allow
    pub reason: Option<String>,
    /// Names of the granting groups on allow; `None` when served from a
    /// warm L1 (see the module docs) or on deny
    pub groups: Option<Vec<String>>,
}

impl Decision {
    fn invalid_input() -> Self {
        Self {
            allowed: false,
            reason: Some("Invalid ID format".to_string()),
            groups: None,
        }
    }

    fn not_member() -> Self {
        Self {
            allowed: false,
            reason: Some("Not a member of the organization".to_string()),
            groups: None,
        }
    }

    fn denied() -> Self {
        Self {
            allowed: false,
            reason: Some("Permission not granted".to_string()),
            groups: None,
        }
    }

    fn allowed_with(groups: Option<Vec<String>>) -> Self {
        Self { allowed: true, reason: None, groups }
    }
}

/// Validated inputs of one authorization question.
#[derive(Debug, Clone, Copy)]
struct Question {
    user_id: Uuid,
    org_id: Uuid,
}

// =============================================================================
// Engine
// =============================================================================

/// Authorization engine with the two-level cache.
#[derive(Clone)]
pub struct AuthzService {
    graph: Arc<dyn RoleGraph>,
    store: EphemeralStore,
    metrics: Metrics,
    l1_ttl: Duration,
    l2_ttl: Duration,
}

impl AuthzService {
    /// Creates the engine.
    pub fn new(
        graph: Arc<dyn RoleGraph>,
        store: EphemeralStore,
        metrics: Metrics,
        l1_ttl: Duration,
        l2_ttl: Duration,
    ) -> Self {
        Self { graph, store, metrics, l1_ttl, l2_ttl }
    }

    // =========================================================================
    // The Decision Point
    // =========================================================================

    /// Answers one authorization question.
    ///
    /// Inputs arrive as raw strings because input validation is part of the
    /// contract: unparseable ids or a malformed permission yield a deny
    /// with reason "Invalid ID format", not an HTTP error.
    ///
    /// ## Errors
    ///
    /// Only persistent-store failures surface as `Err`; cache failures
    /// degrade to the persistent store silently (with a warning).
    pub async fn authorize(
        &self,
        user_id: &str,
        org_id: &str,
        permission: &str,
    ) -> Result<Decision, ApiError> {
        // ── 1. Input validation ─────────────────────────────────────────
        let (Ok(user_id), Ok(org_id)) = (Uuid::parse_str(user_id), Uuid::parse_str(org_id))
        else {
            return Ok(Decision::invalid_input());
        };
        if validators::valid_permission(permission).is_err() {
            return Ok(Decision::invalid_input());
        }
        let question = Question { user_id, org_id };

        // ── 2. L1: per-decision boolean ─────────────────────────────────
        let l1_key = keys::authz_check(user_id, org_id, permission);
        match self.cache_get(&l1_key).await {
            CacheRead::Hit(value) => {
                self.count_cache("l1");
                let decision = if value == "1" {
                    // Group attribution is not recoverable from L1
                    Decision::allowed_with(None)
                } else {
                    Decision::denied()
                };
                return Ok(decision);
            }
            CacheRead::Miss => {}
            CacheRead::Unavailable => {
                // Cache outage: go straight to the persistent store
                self.count_cache("bypass");
                return self.decide_from_graph(question, permission, false).await;
            }
        }

        // ── 3. L2: per-principal permission set ─────────────────────────
        let l2_key = keys::authz_perms(user_id, org_id);
        if let CacheRead::Hit(serialized) = self.cache_get(&l2_key).await {
            if let Ok(grants) = serde_json::from_str::<Vec<PermissionGrant>>(&serialized) {
                self.count_cache("l2");
                let decision = decide(&grants, permission);
                self.fill_l1(&l1_key, decision.allowed).await;
                return Ok(decision);
            }
            // Unreadable payload: drop it and fall through to the store
            let _ = self.store.delete(&l2_key).await;
        }

        // ── 4 + 5. Membership gate and resolution ───────────────────────
        self.count_cache("miss");
        self.decide_from_graph(question, permission, true).await
    }

    /// Steps 4-5: membership gate, resolution, optional cache fill.
    async fn decide_from_graph(
        &self,
        question: Question,
        permission: &str,
        fill_caches: bool,
    ) -> Result<Decision, ApiError> {
        let Question { user_id, org_id } = question;

        // Membership gate hits the persistent store and never fails open
        if self.graph.membership_role(user_id, org_id).await?.is_none() {
            if fill_caches {
                self.fill_l1(&keys::authz_check(user_id, org_id, permission), false)
                    .await;
            }
            return Ok(Decision::not_member());
        }

        let grants = self.graph.resolve_grants(user_id, org_id).await?;
        let decision = decide(&grants, permission);

        if fill_caches {
            if let Ok(serialized) = serde_json::to_string(&grants) {
                self.cache_set(&keys::authz_perms(user_id, org_id), &serialized, self.l2_ttl)
                    .await;
            }
            self.fill_l1(&keys::authz_check(user_id, org_id, permission), decision.allowed)
                .await;
        }

        Ok(decision)
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Drops L2 and every L1 entry for one (user, org) pair.
    ///
    /// Called when the user's group memberships change or the user leaves
    /// the org.
    pub async fn invalidate_user_org(&self, user_id: Uuid, org_id: Uuid) {
        let l2 = self.store.delete(&keys::authz_perms(user_id, org_id)).await;
        let l1 = self
            .store
            .delete_prefix(&keys::authz_check_prefix(user_id, org_id))
            .await;
        if let Err(e) = l2.and(l1.map(|_| false)) {
            warn!(user_id = %user_id, org_id = %org_id, error = %e,
                  "Cache invalidation failed; decisions stale up to L1 TTL");
        }
    }

    /// Drops cached state for a user across every org.
    ///
    /// Used by the password-reset flow's cache hygiene.
    pub async fn invalidate_user_all(&self, user_id: Uuid) {
        let l2 = self
            .store
            .delete_prefix(&keys::authz_perms_user_prefix(user_id))
            .await;
        let l1 = self
            .store
            .delete_prefix(&keys::authz_check_user_prefix(user_id))
            .await;
        if let Err(e) = l2.and(l1) {
            warn!(user_id = %user_id, error = %e,
                  "Cache invalidation failed; decisions stale up to L1 TTL");
        }
    }

    /// Drops cached state for every member of a group after its grants
    /// changed.
    pub async fn invalidate_group_members(&self, group_id: Uuid, org_id: Uuid) {
        match self.graph.group_member_ids(group_id).await {
            Ok(member_ids) => {
                for user_id in member_ids {
                    self.invalidate_user_org(user_id, org_id).await;
                }
            }
            Err(e) => {
                warn!(group_id = %group_id, error = %e,
                      "Could not enumerate group members for invalidation");
            }
        }
    }

    // =========================================================================
    // Cache Plumbing
    // =========================================================================

    async fn cache_get(&self, key: &str) -> CacheRead {
        match self.store.get(key).await {
            Ok(Some(value)) => CacheRead::Hit(value),
            Ok(None) => CacheRead::Miss,
            Err(e) => {
                warn!(error = %e, "Authorization cache unavailable; bypassing");
                CacheRead::Unavailable
            }
        }
    }

    async fn cache_set(&self, key: &str, value: &str, ttl: Duration) {
        if let Err(e) = self.store.set_with_ttl(key, value, ttl).await {
            warn!(error = %e, "Authorization cache write failed");
        }
    }

    async fn fill_l1(&self, key: &str, allowed: bool) {
        self.cache_set(key, if allowed { "1" } else { "0" }, self.l1_ttl)
            .await;
    }

    fn count_cache(&self, level: &str) {
        self.metrics.authz_cache_total.with_label_values(&[level]).inc();
    }
}

enum CacheRead {
    Hit(String),
    Miss,
    Unavailable,
}

/// Decides from a resolved grant set, collecting granting group names.
fn decide(grants: &[PermissionGrant], permission: &str) -> Decision {
    let mut groups: Vec<String> = grants
        .iter()
        .filter(|grant| grant.permission == permission)
        .map(|grant| grant.group.clone())
        .collect();

    if groups.is_empty() {
        return Decision::denied();
    }

    groups.sort();
    groups.dedup();
    Decision::allowed_with(Some(groups))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    fn grants() -> Vec<PermissionGrant> {
        vec![
            PermissionGrant { permission: "image:write".into(), group: "editors".into() },
            PermissionGrant { permission: "image:write".into(), group: "admins".into() },
            PermissionGrant { permission: "image:read".into(), group: "viewers".into() },
        ]
    }

    fn engine(graph: MockRoleGraph) -> AuthzService {
        AuthzService::new(
            Arc::new(graph),
            EphemeralStore::in_memory(),
            Metrics::new(),
            Duration::from_secs(60),
            Duration::from_secs(300),
        )
    }

    #[test]
    fn test_decide_collects_and_dedupes_groups() {
        let decision = decide(&grants(), "image:write");
        assert!(decision.allowed);
        assert_eq!(
            decision.groups,
            Some(vec!["admins".to_string(), "editors".to_string()])
        );
    }

    #[test]
    fn test_decide_denies_unknown_permission() {
        let decision = decide(&grants(), "billing:read");
        assert!(!decision.allowed);
        assert_eq!(decision.reason.as_deref(), Some("Permission not granted"));
    }

    #[tokio::test]
    async fn test_invalid_inputs_deny_without_touching_the_graph() {
        let graph = MockRoleGraph::new(); // any call would panic
        let service = engine(graph);

        for (user, org, perm) in [
            ("not-a-uuid", &Uuid::new_v4().to_string()[..], "image:write"),
            (&Uuid::new_v4().to_string()[..], "nope", "image:write"),
            (&Uuid::new_v4().to_string()[..], &Uuid::new_v4().to_string()[..], "Image:Write"),
            (&Uuid::new_v4().to_string()[..], &Uuid::new_v4().to_string()[..], "image"),
        ] {
            let decision = service.authorize(user, org, perm).await.unwrap();
            assert!(!decision.allowed);
            assert_eq!(decision.reason.as_deref(), Some("Invalid ID format"));
        }
    }

    #[tokio::test]
    async fn test_non_member_denied_with_reason() {
        let user = Uuid::new_v4();
        let org = Uuid::new_v4();

        let mut graph = MockRoleGraph::new();
        graph
            .expect_membership_role()
            .with(eq(user), eq(org))
            .returning(|_, _| Ok(None));

        let service = engine(graph);
        let decision = service
            .authorize(&user.to_string(), &org.to_string(), "image:write")
            .await
            .unwrap();

        assert!(!decision.allowed);
        assert_eq!(
            decision.reason.as_deref(),
            Some("Not a member of the organization")
        );
    }

    #[tokio::test]
    async fn test_cold_path_resolves_and_attributes_groups() {
        let user = Uuid::new_v4();
        let org = Uuid::new_v4();

        let mut graph = MockRoleGraph::new();
        graph
            .expect_membership_role()
            .returning(|_, _| Ok(Some("member".to_string())));
        graph.expect_resolve_grants().returning(|_, _| Ok(grants()));

        let service = engine(graph);
        let decision = service
            .authorize(&user.to_string(), &org.to_string(), "image:write")
            .await
            .unwrap();

        assert!(decision.allowed);
        assert_eq!(
            decision.groups,
            Some(vec!["admins".to_string(), "editors".to_string()])
        );
    }

    #[tokio::test]
    async fn test_l1_hit_short_circuits_and_loses_attribution() {
        let user = Uuid::new_v4();
        let org = Uuid::new_v4();

        let mut graph = MockRoleGraph::new();
        // Exactly one trip to the persistent store for two calls
        graph
            .expect_membership_role()
            .times(1)
            .returning(|_, _| Ok(Some("member".to_string())));
        graph
            .expect_resolve_grants()
            .times(1)
            .returning(|_, _| Ok(grants()));

        let service = engine(graph);

        let first = service
            .authorize(&user.to_string(), &org.to_string(), "image:write")
            .await
            .unwrap();
        assert_eq!(first.groups.as_ref().map(Vec::len), Some(2));

        let second = service
            .authorize(&user.to_string(), &org.to_string(), "image:write")
            .await
            .unwrap();
        assert!(second.allowed);
        // The documented limitation: warm L1 cannot name the groups
        assert_eq!(second.groups, None);
    }

    #[tokio::test]
    async fn test_l2_hit_recovers_attribution_for_new_permission() {
        let user = Uuid::new_v4();
        let org = Uuid::new_v4();

        let mut graph = MockRoleGraph::new();
        graph
            .expect_membership_role()
            .times(1)
            .returning(|_, _| Ok(Some("member".to_string())));
        graph
            .expect_resolve_grants()
            .times(1)
            .returning(|_, _| Ok(grants()));

        let service = engine(graph);

        // Warms L2 (and L1 for image:write)
        service
            .authorize(&user.to_string(), &org.to_string(), "image:write")
            .await
            .unwrap();

        // Different permission: L1 miss, L2 hit - groups recoverable,
        // and no second trip to the store (times(1) above enforces it)
        let decision = service
            .authorize(&user.to_string(), &org.to_string(), "image:read")
            .await
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.groups, Some(vec!["viewers".to_string()]));
    }

    #[tokio::test]
    async fn test_invalidation_forces_refill() {
        let user = Uuid::new_v4();
        let org = Uuid::new_v4();

        let mut graph = MockRoleGraph::new();
        // Two resolutions expected: before and after invalidation
        graph
            .expect_membership_role()
            .times(2)
            .returning(|_, _| Ok(Some("member".to_string())));

        let mut remaining = vec![Vec::new(), grants()]; // second call: revoked
        graph
            .expect_resolve_grants()
            .times(2)
            .returning(move |_, _| Ok(remaining.pop().unwrap()));

        let service = engine(graph);

        let before = service
            .authorize(&user.to_string(), &org.to_string(), "image:write")
            .await
            .unwrap();
        assert!(before.allowed);

        service.invalidate_user_org(user, org).await;

        // P6: after invalidation, neither cache level answers
        let after = service
            .authorize(&user.to_string(), &org.to_string(), "image:write")
            .await
            .unwrap();
        assert!(!after.allowed);
    }

    #[tokio::test]
    async fn test_denies_are_cached_in_l1() {
        let user = Uuid::new_v4();
        let org = Uuid::new_v4();

        let mut graph = MockRoleGraph::new();
        graph
            .expect_membership_role()
            .times(1)
            .returning(|_, _| Ok(Some("member".to_string())));
        graph
            .expect_resolve_grants()
            .times(1)
            .returning(|_, _| Ok(Vec::new()));

        let service = engine(graph);

        for _ in 0..2 {
            let decision = service
                .authorize(&user.to_string(), &org.to_string(), "image:write")
                .await
                .unwrap();
            assert!(!decision.allowed);
        }
        // times(1) on both expectations proves the second deny came from L1
    }

    #[tokio::test]
    async fn test_group_invalidation_touches_every_member() {
        let org = Uuid::new_v4();
        let group = Uuid::new_v4();
        let members = vec![Uuid::new_v4(), Uuid::new_v4()];

        let mut graph = MockRoleGraph::new();
        let members_clone = members.clone();
        graph
            .expect_group_member_ids()
            .with(eq(group))
            .returning(move |_| Ok(members_clone.clone()));
        graph
            .expect_membership_role()
            .returning(|_, _| Ok(Some("member".to_string())));
        graph.expect_resolve_grants().returning(|_, _| Ok(grants()));

        let service = engine(graph);

        // Warm both members' caches
        for user in &members {
            service
                .authorize(&user.to_string(), &org.to_string(), "image:write")
                .await
                .unwrap();
        }

        service.invalidate_group_members(group, org).await;

        // Both L2 keys are gone
        for user in &members {
            let gone = service
                .store
                .get(&keys::authz_perms(*user, org))
                .await
                .unwrap();
            assert_eq!(gone, None);
        }
    }
}
