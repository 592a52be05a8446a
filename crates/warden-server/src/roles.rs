use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use warden_client::{BatchChecker, ClientError, PermissionChecker, RelationManager};
use warden_core::claims::{RoleClaims, is_guest};
use warden_core::tuple::{PermissionCheck, PermissionResult, RelationTuple, Subject};

use crate::audit::{AuditSink, RoleChangeRecord, RoleKind};
use crate::directory::UserDirectory;
use crate::error::ApiError;
use crate::metrics::Metrics;

/// The fixed object whose relations encode platform roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAuthority {
    pub namespace: String,
    pub object: String,
    pub admin_relation: String,
    pub banned_relation: String,
}

impl RoleAuthority {
    fn relation(&self, role: RoleKind) -> &str {
        match role {
            RoleKind::Admin => &self.admin_relation,
            RoleKind::Banned => &self.banned_relation,
        }
    }

    // Callers guarantee a non-empty, non-guest subject id.
    fn subject(subject_id: &str) -> Subject {
        Subject::Id(subject_id.to_string())
    }

    fn checks_for(&self, subject_id: &str) -> [PermissionCheck; 2] {
        [RoleKind::Admin, RoleKind::Banned].map(|role| {
            PermissionCheck::new(
                self.namespace.as_str(),
                self.object.as_str(),
                self.relation(role),
                Self::subject(subject_id),
            )
        })
    }

    fn tuple(&self, role: RoleKind, subject_id: &str) -> RelationTuple {
        RelationTuple::new(
            self.namespace.as_str(),
            self.object.as_str(),
            self.relation(role),
            Self::subject(subject_id),
        )
    }
}

/// Derives role claims from the admin and banned relations.
pub struct RoleService<C: PermissionChecker> {
    batch: BatchChecker<C>,
    authority: Arc<RoleAuthority>,
    metrics: Option<Arc<Metrics>>,
}

impl<C: PermissionChecker> Clone for RoleService<C> {
    fn clone(&self) -> Self {
        Self {
            batch: self.batch.clone(),
            authority: Arc::clone(&self.authority),
            metrics: self.metrics.clone(),
        }
    }
}

impl<C: PermissionChecker> RoleService<C> {
    pub fn new(batch: BatchChecker<C>, authority: Arc<RoleAuthority>) -> Self {
        Self {
            batch,
            authority,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Guests short-circuit without a backend call. Any check failure yields
    /// claims with `error` set, never a silent `false`.
    pub async fn claims_for_subject(
        &self,
        subject_id: &str,
        cancel: &CancellationToken,
    ) -> RoleClaims {
        if is_guest(subject_id) {
            return RoleClaims::guest(subject_id);
        }

        let checks = self.authority.checks_for(subject_id).to_vec();
        let results = self.run(checks, cancel).await;
        claims_from_results(subject_id, &results)
    }

    /// Resolves many subjects in one batch. Fails as a whole if any
    /// non-guest subject could not be evaluated.
    pub async fn claims_for_subjects(
        &self,
        subject_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, RoleClaims>, ApiError> {
        let mut seen = HashSet::new();
        let evaluated: Vec<&str> = subject_ids
            .iter()
            .map(String::as_str)
            .filter(|id| !is_guest(id) && seen.insert(*id))
            .collect();

        let checks: Vec<PermissionCheck> = evaluated
            .iter()
            .flat_map(|id| self.authority.checks_for(id))
            .collect();
        let expected = checks.len();
        let results = self.run(checks, cancel).await;

        if results.len() != expected {
            return Err(ApiError::unavailable(format!(
                "role batch returned {} results for {expected} checks",
                results.len()
            )));
        }

        let mut claims: HashMap<String, RoleClaims> = subject_ids
            .iter()
            .filter(|id| is_guest(id))
            .map(|id| (id.clone(), RoleClaims::guest(id.as_str())))
            .collect();

        for (id, pair) in evaluated.iter().zip(results.chunks(2)) {
            let subject_claims = claims_from_results(id, pair);
            if let Some(err) = subject_claims.error() {
                return Err(ApiError::unavailable(format!(
                    "role lookup for '{id}' failed: {err}"
                )));
            }
            claims.insert(id.to_string(), subject_claims);
        }

        Ok(claims)
    }

    async fn run(
        &self,
        checks: Vec<PermissionCheck>,
        cancel: &CancellationToken,
    ) -> Vec<PermissionResult> {
        let results = self.batch.check_permissions(checks, cancel).await;
        if let Some(metrics) = &self.metrics {
            let failures = results.iter().filter(|r| r.is_error()).count();
            metrics.record_backend_checks(results.len() as u64, failures as u64);
        }
        results
    }
}

fn claims_from_results(subject_id: &str, results: &[PermissionResult]) -> RoleClaims {
    let [admin, banned] = results else {
        return RoleClaims::failed(
            subject_id,
            format!("expected 2 role check results, got {}", results.len()),
        );
    };

    if let Some(err) = admin.error.as_ref().or(banned.error.as_ref()) {
        tracing::warn!(subject = subject_id, error = %err, "role claims could not be evaluated");
        return RoleClaims::failed(subject_id, err.clone());
    }

    RoleClaims::evaluated(subject_id, admin.allowed, banned.allowed)
}

/// Grants and revokes role relations on the authority object.
pub struct RoleManager<M: RelationManager> {
    manager: Arc<M>,
    authority: Arc<RoleAuthority>,
}

impl<M: RelationManager> Clone for RoleManager<M> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            authority: Arc::clone(&self.authority),
        }
    }
}

impl<M: RelationManager> RoleManager<M> {
    pub fn new(manager: Arc<M>, authority: Arc<RoleAuthority>) -> Self {
        Self { manager, authority }
    }

    pub async fn set_admin(&self, subject_id: &str, enabled: bool) -> Result<(), ClientError> {
        self.set(RoleKind::Admin, subject_id, enabled).await
    }

    pub async fn set_banned(&self, subject_id: &str, enabled: bool) -> Result<(), ClientError> {
        self.set(RoleKind::Banned, subject_id, enabled).await
    }

    async fn set(&self, role: RoleKind, subject_id: &str, enabled: bool) -> Result<(), ClientError> {
        let tuple = self.authority.tuple(role, subject_id);
        if enabled {
            self.manager.add_relation(&tuple).await
        } else {
            self.manager.delete_relation(&tuple).await
        }
    }
}

/// Requested role flags; `None` leaves a flag untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleChange {
    pub admin: Option<bool>,
    pub banned: Option<bool>,
}

impl RoleChange {
    pub fn is_empty(&self) -> bool {
        self.admin.is_none() && self.banned.is_none()
    }
}

/// Admin-driven role updates with directory and audit side effects.
pub struct RoleUpdater<C, M, D>
where
    C: PermissionChecker,
    M: RelationManager,
    D: UserDirectory,
{
    roles: RoleService<C>,
    manager: RoleManager<M>,
    directory: Arc<D>,
    audit: Arc<dyn AuditSink>,
}

impl<C, M, D> Clone for RoleUpdater<C, M, D>
where
    C: PermissionChecker,
    M: RelationManager,
    D: UserDirectory,
{
    fn clone(&self) -> Self {
        Self {
            roles: self.roles.clone(),
            manager: self.manager.clone(),
            directory: Arc::clone(&self.directory),
            audit: Arc::clone(&self.audit),
        }
    }
}

impl<C, M, D> RoleUpdater<C, M, D>
where
    C: PermissionChecker,
    M: RelationManager,
    D: UserDirectory,
{
    pub fn new(
        roles: RoleService<C>,
        manager: RoleManager<M>,
        directory: Arc<D>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            roles,
            manager,
            directory,
            audit,
        }
    }

    /// Applies `change` to `target_id` on behalf of `actor_id` and returns the
    /// target's freshly evaluated claims.
    pub async fn update(
        &self,
        actor_id: &str,
        target_id: &str,
        change: RoleChange,
        cancel: &CancellationToken,
    ) -> Result<RoleClaims, ApiError> {
        if is_guest(actor_id) {
            return Err(ApiError::Unauthorized);
        }
        if is_guest(target_id) {
            return Err(ApiError::RequestInvalid(
                "target subject must be a known user".to_string(),
            ));
        }
        if change.is_empty() {
            return Err(ApiError::RequestInvalid(
                "no role change requested".to_string(),
            ));
        }
        if actor_id == target_id {
            return Err(ApiError::Forbidden(
                "subjects cannot change their own roles".to_string(),
            ));
        }

        let actor = self.roles.claims_for_subject(actor_id, cancel).await;
        if let Some(err) = actor.error() {
            return Err(ApiError::unavailable(format!(
                "actor claims unavailable: {err}"
            )));
        }
        if !actor.is_active_admin() {
            return Err(ApiError::Forbidden("admin role required".to_string()));
        }

        let exists = self
            .directory
            .exists(target_id)
            .await
            .map_err(|e| ApiError::unavailable(e.to_string()))?;
        if !exists {
            return Err(ApiError::NotFound(format!("subject '{target_id}'")));
        }

        let current = self.evaluated(target_id, cancel).await?;
        let (current_admin, current_banned) = (
            current.admin().unwrap_or_default(),
            current.banned().unwrap_or_default(),
        );

        let resulting_admin = change.admin.unwrap_or(current_admin);
        if change.banned == Some(true) && resulting_admin {
            return Err(ApiError::Forbidden("admins cannot be banned".to_string()));
        }

        if let Some(admin) = change.admin
            && admin != current_admin
        {
            self.manager.set_admin(target_id, admin).await?;
            self.record(actor_id, target_id, RoleKind::Admin, admin)?;
        }
        if let Some(banned) = change.banned
            && banned != current_banned
        {
            self.manager.set_banned(target_id, banned).await?;
            self.record(actor_id, target_id, RoleKind::Banned, banned)?;
        }

        self.evaluated(target_id, cancel).await
    }

    async fn evaluated(
        &self,
        subject_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RoleClaims, ApiError> {
        let claims = self.roles.claims_for_subject(subject_id, cancel).await;
        match claims.error() {
            Some(err) => Err(ApiError::unavailable(format!(
                "claims for '{subject_id}' unavailable: {err}"
            ))),
            None => Ok(claims),
        }
    }

    fn record(
        &self,
        actor_id: &str,
        target_id: &str,
        role: RoleKind,
        enabled: bool,
    ) -> Result<(), ApiError> {
        let record = RoleChangeRecord::new(actor_id, target_id, role, enabled);
        self.audit.record(&record).map_err(|e| {
            ApiError::internal(format!(
                "role {role} for '{target_id}' changed but not audited: {e}"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::testing::MemoryAuditSink;
    use crate::config::AppConfig;
    use crate::directory::HttpUserDirectory;
    use crate::test_support::{FakeBackend, FakeDirectory, WriteOp};

    const NS: &str = "platform";
    const OBJ: &str = "authority";

    fn authority() -> Arc<RoleAuthority> {
        Arc::new(AppConfig::default().role_authority())
    }

    fn role_service(backend: &Arc<FakeBackend>) -> RoleService<FakeBackend> {
        RoleService::new(BatchChecker::new(Arc::clone(backend), 10), authority())
    }

    struct Fixture {
        backend: Arc<FakeBackend>,
        audit: Arc<MemoryAuditSink>,
        updater: RoleUpdater<FakeBackend, FakeBackend, FakeDirectory>,
    }

    fn fixture_with(directory: FakeDirectory, audit: MemoryAuditSink) -> Fixture {
        let backend = Arc::new(FakeBackend::new());
        backend.grant(NS, OBJ, "admins", "root");
        let audit = Arc::new(audit);
        let updater = RoleUpdater::new(
            role_service(&backend),
            RoleManager::new(Arc::clone(&backend), authority()),
            Arc::new(directory),
            audit.clone(),
        );
        Fixture {
            backend,
            audit,
            updater,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            FakeDirectory::with_users(&["root", "alice", "bob"]),
            MemoryAuditSink::default(),
        )
    }

    fn ban() -> RoleChange {
        RoleChange {
            admin: None,
            banned: Some(true),
        }
    }

    fn promote() -> RoleChange {
        RoleChange {
            admin: Some(true),
            banned: None,
        }
    }

    // --- RoleService ---

    #[tokio::test]
    async fn guest_claims_skip_backend() {
        let backend = Arc::new(FakeBackend::new());
        let service = role_service(&backend);

        for id in ["", "guest"] {
            let claims = service
                .claims_for_subject(id, &CancellationToken::new())
                .await;
            assert!(!claims.is_authenticated());
            assert!(claims.error().is_none());
        }
        assert_eq!(backend.check_calls(), 0);
    }

    #[tokio::test]
    async fn admin_and_banned_are_derived_from_two_checks() {
        let backend = Arc::new(FakeBackend::new());
        backend.grant(NS, OBJ, "admins", "alice");
        let service = role_service(&backend);

        let claims = service
            .claims_for_subject("alice", &CancellationToken::new())
            .await;

        assert!(claims.is_authenticated());
        assert_eq!(claims.admin(), Some(true));
        assert_eq!(claims.banned(), Some(false));
        assert!(claims.is_active_admin());
        assert_eq!(backend.check_calls(), 2);
    }

    #[tokio::test]
    async fn one_failing_check_marks_claims_unevaluated() {
        let backend = Arc::new(FakeBackend::new());
        backend.grant(NS, OBJ, "admins", "alice");
        backend.fail_checks_on("banned");
        let service = role_service(&backend);

        let claims = service
            .claims_for_subject("alice", &CancellationToken::new())
            .await;

        assert!(claims.is_authenticated());
        assert!(claims.error().is_some());
        assert_eq!(claims.admin(), None);
        assert_eq!(claims.banned(), None);
        assert!(!claims.is_active_admin());
    }

    #[tokio::test]
    async fn cancelled_lookup_is_an_error_not_a_denial() {
        let backend = Arc::new(FakeBackend::new());
        let service = role_service(&backend);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let claims = service.claims_for_subject("alice", &cancel).await;

        assert_eq!(claims.error(), Some("request cancelled"));
    }

    #[test]
    fn short_result_set_is_an_error() {
        let check = PermissionCheck::new(NS, OBJ, "admins", Subject::id("alice").unwrap());
        let claims = claims_from_results("alice", &[PermissionResult::allowed(check, true)]);

        assert!(claims.error().unwrap().contains("got 1"));
    }

    #[tokio::test]
    async fn bulk_resolution_returns_claims_per_subject() {
        let backend = Arc::new(FakeBackend::new());
        backend.grant(NS, OBJ, "admins", "alice");
        backend.grant(NS, OBJ, "banned", "mallory");
        let service = role_service(&backend);

        let ids = vec![
            "alice".to_string(),
            "mallory".to_string(),
            "guest".to_string(),
            "alice".to_string(),
        ];
        let claims = service
            .claims_for_subjects(&ids, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(claims.len(), 3);
        assert_eq!(claims["alice"].admin(), Some(true));
        assert_eq!(claims["mallory"].banned(), Some(true));
        assert!(!claims["guest"].is_authenticated());
        assert_eq!(backend.check_calls(), 4);
    }

    #[tokio::test]
    async fn bulk_resolution_fails_closed() {
        let backend = Arc::new(FakeBackend::new());
        backend.fail_checks_on("banned");
        let service = role_service(&backend);

        let result = service
            .claims_for_subjects(
                &["alice".to_string(), "bob".to_string()],
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(ApiError::AuthzUnavailable { .. })));
    }

    // --- RoleManager ---

    #[tokio::test]
    async fn role_manager_creates_and_deletes_authority_tuples() {
        let backend = Arc::new(FakeBackend::new());
        let manager = RoleManager::new(Arc::clone(&backend), authority());

        manager.set_admin("alice", true).await.unwrap();
        manager.set_banned("bob", false).await.unwrap();

        let expected_admin =
            RelationTuple::new(NS, OBJ, "admins", Subject::id("alice").unwrap());
        let expected_banned = RelationTuple::new(NS, OBJ, "banned", Subject::id("bob").unwrap());
        assert_eq!(
            backend.writes(),
            vec![
                (WriteOp::Create, expected_admin),
                (WriteOp::Delete, expected_banned)
            ]
        );
    }

    #[tokio::test]
    async fn role_manager_propagates_backend_error() {
        let backend = Arc::new(FakeBackend::new());
        backend.fail_writes();
        let manager = RoleManager::new(Arc::clone(&backend), authority());

        let result = manager.set_admin("alice", true).await;

        assert!(matches!(result, Err(ClientError::Connection(_))));
    }

    // --- RoleUpdater ---

    #[tokio::test]
    async fn admin_bans_user_and_audits_once() {
        let f = fixture();

        let claims = f
            .updater
            .update("root", "bob", ban(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(claims.subject(), "bob");
        assert_eq!(claims.banned(), Some(true));
        assert!(f.backend.holds(NS, OBJ, "banned", "bob"));
        let records = f.audit.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].actor, "root");
        assert_eq!(records[0].target, "bob");
        assert_eq!(records[0].role, RoleKind::Banned);
        assert!(records[0].enabled);
    }

    #[tokio::test]
    async fn guest_actor_is_unauthorized() {
        let f = fixture();

        let result = f
            .updater
            .update("guest", "bob", ban(), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ApiError::Unauthorized)));
        assert_eq!(f.backend.check_calls(), 0);
    }

    #[tokio::test]
    async fn non_admin_actor_is_forbidden() {
        let f = fixture();

        let result = f
            .updater
            .update("alice", "bob", ban(), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ApiError::Forbidden(_))));
        assert!(f.backend.writes().is_empty());
    }

    #[tokio::test]
    async fn banned_admin_is_forbidden() {
        let f = fixture();
        f.backend.grant(NS, OBJ, "banned", "root");

        let result = f
            .updater
            .update("root", "bob", ban(), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ApiError::Forbidden(_))));
    }

    #[tokio::test]
    async fn unevaluable_actor_is_unavailable() {
        let f = fixture();
        f.backend.fail_checks_on("admins");

        let result = f
            .updater
            .update("root", "bob", ban(), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ApiError::AuthzUnavailable { .. })));
    }

    #[tokio::test]
    async fn guest_target_is_invalid() {
        let f = fixture();

        let result = f
            .updater
            .update("root", "guest", ban(), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ApiError::RequestInvalid(_))));
    }

    #[tokio::test]
    async fn empty_change_is_invalid() {
        let f = fixture();

        let result = f
            .updater
            .update("root", "bob", RoleChange::default(), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ApiError::RequestInvalid(_))));
    }

    #[tokio::test]
    async fn self_modification_is_forbidden() {
        let f = fixture();

        let result = f
            .updater
            .update(
                "root",
                "root",
                RoleChange {
                    admin: Some(false),
                    banned: None,
                },
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(ApiError::Forbidden(_))));
        assert!(f.backend.holds(NS, OBJ, "admins", "root"));
    }

    #[tokio::test]
    async fn unknown_target_is_not_found() {
        let f = fixture();

        let result = f
            .updater
            .update("root", "stranger", promote(), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ApiError::NotFound(_))));
        assert!(f.backend.writes().is_empty());
    }

    #[tokio::test]
    async fn dot_segment_target_is_not_found_against_identity_api() {
        let mut identity = mockito::Server::new_async().await;
        let collection = identity
            .mock("GET", "/admin/identities")
            .with_status(200)
            .with_body("[]")
            .expect(0)
            .create_async()
            .await;
        let backend = Arc::new(FakeBackend::new());
        backend.grant(NS, OBJ, "admins", "root");
        let directory =
            HttpUserDirectory::new(&identity.url(), std::time::Duration::from_secs(5)).unwrap();
        let updater = RoleUpdater::new(
            role_service(&backend),
            RoleManager::new(Arc::clone(&backend), authority()),
            Arc::new(directory),
            Arc::new(MemoryAuditSink::default()),
        );

        for target in ["..", "."] {
            let result = updater
                .update("root", target, promote(), &CancellationToken::new())
                .await;
            assert!(matches!(result, Err(ApiError::NotFound(_))), "target {target:?}");
        }

        assert!(backend.writes().is_empty());
        collection.assert_async().await;
    }

    #[tokio::test]
    async fn directory_failure_is_unavailable() {
        let f = fixture_with(FakeDirectory::failing(), MemoryAuditSink::default());

        let result = f
            .updater
            .update("root", "bob", promote(), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ApiError::AuthzUnavailable { .. })));
    }

    #[tokio::test]
    async fn admin_target_cannot_be_banned() {
        let f = fixture();
        f.backend.grant(NS, OBJ, "admins", "alice");

        let result = f
            .updater
            .update("root", "alice", ban(), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ApiError::Forbidden(ref msg)) if msg.contains("banned")));
        assert!(f.backend.writes().is_empty());
    }

    #[tokio::test]
    async fn demote_and_ban_in_one_request() {
        let f = fixture();
        f.backend.grant(NS, OBJ, "admins", "alice");

        let claims = f
            .updater
            .update(
                "root",
                "alice",
                RoleChange {
                    admin: Some(false),
                    banned: Some(true),
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(claims.admin(), Some(false));
        assert_eq!(claims.banned(), Some(true));
        let roles: Vec<RoleKind> = f.audit.records().iter().map(|r| r.role).collect();
        assert_eq!(roles, vec![RoleKind::Admin, RoleKind::Banned]);
    }

    #[tokio::test]
    async fn unchanged_flags_are_not_rewritten() {
        let f = fixture();
        f.backend.grant(NS, OBJ, "admins", "alice");

        let claims = f
            .updater
            .update("root", "alice", promote(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(claims.admin(), Some(true));
        assert!(f.backend.writes().is_empty());
        assert!(f.audit.records().is_empty());
    }

    #[tokio::test]
    async fn backend_write_failure_is_unavailable_and_unaudited() {
        let f = fixture();
        f.backend.fail_writes();

        let result = f
            .updater
            .update("root", "bob", promote(), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ApiError::AuthzUnavailable { .. })));
        assert!(f.audit.records().is_empty());
    }

    #[tokio::test]
    async fn audit_failure_is_internal_after_mutation() {
        let f = fixture_with(
            FakeDirectory::with_users(&["root", "bob"]),
            MemoryAuditSink::failing(),
        );

        let result = f
            .updater
            .update("root", "bob", promote(), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ApiError::Internal { .. })));
        assert!(f.backend.holds(NS, OBJ, "admins", "bob"));
    }
}
