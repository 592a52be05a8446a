mod handlers;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::extract::{DefaultBodyLimit, State};
use axum::middleware;
use axum::response::Response;
use axum::routing::{get, post, put};
use tokio_util::sync::CancellationToken;
use warden_client::{BatchChecker, PermissionChecker, RelationManager};
use warden_core::allowlist::AllowlistPolicy;

use crate::audit::AuditSink;
use crate::directory::UserDirectory;
use crate::metrics::{self, Metrics};
use crate::middleware::{
    ServiceAuthState, UserIdentityState, service_auth_middleware, user_identity_middleware,
};
use crate::permissions::{InternalPermissionCheck, PublicPermissionCheck, RelationshipWriter};
use crate::roles::{RoleAuthority, RoleManager, RoleService, RoleUpdater};

const MAX_REQUEST_BODY_SIZE: usize = 1024 * 1024; // 1 MB

/// Upper bound on entries in one batch-check or bulk-claims request.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Collaborators the router is built from.
pub struct Backends<B, D> {
    pub backend: Arc<B>,
    pub directory: Arc<D>,
    pub audit: Arc<dyn AuditSink>,
    pub policy: Arc<AllowlistPolicy>,
    pub authority: Arc<RoleAuthority>,
    pub max_concurrent_checks: usize,
}

pub struct AppState<B, D>
where
    B: PermissionChecker + RelationManager,
    D: UserDirectory,
{
    pub public_checks: PublicPermissionCheck<B>,
    pub internal_checks: InternalPermissionCheck<B>,
    pub writer: RelationshipWriter<B>,
    pub roles: RoleService<B>,
    pub role_updates: RoleUpdater<B, B, D>,
    pub metrics: Arc<Metrics>,
    pub shutdown: CancellationToken,
}

impl<B, D> Clone for AppState<B, D>
where
    B: PermissionChecker + RelationManager,
    D: UserDirectory,
{
    fn clone(&self) -> Self {
        Self {
            public_checks: self.public_checks.clone(),
            internal_checks: self.internal_checks.clone(),
            writer: self.writer.clone(),
            roles: self.roles.clone(),
            role_updates: self.role_updates.clone(),
            metrics: self.metrics.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<B, D> AppState<B, D>
where
    B: PermissionChecker + RelationManager,
    D: UserDirectory,
{
    pub fn new(parts: Backends<B, D>, metrics: Arc<Metrics>, shutdown: CancellationToken) -> Self {
        let batch = BatchChecker::new(Arc::clone(&parts.backend), parts.max_concurrent_checks);
        let roles = RoleService::new(batch.clone(), Arc::clone(&parts.authority))
            .with_metrics(Arc::clone(&metrics));

        Self {
            public_checks: PublicPermissionCheck::new(
                Arc::clone(&parts.backend),
                Arc::clone(&parts.policy),
            )
            .with_metrics(Arc::clone(&metrics)),
            internal_checks: InternalPermissionCheck::new(batch)
                .with_metrics(Arc::clone(&metrics)),
            writer: RelationshipWriter::new(Arc::clone(&parts.backend), parts.policy)
                .with_metrics(Arc::clone(&metrics)),
            role_updates: RoleUpdater::new(
                roles.clone(),
                RoleManager::new(parts.backend, parts.authority),
                parts.directory,
                parts.audit,
            ),
            roles,
            metrics,
            shutdown,
        }
    }

    /// Token for one request; cancelled when the server shuts down.
    fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}

async fn metrics_middleware<B, D>(
    State(state): State<AppState<B, D>>,
    request: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> Response
where
    B: PermissionChecker + RelationManager,
    D: UserDirectory,
{
    state.metrics.record_request();

    let response = next.run(request).await;

    if response.status().is_success() {
        state.metrics.record_success();
    } else {
        state.metrics.record_error();
    }

    response
}

pub fn create_router<B, D>(
    state: AppState<B, D>,
    service_auth: ServiceAuthState,
    identity: UserIdentityState,
) -> Router
where
    B: PermissionChecker + RelationManager + 'static,
    D: UserDirectory + 'static,
{
    let metrics = Arc::clone(&state.metrics);

    let public = Router::new()
        .route(
            "/v1/permissions/check",
            post(handlers::check_permission::<B, D>),
        )
        .route("/v1/roles/me", get(handlers::my_claims::<B, D>))
        .route(
            "/v1/roles/{subject_id}",
            put(handlers::update_roles::<B, D>),
        )
        .route_layer(middleware::from_fn_with_state(
            identity,
            user_identity_middleware,
        ));

    let internal = Router::new()
        .route(
            "/internal/v1/permissions/check",
            post(handlers::internal_check::<B, D>),
        )
        .route(
            "/internal/v1/permissions/batch-check",
            post(handlers::batch_check::<B, D>),
        )
        .route(
            "/internal/v1/relationships",
            put(handlers::create_relationship::<B, D>)
                .delete(handlers::delete_relationship::<B, D>),
        )
        .route("/internal/v1/roles", post(handlers::bulk_claims::<B, D>))
        .route_layer(middleware::from_fn_with_state(
            service_auth,
            service_auth_middleware,
        ));

    Router::new()
        .merge(public)
        .merge(internal)
        .route("/healthz", get(handlers::healthz))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_SIZE))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            metrics_middleware::<B, D>,
        ))
        .with_state(state)
        .route(
            "/metrics",
            get(metrics::metrics_handler).with_state(metrics),
        )
}
