use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::InvalidHeaderName;
use axum::http::{HeaderName, Request, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use warden_core::claims::GUEST_SUBJECT;

use crate::audit;
use crate::auth::ServiceTokenValidator;
use crate::metrics::Metrics;

/// Service name proven by a validated service token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallingService(pub String);

/// End-user subject id resolved upstream; `guest` when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSubject(pub String);

#[derive(Clone)]
pub struct ServiceAuthState {
    validator: Arc<ServiceTokenValidator>,
    metrics: Option<Arc<Metrics>>,
}

impl ServiceAuthState {
    pub fn new(validator: Arc<ServiceTokenValidator>) -> Self {
        Self {
            validator,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn record(&self, accepted: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_service_token(accepted);
        }
    }
}

pub async fn service_auth_middleware(
    State(auth_state): State<ServiceAuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let auth_header = match request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        Some(h) => h.to_string(),
        None => {
            auth_state.record(false);
            audit::audit_service_auth_failure("missing_header");
            return error_json(StatusCode::UNAUTHORIZED, "missing authorization header");
        }
    };

    let Some(token) = auth_header.strip_prefix("Bearer ") else {
        auth_state.record(false);
        audit::audit_service_auth_failure("invalid_format");
        return error_json(StatusCode::UNAUTHORIZED, "invalid authorization format");
    };

    match auth_state.validator.validate(token) {
        Ok(caller) => {
            auth_state.record(true);
            audit::audit_service_auth_success(&caller);
            request.extensions_mut().insert(CallingService(caller));
            next.run(request).await
        }
        Err(e) => {
            auth_state.record(false);
            audit::audit_service_auth_failure(e.reason());
            tracing::debug!(error = %e, "service token rejected");
            error_json(StatusCode::UNAUTHORIZED, "invalid service token")
        }
    }
}

#[derive(Clone)]
pub struct UserIdentityState {
    header: HeaderName,
}

impl UserIdentityState {
    pub fn new(header: &str) -> Result<Self, InvalidHeaderName> {
        Ok(Self {
            header: HeaderName::try_from(header)?,
        })
    }
}

pub async fn user_identity_middleware(
    State(identity): State<UserIdentityState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let subject = request
        .headers()
        .get(&identity.header)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(GUEST_SUBJECT)
        .to_string();

    request.extensions_mut().insert(UserSubject(subject));
    next.run(request).await
}

fn error_json(status: StatusCode, msg: &str) -> Response {
    let body = serde_json::json!({"error": msg});
    (status, axum::Json(body)).into_response()
}
