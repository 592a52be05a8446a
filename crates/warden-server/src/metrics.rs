use std::fmt::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

#[derive(Debug, Default)]
pub struct Metrics {
    request_total: AtomicU64,
    request_success: AtomicU64,
    request_error: AtomicU64,
    backend_checks: AtomicU64,
    backend_check_failures: AtomicU64,
    allowlist_denials: AtomicU64,
    service_token_accepted: AtomicU64,
    service_token_rejected: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.request_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.request_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.request_error.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backend_checks(&self, count: u64, failures: u64) {
        self.backend_checks.fetch_add(count, Ordering::Relaxed);
        self.backend_check_failures
            .fetch_add(failures, Ordering::Relaxed);
    }

    pub fn record_allowlist_denial(&self) {
        self.allowlist_denials.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_service_token(&self, accepted: bool) {
        let counter = if accepted {
            &self.service_token_accepted
        } else {
            &self.service_token_rejected
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_total(&self) -> u64 {
        self.request_total.load(Ordering::Relaxed)
    }

    pub fn request_success(&self) -> u64 {
        self.request_success.load(Ordering::Relaxed)
    }

    pub fn request_error(&self) -> u64 {
        self.request_error.load(Ordering::Relaxed)
    }

    pub fn backend_checks(&self) -> u64 {
        self.backend_checks.load(Ordering::Relaxed)
    }

    pub fn backend_check_failures(&self) -> u64 {
        self.backend_check_failures.load(Ordering::Relaxed)
    }

    pub fn allowlist_denials(&self) -> u64 {
        self.allowlist_denials.load(Ordering::Relaxed)
    }

    pub fn service_token_accepted(&self) -> u64 {
        self.service_token_accepted.load(Ordering::Relaxed)
    }

    pub fn service_token_rejected(&self) -> u64 {
        self.service_token_rejected.load(Ordering::Relaxed)
    }

    pub fn render_prometheus(&self) -> String {
        let counters = [
            (
                "warden_requests_total",
                "Total number of requests.",
                self.request_total(),
            ),
            (
                "warden_requests_success_total",
                "Total successful requests.",
                self.request_success(),
            ),
            (
                "warden_requests_error_total",
                "Total failed requests.",
                self.request_error(),
            ),
            (
                "warden_backend_checks_total",
                "Permission checks sent to the relationship backend.",
                self.backend_checks(),
            ),
            (
                "warden_backend_check_failures_total",
                "Permission checks the backend could not answer.",
                self.backend_check_failures(),
            ),
            (
                "warden_allowlist_denials_total",
                "Requests refused by an allowlist before reaching the backend.",
                self.allowlist_denials(),
            ),
            (
                "warden_service_tokens_accepted_total",
                "Service tokens that passed validation.",
                self.service_token_accepted(),
            ),
            (
                "warden_service_tokens_rejected_total",
                "Service tokens that failed validation.",
                self.service_token_rejected(),
            ),
        ];

        let mut output = String::new();
        for (name, help, value) in counters {
            let _ = writeln!(output, "# HELP {name} {help}");
            let _ = writeln!(output, "# TYPE {name} counter");
            let _ = writeln!(output, "{name} {value}");
        }
        output
    }
}

pub async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        metrics.render_prometheus(),
    )
}
