use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use warden_client::{BatchChecker, PermissionChecker, RelationManager};
use warden_core::allowlist::AllowlistPolicy;
use warden_core::claims::is_guest;
use warden_core::tuple::{PermissionCheck, PermissionResult, RelationTuple, Subject};

use crate::audit;
use crate::error::ApiError;
use crate::metrics::Metrics;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicCheckInput {
    pub namespace: String,
    pub object: String,
    pub relation: String,
}

fn require_fields(missing: Option<&'static str>) -> Result<(), ApiError> {
    match missing {
        Some(field) => Err(ApiError::RequestInvalid(format!("{field} must not be empty"))),
        None => Ok(()),
    }
}

fn validate_check(check: &PermissionCheck) -> Result<(), ApiError> {
    require_fields(check.missing_field())?;
    check.subject.validate()?;
    Ok(())
}

/// Permission checks on behalf of end users, limited to the public allowlist.
pub struct PublicPermissionCheck<C: PermissionChecker> {
    checker: Arc<C>,
    policy: Arc<AllowlistPolicy>,
    metrics: Option<Arc<Metrics>>,
}

impl<C: PermissionChecker> Clone for PublicPermissionCheck<C> {
    fn clone(&self) -> Self {
        Self {
            checker: Arc::clone(&self.checker),
            policy: Arc::clone(&self.policy),
            metrics: self.metrics.clone(),
        }
    }
}

impl<C: PermissionChecker> PublicPermissionCheck<C> {
    pub fn new(checker: Arc<C>, policy: Arc<AllowlistPolicy>) -> Self {
        Self {
            checker,
            policy,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn execute(&self, subject_id: &str, input: PublicCheckInput) -> Result<bool, ApiError> {
        if is_guest(subject_id) {
            return Err(ApiError::Unauthorized);
        }

        let check = PermissionCheck::new(
            input.namespace,
            input.object,
            input.relation,
            Subject::Id(subject_id.to_string()),
        );
        require_fields(check.missing_field())?;

        // Decided before any backend traffic for the pair.
        if !self.policy.allows_public(&check.namespace, &check.relation) {
            if let Some(metrics) = &self.metrics {
                metrics.record_allowlist_denial();
            }
            return Err(ApiError::Forbidden(format!(
                "relation '{}' on namespace '{}' is not publicly checkable",
                check.relation, check.namespace
            )));
        }

        let outcome = self.checker.check_permission(&check).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_backend_checks(1, u64::from(outcome.is_err()));
        }
        Ok(outcome?)
    }
}

/// Permission checks for authenticated internal services; not allowlist gated.
pub struct InternalPermissionCheck<C: PermissionChecker> {
    batch: BatchChecker<C>,
    metrics: Option<Arc<Metrics>>,
}

impl<C: PermissionChecker> Clone for InternalPermissionCheck<C> {
    fn clone(&self) -> Self {
        Self {
            batch: self.batch.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<C: PermissionChecker> InternalPermissionCheck<C> {
    pub fn new(batch: BatchChecker<C>) -> Self {
        Self {
            batch,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn execute(&self, check: PermissionCheck) -> Result<bool, ApiError> {
        validate_check(&check)?;

        let outcome = self.batch.checker().check_permission(&check).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_backend_checks(1, u64::from(outcome.is_err()));
        }
        Ok(outcome?)
    }

    /// Entries that fail validation are answered in place without reaching
    /// the backend; the rest run as one bounded batch.
    pub async fn execute_batch(
        &self,
        checks: Vec<PermissionCheck>,
        cancel: &CancellationToken,
    ) -> Vec<PermissionResult> {
        let mut results: Vec<Option<PermissionResult>> = Vec::with_capacity(checks.len());
        let mut positions = Vec::new();
        let mut valid = Vec::new();

        for check in checks {
            match validate_check(&check) {
                Ok(()) => {
                    positions.push(results.len());
                    results.push(None);
                    valid.push(check);
                }
                Err(e) => results.push(Some(PermissionResult::failed(check, e.to_string()))),
            }
        }

        let answered = self.batch.check_permissions(valid, cancel).await;
        if let Some(metrics) = &self.metrics {
            let failures = answered.iter().filter(|r| r.is_error()).count();
            metrics.record_backend_checks(answered.len() as u64, failures as u64);
        }
        for (position, result) in positions.into_iter().zip(answered) {
            results[position] = Some(redact_backend_error(result));
        }

        results.into_iter().flatten().collect()
    }
}

// Backend detail stays in the log; callers only learn the entry was unanswerable.
fn redact_backend_error(result: PermissionResult) -> PermissionResult {
    match result.error {
        Some(detail) => {
            tracing::warn!(check = %result.check, error = %detail, "batch entry unanswered");
            PermissionResult::failed(result.check, ApiError::unavailable(detail).to_string())
        }
        None => result,
    }
}

/// Tuple mutations for internal services, limited to the mutation allowlist.
pub struct RelationshipWriter<M: RelationManager> {
    manager: Arc<M>,
    policy: Arc<AllowlistPolicy>,
    metrics: Option<Arc<Metrics>>,
}

impl<M: RelationManager> Clone for RelationshipWriter<M> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            policy: Arc::clone(&self.policy),
            metrics: self.metrics.clone(),
        }
    }
}

impl<M: RelationManager> RelationshipWriter<M> {
    pub fn new(manager: Arc<M>, policy: Arc<AllowlistPolicy>) -> Self {
        Self {
            manager,
            policy,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn create(&self, caller: &str, tuple: RelationTuple) -> Result<(), ApiError> {
        self.authorize(caller, &tuple)?;
        self.manager.add_relation(&tuple).await?;
        audit::audit_relationship_mutation(caller, "create", &tuple);
        Ok(())
    }

    pub async fn delete(&self, caller: &str, tuple: RelationTuple) -> Result<(), ApiError> {
        self.authorize(caller, &tuple)?;
        self.manager.delete_relation(&tuple).await?;
        audit::audit_relationship_mutation(caller, "delete", &tuple);
        Ok(())
    }

    fn authorize(&self, caller: &str, tuple: &RelationTuple) -> Result<(), ApiError> {
        require_fields(tuple.missing_field())?;
        tuple.subject.validate()?;

        if !self
            .policy
            .allows_mutation(caller, &tuple.namespace, &tuple.relation)
        {
            if let Some(metrics) = &self.metrics {
                metrics.record_allowlist_denial();
            }
            tracing::warn!(
                caller,
                namespace = %tuple.namespace,
                relation = %tuple.relation,
                "relationship mutation not allowlisted"
            );
            return Err(ApiError::Forbidden(format!(
                "service '{caller}' may not mutate '{}' on namespace '{}'",
                tuple.relation, tuple.namespace
            )));
        }
        Ok(())
    }
}
