use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use warden_core::tuple::{PermissionCheck, PermissionResult};

use crate::error::ClientError;
use crate::traits::PermissionChecker;

pub const DEFAULT_MAX_CONCURRENT_CHECKS: usize = 10;

/// Evaluates many permission checks with a bounded number in flight.
///
/// Results line up positionally with the input. A failing check only
/// affects its own entry; the batch as a whole never fails.
pub struct BatchChecker<C: PermissionChecker> {
    checker: Arc<C>,
    max_concurrency: usize,
}

impl<C: PermissionChecker> Clone for BatchChecker<C> {
    fn clone(&self) -> Self {
        Self {
            checker: Arc::clone(&self.checker),
            max_concurrency: self.max_concurrency,
        }
    }
}

impl<C: PermissionChecker> BatchChecker<C> {
    pub fn new(checker: Arc<C>, max_concurrency: usize) -> Self {
        Self {
            checker,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn checker(&self) -> &Arc<C> {
        &self.checker
    }

    /// Once `cancel` fires, every check that has not completed resolves with
    /// [`ClientError::Cancelled`] in its `error` field.
    pub async fn check_permissions(
        &self,
        checks: Vec<PermissionCheck>,
        cancel: &CancellationToken,
    ) -> Vec<PermissionResult> {
        let total = checks.len();
        let permits = Semaphore::new(self.max_concurrency);

        let pending = checks.into_iter().map(|check| {
            let permits = &permits;
            async move {
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ClientError::Cancelled),
                    outcome = async {
                        let _permit = permits
                            .acquire()
                            .await
                            .map_err(|_| ClientError::Cancelled)?;
                        self.checker.check_permission(&check).await
                    } => outcome,
                };

                match outcome {
                    Ok(allowed) => PermissionResult::allowed(check, allowed),
                    Err(e) => {
                        tracing::debug!(check = %check, error = %e, "permission check failed");
                        PermissionResult::failed(check, e.to_string())
                    }
                }
            }
        });

        let results = join_all(pending).await;

        let failed = results.iter().filter(|r| r.is_error()).count();
        tracing::debug!(total, failed, "batch permission check finished");

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use warden_core::tuple::Subject;

    #[derive(Clone)]
    enum Script {
        Allow(bool, Duration),
        Fail(Duration),
        Hang,
    }

    #[derive(Default)]
    struct ScriptedChecker {
        scripts: HashMap<String, Script>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedChecker {
        fn with(scripts: Vec<(&str, Script)>) -> Self {
            Self {
                scripts: scripts
                    .into_iter()
                    .map(|(object, script)| (object.to_string(), script))
                    .collect(),
                ..Default::default()
            }
        }
    }

    impl PermissionChecker for ScriptedChecker {
        async fn check_permission(&self, check: &PermissionCheck) -> Result<bool, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let script = self
                .scripts
                .get(&check.object)
                .cloned()
                .unwrap_or(Script::Allow(true, Duration::from_millis(10)));

            let outcome = match script {
                Script::Allow(allowed, delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(allowed)
                }
                Script::Fail(delay) => {
                    tokio::time::sleep(delay).await;
                    Err(ClientError::Connection("connection refused".to_string()))
                }
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(true)
                }
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            outcome
        }
    }

    fn check(object: &str) -> PermissionCheck {
        PermissionCheck::new("videos", object, "view", Subject::id("alice").unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn results_follow_input_order_not_completion_order() {
        let checker = Arc::new(ScriptedChecker::with(vec![
            ("a", Script::Allow(true, Duration::from_millis(300))),
            ("b", Script::Allow(false, Duration::from_millis(200))),
            ("c", Script::Allow(true, Duration::from_millis(100))),
            ("d", Script::Allow(false, Duration::from_millis(1))),
        ]));
        let batch = BatchChecker::new(checker, 10);

        let results = batch
            .check_permissions(
                vec![check("a"), check("b"), check("c"), check("d")],
                &CancellationToken::new(),
            )
            .await;

        let objects: Vec<&str> = results.iter().map(|r| r.check.object.as_str()).collect();
        let allowed: Vec<bool> = results.iter().map(|r| r.allowed).collect();
        assert_eq!(objects, vec!["a", "b", "c", "d"]);
        assert_eq!(allowed, vec![true, false, true, false]);
        assert!(results.iter().all(|r| r.error.is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_isolated_per_entry() {
        let checker = Arc::new(ScriptedChecker::with(vec![
            ("ok", Script::Allow(true, Duration::from_millis(5))),
            ("broken", Script::Fail(Duration::from_millis(1))),
        ]));
        let batch = BatchChecker::new(checker, 10);

        let results = batch
            .check_permissions(
                vec![check("ok"), check("broken"), check("ok")],
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[0].allowed && results[0].error.is_none());
        assert!(!results[1].allowed);
        assert_eq!(
            results[1].error.as_deref(),
            Some("connection error: connection refused")
        );
        assert!(results[2].allowed && results[2].error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_checks_never_exceed_the_bound() {
        let checker = Arc::new(ScriptedChecker::default());
        let batch = BatchChecker::new(Arc::clone(&checker), 3);

        let checks: Vec<PermissionCheck> = (0..25).map(|i| check(&format!("obj-{i}"))).collect();
        let results = batch
            .check_permissions(checks, &CancellationToken::new())
            .await;

        assert_eq!(results.len(), 25);
        assert_eq!(checker.calls.load(Ordering::SeqCst), 25);
        assert_eq!(checker.max_in_flight.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_resolves_outstanding_checks() {
        let checker = Arc::new(ScriptedChecker::with(vec![
            ("fast", Script::Allow(true, Duration::from_millis(1))),
            ("slow", Script::Hang),
        ]));
        let batch = BatchChecker::new(checker, 10);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let results = batch
            .check_permissions(vec![check("fast"), check("slow")], &cancel)
            .await;

        assert!(results[0].allowed);
        assert!(results[0].error.is_none());
        assert!(!results[1].allowed);
        assert_eq!(
            results[1].error.as_deref(),
            Some(ClientError::Cancelled.to_string().as_str())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn queued_checks_are_cancelled_without_running() {
        let checker = Arc::new(ScriptedChecker::with(vec![("slow", Script::Hang)]));
        let batch = BatchChecker::new(Arc::clone(&checker), 1);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let results = batch
            .check_permissions(vec![check("slow"), check("queued")], &cancel)
            .await;

        assert!(results.iter().all(|r| r.is_error()));
        assert_eq!(checker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn already_cancelled_token_skips_backend() {
        let checker = Arc::new(ScriptedChecker::default());
        let batch = BatchChecker::new(Arc::clone(&checker), 10);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let results = batch
            .check_permissions(vec![check("a"), check("b")], &cancel)
            .await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_error()));
        assert_eq!(checker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_batch_returns_no_results() {
        let batch = BatchChecker::new(Arc::new(ScriptedChecker::default()), 10);

        let results = batch
            .check_permissions(Vec::new(), &CancellationToken::new())
            .await;

        assert!(results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_concurrency_is_clamped_to_one() {
        let checker = Arc::new(ScriptedChecker::default());
        let batch = BatchChecker::new(Arc::clone(&checker), 0);

        let results = batch
            .check_permissions(
                vec![check("a"), check("b"), check("c")],
                &CancellationToken::new(),
            )
            .await;

        assert!(results.iter().all(|r| r.allowed && r.error.is_none()));
        assert_eq!(checker.max_in_flight.load(Ordering::SeqCst), 1);
    }
}
