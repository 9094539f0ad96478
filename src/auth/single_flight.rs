// Single-flight refresh coordination
//
// Many requests can fault with 401 at the same time; exactly one of them may
// perform the token exchange. The first faulting caller becomes the leader,
// every later one is parked as a waiter and resumed with the leader's token.
// State lives in one owned struct so the protocol is testable in isolation.

use std::future::Future;
use std::sync::Mutex;
use tokio::sync::oneshot;

use crate::error::ApiError;

/// Per-cycle coordinator state.
/// Invariant: `waiters` is non-empty only while `in_progress` is true.
#[derive(Default)]
struct CoordinatorState {
    in_progress: bool,
    waiters: Vec<oneshot::Sender<Option<String>>>,
}

/// What a `run` call observed for its refresh cycle
#[derive(Debug)]
pub(crate) enum RefreshOutcome {
    /// A new access token, either exchanged by this caller or broadcast to it
    Token(String),
    /// This caller led the exchange and it failed
    LeaderFailed(ApiError),
    /// This caller waited on another caller's exchange and that exchange failed
    Cancelled,
}

/// Coordinates concurrent refresh attempts so at most one token exchange is
/// outstanding at any time.
pub(crate) struct RefreshCoordinator {
    state: Mutex<CoordinatorState>,
}

impl RefreshCoordinator {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(CoordinatorState::default()),
        }
    }

    /// Join the current refresh cycle, or lead a new one by running `exchange`.
    ///
    /// The leader claims the cycle synchronously under the lock before its
    /// first await, which is what makes the single-flight check race-free.
    /// After the exchange resolves, every queued waiter is resolved exactly
    /// once, in enqueue order, and the state is reset for the next cycle.
    pub(crate) async fn run<F, Fut>(&self, exchange: F) -> RefreshOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, ApiError>>,
    {
        let rx = {
            let mut state = self.state.lock().unwrap();
            if state.in_progress {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                Some(rx)
            } else {
                state.in_progress = true;
                None
            }
        };

        if let Some(rx) = rx {
            // Suspended until the leader resolves the cycle. A dropped sender
            // (leader panicked) counts as a failed refresh.
            return match rx.await {
                Ok(Some(token)) => RefreshOutcome::Token(token),
                _ => RefreshOutcome::Cancelled,
            };
        }

        let result = exchange().await;

        let waiters = {
            let mut state = self.state.lock().unwrap();
            state.in_progress = false;
            std::mem::take(&mut state.waiters)
        };

        match result {
            Ok(token) => {
                tracing::debug!(waiters = waiters.len(), "Broadcasting refreshed token");
                for tx in waiters {
                    let _ = tx.send(Some(token.clone()));
                }
                RefreshOutcome::Token(token)
            }
            Err(err) => {
                tracing::warn!(waiters = waiters.len(), "Cancelling waiters, refresh failed");
                for tx in waiters {
                    let _ = tx.send(None);
                }
                RefreshOutcome::LeaderFailed(err)
            }
        }
    }

    #[cfg(test)]
    fn is_idle(&self) -> bool {
        let state = self.state.lock().unwrap();
        !state.in_progress && state.waiters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::task::yield_now;

    /// Spawn a leader whose exchange suspends until `release` fires,
    /// counting how many times the exchange actually runs.
    fn spawn_leader(
        coordinator: Arc<RefreshCoordinator>,
        calls: Arc<AtomicUsize>,
        release: oneshot::Receiver<Result<String, ApiError>>,
    ) -> tokio::task::JoinHandle<RefreshOutcome> {
        tokio::spawn(async move {
            coordinator
                .run(move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    release.await.unwrap()
                })
                .await
        })
    }

    /// Spawn a caller whose own exchange must never run (it should be parked)
    fn spawn_waiter(
        coordinator: Arc<RefreshCoordinator>,
        calls: Arc<AtomicUsize>,
    ) -> tokio::task::JoinHandle<RefreshOutcome> {
        tokio::spawn(async move {
            coordinator
                .run(move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    panic!("waiter must not run its own exchange");
                })
                .await
        })
    }

    #[tokio::test]
    async fn test_single_flight_one_exchange_for_many_callers() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = oneshot::channel();

        let leader = spawn_leader(coordinator.clone(), calls.clone(), release_rx);
        yield_now().await;

        let waiters: Vec<_> = (0..5)
            .map(|_| spawn_waiter(coordinator.clone(), calls.clone()))
            .collect();
        yield_now().await;

        release_tx.send(Ok("t2".to_string())).unwrap();

        assert!(matches!(
            leader.await.unwrap(),
            RefreshOutcome::Token(t) if t == "t2"
        ));
        for handle in waiters {
            assert!(matches!(
                handle.await.unwrap(),
                RefreshOutcome::Token(t) if t == "t2"
            ));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(coordinator.is_idle());
    }

    #[tokio::test]
    async fn test_waiters_resume_in_enqueue_order() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = oneshot::channel();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let leader = spawn_leader(coordinator.clone(), calls.clone(), release_rx);
        yield_now().await;

        let mut handles = Vec::new();
        for i in 0..3 {
            let coordinator = coordinator.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let outcome = coordinator
                    .run(|| async { panic!("waiter must not run its own exchange") })
                    .await;
                order.lock().unwrap().push(i);
                outcome
            }));
            // Enqueue one at a time so the queue order is fixed
            yield_now().await;
        }

        release_tx.send(Ok("t2".to_string())).unwrap();
        leader.await.unwrap();
        for handle in handles {
            assert!(matches!(
                handle.await.unwrap(),
                RefreshOutcome::Token(t) if t == "t2"
            ));
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_failure_fans_out_to_all_waiters() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = oneshot::channel();

        let leader = spawn_leader(coordinator.clone(), calls.clone(), release_rx);
        yield_now().await;

        let waiters: Vec<_> = (0..3)
            .map(|_| spawn_waiter(coordinator.clone(), calls.clone()))
            .collect();
        yield_now().await;

        release_tx.send(Err(ApiError::AuthExpired)).unwrap();

        assert!(matches!(
            leader.await.unwrap(),
            RefreshOutcome::LeaderFailed(ApiError::AuthExpired)
        ));
        for handle in waiters {
            assert!(matches!(handle.await.unwrap(), RefreshOutcome::Cancelled));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(coordinator.is_idle());
    }

    #[tokio::test]
    async fn test_state_resets_between_cycles() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let calls = Arc::new(AtomicUsize::new(0));

        for round in 1..=2 {
            let (release_tx, release_rx) = oneshot::channel();
            let leader = spawn_leader(coordinator.clone(), calls.clone(), release_rx);
            yield_now().await;
            release_tx.send(Ok(format!("t{}", round))).unwrap();
            assert!(matches!(leader.await.unwrap(), RefreshOutcome::Token(_)));
        }

        // Each cycle led independently; no stale in_progress flag
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(coordinator.is_idle());
    }

    #[tokio::test]
    async fn test_uncontended_caller_leads_immediately() {
        let coordinator = RefreshCoordinator::new();
        let outcome = coordinator.run(|| async { Ok("t1".to_string()) }).await;
        assert!(matches!(outcome, RefreshOutcome::Token(t) if t == "t1"));
        assert!(coordinator.is_idle());
    }
}
