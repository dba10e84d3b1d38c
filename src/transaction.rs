//! Optimistic transactions.
//!
//! A transaction applies a local mutation first and persists it second:
//!
//! 1. The optimistic step runs synchronously and its effect is visible to
//!    every reader as soon as it returns.
//! 2. Only after it succeeds is the persist step invoked.
//!
//! A failed persist does not undo the optimistic step. Callers that want
//! rollback observe the failure (through the returned error, a
//! [`PersistTicket`], or a settle hook) and compensate themselves.

use crate::error::{Result, UnreadError};
use crate::types::{TxId, TxPhase};
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type OptimisticStep = Box<dyn FnOnce() -> Result<()> + Send>;
type PersistStep = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;
type SettleHook = Box<dyn FnOnce(TxId, &Result<()>) + Send>;

/// A single optimistic-then-persist unit of work.
pub struct Transaction {
    id: TxId,
    phase: TxPhase,
    optimistic: Option<OptimisticStep>,
    persist: Option<PersistStep>,
    on_settled: Option<SettleHook>,
}

impl Transaction {
    pub fn new(id: TxId) -> Self {
        Self {
            id,
            phase: TxPhase::Pending,
            optimistic: None,
            persist: None,
            on_settled: None,
        }
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn phase(&self) -> TxPhase {
        self.phase
    }

    /// Register the local mutation.
    pub fn optimistic<F>(mut self, step: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.optimistic = Some(Box::new(step));
        self
    }

    /// Register the durable-persist step.
    pub fn persist<F, Fut>(mut self, step: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.persist = Some(Box::new(move || step().boxed()));
        self
    }

    /// Register a hook called with the persist outcome. Not called when the
    /// optimistic step fails.
    pub fn on_settled<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(TxId, &Result<()>) + Send + 'static,
    {
        self.on_settled = Some(Box::new(hook));
        self
    }

    /// Run both phases to completion.
    pub async fn run(mut self) -> Result<()> {
        self.apply_optimistic()?;
        self.settle().await
    }

    /// Run the optimistic phase now and the persist phase on a detached
    /// task. Returns once the optimistic phase has completed.
    pub fn spawn(mut self, runtime: &Handle) -> Result<PersistTicket> {
        self.apply_optimistic()?;
        let tx = self.id;
        let join = runtime.spawn(self.settle());
        Ok(PersistTicket { tx, join })
    }

    fn apply_optimistic(&mut self) -> Result<()> {
        if self.phase != TxPhase::Pending {
            return Err(UnreadError::OptimisticApply(format!(
                "transaction {} already ran",
                self.id
            )));
        }

        if let Some(step) = self.optimistic.take() {
            if let Err(e) = step() {
                self.phase = TxPhase::Failed;
                warn!(tx = self.id.0, error = %e, "Optimistic step failed");
                return Err(match e {
                    UnreadError::OptimisticApply(_) => e,
                    other => UnreadError::OptimisticApply(other.to_string()),
                });
            }
        }

        self.phase = TxPhase::OptimisticApplied;
        debug!(tx = self.id.0, "Optimistic step applied");
        Ok(())
    }

    async fn settle(mut self) -> Result<()> {
        let result = match self.persist.take() {
            Some(step) => step().await.map_err(|e| match e {
                UnreadError::Persist(_) => e,
                other => UnreadError::Persist(other.to_string()),
            }),
            None => Ok(()),
        };

        match &result {
            Ok(()) => {
                self.phase = TxPhase::Persisted;
                debug!(tx = self.id.0, "Persisted");
            }
            Err(e) => {
                self.phase = TxPhase::Failed;
                warn!(tx = self.id.0, error = %e, "Persist failed; optimistic state retained");
            }
        }

        if let Some(hook) = self.on_settled.take() {
            hook(self.id, &result);
        }
        result
    }
}

/// Awaitable outcome of a detached persist phase.
///
/// Dropping the ticket detaches it; the persist phase still runs.
#[derive(Debug)]
pub struct PersistTicket {
    tx: TxId,
    join: JoinHandle<Result<()>>,
}

impl PersistTicket {
    pub fn tx(&self) -> TxId {
        self.tx
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the persist phase to finish.
    pub async fn wait(self) -> Result<()> {
        self.join.await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_phases_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));

        let tx = {
            let a = Arc::clone(&log);
            let b = Arc::clone(&log);
            Transaction::new(TxId(1))
                .optimistic(move || {
                    a.lock().push("optimistic");
                    Ok(())
                })
                .persist(move || async move {
                    b.lock().push("persist");
                    Ok(())
                })
        };

        assert_eq!(tx.phase(), TxPhase::Pending);
        tx.run().await.unwrap();
        assert_eq!(*log.lock(), vec!["optimistic", "persist"]);
    }

    #[tokio::test]
    async fn test_optimistic_failure_skips_persist() {
        let persisted = Arc::new(AtomicBool::new(false));
        let settled = Arc::new(AtomicBool::new(false));

        let result = {
            let persisted = Arc::clone(&persisted);
            let settled = Arc::clone(&settled);
            Transaction::new(TxId(2))
                .optimistic(|| Err(UnreadError::Fetch("boom".into())))
                .persist(move || async move {
                    persisted.store(true, Ordering::SeqCst);
                    Ok(())
                })
                .on_settled(move |_, _| settled.store(true, Ordering::SeqCst))
                .run()
                .await
        };

        assert!(matches!(result, Err(UnreadError::OptimisticApply(_))));
        assert!(!persisted.load(Ordering::SeqCst));
        assert!(!settled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_optimistic() {
        let value = Arc::new(Mutex::new(0u64));
        let outcome = Arc::new(Mutex::new(None));

        let result = {
            let value = Arc::clone(&value);
            let outcome = Arc::clone(&outcome);
            Transaction::new(TxId(3))
                .optimistic(move || {
                    *value.lock() = 9;
                    Ok(())
                })
                .persist(|| async { Err(UnreadError::Fetch("offline".into())) })
                .on_settled(move |tx, r| *outcome.lock() = Some((tx, r.is_ok())))
                .run()
                .await
        };

        assert!(matches!(result, Err(UnreadError::Persist(_))));
        assert_eq!(*value.lock(), 9);
        assert_eq!(*outcome.lock(), Some((TxId(3), false)));
    }

    #[tokio::test]
    async fn test_spawn_returns_after_optimistic() {
        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let applied = Arc::new(AtomicBool::new(false));

        let ticket = {
            let applied = Arc::clone(&applied);
            Transaction::new(TxId(4))
                .optimistic(move || {
                    applied.store(true, Ordering::SeqCst);
                    Ok(())
                })
                .persist(move || async move {
                    let _ = gate.await;
                    Ok(())
                })
                .spawn(&Handle::current())
                .unwrap()
        };

        assert!(applied.load(Ordering::SeqCst));
        assert_eq!(ticket.tx(), TxId(4));

        release.send(()).unwrap();
        ticket.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_transaction_without_persist() {
        Transaction::new(TxId(5))
            .optimistic(|| Ok(()))
            .run()
            .await
            .unwrap();
    }
}
