use std::sync::Arc;

use serde::Serialize;

use crate::engine::{EngineError, EngineFactory};
use crate::pool::session::{Session, SessionStatus};

/// Read-only utilization snapshot, served by the stats endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub idle: usize,
    pub busy: usize,
    pub queued: usize,
    pub completed: u64,
    pub failed: u64,
    pub crashed: u64,
}

/// Fixed-capacity collection of rendering sessions.
///
/// Sessions are created up front; a crashed one is disposed on release and
/// replaced in the same slot, so capacity never changes. All mutation happens
/// from the dispatcher's single task, no locking.
pub struct SessionPool {
    capacity: usize,
    idle: Vec<Session>,
    /// Sessions currently moved out to jobs.
    checked_out: usize,
    /// Slots whose replacement failed; refilled on the next release.
    replacing: usize,
    completed: u64,
    failed: u64,
    crashed: u64,
    factory: Arc<dyn EngineFactory>,
}

impl SessionPool {
    /// Create the pool with `capacity` sessions, all idle.
    pub async fn new(factory: Arc<dyn EngineFactory>, capacity: usize) -> Result<Self, EngineError> {
        let mut idle = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            let session = Session::new(factory.create().await?);
            tracing::debug!(session_id = %session.id, "session created");
            idle.push(session);
        }
        Ok(Self {
            capacity,
            idle,
            checked_out: 0,
            replacing: 0,
            completed: 0,
            failed: 0,
            crashed: 0,
            factory,
        })
    }

    /// Hand out an idle session, or `None` when all are busy. Never blocks;
    /// the dispatcher is notified by the next release instead.
    pub fn acquire(&mut self) -> Option<Session> {
        let mut session = self.idle.pop()?;
        session.mark_busy();
        self.checked_out += 1;
        Some(session)
    }

    /// Return a session to the idle set. A crashed session is disposed and a
    /// replacement created in its place, preserving capacity.
    pub async fn release(&mut self, mut session: Session) {
        self.checked_out -= 1;
        if session.status() == SessionStatus::Crashed {
            self.crashed += 1;
            tracing::warn!(
                session_id = %session.id,
                jobs_served = session.jobs_served(),
                "disposing crashed session"
            );
            drop(session);
            self.replacing += 1;
        } else {
            session.mark_idle();
            self.idle.push(session);
        }
        self.refill().await;
    }

    /// Record a job outcome in the aggregate counters.
    pub fn record_outcome(&mut self, success: bool) {
        if success {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
    }

    /// Replace disposed sessions. Failures leave the slot pending, retried
    /// on the next release or by the dispatcher's timed retry when no
    /// release is coming.
    pub(crate) async fn refill(&mut self) {
        while self.replacing > 0 {
            match self.factory.create().await {
                Ok(engine) => {
                    let session = Session::new(engine);
                    tracing::info!(session_id = %session.id, "replacement session created");
                    self.idle.push(session);
                    self.replacing -= 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to create replacement session");
                    break;
                }
            }
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    pub fn busy_count(&self) -> usize {
        self.checked_out
    }

    /// Whether any slot is still waiting for a replacement session.
    pub fn needs_refill(&self) -> bool {
        self.replacing > 0
    }

    pub fn stats(&self, queued: usize) -> PoolStats {
        PoolStats {
            capacity: self.capacity,
            idle: self.idle.len(),
            busy: self.checked_out,
            queued,
            completed: self.completed,
            failed: self.failed,
            crashed: self.crashed,
        }
    }

    /// Dispose every idle session. Busy sessions are closed as they come
    /// back through the dispatcher's drain.
    pub fn close_all(&mut self) {
        for mut session in self.idle.drain(..) {
            session.close();
            tracing::debug!(session_id = %session.id, "session closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::{MockBehavior, MockEngineFactory};

    #[tokio::test]
    async fn acquire_and_release_round_trip() {
        let factory = Arc::new(MockEngineFactory::new());
        let mut pool = SessionPool::new(factory, 2).await.unwrap();

        let a = pool.acquire().expect("idle session");
        let b = pool.acquire().expect("second idle session");
        assert!(pool.acquire().is_none(), "capacity exhausted");
        assert_eq!(pool.stats(0).busy, 2);
        assert_eq!(pool.stats(0).idle, 0);

        pool.release(a).await;
        pool.release(b).await;
        let stats = pool.stats(0);
        assert_eq!(stats.idle, 2);
        assert_eq!(stats.busy, 0);
        assert_eq!(stats.capacity, 2);
    }

    #[tokio::test]
    async fn crashed_session_is_replaced_capacity_preserved() {
        let factory = Arc::new(MockEngineFactory::new());
        let created_before;
        let mut pool = {
            let pool = SessionPool::new(factory.clone(), 2).await.unwrap();
            created_before = factory.created();
            pool
        };
        assert_eq!(created_before, 2);

        let mut session = pool.acquire().unwrap();
        let crashed_id = session.id;
        session.mark_crashed();
        pool.release(session).await;

        let stats = pool.stats(0);
        assert_eq!(stats.capacity, 2);
        assert_eq!(stats.idle, 2);
        assert_eq!(stats.crashed, 1);
        assert_eq!(factory.created(), 3, "one replacement created");

        // The crashed session is never reused.
        let replacement = pool.acquire().unwrap();
        assert_ne!(replacement.id, crashed_id);
        pool.release(replacement).await;
    }

    #[tokio::test]
    async fn failed_replacement_is_retried_on_next_release() {
        let factory = Arc::new(MockEngineFactory::new());
        let mut pool = SessionPool::new(factory.clone(), 2).await.unwrap();

        let mut crashed = pool.acquire().unwrap();
        let healthy = pool.acquire().unwrap();
        crashed.mark_crashed();
        factory.fail_next_creates(1);
        pool.release(crashed).await;
        assert!(pool.needs_refill(), "failed replacement leaves a pending slot");
        assert_eq!(pool.idle_count(), 0);

        pool.release(healthy).await;
        assert!(!pool.needs_refill());
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.stats(0).capacity, 2);
    }

    #[tokio::test]
    async fn jobs_served_counts_checkouts() {
        let factory = Arc::new(MockEngineFactory::with_fallback(MockBehavior::new()));
        let mut pool = SessionPool::new(factory, 1).await.unwrap();
        for _ in 0..3 {
            let session = pool.acquire().unwrap();
            assert_eq!(session.status(), SessionStatus::Busy);
            pool.release(session).await;
        }
        let session = pool.acquire().unwrap();
        assert_eq!(session.jobs_served(), 4);
    }
}
