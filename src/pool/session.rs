use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::engine::EngineSession;

/// Lifecycle of one pooled session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Busy,
    /// The engine is gone; the session must be disposed on release, never
    /// reused.
    Crashed,
    Closed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Busy => write!(f, "busy"),
            SessionStatus::Crashed => write!(f, "crashed"),
            SessionStatus::Closed => write!(f, "closed"),
        }
    }
}

/// A reusable handle to one rendering engine instance.
///
/// Owned by the pool while idle; moved out to exactly one job while busy and
/// moved back on release, so a session can never serve two jobs at once.
pub struct Session {
    pub id: Uuid,
    pub(crate) engine: Box<dyn EngineSession>,
    status: SessionStatus,
    jobs_served: u64,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(engine: Box<dyn EngineSession>) -> Self {
        Self {
            id: Uuid::new_v4(),
            engine,
            status: SessionStatus::Idle,
            jobs_served: 0,
            created_at: Utc::now(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn jobs_served(&self) -> u64 {
        self.jobs_served
    }

    pub fn engine_mut(&mut self) -> &mut dyn EngineSession {
        self.engine.as_mut()
    }

    pub(crate) fn mark_busy(&mut self) {
        self.status = SessionStatus::Busy;
        self.jobs_served += 1;
    }

    pub(crate) fn mark_idle(&mut self) {
        self.status = SessionStatus::Idle;
    }

    /// Flag the session for disposal; release will replace it instead of
    /// returning it to the idle set.
    pub fn mark_crashed(&mut self) {
        self.status = SessionStatus::Crashed;
    }

    pub(crate) fn close(&mut self) {
        self.status = SessionStatus::Closed;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("jobs_served", &self.jobs_served)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
