//! FIFO admission and binding of queued jobs to idle sessions.
//!
//! The dispatcher is a single task owning the session pool and the pending
//! queue; every state transition happens inside its event loop, so the queue
//! and counters need no locking. In-flight jobs run as spawned tasks that
//! own their session exclusively and report back over an internal channel.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::RenderConfig;
use crate::engine::{EngineError, EngineFactory};
use crate::error::RenderError;
use crate::job::JobSpec;
use crate::pool::session::Session;
use crate::pool::sessions::{PoolStats, SessionPool};
use crate::render::pipeline;

/// Terminal outcome of one job: payload or typed error, delivered exactly
/// once.
pub type JobResult = std::result::Result<Bytes, RenderError>;

enum Command {
    Enqueue {
        spec: JobSpec,
        done: oneshot::Sender<JobResult>,
        admitted: oneshot::Sender<std::result::Result<(), RenderError>>,
    },
    Stats {
        reply: oneshot::Sender<PoolStats>,
    },
}

struct Finished {
    session: Session,
    done: oneshot::Sender<JobResult>,
    result: JobResult,
}

struct PendingJob {
    spec: JobSpec,
    done: oneshot::Sender<JobResult>,
}

/// Cloneable handle for submitting jobs and reading stats.
#[derive(Clone)]
pub struct PoolHandle {
    commands: mpsc::Sender<Command>,
}

impl PoolHandle {
    /// Append a job to the FIFO queue. Fails fast with
    /// [`RenderError::Backpressure`] when the queue is full, or
    /// [`RenderError::Draining`] once shutdown has begun. On admission the
    /// returned receiver resolves exactly once with the job's terminal
    /// outcome.
    pub async fn enqueue(
        &self,
        spec: JobSpec,
    ) -> std::result::Result<oneshot::Receiver<JobResult>, RenderError> {
        let (done_tx, done_rx) = oneshot::channel();
        let (admitted_tx, admitted_rx) = oneshot::channel();
        self.commands
            .send(Command::Enqueue {
                spec,
                done: done_tx,
                admitted: admitted_tx,
            })
            .await
            .map_err(|_| RenderError::Draining)?;
        admitted_rx.await.map_err(|_| RenderError::Draining)??;
        Ok(done_rx)
    }

    /// Enqueue and wait for the terminal outcome.
    pub async fn render(&self, spec: JobSpec) -> JobResult {
        let done = self.enqueue(spec).await?;
        done.await.map_err(|_| RenderError::Draining)?
    }

    /// Snapshot of pool utilization and aggregate counters.
    pub async fn stats(&self) -> std::result::Result<PoolStats, RenderError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Stats { reply: tx })
            .await
            .map_err(|_| RenderError::Draining)?;
        rx.await.map_err(|_| RenderError::Draining)
    }
}

enum Event {
    Command(Option<Command>),
    Finished(Finished),
    RefillDue,
    Shutdown,
}

/// The pool's event loop. Built with [`Dispatcher::spawn`], which also
/// creates all sessions up front.
pub struct Dispatcher {
    config: RenderConfig,
    pool: SessionPool,
    queue: VecDeque<PendingJob>,
    commands: mpsc::Receiver<Command>,
    finished_tx: mpsc::Sender<Finished>,
    finished_rx: mpsc::Receiver<Finished>,
    maintenance_tx: mpsc::Sender<()>,
    maintenance_rx: mpsc::Receiver<()>,
    shutdown: CancellationToken,
    active: usize,
    refill_scheduled: bool,
}

impl Dispatcher {
    /// Create the session pool and start the dispatch loop.
    ///
    /// The returned join handle resolves once shutdown has drained every
    /// queued and in-flight job and disposed all sessions.
    pub async fn spawn(
        config: RenderConfig,
        factory: Arc<dyn EngineFactory>,
        shutdown: CancellationToken,
    ) -> std::result::Result<(PoolHandle, JoinHandle<()>), EngineError> {
        let pool = SessionPool::new(factory, config.pool_size).await?;
        let (command_tx, command_rx) = mpsc::channel(config.queue_limit.max(1) + 16);
        let (finished_tx, finished_rx) = mpsc::channel(config.pool_size.max(1));
        let (maintenance_tx, maintenance_rx) = mpsc::channel(1);

        let dispatcher = Self {
            config,
            pool,
            queue: VecDeque::new(),
            commands: command_rx,
            finished_tx,
            finished_rx,
            maintenance_tx,
            maintenance_rx,
            shutdown,
            active: 0,
            refill_scheduled: false,
        };
        let handle = tokio::spawn(dispatcher.run());
        Ok((PoolHandle { commands: command_tx }, handle))
    }

    async fn run(mut self) {
        let mut draining = false;
        let mut commands_closed = false;

        loop {
            if draining && self.active == 0 && self.queue.is_empty() {
                break;
            }

            let event = tokio::select! {
                _ = self.shutdown.cancelled(), if !draining => Event::Shutdown,
                cmd = self.commands.recv(), if !commands_closed => Event::Command(cmd),
                Some(fin) = self.finished_rx.recv() => Event::Finished(fin),
                Some(()) = self.maintenance_rx.recv() => Event::RefillDue,
            };

            match event {
                Event::Shutdown => {
                    draining = true;
                    tracing::info!(
                        queued = self.queue.len(),
                        active = self.active,
                        "draining render pool"
                    );
                }
                Event::Command(None) => {
                    commands_closed = true;
                    draining = true;
                }
                Event::Command(Some(Command::Enqueue {
                    spec,
                    done,
                    admitted,
                })) => self.handle_enqueue(draining, spec, done, admitted),
                Event::Command(Some(Command::Stats { reply })) => {
                    let _ = reply.send(self.pool.stats(self.queue.len()));
                }
                Event::Finished(fin) => self.handle_finished(fin).await,
                Event::RefillDue => {
                    self.refill_scheduled = false;
                    self.pool.refill().await;
                    self.dispatch_ready();
                    self.schedule_refill_if_stalled();
                }
            }
        }

        self.pool.close_all();
        tracing::info!("render pool stopped");
    }

    fn handle_enqueue(
        &mut self,
        draining: bool,
        spec: JobSpec,
        done: oneshot::Sender<JobResult>,
        admitted: oneshot::Sender<std::result::Result<(), RenderError>>,
    ) {
        if draining {
            let _ = admitted.send(Err(RenderError::Draining));
            return;
        }
        if self.queue.len() >= self.config.queue_limit {
            tracing::warn!(job_id = %spec.id, queued = self.queue.len(), "render queue full");
            let _ = admitted.send(Err(RenderError::Backpressure(self.queue.len())));
            return;
        }
        let _ = admitted.send(Ok(()));
        tracing::debug!(
            job_id = %spec.id,
            kind = %spec.kind,
            queued = self.queue.len() + 1,
            "job enqueued"
        );
        self.queue.push_back(PendingJob { spec, done });
        self.dispatch_ready();
    }

    /// Bind queued jobs to idle sessions, oldest job first. Called on
    /// enqueue and on every session release; those are the only dispatch
    /// triggers.
    fn dispatch_ready(&mut self) {
        while !self.queue.is_empty() {
            let Some(mut session) = self.pool.acquire() else {
                break;
            };
            let PendingJob { spec, done } = self
                .queue
                .pop_front()
                .expect("queue checked non-empty above");
            self.active += 1;
            tracing::debug!(job_id = %spec.id, session_id = %session.id, "job bound to session");

            let config = self.config.clone();
            let finished = self.finished_tx.clone();
            tokio::spawn(async move {
                let result = pipeline::run(&mut session, &spec, &config).await;
                if finished
                    .send(Finished {
                        session,
                        done,
                        result,
                    })
                    .await
                    .is_err()
                {
                    tracing::error!(job_id = %spec.id, "dispatcher gone before job completion");
                }
            });
        }
    }

    async fn handle_finished(&mut self, fin: Finished) {
        self.active -= 1;
        self.pool.record_outcome(fin.result.is_ok());
        // Release the session before resolving the caller, so a completion
        // observer always sees the freed slot.
        self.pool.release(fin.session).await;
        let _ = fin.done.send(fin.result);
        self.dispatch_ready();
        self.schedule_refill_if_stalled();
    }

    /// A failed replacement is normally retried on the next release. With no
    /// session checked out there is no next release, so arm a timed retry;
    /// without it queued jobs would sit forever and drain could not finish.
    fn schedule_refill_if_stalled(&mut self) {
        if self.refill_scheduled || !self.pool.needs_refill() || self.pool.busy_count() > 0 {
            return;
        }
        self.refill_scheduled = true;
        tracing::warn!(
            idle = self.pool.idle_count(),
            delay_ms = self.config.refill_retry_delay.as_millis() as u64,
            "no live session to trigger replacement, scheduling retry"
        );
        let tx = self.maintenance_tx.clone();
        let delay = self.config.refill_retry_delay;
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(()).await;
        });
    }
}
