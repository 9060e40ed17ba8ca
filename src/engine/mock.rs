//! Scriptable in-memory engine for tests.
//!
//! Each behavior script is a queue of canned responses per operation; when a
//! queue runs dry the session falls back to a benign default (successful
//! load, one final match, non-blank payloads). Every call is recorded so
//! tests can assert on attempt counts and forwarded options.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Semaphore;

use crate::job::ClipRect;

use super::{CaptureFormat, EngineError, EngineFactory, EngineSession, LoadSignal, PdfOptions, TextSearch};

/// Payload the mock returns for successful PDF conversions.
pub const MOCK_PDF: &[u8] = b"%PDF-1.4 mock render payload\n%mock\n";
/// Payload the mock returns for successful captures.
pub const MOCK_IMAGE: &[u8] = b"\x89PNG mock capture payload";

/// Scripted outcome of one `navigate` call.
#[derive(Clone)]
pub enum MockLoad {
    Finished,
    Failed(String),
    Crashed(String),
    /// Never resolves; exercises the timeout supervisor.
    Hang,
    /// Resolves once a permit is added to the semaphore; lets tests control
    /// dispatch order.
    Blocked(Arc<Semaphore>),
}

/// Canned responses for one session, consumed front to back.
#[derive(Clone, Default)]
pub struct MockBehavior {
    pub navigate: VecDeque<MockLoad>,
    pub search: VecDeque<Result<TextSearch, EngineError>>,
    pub pdf: VecDeque<Result<Bytes, EngineError>>,
    pub capture: VecDeque<Result<Bytes, EngineError>>,
}

impl MockBehavior {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(mut self, outcome: MockLoad) -> Self {
        self.navigate.push_back(outcome);
        self
    }

    pub fn search_result(mut self, matches: u32, final_update: bool) -> Self {
        self.search.push_back(Ok(TextSearch {
            matches,
            final_update,
        }));
        self
    }

    pub fn pdf_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.pdf.push_back(Ok(payload.into()));
        self
    }

    pub fn pdf_error(mut self, error: EngineError) -> Self {
        self.pdf.push_back(Err(error));
        self
    }

    pub fn capture_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.capture.push_back(Ok(payload.into()));
        self
    }

    pub fn capture_error(mut self, error: EngineError) -> Self {
        self.capture.push_back(Err(error));
        self
    }
}

/// Everything the mock sessions were asked to do, shared across all sessions
/// a factory creates.
#[derive(Debug, Default)]
pub struct Recording {
    pub navigations: Vec<String>,
    pub searches: Vec<String>,
    pub pdf_options: Vec<PdfOptions>,
    pub resizes: Vec<(u32, u32)>,
    pub captures: Vec<(CaptureFormat, u8, Option<ClipRect>)>,
    pub strip_calls: usize,
    pub stop_search_calls: usize,
}

/// Hands out [`MockSession`]s: scripted behaviors first, then clones of the
/// fallback behavior.
pub struct MockEngineFactory {
    scripts: Mutex<VecDeque<MockBehavior>>,
    fallback: MockBehavior,
    recording: Arc<Mutex<Recording>>,
    created: AtomicUsize,
    failing: AtomicUsize,
}

impl MockEngineFactory {
    pub fn new() -> Self {
        Self::with_fallback(MockBehavior::default())
    }

    pub fn with_fallback(fallback: MockBehavior) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            fallback,
            recording: Arc::new(Mutex::new(Recording::default())),
            created: AtomicUsize::new(0),
            failing: AtomicUsize::new(0),
        }
    }

    /// Queue a behavior for the next session the factory creates.
    pub fn push_session(&self, behavior: MockBehavior) {
        self.scripts
            .lock()
            .expect("mock scripts poisoned")
            .push_back(behavior);
    }

    pub fn recording(&self) -> Arc<Mutex<Recording>> {
        self.recording.clone()
    }

    /// Make the next `n` create calls fail, simulating an engine that cannot
    /// be launched.
    pub fn fail_next_creates(&self, n: usize) {
        self.failing.store(n, Ordering::SeqCst);
    }

    /// Number of sessions created so far, replacements included.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl Default for MockEngineFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineFactory for MockEngineFactory {
    async fn create(&self) -> Result<Box<dyn EngineSession>, EngineError> {
        if self
            .failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(EngineError::Failed("engine launch unavailable".into()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .scripts
            .lock()
            .expect("mock scripts poisoned")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(Box::new(MockSession {
            behavior,
            recording: self.recording.clone(),
        }))
    }
}

pub struct MockSession {
    behavior: MockBehavior,
    recording: Arc<Mutex<Recording>>,
}

impl MockSession {
    fn record<R>(&self, f: impl FnOnce(&mut Recording) -> R) -> R {
        f(&mut self.recording.lock().expect("mock recording poisoned"))
    }
}

#[async_trait]
impl EngineSession for MockSession {
    async fn navigate(&mut self, target: &str, _extra_headers: &str) -> LoadSignal {
        self.record(|r| r.navigations.push(target.to_string()));
        match self.behavior.navigate.pop_front() {
            None | Some(MockLoad::Finished) => LoadSignal::Finished,
            Some(MockLoad::Failed(msg)) => LoadSignal::Failed(msg),
            Some(MockLoad::Crashed(msg)) => LoadSignal::Crashed(msg),
            Some(MockLoad::Hang) => std::future::pending().await,
            Some(MockLoad::Blocked(gate)) => {
                let permit = gate.acquire().await.expect("gate semaphore closed");
                permit.forget();
                LoadSignal::Finished
            }
        }
    }

    async fn search_text(&mut self, query: &str) -> Result<TextSearch, EngineError> {
        self.record(|r| r.searches.push(query.to_string()));
        self.behavior.search.pop_front().unwrap_or(Ok(TextSearch {
            matches: 1,
            final_update: true,
        }))
    }

    async fn stop_search(&mut self) {
        self.record(|r| r.stop_search_calls += 1);
    }

    async fn strip_print_media(&mut self) {
        self.record(|r| r.strip_calls += 1);
    }

    async fn print_to_pdf(&mut self, options: &PdfOptions) -> Result<Bytes, EngineError> {
        self.record(|r| r.pdf_options.push(options.clone()));
        self.behavior
            .pdf
            .pop_front()
            .unwrap_or_else(|| Ok(Bytes::from_static(MOCK_PDF)))
    }

    async fn resize_viewport(&mut self, width: u32, height: u32) -> Result<(), EngineError> {
        self.record(|r| r.resizes.push((width, height)));
        Ok(())
    }

    async fn capture(
        &mut self,
        format: CaptureFormat,
        quality: u8,
        clip: Option<ClipRect>,
    ) -> Result<Bytes, EngineError> {
        self.record(|r| r.captures.push((format, quality, clip)));
        self.behavior
            .capture
            .pop_front()
            .unwrap_or_else(|| Ok(Bytes::from_static(MOCK_IMAGE)))
    }
}
