//! The narrow boundary between the pool and the rendering engine.
//!
//! The pool drives each session through this capability set and nothing
//! else: navigate, search for text, convert to PDF, resize and capture.
//! Engine internals (DOM, paint, encoding) stay behind the trait.
//!
//! [`chrome`] adapts a headless Chromium over this boundary; [`mock`] is a
//! scriptable engine for tests.

pub mod chrome;
pub mod mock;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::job::{ClipRect, PageSize};

/// Failure reported by an engine operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine process or session is gone. The session must be disposed
    /// and replaced, never reused.
    #[error("engine crashed: {0}")]
    Crashed(String),

    /// The operation failed but the session is still usable.
    #[error("{0}")]
    Failed(String),
}

/// Outcome of a navigation. The engine emits exactly one of these; the
/// deadline is armed by the caller, not the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSignal {
    Finished,
    Failed(String),
    Crashed(String),
}

/// One text-search attempt against the loaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSearch {
    pub matches: u32,
    /// The engine considers this search settled; further attempts would not
    /// report more matches for the same document state.
    pub final_update: bool,
}

/// Image encoding requested from a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFormat {
    Png,
    Jpeg,
}

/// Options for the document-to-PDF conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfOptions {
    pub page_size: PageSize,
    /// 0 = engine default, 1 = none, 2 = minimum.
    pub margins_mode: u8,
    pub landscape: bool,
    pub print_background: bool,
}

/// One rendering session. Exclusively owned by its pool slot or by the job
/// it is bound to; operations take `&mut self` so no two jobs can interleave
/// on the same session.
#[async_trait]
pub trait EngineSession: Send {
    /// Begin loading `target`, resolving with exactly one load signal.
    async fn navigate(&mut self, target: &str, extra_headers: &str) -> LoadSignal;

    /// Search the current document for `query`.
    async fn search_text(&mut self, query: &str) -> Result<TextSearch, EngineError>;

    /// Cancel an in-progress search state.
    async fn stop_search(&mut self);

    /// Remove print-media stylesheets from the document. Best effort; errors
    /// are swallowed by the implementation.
    async fn strip_print_media(&mut self);

    /// Convert the loaded document to PDF bytes.
    async fn print_to_pdf(&mut self, options: &PdfOptions) -> Result<Bytes, EngineError>;

    /// Resize the rendering viewport.
    async fn resize_viewport(&mut self, width: u32, height: u32) -> Result<(), EngineError>;

    /// Capture the viewport (optionally a sub-rectangle) and encode it.
    ///
    /// Capture and encoding are one operation here: the underlying protocol
    /// returns encoded bytes in a single call, so splitting them would force
    /// a pointless decode/re-encode.
    async fn capture(
        &mut self,
        format: CaptureFormat,
        quality: u8,
        clip: Option<ClipRect>,
    ) -> Result<Bytes, EngineError>;
}

/// Builds engine sessions, at pool construction and when replacing a crashed
/// one.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn EngineSession>, EngineError>;
}
