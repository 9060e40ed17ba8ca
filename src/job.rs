use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Output format of a render job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Pdf,
    Png,
    Jpeg,
}

impl OutputKind {
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputKind::Pdf => "application/pdf",
            OutputKind::Png => "image/png",
            OutputKind::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputKind::Pdf => "pdf",
            OutputKind::Png => "png",
            OutputKind::Jpeg => "jpeg",
        }
    }
}

impl std::fmt::Display for OutputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// What the session navigates to: a remote URL or a file holding posted HTML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSource {
    Url(String),
    File(PathBuf),
}

impl JobSource {
    /// Navigation target handed to the engine.
    pub fn target(&self) -> String {
        match self {
            JobSource::Url(url) => url.clone(),
            JobSource::File(path) => format!("file://{}", path.display()),
        }
    }
}

/// PDF page size: a named preset or explicit dimensions in microns.
///
/// The `WxH` micron syntax from the request surface is normalized into
/// [`PageSize::Custom`] here so the capture step always hands the engine an
/// explicit pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSize {
    Preset(String),
    Custom { width_microns: u32, height_microns: u32 },
}

impl PageSize {
    pub const PRESETS: [&'static str; 6] = ["A3", "A4", "A5", "Legal", "Letter", "Tabloid"];

    /// Parse a page-size parameter. `"600x800"` becomes explicit microns,
    /// anything else is kept as a preset name.
    pub fn parse(raw: &str) -> Self {
        if let Some((w, h)) = raw.split_once('x') {
            if let (Ok(width), Ok(height)) = (w.parse::<u32>(), h.parse::<u32>()) {
                return PageSize::Custom {
                    width_microns: width,
                    height_microns: height,
                };
            }
        }
        PageSize::Preset(raw.to_string())
    }

    /// Whether the raw parameter is an accepted preset or `WxH` pair.
    pub fn is_valid(raw: &str) -> bool {
        matches!(PageSize::parse(raw), PageSize::Custom { .. })
            || Self::PRESETS.contains(&raw)
    }
}

impl Default for PageSize {
    fn default() -> Self {
        PageSize::Preset("A4".to_string())
    }
}

/// Sub-region of the viewport to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Per-job render options, defaults matching the request surface.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub page_size: PageSize,
    /// 0 = engine default, 1 = none, 2 = minimum.
    pub margins_mode: u8,
    pub landscape: bool,
    pub print_background: bool,
    /// Strip `<link media="print">` stylesheets before PDF capture.
    pub remove_print_media: bool,
    /// JPEG quality, 0-100.
    pub quality: u8,
    pub browser_width: u32,
    pub browser_height: u32,
    pub clip: Option<ClipRect>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            page_size: PageSize::default(),
            margins_mode: 0,
            landscape: false,
            print_background: true,
            remove_print_media: false,
            quality: 80,
            browser_width: 1024,
            browser_height: 768,
            clip: None,
        }
    }
}

/// One render request moving through the pipeline.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: Uuid,
    pub kind: OutputKind,
    pub source: JobSource,
    pub options: RenderOptions,
    /// Poll for this text before capturing.
    pub wait_for_text: Option<String>,
    /// Fixed wait between load completion and capture.
    pub delay: Duration,
    pub submitted_at: DateTime<Utc>,
}

impl JobSpec {
    pub fn new(kind: OutputKind, source: JobSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            source,
            options: RenderOptions::default(),
            wait_for_text: None,
            delay: Duration::ZERO,
            submitted_at: Utc::now(),
        }
    }

    pub fn with_options(mut self, options: RenderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_wait_for_text(mut self, text: impl Into<String>) -> Self {
        self.wait_for_text = Some(text.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// State of a job inside the pipeline. Transitions are monotonic; once
/// dispatched a job never returns to `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Loading,
    Waiting,
    Rendering,
    Validating,
    Done,
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Loading => write!(f, "loading"),
            JobState::Waiting => write!(f, "waiting"),
            JobState::Rendering => write!(f, "rendering"),
            JobState::Validating => write!(f, "validating"),
            JobState::Done => write!(f, "done"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}
