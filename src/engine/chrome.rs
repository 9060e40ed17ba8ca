//! Headless Chromium adapter for the engine boundary.
//!
//! Thin mapping only: every operation translates one boundary call into the
//! matching DevTools request through the `headless_chrome` crate. The crate's
//! API is blocking, so calls run under `spawn_blocking` with cloned tab
//! handles.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::types::{Bounds, PrintToPdfOptions};
use headless_chrome::{Browser, LaunchOptions, Tab};

use crate::job::{ClipRect, PageSize};

use super::{CaptureFormat, EngineError, EngineFactory, EngineSession, LoadSignal, PdfOptions, TextSearch};

const MICRONS_PER_INCH: f64 = 25_400.0;

/// Browser launch settings shared by every session the factory creates.
#[derive(Debug, Clone)]
pub struct ChromeConfig {
    pub window_width: u32,
    pub window_height: u32,
    /// Upper bound on blocking navigation waits inside the adapter. The
    /// pool arms its own per-job deadline on top of this.
    pub navigation_timeout: Duration,
    pub sandbox: bool,
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            window_width: 1024,
            window_height: 768,
            navigation_timeout: Duration::from_secs(60),
            sandbox: true,
        }
    }
}

/// Spawns one Chromium process per session.
pub struct ChromeEngineFactory {
    config: ChromeConfig,
}

impl ChromeEngineFactory {
    pub fn new(config: ChromeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EngineFactory for ChromeEngineFactory {
    async fn create(&self) -> Result<Box<dyn EngineSession>, EngineError> {
        let config = self.config.clone();
        let session = tokio::task::spawn_blocking(move || {
            let options = LaunchOptions::default_builder()
                .window_size(Some((config.window_width, config.window_height)))
                .sandbox(config.sandbox)
                // Sessions are reused across jobs; never reap an idle browser.
                .idle_browser_timeout(Duration::from_secs(86_400))
                .build()
                .map_err(|e| EngineError::Failed(e.to_string()))?;
            let browser = Browser::new(options).map_err(|e| EngineError::Failed(e.to_string()))?;
            let tab = browser
                .new_tab()
                .map_err(|e| EngineError::Failed(e.to_string()))?;
            tab.set_default_timeout(config.navigation_timeout);
            Ok(ChromeSession {
                _browser: browser,
                tab,
            })
        })
        .await
        .map_err(|e| EngineError::Failed(format!("launch task failed: {e}")))??;

        Ok(Box::new(session))
    }
}

/// One browser process plus the tab jobs render in.
pub struct ChromeSession {
    // Dropping the Browser ends the Chromium process, so it is held for the
    // session's whole lifetime even though all calls go through the tab.
    _browser: Browser,
    tab: Arc<Tab>,
}

/// Classify an adapter error: a torn-down browser connection means the
/// session crashed and must be replaced, anything else leaves it usable.
fn classify(message: String) -> EngineError {
    let lower = message.to_lowercase();
    if lower.contains("closed")
        || lower.contains("disconnect")
        || lower.contains("crash")
        || lower.contains("connection")
    {
        EngineError::Crashed(message)
    } else {
        EngineError::Failed(message)
    }
}

fn parse_headers(raw: &str) -> HashMap<&str, &str> {
    raw.lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim(), value.trim()))
        .collect()
}

/// Named presets in inches, matching the sizes the request surface accepts.
fn preset_paper(name: &str) -> (f64, f64) {
    match name {
        "A3" => (11.69, 16.54),
        "A5" => (5.83, 8.27),
        "Legal" => (8.5, 14.0),
        "Letter" => (8.5, 11.0),
        "Tabloid" => (11.0, 17.0),
        // A4 and anything unrecognized.
        _ => (8.27, 11.69),
    }
}

fn pdf_options(options: &PdfOptions) -> PrintToPdfOptions {
    let (width_in, height_in) = match &options.page_size {
        PageSize::Preset(name) => preset_paper(name),
        PageSize::Custom {
            width_microns,
            height_microns,
        } => (
            f64::from(*width_microns) / MICRONS_PER_INCH,
            f64::from(*height_microns) / MICRONS_PER_INCH,
        ),
    };
    let margin = match options.margins_mode {
        1 => Some(0.0),
        2 => Some(0.1),
        _ => None,
    };
    PrintToPdfOptions {
        landscape: Some(options.landscape),
        display_header_footer: Some(false),
        print_background: Some(options.print_background),
        paper_width: Some(width_in),
        paper_height: Some(height_in),
        margin_top: margin,
        margin_bottom: margin,
        margin_left: margin,
        margin_right: margin,
        ..Default::default()
    }
}

impl ChromeSession {
    async fn run_blocking<T, F>(&self, op: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Tab>) -> Result<T, String> + Send + 'static,
    {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || op(tab))
            .await
            .map_err(|e| EngineError::Failed(format!("engine task failed: {e}")))?
            .map_err(classify)
    }
}

#[async_trait]
impl EngineSession for ChromeSession {
    async fn navigate(&mut self, target: &str, extra_headers: &str) -> LoadSignal {
        let target = target.to_string();
        let extra_headers = extra_headers.to_string();
        let result = self
            .run_blocking(move |tab| {
                tab.set_extra_http_headers(parse_headers(&extra_headers))
                    .map_err(|e| e.to_string())?;
                tab.navigate_to(&target).map_err(|e| e.to_string())?;
                tab.wait_until_navigated().map_err(|e| e.to_string())?;
                Ok(())
            })
            .await;
        match result {
            Ok(()) => LoadSignal::Finished,
            Err(EngineError::Crashed(msg)) => LoadSignal::Crashed(msg),
            Err(EngineError::Failed(msg)) => LoadSignal::Failed(msg),
        }
    }

    async fn search_text(&mut self, query: &str) -> Result<TextSearch, EngineError> {
        let quoted = serde_json::to_string(query)
            .map_err(|e| EngineError::Failed(format!("bad search query: {e}")))?;
        let expr = format!(
            "(function() {{ \
               var q = {quoted}; \
               var t = document.body ? (document.body.innerText || '') : ''; \
               var n = 0, i = 0; \
               while ((i = t.indexOf(q, i)) !== -1) {{ n += 1; i += q.length; }} \
               return n; \
             }})()"
        );
        let matches = self
            .run_blocking(move |tab| {
                let result = tab.evaluate(&expr, false).map_err(|e| e.to_string())?;
                Ok(result
                    .value
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as u32)
            })
            .await?;
        // The DOM is queried synchronously, so every attempt is final.
        Ok(TextSearch {
            matches,
            final_update: true,
        })
    }

    async fn stop_search(&mut self) {
        // Searches are one-shot DOM queries; nothing to cancel.
    }

    async fn strip_print_media(&mut self) {
        let result = self
            .run_blocking(move |tab| {
                tab.evaluate(
                    "Array.prototype.forEach.call(\
                       document.querySelectorAll('link[rel=\"stylesheet\"][media=\"print\"]'), \
                       function(s) { s.remove(); });",
                    false,
                )
                .map_err(|e| e.to_string())?;
                Ok(())
            })
            .await;
        if let Err(e) = result {
            tracing::debug!(error = %e, "failed to strip print stylesheets");
        }
    }

    async fn print_to_pdf(&mut self, options: &PdfOptions) -> Result<Bytes, EngineError> {
        let cdp_options = pdf_options(options);
        let data = self
            .run_blocking(move |tab| tab.print_to_pdf(Some(cdp_options)).map_err(|e| e.to_string()))
            .await?;
        Ok(Bytes::from(data))
    }

    async fn resize_viewport(&mut self, width: u32, height: u32) -> Result<(), EngineError> {
        self.run_blocking(move |tab| {
            tab.set_bounds(Bounds::Normal {
                left: None,
                top: None,
                width: Some(f64::from(width)),
                height: Some(f64::from(height)),
            })
            .map_err(|e| e.to_string())?;
            Ok(())
        })
        .await
    }

    async fn capture(
        &mut self,
        format: CaptureFormat,
        quality: u8,
        clip: Option<ClipRect>,
    ) -> Result<Bytes, EngineError> {
        let (cdp_format, cdp_quality) = match format {
            CaptureFormat::Png => (Page::CaptureScreenshotFormatOption::Png, None),
            CaptureFormat::Jpeg => (
                Page::CaptureScreenshotFormatOption::Jpeg,
                Some(u32::from(quality)),
            ),
        };
        let viewport = clip.map(|rect| Page::Viewport {
            x: f64::from(rect.x),
            y: f64::from(rect.y),
            width: f64::from(rect.width),
            height: f64::from(rect.height),
            scale: 1.0,
        });
        let data = self
            .run_blocking(move |tab| {
                tab.capture_screenshot(cdp_format, cdp_quality, viewport, true)
                    .map_err(|e| e.to_string())
            })
            .await?;
        Ok(Bytes::from(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_page_size_becomes_explicit_paper_dimensions() {
        let opts = pdf_options(&PdfOptions {
            page_size: PageSize::Custom {
                width_microns: 210_000,
                height_microns: 297_000,
            },
            margins_mode: 0,
            landscape: false,
            print_background: true,
        });
        let width = opts.paper_width.unwrap();
        let height = opts.paper_height.unwrap();
        assert!((width - 8.267).abs() < 0.01);
        assert!((height - 11.693).abs() < 0.01);
        assert!(opts.margin_top.is_none());
    }

    #[test]
    fn margins_mode_none_zeroes_margins() {
        let opts = pdf_options(&PdfOptions {
            page_size: PageSize::default(),
            margins_mode: 1,
            landscape: true,
            print_background: false,
        });
        assert_eq!(opts.margin_top, Some(0.0));
        assert_eq!(opts.landscape, Some(true));
        assert_eq!(opts.print_background, Some(false));
    }

    #[test]
    fn header_lines_parse_into_pairs() {
        let headers = parse_headers("Cache-Control: no-cache, no-store\nPragma: no-cache");
        assert_eq!(headers.get("Cache-Control"), Some(&"no-cache, no-store"));
        assert_eq!(headers.get("Pragma"), Some(&"no-cache"));
    }

    #[test]
    fn torn_connection_classifies_as_crash() {
        assert!(matches!(
            classify("Unable to call method: connection is closed".to_string()),
            EngineError::Crashed(_)
        ));
        assert!(matches!(
            classify("evaluate failed: syntax error".to_string()),
            EngineError::Failed(_)
        ));
    }
}
