//! Per-job render state machine.
//!
//! Drives one bound session through loading, the optional wait phase, and the
//! output-kind-specific capture, with the deadline raced against navigation
//! and the two bounded retry loops from [`super::retry`]. The caller (the
//! dispatcher) releases the session and resolves the completion channel with
//! whatever this returns.

use bytes::Bytes;
use chrono::Utc;
use tokio::time::{sleep, sleep_until, Duration, Instant};
use uuid::Uuid;

use crate::config::RenderConfig;
use crate::engine::{CaptureFormat, EngineError, LoadSignal, PdfOptions};
use crate::error::{RenderError, Result};
use crate::job::{JobSpec, JobState, OutputKind, PageSize};
use crate::pool::Session;
use crate::render::retry::{BlankRenderPolicy, TextWaitPolicy};

/// Leading region of a PDF payload ignored by the blank-render comparison;
/// it holds the non-deterministic ModDate.
pub const BLANK_MOD_DATE_SKIP: usize = 150;

/// Blank-render heuristic: byte-for-byte equality with the reference payload
/// past the ModDate region.
fn is_blank_render(payload: &[u8], reference: &[u8]) -> bool {
    match (
        payload.get(BLANK_MOD_DATE_SKIP..),
        reference.get(BLANK_MOD_DATE_SKIP..),
    ) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

struct JobRun {
    id: Uuid,
    state: JobState,
}

impl JobRun {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            state: JobState::Queued,
        }
    }

    fn advance(&mut self, next: JobState) {
        tracing::debug!(job_id = %self.id, from = %self.state, to = %next, "job state");
        self.state = next;
    }

    fn fail(&mut self, error: RenderError) -> RenderError {
        self.advance(JobState::Failed);
        tracing::info!(job_id = %self.id, kind = error.kind(), error = %error, "job failed");
        error
    }
}

/// Run one job on its bound session. On `Err(RenderError::Crash)` the
/// session has been flagged crashed and must be disposed by the pool.
pub async fn run(session: &mut Session, spec: &JobSpec, config: &RenderConfig) -> Result<Bytes> {
    let mut job = JobRun::new(spec.id);

    // Deadline is absolute: submission time plus the configured timeout, so
    // time spent queued counts against the job.
    let elapsed = Utc::now()
        .signed_duration_since(spec.submitted_at)
        .to_std()
        .unwrap_or_default();
    let remaining = config.job_timeout.saturating_sub(elapsed);
    let deadline = Instant::now() + remaining;

    job.advance(JobState::Loading);
    let target = spec.source.target();
    let signal = tokio::select! {
        signal = session.engine_mut().navigate(&target, &config.extra_headers) => signal,
        _ = sleep_until(deadline) => {
            return Err(job.fail(RenderError::Timeout(config.job_timeout.as_secs())));
        }
    };
    match signal {
        LoadSignal::Finished => {}
        LoadSignal::Failed(msg) => return Err(job.fail(RenderError::Load(msg))),
        LoadSignal::Crashed(msg) => {
            session.mark_crashed();
            return Err(job.fail(RenderError::Crash(msg)));
        }
    }

    // Wait phase: a fixed delay takes priority over text polling.
    if spec.delay > Duration::ZERO {
        job.advance(JobState::Waiting);
        tracing::debug!(job_id = %job.id, delay_ms = spec.delay.as_millis() as u64, "delaying capture");
        sleep(spec.delay).await;
    } else if let Some(text) = &spec.wait_for_text {
        job.advance(JobState::Waiting);
        wait_for_text(session, &mut job, text, config, deadline).await?;
    }

    match spec.kind {
        OutputKind::Pdf => render_pdf(session, &mut job, spec, config).await,
        OutputKind::Png | OutputKind::Jpeg => render_image(session, &mut job, spec, config).await,
    }
}

/// Poll the document for `text`: first attempt immediate, then fixed-spacing
/// retries until the budget is exhausted.
///
/// A miss charges one attempt; a positive result that has not settled yet is
/// free, the next update may make it final. Those free polls are bounded by
/// the job deadline instead.
async fn wait_for_text(
    session: &mut Session,
    job: &mut JobRun,
    text: &str,
    config: &RenderConfig,
    deadline: Instant,
) -> Result<()> {
    let policy = TextWaitPolicy::from_config(config);
    tracing::debug!(job_id = %job.id, text, attempts = policy.attempts(), "waiting for text");

    let mut attempts_used = 0;
    loop {
        match session.engine_mut().search_text(text).await {
            Ok(result) if result.matches > 0 && result.final_update => {
                session.engine_mut().stop_search().await;
                tracing::debug!(
                    job_id = %job.id,
                    matches = result.matches,
                    retries_used = attempts_used,
                    "text found"
                );
                return Ok(());
            }
            // Matches are appearing but the search has not settled.
            Ok(result) if result.matches > 0 => {}
            Ok(_) => attempts_used += 1,
            Err(EngineError::Crashed(msg)) => {
                session.mark_crashed();
                return Err(job.fail(RenderError::Crash(msg)));
            }
            Err(EngineError::Failed(msg)) => {
                tracing::debug!(job_id = %job.id, error = %msg, "text search attempt failed");
                attempts_used += 1;
            }
        }
        if attempts_used >= policy.attempts() || Instant::now() >= deadline {
            return Err(job.fail(RenderError::TextNotFound(text.to_string())));
        }
        sleep(policy.next_delay()).await;
    }
}

async fn render_pdf(
    session: &mut Session,
    job: &mut JobRun,
    spec: &JobSpec,
    config: &RenderConfig,
) -> Result<Bytes> {
    job.advance(JobState::Rendering);

    if spec.options.remove_print_media {
        // Best effort; the engine swallows failures.
        session.engine_mut().strip_print_media().await;
    }

    // Normalize a `WxH` preset into an explicit micron pair before asking
    // the engine for output.
    let page_size = match &spec.options.page_size {
        PageSize::Preset(raw) => PageSize::parse(raw),
        custom => custom.clone(),
    };
    let options = PdfOptions {
        page_size,
        margins_mode: spec.options.margins_mode,
        landscape: spec.options.landscape,
        print_background: spec.options.print_background,
    };

    let policy = BlankRenderPolicy::from_config(config);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let payload = match session.engine_mut().print_to_pdf(&options).await {
            Ok(payload) => payload,
            Err(EngineError::Crashed(msg)) => {
                session.mark_crashed();
                return Err(job.fail(RenderError::Crash(msg)));
            }
            Err(EngineError::Failed(msg)) => {
                return Err(job.fail(RenderError::RenderFailure(msg)));
            }
        };

        job.advance(JobState::Validating);
        let blank = config
            .blank_reference
            .as_ref()
            .is_some_and(|reference| is_blank_render(&payload, reference));
        if !blank {
            job.advance(JobState::Done);
            return Ok(payload);
        }
        if attempt >= policy.attempts() {
            return Err(job.fail(RenderError::RenderFailure(format!(
                "blank output after {attempt} attempts"
            ))));
        }
        tracing::warn!(job_id = %job.id, attempt, "blank pdf output, retrying");
        sleep(policy.delay()).await;
        job.advance(JobState::Rendering);
    }
}

async fn render_image(
    session: &mut Session,
    job: &mut JobRun,
    spec: &JobSpec,
    config: &RenderConfig,
) -> Result<Bytes> {
    job.advance(JobState::Rendering);
    let options = &spec.options;

    // Extend the viewport by the clip offset so capturing a sub-region does
    // not stretch the page.
    let (width, height) = match options.clip {
        Some(clip) => (
            options.browser_width + clip.x,
            options.browser_height + clip.y,
        ),
        None => (options.browser_width, options.browser_height),
    };
    match session.engine_mut().resize_viewport(width, height).await {
        Ok(()) => {}
        Err(EngineError::Crashed(msg)) => {
            session.mark_crashed();
            return Err(job.fail(RenderError::Crash(msg)));
        }
        Err(EngineError::Failed(msg)) => return Err(job.fail(RenderError::Capture(msg))),
    }

    // Give layout a moment to settle at the new size.
    sleep(config.settle_delay).await;

    let format = match spec.kind {
        OutputKind::Png => CaptureFormat::Png,
        OutputKind::Jpeg => CaptureFormat::Jpeg,
        OutputKind::Pdf => unreachable!("image path only handles png/jpeg"),
    };
    match session
        .engine_mut()
        .capture(format, options.quality, options.clip)
        .await
    {
        Ok(payload) => {
            job.advance(JobState::Done);
            Ok(payload)
        }
        Err(EngineError::Crashed(msg)) => {
            session.mark_crashed();
            Err(job.fail(RenderError::Crash(msg)))
        }
        Err(EngineError::Failed(msg)) => Err(job.fail(RenderError::Capture(msg))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_detection_ignores_mod_date_region() {
        let mut reference = vec![0u8; 400];
        for (i, byte) in reference.iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        // Same tail, different head: still blank.
        let mut payload = reference.clone();
        payload[10] = 0xFF;
        payload[149] = 0xAA;
        assert!(is_blank_render(&payload, &reference));

        // A difference past the skip region means real content.
        let mut real = reference.clone();
        real[200] = 0xFF;
        assert!(!is_blank_render(&real, &reference));
    }

    #[test]
    fn short_payloads_are_never_blank() {
        let reference = vec![1u8; 400];
        assert!(!is_blank_render(&[0u8; 100], &reference));
        assert!(!is_blank_render(&[], &reference));
        assert!(!is_blank_render(&reference, &[0u8; 100]));
    }

    #[test]
    fn payload_differing_only_in_length_is_not_blank() {
        let reference = vec![7u8; 400];
        let longer = vec![7u8; 401];
        assert!(!is_blank_render(&longer, &reference));
    }
}
