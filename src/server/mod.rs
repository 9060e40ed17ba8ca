//! HTTP surface in front of the render pool.
//!
//! Routes mirror the render job kinds: `GET /pdf|/png|/jpeg` renders a remote
//! URL, `POST` on the same paths renders a raw HTML body via a temporary
//! file. `/stats` exposes the pool snapshot and `/` prints usage. Validation
//! errors answer 400 with an `input_errors` payload; pipeline errors map to
//! HTTP statuses through [`RenderError::status_code`].

use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::{RenderConfig, ServerConfig};
use crate::error::RenderError;
use crate::job::{ClipRect, JobSource, JobSpec, OutputKind, PageSize, RenderOptions};
use crate::pool::PoolHandle;

#[derive(Clone)]
pub struct AppState {
    pub pool: PoolHandle,
    pub server: Arc<ServerConfig>,
    pub render: Arc<RenderConfig>,
}

impl AppState {
    pub fn new(pool: PoolHandle, server: ServerConfig, render: RenderConfig) -> Self {
        Self {
            pool,
            server: Arc::new(server),
            render: Arc::new(render),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(usage))
        .route("/stats", get(stats))
        .route("/pdf", get(get_pdf).post(post_pdf))
        .route("/png", get(get_png).post(post_png))
        .route("/jpeg", get(get_jpeg).post(post_jpeg))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the token is cancelled.
pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "render service listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

type Params = HashMap<String, String>;

async fn usage() -> impl IntoResponse {
    concat!(
        "renderd - headless render service\n\n",
        "  GET  /pdf?url=...   render a URL to PDF\n",
        "  GET  /png?url=...   render a URL to PNG\n",
        "  GET  /jpeg?url=...  render a URL to JPEG\n",
        "  POST /pdf|/png|/jpeg   render a raw HTML body\n",
        "  GET  /stats         pool utilization snapshot\n\n",
        "Options: pageSize, marginsType, printBackground, landscape,\n",
        "removePrintMedia, delay, waitForText, quality, browserWidth,\n",
        "browserHeight, clippingRect\n",
    )
}

async fn stats(
    State(state): State<AppState>,
    Query(params): Query<Params>,
    headers: HeaderMap,
) -> Response {
    let label = match authorize(&state, &headers, &params) {
        Ok(label) => label,
        Err(resp) => return resp,
    };
    if label != "global" {
        return StatusCode::FORBIDDEN.into_response();
    }
    match state.pool.stats().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => render_error(err),
    }
}

async fn get_pdf(
    State(state): State<AppState>,
    Query(params): Query<Params>,
    headers: HeaderMap,
) -> Response {
    handle_render(state, OutputKind::Pdf, params, headers, None).await
}

async fn post_pdf(
    State(state): State<AppState>,
    Query(params): Query<Params>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_render(state, OutputKind::Pdf, params, headers, Some(body)).await
}

async fn get_png(
    State(state): State<AppState>,
    Query(params): Query<Params>,
    headers: HeaderMap,
) -> Response {
    handle_render(state, OutputKind::Png, params, headers, None).await
}

async fn post_png(
    State(state): State<AppState>,
    Query(params): Query<Params>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_render(state, OutputKind::Png, params, headers, Some(body)).await
}

async fn get_jpeg(
    State(state): State<AppState>,
    Query(params): Query<Params>,
    headers: HeaderMap,
) -> Response {
    handle_render(state, OutputKind::Jpeg, params, headers, None).await
}

async fn post_jpeg(
    State(state): State<AppState>,
    Query(params): Query<Params>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_render(state, OutputKind::Jpeg, params, headers, Some(body)).await
}

async fn handle_render(
    state: AppState,
    kind: OutputKind,
    params: Params,
    headers: HeaderMap,
    body: Option<Bytes>,
) -> Response {
    let label = match authorize(&state, &headers, &params) {
        Ok(label) => label,
        Err(resp) => return resp,
    };

    // Posted HTML lands in a temp file the session loads via file://; the
    // guard deletes it once the job has resolved.
    let mut tmp_guard: Option<NamedTempFile> = None;
    let source = match body {
        Some(body) => {
            if body.is_empty() {
                return input_error("body", "Please post raw HTML");
            }
            match write_temp_html(body).await {
                Ok(file) => {
                    let source = JobSource::File(file.path().to_path_buf());
                    tmp_guard = Some(file);
                    source
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to spool posted body");
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
            }
        }
        None => match params.get("url") {
            Some(url) if is_http_url(url) => JobSource::Url(url.clone()),
            _ => return input_error("url", "Please provide url or send HTML via POST"),
        },
    };

    let spec = match build_spec(&state, kind, source, &params) {
        Ok(spec) => spec,
        Err(resp) => return resp,
    };

    tracing::info!(
        job_id = %spec.id,
        kind = %kind,
        key_label = %label,
        "render request"
    );

    let result = state.pool.render(spec).await;
    drop(tmp_guard);

    match result {
        Ok(payload) => output_response(kind, payload),
        Err(err) => render_error(err),
    }
}

/// Translate validated query parameters into a job spec.
fn build_spec(
    state: &AppState,
    kind: OutputKind,
    source: JobSource,
    params: &Params,
) -> Result<JobSpec, Response> {
    let mut options = RenderOptions {
        browser_width: state.render.window_width,
        browser_height: state.render.window_height,
        ..RenderOptions::default()
    };

    match kind {
        OutputKind::Pdf => {
            let page_size = params.get("pageSize").map(String::as_str).unwrap_or("A4");
            if !PageSize::is_valid(page_size) {
                return Err(input_error("pageSize", "Invalid value"));
            }
            options.page_size = PageSize::parse(page_size);

            let margins = parse_u32(params, "marginsType", 0)?;
            if margins > 2 {
                return Err(input_error("marginsType", "Invalid value"));
            }
            options.margins_mode = margins as u8;
            options.print_background = parse_bool(params, "printBackground", true)?;
            options.landscape = parse_bool(params, "landscape", false)?;
            options.remove_print_media = parse_bool(params, "removePrintMedia", false)?;
        }
        OutputKind::Png | OutputKind::Jpeg => {
            let quality = parse_u32(params, "quality", 80)?;
            if quality > 100 {
                return Err(input_error("quality", "Invalid value"));
            }
            options.quality = quality as u8;

            // Cap dimensions to avoid engine overload.
            let cap = state.server.max_dimension;
            options.browser_width =
                parse_u32(params, "browserWidth", state.render.window_width)?.min(cap);
            options.browser_height =
                parse_u32(params, "browserHeight", state.render.window_height)?.min(cap);

            if let Some(raw) = params.get("clippingRect") {
                let rect: ClipRect = serde_json::from_str(raw)
                    .map_err(|_| input_error("clippingRect", "Invalid value"))?;
                options.clip = Some(rect);
            }
        }
    }

    let mut spec = JobSpec::new(kind, source).with_options(options);

    let delay_secs = parse_u32(params, "delay", 0)?;
    if delay_secs > 0 {
        spec = spec.with_delay(Duration::from_secs(u64::from(delay_secs)));
    }
    if let Some(text) = params.get("waitForText") {
        if text.is_empty() {
            return Err(input_error("waitForText", "Invalid value"));
        }
        spec = spec.with_wait_for_text(text.clone());
    }
    Ok(spec)
}

fn authorize(state: &AppState, headers: &HeaderMap, params: &Params) -> Result<String, Response> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v));
    let presented = from_header.or_else(|| params.get("access_key").map(String::as_str));

    match state.server.key_label(presented) {
        Some(label) => Ok(label.to_string()),
        None => Err((
            StatusCode::FORBIDDEN,
            Json(json!({"error": "FORBIDDEN", "message": "invalid or missing access key"})),
        )
            .into_response()),
    }
}

async fn write_temp_html(body: Bytes) -> std::io::Result<NamedTempFile> {
    tokio::task::spawn_blocking(move || {
        let mut file = tempfile::Builder::new()
            .prefix("renderd-")
            .suffix(".html")
            .tempfile()?;
        file.write_all(&body)?;
        file.flush()?;
        Ok(file)
    })
    .await
    .map_err(|e| std::io::Error::other(e.to_string()))?
}

fn is_http_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    ["http://", "https://"]
        .iter()
        .any(|scheme| lower.starts_with(scheme) && url.len() > scheme.len())
}

fn output_response(kind: OutputKind, payload: bytes::Bytes) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, kind.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"render.{}\"", kind.extension()),
            ),
        ],
        payload,
    )
        .into_response()
}

fn render_error(err: RenderError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(json!({"error": err.kind(), "message": err.to_string()})),
    )
        .into_response()
}

fn input_error(param: &str, msg: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"input_errors": [{"param": param, "msg": msg}]})),
    )
        .into_response()
}

fn parse_bool(params: &Params, name: &str, default: bool) -> Result<bool, Response> {
    match params.get(name).map(String::as_str) {
        None | Some("") => Ok(default),
        Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(_) => Err(input_error(name, "Invalid value")),
    }
}

fn parse_u32(params: &Params, name: &str, default: u32) -> Result<u32, Response> {
    match params.get(name).map(String::as_str) {
        None | Some("") => Ok(default),
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| input_error(name, "Invalid value")),
    }
}
