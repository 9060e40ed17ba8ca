//! HTTP surface tests driving the router directly with tower, the pool
//! backed by the scriptable mock engine.

mod test_harness;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::util::ServiceExt;

use renderd::config::ServerConfig;
use renderd::engine::mock::{MockEngineFactory, MOCK_IMAGE, MOCK_PDF};
use renderd::server::AppState;

use test_harness::{spawn_pool, test_config, TestPool};

async fn test_app(server: ServerConfig) -> (Router, TestPool) {
    let config = test_config(1);
    let pool = spawn_pool(config.clone(), Arc::new(MockEngineFactory::new())).await;
    let state = AppState::new(pool.handle.clone(), server, config);
    (renderd::server::router(state), pool)
}

async fn open_app() -> (Router, TestPool) {
    test_app(ServerConfig::default()).await
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request builds")
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body reads");
    serde_json::from_slice(&bytes).expect("body is json")
}

#[tokio::test]
async fn usage_page_lists_routes() {
    let (app, _pool) = open_app().await;
    let response = app.oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("/pdf"));
    assert!(text.contains("/stats"));
}

#[tokio::test]
async fn pdf_get_renders_url() {
    let (app, pool) = open_app().await;
    let response = app
        .oneshot(get("/pdf?url=http://example.com/page"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/pdf"
    );
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "inline; filename=\"render.pdf\""
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(bytes.as_ref(), MOCK_PDF);

    let recording = pool.factory.recording();
    let recording = recording.lock().unwrap();
    assert_eq!(recording.navigations, vec!["http://example.com/page"]);
}

#[tokio::test]
async fn missing_url_is_a_validation_error() {
    let (app, pool) = open_app().await;
    let response = app.oneshot(get("/pdf")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["input_errors"][0]["param"], "url");

    // Nothing reached the engine.
    assert!(pool.factory.recording().lock().unwrap().navigations.is_empty());
}

#[tokio::test]
async fn short_http_url_is_accepted() {
    let (app, pool) = open_app().await;
    let response = app.oneshot(get("/pdf?url=http://a")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        pool.factory.recording().lock().unwrap().navigations,
        vec!["http://a"]
    );
}

#[tokio::test]
async fn bare_scheme_url_is_rejected() {
    let (app, _pool) = open_app().await;
    let response = app.oneshot(get("/pdf?url=https://")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["input_errors"][0]["param"], "url");
}

#[tokio::test]
async fn non_http_url_is_rejected() {
    let (app, _pool) = open_app().await;
    let response = app
        .oneshot(get("/png?url=file:///etc/passwd"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["input_errors"][0]["param"], "url");
}

#[tokio::test]
async fn invalid_page_size_is_rejected() {
    let (app, pool) = open_app().await;
    let response = app
        .oneshot(get("/pdf?url=http://example.com&pageSize=Postcard"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["input_errors"][0]["param"], "pageSize");
    assert!(pool.factory.recording().lock().unwrap().navigations.is_empty());
}

#[tokio::test]
async fn quality_over_100_is_rejected() {
    let (app, _pool) = open_app().await;
    let response = app
        .oneshot(get("/jpeg?url=http://example.com&quality=150"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["input_errors"][0]["param"], "quality");
}

#[tokio::test]
async fn posted_html_renders_from_temp_file() {
    let (app, pool) = open_app().await;
    let response = app
        .oneshot(post("/pdf", "<html><body>hello</body></html>"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let recording = pool.factory.recording();
    let recording = recording.lock().unwrap();
    let target = &recording.navigations[0];
    assert!(target.starts_with("file://"), "got {target}");
    assert!(target.ends_with(".html"), "got {target}");
}

#[tokio::test]
async fn empty_post_body_is_rejected() {
    let (app, _pool) = open_app().await;
    let response = app.oneshot(post("/pdf", "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["input_errors"][0]["param"], "body");
}

#[tokio::test]
async fn clipping_rect_extends_viewport() {
    let (app, pool) = open_app().await;
    let rect = "%7B%22x%22%3A10%2C%22y%22%3A20%2C%22width%22%3A100%2C%22height%22%3A50%7D";
    let uri = format!(
        "/png?url=http://example.com&browserWidth=200&browserHeight=200&clippingRect={rect}"
    );
    let response = app.oneshot(get(&uri)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(bytes.as_ref(), MOCK_IMAGE);

    let recording = pool.factory.recording();
    let recording = recording.lock().unwrap();
    assert_eq!(recording.resizes, vec![(210, 220)]);
    let (_, _, clip) = recording.captures[0];
    let clip = clip.expect("clip forwarded");
    assert_eq!((clip.x, clip.y, clip.width, clip.height), (10, 20, 100, 50));
}

#[tokio::test]
async fn oversized_dimensions_are_capped() {
    let (app, pool) = open_app().await;
    let response = app
        .oneshot(get(
            "/png?url=http://example.com&browserWidth=5000&browserHeight=4000",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        pool.factory.recording().lock().unwrap().resizes,
        vec![(3000, 3000)]
    );
}

#[tokio::test]
async fn missing_key_is_forbidden_when_keys_configured() {
    let (app, pool) = test_app(ServerConfig::default().with_keys("secret:global,viewer:team")).await;

    let response = app.oneshot(get("/pdf?url=http://example.com")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(pool.factory.recording().lock().unwrap().navigations.is_empty());
}

#[tokio::test]
async fn bearer_key_authorizes_render() {
    let (app, _pool) = test_app(ServerConfig::default().with_keys("secret:global,viewer:team")).await;

    let request = Request::builder()
        .uri("/pdf?url=http://example.com")
        .header(header::AUTHORIZATION, "Bearer viewer")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn stats_require_the_global_label() {
    let server = ServerConfig::default().with_keys("secret:global,viewer:team");

    let (app, _pool) = test_app(server.clone()).await;
    let response = app
        .oneshot(get("/stats?access_key=viewer"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let (app, _pool) = test_app(server).await;
    let response = app
        .oneshot(get("/stats?access_key=secret"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["capacity"], 1);
    assert_eq!(body["idle"], 1);
}

#[tokio::test]
async fn stats_are_open_without_configured_keys() {
    let (app, _pool) = open_app().await;
    let response = app.oneshot(get("/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn invalid_delay_is_rejected() {
    let (app, _pool) = open_app().await;
    let response = app
        .oneshot(get("/pdf?url=http://example.com&delay=soon"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["input_errors"][0]["param"], "delay");
}
