//! End-to-end tests over a real socket.

mod common;

use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::Value;

use webapp_engine::dispatch::FilterChain;
use webapp_engine::{
    EngineConfig, Filter, Handler, InstantiatorRegistry, ServiceError, WebApplication, WebRequest,
    WebResponse,
};

const APP: &str = r#"
    [limits]
    max_body_size = 1024

    [[applications]]
    name = "shop"
    context_path = "/app"
    welcome_files = ["home"]

    [applications.session.cookie]
    max_age = 1800
    http_only = true

    [[applications.error_pages]]
    status = 404
    location = "/missing"

    [[applications.handlers]]
    name = "echo"
    class = "echo"
    patterns = ["/echo/*"]

    [[applications.handlers]]
    name = "home"
    class = "text"
    patterns = ["/home"]
    init_params = { message = "home page" }

    [[applications.handlers]]
    name = "missing"
    class = "text"
    patterns = ["/missing"]
    init_params = { message = "custom not found" }

    [[applications.handlers]]
    name = "go"
    class = "forward"
    patterns = ["/go"]
    init_params = { target = "/echo/target" }

    [[applications.handlers]]
    name = "wrap"
    class = "include"
    patterns = ["/wrap"]
    init_params = { target = "/home" }

    [[applications.handlers]]
    name = "counter"
    class = "session-counter"
    patterns = ["/count"]

    [[applications.filters]]
    name = "tag"
    class = "response-header"
    init_params = { name = "x-app", value = "shop" }

    [[applications.filters.mappings]]
    url_patterns = ["/*"]
"#;

#[tokio::test]
async fn test_direct_request_reports_paths() {
    let server = common::serve_config(APP).await;
    let response = reqwest::get(server.url("/app/echo/a/b?q=1")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-app"], "shop");
    assert!(response.headers().contains_key("x-request-id"));

    let body: Value = serde_json::from_slice(&response.bytes().await.unwrap()).unwrap();
    assert_eq!(body["context_path"], "/app");
    assert_eq!(body["servlet_path"], "/echo");
    assert_eq!(body["path_info"], "/a/b");
    assert_eq!(body["query_string"], "q=1");
    assert_eq!(body["dispatch_type"], "request");
}

#[tokio::test]
async fn test_forward_exposes_original_paths() {
    let server = common::serve_config(APP).await;
    let response = reqwest::get(server.url("/app/go?from=test")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = serde_json::from_slice(&response.bytes().await.unwrap()).unwrap();
    assert_eq!(body["dispatch_type"], "forward");
    assert_eq!(body["handler"], "echo");
    assert_eq!(body["servlet_path"], "/echo");
    assert_eq!(body["path_info"], "/target");
    assert_eq!(body["attributes"]["javax.servlet.forward.request_uri"], "/app/go");
    assert_eq!(body["attributes"]["javax.servlet.forward.servlet_path"], "/go");
    assert_eq!(body["attributes"]["javax.servlet.forward.query_string"], "from=test");
}

#[tokio::test]
async fn test_include_and_welcome_file() {
    let server = common::serve_config(APP).await;

    let response = reqwest::get(server.url("/app/wrap")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "home page");

    let response = reqwest::get(server.url("/app/")).await.unwrap();
    assert_eq!(response.text().await.unwrap(), "home page");
}

#[tokio::test]
async fn test_not_found_paths() {
    let server = common::serve_config(APP).await;

    let response = reqwest::get(server.url("/app/nothing")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.text().await.unwrap(), "custom not found");

    let response = reqwest::get(server.url("/elsewhere")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.text().await.unwrap(), "404 Not Found");
}

#[tokio::test]
async fn test_session_cookie_round_trip() {
    let server = common::serve_config(APP).await;
    let client = reqwest::Client::new();

    let first = client.get(server.url("/app/count")).send().await.unwrap();
    let set_cookie = first.headers()["set-cookie"].to_str().unwrap().to_string();
    assert!(set_cookie.starts_with("JSESSIONID="));
    assert!(set_cookie.contains("Path=/app"));
    assert!(set_cookie.contains("Max-Age=1800"));
    assert!(set_cookie.contains("HttpOnly"));
    let body: Value = serde_json::from_slice(&first.bytes().await.unwrap()).unwrap();
    assert_eq!(body["count"], 1);

    let cookie = set_cookie.split(';').next().unwrap().to_string();
    let second = client
        .get(server.url("/app/count"))
        .header("cookie", cookie)
        .send()
        .await
        .unwrap();
    assert!(second.headers().get("set-cookie").is_none());
    let body: Value = serde_json::from_slice(&second.bytes().await.unwrap()).unwrap();
    assert_eq!(body["count"], 2);

    let apps = server.engine.applications();
    assert_eq!(apps[0].sessions().active_sessions(), 1);
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let server = common::serve_config(APP).await;
    let response = reqwest::Client::new()
        .post(server.url("/app/echo/upload"))
        .body(vec![b'x'; 4096])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

/// Appends its tag to `x-trace` on the way in.
struct Trace(&'static str);

impl Filter for Trace {
    fn do_filter(
        &self,
        request: &mut WebRequest,
        response: &mut WebResponse,
        chain: &mut FilterChain,
    ) -> Result<(), ServiceError> {
        response.add_header("x-trace", self.0)?;
        chain.do_filter(request, response)
    }
}

struct Forbidden;

impl Handler for Forbidden {
    fn service(&self, _request: &mut WebRequest, _response: &mut WebResponse) -> Result<(), ServiceError> {
        Err(ServiceError::status(403, "members only"))
    }
}

struct Ok200;

impl Handler for Ok200 {
    fn service(&self, _request: &mut WebRequest, response: &mut WebResponse) -> Result<(), ServiceError> {
        response.write_str("ok");
        Ok(())
    }
}

#[tokio::test]
async fn test_filter_order_and_status_errors() {
    let app = WebApplication::new("order", "", Arc::new(InstantiatorRegistry::new()));
    app.add_handler("ok", Arc::new(Ok200) as Arc<dyn Handler>)
        .unwrap()
        .add_mapping(&["/ok"])
        .unwrap();
    app.add_handler("deny", Arc::new(Forbidden) as Arc<dyn Handler>)
        .unwrap()
        .add_mapping(&["/deny"])
        .unwrap();

    let late = app.add_filter("late", Arc::new(Trace("late")) as Arc<dyn Filter>).unwrap();
    late.add_mapping_for_url_patterns(&[], true, &["/*"]).unwrap();
    let by_name = app.add_filter("by-name", Arc::new(Trace("by-name")) as Arc<dyn Filter>).unwrap();
    by_name.add_mapping_for_handler_names(&[], false, &["ok"]).unwrap();
    let early = app.add_filter("early", Arc::new(Trace("early")) as Arc<dyn Filter>).unwrap();
    early.add_mapping_for_url_patterns(&[], false, &["/*"]).unwrap();
    app.start().unwrap();

    let engine = Arc::new(webapp_engine::ApplicationServer::new());
    engine.deploy(Arc::new(app)).unwrap();
    let server = common::serve(engine, EngineConfig::default()).await;

    let response = reqwest::get(server.url("/ok")).await.unwrap();
    let trace: Vec<&str> = response
        .headers()
        .get_all("x-trace")
        .iter()
        .map(|v| v.to_str().unwrap())
        .collect();
    assert_eq!(trace, vec!["by-name", "early", "late"]);

    let response = reqwest::get(server.url("/deny")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.text().await.unwrap(), "403 Forbidden: members only");
}

#[tokio::test]
async fn test_graceful_shutdown_stops_accepting() {
    let server = common::serve_config(APP).await;
    assert_eq!(
        reqwest::get(server.url("/app/home")).await.unwrap().status(),
        StatusCode::OK
    );

    server.shutdown.trigger();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let result = reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
        .get(server.url("/app/home"))
        .send()
        .await;
    assert!(result.is_err());
}
