//! End-to-end pipeline behavior: dispatch through the composed chain with
//! a capturing log sink and an in-memory transport, asserting on the raw
//! bytes a client would receive and the lines a server operator would see.

use log::Level;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use strand::app::{App, Dispatcher};
use strand::context::Context;
use strand::http::{Body, Method, Request};
use strand::logger::{Logger, MemoryLog};
use strand::middleware::Handler;
use strand::status::Status;

fn test_app() -> (Arc<MemoryLog>, App) {
    let sink = Arc::new(MemoryLog::default());
    let logger = Logger::new(sink.clone()).with_level(log::LevelFilter::Trace);
    (sink, App::new(logger))
}

fn get(path: &str) -> Request {
    request(Method::GET, path)
}

fn request(method: Method, path: &str) -> Request {
    Request {
        method,
        path: path.to_string(),
        query_string: String::new(),
        query: HashMap::new(),
        headers: HashMap::new(),
        body: Body::new(),
        remote_addr: "198.51.100.7:61234".to_string(),
    }
}

async fn roundtrip(dispatcher: &Dispatcher, req: Request) -> (u16, HashMap<String, String>, Vec<u8>) {
    let mut out = Vec::new();
    dispatcher.dispatch(req, &mut out).await;
    parse_response(&out)
}

fn parse_response(raw: &[u8]) -> (u16, HashMap<String, String>, Vec<u8>) {
    let split = raw
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .expect("no header/body separator");
    let head = String::from_utf8(raw[..split].to_vec()).unwrap();
    let body = raw[split + 4..].to_vec();

    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap();
    let code: u16 = status_line
        .strip_prefix("HTTP/1.1 ")
        .unwrap()
        .parse()
        .unwrap();

    let headers = lines
        .filter_map(|line| line.split_once(": "))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();

    (code, headers, body)
}

#[tokio::test]
async fn unmapped_path_yields_the_exact_not_found_payload() {
    let (_, app) = test_app();
    let dispatcher = app.build().unwrap();

    let (code, headers, body) = roundtrip(&dispatcher, get("/missing")).await;
    assert_eq!(code, 404);
    assert_eq!(
        headers.get("Content-Type").map(String::as_str),
        Some("application/json")
    );

    let parsed: Value = serde_json::from_slice(&body).unwrap();
    let object = parsed.as_object().unwrap();
    assert_eq!(object.len(), 2);
    assert_eq!(parsed["error"], "not found: \"/missing\"");

    let id = parsed["request_id"].as_str().unwrap();
    assert_eq!(id.len(), 32);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
}

#[tokio::test]
async fn internal_error_sanitizes_the_client_payload_and_logs_the_cause() {
    let (sink, mut app) = test_app();
    app.get("/save", |ctx: Arc<Context>| async move {
        ctx.internal_error(
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            format!("unable to save: {}", "report.csv"),
        )
    });
    let dispatcher = app.build().unwrap();

    let (code, _, body) = roundtrip(&dispatcher, get("/save")).await;
    assert_eq!(code, 500);

    let parsed: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["error"], "unable to save: report.csv");
    assert!(!String::from_utf8(body).unwrap().contains("disk full"));

    assert!(sink.count_containing("disk full") >= 1);
    assert!(sink.count_containing("unable to save: report.csv") >= 1);
}

#[tokio::test]
async fn user_middlewares_run_in_registration_order_around_the_handler() {
    let trail: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let marker = |name: &'static str, trail: Arc<Mutex<Vec<String>>>| {
        move |next: Handler| -> Handler {
            let trail = trail.clone();
            Arc::new(move |ctx: Arc<Context>| {
                let next = next.clone();
                let trail = trail.clone();
                Box::pin(async move {
                    trail.lock().unwrap().push(format!("{}:enter", name));
                    let status = next(ctx).await;
                    trail.lock().unwrap().push(format!("{}:leave", name));
                    status
                })
            })
        }
    };

    let (_, mut app) = test_app();
    app.use_middleware(marker("a", trail.clone()));
    app.use_middleware(marker("b", trail.clone()));
    app.use_middleware(marker("c", trail.clone()));
    let handler_trail = trail.clone();
    app.get("/", move |ctx: Arc<Context>| {
        let trail = handler_trail.clone();
        async move {
            trail.lock().unwrap().push("h".to_string());
            ctx.ok()
        }
    });
    let dispatcher = app.build().unwrap();

    let (code, _, _) = roundtrip(&dispatcher, get("/")).await;
    assert_eq!(code, 200);
    assert_eq!(
        *trail.lock().unwrap(),
        [
            "a:enter", "b:enter", "c:enter", "h", "c:leave", "b:leave", "a:leave"
        ]
    );
}

#[tokio::test]
async fn a_panicking_handler_never_breaks_the_dispatch_loop() {
    let (sink, mut app) = test_app();
    app.get("/boom", |_ctx: Arc<Context>| async move {
        let status: Status = strand::assert::some(None, "handler exploded");
        status
    });
    let dispatcher = app.build().unwrap();

    for _ in 0..3 {
        let (code, _, body) = roundtrip(&dispatcher, get("/boom")).await;
        assert_eq!(code, 500);
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"], "internal server error");
    }

    assert_eq!(sink.count_containing("panic while serving /boom"), 3);
    assert_eq!(sink.count_containing("handler exploded"), 3);
    assert_eq!(sink.count_containing("client: 198.51.100.7:61234"), 3);
}

#[tokio::test]
async fn partial_body_never_survives_a_panic() {
    let (_, mut app) = test_app();
    app.get("/truncated", |ctx: Arc<Context>| async move {
        ctx.write(b"PARTIAL OUTPUT");
        strand::assert::not_empty("", "buffer must not be empty mid-write");
        ctx.ok()
    });
    let dispatcher = app.build().unwrap();

    let (code, _, body) = roundtrip(&dispatcher, get("/truncated")).await;
    assert_eq!(code, 500);
    let text = String::from_utf8(body).unwrap();
    assert!(!text.contains("PARTIAL"));
    let parsed: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed["error"], "internal server error");
}

#[tokio::test]
async fn exactly_one_access_log_line_per_request() {
    let (sink, mut app) = test_app();
    app.get("/ok", |ctx: Arc<Context>| async move {
        ctx.write(b"fine");
        ctx.ok()
    });
    app.get("/bad", |ctx: Arc<Context>| async move {
        ctx.bad_request("odd input", "rejected")
    });
    app.get("/boom", |_ctx: Arc<Context>| async move {
        let status: Status = strand::assert::some(None, "boom");
        status
    });
    let dispatcher = app.build().unwrap();

    roundtrip(&dispatcher, get("/ok")).await;
    roundtrip(&dispatcher, get("/bad")).await;
    roundtrip(&dispatcher, get("/boom")).await;
    roundtrip(&dispatcher, get("/missing")).await;

    assert_eq!(sink.count_containing("{http}"), 4);

    // Severity tracks the outcome: debug for clean requests, warning for
    // sub-500 errors, error at 500 and above.
    assert_eq!(sink.count_at(Level::Debug, "{http} 200  GET /ok"), 1);
    assert_eq!(sink.count_at(Level::Warn, "{http} 400  GET /bad"), 1);
    assert_eq!(sink.count_at(Level::Error, "{http} 500  GET /boom"), 1);
    assert_eq!(sink.count_at(Level::Warn, "{http} 404  GET /missing"), 1);
}

#[tokio::test]
async fn access_log_line_carries_url_duration_and_remote() {
    let (sink, app) = test_app();
    let dispatcher = app.build().unwrap();

    let mut req = get("/missing");
    req.query_string = "page=2".to_string();
    roundtrip(&dispatcher, req).await;

    let line = sink
        .entries()
        .into_iter()
        .find(|(_, text)| text.contains("{http}"))
        .unwrap()
        .1;
    assert!(line.contains("/missing?page=2"));
    assert!(line.contains(" | 0."));
    assert!(line.contains("198.51.100.7:61234"));
}

#[tokio::test]
async fn buffered_headers_and_last_written_code_survive_commit() {
    let (_, mut app) = test_app();
    app.get("/teapot", |ctx: Arc<Context>| async move {
        let writer = ctx.writer();
        writer.set_header("X-A", "1");
        writer.set_header("X-B", "2");
        writer.write_header(200);
        writer.write_header(418);
        ctx.write(b"short and stout");
        Status::default()
    });
    let dispatcher = app.build().unwrap();

    let (code, headers, body) = roundtrip(&dispatcher, get("/teapot")).await;
    assert_eq!(code, 418);
    assert_eq!(headers.get("X-A").map(String::as_str), Some("1"));
    assert_eq!(headers.get("X-B").map(String::as_str), Some("2"));
    assert_eq!(body, b"short and stout");
}

#[tokio::test]
async fn nonzero_status_overrides_the_writer_code_at_commit() {
    let (_, mut app) = test_app();
    app.get("/unavailable", |ctx: Arc<Context>| async move {
        ctx.write(b"try later");
        Status::new(503)
    });
    let dispatcher = app.build().unwrap();

    let (code, _, body) = roundtrip(&dispatcher, get("/unavailable")).await;
    assert_eq!(code, 503);
    assert_eq!(body, b"try later");
}

#[tokio::test]
async fn redirect_sets_location_and_302() {
    let (_, mut app) = test_app();
    app.get("/old", |ctx: Arc<Context>| async move { ctx.redirect("/new") });
    let dispatcher = app.build().unwrap();

    let (code, headers, _) = roundtrip(&dispatcher, get("/old")).await;
    assert_eq!(code, 302);
    assert_eq!(headers.get("Location").map(String::as_str), Some("/new"));
}

#[tokio::test]
async fn route_params_reach_the_handler() {
    let (_, mut app) = test_app();
    app.get("/users/:id", |ctx: Arc<Context>| async move {
        let id = ctx.param("id").unwrap_or_default();
        ctx.write(format!("user={}", id).as_bytes());
        ctx.ok()
    });
    let dispatcher = app.build().unwrap();

    let (code, _, body) = roundtrip(&dispatcher, get("/users/42")).await;
    assert_eq!(code, 200);
    assert_eq!(body, b"user=42");
}

#[tokio::test]
async fn templates_render_through_the_pipeline_idempotently() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("echo.html"), "value={{ x }}").unwrap();

    let (_, mut app) = test_app();
    app.templates_dir(dir.path());
    app.get("/page", |ctx: Arc<Context>| async move {
        ctx.set("x", "1");
        ctx.render("echo")
    });
    let dispatcher = app.build().unwrap();

    let (code, headers, first) = roundtrip(&dispatcher, get("/page")).await;
    assert_eq!(code, 200);
    assert_eq!(
        headers.get("Content-Type").map(String::as_str),
        Some("text/html; charset=utf-8")
    );
    assert_eq!(first, b"value=1");

    let (_, _, second) = roundtrip(&dispatcher, get("/page")).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn static_files_serve_under_their_prefix() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("app.css"), "body {}").unwrap();

    let (_, mut app) = test_app();
    app.static_dir(dir.path(), "/static");
    let dispatcher = app.build().unwrap();

    let (code, headers, body) = roundtrip(&dispatcher, get("/static/app.css")).await;
    assert_eq!(code, 200);
    assert_eq!(
        headers.get("Content-Type").map(String::as_str),
        Some("text/css")
    );
    assert_eq!(body, b"body {}");

    // POST to the same path is not served by the asset handler.
    let (code, _, _) = roundtrip(&dispatcher, request(Method::POST, "/static/app.css")).await;
    assert_eq!(code, 404);
}

#[tokio::test]
async fn handle_connection_parses_and_replies_over_a_raw_stream() {
    let (_, mut app) = test_app();
    app.get("/hello", |ctx: Arc<Context>| async move {
        ctx.write(b"hi");
        ctx.ok()
    });
    let dispatcher = app.build().unwrap();

    let (mut client, server) = tokio::io::duplex(16 * 1024);
    tokio::io::AsyncWriteExt::write_all(
        &mut client,
        b"GET /hello HTTP/1.1\r\nHost: example.test\r\n\r\n",
    )
    .await
    .unwrap();

    dispatcher
        .handle_connection(server, "203.0.113.9:4321".to_string())
        .await
        .unwrap();

    let mut raw = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut client, &mut raw)
        .await
        .unwrap();
    let (code, _, body) = parse_response(&raw);
    assert_eq!(code, 200);
    assert_eq!(body, b"hi");
}
