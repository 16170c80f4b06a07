// Web route tests — static pages, counter endpoints, join redirect and
// click recording, and the signup relay, driven through the router with
// tower's `oneshot`.

#![cfg(all(feature = "web", feature = "sqlite"))]

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::routing::{get as get_route, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use handl::config::Config;
use handl::geo::{GeoProvider, HttpGeoProvider, IpLookup, LocationResolver};
use handl::join::JoinFlow;
use handl::recorder::{ClickRecorder, ClickSink};
use handl::signup::{FormCapture, RETRY_MESSAGE};
use handl::store::sqlite::SqliteEventLog;
use handl::store::{EventLog, InterestEvent, Location};
use handl::web::{build_router, AppState};

const TESTFLIGHT: &str = "https://testflight.apple.com/join/AbCdEf12";
const IPHONE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15";
const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/124.0";

#[derive(Default)]
struct CountingSink {
    calls: AtomicUsize,
    visitors: Mutex<Vec<Option<IpAddr>>>,
}

#[async_trait]
impl ClickSink for CountingSink {
    async fn record(&self, visitor_ip: Option<IpAddr>) -> Result<()> {
        self.visitors.lock().unwrap().push(visitor_ip);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn test_config() -> Config {
    let vars: HashMap<&str, &str> = [
        ("SUPABASE_URL", "sqlite::memory:"),
        ("SUPABASE_ANON_KEY", "anon-key"),
        ("HANDL_INTEREST_OFFSET", "100"),
    ]
    .into_iter()
    .collect();
    Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap()
}

struct Harness {
    log: Arc<SqliteEventLog>,
    sink: Arc<CountingSink>,
    state: AppState,
}

fn harness(signup: Option<FormCapture>) -> Harness {
    let log = Arc::new(SqliteEventLog::in_memory().unwrap());
    let sink = Arc::new(CountingSink::default());
    let state = AppState {
        log: log.clone(),
        config: Arc::new(test_config()),
        join: Some(Arc::new(JoinFlow::new(TESTFLIGHT, sink.clone()))),
        signup: signup.map(Arc::new),
    };
    Harness { log, sink, state }
}

/// Serve `app` on an ephemeral local port and return its base URL.
async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn send(state: &AppState, request: Request<Body>) -> Response {
    build_router(state.clone()).oneshot(request).await.unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn add_rows(log: &SqliteEventLog, n: usize) {
    for _ in 0..n {
        log.insert_event(&InterestEvent::new(Location::default(), None))
            .await
            .unwrap();
    }
}

// ============================================================
// Static site
// ============================================================

#[tokio::test]
async fn serves_embedded_pages() {
    let h = harness(None);

    for uri in ["/", "/privacy/", "/terms/", "/terms"] {
        let response = send(&h.state, get(uri)).await;
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/html; charset=utf-8"
        );
    }
}

#[tokio::test]
async fn unknown_paths_are_not_found() {
    let h = harness(None);
    assert_eq!(send(&h.state, get("/nope")).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        send(&h.state, get("/../Cargo.toml")).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn health_is_ok() {
    let h = harness(None);
    let response = send(&h.state, get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ok");
}

// ============================================================
// Interest counter
// ============================================================

#[tokio::test]
async fn interest_is_rows_plus_offset() {
    let h = harness(None);
    add_rows(&h.log, 3).await;

    let response = send(&h.state, get("/api/interest")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["interested"], 103);
}

#[tokio::test]
async fn interest_stream_sends_current_then_live_values() {
    let h = harness(None);
    add_rows(&h.log, 2).await;

    let response = send(&h.state, get("/api/interest/stream")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let mut body = response.into_body().into_data_stream();
    let first = tokio::time::timeout(Duration::from_secs(5), body.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let first = String::from_utf8_lossy(&first).to_string();
    assert!(first.contains("event: interested"), "{first}");
    assert!(first.contains("data: 102"), "{first}");

    add_rows(&h.log, 1).await;
    let next = tokio::time::timeout(Duration::from_secs(5), body.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(String::from_utf8_lossy(&next).contains("data: 103"));
}

// ============================================================
// Join
// ============================================================

#[tokio::test]
async fn ios_join_redirects_and_records() {
    let h = harness(None);
    let request = Request::post("/api/join")
        .header(header::USER_AGENT, IPHONE_UA)
        .body(Body::empty())
        .unwrap();

    let response = send(&h.state, request).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], TESTFLIGHT);

    for _ in 0..100 {
        if h.sink.calls.load(Ordering::SeqCst) == 1 {
            // No proxy header and no socket peer under `oneshot`.
            assert_eq!(*h.sink.visitors.lock().unwrap(), vec![None]);
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("join click was not recorded");
}

#[tokio::test]
async fn other_devices_are_sent_to_signup() {
    let h = harness(None);
    let request = Request::post("/api/join")
        .header(header::USER_AGENT, DESKTOP_UA)
        .body(Body::empty())
        .unwrap();

    let response = send(&h.state, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["action"], "signup");

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.sink.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn join_without_link_is_unavailable() {
    let mut h = harness(None);
    h.state.join = None;
    let request = Request::post("/api/join")
        .header(header::USER_AGENT, IPHONE_UA)
        .body(Body::empty())
        .unwrap();

    let response = send(&h.state, request).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// ============================================================
// Join clicks through a real recorder
// ============================================================

type Looked = Arc<Mutex<Vec<String>>>;

/// Public-IP service that should never be asked about site visitors.
#[derive(Default)]
struct ServerIp {
    calls: AtomicUsize,
}

#[async_trait]
impl IpLookup for ServerIp {
    async fn public_ip(&self) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("192.0.2.10".to_string())
    }
}

struct Recording {
    log: Arc<SqliteEventLog>,
    state: AppState,
    looked_up: Looked,
    server_ip: Arc<ServerIp>,
}

/// Router whose join flow records through a `ClickRecorder` backed by an
/// ipwho.is-style geolocation mock and an in-memory log.
async fn recording() -> Recording {
    async fn geo(State(looked_up): State<Looked>, Path(ip): Path<String>) -> Json<Value> {
        looked_up.lock().unwrap().push(ip);
        Json(json!({"success": true, "country": "Canada", "city": "Toronto"}))
    }

    let looked_up: Looked = Arc::default();
    let base = spawn(
        Router::new()
            .route("/geo/{ip}", get_route(geo))
            .with_state(looked_up.clone()),
    )
    .await;

    let providers: Vec<Arc<dyn GeoProvider>> =
        vec![Arc::new(HttpGeoProvider::ipwhois(&format!("{base}/geo/")).unwrap())];
    let log = Arc::new(SqliteEventLog::in_memory().unwrap());
    let server_ip = Arc::new(ServerIp::default());
    let recorder = ClickRecorder::new(LocationResolver::new(providers), server_ip.clone(), log.clone());

    let state = AppState {
        log: log.clone(),
        config: Arc::new(test_config()),
        join: Some(Arc::new(JoinFlow::new(TESTFLIGHT, Arc::new(recorder)))),
        signup: None,
    };
    Recording {
        log,
        state,
        looked_up,
        server_ip,
    }
}

async fn stored_click(log: &SqliteEventLog) -> InterestEvent {
    for _ in 0..200 {
        if let Some(event) = log.recent_events(1).await.unwrap().pop() {
            return event;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("join click never reached the log");
}

#[tokio::test]
async fn forwarded_visitor_address_is_located_and_stored() {
    let r = recording().await;
    let request = Request::post("/api/join")
        .header(header::USER_AGENT, IPHONE_UA)
        .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
        .body(Body::empty())
        .unwrap();

    let response = send(&r.state, request).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let event = stored_click(&r.log).await;
    assert_eq!(event.ip_address.as_deref(), Some("203.0.113.7"));
    assert_eq!(event.country.as_deref(), Some("Canada"));
    assert_eq!(event.city.as_deref(), Some("Toronto"));
    assert_eq!(*r.looked_up.lock().unwrap(), vec!["203.0.113.7".to_string()]);
    assert_eq!(r.server_ip.calls.load(Ordering::SeqCst), 0);
    assert_eq!(r.log.count_rows().await.unwrap(), 1);
}

#[tokio::test]
async fn socket_peer_is_used_without_a_proxy_header() {
    let r = recording().await;
    let peer: SocketAddr = "198.51.100.23:61234".parse().unwrap();
    let request = Request::post("/api/join")
        .header(header::USER_AGENT, IPHONE_UA)
        .extension(ConnectInfo(peer))
        .body(Body::empty())
        .unwrap();

    assert_eq!(send(&r.state, request).await.status(), StatusCode::SEE_OTHER);

    let event = stored_click(&r.log).await;
    assert_eq!(event.ip_address.as_deref(), Some("198.51.100.23"));
    assert_eq!(event.city.as_deref(), Some("Toronto"));
    assert_eq!(*r.looked_up.lock().unwrap(), vec!["198.51.100.23".to_string()]);
    assert_eq!(r.server_ip.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_visitor_is_stored_without_location() {
    let r = recording().await;
    let request = Request::post("/api/join")
        .header(header::USER_AGENT, IPHONE_UA)
        .body(Body::empty())
        .unwrap();

    assert_eq!(send(&r.state, request).await.status(), StatusCode::SEE_OTHER);

    let event = stored_click(&r.log).await;
    assert_eq!(event.ip_address, None);
    assert_eq!(event.country, None);
    assert_eq!(event.city, None);
    assert!(r.looked_up.lock().unwrap().is_empty());
    assert_eq!(r.server_ip.calls.load(Ordering::SeqCst), 0);
}

// ============================================================
// Signup
// ============================================================

fn signup_request(body: &'static str) -> Request<Body> {
    Request::post("/api/signup")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn invalid_signup_is_rejected() {
    let h = harness(None);
    let response = send(&h.state, signup_request("name=&email=ada%40example.com")).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = send(&h.state, signup_request("name=Ada&email=not-an-email")).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn signup_relay_failure_shows_retry_message() {
    async fn down() -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }
    let base = spawn(Router::new().route("/", post(down))).await;

    let h = harness(Some(FormCapture::new(&format!("{base}/")).unwrap()));
    let response = send(
        &h.state,
        signup_request("form-name=beta-signup&name=Ada&email=ada%40example.com"),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(json_body(response).await["error"], RETRY_MESSAGE);
}

#[tokio::test]
async fn signup_relayed_to_form_capture() {
    async fn accept() -> StatusCode {
        StatusCode::OK
    }
    let base = spawn(Router::new().route("/", post(accept))).await;

    let h = harness(Some(FormCapture::new(&format!("{base}/")).unwrap()));
    let response = send(
        &h.state,
        signup_request("name=Ada&email=ada%40example.com"),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["ok"], true);
}
