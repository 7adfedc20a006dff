#![allow(dead_code)]

use axum::{
    Json, Router,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use image::{DynamicImage, ImageBuffer, ImageOutputFormat, Rgba};
use serde_json::{Value, json};
use smartcart::catalog::{Catalog, CatalogEntry};
use smartcart::config::{FeedConfig, RemoteStrategy};
use smartcart::feed::FeedEvent;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Scripted stand-in for the recognition and auth service
#[derive(Default)]
pub struct MockService {
    pub image: Mutex<Option<Vec<u8>>>,
    pub image_queries: Mutex<Vec<HashMap<String, String>>>,
    pub prediction: Mutex<Value>,
    pub predict_response: Mutex<Value>,
    pub submissions: Mutex<Vec<Value>>,
    pub camera_image: Mutex<Option<Vec<u8>>>,
    pub camera_denied: AtomicBool,
    pub socket_script: Mutex<Vec<String>>,
    pub handshake: Mutex<Option<String>>,
    pub socket_sessions: AtomicUsize,
    pub pong_received: AtomicBool,
    pub socket_cart_id: Mutex<Option<String>>,
    pub login_token: Mutex<Option<String>>,
    pub refresh_token: Mutex<Option<String>>,
    pub profile_auth: Mutex<Option<String>>,
    pub logins: AtomicUsize,
}

impl MockService {
    pub fn new() -> Arc<Self> {
        Arc::new(MockService::default())
    }

    pub fn set_image(&self, image: Option<Vec<u8>>) {
        *self.image.lock().unwrap() = image;
    }

    pub fn set_prediction(&self, prediction: Value) {
        *self.prediction.lock().unwrap() = prediction;
    }
}

type Shared = Arc<MockService>;

async fn latest_image(State(svc): State<Shared>, Query(query): Query<HashMap<String, String>>) -> Response {
    svc.image_queries.lock().unwrap().push(query);
    let image = svc.image.lock().unwrap().clone();
    match image {
        Some(bytes) => ([(header::CONTENT_TYPE, "image/png")], bytes).into_response(),
        None => (StatusCode::NOT_FOUND, "No image").into_response(),
    }
}

async fn latest_prediction(State(svc): State<Shared>) -> Json<Value> {
    Json(svc.prediction.lock().unwrap().clone())
}

async fn predict_product(State(svc): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    svc.submissions.lock().unwrap().push(body);
    Json(svc.predict_response.lock().unwrap().clone())
}

async fn camera(State(svc): State<Shared>) -> Response {
    if svc.camera_denied.load(Ordering::SeqCst) {
        return StatusCode::FORBIDDEN.into_response();
    }
    let image = svc.camera_image.lock().unwrap().clone();
    match image {
        Some(bytes) => ([(header::CONTENT_TYPE, "image/png")], bytes).into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn socket_io(
    State(svc): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    *svc.socket_cart_id.lock().unwrap() = query.get("cart_id").cloned();
    ws.on_upgrade(move |socket| socket_session(svc, socket))
}

async fn next_text(socket: &mut WebSocket) -> Option<String> {
    while let Some(Ok(message)) = socket.recv().await {
        if let Message::Text(text) = message {
            return Some(text);
        }
    }
    None
}

async fn socket_session(svc: Shared, mut socket: WebSocket) {
    svc.socket_sessions.fetch_add(1, Ordering::SeqCst);
    let open = svc.handshake.lock().unwrap().clone().unwrap_or_else(|| {
        r#"0{"sid":"mock","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#.to_string()
    });
    if socket.send(Message::Text(open)).await.is_err() {
        return;
    }
    if next_text(&mut socket).await.as_deref() != Some("40") {
        return;
    }
    let _ = socket.send(Message::Text(r#"40{"sid":"ns-mock"}"#.to_string())).await;

    let _ = socket.send(Message::Text("2".to_string())).await;
    if next_text(&mut socket).await.as_deref() == Some("3") {
        svc.pong_received.store(true, Ordering::SeqCst);
    }

    let script = svc.socket_script.lock().unwrap().clone();
    for line in script {
        if socket.send(Message::Text(line)).await.is_err() {
            return;
        }
    }

    while next_text(&mut socket).await.is_some() {}
}

async fn login(State(svc): State<Shared>, Json(_body): Json<Value>) -> Response {
    svc.logins.fetch_add(1, Ordering::SeqCst);
    match svc.login_token.lock().unwrap().clone() {
        Some(token) => Json(json!({ "token": token })).into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Invalid email or password" })),
        )
            .into_response(),
    }
}

async fn register(State(svc): State<Shared>, Json(_body): Json<Value>) -> Response {
    match svc.login_token.lock().unwrap().clone() {
        Some(token) => (StatusCode::CREATED, Json(json!({ "token": token }))).into_response(),
        None => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn refresh(State(svc): State<Shared>) -> Response {
    match svc.refresh_token.lock().unwrap().clone() {
        Some(token) => Json(json!({ "token": token })).into_response(),
        None => StatusCode::UNAUTHORIZED.into_response(),
    }
}

async fn profile(State(svc): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    *svc.profile_auth.lock().unwrap() = auth;
    Json(json!({ "user": { "sub": 7, "name": body["name"], "role": "user" } })).into_response()
}

/// Serve the mock on an ephemeral port; returns its base URL
pub async fn spawn(svc: Shared) -> String {
    let app = Router::new()
        .route("/latest_image", get(latest_image))
        .route("/latest_prediction", get(latest_prediction))
        .route("/predict_product", post(predict_product))
        .route("/camera", get(camera))
        .route("/socket.io/", get(socket_io))
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/api/auth/refresh", post(refresh))
        .route("/user/profile", put(profile))
        .with_state(svc);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

/// Fast intervals against the mock
pub fn config(base_url: &str, strategy: RemoteStrategy) -> FeedConfig {
    FeedConfig {
        api_url: base_url.to_string(),
        remote_strategy: strategy,
        image_interval_ms: 50,
        prediction_interval_ms: 50,
        capture_interval_ms: 50,
        ..FeedConfig::default()
    }
}

pub fn catalog() -> Arc<Catalog> {
    Arc::new(Catalog::new(vec![
        CatalogEntry {
            id: "p1".to_string(),
            name: "Widget".to_string(),
            price: 10.0,
        },
        CatalogEntry {
            id: "milk".to_string(),
            name: "Milk".to_string(),
            price: 52.0,
        },
    ]))
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_pixel(width, height, Rgba([20u8, 120, 220, 255]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut out, ImageOutputFormat::Png)
        .unwrap();
    out.into_inner()
}

pub fn b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn token(claims: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    format!("{}.{}.sig", header, URL_SAFE_NO_PAD.encode(claims.to_string()))
}

/// Wait up to five seconds for an event matching `pred`
pub async fn wait_for<F>(events: &mut broadcast::Receiver<FeedEvent>, pred: F) -> FeedEvent
where
    F: Fn(&FeedEvent) -> bool,
{
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await;

    found.expect("timed out waiting for feed event")
}
