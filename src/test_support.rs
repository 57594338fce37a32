use crate::delivery::{Acknowledge, DeliveryHandle, Disposition, Incoming};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use relay_core::model::Observation;
use serde_json::{Value, json};
use std::io;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tracing::Subscriber;

const INGEST_PATH: &str = "/api/weather/logs";

pub fn full_payload() -> Value {
    json!({
        "source": "open-meteo",
        "city": "Recife",
        "latitude": -8.05,
        "longitude": -34.9,
        "timestamp": "2025-11-20 14:00:00+00:00",
        "temperature_c": 29.1,
        "humidity": 71.0,
        "wind_speed_m_s": 4.2,
        "weather_code": 3,
        "precipitation_probability": 10.0,
        "weather_description": "Overcast"
    })
}

pub fn sample_observation() -> Observation {
    Observation {
        source: "open-meteo".to_string(),
        city: "Recife".to_string(),
        latitude: -8.05,
        longitude: -34.9,
        timestamp: "2025-11-20 14:00:00+00:00".to_string(),
        temperature_c: 29.1,
        humidity: None,
        wind_speed_m_s: Some(4.2),
        weather_code: Some(3),
        precipitation_probability: None,
        weather_description: Some("Overcast".to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Clone)]
struct EndpointState {
    status: StatusCode,
    reply: &'static str,
    received: Arc<Mutex<Vec<RecordedRequest>>>,
}

/// In-process stand-in for the ingestion API.
pub struct StubEndpoint {
    url: String,
    received: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl StubEndpoint {
    pub async fn spawn(status: StatusCode, reply: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
        let addr = listener.local_addr().expect("stub addr");
        let received = Arc::new(Mutex::new(Vec::new()));
        let state = EndpointState {
            status,
            reply,
            received: received.clone(),
        };

        let app = Router::new()
            .route(INGEST_PATH, post(ingest))
            .with_state(state);
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            url: format!("http://{addr}{INGEST_PATH}"),
            received,
        }
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.received.lock().expect("stub lock").clone()
    }
}

async fn ingest(
    State(state): State<EndpointState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);
    state
        .received
        .lock()
        .expect("stub lock")
        .push(RecordedRequest {
            content_type,
            body: body.to_vec(),
        });
    (state.status, state.reply)
}

/// URL of a local port with nothing listening on it.
pub async fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind unused port");
    let addr = listener.local_addr().expect("unused addr");
    drop(listener);
    format!("http://{addr}{INGEST_PATH}")
}

#[derive(Debug, Clone, Default)]
pub struct AckLog {
    calls: Arc<Mutex<Vec<(u64, Disposition)>>>,
}

impl AckLog {
    pub fn calls(&self) -> Vec<(u64, Disposition)> {
        self.calls.lock().expect("ack log lock").clone()
    }

    fn record(&self, delivery_tag: u64, disposition: Disposition) {
        self.calls
            .lock()
            .expect("ack log lock")
            .push((delivery_tag, disposition));
    }
}

#[derive(Debug, Clone)]
pub struct RecordingAcker {
    delivery_tag: u64,
    log: AckLog,
    fail: bool,
}

impl RecordingAcker {
    pub fn new(delivery_tag: u64, log: &AckLog) -> Self {
        Self {
            delivery_tag,
            log: log.clone(),
            fail: false,
        }
    }

    pub fn failing(delivery_tag: u64, log: &AckLog) -> Self {
        Self {
            fail: true,
            ..Self::new(delivery_tag, log)
        }
    }

    fn respond(&self, disposition: Disposition) -> Result<()> {
        self.log.record(self.delivery_tag, disposition);
        if self.fail {
            return Err(anyhow!("channel closed by broker"));
        }
        Ok(())
    }
}

#[async_trait]
impl Acknowledge for RecordingAcker {
    async fn confirm(&self) -> Result<()> {
        self.respond(Disposition::Confirm)
    }

    async fn requeue(&self) -> Result<()> {
        self.respond(Disposition::Requeue)
    }

    async fn reject(&self) -> Result<()> {
        self.respond(Disposition::Reject)
    }
}

pub fn fake_delivery(
    delivery_tag: u64,
    payload: Vec<u8>,
    log: &AckLog,
) -> Incoming<RecordingAcker> {
    Incoming {
        payload,
        redelivered: false,
        handle: DeliveryHandle::new(delivery_tag, RecordingAcker::new(delivery_tag, log)),
    }
}

/// Collects formatted log output for assertions.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn subscriber(&self) -> impl Subscriber + Send + Sync + use<> {
        let writer = self.clone();
        tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish()
    }

    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().expect("capture lock");
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .expect("capture lock")
            .extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
