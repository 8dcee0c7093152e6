//! Reference collector for gait payloads.
//!
//! This module provides a WebSocket server that:
//! - Accepts one connection per patient on `GET /ws?patient_id=...`
//! - Stores realtime records and historical batches in memory
//! - Runs the clinical alert rules on every record it receives
//! - Acknowledges each message on the same connection
//!
//! # Architecture
//!
//! ```text
//! gait-sensor ──ws──→ /ws?patient_id=P001 ──→ [alert rules] ──→ in-memory store
//!                          ↑                                         │
//!                          └──────────── ack {status, ...} ◀─────────┘
//! ```

use crate::core::{alerts, ClinicalAlert};
use crate::transmission::{CollectorAck, GaitPayload, HistoricalBatch, RecordKind};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

/// A record as stored by the collector.
#[derive(Debug, Clone, Serialize)]
pub struct StoredRecord {
    pub record_id: String,
    pub received_at: DateTime<Utc>,
    pub payload: GaitPayload,
    pub alerts: Vec<ClinicalAlert>,
}

/// Shared collector state
#[derive(Default)]
pub struct CollectorState {
    records: RwLock<Vec<StoredRecord>>,
    active_patients: RwLock<HashSet<String>>,
    alerts_triggered: AtomicU64,
}

/// Collector state shared between connections.
pub type SharedCollectorState = Arc<CollectorState>;

impl CollectorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record received so far, in arrival order.
    pub async fn records(&self) -> Vec<StoredRecord> {
        self.records.read().await.clone()
    }

    pub async fn records_for(&self, patient_id: &str) -> Vec<StoredRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.payload.patient_id == patient_id)
            .cloned()
            .collect()
    }

    pub async fn active_patients(&self) -> usize {
        self.active_patients.read().await.len()
    }

    pub fn alerts_triggered(&self) -> u64 {
        self.alerts_triggered.load(Ordering::Relaxed)
    }

    async fn store(&self, payload: GaitPayload) -> (String, usize) {
        let alerts = alerts(&payload.to_record());
        let triggered = alerts.len();
        for alert in &alerts {
            tracing::info!(
                patient_id = %payload.patient_id,
                severity = ?alert.severity,
                "{}",
                alert.message
            );
        }
        self.alerts_triggered
            .fetch_add(triggered as u64, Ordering::Relaxed);

        let record_id = uuid::Uuid::new_v4().to_string();
        self.records.write().await.push(StoredRecord {
            record_id: record_id.clone(),
            received_at: Utc::now(),
            payload,
            alerts,
        });
        (record_id, triggered)
    }

    /// Store one inbound text message and build its acknowledgement.
    pub async fn ingest(&self, text: &str) -> Result<CollectorAck, String> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| format!("Invalid JSON: {e}"))?;
        let timestamp = Utc::now().to_rfc3339();

        let is_batch = value.get("data_type").and_then(|v| v.as_str())
            == Some(RecordKind::HistoricalBatch.as_str())
            && value.get("records").is_some();

        if is_batch {
            let batch: HistoricalBatch =
                serde_json::from_value(value).map_err(|e| format!("Invalid batch: {e}"))?;
            let records_processed = batch.records.len();
            for payload in batch.records {
                self.store(payload).await;
            }
            tracing::info!(
                patient_id = %batch.patient_id,
                records_processed,
                "historical batch received"
            );
            Ok(CollectorAck::BatchReceived {
                records_processed,
                timestamp,
            })
        } else {
            let payload: GaitPayload =
                serde_json::from_value(value).map_err(|e| format!("Invalid record: {e}"))?;
            let (record_id, alerts_triggered) = self.store(payload).await;
            Ok(CollectorAck::Received {
                record_id,
                timestamp,
                alerts_triggered,
            })
        }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub active_patients: usize,
    pub records_received: usize,
}

/// Query string of the patient stream.
#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub patient_id: String,
}

/// GET /health
async fn health(State(state): State<SharedCollectorState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_patients: state.active_patients().await,
        records_received: state.records.read().await.len(),
    })
}

/// GET /ws?patient_id=...
async fn patient_stream(
    ws: WebSocketUpgrade,
    Query(params): Query<StreamParams>,
    State(state): State<SharedCollectorState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_patient(socket, params.patient_id, state))
}

async fn handle_patient(mut socket: WebSocket, patient_id: String, state: SharedCollectorState) {
    state.active_patients.write().await.insert(patient_id.clone());
    tracing::info!(%patient_id, "patient connected");

    while let Some(Ok(message)) = socket.recv().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let ack = state.ingest(&text).await.unwrap_or_else(|message| {
            tracing::warn!(%patient_id, "rejected message: {message}");
            CollectorAck::Error { message }
        });

        let reply = match serde_json::to_string(&ack) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!("Failed to encode acknowledgement: {e}");
                continue;
            }
        };
        if socket.send(Message::Text(reply)).await.is_err() {
            break;
        }
    }

    state.active_patients.write().await.remove(&patient_id);
    tracing::info!(%patient_id, "patient disconnected");
}

/// Build the collector router over `state`.
pub fn router(state: SharedCollectorState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(patient_stream))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the collector
pub async fn run(
    config: ServerConfig,
) -> anyhow::Result<(
    SocketAddr,
    tokio::sync::oneshot::Sender<()>,
    SharedCollectorState,
)> {
    let state: SharedCollectorState = Arc::new(CollectorState::new());
    let app = router(state.clone());

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Gait collector listening on ws://{}/ws", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Collector shutdown signal received");
            })
            .await
        {
            tracing::error!("Collector error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx, state))
}
