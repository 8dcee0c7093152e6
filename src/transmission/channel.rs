//! WebSocket channel to the collector.
//!
//! The connection slot and the published state are only mutated while the
//! slot mutex is held. Each connection gets a generation number so that a read
//! loop or send task left over from an older connection can never tear down a
//! newer one.

use super::payload::{CollectorAck, GaitPayload, HistoricalBatch, RecordKind};
use super::{ConnectionState, TransmissionError};
use crate::core::GaitRecord;
use crate::transparency::SharedTransparencyLog;
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = Arc<tokio::sync::Mutex<SplitSink<WsStream, Message>>>;

/// Capacity of the error sink. Errors beyond this are dropped until read.
const ERROR_SINK_CAPACITY: usize = 256;

/// Time allowed for the close handshake on disconnect.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Timeout for collector health probes.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

struct Connection {
    generation: u64,
    sink: WsSink,
    reader: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    connection: Option<Connection>,
}

struct Shared {
    collector_url: String,
    slot: Mutex<Slot>,
    state: watch::Sender<ConnectionState>,
    errors_tx: Sender<TransmissionError>,
    errors_rx: Receiver<TransmissionError>,
    log: Option<SharedTransparencyLog>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn report(&self, error: TransmissionError) {
        tracing::warn!("{error}");
        if let Err(TrySendError::Full(_)) = self.errors_tx.try_send(error) {
            tracing::debug!("transmission error sink full; dropping error");
        }
    }

    /// Tear down the connection of `generation` if it is still the current one.
    fn drop_connection(&self, generation: u64, reason: &str) {
        let mut slot = self.lock();
        let is_current = slot
            .connection
            .as_ref()
            .is_some_and(|c| c.generation == generation);
        if !is_current {
            return;
        }
        slot.connection = None;
        self.state.send_replace(ConnectionState::Disconnected);
        tracing::info!(generation, "collector connection lost: {reason}");
    }

    /// Account for a finished send on the connection of `generation`.
    ///
    /// Every failure is reported as a transport error. Only failures that
    /// leave the socket unusable tear the connection down.
    fn finish_send(&self, generation: u64, result: Result<(), tungstenite::Error>) {
        match result {
            Ok(()) => {
                if let Some(log) = &self.log {
                    log.record_payload_sent();
                }
            }
            Err(e) => {
                if let Some(log) = &self.log {
                    log.record_send_failure();
                }
                let broken = is_connection_broken(&e);
                self.report(TransmissionError::Transport(e.to_string()));
                if broken {
                    self.drop_connection(generation, "send failed");
                }
            }
        }
    }
}

/// Connection to the collector, cheap to clone.
#[derive(Clone)]
pub struct TransmissionChannel {
    shared: Arc<Shared>,
}

impl TransmissionChannel {
    /// Create a disconnected channel for the collector at `collector_url`
    /// (e.g. `ws://127.0.0.1:8000/ws`).
    pub fn new(collector_url: impl Into<String>) -> Self {
        Self::build(collector_url.into(), None)
    }

    /// Like [`new`](Self::new), counting sends and send failures in `log`.
    pub fn with_log(collector_url: impl Into<String>, log: SharedTransparencyLog) -> Self {
        Self::build(collector_url.into(), Some(log))
    }

    fn build(collector_url: String, log: Option<SharedTransparencyLog>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (errors_tx, errors_rx) = crossbeam_channel::bounded(ERROR_SINK_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                collector_url,
                slot: Mutex::new(Slot::default()),
                state,
                errors_tx,
                errors_rx,
                log,
            }),
        }
    }

    pub fn collector_url(&self) -> &str {
        &self.shared.collector_url
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.current_state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Observe connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Receiver side of the error sink.
    pub fn errors(&self) -> Receiver<TransmissionError> {
        self.shared.errors_rx.clone()
    }

    /// Collector address for `session_key`.
    pub fn connection_url(&self, session_key: &str) -> Result<Url, TransmissionError> {
        let mut url = Url::parse(&self.shared.collector_url).map_err(|e| {
            TransmissionError::Transport(format!(
                "Invalid collector URL '{}': {e}",
                self.shared.collector_url
            ))
        })?;
        url.query_pairs_mut().append_pair("patient_id", session_key);
        Ok(url)
    }

    /// Open the connection for `session_key`.
    ///
    /// Does nothing if a connection is already open or being opened. On
    /// success a read loop is spawned that observes collector messages until
    /// the connection breaks.
    pub async fn connect(&self, session_key: &str) -> Result<(), TransmissionError> {
        let url = self.connection_url(session_key)?;

        let generation = {
            let mut slot = self.shared.lock();
            if self.shared.current_state() != ConnectionState::Disconnected {
                tracing::debug!("connect ignored; connection already {}", self.state());
                return Ok(());
            }
            slot.generation += 1;
            self.shared.state.send_replace(ConnectionState::Connecting);
            slot.generation
        };
        tracing::info!(url = %url, "connecting to collector");

        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((stream, _response)) => {
                let (sink, stream) = stream.split();
                let mut slot = self.shared.lock();
                if slot.generation != generation {
                    tracing::debug!("connection superseded during handshake");
                    return Err(TransmissionError::Closed);
                }

                let reader = tokio::spawn(read_loop(self.shared.clone(), generation, stream));
                slot.connection = Some(Connection {
                    generation,
                    sink: Arc::new(tokio::sync::Mutex::new(sink)),
                    reader,
                });
                self.shared.state.send_replace(ConnectionState::Connected);
                tracing::info!(generation, "connected to collector");
                Ok(())
            }
            Err(e) => {
                let error = TransmissionError::Transport(e.to_string());
                {
                    let slot = self.shared.lock();
                    if slot.generation == generation {
                        self.shared.state.send_replace(ConnectionState::Disconnected);
                    }
                }
                self.shared.report(error.clone());
                Err(error)
            }
        }
    }

    /// Send one record without waiting for delivery.
    ///
    /// [`RecordKind::HistoricalBatch`] wraps the record in a one-element batch.
    pub fn send_record(&self, record: &GaitRecord, session_key: &str, kind: RecordKind) {
        let text = match kind {
            RecordKind::Realtime => {
                serde_json::to_string(&GaitPayload::from_record(record, session_key, kind))
            }
            RecordKind::HistoricalBatch => serde_json::to_string(&HistoricalBatch::new(
                session_key,
                std::slice::from_ref(record),
                Utc::now(),
            )),
        };
        self.submit(text);
    }

    /// Send a whole historical sequence as a single message.
    pub fn send_batch(&self, records: &[GaitRecord], session_key: &str) {
        let batch = HistoricalBatch::new(session_key, records, Utc::now());
        tracing::debug!(records = batch.len(), "sending historical batch");
        self.submit(serde_json::to_string(&batch));
    }

    fn submit(&self, encoded: Result<String, serde_json::Error>) {
        let text = match encoded {
            Ok(text) => text,
            Err(e) => {
                self.record_send_failure();
                self.shared
                    .report(TransmissionError::Serialization(e.to_string()));
                return;
            }
        };

        let current = {
            let slot = self.shared.lock();
            match &slot.connection {
                Some(c) if self.shared.current_state() == ConnectionState::Connected => {
                    Some((c.generation, c.sink.clone()))
                }
                _ => None,
            }
        };
        let Some((generation, sink)) = current else {
            self.record_send_failure();
            self.shared.report(TransmissionError::NotConnected);
            return;
        };

        let shared = self.shared.clone();
        tokio::spawn(async move {
            let result = sink.lock().await.send(Message::Text(text)).await;
            shared.finish_send(generation, result);
        });
    }

    fn record_send_failure(&self) {
        if let Some(log) = &self.shared.log {
            log.record_send_failure();
        }
    }

    /// Close the connection. Safe to call in any state.
    ///
    /// A handshake still in progress is abandoned. Sends already submitted
    /// may complete or fail silently.
    pub async fn disconnect(&self) {
        let connection = {
            let mut slot = self.shared.lock();
            slot.generation += 1;
            let connection = slot.connection.take();
            if self.shared.current_state() != ConnectionState::Disconnected {
                self.shared.state.send_replace(ConnectionState::Disconnected);
                tracing::info!("disconnected from collector");
            }
            connection
        };

        if let Some(connection) = connection {
            connection.reader.abort();
            let close = async { connection.sink.lock().await.close().await };
            match tokio::time::timeout(CLOSE_TIMEOUT, close).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!("close frame not delivered: {e}"),
                Err(_) => tracing::debug!("close handshake timed out"),
            }
        }
    }

    /// Check the collector's HTTP health endpoint.
    pub async fn probe_health(&self) -> Result<bool, TransmissionError> {
        let url = health_url(&self.shared.collector_url)?;
        let client = reqwest::Client::builder()
            .timeout(HEALTH_TIMEOUT)
            .build()
            .map_err(|e| TransmissionError::Transport(e.to_string()))?;

        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| TransmissionError::Transport(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

/// `ws://host:port/anything` → `http://host:port/health`.
fn health_url(collector_url: &str) -> Result<Url, TransmissionError> {
    let mut url = Url::parse(collector_url)
        .map_err(|e| TransmissionError::Transport(format!("Invalid collector URL: {e}")))?;
    let scheme = match url.scheme() {
        "wss" | "https" => "https",
        _ => "http",
    };
    url.set_scheme(scheme)
        .map_err(|_| TransmissionError::Transport(format!("Cannot probe {collector_url}")))?;
    url.set_path("/health");
    url.set_query(None);
    Ok(url)
}

fn is_connection_broken(error: &tungstenite::Error) -> bool {
    matches!(
        error,
        tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Io(_)
            | tungstenite::Error::Protocol(_)
    )
}

async fn read_loop(shared: Arc<Shared>, generation: u64, mut stream: SplitStream<WsStream>) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<CollectorAck>(&text) {
                Ok(CollectorAck::Error { message }) => {
                    tracing::warn!("collector rejected a payload: {message}")
                }
                Ok(ack) => tracing::debug!(?ack, "collector acknowledged"),
                Err(_) => tracing::debug!("unrecognized collector message: {text}"),
            },
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(?frame, "collector closed the connection");
                break "closed by collector".to_string();
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                shared.report(TransmissionError::Transport(e.to_string()));
                break e.to_string();
            }
            None => break "stream ended".to_string(),
        }
    };
    shared.drop_connection(generation, &reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    /// Minimal collector: records the request URI and every text frame, and
    /// acknowledges realtime records.
    struct TestCollector {
        url: String,
        uris: mpsc::UnboundedReceiver<String>,
        messages: mpsc::UnboundedReceiver<String>,
        accepted: Arc<AtomicUsize>,
    }

    async fn spawn_collector(close_immediately: bool) -> TestCollector {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (uri_tx, uris) = mpsc::unbounded_channel();
        let (msg_tx, messages) = mpsc::unbounded_channel();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();

        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let uri_tx = uri_tx.clone();
                let msg_tx = msg_tx.clone();
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let callback = move |req: &Request, resp: Response| {
                        let _ = uri_tx.send(req.uri().to_string());
                        Ok::<_, ErrorResponse>(resp)
                    };
                    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(tcp, callback).await
                    else {
                        return;
                    };
                    if close_immediately {
                        let _ = ws.close(None).await;
                        return;
                    }
                    while let Some(Ok(msg)) = ws.next().await {
                        if let Message::Text(text) = msg {
                            let _ = msg_tx.send(text);
                            let ack = r#"{"status":"received","record_id":"r1","timestamp":"t","alerts_triggered":0}"#;
                            let _ = ws.send(Message::Text(ack.to_string())).await;
                        }
                    }
                });
            }
        });

        TestCollector {
            url: format!("ws://{addr}/ws"),
            uris,
            messages,
            accepted,
        }
    }

    fn record() -> GaitRecord {
        GaitRecord::builder(Utc::now())
            .walking_speed(1.05)
            .step_count(120)
            .build()
    }

    async fn next_message(collector: &mut TestCollector) -> serde_json::Value {
        let text = tokio::time::timeout(Duration::from_secs(5), collector.messages.recv())
            .await
            .unwrap()
            .unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn test_connect_send_and_disconnect() {
        let mut collector = spawn_collector(false).await;
        let channel = TransmissionChannel::new(collector.url.clone());

        channel.connect("P001").await.unwrap();
        assert_eq!(channel.state(), ConnectionState::Connected);

        let uri = collector.uris.recv().await.unwrap();
        assert!(uri.contains("patient_id=P001"), "{uri}");

        channel.send_record(&record(), "P001", RecordKind::Realtime);
        let message = next_message(&mut collector).await;
        assert_eq!(message["patient_id"], "P001");
        assert_eq!(message["data_type"], "real_time");
        assert_eq!(message["step_count"], 120);

        channel.disconnect().await;
        channel.disconnect().await;
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_second_connect_is_noop() {
        let collector = spawn_collector(false).await;
        let channel = TransmissionChannel::new(collector.url.clone());

        channel.connect("P001").await.unwrap();
        channel.connect("P001").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(collector.accepted.load(Ordering::SeqCst), 1);
        channel.disconnect().await;
    }

    #[tokio::test]
    async fn test_batch_is_one_message() {
        let mut collector = spawn_collector(false).await;
        let channel = TransmissionChannel::new(collector.url.clone());
        channel.connect("P004").await.unwrap();

        let start = Utc::now() - chrono::Duration::days(90);
        let records: Vec<GaitRecord> = (0..90)
            .rev()
            .map(|d| {
                GaitRecord::builder(start + chrono::Duration::days(d))
                    .walking_speed(1.0)
                    .build()
            })
            .collect();
        channel.send_batch(&records, "P004");

        let message = next_message(&mut collector).await;
        assert_eq!(message["data_type"], "historical");
        let sent = message["records"].as_array().unwrap();
        assert_eq!(sent.len(), 90);
        assert!(sent[0]["timestamp"].as_str() < sent[89]["timestamp"].as_str());

        channel.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_failure_reports_and_stays_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let channel = TransmissionChannel::new(format!("ws://{addr}/ws"));
        let errors = channel.errors();

        let result = channel.connect("P001").await;
        assert!(matches!(result, Err(TransmissionError::Transport(_))));
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert!(matches!(
            errors.try_recv(),
            Ok(TransmissionError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_send_while_disconnected_reports_not_connected() {
        let channel = TransmissionChannel::new("ws://127.0.0.1:9/ws");
        let errors = channel.errors();

        channel.send_record(&record(), "P001", RecordKind::Realtime);

        assert_eq!(errors.try_recv(), Ok(TransmissionError::NotConnected));
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_collector_close_drops_to_disconnected() {
        let collector = spawn_collector(true).await;
        let channel = TransmissionChannel::new(collector.url.clone());
        let mut states = channel.subscribe();

        channel.connect("P005").await.unwrap();

        let disconnected = matches!(
            tokio::time::timeout(
                Duration::from_secs(5),
                states.wait_for(|s| *s == ConnectionState::Disconnected),
            )
            .await,
            Ok(Ok(_))
        );
        assert!(disconnected);
        assert_eq!(channel.state(), ConnectionState::Disconnected);

        // A fresh connect is allowed once the old connection is gone
        let retry = channel.connect("P005").await;
        assert!(retry.is_ok());
        channel.disconnect().await;
    }

    #[tokio::test]
    async fn test_send_failure_while_connected() {
        let collector = spawn_collector(false).await;
        let log = crate::transparency::create_shared_log();
        let channel = TransmissionChannel::with_log(collector.url.clone(), log.clone());
        let errors = channel.errors();
        channel.connect("P006").await.unwrap();

        let generation = channel.shared.lock().generation;
        let shared = &channel.shared;

        // A full write buffer fails the send but leaves the socket usable
        shared.finish_send(
            generation,
            Err(tungstenite::Error::WriteBufferFull(Message::Text("x".into()))),
        );
        assert!(matches!(errors.try_recv(), Ok(TransmissionError::Transport(_))));
        assert_eq!(channel.state(), ConnectionState::Connected);

        // A broken socket from an older connection leaves this one alone
        shared.finish_send(generation - 1, Err(tungstenite::Error::ConnectionClosed));
        assert!(matches!(errors.try_recv(), Ok(TransmissionError::Transport(_))));
        assert_eq!(channel.state(), ConnectionState::Connected);

        shared.finish_send(generation, Err(tungstenite::Error::ConnectionClosed));
        assert!(matches!(errors.try_recv(), Ok(TransmissionError::Transport(_))));
        assert_eq!(channel.state(), ConnectionState::Disconnected);

        assert_eq!(log.stats().send_failures, 3);
        assert_eq!(log.stats().payloads_sent, 0);

        // Sends after the teardown are refused up front
        channel.send_record(&record(), "P006", RecordKind::Realtime);
        assert_eq!(errors.try_recv(), Ok(TransmissionError::NotConnected));
        channel.disconnect().await;
    }

    #[test]
    fn test_broken_connection_errors() {
        assert!(is_connection_broken(&tungstenite::Error::ConnectionClosed));
        assert!(is_connection_broken(&tungstenite::Error::AlreadyClosed));
        assert!(is_connection_broken(&tungstenite::Error::Io(
            std::io::Error::from(std::io::ErrorKind::BrokenPipe)
        )));
        assert!(!is_connection_broken(&tungstenite::Error::WriteBufferFull(
            Message::Text("x".into())
        )));
        assert!(!is_connection_broken(&tungstenite::Error::Utf8));
    }

    #[test]
    fn test_health_url_from_ws_url() {
        let url = health_url("ws://collector.local:8000/ws?patient_id=x").unwrap();
        assert_eq!(url.as_str(), "http://collector.local:8000/health");

        let url = health_url("wss://collector.example/ws").unwrap();
        assert_eq!(url.as_str(), "https://collector.example/health");
    }

    #[test]
    fn test_connection_url_encodes_session_key() {
        let channel = TransmissionChannel::new("ws://127.0.0.1:8000/ws");
        let url = channel.connection_url("patient 7&x").unwrap();
        assert_eq!(url.path(), "/ws");
        assert_eq!(
            url.query_pairs().find(|(k, _)| k == "patient_id").unwrap().1,
            "patient 7&x"
        );
    }
}
