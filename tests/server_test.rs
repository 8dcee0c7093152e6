//! Integration tests for the reference gait collector

#[cfg(feature = "server")]
mod server_tests {
    use chrono::{Duration as ChronoDuration, Utc};
    use gait_sensor_agent::server::{run, ServerConfig, SharedCollectorState};
    use gait_sensor_agent::transparency::create_shared_log;
    use gait_sensor_agent::{
        Config, ConnectionState, Delivery, GaitEngine, GaitRecord, MockProfile, MockSource,
        RecordKind, TransmissionChannel,
    };
    use std::sync::Arc;
    use std::time::Duration;

    async fn start() -> (
        std::net::SocketAddr,
        tokio::sync::oneshot::Sender<()>,
        SharedCollectorState,
    ) {
        let (addr, shutdown_tx, state) = run(ServerConfig::new(0))
            .await
            .expect("Failed to start collector");

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;
        (addr, shutdown_tx, state)
    }

    /// Poll until the collector holds `count` records.
    async fn wait_for_records(state: &SharedCollectorState, count: usize) {
        for _ in 0..100 {
            if state.records().await.len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("collector never received {count} records");
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (addr, shutdown_tx, _state) = start().await;

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .expect("Failed to send request");

        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "healthy");
        assert!(body["version"].as_str().is_some());
        assert_eq!(body["records_received"], 0);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_channel_health_probe() {
        let (addr, shutdown_tx, _state) = start().await;

        let channel = TransmissionChannel::new(format!("ws://{}/ws", addr));
        assert!(channel.probe_health().await.unwrap());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_realtime_record_stored_with_alerts() {
        let (addr, shutdown_tx, state) = start().await;

        let channel = TransmissionChannel::new(format!("ws://{}/ws", addr));
        channel.connect("P001").await.expect("connect failed");
        assert_eq!(channel.state(), ConnectionState::Connected);

        let record = GaitRecord::builder(Utc::now())
            .walking_speed(0.65)
            .walking_asymmetry(14.0)
            .double_support_time(33.0)
            .step_count(120)
            .build();
        channel.send_record(&record, "P001", RecordKind::Realtime);

        wait_for_records(&state, 1).await;
        let stored = state.records_for("P001").await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].payload.walking_speed, Some(0.65));
        assert_eq!(stored[0].payload.speed_category, "Severely Impaired");
        assert_eq!(stored[0].alerts.len(), 3);
        assert_eq!(state.alerts_triggered(), 3);
        assert_eq!(state.active_patients().await, 1);

        channel.disconnect().await;
        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_historical_batch_stored() {
        let (addr, shutdown_tx, state) = start().await;

        let channel = TransmissionChannel::new(format!("ws://{}/ws", addr));
        channel.connect("P002").await.expect("connect failed");

        let now = Utc::now();
        let records: Vec<GaitRecord> = (0..30)
            .map(|d| {
                GaitRecord::builder(now - ChronoDuration::days(d))
                    .walking_speed(1.15)
                    .step_length(0.66)
                    .build()
            })
            .collect();
        channel.send_batch(&records, "P002");

        wait_for_records(&state, 30).await;
        let stored = state.records_for("P002").await;
        assert!(stored
            .iter()
            .all(|r| r.payload.data_type == RecordKind::HistoricalBatch));
        assert!(stored
            .windows(2)
            .all(|p| p[0].payload.timestamp < p[1].payload.timestamp));
        assert_eq!(state.alerts_triggered(), 0);

        channel.disconnect().await;
        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let (addr, shutdown_tx, _state) = start().await;

        let client = reqwest::Client::new();
        let response = client
            .request(reqwest::Method::OPTIONS, format!("http://{}/health", addr))
            .header("Origin", "http://localhost:3000")
            .header("Access-Control-Request-Method", "GET")
            .send()
            .await
            .expect("Failed to send request");

        assert!(response
            .headers()
            .contains_key("access-control-allow-origin"));

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_engine_end_to_end() {
        let (addr, shutdown_tx, state) = start().await;
        let dir = tempfile::tempdir().unwrap();

        let mut config = Config::default();
        config.patient_id = "P003".to_string();
        config.collector.url = format!("ws://{}/ws", addr);
        config.export_path = dir.path().join("exports");
        config.data_path = dir.path().join("data");
        config.backfill_days = 7;

        let source =
            Arc::new(MockSource::new(MockProfile::MultipleSclerosis).with_sample_interval(3600));
        let engine = GaitEngine::new(config, source, create_shared_log()).unwrap();
        engine.connect().await.expect("connect failed");

        let records = engine.request_historical().await.unwrap();
        assert_eq!(records.len(), 7);
        wait_for_records(&state, 7).await;

        // Disconnected delivery goes to a file instead
        engine.disconnect().await;
        let delivery = engine.deliver_historical(&records).unwrap();
        assert!(matches!(delivery, Delivery::Exported(_)));
        assert_eq!(state.records().await.len(), 7);

        engine.shutdown().await;
        let _ = shutdown_tx.send(());
    }
}
