use crate::error::AppError;
use crate::logs::buffer::SharedLogBuffer;
use crate::logs::channel::LogChannelManager;
use crate::session::backend::{ActionResponse, HttpSessionBackend};
use crate::session::types::{ActiveView, SlotStatus, TradingParameters, TradingSessionState};
use parking_lot::RwLock;
use serde_json::json;
use tracing::{info, warn};

/// Trade-control actions for one user. Every outcome, including failures,
/// ends up as a line in the log buffer; nothing is raised to the caller.
pub struct TradeControl<'a> {
    pub user_id: &'a str,
    pub backend: &'a HttpSessionBackend,
    pub session: &'a RwLock<TradingSessionState>,
    pub buffer: &'a SharedLogBuffer,
    pub channel: &'a LogChannelManager,
}

impl TradeControl<'_> {
    /// Returns the lines appended, in order.
    pub async fn start_all(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let (submitted, brokers) = {
            let mut writable = self.session.write();
            writable.active_view = ActiveView::Results;

            let mut submitted: Vec<(usize, TradingParameters)> = Vec::new();
            for index in 0..writable.stock_count {
                match writable.slot(index).filter(|params| params.has_broker()) {
                    Some(params) => submitted.push((index, params.clone())),
                    None => lines.push(format!("Select a broker for stock {}", index + 1)),
                }
            }
            (submitted, writable.selected_brokers.clone())
        };

        if submitted.is_empty() {
            return self.append_all(lines).await;
        }
        lines.push("Starting all trades...".to_string());

        let parameters: Vec<&TradingParameters> = submitted.iter().map(|(_, params)| params).collect();
        let body = json!({
            "userId": self.user_id,
            "tradingParameters": parameters,
            "selectedBrokers": brokers,
        });

        match self.backend.post_action("start-all-trading", &body).await {
            Ok(response) if response.succeeded() => {
                lines.push(
                    response
                        .message
                        .unwrap_or_else(|| "Trades started".to_string()),
                );
                {
                    let mut writable = self.session.write();
                    for (index, _) in &submitted {
                        writable.set_slot_status(*index, SlotStatus::Active);
                    }
                }
                if let Err(error) = self.channel.start(Some(self.user_id)) {
                    warn!(user_id = self.user_id, %error, "log stream did not start after trades started");
                }
                info!(user_id = self.user_id, slots = submitted.len(), "trades started");
            }
            Ok(response) => lines.push(start_failure_line(response.message)),
            Err(AppError::Backend { message, .. }) => lines.push(start_failure_line(Some(message))),
            Err(error) => {
                warn!(user_id = self.user_id, %error, "start-all-trading failed");
                lines.push("Error starting trades".to_string());
            }
        }

        self.append_all(lines).await
    }

    pub async fn stop_all(&self) -> Vec<String> {
        let body = json!({ "userId": self.user_id });
        let line = match self.backend.post_action("stop-all-trading", &body).await {
            Ok(response) if response.succeeded() => {
                "STOP signal sent. Trading will stop shortly.".to_string()
            }
            Ok(_) | Err(AppError::Backend { .. }) => "Failed to send stop signal".to_string(),
            Err(error) => {
                warn!(user_id = self.user_id, %error, "stop-all-trading failed");
                "Error sending STOP request".to_string()
            }
        };
        self.append_all(vec![line]).await
    }

    /// Stops the log stream first, then asks the backend to flatten.
    pub async fn close_all(&self) -> Vec<String> {
        self.channel.stop().await;

        let body = json!({ "userId": self.user_id });
        let line = match self.backend.post_action("close-all-positions", &body).await {
            Ok(ActionResponse {
                message: Some(message),
                ..
            }) => message,
            Ok(_) => "Close-all request sent".to_string(),
            Err(AppError::Backend { message, .. }) => message,
            Err(error) => {
                warn!(user_id = self.user_id, %error, "close-all-positions failed");
                "Error closing all positions".to_string()
            }
        };
        self.append_all(vec![line]).await
    }

    /// Active slot: disconnect it on the backend. Inactive slot: mark it
    /// active locally and switch to the results view.
    ///
    /// A slot past the configured stock count, or one without parameters, is
    /// left untouched and reported as a line.
    pub async fn toggle_slot(&self, index: usize) -> Vec<String> {
        let configured = {
            let readable = self.session.read();
            readable.configured_slot(index).map(|params| {
                (
                    readable.slot_status(index),
                    params.symbol().to_string(),
                    params.broker.clone(),
                )
            })
        };
        let Some((status, symbol, broker)) = configured else {
            warn!(user_id = self.user_id, index, "toggle requested for an unconfigured slot");
            return self.append_all(vec![unconfigured_slot_line(index)]).await;
        };

        if status == SlotStatus::Inactive {
            {
                let mut writable = self.session.write();
                writable.set_slot_status(index, SlotStatus::Active);
                writable.active_view = ActiveView::Results;
            }
            return self
                .append_all(vec![format!("Initiating trade for {symbol}")])
                .await;
        }

        let body = json!({
            "userId": self.user_id,
            "symbol_value": symbol,
            "broker": broker,
        });
        let line = match self.backend.post_action("disconnect-stock", &body).await {
            Ok(response) => {
                self.session.write().set_slot_status(index, SlotStatus::Inactive);
                response
                    .message
                    .unwrap_or_else(|| format!("Disconnected {symbol}"))
            }
            Err(AppError::Backend { status, message }) => {
                format!("Error disconnecting {symbol}: HTTP {status}: {message}")
            }
            Err(error) => format!("Error disconnecting {symbol}: {error}"),
        };
        self.append_all(vec![line]).await
    }

    pub async fn close_position(&self, index: usize) -> Vec<String> {
        let symbol = self
            .session
            .read()
            .configured_slot(index)
            .map(|p| p.symbol().to_string());
        let Some(symbol) = symbol else {
            return self.append_all(vec![unconfigured_slot_line(index)]).await;
        };

        let body = json!({ "userId": self.user_id, "symbol_value": symbol });
        let line = match self.backend.post_action("close-position", &body).await {
            Ok(ActionResponse {
                message: Some(message),
                ..
            }) => message,
            Ok(_) => format!("Close requested for {symbol}"),
            Err(AppError::Backend { message, .. }) => message,
            Err(_) => format!("Error closing {symbol}"),
        };
        self.append_all(vec![line]).await
    }

    async fn append_all(&self, lines: Vec<String>) -> Vec<String> {
        let mut buffer = self.buffer.lock().await;
        for line in &lines {
            if let Err(error) = buffer.append_line(line.clone()).await {
                warn!(%error, "failed to persist trade-control line");
            }
        }
        lines
    }
}

fn unconfigured_slot_line(index: usize) -> String {
    format!("Stock {} is not configured", index + 1)
}

fn start_failure_line(message: Option<String>) -> String {
    format!(
        "Failed to start trades: {}",
        message.unwrap_or_else(|| "Unknown error".to_string())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::initialize_memory_pool;
    use crate::logs::buffer::LogBuffer;
    use crate::logs::fanout::FanoutBus;
    use crate::session::types::{slot_key, BrokerSelection};
    use crate::test_support::{eventually, spawn_ws_stub, AfterFrames};
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use reqwest::Client;
    use serde_json::Value;
    use std::sync::Arc;

    struct Harness {
        backend: HttpSessionBackend,
        session: RwLock<TradingSessionState>,
        buffer: SharedLogBuffer,
        channel: LogChannelManager,
    }

    impl Harness {
        async fn new(server: &MockServer, stream_base: &str) -> Self {
            let pool = initialize_memory_pool().await.expect("pool");
            let buffer = LogBuffer::new(pool).into_shared();
            let channel = LogChannelManager::new(stream_base, Arc::clone(&buffer), Arc::new(FanoutBus::new()));
            Self {
                backend: HttpSessionBackend::new(Client::new(), server.base_url()),
                session: RwLock::new(TradingSessionState::default()),
                buffer,
                channel,
            }
        }

        fn control(&self) -> TradeControl<'_> {
            TradeControl {
                user_id: "u-1",
                backend: &self.backend,
                session: &self.session,
                buffer: &self.buffer,
                channel: &self.channel,
            }
        }

        fn with_slots(self, slots: Vec<TradingParameters>) -> Self {
            {
                let mut writable = self.session.write();
                writable.stock_count = slots.len();
                for (index, params) in slots.into_iter().enumerate() {
                    writable.trading_parameters.insert(slot_key(index), params);
                }
                writable.restore_brokers(vec![BrokerSelection {
                    name: "zerodha".to_string(),
                    ..BrokerSelection::default()
                }]);
            }
            self
        }
    }

    fn slot(symbol: &str, broker: Option<&str>) -> TradingParameters {
        TradingParameters {
            symbol_value: Some(symbol.to_string()),
            broker: broker.map(str::to_string),
            lots: 1.0,
            lot_size: 25.0,
            ..TradingParameters::default()
        }
    }

    #[tokio::test]
    async fn start_all_without_brokers_only_reports() {
        let server = MockServer::start_async().await;
        let start = server
            .mock_async(|when, then| {
                when.method(POST).path("/start-all-trading");
                then.status(200).body(r#"{"success":true}"#);
            })
            .await;
        let harness = Harness::new(&server, "ws://127.0.0.1:9")
            .await
            .with_slots(vec![slot("TCS", None), slot("INFY", Some("  "))]);

        let lines = harness.control().start_all().await;

        assert_eq!(
            lines,
            vec!["Select a broker for stock 1", "Select a broker for stock 2"]
        );
        assert_eq!(start.hits_async().await, 0);
        assert_eq!(harness.session.read().active_view, ActiveView::Results);
        assert_eq!(harness.buffer.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn start_all_success_marks_slots_and_opens_stream() {
        let stub = spawn_ws_stub(Vec::new(), AfterFrames::HoldOpen).await;
        let server = MockServer::start_async().await;
        let start = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/start-all-trading")
                    .json_body_partial(r#"{"userId":"u-1"}"#)
                    .matches(|request| {
                        let body: Value = request
                            .body
                            .as_deref()
                            .and_then(|bytes| serde_json::from_slice(bytes).ok())
                            .unwrap_or_default();
                        body["tradingParameters"].as_array().map(Vec::len) == Some(2)
                            && body["selectedBrokers"][0]["name"] == "zerodha"
                    });
                then.status(200)
                    .body(r#"{"success":true,"message":"2 trades started"}"#);
            })
            .await;
        let harness = Harness::new(&server, &stub.base_url)
            .await
            .with_slots(vec![slot("TCS", Some("zerodha")), slot("INFY", None), slot("SBIN", Some("zerodha"))]);

        let lines = harness.control().start_all().await;

        assert_eq!(
            lines,
            vec![
                "Select a broker for stock 2",
                "Starting all trades...",
                "2 trades started"
            ]
        );
        {
            let session = harness.session.read();
            assert_eq!(session.slot_status(0), SlotStatus::Active);
            assert_eq!(session.slot_status(1), SlotStatus::Inactive);
            assert_eq!(session.slot_status(2), SlotStatus::Active);
        }
        start.assert_async().await;

        let channel = &harness.channel;
        assert!(eventually(|| async move { channel.is_connected() }).await);
        channel.stop().await;
    }

    #[tokio::test]
    async fn start_all_rejection_keeps_slots_inactive() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/start-all-trading");
                then.status(200)
                    .body(r#"{"success":false,"message":"market closed"}"#);
            })
            .await;
        let harness = Harness::new(&server, "ws://127.0.0.1:9")
            .await
            .with_slots(vec![slot("TCS", Some("zerodha"))]);

        let lines = harness.control().start_all().await;

        assert_eq!(lines.last().map(String::as_str), Some("Failed to start trades: market closed"));
        assert!(!harness.session.read().is_trading_active());
        assert!(!harness.channel.has_connection());
    }

    #[tokio::test]
    async fn stop_all_reports_outcome() {
        let server = MockServer::start_async().await;
        let stop = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/stop-all-trading")
                    .json_body(json!({ "userId": "u-1" }));
                then.status(200).body(r#"{"success":true}"#);
            })
            .await;
        let harness = Harness::new(&server, "ws://127.0.0.1:9").await;

        let lines = harness.control().stop_all().await;
        assert_eq!(lines, vec!["STOP signal sent. Trading will stop shortly."]);
        assert_eq!(
            harness.buffer.lock().await.last(),
            Some("STOP signal sent. Trading will stop shortly.")
        );
        stop.assert_async().await;
    }

    #[tokio::test]
    async fn close_all_stops_stream_and_appends_message() {
        let stub = spawn_ws_stub(Vec::new(), AfterFrames::HoldOpen).await;
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/close-all-positions");
                then.status(200).body(r#"{"message":"all positions closed"}"#);
            })
            .await;
        let harness = Harness::new(&server, &stub.base_url).await;
        harness.channel.start(Some("u-1")).expect("start");
        let channel = &harness.channel;
        assert!(eventually(|| async move { channel.is_connected() }).await);

        let lines = harness.control().close_all().await;

        assert_eq!(lines, vec!["all positions closed"]);
        assert!(!harness.channel.has_connection());
    }

    #[tokio::test]
    async fn toggle_inactive_slot_initiates_trade_locally() {
        let server = MockServer::start_async().await;
        let disconnect = server
            .mock_async(|when, then| {
                when.method(POST).path("/disconnect-stock");
                then.status(200).body("{}");
            })
            .await;
        let harness = Harness::new(&server, "ws://127.0.0.1:9")
            .await
            .with_slots(vec![slot("TCS", Some("zerodha"))]);

        let lines = harness.control().toggle_slot(0).await;

        assert_eq!(lines, vec!["Initiating trade for TCS"]);
        assert_eq!(harness.session.read().slot_status(0), SlotStatus::Active);
        assert_eq!(disconnect.hits_async().await, 0);
    }

    #[tokio::test]
    async fn toggle_past_stock_count_changes_nothing() {
        let server = MockServer::start_async().await;
        let harness = Harness::new(&server, "ws://127.0.0.1:9")
            .await
            .with_slots(vec![slot("TCS", Some("zerodha"))]);

        let lines = harness.control().toggle_slot(7).await;

        assert_eq!(lines, vec!["Stock 8 is not configured"]);
        {
            let session = harness.session.read();
            assert_eq!(session.slot_status(7), SlotStatus::Inactive);
            assert!(!session.trading_status.contains_key(&slot_key(7)));
            assert_eq!(session.active_view, ActiveView::default());
            assert!(!session.is_trading_active());
        }
        assert_eq!(
            harness.buffer.lock().await.last(),
            Some("Stock 8 is not configured")
        );
    }

    #[tokio::test]
    async fn toggle_slot_without_parameters_changes_nothing() {
        let server = MockServer::start_async().await;
        let harness = Harness::new(&server, "ws://127.0.0.1:9").await;

        let lines = harness.control().toggle_slot(0).await;

        assert_eq!(lines, vec!["Stock 1 is not configured"]);
        assert!(harness.session.read().trading_status.is_empty());
    }

    #[tokio::test]
    async fn toggle_active_slot_disconnects_it() {
        let server = MockServer::start_async().await;
        let disconnect = server
            .mock_async(|when, then| {
                when.method(POST).path("/disconnect-stock").json_body(json!({
                    "userId": "u-1",
                    "symbol_value": "TCS",
                    "broker": "zerodha",
                }));
                then.status(200).body(r#"{"message":"TCS disconnected"}"#);
            })
            .await;
        let harness = Harness::new(&server, "ws://127.0.0.1:9")
            .await
            .with_slots(vec![slot("TCS", Some("zerodha"))]);
        harness.session.write().set_slot_status(0, SlotStatus::Active);

        let lines = harness.control().toggle_slot(0).await;

        assert_eq!(lines, vec!["TCS disconnected"]);
        assert_eq!(harness.session.read().slot_status(0), SlotStatus::Inactive);
        disconnect.assert_async().await;
    }

    #[tokio::test]
    async fn failed_disconnect_keeps_slot_active() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/disconnect-stock");
                then.status(500).body("boom");
            })
            .await;
        let harness = Harness::new(&server, "ws://127.0.0.1:9")
            .await
            .with_slots(vec![slot("TCS", Some("zerodha"))]);
        harness.session.write().set_slot_status(0, SlotStatus::Active);

        let lines = harness.control().toggle_slot(0).await;

        assert_eq!(lines, vec!["Error disconnecting TCS: HTTP 500: boom"]);
        assert_eq!(harness.session.read().slot_status(0), SlotStatus::Active);
    }

    #[tokio::test]
    async fn close_position_not_found_surfaces_backend_body() {
        let server = MockServer::start_async().await;
        let close = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/close-position")
                    .json_body(json!({ "userId": "u-1", "symbol_value": "TCS" }));
                then.status(404).body(r#"{"detail":"not found"}"#);
            })
            .await;
        let harness = Harness::new(&server, "ws://127.0.0.1:9")
            .await
            .with_slots(vec![slot("TCS", Some("zerodha"))]);

        let lines = harness.control().close_position(0).await;
        assert_eq!(lines, vec![r#"{"detail":"not found"}"#]);
        close.assert_async().await;
    }

    #[tokio::test]
    async fn close_position_past_stock_count_sends_nothing() {
        let server = MockServer::start_async().await;
        let close = server
            .mock_async(|when, then| {
                when.method(POST).path("/close-position");
                then.status(200).body("{}");
            })
            .await;
        let harness = Harness::new(&server, "ws://127.0.0.1:9")
            .await
            .with_slots(vec![slot("TCS", Some("zerodha"))]);

        let lines = harness.control().close_position(3).await;

        assert_eq!(lines, vec!["Stock 4 is not configured"]);
        assert_eq!(close.hits_async().await, 0);
    }
}
