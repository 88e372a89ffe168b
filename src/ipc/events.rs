//! Server-pushed events
//!
//! Named events the UI subscribes to over the IPC surface. Emission is
//! fire-and-forget on a broadcast channel; a UI that is not listening simply
//! misses the event.

use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum Event {
    AutoLogoutWarning {
        minutes_remaining: i64,
        message: String,
    },
    AutoLogout {
        reason: String,
        timestamp: String,
    },
    OrderEvent {
        symbol: String,
        action: String,
        order_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        batch_order: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_last_order: Option<bool>,
    },
    WebhookAlert {
        strategy_id: i64,
        strategy_name: String,
        symbol: String,
        exchange: String,
        action: String,
        quantity: i32,
    },
    MarketTick {
        symbol: String,
        exchange: String,
        ltp: f64,
    },
    WebsocketConnected {
        broker_id: String,
    },
    WebsocketDisconnected {
        broker_id: String,
    },
    WebsocketError {
        message: String,
    },
    OauthCallback {
        broker_id: String,
        code: String,
        state: Option<String>,
    },
}

impl Event {
    /// Event name as seen by subscribers
    pub fn name(&self) -> &'static str {
        match self {
            Event::AutoLogoutWarning { .. } => "auto_logout_warning",
            Event::AutoLogout { .. } => "auto_logout",
            Event::OrderEvent { .. } => "order_event",
            Event::WebhookAlert { .. } => "webhook_alert",
            Event::MarketTick { .. } => "market_tick",
            Event::WebsocketConnected { .. } => "websocket_connected",
            Event::WebsocketDisconnected { .. } => "websocket_disconnected",
            Event::WebsocketError { .. } => "websocket_error",
            Event::OauthCallback { .. } => "oauth_callback",
        }
    }
}

/// Broadcast bus for server-pushed events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Emit to all current subscribers. No subscribers is not an error.
    pub fn emit(&self, event: Event) {
        tracing::debug!("event: {}", event.name());
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(Event::AutoLogoutWarning {
            minutes_remaining: 5,
            message: "Auto-logout in 5 minutes".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "auto_logout_warning");
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.emit(Event::WebsocketError {
            message: "gone".to_string(),
        });
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = Event::AutoLogout {
            reason: "scheduled".to_string(),
            timestamp: "2024-06-10T21:30:00Z".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "auto_logout");
        assert_eq!(json["payload"]["reason"], "scheduled");
    }
}
