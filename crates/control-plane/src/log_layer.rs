// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A `tracing_subscriber` layer that mirrors formatted log lines onto a
//! broadcast channel, feeding `/ws/logs` subscribers without coupling log
//! formatting to the WebSocket transport.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

pub struct LogBroadcastLayer {
    tx: broadcast::Sender<Arc<str>>,
}

impl LogBroadcastLayer {
    pub fn new(tx: broadcast::Sender<Arc<str>>) -> Self {
        Self { tx }
    }
}

impl<S: Subscriber> Layer<S> for LogBroadcastLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        // No subscribers is the common case; skip formatting entirely then.
        if self.tx.receiver_count() == 0 {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let line = serde_json::json!({
            "level": event.metadata().level().as_str(),
            "target": event.metadata().target(),
            "message": visitor.message,
        })
        .to_string();

        let _ = self.tx.send(Arc::from(line.as_str()));
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::prelude::*;

    #[test]
    fn emits_a_line_with_level_and_message_when_a_subscriber_is_listening() {
        let (tx, mut rx) = broadcast::channel(8);
        let layer = LogBroadcastLayer::new(tx);
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("hello from the log layer");
        });

        let line = rx.try_recv().expect("broadcast line");
        assert!(line.contains("\"level\":\"INFO\""));
        assert!(line.contains("hello from the log layer"));
    }

    #[test]
    fn send_with_no_subscriber_does_not_panic() {
        let (tx, rx) = broadcast::channel(8);
        drop(rx);
        let layer = LogBroadcastLayer::new(tx);
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("dropped into the void");
        });
    }
}
