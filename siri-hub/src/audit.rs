//! Write-only audit sink fed over a bounded channel.
//!
//! The sink backend (BigQuery, logstash, files) is an external collaborator
//! draining the receiving half; the hub only ever enqueues. Overflow is
//! dropped, never blocked on.

use crate::observability::events;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::debug;

const AUDIT_CHANNEL_CAPACITY: usize = 500;

/// One audit record: flat string fields in the exchange-log shape.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AuditEvent {
    fields: BTreeMap<String, String>,
}

impl AuditEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }
}

/// Sending half handed to every connector and guardian.
#[derive(Clone)]
pub struct AuditSink {
    sender: Option<mpsc::Sender<AuditEvent>>,
}

impl AuditSink {
    /// Builds a sink and the receiver its backend drains.
    pub fn channel() -> (Self, mpsc::Receiver<AuditEvent>) {
        let (sender, receiver) = mpsc::channel(AUDIT_CHANNEL_CAPACITY);
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// Sink that discards everything; used when no backend is attached.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn write_event(&self, event: AuditEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        if let Err(err) = sender.try_send(event) {
            debug!(
                event = events::AUDIT_EVENT_DROPPED,
                component = "audit_sink",
                reason = match err {
                    mpsc::error::TrySendError::Full(_) => "channel_full",
                    mpsc::error::TrySendError::Closed(_) => "channel_closed",
                },
                "dropping audit event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AuditEvent, AuditSink};

    #[tokio::test]
    async fn events_flow_to_the_receiver() {
        let (sink, mut receiver) = AuditSink::channel();
        let mut event = AuditEvent::new();
        event.set("siriType", "CheckStatus").set("status", "true");

        sink.write_event(event.clone());

        let received = receiver.recv().await.expect("event should arrive");
        assert_eq!(received, event);
        assert_eq!(received.get("siriType"), Some("CheckStatus"));
    }

    #[tokio::test]
    async fn overflow_is_dropped_without_blocking() {
        let (sink, receiver) = AuditSink::channel();

        for i in 0..600 {
            let mut event = AuditEvent::new();
            event.set("n", i.to_string());
            sink.write_event(event);
        }

        drop(receiver);
        sink.write_event(AuditEvent::new());
    }

    #[test]
    fn disabled_sink_accepts_events() {
        AuditSink::disabled().write_event(AuditEvent::new());
    }
}
