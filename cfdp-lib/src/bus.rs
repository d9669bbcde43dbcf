//! Publish/subscribe capability connecting carrier sources, extractors and PDU consumers.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::carrier::{FrameRecord, PacketRecord};
use crate::event::{Anomaly, PduEvent};
use crate::{Error, Result};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Message {
    TelemetryFrame(FrameRecord),
    TelemetryPacket(PacketRecord),
    /// No more carriers will be delivered.
    EndOfData,
    CfdpPdu(PduEvent),
    Anomaly(Anomaly),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    TelemetryFrame,
    TelemetryPacket,
    EndOfData,
    CfdpPdu,
    Anomaly,
}

impl Message {
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::TelemetryFrame(_) => MessageKind::TelemetryFrame,
            Message::TelemetryPacket(_) => MessageKind::TelemetryPacket,
            Message::EndOfData => MessageKind::EndOfData,
            Message::CfdpPdu(_) => MessageKind::CfdpPdu,
            Message::Anomaly(_) => MessageKind::Anomaly,
        }
    }
}

pub type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub trait EventBus: Send + Sync {
    /// Deliver `msg` to all current subscribers of its kind.
    ///
    /// # Errors
    /// If the bus is unable to deliver the message.
    fn publish(&self, msg: Message) -> Result<()>;

    fn subscribe(&self, kind: MessageKind, handler: Handler) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);
}

/// In-process bus delivering messages synchronously on the publishing thread.
///
/// Handlers may publish; the subscriber list is not locked while handlers run.
#[derive(Default)]
pub struct LocalBus {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, MessageKind, Handler)>>,
}

impl LocalBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn num_subscribers(&self) -> usize {
        self.subscribers.lock().map_or(0, |s| s.len())
    }
}

impl EventBus for LocalBus {
    fn publish(&self, msg: Message) -> Result<()> {
        let kind = msg.kind();
        let handlers: Vec<Handler> = {
            let subscribers = self
                .subscribers
                .lock()
                .map_err(|e| Error::Bus(e.to_string()))?;
            subscribers
                .iter()
                .filter(|(_, k, _)| *k == kind)
                .map(|(_, _, h)| h.clone())
                .collect()
        };
        trace!(?kind, num = handlers.len(), "publishing");
        for handler in handlers {
            handler(&msg);
        }
        Ok(())
    }

    fn subscribe(&self, kind: MessageKind, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.push((id, kind, handler)),
            Err(poisoned) => poisoned.into_inner().push((id, kind, handler)),
        }
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.retain(|(sid, _, _)| *sid != id),
            Err(poisoned) => poisoned.into_inner().retain(|(sid, _, _)| *sid != id),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn test_publish_by_kind() {
        let bus = LocalBus::new();
        let eods = Arc::new(AtomicUsize::new(0));
        let counter = eods.clone();
        bus.subscribe(
            MessageKind::EndOfData,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        bus.publish(Message::EndOfData).unwrap();
        bus.publish(Message::Anomaly(crate::event::Anomaly::new(
            crate::event::AnomalyKind::BadFrame,
            0,
            "bad",
        )))
        .unwrap();
        assert_eq!(eods.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = LocalBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let id = bus.subscribe(
            MessageKind::EndOfData,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(bus.num_subscribers(), 1);
        bus.unsubscribe(id);
        assert_eq!(bus.num_subscribers(), 0);
        bus.publish(Message::EndOfData).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reentrant_publish() {
        let bus = Arc::new(LocalBus::new());
        let count = Arc::new(AtomicUsize::new(0));

        let inner = bus.clone();
        bus.subscribe(
            MessageKind::EndOfData,
            Arc::new(move |_| {
                inner
                    .publish(Message::Anomaly(crate::event::Anomaly::new(
                        crate::event::AnomalyKind::BadFrame,
                        0,
                        "from handler",
                    )))
                    .unwrap();
            }),
        );
        let counter = count.clone();
        bus.subscribe(
            MessageKind::Anomaly,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        bus.publish(Message::EndOfData).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
