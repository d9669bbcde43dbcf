//! Bus adapter for extractors.
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, error, info};

use crate::bus::{EventBus, Handler, Message, MessageKind, SubscriptionId};
use crate::extract::{Carrier, Effect, Extractor};
use crate::stats::Stats;

/// Subscribes an [Extractor] to its carrier messages and publishes the resulting PDUs and
/// anomalies.
///
/// End-of-data messages, and [ExtractService::stop_service], discard any PDU in progress.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use cfdp_extract::bus::{EventBus, LocalBus, Message};
/// use cfdp_extract::config::ExtractorConfig;
/// use cfdp_extract::extract::FramePduExtractor;
/// use cfdp_extract::service::ExtractService;
///
/// let bus: Arc<dyn EventBus> = Arc::new(LocalBus::new());
/// let extractor = FramePduExtractor::new(ExtractorConfig::builder().vcid(0).build());
/// let mut service = ExtractService::new(extractor, bus.clone());
/// service.start_service();
/// bus.publish(Message::EndOfData).unwrap();
/// service.stop_service();
/// ```
pub struct ExtractService<E>
where
    E: Extractor + 'static,
{
    extractor: Arc<Mutex<E>>,
    bus: Arc<dyn EventBus>,
    subscriptions: Vec<SubscriptionId>,
}

impl<E> ExtractService<E>
where
    E: Extractor + 'static,
{
    pub fn new(extractor: E, bus: Arc<dyn EventBus>) -> Self {
        Self {
            extractor: Arc::new(Mutex::new(extractor)),
            bus,
            subscriptions: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    /// Subscribe to carrier and end-of-data messages. Does nothing if already started.
    pub fn start_service(&mut self) {
        if self.is_started() {
            return;
        }
        let kind = <E::Record as Carrier>::KIND;
        let bus = Arc::downgrade(&self.bus);

        let extractor = self.extractor.clone();
        let weak = bus.clone();
        let on_carrier: Handler = Arc::new(move |msg: &Message| {
            let Some(record) = <E::Record as Carrier>::from_message(msg) else {
                return;
            };
            let effects = match extractor.lock() {
                Ok(mut ex) => ex.consume(record),
                Err(err) => {
                    error!("extractor unavailable: {err}");
                    return;
                }
            };
            publish_effects(&weak, effects);
        });

        let extractor = self.extractor.clone();
        let on_eod: Handler = Arc::new(move |_: &Message| {
            let effects = match extractor.lock() {
                Ok(mut ex) => ex.flush(),
                Err(err) => {
                    error!("extractor unavailable: {err}");
                    return;
                }
            };
            debug!("end of data");
            publish_effects(&bus, effects);
        });

        self.subscriptions
            .push(self.bus.subscribe(kind, on_carrier));
        self.subscriptions
            .push(self.bus.subscribe(MessageKind::EndOfData, on_eod));
        info!(?kind, "extraction service started");
    }

    /// Discard any PDU in progress and unsubscribe.
    pub fn stop_service(&mut self) {
        if !self.is_started() {
            return;
        }
        for id in self.subscriptions.drain(..) {
            self.bus.unsubscribe(id);
        }
        let effects = match self.extractor.lock() {
            Ok(mut ex) => ex.flush(),
            Err(err) => {
                error!("extractor unavailable: {err}");
                Vec::new()
            }
        };
        publish_effects(&Arc::downgrade(&self.bus), effects);
        info!(totals = ?self.totals(), "extraction service stopped");
    }

    #[must_use]
    pub fn totals(&self) -> Stats {
        self.extractor
            .lock()
            .map(|ex| ex.totals())
            .unwrap_or_default()
    }

    /// Run `func` with the extractor, or `None` if it is unavailable.
    pub fn with_extractor<R>(&self, func: impl FnOnce(&E) -> R) -> Option<R> {
        self.extractor.lock().ok().map(|ex| func(&ex))
    }
}

impl<E> Drop for ExtractService<E>
where
    E: Extractor + 'static,
{
    fn drop(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.bus.unsubscribe(id);
        }
    }
}

/// Publish effects that have a bus representation. Failures are logged, not retried.
fn publish_effects(bus: &Weak<dyn EventBus>, effects: Vec<Effect>) {
    let Some(bus) = bus.upgrade() else {
        debug!("bus dropped, discarding {} effects", effects.len());
        return;
    };
    for msg in effects.into_iter().filter_map(Effect::into_message) {
        let kind = msg.kind();
        if let Err(err) = bus.publish(msg) {
            error!(?kind, "failed to publish: {err}");
        }
    }
}
