//! Broadcaster engine: pumps model change events into the subscription
//! broadcasters of every partner.

use crate::model::ModelEvent;
use crate::observability::events;
use crate::partner::PartnerRegistry;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tracing::debug;

/// One instance per referential, fed by the single model event channel.
pub struct BroadcastEngine {
    registry: Arc<PartnerRegistry>,
    sender: UnboundedSender<ModelEvent>,
    receiver: Mutex<Option<UnboundedReceiver<ModelEvent>>>,
    stop: Mutex<Option<watch::Sender<bool>>>,
}

impl BroadcastEngine {
    pub fn new(registry: Arc<PartnerRegistry>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            registry,
            sender,
            receiver: Mutex::new(Some(receiver)),
            stop: Mutex::new(None),
        }
    }

    /// Sender side to attach to the model.
    pub fn event_sender(&self) -> UnboundedSender<ModelEvent> {
        self.sender.clone()
    }

    pub fn start(&self) {
        let Some(mut receiver) = self.receiver.lock().take() else {
            return;
        };
        let (stop_sender, mut stop_receiver) = watch::channel(false);
        *self.stop.lock() = Some(stop_sender);
        let registry = self.registry.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = stop_receiver.changed() => {
                        if changed.is_err() || *stop_receiver.borrow() {
                            break;
                        }
                    }
                    event = receiver.recv() => {
                        match event {
                            Some(event) => Self::route(&registry, &event),
                            None => break,
                        }
                    }
                }
            }
            debug!(
                event = events::ENGINE_EVENT_PUMP_STOPPED,
                component = "broadcast_engine",
                "event pump stopped"
            );
        });
    }

    /// Asks each partner's subscription broadcasters whether the change
    /// matches one of their subscriptions.
    fn route(registry: &Arc<PartnerRegistry>, event: &ModelEvent) {
        for partner in registry.find_all() {
            for connector in partner.subscription_broadcasters() {
                connector.handle_model_event(event);
            }
        }
    }

    pub fn stop(&self) {
        if let Some(sender) = self.stop.lock().take() {
            let _ = sender.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BroadcastEngine;
    use crate::connector::{Connector, TEST_STOP_MONITORING_SUBSCRIPTION_BROADCASTER};
    use crate::model::StopVisit;
    use crate::partner::tests::test_context;
    use crate::partner::{PartnerRegistry, PartnerSlug};

    #[tokio::test]
    async fn model_saves_reach_subscription_broadcasters() {
        let context = test_context();
        let registry = PartnerRegistry::new(context.clone());

        let partner = registry.new_partner(PartnerSlug::from("partner"));
        partner.set_connector_types(vec![
            TEST_STOP_MONITORING_SUBSCRIPTION_BROADCASTER.to_string()
        ]);
        registry.save(&partner);

        let engine = BroadcastEngine::new(registry.clone());
        context.model.attach_event_sender(engine.event_sender());
        engine.start();

        let mut visit = StopVisit::new();
        context.model.stop_visits().save(&mut visit).unwrap();

        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let connector =
            match partner.connector(TEST_STOP_MONITORING_SUBSCRIPTION_BROADCASTER) {
                Some(Connector::TestStopMonitoringSubscriptionBroadcaster(connector)) => connector,
                _ => panic!("connector should be materialized"),
            };
        assert_eq!(connector.events().len(), 1);

        engine.stop();
    }
}
