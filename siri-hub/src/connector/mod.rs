//! Connectors: single-operation capabilities bound to a partner.
//!
//! Tags follow `[test-|siri-]<operation>-[request|subscription]-<role>`;
//! the factory map resolves a tag to a validator and a constructor. The
//! [`Connector`] sum type is what partners store and the engine dispatches
//! over.

pub mod check_status_client;
pub mod estimated_timetable_request_broadcaster;
pub mod estimated_timetable_subscription_broadcaster;
pub mod general_message_request_broadcaster;
pub mod general_message_request_collector;
pub mod general_message_subscription_broadcaster;
pub mod general_message_subscription_collector;
pub mod siri_support;
pub mod stop_monitoring_request_broadcaster;
pub mod stop_monitoring_request_collector;
pub mod stop_monitoring_subscription_broadcaster;
pub mod stop_monitoring_subscription_collector;
pub mod test_support;
pub mod vehicle_monitoring_request_broadcaster;
pub mod vehicle_monitoring_subscription_broadcaster;

pub use check_status_client::{CheckStatusClient, SiriCheckStatusClient, TestCheckStatusClient};
pub use estimated_timetable_request_broadcaster::SiriEstimatedTimetableRequestBroadcaster;
pub use estimated_timetable_subscription_broadcaster::SiriEstimatedTimetableSubscriptionBroadcaster;
pub use general_message_request_broadcaster::SiriGeneralMessageRequestBroadcaster;
pub use general_message_request_collector::SiriGeneralMessageRequestCollector;
pub use general_message_subscription_broadcaster::SiriGeneralMessageSubscriptionBroadcaster;
pub use general_message_subscription_collector::SiriGeneralMessageSubscriptionCollector;
pub use stop_monitoring_request_broadcaster::SiriStopMonitoringRequestBroadcaster;
pub use stop_monitoring_request_collector::{
    SiriStopMonitoringRequestCollector, TestStopMonitoringRequestCollector,
};
pub use stop_monitoring_subscription_broadcaster::{
    SiriStopMonitoringSubscriptionBroadcaster, TestStopMonitoringSubscriptionBroadcaster,
};
pub use stop_monitoring_subscription_collector::SiriStopMonitoringSubscriptionCollector;
pub use vehicle_monitoring_request_broadcaster::SiriVehicleMonitoringRequestBroadcaster;
pub use vehicle_monitoring_subscription_broadcaster::SiriVehicleMonitoringSubscriptionBroadcaster;

use crate::clock::Clock;
use crate::collect::{SituationFilter, StopAreaUpdateRequest};
use crate::error::ValidationErrors;
use crate::model::ModelEvent;
use crate::observability::events;
use crate::partner::{Partner, PartnerDefinition, SubscriptionId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

pub const SIRI_CHECK_STATUS_CLIENT: &str = "siri-check-status-client";
pub const TEST_CHECK_STATUS_CLIENT: &str = "test-check-status-client";
pub const SIRI_STOP_MONITORING_REQUEST_COLLECTOR: &str = "siri-stop-monitoring-request-collector";
pub const TEST_STOP_MONITORING_REQUEST_COLLECTOR: &str = "test-stop-monitoring-request-collector";
pub const SIRI_STOP_MONITORING_REQUEST_BROADCASTER: &str =
    "siri-stop-monitoring-request-broadcaster";
pub const SIRI_STOP_MONITORING_SUBSCRIPTION_COLLECTOR: &str =
    "siri-stop-monitoring-subscription-collector";
pub const SIRI_STOP_MONITORING_SUBSCRIPTION_BROADCASTER: &str =
    "siri-stop-monitoring-subscription-broadcaster";
pub const TEST_STOP_MONITORING_SUBSCRIPTION_BROADCASTER: &str =
    "test-stop-monitoring-subscription-broadcaster";
pub const SIRI_ESTIMATED_TIMETABLE_REQUEST_BROADCASTER: &str =
    "siri-estimated-timetable-request-broadcaster";
pub const SIRI_ESTIMATED_TIMETABLE_SUBSCRIPTION_BROADCASTER: &str =
    "siri-estimated-timetable-subscription-broadcaster";
pub const SIRI_GENERAL_MESSAGE_REQUEST_COLLECTOR: &str = "siri-general-message-request-collector";
pub const SIRI_GENERAL_MESSAGE_REQUEST_BROADCASTER: &str =
    "siri-general-message-request-broadcaster";
pub const SIRI_GENERAL_MESSAGE_SUBSCRIPTION_COLLECTOR: &str =
    "siri-general-message-subscription-collector";
pub const SIRI_GENERAL_MESSAGE_SUBSCRIPTION_BROADCASTER: &str =
    "siri-general-message-subscription-broadcaster";
pub const SIRI_VEHICLE_MONITORING_REQUEST_BROADCASTER: &str =
    "siri-vehicle-monitoring-request-broadcaster";
pub const SIRI_VEHICLE_MONITORING_SUBSCRIPTION_BROADCASTER: &str =
    "siri-vehicle-monitoring-subscription-broadcaster";

/// Default flush period for subscription broadcasters.
pub(crate) const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Collector able to refresh one stop area.
#[async_trait]
pub trait StopAreaCollector: Send + Sync {
    async fn request_stop_area_update(&self, request: &StopAreaUpdateRequest);
}

/// Collector able to refresh situations, optionally filtered.
#[async_trait]
pub trait SituationCollector: Send + Sync {
    async fn request_situation_update(&self, filter: &SituationFilter);
}

/// A capability attached to a partner, dispatched over by role.
#[derive(Clone)]
pub enum Connector {
    CheckStatusClient(Arc<dyn CheckStatusClient>),
    StopMonitoringRequestCollector(Arc<dyn StopAreaCollector>),
    StopMonitoringSubscriptionCollector(Arc<SiriStopMonitoringSubscriptionCollector>),
    StopMonitoringRequestBroadcaster(Arc<SiriStopMonitoringRequestBroadcaster>),
    StopMonitoringSubscriptionBroadcaster(Arc<SiriStopMonitoringSubscriptionBroadcaster>),
    TestStopMonitoringSubscriptionBroadcaster(Arc<TestStopMonitoringSubscriptionBroadcaster>),
    EstimatedTimetableRequestBroadcaster(Arc<SiriEstimatedTimetableRequestBroadcaster>),
    EstimatedTimetableSubscriptionBroadcaster(Arc<SiriEstimatedTimetableSubscriptionBroadcaster>),
    GeneralMessageRequestCollector(Arc<dyn SituationCollector>),
    GeneralMessageSubscriptionCollector(Arc<SiriGeneralMessageSubscriptionCollector>),
    GeneralMessageRequestBroadcaster(Arc<SiriGeneralMessageRequestBroadcaster>),
    GeneralMessageSubscriptionBroadcaster(Arc<SiriGeneralMessageSubscriptionBroadcaster>),
    VehicleMonitoringRequestBroadcaster(Arc<SiriVehicleMonitoringRequestBroadcaster>),
    VehicleMonitoringSubscriptionBroadcaster(Arc<SiriVehicleMonitoringSubscriptionBroadcaster>),
}

impl Connector {
    pub fn is_subscription_broadcaster(&self) -> bool {
        matches!(
            self,
            Connector::StopMonitoringSubscriptionBroadcaster(_)
                | Connector::TestStopMonitoringSubscriptionBroadcaster(_)
                | Connector::EstimatedTimetableSubscriptionBroadcaster(_)
                | Connector::GeneralMessageSubscriptionBroadcaster(_)
                | Connector::VehicleMonitoringSubscriptionBroadcaster(_)
        )
    }

    /// Routes one model change into this connector's pending queues.
    pub fn handle_model_event(&self, event: &ModelEvent) {
        match self {
            Connector::StopMonitoringSubscriptionBroadcaster(connector) => {
                connector.handle_model_event(event)
            }
            Connector::TestStopMonitoringSubscriptionBroadcaster(connector) => {
                connector.handle_model_event(event)
            }
            Connector::EstimatedTimetableSubscriptionBroadcaster(connector) => {
                connector.handle_model_event(event)
            }
            Connector::GeneralMessageSubscriptionBroadcaster(connector) => {
                connector.handle_model_event(event)
            }
            Connector::VehicleMonitoringSubscriptionBroadcaster(connector) => {
                connector.handle_model_event(event)
            }
            _ => {}
        }
    }

    /// Starts the connector's long-lived workers, if it has any.
    pub fn start(&self, partner: &Arc<Partner>, stop: watch::Receiver<bool>) {
        let clock = partner.context().clock.clone();
        match self {
            Connector::StopMonitoringSubscriptionBroadcaster(connector) => {
                spawn_flush_worker(Arc::downgrade(connector), clock, stop, |connector| async move {
                    connector.flush().await;
                });
            }
            Connector::EstimatedTimetableSubscriptionBroadcaster(connector) => {
                spawn_flush_worker(Arc::downgrade(connector), clock, stop, |connector| async move {
                    connector.flush().await;
                });
            }
            Connector::GeneralMessageSubscriptionBroadcaster(connector) => {
                spawn_flush_worker(Arc::downgrade(connector), clock, stop, |connector| async move {
                    connector.flush().await;
                });
            }
            Connector::VehicleMonitoringSubscriptionBroadcaster(connector) => {
                spawn_flush_worker(Arc::downgrade(connector), clock, stop, |connector| async move {
                    connector.flush().await;
                });
            }
            Connector::StopMonitoringSubscriptionCollector(connector) => {
                let connector = connector.clone();
                tokio::spawn(async move {
                    connector.subscribe_all().await;
                });
            }
            Connector::GeneralMessageSubscriptionCollector(connector) => {
                let connector = connector.clone();
                tokio::spawn(async move {
                    connector.subscribe_all().await;
                });
            }
            _ => {}
        }
    }
}

/// Spawns the periodic flush loop for a subscription broadcaster. The loop
/// exits when the stop signal fires or the connector is dropped.
pub(crate) fn spawn_flush_worker<C, F, Fut>(
    connector: Weak<C>,
    clock: Arc<dyn Clock>,
    mut stop: watch::Receiver<bool>,
    flush: F,
) where
    C: Send + Sync + 'static,
    F: Fn(Arc<C>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                _ = clock.sleep(FLUSH_INTERVAL) => {
                    let Some(connector) = connector.upgrade() else {
                        break;
                    };
                    debug!(event = events::BROADCASTER_TICK, component = "flush_worker", "flush tick");
                    flush(connector).await;
                }
            }
        }
        debug!(
            event = events::BROADCASTER_STOPPED,
            component = "flush_worker",
            "flush worker stopped"
        );
    });
}

/// Pending deliveries of a subscription broadcaster, swapped wholesale at
/// flush time so lock hold stays O(1).
pub(crate) struct BroadcastQueues<Id> {
    to_broadcast: Mutex<HashMap<SubscriptionId, Vec<Id>>>,
    not_monitored: Mutex<HashMap<SubscriptionId, BTreeSet<String>>>,
}

impl<Id> Default for BroadcastQueues<Id> {
    fn default() -> Self {
        Self {
            to_broadcast: Mutex::new(HashMap::new()),
            not_monitored: Mutex::new(HashMap::new()),
        }
    }
}

impl<Id> BroadcastQueues<Id> {
    pub(crate) fn enqueue(&self, subscription: SubscriptionId, id: Id) {
        self.to_broadcast
            .lock()
            .entry(subscription)
            .or_default()
            .push(id);
    }

    pub(crate) fn enqueue_not_monitored<I>(&self, subscription: SubscriptionId, origins: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.not_monitored
            .lock()
            .entry(subscription)
            .or_default()
            .extend(origins);
    }

    pub(crate) fn swap_events(&self) -> HashMap<SubscriptionId, Vec<Id>> {
        std::mem::take(&mut *self.to_broadcast.lock())
    }

    pub(crate) fn swap_not_monitored(&self) -> HashMap<SubscriptionId, BTreeSet<String>> {
        std::mem::take(&mut *self.not_monitored.lock())
    }
}

type ValidateFn = fn(&PartnerDefinition, &mut ValidationErrors);
type CreateFn = fn(&Arc<Partner>) -> Connector;

/// One entry of the tag-indexed factory map.
pub struct ConnectorFactory {
    pub validate: ValidateFn,
    pub create: CreateFn,
}

fn no_validation(_: &PartnerDefinition, _: &mut ValidationErrors) {}

/// Resolves a connector tag to its factory; unknown tags yield `None`.
pub fn connector_factory(tag: &str) -> Option<ConnectorFactory> {
    let factory = match tag {
        SIRI_CHECK_STATUS_CLIENT => ConnectorFactory {
            validate: check_status_client::validate,
            create: |partner| {
                Connector::CheckStatusClient(Arc::new(SiriCheckStatusClient::new(partner)))
            },
        },
        TEST_CHECK_STATUS_CLIENT => ConnectorFactory {
            validate: no_validation,
            create: |_| Connector::CheckStatusClient(Arc::new(TestCheckStatusClient::new())),
        },
        SIRI_STOP_MONITORING_REQUEST_COLLECTOR => ConnectorFactory {
            validate: siri_support::validate_collector,
            create: |partner| {
                Connector::StopMonitoringRequestCollector(Arc::new(
                    SiriStopMonitoringRequestCollector::new(partner),
                ))
            },
        },
        TEST_STOP_MONITORING_REQUEST_COLLECTOR => ConnectorFactory {
            validate: no_validation,
            create: |_| {
                Connector::StopMonitoringRequestCollector(Arc::new(
                    TestStopMonitoringRequestCollector::new(),
                ))
            },
        },
        SIRI_STOP_MONITORING_REQUEST_BROADCASTER => ConnectorFactory {
            validate: siri_support::validate_broadcaster,
            create: |partner| {
                Connector::StopMonitoringRequestBroadcaster(Arc::new(
                    SiriStopMonitoringRequestBroadcaster::new(partner),
                ))
            },
        },
        SIRI_STOP_MONITORING_SUBSCRIPTION_COLLECTOR => ConnectorFactory {
            validate: siri_support::validate_collector,
            create: |partner| {
                Connector::StopMonitoringSubscriptionCollector(Arc::new(
                    SiriStopMonitoringSubscriptionCollector::new(partner),
                ))
            },
        },
        SIRI_STOP_MONITORING_SUBSCRIPTION_BROADCASTER => ConnectorFactory {
            validate: siri_support::validate_broadcaster,
            create: |partner| {
                Connector::StopMonitoringSubscriptionBroadcaster(Arc::new(
                    SiriStopMonitoringSubscriptionBroadcaster::new(partner),
                ))
            },
        },
        TEST_STOP_MONITORING_SUBSCRIPTION_BROADCASTER => ConnectorFactory {
            validate: no_validation,
            create: |partner| {
                Connector::TestStopMonitoringSubscriptionBroadcaster(Arc::new(
                    TestStopMonitoringSubscriptionBroadcaster::new(partner),
                ))
            },
        },
        SIRI_ESTIMATED_TIMETABLE_REQUEST_BROADCASTER => ConnectorFactory {
            validate: siri_support::validate_broadcaster,
            create: |partner| {
                Connector::EstimatedTimetableRequestBroadcaster(Arc::new(
                    SiriEstimatedTimetableRequestBroadcaster::new(partner),
                ))
            },
        },
        SIRI_ESTIMATED_TIMETABLE_SUBSCRIPTION_BROADCASTER => ConnectorFactory {
            validate: siri_support::validate_broadcaster,
            create: |partner| {
                Connector::EstimatedTimetableSubscriptionBroadcaster(Arc::new(
                    SiriEstimatedTimetableSubscriptionBroadcaster::new(partner),
                ))
            },
        },
        SIRI_GENERAL_MESSAGE_REQUEST_COLLECTOR => ConnectorFactory {
            validate: siri_support::validate_collector,
            create: |partner| {
                Connector::GeneralMessageRequestCollector(Arc::new(
                    SiriGeneralMessageRequestCollector::new(partner),
                ))
            },
        },
        SIRI_GENERAL_MESSAGE_SUBSCRIPTION_COLLECTOR => ConnectorFactory {
            validate: siri_support::validate_collector,
            create: |partner| {
                Connector::GeneralMessageSubscriptionCollector(Arc::new(
                    SiriGeneralMessageSubscriptionCollector::new(partner),
                ))
            },
        },
        SIRI_GENERAL_MESSAGE_REQUEST_BROADCASTER => ConnectorFactory {
            validate: siri_support::validate_broadcaster,
            create: |partner| {
                Connector::GeneralMessageRequestBroadcaster(Arc::new(
                    SiriGeneralMessageRequestBroadcaster::new(partner),
                ))
            },
        },
        SIRI_GENERAL_MESSAGE_SUBSCRIPTION_BROADCASTER => ConnectorFactory {
            validate: siri_support::validate_broadcaster,
            create: |partner| {
                Connector::GeneralMessageSubscriptionBroadcaster(Arc::new(
                    SiriGeneralMessageSubscriptionBroadcaster::new(partner),
                ))
            },
        },
        SIRI_VEHICLE_MONITORING_REQUEST_BROADCASTER => ConnectorFactory {
            validate: siri_support::validate_broadcaster,
            create: |partner| {
                Connector::VehicleMonitoringRequestBroadcaster(Arc::new(
                    SiriVehicleMonitoringRequestBroadcaster::new(partner),
                ))
            },
        },
        SIRI_VEHICLE_MONITORING_SUBSCRIPTION_BROADCASTER => ConnectorFactory {
            validate: siri_support::validate_broadcaster,
            create: |partner| {
                Connector::VehicleMonitoringSubscriptionBroadcaster(Arc::new(
                    SiriVehicleMonitoringSubscriptionBroadcaster::new(partner),
                ))
            },
        },
        _ => return None,
    };
    Some(factory)
}

#[cfg(test)]
mod tests {
    use super::connector_factory;

    #[test]
    fn unknown_tags_have_no_factory() {
        assert!(connector_factory("unexistant-factory").is_none());
        assert!(connector_factory("siri-check-status-client").is_some());
        assert!(connector_factory("test-check-status-client").is_some());
    }
}
