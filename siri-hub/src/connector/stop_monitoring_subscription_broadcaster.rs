//! StopMonitoring subscription broadcaster: change-driven queue flushed
//! every few seconds into Notify deliveries.

use crate::connector::siri_support::{self, BuildSkip};
use crate::connector::BroadcastQueues;
use crate::identifier::RESPONSE_MESSAGE_IDENTIFIER;
use crate::model::{ModelEvent, ModelEventKind, StopAreaId, StopVisitId};
use crate::observability::events;
use crate::partner::subscriptions::{
    LastState, StopVisitLastState, STOP_MONITORING_BROADCAST,
};
use crate::partner::{Partner, SubscriptionId};
use parking_lot::Mutex;
use siri_messages::{
    ErrorCondition, NotifyStopMonitoring, SubscribeRequest, SubscriptionPayloadKind,
    SubscriptionResponse,
};
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

const COMPONENT: &str = "stop_monitoring_subscription_broadcaster";

pub struct SiriStopMonitoringSubscriptionBroadcaster {
    partner: Weak<Partner>,
    queues: BroadcastQueues<StopVisitId>,
}

impl SiriStopMonitoringSubscriptionBroadcaster {
    pub fn new(partner: &Arc<Partner>) -> Self {
        Self {
            partner: Arc::downgrade(partner),
            queues: BroadcastQueues::default(),
        }
    }

    fn partner(&self) -> Option<Arc<Partner>> {
        self.partner.upgrade()
    }

    /// Registers the requested stop areas and seeds their current visits so
    /// the first flush carries a full picture.
    pub fn handle_subscribe_request(&self, request: &SubscribeRequest) -> SubscriptionResponse {
        let Some(partner) = self.partner() else {
            return SubscriptionResponse::default();
        };
        let model = partner.context().model.clone();
        let queues = &self.queues;
        siri_support::handle_subscribe_request(
            &partner,
            STOP_MONITORING_BROADCAST,
            SubscriptionPayloadKind::StopMonitoring,
            request,
            &|object_id| model.stop_areas().find_by_object_id(object_id).is_some(),
            &|subscription, object_id| {
                if let Some(stop_area) = model.stop_areas().find_by_object_id(object_id) {
                    for visit in model.stop_visits().find_by_stop_area_id(stop_area.id()) {
                        queues.enqueue(subscription.id().clone(), visit.id().clone());
                    }
                }
            },
        )
    }

    pub fn handle_model_event(&self, event: &ModelEvent) {
        let Some(partner) = self.partner() else {
            return;
        };
        let model = &partner.context().model;
        match event.kind {
            ModelEventKind::StopVisit => {
                let Some(visit) = model.stop_visits().find(&StopVisitId::from(event.id.as_str()))
                else {
                    return;
                };
                for object_id in siri_support::stop_area_resource_ids(&partner, &visit) {
                    if let Some(subscription) = partner
                        .subscriptions()
                        .find_by_resource(STOP_MONITORING_BROADCAST, &object_id)
                    {
                        self.queues
                            .enqueue(subscription.id().clone(), visit.id().clone());
                    }
                }
            }
            ModelEventKind::StopArea => {
                let Some(stop_area) =
                    model.stop_areas().find(&StopAreaId::from(event.id.as_str()))
                else {
                    return;
                };
                if stop_area.monitored() {
                    return;
                }
                let origins_down = stop_area.origins().partners_down();
                if origins_down.is_empty() {
                    return;
                }
                let Some(kind) = partner.remote_object_id_kind() else {
                    return;
                };
                for object_id in model
                    .stop_areas()
                    .find_ascendants_with_object_id_kind(stop_area.id(), &kind)
                {
                    if let Some(subscription) = partner
                        .subscriptions()
                        .find_by_resource(STOP_MONITORING_BROADCAST, &object_id)
                    {
                        self.queues.enqueue_not_monitored(
                            subscription.id().clone(),
                            origins_down.iter().cloned(),
                        );
                    }
                }
            }
            _ => {}
        }
    }

    pub async fn flush(&self) {
        let Some(partner) = self.partner() else {
            return;
        };
        let mut notifies = self.prepare_notifies(&partner);
        notifies.extend(self.prepare_not_monitored(&partner));
        for notify in notifies {
            self.send(&partner, notify).await;
        }
    }

    fn prepare_notifies(&self, partner: &Arc<Partner>) -> Vec<NotifyStopMonitoring> {
        let pending = self.queues.swap_events();
        if pending.is_empty() {
            return Vec::new();
        }
        let context = partner.context();
        let tx = context.model.transaction();
        let now = context.clock.now();
        let abort_on_missing = partner.abort_notify_on_missing_reference();
        let mut notifies = Vec::new();

        for (subscription_id, visit_ids) in pending {
            let Some(subscription) = partner.subscriptions().find(&subscription_id) else {
                debug!(
                    event = events::BROADCASTER_UNKNOWN_REFERENCE,
                    component = COMPONENT,
                    subscription_id = %subscription_id,
                    reason = "unknown_subscription",
                    "dropping pending visits"
                );
                continue;
            };
            let change_before = subscription.change_before_updates();
            let mut processed: HashSet<StopVisitId> = HashSet::new();
            let mut monitored_stop_visits = Vec::new();
            let mut aborted = false;

            for visit_id in visit_ids {
                if !processed.insert(visit_id.clone()) {
                    continue;
                }
                let Some(visit) = tx.stop_visit(&visit_id) else {
                    continue;
                };
                let Some(resource_id) = siri_support::stop_area_resource_ids(partner, &visit)
                    .into_iter()
                    .find(|object_id| subscription.resource(object_id).is_some())
                else {
                    continue;
                };
                if let Some(LastState::StopVisit(last)) =
                    subscription.last_state(&resource_id, visit.id().as_str())
                {
                    if !last.material_change(&visit, change_before) {
                        continue;
                    }
                }
                match siri_support::build_monitored_stop_visit(partner, &tx, &visit) {
                    Ok(monitored) => {
                        subscription.set_last_state(
                            &resource_id,
                            visit.id().as_str(),
                            LastState::StopVisit(StopVisitLastState::from_stop_visit(&visit)),
                        );
                        monitored_stop_visits.push(monitored);
                    }
                    Err(skip) => {
                        warn!(
                            event = events::BROADCASTER_UNKNOWN_REFERENCE,
                            component = COMPONENT,
                            partner = %partner.slug(),
                            reason = skip.as_str(),
                            "skipping stop visit"
                        );
                        if abort_on_missing && skip == BuildSkip::MissingVehicleJourney {
                            debug!(
                                event = events::BROADCASTER_NOTIFY_ABORTED,
                                component = COMPONENT,
                                subscription_id = %subscription_id,
                                "aborting notify on missing reference"
                            );
                            aborted = true;
                            break;
                        }
                    }
                }
            }

            if aborted || monitored_stop_visits.is_empty() {
                continue;
            }
            notifies.push(NotifyStopMonitoring {
                address: partner.address(),
                producer_ref: partner.producer_ref(),
                response_message_identifier: partner
                    .identifier_generator(RESPONSE_MESSAGE_IDENTIFIER)
                    .new_message_identifier(),
                response_timestamp: Some(now),
                subscriber_ref: partner.subscriber_ref(),
                subscription_identifier: subscription.external_id(),
                request_message_ref: subscription
                    .subscription_option(crate::partner::subscriptions::OPTION_MESSAGE_IDENTIFIER)
                    .unwrap_or_default(),
                status: true,
                error_condition: None,
                monitored_stop_visits,
            });
        }
        notifies
    }

    fn prepare_not_monitored(&self, partner: &Arc<Partner>) -> Vec<NotifyStopMonitoring> {
        let pending = self.queues.swap_not_monitored();
        if pending.is_empty() {
            return Vec::new();
        }
        let now = partner.context().clock.now();
        let mut notifies = Vec::new();
        for (subscription_id, producers) in pending {
            let Some(subscription) = partner.subscriptions().find(&subscription_id) else {
                continue;
            };
            for producer in producers {
                notifies.push(NotifyStopMonitoring {
                    address: partner.address(),
                    producer_ref: partner.producer_ref(),
                    response_message_identifier: partner
                        .identifier_generator(RESPONSE_MESSAGE_IDENTIFIER)
                        .new_message_identifier(),
                    response_timestamp: Some(now),
                    subscriber_ref: partner.subscriber_ref(),
                    subscription_identifier: subscription.external_id(),
                    request_message_ref: subscription
                        .subscription_option(
                            crate::partner::subscriptions::OPTION_MESSAGE_IDENTIFIER,
                        )
                        .unwrap_or_default(),
                    status: false,
                    error_condition: Some(ErrorCondition::other_error(
                        1,
                        format!("Erreur [PRODUCER_UNAVAILABLE] : {producer} indisponible"),
                    )),
                    monitored_stop_visits: Vec::new(),
                });
            }
        }
        notifies
    }

    async fn send(&self, partner: &Arc<Partner>, notify: NotifyStopMonitoring) {
        let context = partner.context();
        let mut audit_event = partner.new_audit_event();
        audit_event.set("siriType", "NotifyStopMonitoring");
        audit_event.set("subscriptionIdentifier", notify.subscription_identifier.clone());
        audit_event.set("subscriberRef", notify.subscriber_ref.clone());
        audit_event.set("status", notify.status.to_string());
        audit_event.set(
            "stopVisits",
            notify.monitored_stop_visits.len().to_string(),
        );
        if let Some(error) = &notify.error_condition {
            audit_event.set("errorType", error.error_type.to_string());
            audit_event.set("errorText", error.error_text.clone());
        }
        context.audit.write_event(audit_event);

        if let Err(err) = context
            .transport
            .notify_stop_monitoring(&partner.remote_target(), &notify)
            .await
        {
            // Best effort: the next material change carries the latest state.
            let mut failure = partner.new_audit_event();
            failure.set("siriType", "NotifyStopMonitoring");
            failure.set("response", format!("Error during Notify: {err}"));
            context.audit.write_event(failure);
            warn!(
                event = events::BROADCASTER_NOTIFY_FAILED,
                component = COMPONENT,
                partner = %partner.slug(),
                err = %err,
                "notify delivery failed"
            );
        } else {
            debug!(
                event = events::BROADCASTER_NOTIFY_SENT,
                component = COMPONENT,
                partner = %partner.slug(),
                "notify delivered"
            );
        }
    }
}

/// Recording double keyed by the same tag grammar, for engine tests.
pub struct TestStopMonitoringSubscriptionBroadcaster {
    partner: Weak<Partner>,
    received: Mutex<Vec<ModelEvent>>,
}

impl TestStopMonitoringSubscriptionBroadcaster {
    pub fn new(partner: &Arc<Partner>) -> Self {
        Self {
            partner: Arc::downgrade(partner),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn handle_model_event(&self, event: &ModelEvent) {
        if self.partner.upgrade().is_none() {
            return;
        }
        self.received.lock().push(event.clone());
    }

    pub fn events(&self) -> Vec<ModelEvent> {
        self.received.lock().clone()
    }
}
