//! VehicleMonitoring subscription broadcaster.

use crate::connector::vehicle_monitoring_request_broadcaster::vehicle_activity;
use crate::connector::BroadcastQueues;
use crate::identifier::RESPONSE_MESSAGE_IDENTIFIER;
use crate::model::{ModelEvent, ModelEventKind, StopAreaId, StopVisitId, VehicleJourneyId};
use crate::observability::events;
use crate::partner::subscriptions::{
    LastState, StopVisitLastState, VEHICLE_MONITORING_BROADCAST,
};
use crate::partner::Partner;
use siri_messages::{
    ErrorCondition, NotifyVehicleMonitoring, SubscribeRequest, SubscriptionPayloadKind,
    SubscriptionResponse,
};
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use crate::connector::siri_support;

const COMPONENT: &str = "vehicle_monitoring_subscription_broadcaster";

pub struct SiriVehicleMonitoringSubscriptionBroadcaster {
    partner: Weak<Partner>,
    queues: BroadcastQueues<VehicleJourneyId>,
}

impl SiriVehicleMonitoringSubscriptionBroadcaster {
    pub fn new(partner: &Arc<Partner>) -> Self {
        Self {
            partner: Arc::downgrade(partner),
            queues: BroadcastQueues::default(),
        }
    }

    fn partner(&self) -> Option<Arc<Partner>> {
        self.partner.upgrade()
    }

    /// Registers the requested lines and seeds their journeys.
    pub fn handle_subscribe_request(&self, request: &SubscribeRequest) -> SubscriptionResponse {
        let Some(partner) = self.partner() else {
            return SubscriptionResponse::default();
        };
        let model = partner.context().model.clone();
        let queues = &self.queues;
        siri_support::handle_subscribe_request(
            &partner,
            VEHICLE_MONITORING_BROADCAST,
            SubscriptionPayloadKind::VehicleMonitoring,
            request,
            &|object_id| model.lines().find_by_object_id(object_id).is_some(),
            &|subscription, object_id| {
                let Some(line) = model.lines().find_by_object_id(object_id) else {
                    return;
                };
                for journey in model.vehicle_journeys().find_by_line_id(line.id()) {
                    queues.enqueue(subscription.id().clone(), journey.id().clone());
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
                let Some(journey) = model.vehicle_journeys().find(&visit.vehicle_journey_id)
                else {
                    return;
                };
                self.enqueue_journey(&partner, &journey);
            }
            ModelEventKind::VehicleJourney => {
                let Some(journey) = model
                    .vehicle_journeys()
                    .find(&VehicleJourneyId::from(event.id.as_str()))
                else {
                    return;
                };
                self.enqueue_journey(&partner, &journey);
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
                for line_id in &stop_area.line_ids {
                    let Some(line) = model.lines().find(line_id) else {
                        continue;
                    };
                    let Some(line_object_id) = line.object_id(&kind) else {
                        continue;
                    };
                    if let Some(subscription) = partner
                        .subscriptions()
                        .find_by_resource(VEHICLE_MONITORING_BROADCAST, &line_object_id)
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

    fn enqueue_journey(&self, partner: &Arc<Partner>, journey: &crate::model::VehicleJourney) {
        let model = &partner.context().model;
        let Some(kind) = partner.remote_object_id_kind() else {
            return;
        };
        let Some(line) = model.lines().find(&journey.line_id) else {
            return;
        };
        let Some(line_object_id) = line.object_id(&kind) else {
            return;
        };
        if let Some(subscription) = partner
            .subscriptions()
            .find_by_resource(VEHICLE_MONITORING_BROADCAST, &line_object_id)
        {
            self.queues
                .enqueue(subscription.id().clone(), journey.id().clone());
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

    fn prepare_notifies(&self, partner: &Arc<Partner>) -> Vec<NotifyVehicleMonitoring> {
        let pending = self.queues.swap_events();
        if pending.is_empty() {
            return Vec::new();
        }
        let context = partner.context();
        let tx = context.model.transaction();
        let now = context.clock.now();
        let Some(kind) = partner.remote_object_id_kind() else {
            return Vec::new();
        };
        let mut notifies = Vec::new();

        for (subscription_id, journey_ids) in pending {
            let Some(subscription) = partner.subscriptions().find(&subscription_id) else {
                debug!(
                    event = events::BROADCASTER_UNKNOWN_REFERENCE,
                    component = COMPONENT,
                    subscription_id = %subscription_id,
                    reason = "unknown_subscription",
                    "dropping pending journeys"
                );
                continue;
            };
            let change_before = subscription.change_before_updates();
            let mut processed: HashSet<VehicleJourneyId> = HashSet::new();
            let mut vehicle_activities = Vec::new();

            for journey_id in journey_ids {
                if !processed.insert(journey_id.clone()) {
                    continue;
                }
                let Some(journey) = tx.vehicle_journey(&journey_id) else {
                    continue;
                };
                let Some(line) = tx.line(&journey.line_id) else {
                    continue;
                };
                let Some(line_object_id) = line.object_id(&kind) else {
                    continue;
                };
                if subscription.resource(&line_object_id).is_none() {
                    continue;
                }
                let current_visit = tx.following_stop_visits(journey.id(), now).into_iter().next();
                if let Some(visit) = &current_visit {
                    if let Some(LastState::StopVisit(last)) =
                        subscription.last_state(&line_object_id, journey_id.as_str())
                    {
                        if !last.material_change(visit, change_before) {
                            continue;
                        }
                    }
                }
                let Some(activity) = vehicle_activity(partner, &tx, &journey, &kind, now) else {
                    warn!(
                        event = events::BROADCASTER_UNKNOWN_REFERENCE,
                        component = COMPONENT,
                        partner = %partner.slug(),
                        reason = "unmapped_journey",
                        "skipping vehicle journey"
                    );
                    continue;
                };
                if let Some(visit) = &current_visit {
                    subscription.set_last_state(
                        &line_object_id,
                        journey_id.as_str(),
                        LastState::StopVisit(StopVisitLastState::from_stop_visit(visit)),
                    );
                }
                vehicle_activities.push(activity);
            }

            if vehicle_activities.is_empty() {
                continue;
            }
            notifies.push(NotifyVehicleMonitoring {
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
                vehicle_activities,
            });
        }
        notifies
    }

    fn prepare_not_monitored(&self, partner: &Arc<Partner>) -> Vec<NotifyVehicleMonitoring> {
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
                notifies.push(NotifyVehicleMonitoring {
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
                    vehicle_activities: Vec::new(),
                });
            }
        }
        notifies
    }

    async fn send(&self, partner: &Arc<Partner>, notify: NotifyVehicleMonitoring) {
        let context = partner.context();
        let mut audit_event = partner.new_audit_event();
        audit_event.set("siriType", "NotifyVehicleMonitoring");
        audit_event.set(
            "subscriptionIdentifier",
            notify.subscription_identifier.clone(),
        );
        audit_event.set("status", notify.status.to_string());
        audit_event.set(
            "vehicleActivities",
            notify.vehicle_activities.len().to_string(),
        );
        context.audit.write_event(audit_event);

        if let Err(err) = context
            .transport
            .notify_vehicle_monitoring(&partner.remote_target(), &notify)
            .await
        {
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
