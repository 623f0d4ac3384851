//! StopMonitoring subscription collector: subscribes upstream and feeds
//! incoming notifies to the same subscribers as the request collector.

use crate::collect::StopAreaUpdateRequest;
use crate::connector::stop_monitoring_request_collector::stop_visit_update_event;
use crate::connector::StopAreaCollector;
use crate::identifier::{ObjectId, MESSAGE_IDENTIFIER, SUBSCRIPTION_IDENTIFIER};
use crate::model::{Reference, StopAreaUpdateEvent};
use crate::observability::events;
use crate::partner::subscriptions::STOP_MONITORING_COLLECT;
use crate::partner::{Partner, SubscriptionLifecycle};
use async_trait::async_trait;
use siri_messages::{
    NotifyStopMonitoring, SubscribeRequest, SubscriptionPayloadKind, SubscriptionRequestEntry,
};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

const COMPONENT: &str = "stop_monitoring_subscription_collector";

pub struct SiriStopMonitoringSubscriptionCollector {
    partner: Weak<Partner>,
}

impl SiriStopMonitoringSubscriptionCollector {
    pub fn new(partner: &Arc<Partner>) -> Self {
        Self {
            partner: Arc::downgrade(partner),
        }
    }

    fn partner(&self) -> Option<Arc<Partner>> {
        self.partner.upgrade()
    }

    /// (Re)establishes the remote subscription for every known resource;
    /// used on partner start and on recovery.
    pub async fn subscribe_all(&self) {
        let Some(partner) = self.partner() else {
            return;
        };
        let resource_refs: Vec<String> = partner
            .subscriptions()
            .find_by_kind(STOP_MONITORING_COLLECT)
            .iter()
            .flat_map(|subscription| subscription.resources())
            .filter_map(|resource| resource.reference.object_id)
            .map(|object_id| object_id.value().to_string())
            .collect();
        if !resource_refs.is_empty() {
            self.send_subscribe_request(&partner, resource_refs).await;
        }
    }

    async fn send_subscribe_request(&self, partner: &Arc<Partner>, resource_refs: Vec<String>) {
        let context = partner.context();
        let now = context.clock.now();
        let subscription = partner
            .subscriptions()
            .find_or_create_by_kind(STOP_MONITORING_COLLECT);
        if subscription
            .subscription_option(crate::partner::subscriptions::OPTION_MESSAGE_IDENTIFIER)
            .is_none()
        {
            let external_id = partner
                .identifier_generator(SUBSCRIPTION_IDENTIFIER)
                .new_message_identifier();
            subscription.set_external_id(external_id);
        }
        let message_identifier = partner
            .identifier_generator(MESSAGE_IDENTIFIER)
            .new_message_identifier();
        subscription.set_subscription_option(
            crate::partner::subscriptions::OPTION_MESSAGE_IDENTIFIER,
            message_identifier.clone(),
        );

        let request = SubscribeRequest {
            message_identifier: message_identifier.clone(),
            requestor_ref: partner.requestor_ref(),
            request_timestamp: Some(now),
            consumer_address: partner.address(),
            entries: vec![SubscriptionRequestEntry {
                kind: SubscriptionPayloadKind::StopMonitoring,
                subscriber_ref: partner.requestor_ref(),
                subscription_identifier: subscription.external_id(),
                initial_termination_time: Some(now + chrono::Duration::days(1)),
                message_identifier,
                resource_refs: resource_refs.clone(),
                change_before_updates: None,
            }],
        };

        let mut audit_event = partner.new_audit_event();
        audit_event.set("siriType", "SubscriptionRequest");
        audit_event.set("subscriptionIdentifier", subscription.external_id());
        audit_event.set("monitoringRefs", resource_refs.join(","));

        match context
            .transport
            .subscribe(&partner.remote_target(), &request)
            .await
        {
            Ok(response) => {
                let accepted = response.response_statuses.iter().any(|status| status.status);
                audit_event.set("status", accepted.to_string());
                if accepted {
                    subscription.set_lifecycle(SubscriptionLifecycle::Active);
                    for resource_ref in &resource_refs {
                        if let Some(kind) = partner.remote_object_id_kind() {
                            subscription.mark_resource_subscribed(
                                &ObjectId::new(kind, resource_ref.clone()),
                                now,
                            );
                        }
                    }
                }
            }
            Err(err) => {
                audit_event.set("response", format!("Error during Subscribe: {err}"));
                warn!(
                    event = events::COLLECTOR_REQUEST_FAILED,
                    component = COMPONENT,
                    partner = %partner.slug(),
                    err = %err,
                    "subscribe request failed"
                );
            }
        }
        context.audit.write_event(audit_event);
    }

    /// Incoming Notify from the transport layer: forwarded as stop area
    /// update events, one per delivered monitoring reference.
    pub fn handle_notify(&self, notify: &NotifyStopMonitoring) {
        let Some(partner) = self.partner() else {
            return;
        };
        let context = partner.context();
        let Some(kind) = partner.remote_object_id_kind() else {
            return;
        };

        let mut audit_event = partner.new_audit_event();
        audit_event.set("siriType", "NotifyStopMonitoring");
        audit_event.set(
            "subscriptionIdentifier",
            notify.subscription_identifier.clone(),
        );
        audit_event.set("status", notify.status.to_string());
        audit_event.set(
            "stopVisits",
            notify.monitored_stop_visits.len().to_string(),
        );
        context.audit.write_event(audit_event);

        if !notify.status {
            return;
        }

        let mut events_by_stop_area: HashMap<
            crate::model::StopAreaId,
            StopAreaUpdateEvent,
        > = HashMap::new();
        for visit in &notify.monitored_stop_visits {
            let object_id = ObjectId::new(kind.clone(), visit.monitoring_ref.clone());
            let Some(stop_area) = context.model.stop_areas().find_by_object_id(&object_id)
            else {
                debug!(
                    event = events::COLLECTOR_UNKNOWN_REFERENCE,
                    component = COMPONENT,
                    partner = %partner.slug(),
                    reference = visit.monitoring_ref.as_str(),
                    "notify for unknown stop area"
                );
                continue;
            };
            events_by_stop_area
                .entry(stop_area.id().clone())
                .or_insert_with(|| {
                    StopAreaUpdateEvent::new(
                        uuid::Uuid::new_v4().to_string(),
                        stop_area.id().clone(),
                        partner.slug().to_string(),
                    )
                })
                .stop_visit_update_events
                .push(stop_visit_update_event(&partner, &kind, visit));
        }
        for event in events_by_stop_area.into_values() {
            context.update_hub.broadcast_stop_area_update_event(&event);
        }
    }

    /// Remote TerminateSubscription: drop the matching local state.
    pub fn handle_subscription_terminated(&self, subscription_ref: &str) {
        let Some(partner) = self.partner() else {
            return;
        };
        if let Some(subscription) = partner
            .subscriptions()
            .find_by_external_id(subscription_ref)
        {
            subscription.set_lifecycle(SubscriptionLifecycle::Terminated);
            partner.subscriptions().delete(subscription.id());
            debug!(
                event = events::SUBSCRIPTION_TERMINATED,
                component = COMPONENT,
                partner = %partner.slug(),
                subscription_id = subscription_ref,
                "remote terminated subscription"
            );
        }
    }
}

#[async_trait]
impl StopAreaCollector for SiriStopMonitoringSubscriptionCollector {
    /// Ensures the stop area is part of the upstream subscription; sends a
    /// SubscribeRequest for newly added resources.
    async fn request_stop_area_update(&self, request: &StopAreaUpdateRequest) {
        let Some(partner) = self.partner() else {
            return;
        };
        let context = partner.context();
        let Some(stop_area) = context.model.stop_areas().find(request.stop_area_id()) else {
            return;
        };
        let Some(kind) = partner.remote_object_id_kind() else {
            return;
        };
        let Some(object_id) = stop_area.object_id(&kind) else {
            return;
        };

        let subscription = partner
            .subscriptions()
            .find_or_create_by_kind(STOP_MONITORING_COLLECT);
        if subscription.resource(&object_id).is_some() {
            return;
        }
        let mut reference = Reference::new(object_id.clone());
        reference.id = Some(stop_area.id().to_string());
        reference.kind = "StopArea".to_string();
        subscription.create_and_add_resource(reference);

        self.send_subscribe_request(&partner, vec![object_id.value().to_string()])
            .await;
    }
}
