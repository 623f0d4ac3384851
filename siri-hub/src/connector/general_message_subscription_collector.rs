//! GeneralMessage subscription collector.

use crate::collect::SituationFilter;
use crate::connector::general_message_request_collector::situation_events_from_messages;
use crate::connector::SituationCollector;
use crate::identifier::{ObjectId, MESSAGE_IDENTIFIER, SUBSCRIPTION_IDENTIFIER};
use crate::model::Reference;
use crate::observability::events;
use crate::partner::subscriptions::GENERAL_MESSAGE_COLLECT;
use crate::partner::{Partner, SubscriptionLifecycle};
use async_trait::async_trait;
use siri_messages::{
    NotifyGeneralMessage, SubscribeRequest, SubscriptionPayloadKind, SubscriptionRequestEntry,
};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

const COMPONENT: &str = "general_message_subscription_collector";

pub struct SiriGeneralMessageSubscriptionCollector {
    partner: Weak<Partner>,
}

impl SiriGeneralMessageSubscriptionCollector {
    pub fn new(partner: &Arc<Partner>) -> Self {
        Self {
            partner: Arc::downgrade(partner),
        }
    }

    fn partner(&self) -> Option<Arc<Partner>> {
        self.partner.upgrade()
    }

    /// (Re)establishes the remote subscription; used on partner start and on
    /// recovery.
    pub async fn subscribe_all(&self) {
        let Some(partner) = self.partner() else {
            return;
        };
        let resource_refs: Vec<String> = partner
            .subscriptions()
            .find_by_kind(GENERAL_MESSAGE_COLLECT)
            .iter()
            .flat_map(|subscription| subscription.resources())
            .filter_map(|resource| resource.reference.object_id)
            .map(|object_id| object_id.value().to_string())
            .collect();
        self.send_subscribe_request(&partner, resource_refs).await;
    }

    async fn send_subscribe_request(&self, partner: &Arc<Partner>, resource_refs: Vec<String>) {
        let context = partner.context();
        let now = context.clock.now();
        let subscription = partner
            .subscriptions()
            .find_or_create_by_kind(GENERAL_MESSAGE_COLLECT);
        if subscription
            .subscription_option(crate::partner::subscriptions::OPTION_MESSAGE_IDENTIFIER)
            .is_none()
        {
            subscription.set_external_id(
                partner
                    .identifier_generator(SUBSCRIPTION_IDENTIFIER)
                    .new_message_identifier(),
            );
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
                kind: SubscriptionPayloadKind::GeneralMessage,
                subscriber_ref: partner.requestor_ref(),
                subscription_identifier: subscription.external_id(),
                initial_termination_time: Some(now + chrono::Duration::days(1)),
                message_identifier,
                resource_refs,
                change_before_updates: None,
            }],
        };

        let mut audit_event = partner.new_audit_event();
        audit_event.set("siriType", "SubscriptionRequest");
        audit_event.set("subscriptionIdentifier", subscription.external_id());

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

    /// Incoming Notify from the transport layer.
    pub fn handle_notify(&self, notify: &NotifyGeneralMessage) {
        let Some(partner) = self.partner() else {
            return;
        };
        let context = partner.context();
        let Some(kind) = partner.remote_object_id_kind() else {
            return;
        };

        let mut audit_event = partner.new_audit_event();
        audit_event.set("siriType", "NotifyGeneralMessage");
        audit_event.set(
            "subscriptionIdentifier",
            notify.subscription_identifier.clone(),
        );
        audit_event.set("status", notify.status.to_string());
        audit_event.set(
            "generalMessages",
            notify.general_messages.len().to_string(),
        );
        context.audit.write_event(audit_event);

        if !notify.status {
            return;
        }
        let updates = situation_events_from_messages(
            &partner,
            &kind,
            context.clock.now(),
            &notify.general_messages,
        );
        context
            .update_hub
            .broadcast_situation_update_events(&updates);
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
impl SituationCollector for SiriGeneralMessageSubscriptionCollector {
    /// Ensures the filter target is part of the upstream subscription.
    async fn request_situation_update(&self, filter: &SituationFilter) {
        let Some(partner) = self.partner() else {
            return;
        };
        let object_id: Option<ObjectId> = match filter {
            SituationFilter::All => None,
            SituationFilter::Line(object_id) | SituationFilter::StopArea(object_id) => {
                Some(object_id.clone())
            }
        };

        let subscription = partner
            .subscriptions()
            .find_or_create_by_kind(GENERAL_MESSAGE_COLLECT);
        let resource_refs = match object_id {
            Some(object_id) => {
                if subscription.resource(&object_id).is_some() {
                    return;
                }
                subscription.create_and_add_resource(Reference::new(object_id.clone()));
                vec![object_id.value().to_string()]
            }
            None => {
                if subscription.lifecycle() == SubscriptionLifecycle::Active {
                    return;
                }
                Vec::new()
            }
        };
        self.send_subscribe_request(&partner, resource_refs).await;
    }
}
