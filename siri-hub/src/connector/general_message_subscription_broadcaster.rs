//! GeneralMessage subscription broadcaster.

use crate::connector::general_message_request_broadcaster::general_message_from_situation;
use crate::connector::siri_support;
use crate::connector::BroadcastQueues;
use crate::identifier::RESPONSE_MESSAGE_IDENTIFIER;
use crate::model::{ModelEvent, ModelEventKind, Situation, SituationId};
use crate::observability::events;
use crate::partner::subscriptions::GENERAL_MESSAGE_BROADCAST;
use crate::partner::{Partner, Subscription, SubscriptionId};
use parking_lot::Mutex;
use siri_messages::{
    NotifyGeneralMessage, SubscribeRequest, SubscriptionPayloadKind, SubscriptionResponse,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

const COMPONENT: &str = "general_message_subscription_broadcaster";

pub struct SiriGeneralMessageSubscriptionBroadcaster {
    partner: Weak<Partner>,
    queues: BroadcastQueues<SituationId>,
    /// Last broadcast version per (subscription, situation); carries the
    /// state for resourceless subscriptions too.
    versions: Mutex<HashMap<(SubscriptionId, SituationId), i64>>,
}

impl SiriGeneralMessageSubscriptionBroadcaster {
    pub fn new(partner: &Arc<Partner>) -> Self {
        Self {
            partner: Arc::downgrade(partner),
            queues: BroadcastQueues::default(),
            versions: Mutex::new(HashMap::new()),
        }
    }

    fn partner(&self) -> Option<Arc<Partner>> {
        self.partner.upgrade()
    }

    pub fn handle_subscribe_request(&self, request: &SubscribeRequest) -> SubscriptionResponse {
        let Some(partner) = self.partner() else {
            return SubscriptionResponse::default();
        };
        let model = partner.context().model.clone();
        let queues = &self.queues;
        let response = siri_support::handle_subscribe_request(
            &partner,
            GENERAL_MESSAGE_BROADCAST,
            SubscriptionPayloadKind::GeneralMessage,
            request,
            &|object_id| {
                model.lines().find_by_object_id(object_id).is_some()
                    || model.stop_areas().find_by_object_id(object_id).is_some()
            },
            &|subscription, _| {
                for situation in model.situations().find_all() {
                    queues.enqueue(subscription.id().clone(), situation.id().clone());
                }
            },
        );

        // Seed resourceless subscriptions too: they match everything.
        for entry in &request.entries {
            if entry.kind != SubscriptionPayloadKind::GeneralMessage
                || !entry.resource_refs.is_empty()
            {
                continue;
            }
            if let Some(subscription) = partner
                .subscriptions()
                .find_by_external_id(&entry.subscription_identifier)
            {
                for situation in model.situations().find_all() {
                    self.queues
                        .enqueue(subscription.id().clone(), situation.id().clone());
                }
            }
        }
        response
    }

    pub fn handle_model_event(&self, event: &ModelEvent) {
        if event.kind != ModelEventKind::Situation {
            return;
        }
        let Some(partner) = self.partner() else {
            return;
        };
        let Some(situation) = partner
            .context()
            .model
            .situations()
            .find(&SituationId::from(event.id.as_str()))
        else {
            return;
        };
        for subscription in partner
            .subscriptions()
            .find_by_kind(GENERAL_MESSAGE_BROADCAST)
        {
            if self.matches(&partner, &subscription, &situation) {
                self.queues
                    .enqueue(subscription.id().clone(), situation.id().clone());
            }
        }
    }

    /// A subscription without resources matches everything; otherwise the
    /// situation must affect one of the subscribed lines or stops.
    fn matches(
        &self,
        partner: &Partner,
        subscription: &Arc<Subscription>,
        situation: &Situation,
    ) -> bool {
        let resources = subscription.resources();
        if resources.is_empty() {
            return true;
        }
        let model = &partner.context().model;
        resources.iter().any(|resource| {
            let Some(object_id) = &resource.reference.object_id else {
                return false;
            };
            if let Some(line) = model.lines().find_by_object_id(object_id) {
                if situation.affects_line(line.id()) {
                    return true;
                }
            }
            if let Some(stop_area) = model.stop_areas().find_by_object_id(object_id) {
                if situation.affects_stop_area(stop_area.id()) {
                    return true;
                }
            }
            false
        })
    }

    pub async fn flush(&self) {
        let Some(partner) = self.partner() else {
            return;
        };
        let notifies = self.prepare_notifies(&partner);
        for notify in notifies {
            self.send(&partner, notify).await;
        }
    }

    fn prepare_notifies(&self, partner: &Arc<Partner>) -> Vec<NotifyGeneralMessage> {
        let pending = self.queues.swap_events();
        if pending.is_empty() {
            return Vec::new();
        }
        let context = partner.context();
        let tx = context.model.transaction();
        let now = context.clock.now();
        let mut notifies = Vec::new();

        for (subscription_id, situation_ids) in pending {
            let Some(subscription) = partner.subscriptions().find(&subscription_id) else {
                debug!(
                    event = events::BROADCASTER_UNKNOWN_REFERENCE,
                    component = COMPONENT,
                    subscription_id = %subscription_id,
                    reason = "unknown_subscription",
                    "dropping pending situations"
                );
                continue;
            };
            let mut processed: HashSet<SituationId> = HashSet::new();
            let mut general_messages = Vec::new();

            for situation_id in situation_ids {
                if !processed.insert(situation_id.clone()) {
                    continue;
                }
                let Some(situation) = tx.situation(&situation_id) else {
                    continue;
                };
                if !situation.valid_at(now) {
                    continue;
                }
                let version_key = (subscription_id.clone(), situation_id.clone());
                let last_version = self.versions.lock().get(&version_key).copied();
                if last_version.map(|version| version >= situation.version).unwrap_or(false) {
                    continue;
                }
                let Some(message) = general_message_from_situation(partner, &tx, &situation)
                else {
                    warn!(
                        event = events::BROADCASTER_UNKNOWN_REFERENCE,
                        component = COMPONENT,
                        partner = %partner.slug(),
                        reason = "unmapped_situation",
                        "skipping situation"
                    );
                    continue;
                };
                self.versions.lock().insert(version_key, situation.version);
                general_messages.push(message);
            }

            if general_messages.is_empty() {
                continue;
            }
            notifies.push(NotifyGeneralMessage {
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
                general_messages,
            });
        }
        notifies
    }

    async fn send(&self, partner: &Arc<Partner>, notify: NotifyGeneralMessage) {
        let context = partner.context();
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

        if let Err(err) = context
            .transport
            .notify_general_message(&partner.remote_target(), &notify)
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
