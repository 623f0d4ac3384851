//! GeneralMessage request-response collector.

use crate::collect::SituationFilter;
use crate::connector::SituationCollector;
use crate::identifier::{ObjectId, MESSAGE_IDENTIFIER};
use crate::model::{SituationAffect, SituationMessage, SituationUpdateEvent};
use crate::observability::events;
use crate::partner::Partner;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use siri_messages::{GeneralMessage, GetGeneralMessage};
use std::sync::{Arc, Weak};
use tracing::debug;

const COMPONENT: &str = "general_message_request_collector";

/// Maps delivered info messages into situation update events expressed in
/// the partner's namespace.
pub(crate) fn situation_events_from_messages(
    partner: &Partner,
    kind: &str,
    now: DateTime<Utc>,
    messages: &[GeneralMessage],
) -> Vec<SituationUpdateEvent> {
    messages
        .iter()
        .map(|message| {
            let mut affects = Vec::new();
            for line_ref in &message.content.line_refs {
                affects.push(SituationAffect::Line(ObjectId::new(kind, line_ref.clone())));
            }
            for stop_ref in &message.content.stop_point_refs {
                affects.push(SituationAffect::StopArea(ObjectId::new(
                    kind,
                    stop_ref.clone(),
                )));
            }
            for section in &message.content.line_sections {
                affects.push(SituationAffect::LineSection {
                    first_stop: ObjectId::new(kind, section.first_stop.clone()),
                    last_stop: ObjectId::new(kind, section.last_stop.clone()),
                    line: ObjectId::new(kind, section.line_ref.clone()),
                });
            }
            SituationUpdateEvent {
                id: uuid::Uuid::new_v4().to_string(),
                origin: partner.slug().to_string(),
                created_at: now,
                recorded_at: message.recorded_at_time.unwrap_or(now),
                situation_object_id: ObjectId::new(kind, message.info_message_identifier.clone()),
                version: message.info_message_version,
                channel: message.info_channel_ref.clone(),
                valid_until: message.valid_until_time,
                messages: message
                    .content
                    .messages
                    .iter()
                    .map(|text| SituationMessage {
                        content: text.content.clone(),
                        message_type: text.message_type.clone(),
                    })
                    .collect(),
                affects,
            }
        })
        .collect()
}

pub struct SiriGeneralMessageRequestCollector {
    partner: Weak<Partner>,
}

impl SiriGeneralMessageRequestCollector {
    pub fn new(partner: &Arc<Partner>) -> Self {
        Self {
            partner: Arc::downgrade(partner),
        }
    }
}

#[async_trait]
impl SituationCollector for SiriGeneralMessageRequestCollector {
    async fn request_situation_update(&self, filter: &SituationFilter) {
        let Some(partner) = self.partner.upgrade() else {
            return;
        };
        let context = partner.context();
        let Some(kind) = partner.remote_object_id_kind() else {
            return;
        };
        let start_time = context.clock.now();

        let mut request = GetGeneralMessage {
            message_identifier: partner
                .identifier_generator(MESSAGE_IDENTIFIER)
                .new_message_identifier(),
            requestor_ref: partner.requestor_ref(),
            request_timestamp: Some(start_time),
            ..Default::default()
        };
        match filter {
            SituationFilter::All => {}
            SituationFilter::Line(object_id) => {
                request.line_refs.push(object_id.value().to_string());
            }
            SituationFilter::StopArea(object_id) => {
                request.stop_point_refs.push(object_id.value().to_string());
            }
        }

        let response = context
            .transport
            .general_message(&partner.remote_target(), &request)
            .await;
        let elapsed = (context.clock.now() - start_time).to_string();

        let mut audit_event = partner.new_audit_event();
        audit_event.set("siriType", "GeneralMessageResponse");
        audit_event.set("messageIdentifier", request.message_identifier.clone());
        audit_event.set("responseTime", elapsed);

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                audit_event.set("response", format!("Error during GeneralMessage: {err}"));
                context.audit.write_event(audit_event);
                debug!(
                    event = events::COLLECTOR_REQUEST_FAILED,
                    component = COMPONENT,
                    partner = %partner.slug(),
                    err = %err,
                    "general message request failed"
                );
                return;
            }
        };
        audit_event.set("status", response.delivery.status.to_string());
        audit_event.set(
            "generalMessages",
            response.delivery.general_messages.len().to_string(),
        );
        context.audit.write_event(audit_event);

        if !response.delivery.status {
            return;
        }
        let updates = situation_events_from_messages(
            &partner,
            &kind,
            context.clock.now(),
            &response.delivery.general_messages,
        );
        context
            .update_hub
            .broadcast_situation_update_events(&updates);
    }
}
