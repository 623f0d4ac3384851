//! GeneralMessage request broadcaster: answers GetGeneralMessage with the
//! currently valid situations, optionally filtered by line or stop.

use crate::identifier::{IdentifierAttributes, ObjectId, REFERENCE_IDENTIFIER,
    RESPONSE_MESSAGE_IDENTIFIER};
use crate::model::situation::SituationScope;
use crate::model::{Situation, Transaction};
use crate::partner::Partner;
use siri_messages::{
    GeneralMessage, GeneralMessageContent, GeneralMessageDelivery, GeneralMessageResponse,
    GetGeneralMessage, LineSection, MessageText,
};
use std::sync::{Arc, Weak};

/// Expresses one situation as an info message in the partner's namespace.
pub(crate) fn general_message_from_situation(
    partner: &Partner,
    tx: &Transaction<'_>,
    situation: &Situation,
) -> Option<GeneralMessage> {
    let kind = partner.remote_object_id_kind()?;
    let info_message_identifier = match situation.object_id(&kind) {
        Some(object_id) => object_id.value().to_string(),
        None => match situation.object_id("_default") {
            Some(default) => partner
                .identifier_generator(REFERENCE_IDENTIFIER)
                .new_identifier(IdentifierAttributes {
                    kind: "InfoMessage",
                    default: default.value(),
                }),
            None => situation.id().to_string(),
        },
    };

    let mut content = GeneralMessageContent {
        messages: situation
            .messages
            .iter()
            .map(|message| MessageText {
                content: message.content.clone(),
                message_type: message.message_type.clone(),
            })
            .collect(),
        ..Default::default()
    };
    for scope in &situation.scopes {
        match scope {
            SituationScope::Line(line_id) => {
                if let Some(value) = tx
                    .line(line_id)
                    .and_then(|line| line.object_id(&kind))
                    .map(|object_id| object_id.value().to_string())
                {
                    content.line_refs.push(value);
                }
            }
            SituationScope::StopArea(stop_area_id) => {
                if let Some(value) = tx
                    .stop_area(stop_area_id)
                    .and_then(|stop_area| tx.referent_or_self_object_id(&stop_area, &kind))
                    .map(|object_id| object_id.value().to_string())
                {
                    content.stop_point_refs.push(value);
                }
            }
            SituationScope::LineSection {
                first_stop,
                last_stop,
                line,
            } => {
                let first = tx
                    .stop_area(first_stop)
                    .and_then(|stop_area| tx.referent_or_self_object_id(&stop_area, &kind));
                let last = tx
                    .stop_area(last_stop)
                    .and_then(|stop_area| tx.referent_or_self_object_id(&stop_area, &kind));
                let line = tx.line(line).and_then(|line| line.object_id(&kind));
                if let (Some(first), Some(last), Some(line)) = (first, last, line) {
                    content.line_sections.push(LineSection {
                        first_stop: first.value().to_string(),
                        last_stop: last.value().to_string(),
                        line_ref: line.value().to_string(),
                    });
                }
            }
        }
    }

    Some(GeneralMessage {
        recorded_at_time: situation.recorded_at,
        item_identifier: info_message_identifier.clone(),
        info_message_identifier,
        info_channel_ref: situation.channel.clone(),
        info_message_version: situation.version,
        valid_until_time: situation.valid_until,
        content,
    })
}

pub struct SiriGeneralMessageRequestBroadcaster {
    partner: Weak<Partner>,
}

impl SiriGeneralMessageRequestBroadcaster {
    pub fn new(partner: &Arc<Partner>) -> Self {
        Self {
            partner: Arc::downgrade(partner),
        }
    }

    pub fn handle_request(&self, request: &GetGeneralMessage) -> GeneralMessageResponse {
        let Some(partner) = self.partner.upgrade() else {
            return GeneralMessageResponse::default();
        };
        let context = partner.context();
        let now = context.clock.now();
        let tx = context.model.transaction();

        let mut response = GeneralMessageResponse {
            address: partner.address(),
            producer_ref: partner.producer_ref(),
            response_message_identifier: partner
                .identifier_generator(RESPONSE_MESSAGE_IDENTIFIER)
                .new_message_identifier(),
            delivery: GeneralMessageDelivery {
                request_message_ref: request.message_identifier.clone(),
                response_timestamp: Some(now),
                status: true,
                ..Default::default()
            },
        };

        let Some(kind) = partner.remote_object_id_kind() else {
            return response;
        };
        let line_filter: Vec<crate::model::LineId> = request
            .line_refs
            .iter()
            .filter_map(|value| tx.line_by_object_id(&ObjectId::new(kind.clone(), value.clone())))
            .map(|line| line.id().clone())
            .collect();
        let stop_filter: Vec<crate::model::StopAreaId> = request
            .stop_point_refs
            .iter()
            .filter_map(|value| {
                tx.stop_area_by_object_id(&ObjectId::new(kind.clone(), value.clone()))
            })
            .map(|stop_area| stop_area.id().clone())
            .collect();

        for situation in tx.situations() {
            if !situation.valid_at(now) {
                continue;
            }
            if !request.info_channels.is_empty()
                && !request.info_channels.contains(&situation.channel)
            {
                continue;
            }
            let filtered = !request.line_refs.is_empty() || !request.stop_point_refs.is_empty();
            if filtered {
                let line_match = line_filter
                    .iter()
                    .any(|line_id| situation.affects_line(line_id));
                let stop_match = stop_filter
                    .iter()
                    .any(|stop_area_id| situation.affects_stop_area(stop_area_id));
                if !line_match && !stop_match {
                    continue;
                }
            }
            if let Some(message) = general_message_from_situation(&partner, &tx, &situation) {
                response.delivery.general_messages.push(message);
            }
        }

        let mut audit_event = partner.new_audit_event();
        audit_event.set("siriType", "GeneralMessageResponse");
        audit_event.set("status", "true");
        audit_event.set(
            "generalMessages",
            response.delivery.general_messages.len().to_string(),
        );
        context.audit.write_event(audit_event);

        response
    }
}

#[cfg(test)]
mod tests {
    use crate::connector::Connector;
    use crate::identifier::ObjectId;
    use crate::model::situation::SituationScope;
    use crate::model::{Line, Situation, SituationMessage};
    use crate::partner::tests::test_context;
    use crate::partner::{settings, Partner, PartnerSlug};
    use siri_messages::GetGeneralMessage;
    use std::sync::Arc;

    fn broadcaster_partner() -> Arc<Partner> {
        let partner = Partner::new(PartnerSlug::from("partner"), test_context());
        partner.set_setting(settings::REMOTE_OBJECTID_KIND, "x");
        partner.set_setting(settings::LOCAL_CREDENTIAL, "secret");
        partner.set_connector_types(vec![
            super::super::SIRI_GENERAL_MESSAGE_REQUEST_BROADCASTER.to_string(),
        ]);
        partner.refresh_connectors();
        partner
    }

    fn broadcaster(partner: &Arc<Partner>) -> Arc<super::SiriGeneralMessageRequestBroadcaster> {
        match partner.connector(super::super::SIRI_GENERAL_MESSAGE_REQUEST_BROADCASTER) {
            Some(Connector::GeneralMessageRequestBroadcaster(connector)) => connector,
            _ => panic!("connector should be materialized"),
        }
    }

    #[test]
    fn situations_are_filtered_by_line() {
        let partner = broadcaster_partner();
        let model = partner.context().model.clone();

        let mut line = Line::new();
        line.set_object_id(ObjectId::new("x", "line:1"));
        model.lines().save(&mut line).unwrap();

        let mut on_line = Situation::new();
        on_line.set_object_id(ObjectId::new("x", "situation:1"));
        on_line.version = 1;
        on_line.messages = vec![SituationMessage {
            content: "Travaux".to_string(),
            message_type: "longMessage".to_string(),
        }];
        on_line.scopes = vec![SituationScope::Line(line.id().clone())];
        model.situations().save(&mut on_line).unwrap();

        let mut elsewhere = Situation::new();
        elsewhere.set_object_id(ObjectId::new("x", "situation:2"));
        elsewhere.version = 1;
        model.situations().save(&mut elsewhere).unwrap();

        let all = broadcaster(&partner).handle_request(&GetGeneralMessage {
            message_identifier: "req-1".to_string(),
            ..Default::default()
        });
        assert_eq!(all.delivery.general_messages.len(), 2);

        let filtered = broadcaster(&partner).handle_request(&GetGeneralMessage {
            message_identifier: "req-2".to_string(),
            line_refs: vec!["line:1".to_string()],
            ..Default::default()
        });
        assert_eq!(filtered.delivery.general_messages.len(), 1);
        let message = &filtered.delivery.general_messages[0];
        assert_eq!(message.info_message_identifier, "situation:1");
        assert_eq!(message.content.line_refs, vec!["line:1".to_string()]);
        assert_eq!(message.content.messages[0].content, "Travaux");
    }
}
