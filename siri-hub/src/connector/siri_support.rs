//! Shared connector plumbing: factory validation rules, identifier
//! rewriting and the monitored-visit builder used by every StopMonitoring
//! and EstimatedTimetable producer.

use crate::error::ValidationErrors;
use crate::identifier::{IdentifierAttributes, ObjectId, REFERENCE_IDENTIFIER,
    REFERENCE_STOP_AREA_IDENTIFIER};
use crate::model::{Reference, ScheduleKind, StopVisit, Transaction, VehicleJourney};
use crate::partner::{settings, Partner, PartnerDefinition};
use siri_messages::MonitoredStopVisit;
use std::collections::BTreeMap;

/// Request collectors talk to the remote: they need its namespace, address
/// and our credential there.
pub fn validate_collector(definition: &PartnerDefinition, errors: &mut ValidationErrors) {
    definition.require_setting(settings::REMOTE_OBJECTID_KIND, errors);
    definition.require_setting(settings::REMOTE_URL, errors);
    definition.require_setting(settings::REMOTE_CREDENTIAL, errors);
}

/// Request broadcasters answer the remote: they need its namespace and the
/// credential it presents to us.
pub fn validate_broadcaster(definition: &PartnerDefinition, errors: &mut ValidationErrors) {
    definition.require_setting(settings::REMOTE_OBJECTID_KIND, errors);
    definition.require_setting(settings::LOCAL_CREDENTIAL, errors);
}

/// Why an entity was left out of a delivery.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuildSkip {
    MissingStopArea,
    MissingVehicleJourney,
    MissingLine,
    MissingIdentifier,
}

impl BuildSkip {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildSkip::MissingStopArea => "missing_stop_area",
            BuildSkip::MissingVehicleJourney => "missing_vehicle_journey",
            BuildSkip::MissingLine => "missing_line",
            BuildSkip::MissingIdentifier => "missing_identifier",
        }
    }
}

/// Outbound identifier for a vehicle journey: its ObjectID under the
/// partner's kind, or one generated from the `_default` namespace.
pub fn vehicle_journey_ref(partner: &Partner, vehicle_journey: &VehicleJourney) -> Option<String> {
    let kind = partner.remote_object_id_kind()?;
    if let Some(object_id) = vehicle_journey.object_id(&kind) {
        return Some(object_id.value().to_string());
    }
    let default = vehicle_journey.object_id("_default")?;
    Some(
        partner
            .identifier_generator(REFERENCE_IDENTIFIER)
            .new_identifier(IdentifierAttributes {
                kind: "VehicleJourney",
                default: default.value(),
            }),
    )
}

/// Rewrites a stop-area reference into the partner's namespace, deriving a
/// digest-based identifier when no mapping exists.
fn rewrite_stop_reference(
    partner: &Partner,
    tx: &Transaction<'_>,
    kind: &str,
    reference: &Reference,
) -> Option<String> {
    let object_id = reference.object_id.as_ref()?;
    if let Some(stop_area) = tx.stop_area_by_object_id(object_id) {
        if let Some(mapped) = tx.referent_or_self_object_id(&stop_area, kind) {
            return Some(mapped.value().to_string());
        }
    }
    Some(
        partner
            .identifier_generator(REFERENCE_STOP_AREA_IDENTIFIER)
            .new_identifier(IdentifierAttributes {
                kind: "StopArea",
                default: &reference.sha1_digest(),
            }),
    )
}

/// Origin/Destination/Operator references of a journey and visit, already
/// expressed in the partner's namespace.
pub fn journey_references(
    partner: &Partner,
    tx: &Transaction<'_>,
    vehicle_journey: &VehicleJourney,
    stop_visit: Option<&StopVisit>,
) -> BTreeMap<String, String> {
    let mut references = BTreeMap::new();
    let Some(kind) = partner.remote_object_id_kind() else {
        return references;
    };

    for ref_kind in ["OriginRef", "DestinationRef"] {
        let Some(reference) = vehicle_journey.reference(ref_kind) else {
            continue;
        };
        if reference.object_id.is_none() {
            continue;
        }
        if ref_kind == "DestinationRef" && no_destination_ref_rewrite(partner, vehicle_journey) {
            if let Some(object_id) = &reference.object_id {
                references.insert(ref_kind.to_string(), object_id.value().to_string());
            }
            continue;
        }
        if let Some(value) = rewrite_stop_reference(partner, tx, &kind, reference) {
            references.insert(ref_kind.to_string(), value);
        }
    }

    if let Some(stop_visit) = stop_visit {
        if let Some(value) = operator_ref(partner, tx, stop_visit) {
            references.insert("OperatorRef".to_string(), value);
        }
    }
    references
}

/// OperatorRef of a visit, rewritten when the operator is known.
pub fn operator_ref(partner: &Partner, tx: &Transaction<'_>, stop_visit: &StopVisit) -> Option<String> {
    let reference = stop_visit.references.get("OperatorRef")?;
    let object_id = reference.object_id.as_ref()?;
    let kind = partner.remote_object_id_kind()?;
    match tx.operator_by_object_id(object_id) {
        Some(operator) => match operator.object_id(&kind) {
            Some(mapped) => Some(mapped.value().to_string()),
            None => Some(object_id.value().to_string()),
        },
        None => Some(object_id.value().to_string()),
    }
}

fn no_destination_ref_rewrite(partner: &Partner, vehicle_journey: &VehicleJourney) -> bool {
    partner
        .no_destinationref_rewriting_from()
        .iter()
        .any(|origin| origin == &vehicle_journey.origin)
}

/// Builds one outbound monitored call for a partner, resolving every
/// identifier through its namespace.
pub fn build_monitored_stop_visit(
    partner: &Partner,
    tx: &Transaction<'_>,
    stop_visit: &StopVisit,
) -> Result<MonitoredStopVisit, BuildSkip> {
    let kind = partner
        .remote_object_id_kind()
        .ok_or(BuildSkip::MissingIdentifier)?;
    let (stop_area, stop_point_ref) = tx
        .stop_point_ref(&stop_visit.stop_area_id, &kind)
        .ok_or(BuildSkip::MissingStopArea)?;
    let vehicle_journey = tx
        .vehicle_journey(&stop_visit.vehicle_journey_id)
        .ok_or(BuildSkip::MissingVehicleJourney)?;
    let line = tx
        .line(&vehicle_journey.line_id)
        .ok_or(BuildSkip::MissingLine)?;
    let line_ref = line
        .object_id(&kind)
        .map(|object_id| object_id.value().to_string())
        .ok_or(BuildSkip::MissingLine)?;
    let dated_vehicle_journey_ref =
        vehicle_journey_ref(partner, &vehicle_journey).ok_or(BuildSkip::MissingIdentifier)?;

    let item_identifier = match stop_visit.object_id(&kind) {
        Some(object_id) => object_id.value().to_string(),
        None => match stop_visit.object_id("_default") {
            Some(default) => partner
                .identifier_generator(REFERENCE_IDENTIFIER)
                .new_identifier(IdentifierAttributes {
                    kind: "StopVisit",
                    default: default.value(),
                }),
            None => stop_visit.id().to_string(),
        },
    };

    let schedules = &stop_visit.schedules;
    Ok(MonitoredStopVisit {
        item_identifier,
        monitoring_ref: stop_point_ref.clone(),
        stop_point_ref,
        stop_point_name: stop_area.name.clone(),
        line_ref,
        dated_vehicle_journey_ref,
        order: stop_visit.passage_order,
        vehicle_at_stop: stop_visit.vehicle_at_stop,
        destination_display: stop_visit.destination_display().to_string(),
        arrival_status: stop_visit.arrival_status.as_str().to_string(),
        departure_status: stop_visit.departure_status.as_str().to_string(),
        aimed_arrival_time: schedules.arrival_time(ScheduleKind::Aimed),
        expected_arrival_time: schedules.arrival_time(ScheduleKind::Expected),
        actual_arrival_time: schedules.arrival_time(ScheduleKind::Actual),
        aimed_departure_time: schedules.departure_time(ScheduleKind::Aimed),
        expected_departure_time: schedules.departure_time(ScheduleKind::Expected),
        actual_departure_time: schedules.departure_time(ScheduleKind::Actual),
        recorded_at: stop_visit
            .collected_at()
            .unwrap_or_else(|| partner.context().clock.now()),
        attributes: stop_visit
            .attributes
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect(),
        references: journey_references(partner, tx, &vehicle_journey, Some(stop_visit)),
    })
}

/// The external identifier a stop visit's stop area resolves to for a
/// partner, climbing the ascendant chain when needed.
pub fn stop_area_resource_ids(
    partner: &Partner,
    stop_visit: &StopVisit,
) -> Vec<ObjectId> {
    let Some(kind) = partner.remote_object_id_kind() else {
        return Vec::new();
    };
    partner
        .context()
        .model
        .stop_areas()
        .find_ascendants_with_object_id_kind(&stop_visit.stop_area_id, &kind)
}

/// Answers a SubscribeRequest for one payload kind: resolvable resources are
/// registered and seeded, the rest are refused, all bounded by
/// `subscriptions.maximum_resources`.
pub fn handle_subscribe_request(
    partner: &Partner,
    subscription_kind: &str,
    payload_kind: siri_messages::SubscriptionPayloadKind,
    request: &siri_messages::SubscribeRequest,
    resolve: &dyn Fn(&ObjectId) -> bool,
    seed: &dyn Fn(&std::sync::Arc<crate::partner::Subscription>, &ObjectId),
) -> siri_messages::SubscriptionResponse {
    use crate::identifier::RESPONSE_MESSAGE_IDENTIFIER;
    use siri_messages::{ErrorCondition, ErrorType, ResponseStatus, SubscriptionResponse};

    let context = partner.context();
    let now = context.clock.now();
    let kind = partner.remote_object_id_kind().unwrap_or_default();
    let maximum_resources = partner.maximum_subscription_resources();

    let mut response = SubscriptionResponse {
        address: partner.address(),
        responder_ref: partner.producer_ref(),
        response_message_identifier: partner
            .identifier_generator(RESPONSE_MESSAGE_IDENTIFIER)
            .new_message_identifier(),
        request_message_ref: request.message_identifier.clone(),
        response_timestamp: Some(now),
        service_started_time: None,
        response_statuses: Vec::new(),
    };

    for entry in &request.entries {
        if entry.kind != payload_kind {
            continue;
        }
        let subscription = partner
            .subscriptions()
            .find_by_external_id(&entry.subscription_identifier)
            .unwrap_or_else(|| {
                let subscription = partner.subscriptions().create(subscription_kind);
                subscription.set_external_id(entry.subscription_identifier.clone());
                subscription
            });
        subscription.set_subscription_option(
            crate::partner::subscriptions::OPTION_MESSAGE_IDENTIFIER,
            entry.message_identifier.clone(),
        );
        if let Some(change_before) = &entry.change_before_updates {
            subscription.set_subscription_option(
                crate::partner::subscriptions::OPTION_CHANGE_BEFORE_UPDATES,
                change_before.clone(),
            );
        }
        if let Some(termination) = entry.initial_termination_time {
            subscription.set_subscription_option(
                crate::partner::subscriptions::OPTION_INITIAL_TERMINATION_TIME,
                termination.to_rfc3339(),
            );
            subscription.set_termination_time(Some(termination));
        }

        // A resourceless entry subscribes to everything of the kind.
        if entry.resource_refs.is_empty() {
            response.response_statuses.push(ResponseStatus {
                request_message_ref: entry.message_identifier.clone(),
                subscriber_ref: entry.subscriber_ref.clone(),
                subscription_ref: entry.subscription_identifier.clone(),
                status: true,
                error_condition: None,
                valid_until: entry.initial_termination_time,
            });
        }

        for resource_ref in &entry.resource_refs {
            let object_id = ObjectId::new(kind.clone(), resource_ref.clone());
            let mut status = ResponseStatus {
                request_message_ref: entry.message_identifier.clone(),
                subscriber_ref: entry.subscriber_ref.clone(),
                subscription_ref: entry.subscription_identifier.clone(),
                status: true,
                error_condition: None,
                valid_until: entry.initial_termination_time,
            };
            if !resolve(&object_id) {
                status.status = false;
                status.error_condition = Some(ErrorCondition::invalid_data_references(format!(
                    "unknown reference: '{resource_ref}'"
                )));
                tracing::debug!(
                    event = crate::observability::events::SUBSCRIPTION_RESOURCE_REJECTED,
                    component = "subscription_broadcaster",
                    partner = %partner.slug(),
                    reference = resource_ref.as_str(),
                    reason = "unresolvable",
                    "rejecting subscription resource"
                );
            } else if maximum_resources
                .map(|maximum| subscription.resources_len() >= maximum)
                .unwrap_or(false)
            {
                status.status = false;
                status.error_condition = Some(ErrorCondition {
                    error_type: ErrorType::CapabilityNotSupportedError,
                    error_number: None,
                    error_text: "too many resources for this subscription".to_string(),
                });
                tracing::debug!(
                    event = crate::observability::events::SUBSCRIPTION_RESOURCE_REJECTED,
                    component = "subscription_broadcaster",
                    partner = %partner.slug(),
                    reference = resource_ref.as_str(),
                    reason = "maximum_resources",
                    "rejecting subscription resource"
                );
            } else {
                subscription.create_and_add_resource(Reference::new(object_id.clone()));
                subscription.mark_resource_subscribed(&object_id, now);
                seed(&subscription, &object_id);
            }
            response.response_statuses.push(status);
        }
        subscription.set_lifecycle(crate::partner::SubscriptionLifecycle::Active);
        tracing::debug!(
            event = crate::observability::events::SUBSCRIPTION_CREATED,
            component = "subscription_broadcaster",
            partner = %partner.slug(),
            subscription_id = %subscription.id(),
            "subscription active"
        );
    }
    response
}

#[cfg(test)]
mod tests {
    use super::{build_monitored_stop_visit, vehicle_journey_ref, BuildSkip};
    use crate::identifier::ObjectId;
    use crate::model::{Line, StopArea, StopVisit, VehicleJourney};
    use crate::partner::tests::test_context;
    use crate::partner::{settings, Partner, PartnerSlug};
    use std::sync::Arc;

    fn partner_with_kind(kind: &str) -> Arc<Partner> {
        let partner = Partner::new(PartnerSlug::from("partner"), test_context());
        partner.set_setting(settings::REMOTE_OBJECTID_KIND, kind);
        partner
    }

    #[test]
    fn vehicle_journey_ref_prefers_the_partner_namespace() {
        let partner = partner_with_kind("x");
        let mut journey = VehicleJourney::new();
        journey.set_object_id(ObjectId::new("x", "vj-mapped"));

        assert_eq!(
            vehicle_journey_ref(&partner, &journey),
            Some("vj-mapped".to_string())
        );
    }

    #[test]
    fn vehicle_journey_ref_generates_from_default_namespace() {
        let partner = partner_with_kind("x");
        let mut journey = VehicleJourney::new();
        journey.set_object_id(ObjectId::new("_default", "vj-1"));

        assert_eq!(
            vehicle_journey_ref(&partner, &journey),
            Some("VehicleJourney:vj-1".to_string())
        );
    }

    #[test]
    fn unmapped_journey_without_default_has_no_ref() {
        let partner = partner_with_kind("x");
        let journey = VehicleJourney::new();

        assert_eq!(vehicle_journey_ref(&partner, &journey), None);
    }

    #[test]
    fn monitored_visit_requires_a_resolvable_chain() {
        let partner = partner_with_kind("x");
        let model = partner.context().model.clone();

        let mut stop_area = StopArea::new();
        stop_area.name = "Opera".to_string();
        stop_area.set_object_id(ObjectId::new("x", "stop:opera"));
        model.stop_areas().save(&mut stop_area).unwrap();

        let mut visit = StopVisit::new();
        visit.stop_area_id = stop_area.id().clone();

        let tx = model.transaction();
        assert!(matches!(
            build_monitored_stop_visit(&partner, &tx, &visit),
            Err(BuildSkip::MissingVehicleJourney)
        ));
        drop(tx);

        let mut line = Line::new();
        line.set_object_id(ObjectId::new("x", "line:1"));
        model.lines().save(&mut line).unwrap();

        let mut journey = VehicleJourney::new();
        journey.line_id = line.id().clone();
        journey.set_object_id(ObjectId::new("x", "vj:1"));
        model.vehicle_journeys().save(&mut journey).unwrap();
        visit.vehicle_journey_id = journey.id().clone();

        let tx = model.transaction();
        let monitored = build_monitored_stop_visit(&partner, &tx, &visit)
            .expect("visit should build");
        assert_eq!(monitored.stop_point_ref, "stop:opera");
        assert_eq!(monitored.stop_point_name, "Opera");
        assert_eq!(monitored.line_ref, "line:1");
        assert_eq!(monitored.dated_vehicle_journey_ref, "vj:1");
    }
}
