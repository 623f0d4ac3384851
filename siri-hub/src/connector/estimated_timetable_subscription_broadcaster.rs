//! EstimatedTimetable subscription broadcaster.

use crate::connector::siri_support::{self, BuildSkip};
use crate::connector::BroadcastQueues;
use crate::identifier::RESPONSE_MESSAGE_IDENTIFIER;
use crate::model::{
    ModelEvent, ModelEventKind, ScheduleKind, StopAreaId, StopVisitId, Transaction,
};
use crate::observability::events;
use crate::partner::subscriptions::{
    LastState, StopVisitLastState, ESTIMATED_TIMETABLE_BROADCAST,
};
use crate::partner::{Partner, Subscription};
use siri_messages::{
    ErrorCondition, EstimatedCall, EstimatedJourneyVersionFrame, EstimatedVehicleJourney,
    NotifyEstimatedTimetable, SubscribeRequest, SubscriptionPayloadKind, SubscriptionResponse,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

const COMPONENT: &str = "estimated_timetable_subscription_broadcaster";

pub struct SiriEstimatedTimetableSubscriptionBroadcaster {
    partner: Weak<Partner>,
    queues: BroadcastQueues<StopVisitId>,
}

impl SiriEstimatedTimetableSubscriptionBroadcaster {
    pub fn new(partner: &Arc<Partner>) -> Self {
        Self {
            partner: Arc::downgrade(partner),
            queues: BroadcastQueues::default(),
        }
    }

    fn partner(&self) -> Option<Arc<Partner>> {
        self.partner.upgrade()
    }

    /// Registers the requested lines and seeds their current visits.
    pub fn handle_subscribe_request(&self, request: &SubscribeRequest) -> SubscriptionResponse {
        let Some(partner) = self.partner() else {
            return SubscriptionResponse::default();
        };
        let model = partner.context().model.clone();
        let queues = &self.queues;
        siri_support::handle_subscribe_request(
            &partner,
            ESTIMATED_TIMETABLE_BROADCAST,
            SubscriptionPayloadKind::EstimatedTimetable,
            request,
            &|object_id| model.lines().find_by_object_id(object_id).is_some(),
            &|subscription, object_id| {
                let Some(line) = model.lines().find_by_object_id(object_id) else {
                    return;
                };
                for journey in model.vehicle_journeys().find_by_line_id(line.id()) {
                    for visit in model.stop_visits().find_by_vehicle_journey_id(journey.id()) {
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
                let Some((_, line_object_id)) = self.visit_line(&partner, &visit) else {
                    return;
                };
                if let Some(subscription) = partner
                    .subscriptions()
                    .find_by_resource(ESTIMATED_TIMETABLE_BROADCAST, &line_object_id)
                {
                    self.queues
                        .enqueue(subscription.id().clone(), visit.id().clone());
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
                for line_id in &stop_area.line_ids {
                    let Some(line) = model.lines().find(line_id) else {
                        continue;
                    };
                    let Some(line_object_id) = line.object_id(&kind) else {
                        continue;
                    };
                    if let Some(subscription) = partner
                        .subscriptions()
                        .find_by_resource(ESTIMATED_TIMETABLE_BROADCAST, &line_object_id)
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

    fn visit_line(
        &self,
        partner: &Partner,
        visit: &crate::model::StopVisit,
    ) -> Option<(crate::model::LineId, crate::identifier::ObjectId)> {
        let model = &partner.context().model;
        let kind = partner.remote_object_id_kind()?;
        let journey = model.vehicle_journeys().find(&visit.vehicle_journey_id)?;
        let line = model.lines().find(&journey.line_id)?;
        let object_id = line.object_id(&kind)?;
        Some((line.id().clone(), object_id))
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

    fn prepare_notifies(&self, partner: &Arc<Partner>) -> Vec<NotifyEstimatedTimetable> {
        let pending = self.queues.swap_events();
        if pending.is_empty() {
            return Vec::new();
        }
        let context = partner.context();
        let tx = context.model.transaction();
        let now = context.clock.now();
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
            let Some(frames) =
                self.build_frames(partner, &tx, &subscription, visit_ids, now)
            else {
                continue;
            };
            if frames.is_empty() {
                continue;
            }
            notifies.push(NotifyEstimatedTimetable {
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
                estimated_journey_version_frames: frames,
            });
        }
        notifies
    }

    /// `None` when the batch is aborted on a missing reference.
    fn build_frames(
        &self,
        partner: &Arc<Partner>,
        tx: &Transaction<'_>,
        subscription: &Arc<Subscription>,
        visit_ids: Vec<StopVisitId>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Option<Vec<EstimatedJourneyVersionFrame>> {
        let change_before = subscription.change_before_updates();
        let abort_on_missing = partner.abort_notify_on_missing_reference();
        let kind = partner.remote_object_id_kind()?;

        let mut processed: HashSet<StopVisitId> = HashSet::new();
        let mut frames: Vec<EstimatedJourneyVersionFrame> = Vec::new();
        let mut frame_by_line: HashMap<crate::model::LineId, usize> = HashMap::new();
        let mut journey_slots: HashMap<crate::model::VehicleJourneyId, (usize, usize)> =
            HashMap::new();

        for visit_id in visit_ids {
            if !processed.insert(visit_id.clone()) {
                continue;
            }
            let Some(visit) = tx.stop_visit(&visit_id) else {
                continue;
            };
            let Some((stop_area, stop_point_ref)) = tx.stop_point_ref(&visit.stop_area_id, &kind)
            else {
                warn!(
                    event = events::BROADCASTER_UNKNOWN_REFERENCE,
                    component = COMPONENT,
                    partner = %partner.slug(),
                    reason = BuildSkip::MissingStopArea.as_str(),
                    "skipping stop visit"
                );
                continue;
            };
            let Some(journey) = tx.vehicle_journey(&visit.vehicle_journey_id) else {
                warn!(
                    event = events::BROADCASTER_UNKNOWN_REFERENCE,
                    component = COMPONENT,
                    partner = %partner.slug(),
                    reason = BuildSkip::MissingVehicleJourney.as_str(),
                    "skipping stop visit"
                );
                if abort_on_missing {
                    debug!(
                        event = events::BROADCASTER_NOTIFY_ABORTED,
                        component = COMPONENT,
                        subscription_id = %subscription.id(),
                        "aborting notify on missing reference"
                    );
                    return None;
                }
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
            if let Some(LastState::StopVisit(last)) =
                subscription.last_state(&line_object_id, visit.id().as_str())
            {
                if !last.material_change(&visit, change_before) {
                    continue;
                }
            }

            let frame_index = *frame_by_line.entry(line.id().clone()).or_insert_with(|| {
                frames.push(EstimatedJourneyVersionFrame {
                    recorded_at_time: Some(now),
                    ..Default::default()
                });
                frames.len() - 1
            });
            let (frame_slot, journey_slot) = *journey_slots
                .entry(journey.id().clone())
                .or_insert_with(|| {
                    let dated_vehicle_journey_ref =
                        siri_support::vehicle_journey_ref(partner, &journey)
                            .unwrap_or_else(|| journey.id().to_string());
                    frames[frame_index]
                        .estimated_vehicle_journeys
                        .push(EstimatedVehicleJourney {
                            line_ref: line_object_id.value().to_string(),
                            dated_vehicle_journey_ref,
                            attributes: journey
                                .attributes
                                .iter()
                                .map(|(key, value)| (key.to_string(), value.to_string()))
                                .collect(),
                            references: siri_support::journey_references(
                                partner,
                                tx,
                                &journey,
                                Some(&visit),
                            ),
                            estimated_calls: Vec::new(),
                        });
                    (
                        frame_index,
                        frames[frame_index].estimated_vehicle_journeys.len() - 1,
                    )
                });

            let schedules = &visit.schedules;
            frames[frame_slot].estimated_vehicle_journeys[journey_slot]
                .estimated_calls
                .push(EstimatedCall {
                    stop_point_ref,
                    stop_point_name: stop_area.name.clone(),
                    destination_display: visit.destination_display().to_string(),
                    order: visit.passage_order,
                    vehicle_at_stop: visit.vehicle_at_stop,
                    arrival_status: visit.arrival_status.as_str().to_string(),
                    departure_status: visit.departure_status.as_str().to_string(),
                    aimed_arrival_time: schedules.arrival_time(ScheduleKind::Aimed),
                    expected_arrival_time: schedules.arrival_time(ScheduleKind::Expected),
                    aimed_departure_time: schedules.departure_time(ScheduleKind::Aimed),
                    expected_departure_time: schedules.departure_time(ScheduleKind::Expected),
                });
            subscription.set_last_state(
                &line_object_id,
                visit.id().as_str(),
                LastState::StopVisit(StopVisitLastState::from_stop_visit(&visit)),
            );
        }
        Some(frames)
    }

    fn prepare_not_monitored(&self, partner: &Arc<Partner>) -> Vec<NotifyEstimatedTimetable> {
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
                notifies.push(NotifyEstimatedTimetable {
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
                    estimated_journey_version_frames: Vec::new(),
                });
            }
        }
        notifies
    }

    async fn send(&self, partner: &Arc<Partner>, notify: NotifyEstimatedTimetable) {
        let context = partner.context();
        let mut audit_event = partner.new_audit_event();
        audit_event.set("siriType", "NotifyEstimatedTimetable");
        audit_event.set(
            "subscriptionIdentifier",
            notify.subscription_identifier.clone(),
        );
        audit_event.set("status", notify.status.to_string());
        if let Some(error) = &notify.error_condition {
            audit_event.set("errorType", error.error_type.to_string());
            if let Some(number) = error.error_number {
                audit_event.set("errorNumber", number.to_string());
            }
            audit_event.set("errorText", error.error_text.clone());
        }
        context.audit.write_event(audit_event);

        if let Err(err) = context
            .transport
            .notify_estimated_timetable(&partner.remote_target(), &notify)
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
