//! Collection dispatcher: routes per-entity refresh requests to the best
//! partner and fans collected updates out to subscribers.

use crate::identifier::ObjectId;
use crate::model::{SituationUpdateEvent, StopAreaId, StopAreaUpdateEvent};
use crate::observability::events;
use crate::partner::{OperationalStatus, Partner, PartnerRegistry};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::connector::{
    SIRI_STOP_MONITORING_REQUEST_COLLECTOR, SIRI_STOP_MONITORING_SUBSCRIPTION_COLLECTOR,
    TEST_STOP_MONITORING_REQUEST_COLLECTOR,
};

const COMPONENT: &str = "collect_dispatcher";

#[derive(Clone, Debug)]
pub struct StopAreaUpdateRequest {
    id: String,
    stop_area_id: StopAreaId,
    created_at: DateTime<Utc>,
}

impl StopAreaUpdateRequest {
    pub fn new(stop_area_id: StopAreaId, created_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            stop_area_id,
            created_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stop_area_id(&self) -> &StopAreaId {
        &self.stop_area_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// What situation data to ask a partner for.
#[derive(Clone, Debug)]
pub enum SituationFilter {
    All,
    Line(ObjectId),
    StopArea(ObjectId),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SituationUpdateRequestKind {
    All,
    Line,
    StopArea,
}

#[derive(Clone, Debug)]
pub struct SituationUpdateRequest {
    id: String,
    kind: SituationUpdateRequestKind,
    /// Internal entity id for `Line` / `StopArea` kinds.
    requested_id: String,
    created_at: DateTime<Utc>,
}

impl SituationUpdateRequest {
    pub fn all(created_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: SituationUpdateRequestKind::All,
            requested_id: String::new(),
            created_at,
        }
    }

    pub fn line(requested_id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: SituationUpdateRequestKind::Line,
            requested_id: requested_id.into(),
            created_at,
        }
    }

    pub fn stop_area(requested_id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: SituationUpdateRequestKind::StopArea,
            requested_id: requested_id.into(),
            created_at,
        }
    }

    pub fn kind(&self) -> SituationUpdateRequestKind {
        self.kind
    }

    pub fn requested_id(&self) -> &str {
        &self.requested_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

type StopAreaUpdateSubscriber = Box<dyn Fn(&StopAreaUpdateEvent) + Send + Sync>;
type SituationUpdateSubscriber = Box<dyn Fn(&[SituationUpdateEvent]) + Send + Sync>;

/// Synchronous fan-out point for collected updates. Collectors broadcast
/// here; the model updater and any test probes subscribe.
#[derive(Default)]
pub struct UpdateEventHub {
    stop_area_subscribers: RwLock<Vec<StopAreaUpdateSubscriber>>,
    situation_subscribers: RwLock<Vec<SituationUpdateSubscriber>>,
}

impl UpdateEventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_stop_area_update_event(
        &self,
        subscriber: impl Fn(&StopAreaUpdateEvent) + Send + Sync + 'static,
    ) {
        self.stop_area_subscribers
            .write()
            .push(Box::new(subscriber));
    }

    pub fn broadcast_stop_area_update_event(&self, event: &StopAreaUpdateEvent) {
        for subscriber in self.stop_area_subscribers.read().iter() {
            subscriber(event);
        }
    }

    pub fn handle_situation_update_event(
        &self,
        subscriber: impl Fn(&[SituationUpdateEvent]) + Send + Sync + 'static,
    ) {
        self.situation_subscribers
            .write()
            .push(Box::new(subscriber));
    }

    pub fn broadcast_situation_update_events(&self, updates: &[SituationUpdateEvent]) {
        for subscriber in self.situation_subscribers.read().iter() {
            subscriber(updates);
        }
    }
}

/// Elects partners for refresh requests by priority, liveness, connector
/// presence, identifier mapping and collection scope.
pub struct CollectDispatcher {
    registry: Arc<PartnerRegistry>,
}

impl CollectDispatcher {
    pub fn new(registry: Arc<PartnerRegistry>) -> Self {
        Self { registry }
    }

    fn hub(&self) -> &Arc<UpdateEventHub> {
        &self.registry.context().update_hub
    }

    pub fn handle_stop_area_update_event(
        &self,
        subscriber: impl Fn(&StopAreaUpdateEvent) + Send + Sync + 'static,
    ) {
        self.hub().handle_stop_area_update_event(subscriber);
    }

    pub fn broadcast_stop_area_update_event(&self, event: &StopAreaUpdateEvent) {
        self.hub().broadcast_stop_area_update_event(event);
    }

    pub async fn update_stop_area(&self, request: &StopAreaUpdateRequest) {
        let context = self.registry.context();
        let Some(stop_area) = context.model.stop_areas().find(request.stop_area_id()) else {
            debug!(
                event = events::COLLECT_STOP_AREA_UNKNOWN,
                component = COMPONENT,
                stop_area_id = %request.stop_area_id(),
                "refresh requested for unknown stop area"
            );
            return;
        };

        let Some(partner) = self.best_partner(&stop_area) else {
            debug!(
                event = events::COLLECT_NO_PARTNER,
                component = COMPONENT,
                stop_area_id = %request.stop_area_id(),
                "no eligible partner"
            );
            if stop_area.monitored() {
                let event = StopAreaUpdateEvent::monitored(
                    uuid::Uuid::new_v4().to_string(),
                    stop_area.id().clone(),
                    "",
                    false,
                );
                self.hub().broadcast_stop_area_update_event(&event);
            }
            return;
        };

        debug!(
            event = events::COLLECT_PARTNER_ELECTED,
            component = COMPONENT,
            stop_area_id = %request.stop_area_id(),
            partner = %partner.slug(),
            "partner elected for stop area refresh"
        );
        if !stop_area.monitored() {
            let event = StopAreaUpdateEvent::monitored(
                uuid::Uuid::new_v4().to_string(),
                stop_area.id().clone(),
                partner.slug().to_string(),
                true,
            );
            self.hub().broadcast_stop_area_update_event(&event);
        }

        if let Some(collector) = partner.stop_monitoring_subscription_collector() {
            collector.request_stop_area_update(request).await;
            return;
        }
        if let Some(collector) = partner.stop_monitoring_request_collector() {
            collector.request_stop_area_update(request).await;
        }
    }

    fn best_partner(&self, stop_area: &crate::model::StopArea) -> Option<Arc<Partner>> {
        for partner in self.registry.find_all_by_collect_priority() {
            if partner.operational_status() != OperationalStatus::Up {
                continue;
            }
            if !partner.has_any_connector(&[
                SIRI_STOP_MONITORING_REQUEST_COLLECTOR,
                TEST_STOP_MONITORING_REQUEST_COLLECTOR,
                SIRI_STOP_MONITORING_SUBSCRIPTION_COLLECTOR,
            ]) {
                continue;
            }
            let Some(kind) = partner.remote_object_id_kind() else {
                continue;
            };
            let Some(stop_area_object_id) = stop_area.object_id(&kind) else {
                continue;
            };
            let line_values = self.line_object_id_values(stop_area, &kind);
            if partner.can_collect(&stop_area_object_id, &line_values) {
                return Some(partner);
            }
        }
        None
    }

    fn line_object_id_values(
        &self,
        stop_area: &crate::model::StopArea,
        kind: &str,
    ) -> BTreeSet<String> {
        let model = &self.registry.context().model;
        stop_area
            .line_ids
            .iter()
            .filter_map(|line_id| model.lines().find(line_id))
            .filter_map(|line| line.object_id(kind))
            .map(|object_id| object_id.value().to_string())
            .collect()
    }

    pub async fn update_situation(&self, request: &SituationUpdateRequest) {
        match request.kind() {
            SituationUpdateRequestKind::All => self.request_all_situations().await,
            SituationUpdateRequestKind::Line => self.request_line_situations(request).await,
            SituationUpdateRequestKind::StopArea => {
                self.request_stop_area_situations(request).await
            }
        }
    }

    /// Unfiltered sweep over every unfiltered UP partner.
    async fn request_all_situations(&self) {
        for partner in self.registry.find_all_by_collect_priority() {
            if partner.operational_status() != OperationalStatus::Up
                || partner.filter_general_messages()
            {
                continue;
            }
            let Some(collector) = partner
                .general_message_subscription_collector()
                .or_else(|| partner.general_message_request_collector())
            else {
                continue;
            };
            collector.request_situation_update(&SituationFilter::All).await;
        }
    }

    async fn request_line_situations(&self, request: &SituationUpdateRequest) {
        let context = self.registry.context();
        let line_id = crate::model::LineId::from(request.requested_id());
        let Some(line) = context.model.lines().find(&line_id) else {
            debug!(
                event = events::COLLECT_SITUATION_UNKNOWN_TARGET,
                component = COMPONENT,
                line_id = request.requested_id(),
                "situation refresh for unknown line"
            );
            return;
        };

        for partner in self.registry.find_all_by_collect_priority() {
            if partner.operational_status() != OperationalStatus::Up
                || !partner.filter_general_messages()
            {
                continue;
            }
            let Some(collector) = partner
                .general_message_subscription_collector()
                .or_else(|| partner.general_message_request_collector())
            else {
                continue;
            };
            let Some(kind) = partner.remote_object_id_kind() else {
                continue;
            };
            let Some(line_object_id) = line.object_id(&kind) else {
                continue;
            };
            if !partner.can_collect_line(&line_object_id) {
                continue;
            }
            collector
                .request_situation_update(&SituationFilter::Line(line_object_id))
                .await;
            return;
        }
        debug!(
            event = events::COLLECT_NO_PARTNER,
            component = COMPONENT,
            line_id = request.requested_id(),
            "no partner for filtered line situations"
        );
    }

    async fn request_stop_area_situations(&self, request: &SituationUpdateRequest) {
        let context = self.registry.context();
        let stop_area_id = StopAreaId::from(request.requested_id());
        let Some(stop_area) = context.model.stop_areas().find(&stop_area_id) else {
            debug!(
                event = events::COLLECT_SITUATION_UNKNOWN_TARGET,
                component = COMPONENT,
                stop_area_id = request.requested_id(),
                "situation refresh for unknown stop area"
            );
            return;
        };

        for partner in self.registry.find_all_by_collect_priority() {
            if partner.operational_status() != OperationalStatus::Up
                || !partner.filter_general_messages()
            {
                continue;
            }
            let Some(collector) = partner
                .general_message_subscription_collector()
                .or_else(|| partner.general_message_request_collector())
            else {
                continue;
            };
            let Some(kind) = partner.remote_object_id_kind() else {
                continue;
            };
            let Some(stop_area_object_id) = stop_area.object_id(&kind) else {
                continue;
            };
            let line_values = self.line_object_id_values(&stop_area, &kind);
            if !partner.can_collect(&stop_area_object_id, &line_values) {
                continue;
            }
            collector
                .request_situation_update(&SituationFilter::StopArea(stop_area_object_id))
                .await;
            return;
        }
        debug!(
            event = events::COLLECT_NO_PARTNER,
            component = COMPONENT,
            stop_area_id = request.requested_id(),
            "no partner for filtered stop area situations"
        );
    }
}
