//! Partner runtime: counterparties, their settings, connectors and
//! subscription state.

pub mod definition;
pub mod registry;
pub mod settings;
pub mod subscriptions;

pub use definition::PartnerDefinition;
pub use registry::PartnerRegistry;
pub use settings::Settings;
pub use subscriptions::{
    LastState, StopVisitLastState, Subscription, SubscriptionId, SubscriptionLifecycle,
    SubscriptionManager, SubscriptionResource,
};

use crate::audit::{AuditEvent, AuditSink};
use crate::clock::Clock;
use crate::collect::UpdateEventHub;
use crate::connector::{
    connector_factory, CheckStatusClient, Connector, SituationCollector, StopAreaCollector,
    SIRI_CHECK_STATUS_CLIENT, SIRI_GENERAL_MESSAGE_REQUEST_COLLECTOR,
    SIRI_GENERAL_MESSAGE_SUBSCRIPTION_COLLECTOR, SIRI_STOP_MONITORING_REQUEST_COLLECTOR,
    SIRI_STOP_MONITORING_SUBSCRIPTION_COLLECTOR, TEST_CHECK_STATUS_CLIENT,
    TEST_STOP_MONITORING_REQUEST_COLLECTOR,
};
use crate::identifier::{IdentifierGenerator, ObjectId};
use crate::model::Model;
use crate::observability::events;
use crate::transport::{RemoteTarget, SiriTransport};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use siri_messages::TerminateSubscriptionRequest;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PartnerId(String);

impl PartnerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub(crate) fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PartnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PartnerSlug(String);

impl PartnerSlug {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PartnerSlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartnerSlug {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Operational liveness as probed by CheckStatus.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum OperationalStatus {
    #[default]
    Unknown,
    Up,
    Down,
}

impl OperationalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationalStatus::Unknown => "unknown",
            OperationalStatus::Up => "up",
            OperationalStatus::Down => "down",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PartnerStatus {
    pub operational_status: OperationalStatus,
    pub service_started_at: Option<DateTime<Utc>>,
}

/// Referential-scoped services every partner and connector reaches for.
pub struct PartnerContext {
    pub referential_slug: String,
    pub model: Arc<Model>,
    pub clock: Arc<dyn Clock>,
    pub audit: AuditSink,
    pub transport: Arc<dyn SiriTransport>,
    pub update_hub: Arc<UpdateEventHub>,
}

/// A remote counterparty with its own identifier namespace, credentials and
/// connector set.
pub struct Partner {
    id: RwLock<PartnerId>,
    slug: RwLock<PartnerSlug>,
    settings: RwLock<Settings>,
    connector_types: RwLock<Vec<String>>,
    connectors: RwLock<HashMap<String, Connector>>,
    status: RwLock<PartnerStatus>,
    context_bag: RwLock<BTreeMap<String, serde_json::Value>>,
    subscriptions: SubscriptionManager,
    context: Arc<PartnerContext>,
    stop_signal: RwLock<Option<watch::Sender<bool>>>,
}

impl Partner {
    pub fn new(slug: PartnerSlug, context: Arc<PartnerContext>) -> Arc<Self> {
        Arc::new(Self {
            id: RwLock::new(PartnerId::default()),
            slug: RwLock::new(slug),
            settings: RwLock::new(Settings::new()),
            connector_types: RwLock::new(Vec::new()),
            connectors: RwLock::new(HashMap::new()),
            status: RwLock::new(PartnerStatus::default()),
            context_bag: RwLock::new(BTreeMap::new()),
            subscriptions: SubscriptionManager::new(),
            context,
            stop_signal: RwLock::new(None),
        })
    }

    pub fn id(&self) -> PartnerId {
        self.id.read().clone()
    }

    pub(crate) fn set_id(&self, id: PartnerId) {
        *self.id.write() = id;
    }

    pub fn slug(&self) -> PartnerSlug {
        self.slug.read().clone()
    }

    pub fn set_slug(&self, slug: PartnerSlug) {
        *self.slug.write() = slug;
    }

    pub fn context(&self) -> &Arc<PartnerContext> {
        &self.context
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn setting(&self, key: &str) -> Option<String> {
        self.settings.read().get(key).map(str::to_string)
    }

    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    pub fn set_setting(&self, key: &str, value: &str) {
        self.settings.write().set(key, value);
    }

    pub fn replace_settings(&self, settings: Settings) {
        *self.settings.write() = settings;
    }

    pub fn connector_types(&self) -> Vec<String> {
        self.connector_types.read().clone()
    }

    pub fn set_connector_types(&self, types: Vec<String>) {
        *self.connector_types.write() = types;
    }

    pub fn partner_status(&self) -> PartnerStatus {
        *self.status.read()
    }

    pub fn operational_status(&self) -> OperationalStatus {
        self.status.read().operational_status
    }

    pub fn set_partner_status(&self, status: PartnerStatus) {
        *self.status.write() = status;
    }

    pub fn context_value(&self, key: &str) -> Option<serde_json::Value> {
        self.context_bag.read().get(key).cloned()
    }

    pub fn set_context_value(&self, key: impl Into<String>, value: serde_json::Value) {
        self.context_bag.write().insert(key.into(), value);
    }

    /// The ObjectID namespace this partner identifies entities with.
    pub fn remote_object_id_kind(&self) -> Option<String> {
        self.setting(settings::REMOTE_OBJECTID_KIND)
    }

    pub fn remote_target(&self) -> RemoteTarget {
        RemoteTarget {
            url: self.setting(settings::REMOTE_URL).unwrap_or_default(),
            credential: self.setting(settings::REMOTE_CREDENTIAL),
        }
    }

    /// Credential presented to this partner in every exchange.
    fn credential(&self) -> String {
        self.setting(settings::REMOTE_CREDENTIAL)
            .unwrap_or_else(|| self.slug().to_string())
    }

    pub fn requestor_ref(&self) -> String {
        self.credential()
    }

    pub fn producer_ref(&self) -> String {
        self.credential()
    }

    pub fn subscriber_ref(&self) -> String {
        self.credential()
    }

    pub fn local_credential(&self) -> Option<String> {
        self.setting(settings::LOCAL_CREDENTIAL)
    }

    /// Address advertised in outbound responses.
    pub fn address(&self) -> String {
        self.setting(settings::LOCAL_URL).unwrap_or_default()
    }

    pub fn identifier_generator(&self, family: &str) -> IdentifierGenerator {
        match self.setting(&format!("{}{family}", settings::GENERATOR_PREFIX)) {
            Some(pattern) => IdentifierGenerator::new(pattern),
            None => IdentifierGenerator::default_for(family),
        }
    }

    pub fn collect_priority(&self) -> i64 {
        self.settings
            .read()
            .integer(settings::COLLECT_PRIORITY)
            .unwrap_or(0)
    }

    pub fn filter_general_messages(&self) -> bool {
        self.settings
            .read()
            .bool(settings::COLLECT_FILTER_GENERAL_MESSAGES)
    }

    pub fn no_destinationref_rewriting_from(&self) -> Vec<String> {
        self.settings
            .read()
            .list(settings::BROADCAST_NO_DESTINATIONREF_REWRITING_FROM)
    }

    pub fn abort_notify_on_missing_reference(&self) -> bool {
        self.settings
            .read()
            .bool(settings::BROADCAST_ABORT_NOTIFY_ON_MISSING_REFERENCE)
    }

    pub fn maximum_subscription_resources(&self) -> Option<usize> {
        self.settings
            .read()
            .integer(settings::SUBSCRIPTIONS_MAXIMUM_RESOURCES)
            .and_then(|value| usize::try_from(value).ok())
    }

    /// Collection scope test over the include/exclude lists. With both
    /// include lists empty everything passes unless excluded.
    pub fn can_collect(
        &self,
        stop_area_object_id: &ObjectId,
        line_object_id_values: &BTreeSet<String>,
    ) -> bool {
        let settings = self.settings.read();
        let include_stop_areas = settings.list(settings::COLLECT_INCLUDE_STOP_AREAS);
        let include_lines = settings.list(settings::COLLECT_INCLUDE_LINES);
        let exclude_stop_areas = settings.list(settings::COLLECT_EXCLUDE_STOP_AREAS);
        let exclude_lines = settings.list(settings::COLLECT_EXCLUDE_LINES);

        let excluded = exclude_stop_areas
            .iter()
            .any(|value| value == stop_area_object_id.value())
            || line_object_id_values
                .iter()
                .any(|line| exclude_lines.contains(line));
        if excluded {
            return false;
        }
        if include_stop_areas.is_empty() && include_lines.is_empty() {
            return true;
        }
        include_stop_areas
            .iter()
            .any(|value| value == stop_area_object_id.value())
            || line_object_id_values
                .iter()
                .any(|line| include_lines.contains(line))
    }

    pub fn can_collect_line(&self, line_object_id: &ObjectId) -> bool {
        let settings = self.settings.read();
        let include_lines = settings.list(settings::COLLECT_INCLUDE_LINES);
        let exclude_lines = settings.list(settings::COLLECT_EXCLUDE_LINES);
        if exclude_lines.iter().any(|value| value == line_object_id.value()) {
            return false;
        }
        include_lines.is_empty()
            || include_lines.iter().any(|value| value == line_object_id.value())
    }

    /// Materializes exactly one connector per configured tag; connectors for
    /// removed tags are dropped (their workers stop with them).
    pub fn refresh_connectors(self: &Arc<Self>) {
        let tags = self.connector_types();
        let mut connectors = self.connectors.write();
        connectors.retain(|tag, _| tags.contains(tag));
        for tag in tags {
            if connectors.contains_key(&tag) {
                continue;
            }
            if let Some(factory) = connector_factory(&tag) {
                connectors.insert(tag.clone(), (factory.create)(self));
            }
        }
    }

    pub fn connector(&self, tag: &str) -> Option<Connector> {
        self.connectors.read().get(tag).cloned()
    }

    pub fn has_any_connector(&self, tags: &[&str]) -> bool {
        let connectors = self.connectors.read();
        tags.iter().any(|tag| connectors.contains_key(*tag))
    }

    pub fn connectors(&self) -> Vec<(String, Connector)> {
        self.connectors
            .read()
            .iter()
            .map(|(tag, connector)| (tag.clone(), connector.clone()))
            .collect()
    }

    pub fn subscription_broadcasters(&self) -> Vec<Connector> {
        self.connectors
            .read()
            .values()
            .filter(|connector| connector.is_subscription_broadcaster())
            .cloned()
            .collect()
    }

    pub fn check_status_client(&self) -> Option<Arc<dyn CheckStatusClient>> {
        for tag in [SIRI_CHECK_STATUS_CLIENT, TEST_CHECK_STATUS_CLIENT] {
            if let Some(Connector::CheckStatusClient(client)) = self.connector(tag) {
                return Some(client);
            }
        }
        None
    }

    pub fn stop_monitoring_request_collector(&self) -> Option<Arc<dyn StopAreaCollector>> {
        for tag in [
            SIRI_STOP_MONITORING_REQUEST_COLLECTOR,
            TEST_STOP_MONITORING_REQUEST_COLLECTOR,
        ] {
            if let Some(Connector::StopMonitoringRequestCollector(collector)) = self.connector(tag)
            {
                return Some(collector);
            }
        }
        None
    }

    pub fn stop_monitoring_subscription_collector(&self) -> Option<Arc<dyn StopAreaCollector>> {
        match self.connector(SIRI_STOP_MONITORING_SUBSCRIPTION_COLLECTOR) {
            Some(Connector::StopMonitoringSubscriptionCollector(collector)) => Some(collector),
            _ => None,
        }
    }

    pub fn general_message_request_collector(&self) -> Option<Arc<dyn SituationCollector>> {
        match self.connector(SIRI_GENERAL_MESSAGE_REQUEST_COLLECTOR) {
            Some(Connector::GeneralMessageRequestCollector(collector)) => Some(collector),
            _ => None,
        }
    }

    pub fn general_message_subscription_collector(&self) -> Option<Arc<dyn SituationCollector>> {
        match self.connector(SIRI_GENERAL_MESSAGE_SUBSCRIPTION_COLLECTOR) {
            Some(Connector::GeneralMessageSubscriptionCollector(collector)) => Some(collector),
            _ => None,
        }
    }

    /// Starts connector workers. Re-entrant: an already running partner is
    /// stopped first, so guardians can restart it on recovery.
    pub fn start(self: &Arc<Self>) {
        self.stop();
        self.refresh_connectors();
        let (sender, receiver) = watch::channel(false);
        *self.stop_signal.write() = Some(sender);
        for (_, connector) in self.connectors() {
            connector.start(self, receiver.clone());
        }
    }

    /// Signals every worker to finish its current iteration and exit.
    pub fn stop(&self) {
        if let Some(sender) = self.stop_signal.write().take() {
            let _ = sender.send(true);
        }
    }

    /// Sends TerminateSubscription for every remote subscription and drops
    /// the local state.
    pub async fn cancel_subscriptions(&self) {
        let subscription_refs: Vec<String> = self
            .subscriptions
            .find_all()
            .iter()
            .map(|subscription| subscription.external_id())
            .collect();
        if !subscription_refs.is_empty() && self.setting(settings::REMOTE_URL).is_some() {
            let request = TerminateSubscriptionRequest {
                message_identifier: self
                    .identifier_generator(crate::identifier::MESSAGE_IDENTIFIER)
                    .new_message_identifier(),
                requestor_ref: self.requestor_ref(),
                request_timestamp: Some(self.context.clock.now()),
                subscription_refs,
                cancel_all: false,
            };
            if let Err(err) = self
                .context
                .transport
                .terminate_subscription(&self.remote_target(), &request)
                .await
            {
                warn!(
                    event = events::SUBSCRIPTION_CANCEL_FAILED,
                    component = "partner",
                    partner = %self.slug(),
                    err = %err,
                    "remote termination failed; dropping local state anyway"
                );
            }
        }
        self.subscriptions.delete_all();
    }

    /// Answers an incoming TerminateSubscription from this partner,
    /// dropping the named subscriptions (or all of them).
    pub fn handle_terminate_subscription_request(
        &self,
        request: &TerminateSubscriptionRequest,
    ) -> siri_messages::TerminateSubscriptionResponse {
        use siri_messages::{ErrorCondition, ErrorType, TerminationStatus};

        let mut statuses = Vec::new();
        if request.cancel_all {
            for subscription in self.subscriptions.find_all() {
                subscription.set_lifecycle(SubscriptionLifecycle::Terminated);
                statuses.push(TerminationStatus {
                    subscription_ref: subscription.external_id(),
                    status: true,
                    error_condition: None,
                });
                self.subscriptions.delete(subscription.id());
            }
        } else {
            for subscription_ref in &request.subscription_refs {
                match self.subscriptions.find_by_external_id(subscription_ref) {
                    Some(subscription) => {
                        subscription.set_lifecycle(SubscriptionLifecycle::Terminated);
                        self.subscriptions.delete(subscription.id());
                        statuses.push(TerminationStatus {
                            subscription_ref: subscription_ref.clone(),
                            status: true,
                            error_condition: None,
                        });
                    }
                    None => statuses.push(TerminationStatus {
                        subscription_ref: subscription_ref.clone(),
                        status: false,
                        error_condition: Some(ErrorCondition {
                            error_type: ErrorType::UnknownSubscriptionError,
                            error_number: None,
                            error_text: format!("unknown subscription: '{subscription_ref}'"),
                        }),
                    }),
                }
            }
        }

        siri_messages::TerminateSubscriptionResponse {
            responder_ref: self.producer_ref(),
            request_message_ref: request.message_identifier.clone(),
            response_timestamp: Some(self.context.clock.now()),
            statuses,
        }
    }

    pub fn new_audit_event(&self) -> AuditEvent {
        let mut event = AuditEvent::new();
        event.set("referential", self.context.referential_slug.clone());
        event.set("partner", self.slug().to_string());
        event
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{OperationalStatus, Partner, PartnerContext, PartnerSlug};
    use crate::audit::AuditSink;
    use crate::clock::FakeClock;
    use crate::collect::UpdateEventHub;
    use crate::connector::test_support::NullTransport;
    use crate::identifier::ObjectId;
    use crate::model::Model;
    use crate::partner::settings;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    pub(crate) fn test_context() -> Arc<PartnerContext> {
        Arc::new(PartnerContext {
            referential_slug: "referential".to_string(),
            model: Arc::new(Model::new()),
            clock: Arc::new(FakeClock::new()),
            audit: AuditSink::disabled(),
            transport: Arc::new(NullTransport),
            update_hub: Arc::new(UpdateEventHub::new()),
        })
    }

    fn partner() -> Arc<Partner> {
        Partner::new(PartnerSlug::from("partner"), test_context())
    }

    #[test]
    fn new_partner_status_is_unknown() {
        assert_eq!(partner().operational_status(), OperationalStatus::Unknown);
    }

    #[test]
    fn can_collect_with_include_list() {
        let partner = partner();
        let stop_area = ObjectId::new("internal", "NINOXE:StopPoint:SP:24:LOC");

        partner.set_setting(
            settings::COLLECT_INCLUDE_STOP_AREAS,
            "NINOXE:StopPoint:SP:24:LOC",
        );
        assert!(partner.can_collect(&stop_area, &BTreeSet::new()));
    }

    #[test]
    fn can_collect_with_line_include_list() {
        let partner = partner();
        let stop_area = ObjectId::new("internal", "NINOXE:StopPoint:SP:24:LOC");
        let lines: BTreeSet<String> = ["NINOXE:Line:SP:24:".to_string()].into();

        partner.set_setting(settings::COLLECT_INCLUDE_LINES, "NINOXE:Line:SP:24:");
        assert!(partner.can_collect(&stop_area, &lines));
    }

    #[test]
    fn can_collect_with_empty_settings() {
        let partner = partner();
        let stop_area = ObjectId::new("internal", "NINOXE:StopPoint:SP:24:LOC");

        assert!(partner.can_collect(&stop_area, &BTreeSet::new()));
    }

    #[test]
    fn cannot_collect_outside_include_list() {
        let partner = partner();
        let stop_area = ObjectId::new("internal", "BAD_VALUE");

        partner.set_setting(
            settings::COLLECT_INCLUDE_STOP_AREAS,
            "NINOXE:StopPoint:SP:24:LOC",
        );
        assert!(!partner.can_collect(&stop_area, &BTreeSet::new()));
    }

    #[test]
    fn cannot_collect_excluded_stop_area() {
        let partner = partner();
        let stop_area = ObjectId::new("internal", "NINOXE:StopPoint:SP:24:LOC");

        partner.set_setting(
            settings::COLLECT_EXCLUDE_STOP_AREAS,
            "NINOXE:StopPoint:SP:24:LOC",
        );
        assert!(!partner.can_collect(&stop_area, &BTreeSet::new()));
    }

    #[test]
    fn credential_falls_back_to_slug() {
        let partner = partner();
        assert_eq!(partner.requestor_ref(), "partner");

        partner.set_setting(settings::REMOTE_CREDENTIAL, "cred");
        assert_eq!(partner.requestor_ref(), "cred");
        assert_eq!(partner.producer_ref(), "cred");
        assert_eq!(partner.subscriber_ref(), "cred");
    }

    #[test]
    fn terminate_subscription_drops_local_state() {
        let partner = partner();
        let subscription = partner.subscriptions().create("StopMonitoringBroadcast");
        subscription.set_external_id("ext-1");

        let response = partner.handle_terminate_subscription_request(
            &siri_messages::TerminateSubscriptionRequest {
                message_identifier: "req-1".to_string(),
                subscription_refs: vec!["ext-1".to_string(), "ext-unknown".to_string()],
                ..Default::default()
            },
        );

        assert_eq!(response.statuses.len(), 2);
        assert!(response.statuses[0].status);
        assert!(!response.statuses[1].status);
        assert!(partner.subscriptions().find_all().is_empty());
    }

    #[tokio::test]
    async fn refresh_connectors_follows_the_tag_list() {
        let partner = partner();
        partner.refresh_connectors();
        assert!(partner.check_status_client().is_none());

        partner.set_connector_types(vec!["test-check-status-client".to_string()]);
        partner.refresh_connectors();
        assert!(partner.check_status_client().is_some());

        partner.set_connector_types(vec![]);
        partner.refresh_connectors();
        assert!(partner.check_status_client().is_none());
    }
}
