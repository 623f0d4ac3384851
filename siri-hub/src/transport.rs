//! Seam to the SOAP transport layer.
//!
//! The hub never touches envelopes or HTTP: it hands typed payloads to an
//! implementation of [`SiriTransport`] addressed by a [`RemoteTarget`].
//! Implementations enforce the outbound 5 second deadline and surface every
//! failure as a [`TransportError`].

use crate::error::TransportError;
use async_trait::async_trait;
use siri_messages::{
    CheckStatusRequest, CheckStatusResponse, GeneralMessageResponse, GetEstimatedTimetable,
    GetGeneralMessage, GetStopMonitoring, GetVehicleMonitoring, NotifyEstimatedTimetable,
    NotifyGeneralMessage, NotifyStopMonitoring, NotifyVehicleMonitoring, StopMonitoringResponse,
    SubscribeRequest, SubscriptionResponse, TerminateSubscriptionRequest,
    TerminateSubscriptionResponse,
};
use std::time::Duration;

/// Outbound deadline every transport implementation applies.
pub const REMOTE_DEADLINE: Duration = Duration::from_secs(5);

/// Where and as whom to reach a partner.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RemoteTarget {
    pub url: String,
    pub credential: Option<String>,
}

#[async_trait]
pub trait SiriTransport: Send + Sync {
    async fn check_status(
        &self,
        target: &RemoteTarget,
        request: &CheckStatusRequest,
    ) -> Result<CheckStatusResponse, TransportError>;

    async fn stop_monitoring(
        &self,
        target: &RemoteTarget,
        request: &GetStopMonitoring,
    ) -> Result<StopMonitoringResponse, TransportError>;

    async fn general_message(
        &self,
        target: &RemoteTarget,
        request: &GetGeneralMessage,
    ) -> Result<GeneralMessageResponse, TransportError>;

    async fn estimated_timetable(
        &self,
        target: &RemoteTarget,
        request: &GetEstimatedTimetable,
    ) -> Result<siri_messages::EstimatedTimetableResponse, TransportError>;

    async fn vehicle_monitoring(
        &self,
        target: &RemoteTarget,
        request: &GetVehicleMonitoring,
    ) -> Result<siri_messages::VehicleMonitoringResponse, TransportError>;

    async fn subscribe(
        &self,
        target: &RemoteTarget,
        request: &SubscribeRequest,
    ) -> Result<SubscriptionResponse, TransportError>;

    async fn terminate_subscription(
        &self,
        target: &RemoteTarget,
        request: &TerminateSubscriptionRequest,
    ) -> Result<TerminateSubscriptionResponse, TransportError>;

    async fn notify_stop_monitoring(
        &self,
        target: &RemoteTarget,
        notify: &NotifyStopMonitoring,
    ) -> Result<(), TransportError>;

    async fn notify_estimated_timetable(
        &self,
        target: &RemoteTarget,
        notify: &NotifyEstimatedTimetable,
    ) -> Result<(), TransportError>;

    async fn notify_general_message(
        &self,
        target: &RemoteTarget,
        notify: &NotifyGeneralMessage,
    ) -> Result<(), TransportError>;

    async fn notify_vehicle_monitoring(
        &self,
        target: &RemoteTarget,
        notify: &NotifyVehicleMonitoring,
    ) -> Result<(), TransportError>;
}
