//! Transport doubles shared by unit and scenario tests.

use crate::error::TransportError;
use crate::transport::{RemoteTarget, SiriTransport};
use async_trait::async_trait;
use parking_lot::Mutex;
use siri_messages::{
    CheckStatusRequest, CheckStatusResponse, EstimatedTimetableResponse, GeneralMessageResponse,
    GetEstimatedTimetable, GetGeneralMessage, GetStopMonitoring, GetVehicleMonitoring,
    NotifyEstimatedTimetable, NotifyGeneralMessage, NotifyStopMonitoring,
    NotifyVehicleMonitoring, StopMonitoringResponse, SubscribeRequest, SubscriptionResponse,
    TerminateSubscriptionRequest, TerminateSubscriptionResponse,
};

/// Accepts everything and answers empty successful payloads.
pub struct NullTransport;

#[async_trait]
impl SiriTransport for NullTransport {
    async fn check_status(
        &self,
        _target: &RemoteTarget,
        request: &CheckStatusRequest,
    ) -> Result<CheckStatusResponse, TransportError> {
        Ok(CheckStatusResponse {
            address: String::new(),
            producer_ref: "remote".to_string(),
            response_message_identifier: "response-1".to_string(),
            request_message_ref: request.message_identifier.clone(),
            response_timestamp: request.request_timestamp,
            status: true,
            error_condition: None,
            service_started_time: None,
        })
    }

    async fn stop_monitoring(
        &self,
        _target: &RemoteTarget,
        _request: &GetStopMonitoring,
    ) -> Result<StopMonitoringResponse, TransportError> {
        Ok(StopMonitoringResponse::default())
    }

    async fn general_message(
        &self,
        _target: &RemoteTarget,
        _request: &GetGeneralMessage,
    ) -> Result<GeneralMessageResponse, TransportError> {
        Ok(GeneralMessageResponse::default())
    }

    async fn estimated_timetable(
        &self,
        _target: &RemoteTarget,
        _request: &GetEstimatedTimetable,
    ) -> Result<EstimatedTimetableResponse, TransportError> {
        Ok(EstimatedTimetableResponse::default())
    }

    async fn vehicle_monitoring(
        &self,
        _target: &RemoteTarget,
        _request: &GetVehicleMonitoring,
    ) -> Result<siri_messages::VehicleMonitoringResponse, TransportError> {
        Ok(siri_messages::VehicleMonitoringResponse::default())
    }

    async fn subscribe(
        &self,
        _target: &RemoteTarget,
        _request: &SubscribeRequest,
    ) -> Result<SubscriptionResponse, TransportError> {
        Ok(SubscriptionResponse::default())
    }

    async fn terminate_subscription(
        &self,
        _target: &RemoteTarget,
        _request: &TerminateSubscriptionRequest,
    ) -> Result<TerminateSubscriptionResponse, TransportError> {
        Ok(TerminateSubscriptionResponse::default())
    }

    async fn notify_stop_monitoring(
        &self,
        _target: &RemoteTarget,
        _notify: &NotifyStopMonitoring,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn notify_estimated_timetable(
        &self,
        _target: &RemoteTarget,
        _notify: &NotifyEstimatedTimetable,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn notify_general_message(
        &self,
        _target: &RemoteTarget,
        _notify: &NotifyGeneralMessage,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn notify_vehicle_monitoring(
        &self,
        _target: &RemoteTarget,
        _notify: &NotifyVehicleMonitoring,
    ) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Records every exchange and lets tests script the answers.
#[derive(Default)]
pub struct RecordingTransport {
    check_status_up: Mutex<bool>,
    stop_monitoring_response: Mutex<Option<StopMonitoringResponse>>,
    pub stop_monitoring_requests: Mutex<Vec<(String, GetStopMonitoring)>>,
    pub subscribe_requests: Mutex<Vec<SubscribeRequest>>,
    pub terminate_requests: Mutex<Vec<TerminateSubscriptionRequest>>,
    pub stop_monitoring_notifies: Mutex<Vec<NotifyStopMonitoring>>,
    pub estimated_timetable_notifies: Mutex<Vec<NotifyEstimatedTimetable>>,
    pub general_message_notifies: Mutex<Vec<NotifyGeneralMessage>>,
    pub vehicle_monitoring_notifies: Mutex<Vec<NotifyVehicleMonitoring>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        let transport = Self::default();
        *transport.check_status_up.lock() = true;
        transport
    }

    pub fn set_check_status_up(&self, up: bool) {
        *self.check_status_up.lock() = up;
    }

    pub fn set_stop_monitoring_response(&self, response: StopMonitoringResponse) {
        *self.stop_monitoring_response.lock() = Some(response);
    }

    pub fn stop_monitoring_notifies(&self) -> Vec<NotifyStopMonitoring> {
        self.stop_monitoring_notifies.lock().clone()
    }

    pub fn estimated_timetable_notifies(&self) -> Vec<NotifyEstimatedTimetable> {
        self.estimated_timetable_notifies.lock().clone()
    }

    pub fn general_message_notifies(&self) -> Vec<NotifyGeneralMessage> {
        self.general_message_notifies.lock().clone()
    }

    /// Recorded `(target url, request)` pairs, in call order.
    pub fn stop_monitoring_requests(&self) -> Vec<(String, GetStopMonitoring)> {
        self.stop_monitoring_requests.lock().clone()
    }

    pub fn terminate_requests(&self) -> Vec<TerminateSubscriptionRequest> {
        self.terminate_requests.lock().clone()
    }
}

#[async_trait]
impl SiriTransport for RecordingTransport {
    async fn check_status(
        &self,
        _target: &RemoteTarget,
        request: &CheckStatusRequest,
    ) -> Result<CheckStatusResponse, TransportError> {
        Ok(CheckStatusResponse {
            address: String::new(),
            producer_ref: "remote".to_string(),
            response_message_identifier: "response-1".to_string(),
            request_message_ref: request.message_identifier.clone(),
            response_timestamp: request.request_timestamp,
            status: *self.check_status_up.lock(),
            error_condition: None,
            service_started_time: None,
        })
    }

    async fn stop_monitoring(
        &self,
        target: &RemoteTarget,
        request: &GetStopMonitoring,
    ) -> Result<StopMonitoringResponse, TransportError> {
        self.stop_monitoring_requests
            .lock()
            .push((target.url.clone(), request.clone()));
        Ok(self
            .stop_monitoring_response
            .lock()
            .clone()
            .unwrap_or_default())
    }

    async fn general_message(
        &self,
        _target: &RemoteTarget,
        _request: &GetGeneralMessage,
    ) -> Result<GeneralMessageResponse, TransportError> {
        Ok(GeneralMessageResponse::default())
    }

    async fn estimated_timetable(
        &self,
        _target: &RemoteTarget,
        _request: &GetEstimatedTimetable,
    ) -> Result<EstimatedTimetableResponse, TransportError> {
        Ok(EstimatedTimetableResponse::default())
    }

    async fn vehicle_monitoring(
        &self,
        _target: &RemoteTarget,
        _request: &GetVehicleMonitoring,
    ) -> Result<siri_messages::VehicleMonitoringResponse, TransportError> {
        Ok(siri_messages::VehicleMonitoringResponse::default())
    }

    async fn subscribe(
        &self,
        _target: &RemoteTarget,
        request: &SubscribeRequest,
    ) -> Result<SubscriptionResponse, TransportError> {
        self.subscribe_requests.lock().push(request.clone());
        Ok(SubscriptionResponse::default())
    }

    async fn terminate_subscription(
        &self,
        _target: &RemoteTarget,
        request: &TerminateSubscriptionRequest,
    ) -> Result<TerminateSubscriptionResponse, TransportError> {
        self.terminate_requests.lock().push(request.clone());
        Ok(TerminateSubscriptionResponse::default())
    }

    async fn notify_stop_monitoring(
        &self,
        _target: &RemoteTarget,
        notify: &NotifyStopMonitoring,
    ) -> Result<(), TransportError> {
        self.stop_monitoring_notifies.lock().push(notify.clone());
        Ok(())
    }

    async fn notify_estimated_timetable(
        &self,
        _target: &RemoteTarget,
        notify: &NotifyEstimatedTimetable,
    ) -> Result<(), TransportError> {
        self.estimated_timetable_notifies.lock().push(notify.clone());
        Ok(())
    }

    async fn notify_general_message(
        &self,
        _target: &RemoteTarget,
        notify: &NotifyGeneralMessage,
    ) -> Result<(), TransportError> {
        self.general_message_notifies.lock().push(notify.clone());
        Ok(())
    }

    async fn notify_vehicle_monitoring(
        &self,
        _target: &RemoteTarget,
        notify: &NotifyVehicleMonitoring,
    ) -> Result<(), TransportError> {
        self.vehicle_monitoring_notifies.lock().push(notify.clone());
        Ok(())
    }
}
