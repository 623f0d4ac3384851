//! # siri-messages
//!
//! Typed payloads for the SIRI services the hub speaks: CheckStatus,
//! StopMonitoring, EstimatedTimetable, GeneralMessage, VehicleMonitoring and
//! the subscription control messages.
//!
//! These are the structures the core hands to (and receives from) the
//! transport layer; envelope and XML concerns stay on the transport side.
//! Every response family carries the common delivery fields
//! (`ResponseTimestamp`, `ProducerRef`, `Address`, `ResponseMessageIdentifier`,
//! `RequestMessageRef`, `Status`) and an optional [`ErrorCondition`].

mod common;
pub use common::{ErrorCondition, ErrorType};

mod check_status;
pub use check_status::{CheckStatusRequest, CheckStatusResponse};

mod stop_monitoring;
pub use stop_monitoring::{
    GetStopMonitoring, MonitoredStopVisit, NotifyStopMonitoring, StopMonitoringDelivery,
    StopMonitoringResponse,
};

mod estimated_timetable;
pub use estimated_timetable::{
    EstimatedCall, EstimatedJourneyVersionFrame, EstimatedTimetableDelivery,
    EstimatedTimetableResponse, EstimatedVehicleJourney, GetEstimatedTimetable,
    NotifyEstimatedTimetable,
};

mod general_message;
pub use general_message::{
    GeneralMessage, GeneralMessageContent, GeneralMessageDelivery, GeneralMessageResponse,
    GetGeneralMessage, LineSection, MessageText, NotifyGeneralMessage,
};

mod vehicle_monitoring;
pub use vehicle_monitoring::{
    GetVehicleMonitoring, MonitoredCall, NotifyVehicleMonitoring, VehicleActivity,
    VehicleMonitoringDelivery, VehicleMonitoringResponse,
};

mod subscriptions;
pub use subscriptions::{
    DeleteSubscriptionRequest, NotifySubscriptionTerminated, ResponseStatus, SubscribeRequest,
    SubscriptionPayloadKind, SubscriptionRequestEntry, SubscriptionResponse,
    TerminateSubscriptionRequest, TerminateSubscriptionResponse, TerminationStatus,
};
