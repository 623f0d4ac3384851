//! CheckStatus liveness probe payloads.

use crate::common::ErrorCondition;
use chrono::{DateTime, Utc};

#[derive(Clone, Debug)]
pub struct CheckStatusRequest {
    pub requestor_ref: String,
    pub request_timestamp: DateTime<Utc>,
    pub message_identifier: String,
}

#[derive(Clone, Debug)]
pub struct CheckStatusResponse {
    pub address: String,
    pub producer_ref: String,
    pub response_message_identifier: String,
    pub request_message_ref: String,
    pub response_timestamp: DateTime<Utc>,
    pub status: bool,
    pub error_condition: Option<ErrorCondition>,
    /// When the remote producer last (re)started, used to detect restarts.
    pub service_started_time: Option<DateTime<Utc>>,
}
