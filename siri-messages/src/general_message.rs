//! GeneralMessage request, response and notify payloads, with the IDF
//! content extension (line sections).

use crate::common::ErrorCondition;
use chrono::{DateTime, Utc};

#[derive(Clone, Debug, Default)]
pub struct GetGeneralMessage {
    pub message_identifier: String,
    pub requestor_ref: String,
    pub request_timestamp: Option<DateTime<Utc>>,
    pub info_channels: Vec<String>,
    pub line_refs: Vec<String>,
    pub stop_point_refs: Vec<String>,
}

/// IDF extension: a message scoped to a section of a line.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LineSection {
    pub first_stop: String,
    pub last_stop: String,
    pub line_ref: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MessageText {
    pub content: String,
    pub message_type: String,
}

#[derive(Clone, Debug, Default)]
pub struct GeneralMessageContent {
    pub messages: Vec<MessageText>,
    pub line_refs: Vec<String>,
    pub stop_point_refs: Vec<String>,
    pub line_sections: Vec<LineSection>,
}

#[derive(Clone, Debug, Default)]
pub struct GeneralMessage {
    pub recorded_at_time: Option<DateTime<Utc>>,
    pub item_identifier: String,
    pub info_message_identifier: String,
    pub info_channel_ref: String,
    pub info_message_version: i64,
    pub valid_until_time: Option<DateTime<Utc>>,
    pub content: GeneralMessageContent,
}

#[derive(Clone, Debug, Default)]
pub struct GeneralMessageDelivery {
    pub request_message_ref: String,
    pub response_timestamp: Option<DateTime<Utc>>,
    pub status: bool,
    pub error_condition: Option<ErrorCondition>,
    pub general_messages: Vec<GeneralMessage>,
}

#[derive(Clone, Debug, Default)]
pub struct GeneralMessageResponse {
    pub address: String,
    pub producer_ref: String,
    pub response_message_identifier: String,
    pub delivery: GeneralMessageDelivery,
}

#[derive(Clone, Debug, Default)]
pub struct NotifyGeneralMessage {
    pub address: String,
    pub producer_ref: String,
    pub response_message_identifier: String,
    pub response_timestamp: Option<DateTime<Utc>>,
    pub subscriber_ref: String,
    pub subscription_identifier: String,
    pub request_message_ref: String,
    pub status: bool,
    pub error_condition: Option<ErrorCondition>,
    pub general_messages: Vec<GeneralMessage>,
}
