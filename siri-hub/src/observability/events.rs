//! Canonical structured event names used across `siri-hub`.

// Collection dispatcher events.
pub const COLLECT_STOP_AREA_UNKNOWN: &str = "collect_stop_area_unknown";
pub const COLLECT_PARTNER_ELECTED: &str = "collect_partner_elected";
pub const COLLECT_NO_PARTNER: &str = "collect_no_partner";
pub const COLLECT_SITUATION_UNKNOWN_TARGET: &str = "collect_situation_unknown_target";

// Collector and broadcaster connector events.
pub const COLLECTOR_REQUEST_FAILED: &str = "collector_request_failed";
pub const COLLECTOR_UNKNOWN_REFERENCE: &str = "collector_unknown_reference";
pub const BROADCASTER_UNKNOWN_REFERENCE: &str = "broadcaster_unknown_reference";
pub const BROADCASTER_NOTIFY_SENT: &str = "broadcaster_notify_sent";
pub const BROADCASTER_NOTIFY_FAILED: &str = "broadcaster_notify_failed";
pub const BROADCASTER_NOTIFY_ABORTED: &str = "broadcaster_notify_aborted";
pub const BROADCASTER_TICK: &str = "broadcaster_tick";
pub const BROADCASTER_STOPPED: &str = "broadcaster_stopped";

// Subscription lifecycle events.
pub const SUBSCRIPTION_CREATED: &str = "subscription_created";
pub const SUBSCRIPTION_TERMINATED: &str = "subscription_terminated";
pub const SUBSCRIPTION_RESOURCE_REJECTED: &str = "subscription_resource_rejected";
pub const SUBSCRIPTION_CANCEL_FAILED: &str = "subscription_cancel_failed";

// Guardian events.
pub const GUARDIAN_STATUS_CHANGED: &str = "guardian_status_changed";
pub const GUARDIAN_CHECK_FAILED: &str = "guardian_check_failed";
pub const GUARDIAN_PARTNER_RESTARTED: &str = "guardian_partner_restarted";
pub const GUARDIAN_STOPPED: &str = "guardian_stopped";
pub const MODEL_RELOAD_START: &str = "model_reload_start";
pub const MODEL_RELOAD_OK: &str = "model_reload_ok";
pub const MODEL_RELOAD_FAILED: &str = "model_reload_failed";

// Engine and audit plumbing events.
pub const ENGINE_EVENT_PUMP_STOPPED: &str = "engine_event_pump_stopped";
pub const AUDIT_EVENT_DROPPED: &str = "audit_event_dropped";

// Loader events.
pub const LOADER_RECORD_REJECTED: &str = "loader_record_rejected";
pub const LOADER_IMPORT_SUMMARY: &str = "loader_import_summary";
