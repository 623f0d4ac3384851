//! CheckStatus clients: the guardian's liveness probes.

use crate::error::{TransportError, ValidationErrors};
use crate::identifier::MESSAGE_IDENTIFIER;
use crate::partner::{
    settings, OperationalStatus, Partner, PartnerDefinition, PartnerStatus,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use siri_messages::CheckStatusRequest;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

#[async_trait]
pub trait CheckStatusClient: Send + Sync {
    async fn status(&self) -> Result<PartnerStatus, TransportError>;
}

pub(crate) fn validate(definition: &PartnerDefinition, errors: &mut ValidationErrors) {
    definition.require_setting(settings::REMOTE_URL, errors);
    definition.require_setting(settings::REMOTE_CREDENTIAL, errors);
}

pub struct SiriCheckStatusClient {
    partner: Weak<Partner>,
}

impl SiriCheckStatusClient {
    pub fn new(partner: &Arc<Partner>) -> Self {
        Self {
            partner: Arc::downgrade(partner),
        }
    }
}

#[async_trait]
impl CheckStatusClient for SiriCheckStatusClient {
    async fn status(&self) -> Result<PartnerStatus, TransportError> {
        let Some(partner) = self.partner.upgrade() else {
            return Err(TransportError::Connection("partner dropped".to_string()));
        };
        let context = partner.context();
        let start_time = context.clock.now();

        let request = CheckStatusRequest {
            requestor_ref: partner.requestor_ref(),
            request_timestamp: start_time,
            message_identifier: partner
                .identifier_generator(MESSAGE_IDENTIFIER)
                .new_message_identifier(),
        };

        let mut audit_event = partner.new_audit_event();
        audit_event.set("siriType", "CheckStatus");
        audit_event.set("messageIdentifier", request.message_identifier.clone());
        audit_event.set("requestorRef", request.requestor_ref.clone());
        audit_event.set("requestTimestamp", request.request_timestamp.to_rfc3339());

        let response = context
            .transport
            .check_status(&partner.remote_target(), &request)
            .await;
        audit_event.set(
            "responseTime",
            (context.clock.now() - start_time).to_string(),
        );

        match response {
            Ok(response) => {
                audit_event.set("status", response.status.to_string());
                audit_event.set("producerRef", response.producer_ref.clone());
                audit_event.set(
                    "responseMessageIdentifier",
                    response.response_message_identifier.clone(),
                );
                context.audit.write_event(audit_event);

                let operational_status = if response.status {
                    OperationalStatus::Up
                } else {
                    OperationalStatus::Down
                };
                Ok(PartnerStatus {
                    operational_status,
                    service_started_at: response.service_started_time,
                })
            }
            Err(err) => {
                audit_event.set("response", format!("Error during CheckStatus: {err}"));
                context.audit.write_event(audit_event);
                Err(err)
            }
        }
    }
}

/// Scriptable probe for guardian tests; signals each completed call.
pub struct TestCheckStatusClient {
    status: Mutex<PartnerStatus>,
    done_tx: mpsc::UnboundedSender<()>,
    done_rx: AsyncMutex<mpsc::UnboundedReceiver<()>>,
}

impl TestCheckStatusClient {
    pub fn new() -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            status: Mutex::new(PartnerStatus {
                operational_status: OperationalStatus::Up,
                service_started_at: None,
            }),
            done_tx,
            done_rx: AsyncMutex::new(done_rx),
        }
    }

    pub fn set_status(&self, status: OperationalStatus) {
        self.status.lock().operational_status = status;
    }

    /// Waits until `status()` has been called once.
    pub async fn done(&self) {
        self.done_rx.lock().await.recv().await;
    }
}

impl Default for TestCheckStatusClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckStatusClient for TestCheckStatusClient {
    async fn status(&self) -> Result<PartnerStatus, TransportError> {
        let status = *self.status.lock();
        let _ = self.done_tx.send(());
        Ok(status)
    }
}
