//! StopTransaction.
//!
//! The closing boundary. Only dequeued once the matching StartTransaction
//! is confirmed so the server-assigned transactionId is available.

use serde_json::Value;
use tracing::{info, warn};

use crate::engine::Model;
use crate::ocpp::registry::{parse_request, OpError, Operation};
use crate::ocpp::types::{StopTransactionRequest, StopTransactionResponse};

pub struct StopTransaction {
    connector_id: u32,
    tx_nr: u32,
}

impl StopTransaction {
    pub fn new(connector_id: u32, tx_nr: u32) -> Self {
        Self {
            connector_id,
            tx_nr,
        }
    }
}

impl Operation for StopTransaction {
    fn action(&self) -> &'static str {
        "StopTransaction"
    }

    fn request_payload(&mut self, model: &mut Model) -> Result<Value, OpError> {
        let tx = model
            .store
            .get(self.connector_id, self.tx_nr)
            .ok_or_else(|| OpError::internal("transaction vanished"))?;
        let timestamp = tx
            .stop
            .ts
            .wall()
            .ok_or_else(|| OpError::internal("stop timestamp not on wall clock"))?;
        let req = StopTransactionRequest {
            transaction_id: tx.start.transaction_id,
            meter_stop: tx.stop.meter.max(0),
            timestamp,
            id_tag: (!tx.stop.id_tag.is_empty()).then(|| tx.stop.id_tag.clone()),
            reason: (!tx.stop.reason.is_empty()).then(|| tx.stop.reason.clone()),
        };
        serde_json::to_value(req).map_err(|e| OpError::internal(e.to_string()))
    }

    fn handle_result(&mut self, model: &mut Model, payload: &Value) {
        let resp: StopTransactionResponse =
            serde_json::from_value(payload.clone()).unwrap_or(StopTransactionResponse {
                id_tag_info: None,
            });

        let Some(tx) = model.store.get_mut(self.connector_id, self.tx_nr) else {
            return;
        };
        tx.stop.rpc.confirmed = true;
        info!(
            "connector {}: StopTransaction confirmed (tx {})",
            self.connector_id, self.tx_nr
        );
        if let Some(info) = resp.id_tag_info {
            let id_tag = tx.session.id_tag.clone();
            model.auth_cache.update(
                &id_tag,
                info.status == crate::ocpp::types::AuthorizationStatus::Accepted,
            );
        }
        model.commit_tx(self.connector_id, self.tx_nr);
    }

    /// Delivery attempts exhausted: settle locally so the slot can be
    /// reclaimed. The energy record stays on storage until evicted.
    fn give_up(&mut self, model: &mut Model) {
        warn!(
            "StopTransaction: giving up on tx {} (connector {})",
            self.tx_nr, self.connector_id
        );
        if let Some(tx) = model.store.get_mut(self.connector_id, self.tx_nr) {
            tx.stop.rpc.confirmed = true;
            model.commit_tx(self.connector_id, self.tx_nr);
        }
    }

    /// Echo server role.
    fn execute(&mut self, _model: &mut Model, payload: &Value) -> Result<Value, OpError> {
        let _req: StopTransactionRequest = parse_request(payload)?;
        serde_json::to_value(StopTransactionResponse { id_tag_info: None })
            .map_err(|e| OpError::internal(e.to_string()))
    }
}
