//! StartTransaction.
//!
//! The opening boundary of a transaction. Durable at-least-once: the
//! record's `requested` flag survives reboots and the call is rebuilt from
//! the record, so the payload must be a pure function of the stored facts.

use serde_json::Value;
use tracing::{info, warn};

use crate::engine::Model;
use crate::ocpp::registry::{parse_request, OpError, Operation};
use crate::ocpp::types::{
    cistring_ok, AuthorizationStatus, IdTagInfo, StartTransactionRequest,
    StartTransactionResponse, IDTAG_LEN_MAX,
};

pub struct StartTransaction {
    connector_id: u32,
    tx_nr: u32,
}

impl StartTransaction {
    pub fn new(connector_id: u32, tx_nr: u32) -> Self {
        Self {
            connector_id,
            tx_nr,
        }
    }
}

impl Operation for StartTransaction {
    fn action(&self) -> &'static str {
        "StartTransaction"
    }

    fn request_payload(&mut self, model: &mut Model) -> Result<Value, OpError> {
        let tx = model
            .store
            .get(self.connector_id, self.tx_nr)
            .ok_or_else(|| OpError::internal("transaction vanished"))?;
        let timestamp = tx
            .start
            .ts
            .wall()
            .ok_or_else(|| OpError::internal("start timestamp not on wall clock"))?;
        let req = StartTransactionRequest {
            connector_id: self.connector_id,
            id_tag: tx.session.id_tag.clone(),
            meter_start: tx.start.meter.max(0),
            timestamp,
            reservation_id: (tx.start.reservation_id >= 0).then_some(tx.start.reservation_id),
        };
        serde_json::to_value(req).map_err(|e| OpError::internal(e.to_string()))
    }

    fn handle_result(&mut self, model: &mut Model, payload: &Value) {
        let resp: StartTransactionResponse = match serde_json::from_value(payload.clone()) {
            Ok(resp) => resp,
            Err(e) => {
                warn!("StartTransaction: unreadable confirmation: {}", e);
                return;
            }
        };
        let accepted = resp.id_tag_info.status == AuthorizationStatus::Accepted;

        let Some(tx) = model.store.get_mut(self.connector_id, self.tx_nr) else {
            return;
        };
        tx.start.transaction_id = resp.transaction_id;
        tx.start.rpc.confirmed = true;
        let id_tag = tx.session.id_tag.clone();
        if !accepted {
            tx.session.deauthorized = true;
        }
        info!(
            "connector {}: StartTransaction confirmed, transactionId {}",
            self.connector_id, resp.transaction_id
        );
        model.auth_cache.update(&id_tag, accepted);
        model.commit_tx(self.connector_id, self.tx_nr);
    }

    /// Delivery attempts exhausted. The record settles as Completed without
    /// a server id; the stop boundary is suppressed since the server never
    /// learned about the transaction.
    fn give_up(&mut self, model: &mut Model) {
        warn!(
            "StartTransaction: giving up on tx {} (connector {})",
            self.tx_nr, self.connector_id
        );
        if let Some(tx) = model.store.get_mut(self.connector_id, self.tx_nr) {
            tx.start.rpc.confirmed = true;
            tx.stop.rpc.requested = true;
            tx.stop.rpc.confirmed = true;
            tx.end_session();
            model.commit_tx(self.connector_id, self.tx_nr);
        }
    }

    /// Echo server role: assign a transaction id.
    fn execute(&mut self, model: &mut Model, payload: &Value) -> Result<Value, OpError> {
        let req: StartTransactionRequest = parse_request(payload)?;
        if !cistring_ok(&req.id_tag, IDTAG_LEN_MAX) {
            return Err(OpError::property("idTag exceeds CiString20"));
        }
        let resp = StartTransactionResponse {
            id_tag_info: IdTagInfo::accepted(),
            transaction_id: model.next_mock_transaction_id(),
        };
        serde_json::to_value(resp).map_err(|e| OpError::internal(e.to_string()))
    }
}
