//! RemoteStartTransaction.
//!
//! Behaves like a local `begin` on the chosen connector. Whether an
//! Authorize round-trip precedes the start is governed by
//! AuthorizeRemoteTxRequests.

use serde_json::Value;
use tracing::info;

use crate::engine::Model;
use crate::ocpp::registry::{parse_request, OpError, Operation};
use crate::ocpp::types::{
    cistring_ok, RemoteStartStopStatus, RemoteStartTransactionRequest,
    RemoteStartTransactionResponse, IDTAG_LEN_MAX,
};

pub struct RemoteStartTransaction;

impl RemoteStartTransaction {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RemoteStartTransaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Operation for RemoteStartTransaction {
    fn action(&self) -> &'static str {
        "RemoteStartTransaction"
    }

    fn execute(&mut self, model: &mut Model, payload: &Value) -> Result<Value, OpError> {
        let req: RemoteStartTransactionRequest = parse_request(payload)?;
        if !cistring_ok(&req.id_tag, IDTAG_LEN_MAX) {
            return Err(OpError::property("idTag exceeds CiString20"));
        }

        let free = |model: &Model, connector_id: u32| {
            model
                .store
                .head(connector_id)
                .map(|tx| !tx.is_preparing() && !tx.is_running())
                .unwrap_or(true)
        };
        let connector_id = match req.connector_id {
            Some(id) if model.tx_connector_valid(id) => Some(id),
            Some(_) => None,
            None => {
                (1..model.connectors.len() as u32).find(|&connector_id| free(model, connector_id))
            }
        };

        let status = match connector_id {
            Some(connector_id) => {
                let pre_authorized = !model.config.bool("AuthorizeRemoteTxRequests");
                match model.begin_session(connector_id, &req.id_tag, pre_authorized) {
                    Ok(()) => {
                        if let Some(profile_id) = req
                            .charging_profile
                            .as_ref()
                            .and_then(|p| p.get("chargingProfileId"))
                            .and_then(Value::as_i64)
                        {
                            if let Some(tx) = model.store.head_mut(connector_id) {
                                tx.session.tx_profile_id = profile_id as i32;
                                let tx_nr = tx.tx_nr;
                                model.commit_tx(connector_id, tx_nr);
                            }
                        }
                        info!("remote start accepted on connector {}", connector_id);
                        RemoteStartStopStatus::Accepted
                    }
                    Err(_) => RemoteStartStopStatus::Rejected,
                }
            }
            None => RemoteStartStopStatus::Rejected,
        };

        serde_json::to_value(RemoteStartTransactionResponse { status })
            .map_err(|e| OpError::internal(e.to_string()))
    }
}
