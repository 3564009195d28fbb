//! Authorize.
//!
//! Sent while a session is Preparing and the tag could not be vouched for
//! locally. The verdict lands in the transaction record and the cache.

use serde_json::Value;
use tracing::warn;

use crate::engine::Model;
use crate::ocpp::registry::{parse_request, OpError, Operation};
use crate::ocpp::types::{
    cistring_ok, AuthorizationStatus, AuthorizeRequest, AuthorizeResponse, IdTagInfo,
    IDTAG_LEN_MAX,
};

pub struct Authorize {
    connector_id: u32,
    tx_nr: u32,
}

impl Authorize {
    pub fn new(connector_id: u32, tx_nr: u32) -> Self {
        Self {
            connector_id,
            tx_nr,
        }
    }
}

impl Operation for Authorize {
    fn action(&self) -> &'static str {
        "Authorize"
    }

    fn request_payload(&mut self, model: &mut Model) -> Result<Value, OpError> {
        let tx = model
            .store
            .get(self.connector_id, self.tx_nr)
            .ok_or_else(|| OpError::internal("transaction vanished"))?;
        if !tx.is_active() {
            return Err(OpError::internal("session already withdrawn"));
        }
        let req = AuthorizeRequest {
            id_tag: tx.session.id_tag.clone(),
        };
        serde_json::to_value(req).map_err(|e| OpError::internal(e.to_string()))
    }

    fn handle_result(&mut self, model: &mut Model, payload: &Value) {
        let resp: AuthorizeResponse = match serde_json::from_value(payload.clone()) {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Authorize: unreadable confirmation: {}", e);
                return;
            }
        };
        let accepted = resp.id_tag_info.status == AuthorizationStatus::Accepted;

        let Some(tx) = model.store.get_mut(self.connector_id, self.tx_nr) else {
            return;
        };
        let id_tag = tx.session.id_tag.clone();
        if accepted {
            tx.session.authorized = true;
        } else {
            tx.session.deauthorized = true;
        }
        model.auth_cache.update(&id_tag, accepted);
        model.commit_tx(self.connector_id, self.tx_nr);
    }

    /// The reply never came: the session cannot start, withdraw it.
    fn give_up(&mut self, model: &mut Model) {
        warn!(
            "Authorize: no verdict for tx {} on connector {}, aborting session",
            self.tx_nr, self.connector_id
        );
        if let Some(tx) = model.store.get_mut(self.connector_id, self.tx_nr) {
            if tx.is_preparing() {
                tx.end_session();
                model.commit_tx(self.connector_id, self.tx_nr);
            }
        }
    }

    /// Echo server role: accept any well-formed tag.
    fn execute(&mut self, _model: &mut Model, payload: &Value) -> Result<Value, OpError> {
        let req: AuthorizeRequest = parse_request(payload)?;
        if !cistring_ok(&req.id_tag, IDTAG_LEN_MAX) {
            return Err(OpError::property("idTag exceeds CiString20"));
        }
        let resp = AuthorizeResponse {
            id_tag_info: IdTagInfo::accepted(),
        };
        serde_json::to_value(resp).map_err(|e| OpError::internal(e.to_string()))
    }
}
