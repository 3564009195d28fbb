//! OCPP-J RPC engine.
//!
//! One FIFO outbox, at most one unresolved outbound CALL at a time. The
//! engine pulls from the front of the queue, assigns a fresh messageId,
//! sends, and correlates the reply. Timeouts and CALLERRORs retry
//! transaction-boundary calls with exponential back-off and drop everything
//! else. Inbound CALLs are dispatched through the operation registry and
//! answered synchronously.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use super::messages::{Call, CallError, CallResult, ErrorCode, OcppMessage};
use super::registry::{Operation, OperationRegistry};
use crate::connection::Connection;
use crate::engine::Model;

/// Delivery class of an outbound call, deciding queueing and retry rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendProfile {
    /// BootNotification: the only call allowed out before registration;
    /// retried indefinitely.
    Boot,
    /// StartTransaction / StopTransaction: durable, retried with back-off up
    /// to `TransactionMessageAttempts`.
    Transactional { connector_id: u32, tx_nr: u32 },
    /// StatusNotification: superseded by a newer status of the same
    /// connector while queued.
    Status { connector_id: u32 },
    /// Everything else: one shot, dropped on failure.
    Plain,
}

/// An operation waiting in (or taken from) the outbox.
pub struct Outbound {
    pub op: Box<dyn Operation>,
    pub profile: SendProfile,
}

struct PendingCall {
    op: Box<dyn Operation>,
    profile: SendProfile,
    attempts: u32,
    /// Back-off gate: not sent before this tick.
    not_before: u64,
}

struct InFlight {
    call: PendingCall,
    message_id: String,
    sent_at: u64,
}

/// Bidirectional call/result correlation over a text channel.
pub struct RpcEngine {
    outbox: VecDeque<PendingCall>,
    in_flight: Option<InFlight>,
    next_message_id: u64,
}

impl Default for RpcEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcEngine {
    pub fn new() -> Self {
        Self {
            outbox: VecDeque::new(),
            in_flight: None,
            next_message_id: 1,
        }
    }

    /// Number of queued (not in-flight) calls.
    pub fn queued(&self) -> usize {
        self.outbox.len()
    }

    pub fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Append an operation to the outbox. A queued StatusNotification for
    /// the same connector is superseded: the stale one is removed and the
    /// fresh one appended, so the latest status stays ordered after any
    /// queued boundary calls of that connector.
    pub fn enqueue(&mut self, outbound: Outbound) {
        if let SendProfile::Status { connector_id } = outbound.profile {
            self.outbox.retain(
                |c| !matches!(c.profile, SendProfile::Status { connector_id: id } if id == connector_id),
            );
        }
        self.outbox.push_back(PendingCall {
            op: outbound.op,
            profile: outbound.profile,
            attempts: 0,
            not_before: 0,
        });
    }

    /// Transport went down: return the unresolved call to the queue (the
    /// peer's eventual reply will be dropped as unmatched). A stale status
    /// is discarded if a newer one is already queued.
    pub fn on_disconnect(&mut self) {
        let Some(in_flight) = self.in_flight.take() else {
            return;
        };
        debug!(
            "{}: connection lost while in flight, re-queueing",
            in_flight.call.op.action()
        );
        if let SendProfile::Status { connector_id } = in_flight.call.profile {
            let superseded = self.outbox.iter().any(
                |c| matches!(c.profile, SendProfile::Status { connector_id: id } if id == connector_id),
            );
            if superseded {
                return;
            }
        }
        self.outbox.push_front(in_flight.call);
    }

    /// Drive timeouts and send the next eligible call.
    pub fn tick(&mut self, model: &mut Model, conn: &mut dyn Connection, now: u64) {
        if !conn.connected() {
            return;
        }

        // Resolve a timed-out in-flight call.
        let timeout_ms = (model.config.int("DefaultMessageTimeout").max(1) as u64) * 1000;
        if let Some(in_flight) = &self.in_flight {
            if now.saturating_sub(in_flight.sent_at) >= timeout_ms {
                let in_flight = self.in_flight.take().expect("checked above");
                warn!(
                    "{} (id {}): no response within {} ms",
                    in_flight.call.op.action(),
                    in_flight.message_id,
                    timeout_ms
                );
                self.fail_call(in_flight.call, model, now);
            }
        }

        // Pull the next call from the queue.
        while self.in_flight.is_none() {
            let Some(index) = self.next_eligible(model, now) else {
                break;
            };
            let mut call = self.outbox.remove(index).expect("index valid");

            let payload = match call.op.request_payload(model) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("{}: dropped from outbox: {}", call.op.action(), e.description);
                    continue;
                }
            };

            let message_id = self.next_message_id.to_string();
            self.next_message_id += 1;
            let frame = Call::new(message_id.clone(), call.op.action(), payload).to_text();

            if conn.send_text(&frame) {
                debug!("sent {} (id {})", call.op.action(), message_id);
                self.in_flight = Some(InFlight {
                    call,
                    message_id,
                    sent_at: now,
                });
            } else {
                warn!("{}: transport refused frame, re-queueing", call.op.action());
                self.outbox.push_front(call);
                break;
            }
        }
    }

    /// Index of the next call the queue may release. Strict FIFO, with two
    /// exceptions: a back-off gate at the front stalls the queue, and until
    /// boot acceptance only BootNotification may leave.
    fn next_eligible(&self, model: &Model, now: u64) -> Option<usize> {
        if model.boot_accepted() {
            let front = self.outbox.front()?;
            (front.not_before <= now).then_some(0)
        } else {
            self.outbox
                .iter()
                .position(|c| matches!(c.profile, SendProfile::Boot) && c.not_before <= now)
        }
    }

    /// Shared failure path for timeout and CALLERROR.
    fn fail_call(&mut self, mut call: PendingCall, model: &mut Model, now: u64) {
        call.attempts += 1;
        match call.profile {
            SendProfile::Boot => {
                call.not_before = now + model.boot_retry_ms();
                self.outbox.push_front(call);
            }
            SendProfile::Transactional { .. } => {
                let max_attempts = model.config.int("TransactionMessageAttempts").max(1) as u32;
                if call.attempts < max_attempts {
                    let base = model.config.int("TransactionMessageRetryInterval").max(1) as u64;
                    let backoff_ms = base * 1000 * (1 << (call.attempts - 1).min(16));
                    info!(
                        "{}: attempt {}/{}, retrying in {} ms",
                        call.op.action(),
                        call.attempts,
                        max_attempts,
                        backoff_ms
                    );
                    call.not_before = now + backoff_ms;
                    self.outbox.push_front(call);
                } else {
                    warn!("{}: delivery attempts exhausted", call.op.action());
                    call.op.give_up(model);
                }
            }
            SendProfile::Status { .. } | SendProfile::Plain => {
                warn!("{}: dropped after failure", call.op.action());
                call.op.give_up(model);
            }
        }
    }

    /// Process one received text frame.
    pub fn process_incoming(
        &mut self,
        text: &str,
        model: &mut Model,
        registry: &mut OperationRegistry,
        conn: &mut dyn Connection,
        now: u64,
    ) {
        let message = match OcppMessage::parse(text) {
            Ok(message) => message,
            Err((Some(message_id), e)) => {
                warn!("malformed frame (id {}): {}", message_id, e);
                let reply =
                    CallError::new(message_id, ErrorCode::FormationViolation, e.to_string());
                conn.send_text(&reply.to_text());
                return;
            }
            Err((None, e)) => {
                warn!("undecodable frame: {}", e);
                return;
            }
        };

        match message {
            OcppMessage::Call(call) => self.dispatch_call(call, model, registry, conn),
            OcppMessage::CallResult(result) => {
                match self.in_flight.take() {
                    Some(mut in_flight) if in_flight.message_id == result.message_id => {
                        debug!(
                            "{} (id {}): confirmed",
                            in_flight.call.op.action(),
                            result.message_id
                        );
                        in_flight.call.op.handle_result(model, &result.payload);
                    }
                    other => {
                        self.in_flight = other;
                        debug!("unmatched CALLRESULT (id {}), dropped", result.message_id);
                    }
                }
            }
            OcppMessage::CallError(error) => {
                match self.in_flight.take() {
                    Some(mut in_flight) if in_flight.message_id == error.message_id => {
                        in_flight.call.op.handle_error(model, &error);
                        self.fail_call(in_flight.call, model, now);
                    }
                    other => {
                        self.in_flight = other;
                        debug!("unmatched CALLERROR (id {}), dropped", error.message_id);
                    }
                }
            }
        }
    }

    fn dispatch_call(
        &mut self,
        call: Call,
        model: &mut Model,
        registry: &mut OperationRegistry,
        conn: &mut dyn Connection,
    ) {
        let Some(mut op) = registry.create(&call.action) else {
            debug!("no handler for inbound {}", call.action);
            let reply = CallError::new(call.message_id, ErrorCode::NotImplemented, "");
            conn.send_text(&reply.to_text());
            return;
        };

        match op.execute(model, &call.payload) {
            Ok(conf) => {
                registry.notify_request(&call.action, &call.payload);
                let reply = CallResult::new(call.message_id, conf);
                conn.send_text(&reply.to_text());
            }
            Err(e) => {
                warn!("{}: {:?}: {}", call.action, e.code, e.description);
                let reply = CallError::new(call.message_id, e.code, e.description);
                conn.send_text(&reply.to_text());
            }
        }
    }
}
