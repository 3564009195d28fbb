//! Transport seam.
//!
//! The engine speaks to the central system through this trait: UTF-8 text
//! frames in both directions, a connected flag, and a liveness timestamp.
//! Binary frames never reach the core; a real WebSocket implementation is
//! expected to auto-pong pings and count every inbound frame (pings and
//! pongs included) into `last_recv`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::debug;

/// Full-duplex text channel to the central system.
pub trait Connection {
    /// Queue one text frame for transmission. Returns false when the frame
    /// could not be handed to the transport (the caller re-queues).
    fn send_text(&mut self, text: &str) -> bool;

    /// Next received text frame, if any. `now` is the current monotonic
    /// tick in milliseconds and stamps `last_recv`.
    fn poll(&mut self, now: u64) -> Option<String>;

    /// Whether the underlying link is up.
    fn connected(&self) -> bool;

    /// Tick of the last inbound activity, for liveness supervision.
    fn last_recv(&self) -> u64;

    /// Transport maintenance hook, called once per engine tick.
    fn tick(&mut self, _now: u64) {}
}

#[derive(Default)]
struct LoopbackInner {
    connected: bool,
    inbox: VecDeque<String>,
    last_recv: u64,
}

/// Connection that reflects every sent frame back as a received frame.
///
/// With the default registration set the engine then answers its own
/// requests, which makes a full client/server exchange runnable in a unit
/// test without any server. Cloning yields another handle onto the same
/// channel so tests can flip the link state while the engine owns a handle.
#[derive(Clone)]
pub struct LoopbackConnection {
    inner: Rc<RefCell<LoopbackInner>>,
}

impl Default for LoopbackConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackConnection {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(LoopbackInner {
                connected: true,
                ..Default::default()
            })),
        }
    }

    /// Simulate the link going down or coming back up. Going down drops
    /// everything still in flight.
    pub fn set_connected(&self, connected: bool) {
        let mut inner = self.inner.borrow_mut();
        if !connected {
            inner.inbox.clear();
        }
        inner.connected = connected;
    }
}

impl Connection for LoopbackConnection {
    fn send_text(&mut self, text: &str) -> bool {
        let mut inner = self.inner.borrow_mut();
        if !inner.connected {
            return false;
        }
        debug!("loopback: {}", text);
        inner.inbox.push_back(text.to_string());
        true
    }

    fn poll(&mut self, now: u64) -> Option<String> {
        let mut inner = self.inner.borrow_mut();
        if !inner.connected {
            return None;
        }
        let frame = inner.inbox.pop_front();
        if frame.is_some() {
            inner.last_recv = now;
        }
        frame
    }

    fn connected(&self) -> bool {
        self.inner.borrow().connected
    }

    fn last_recv(&self) -> u64 {
        self.inner.borrow().last_recv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_echoes_in_order() {
        let handle = LoopbackConnection::new();
        let mut conn = handle.clone();

        assert!(conn.send_text("[2,\"1\",\"Heartbeat\",{}]"));
        assert!(conn.send_text("[2,\"2\",\"Heartbeat\",{}]"));

        assert_eq!(conn.poll(10).unwrap(), "[2,\"1\",\"Heartbeat\",{}]");
        assert_eq!(conn.last_recv(), 10);
        assert_eq!(conn.poll(20).unwrap(), "[2,\"2\",\"Heartbeat\",{}]");
        assert!(conn.poll(30).is_none());
    }

    #[test]
    fn disconnect_drops_frames() {
        let handle = LoopbackConnection::new();
        let mut conn = handle.clone();

        conn.send_text("frame");
        handle.set_connected(false);

        assert!(!conn.connected());
        assert!(!conn.send_text("frame"));
        assert!(conn.poll(0).is_none());

        handle.set_connected(true);
        assert!(conn.poll(0).is_none());
    }
}
