//! Session types.
//!
//! Controller and device sessions share a transport shape (a tagged
//! `SessionCore`) but carry distinct state, modeled as two separate structs
//! rather than one struct with role-dependent optional fields — a tagged
//! variant on the session rather than class inheritance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use axum::extract::ws::Message;
use dashmap::DashSet;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::error::CloseCode;
use crate::heartbeat::Heartbeat;
use crate::ids::{DeviceId, UserId};
use crate::resume::ResumeBuffer;

pub type SessionId = Uuid;

/// Machinery shared by both roles: identity, the writer queue, and the
/// close signal. The pending-response map and resume buffer are
/// role-specific (device-only) and live on [`DeviceSession`] instead.
pub struct SessionCore {
    pub id: SessionId,
    pub user: UserId,
    outbound_tx: mpsc::Sender<Message>,
    close_tx: watch::Sender<Option<CloseCode>>,
    pub heartbeat: Mutex<Heartbeat>,
}

impl SessionCore {
    pub fn new(
        id: SessionId,
        user: UserId,
        outbound_tx: mpsc::Sender<Message>,
        close_tx: watch::Sender<Option<CloseCode>>,
        heartbeat: Heartbeat,
    ) -> Self {
        Self {
            id,
            user,
            outbound_tx,
            close_tx,
            heartbeat: Mutex::new(heartbeat),
        }
    }

    /// Enqueue a JSON message for the writer task. Never blocks; on a full
    /// queue the session is closed with `backpressure_exceeded` instead.
    pub fn send_json<T: Serialize>(&self, msg: &T) {
        let text = match serde_json::to_string(msg) {
            Ok(t) => t,
            Err(_) => return,
        };
        self.send_text(text);
    }

    pub fn send_text(&self, text: String) {
        match self.outbound_tx.try_send(Message::Text(text)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.request_close(CloseCode::BackpressureExceeded);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Request this session close with the given reason. Idempotent — the
    /// first caller wins — and safe to call from any task: other tasks
    /// interact with a session only by enqueueing messages or sending this
    /// cancel signal, never by touching its state directly.
    pub fn request_close(&self, code: CloseCode) {
        let _ = self.close_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(code);
                true
            } else {
                false
            }
        });
    }

    pub fn close_watch(&self) -> watch::Receiver<Option<CloseCode>> {
        self.close_tx.subscribe()
    }
}

/// A live device session.
pub struct DeviceSession {
    pub core: SessionCore,
    pub device_id: DeviceId,
    next_command_id: AtomicU64,
    /// Command ids forwarded to the device awaiting a response. Touched
    /// from both this device's own reader task (on response, to remove)
    /// and a paired controller's reader task (on submit, to insert) — a
    /// plain concurrent set rather than anything guarded by the session's
    /// own lock, since both tasks need uncontended access to it.
    pub pending: DashSet<u64>,
    pub resume: Mutex<ResumeBuffer>,
}

impl DeviceSession {
    pub fn new(core: SessionCore, device_id: DeviceId, resume_capacity: usize) -> Self {
        Self {
            core,
            device_id,
            next_command_id: AtomicU64::new(1),
            pending: DashSet::new(),
            resume: Mutex::new(ResumeBuffer::new(resume_capacity)),
        }
    }

    /// Assign the next command id: strictly increasing, starting at 1 for
    /// the lifetime of this device session.
    pub fn next_command_id(&self) -> u64 {
        self.next_command_id.fetch_add(1, Ordering::SeqCst)
    }
}

/// A live controller session.
pub struct ControllerSession {
    pub core: SessionCore,
    pub target_device_id: DeviceId,
    pub last_ack: AtomicU64,
}

impl ControllerSession {
    pub fn new(core: SessionCore, target_device_id: DeviceId, last_ack: u64) -> Self {
        Self {
            core,
            target_device_id,
            last_ack: AtomicU64::new(last_ack),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::Heartbeat;
    use std::time::Duration;

    fn core() -> (SessionCore, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(2);
        let (close_tx, _close_rx) = watch::channel(None);
        let core = SessionCore::new(
            Uuid::new_v4(),
            UserId("u1".into()),
            tx,
            close_tx,
            Heartbeat::new(Duration::from_secs(25), Duration::from_secs(10)),
        );
        (core, rx)
    }

    #[test]
    fn command_ids_start_at_one_and_increase() {
        let (core, _rx) = core();
        let device = DeviceSession::new(core, DeviceId::normalize("abc"), 256);
        assert_eq!(device.next_command_id(), 1);
        assert_eq!(device.next_command_id(), 2);
        assert_eq!(device.next_command_id(), 3);
    }

    #[test]
    fn backpressure_closes_on_full_queue() {
        let (core, _rx) = core();
        // capacity is 2; fill it, then overflow.
        core.send_text("a".into());
        core.send_text("b".into());
        let mut watch = core.close_watch();
        assert!(watch.borrow().is_none());
        core.send_text("c".into());
        assert_eq!(*watch.borrow_and_update(), Some(CloseCode::BackpressureExceeded));
    }

    #[test]
    fn request_close_is_idempotent_first_writer_wins() {
        let (core, _rx) = core();
        core.request_close(CloseCode::IdleTimeout);
        core.request_close(CloseCode::Superseded);
        assert_eq!(*core.close_watch().borrow(), Some(CloseCode::IdleTimeout));
    }
}
