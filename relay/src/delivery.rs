//! Pairing & Delivery Engine.
//!
//! Controller-to-device and device-to-controller forwarding, built around
//! [`crate::registry::Registry`] for pairing lookups and a per-device
//! pending-response map for routing responses back to the right caller.

use std::sync::Arc;

use tracing::warn;

use crate::protocol::{ClientCommand, Command, Response, ServerMessage};
use crate::registry::Registry;
use crate::session::{ControllerSession, DeviceSession};

pub struct Delivery {
    registry: Arc<Registry>,
}

impl Delivery {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Controller → Device.
    pub fn submit_command(&self, controller: &ControllerSession, cmd: ClientCommand) {
        let Some(device) = self.registry.lookup_device(&controller.target_device_id) else {
            controller.core.send_json(&ServerMessage::Error {
                error: "device_not_connected".into(),
            });
            return;
        };

        let id = device.next_command_id();
        device.pending.insert(id);

        // Emit cmd_accepted immediately — this confirms id assignment only,
        // not delivery.
        controller.core.send_json(&ServerMessage::CmdAccepted { id });

        let forwarded = Command {
            id,
            cmd: cmd.cmd,
            params: cmd.params,
        };
        device.core.send_json(&forwarded);
    }

    /// Device → Controller.
    pub fn deliver_response(&self, device: &DeviceSession, mut response: Response) {
        if !device.pending.remove(&response.id).is_some() {
            warn!(id = response.id, "response for unknown or already-resolved command id, dropping");
            return;
        }

        let seq = {
            let mut buf = device.resume.lock().unwrap();
            buf.push(response.clone())
        };
        response.seq = Some(seq);

        if let Some(controller) = self
            .registry
            .lookup_controller(&device.core.user, &device.device_id)
        {
            controller.core.send_json(&response);
        }
        // Otherwise the response stays buffered only: it enters the resume
        // buffer and is replayed when a controller with the same
        // (user, device) pairing reconnects.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::Heartbeat;
    use crate::ids::{DeviceId, UserId};
    use crate::session::SessionCore;
    use axum::extract::ws::Message;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::sync::{mpsc, watch};
    use uuid::Uuid;

    fn make_core(user: &str) -> (SessionCore, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(64);
        let (close_tx, _) = watch::channel(None);
        let core = SessionCore::new(
            Uuid::new_v4(),
            UserId(user.into()),
            tx,
            close_tx,
            Heartbeat::new(Duration::from_secs(25), Duration::from_secs(10)),
        );
        (core, rx)
    }

    fn drain_text(rx: &mut mpsc::Receiver<Message>) -> Value {
        match rx.try_recv().expect("expected a queued message") {
            Message::Text(t) => serde_json::from_str(&t).unwrap(),
            other => panic!("expected text message, got {other:?}"),
        }
    }

    #[test]
    fn offline_device_yields_error_without_buffering() {
        let registry = Arc::new(Registry::new());
        let delivery = Delivery::new(Arc::clone(&registry));
        let (controller_core, mut controller_rx) = make_core("u1");
        let controller = ControllerSession::new(controller_core, DeviceId::normalize("dev1"), 0);

        delivery.submit_command(&controller, ClientCommand { cmd: "click".into(), params: json!({}) });

        let msg = drain_text(&mut controller_rx);
        assert_eq!(msg["type"], "error");
        assert_eq!(msg["error"], "device_not_connected");
    }

    #[test]
    fn happy_path_assigns_id_and_routes_response() {
        let registry = Arc::new(Registry::new());
        let delivery = Delivery::new(Arc::clone(&registry));

        let (device_core, mut device_rx) = make_core("u1");
        let device = Arc::new(DeviceSession::new(device_core, DeviceId::normalize("dev1"), 256));
        registry.register_device(DeviceId::normalize("dev1"), Arc::clone(&device));

        let (controller_core, mut controller_rx) = make_core("u1");
        let controller = ControllerSession::new(controller_core, DeviceId::normalize("dev1"), 0);
        registry.register_controller(UserId("u1".into()), DeviceId::normalize("dev1"), Arc::new(controller));
        let controller = registry
            .lookup_controller(&UserId("u1".into()), &DeviceId::normalize("dev1"))
            .unwrap();

        delivery.submit_command(&controller, ClientCommand { cmd: "screenshot".into(), params: json!({}) });

        let accepted = drain_text(&mut controller_rx);
        assert_eq!(accepted["type"], "cmd_accepted");
        assert_eq!(accepted["id"], 1);

        let forwarded = drain_text(&mut device_rx);
        assert_eq!(forwarded["id"], 1);
        assert_eq!(forwarded["cmd"], "screenshot");

        delivery.deliver_response(
            &device,
            Response {
                id: 1,
                status: "ok".into(),
                result: Some(json!({"image": "..."})),
                error: None,
                seq: None,
            },
        );

        let response = drain_text(&mut controller_rx);
        assert_eq!(response["id"], 1);
        assert_eq!(response["status"], "ok");
        assert_eq!(response["seq"], 1);
        assert!(!device.pending.contains(&1));
    }

    #[test]
    fn response_for_disconnected_controller_only_buffers() {
        let registry = Arc::new(Registry::new());
        let delivery = Delivery::new(Arc::clone(&registry));

        let (device_core, mut device_rx) = make_core("u1");
        let device = Arc::new(DeviceSession::new(device_core, DeviceId::normalize("dev1"), 256));
        registry.register_device(DeviceId::normalize("dev1"), Arc::clone(&device));
        device.pending.insert(1);
        let _ = &mut device_rx;

        delivery.deliver_response(
            &device,
            Response { id: 1, status: "ok".into(), result: None, error: None, seq: None },
        );

        // No controller registered — nothing queued anywhere, but it's in the buffer.
        assert_eq!(device.resume.lock().unwrap().replay(0).frames.len(), 1);
    }

    #[test]
    fn unknown_response_id_is_dropped() {
        let registry = Arc::new(Registry::new());
        let delivery = Delivery::new(Arc::clone(&registry));
        let (device_core, _rx) = make_core("u1");
        let device = Arc::new(DeviceSession::new(device_core, DeviceId::normalize("dev1"), 256));

        delivery.deliver_response(
            &device,
            Response { id: 42, status: "ok".into(), result: None, error: None, seq: None },
        );

        assert_eq!(device.resume.lock().unwrap().replay(0).frames.len(), 0);
    }
}
