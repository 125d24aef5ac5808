pub mod auth;
pub mod config;
pub mod delivery;
pub mod discovery;
pub mod error;
pub mod heartbeat;
pub mod ids;
pub mod protocol;
pub mod registry;
pub mod resume;
pub mod session;
pub mod transport;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::auth::TokenVerifier;
use crate::config::Config;
use crate::delivery::Delivery;
use crate::discovery::NotifyEvent;
use crate::ids::DeviceId;
use crate::registry::Registry;

/// Per-device notification fan-out for `GET /events`. A device's broadcast
/// channel is created lazily on first subscribe and torn down once its last
/// subscriber drops and a new one hasn't shown up — `lazy_channel` handles
/// the get-or-create; nothing here ever scans for idle channels.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<DeviceId, broadcast::Sender<NotifyEvent>>,
}

impl NotifyHub {
    fn lazy_channel(&self, device: &DeviceId) -> broadcast::Sender<NotifyEvent> {
        self.channels
            .entry(device.clone())
            .or_insert_with(|| broadcast::channel(32).0)
            .clone()
    }

    pub fn subscribe(&self, device: &DeviceId) -> broadcast::Receiver<NotifyEvent> {
        self.lazy_channel(device).subscribe()
    }

    /// Best-effort publish — if nobody is listening, the event is simply
    /// dropped (spec: the notify channel is not part of the delivery
    /// guarantee).
    pub fn publish(&self, device: &DeviceId, event: NotifyEvent) {
        let _ = self.lazy_channel(device).send(event);
    }
}

/// Shared state handed to every HTTP/WebSocket handler.
pub struct AppState {
    pub config: Config,
    pub registry: Arc<Registry>,
    pub verifier: Arc<TokenVerifier>,
    pub delivery: Arc<Delivery>,
    pub notify: NotifyHub,
}

impl AppState {
    pub fn new(config: Config) -> Arc<Self> {
        let registry = Arc::new(Registry::new());
        let verifier = Arc::new(TokenVerifier::new(
            config.auth_url.clone(),
            config.auth_cache_ttl(),
            config.auth_cache_capacity,
        ));
        let delivery = Arc::new(Delivery::new(Arc::clone(&registry)));
        Arc::new(Self {
            config,
            registry,
            verifier,
            delivery,
            notify: NotifyHub::default(),
        })
    }
}
