//! Session Registry.
//!
//! Generalizes a single `Mutex<Option<...>>` device slot to two `DashMap`s,
//! holding many devices and many controllers concurrently. `DashMap::insert`
//! already returns the prior value atomically, which is exactly the
//! supersede-and-return contract needed here — no extra locking involved.
//!
//! Devices are keyed by `DeviceId` alone (global uniqueness: at most one
//! device session per id, regardless of which user authenticated it).
//! Controllers are keyed by `(UserId, DeviceId)` — at most one controller
//! per user targeting a given device. This asymmetry is what makes a
//! device's current owner a simple fact (`device_owner`) rather than
//! something needing a separate reverse index.

use std::sync::Arc;

use dashmap::DashMap;

use crate::ids::{DeviceId, UserId};
use crate::session::{ControllerSession, DeviceSession};

type ControllerKey = (UserId, DeviceId);

#[derive(Default)]
pub struct Registry {
    devices: DashMap<DeviceId, Arc<DeviceSession>>,
    controllers: DashMap<ControllerKey, Arc<ControllerSession>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically install a device session, returning any session it
    /// superseded. The caller must close the returned session with
    /// `superseded`.
    pub fn register_device(&self, device: DeviceId, session: Arc<DeviceSession>) -> Option<Arc<DeviceSession>> {
        self.devices.insert(device, session)
    }

    /// Symmetric to [`Registry::register_device`] for controllers.
    pub fn register_controller(
        &self,
        user: UserId,
        target_device: DeviceId,
        session: Arc<ControllerSession>,
    ) -> Option<Arc<ControllerSession>> {
        self.controllers.insert((user, target_device), session)
    }

    pub fn lookup_device(&self, device: &DeviceId) -> Option<Arc<DeviceSession>> {
        self.devices.get(device).map(|r| Arc::clone(r.value()))
    }

    pub fn lookup_controller(&self, user: &UserId, target_device: &DeviceId) -> Option<Arc<ControllerSession>> {
        self.controllers
            .get(&(user.clone(), target_device.clone()))
            .map(|r| Arc::clone(r.value()))
    }

    pub fn is_device_connected(&self, device: &DeviceId) -> bool {
        self.devices.contains_key(device)
    }

    /// The `UserId` that currently owns a device slot, if any is registered.
    /// Used to reject a controller whose `target_device_id` belongs to a
    /// different user than the one its own token resolved to.
    pub fn device_owner(&self, device: &DeviceId) -> Option<UserId> {
        self.devices.get(device).map(|r| r.value().core.user.clone())
    }

    /// Idempotent: removes the device entry only if it still holds this
    /// exact session (a newer session may have already superseded it).
    /// Returns whether this call actually performed the removal, so the
    /// caller can tell a genuine disconnect from a no-op.
    pub fn unregister_device(&self, device: &DeviceId, session: &Arc<DeviceSession>) -> bool {
        self.devices.remove_if(device, |_, v| Arc::ptr_eq(v, session)).is_some()
    }

    pub fn unregister_controller(
        &self,
        user: &UserId,
        target_device: &DeviceId,
        session: &Arc<ControllerSession>,
    ) -> bool {
        self.controllers
            .remove_if(&(user.clone(), target_device.clone()), |_, v| Arc::ptr_eq(v, session))
            .is_some()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn controller_count(&self) -> usize {
        self.controllers.len()
    }
}
