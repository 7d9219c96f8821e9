//! Device role binding.
//!
//! Maps physical devices onto the two logical roles. Persisted assignments
//! survive detach so a device reclaims its role when it comes back; the
//! in-memory live binding only tracks which device currently holds a role.

use super::{
    layer::DeviceLayer,
    store::{RoleStore, StoreError, UNASSIGNED},
    DeviceRole, ProductId,
};
use std::sync::Arc;
use thiserror::Error;

/// Role binding failures.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("{role} is already bound to connected device {holder}")]
    RoleOccupied { role: DeviceRole, holder: ProductId },
    #[error("no unassigned role available for device {product}")]
    NoRoleAvailable { product: ProductId },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of an explicit role assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reassignment {
    /// Role that now holds the device.
    pub role: DeviceRole,
    /// Opposite role whose persisted assignment was cleared.
    pub cleared: Option<DeviceRole>,
    /// Opposite role that lost its live binding to this device. Its stream
    /// must be closed; the device reclaims the new role on its next connect.
    pub unbound: Option<DeviceRole>,
}

/// Binds connected devices to roles.
pub struct DeviceRoleBinder {
    store: Box<dyn RoleStore>,
    layer: Arc<dyn DeviceLayer>,
    live: [Option<ProductId>; 2],
}

impl DeviceRoleBinder {
    pub fn new(store: Box<dyn RoleStore>, layer: Arc<dyn DeviceLayer>) -> Self {
        Self {
            store,
            layer,
            live: [None, None],
        }
    }

    /// A device appeared; ask the platform for access.
    pub fn on_attach(&self, product: ProductId) {
        tracing::info!(product = %product, "Device attached");
        self.layer.request_permission(product);
    }

    /// A device was opened by the platform. Returns the role it now holds.
    pub fn on_connect(&mut self, product: ProductId) -> Result<DeviceRole, BindError> {
        let role = match self.store.role_of(product) {
            Some(role) => role,
            None => self.default_role(product)?,
        };

        match self.live[role.index()] {
            Some(holder) if holder != product => {
                tracing::warn!(role = %role, product = %product, holder = %holder, "Role already held");
                Err(BindError::RoleOccupied { role, holder })
            }
            _ => {
                self.live[role.index()] = Some(product);
                tracing::info!(role = %role, product = %product, "Device bound");
                Ok(role)
            }
        }
    }

    /// A device went away. Clears only the live binding; the persisted
    /// assignment stays so the device reclaims its role on reconnect.
    pub fn on_detach(&mut self, product: ProductId) -> Option<DeviceRole> {
        let role = DeviceRole::ALL
            .into_iter()
            .find(|role| self.live[role.index()] == Some(product))?;
        self.live[role.index()] = None;
        tracing::info!(role = %role, product = %product, "Device unbound");
        Some(role)
    }

    /// Persisted role for `product`, if any.
    pub fn resolve_role(&self, product: ProductId) -> Option<DeviceRole> {
        self.store.role_of(product)
    }

    /// Explicitly persists `product` as the device for `role`.
    ///
    /// Rejected while `role` is live-bound to a different device; call
    /// [`clear_role`](Self::clear_role) first. If the opposite role holds the
    /// same device, that assignment is cleared.
    pub fn assign_role(
        &mut self,
        role: DeviceRole,
        product: ProductId,
    ) -> Result<Reassignment, BindError> {
        if let Some(holder) = self.live[role.index()] {
            if holder != product {
                return Err(BindError::RoleOccupied { role, holder });
            }
        }

        let cleared = self.store.assign_pid(role, product)?;

        let other = role.other();
        let unbound = if self.live[other.index()] == Some(product) {
            self.live[other.index()] = None;
            Some(other)
        } else {
            None
        };

        tracing::info!(role = %role, product = %product, ?cleared, ?unbound, "Role assigned");
        Ok(Reassignment {
            role,
            cleared,
            unbound,
        })
    }

    /// Assigns several roles as one unit. If any write fails, the persisted
    /// and live bindings are put back as they were.
    pub fn assign_roles(
        &mut self,
        assignments: &[(DeviceRole, ProductId)],
    ) -> Result<Vec<Reassignment>, BindError> {
        let persisted = DeviceRole::ALL.map(|role| self.store.get_pid(role));
        let live = self.live;

        let mut applied = Vec::with_capacity(assignments.len());
        for &(role, product) in assignments {
            match self.assign_role(role, product) {
                Ok(reassignment) => applied.push(reassignment),
                Err(e) => {
                    self.live = live;
                    for role in DeviceRole::ALL {
                        let pid = persisted[role.index()];
                        if self.store.get_pid(role) == pid {
                            continue;
                        }
                        if let Err(restore) = self.store.set_pid(role, pid) {
                            tracing::warn!(role = %role, error = %restore, "Role assignment rollback failed");
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(applied)
    }

    /// Forgets both the persisted and live binding of `role`.
    pub fn clear_role(&mut self, role: DeviceRole) -> Result<Option<ProductId>, BindError> {
        self.store.set_pid(role, UNASSIGNED)?;
        Ok(self.live[role.index()].take())
    }

    /// Device currently live-bound to `role`.
    pub fn bound_device(&self, role: DeviceRole) -> Option<ProductId> {
        self.live[role.index()]
    }

    /// Raw persisted value for `role` (`-1` when unassigned).
    pub fn persisted(&self, role: DeviceRole) -> i32 {
        self.store.get_pid(role)
    }

    /// First role that is neither persisted nor live, claimed for `product`.
    fn default_role(&mut self, product: ProductId) -> Result<DeviceRole, BindError> {
        let role = DeviceRole::ALL
            .into_iter()
            .find(|role| {
                self.store.get_pid(*role) == UNASSIGNED && self.live[role.index()].is_none()
            })
            .ok_or(BindError::NoRoleAvailable { product })?;
        self.store.assign_pid(role, product)?;
        tracing::info!(role = %role, product = %product, "Default role assigned");
        Ok(role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceLayerCall, MemoryRoleStore, RecordingDeviceLayer, StoreError};
    use std::path::PathBuf;

    const A: ProductId = ProductId(0x2203);
    const B: ProductId = ProductId(0x2204);
    const C: ProductId = ProductId(0x2205);

    fn binder() -> (DeviceRoleBinder, Arc<RecordingDeviceLayer>) {
        let layer = Arc::new(RecordingDeviceLayer::new());
        let binder = DeviceRoleBinder::new(Box::new(MemoryRoleStore::new()), layer.clone());
        (binder, layer)
    }

    #[test]
    fn test_attach_requests_permission() {
        let (binder, layer) = binder();
        binder.on_attach(A);
        assert_eq!(layer.calls(), vec![DeviceLayerCall::RequestPermission(A)]);
    }

    #[test]
    fn test_default_assignment_order() {
        let (mut binder, _) = binder();
        assert_eq!(binder.on_connect(A).unwrap(), DeviceRole::LeftInfrared);
        assert_eq!(binder.on_connect(B).unwrap(), DeviceRole::RightVisible);
        assert!(matches!(
            binder.on_connect(C),
            Err(BindError::NoRoleAvailable { .. })
        ));
    }

    #[test]
    fn test_detach_keeps_persisted_role() {
        let (mut binder, _) = binder();
        binder.on_connect(A).unwrap();
        binder.on_connect(B).unwrap();

        assert_eq!(binder.on_detach(A), Some(DeviceRole::LeftInfrared));
        assert_eq!(binder.bound_device(DeviceRole::LeftInfrared), None);
        assert_eq!(binder.resolve_role(A), Some(DeviceRole::LeftInfrared));

        // A stranger cannot take the persisted role of a detached device
        assert!(binder.on_connect(C).is_err());
        // but the original device reclaims it
        assert_eq!(binder.on_connect(A).unwrap(), DeviceRole::LeftInfrared);
    }

    #[test]
    fn test_assign_rejected_while_other_device_live() {
        let (mut binder, _) = binder();
        binder.on_connect(A).unwrap();

        assert!(matches!(
            binder.assign_role(DeviceRole::LeftInfrared, B),
            Err(BindError::RoleOccupied { holder, .. }) if holder == A
        ));

        binder.clear_role(DeviceRole::LeftInfrared).unwrap();
        assert!(binder.assign_role(DeviceRole::LeftInfrared, B).is_ok());
    }

    #[test]
    fn test_assign_moves_device_between_roles() {
        let (mut binder, _) = binder();
        binder.assign_role(DeviceRole::RightVisible, A).unwrap();
        assert_eq!(binder.on_connect(A).unwrap(), DeviceRole::RightVisible);

        let outcome = binder.assign_role(DeviceRole::LeftInfrared, A).unwrap();
        assert_eq!(outcome.cleared, Some(DeviceRole::RightVisible));
        assert_eq!(outcome.unbound, Some(DeviceRole::RightVisible));
        assert_eq!(binder.persisted(DeviceRole::RightVisible), UNASSIGNED);
        assert_eq!(binder.bound_device(DeviceRole::RightVisible), None);

        // never two roles pointing at the same connected device
        assert_eq!(binder.on_connect(A).unwrap(), DeviceRole::LeftInfrared);
        assert_eq!(binder.bound_device(DeviceRole::RightVisible), None);
    }

    /// Store whose right-role writes fail.
    struct ReadOnlyRight(MemoryRoleStore);

    impl RoleStore for ReadOnlyRight {
        fn get_pid(&self, role: DeviceRole) -> i32 {
            self.0.get_pid(role)
        }

        fn set_pid(&mut self, role: DeviceRole, pid: i32) -> Result<(), StoreError> {
            if role == DeviceRole::RightVisible {
                return Err(StoreError::Write {
                    path: PathBuf::from("roles.toml"),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
                });
            }
            self.0.set_pid(role, pid)
        }
    }

    #[test]
    fn test_assign_roles_rolls_back_on_write_failure() {
        let layer = Arc::new(RecordingDeviceLayer::new());
        let mut binder = DeviceRoleBinder::new(Box::new(ReadOnlyRight(MemoryRoleStore::new())), layer);

        let result = binder.assign_roles(&[(DeviceRole::LeftInfrared, A), (DeviceRole::RightVisible, B)]);

        assert!(matches!(result, Err(BindError::Store(StoreError::Write { .. }))));
        assert_eq!(binder.persisted(DeviceRole::LeftInfrared), UNASSIGNED);
        assert_eq!(binder.persisted(DeviceRole::RightVisible), UNASSIGNED);
    }

    #[test]
    fn test_assign_roles_applies_all() {
        let (mut binder, _) = binder();
        let applied = binder
            .assign_roles(&[(DeviceRole::LeftInfrared, A), (DeviceRole::RightVisible, B)])
            .unwrap();

        assert_eq!(applied.len(), 2);
        assert_eq!(binder.resolve_role(A), Some(DeviceRole::LeftInfrared));
        assert_eq!(binder.resolve_role(B), Some(DeviceRole::RightVisible));
    }
}
