//! Physical device identity and role binding.
//!
//! Each physical camera is identified by its USB product code and bound
//! to one of two fixed roles. Assignments are persisted through a narrow
//! key/value store so a device keeps its role across reconnects.

mod binder;
mod layer;
mod role;
mod store;

pub use binder::{BindError, DeviceRoleBinder, Reassignment};
pub use layer::{DeviceLayer, DeviceLayerCall, RecordingDeviceLayer};
pub use role::{DeviceRole, ProductId};
pub use store::{FileRoleStore, MemoryRoleStore, RoleAssignments, RoleStore, StoreError, UNASSIGNED};
