//! Persisted role assignments.
//!
//! The store is a narrow key/value contract: one product id per role,
//! `-1` meaning unassigned.

use super::{DeviceRole, ProductId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Value reported for a role with no persisted device.
pub const UNASSIGNED: i32 = -1;

/// Errors raised by persistent role stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read role store {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write role store {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("role store {path} is malformed: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Key/value persistence for role → product id mapping.
pub trait RoleStore: Send {
    /// Returns the persisted product id for `role`, or [`UNASSIGNED`].
    fn get_pid(&self, role: DeviceRole) -> i32;

    /// Persists `pid` for `role` without applying any exclusion rule.
    fn set_pid(&mut self, role: DeviceRole, pid: i32) -> Result<(), StoreError>;

    /// Persists `product` for `role`, clearing the opposite role first if it
    /// currently holds the same product.
    ///
    /// Returns the role that was cleared, if any.
    fn assign_pid(
        &mut self,
        role: DeviceRole,
        product: ProductId,
    ) -> Result<Option<DeviceRole>, StoreError> {
        let other = role.other();
        let mut cleared = None;
        if self.get_pid(other) == product.to_stored() {
            self.set_pid(other, UNASSIGNED)?;
            cleared = Some(other);
        }
        self.set_pid(role, product.to_stored())?;
        Ok(cleared)
    }

    /// Resolves the role persisted for `product`, if any.
    fn role_of(&self, product: ProductId) -> Option<DeviceRole> {
        DeviceRole::ALL
            .into_iter()
            .find(|role| self.get_pid(*role) == product.to_stored())
    }
}

/// On-disk representation, keyed the way host applications already store it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignments {
    #[serde(rename = "PidL", default = "unassigned")]
    pub left: i32,
    #[serde(rename = "PidR", default = "unassigned")]
    pub right: i32,
}

fn unassigned() -> i32 {
    UNASSIGNED
}

impl Default for RoleAssignments {
    fn default() -> Self {
        Self {
            left: UNASSIGNED,
            right: UNASSIGNED,
        }
    }
}

impl RoleAssignments {
    fn get(&self, role: DeviceRole) -> i32 {
        match role {
            DeviceRole::LeftInfrared => self.left,
            DeviceRole::RightVisible => self.right,
        }
    }

    fn set(&mut self, role: DeviceRole, pid: i32) {
        match role {
            DeviceRole::LeftInfrared => self.left = pid,
            DeviceRole::RightVisible => self.right = pid,
        }
    }
}

/// Volatile store, used by tests and hosts that manage persistence themselves.
#[derive(Debug, Default)]
pub struct MemoryRoleStore {
    assignments: RoleAssignments,
}

impl MemoryRoleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with assignments.
    pub fn with_assignments(assignments: RoleAssignments) -> Self {
        Self { assignments }
    }
}

impl RoleStore for MemoryRoleStore {
    fn get_pid(&self, role: DeviceRole) -> i32 {
        self.assignments.get(role)
    }

    fn set_pid(&mut self, role: DeviceRole, pid: i32) -> Result<(), StoreError> {
        self.assignments.set(role, pid);
        Ok(())
    }
}

/// TOML file backed store. Every write rewrites the whole file.
#[derive(Debug)]
pub struct FileRoleStore {
    path: PathBuf,
    cached: RoleAssignments,
}

impl FileRoleStore {
    /// Opens the store at `path`. A missing file is treated as empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let cached = match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content).map_err(|e| StoreError::Parse {
                path: path.clone(),
                message: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RoleAssignments::default(),
            Err(source) => return Err(StoreError::Read { path, source }),
        };
        tracing::debug!(path = %path.display(), ?cached, "Role store opened");
        Ok(Self { path, cached })
    }

    /// Current assignments.
    pub fn assignments(&self) -> RoleAssignments {
        self.cached
    }

    fn flush(&self) -> Result<(), StoreError> {
        let content = toml::to_string(&self.cached).map_err(|e| StoreError::Parse {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        std::fs::write(&self.path, content).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

impl RoleStore for FileRoleStore {
    fn get_pid(&self, role: DeviceRole) -> i32 {
        self.cached.get(role)
    }

    fn set_pid(&mut self, role: DeviceRole, pid: i32) -> Result<(), StoreError> {
        let previous = self.cached;
        self.cached.set(role, pid);
        if let Err(e) = self.flush() {
            self.cached = previous;
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_unassigned() {
        let store = MemoryRoleStore::new();
        assert_eq!(store.get_pid(DeviceRole::LeftInfrared), UNASSIGNED);
        assert_eq!(store.get_pid(DeviceRole::RightVisible), UNASSIGNED);
    }

    #[test]
    fn test_assign_clears_opposite_role() {
        let mut store = MemoryRoleStore::new();
        store
            .assign_pid(DeviceRole::RightVisible, ProductId(0x2204))
            .unwrap();

        let cleared = store
            .assign_pid(DeviceRole::LeftInfrared, ProductId(0x2204))
            .unwrap();

        assert_eq!(cleared, Some(DeviceRole::RightVisible));
        assert_eq!(store.get_pid(DeviceRole::LeftInfrared), 0x2204);
        assert_eq!(store.get_pid(DeviceRole::RightVisible), UNASSIGNED);
    }

    #[test]
    fn test_assign_leaves_unrelated_role() {
        let mut store = MemoryRoleStore::new();
        store
            .assign_pid(DeviceRole::RightVisible, ProductId(0x2205))
            .unwrap();
        let cleared = store
            .assign_pid(DeviceRole::LeftInfrared, ProductId(0x2204))
            .unwrap();

        assert_eq!(cleared, None);
        assert_eq!(store.role_of(ProductId(0x2205)), Some(DeviceRole::RightVisible));
    }

    #[test]
    fn test_file_store_persists() {
        let path = std::env::temp_dir().join(format!(
            "dual-liveness-roles-{}.toml",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        {
            let mut store = FileRoleStore::open(&path).unwrap();
            store
                .assign_pid(DeviceRole::LeftInfrared, ProductId(0x2206))
                .unwrap();
        }

        let store = FileRoleStore::open(&path).unwrap();
        assert_eq!(store.get_pid(DeviceRole::LeftInfrared), 0x2206);
        assert_eq!(store.get_pid(DeviceRole::RightVisible), UNASSIGNED);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("PidL"));
        let _ = std::fs::remove_file(&path);
    }
}
