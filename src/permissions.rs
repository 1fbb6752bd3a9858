//! Capture and storage authorization.
//!
//! Prompting the user is the host's job. The core only asks whether a
//! permission is currently granted, before every operation that needs it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Permissions the core depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Access to the camera device.
    Camera,
    /// Writing images to shared storage.
    StorageWrite,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Camera => f.write_str("camera"),
            Permission::StorageWrite => f.write_str("storage write"),
        }
    }
}

/// External authorization collaborator.
pub trait PermissionProvider: Send + Sync {
    /// Returns true while `permission` is granted.
    fn is_granted(&self, permission: Permission) -> bool;
}

/// Permissions held in memory, can be granted or revoked at runtime.
#[derive(Debug)]
pub struct StaticPermissions {
    camera: AtomicBool,
    storage: AtomicBool,
}

impl StaticPermissions {
    /// Everything granted.
    pub fn granted() -> Self {
        Self {
            camera: AtomicBool::new(true),
            storage: AtomicBool::new(true),
        }
    }

    /// Nothing granted, as on a fresh install.
    pub fn denied() -> Self {
        Self {
            camera: AtomicBool::new(false),
            storage: AtomicBool::new(false),
        }
    }

    /// Grants or revokes `permission`.
    pub fn set(&self, permission: Permission, granted: bool) {
        match permission {
            Permission::Camera => self.camera.store(granted, Ordering::Release),
            Permission::StorageWrite => self.storage.store(granted, Ordering::Release),
        }
    }
}

impl PermissionProvider for StaticPermissions {
    fn is_granted(&self, permission: Permission) -> bool {
        match permission {
            Permission::Camera => self.camera.load(Ordering::Acquire),
            Permission::StorageWrite => self.storage.load(Ordering::Acquire),
        }
    }
}
