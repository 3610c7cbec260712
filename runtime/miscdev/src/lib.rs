//! Misc Device Multiplexer - one shared char major for many small drivers
//!
//! # Purpose
//! Small drivers (watchdogs, RTCs, control nodes) rarely deserve a char major
//! of their own. The multiplexer lets any number of them share the misc major:
//! each driver registers a [`MiscDevice`] (name, operation table, minor
//! preference) and receives a minor, either the fixed one it asked for or one
//! allocated from the dynamic range. Opening `misc:<minor>` enters a single
//! generic table that finds the driver and swaps its table onto the file.
//!
//! # Integration Points
//! - Depends on: char-device layer ([`CharDevices`]), device class
//!   ([`DeviceClass`]), module loader ([`ModuleLoader`])
//! - Provides to: drivers (register/deregister), VFS (open on the misc
//!   major), inspection tools (the `/proc/misc` style listing)
//!
//! # Architecture
//! All registry state (the ordered device list and the dynamic minor bitmap)
//! sits behind one spin lock owned by [`Misc`]. Opens resolve under that lock,
//! pin the driver's table with a counted [`FopsRef`], then drop the lock before
//! loading code on demand or calling into the driver. A miss triggers exactly
//! one `request_module("char-major-<major>-<minor>")` and one retry.
//!
//! # Testing Strategy
//! - Unit tests: minor bitmap, registry, module refcounts, class naming
//! - Integration tests: register/deregister sequences, dispatch with
//!   on-demand loading, rollback on driver open failure, concurrent access

use core::fmt;

use thiserror::Error;

mod chrdev;
mod class;
mod config;
mod dispatch;
mod file;
mod fops;
mod loader;
mod minors;
mod misc;
mod module;
mod proc;
mod registry;

pub use chrdev::{CharDevices, DevT};
pub use class::{DevClass, DeviceClass, DeviceNode, NodeNameHook};
pub use config::{MiscConfig, MISC_MAJOR};
pub use dispatch::MiscFops;
pub use file::{File, FileMode, Inode};
pub use fops::{fops_get, FileOperations, Fops, FopsRef};
pub use loader::{FnLoader, ModuleInit, ModuleLoader, ModuleTable, NoLoader};
pub use minors::{well_known, MinorBitmap, DYNAMIC_MINORS, MISC_DYNAMIC_MINOR};
pub use misc::{misc_nodename, Misc};
pub use module::{Module, ModuleRef};
pub use proc::{ListEntry, Listing};
pub use registry::{MiscDevice, MiscDeviceBuilder, NodeNameFn};

/// Kernel-style error number
///
/// Driver operation tables and the collaborators around the multiplexer
/// (device class, char-device layer, module loader) report failures as plain
/// errno values, the same way a driver would.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(i32);

impl Errno {
    pub const EPERM: Errno = Errno(1);
    pub const ENOENT: Errno = Errno(2);
    pub const EIO: Errno = Errno(5);
    pub const ENXIO: Errno = Errno(6);
    pub const EBADF: Errno = Errno(9);
    pub const EAGAIN: Errno = Errno(11);
    pub const ENOMEM: Errno = Errno(12);
    pub const EBUSY: Errno = Errno(16);
    pub const EEXIST: Errno = Errno(17);
    pub const ENODEV: Errno = Errno(19);
    pub const EINVAL: Errno = Errno(22);
    pub const ENOTTY: Errno = Errno(25);

    /// Wrap a positive errno code
    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    /// Positive errno code
    pub const fn code(self) -> i32 {
        self.0
    }

    fn symbol(self) -> Option<&'static str> {
        Some(match self {
            Self::EPERM => "EPERM",
            Self::ENOENT => "ENOENT",
            Self::EIO => "EIO",
            Self::ENXIO => "ENXIO",
            Self::EBADF => "EBADF",
            Self::EAGAIN => "EAGAIN",
            Self::ENOMEM => "ENOMEM",
            Self::EBUSY => "EBUSY",
            Self::EEXIST => "EEXIST",
            Self::ENODEV => "ENODEV",
            Self::EINVAL => "EINVAL",
            Self::ENOTTY => "ENOTTY",
            _ => return None,
        })
    }
}

impl fmt::Debug for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.symbol() {
            Some(symbol) => f.write_str(symbol),
            None => write!(f, "Errno({})", self.0),
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.symbol() {
            Some(symbol) => write!(f, "{} ({})", symbol, self.0),
            None => write!(f, "errno {}", self.0),
        }
    }
}

/// Error types for misc device operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MiscError {
    #[error("Minor {minor} already registered")]
    MinorBusy { minor: u32 },

    #[error("No dynamic minors left ({capacity} in use)")]
    DynamicMinorsExhausted { capacity: usize },

    #[error("Device is not registered")]
    NotLinked,

    #[error("No device on minor {minor}")]
    NoDevice { minor: u32 },

    #[error("Driver open failed: {0}")]
    HandlerOpen(Errno),

    #[error("Device node creation failed: {0}")]
    Materialization(Errno),

    #[error("Unable to get major {major} for misc devices")]
    MajorUnavailable { major: u32 },
}

impl MiscError {
    /// Errno reported to callers that only understand error numbers
    pub fn errno(&self) -> Errno {
        match self {
            Self::MinorBusy { .. } | Self::DynamicMinorsExhausted { .. } => Errno::EBUSY,
            Self::NotLinked => Errno::EINVAL,
            Self::NoDevice { .. } => Errno::ENODEV,
            Self::HandlerOpen(errno) | Self::Materialization(errno) => *errno,
            Self::MajorUnavailable { .. } => Errno::EIO,
        }
    }

    /// Minor collision or dynamic range exhaustion
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::MinorBusy { .. } | Self::DynamicMinorsExhausted { .. }
        )
    }
}

pub type Result<T> = core::result::Result<T, MiscError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_formatting() {
        assert_eq!(format!("{}", Errno::EBUSY), "EBUSY (16)");
        assert_eq!(format!("{:?}", Errno::ENODEV), "ENODEV");
        assert_eq!(format!("{}", Errno::new(95)), "errno 95");
        assert_eq!(Errno::new(22), Errno::EINVAL);
    }

    #[test]
    fn test_error_errno_mapping() {
        assert_eq!(MiscError::MinorBusy { minor: 5 }.errno(), Errno::EBUSY);
        assert_eq!(
            MiscError::DynamicMinorsExhausted { capacity: 64 }.errno(),
            Errno::EBUSY
        );
        assert_eq!(MiscError::NotLinked.errno(), Errno::EINVAL);
        assert_eq!(MiscError::NoDevice { minor: 9 }.errno(), Errno::ENODEV);
        assert_eq!(MiscError::HandlerOpen(Errno::EPERM).errno(), Errno::EPERM);
        assert_eq!(MiscError::MajorUnavailable { major: 10 }.errno(), Errno::EIO);

        assert!(MiscError::MinorBusy { minor: 1 }.is_busy());
        assert!(!MiscError::NotLinked.is_busy());
    }
}
