//! Misc device descriptors and the registry
//!
//! A [`MiscDevice`] is owned by the driver that registers it; the registry
//! keeps a shared reference for as long as the device is linked. The registry
//! itself is plain data: [`Misc`](crate::Misc) wraps it, together with the
//! dynamic minor bitmap, in the single lock every operation goes through.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::class::DeviceNode;
use crate::fops::Fops;
use crate::minors::{MinorBitmap, MISC_DYNAMIC_MINOR};
use crate::{MiscError, Result};

/// Callback deciding a device's node name
pub type NodeNameFn = Arc<dyn Fn(&MiscDevice) -> Option<String> + Send + Sync>;

/// Misc device descriptor
pub struct MiscDevice {
    name: Option<String>,

    /// Requested minor before registration, assigned minor afterwards
    minor: AtomicU32,

    fops: Fops,
    devnode: Option<NodeNameFn>,

    /// Linked into the registry
    linked: AtomicBool,

    /// Node published for the assigned minor
    this_device: spin::Mutex<Option<DeviceNode>>,
}

impl MiscDevice {
    pub fn builder(fops: Fops) -> MiscDeviceBuilder {
        MiscDeviceBuilder {
            name: None,
            minor: MISC_DYNAMIC_MINOR,
            fops,
            devnode: None,
        }
    }

    /// Device asking for a dynamic minor
    pub fn dynamic(name: impl Into<String>, fops: Fops) -> Arc<Self> {
        Self::builder(fops).name(name).build()
    }

    /// Device asking for a fixed minor
    pub fn fixed(name: impl Into<String>, minor: u32, fops: Fops) -> Arc<Self> {
        Self::builder(fops).name(name).minor(minor).build()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Current minor; [`MISC_DYNAMIC_MINOR`] until a dynamic one is assigned
    pub fn minor(&self) -> u32 {
        self.minor.load(Ordering::Acquire)
    }

    pub fn fops(&self) -> &Fops {
        &self.fops
    }

    /// Whether the device is currently linked into a registry
    pub fn is_registered(&self) -> bool {
        self.linked.load(Ordering::Acquire)
    }

    /// Node override from the device's naming callback
    pub fn node_name_override(&self) -> Option<String> {
        self.devnode.as_ref().and_then(|devnode| devnode(self))
    }

    /// Published node, while registered
    pub fn this_device(&self) -> Option<DeviceNode> {
        self.this_device.lock().clone()
    }

    pub(crate) fn set_minor(&self, minor: u32) {
        self.minor.store(minor, Ordering::Release);
    }

    pub(crate) fn set_this_device(&self, node: Option<DeviceNode>) -> Option<DeviceNode> {
        core::mem::replace(&mut *self.this_device.lock(), node)
    }

    fn set_linked(&self, linked: bool) {
        self.linked.store(linked, Ordering::Release);
    }
}

impl fmt::Debug for MiscDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiscDevice")
            .field("name", &self.name)
            .field("minor", &self.minor())
            .field("registered", &self.is_registered())
            .field("devnode", &self.devnode.is_some())
            .finish()
    }
}

/// Builder for [`MiscDevice`]
pub struct MiscDeviceBuilder {
    name: Option<String>,
    minor: u32,
    fops: Fops,
    devnode: Option<NodeNameFn>,
}

impl MiscDeviceBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn minor(mut self, minor: u32) -> Self {
        self.minor = minor;
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.minor = MISC_DYNAMIC_MINOR;
        self
    }

    /// Fixed node name, e.g. `input/uinput`
    pub fn devnode(self, devnode: impl Into<String>) -> Self {
        let devnode = devnode.into();
        self.devnode_with(move |_| Some(devnode.clone()))
    }

    pub fn devnode_with<F>(mut self, devnode: F) -> Self
    where
        F: Fn(&MiscDevice) -> Option<String> + Send + Sync + 'static,
    {
        self.devnode = Some(Arc::new(devnode));
        self
    }

    pub fn build(self) -> Arc<MiscDevice> {
        Arc::new(MiscDevice {
            name: self.name,
            minor: AtomicU32::new(self.minor),
            fops: self.fops,
            devnode: self.devnode,
            linked: AtomicBool::new(false),
            this_device: spin::Mutex::new(None),
        })
    }
}

/// Registered devices plus the dynamic minor map
///
/// New devices go to the front, so iteration yields the most recent
/// registration first.
#[derive(Default)]
pub(crate) struct Registry {
    devices: Vec<Arc<MiscDevice>>,
    minors: MinorBitmap,
}

impl Registry {
    pub const fn new() -> Self {
        Self {
            devices: Vec::new(),
            minors: MinorBitmap::new(),
        }
    }

    /// First device holding `minor`
    pub fn find(&self, minor: u32) -> Option<&Arc<MiscDevice>> {
        self.devices.iter().find(|device| device.minor() == minor)
    }

    /// Link a device under its current minor
    ///
    /// # Errors
    /// `MinorBusy` if another linked device holds the minor
    pub fn insert(&mut self, device: Arc<MiscDevice>) -> Result<()> {
        let minor = device.minor();
        if self.find(minor).is_some() {
            return Err(MiscError::MinorBusy { minor });
        }
        device.set_linked(true);
        self.devices.insert(0, device);
        Ok(())
    }

    /// Unlink a device
    ///
    /// # Errors
    /// `NotLinked` if the device is not in this registry
    pub fn remove(&mut self, device: &Arc<MiscDevice>) -> Result<()> {
        let index = self
            .devices
            .iter()
            .position(|linked| Arc::ptr_eq(linked, device))
            .ok_or(MiscError::NotLinked)?;
        let removed = self.devices.remove(index);
        removed.set_linked(false);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<MiscDevice>> {
        self.devices.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<MiscDevice>> {
        self.devices.get(index)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn minors(&self) -> &MinorBitmap {
        &self.minors
    }

    pub fn minors_mut(&mut self) -> &mut MinorBitmap {
        &mut self.minors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fops::FileOperations;

    struct Nop;

    impl FileOperations for Nop {}

    fn fops() -> Fops {
        Arc::new(Nop)
    }

    #[test]
    fn test_builder_defaults() {
        let device = MiscDevice::builder(fops()).build();
        assert_eq!(device.minor(), MISC_DYNAMIC_MINOR);
        assert!(device.name().is_none());
        assert!(!device.is_registered());
        assert!(device.node_name_override().is_none());
        assert!(device.this_device().is_none());
    }

    #[test]
    fn test_devnode_override() {
        let device = MiscDevice::builder(fops())
            .name("uinput")
            .minor(223)
            .devnode("input/uinput")
            .build();
        assert_eq!(device.node_name_override().as_deref(), Some("input/uinput"));

        let computed = MiscDevice::builder(fops())
            .name("tun")
            .devnode_with(|dev| dev.name().map(|name| format!("net/{}", name)))
            .build();
        assert_eq!(computed.node_name_override().as_deref(), Some("net/tun"));
    }

    #[test]
    fn test_insert_rejects_duplicate_minor() {
        let mut registry = Registry::new();
        let first = MiscDevice::fixed("first", 5, fops());
        let second = MiscDevice::fixed("second", 5, fops());

        registry.insert(Arc::clone(&first)).unwrap();
        assert_eq!(
            registry.insert(Arc::clone(&second)),
            Err(MiscError::MinorBusy { minor: 5 })
        );
        assert_eq!(registry.len(), 1);
        assert!(first.is_registered());
        assert!(!second.is_registered());
        assert!(Arc::ptr_eq(registry.find(5).unwrap(), &first));
    }

    #[test]
    fn test_remove_and_ordering() {
        let mut registry = Registry::new();
        let a = MiscDevice::fixed("a", 1, fops());
        let b = MiscDevice::fixed("b", 2, fops());
        registry.insert(Arc::clone(&a)).unwrap();
        registry.insert(Arc::clone(&b)).unwrap();

        // Most recent first
        let names: Vec<_> = registry.iter().filter_map(|d| d.name()).collect();
        assert_eq!(names, vec!["b", "a"]);

        registry.remove(&a).unwrap();
        assert!(!a.is_registered());
        assert_eq!(registry.remove(&a), Err(MiscError::NotLinked));
        assert!(registry.find(1).is_none());
        assert_eq!(registry.len(), 1);
    }
}
