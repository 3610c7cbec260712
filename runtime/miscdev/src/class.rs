//! Device classes and node naming
//!
//! Registration publishes every misc device as a node in a [`DeviceClass`].
//! The node carries a back-reference to its [`MiscDevice`] so the class can
//! ask the node-naming hook for a custom name (e.g. `input/uinput`) instead
//! of the device name.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use crate::chrdev::DevT;
use crate::registry::MiscDevice;
use crate::Errno;

/// Hook a class consults for a node's display name
pub type NodeNameHook = fn(&DeviceNode) -> Option<String>;

/// Externally visible device object
#[derive(Debug, Clone)]
pub struct DeviceNode {
    devt: DevT,
    name: String,
    drvdata: Weak<MiscDevice>,
}

impl DeviceNode {
    pub fn new(devt: DevT, name: impl Into<String>, drvdata: Weak<MiscDevice>) -> Self {
        Self {
            devt,
            name: name.into(),
            drvdata,
        }
    }

    pub fn devt(&self) -> DevT {
        self.devt
    }

    /// Name the device was created with
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Descriptor the node was created for, while it is still alive
    pub fn drvdata(&self) -> Option<Arc<MiscDevice>> {
        self.drvdata.upgrade()
    }
}

/// Device-node materialization
///
/// Implementations run with the misc registry locked and must not call back
/// into the multiplexer.
pub trait DeviceClass: Send + Sync {
    /// Class name, e.g. `misc`
    fn name(&self) -> &str;

    /// Create the node for `devt`
    fn device_create(
        &self,
        devt: DevT,
        drvdata: &Arc<MiscDevice>,
        name: &str,
    ) -> Result<DeviceNode, Errno>;

    /// Remove the node for `devt`; unknown devices are ignored
    fn device_destroy(&self, devt: DevT);

    /// Install the node-naming hook
    fn set_nodename(&self, _hook: NodeNameHook) {}
}

/// In-memory device class (devtmpfs model)
pub struct DevClass {
    name: String,
    nodename: spin::Mutex<Option<NodeNameHook>>,
    nodes: spin::Mutex<BTreeMap<DevT, DeviceNode>>,
}

impl DevClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodename: spin::Mutex::new(None),
            nodes: spin::Mutex::new(BTreeMap::new()),
        }
    }

    /// Final node name: the hook's override, else the device name
    pub fn node_name(&self, node: &DeviceNode) -> String {
        let hook = *self.nodename.lock();
        hook.and_then(|hook| hook(node))
            .unwrap_or_else(|| node.name().to_string())
    }

    /// Path of the node published for `devt`
    pub fn node_path(&self, devt: DevT) -> Option<String> {
        let node = self.nodes.lock().get(&devt).cloned()?;
        Some(format!("/dev/{}", self.node_name(&node)))
    }

    pub fn contains(&self, devt: DevT) -> bool {
        self.nodes.lock().contains_key(&devt)
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All published nodes as `(devt, path)`, ordered by device number
    pub fn nodes(&self) -> Vec<(DevT, String)> {
        let nodes: Vec<DeviceNode> = self.nodes.lock().values().cloned().collect();
        nodes
            .iter()
            .map(|node| (node.devt(), format!("/dev/{}", self.node_name(node))))
            .collect()
    }
}

impl DeviceClass for DevClass {
    fn name(&self) -> &str {
        &self.name
    }

    fn device_create(
        &self,
        devt: DevT,
        drvdata: &Arc<MiscDevice>,
        name: &str,
    ) -> Result<DeviceNode, Errno> {
        if name.is_empty() {
            return Err(Errno::EINVAL);
        }

        let node = DeviceNode::new(devt, name, Arc::downgrade(drvdata));
        let path = self.node_name(&node);

        let mut nodes = self.nodes.lock();
        if nodes.contains_key(&devt) {
            return Err(Errno::EEXIST);
        }
        if nodes.values().any(|other| self.node_name(other) == path) {
            return Err(Errno::EEXIST);
        }
        nodes.insert(devt, node.clone());

        log::debug!("{}: created /dev/{} ({})", self.name, path, devt);
        Ok(node)
    }

    fn device_destroy(&self, devt: DevT) {
        if self.nodes.lock().remove(&devt).is_some() {
            log::debug!("{}: destroyed {}", self.name, devt);
        }
    }

    fn set_nodename(&self, hook: NodeNameHook) {
        *self.nodename.lock() = Some(hook);
    }
}
