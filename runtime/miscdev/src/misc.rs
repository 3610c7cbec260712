//! Misc multiplexer handle and the register/deregister lifecycle

use std::sync::Arc;

use crate::chrdev::CharDevices;
use crate::class::{DeviceClass, DeviceNode};
use crate::config::MiscConfig;
use crate::dispatch::MiscFops;
use crate::fops::Fops;
use crate::loader::ModuleLoader;
use crate::minors::{MinorBitmap, MISC_DYNAMIC_MINOR};
use crate::registry::{MiscDevice, Registry};
use crate::{MiscError, Result, DYNAMIC_MINORS};

pub(crate) struct MiscInner {
    pub(crate) config: MiscConfig,

    /// Device list and dynamic minor map share this one lock
    pub(crate) registry: spin::Mutex<Registry>,

    pub(crate) class: Arc<dyn DeviceClass>,
    pub(crate) loader: Arc<dyn ModuleLoader>,

    /// Generic table, shared by every file opened through the misc major
    pub(crate) fops: Fops,
}

/// Misc device multiplexer
///
/// Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct Misc {
    pub(crate) inner: Arc<MiscInner>,
}

impl Misc {
    /// Create a multiplexer that is not yet bound to a char major
    ///
    /// Installs [`misc_nodename`] as the class's node-naming hook.
    pub fn new(
        config: MiscConfig,
        class: Arc<dyn DeviceClass>,
        loader: Arc<dyn ModuleLoader>,
    ) -> Self {
        class.set_nodename(misc_nodename);

        let inner = Arc::new_cyclic(|weak| MiscInner {
            config,
            registry: spin::Mutex::new(Registry::new()),
            class,
            loader,
            fops: Arc::new(MiscFops::new(weak.clone())),
        });

        Self { inner }
    }

    /// Create a multiplexer and bind its generic table to the misc major
    ///
    /// # Errors
    /// `MajorUnavailable` if the major is already taken
    pub fn init(
        config: MiscConfig,
        chrdevs: &CharDevices,
        class: Arc<dyn DeviceClass>,
        loader: Arc<dyn ModuleLoader>,
    ) -> Result<Self> {
        let misc = Self::new(config, class, loader);
        let major = misc.inner.config.major;

        if let Err(errno) = chrdevs.register_chrdev(major, &misc.inner.config.class_name, misc.fops())
        {
            log::error!("unable to get major {} for misc devices: {}", major, errno);
            return Err(MiscError::MajorUnavailable { major });
        }

        log::info!(
            "misc: bound to major {} (class {})",
            major,
            misc.inner.class.name()
        );
        Ok(misc)
    }

    /// Unbind the generic table from the misc major
    pub fn shutdown(&self, chrdevs: &CharDevices) -> bool {
        chrdevs.unregister_chrdev(self.inner.config.major)
    }

    pub fn config(&self) -> &MiscConfig {
        &self.inner.config
    }

    pub fn class(&self) -> &Arc<dyn DeviceClass> {
        &self.inner.class
    }

    /// Generic table bound to the whole misc major
    pub fn fops(&self) -> Fops {
        Arc::clone(&self.inner.fops)
    }

    /// Register a misc device
    ///
    /// Assigns a dynamic minor if the device asked for one, publishes its
    /// node and links it. On failure nothing changes: the device keeps its
    /// requested minor and the minor map is left as it was.
    ///
    /// # Returns
    /// The minor the device now holds
    ///
    /// # Errors
    /// - `MinorBusy` if the requested minor is taken
    /// - `DynamicMinorsExhausted` if no dynamic minor is free
    /// - `Materialization` with the class's errno if the node cannot be created
    pub fn register(&self, misc: &Arc<MiscDevice>) -> Result<u32> {
        let mut registry = self.inner.registry.lock();

        let requested = misc.minor();
        let dynamic = requested == MISC_DYNAMIC_MINOR;

        if misc.is_registered() || (!dynamic && registry.find(requested).is_some()) {
            log::warn!(
                "misc: {} wants minor {} which is busy",
                display_name(misc),
                requested
            );
            return Err(MiscError::MinorBusy { minor: requested });
        }

        let (minor, was_set) = if dynamic {
            let minor = registry
                .minors_mut()
                .allocate()
                .ok_or(MiscError::DynamicMinorsExhausted {
                    capacity: DYNAMIC_MINORS,
                })
                .inspect_err(|_| {
                    log::warn!("misc: no dynamic minor left for {}", display_name(misc))
                })?;
            (minor, false)
        } else {
            (requested, registry.minors().is_set(requested))
        };
        registry.minors_mut().reserve(minor);
        misc.set_minor(minor);

        let devt = self.inner.config.devt(minor);
        let name = misc
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}{}", self.inner.config.class_name, minor));

        let node = match self.inner.class.device_create(devt, misc, &name) {
            Ok(node) => node,
            Err(errno) => {
                registry.minors_mut().restore(minor, was_set);
                misc.set_minor(requested);
                log::warn!("misc: creating node {} for {} failed: {}", devt, name, errno);
                return Err(MiscError::Materialization(errno));
            }
        };
        misc.set_this_device(Some(node));

        if let Err(err) = registry.insert(Arc::clone(misc)) {
            self.unpublish(misc);
            registry.minors_mut().restore(minor, was_set);
            misc.set_minor(requested);
            return Err(err);
        }

        log::info!("misc: registered {} on minor {}", name, minor);
        Ok(minor)
    }

    /// Deregister a misc device
    ///
    /// Unlinks it, destroys its node and frees its dynamic minor (minor 0
    /// stays allocated). The device keeps its assigned minor.
    ///
    /// # Errors
    /// `NotLinked` if the device is not registered here
    pub fn deregister(&self, misc: &Arc<MiscDevice>) -> Result<()> {
        if !misc.is_registered() {
            return Err(MiscError::NotLinked);
        }

        let mut registry = self.inner.registry.lock();
        registry.remove(misc)?;
        self.unpublish(misc);

        let minor = misc.minor();
        registry.minors_mut().free(minor);

        log::info!("misc: deregistered {} from minor {}", display_name(misc), minor);
        Ok(())
    }

    fn unpublish(&self, misc: &MiscDevice) {
        if let Some(node) = misc.set_this_device(None) {
            self.inner.class.device_destroy(node.devt());
        }
    }

    /// Device registered on `minor`
    pub fn find(&self, minor: u32) -> Option<Arc<MiscDevice>> {
        self.inner.registry.lock().find(minor).cloned()
    }

    /// Number of registered devices
    pub fn len(&self) -> usize {
        self.inner.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the dynamic minor map
    pub fn minor_map(&self) -> MinorBitmap {
        self.inner.registry.lock().minors().clone()
    }
}

/// Node-naming hook: the descriptor's override, if it has one
pub fn misc_nodename(node: &DeviceNode) -> Option<String> {
    node.drvdata()?.node_name_override()
}

fn display_name(misc: &MiscDevice) -> &str {
    misc.name().unwrap_or("<unnamed>")
}
