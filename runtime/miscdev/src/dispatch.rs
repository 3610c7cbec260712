//! Open dispatch gateway
//!
//! Every open on the misc major lands in [`MiscFops::open`]. The gateway
//! resolves the minor to a registered device, loading the driver on demand if
//! needed, and swaps the device's table onto the file:
//!
//! ```text
//! RESOLVING --miss--> LOADING --> RESOLVING (once more) --miss--> ENODEV
//!     |                                 |
//!     +-------------hit-----------------+--> RESOLVED --> driver open
//!                                                 ok: ATTACHED
//!                                                 err: ROLLED_BACK (handle as it was before dispatch)
//! ```
//!
//! The registry lock is held only while resolving. Loading and the driver's
//! own `open` run unlocked; the counted [`FopsRef`] taken while resolving keeps
//! the driver's table (and its module) alive even if the device is
//! deregistered before the open finishes.

use std::sync::{Arc, Weak};

use crate::file::{File, FileMode, Inode};
use crate::fops::{fops_get, FileOperations, FopsRef};
use crate::misc::{Misc, MiscInner};
use crate::{Errno, MiscError, Result};

/// Generic operation table bound to the whole misc major
pub struct MiscFops {
    misc: Weak<MiscInner>,
}

impl MiscFops {
    pub(crate) fn new(misc: Weak<MiscInner>) -> Self {
        Self { misc }
    }
}

impl FileOperations for MiscFops {
    fn open(&self, inode: &Inode, file: &mut File) -> core::result::Result<(), Errno> {
        let inner = self.misc.upgrade().ok_or(Errno::ENODEV)?;
        let misc = Misc { inner };
        misc.dispatch(inode, file).map_err(|err| err.errno())
    }
}

impl Misc {
    /// Open `minor` the way the VFS would
    ///
    /// # Errors
    /// - `NoDevice` if no driver holds the minor, even after loading
    /// - `HandlerOpen` with the driver's errno if its `open` refused
    pub fn open(&self, minor: u32, mode: FileMode) -> Result<File> {
        let mut file = self.generic_file(minor, mode);
        let inode = *file.inode();
        self.dispatch(&inode, &mut file)?;
        file.mark_opened();
        Ok(file)
    }

    /// File on `minor` that still carries the generic table
    ///
    /// Dispatch it with [`Misc::open_file`].
    pub fn generic_file(&self, minor: u32, mode: FileMode) -> File {
        let generic = FopsRef::unowned(self.fops());
        File::new(Inode::new(self.config().devt(minor)), mode, generic)
    }

    /// Dispatch an existing file to the driver behind its minor
    ///
    /// On failure the file is left on the table it had before.
    pub fn open_file(&self, file: &mut File) -> Result<()> {
        let inode = *file.inode();
        self.dispatch(&inode, file)?;
        file.mark_opened();
        Ok(())
    }

    fn dispatch(&self, inode: &Inode, file: &mut File) -> Result<()> {
        let minor = inode.iminor();

        let new_fops = match self.resolve(minor) {
            Some(fops) => fops,
            None => {
                let alias = self.config().module_alias(minor);
                log::debug!("misc: minor {} not registered, requesting {}", minor, alias);
                if let Err(errno) = self.inner.loader.request_module(self, &alias) {
                    log::debug!("misc: request_module({}) failed: {}", alias, errno);
                }

                self.resolve(minor).ok_or_else(|| {
                    log::warn!("misc: no driver for minor {}", minor);
                    MiscError::NoDevice { minor }
                })?
            }
        };

        // Driver open sees no private data; position and private data come back on refusal
        let pos = file.pos();
        let private_data = file.replace_private_data(None);

        let old_fops = file.replace_fops(new_fops);
        let ops = Arc::clone(file.f_op());
        if let Err(errno) = ops.open(inode, file) {
            // Driver reference is released here, generic table goes back
            drop(file.replace_fops(old_fops));
            file.set_pos(pos);
            file.replace_private_data(private_data);
            log::warn!("misc: open of minor {} failed: {}", minor, errno);
            return Err(MiscError::HandlerOpen(errno));
        }

        if !file.has_private_data() {
            file.replace_private_data(private_data);
        }

        log::debug!("misc: minor {} attached", minor);
        Ok(())
    }

    /// Look up `minor` and pin its table
    ///
    /// A device whose module is unloading counts as absent.
    fn resolve(&self, minor: u32) -> Option<FopsRef> {
        let registry = self.inner.registry.lock();
        let device = registry.find(minor)?;
        fops_get(device.fops())
    }
}
