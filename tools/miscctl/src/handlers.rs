//! Sample drivers backing manifest entries

use kaal_miscdev::{Errno, File, FileOperations, Fops, Inode, Module};
use std::sync::Arc;

use crate::manifest::{DeviceKind, DeviceSpec};

/// Build the operation table for `spec`
pub fn build(spec: &DeviceSpec, owner: Option<Arc<Module>>) -> Fops {
    match spec.kind {
        DeviceKind::Null => Arc::new(Null { owner }),
        DeviceKind::Zero => Arc::new(Zero { owner }),
        DeviceKind::Echo => Arc::new(Echo { owner }),
        DeviceKind::Reject => Arc::new(Reject {
            owner,
            errno: spec.errno.map(Errno::new).unwrap_or(Errno::EPERM),
        }),
    }
}

pub struct Null {
    owner: Option<Arc<Module>>,
}

impl FileOperations for Null {
    fn owner(&self) -> Option<&Arc<Module>> {
        self.owner.as_ref()
    }

    fn read(&self, _file: &mut File, _buf: &mut [u8]) -> Result<usize, Errno> {
        Ok(0)
    }

    fn write(&self, _file: &mut File, buf: &[u8]) -> Result<usize, Errno> {
        Ok(buf.len())
    }
}

pub struct Zero {
    owner: Option<Arc<Module>>,
}

impl FileOperations for Zero {
    fn owner(&self) -> Option<&Arc<Module>> {
        self.owner.as_ref()
    }

    fn read(&self, _file: &mut File, buf: &mut [u8]) -> Result<usize, Errno> {
        buf.fill(0);
        Ok(buf.len())
    }

    fn write(&self, _file: &mut File, buf: &[u8]) -> Result<usize, Errno> {
        Ok(buf.len())
    }
}

/// Per-open loopback buffer
pub struct Echo {
    owner: Option<Arc<Module>>,
}

impl FileOperations for Echo {
    fn owner(&self) -> Option<&Arc<Module>> {
        self.owner.as_ref()
    }

    fn open(&self, _inode: &Inode, file: &mut File) -> Result<(), Errno> {
        file.set_private_data(Vec::<u8>::new());
        Ok(())
    }

    fn read(&self, file: &mut File, buf: &mut [u8]) -> Result<usize, Errno> {
        let pending = file.private_data_mut::<Vec<u8>>().ok_or(Errno::EIO)?;
        let count = buf.len().min(pending.len());
        buf[..count].copy_from_slice(&pending[..count]);
        *pending = pending.split_off(count);
        Ok(count)
    }

    fn write(&self, file: &mut File, buf: &[u8]) -> Result<usize, Errno> {
        let pending = file.private_data_mut::<Vec<u8>>().ok_or(Errno::EIO)?;
        pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn release(&self, _inode: &Inode, file: &mut File) -> Result<(), Errno> {
        file.take_private_data();
        Ok(())
    }
}

pub struct Reject {
    owner: Option<Arc<Module>>,
    errno: Errno,
}

impl FileOperations for Reject {
    fn owner(&self) -> Option<&Arc<Module>> {
        self.owner.as_ref()
    }

    fn open(&self, _inode: &Inode, _file: &mut File) -> Result<(), Errno> {
        Err(self.errno)
    }
}
