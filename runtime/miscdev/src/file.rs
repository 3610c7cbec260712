//! Open file handles
//!
//! A [`File`] carries the operation table it currently dispatches through.
//! Files opened on the misc major start out on the generic table; the
//! dispatch gateway swaps the driver's table in during `open`, after which
//! the file behaves exactly as if the driver had been opened directly.

use std::any::Any;
use std::io::SeekFrom;
use std::sync::Arc;

use bitflags::bitflags;

use crate::chrdev::DevT;
use crate::fops::{Fops, FopsRef};
use crate::Errno;

bitflags! {
    /// Access mode requested at open time
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FileMode: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const NONBLOCK = 1 << 2;
    }
}

/// Device inode being opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inode {
    rdev: DevT,
}

impl Inode {
    pub const fn new(rdev: DevT) -> Self {
        Self { rdev }
    }

    pub const fn rdev(&self) -> DevT {
        self.rdev
    }

    pub const fn imajor(&self) -> u32 {
        self.rdev.major()
    }

    pub const fn iminor(&self) -> u32 {
        self.rdev.minor()
    }
}

/// Open file
pub struct File {
    inode: Inode,
    mode: FileMode,
    pos: u64,

    /// Table every operation is forwarded to
    fops: FopsRef,

    /// Per-open driver state
    private_data: Option<Box<dyn Any + Send + Sync>>,

    /// Set once `open` succeeded; only opened files are released
    opened: bool,
    released: bool,
}

impl File {
    pub(crate) fn new(inode: Inode, mode: FileMode, fops: FopsRef) -> Self {
        Self {
            inode,
            mode,
            pos: 0,
            fops,
            private_data: None,
            opened: false,
            released: false,
        }
    }

    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    pub fn devt(&self) -> DevT {
        self.inode.rdev()
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn set_pos(&mut self, pos: u64) {
        self.pos = pos;
    }

    /// Table the file currently dispatches through
    pub fn f_op(&self) -> &Fops {
        self.fops.ops()
    }

    /// Swap the current table, handing back the previous reference
    pub(crate) fn replace_fops(&mut self, fops: FopsRef) -> FopsRef {
        core::mem::replace(&mut self.fops, fops)
    }

    pub(crate) fn mark_opened(&mut self) {
        self.opened = true;
    }

    pub fn private_data<T: Any>(&self) -> Option<&T> {
        self.private_data.as_deref()?.downcast_ref()
    }

    pub fn private_data_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.private_data.as_deref_mut()?.downcast_mut()
    }

    pub fn set_private_data<T: Any + Send + Sync>(&mut self, data: T) {
        self.private_data = Some(Box::new(data));
    }

    pub fn take_private_data(&mut self) -> Option<Box<dyn Any + Send + Sync>> {
        self.private_data.take()
    }

    pub fn has_private_data(&self) -> bool {
        self.private_data.is_some()
    }

    pub(crate) fn replace_private_data(
        &mut self,
        data: Option<Box<dyn Any + Send + Sync>>,
    ) -> Option<Box<dyn Any + Send + Sync>> {
        core::mem::replace(&mut self.private_data, data)
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Errno> {
        if !self.mode.contains(FileMode::READ) {
            return Err(Errno::EBADF);
        }
        let ops = Arc::clone(self.f_op());
        ops.read(self, buf)
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<usize, Errno> {
        if !self.mode.contains(FileMode::WRITE) {
            return Err(Errno::EBADF);
        }
        let ops = Arc::clone(self.f_op());
        ops.write(self, buf)
    }

    pub fn ioctl(&mut self, cmd: u32, arg: usize) -> Result<i64, Errno> {
        let ops = Arc::clone(self.f_op());
        ops.ioctl(self, cmd, arg)
    }

    pub fn llseek(&mut self, pos: SeekFrom) -> Result<u64, Errno> {
        let ops = Arc::clone(self.f_op());
        ops.llseek(self, pos)
    }

    /// Close the file, reporting the driver's release result
    pub fn close(mut self) -> Result<(), Errno> {
        self.release()
    }

    fn release(&mut self) -> Result<(), Errno> {
        if !self.opened || self.released {
            return Ok(());
        }
        self.released = true;

        let ops = Arc::clone(self.f_op());
        let inode = self.inode;
        ops.release(&inode, self)
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if let Err(errno) = self.release() {
            log::warn!("release of {} failed: {}", self.devt(), errno);
        }
    }
}

impl core::fmt::Debug for File {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("File")
            .field("devt", &self.devt())
            .field("mode", &self.mode)
            .field("pos", &self.pos)
            .field("fops", &self.fops)
            .field("opened", &self.opened)
            .finish()
    }
}
