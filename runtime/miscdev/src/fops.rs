//! Operation tables
//!
//! A driver exposes its behaviour as a [`FileOperations`] table. The
//! multiplexer only ever calls `open`; everything else is forwarded by the
//! [`File`] once the table has been attached to it.

use std::io::SeekFrom;
use std::sync::Arc;

use crate::file::{File, Inode};
use crate::module::{Module, ModuleRef};
use crate::Errno;

/// Driver operation table
///
/// Every operation has a default. A table without its own `open` behaves as
/// if `open` always succeeded; missing `read`/`write`/`llseek` fail with
/// `EINVAL` and a missing `ioctl` fails with `ENOTTY`.
pub trait FileOperations: Send + Sync {
    /// Module that must stay pinned while the table is in use
    fn owner(&self) -> Option<&Arc<Module>> {
        None
    }

    fn open(&self, _inode: &Inode, _file: &mut File) -> Result<(), Errno> {
        Ok(())
    }

    fn read(&self, _file: &mut File, _buf: &mut [u8]) -> Result<usize, Errno> {
        Err(Errno::EINVAL)
    }

    fn write(&self, _file: &mut File, _buf: &[u8]) -> Result<usize, Errno> {
        Err(Errno::EINVAL)
    }

    fn ioctl(&self, _file: &mut File, _cmd: u32, _arg: usize) -> Result<i64, Errno> {
        Err(Errno::ENOTTY)
    }

    fn llseek(&self, _file: &mut File, _pos: SeekFrom) -> Result<u64, Errno> {
        Err(Errno::EINVAL)
    }

    /// Called once when the last user closes the file
    fn release(&self, _inode: &Inode, _file: &mut File) -> Result<(), Errno> {
        Ok(())
    }
}

/// Shared handle to an operation table
pub type Fops = Arc<dyn FileOperations>;

/// Counted reference to an operation table
///
/// Holds the table itself alive and pins its owning module. Dropping the
/// reference is the `fops_put` counterpart of [`fops_get`].
pub struct FopsRef {
    ops: Fops,
    _owner: Option<ModuleRef>,
}

impl FopsRef {
    /// Reference to a table that has no owning module
    pub(crate) fn unowned(ops: Fops) -> Self {
        debug_assert!(ops.owner().is_none());
        Self { ops, _owner: None }
    }

    pub fn ops(&self) -> &Fops {
        &self.ops
    }

    /// Whether this reference points at `table`
    pub fn is(&self, table: &Fops) -> bool {
        Arc::ptr_eq(&self.ops, table)
    }
}

impl core::fmt::Debug for FopsRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FopsRef")
            .field("ops", &Arc::as_ptr(&self.ops).cast::<()>())
            .field("owner", &self.ops.owner().map(|m| m.name()))
            .finish()
    }
}

/// Take a counted reference on `ops`
///
/// # Returns
/// `None` if the owning module is being unloaded
pub fn fops_get(ops: &Fops) -> Option<FopsRef> {
    let owner = match ops.owner() {
        Some(module) => Some(module.try_get()?),
        None => None,
    };

    Some(FopsRef {
        ops: Arc::clone(ops),
        _owner: owner,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Owned {
        module: Arc<Module>,
    }

    impl FileOperations for Owned {
        fn owner(&self) -> Option<&Arc<Module>> {
            Some(&self.module)
        }
    }

    struct Bare;

    impl FileOperations for Bare {}

    #[test]
    fn test_fops_get_pins_owner() {
        let module = Module::new("owned");
        let ops: Fops = Arc::new(Owned {
            module: Arc::clone(&module),
        });

        let first = fops_get(&ops).unwrap();
        let second = fops_get(&ops).unwrap();
        assert_eq!(module.refcount(), 2);
        assert_eq!(Arc::strong_count(&ops), 3);
        assert!(first.is(&ops));

        drop(first);
        drop(second);
        assert_eq!(module.refcount(), 0);
        assert_eq!(Arc::strong_count(&ops), 1);
    }

    #[test]
    fn test_fops_get_fails_when_owner_going() {
        let module = Module::new("going");
        let ops: Fops = Arc::new(Owned {
            module: Arc::clone(&module),
        });

        module.begin_unload().unwrap();
        assert!(fops_get(&ops).is_none());
        assert_eq!(Arc::strong_count(&ops), 1);
    }

    #[test]
    fn test_unowned_table() {
        let ops: Fops = Arc::new(Bare);
        let pinned = fops_get(&ops).unwrap();
        assert!(pinned.is(&ops));
        assert!(pinned.ops().owner().is_none());
    }
}
