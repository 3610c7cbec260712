//! Char-device layer
//!
//! Maps a whole char major to one operation table, the way the VFS routes an
//! open of a device inode. The misc multiplexer binds its generic table to
//! the misc major here; every open on that major then enters the dispatch
//! gateway.

use core::fmt;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::file::{File, FileMode, Inode};
use crate::fops::{fops_get, Fops};
use crate::Errno;

/// Device number: (major, minor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DevT {
    major: u32,
    minor: u32,
}

impl DevT {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub const fn major(&self) -> u32 {
        self.major
    }

    pub const fn minor(&self) -> u32 {
        self.minor
    }
}

impl fmt::Display for DevT {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

/// Registered char major
struct CharDevEntry {
    name: String,
    fops: Fops,
}

/// Table of char majors
#[derive(Default)]
pub struct CharDevices {
    majors: spin::Mutex<BTreeMap<u32, CharDevEntry>>,
}

impl CharDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `fops` to every minor of `major`
    ///
    /// # Errors
    /// - `EINVAL` for major 0 (no dynamic majors here)
    /// - `EBUSY` if the major is already bound
    pub fn register_chrdev(&self, major: u32, name: &str, fops: Fops) -> Result<(), Errno> {
        if major == 0 {
            return Err(Errno::EINVAL);
        }

        let mut majors = self.majors.lock();
        if majors.contains_key(&major) {
            return Err(Errno::EBUSY);
        }
        majors.insert(
            major,
            CharDevEntry {
                name: name.to_string(),
                fops,
            },
        );

        log::debug!("chrdev: major {} bound to {}", major, name);
        Ok(())
    }

    /// Unbind a major
    ///
    /// # Returns
    /// `true` if the major was bound
    pub fn unregister_chrdev(&self, major: u32) -> bool {
        self.majors.lock().remove(&major).is_some()
    }

    /// Name a major was registered under
    pub fn name(&self, major: u32) -> Option<String> {
        self.majors.lock().get(&major).map(|entry| entry.name.clone())
    }

    /// Open a device node
    ///
    /// Pins the table bound to the major, builds a file on it and runs the
    /// table's `open`. Whatever table the file carries afterwards is the one
    /// the caller talks to.
    ///
    /// # Errors
    /// - `ENXIO` if nothing is bound to the major (or its owner is unloading)
    /// - whatever the bound table's `open` reports
    pub fn open(&self, devt: DevT, mode: FileMode) -> Result<File, Errno> {
        let fops = {
            let majors = self.majors.lock();
            let entry = majors.get(&devt.major()).ok_or(Errno::ENXIO)?;
            fops_get(&entry.fops).ok_or(Errno::ENXIO)?
        };

        let inode = Inode::new(devt);
        let mut file = File::new(inode, mode, fops);
        let ops = Arc::clone(file.f_op());
        ops.open(&inode, &mut file)?;
        file.mark_opened();

        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fops::FileOperations;

    struct Tagged(u8);

    impl FileOperations for Tagged {
        fn read(&self, _file: &mut File, buf: &mut [u8]) -> Result<usize, Errno> {
            buf.fill(self.0);
            Ok(buf.len())
        }
    }

    struct Refusing;

    impl FileOperations for Refusing {
        fn open(&self, _inode: &Inode, _file: &mut File) -> Result<(), Errno> {
            Err(Errno::EPERM)
        }
    }

    #[test]
    fn test_devt_display_and_order() {
        let devt = DevT::new(10, 130);
        assert_eq!(devt.to_string(), "10:130");
        assert!(DevT::new(10, 7) < devt);
        assert!(devt < DevT::new(11, 0));
    }

    #[test]
    fn test_register_and_open() {
        let chrdevs = CharDevices::new();
        chrdevs
            .register_chrdev(42, "tagged", Arc::new(Tagged(7)))
            .unwrap();
        assert_eq!(chrdevs.name(42).as_deref(), Some("tagged"));

        let mut file = chrdevs.open(DevT::new(42, 3), FileMode::READ).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(file.read(&mut buf), Ok(2));
        assert_eq!(buf, [7, 7]);
        assert_eq!(file.inode().iminor(), 3);
    }

    #[test]
    fn test_major_conflicts() {
        let chrdevs = CharDevices::new();
        chrdevs.register_chrdev(42, "first", Arc::new(Tagged(1))).unwrap();

        assert_eq!(
            chrdevs.register_chrdev(42, "second", Arc::new(Tagged(2))),
            Err(Errno::EBUSY)
        );
        assert_eq!(
            chrdevs.register_chrdev(0, "dynamic", Arc::new(Tagged(3))),
            Err(Errno::EINVAL)
        );

        assert!(chrdevs.unregister_chrdev(42));
        assert!(!chrdevs.unregister_chrdev(42));
    }

    #[test]
    fn test_open_errors() {
        let chrdevs = CharDevices::new();
        assert_eq!(
            chrdevs.open(DevT::new(9, 0), FileMode::READ).unwrap_err(),
            Errno::ENXIO
        );

        chrdevs.register_chrdev(9, "refusing", Arc::new(Refusing)).unwrap();
        assert_eq!(
            chrdevs.open(DevT::new(9, 0), FileMode::READ).unwrap_err(),
            Errno::EPERM
        );
    }
}
