//! `/proc/misc` style listing
//!
//! One line per registered device: the minor right-aligned in three columns,
//! a space, then the device name (empty when unnamed). The listing holds the
//! registry lock for its whole lifetime, so a registration can never show up
//! half-way through a report.

use core::fmt::{self, Write};

use crate::misc::Misc;
use crate::registry::Registry;

/// One listing line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub minor: u32,
    pub name: Option<String>,
}

impl fmt::Display for ListEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:3} {}", self.minor, self.name.as_deref().unwrap_or(""))
    }
}

/// Locked walk over the registry, most recent registration first
///
/// Do not register or deregister while a listing is alive; the registry
/// lock is held until it is dropped.
pub struct Listing<'a> {
    registry: spin::MutexGuard<'a, Registry>,
    pos: usize,
}

impl Iterator for Listing<'_> {
    type Item = ListEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let device = self.registry.get(self.pos)?;
        self.pos += 1;
        Some(ListEntry {
            minor: device.minor(),
            name: device.name().map(str::to_string),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.registry.len().saturating_sub(self.pos);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Listing<'_> {}

impl Misc {
    /// Start a listing
    pub fn seq_start(&self) -> Listing<'_> {
        Listing {
            registry: self.inner.registry.lock(),
            pos: 0,
        }
    }

    /// Render the full report, one newline-terminated line per device
    pub fn proc_show(&self) -> String {
        let mut out = String::new();
        for entry in self.seq_start() {
            // Writing to a String cannot fail
            let _ = writeln!(out, "{}", entry);
        }
        out
    }

    /// Listing path, e.g. `/proc/misc`
    pub fn proc_path(&self) -> String {
        format!("/proc/{}", self.config().proc_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::DevClass;
    use crate::config::MiscConfig;
    use crate::fops::FileOperations;
    use crate::loader::NoLoader;
    use crate::registry::MiscDevice;
    use std::sync::Arc;

    struct Nop;

    impl FileOperations for Nop {}

    #[test]
    fn test_entry_format() {
        let named = ListEntry {
            minor: 5,
            name: Some("alpha".to_string()),
        };
        let unnamed = ListEntry {
            minor: 7,
            name: None,
        };
        let wide = ListEntry {
            minor: 1234,
            name: Some("wide".to_string()),
        };

        assert_eq!(named.to_string(), "  5 alpha");
        assert_eq!(unnamed.to_string(), "  7 ");
        assert_eq!(wide.to_string(), "1234 wide");
    }

    #[test]
    fn test_proc_show() {
        let misc = Misc::new(
            MiscConfig::default(),
            Arc::new(DevClass::new("misc")),
            Arc::new(NoLoader),
        );
        assert_eq!(misc.proc_show(), "");
        assert_eq!(misc.proc_path(), "/proc/misc");

        let alpha = MiscDevice::fixed("alpha", 5, Arc::new(Nop));
        let unnamed = MiscDevice::builder(Arc::new(Nop)).minor(7).build();
        misc.register(&alpha).unwrap();
        misc.register(&unnamed).unwrap();

        assert_eq!(misc.proc_show(), "  7 \n  5 alpha\n");

        let listing = misc.seq_start();
        assert_eq!(listing.len(), 2);
    }
}
