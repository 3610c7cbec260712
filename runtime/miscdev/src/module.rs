//! Module ownership
//!
//! An operation table may belong to a loadable module. While a file (or an
//! open in flight) uses the table, the module is pinned through a
//! [`ModuleRef`]; once unloading has begun no new references can be taken,
//! which makes lookups treat the module's devices as absent.

use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::Errno;

/// High bit of the state word: unload has started
const GOING: usize = 1 << (usize::BITS - 1);

/// Loadable unit that owns one or more operation tables
#[derive(Debug)]
pub struct Module {
    name: String,

    /// Reference count in the low bits, [`GOING`] in the high bit
    state: AtomicUsize,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: AtomicUsize::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Outstanding references
    pub fn refcount(&self) -> usize {
        self.state.load(Ordering::Acquire) & !GOING
    }

    /// False once unload has started
    pub fn is_live(&self) -> bool {
        self.state.load(Ordering::Acquire) & GOING == 0
    }

    /// Take a reference unless the module is going away
    pub fn try_get(self: &Arc<Self>) -> Option<ModuleRef> {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                if state & GOING != 0 {
                    None
                } else {
                    Some(state + 1)
                }
            })
            .ok()?;

        Some(ModuleRef {
            module: Arc::clone(self),
        })
    }

    /// Start unloading
    ///
    /// # Errors
    /// Returns `EBUSY` while any reference is outstanding
    pub fn begin_unload(&self) -> Result<(), Errno> {
        match self
            .state
            .compare_exchange(0, GOING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                log::debug!("module {}: unloading", self.name);
                Ok(())
            }
            Err(state) if state == GOING => Ok(()),
            Err(_) => Err(Errno::EBUSY),
        }
    }
}

/// Pinned reference to a [`Module`], released on drop
#[derive(Debug)]
pub struct ModuleRef {
    module: Arc<Module>,
}

impl ModuleRef {
    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }
}

impl Drop for ModuleRef {
    fn drop(&mut self) {
        self.module.state.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refcount_tracking() {
        let module = Module::new("rtc");
        assert_eq!(module.refcount(), 0);

        let first = module.try_get().unwrap();
        let second = module.try_get().unwrap();
        assert_eq!(module.refcount(), 2);
        assert_eq!(first.module().name(), "rtc");

        drop(first);
        drop(second);
        assert_eq!(module.refcount(), 0);
    }

    #[test]
    fn test_unload_blocked_while_pinned() {
        let module = Module::new("watchdog");
        let pin = module.try_get().unwrap();

        assert_eq!(module.begin_unload(), Err(Errno::EBUSY));
        assert!(module.is_live());

        drop(pin);
        assert_eq!(module.begin_unload(), Ok(()));
        assert!(!module.is_live());

        // Idempotent
        assert_eq!(module.begin_unload(), Ok(()));
    }

    #[test]
    fn test_no_references_after_unload() {
        let module = Module::new("nvram");
        module.begin_unload().unwrap();

        assert!(module.try_get().is_none());
        assert_eq!(module.refcount(), 0);
    }
}
