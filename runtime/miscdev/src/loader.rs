//! On-demand driver loading
//!
//! When an open misses, the multiplexer asks a [`ModuleLoader`] once for the
//! alias `char-major-<major>-<minor>` and looks again. Loaders run without the
//! registry lock held and may register devices themselves.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::misc::Misc;
use crate::Errno;

/// Out-of-band loader for missing drivers
pub trait ModuleLoader: Send + Sync {
    /// Try once to bring in the driver behind `alias`
    ///
    /// The result is only logged; the caller re-checks the registry either way.
    fn request_module(&self, misc: &Misc, alias: &str) -> Result<(), Errno>;
}

/// Loader that never finds anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLoader;

impl ModuleLoader for NoLoader {
    fn request_module(&self, _misc: &Misc, _alias: &str) -> Result<(), Errno> {
        Err(Errno::ENOENT)
    }
}

/// Closure adapter
pub struct FnLoader<F>(pub F);

impl<F> ModuleLoader for FnLoader<F>
where
    F: Fn(&Misc, &str) -> Result<(), Errno> + Send + Sync,
{
    fn request_module(&self, misc: &Misc, alias: &str) -> Result<(), Errno> {
        (self.0)(misc, alias)
    }
}

/// Initialization routine of a loadable driver
pub type ModuleInit = Arc<dyn Fn(&Misc) -> Result<(), Errno> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadState {
    Pending,
    Loading,
    Loaded,
}

struct AliasEntry {
    init: ModuleInit,
    state: LoadState,

    /// Outcome of the most recent failed init
    last_error: Option<Errno>,
}

/// Alias table with modprobe semantics
///
/// Each alias maps to an init routine that runs at most once successfully;
/// later requests for a loaded alias are no-ops. A request that arrives while
/// the alias is loading waits for that load and reports its outcome, so init
/// must not request its own alias.
#[derive(Default)]
pub struct ModuleTable {
    aliases: spin::Mutex<BTreeMap<String, AliasEntry>>,
}

impl ModuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `alias`, replacing any previous declaration
    pub fn alias<F>(&self, alias: impl Into<String>, init: F)
    where
        F: Fn(&Misc) -> Result<(), Errno> + Send + Sync + 'static,
    {
        self.aliases.lock().insert(
            alias.into(),
            AliasEntry {
                init: Arc::new(init),
                state: LoadState::Pending,
                last_error: None,
            },
        );
    }

    pub fn is_loaded(&self, alias: &str) -> bool {
        self.aliases
            .lock()
            .get(alias)
            .is_some_and(|entry| entry.state == LoadState::Loaded)
    }

    /// Declared aliases, sorted
    pub fn aliases(&self) -> Vec<String> {
        self.aliases.lock().keys().cloned().collect()
    }
}

impl ModuleLoader for ModuleTable {
    fn request_module(&self, misc: &Misc, alias: &str) -> Result<(), Errno> {
        let mut waited = false;

        let init = loop {
            {
                let mut aliases = self.aliases.lock();
                let entry = aliases.get_mut(alias).ok_or(Errno::ENOENT)?;
                match entry.state {
                    LoadState::Loaded => return Ok(()),
                    LoadState::Pending if waited => {
                        return Err(entry.last_error.unwrap_or(Errno::EAGAIN));
                    }
                    LoadState::Pending => {
                        entry.state = LoadState::Loading;
                        break Arc::clone(&entry.init);
                    }
                    LoadState::Loading => {}
                }
            }

            // Another caller is running init
            waited = true;
            std::thread::yield_now();
        };

        // Init may register devices, so it runs unlocked
        let result = init(misc);

        if let Some(entry) = self.aliases.lock().get_mut(alias) {
            match result {
                Ok(()) => entry.state = LoadState::Loaded,
                Err(errno) => {
                    entry.state = LoadState::Pending;
                    entry.last_error = Some(errno);
                }
            }
        }

        match result {
            Ok(()) => log::info!("modprobe {}: loaded", alias),
            Err(errno) => log::warn!("modprobe {}: init failed: {}", alias, errno),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::DevClass;
    use crate::config::MiscConfig;
    use crate::fops::FileOperations;
    use crate::registry::MiscDevice;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct Nop;

    impl FileOperations for Nop {}

    fn misc() -> Misc {
        Misc::new(
            MiscConfig::default(),
            Arc::new(DevClass::new("misc")),
            Arc::new(NoLoader),
        )
    }

    #[test]
    fn test_module_table_runs_init_once() {
        let misc = misc();
        let table = ModuleTable::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        table.alias("char-major-10-130", move |misc: &Misc| {
            counter.fetch_add(1, Ordering::SeqCst);
            misc.register(&MiscDevice::fixed("watchdog", 130, Arc::new(Nop)))
                .map(|_| ())
                .map_err(|err| err.errno())
        });

        assert!(!table.is_loaded("char-major-10-130"));
        assert_eq!(table.request_module(&misc, "char-major-10-130"), Ok(()));
        assert_eq!(table.request_module(&misc, "char-major-10-130"), Ok(()));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(table.is_loaded("char-major-10-130"));
        assert!(misc.find(130).is_some());
    }

    #[test]
    fn test_module_table_unknown_alias() {
        let misc = misc();
        let table = ModuleTable::new();
        assert_eq!(
            table.request_module(&misc, "char-major-10-1"),
            Err(Errno::ENOENT)
        );
        assert!(table.aliases().is_empty());
    }

    #[test]
    fn test_failed_init_can_be_retried() {
        let misc = misc();
        let table = ModuleTable::new();
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&attempts);
        table.alias("flaky", move |_: &Misc| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Errno::EAGAIN)
            } else {
                Ok(())
            }
        });

        assert_eq!(table.request_module(&misc, "flaky"), Err(Errno::EAGAIN));
        assert!(!table.is_loaded("flaky"));
        assert_eq!(table.request_module(&misc, "flaky"), Ok(()));
        assert!(table.is_loaded("flaky"));
    }

    fn set_state(table: &ModuleTable, alias: &str, state: LoadState, error: Option<Errno>) {
        let mut aliases = table.aliases.lock();
        let entry = aliases.get_mut(alias).unwrap();
        entry.state = state;
        entry.last_error = error;
    }

    #[test]
    fn test_request_waits_for_load_in_flight() {
        let misc = misc();
        let table = ModuleTable::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        table.alias("slow", move |_: &Misc| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        // 1. Another caller is mid-init
        set_state(&table, "slow", LoadState::Loading, None);

        let done = AtomicBool::new(false);
        crossbeam::scope(|s| {
            let waiter = s.spawn(|_| {
                let result = table.request_module(&misc, "slow");
                done.store(true, Ordering::SeqCst);
                result
            });

            // 2. The request does not return while the load is in flight
            std::thread::sleep(Duration::from_millis(50));
            assert!(!done.load(Ordering::SeqCst));

            // 3. It reports the finished load without running init again
            set_state(&table, "slow", LoadState::Loaded, None);
            assert_eq!(waiter.join().unwrap(), Ok(()));
        })
        .unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_waiter_shares_failed_outcome() {
        let misc = misc();
        let table = ModuleTable::new();
        table.alias("broken", |_: &Misc| Ok(()));
        set_state(&table, "broken", LoadState::Loading, None);

        crossbeam::scope(|s| {
            let waiter = s.spawn(|_| table.request_module(&misc, "broken"));

            std::thread::sleep(Duration::from_millis(50));
            set_state(&table, "broken", LoadState::Pending, Some(Errno::EIO));
            assert_eq!(waiter.join().unwrap(), Err(Errno::EIO));
        })
        .unwrap();

        // Nothing loaded, so the next request tries again
        assert!(!table.is_loaded("broken"));
        assert_eq!(table.request_module(&misc, "broken"), Ok(()));
    }

    #[test]
    fn test_fn_loader() {
        let misc = misc();
        let seen = spin::Mutex::new(Vec::new());
        let loader = FnLoader(|_: &Misc, alias: &str| -> Result<(), Errno> {
            seen.lock().push(alias.to_string());
            Err(Errno::ENOENT)
        });

        assert_eq!(loader.request_module(&misc, "char-major-10-9"), Err(Errno::ENOENT));
        assert_eq!(*seen.lock(), vec!["char-major-10-9".to_string()]);
        assert_eq!(NoLoader.request_module(&misc, "x"), Err(Errno::ENOENT));
    }
}
