use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::{error, info, warn};

use crate::error::{MirageError, Result};

// --- LIFECYCLE ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    Uninstalled,
    Installing,
    Installed,
    Removing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStatus {
    NotInstalled,
    Installed,
    Partial { failed: usize },
}

/// One entry point to interpose. The slot receives the original entry
/// address once the interposition is live; the replacement routines
/// read it to forward calls to the real implementation.
pub struct HookTarget {
    pub module: &'static str,
    pub symbol: &'static str,
    pub replacement: usize,
    pub original_slot: &'static AtomicUsize,
}

/// Bookkeeping for one applied interposition. Removal must put back
/// exactly `original`, or the host process is left broken.
#[derive(Debug)]
pub struct HookRecord {
    pub module: &'static str,
    pub symbol: &'static str,
    pub original: usize,
    pub installed: bool,
    pub original_slot: &'static AtomicUsize,
}

/// The actual splicing mechanism, behind a seam so the portable build
/// and the tests can substitute a call-recording implementation.
pub trait Patcher: Send + Sync {
    /// Resolve and interpose one entry point; returns the original
    /// entry address on success.
    fn apply(&self, target: &HookTarget) -> Result<usize>;

    /// Restore the recorded original entry, byte for byte.
    fn revert(&self, record: &HookRecord) -> Result<()>;
}

struct Inner {
    state: HookState,
    records: Vec<HookRecord>,
    failed: usize,
}

/// Owns every interposition as one mutex-serialized transaction.
/// Install tolerates individual failures (partial success is reported,
/// not rolled back); concurrent install/remove requests are rejected
/// rather than interleaved.
pub struct HookManager {
    inner: Mutex<Inner>,
}

impl HookManager {
    pub fn new() -> Self {
        HookManager {
            inner: Mutex::new(Inner {
                state: HookState::Uninstalled,
                records: Vec::new(),
                failed: 0,
            }),
        }
    }

    pub fn install(&self, patcher: &dyn Patcher, targets: &[HookTarget]) -> Result<InstallStatus> {
        let mut inner = self.inner.lock().expect("hook lock poisoned");
        if inner.state != HookState::Uninstalled {
            return Err(MirageError::Lifecycle("install while not uninstalled"));
        }
        inner.state = HookState::Installing;

        let mut failed = 0usize;
        for target in targets {
            match patcher.apply(target) {
                Ok(original) => {
                    target.original_slot.store(original, Ordering::SeqCst);
                    inner.records.push(HookRecord {
                        module: target.module,
                        symbol: target.symbol,
                        original,
                        installed: true,
                        original_slot: target.original_slot,
                    });
                    info!(module = target.module, symbol = target.symbol, "interposed");
                }
                Err(err) => {
                    failed += 1;
                    warn!(
                        module = target.module,
                        symbol = target.symbol,
                        %err,
                        "interposition skipped"
                    );
                }
            }
        }

        inner.failed = failed;
        inner.state = HookState::Installed;
        let status = if failed == 0 {
            InstallStatus::Installed
        } else {
            InstallStatus::Partial { failed }
        };
        info!(?status, hooks = inner.records.len(), "install transaction finished");
        Ok(status)
    }

    pub fn remove(&self, patcher: &dyn Patcher) -> Result<()> {
        let mut inner = self.inner.lock().expect("hook lock poisoned");
        if inner.state != HookState::Installed {
            return Err(MirageError::Lifecycle("remove while not installed"));
        }
        inner.state = HookState::Removing;

        // Reverse order: last applied, first restored.
        for record in inner.records.drain(..).rev() {
            match patcher.revert(&record) {
                Ok(()) => {
                    record.original_slot.store(0, Ordering::SeqCst);
                    info!(module = record.module, symbol = record.symbol, "restored");
                }
                Err(err) => {
                    // Nothing sensible left to do with this entry; the
                    // forwarding slot stays live so calls keep working.
                    error!(
                        module = record.module,
                        symbol = record.symbol,
                        %err,
                        "restore failed"
                    );
                }
            }
        }

        inner.failed = 0;
        inner.state = HookState::Uninstalled;
        info!("remove transaction finished");
        Ok(())
    }

    pub fn status(&self) -> InstallStatus {
        let inner = self.inner.lock().expect("hook lock poisoned");
        match inner.state {
            HookState::Installed if inner.failed == 0 => InstallStatus::Installed,
            HookState::Installed => InstallStatus::Partial {
                failed: inner.failed,
            },
            _ => InstallStatus::NotInstalled,
        }
    }

    pub fn is_installed(&self) -> bool {
        matches!(
            self.status(),
            InstallStatus::Installed | InstallStatus::Partial { .. }
        )
    }
}

impl Default for HookManager {
    fn default() -> Self {
        Self::new()
    }
}

// --- RECORDING BACKEND ---

/// Patcher that records every apply/revert instead of touching code.
/// Serves as the backend on non-Windows builds and as the harness the
/// lifecycle tests drive.
pub struct RecordingPatcher {
    fail_symbols: Vec<&'static str>,
    next_entry: AtomicUsize,
    pub live: Mutex<Vec<(&'static str, usize)>>,
}

impl RecordingPatcher {
    pub fn new() -> Self {
        Self::failing_on(&[])
    }

    pub fn failing_on(symbols: &[&'static str]) -> Self {
        RecordingPatcher {
            fail_symbols: symbols.to_vec(),
            next_entry: AtomicUsize::new(0x1000),
            live: Mutex::new(Vec::new()),
        }
    }

    /// Entry points currently diverted, by symbol.
    pub fn diverted(&self) -> Vec<&'static str> {
        self.live
            .lock()
            .expect("recording lock poisoned")
            .iter()
            .map(|(s, _)| *s)
            .collect()
    }
}

impl Default for RecordingPatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Patcher for RecordingPatcher {
    fn apply(&self, target: &HookTarget) -> Result<usize> {
        if self.fail_symbols.contains(&target.symbol) {
            return Err(MirageError::Resolution {
                module: target.module.to_string(),
                symbol: target.symbol.to_string(),
            });
        }
        let original = self.next_entry.fetch_add(0x10, Ordering::SeqCst);
        self.live
            .lock()
            .expect("recording lock poisoned")
            .push((target.symbol, original));
        Ok(original)
    }

    fn revert(&self, record: &HookRecord) -> Result<()> {
        let mut live = self.live.lock().expect("recording lock poisoned");
        match live.iter().position(|(s, o)| *s == record.symbol && *o == record.original) {
            Some(pos) => {
                live.remove(pos);
                Ok(())
            }
            None => Err(MirageError::Lifecycle("revert of an entry never applied")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test owns its slot block; tests run on parallel threads.
    fn targets(slots: &'static [AtomicUsize; 3]) -> Vec<HookTarget> {
        vec![
            HookTarget {
                module: "ole32.dll",
                symbol: "CoCreateInstance",
                replacement: 0xAA00,
                original_slot: &slots[0],
            },
            HookTarget {
                module: "advapi32.dll",
                symbol: "RegQueryValueExW",
                replacement: 0xBB00,
                original_slot: &slots[1],
            },
            HookTarget {
                module: "advapi32.dll",
                symbol: "RegEnumValueW",
                replacement: 0xCC00,
                original_slot: &slots[2],
            },
        ]
    }

    const EMPTY_SLOTS: [AtomicUsize; 3] =
        [AtomicUsize::new(0), AtomicUsize::new(0), AtomicUsize::new(0)];

    #[test]
    fn install_fills_slots_and_reports_full_success() {
        static SLOTS: [AtomicUsize; 3] = EMPTY_SLOTS;
        let manager = HookManager::new();
        let patcher = RecordingPatcher::new();
        let status = manager.install(&patcher, &targets(&SLOTS)).unwrap();
        assert_eq!(status, InstallStatus::Installed);
        assert!(manager.is_installed());
        assert_ne!(SLOTS[0].load(Ordering::SeqCst), 0);
        assert_ne!(SLOTS[1].load(Ordering::SeqCst), 0);
        assert_eq!(patcher.diverted().len(), 3);

        manager.remove(&patcher).unwrap();
    }

    #[test]
    fn failed_resolution_degrades_to_partial_install() {
        static SLOTS: [AtomicUsize; 3] = EMPTY_SLOTS;
        let manager = HookManager::new();
        let patcher = RecordingPatcher::failing_on(&["RegQueryValueExW"]);
        let status = manager.install(&patcher, &targets(&SLOTS)).unwrap();
        assert_eq!(status, InstallStatus::Partial { failed: 1 });
        assert_eq!(manager.status(), InstallStatus::Partial { failed: 1 });
        // The survivors stay applied.
        assert_eq!(patcher.diverted(), vec!["CoCreateInstance", "RegEnumValueW"]);
        assert_eq!(SLOTS[1].load(Ordering::SeqCst), 0);

        manager.remove(&patcher).unwrap();
    }

    #[test]
    fn remove_restores_everything_and_clears_slots() {
        static SLOTS: [AtomicUsize; 3] = EMPTY_SLOTS;
        let manager = HookManager::new();
        let patcher = RecordingPatcher::new();
        manager.install(&patcher, &targets(&SLOTS)).unwrap();

        manager.remove(&patcher).unwrap();
        assert_eq!(manager.status(), InstallStatus::NotInstalled);
        assert!(patcher.diverted().is_empty());
        for slot in &SLOTS {
            assert_eq!(slot.load(Ordering::SeqCst), 0);
        }

        // A fresh install works after a clean removal.
        assert_eq!(
            manager.install(&patcher, &targets(&SLOTS)).unwrap(),
            InstallStatus::Installed
        );
        manager.remove(&patcher).unwrap();
    }

    #[test]
    fn reentrant_transitions_are_rejected() {
        static SLOTS: [AtomicUsize; 3] = EMPTY_SLOTS;
        let manager = HookManager::new();
        let patcher = RecordingPatcher::new();

        assert!(matches!(
            manager.remove(&patcher),
            Err(MirageError::Lifecycle(_))
        ));

        manager.install(&patcher, &targets(&SLOTS)).unwrap();
        assert!(matches!(
            manager.install(&patcher, &targets(&SLOTS)),
            Err(MirageError::Lifecycle(_))
        ));
        manager.remove(&patcher).unwrap();
    }
}
