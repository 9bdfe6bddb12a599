use std::path::Path;
use std::sync::{OnceLock, RwLock};

use tracing::{info, warn};

use crate::config::ConfigStore;
use crate::error::Result;
use crate::factory::SyntheticObjectSet;
use crate::hooks::{HookManager, HookTarget, InstallStatus, Patcher};
use crate::identity::DeviceCategory;
use crate::masquerade::QueryRouter;
use crate::shadow::MappingTable;

/// The assembled core: configuration, registry mapping table, hook
/// lifecycle, and the patching backend they run on. One per process.
pub struct SpoofEngine {
    store: ConfigStore,
    mappings: RwLock<MappingTable>,
    hooks: HookManager,
    patcher: Box<dyn Patcher>,
}

static ENGINE: OnceLock<SpoofEngine> = OnceLock::new();

impl SpoofEngine {
    pub fn new<P: AsRef<Path>>(config_path: P, patcher: Box<dyn Patcher>) -> Self {
        let store = ConfigStore::load_from(config_path);
        let mappings = RwLock::new(MappingTable::build(&store.snapshot()));
        SpoofEngine {
            store,
            mappings,
            hooks: HookManager::new(),
            patcher,
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn mappings(&self) -> &RwLock<MappingTable> {
        &self.mappings
    }

    /// Synthetic result set for one category, from the current snapshot.
    pub fn synthesize(&self, category: DeviceCategory) -> SyntheticObjectSet {
        QueryRouter::answer(&self.store, category)
    }

    pub fn install(&self, targets: &[HookTarget]) -> Result<InstallStatus> {
        self.hooks.install(self.patcher.as_ref(), targets)
    }

    pub fn remove(&self) -> Result<()> {
        self.hooks.remove(self.patcher.as_ref())
    }

    pub fn status(&self) -> InstallStatus {
        self.hooks.status()
    }

    pub fn is_installed(&self) -> bool {
        self.hooks.is_installed()
    }

    /// Re-read the configuration and rebuild the registry mappings in
    /// place. Hooks stay installed throughout; queries issued while the
    /// rebuild runs see either the old table or the new one, whole.
    pub fn reload(&self) -> bool {
        let from_file = self.store.reload();
        let rebuilt = MappingTable::build(&self.store.snapshot());
        *self.mappings.write().expect("mapping lock poisoned") = rebuilt;
        info!(from_file, "configuration and mapping table reloaded");
        from_file
    }
}

/// Publish the process-wide engine. Exactly one attach per process
/// lifetime; a second call reports the violation and changes nothing.
pub fn init<P: AsRef<Path>>(config_path: P, patcher: Box<dyn Patcher>) -> &'static SpoofEngine {
    if ENGINE.set(SpoofEngine::new(config_path, patcher)).is_err() {
        warn!("engine already initialized, attach ignored");
    }
    ENGINE.get().expect("engine initialized above")
}

pub fn instance() -> Option<&'static SpoofEngine> {
    ENGINE.get()
}

/// Append-mode file logging beside the host process, initialized once
/// at attach. Failure to open the file just means a quiet run.
pub fn init_logging(path: &Path) {
    if let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
        let _ = tracing_subscriber::fmt()
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .try_init();
    }
}

/// The full set of entry points the Windows build interposes: the two
/// COM creation/security routines and the three registry reads.
#[cfg(windows)]
pub fn windows_targets() -> Vec<HookTarget> {
    use crate::{shadow, wbem};
    vec![
        HookTarget {
            module: "ole32.dll",
            symbol: "CoCreateInstance",
            replacement: wbem::hooked_co_create_instance as usize,
            original_slot: &wbem::ORIG_CO_CREATE_INSTANCE,
        },
        HookTarget {
            module: "ole32.dll",
            symbol: "CoSetProxyBlanket",
            replacement: wbem::hooked_co_set_proxy_blanket as usize,
            original_slot: &wbem::ORIG_CO_SET_PROXY_BLANKET,
        },
        HookTarget {
            module: "advapi32.dll",
            symbol: "RegQueryValueExW",
            replacement: shadow::win::hooked_reg_query_value_ex_w as usize,
            original_slot: &shadow::win::ORIG_REG_QUERY_W,
        },
        HookTarget {
            module: "advapi32.dll",
            symbol: "RegQueryValueExA",
            replacement: shadow::win::hooked_reg_query_value_ex_a as usize,
            original_slot: &shadow::win::ORIG_REG_QUERY_A,
        },
        HookTarget {
            module: "advapi32.dll",
            symbol: "RegEnumValueW",
            replacement: shadow::win::hooked_reg_enum_value_w as usize,
            original_slot: &shadow::win::ORIG_REG_ENUM_W,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::RecordingPatcher;
    use crate::identity::HardwareIdentity;
    use std::sync::atomic::AtomicUsize;

    fn temp_config(tag: &str, id: &HardwareIdentity) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("mirage_engine_{}_{}.json", tag, std::process::id()));
        std::fs::write(&path, serde_json::to_string(id).unwrap()).unwrap();
        path
    }

    fn test_targets(slots: &'static [AtomicUsize; 2]) -> Vec<HookTarget> {
        vec![
            HookTarget {
                module: "ole32.dll",
                symbol: "CoCreateInstance",
                replacement: 0x1111,
                original_slot: &slots[0],
            },
            HookTarget {
                module: "advapi32.dll",
                symbol: "RegQueryValueExW",
                replacement: 0x2222,
                original_slot: &slots[1],
            },
        ]
    }

    #[test]
    fn attach_reload_detach_cycle() {
        static SLOTS: [AtomicUsize; 2] = [AtomicUsize::new(0), AtomicUsize::new(0)];

        let mut id = HardwareIdentity::baseline();
        id.bios_vendor = "Insyde Corp.".into();
        let path = temp_config("cycle", &id);

        let engine = SpoofEngine::new(&path, Box::new(RecordingPatcher::new()));
        assert_eq!(engine.status(), InstallStatus::NotInstalled);
        assert!(!engine.is_installed());

        assert_eq!(
            engine.install(&test_targets(&SLOTS)).unwrap(),
            InstallStatus::Installed
        );
        assert!(engine.is_installed());

        // Mappings reflect the loaded identity.
        {
            let table = engine.mappings().read().unwrap();
            let entry = table.lookup(None, "BIOSVendor").unwrap();
            assert_eq!(entry.data, crate::shadow::RegData::Sz("Insyde Corp.".into()));
        }

        // Reload picks up an edited file without touching the hooks.
        id.bios_vendor = "Award Software International Inc.".into();
        std::fs::write(&path, serde_json::to_string(&id).unwrap()).unwrap();
        assert!(engine.reload());
        assert!(engine.is_installed());
        {
            let table = engine.mappings().read().unwrap();
            let entry = table.lookup(None, "BIOSVendor").unwrap();
            assert_eq!(
                entry.data,
                crate::shadow::RegData::Sz("Award Software International Inc.".into())
            );
        }

        engine.remove().unwrap();
        assert_eq!(engine.status(), InstallStatus::NotInstalled);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn synthesize_serves_the_loaded_identity() {
        let mut id = HardwareIdentity::baseline();
        id.cpu_name = "Synthetic 9000".into();
        let path = temp_config("synth", &id);
        let engine = SpoofEngine::new(&path, Box::new(RecordingPatcher::new()));

        let mut set = engine.synthesize(DeviceCategory::Processor);
        let cpu = set.next().unwrap();
        assert_eq!(cpu.get("Name").unwrap().as_str(), Some("Synthetic 9000"));
        let _ = std::fs::remove_file(&path);
    }
}
