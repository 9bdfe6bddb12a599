use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{MirageError, Result};
use crate::forge::Forge;
use crate::identity::HardwareIdentity;

/// Default configuration document, looked up next to the host process.
pub const CONFIG_FILE: &str = "mirage_config.json";

// The on-disk document is the identity itself plus one control key.
// `randomize: true` asks for a freshly forged identity instead of the
// literal field values; an operator can ship a two-line file and still
// get a complete plausible machine.
#[derive(Deserialize)]
struct ConfigDoc {
    #[serde(default)]
    randomize: bool,
    #[serde(flatten)]
    identity: HardwareIdentity,
}

/// Process-wide owner of the synthetic identity.
///
/// Readers clone the current `Arc` and work from that snapshot for the
/// whole query, so a reload mid-query can never tear a result set.
/// Reload swaps the `Arc` under the write lock.
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<Arc<HardwareIdentity>>,
}

impl ConfigStore {
    /// Load from `path`, falling back to the baseline machine when the
    /// file is missing, malformed, or unusable. Never fails: a broken
    /// configuration must not take the host process down with it.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let identity = match read_identity(&path) {
            Ok(id) => id,
            Err(_) => {
                warn!(path = %path.display(), "configuration absent, using baseline identity");
                HardwareIdentity::baseline()
            }
        };
        ConfigStore {
            path,
            current: RwLock::new(Arc::new(identity)),
        }
    }

    /// Consistent snapshot for the duration of one query.
    pub fn snapshot(&self) -> Arc<HardwareIdentity> {
        self.current.read().expect("identity lock poisoned").clone()
    }

    /// Re-read the file and swap the snapshot. Returns whether the file
    /// was actually used; on failure the baseline is installed instead,
    /// same contract as the initial load.
    pub fn reload(&self) -> bool {
        let (identity, from_file) = match read_identity(&self.path) {
            Ok(id) => (id, true),
            Err(_) => {
                warn!(path = %self.path.display(), "reload fell back to baseline identity");
                (HardwareIdentity::baseline(), false)
            }
        };
        let mut slot = self.current.write().expect("identity lock poisoned");
        *slot = Arc::new(identity);
        info!(from_file, "identity snapshot replaced");
        from_file
    }

    /// Serialize the current snapshot. Loading the written file yields
    /// field-for-field the same identity.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let snapshot = self.snapshot();
        let body = serde_json::to_string_pretty(&*snapshot)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, body)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_identity(path: &Path) -> Result<HardwareIdentity> {
    let body = fs::read_to_string(path).map_err(|_| MirageError::ConfigurationAbsent)?;
    let doc: ConfigDoc =
        serde_json::from_str(&body).map_err(|_| MirageError::ConfigurationAbsent)?;
    if doc.randomize {
        info!("configuration requested a randomized identity");
        return Ok(Forge::random_identity());
    }
    if !doc.identity.is_usable() {
        return Err(MirageError::ConfigurationAbsent);
    }
    Ok(doc.identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn temp_file(tag: &str) -> PathBuf {
        static SEQ: AtomicU32 = AtomicU32::new(0);
        let n = SEQ.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("mirage_{}_{}_{}.json", tag, std::process::id(), n))
    }

    #[test]
    fn missing_file_yields_baseline() {
        let store = ConfigStore::load_from(temp_file("missing"));
        assert_eq!(*store.snapshot(), HardwareIdentity::baseline());
    }

    #[test]
    fn malformed_file_yields_baseline_no_partial_merge() {
        let path = temp_file("broken");
        fs::write(&path, "{ \"biosVendor\": \"Acme\", ").unwrap();
        let store = ConfigStore::load_from(&path);
        assert_eq!(*store.snapshot(), HardwareIdentity::baseline());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn load_save_round_trip_is_identical() {
        let mut id = HardwareIdentity::baseline();
        id.cpu_name = "Custom CPU Mark II".into();
        id.nic_mac_addresses = vec!["AA:BB:CC:DD:EE:FF".into(), "11:22:33:44:55:66".into()];

        let first = temp_file("rt_a");
        fs::write(&first, serde_json::to_string(&id).unwrap()).unwrap();
        let store = ConfigStore::load_from(&first);
        assert_eq!(*store.snapshot(), id);

        let second = temp_file("rt_b");
        store.save(&second).unwrap();
        let reloaded = ConfigStore::load_from(&second);
        assert_eq!(*reloaded.snapshot(), id);

        let _ = fs::remove_file(&first);
        let _ = fs::remove_file(&second);
    }

    #[test]
    fn reload_picks_up_new_file_contents() {
        let path = temp_file("reload");
        let store = ConfigStore::load_from(&path);
        assert!(!store.reload());

        let mut id = HardwareIdentity::baseline();
        id.bios_vendor = "Phoenix Technologies Ltd.".into();
        fs::write(&path, serde_json::to_string(&id).unwrap()).unwrap();
        assert!(store.reload());
        assert_eq!(store.snapshot().bios_vendor, "Phoenix Technologies Ltd.");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn randomize_key_forges_a_complete_identity() {
        let path = temp_file("forge");
        fs::write(&path, "{ \"randomize\": true }").unwrap();
        let store = ConfigStore::load_from(&path);
        let snap = store.snapshot();
        assert!(snap.is_usable());
        assert!(!snap.nic_mac_addresses.is_empty());
        let _ = fs::remove_file(&path);
    }
}
