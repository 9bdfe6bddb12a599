use std::sync::Mutex;

use tracing::debug;

use crate::config::ConfigStore;
use crate::error::Result;
use crate::factory::{Factory, SyntheticObjectSet};
use crate::identity::DeviceCategory;

/// Recognition order for category markers. First match wins and the
/// match is a case-sensitive substring scan over the raw query text.
/// That policy is fragile on purpose: it is exactly what the consumers
/// we imitate get from the real scanner, so a query naming two classes
/// resolves by this list order, not by position in the text.
pub const CATEGORY_ORDER: [DeviceCategory; 8] = [
    DeviceCategory::Processor,
    DeviceCategory::VideoController,
    DeviceCategory::BaseBoard,
    DeviceCategory::Bios,
    DeviceCategory::PhysicalMemory,
    DeviceCategory::DiskDrive,
    DeviceCategory::NetworkAdapter,
    DeviceCategory::SoundDevice,
];

// One construction at a time across all host threads. Snapshots already
// prevent torn reads; the gate additionally keeps result-set assembly
// serialized so a reload never races object population.
static SYNTH_GATE: Mutex<()> = Mutex::new(());

/// The real service as seen by the router: the one forwardable
/// operation the router may fall back to. The COM layer adapts the
/// genuine service to this; tests plug in a mock.
pub trait InventoryService: Send + Sync {
    fn exec_query(&self, language: &str, query: &str) -> Result<SyntheticObjectSet>;
}

pub struct QueryRouter;

impl QueryRouter {
    /// Only queries classified here are claimed; everything else is the
    /// real subsystem's business, including its failures.
    pub fn classify(query: &str) -> Option<DeviceCategory> {
        CATEGORY_ORDER
            .iter()
            .copied()
            .find(|category| query.contains(category.class_name()))
    }

    /// Build one synthetic result set under the construction gate.
    pub fn answer(store: &ConfigStore, category: DeviceCategory) -> SyntheticObjectSet {
        let _gate = SYNTH_GATE.lock().expect("synthesis gate poisoned");
        let snapshot = store.snapshot();
        Factory::result_set(category, &snapshot)
    }

    pub fn dispatch(
        store: &ConfigStore,
        real: &dyn InventoryService,
        language: &str,
        query: &str,
    ) -> Result<SyntheticObjectSet> {
        match Self::classify(query) {
            Some(category) => {
                debug!(?category, query, "answering query synthetically");
                Ok(Self::answer(store, category))
            }
            None => {
                debug!(query, "forwarding query to real service");
                real.exec_query(language, query)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MirageError;
    use crate::factory::SyntheticObject;
    use crate::identity::HardwareIdentity;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct MockReal {
        calls: AtomicUsize,
        fail_code: Option<u32>,
    }

    impl MockReal {
        fn ok() -> Self {
            MockReal {
                calls: AtomicUsize::new(0),
                fail_code: None,
            }
        }

        fn failing(code: u32) -> Self {
            MockReal {
                calls: AtomicUsize::new(0),
                fail_code: Some(code),
            }
        }
    }

    impl InventoryService for MockReal {
        fn exec_query(&self, _language: &str, _query: &str) -> Result<SyntheticObjectSet> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(code) = self.fail_code {
                return Err(MirageError::Forward(code));
            }
            let marker = SyntheticObject::new();
            marker.put("FromRealService", "yes");
            Ok(SyntheticObjectSet::new(vec![marker]))
        }
    }

    fn store_with(id: &HardwareIdentity) -> ConfigStore {
        let path = std::env::temp_dir().join(format!(
            "mirage_router_{}_{:p}.json",
            std::process::id(),
            id
        ));
        std::fs::write(&path, serde_json::to_string(id).unwrap()).unwrap();
        let store = ConfigStore::load_from(&path);
        let _ = std::fs::remove_file(&path);
        store
    }

    #[test]
    fn classification_is_case_sensitive_substring() {
        assert_eq!(
            QueryRouter::classify("SELECT * FROM Win32_BIOS"),
            Some(DeviceCategory::Bios)
        );
        assert_eq!(QueryRouter::classify("SELECT * FROM win32_bios"), None);
        assert_eq!(QueryRouter::classify(""), None);
        assert_eq!(QueryRouter::classify("SELECT * FROM Win32_OperatingSystem"), None);
    }

    #[test]
    fn first_match_follows_marker_order_not_text_position() {
        // BIOS appears first in the text, but the marker list checks
        // VideoController before Bios.
        let q = "SELECT * FROM Win32_BIOS JOIN Win32_VideoController";
        assert_eq!(QueryRouter::classify(q), Some(DeviceCategory::VideoController));
    }

    #[test]
    fn recognized_query_never_touches_real_service() {
        let store = store_with(&HardwareIdentity::baseline());
        let real = MockReal::failing(0x8004_1003);
        let mut set =
            QueryRouter::dispatch(&store, &real, "WQL", "SELECT * FROM Win32_Processor").unwrap();
        assert_eq!(real.calls.load(Ordering::SeqCst), 0);
        let cpu = set.next().unwrap();
        assert_eq!(
            cpu.get("Name").unwrap().as_str(),
            Some("Intel(R) Core(TM) i9-12900K CPU @ 3.20GHz")
        );
    }

    #[test]
    fn unrecognized_query_forwards_results_and_errors_verbatim() {
        let store = store_with(&HardwareIdentity::baseline());

        let real = MockReal::ok();
        let mut set =
            QueryRouter::dispatch(&store, &real, "WQL", "SELECT * FROM Win32_Service").unwrap();
        assert_eq!(real.calls.load(Ordering::SeqCst), 1);
        let obj = set.next().unwrap();
        assert_eq!(obj.get("FromRealService").unwrap().as_str(), Some("yes"));

        let failing = MockReal::failing(0x8004_1017);
        let err = QueryRouter::dispatch(&store, &failing, "WQL", "bad query text").unwrap_err();
        assert!(matches!(err, MirageError::Forward(0x8004_1017)));
    }

    #[test]
    fn configured_cpu_round_trips_through_dispatch() {
        let mut id = HardwareIdentity::baseline();
        id.cpu_name = "X".into();
        id.cpu_cores = 8;
        id.cpu_threads = 16;
        let store = store_with(&id);
        let real = MockReal::ok();
        let mut set =
            QueryRouter::dispatch(&store, &real, "WQL", "SELECT * FROM Win32_Processor").unwrap();
        assert_eq!(set.len(), 1);
        let cpu = set.next().unwrap();
        assert_eq!(cpu.get("Name").unwrap().as_str(), Some("X"));
        assert_eq!(cpu.get("NumberOfCores").unwrap().as_u32(), Some(8));
        assert_eq!(cpu.get("NumberOfLogicalProcessors").unwrap().as_u32(), Some(16));
    }

    #[test]
    fn concurrent_queries_during_reload_never_tear() {
        let mut small = HardwareIdentity::baseline();
        small.memory_manufacturers = vec!["SmallCo".into(); 2];
        small.memory_serials = vec!["S1".into(), "S2".into()];
        small.memory_part_numbers = vec!["SP".into(); 2];

        let mut large = HardwareIdentity::baseline();
        large.memory_manufacturers = vec!["LargeCo".into(); 4];
        large.memory_serials = vec!["L1".into(), "L2".into(), "L3".into(), "L4".into()];
        large.memory_part_numbers = vec!["LP".into(); 4];

        let path = std::env::temp_dir().join(format!("mirage_tear_{}.json", std::process::id()));
        std::fs::write(&path, serde_json::to_string(&small).unwrap()).unwrap();
        let store = Arc::new(ConfigStore::load_from(&path));

        let flipper = {
            let store = store.clone();
            let path = path.clone();
            let small = small.clone();
            let large = large.clone();
            std::thread::spawn(move || {
                for round in 0..50 {
                    let next = if round % 2 == 0 { &large } else { &small };
                    std::fs::write(&path, serde_json::to_string(next).unwrap()).unwrap();
                    assert!(store.reload());
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let real = MockReal::ok();
                    for _ in 0..100 {
                        let mut set = QueryRouter::dispatch(
                            &store,
                            &real,
                            "WQL",
                            "SELECT * FROM Win32_PhysicalMemory",
                        )
                        .unwrap();
                        let mut makers = Vec::new();
                        while let Some(obj) = set.next() {
                            makers.push(obj.get("Manufacturer").unwrap().render());
                        }
                        // Either machine is fine; a mixture is a torn read.
                        let all_small = makers.iter().all(|m| m == "SmallCo") && makers.len() == 2;
                        let all_large = makers.iter().all(|m| m == "LargeCo") && makers.len() == 4;
                        assert!(all_small || all_large, "torn snapshot: {:?}", makers);
                    }
                })
            })
            .collect();

        flipper.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        let _ = std::fs::remove_file(&path);
    }
}
