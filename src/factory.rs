use std::sync::{Arc, RwLock};

use crate::identity::{pick, DeviceCategory, HardwareIdentity};

// --- TYPED PROPERTY VALUES ---

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Str(String),
    U32(u32),
    I32(i32),
    U64(u64),
    Bool(bool),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            PropertyValue::U32(v) => Some(*v),
            _ => None,
        }
    }

    /// Only a string can be empty; numeric and boolean values always
    /// render to something.
    pub fn is_empty(&self) -> bool {
        matches!(self, PropertyValue::Str(s) if s.is_empty())
    }

    pub fn render(&self) -> String {
        match self {
            PropertyValue::Str(s) => s.clone(),
            PropertyValue::U32(v) => v.to_string(),
            PropertyValue::I32(v) => v.to_string(),
            PropertyValue::U64(v) => v.to_string(),
            PropertyValue::Bool(v) => v.to_string(),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::Str(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::Str(s)
    }
}

// --- SYNTHETIC OBJECT ---

/// One simulated device instance: an ordered, named, typed property bag.
/// Handed out behind an `Arc`; the set keeps one strong reference per
/// contained object and every caller clone is one more.
#[derive(Debug)]
pub struct SyntheticObject {
    props: RwLock<Vec<(String, PropertyValue)>>,
}

pub type ObjectRef = Arc<SyntheticObject>;

impl SyntheticObject {
    pub fn new() -> ObjectRef {
        Arc::new(SyntheticObject {
            props: RwLock::new(Vec::new()),
        })
    }

    pub fn get(&self, name: &str) -> Option<PropertyValue> {
        let props = self.props.read().expect("property lock poisoned");
        props.iter().find(|(n, _)| n == name).map(|(_, v)| v.clone())
    }

    /// Replace in place or append. Insertion order is what enumeration
    /// reports, so replacing must not move the property.
    pub fn put(&self, name: &str, value: impl Into<PropertyValue>) {
        let value = value.into();
        let mut props = self.props.write().expect("property lock poisoned");
        if let Some(slot) = props.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
        } else {
            props.push((name.to_string(), value));
        }
    }

    pub fn delete(&self, name: &str) -> bool {
        let mut props = self.props.write().expect("property lock poisoned");
        let before = props.len();
        props.retain(|(n, _)| n != name);
        props.len() != before
    }

    pub fn names(&self) -> Vec<String> {
        let props = self.props.read().expect("property lock poisoned");
        props.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Snapshot of the whole bag in insertion order.
    pub fn entries(&self) -> Vec<(String, PropertyValue)> {
        self.props.read().expect("property lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.props.read().expect("property lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// --- SYNTHETIC OBJECT SET ---

/// Ordered, finite, one-shot forward iterator over synthetic objects.
/// Supports skip-without-materializing and reset-to-start; once the
/// cursor passes the end only an explicit reset revives it.
#[derive(Debug)]
pub struct SyntheticObjectSet {
    objects: Vec<ObjectRef>,
    cursor: usize,
}

impl SyntheticObjectSet {
    pub fn new(objects: Vec<ObjectRef>) -> Self {
        SyntheticObjectSet { objects, cursor: 0 }
    }

    pub fn next(&mut self) -> Option<ObjectRef> {
        let obj = self.objects.get(self.cursor)?.clone();
        self.cursor += 1;
        Some(obj)
    }

    /// Batch pull of up to `count` objects, mirroring the enumerator
    /// contract: returns fewer than asked when the set runs dry.
    pub fn pull(&mut self, count: usize) -> Vec<ObjectRef> {
        let mut out = Vec::new();
        while out.len() < count {
            match self.next() {
                Some(obj) => out.push(obj),
                None => break,
            }
        }
        out
    }

    pub fn skip(&mut self, count: usize) {
        self.cursor = (self.cursor + count).min(self.objects.len());
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.objects.len() - self.cursor
    }

    /// Same objects, same cursor position. The copies share the
    /// underlying property bags by reference count.
    pub fn duplicate(&self) -> SyntheticObjectSet {
        SyntheticObjectSet {
            objects: self.objects.clone(),
            cursor: self.cursor,
        }
    }
}

// --- THE FACTORY ---

/// Builds result sets from an identity snapshot, one object per device,
/// never fewer than one per category. Field schemas follow what real
/// inventory consumers read for each class, filler values included.
pub struct Factory;

impl Factory {
    pub fn result_set(category: DeviceCategory, id: &HardwareIdentity) -> SyntheticObjectSet {
        let objects = match category {
            DeviceCategory::Processor => vec![Self::cpu(id)],
            DeviceCategory::Bios => vec![Self::bios(id)],
            DeviceCategory::BaseBoard => vec![Self::base_board(id)],
            DeviceCategory::PhysicalMemory => Self::memory(id),
            DeviceCategory::DiskDrive => Self::disks(id),
            DeviceCategory::VideoController => Self::gpus(id),
            DeviceCategory::NetworkAdapter => Self::nics(id),
            DeviceCategory::SoundDevice => Self::audio(id),
        };
        SyntheticObjectSet::new(objects)
    }

    fn cpu(id: &HardwareIdentity) -> ObjectRef {
        let obj = SyntheticObject::new();
        obj.put("Manufacturer", or(&id.cpu_manufacturer, "Intel Corporation"));
        obj.put(
            "Name",
            or(&id.cpu_name, "Intel(R) Core(TM) i9-12900K CPU @ 3.20GHz"),
        );
        obj.put("ProcessorId", or(&id.cpu_id, "BFEBFBFF000906E9"));
        obj.put("SerialNumber", or(&id.cpu_serial, "CPU123456789"));
        obj.put(
            "NumberOfCores",
            PropertyValue::U32(if id.cpu_cores > 0 { id.cpu_cores } else { 16 }),
        );
        obj.put(
            "NumberOfLogicalProcessors",
            PropertyValue::U32(if id.cpu_threads > 0 { id.cpu_threads } else { 24 }),
        );
        obj.put("Architecture", "9"); // x64
        obj.put("Family", "6");
        obj.put("MaxClockSpeed", PropertyValue::U32(3800));
        obj.put("CurrentClockSpeed", PropertyValue::U32(3800));
        obj.put("SocketDesignation", "CPU1");
        obj
    }

    fn bios(id: &HardwareIdentity) -> ObjectRef {
        let vendor = or(&id.bios_vendor, "American Megatrends Inc.");
        let version = or(&id.bios_version, "2.15.1236");
        let obj = SyntheticObject::new();
        obj.put("Manufacturer", vendor);
        obj.put("SMBIOSBIOSVersion", version);
        obj.put("ReleaseDate", or(&id.bios_date, "03/15/2023"));
        obj.put("SerialNumber", or(&id.bios_serial, "AMI123456789"));
        obj.put("Version", format!("{} - {}", vendor, version));
        obj.put("Name", format!("{} BIOS", vendor));
        obj
    }

    fn base_board(id: &HardwareIdentity) -> ObjectRef {
        let product = or(&id.motherboard_product, "ROG STRIX Z690-E GAMING");
        let obj = SyntheticObject::new();
        obj.put(
            "Manufacturer",
            or(&id.motherboard_manufacturer, "ASUSTeK COMPUTER INC."),
        );
        obj.put("Product", product);
        obj.put("Version", or(&id.motherboard_version, "Rev 1.xx"));
        obj.put("SerialNumber", or(&id.motherboard_serial, "MB1234567890"));
        obj.put("Model", product);
        obj.put("Name", "Base Board");
        obj
    }

    fn memory(id: &HardwareIdentity) -> Vec<ObjectRef> {
        // Two modules when nothing is configured; a one-stick machine
        // reads as stranger than a two-stick one.
        let count = id.device_count(DeviceCategory::PhysicalMemory).max(2);
        (0..count)
            .map(|i| {
                let serial_fallback = format!("MEM{}", i + 1);
                let obj = SyntheticObject::new();
                obj.put(
                    "Manufacturer",
                    pick(&id.memory_manufacturers, i, "Samsung"),
                );
                obj.put(
                    "PartNumber",
                    pick(&id.memory_part_numbers, i, "M378A2K43CB1-CTD"),
                );
                obj.put("SerialNumber", pick(&id.memory_serials, i, &serial_fallback));
                obj.put("Capacity", PropertyValue::U64(17_179_869_184)); // 16 GiB
                obj.put("Speed", PropertyValue::U32(3200));
                obj.put("MemoryType", "DDR4");
                obj.put("DeviceLocator", format!("DIMM{}", i));
                obj
            })
            .collect()
    }

    fn disks(id: &HardwareIdentity) -> Vec<ObjectRef> {
        let count = id.device_count(DeviceCategory::DiskDrive).max(1);
        (0..count)
            .map(|i| {
                let serial_fallback = format!("S6XZNX0R{}", i + 123_456);
                let obj = SyntheticObject::new();
                obj.put("Model", pick(&id.disk_models, i, "Samsung SSD 980 PRO 1TB"));
                obj.put("SerialNumber", pick(&id.disk_serials, i, &serial_fallback));
                obj.put("FirmwareRevision", pick(&id.disk_firmwares, i, "5B2QGXA7"));
                obj.put("MediaType", "Fixed hard disk media");
                obj.put("InterfaceType", "SCSI");
                obj.put("Size", PropertyValue::U64(1_000_204_886_016)); // 1 TB
                obj.put("Index", PropertyValue::U32(i as u32));
                obj
            })
            .collect()
    }

    fn gpus(id: &HardwareIdentity) -> Vec<ObjectRef> {
        let count = id.device_count(DeviceCategory::VideoController).max(1);
        (0..count)
            .map(|i| {
                let name = pick(&id.gpu_names, i, "NVIDIA GeForce RTX 3070");
                let obj = SyntheticObject::new();
                obj.put("Name", name);
                obj.put(
                    "AdapterCompatibility",
                    pick(&id.gpu_manufacturers, i, "NVIDIA"),
                );
                obj.put(
                    "DriverVersion",
                    pick(&id.gpu_driver_versions, i, "31.0.15.3623"),
                );
                obj.put("VideoProcessor", name);
                obj.put("AdapterRAM", PropertyValue::U64(8_589_934_592)); // 8 GiB
                obj.put("Status", "OK");
                obj
            })
            .collect()
    }

    fn nics(id: &HardwareIdentity) -> Vec<ObjectRef> {
        let count = id.device_count(DeviceCategory::NetworkAdapter).max(1);
        (0..count)
            .map(|i| {
                let obj = SyntheticObject::new();
                obj.put(
                    "Name",
                    pick(&id.nic_names, i, "Intel(R) Ethernet Controller I225-V"),
                );
                obj.put(
                    "Manufacturer",
                    pick(&id.nic_manufacturers, i, "Intel Corporation"),
                );
                obj.put(
                    "MACAddress",
                    pick(&id.nic_mac_addresses, i, "00:1B:44:11:3A:B7"),
                );
                obj.put("NetConnectionStatus", PropertyValue::U32(2)); // connected
                obj.put("AdapterType", "Ethernet 802.3");
                obj.put("Speed", PropertyValue::U64(1_000_000_000));
                obj
            })
            .collect()
    }

    fn audio(id: &HardwareIdentity) -> Vec<ObjectRef> {
        let count = id.device_count(DeviceCategory::SoundDevice).max(1);
        (0..count)
            .map(|i| {
                let obj = SyntheticObject::new();
                obj.put(
                    "Name",
                    pick(&id.audio_device_names, i, "Realtek High Definition Audio"),
                );
                obj.put("Manufacturer", pick(&id.audio_manufacturers, i, "Realtek"));
                obj.put("Status", "OK");
                obj.put("DeviceID", "HDAUDIO\\FUNC_01&VEN_10EC&DEV_0887");
                obj
            })
            .collect()
    }
}

fn or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [DeviceCategory; 8] = [
        DeviceCategory::Processor,
        DeviceCategory::VideoController,
        DeviceCategory::BaseBoard,
        DeviceCategory::Bios,
        DeviceCategory::PhysicalMemory,
        DeviceCategory::DiskDrive,
        DeviceCategory::NetworkAdapter,
        DeviceCategory::SoundDevice,
    ];

    #[test]
    fn every_category_yields_devices_with_no_empty_fields() {
        for identity in [HardwareIdentity::baseline(), HardwareIdentity::default()] {
            for category in ALL {
                let mut set = Factory::result_set(category, &identity);
                assert!(set.len() >= 1, "{:?} returned an empty set", category);
                while let Some(obj) = set.next() {
                    assert!(!obj.is_empty());
                    for (name, value) in obj.entries() {
                        assert!(!value.is_empty(), "{:?}.{} is empty", category, name);
                    }
                }
            }
        }
    }

    #[test]
    fn unconfigured_memory_fabricates_two_modules() {
        let set = Factory::result_set(DeviceCategory::PhysicalMemory, &HardwareIdentity::default());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn cpu_schema_reflects_configuration() {
        let mut id = HardwareIdentity::default();
        id.cpu_name = "X".into();
        id.cpu_cores = 8;
        id.cpu_threads = 16;
        let mut set = Factory::result_set(DeviceCategory::Processor, &id);
        assert_eq!(set.len(), 1);
        let cpu = set.next().unwrap();
        assert_eq!(cpu.get("Name").unwrap().as_str(), Some("X"));
        assert_eq!(cpu.get("NumberOfCores").unwrap().as_u32(), Some(8));
        assert_eq!(cpu.get("NumberOfLogicalProcessors").unwrap().as_u32(), Some(16));
        assert_eq!(cpu.get("Architecture").unwrap().as_str(), Some("9"));
        assert_eq!(cpu.get("Family").unwrap().as_str(), Some("6"));
        assert_eq!(cpu.get("MaxClockSpeed").unwrap().as_u32(), Some(3800));
        assert_eq!(cpu.get("CurrentClockSpeed").unwrap().as_u32(), Some(3800));
    }

    #[test]
    fn short_lists_fall_back_per_index() {
        let mut id = HardwareIdentity::baseline();
        id.gpu_names = vec!["Card A".into(), "Card B".into()];
        id.gpu_manufacturers = vec!["MakerA".into()]; // shorter than names
        id.gpu_driver_versions.clear();
        let mut set = Factory::result_set(DeviceCategory::VideoController, &id);
        assert_eq!(set.len(), 2);
        let first = set.next().unwrap();
        let second = set.next().unwrap();
        assert_eq!(first.get("AdapterCompatibility").unwrap().as_str(), Some("MakerA"));
        assert_eq!(second.get("AdapterCompatibility").unwrap().as_str(), Some("NVIDIA"));
        assert_eq!(second.get("Name").unwrap().as_str(), Some("Card B"));
        assert_eq!(
            second.get("DriverVersion").unwrap().as_str(),
            Some("31.0.15.3623")
        );
    }

    #[test]
    fn object_put_replaces_in_place_and_delete_removes() {
        let obj = SyntheticObject::new();
        obj.put("A", "1");
        obj.put("B", "2");
        obj.put("A", "3");
        assert_eq!(obj.names(), vec!["A", "B"]);
        assert_eq!(obj.get("A").unwrap().as_str(), Some("3"));
        assert!(obj.delete("A"));
        assert!(!obj.delete("A"));
        assert_eq!(obj.names(), vec!["B"]);
    }

    #[test]
    fn set_is_one_shot_with_skip_and_reset() {
        let id = HardwareIdentity::baseline();
        let mut set = Factory::result_set(DeviceCategory::PhysicalMemory, &id);
        assert_eq!(set.len(), 2);

        assert_eq!(set.pull(5).len(), 2); // runs dry, returns what it has
        assert!(set.next().is_none()); // exhausted until reset

        set.reset();
        set.skip(1);
        assert_eq!(set.remaining(), 1);
        let last = set.next().unwrap();
        assert_eq!(last.get("DeviceLocator").unwrap().as_str(), Some("DIMM1"));

        set.skip(100); // clamps at the end
        assert!(set.next().is_none());
    }
}
