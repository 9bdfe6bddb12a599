use serde::{Deserialize, Serialize};

/// Query categories the interception layer knows how to answer.
/// Everything else is forwarded to the real inventory service untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceCategory {
    Processor,
    VideoController,
    BaseBoard,
    Bios,
    PhysicalMemory,
    DiskDrive,
    NetworkAdapter,
    SoundDevice,
}

impl DeviceCategory {
    pub fn class_name(self) -> &'static str {
        match self {
            DeviceCategory::Processor => "Win32_Processor",
            DeviceCategory::VideoController => "Win32_VideoController",
            DeviceCategory::BaseBoard => "Win32_BaseBoard",
            DeviceCategory::Bios => "Win32_BIOS",
            DeviceCategory::PhysicalMemory => "Win32_PhysicalMemory",
            DeviceCategory::DiskDrive => "Win32_DiskDrive",
            DeviceCategory::NetworkAdapter => "Win32_NetworkAdapter",
            DeviceCategory::SoundDevice => "Win32_SoundDevice",
        }
    }
}

// --- THE SYNTHETIC RECORD ---
//
// One flat document, same keys as the on-disk configuration file.
// Scalar groups describe single devices (BIOS, board, chassis, CPU);
// the Vec groups describe one device per index. Lists inside a group
// may have unequal lengths in a hand-edited file; the device count for
// a group is the longest list, and shorter lists fall back per index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HardwareIdentity {
    // BIOS
    pub bios_vendor: String,
    pub bios_version: String,
    pub bios_date: String,
    pub bios_serial: String,
    pub system_uuid: String,

    // Base board
    pub motherboard_manufacturer: String,
    pub motherboard_product: String,
    pub motherboard_version: String,
    pub motherboard_serial: String,

    // Chassis
    pub chassis_manufacturer: String,
    pub chassis_type: String,
    pub chassis_serial: String,

    // CPU
    pub cpu_manufacturer: String,
    pub cpu_name: String,
    pub cpu_id: String,
    pub cpu_serial: String,
    pub cpu_cores: u32,
    pub cpu_threads: u32,

    // Memory modules
    pub memory_manufacturers: Vec<String>,
    pub memory_part_numbers: Vec<String>,
    pub memory_serials: Vec<String>,

    // Disks
    pub disk_models: Vec<String>,
    pub disk_serials: Vec<String>,
    pub disk_firmwares: Vec<String>,

    // GPUs
    pub gpu_names: Vec<String>,
    pub gpu_manufacturers: Vec<String>,
    pub gpu_driver_versions: Vec<String>,

    // Network adapters
    pub nic_names: Vec<String>,
    pub nic_manufacturers: Vec<String>,
    pub nic_mac_addresses: Vec<String>,

    // Audio devices
    pub audio_device_names: Vec<String>,
    pub audio_manufacturers: Vec<String>,
}

impl HardwareIdentity {
    /// The built-in machine used whenever no usable configuration exists.
    pub fn baseline() -> Self {
        HardwareIdentity {
            bios_vendor: "American Megatrends Inc.".into(),
            bios_version: "2.15.1236".into(),
            bios_date: "03/15/2023".into(),
            bios_serial: "AMI123456789".into(),
            system_uuid: "12345678-1234-5678-9ABC-123456789ABC".into(),

            motherboard_manufacturer: "ASUSTeK COMPUTER INC.".into(),
            motherboard_product: "ROG STRIX Z690-E GAMING".into(),
            motherboard_version: "Rev 1.xx".into(),
            motherboard_serial: "MB1234567890".into(),

            chassis_manufacturer: "ASUSTeK COMPUTER INC.".into(),
            chassis_type: "Desktop".into(),
            chassis_serial: "CH1234567890".into(),

            cpu_manufacturer: "Intel Corporation".into(),
            cpu_name: "Intel(R) Core(TM) i9-12900K CPU @ 3.20GHz".into(),
            cpu_id: "BFEBFBFF000906E9".into(),
            cpu_serial: "CPU123456789".into(),
            cpu_cores: 16,
            cpu_threads: 24,

            memory_manufacturers: vec!["Samsung".into(), "Samsung".into()],
            memory_part_numbers: vec![
                "M378A2K43CB1-CTD".into(),
                "M378A2K43CB1-CTD".into(),
            ],
            memory_serials: vec!["MEM123456789".into(), "MEM987654321".into()],

            disk_models: vec!["Samsung SSD 980 PRO 1TB".into()],
            disk_serials: vec!["S6XZNX0R123456".into()],
            disk_firmwares: vec!["5B2QGXA7".into()],

            gpu_names: vec!["NVIDIA GeForce RTX 4080".into()],
            gpu_manufacturers: vec!["NVIDIA".into()],
            gpu_driver_versions: vec!["31.0.15.3623".into()],

            nic_names: vec!["Intel(R) Ethernet Controller I225-V".into()],
            nic_manufacturers: vec!["Intel Corporation".into()],
            nic_mac_addresses: vec!["00:1B:44:11:3A:B7".into()],

            audio_device_names: vec!["Realtek High Definition Audio".into()],
            audio_manufacturers: vec!["Realtek".into()],
        }
    }

    /// A parsed file with no BIOS vendor is treated as unusable and the
    /// whole baseline is substituted instead. Matches the original
    /// loader contract: no partial merge of a broken document.
    pub fn is_usable(&self) -> bool {
        !self.bios_vendor.is_empty()
    }

    /// Longest list wins; the factory fills shorter lists per index.
    pub fn device_count(&self, category: DeviceCategory) -> usize {
        match category {
            DeviceCategory::PhysicalMemory => longest(&[
                &self.memory_manufacturers,
                &self.memory_part_numbers,
                &self.memory_serials,
            ]),
            DeviceCategory::DiskDrive => longest(&[
                &self.disk_models,
                &self.disk_serials,
                &self.disk_firmwares,
            ]),
            DeviceCategory::VideoController => longest(&[
                &self.gpu_names,
                &self.gpu_manufacturers,
                &self.gpu_driver_versions,
            ]),
            DeviceCategory::NetworkAdapter => longest(&[
                &self.nic_names,
                &self.nic_manufacturers,
                &self.nic_mac_addresses,
            ]),
            DeviceCategory::SoundDevice => {
                longest(&[&self.audio_device_names, &self.audio_manufacturers])
            }
            // Scalar groups always describe exactly one device.
            _ => 1,
        }
    }
}

fn longest(lists: &[&Vec<String>]) -> usize {
    lists.iter().map(|l| l.len()).max().unwrap_or(0)
}

/// Index into a per-device list, falling back when the list is shorter
/// than the device count for its group.
pub fn pick<'a>(list: &'a [String], index: usize, fallback: &'a str) -> &'a str {
    match list.get(index) {
        Some(v) if !v.is_empty() => v,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_is_usable() {
        assert!(HardwareIdentity::baseline().is_usable());
        assert!(!HardwareIdentity::default().is_usable());
    }

    #[test]
    fn device_count_takes_longest_list() {
        let mut id = HardwareIdentity::baseline();
        id.memory_serials = vec!["A".into(), "B".into(), "C".into(), "D".into()];
        assert_eq!(id.device_count(DeviceCategory::PhysicalMemory), 4);
        assert_eq!(id.device_count(DeviceCategory::DiskDrive), 1);
        assert_eq!(id.device_count(DeviceCategory::Processor), 1);
    }

    #[test]
    fn pick_falls_back_past_end_and_on_empty() {
        let list = vec!["one".to_string(), String::new()];
        assert_eq!(pick(&list, 0, "fb"), "one");
        assert_eq!(pick(&list, 1, "fb"), "fb");
        assert_eq!(pick(&list, 5, "fb"), "fb");
    }

    #[test]
    fn serde_keys_match_config_document() {
        let json = serde_json::to_string(&HardwareIdentity::baseline()).unwrap();
        assert!(json.contains("\"biosVendor\""));
        assert!(json.contains("\"cpuThreads\""));
        assert!(json.contains("\"nicMacAddresses\""));
    }
}
