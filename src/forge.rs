use chrono::NaiveDate;
use rand::Rng;

use crate::identity::HardwareIdentity;

// --- HARDWARE POOLS ---
// Vendor strings as the real products report them. Mixing pools across
// fields (an AMI BIOS on a Gigabyte board) is fine, real machines do it.

const BIOS_VENDORS: &[&str] = &[
    "American Megatrends Inc.",
    "Phoenix Technologies Ltd.",
    "Award Software International Inc.",
    "Insyde Corp.",
    "Dell Inc.",
    "Hewlett-Packard",
    "LENOVO",
    "ASUSTeK Computer Inc.",
];

const BOARD_MAKERS: &[&str] = &[
    "ASUSTeK Computer Inc.",
    "Gigabyte Technology Co., Ltd.",
    "MSI",
    "ASRock",
    "EVGA",
    "Biostar",
    "Dell Inc.",
    "Hewlett-Packard",
    "LENOVO",
];

const BOARD_PRODUCTS: &[&str] = &[
    "ROG STRIX Z690-E GAMING",
    "B550M PRO-VDH WIFI",
    "X570 AORUS ELITE",
    "Z590-A PRO",
    "B450 TOMAHAWK MAX",
    "X299 DARK",
    "Z490 GODLIKE",
    "B550 GAMING PLUS",
    "X570 CROSSHAIR VIII HERO",
    "Z590 VISION G",
];

const CPU_MAKERS: &[&str] = &[
    "Intel Corporation",
    "Advanced Micro Devices, Inc.",
    "GenuineIntel",
    "AuthenticAMD",
];

const INTEL_CPUS: &[&str] = &[
    "Intel(R) Core(TM) i9-12900K CPU @ 3.20GHz",
    "Intel(R) Core(TM) i7-11700K CPU @ 3.60GHz",
    "Intel(R) Core(TM) i5-10600K CPU @ 4.10GHz",
    "Intel(R) Core(TM) i9-10900K CPU @ 3.70GHz",
    "Intel(R) Core(TM) i7-9700K CPU @ 3.60GHz",
];

const AMD_CPUS: &[&str] = &[
    "AMD Ryzen 9 5950X 16-Core Processor",
    "AMD Ryzen 7 5800X 8-Core Processor",
    "AMD Ryzen 5 5600X 6-Core Processor",
    "AMD Ryzen 9 3950X 16-Core Processor",
    "AMD Ryzen 7 3700X 8-Core Processor",
];

const GPU_MAKERS: &[&str] = &[
    "NVIDIA",
    "Advanced Micro Devices, Inc.",
    "Intel Corporation",
    "ATI Technologies Inc.",
    "NVIDIA Corporation",
];

const NVIDIA_GPUS: &[&str] = &[
    "NVIDIA GeForce RTX 4090",
    "NVIDIA GeForce RTX 4080",
    "NVIDIA GeForce RTX 3080",
    "NVIDIA GeForce RTX 3070",
    "NVIDIA GeForce RTX 3060",
    "NVIDIA GeForce GTX 1660 SUPER",
];

const AMD_GPUS: &[&str] = &[
    "AMD Radeon RX 7900 XTX",
    "AMD Radeon RX 6900 XT",
    "AMD Radeon RX 6800 XT",
    "AMD Radeon RX 6700 XT",
    "AMD Radeon RX 5700 XT",
    "AMD Radeon RX 580",
];

const DISK_MODELS: &[&str] = &[
    "Samsung SSD 980 PRO 1TB",
    "WD Black SN850 1TB",
    "Seagate Barracuda 2TB",
    "Samsung 970 EVO Plus 500GB",
    "Crucial MX500 1TB",
    "WD Blue 1TB",
    "Seagate IronWolf 4TB",
    "Kingston NV2 500GB",
    "ADATA XPG SX8200 Pro 1TB",
];

const MEMORY_MAKERS: &[&str] = &[
    "Samsung",
    "SK Hynix",
    "Micron Technology",
    "Kingston",
    "Corsair",
    "G.Skill",
    "Crucial",
    "ADATA",
    "Team Group",
    "Patriot",
];

const MEMORY_PARTS: &[&str] = &[
    "CMK16GX4M2B3200C16",
    "F4-3200C16D-16GVKB",
    "BLS8G4D32AESBK",
    "CT16G4DFRA32A",
    "AX4U320016G16A-SR30",
    "PVS416G320C6K",
    "TF3D416G3200HC16CDC01",
    "M378A1K43CB2-CTD",
];

const NIC_MAKERS: &[&str] = &[
    "Intel Corporation",
    "Realtek Semiconductor Co., Ltd.",
    "Broadcom",
    "Qualcomm Atheros",
    "Marvell Technology Group",
    "Ralink Technology, Corp.",
    "MediaTek Inc.",
];

const NIC_MODELS: &[&str] = &[
    "Intel(R) Ethernet Controller I225-V",
    "Realtek PCIe GbE Family Controller",
    "Intel(R) Wi-Fi 6 AX200 160MHz",
    "Qualcomm Atheros AR9485 Wireless Network Adapter",
    "Broadcom NetXtreme Gigabit Ethernet",
    "Marvell AVASTAR Wireless-AC Network Controller",
];

const AUDIO_MAKERS: &[&str] = &[
    "Realtek",
    "Creative Technology Ltd",
    "C-Media Electronics Inc.",
    "VIA Technologies Inc.",
    "Intel Corporation",
    "NVIDIA Corporation",
];

const AUDIO_DEVICES: &[&str] = &[
    "Realtek High Definition Audio",
    "Creative Sound Blaster Z",
    "NVIDIA High Definition Audio",
    "Intel(R) Display Audio",
    "VIA HD Audio",
    "C-Media USB Audio Device",
];

/// Fabricates plausible hardware identities from the pools above.
pub struct Forge;

impl Forge {
    /// A complete random machine: 1 CPU/board/BIOS, 1-4 memory modules,
    /// 1-3 disks, 1-2 GPUs, 1-3 NICs, one audio device.
    pub fn random_identity() -> HardwareIdentity {
        let mut rng = rand::thread_rng();
        let cores: u32 = rng.gen_range(2..=16);
        let board_maker = pool(&mut rng, BOARD_MAKERS).to_string();

        let mut id = HardwareIdentity {
            bios_vendor: pool(&mut rng, BIOS_VENDORS).into(),
            bios_version: Self::bios_version(&mut rng),
            bios_date: Self::bios_date(&mut rng),
            bios_serial: Self::serial(&mut rng, 10),
            system_uuid: Self::uuid(&mut rng),

            motherboard_manufacturer: board_maker.clone(),
            motherboard_product: pool(&mut rng, BOARD_PRODUCTS).into(),
            motherboard_version: "1.0".into(),
            motherboard_serial: Self::serial(&mut rng, 10),

            chassis_manufacturer: board_maker,
            chassis_type: "Desktop".into(),
            chassis_serial: Self::serial(&mut rng, 10),

            cpu_manufacturer: pool(&mut rng, CPU_MAKERS).into(),
            cpu_name: Self::cpu_name(&mut rng),
            cpu_id: Self::hex(&mut rng, 16),
            cpu_serial: Self::serial(&mut rng, 10),
            cpu_cores: cores,
            cpu_threads: cores * rng.gen_range(1..=2),

            ..HardwareIdentity::default()
        };

        for _ in 0..rng.gen_range(1..=4) {
            id.memory_manufacturers.push(pool(&mut rng, MEMORY_MAKERS).into());
            id.memory_part_numbers.push(pool(&mut rng, MEMORY_PARTS).into());
            id.memory_serials.push(Self::serial(&mut rng, 10));
        }
        for _ in 0..rng.gen_range(1..=3) {
            id.disk_models.push(pool(&mut rng, DISK_MODELS).into());
            id.disk_serials.push(Self::serial(&mut rng, 20));
            id.disk_firmwares.push(Self::firmware_version(&mut rng));
        }
        for _ in 0..rng.gen_range(1..=2) {
            id.gpu_names.push(Self::gpu_name(&mut rng));
            id.gpu_manufacturers.push(pool(&mut rng, GPU_MAKERS).into());
            id.gpu_driver_versions.push(Self::driver_version(&mut rng));
        }
        for _ in 0..rng.gen_range(1..=3) {
            id.nic_names.push(pool(&mut rng, NIC_MODELS).into());
            id.nic_manufacturers.push(pool(&mut rng, NIC_MAKERS).into());
            id.nic_mac_addresses.push(Self::mac(&mut rng));
        }
        id.audio_device_names.push(pool(&mut rng, AUDIO_DEVICES).into());
        id.audio_manufacturers.push(pool(&mut rng, AUDIO_MAKERS).into());
        id
    }

    /// Fresh values, same shape: every list keeps its length so an
    /// operator-tuned device layout survives the reroll.
    pub fn randomize(original: &HardwareIdentity) -> HardwareIdentity {
        let mut id = Self::random_identity();

        resize_with(&mut id.memory_manufacturers, original.memory_manufacturers.len(), |rng| {
            pool(rng, MEMORY_MAKERS).into()
        });
        resize_with(&mut id.memory_part_numbers, original.memory_part_numbers.len(), |rng| {
            pool(rng, MEMORY_PARTS).into()
        });
        resize_with(&mut id.memory_serials, original.memory_serials.len(), |rng| {
            Self::serial(rng, 10)
        });
        resize_with(&mut id.disk_models, original.disk_models.len(), |rng| {
            pool(rng, DISK_MODELS).into()
        });
        resize_with(&mut id.disk_serials, original.disk_serials.len(), |rng| {
            Self::serial(rng, 20)
        });
        resize_with(&mut id.disk_firmwares, original.disk_firmwares.len(), |rng| {
            Self::firmware_version(rng)
        });
        resize_with(&mut id.gpu_names, original.gpu_names.len(), |rng| {
            Self::gpu_name(rng)
        });
        resize_with(&mut id.gpu_manufacturers, original.gpu_manufacturers.len(), |rng| {
            pool(rng, GPU_MAKERS).into()
        });
        resize_with(&mut id.gpu_driver_versions, original.gpu_driver_versions.len(), |rng| {
            Self::driver_version(rng)
        });
        resize_with(&mut id.nic_names, original.nic_names.len(), |rng| {
            pool(rng, NIC_MODELS).into()
        });
        resize_with(&mut id.nic_manufacturers, original.nic_manufacturers.len(), |rng| {
            pool(rng, NIC_MAKERS).into()
        });
        resize_with(&mut id.nic_mac_addresses, original.nic_mac_addresses.len(), |rng| {
            Self::mac(rng)
        });
        resize_with(&mut id.audio_device_names, original.audio_device_names.len(), |rng| {
            pool(rng, AUDIO_DEVICES).into()
        });
        resize_with(&mut id.audio_manufacturers, original.audio_manufacturers.len(), |rng| {
            pool(rng, AUDIO_MAKERS).into()
        });
        id
    }

    // --- GENERATORS ---

    pub fn serial(rng: &mut impl Rng, len: usize) -> String {
        const CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
        (0..len)
            .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
            .collect()
    }

    pub fn hex(rng: &mut impl Rng, len: usize) -> String {
        const CHARS: &[u8] = b"0123456789ABCDEF";
        (0..len)
            .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
            .collect()
    }

    pub fn uuid(rng: &mut impl Rng) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            Self::hex(rng, 8),
            Self::hex(rng, 4),
            Self::hex(rng, 4),
            Self::hex(rng, 4),
            Self::hex(rng, 12)
        )
    }

    pub fn mac(rng: &mut impl Rng) -> String {
        (0..6)
            .map(|_| format!("{:02X}", rng.gen_range(0..=255u32)))
            .collect::<Vec<_>>()
            .join(":")
    }

    fn bios_version(rng: &mut impl Rng) -> String {
        format!(
            "{}.{:02}.{}",
            rng.gen_range(1..10),
            rng.gen_range(0..100),
            rng.gen_range(1..1000)
        )
    }

    fn firmware_version(rng: &mut impl Rng) -> String {
        format!(
            "{}.{}.{}",
            rng.gen_range(1..10),
            rng.gen_range(0..100),
            rng.gen_range(0..1000)
        )
    }

    fn driver_version(rng: &mut impl Rng) -> String {
        format!(
            "{}.{}.{}.{}",
            rng.gen_range(20..32),
            rng.gen_range(10..100),
            rng.gen_range(10..100),
            rng.gen_range(1000..10000)
        )
    }

    /// MM/DD/YYYY, the format the BIOS block actually reports.
    fn bios_date(rng: &mut impl Rng) -> String {
        let date = NaiveDate::from_ymd_opt(
            rng.gen_range(2018..=2024),
            rng.gen_range(1..=12),
            rng.gen_range(1..=28),
        )
        .expect("day range never exceeds 28");
        date.format("%m/%d/%Y").to_string()
    }

    fn cpu_name(rng: &mut impl Rng) -> String {
        if rng.gen_bool(0.5) {
            pool(rng, INTEL_CPUS).into()
        } else {
            pool(rng, AMD_CPUS).into()
        }
    }

    fn gpu_name(rng: &mut impl Rng) -> String {
        if rng.gen_bool(0.5) {
            pool(rng, NVIDIA_GPUS).into()
        } else {
            pool(rng, AMD_GPUS).into()
        }
    }
}

fn pool<'a>(rng: &mut impl Rng, list: &'a [&'a str]) -> &'a str {
    list[rng.gen_range(0..list.len())]
}

fn resize_with<F>(list: &mut Vec<String>, len: usize, mut fill: F)
where
    F: FnMut(&mut rand::rngs::ThreadRng) -> String,
{
    let mut rng = rand::thread_rng();
    list.truncate(len);
    while list.len() < len {
        let value = fill(&mut rng);
        list.push(value);
    }
}
