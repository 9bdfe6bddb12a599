use tracing::debug;

use crate::identity::HardwareIdentity;

// Registry wire constants, kept as plain integers so the mapping logic
// and its tests build on every host.
pub const REG_SZ: u32 = 1;
pub const REG_BINARY: u32 = 3;
pub const REG_DWORD: u32 = 4;
pub const REG_MULTI_SZ: u32 = 7;

pub const ERROR_SUCCESS: u32 = 0;
pub const ERROR_MORE_DATA: u32 = 234;

// --- SYNTHETIC VALUES ---

#[derive(Debug, Clone, PartialEq)]
pub enum RegData {
    Sz(String),
    MultiSz(Vec<String>),
    Dword(u32),
    Binary(Vec<u8>),
}

impl RegData {
    pub fn type_code(&self) -> u32 {
        match self {
            RegData::Sz(_) => REG_SZ,
            RegData::MultiSz(_) => REG_MULTI_SZ,
            RegData::Dword(_) => REG_DWORD,
            RegData::Binary(_) => REG_BINARY,
        }
    }

    /// Exact bytes the wide entry point hands back: UTF-16LE with a
    /// terminator per string and a second terminator closing a multi
    /// string block.
    pub fn wide_bytes(&self) -> Vec<u8> {
        match self {
            RegData::Sz(s) => {
                let mut out = Vec::with_capacity((s.len() + 1) * 2);
                for unit in s.encode_utf16().chain(std::iter::once(0)) {
                    out.extend_from_slice(&unit.to_le_bytes());
                }
                out
            }
            RegData::MultiSz(strings) => {
                let mut out = Vec::new();
                for s in strings {
                    for unit in s.encode_utf16().chain(std::iter::once(0)) {
                        out.extend_from_slice(&unit.to_le_bytes());
                    }
                }
                out.extend_from_slice(&0u16.to_le_bytes());
                out
            }
            RegData::Dword(v) => v.to_le_bytes().to_vec(),
            RegData::Binary(b) => b.clone(),
        }
    }

    /// Narrow rendition for the ANSI entry point. Characters outside
    /// the code page degrade to '?', matching the default conversion.
    pub fn ansi_bytes(&self) -> Vec<u8> {
        fn narrow(s: &str, out: &mut Vec<u8>) {
            for ch in s.chars() {
                out.push(if ch.is_ascii() { ch as u8 } else { b'?' });
            }
            out.push(0);
        }
        match self {
            RegData::Sz(s) => {
                let mut out = Vec::with_capacity(s.len() + 1);
                narrow(s, &mut out);
                out
            }
            RegData::MultiSz(strings) => {
                let mut out = Vec::new();
                for s in strings {
                    narrow(s, &mut out);
                }
                out.push(0);
                out
            }
            RegData::Dword(v) => v.to_le_bytes().to_vec(),
            RegData::Binary(b) => b.clone(),
        }
    }
}

// --- MAPPING TABLE ---

/// One substitution rule: a key-path fragment, a value name, and the
/// synthetic data served in place of whatever the real key holds.
#[derive(Debug, Clone)]
pub struct RegistryMapping {
    pub key_path: String,
    pub value_name: String,
    pub data: RegData,
}

pub struct MappingTable {
    entries: Vec<RegistryMapping>,
}

const BIOS_KEY: &str = "HARDWARE\\DESCRIPTION\\System\\BIOS";
const CPU_KEY: &str = "HARDWARE\\DESCRIPTION\\System\\CentralProcessor\\0";
const DISK_KEY: &str =
    "HARDWARE\\DESCRIPTION\\System\\MultifunctionAdapter\\0\\DiskController\\0\\DiskPeripheral\\0";
const SYSINFO_KEY: &str = "SYSTEM\\CurrentControlSet\\Control\\SystemInformation";
const NIC_CLASS_KEY: &str =
    "SYSTEM\\CurrentControlSet\\Control\\Class\\{4d36e972-e325-11ce-bfc1-08002be10318}";

impl MappingTable {
    /// Rebuilt from the identity at attach and on every reload. Entry
    /// order matters: lookups take the first hit, so the CPU block's
    /// `Identifier` must precede the disk controller's.
    pub fn build(id: &HardwareIdentity) -> Self {
        let or = |v: &str, fb: &str| {
            if v.is_empty() { fb.to_string() } else { v.to_string() }
        };
        let mut entries = Vec::new();
        let mut sz = |path: &str, name: &str, value: String| {
            entries.push(RegistryMapping {
                key_path: path.to_string(),
                value_name: name.to_string(),
                data: RegData::Sz(value),
            });
        };

        // SMBIOS block
        sz(BIOS_KEY, "BIOSVendor", or(&id.bios_vendor, "American Megatrends Inc."));
        sz(BIOS_KEY, "BIOSVersion", or(&id.bios_version, "2.15.1236"));
        sz(BIOS_KEY, "BIOSReleaseDate", or(&id.bios_date, "03/15/2023"));
        sz(
            BIOS_KEY,
            "SystemManufacturer",
            or(&id.motherboard_manufacturer, "ASUSTeK COMPUTER INC."),
        );
        sz(
            BIOS_KEY,
            "SystemProductName",
            or(&id.motherboard_product, "ROG STRIX Z690-E GAMING"),
        );
        sz(
            BIOS_KEY,
            "SystemSerialNumber",
            or(&id.motherboard_serial, "MB1234567890"),
        );
        sz(
            BIOS_KEY,
            "SystemUUID",
            or(&id.system_uuid, "12345678-1234-5678-9ABC-123456789ABC"),
        );
        sz(
            BIOS_KEY,
            "BaseBoardManufacturer",
            or(&id.motherboard_manufacturer, "ASUSTeK COMPUTER INC."),
        );
        sz(
            BIOS_KEY,
            "BaseBoardProduct",
            or(&id.motherboard_product, "ROG STRIX Z690-E GAMING"),
        );
        sz(BIOS_KEY, "BaseBoardVersion", or(&id.motherboard_version, "1.0"));
        sz(BIOS_KEY, "SystemFamily", "Desktop".into());
        sz(BIOS_KEY, "SystemSKU", "SKU001".into());
        sz(BIOS_KEY, "SystemVersion", "1.0".into());

        // CPU block
        sz(
            CPU_KEY,
            "ProcessorNameString",
            or(&id.cpu_name, "Intel(R) Core(TM) i9-12900K CPU @ 3.20GHz"),
        );
        sz(
            CPU_KEY,
            "VendorIdentifier",
            or(&id.cpu_manufacturer, "Intel Corporation"),
        );
        sz(CPU_KEY, "Identifier", or(&id.cpu_id, "BFEBFBFF000906E9"));

        // First disk, enumerated the legacy way
        sz(
            DISK_KEY,
            "Identifier",
            id.disk_models
                .first()
                .cloned()
                .unwrap_or_else(|| "Samsung SSD 980 PRO 1TB".to_string()),
        );

        // NIC class instances 0000..0003, all carry the first MAC
        if let Some(mac) = id.nic_mac_addresses.first() {
            for instance in 0..4 {
                entries.push(RegistryMapping {
                    key_path: format!("{}\\{:04}", NIC_CLASS_KEY, instance),
                    value_name: "NetworkAddress".to_string(),
                    data: RegData::Sz(mac.clone()),
                });
            }
        }

        // Machine identity block
        let uuid = or(&id.system_uuid, "12345678-1234-5678-9ABC-123456789ABC");
        entries.push(RegistryMapping {
            key_path: SYSINFO_KEY.to_string(),
            value_name: "ComputerHardwareId".to_string(),
            data: RegData::Sz(uuid.clone()),
        });
        entries.push(RegistryMapping {
            key_path: SYSINFO_KEY.to_string(),
            value_name: "ComputerHardwareIds".to_string(),
            data: RegData::MultiSz(vec![uuid]),
        });

        debug!(count = entries.len(), "registry mapping table built");
        MappingTable { entries }
    }

    /// Value names match case-insensitively, as the real registry does.
    /// When the caller's key path is known it must contain the entry's
    /// path fragment; with no path available the name alone decides,
    /// which is how the original behaved for every call.
    pub fn lookup(&self, key_path: Option<&str>, value_name: &str) -> Option<&RegistryMapping> {
        self.entries.iter().find(|entry| {
            if !entry.value_name.eq_ignore_ascii_case(value_name) {
                return false;
            }
            match key_path {
                Some(path) => path
                    .to_ascii_uppercase()
                    .contains(&entry.key_path.to_ascii_uppercase()),
                None => true,
            }
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// --- TWO-PHASE WIRE PROTOCOL ---

/// Serve `data` through the size-query/size-then-data protocol.
///
/// `buffer` is the caller's data buffer (already bounded by its declared
/// capacity), `size` the in/out byte count. A null buffer with a size
/// pointer is a size probe; an undersized buffer earns `ERROR_MORE_DATA`
/// with the required count, as many times as the caller cares to retry.
pub fn answer_value_query(
    data: &[u8],
    buffer: Option<&mut [u8]>,
    size: Option<&mut u32>,
) -> u32 {
    let required = data.len() as u32;
    match (buffer, size) {
        (Some(buf), Some(cb)) => {
            if *cb >= required {
                buf[..data.len()].copy_from_slice(data);
                *cb = required;
                ERROR_SUCCESS
            } else {
                *cb = required;
                ERROR_MORE_DATA
            }
        }
        (None, Some(cb)) => {
            *cb = required;
            ERROR_SUCCESS
        }
        // Type-only probe: nothing to write, nothing to measure.
        _ => ERROR_SUCCESS,
    }
}

// --- HOOKED ENTRY POINTS ---

#[cfg(windows)]
pub mod win {
    use std::ffi::c_void;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use windows::core::{PCSTR, PCWSTR};
    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::System::Registry::HKEY;

    use super::*;
    use crate::dynamo::Dynamo;
    use crate::engine;

    // Original entry points, captured at install time. Zero means the
    // interposition for that symbol is not active and calls fall through
    // to the import directly.
    pub static ORIG_REG_QUERY_W: AtomicUsize = AtomicUsize::new(0);
    pub static ORIG_REG_QUERY_A: AtomicUsize = AtomicUsize::new(0);
    pub static ORIG_REG_ENUM_W: AtomicUsize = AtomicUsize::new(0);

    type RegQueryW = unsafe extern "system" fn(
        HKEY,
        PCWSTR,
        *const u32,
        *mut u32,
        *mut u8,
        *mut u32,
    ) -> u32;
    type RegQueryA = unsafe extern "system" fn(
        HKEY,
        PCSTR,
        *const u32,
        *mut u32,
        *mut u8,
        *mut u32,
    ) -> u32;
    type RegEnumW = unsafe extern "system" fn(
        HKEY,
        u32,
        *mut u16,
        *mut u32,
        *const u32,
        *mut u32,
        *mut u8,
        *mut u32,
    ) -> u32;
    type NtQueryKey = unsafe extern "system" fn(HANDLE, u32, *mut c_void, u32, *mut u32) -> i32;

    const KEY_NAME_INFORMATION: u32 = 3;

    #[repr(C)]
    struct KeyNameInformation {
        name_length: u32,
        name: [u16; 1],
    }

    /// Resolve the full path of an open key handle. Best effort; a
    /// failure just downgrades matching to value-name only.
    unsafe fn resolve_key_path(hkey: HKEY) -> Option<String> {
        static NT_QUERY_KEY: AtomicUsize = AtomicUsize::new(0);
        let mut addr = NT_QUERY_KEY.load(Ordering::Relaxed);
        if addr == 0 {
            addr = Dynamo::get_func("ntdll.dll", "NtQueryKey")? as usize;
            NT_QUERY_KEY.store(addr, Ordering::Relaxed);
        }
        let query: NtQueryKey = std::mem::transmute(addr);

        let mut buf = [0u8; 1024];
        let mut len = 0u32;
        let status = query(
            HANDLE(hkey.0),
            KEY_NAME_INFORMATION,
            buf.as_mut_ptr() as *mut c_void,
            buf.len() as u32,
            &mut len,
        );
        if status != 0 {
            return None;
        }
        let info = &*(buf.as_ptr() as *const KeyNameInformation);
        let chars = (info.name_length / 2) as usize;
        let name = std::slice::from_raw_parts(info.name.as_ptr(), chars.min(500));
        Some(String::from_utf16_lossy(name))
    }

    unsafe fn shadowed(hkey: HKEY, value_name: &str) -> Option<(u32, Vec<u8>, Vec<u8>)> {
        let engine = engine::instance()?;
        let path = resolve_key_path(hkey);
        let table = engine.mappings();
        let table = table.read().ok()?;
        let entry = table.lookup(path.as_deref(), value_name)?;
        Some((entry.data.type_code(), entry.data.wide_bytes(), entry.data.ansi_bytes()))
    }

    unsafe fn serve(
        payload: &[u8],
        type_code: u32,
        lptype: *mut u32,
        lpdata: *mut u8,
        lpcb: *mut u32,
    ) -> u32 {
        if !lptype.is_null() {
            *lptype = type_code;
        }
        let capacity = if lpcb.is_null() { 0 } else { *lpcb as usize };
        let buffer = if !lpdata.is_null() && !lpcb.is_null() {
            Some(std::slice::from_raw_parts_mut(lpdata, capacity))
        } else {
            None
        };
        let size = if lpcb.is_null() { None } else { Some(&mut *lpcb) };
        answer_value_query(payload, buffer, size)
    }

    pub unsafe extern "system" fn hooked_reg_query_value_ex_w(
        hkey: HKEY,
        lpvaluename: PCWSTR,
        lpreserved: *const u32,
        lptype: *mut u32,
        lpdata: *mut u8,
        lpcbdata: *mut u32,
    ) -> u32 {
        if !lpvaluename.is_null() {
            let name = lpvaluename.to_string().unwrap_or_default();
            if let Some((type_code, wide, _)) = shadowed(hkey, &name) {
                return serve(&wide, type_code, lptype, lpdata, lpcbdata);
            }
        }
        let orig = ORIG_REG_QUERY_W.load(Ordering::Relaxed);
        if orig != 0 {
            let real: RegQueryW = std::mem::transmute(orig);
            return real(hkey, lpvaluename, lpreserved, lptype, lpdata, lpcbdata);
        }
        windows::Win32::System::Registry::RegQueryValueExW(
            hkey,
            lpvaluename,
            Some(lpreserved),
            Some(lptype as *mut windows::Win32::System::Registry::REG_VALUE_TYPE),
            Some(lpdata),
            Some(lpcbdata),
        )
        .0
    }

    pub unsafe extern "system" fn hooked_reg_query_value_ex_a(
        hkey: HKEY,
        lpvaluename: PCSTR,
        lpreserved: *const u32,
        lptype: *mut u32,
        lpdata: *mut u8,
        lpcbdata: *mut u32,
    ) -> u32 {
        if !lpvaluename.is_null() {
            let name = lpvaluename.to_string().unwrap_or_default();
            if let Some((type_code, _, ansi)) = shadowed(hkey, &name) {
                return serve(&ansi, type_code, lptype, lpdata, lpcbdata);
            }
        }
        let orig = ORIG_REG_QUERY_A.load(Ordering::Relaxed);
        if orig != 0 {
            let real: RegQueryA = std::mem::transmute(orig);
            return real(hkey, lpvaluename, lpreserved, lptype, lpdata, lpcbdata);
        }
        windows::Win32::System::Registry::RegQueryValueExA(
            hkey,
            lpvaluename,
            Some(lpreserved),
            Some(lptype as *mut windows::Win32::System::Registry::REG_VALUE_TYPE),
            Some(lpdata),
            Some(lpcbdata),
        )
        .0
    }

    /// Enumeration lets the real registry speak first so slot order and
    /// value count stay exactly real; only the data of mapped names is
    /// rewritten before the caller sees it.
    pub unsafe extern "system" fn hooked_reg_enum_value_w(
        hkey: HKEY,
        dwindex: u32,
        lpvaluename: *mut u16,
        lpcchvaluename: *mut u32,
        lpreserved: *const u32,
        lptype: *mut u32,
        lpdata: *mut u8,
        lpcbdata: *mut u32,
    ) -> u32 {
        let capacity = if lpcbdata.is_null() { 0 } else { *lpcbdata };
        let orig = ORIG_REG_ENUM_W.load(Ordering::Relaxed);
        let result = if orig != 0 {
            let real: RegEnumW = std::mem::transmute(orig);
            real(
                hkey,
                dwindex,
                lpvaluename,
                lpcchvaluename,
                lpreserved,
                lptype,
                lpdata,
                lpcbdata,
            )
        } else {
            windows::Win32::System::Registry::RegEnumValueW(
                hkey,
                dwindex,
                windows::core::PWSTR(lpvaluename),
                lpcchvaluename,
                Some(lpreserved),
                Some(lptype as *mut windows::Win32::System::Registry::REG_VALUE_TYPE),
                Some(lpdata),
                Some(lpcbdata),
            )
            .0
        };

        if result == ERROR_SUCCESS
            && !lpvaluename.is_null()
            && !lpcchvaluename.is_null()
            && !lpdata.is_null()
            && !lpcbdata.is_null()
        {
            let chars = (*lpcchvaluename) as usize;
            let name = String::from_utf16_lossy(std::slice::from_raw_parts(lpvaluename, chars));
            if let Some((type_code, wide, _)) = shadowed(hkey, &name) {
                if !lptype.is_null() {
                    *lptype = type_code;
                }
                *lpcbdata = capacity;
                let buffer = std::slice::from_raw_parts_mut(lpdata, capacity as usize);
                return answer_value_query(&wide, Some(buffer), Some(&mut *lpcbdata));
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> MappingTable {
        let mut id = HardwareIdentity::baseline();
        id.bios_vendor = "Phoenix Technologies Ltd.".into();
        id.cpu_id = "BFEBFBFF000A0671".into();
        MappingTable::build(&id)
    }

    #[test]
    fn two_phase_protocol_sizes_then_serves() {
        let table = table();
        let entry = table.lookup(None, "BIOSVendor").unwrap();
        let payload = entry.data.wide_bytes();
        let expected = ("Phoenix Technologies Ltd.".len() + 1) * 2;
        assert_eq!(payload.len(), expected);

        // Phase one: null buffer, exact size back.
        let mut size = 0u32;
        assert_eq!(answer_value_query(&payload, None, Some(&mut size)), ERROR_SUCCESS);
        assert_eq!(size, expected as u32);

        // Phase two: buffer of that size succeeds with the full value.
        let mut buf = vec![0u8; size as usize];
        let mut cb = size;
        assert_eq!(
            answer_value_query(&payload, Some(&mut buf), Some(&mut cb)),
            ERROR_SUCCESS
        );
        assert_eq!(cb, size);
        assert_eq!(buf, payload);

        // One byte short: more-data with the same required size, twice.
        for _ in 0..2 {
            let mut short = vec![0u8; (size - 1) as usize];
            let mut cb = size - 1;
            assert_eq!(
                answer_value_query(&payload, Some(&mut short), Some(&mut cb)),
                ERROR_MORE_DATA
            );
            assert_eq!(cb, size);
        }
    }

    #[test]
    fn wide_string_is_null_terminated_utf16() {
        let data = RegData::Sz("AB".into());
        assert_eq!(data.wide_bytes(), vec![b'A', 0, b'B', 0, 0, 0]);
        assert_eq!(data.type_code(), REG_SZ);
    }

    #[test]
    fn multi_string_is_double_terminated() {
        let data = RegData::MultiSz(vec!["A".into(), "B".into()]);
        assert_eq!(data.wide_bytes(), vec![b'A', 0, 0, 0, b'B', 0, 0, 0, 0, 0]);
        assert_eq!(data.type_code(), REG_MULTI_SZ);
    }

    #[test]
    fn dword_is_four_little_endian_bytes() {
        let data = RegData::Dword(0x0102_0304);
        assert_eq!(data.wide_bytes(), vec![4, 3, 2, 1]);
        assert_eq!(data.ansi_bytes(), vec![4, 3, 2, 1]);
    }

    #[test]
    fn ansi_conversion_narrows_and_terminates() {
        let data = RegData::Sz("Ab\u{00e9}".into());
        assert_eq!(data.ansi_bytes(), vec![b'A', b'b', b'?', 0]);
    }

    #[test]
    fn lookup_is_name_insensitive_and_path_opportunistic() {
        let table = table();
        assert!(table.lookup(None, "biosvendor").is_some());
        assert!(table.lookup(None, "NoSuchValue").is_none());

        // With a resolvable path the fragment must appear in it.
        let machine_path = "\\REGISTRY\\MACHINE\\HARDWARE\\DESCRIPTION\\System\\BIOS";
        assert!(table.lookup(Some(machine_path), "BIOSVendor").is_some());
        assert!(table
            .lookup(Some("\\REGISTRY\\MACHINE\\SOFTWARE\\Vendor"), "BIOSVendor")
            .is_none());
    }

    #[test]
    fn duplicate_value_names_resolve_by_path() {
        let table = table();
        let cpu_path = "\\REGISTRY\\MACHINE\\HARDWARE\\DESCRIPTION\\System\\CentralProcessor\\0";
        let cpu = table.lookup(Some(cpu_path), "Identifier").unwrap();
        assert_eq!(cpu.data, RegData::Sz("BFEBFBFF000A0671".into()));

        let disk_path = "\\REGISTRY\\MACHINE\\HARDWARE\\DESCRIPTION\\System\\MultifunctionAdapter\\0\\DiskController\\0\\DiskPeripheral\\0";
        let disk = table.lookup(Some(disk_path), "Identifier").unwrap();
        assert_eq!(disk.data, RegData::Sz("Samsung SSD 980 PRO 1TB".into()));

        // No path resolved: table order decides, the CPU block wins.
        let blind = table.lookup(None, "Identifier").unwrap();
        assert_eq!(blind.data, RegData::Sz("BFEBFBFF000A0671".into()));
    }

    #[test]
    fn enumeration_preserves_order_and_count_substituting_mapped_data() {
        let table = table();
        // A simulated key holding mapped and unmapped values in real
        // slot order, as the genuine enumerator would report them.
        let real_slots = [
            ("BIOSVendor", RegData::Sz("Real Vendor Inc.".into())),
            ("UnrelatedValue", RegData::Sz("untouched".into())),
            ("SystemSKU", RegData::Sz("REAL-SKU".into())),
        ];
        let machine_path = "\\REGISTRY\\MACHINE\\HARDWARE\\DESCRIPTION\\System\\BIOS";

        let mut seen = Vec::new();
        for (name, real_data) in &real_slots {
            let served = match table.lookup(Some(machine_path), name) {
                Some(entry) => entry.data.clone(),
                None => real_data.clone(),
            };
            seen.push((name.to_string(), served));
        }

        assert_eq!(seen.len(), real_slots.len());
        assert_eq!(seen[0].0, "BIOSVendor");
        assert_eq!(seen[0].1, RegData::Sz("Phoenix Technologies Ltd.".into()));
        assert_eq!(seen[1].1, RegData::Sz("untouched".into()));
        assert_eq!(seen[2].1, RegData::Sz("SKU001".into()));
    }

    #[test]
    fn nic_instances_all_carry_the_first_mac() {
        let table = table();
        for instance in 0..4 {
            let path = format!(
                "\\REGISTRY\\MACHINE\\SYSTEM\\CurrentControlSet\\Control\\Class\\{{4d36e972-e325-11ce-bfc1-08002be10318}}\\{:04}",
                instance
            );
            let entry = table.lookup(Some(&path), "NetworkAddress").unwrap();
            assert_eq!(entry.data, RegData::Sz("00:1B:44:11:3A:B7".into()));
        }
    }

    #[test]
    fn hardware_ids_value_is_multi_string() {
        let table = table();
        let entry = table.lookup(None, "ComputerHardwareIds").unwrap();
        assert_eq!(entry.data.type_code(), REG_MULTI_SZ);
        let bytes = entry.data.wide_bytes();
        // Double null terminated.
        assert_eq!(&bytes[bytes.len() - 4..], &[0, 0, 0, 0]);
    }
}
