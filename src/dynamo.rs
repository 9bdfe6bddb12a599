use std::ffi::{c_void, CStr, CString};

use windows::core::PCSTR;
use windows::Win32::Foundation::HMODULE;
use windows::Win32::System::LibraryLoader::{GetModuleHandleA, GetProcAddress, LoadLibraryA};
use windows::Win32::System::Memory::{VirtualProtect, PAGE_PROTECTION_FLAGS, PAGE_READWRITE};

use crate::error::{MirageError, Result};
use crate::hooks::{HookRecord, HookTarget, Patcher};

/// Dynamically resolves modules and functions at runtime, and patches
/// the host image's import address table. The import slot is the entry
/// point the loader already resolved for the host, so swapping the
/// pointer diverts every call site and putting the old pointer back is
/// an exact restore.
pub struct Dynamo;

impl Dynamo {
    pub unsafe fn get_module(module: &str) -> Option<HMODULE> {
        let name = CString::new(module).ok()?;
        match GetModuleHandleA(PCSTR(name.as_ptr() as *const u8)) {
            Ok(handle) => Some(handle),
            Err(_) => LoadLibraryA(PCSTR(name.as_ptr() as *const u8)).ok(),
        }
    }

    pub unsafe fn get_func(module: &str, function: &str) -> Option<*const c_void> {
        let handle = Self::get_module(module)?;
        let name = CString::new(function).ok()?;
        GetProcAddress(handle, PCSTR(name.as_ptr() as *const u8)).map(|f| f as *const c_void)
    }

    pub unsafe fn host_base() -> Option<usize> {
        GetModuleHandleA(PCSTR::null()).ok().map(|h| h.0 as usize)
    }
}

// --- PE IMPORT DIRECTORY ---
// Just enough of the image layout to reach the import thunks.

#[repr(C)]
struct ImageDosHeader {
    e_magic: u16,
    _reserved: [u8; 58],
    e_lfanew: i32,
}

#[repr(C)]
#[allow(dead_code)]
struct ImageFileHeader {
    machine: u16,
    number_of_sections: u16,
    time_date_stamp: u32,
    pointer_to_symbol_table: u32,
    number_of_symbols: u32,
    size_of_optional_header: u16,
    characteristics: u16,
}

#[repr(C)]
struct ImageDataDirectory {
    virtual_address: u32,
    size: u32,
}

#[repr(C)]
struct ImageOptionalHeader64 {
    magic: u16,
    _pad: [u8; 110], // fields between Magic and the directories
    data_directory: [ImageDataDirectory; 16],
}

#[repr(C)]
#[allow(dead_code)]
struct ImageNtHeaders64 {
    signature: u32,
    file_header: ImageFileHeader,
    optional_header: ImageOptionalHeader64,
}

#[repr(C)]
#[allow(dead_code)]
struct ImageImportDescriptor {
    original_first_thunk: u32,
    time_date_stamp: u32,
    forwarder_chain: u32,
    name: u32,
    first_thunk: u32,
}

const DOS_MAGIC: u16 = 0x5A4D; // "MZ"
const NT_SIGNATURE: u32 = 0x0000_4550; // "PE\0\0"
const OPTIONAL_MAGIC_64: u16 = 0x020B;
const IMPORT_DIRECTORY: usize = 1;
const ORDINAL_FLAG_64: u64 = 1 << 63;

/// Locate the host image's IAT slot for `symbol` imported from
/// `module`. Name matching walks the lookup table; images without one
/// fall back to matching the resolved address in the bound table.
unsafe fn find_import_slot(module: &str, symbol: &str) -> Option<*mut usize> {
    let base = Dynamo::host_base()?;

    let dos = &*(base as *const ImageDosHeader);
    if dos.e_magic != DOS_MAGIC {
        return None;
    }
    let nt = &*((base + dos.e_lfanew as usize) as *const ImageNtHeaders64);
    if nt.signature != NT_SIGNATURE || nt.optional_header.magic != OPTIONAL_MAGIC_64 {
        return None;
    }
    let dir = &nt.optional_header.data_directory[IMPORT_DIRECTORY];
    if dir.virtual_address == 0 {
        return None;
    }

    let mut descriptor = (base + dir.virtual_address as usize) as *const ImageImportDescriptor;
    while (*descriptor).name != 0 {
        let dll = CStr::from_ptr((base + (*descriptor).name as usize) as *const i8);
        if dll
            .to_str()
            .map(|n| n.eq_ignore_ascii_case(module))
            .unwrap_or(false)
        {
            let iat = (base + (*descriptor).first_thunk as usize) as *mut usize;
            if (*descriptor).original_first_thunk != 0 {
                let lookup = (base + (*descriptor).original_first_thunk as usize) as *const u64;
                let mut index = 0usize;
                loop {
                    let entry = *lookup.add(index);
                    if entry == 0 {
                        break;
                    }
                    if entry & ORDINAL_FLAG_64 == 0 {
                        // IMAGE_IMPORT_BY_NAME: hint word, then the name
                        let name =
                            CStr::from_ptr((base + entry as usize + 2) as *const i8);
                        if name.to_str().map(|n| n == symbol).unwrap_or(false) {
                            return Some(iat.add(index));
                        }
                    }
                    index += 1;
                }
            } else {
                // No lookup table: match the loader-resolved address.
                let wanted = Dynamo::get_func(module, symbol)? as usize;
                let mut index = 0usize;
                loop {
                    let slot = iat.add(index);
                    if *slot == 0 {
                        break;
                    }
                    if *slot == wanted {
                        return Some(slot);
                    }
                    index += 1;
                }
            }
        }
        descriptor = descriptor.add(1);
    }
    None
}

unsafe fn write_slot(slot: *mut usize, value: usize) -> bool {
    let mut old = PAGE_PROTECTION_FLAGS::default();
    if VirtualProtect(
        slot as *const c_void,
        std::mem::size_of::<usize>(),
        PAGE_READWRITE,
        &mut old,
    )
    .is_err()
    {
        return false;
    }
    std::ptr::write_volatile(slot, value);
    let mut scratch = PAGE_PROTECTION_FLAGS::default();
    let _ = VirtualProtect(
        slot as *const c_void,
        std::mem::size_of::<usize>(),
        old,
        &mut scratch,
    );
    true
}

/// The live patching backend: import-table interposition on the host
/// executable. Apply swaps the slot for the replacement and hands back
/// the loader's pointer; revert writes that pointer back unchanged.
pub struct IatPatcher;

impl IatPatcher {
    fn unresolved(module: &str, symbol: &str) -> MirageError {
        MirageError::Resolution {
            module: module.to_string(),
            symbol: symbol.to_string(),
        }
    }
}

impl Patcher for IatPatcher {
    fn apply(&self, target: &HookTarget) -> Result<usize> {
        unsafe {
            let slot = find_import_slot(target.module, target.symbol)
                .ok_or_else(|| Self::unresolved(target.module, target.symbol))?;
            let original = *slot;
            if !write_slot(slot, target.replacement) {
                return Err(Self::unresolved(target.module, target.symbol));
            }
            Ok(original)
        }
    }

    fn revert(&self, record: &HookRecord) -> Result<()> {
        unsafe {
            let slot = find_import_slot(record.module, record.symbol)
                .ok_or_else(|| Self::unresolved(record.module, record.symbol))?;
            if !write_slot(slot, record.original) {
                return Err(Self::unresolved(record.module, record.symbol));
            }
            Ok(())
        }
    }
}
