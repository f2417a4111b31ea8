//! Driver manifest ABI (`spec.md` §4.10/§6): the byte-for-byte shape a
//! `.npkmodule` section must have for the loader's GUID-scan to find it.
//!
//! Grounded on `original_source/kernel/drivers/Loader.cpp`'s
//! `npk_module_metadata`/`npk_driver_manifest` usage
//! (`NP_MODULE_META_START_GUID`, `NP_MODULE_MANIFEST_GUID`, the
//! `LoadTypeStrs` table) and `kernel/include/interfaces/loader/Crow.h`'s
//! GUID-prefixed-record convention for cross-module ABI structs.
use core::ffi::{c_char, c_void};

pub type Guid = [u8; 16];

/// Marks the start of a module's metadata block; immediately followed by
/// a [`ModuleMetadata`].
pub const MODULE_META_START_GUID: Guid = *b"NpkModuleMeta!!\0";

/// Prefixes every [`DriverManifest`] record so the loader can find an
/// unknown number of them by scanning raw bytes.
pub const MODULE_MANIFEST_GUID: Guid = *b"NpkDriverManif!\0";

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ModuleMetadata {
    pub guid: Guid,
    pub ver_major: u32,
    pub ver_minor: u32,
    pub ver_rev: u32,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadType {
    Never = 0,
    Always = 1,
    PciClass = 2,
    PciDevice = 3,
    DtbCompat = 4,
}

pub const LOAD_TYPE_STRS: [&str; 5] = ["never", "always", "pci-class", "pci-device", "dtb-compat"];

impl LoadType {
    pub fn as_str(self) -> &'static str {
        LOAD_TYPE_STRS[self as usize]
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(LoadType::Never),
            1 => Some(LoadType::Always),
            2 => Some(LoadType::PciClass),
            3 => Some(LoadType::PciDevice),
            4 => Some(LoadType::DtbCompat),
            _ => None,
        }
    }
}

/// The event a manifest's handler is invoked with. `spec.md` only names
/// `AddDevice`; `RemoveDevice` mirrors it for the symmetric teardown path
/// `remove_device_desc` leaves otherwise unhandled.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverEvent {
    AddDevice = 0,
    RemoveDevice = 1,
}

/// The compatibility payload a manifest's `match_data` is interpreted as,
/// selected by `load_type`. Raw byte blob in the ABI struct (matching
/// struct layouts compile down to the same thing anyway) so one manifest
/// shape covers every `load_type`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PciClassMatch {
    pub base: u8,
    pub sub: u8,
    pub interface: u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PciDeviceMatch {
    pub vendor: u16,
    pub device: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DtbCompatMatch {
    pub compatible: [c_char; 64],
}

/// One driver's manifest: declares the `LoadName`s it's compatible with
/// (`match_data`, interpreted per `load_type`) and the event handler the
/// matcher calls with `event=AddDevice` on a hit.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DriverManifest {
    pub guid: Guid,
    pub friendly_name: [c_char; 64],
    pub ver_major: u32,
    pub ver_minor: u32,
    pub ver_rev: u32,
    pub load_type: LoadType,
    pub match_data: [u8; 72],
    pub event_handler: extern "C" fn(DriverEvent, *mut c_void),
}

impl DriverManifest {
    pub fn friendly_name_str(&self) -> &str {
        let bytes = unsafe { &*(&raw const self.friendly_name as *const [u8; 64]) };
        let len = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        core::str::from_utf8(&bytes[..len]).unwrap_or("<invalid utf8>")
    }

    pub fn pci_class_match(&self) -> PciClassMatch {
        unsafe { core::ptr::read_unaligned(self.match_data.as_ptr() as *const PciClassMatch) }
    }

    pub fn pci_device_match(&self) -> PciDeviceMatch {
        unsafe { core::ptr::read_unaligned(self.match_data.as_ptr() as *const PciDeviceMatch) }
    }

    pub fn dtb_compat_match(&self) -> DtbCompatMatch {
        unsafe { core::ptr::read_unaligned(self.match_data.as_ptr() as *const DtbCompatMatch) }
    }
}
