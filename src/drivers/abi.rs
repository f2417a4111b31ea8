//! Kernel driver-API export table (`spec.md` §4.10 "Device APIs" / §6):
//! the fixed set of `npk_*` entry points a loaded driver module's
//! undefined symbols are allowed to resolve against, mirrored from
//! `original_source/kernel/drivers/Loader.cpp`'s external-symbol
//! resolution step -- there it just logs "external symbol needed" and
//! leaves the value zero; here the lookup is actually backed by real
//! kernel functions so a linked module can call them.
use super::api::{add_device_api, find_by_device, ops_for, remove_device_api, set_transport_api};
use super::device_tree::{add_device_desc, friendly_name, remove_device_desc};

macro_rules! exports {
    ($($name:literal => $sym:expr),* $(,)?) => {
        fn lookup(name: &str) -> Option<usize> {
            match name {
                $($name => Some($sym as usize),)*
                _ => None,
            }
        }
    };
}

exports! {
    "npk_add_device_api" => add_device_api,
    "npk_remove_device_api" => remove_device_api,
    "npk_find_device_api" => find_by_device,
    "npk_ops_for" => ops_for,
    "npk_set_transport_api" => set_transport_api,
    "npk_add_device_desc" => add_device_desc,
    "npk_remove_device_desc" => remove_device_desc,
    "npk_friendly_name" => friendly_name,
}

/// Resolves `name` against the fixed driver-API export table. Returns
/// `None` for anything not in the table, including ordinary kernel
/// internals a module has no business calling directly.
pub fn symbol_address(name: &str) -> Option<usize> {
    lookup(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_export_resolves() {
        assert!(symbol_address("npk_add_device_api").is_some());
    }

    #[test]
    fn unknown_symbol_is_none() {
        assert_eq!(symbol_address("not_a_real_export"), None);
    }
}
