//! The flat command-line config store from `spec.md` §6. Populated once,
//! early in boot, from the boot protocol's command line; read from
//! anywhere afterwards through the `!`-respecting accessors below.
//!
//! Grounded on the same "small struct populated once at boot, read many
//! times from everywhere after" shape `eonix_hal::bootstrap::BootStrapData`
//! uses for the rest of the boot handoff, but guarded by a
//! [`eonix_sync::Spin`] rather than handed around by value since config
//! reads happen throughout the kernel's lifetime, not just during early
//! init.
use alloc::collections::BTreeMap;
use alloc::string::String;

use eonix_sync::{Spin, SpinIrq as _};

/// A single config slot's value, parsed from its textual form per the
/// precedence in [`parse_value`]. `!`-suffixed values are locked: the
/// underlying string->value parse already ran, the suffix has been
/// stripped, and [`Config::set`] will refuse further writes to that key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    Bool(bool),
    Uint(u64),
    Str(String),
}

impl ConfigValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            ConfigValue::Uint(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

struct Slot {
    value: ConfigValue,
    locked: bool,
}

struct ConfigStore {
    slots: BTreeMap<String, Slot>,
}

static CONFIG: Spin<ConfigStore> = Spin::new(ConfigStore {
    slots: BTreeMap::new(),
});

/// Parses one value's textual form: `bool` ("true"/"false"/"yes"/"no",
/// case-sensitive per §6), then integer (`0x`/`0b`/plain-`0`-octal/decimal
/// prefixes), else the raw string unchanged.
fn parse_value(text: &str) -> ConfigValue {
    match text {
        "true" | "yes" => return ConfigValue::Bool(true),
        "false" | "no" => return ConfigValue::Bool(false),
        _ => {}
    }

    if let Some(hex) = text.strip_prefix("0x") {
        if let Ok(v) = u64::from_str_radix(hex, 16) {
            return ConfigValue::Uint(v);
        }
    } else if let Some(bin) = text.strip_prefix("0b") {
        if let Ok(v) = u64::from_str_radix(bin, 2) {
            return ConfigValue::Uint(v);
        }
    } else if text.len() > 1 && text.starts_with('0') {
        if let Ok(v) = u64::from_str_radix(&text[1..], 8) {
            return ConfigValue::Uint(v);
        }
    } else if let Ok(v) = text.parse::<u64>() {
        return ConfigValue::Uint(v);
    }

    ConfigValue::Str(String::from(text))
}

/// Sets `key` to the value parsed from `raw`. A trailing `!` locks the
/// slot against every future `set_single` (including another `!`-suffixed
/// one); setting an already-locked key is a no-op that returns `false`.
pub fn set_single(key: &str, raw: &str) -> bool {
    let (raw, lock) = match raw.strip_suffix('!') {
        Some(stripped) => (stripped, true),
        None => (raw, false),
    };
    let value = parse_value(raw);

    let mut store = CONFIG.lock_irq();
    if let Some(existing) = store.slots.get(key) {
        if existing.locked {
            return false;
        }
    }
    store.slots.insert(String::from(key), Slot { value, locked: lock });
    true
}

/// Parses `command_line` as whitespace-separated `key=value` pairs and
/// loads each one via [`set_single`]. Malformed tokens (no `=`) are
/// skipped rather than rejecting the whole line, since a single bad
/// argument from an external bootloader command line shouldn't abort
/// boot.
pub fn load_command_line(command_line: &str) {
    for token in command_line.split_whitespace() {
        if let Some((key, raw)) = token.split_once('=') {
            set_single(key, raw);
        }
    }
}

pub fn get(key: &str) -> Option<ConfigValue> {
    CONFIG.lock_irq().slots.get(key).map(|slot| slot.value.clone())
}

pub fn read_config_uint(key: &str, default: u64) -> u64 {
    get(key).and_then(|v| v.as_uint()).unwrap_or(default)
}

pub fn read_config_string(key: &str, default: &str) -> String {
    get(key)
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| String::from(default))
}

pub fn read_config_bool(key: &str, default: bool) -> bool {
    get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses a unique key so they can run concurrently against
    // the shared `CONFIG` static without clobbering each other.

    #[test]
    fn round_trips_bool_uint_and_string() {
        assert!(set_single("t.cfg.enabled", "true"));
        assert_eq!(get("t.cfg.enabled"), Some(ConfigValue::Bool(true)));

        assert!(set_single("t.cfg.count", "0x2A"));
        assert_eq!(get("t.cfg.count"), Some(ConfigValue::Uint(42)));

        assert!(set_single("t.cfg.name", "console0"));
        assert_eq!(
            get("t.cfg.name"),
            Some(ConfigValue::Str(String::from("console0")))
        );
    }

    #[test]
    fn bang_suffix_locks_the_slot() {
        assert!(set_single("t.cfg.locked", "1!"));
        assert_eq!(get("t.cfg.locked"), Some(ConfigValue::Uint(1)));

        assert!(!set_single("t.cfg.locked", "2"));
        assert_eq!(get("t.cfg.locked"), Some(ConfigValue::Uint(1)));
    }

    #[test]
    fn parsing_precedence_is_bool_then_int_then_string() {
        assert_eq!(parse_value("yes"), ConfigValue::Bool(true));
        assert_eq!(parse_value("no"), ConfigValue::Bool(false));
        assert_eq!(parse_value("0b101"), ConfigValue::Uint(5));
        assert_eq!(parse_value("010"), ConfigValue::Uint(8));
        assert_eq!(parse_value("not-a-number"), ConfigValue::Str(String::from("not-a-number")));
    }

    #[test]
    fn load_command_line_skips_malformed_tokens() {
        load_command_line("t.cfg.cmdline.a=true garbage t.cfg.cmdline.b=7");
        assert_eq!(get("t.cfg.cmdline.a"), Some(ConfigValue::Bool(true)));
        assert_eq!(get("t.cfg.cmdline.b"), Some(ConfigValue::Uint(7)));
        assert_eq!(get("garbage"), None);
    }

    #[test]
    fn read_helpers_fall_back_to_default() {
        assert_eq!(read_config_uint("t.cfg.missing", 99), 99);
        assert_eq!(read_config_string("t.cfg.missing", "fallback"), "fallback");
        assert_eq!(read_config_bool("t.cfg.missing", true), true);
    }
}
