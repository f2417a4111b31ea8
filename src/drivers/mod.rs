//! Driver/device model (`spec.md` §4.10): the `DeviceDescriptor` forest,
//! the `.npkmodule`/`DriverManifest` ABI, a hand-rolled `ET_REL` ELF
//! reader, the six-step module loader, device API records, and IOP
//! dispatch. See `DESIGN.md` for the grounding ledger and the scope
//! decisions this port makes relative to
//! `original_source/kernel/drivers/Loader.cpp`.
pub mod abi;
pub mod api;
pub mod device_tree;
pub mod elf;
pub mod iop;
pub mod loader;
pub mod manifest;

/// Failure modes of the module loader (`spec.md` §4.10). Lives here
/// rather than in `loader.rs` itself since `kresult::KError` needs to
/// name it too (`KError::Module`) without `kresult` depending on
/// `drivers::loader`'s internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleError {
    /// The file's ELF header failed validation, or it isn't `ET_REL`.
    InvalidImage,
    /// The `.npkmodule` section, its metadata GUID, or the
    /// `module_metadata` struct itself couldn't be found.
    MissingMetadata,
    /// The metadata section contained zero driver manifests.
    NoManifests,
    /// A symbol referenced by a relocation has no definition in this
    /// module or in any already-loaded module's public symbols.
    UnresolvedSymbol,
    /// A section carried `SHT_REL` relocations; only `SHT_RELA` is
    /// supported.
    UnsupportedRelocation,
}
