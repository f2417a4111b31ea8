//! Symbol store (`SPEC_FULL.md` §3, `spec.md`'s backtrace-only "resolve an
//! address to a name" supplement): sorted per-module public/private
//! function tables, used to turn a raw return address into a name in a
//! panic backtrace and to resolve a driver module's undefined externals
//! against another module's exported functions.
//!
//! Grounded on `original_source/kernel/services/SymbolStore.cpp`:
//! `IsPublicSymbol`'s visibility/binding test, `LoadKernelSymbols`'s
//! "walk every `STT_FUNC` symbol, split public vs private, track the
//! repo's overall address range" pass, and `FindSymbol`/
//! `FindDriverApiSymbol`'s linear repo-then-symbol scan (including the
//! original's own acknowledged quirk: symbols aren't always emitted
//! sorted by address, so the scan never breaks early on an address
//! mismatch, only on a name/range hit).
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use eonix_sync::Spin;

use crate::drivers::elf::{self, Elf64Ehdr, Elf64Shdr};
use crate::drivers::ModuleError;

const STT_FUNC: u8 = 2;
const STB_LOCAL: u8 = 0;
const STV_INTERNAL: u8 = 1;
const STV_HIDDEN: u8 = 2;

fn elf_st_type(info: u8) -> u8 {
    info & 0xf
}

fn elf_st_bind(info: u8) -> u8 {
    info >> 4
}

fn elf_st_visibility(other: u8) -> u8 {
    other & 0x3
}

/// `SymbolStore.cpp`'s `IsPublicSymbol`: a symbol is private if it's
/// hidden, internal, or local-bound with otherwise-default visibility.
fn is_public_symbol(st_info: u8, st_other: u8) -> bool {
    let visibility = elf_st_visibility(st_other);
    let binding = elf_st_bind(st_info);
    !(visibility == STV_HIDDEN
        || visibility == STV_INTERNAL
        || (visibility == 0 && binding == STB_LOCAL))
}

#[derive(Debug, Clone)]
pub struct SymbolInfo {
    pub base: usize,
    pub length: usize,
    pub name: String,
}

pub struct SymbolRepo {
    pub name: String,
    pub base: usize,
    pub length: usize,
    pub public_funcs: Vec<SymbolInfo>,
    pub private_funcs: Vec<SymbolInfo>,
}

pub struct SymbolView {
    pub repo_name: &'static str,
    pub symbol: SymbolInfo,
}

static REPOS: Spin<Vec<Arc<SymbolRepo>>> = Spin::new(Vec::new());

/// Inserts `repo`, keeping the list sorted by `base` the way
/// `SymbolStore.cpp`'s `InsertSorted` does -- `find_symbol_by_addr` relies
/// on this to skip repos whose range starts past the address it's
/// looking for.
fn insert_sorted(repos: &mut Vec<Arc<SymbolRepo>>, repo: Arc<SymbolRepo>) {
    let pos = repos.partition_point(|existing| existing.base < repo.base);
    repos.insert(pos, repo);
}

/// Scans every `SHT_SYMTAB` section in `data` for `STT_FUNC` symbols
/// defined in this image (skips `SHN_UNDEF`), classifies each as public
/// or private, and registers a new repo named `name` covering the
/// address range they span. Intended to run right after a module
/// finishes relocating (symbol values are absolute addresses by then),
/// or against a kernel image that carries its own symbol table.
pub fn register_symbols(name: String, data: &[u8], ehdr: &Elf64Ehdr) -> Result<(), ModuleError> {
    let mut public_funcs = Vec::new();
    let mut private_funcs = Vec::new();
    let mut base = usize::MAX;
    let mut end = 0usize;

    for index in 0..ehdr.e_shnum as usize {
        let symtab = elf::read_shdr(data, ehdr, index).ok_or(ModuleError::InvalidImage)?;
        if symtab.sh_type != elf::SHT_SYMTAB {
            continue;
        }
        let strtab =
            elf::read_shdr(data, ehdr, symtab.sh_link as usize).ok_or(ModuleError::InvalidImage)?;

        let entry_size = symtab.sh_entsize.max(1) as usize;
        let count = symtab.sh_size as usize / entry_size;

        for sym_index in 0..count {
            let sym = elf::sym_at(data, &symtab, sym_index).ok_or(ModuleError::InvalidImage)?;
            if sym.st_shndx == elf::SHN_UNDEF || elf_st_type(sym.st_info) != STT_FUNC {
                continue;
            }

            let sym_name = read_str(data, &strtab, sym.st_name as usize);
            let info = SymbolInfo {
                base: sym.st_value as usize,
                length: sym.st_size as usize,
                name: sym_name,
            };

            base = base.min(info.base);
            end = end.max(info.base + info.length);

            if is_public_symbol(sym.st_info, sym.st_other) {
                public_funcs.push(info);
            } else {
                private_funcs.push(info);
            }
        }
    }

    if base == usize::MAX {
        base = 0;
    }

    let mut repos = REPOS.lock();
    insert_sorted(
        &mut repos,
        Arc::new(SymbolRepo {
            name,
            base,
            length: end.saturating_sub(base),
            public_funcs,
            private_funcs,
        }),
    );
    Ok(())
}

fn read_str(data: &[u8], strtab: &Elf64Shdr, offset: usize) -> String {
    let start = strtab.sh_offset as usize + offset;
    let end = data[start..]
        .iter()
        .position(|b| *b == 0)
        .map(|n| start + n)
        .unwrap_or(data.len());
    core::str::from_utf8(&data[start..end])
        .unwrap_or("<invalid utf8>")
        .into()
}

fn find_in(funcs: &[SymbolInfo], addr: usize) -> Option<SymbolInfo> {
    funcs
        .iter()
        .find(|sym| addr >= sym.base && addr <= sym.base + sym.length)
        .cloned()
}

/// Resolves `addr` to the containing function's symbol, if any repo
/// claims it. Repos are sorted by `base`, but a repo's own symbols
/// aren't assumed sorted -- `SymbolStore.cpp` found that assumption
/// false in practice and scans every entry; this does the same.
pub fn find_symbol_by_addr(addr: usize) -> Option<(Arc<SymbolRepo>, SymbolInfo)> {
    let repos = REPOS.lock();
    for repo in repos.iter() {
        if repo.base > addr {
            break;
        }
        if addr > repo.base + repo.length {
            continue;
        }

        if let Some(sym) = find_in(&repo.public_funcs, addr) {
            return Some((repo.clone(), sym));
        }
        if let Some(sym) = find_in(&repo.private_funcs, addr) {
            return Some((repo.clone(), sym));
        }
    }
    None
}

/// `SymbolStore.cpp`'s `FindDriverApiSymbol`: resolves `name` against
/// every repo's public functions (optionally only the first -- the
/// kernel repo is always registered first, matching the original's
/// "kernel repo is always the first in the list" comment). Used by the
/// module loader to satisfy a driver's undefined externals against
/// already-loaded modules.
pub fn find_driver_api_symbol(name: &str, kernel_only: bool) -> Option<usize> {
    let repos = REPOS.lock();
    for repo in repos.iter() {
        if let Some(sym) = repo.public_funcs.iter().find(|sym| sym.name == name) {
            return Some(sym.base);
        }
        if kernel_only {
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(name: &str, base: usize, pub_funcs: &[(&str, usize, usize)]) -> Arc<SymbolRepo> {
        Arc::new(SymbolRepo {
            name: name.into(),
            base,
            length: 0x1000,
            public_funcs: pub_funcs
                .iter()
                .map(|(n, b, l)| SymbolInfo {
                    base: *b,
                    length: *l,
                    name: (*n).into(),
                })
                .collect(),
            private_funcs: Vec::new(),
        })
    }

    #[test]
    fn is_public_symbol_rejects_local_default_visibility() {
        let local_default = (STB_LOCAL << 4) | STT_FUNC;
        assert!(!is_public_symbol(local_default, 0));

        let global_default = (1u8 << 4) | STT_FUNC;
        assert!(is_public_symbol(global_default, 0));
    }

    #[test]
    fn insert_sorted_keeps_repos_ordered_by_base() {
        let mut repos = Vec::new();
        insert_sorted(&mut repos, repo("b", 0x2000, &[]));
        insert_sorted(&mut repos, repo("a", 0x1000, &[]));
        assert_eq!(repos[0].name, "a");
        assert_eq!(repos[1].name, "b");
    }

    #[test]
    fn find_driver_api_symbol_matches_by_name() {
        REPOS.lock().clear();
        REPOS
            .lock()
            .push(repo("kernel", 0, &[("npk_log", 0x8000, 0x40)]));

        assert_eq!(find_driver_api_symbol("npk_log", false), Some(0x8000));
        assert_eq!(find_driver_api_symbol("missing", false), None);
    }
}
