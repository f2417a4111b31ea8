//! `DeviceDescriptor` forest (`spec.md` §4.10 "Device tree"): every
//! descriptor carries the `LoadName`s a producer attached to it (PCI
//! class triple, PCI vendor/device pair, DTB compat string, ACPI HID/CID)
//! plus an optional parent. The PCI enumerator, DTB walker and ACPI
//! parser that actually populate this tree are external collaborators --
//! concrete bus/firmware producers are out of scope here (`SPEC_FULL.md`
//! Non-goals) -- this module only owns the forest itself and the
//! add/remove choke point the module loader's matching step hooks.
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use eonix_sync::Spin;

use super::api::ApiId;

pub type DeviceId = u64;

/// One of the ways a driver manifest declares compatibility with a
/// [`DeviceDescriptor`]. A single descriptor may carry more than one --
/// a PCI function exposes both its class triple and its vendor/device
/// pair, and either may be what a given manifest matches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadName {
    PciClass { base: u8, sub: u8, interface: u8 },
    PciDevice { vendor: u16, device: u16 },
    DtbCompatible(String),
    AcpiHid(String),
    AcpiCid(String),
}

struct DeviceDescriptor {
    parent: Option<DeviceId>,
    friendly_name: String,
    load_names: Vec<LoadName>,
    /// Set by `npk_set_transport_api`; inherited by every descendant that
    /// doesn't set its own.
    transport_api: Option<ApiId>,
}

struct DeviceTree {
    nodes: Vec<(DeviceId, DeviceDescriptor)>,
}

impl DeviceTree {
    const fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    fn get(&self, id: DeviceId) -> Option<&DeviceDescriptor> {
        self.nodes.iter().find(|(node_id, _)| *node_id == id).map(|(_, d)| d)
    }

    fn get_mut(&mut self, id: DeviceId) -> Option<&mut DeviceDescriptor> {
        self.nodes
            .iter_mut()
            .find(|(node_id, _)| *node_id == id)
            .map(|(_, d)| d)
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);
static TREE: Spin<DeviceTree> = Spin::new(DeviceTree::new());

/// Registers a new descriptor, optionally parented under an existing one.
/// Runs every loaded manifest's matching logic against it before
/// returning (`spec.md` §4.10 "Matching").
pub fn add_device_desc(
    friendly_name: String,
    parent: Option<DeviceId>,
    load_names: Vec<LoadName>,
) -> DeviceId {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);

    {
        let mut tree = TREE.lock();
        tree.nodes.push((
            id,
            DeviceDescriptor {
                parent,
                friendly_name,
                load_names,
                transport_api: None,
            },
        ));
    }

    super::loader::notify_device_added(id);
    id
}

pub fn remove_device_desc(id: DeviceId) {
    TREE.lock().nodes.retain(|(node_id, _)| *node_id != id);
}

pub fn load_names(id: DeviceId) -> Vec<LoadName> {
    TREE.lock()
        .get(id)
        .map(|d| d.load_names.clone())
        .unwrap_or_default()
}

pub fn friendly_name(id: DeviceId) -> Option<String> {
    TREE.lock().get(id).map(|d| d.friendly_name.clone())
}

pub fn set_transport_api(id: DeviceId, api: ApiId) -> bool {
    match TREE.lock().get_mut(id) {
        Some(desc) => {
            desc.transport_api = Some(api);
            true
        }
        None => false,
    }
}

/// Walks from `id` up through its ancestors, returning the nearest
/// explicitly-set transport API -- a child with no transport of its own
/// inherits whatever its closest ancestor nominated.
pub fn transport_api(id: DeviceId) -> Option<ApiId> {
    let tree = TREE.lock();
    let mut current = Some(id);

    while let Some(node_id) = current {
        let desc = tree.get(node_id)?;
        if let Some(api) = desc.transport_api {
            return Some(api);
        }
        current = desc.parent;
    }

    None
}

/// The chain of device ids from `id` up to (and including) the root
/// ancestor, nearest first -- the order the IOP dispatcher walks in
/// reverse (root-to-target is top-down; this is target-to-root).
pub fn ancestry(id: DeviceId) -> Vec<DeviceId> {
    let tree = TREE.lock();
    let mut chain = Vec::new();
    let mut current = Some(id);

    while let Some(node_id) = current {
        chain.push(node_id);
        current = tree.get(node_id).and_then(|d| d.parent);
    }

    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_api_inherits_from_ancestor() {
        let root = add_device_desc(String::from("bus0"), None, Vec::new());
        let child = add_device_desc(String::from("func0"), Some(root), Vec::new());

        assert_eq!(transport_api(child), None);
        assert!(set_transport_api(root, 42));
        assert_eq!(transport_api(child), Some(42));
        assert_eq!(transport_api(root), Some(42));

        remove_device_desc(child);
        remove_device_desc(root);
    }

    #[test]
    fn ancestry_walks_to_root() {
        let root = add_device_desc(String::from("root"), None, Vec::new());
        let mid = add_device_desc(String::from("mid"), Some(root), Vec::new());
        let leaf = add_device_desc(String::from("leaf"), Some(mid), Vec::new());

        assert_eq!(ancestry(leaf), alloc::vec![leaf, mid, root]);

        remove_device_desc(leaf);
        remove_device_desc(mid);
        remove_device_desc(root);
    }
}
