//! Device API records (`spec.md` §4.10 "Device APIs"): a descriptor
//! becomes usable once a driver registers an API record of a matching
//! type against it. `npk_set_transport_api` additionally nominates one
//! as the I/O transport for everything beneath it in the tree, handled
//! by [`super::device_tree::set_transport_api`]/`transport_api`.
use alloc::collections::btree_map::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use eonix_sync::Spin;

use super::device_tree::DeviceId;
use super::iop::IopOps;

pub type ApiId = u64;

/// One registered API implementation: the device it's attached to, a
/// type tag drivers match on (`spec.md` leaves the set open -- each
/// subsystem defines its own, e.g. `"block"`, `"nic"`, `"framebuffer"`),
/// and the `begin_op`/`end_op`/`execute` triple the IOP dispatcher calls
/// through.
pub struct DeviceApi {
    pub device: DeviceId,
    pub api_type: &'static str,
    pub ops: Arc<dyn IopOps>,
}

static NEXT_API_ID: AtomicU64 = AtomicU64::new(1);
static APIS: Spin<BTreeMap<ApiId, DeviceApi>> = Spin::new(BTreeMap::new());

pub fn add_device_api(device: DeviceId, api_type: &'static str, ops: Arc<dyn IopOps>) -> ApiId {
    let id = NEXT_API_ID.fetch_add(1, Ordering::Relaxed);
    APIS.lock().insert(
        id,
        DeviceApi {
            device,
            api_type,
            ops,
        },
    );
    id
}

pub fn remove_device_api(id: ApiId) {
    APIS.lock().remove(&id);
}

pub fn find_by_device(device: DeviceId, api_type: &str) -> Option<ApiId> {
    APIS.lock()
        .iter()
        .find(|(_, api)| api.device == device && api.api_type == api_type)
        .map(|(id, _)| *id)
}

pub fn ops_for(id: ApiId) -> Option<Arc<dyn IopOps>> {
    APIS.lock().get(&id).map(|api| api.ops.clone())
}

/// Nominates `api` as the transport API for everything beneath `device`
/// in the device tree. Returns `false` if `device` doesn't exist.
pub fn set_transport_api(device: DeviceId, api: ApiId) -> bool {
    super::device_tree::set_transport_api(device, api)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::iop::{IopFrame, IopKind};

    struct NullOps;
    impl IopOps for NullOps {
        fn begin_op(&self, _device: DeviceId, _kind: IopKind, _frame: &mut IopFrame) -> bool {
            true
        }
        fn end_op(&self, _device: DeviceId, _kind: IopKind, _frame: &IopFrame) {}
        fn execute(&self, _device: DeviceId, _kind: IopKind, _buf: &mut [u8]) -> bool {
            true
        }
    }

    #[test]
    fn find_by_device_matches_type() {
        let id = add_device_api(7, "block", Arc::new(NullOps));
        assert_eq!(find_by_device(7, "block"), Some(id));
        assert_eq!(find_by_device(7, "nic"), None);
        remove_device_api(id);
        assert_eq!(find_by_device(7, "block"), None);
    }
}
