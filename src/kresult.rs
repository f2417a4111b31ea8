//! The outer-edge error umbrella. Every subsystem keeps its own tightly
//! typed, `Copy` status enum (`eonix_mm::vm::VmStatus`,
//! `eonix_mm::hat::MmuError`, `eonix_runtime::waitable::WaitStatus`, ...)
//! for internal callers to match exhaustively; `KError` exists only for
//! the handful of call sites that sit at a true boundary -- the driver
//! ABI (`npk_*` exports) and IOP completion -- where a caller on the
//! other side of that boundary needs one status type, not five.
//!
//! Per `spec.md` §7, nothing here is used to cross an ordinary
//! in-kernel call: a `VmSpace` method returns `VmStatus`, not `KError`,
//! and stays that way all the way up until a driver-facing wrapper
//! needs to hand the outcome across the ABI boundary.
use eonix_mm::hat::MmuError;
use eonix_mm::vm::VmStatus;
use eonix_runtime::waitable::WaitStatus;

pub use crate::drivers::ModuleError;

pub type KResult<T> = Result<T, KError>;

/// The outer-edge union of every subsystem status this kernel core
/// returns. Each variant is a plain wrap of the subsystem enum it came
/// from; nothing is stringly-typed and nothing is lossy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KError {
    Mmu(MmuError),
    Vm(VmStatus),
    Wait(WaitStatus),
    Module(ModuleError),
}

impl From<MmuError> for KError {
    fn from(err: MmuError) -> Self {
        KError::Mmu(err)
    }
}

impl From<VmStatus> for KError {
    fn from(err: VmStatus) -> Self {
        KError::Vm(err)
    }
}

impl From<WaitStatus> for KError {
    fn from(err: WaitStatus) -> Self {
        KError::Wait(err)
    }
}

impl From<ModuleError> for KError {
    fn from(err: ModuleError) -> Self {
        KError::Module(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_round_trip_the_source_variant() {
        let err: KError = VmStatus::Shortage.into();
        assert_eq!(err, KError::Vm(VmStatus::Shortage));

        let err: KError = MmuError::BadVaddr.into();
        assert_eq!(err, KError::Mmu(MmuError::BadVaddr));

        let err: KError = WaitStatus::Cancelled.into();
        assert_eq!(err, KError::Wait(WaitStatus::Cancelled));

        let err: KError = ModuleError::NoManifests.into();
        assert_eq!(err, KError::Module(ModuleError::NoManifests));
    }

    fn fallible_vm_op() -> KResult<()> {
        Err(VmStatus::InUse)?;
        Ok(())
    }

    #[test]
    fn question_mark_converts_through_from() {
        assert_eq!(fallible_vm_op(), Err(KError::Vm(VmStatus::InUse)));
    }
}
