//! IOP dispatch (`spec.md` §4.10 "IOP dispatch"): the kernel walks from a
//! target device up to its transport API, calling each level's
//! `begin_op` with a fresh [`IopFrame`] (top-down). If any level refuses,
//! the IOP fails and every already-begun frame rolls back via `end_op`
//! in reverse. Otherwise the bottommost transport executes the transfer
//! and every frame's `end_op` runs bottom-up.
//!
//! IOPs carry no dynamic memory on the hot path: a walk's frames live in
//! a fixed-size stack array bounded by [`MAX_IOP_DEPTH`], never a `Vec`.
use super::device_tree::DeviceId;

/// Device trees in practice are a handful of levels deep (bus -> bridge
/// -> function -> transport); this is generous headroom over that.
pub const MAX_IOP_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IopKind {
    Read { offset: u64, len: usize },
    Write { offset: u64, len: usize },
}

/// Scratch state one level of the walk hands to its own `begin_op`/
/// `end_op`; opaque to everyone except the level that set it.
#[derive(Debug, Clone, Copy, Default)]
pub struct IopFrame {
    pub context: usize,
}

pub trait IopOps: Send + Sync {
    /// Top-down pass: prepare this level for `kind`, recording anything
    /// `end_op` will need in `frame`. Returning `false` aborts the IOP.
    fn begin_op(&self, device: DeviceId, kind: IopKind, frame: &mut IopFrame) -> bool;

    /// Bottom-up pass: release/commit whatever `begin_op` set up. Called
    /// on every level that succeeded, including during rollback of a
    /// failed IOP.
    fn end_op(&self, device: DeviceId, kind: IopKind, frame: &IopFrame);

    /// Only ever called on the bottommost (transport) level, once every
    /// `begin_op` in the walk has succeeded.
    fn execute(&self, device: DeviceId, kind: IopKind, buf: &mut [u8]) -> bool;
}

/// One level of a resolved IOP walk: a device id paired with the API
/// implementation to call for it. Built by the caller (typically from
/// [`super::device_tree::ancestry`] plus [`super::api::ops_for`]) before
/// `begin_iop` ever runs, so the dispatch itself never has to look
/// anything up.
#[derive(Clone, Copy)]
pub struct IopLevel<'a> {
    pub device: DeviceId,
    pub ops: &'a dyn IopOps,
}

/// A begun IOP: `execute` on the last level in `path`, then always
/// finish with [`end_iop`].
pub struct IopTransaction<'a> {
    path: &'a [IopLevel<'a>],
    frames: [IopFrame; MAX_IOP_DEPTH],
    kind: IopKind,
}

impl<'a> IopTransaction<'a> {
    pub fn kind(&self) -> IopKind {
        self.kind
    }

    pub fn execute(&self, buf: &mut [u8]) -> bool {
        match self.path.last() {
            Some(bottom) => bottom.ops.execute(bottom.device, self.kind, buf),
            None => false,
        }
    }
}

/// `spec.md`'s `BeginIop`: walks `path` top-down, calling `begin_op` on
/// each level. On the first refusal, already-begun levels are rolled
/// back (`end_op`, reverse order) and `Err(failed_at)` is returned with
/// the index that refused.
pub fn begin_iop<'a>(path: &'a [IopLevel<'a>], kind: IopKind) -> Result<IopTransaction<'a>, usize> {
    assert!(
        path.len() <= MAX_IOP_DEPTH,
        "IOP path deeper than MAX_IOP_DEPTH"
    );

    let mut frames = [IopFrame::default(); MAX_IOP_DEPTH];

    for (depth, level) in path.iter().enumerate() {
        if level.ops.begin_op(level.device, kind, &mut frames[depth]) {
            continue;
        }

        for rollback in (0..depth).rev() {
            path[rollback]
                .ops
                .end_op(path[rollback].device, kind, &frames[rollback]);
        }
        return Err(depth);
    }

    Ok(IopTransaction { path, frames, kind })
}

/// `spec.md`'s `EndIop`: runs `end_op` on every level bottom-up.
pub fn end_iop(txn: IopTransaction<'_>) {
    for depth in (0..txn.path.len()).rev() {
        txn.path[depth]
            .ops
            .end_op(txn.path[depth].device, txn.kind, &txn.frames[depth]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingOps {
        refuse: bool,
        begins: AtomicUsize,
        ends: AtomicUsize,
    }

    impl IopOps for RecordingOps {
        fn begin_op(&self, _device: DeviceId, _kind: IopKind, _frame: &mut IopFrame) -> bool {
            self.begins.fetch_add(1, Ordering::Relaxed);
            !self.refuse
        }
        fn end_op(&self, _device: DeviceId, _kind: IopKind, _frame: &IopFrame) {
            self.ends.fetch_add(1, Ordering::Relaxed);
        }
        fn execute(&self, _device: DeviceId, _kind: IopKind, _buf: &mut [u8]) -> bool {
            true
        }
    }

    #[test]
    fn successful_walk_runs_every_level() {
        let bottom = RecordingOps {
            refuse: false,
            begins: AtomicUsize::new(0),
            ends: AtomicUsize::new(0),
        };
        let top = RecordingOps {
            refuse: false,
            begins: AtomicUsize::new(0),
            ends: AtomicUsize::new(0),
        };
        let path = [
            IopLevel { device: 1, ops: &top },
            IopLevel { device: 2, ops: &bottom },
        ];

        let kind = IopKind::Read { offset: 0, len: 4 };
        let txn = begin_iop(&path, kind).unwrap();
        let mut buf = [0u8; 4];
        assert!(txn.execute(&mut buf));
        end_iop(txn);

        assert_eq!(top.begins.load(Ordering::Relaxed), 1);
        assert_eq!(top.ends.load(Ordering::Relaxed), 1);
        assert_eq!(bottom.begins.load(Ordering::Relaxed), 1);
        assert_eq!(bottom.ends.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn refusal_rolls_back_completed_levels() {
        let bottom = RecordingOps {
            refuse: true,
            begins: AtomicUsize::new(0),
            ends: AtomicUsize::new(0),
        };
        let top = RecordingOps {
            refuse: false,
            begins: AtomicUsize::new(0),
            ends: AtomicUsize::new(0),
        };
        let path = [
            IopLevel { device: 1, ops: &top },
            IopLevel { device: 2, ops: &bottom },
        ];

        let kind = IopKind::Write { offset: 0, len: 4 };
        let err = begin_iop(&path, kind).unwrap_err();
        assert_eq!(err, 1);

        assert_eq!(top.begins.load(Ordering::Relaxed), 1);
        assert_eq!(top.ends.load(Ordering::Relaxed), 1);
        assert_eq!(bottom.begins.load(Ordering::Relaxed), 1);
        assert_eq!(bottom.ends.load(Ordering::Relaxed), 0);
    }
}
