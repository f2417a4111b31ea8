//! Arch selection. Every other top-level module in this crate (`context`,
//! `mm`, `trap`, `device`, `processor`) is a thin `pub use` of whichever of
//! these three gets selected for the build's `target_arch`.
use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        mod x86_64;
        pub use x86_64::*;
        pub use x86_64::trap::{disable_irqs_save, enable_irqs, IrqState, TrapContext};
    } else if #[cfg(target_arch = "riscv64")] {
        mod riscv64;
        pub use riscv64::*;
        pub use riscv64::trap::{disable_irqs_save, enable_irqs, IrqState, TrapContext};
    } else if #[cfg(target_arch = "loongarch64")] {
        mod loongarch64;
        pub use loongarch64::*;
        pub use loongarch64::trap::{disable_irqs_save, enable_irqs, IrqState, TrapContext};
    } else {
        compile_error!("eonix_hal has no backend for this target architecture");
    }
}
