use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(target_arch = "riscv64")] {
        pub use crate::arch::fdt::{get_global_fdt, init_dtb_and_fdt, HartInfo};
    }
}
