use eonix_hal_traits::trap::IsRawTrapContext;

pub use crate::arch::{disable_irqs_save, enable_irqs, IrqState, TrapContext};

struct _CheckTrapContext(IsRawTrapContext<TrapContext>);
