//! Common imports pulled into scope with `use crate::prelude::*;`,
//! mirroring the teacher's own minimal prelude. Logging macros come in
//! via `#[macro_use] extern crate eonix_log` at the crate root instead of
//! through here, since `#[macro_export]` macros are already crate-global.
#[allow(unused_imports)]
pub(crate) use alloc::{boxed::Box, string::String, vec, vec::Vec};

#[allow(unused_imports)]
pub(crate) use core::{any::Any, fmt::Write, marker::PhantomData, str};

#[allow(unused_imports)]
pub use crate::kresult::{KError, KResult};
