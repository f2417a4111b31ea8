use proc_macro2::TokenStream;
use quote::quote;
use syn::{Ident, Type};

/// Get the base address for percpu variables of the current thread.
///
/// Percpu areas are addressed relative to `%gs:0`, which each core's boot
/// code points at its own percpu block.
pub fn get_percpu_pointer(percpu: &Ident, ty: &Type) -> TokenStream {
    quote! {
        {
            let base: *mut #ty;
            ::core::arch::asm!(
                "mov %gs:0, {base}",
                "add ${ident}, {base}",
                ident = sym #percpu,
                base = out(reg) base,
                options(att_syntax, nostack, preserves_flags)
            );
            base
        }
    }
}
