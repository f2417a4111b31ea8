#![no_std]
#![feature(allocator_api)]

extern crate alloc;

pub mod address;
pub mod amap;
pub mod hat;
pub mod page_table;
pub mod paging;
pub mod pma_cache;
pub mod vm;
