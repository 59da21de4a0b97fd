/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

#![no_std]
#![no_main]
#![feature(negative_impls)]

extern crate alloc;

use core::arch::global_asm;
use core::panic::PanicInfo;

pub mod align;
pub mod allocator;
pub mod arch;
pub mod aspace;
pub mod boot_context;
pub mod config;
pub mod cpu;
pub mod debug;
pub mod defines;
pub mod dispatch;
pub mod dpc;
pub mod errors;
pub mod ipl;
pub mod klib;
pub mod locking;
pub mod mp;
pub mod page;
pub mod panic;
pub mod percpu;
pub mod platform;
pub mod pmm;
pub mod sched;
pub mod stdio;
#[cfg(feature = "unittest")]
pub mod tests;
pub mod thread;
pub mod timer;
pub mod types;
pub mod vm;
pub mod vm_page_state;
pub mod zone;

/* Hoist the most frequently used items to the crate root so that modules
 * deep in the tree (vm::*, klib::*, dispatch::*) can refer to them as
 * `crate::Foo` instead of spelling out the full path every time, the way
 * the rest of this tree already assumes. */
pub use boot_context::BOOT_CONTEXT;
pub use config::*;
pub use defines::*;
pub use errors::ErrNO;
pub use types::*;

global_asm!(include_str!("arch/riscv64/start.S"));

/* container_of!(ptr, Type, field) recovers a pointer to the enclosing
 * Type from a pointer to one of its fields. Used by every intrusive
 * list node (ListNode, RBTree node) to get back from the node to the
 * object that embeds it. Must be invoked from an `unsafe` block: the
 * caller is asserting that `ptr` really does point at `field` inside
 * a live `Type`. */
#[macro_export]
macro_rules! container_of {
    ($ptr: expr, $type: ty, $field: ident) => {{
        let dummy = core::mem::MaybeUninit::<$type>::uninit();
        let dummy_base = dummy.as_ptr() as usize;
        let field_ptr = core::ptr::addr_of!((*dummy.as_ptr()).$field) as usize;
        let offset = field_ptr - dummy_base;
        let base = ($ptr).as_ptr() as *mut u8;
        core::ptr::NonNull::new_unchecked(base.sub(offset) as *mut $type)
    }};
}

fn kernel_init() -> Result<(), ErrNO> {
    crate::platform::platform_early_init();

    crate::thread::thread_init_early();

    crate::aspace::vm_init_preheap()?;
    crate::vm::vm::vm_init()?;

    crate::zone::zone_init()?;
    crate::klib::cmpctmalloc::cmpct_init()?;

    crate::mp::mp_init()?;

    crate::dpc::dpc_init();
    crate::sched::timer_init();

    crate::vm::swap::swap_init(_CONFIG_SWAP_DRUM_SLOTS);

    #[cfg(feature = "unittest")]
    crate::tests::do_tests();

    Ok(())
}

#[no_mangle]
fn lk_main() -> ! {
    if let Err(e) = kernel_init() {
        panic!("kernel_init failed: {:?}", e);
    }

    println!("kernel init done, idling\n");
    loop {
        crate::sched::idle_tick();
        crate::vm::cleaner::maybe_run();
        crate::vm::pagedaemon::maybe_run();
        core::hint::spin_loop();
    }
}

#[allow(dead_code)]
fn _unused(_info: &PanicInfo) {}
