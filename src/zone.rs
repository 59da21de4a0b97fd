/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

/* Seeds the kernel heap's virtual-address arena from the boot heap span
 * reserved by the linker script, before cmpctmalloc ever asks for pages. */

use crate::debug::*;
use crate::defines::{_boot_heap, _boot_heap_end, PAGE_SIZE};
use crate::errors::ErrNO;
use crate::ZX_ASSERT;
use crate::BOOT_CONTEXT;

pub fn zone_init() -> Result<(), ErrNO> {
    let base = _boot_heap as usize;
    let end = _boot_heap_end as usize;
    ZX_ASSERT!(end > base);

    let size = end - base;
    dprintf!(INFO, "zone_init: boot heap [0x{:x}, 0x{:x})\n", base, end);

    BOOT_CONTEXT.init_virtual_alloc(base, size, PAGE_SIZE);

    Ok(())
}
