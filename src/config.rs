/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

/* Build-time configuration for the qemu "virt" riscv64 target.
 * This stands in for the generated config that a full build system
 * would normally produce from board/arch selection. */

#![allow(non_upper_case_globals)]
#![allow(dead_code)]

pub const _CONFIG_PAGE_SHIFT: usize = 12;

/* -1GB: kernel lives in the top gigabyte of the Sv39 address space. */
pub const _CONFIG_KERNEL_BASE: usize = 0xffff_ffc0_8020_0000;

/* Size of the region reserved for the linear (phys)map of all physical memory. */
pub const _CONFIG_ARCH_PHYSMAP_SIZE: usize = 0x0040_0000_0000;

/* Sv39: 3 levels of page tables. */
pub const _CONFIG_MMU_MAX_LEVEL: usize = 3;

/* Base of the kernel's half of the address space. */
pub const _CONFIG_KERNEL_ASPACE_BASE: usize = 0xffff_ffc0_0000_0000;

pub const _CONFIG_HEAP_MAX_SIZE_MB: usize = 64;
pub const _CONFIG_ARCH_HEAP_ALIGN_BITS: usize = 3;

/* qemu virt machine, -smp 4 */
pub const _CONFIG_NR_CPUS: usize = 4;

/* Number of page-sized slots in the in-memory swap drum (vm::swap). */
pub const _CONFIG_SWAP_DRUM_SLOTS: usize = 256;
