/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

use crate::defines::PAGE_SIZE;
use crate::vm::swap::SWAP_DRUM;

pub fn test_swap() {
    test_alloc_write_read_free();
}

/* A page written to a freshly allocated slot reads back unchanged, and
 * freeing the slot makes it available for reuse. */
fn test_alloc_write_read_free() {
    println!(" Test: swap drum alloc/write/read/free ...");

    let mut drum = SWAP_DRUM.lock();

    let slot = drum.alloc_slot().expect("alloc_slot");

    let mut data = [0u8; PAGE_SIZE];
    for (i, b) in data.iter_mut().enumerate() {
        *b = (i % 256) as u8;
    }
    drum.write_page(slot, &data);

    let mut out = [0u8; PAGE_SIZE];
    drum.read_page(slot, &mut out);
    assert!(out == data);

    drum.free_slot(slot);
    let slot2 = drum.alloc_slot().expect("alloc_slot reuse");
    assert!(slot2 == slot);
    drum.free_slot(slot2);

    println!(" Test: swap drum alloc/write/read/free ok!\n");
}
