/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

/* The swap drum (§6): no block-device driver is in scope, so the drum is a
 * fixed-size in-memory array of page-sized slots, with a Bitmap tracking
 * occupancy exactly as klib::bitmap's own doc comment anticipates. Slots
 * are uninterpreted raw page payloads; there is no on-disk recovery. */

use alloc::vec::Vec;
use spin::Mutex;

use crate::defines::PAGE_SIZE;
use crate::errors::ErrNO;
use crate::klib::bitmap::Bitmap;
use crate::types::vaddr_t;

pub struct SwapDrum {
    storage: Vec<[u8; PAGE_SIZE]>,
    bitmap: Bitmap,
    /* Backing words for `bitmap`'s storage pointer. Never resized after
     * init(), so the heap buffer Bitmap points into stays put. */
    bitmap_words: Vec<usize>,
    capacity: usize,
}

impl SwapDrum {
    pub const fn new() -> Self {
        Self {
            storage: Vec::new(),
            bitmap: Bitmap::new(),
            bitmap_words: Vec::new(),
            capacity: 0,
        }
    }

    pub fn init(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.storage = alloc::vec![[0u8; PAGE_SIZE]; capacity];

        let word_bits = usize::BITS as usize;
        let words = (capacity + word_bits - 1) / word_bits;
        self.bitmap_words = alloc::vec![0usize; words.max(1)];

        let base = self.bitmap_words.as_mut_ptr() as vaddr_t;
        self.bitmap.storage_init(base, self.bitmap_words.len() * core::mem::size_of::<usize>());
        self.bitmap.init(capacity);
    }

    pub fn alloc_slot(&mut self) -> Result<usize, ErrNO> {
        let slot = self.bitmap.scan_first_clear(0).ok_or(ErrNO::NoResources)?;
        self.bitmap.set(slot, slot + 1)?;
        Ok(slot)
    }

    pub fn free_slot(&mut self, slot: usize) {
        self.bitmap.clear(slot, slot + 1).unwrap();
    }

    pub fn write_page(&mut self, slot: usize, data: &[u8; PAGE_SIZE]) {
        self.storage[slot].copy_from_slice(data);
    }

    pub fn read_page(&self, slot: usize, out: &mut [u8; PAGE_SIZE]) {
        out.copy_from_slice(&self.storage[slot]);
    }
}

pub static SWAP_DRUM: Mutex<SwapDrum> = Mutex::new(SwapDrum::new());

pub fn swap_init(capacity: usize) {
    SWAP_DRUM.lock().init(capacity);
}
