/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

use cmpct::test_cmpct;
use dispatch::test_dispatch;
use heap::test_heap;
use mutex::test_mutex;
use sched::test_sched;
use swap::test_swap;
use vad::test_vad;
use wsl::test_wsl;

mod cmpct;
mod dispatch;
mod heap;
mod mutex;
mod sched;
mod swap;
mod vad;
mod wsl;

#[cfg(feature = "unittest")]
pub fn do_tests() {
    println!("\n[TESTS: start ...]\n");
    test_heap();
    test_mutex();
    test_cmpct();
    test_dispatch();
    test_sched();
    test_vad();
    test_wsl();
    test_swap();
    println!("\n[TESTS: finished!]\n");
}
