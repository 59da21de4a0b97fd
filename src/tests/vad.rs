/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

use crate::aspace::kernel_aspace;
use crate::defines::PAGE_SIZE;
use crate::vm::vm::{ARCH_MMU_FLAG_PERM_READ, ARCH_MMU_FLAG_PERM_WRITE};
use crate::vm::vm_object_paged::VmObjectPaged;
use crate::pmm::PMM_ALLOC_FLAG_ANY;

pub fn test_vad() {
    test_map_find_deallocate();
}

/* allocate() installs a VAD findable at every page inside it;
 * deallocate() removes it and the address stops resolving. */
fn test_map_find_deallocate() {
    println!(" Test: vad map/find/deallocate ...");

    let size = 4 * PAGE_SIZE;
    let object = VmObjectPaged::create(PMM_ALLOC_FLAG_ANY, 0, size).expect("vmo create");

    let prot = ARCH_MMU_FLAG_PERM_READ | ARCH_MMU_FLAG_PERM_WRITE;

    let mut aspace = kernel_aspace();
    let aspace_ref = unsafe { aspace.as_mut() };
    let root_vmar = unsafe { &mut *aspace_ref.root_vmar() };

    let base = root_vmar.allocate(object, size, prot, None).expect("allocate");

    assert!(root_vmar.find_mapping(base).is_some());
    assert!(root_vmar.find_mapping(base + size - 1).is_some());

    aspace_ref.destroy_mapping(base, size).expect("destroy_mapping");
    assert!(root_vmar.find_mapping(base).is_none());

    println!(" Test: vad map/find/deallocate ok!\n");
}
