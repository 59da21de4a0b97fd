/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

/* PageSource is the interface a VmCowPages uses to populate pages that it
 * does not have resident, and to learn about pages it should write back.
 * Every VmCowPages created by this kernel is anonymous (there is no
 * user-pager support), so a PageSource is only ever consulted for its
 * |properties()| and is never actually asked to read pages in. Keeping
 * the type around, rather than deleting it outright, is what lets
 * VmCowPages::is_user_pager_backed() stay a real (if always-false) check
 * instead of an assumption baked into every call site. */

pub struct PageSourceProperties {
    pub is_user_pager: bool,
    pub is_preserving_page_content: bool,
}

pub struct PageSource {
    properties: PageSourceProperties,
}

impl PageSource {
    pub fn new() -> Self {
        Self {
            properties: PageSourceProperties {
                is_user_pager: false,
                is_preserving_page_content: false,
            },
        }
    }

    pub fn properties(&self) -> &PageSourceProperties {
        &self.properties
    }
}
