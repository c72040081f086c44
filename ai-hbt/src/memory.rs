//! Per-instance memory block.
//!
//! One allocation holds every state, service, and conditional of an instance
//! at the byte offsets the template assigned. Construction and destruction
//! follow the template's init order; nothing else in the crate touches raw
//! memory.

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use tracing::debug;

use crate::template::Template;

pub(crate) struct InstanceMemory<D, C> {
    template: Arc<Template<D, C>>,
    base: NonNull<u8>,
    layout: Layout,
    /// Leading entries of the init order that hold live values.
    constructed: usize,
}

// SAFETY: every component type is `Send`, the block is uniquely owned, and
// the template is immutable behind its `Arc`.
unsafe impl<D, C> Send for InstanceMemory<D, C> {}

impl<D, C> InstanceMemory<D, C> {
    /// Allocates the block and constructs every component in init order.
    ///
    /// If a constructor panics, the components built so far are dropped and
    /// the block is freed before the panic continues.
    pub(crate) fn new(template: Arc<Template<D, C>>) -> Self {
        let layout = template.block_layout();
        let base = if layout.size() == 0 {
            // Only zero-sized components: any aligned non-null address works.
            // SAFETY: `align` is a power of two, never zero.
            unsafe { NonNull::new_unchecked(ptr::without_provenance_mut(layout.align())) }
        } else {
            // SAFETY: `layout` has a non-zero size.
            let raw = unsafe { alloc::alloc(layout) };
            match NonNull::new(raw) {
                Some(base) => base,
                None => alloc::handle_alloc_error(layout),
            }
        };

        let mut memory = Self {
            template,
            base,
            layout,
            constructed: 0,
        };

        let template = Arc::clone(&memory.template);
        for &id in template.init_order() {
            let (component, offset) = template.component(id);
            let slot = memory.slot(offset);
            // SAFETY: the compiler placed `offset` inside the block, aligned
            // for this component, and no other component overlaps it.
            unsafe { component.construct(slot) };
            memory.constructed += 1;
        }

        debug!(
            size = layout.size(),
            align = layout.align(),
            components = memory.constructed,
            "constructed instance memory"
        );
        memory
    }

    pub(crate) fn template(&self) -> &Arc<Template<D, C>> {
        &self.template
    }

    /// Pointer to the component stored at `offset`.
    pub(crate) fn slot(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset <= self.layout.size());
        // SAFETY: offsets come from the template that sized this block.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) }
    }
}

impl<D, C> Drop for InstanceMemory<D, C> {
    fn drop(&mut self) {
        let init = self.template.init_order();
        for &id in init[..self.constructed].iter().rev() {
            let (component, offset) = self.template.component(id);
            // SAFETY: the first `constructed` entries hold live values.
            unsafe { component.destruct(self.slot(offset)) };
        }
        if self.layout.size() != 0 {
            // SAFETY: `base` was allocated with `layout`.
            unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) };
        }
    }
}
