//! Reference-counted handles.
//!
//! A [`Ref`] owns a heap value together with a plain (non-atomic) count.
//! Sharing a handle increments the count, dropping or releasing it
//! decrements the count, and the value is destroyed exactly once, when the
//! count goes from 1 to 0.
//!
//! A handle can be pinned: its count is forced to [`REF_MAX`], after which
//! sharing and releasing no longer touch the count and the value is never
//! destroyed. Counts that reach the sentinel by sharing are pinned as well.
//!
//! Handles are neither `Send` nor `Sync`; callers that need a handle on
//! more than one thread must serialize access to the whole owning driver.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;

/// Saturation sentinel: a handle whose count equals this value is immortal.
pub const REF_MAX: u32 = u32::MAX;

struct RefBox<T> {
    count: Cell<u32>,
    value: T,
}

/// Shared handle with a saturating reference count.
pub struct Ref<T> {
    ptr: NonNull<RefBox<T>>,
    _owns: PhantomData<RefBox<T>>,
}

impl<T> Ref<T> {
    /// Allocates `value` with a count of 1.
    pub fn make(value: T) -> Self {
        let boxed = Box::new(RefBox {
            count: Cell::new(1),
            value,
        });
        Self {
            ptr: NonNull::from(Box::leak(boxed)),
            _owns: PhantomData,
        }
    }

    /// Allocates a default-initialized value with a count of 1.
    pub fn make_default() -> Self
    where
        T: Default,
    {
        Self::make(T::default())
    }

    fn inner(&self) -> &RefBox<T> {
        // SAFETY: the box stays allocated while any handle exists; it is
        // only freed by the drop that takes the count from 1 to 0.
        unsafe { self.ptr.as_ref() }
    }

    /// Takes another reference; a pinned handle's count is left alone.
    pub fn share(this: &Self) -> Self {
        let count = &this.inner().count;
        if count.get() != REF_MAX {
            count.set(count.get() + 1);
        }
        Self {
            ptr: this.ptr,
            _owns: PhantomData,
        }
    }

    /// Releases the reference held in `slot`, always leaving `None` behind.
    pub fn release(slot: &mut Option<Self>) {
        drop(slot.take());
    }

    /// Makes the value immortal.
    pub fn pin(this: &Self) {
        this.inner().count.set(REF_MAX);
    }

    pub fn is_pinned(this: &Self) -> bool {
        this.inner().count.get() == REF_MAX
    }

    /// Current count; [`REF_MAX`] for pinned handles.
    pub fn ref_count(this: &Self) -> u32 {
        this.inner().count.get()
    }

    /// True when both handles refer to the same allocation.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.ptr == b.ptr
    }
}

impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Ref::share(self)
    }
}

impl<T> Deref for Ref<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner().value
    }
}

impl<T> Drop for Ref<T> {
    fn drop(&mut self) {
        let count = self.inner().count.get();
        if count == REF_MAX {
            return;
        }
        assert!(count > 0, "released a handle with no outstanding references");
        self.inner().count.set(count - 1);
        if count == 1 {
            // SAFETY: this was the last reference; the pointer came from
            // Box::leak in `make` and is not used again.
            unsafe { drop(Box::from_raw(self.ptr.as_ptr())) };
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("count", &self.inner().count.get())
            .field("value", &self.inner().value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::rc::Rc;

    struct DropCounter(Rc<Cell<usize>>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_make_starts_at_one() {
        let h = Ref::make(5u32);
        assert_eq!(Ref::ref_count(&h), 1);
        assert_eq!(*h, 5);
    }

    #[test]
    fn test_make_default() {
        let h: Ref<Vec<u8>> = Ref::make_default();
        assert!(h.is_empty());
    }

    #[test]
    fn test_single_release_frees_once() {
        let drops = Rc::new(Cell::new(0));
        let mut slot = Some(Ref::make(DropCounter(drops.clone())));

        Ref::release(&mut slot);
        assert!(slot.is_none());
        assert_eq!(drops.get(), 1);

        // releasing an empty slot is harmless
        Ref::release(&mut slot);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_shared_handle_freed_on_last_release() {
        let drops = Rc::new(Cell::new(0));
        let a = Ref::make(DropCounter(drops.clone()));
        let b = Ref::share(&a);
        let c = b.clone();
        assert_eq!(Ref::ref_count(&a), 3);
        assert!(Ref::ptr_eq(&a, &c));

        drop(a);
        drop(c);
        assert_eq!(drops.get(), 0);
        assert_eq!(Ref::ref_count(&b), 1);

        drop(b);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_pinned_handle_never_freed() {
        let drops = Rc::new(Cell::new(0));
        let h = Ref::make(DropCounter(drops.clone()));
        Ref::pin(&h);
        assert!(Ref::is_pinned(&h));

        for _ in 0..10 {
            let mut extra = Some(Ref::share(&h));
            assert_eq!(Ref::ref_count(&h), REF_MAX);
            Ref::release(&mut extra);
        }
        drop(h);
        assert_eq!(drops.get(), 0);
    }

    #[test]
    fn test_distinct_allocations_not_ptr_eq() {
        let a = Ref::make(1);
        let b = Ref::make(1);
        assert!(!Ref::ptr_eq(&a, &b));
    }
}
