//! Shared, mutable runtime objects.
//!
//! Environments and pairs are aliased freely at runtime: a closure and its
//! defining scope hold the same frame, and `set-car!` mutates a pair that
//! other values still reference. Execution is single threaded, so shared
//! mutation is `Rc<RefCell>` behind one newtype.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

pub struct Handle<T> {
    inner: Rc<RefCell<T>>,
}

impl<T> Handle<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(value)),
        }
    }

    /// Borrow the value immutably.
    ///
    /// # Panics
    ///
    /// Panics if a mutable borrow is live.
    #[inline(always)]
    pub fn borrow(&self) -> Ref<'_, T> {
        self.inner.borrow()
    }

    /// Borrow the value mutably.
    ///
    /// Takes `&self`: aliased handles are the point of this type, so
    /// exclusivity is enforced by the dynamic borrow check, not by `&mut`.
    ///
    /// # Panics
    ///
    /// Panics if any other borrow is live.
    #[inline(always)]
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.inner.borrow_mut()
    }

    /// Whether two handles alias the same allocation.
    ///
    /// This is the identity half of value equality: pairs compare
    /// structurally only after this check fails.
    #[inline]
    pub fn ptr_eq(&self, other: &Handle<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Cloning shares the allocation; the value itself is never copied.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Debug output must not panic on a value that is mid-mutation.
        match self.inner.try_borrow() {
            Ok(value) => fmt::Debug::fmt(&*value, f),
            Err(_) => f.write_str("<borrowed>"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_clone_aliases() {
        let a = Handle::new(1);
        let b = a.clone();
        *b.borrow_mut() = 2;

        assert_eq!(*a.borrow(), 2);
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&Handle::new(2)));
    }
}
