use std::sync::Weak;

/// An immutable, address-ordered, duplicate-free array of weak references.
///
/// Updates never modify an existing set; [`with`] and [`without_ptr`] return a
/// fresh copy, which lets a set be shared behind an atomic cell and replaced
/// with a compare-and-swap. Keeping the entries sorted by referent address
/// makes membership checks a binary search.
///
/// [`with`]: WeakSet::with
/// [`without_ptr`]: WeakSet::without_ptr
pub(crate) struct WeakSet<T> {
    items: Vec<Weak<T>>,
}

impl<T> WeakSet<T> {
    pub(crate) fn new() -> Self {
        WeakSet { items: Vec::new() }
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Weak<T>> {
        self.items.iter()
    }

    pub(crate) fn contains_ptr(&self, ptr: *const T) -> bool {
        self.search(ptr).is_ok()
    }

    /// Returns a copy of the set with `item` inserted in address order.
    /// Inserting a referent that is already present is a no-op copy.
    pub(crate) fn with(&self, item: Weak<T>) -> Self {
        match self.search(Weak::as_ptr(&item)) {
            Ok(_) => self.clone(),
            Err(at) => {
                let mut items = self.items.clone();
                items.insert(at, item);
                WeakSet { items }
            }
        }
    }

    /// Returns a copy of the set with the entry for `ptr` removed, if any.
    pub(crate) fn without_ptr(&self, ptr: *const T) -> Self {
        match self.search(ptr) {
            Ok(at) => {
                let mut items = self.items.clone();
                items.remove(at);
                WeakSet { items }
            }
            Err(_) => self.clone(),
        }
    }

    fn search(&self, ptr: *const T) -> Result<usize, usize> {
        self.items
            .binary_search_by_key(&(ptr as usize), |w| Weak::as_ptr(w) as usize)
    }
}

impl<T> Clone for WeakSet<T> {
    fn clone(&self) -> Self {
        WeakSet {
            items: self.items.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_with_keeps_address_order() {
        let handles: Vec<Arc<u32>> = (0..8).map(Arc::new).collect();
        let mut set = WeakSet::new();
        for arc in handles.iter().rev() {
            set = set.with(Arc::downgrade(arc));
        }
        assert!(set.len() == 8);
        let addrs: Vec<usize> = set.iter().map(|w| Weak::as_ptr(w) as usize).collect();
        let mut sorted = addrs.clone();
        sorted.sort_unstable();
        assert_eq!(addrs, sorted);
    }

    #[test]
    fn test_with_deduplicates() {
        let a = Arc::new(1u32);
        let set = WeakSet::new()
            .with(Arc::downgrade(&a))
            .with(Arc::downgrade(&a));
        assert!(set.len() == 1);
    }

    #[test]
    fn test_without_ptr_removes_only_the_target() {
        let a = Arc::new(1u32);
        let b = Arc::new(2u32);
        let set = WeakSet::new()
            .with(Arc::downgrade(&a))
            .with(Arc::downgrade(&b));
        let removed = set.without_ptr(Arc::as_ptr(&a));
        assert!(removed.len() == 1);
        assert!(!removed.contains_ptr(Arc::as_ptr(&a)));
        assert!(removed.contains_ptr(Arc::as_ptr(&b)));
        // the original copy is untouched
        assert!(set.len() == 2);
    }

    #[test]
    fn test_without_ptr_is_a_noop_for_absent_entries() {
        let a = Arc::new(1u32);
        let b = Arc::new(2u32);
        let set = WeakSet::new().with(Arc::downgrade(&a));
        assert!(set.without_ptr(Arc::as_ptr(&b)).len() == 1);
    }
}
