use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use tracing::debug;

/// A resource that must be released when it falls out of a cache.
pub trait Closable {
    fn close(&mut self);
}

/// Fixed-capacity least-recently-used map. Lookups through `get`/`get_mut`
/// count as a use; `peek` does not.
pub struct BoundedCache<K: Hash + Eq, V> {
    inner: LruCache<K, V>,
}

impl<K: Hash + Eq, V> BoundedCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: LruCache::new(cap),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.cap().get()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.contains(key)
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.inner.get_mut(key)
    }

    pub fn peek(&self, key: &K) -> Option<&V> {
        self.inner.peek(key)
    }

    /// Removes the least-recently-used entry if inserting `key` would exceed
    /// capacity. Returns the removed entry.
    pub fn make_room_for(&mut self, key: &K) -> Option<(K, V)> {
        if self.inner.contains(key) || self.inner.len() < self.capacity() {
            return None;
        }
        self.inner.pop_lru()
    }

    /// Inserts as most recently used. Returns the previous value when `key`
    /// was already present; an entry evicted to make room is dropped.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let _ = self.make_room_for(&key);
        self.inner.put(key, value)
    }

    pub fn remove_oldest(&mut self) -> Option<V> {
        self.inner.pop_lru().map(|(_, value)| value)
    }
}

/// LRU cache whose values are closed when evicted.
pub struct ClosableCache<K: Hash + Eq, V: Closable> {
    inner: BoundedCache<K, V>,
}

impl<K: Hash + Eq, V: Closable> ClosableCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: BoundedCache::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.contains(key)
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.inner.get_mut(key)
    }

    pub fn peek(&self, key: &K) -> Option<&V> {
        self.inner.peek(key)
    }

    /// Evicts and closes the least-recently-used entry if `key` would not
    /// fit. Call before acquiring the resource for `key` so the old handle is
    /// released first.
    pub fn make_room_for(&mut self, key: &K) {
        if let Some((_, mut evicted)) = self.inner.make_room_for(key) {
            debug!(capacity = self.capacity(), "evicting least recently used entry");
            evicted.close();
        }
    }

    /// Inserts as most recently used, closing an evicted entry if needed.
    /// A value replaced under the same key is returned unclosed.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.make_room_for(&key);
        self.inner.insert(key, value)
    }

    pub fn remove_oldest(&mut self) -> Option<V> {
        let mut value = self.inner.remove_oldest()?;
        value.close();
        Some(value)
    }

    /// Closes every entry, oldest first.
    pub fn close(&mut self) {
        while self.remove_oldest().is_some() {}
    }
}

impl<K: Hash + Eq, V: Closable> Drop for ClosableCache<K, V> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::{BoundedCache, Closable, ClosableCache};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn get_insert_remove_oldest() {
        let mut c = BoundedCache::new(2);
        assert_eq!(c.len(), 0);
        assert_eq!(c.get(&"key1"), None);

        c.insert("key1", "1");
        assert_eq!(c.get(&"key1"), Some(&"1"));
        assert_eq!(c.len(), 1);

        assert_eq!(c.insert("key1", "a"), Some("1"));
        assert_eq!(c.get(&"key1"), Some(&"a"));
        assert_eq!(c.len(), 1);

        c.insert("key2", "2");
        assert_eq!(c.get(&"key1"), Some(&"a"));
        assert_eq!(c.get(&"key2"), Some(&"2"));
        assert_eq!(c.len(), 2);

        c.insert("key3", "3");
        assert_eq!(c.get(&"key1"), None);
        assert_eq!(c.get(&"key2"), Some(&"2"));
        assert_eq!(c.get(&"key3"), Some(&"3"));
        assert_eq!(c.len(), 2);

        assert_eq!(c.remove_oldest(), Some("2"));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn get_refreshes_recency() {
        let mut c = BoundedCache::new(2);
        c.insert('A', 1);
        c.insert('B', 2);
        c.insert('C', 3);
        assert!(!c.contains(&'A'));

        assert_eq!(c.get(&'B'), Some(&2));
        c.insert('D', 4);
        assert!(c.contains(&'B'));
        assert!(!c.contains(&'C'));
        assert!(c.contains(&'D'));
    }

    #[test]
    fn peek_does_not_refresh() {
        let mut c = BoundedCache::new(2);
        c.insert(1, "one");
        c.insert(2, "two");
        assert_eq!(c.peek(&1), Some(&"one"));
        c.insert(3, "three");
        assert!(!c.contains(&1));
    }

    struct Tracked {
        name: &'static str,
        log: Rc<RefCell<Vec<&'static str>>>,
    }

    impl Closable for Tracked {
        fn close(&mut self) {
            self.log.borrow_mut().push(self.name);
        }
    }

    fn tracked(name: &'static str, log: &Rc<RefCell<Vec<&'static str>>>) -> Tracked {
        Tracked {
            name,
            log: Rc::clone(log),
        }
    }

    #[test]
    fn eviction_closes_exactly_once_and_respects_bound() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let names = ["a", "b", "c", "d", "e", "f"];
        let mut cache = ClosableCache::new(3);
        for name in names {
            cache.insert(name, tracked(name, &log));
            assert!(cache.len() <= 3);
        }
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);

        cache.close();
        assert!(cache.is_empty());
        assert_eq!(*log.borrow(), vec!["a", "b", "c", "d", "e", "f"]);

        // Closing an empty cache is a no-op.
        cache.close();
        drop(cache);
        assert_eq!(log.borrow().len(), names.len());
    }

    #[test]
    fn make_room_closes_before_insert() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut cache = ClosableCache::new(1);
        cache.insert("A", tracked("A", &log));
        cache.make_room_for(&"A");
        assert!(log.borrow().is_empty(), "existing key needs no room");

        cache.make_room_for(&"B");
        assert_eq!(*log.borrow(), vec!["A"]);
        assert!(cache.is_empty());
    }

    #[test]
    fn replacing_a_key_does_not_close_old_value() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut cache = ClosableCache::new(2);
        cache.insert("A", tracked("A1", &log));
        let old = cache.insert("A", tracked("A2", &log));
        assert_eq!(old.map(|t| t.name), Some("A1"));
        assert!(log.borrow().is_empty());
        drop(cache);
        assert_eq!(*log.borrow(), vec!["A2"]);
    }
}
