use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::core::FixedStr;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum BucketStatus {
    Occupied,
    // Logically deleted; storage stays in the chain for reuse by a later
    // insert hashing to the same slot.
    Free,
}

#[derive(Clone, Debug)]
struct Bucket {
    key: FixedStr,
    value: FixedStr,
    status: BucketStatus,
}

/// Striped, resizable hash table from [`FixedStr`] keys to [`FixedStr`]
/// values, local to the server process.
///
/// Slots are partitioned over a fixed set of reader/writer stripes: the key
/// hash picks both the slot (`hash % capacity`) and the stripe
/// (`hash % stripe_count`). Capacity and stripe count are powers of two with
/// the stripe count dividing the capacity, so a chain never migrates between
/// stripes when the table doubles.
///
/// A resize takes every stripe in index order, doubles the capacity and
/// rehashes eagerly, so any completed `insert` is immediately visible to
/// `get` and `has` under a single stripe lock.
pub struct KvTable {
    // stripe j holds the chains of all slots s with s % stripe_count == j,
    // indexed locally by s / stripe_count.
    stripes: Box<[RwLock<Vec<Vec<Bucket>>>]>,
    capacity: AtomicUsize,
    size: AtomicUsize,
}

const MAX_LOAD_NUM: usize = 3;
const MAX_LOAD_DEN: usize = 4;

impl KvTable {
    /// `initial_capacity` is the starting slot count, `stripe_count` the
    /// number of locks; both are rounded up to powers of two and the stripe
    /// count is clamped to the capacity.
    pub fn new(initial_capacity: usize, stripe_count: usize) -> KvTable {
        let capacity = initial_capacity.max(1).next_power_of_two();
        let stripe_count = stripe_count.max(1).next_power_of_two().min(capacity);
        let stripes = (0..stripe_count)
            .map(|_| RwLock::new(vec![Vec::new(); capacity / stripe_count]))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        KvTable {
            stripes,
            capacity: AtomicUsize::new(capacity),
            size: AtomicUsize::new(0),
        }
    }

    /// Number of occupied buckets. Best effort under concurrency: the
    /// counter is updated inside the stripe critical sections but read
    /// without any lock.
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Insert or replace. Returns the previous value when the key was
    /// already present.
    pub fn insert(&self, key: FixedStr, value: FixedStr) -> Option<FixedStr> {
        self.resize_if_needed();

        let hash = key.hash64() as usize;
        let stripe_count = self.stripes.len();
        let mut chains = self.stripes[hash % stripe_count].write();
        // Stable while any stripe lock is held: a resize needs all of them.
        let capacity = self.capacity.load(Ordering::Acquire);
        let chain = &mut chains[(hash % capacity) / stripe_count];

        if let Some(bucket) = chain
            .iter_mut()
            .find(|b| b.status == BucketStatus::Occupied && b.key == key)
        {
            return Some(std::mem::replace(&mut bucket.value, value));
        }

        if let Some(free) = chain.iter_mut().find(|b| b.status == BucketStatus::Free) {
            *free = Bucket {
                key,
                value,
                status: BucketStatus::Occupied,
            };
        } else {
            chain.push(Bucket {
                key,
                value,
                status: BucketStatus::Occupied,
            });
        }
        self.size.fetch_add(1, Ordering::AcqRel);
        None
    }

    /// Value currently stored under `key`, if any.
    pub fn get(&self, key: &FixedStr) -> Option<FixedStr> {
        let hash = key.hash64() as usize;
        let stripe_count = self.stripes.len();
        let chains = self.stripes[hash % stripe_count].read();
        let capacity = self.capacity.load(Ordering::Acquire);
        chains[(hash % capacity) / stripe_count]
            .iter()
            .find(|b| b.status == BucketStatus::Occupied && b.key == *key)
            .map(|b| b.value)
    }

    pub fn has(&self, key: &FixedStr) -> bool {
        let hash = key.hash64() as usize;
        let stripe_count = self.stripes.len();
        let chains = self.stripes[hash % stripe_count].read();
        let capacity = self.capacity.load(Ordering::Acquire);
        chains[(hash % capacity) / stripe_count]
            .iter()
            .any(|b| b.status == BucketStatus::Occupied && b.key == *key)
    }

    /// Mark the key's bucket free and return the removed pair. Removing an
    /// absent key is not an error and leaves `len` untouched.
    pub fn remove(&self, key: &FixedStr) -> Option<(FixedStr, FixedStr)> {
        let hash = key.hash64() as usize;
        let stripe_count = self.stripes.len();
        let mut chains = self.stripes[hash % stripe_count].write();
        let capacity = self.capacity.load(Ordering::Acquire);
        let chain = &mut chains[(hash % capacity) / stripe_count];

        let bucket = chain
            .iter_mut()
            .find(|b| b.status == BucketStatus::Occupied && b.key == *key)?;
        bucket.status = BucketStatus::Free;
        let removed = (bucket.key, bucket.value);
        self.size.fetch_sub(1, Ordering::AcqRel);
        Some(removed)
    }

    /// Double the capacity once `size + 1` would push the load factor past
    /// 3/4. Takes every stripe in index order, so it excludes all readers
    /// and writers for the duration; the check is repeated under the locks
    /// because another insert may have resized first.
    fn resize_if_needed(&self) {
        if !self.over_load_factor() {
            return;
        }
        let mut guards: Vec<_> = self.stripes.iter().map(|s| s.write()).collect();
        if !self.over_load_factor() {
            return;
        }

        let capacity = self.capacity.load(Ordering::Acquire);
        let new_capacity = capacity * 2;
        let stripe_count = guards.len();
        for (stripe, guard) in guards.iter_mut().enumerate() {
            let old = std::mem::take(&mut **guard);
            let mut fresh: Vec<Vec<Bucket>> = vec![Vec::new(); new_capacity / stripe_count];
            for bucket in old.into_iter().flatten() {
                if bucket.status != BucketStatus::Occupied {
                    continue;
                }
                let hash = bucket.key.hash64() as usize;
                debug_assert_eq!(hash % stripe_count, stripe);
                fresh[(hash % new_capacity) / stripe_count].push(bucket);
            }
            **guard = fresh;
        }
        self.capacity.store(new_capacity, Ordering::Release);
    }

    fn over_load_factor(&self) -> bool {
        (self.size.load(Ordering::Acquire) + 1) * MAX_LOAD_DEN
            > self.capacity.load(Ordering::Acquire) * MAX_LOAD_NUM
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn key(s: &str) -> FixedStr {
        FixedStr::from(s)
    }

    #[test]
    fn round_trip() {
        let table = KvTable::new(8, 8);
        assert_eq!(table.insert(key("k"), key("v")), None);
        assert_eq!(table.get(&key("k")), Some(key("v")));
        assert!(table.has(&key("k")));
        assert_eq!(table.remove(&key("k")), Some((key("k"), key("v"))));
        assert_eq!(table.get(&key("k")), None);
        assert!(!table.has(&key("k")));
    }

    #[test]
    fn insert_returns_previous_value() {
        let table = KvTable::new(8, 8);
        assert_eq!(table.insert(key("k"), key("v1")), None);
        assert_eq!(table.insert(key("k"), key("v2")), Some(key("v1")));
        assert_eq!(table.get(&key("k")), Some(key("v2")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn remove_of_absent_key_leaves_size() {
        let table = KvTable::new(8, 8);
        table.insert(key("present"), key("v"));
        assert_eq!(table.remove(&key("never-inserted")), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn freed_bucket_is_reused() {
        let table = KvTable::new(64, 8);
        table.insert(key("a"), key("1"));
        table.remove(&key("a"));
        table.insert(key("a"), key("2"));
        assert_eq!(table.get(&key("a")), Some(key("2")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn load_factor_triggers_one_doubling() {
        let table = KvTable::new(8, 8);
        let keys: Vec<FixedStr> = (0..8).map(|i| key(&format!("key-{}", i))).collect();
        for (i, k) in keys.iter().enumerate() {
            table.insert(*k, key(&format!("val-{}", i)));
        }
        assert_eq!(table.capacity(), 16);
        for (i, k) in keys.iter().enumerate() {
            assert_eq!(table.get(k), Some(key(&format!("val-{}", i))));
        }
    }

    #[test]
    fn values_survive_repeated_resizes() {
        let table = KvTable::new(8, 4);
        for i in 0..200 {
            table.insert(key(&format!("k{}", i)), key(&format!("v{}", i)));
        }
        assert_eq!(table.len(), 200);
        for i in 0..200 {
            assert_eq!(
                table.get(&key(&format!("k{}", i))),
                Some(key(&format!("v{}", i)))
            );
        }
    }

    #[test]
    fn concurrent_disjoint_keys_keep_last_write() {
        let table = Arc::new(KvTable::new(8, 8));
        let mut handles = Vec::new();
        for t in 0..8 {
            let table = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                for i in 0..50 {
                    let k = key(&format!("t{}-{}", t, i));
                    table.insert(k, key("first"));
                    table.insert(k, key("last"));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(table.len(), 8 * 50);
        for t in 0..8 {
            for i in 0..50 {
                assert_eq!(table.get(&key(&format!("t{}-{}", t, i))), Some(key("last")));
            }
        }
    }
}
