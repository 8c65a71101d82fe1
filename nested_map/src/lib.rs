#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

//! A generic ordered `Map<K, V>` plus the keyed specializations and composite-key set algebra
//! used throughout the replica store.
//!
//! Grounded on `replica/SemanticMaps.h`: the base `detail::Map<K,V>` template becomes
//! [`Map`], its `WorkerMap`/`DatabaseMap`/`ChunkMap` specializations become the newtypes below,
//! and the free-standing `mergeMap`/`intersect`/`diff2` algorithms over the 3-layered
//! `ChunkDatabaseWorkerMap`/`WorkerChunkDatabaseMap` aliases become [`merge3`], [`intersect3`],
//! and [`diff2_3`].

use observability_deps::tracing::trace;
use std::collections::BTreeMap;
use std::fmt;

/// Duplicate-key policy for [`Map::merge`] and [`merge3`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Fail the whole merge the first time a key collides.
    Reject,
    /// Silently keep the destination's existing value on a collision.
    Skip,
}

/// Errors from [`Map::merge`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// `policy = Reject` and the same key was present in both collections.
    #[error("key already exists")]
    DuplicateKey,
}

/// An ordered, 1-level keyed container. Iteration order follows `K`'s natural ordering, which
/// is what makes the composite-key algorithms below deterministic regardless of insertion order.
#[derive(Clone, PartialEq, Eq)]
pub struct Map<K, V> {
    inner: BTreeMap<K, V>,
}

impl<K, V> fmt::Debug for Map<K, V>
where
    K: fmt::Debug + Ord,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.inner.iter()).finish()
    }
}

impl<K: Ord, V> Default for Map<K, V> {
    fn default() -> Self {
        Self {
            inner: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone, V> Map<K, V> {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Whether `k` is present.
    pub fn exists(&self, k: &K) -> bool {
        self.inner.contains_key(k)
    }

    /// Insert (overwriting) `v` at `k`, returning a mutable reference to it.
    pub fn insert(&mut self, k: K, v: V) -> &mut V {
        self.inner.insert(k.clone(), v);
        self.inner.get_mut(&k).expect("just inserted")
    }

    /// Read-only lookup.
    ///
    /// # Panics
    ///
    /// Panics if `k` is absent, matching `detail::Map::get`'s `std::map::at` semantics.
    pub fn get(&self, k: &K) -> &V {
        self.inner
            .get(k)
            .unwrap_or_else(|| panic!("nested_map: no entry for key"))
    }

    /// Writable lookup of an existing entry.
    ///
    /// # Panics
    ///
    /// Panics if `k` is absent.
    pub fn get_mut(&mut self, k: &K) -> &mut V {
        self.inner
            .get_mut(k)
            .unwrap_or_else(|| panic!("nested_map: no entry for key"))
    }

    /// All keys, in ascending order.
    pub fn keys(&self) -> Vec<K> {
        self.inner.keys().cloned().collect()
    }

    /// Iterate `(key, value)` pairs in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter()
    }

    /// Merge `src`'s entries into `self`.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateKey`] if `policy = Reject` and a key is present in both collections.
    ///
    /// # Panics
    ///
    /// Panics if `src` is the same map as `self` (merging a collection with itself is never
    /// meaningful); note the borrow checker already rejects most such calls at compile time since
    /// `self` and `src` cannot alias under `&mut`/`&` simultaneously, so this only matters for
    /// callers holding two handles (e.g. clones of an `Arc<Mutex<Map<..>>>`) to the same data.
    pub fn merge(&mut self, src: &Self, policy: MergePolicy) -> Result<(), Error>
    where
        V: Clone,
    {
        assert!(
            !std::ptr::eq(self, src),
            "attempted to merge a map with itself"
        );
        for (k, v) in src.inner.iter() {
            if self.exists(k) {
                match policy {
                    MergePolicy::Reject => return Err(Error::DuplicateKey),
                    MergePolicy::Skip => continue,
                }
            }
            self.inner.insert(k.clone(), v.clone());
        }
        Ok(())
    }
}

impl<K: Ord + Clone, V: Default> Map<K, V> {
    /// Return a mutable reference to the value at `k`, inserting `V::default()` first if
    /// absent.
    pub fn at(&mut self, k: K) -> &mut V {
        self.inner.entry(k).or_default()
    }
}

/// A string-keyed map, specialized for call-site clarity where the key is a worker name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerMap<V>(Map<String, V>);

/// A string-keyed map, specialized for call-site clarity where the key is a database name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseMap<V>(Map<String, V>);

/// A chunk-keyed map, specialized for call-site clarity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkMap<V>(Map<qserv_types::ChunkId, V>);

macro_rules! keyed_map {
    ($ty:ident, $key:ty, $at:ident, $insert:ident, $exists:ident, $get:ident, $get_mut:ident, $names:ident) => {
        impl<V> $ty<V> {
            /// An empty map.
            pub fn new() -> Self {
                Self(Map::new())
            }

            /// Number of entries.
            pub fn len(&self) -> usize {
                self.0.len()
            }

            /// Whether the map has no entries.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            /// Borrow the underlying generic [`Map`], for use by the composite-key algorithms.
            pub fn as_map(&self) -> &Map<$key, V> {
                &self.0
            }

            /// Mutably borrow the underlying generic [`Map`].
            pub fn as_map_mut(&mut self) -> &mut Map<$key, V> {
                &mut self.0
            }
        }

        impl<V: Default> $ty<V> {
            #[doc = "Get-or-insert-default, keyed for call-site clarity."]
            pub fn $at(&mut self, k: $key) -> &mut V {
                self.0.at(k)
            }
        }

        impl<V> $ty<V> {
            #[doc = "Insert (overwriting), keyed for call-site clarity."]
            pub fn $insert(&mut self, k: $key, v: V) -> &mut V {
                self.0.insert(k, v)
            }

            #[doc = "Existence check, keyed for call-site clarity."]
            pub fn $exists(&self, k: &$key) -> bool {
                self.0.exists(k)
            }

            #[doc = "Read-only lookup, keyed for call-site clarity."]
            pub fn $get(&self, k: &$key) -> &V {
                self.0.get(k)
            }

            #[doc = "Writable lookup, keyed for call-site clarity."]
            pub fn $get_mut(&mut self, k: &$key) -> &mut V {
                self.0.get_mut(k)
            }

            #[doc = "All keys, keyed for call-site clarity."]
            pub fn $names(&self) -> Vec<$key> {
                self.0.keys()
            }
        }
    };
}

keyed_map!(
    WorkerMap,
    String,
    at_worker,
    insert_worker,
    worker_exists,
    worker,
    worker_mut,
    worker_names
);
keyed_map!(
    DatabaseMap,
    String,
    at_database,
    insert_database,
    database_exists,
    database,
    database_mut,
    database_names
);
keyed_map!(
    ChunkMap,
    qserv_types::ChunkId,
    at_chunk,
    insert_chunk,
    chunk_exists,
    chunk,
    chunk_mut,
    chunk_numbers
);

/// The 3-layered map `.chunk(number).database(name).worker(name) -> T`, matching
/// `SemanticMaps.h`'s `ChunkDatabaseWorkerMap`.
pub type ChunkDatabaseWorkerMap<T> = ChunkMap<DatabaseMap<WorkerMap<T>>>;

/// The 3-layered map `.worker(name).chunk(number).database(name) -> T`, matching
/// `SemanticMaps.h`'s `WorkerChunkDatabaseMap`.
pub type WorkerChunkDatabaseMap<T> = WorkerMap<ChunkMap<DatabaseMap<T>>>;

/// Number of leaf entries across an entire 3-layered composite map.
pub fn count3<K1: Ord + Clone, K2: Ord + Clone, K3: Ord + Clone, V>(
    m: &Map<K1, Map<K2, Map<K3, V>>>,
) -> usize {
    m.iter()
        .flat_map(|(_, lvl2)| lvl2.iter())
        .map(|(_, lvl3)| lvl3.len())
        .sum()
}

/// `C[k1][k2][k3] = A[k1][k2][k3]` for every composite key present in both `a` and `b`.
pub fn intersect3<K1, K2, K3, V>(
    a: &Map<K1, Map<K2, Map<K3, V>>>,
    b: &Map<K1, Map<K2, Map<K3, V>>>,
) -> Map<K1, Map<K2, Map<K3, V>>>
where
    K1: Ord + Clone,
    K2: Ord + Clone,
    K3: Ord + Clone,
    V: Clone,
{
    let mut out = Map::new();
    for k1 in a.keys() {
        if !b.exists(&k1) {
            continue;
        }
        let a2 = a.get(&k1);
        let b2 = b.get(&k1);
        for k2 in a2.keys() {
            if !b2.exists(&k2) {
                continue;
            }
            let a3 = a2.get(&k2);
            let b3 = b2.get(&k2);
            for k3 in a3.keys() {
                if b3.exists(&k3) {
                    out.at(k1.clone())
                        .at(k2.clone())
                        .insert(k3.clone(), a3.get(&k3).clone());
                }
            }
        }
    }
    trace!(entries = count3(&out), "intersect3 computed");
    out
}

/// Partition the symmetric difference of `a` and `b` into `(only_a, only_b)` over the
/// composite key. Together with [`intersect3`]: `intersect(A,B) ∪ onlyA = A`,
/// `intersect(A,B) ∪ onlyB = B`, `onlyA ∩ onlyB = ∅`.
pub fn diff2_3<K1, K2, K3, V>(
    a: &Map<K1, Map<K2, Map<K3, V>>>,
    b: &Map<K1, Map<K2, Map<K3, V>>>,
) -> (Map<K1, Map<K2, Map<K3, V>>>, Map<K1, Map<K2, Map<K3, V>>>)
where
    K1: Ord + Clone,
    K2: Ord + Clone,
    K3: Ord + Clone,
    V: Clone,
{
    let mut only_a = Map::new();
    for k1 in a.keys() {
        let a2 = a.get(&k1);
        for k2 in a2.keys() {
            let a3 = a2.get(&k2);
            for k3 in a3.keys() {
                let present_in_b = b.exists(&k1) && b.get(&k1).exists(&k2) && b.get(&k1).get(&k2).exists(&k3);
                if !present_in_b {
                    only_a
                        .at(k1.clone())
                        .at(k2.clone())
                        .insert(k3.clone(), a3.get(&k3).clone());
                }
            }
        }
    }
    let mut only_b = Map::new();
    for k1 in b.keys() {
        let b2 = b.get(&k1);
        for k2 in b2.keys() {
            let b3 = b2.get(&k2);
            for k3 in b3.keys() {
                let present_in_a = a.exists(&k1) && a.get(&k1).exists(&k2) && a.get(&k1).get(&k2).exists(&k3);
                if !present_in_a {
                    only_b
                        .at(k1.clone())
                        .at(k2.clone())
                        .insert(k3.clone(), b3.get(&k3).clone());
                }
            }
        }
    }
    (only_a, only_b)
}

/// Merge `src` into `dst` over the composite key, matching `SemanticMaps.h::mergeMap`.
///
/// # Errors
///
/// [`Error::DuplicateKey`] if `policy = Reject` and a composite key collides.
pub fn merge3<K1, K2, K3, V>(
    dst: &mut Map<K1, Map<K2, Map<K3, V>>>,
    src: &Map<K1, Map<K2, Map<K3, V>>>,
    policy: MergePolicy,
) -> Result<(), Error>
where
    K1: Ord + Clone,
    K2: Ord + Clone,
    K3: Ord + Clone,
    V: Clone,
{
    for k1 in src.keys() {
        let src2 = src.get(&k1);
        for k2 in src2.keys() {
            dst.at(k1.clone())
                .at(k2.clone())
                .merge(src2.get(&k2), policy)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qserv_types::ChunkId;

    fn leaf(
        worker: &str,
        chunk: i64,
        db: &str,
        val: &str,
    ) -> (String, ChunkId, String, String) {
        (worker.to_string(), ChunkId(chunk), db.to_string(), val.to_string())
    }

    fn build(entries: &[(String, ChunkId, String, String)]) -> Map<String, Map<ChunkId, Map<String, String>>> {
        let mut m = Map::new();
        for (w, c, d, v) in entries {
            m.at(w.clone()).at(*c).insert(d.clone(), v.clone());
        }
        m
    }

    #[test]
    fn at_inserts_default_once() {
        let mut m: Map<String, Vec<i32>> = Map::new();
        m.at("a".into()).push(1);
        m.at("a".into()).push(2);
        assert_eq!(m.get(&"a".to_string()), &vec![1, 2]);
    }

    #[test]
    fn intersect_diff_partition_the_inputs() {
        let a = build(&[
            leaf("A", 1, "d", "v1"),
            leaf("A", 2, "d", "v2"),
        ]);
        let b = build(&[
            leaf("A", 1, "d", "v1-newer"), // same composite key, different value: intersect keeps A's value
            leaf("B", 3, "d", "v3"),
        ]);

        let inter = intersect3(&a, &b);
        assert_eq!(count3(&inter), 1);
        assert_eq!(inter.get(&"A".to_string()).get(&ChunkId(1)).get(&"d".to_string()), "v1");

        let (only_a, only_b) = diff2_3(&a, &b);
        assert_eq!(count3(&only_a), 1);
        assert_eq!(count3(&only_b), 1);
        assert!(only_a.get(&"A".to_string()).exists(&ChunkId(2)));
        assert!(only_b.get(&"B".to_string()).exists(&ChunkId(3)));

        // onlyA and onlyB are disjoint, and intersect+onlyA reconstitutes a, intersect+onlyB reconstitutes b.
        assert_eq!(count3(&inter) + count3(&only_a), count3(&a));
        assert_eq!(count3(&inter) + count3(&only_b), count3(&b));
    }

    #[test]
    fn merge_rejects_duplicate_keys_by_default() {
        let mut dst = build(&[leaf("A", 1, "d", "v1")]);
        let src = build(&[leaf("A", 1, "d", "v1-dup")]);
        let err = merge3(&mut dst, &src, MergePolicy::Reject).unwrap_err();
        assert_eq!(err, Error::DuplicateKey);
    }

    #[test]
    fn merge_skip_policy_keeps_destination_value_on_collision() {
        let mut dst = build(&[leaf("A", 1, "d", "v1")]);
        let src = build(&[leaf("A", 1, "d", "v1-dup"), leaf("A", 2, "d", "v2")]);
        merge3(&mut dst, &src, MergePolicy::Skip).unwrap();
        assert_eq!(dst.get(&"A".to_string()).get(&ChunkId(1)).get(&"d".to_string()), "v1");
        assert_eq!(dst.get(&"A".to_string()).get(&ChunkId(2)).get(&"d".to_string()), "v2");
    }

    #[test]
    fn worker_map_keyed_accessors_round_trip() {
        let mut wm: WorkerMap<i32> = WorkerMap::new();
        *wm.at_worker("A".into()) = 5;
        assert!(wm.worker_exists(&"A".to_string()));
        assert_eq!(*wm.worker(&"A".to_string()), 5);
        assert_eq!(wm.worker_names(), vec!["A".to_string()]);
    }
}
