use std::collections::HashMap as StdHashMap;
use std::collections::HashSet as StdHashSet;
use std::hash::BuildHasherDefault;
use twox_hash::XxHash64;
use nohash_hasher::{IntMap, IntSet};

/// Map for composite keys (dual keys, variable names), hashed with XxHash64
pub type FullHashMap<K, V> = StdHashMap<K, V, BuildHasherDefault<XxHash64>>;

/// Set for composite keys, hashed with XxHash64
pub type FullHashSet<K> = StdHashSet<K, BuildHasherDefault<XxHash64>>;

/// Map keyed by integer ids (block ids, variable ids). The id is its own hash.
pub type HashMap<K, V> = IntMap<K, V>;

/// Set of integer ids. The id is its own hash.
pub type HashSet<K> = IntSet<K>;
