use alloc::boxed::Box;
use core::fmt::Debug;

use crate::config::BAG_SIZE;
use crate::config::Config;
use crate::config::ConfigError;
use crate::mix::bucket_index;
use crate::salt::OsSalt;
use crate::salt::SaltSource;

/// Hash value reserved for empty and deleted slots.
///
/// A caller hash of zero can never be stored, which lets a slot carry its own
/// occupancy without a separate tag array.
const EMPTY: u64 = 0;

/// Outcome of [`HashTable::probe`].
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Probe {
    /// A node with the same hash was already present. Its value was left in
    /// place and the offered value was dropped.
    Exists,
    /// The value was stored under a fresh node.
    Inserted,
}

struct Node<V> {
    hash: u64,
    value: Option<V>,
}

impl<V> Node<V> {
    #[inline(always)]
    fn vacant() -> Self {
        Self {
            hash: EMPTY,
            value: None,
        }
    }

    #[inline(always)]
    fn is_live(&self) -> bool {
        self.hash != EMPTY
    }

    #[inline(always)]
    fn set(&mut self, hash: u64, value: V) {
        self.hash = hash;
        self.value = Some(value);
    }

    #[inline(always)]
    fn clear(&mut self) -> Option<V> {
        self.hash = EMPTY;
        self.value.take()
    }
}

/// Fixed-capacity run of nodes. Bags are only ever prepended to a chain and
/// live until the whole chain is released.
struct Bag<V> {
    nodes: [Node<V>; BAG_SIZE],
    next: Option<Box<Bag<V>>>,
}

/// Mutable walk over a bag chain, yielding each bag's slot array.
struct SlotsMut<'a, V> {
    next: Option<&'a mut Bag<V>>,
}

impl<'a, V> Iterator for SlotsMut<'a, V> {
    type Item = &'a mut [Node<V>; BAG_SIZE];

    fn next(&mut self) -> Option<Self::Item> {
        self.next.take().map(|bag| {
            let Bag { nodes, next } = bag;
            self.next = next.as_deref_mut();
            nodes
        })
    }
}

struct Bucket<V> {
    head: Option<Box<Bag<V>>>,
    /// Live nodes in this bucket.
    len: usize,
    /// Bags in the chain.
    bags: usize,
}

impl<V> Bucket<V> {
    fn new() -> Self {
        Self {
            head: None,
            len: 0,
            bags: 0,
        }
    }

    fn bags(&self) -> impl Iterator<Item = &Bag<V>> {
        core::iter::successors(self.head.as_deref(), |bag| bag.next.as_deref())
    }

    fn slots_mut(&mut self) -> SlotsMut<'_, V> {
        SlotsMut {
            next: self.head.as_deref_mut(),
        }
    }

    /// Stores `value` unless a node with `hash` is already present. The
    /// first free slot seen during the scan is reused.
    fn insert(&mut self, hash: u64, value: V) -> Probe {
        let mut vacant = None;
        for nodes in self.slots_mut() {
            for node in nodes {
                if node.hash == hash {
                    return Probe::Exists;
                }
                if vacant.is_none() && !node.is_live() {
                    vacant = Some(node);
                }
            }
        }

        match vacant {
            Some(node) => node.set(hash, value),
            None => self.push_bag().set(hash, value),
        }
        self.len += 1;
        Probe::Inserted
    }

    /// Stores a node known to be absent from the bucket.
    fn insert_unique(&mut self, hash: u64, value: V) {
        let vacant = self
            .slots_mut()
            .find_map(|nodes| nodes.into_iter().find(|node| !node.is_live()));

        match vacant {
            Some(node) => node.set(hash, value),
            None => self.push_bag().set(hash, value),
        }
        self.len += 1;
    }

    /// Prepends an empty bag and returns its first slot.
    #[cold]
    fn push_bag(&mut self) -> &mut Node<V> {
        let bag = Box::new(Bag {
            nodes: core::array::from_fn(|_| Node::vacant()),
            next: self.head.take(),
        });
        self.bags += 1;
        tracing::trace!(bags = self.bags, len = self.len, "prepended bag");

        &mut self.head.insert(bag).nodes[0]
    }

    fn search(&self, hash: u64) -> Option<&Node<V>> {
        self.bags()
            .flat_map(|bag| bag.nodes.iter())
            .find(|node| node.hash == hash)
    }

    fn search_mut(&mut self, hash: u64) -> Option<&mut Node<V>> {
        self.slots_mut()
            .flatten()
            .find(|node| node.hash == hash)
    }

    fn remove(&mut self, hash: u64) -> Option<V> {
        let value = self.search_mut(hash)?.clear();
        if value.is_some() {
            self.len -= 1;
        }
        value
    }

    /// Drops every node and bag in the chain, one bag at a time.
    fn clear(&mut self) {
        let mut next = self.head.take();
        while let Some(mut bag) = next {
            next = bag.next.take();
        }
        self.len = 0;
        self.bags = 0;
    }
}

impl<V> Drop for Bucket<V> {
    fn drop(&mut self) {
        self.clear();
    }
}

/// High-water and occupancy counters of a [`HashTable`].
///
/// `max_bag_chain` and `max_occupancy` are best-effort: they grow on insert,
/// are recomputed exactly on every resize and never shrink on removal.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TableStats {
    /// Live nodes in the table.
    pub nodes: usize,
    /// Number of buckets.
    pub buckets: usize,
    /// Buckets holding at least one live node.
    pub fill: usize,
    /// Longest bag chain observed.
    pub max_bag_chain: usize,
    /// Most live nodes observed in a single bucket.
    pub max_occupancy: usize,
    /// Number of times the bucket array has doubled.
    pub resizes: usize,
}

/// Detailed layout statistics for tuning `BAG_SIZE` and the fill threshold.
///
/// Requires the `stats` feature.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone)]
pub struct DebugStats {
    /// Counters also reported by [`HashTable::stats`].
    pub table: TableStats,
    /// Bags currently allocated.
    pub bags: usize,
    /// Slots across all allocated bags.
    pub total_slots: usize,
    /// Slots holding a live node.
    pub occupied_slots: usize,
    /// Live nodes per bucket.
    pub load_factor: f64,
    /// Fraction of bag slots in use.
    pub slot_utilization: f64,
    /// Heap bytes owned by the table, excluding anything values point to.
    pub total_bytes: usize,
    /// Bytes of bag slots not holding a live node.
    pub wasted_bytes: usize,
}

#[cfg(any(test, feature = "stats"))]
impl DebugStats {
    /// Pretty-print the debug statistics.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== Hash Table Debug Statistics ===");
        println!(
            "Nodes: {} in {} buckets ({:.2} per bucket, {} filled)",
            self.table.nodes, self.table.buckets, self.load_factor, self.table.fill
        );
        println!(
            "Slot Usage: {}/{} in {} bags ({:.2}% utilization)",
            self.occupied_slots,
            self.total_slots,
            self.bags,
            self.slot_utilization * 100.0
        );
        println!(
            "High water: {} bags per chain, {} nodes per bucket",
            self.table.max_bag_chain, self.table.max_occupancy
        );
        println!("Resizes: {}", self.table.resizes);
        println!("Total Allocated: {} bytes", self.total_bytes);
        println!(
            "Memory: {} bytes wasted ({:.02}%)",
            self.wasted_bytes,
            if self.total_bytes == 0 {
                0.0
            } else {
                (self.wasted_bytes as f64 / self.total_bytes as f64) * 100.0
            }
        );
    }
}

/// A hash table keyed by caller-supplied 64-bit hashes.
///
/// Each bucket heads a chain of bags, every bag holding `BAG_SIZE` nodes.
/// The caller's hash is remixed with a per-table random salt before it picks a
/// bucket, and the salt is redrawn whenever the bucket array doubles. The
/// table never hashes keys and never compares anything but the 64-bit hash:
/// two values offered under the same hash are the same entry.
///
/// Hash value `0` is reserved for empty slots and must not be used.
///
/// ## Example
///
/// ```rust
/// # use core::hash::Hash;
/// # use core::hash::Hasher;
/// #
/// # use bag_hash::HashTable;
/// # use bag_hash::Probe;
/// # use siphasher::sip::SipHasher;
/// #
/// # fn hash_str(s: &str) -> u64 {
/// #     let mut hasher = SipHasher::new();
/// #     s.hash(&mut hasher);
/// #     hasher.finish() | 1
/// # }
/// #
/// let mut table = HashTable::new(4);
///
/// assert_eq!(table.probe(hash_str("alice"), 30), Probe::Inserted);
/// assert_eq!(table.probe(hash_str("alice"), 31), Probe::Exists);
/// assert_eq!(table.find(hash_str("alice")), Some(&30));
///
/// assert_eq!(table.remove(hash_str("alice")), Some(30));
/// assert_eq!(table.find(hash_str("alice")), None);
/// ```
pub struct HashTable<V, S = OsSalt> {
    buckets: Box<[Bucket<V>]>,
    mask: usize,
    salt: u64,
    salt_source: S,
    config: Config,

    populated: usize,
    fill: usize,
    max_bag_chain: usize,
    max_occupancy: usize,
    resizes: usize,
}

impl<V, S> Debug for HashTable<V, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HashTable")
            .field("buckets", &self.buckets.len())
            .field("populated", &self.populated)
            .field("fill", &self.fill)
            .field("fill_percent", &self.config.fill_percent())
            .field("max_bag_chain", &self.max_bag_chain)
            .field("max_occupancy", &self.max_occupancy)
            .field("resizes", &self.resizes)
            .finish_non_exhaustive()
    }
}

impl<V> Default for HashTable<V> {
    fn default() -> Self {
        Self::with_config(Config::default())
    }
}

impl<V> HashTable<V> {
    /// Creates a table with `2^size_log2` buckets, salted from the operating
    /// system's random generator. A `size_log2` of zero selects 1024 buckets.
    ///
    /// # Panics
    ///
    /// Panics if `size_log2` exceeds [`MAX_SIZE_LOG2`](crate::config::MAX_SIZE_LOG2).
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bag_hash::HashTable;
    /// #
    /// let table: HashTable<&str> = HashTable::new(2);
    /// assert_eq!(table.bucket_count(), 4);
    ///
    /// let table: HashTable<&str> = HashTable::new(0);
    /// assert_eq!(table.bucket_count(), 1024);
    /// ```
    pub fn new(size_log2: u32) -> Self {
        Self::with_config(Config::new().with_size_log2(size_log2))
    }

    /// Creates a table from `config`, salted from the operating system.
    ///
    /// # Panics
    ///
    /// Panics if `config` fails [`Config::validate`].
    pub fn with_config(config: Config) -> Self {
        Self::with_config_and_salt(config, OsSalt)
    }

    /// Creates a table from `config`, salted from the operating system, or
    /// reports why the configuration is unusable.
    pub fn try_with_config(config: Config) -> Result<Self, ConfigError> {
        Self::try_with_config_and_salt(config, OsSalt)
    }
}

impl<V, S: SaltSource> HashTable<V, S> {
    /// Creates a table from `config`, drawing every salt from `salt_source`.
    ///
    /// # Panics
    ///
    /// Panics if `config` fails [`Config::validate`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bag_hash::Config;
    /// # use bag_hash::HashTable;
    /// # use bag_hash::salt::SeededSalt;
    /// #
    /// let config = Config::new().with_size_log2(3).with_fill_percent(75);
    /// let table: HashTable<u32, _> = HashTable::with_config_and_salt(config, SeededSalt::new(1));
    /// assert_eq!(table.bucket_count(), 8);
    /// ```
    pub fn with_config_and_salt(config: Config, salt_source: S) -> Self {
        match Self::try_with_config_and_salt(config, salt_source) {
            Ok(table) => table,
            Err(err) => panic!("invalid hash table configuration: {err}"),
        }
    }

    /// Creates a table from `config`, drawing every salt from `salt_source`,
    /// or reports why the configuration is unusable.
    pub fn try_with_config_and_salt(
        config: Config,
        mut salt_source: S,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let bucket_count = config.bucket_count();
        let salt = salt_source.next_salt();
        tracing::debug!(
            buckets = bucket_count,
            fill_percent = config.fill_percent(),
            bag_size = BAG_SIZE,
            "created hash table"
        );

        Ok(Self {
            buckets: new_buckets(bucket_count),
            mask: bucket_count - 1,
            salt,
            salt_source,
            config,
            populated: 0,
            fill: 0,
            max_bag_chain: 0,
            max_occupancy: 0,
            resizes: 0,
        })
    }

    /// Inserts `value` under `hash` unless the hash is already present.
    ///
    /// An existing entry is never overwritten: if `hash` is present this
    /// returns [`Probe::Exists`] and drops `value`. Otherwise the value is
    /// stored, [`Probe::Inserted`] is returned, and the bucket array may
    /// double if the fill threshold was crossed.
    ///
    /// # Panics
    ///
    /// Debug builds panic if `hash` is zero. Release builds report a zero
    /// hash as [`Probe::Exists`] without storing anything.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bag_hash::HashTable;
    /// # use bag_hash::Probe;
    /// #
    /// let mut table = HashTable::new(2);
    /// assert_eq!(table.probe(42, "A"), Probe::Inserted);
    /// assert_eq!(table.probe(42, "B"), Probe::Exists);
    /// assert_eq!(table.find(42), Some(&"A"));
    /// ```
    pub fn probe(&mut self, hash: u64, value: V) -> Probe {
        debug_assert_ne!(hash, EMPTY, "hash value 0 is reserved for empty slots");
        if hash == EMPTY {
            return Probe::Exists;
        }

        let mut index = bucket_index(hash, self.mask, self.salt);
        let bucket = &mut self.buckets[index];
        if bucket.insert(hash, value) == Probe::Exists {
            return Probe::Exists;
        }
        let bucket_len = bucket.len;
        self.populated += 1;

        if bucket_len == 1 {
            self.fill += 1;
            if self.over_fill_threshold() {
                self.resize();
                index = bucket_index(hash, self.mask, self.salt);
            }
        }

        let bucket = &self.buckets[index];
        self.max_bag_chain = self.max_bag_chain.max(bucket.bags);
        self.max_occupancy = self.max_occupancy.max(bucket.len);

        Probe::Inserted
    }

    /// Returns a reference to the value stored under `hash`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bag_hash::HashTable;
    /// #
    /// let mut table = HashTable::new(2);
    /// let _ = table.probe(11, "a");
    /// assert_eq!(table.find(11), Some(&"a"));
    /// assert_eq!(table.find(12), None);
    /// ```
    #[inline]
    pub fn find(&self, hash: u64) -> Option<&V> {
        if hash == EMPTY || self.populated == 0 {
            return None;
        }

        self.buckets[bucket_index(hash, self.mask, self.salt)]
            .search(hash)
            .and_then(|node| node.value.as_ref())
    }

    /// Returns a mutable reference to the value stored under `hash`.
    #[inline]
    pub fn find_mut(&mut self, hash: u64) -> Option<&mut V> {
        if hash == EMPTY || self.populated == 0 {
            return None;
        }

        self.buckets[bucket_index(hash, self.mask, self.salt)]
            .search_mut(hash)
            .and_then(|node| node.value.as_mut())
    }

    /// Returns `true` if a value is stored under `hash`.
    #[inline]
    pub fn contains(&self, hash: u64) -> bool {
        self.find(hash).is_some()
    }

    /// Removes and returns the value stored under `hash`.
    ///
    /// The node's slot becomes free for later inserts into the same bucket;
    /// its bag stays allocated.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bag_hash::HashTable;
    /// #
    /// let mut table = HashTable::new(2);
    /// let _ = table.probe(7, "x");
    /// assert_eq!(table.remove(7), Some("x"));
    /// assert_eq!(table.find(7), None);
    /// assert_eq!(table.remove(7), None);
    /// ```
    pub fn remove(&mut self, hash: u64) -> Option<V> {
        if hash == EMPTY || self.populated == 0 {
            return None;
        }

        let bucket = &mut self.buckets[bucket_index(hash, self.mask, self.salt)];
        let value = bucket.remove(hash)?;
        let bucket_len = bucket.len;

        self.populated -= 1;
        if bucket_len == 0 {
            self.fill -= 1;
        }

        Some(value)
    }

    #[inline(always)]
    fn over_fill_threshold(&self) -> bool {
        let percent = (self.fill as u128 * 100) / (self.buckets.len() as u128 + 1);
        percent > u128::from(self.config.fill_percent())
    }

    /// Doubles the bucket array under a fresh salt and moves every live node
    /// into it. Old bags are released as soon as they have been drained.
    #[cold]
    #[inline(never)]
    fn resize(&mut self) {
        let bucket_count = self.buckets.len() * 2;
        let mask = bucket_count - 1;
        let salt = self.salt_source.next_salt();

        let mut buckets = new_buckets(bucket_count);
        let mut max_bag_chain = 0;
        let mut max_occupancy = 0;
        let mut fill = 0;

        let old = core::mem::take(&mut self.buckets);
        for mut old_bucket in old.into_vec() {
            let mut next = old_bucket.head.take();
            while let Some(mut bag) = next {
                for node in bag.nodes.iter_mut() {
                    let hash = node.hash;
                    let Some(value) = node.clear() else {
                        continue;
                    };

                    let target = &mut buckets[bucket_index(hash, mask, salt)];
                    target.insert_unique(hash, value);
                    max_bag_chain = max_bag_chain.max(target.bags);
                    max_occupancy = max_occupancy.max(target.len);
                    if target.len == 1 {
                        fill += 1;
                    }
                }
                next = bag.next.take();
            }
        }

        self.buckets = buckets;
        self.mask = mask;
        self.salt = salt;
        self.max_bag_chain = max_bag_chain;
        self.max_occupancy = max_occupancy;
        self.fill = fill;
        self.resizes += 1;

        tracing::debug!(
            buckets = bucket_count,
            nodes = self.populated,
            fill,
            max_bag_chain,
            max_occupancy,
            resizes = self.resizes,
            "resized hash table"
        );
    }
}

impl<V, S> HashTable<V, S> {
    /// Returns the number of live nodes in the table.
    pub fn len(&self) -> usize {
        self.populated
    }

    /// Returns `true` if the table holds no live nodes.
    pub fn is_empty(&self) -> bool {
        self.populated == 0
    }

    /// Returns the current number of buckets (always a power of two).
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Returns the total number of bags allocated across all buckets.
    pub fn bag_count(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.bags).sum()
    }

    /// Returns how many times the bucket array has doubled.
    pub fn resizes(&self) -> usize {
        self.resizes
    }

    /// Returns the configuration the table was built with. The bucket count
    /// it reports is the initial one.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the table's occupancy and high-water counters.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bag_hash::HashTable;
    /// #
    /// let mut table = HashTable::new(4);
    /// let _ = table.probe(1, ());
    /// let _ = table.probe(2, ());
    ///
    /// let stats = table.stats();
    /// assert_eq!(stats.nodes, 2);
    /// assert_eq!(stats.buckets, 16);
    /// assert!(stats.max_occupancy >= 1);
    /// ```
    pub fn stats(&self) -> TableStats {
        TableStats {
            nodes: self.populated,
            buckets: self.buckets.len(),
            fill: self.fill,
            max_bag_chain: self.max_bag_chain,
            max_occupancy: self.max_occupancy,
            resizes: self.resizes,
        }
    }

    /// Drops every value and every bag. The bucket count and salt are kept.
    pub fn clear(&mut self) {
        for bucket in self.buckets.iter_mut() {
            bucket.clear();
        }
        self.populated = 0;
        self.fill = 0;
        self.max_bag_chain = 0;
        self.max_occupancy = 0;
    }

    /// Iterates over `(hash, &value)` for every live node, in no particular
    /// order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bag_hash::HashTable;
    /// #
    /// let mut table = HashTable::new(2);
    /// let _ = table.probe(11, "a");
    /// let _ = table.probe(22, "b");
    ///
    /// let mut seen: Vec<_> = table.iter().collect();
    /// seen.sort();
    /// assert_eq!(seen, vec![(11, &"a"), (22, &"b")]);
    /// ```
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            buckets: self.buckets.iter(),
            bag: None,
            slot: 0,
            remaining: self.populated,
        }
    }

    /// Removes every live node, yielding `(hash, value)` pairs. Bags are
    /// released as they are emptied, and none remain once the iterator is
    /// dropped. Dropping the iterator early still empties the table.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bag_hash::HashTable;
    /// #
    /// let mut table = HashTable::new(2);
    /// let _ = table.probe(11, "a");
    /// let _ = table.probe(22, "b");
    ///
    /// let drained: Vec<_> = table.drain().collect();
    /// assert_eq!(drained.len(), 2);
    /// assert!(table.is_empty());
    /// ```
    pub fn drain(&mut self) -> Drain<'_, V, S> {
        Drain {
            table: self,
            bucket_index: 0,
            chain: None,
            slot: 0,
        }
    }

    /// Counts buckets by bag-chain length: entry `i` is the number of
    /// buckets whose chain holds `i` bags.
    ///
    /// Requires the `stats` feature.
    #[cfg(any(test, feature = "stats"))]
    pub fn bag_histogram(&self) -> alloc::vec::Vec<usize> {
        let mut hist = alloc::vec![0usize; self.max_bag_chain + 1];
        for bucket in self.buckets.iter() {
            if bucket.bags >= hist.len() {
                hist.resize(bucket.bags + 1, 0);
            }
            hist[bucket.bags] += 1;
        }
        hist
    }

    /// Counts buckets by live-node count: entry `i` is the number of buckets
    /// holding exactly `i` live nodes.
    ///
    /// Requires the `stats` feature.
    #[cfg(any(test, feature = "stats"))]
    pub fn occupancy_histogram(&self) -> alloc::vec::Vec<usize> {
        let mut hist = alloc::vec![0usize; self.max_occupancy + 1];
        for bucket in self.buckets.iter() {
            if bucket.len >= hist.len() {
                hist.resize(bucket.len + 1, 0);
            }
            hist[bucket.len] += 1;
        }
        hist
    }

    /// Returns detailed layout and memory statistics.
    ///
    /// Requires the `stats` feature.
    #[cfg(any(test, feature = "stats"))]
    pub fn debug_stats(&self) -> DebugStats {
        let bags = self.bag_count();
        let total_slots = bags * BAG_SIZE;
        let occupied_slots = self
            .buckets
            .iter()
            .flat_map(|bucket| bucket.bags())
            .map(|bag| bag.nodes.iter().filter(|node| node.is_live()).count())
            .sum::<usize>();
        let bag_bytes = core::mem::size_of::<Bag<V>>();

        DebugStats {
            table: self.stats(),
            bags,
            total_slots,
            occupied_slots,
            load_factor: self.populated as f64 / self.buckets.len() as f64,
            slot_utilization: if total_slots == 0 {
                0.0
            } else {
                occupied_slots as f64 / total_slots as f64
            },
            total_bytes: self.buckets.len() * core::mem::size_of::<Bucket<V>>() + bags * bag_bytes,
            wasted_bytes: (total_slots - occupied_slots) * core::mem::size_of::<Node<V>>(),
        }
    }

    /// Pretty-prints the bag-chain histogram horizontally using stdout.
    ///
    /// Requires the `stats` and `std` features.
    #[cfg(all(any(test, feature = "stats"), feature = "std"))]
    pub fn print_bag_histogram(&self) {
        let hist = self.bag_histogram();
        let max = *hist.iter().max().unwrap_or(&0);
        if max == 0 {
            println!("bag histogram: empty");
            return;
        }

        let max_bar = 60usize;
        let total_units = max_bar * 8;
        println!(
            "bag histogram ({} nodes, {} buckets):",
            self.populated,
            self.buckets.len()
        );

        let make_bar = |count: usize| -> alloc::string::String {
            if count == 0 {
                return alloc::string::String::new();
            }
            let units = ((count as u128 * total_units as u128).div_ceil(max as u128)) as usize;
            let mut bar = "█".repeat(units / 8);
            let partial = match units % 8 {
                1 => Some('▏'),
                2 => Some('▎'),
                3 => Some('▍'),
                4 => Some('▌'),
                5 => Some('▋'),
                6 => Some('▊'),
                7 => Some('▉'),
                _ => None,
            };
            bar.extend(partial);
            bar
        };

        for (bags, &count) in hist.iter().enumerate() {
            println!("{:>3} | {} ({})", bags, make_bar(count), count);
        }
    }
}

fn new_buckets<V>(bucket_count: usize) -> Box<[Bucket<V>]> {
    (0..bucket_count).map(|_| Bucket::new()).collect()
}

/// An iterator over the live nodes of a [`HashTable`].
///
/// This struct is created by the [`iter`] method on [`HashTable`].
///
/// [`iter`]: HashTable::iter
pub struct Iter<'a, V> {
    buckets: core::slice::Iter<'a, Bucket<V>>,
    bag: Option<&'a Bag<V>>,
    slot: usize,
    remaining: usize,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (u64, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(bag) = self.bag {
                while self.slot < BAG_SIZE {
                    let node = &bag.nodes[self.slot];
                    self.slot += 1;
                    if let Some(value) = node.value.as_ref() {
                        self.remaining = self.remaining.saturating_sub(1);
                        return Some((node.hash, value));
                    }
                }
                self.bag = bag.next.as_deref();
                self.slot = 0;
                continue;
            }

            if self.remaining == 0 {
                return None;
            }
            self.bag = self.buckets.next()?.head.as_deref();
            self.slot = 0;
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<V> ExactSizeIterator for Iter<'_, V> {}

impl<'a, V, S> IntoIterator for &'a HashTable<V, S> {
    type Item = (u64, &'a V);
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A draining iterator over the live nodes of a [`HashTable`].
///
/// This struct is created by the [`drain`] method on [`HashTable`].
///
/// [`drain`]: HashTable::drain
pub struct Drain<'a, V, S = OsSalt> {
    table: &'a mut HashTable<V, S>,
    bucket_index: usize,
    chain: Option<Box<Bag<V>>>,
    slot: usize,
}

impl<V, S> Drop for Drain<'_, V, S> {
    fn drop(&mut self) {
        for _ in &mut *self {}

        let mut next = self.chain.take();
        while let Some(mut bag) = next {
            next = bag.next.take();
        }
        for bucket in self.table.buckets.iter_mut().skip(self.bucket_index) {
            bucket.clear();
        }

        self.table.max_bag_chain = 0;
        self.table.max_occupancy = 0;
    }
}

impl<V, S> Iterator for Drain<'_, V, S> {
    type Item = (u64, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(bag) = self.chain.as_mut() {
                while self.slot < BAG_SIZE {
                    let node = &mut bag.nodes[self.slot];
                    self.slot += 1;
                    let hash = node.hash;
                    if let Some(value) = node.clear() {
                        self.table.populated -= 1;
                        return Some((hash, value));
                    }
                }
                let next = bag.next.take();
                self.chain = next;
                self.slot = 0;
                continue;
            }

            if self.table.populated == 0 {
                return None;
            }
            let bucket = self.table.buckets.get_mut(self.bucket_index)?;
            self.bucket_index += 1;
            if bucket.len > 0 {
                self.table.fill -= 1;
            }
            self.chain = bucket.head.take();
            bucket.len = 0;
            bucket.bags = 0;
            self.slot = 0;
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.table.populated, Some(self.table.populated))
    }
}

impl<V, S> ExactSizeIterator for Drain<'_, V, S> {}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use alloc::string::String;
    use alloc::string::ToString;
    use alloc::vec::Vec;
    use core::hash::Hasher;

    use rand::TryRngCore;
    use rand::rngs::OsRng;
    use siphasher::sip::SipHasher;

    use super::*;
    use crate::salt::SeededSalt;

    struct HashState {
        k0: u64,
        k1: u64,
    }

    impl HashState {
        fn default() -> Self {
            let mut rng = OsRng;
            Self {
                k0: rng.try_next_u64().unwrap(),
                k1: rng.try_next_u64().unwrap(),
            }
        }

        fn build_hasher(&self) -> SipHasher {
            SipHasher::new_with_keys(self.k0, self.k1)
        }
    }

    fn hash_key(state: &HashState, key: u64) -> u64 {
        let mut h = state.build_hasher();
        h.write_u64(key);
        // Zero is reserved; a real SipHash output of zero would only cost a
        // collision with hash 1 here.
        h.finish().max(1)
    }

    fn seeded<V>(size_log2: u32, fill_percent: u32) -> HashTable<V, SeededSalt> {
        HashTable::with_config_and_salt(
            Config::new()
                .with_size_log2(size_log2)
                .with_fill_percent(fill_percent),
            SeededSalt::new(0x5eed),
        )
    }

    /// Recounts per-bucket state and checks it against the table counters.
    fn assert_counters_consistent<V, S>(table: &HashTable<V, S>) {
        let mut live = 0;
        let mut filled = 0;
        for bucket in table.buckets.iter() {
            let in_bucket = bucket
                .bags()
                .flat_map(|bag| bag.nodes.iter())
                .filter(|node| node.is_live())
                .count();
            assert_eq!(in_bucket, bucket.len);
            assert_eq!(bucket.bags().count(), bucket.bags, "{:#?}", table);
            live += in_bucket;
            if in_bucket > 0 {
                filled += 1;
            }
        }
        assert_eq!(live, table.len(), "{:#?}", table);
        assert_eq!(filled, table.stats().fill, "{:#?}", table);
    }

    #[test]
    fn scenario_small_table() {
        let mut table = seeded(2, 50);
        assert_eq!(table.bucket_count(), 4);

        for (hash, value) in [(11, "a"), (22, "b"), (33, "c")] {
            assert_eq!(table.probe(hash, value), Probe::Inserted);
        }
        assert_eq!(table.find(11), Some(&"a"));
        assert_eq!(table.find(22), Some(&"b"));
        assert_eq!(table.find(33), Some(&"c"));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn duplicate_probe_keeps_original() {
        let mut table = HashTable::new(2);
        assert_eq!(table.probe(42, "A"), Probe::Inserted);
        assert_eq!(table.probe(42, "B"), Probe::Exists);
        assert_eq!(table.find(42), Some(&"A"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn remove_then_find() {
        let mut table = HashTable::new(2);
        assert_eq!(table.probe(7, "x"), Probe::Inserted);
        assert_eq!(table.remove(7), Some("x"));
        assert_eq!(table.find(7), None);
        assert_eq!(table.remove(7), None);
        assert!(table.is_empty());
    }

    #[test]
    fn insert_and_find() {
        let state = HashState::default();
        let mut table = HashTable::new(0);
        for k in 0..512u64 {
            let hash = hash_key(&state, k);
            assert_eq!(table.probe(hash, k * 2), Probe::Inserted, "{:#?}", table);
            assert_eq!(table.find(hash), Some(&(k * 2)));
        }
        assert_eq!(table.len(), 512);
        for k in 0..512u64 {
            assert_eq!(table.find(hash_key(&state, k)), Some(&(k * 2)));
        }

        assert_eq!(table.find(hash_key(&state, 999_999)), None);
    }

    #[test]
    fn misses_do_not_disturb_other_entries() {
        let mut table = seeded(3, 50);
        for hash in 1..=20u64 {
            let _ = table.probe(hash, hash as i32);
        }
        let before = table.stats();

        for hash in 1000..1100u64 {
            assert_eq!(table.find(hash), None);
            assert_eq!(table.remove(hash), None);
            assert!(!table.contains(hash));
        }

        assert_eq!(table.stats(), before);
        for hash in 1..=20u64 {
            assert_eq!(table.find(hash), Some(&(hash as i32)));
        }
    }

    #[test]
    fn find_mut_and_modify() {
        let mut table = seeded(2, 50);
        for hash in 1..=5u64 {
            let _ = table.probe(hash, 1u32);
        }
        for hash in 1..=5u64 {
            if let Some(v) = table.find_mut(hash) {
                *v += 9;
            }
        }
        for hash in 1..=5u64 {
            assert_eq!(table.find(hash), Some(&10));
        }
        assert_eq!(table.find_mut(6), None);
    }

    #[test]
    fn growth_doubles_buckets() {
        let mut table = seeded(2, 50);
        let mut inserted = Vec::new();
        let mut hash = 1u64;
        while table.bucket_count() == 4 {
            assert_eq!(table.probe(hash, hash * 10), Probe::Inserted);
            inserted.push(hash);
            hash += 1;
        }

        assert_eq!(table.bucket_count(), 8);
        assert_eq!(table.resizes(), 1);
        for &hash in &inserted {
            assert_eq!(table.find(hash), Some(&(hash * 10)));
        }
        assert_counters_consistent(&table);
    }

    #[test]
    fn resize_threshold_is_strictly_exceeded() {
        // 4 buckets at 50%: 2 filled buckets is 2*100/5 = 40%, 3 is 60%.
        let mut table = seeded(2, 50);
        let mut hash = 1u64;
        while table.stats().fill < 2 {
            let _ = table.probe(hash, ());
            hash += 1;
        }
        assert_eq!(table.bucket_count(), 4);

        while table.resizes() == 0 {
            let _ = table.probe(hash, ());
            hash += 1;
        }
        assert_eq!(table.bucket_count(), 8);
    }

    #[test]
    fn many_resizes_preserve_mappings() {
        let mut table = seeded(2, 50);
        let mut inserted = 0;
        for hash in 1..=10_000u64 {
            if table.probe(hash, hash.wrapping_mul(31)) == Probe::Inserted {
                inserted += 1;
            }
        }

        assert!(table.resizes() >= 2, "{:#?}", table);
        assert_eq!(table.len(), inserted);
        assert_eq!(inserted, 10_000);
        for hash in 1..=10_000u64 {
            assert_eq!(table.find(hash), Some(&hash.wrapping_mul(31)));
        }
        assert_counters_consistent(&table);
    }

    #[test]
    fn resize_recomputes_stats() {
        let mut table = seeded(2, 50);
        for hash in 1..=2_000u64 {
            let _ = table.probe(hash, ());
        }

        let stats = table.stats();
        let max_chain = table.buckets.iter().map(|b| b.bags).max().unwrap();
        let max_len = table.buckets.iter().map(|b| b.len).max().unwrap();
        assert!(stats.max_bag_chain >= max_chain);
        assert!(stats.max_occupancy >= max_len);
        assert_eq!(stats.buckets, table.bucket_count());
        assert!(table.bucket_count().is_power_of_two());
        // The table doubles once more than half the buckets are filled.
        assert!(stats.fill * 100 / (stats.buckets + 1) <= 50);
    }

    /// Returns `count` distinct hashes that all land in bucket 0 under the
    /// table's current salt.
    fn colliding_hashes<V, S>(table: &HashTable<V, S>, count: usize) -> Vec<u64> {
        (1..)
            .filter(|&hash| bucket_index(hash, table.mask, table.salt) == 0)
            .take(count)
            .collect()
    }

    #[test]
    fn explicit_collision_chains() {
        // With one bucket filled out of two the table sits at 33% and never
        // doubles, so every colliding node piles into one bag chain.
        let mut table = seeded(1, 50);
        let hashes = colliding_hashes(&table, 200);
        for &hash in &hashes {
            assert_eq!(table.probe(hash, hash as u32), Probe::Inserted);
        }
        assert_eq!(table.bucket_count(), 2);
        assert_eq!(table.resizes(), 0);
        assert_eq!(table.stats().fill, 1);
        assert_eq!(table.stats().max_occupancy, 200);
        assert_eq!(table.stats().max_bag_chain, 200usize.div_ceil(BAG_SIZE));
        for &hash in &hashes {
            assert_eq!(table.find(hash), Some(&(hash as u32)));
        }
        assert_counters_consistent(&table);
    }

    #[test]
    fn removed_slots_are_reused() {
        let mut table = seeded(1, 50);
        let hashes = colliding_hashes(&table, 100);
        let (removed, kept) = hashes.split_at(50);
        for &hash in &hashes {
            let _ = table.probe(hash, hash);
        }
        let bags = table.bag_count();

        for &hash in removed {
            assert_eq!(table.remove(hash), Some(hash));
        }
        assert_eq!(table.len(), 50);
        assert_eq!(table.bag_count(), bags);

        for &hash in removed {
            assert_eq!(table.probe(hash, hash + 1000), Probe::Inserted);
        }
        assert_eq!(table.bag_count(), bags, "freed slots should absorb inserts");
        assert_eq!(table.resizes(), 0);
        for &hash in removed {
            assert_eq!(table.find(hash), Some(&(hash + 1000)));
        }
        for &hash in kept {
            assert_eq!(table.find(hash), Some(&hash));
        }
        assert_counters_consistent(&table);
    }

    struct CountingSalt {
        inner: SeededSalt,
        calls: usize,
    }

    impl SaltSource for CountingSalt {
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            self.calls += 1;
            self.inner.fill_bytes(dest);
        }
    }

    #[test]
    fn every_resize_draws_a_fresh_salt() {
        let mut source = CountingSalt {
            inner: SeededSalt::new(0x5a17),
            calls: 0,
        };

        let config = Config::new().with_size_log2(2).with_fill_percent(50);
        let mut table: HashTable<u64, _> = HashTable::with_config_and_salt(config, &mut source);
        let state = HashState::default();
        let mut salts = alloc::vec![table.salt];
        for key in 0..5_000u64 {
            let resizes = table.resizes();
            let _ = table.probe(hash_key(&state, key), key);
            if table.resizes() != resizes {
                assert_eq!(table.resizes(), resizes + 1);
                assert_ne!(table.salt, *salts.last().unwrap());
                salts.push(table.salt);
            }
        }
        let resizes = table.resizes();
        assert!(resizes >= 8, "only {resizes} resizes");
        assert_eq!(salts.len(), resizes + 1);
        drop(table);

        assert_eq!(source.calls, resizes + 1);
        salts.sort_unstable();
        salts.dedup();
        assert_eq!(salts.len(), resizes + 1);
    }

    #[test]
    fn remove_decrements_counters() {
        let mut table = seeded(4, 50);
        for hash in 1..=6u64 {
            let _ = table.probe(hash, ());
        }
        assert_counters_consistent(&table);

        for hash in 1..=6u64 {
            assert_eq!(table.remove(hash), Some(()));
            assert_counters_consistent(&table);
        }
        let stats = table.stats();
        assert_eq!(stats.nodes, 0);
        assert_eq!(stats.fill, 0);
        assert!(stats.max_occupancy >= 1);
    }

    #[test]
    fn remove_and_reinsert_cycles_do_not_grow() {
        let mut table = seeded(4, 50);
        for _ in 0..1_000 {
            for hash in 1..=4u64 {
                let _ = table.probe(hash, hash);
            }
            for hash in 1..=4u64 {
                assert_eq!(table.remove(hash), Some(hash));
            }
        }
        assert_eq!(table.resizes(), 0);
        assert_eq!(table.bucket_count(), 16);
        assert!(table.is_empty());
    }

    #[test]
    fn string_values() {
        let state = HashState::default();
        let mut table: HashTable<String> = HashTable::new(3);
        let words = ["alpha", "beta", "gamma", "delta", "epsilon"];
        for (i, word) in words.iter().enumerate() {
            let _ = table.probe(hash_key(&state, i as u64), word.to_string());
        }
        for (i, word) in words.iter().enumerate() {
            assert_eq!(
                table.find(hash_key(&state, i as u64)).map(String::as_str),
                Some(*word)
            );
        }
        assert_eq!(
            table.remove(hash_key(&state, 2)),
            Some("gamma".to_string())
        );
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn iter_visits_every_live_node() {
        let mut table = seeded(2, 50);
        for hash in 10..20u64 {
            let _ = table.probe(hash, hash + 100);
        }
        let _ = table.remove(15);

        assert_eq!(table.iter().len(), 9);
        let mut seen: Vec<_> = table.iter().map(|(h, &v)| (h, v)).collect();
        seen.sort();
        let expected: Vec<_> = (10..20u64)
            .filter(|&h| h != 15)
            .map(|h| (h, h + 100))
            .collect();
        assert_eq!(seen, expected);

        let via_ref: usize = (&table).into_iter().count();
        assert_eq!(via_ref, 9);
    }

    #[test]
    fn drain_empties_table() {
        let mut table = seeded(2, 50);
        for hash in 1..=40u64 {
            let _ = table.probe(hash, hash);
        }
        let buckets = table.bucket_count();

        let mut drained: Vec<_> = table.drain().collect();
        drained.sort();
        assert_eq!(drained, (1..=40u64).map(|h| (h, h)).collect::<Vec<_>>());

        assert!(table.is_empty());
        assert_eq!(table.bucket_count(), buckets);
        assert_eq!(table.bag_count(), 0);
        assert_eq!(table.stats().fill, 0);
        assert_eq!(table.find(1), None);

        assert_eq!(table.probe(1, 1), Probe::Inserted);
        assert_eq!(table.find(1), Some(&1));
    }

    #[test]
    fn partial_drain_still_empties() {
        let mut table = seeded(2, 50);
        for hash in 1..=40u64 {
            let _ = table.probe(hash, hash);
        }
        {
            let mut drain = table.drain();
            assert_eq!(drain.len(), 40);
            assert!(drain.next().is_some());
        }
        assert!(table.is_empty());
        assert_counters_consistent(&table);
    }

    #[test]
    fn clear_keeps_geometry() {
        let mut table = seeded(2, 50);
        for hash in 1..=100u64 {
            let _ = table.probe(hash, hash);
        }
        let buckets = table.bucket_count();
        let resizes = table.resizes();

        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.bucket_count(), buckets);
        assert_eq!(table.resizes(), resizes);
        assert_eq!(table.bag_count(), 0);
        for hash in 1..=100u64 {
            assert_eq!(table.find(hash), None);
        }
        assert_counters_consistent(&table);
    }

    #[test]
    fn values_are_dropped_exactly_once() {
        let marker = Rc::new(());
        {
            let mut table = seeded(2, 50);
            for hash in 1..=200u64 {
                let _ = table.probe(hash, Rc::clone(&marker));
            }
            assert_eq!(Rc::strong_count(&marker), 201);

            // Rejected duplicate is dropped immediately.
            assert_eq!(table.probe(1, Rc::clone(&marker)), Probe::Exists);
            assert_eq!(Rc::strong_count(&marker), 201);

            drop(table.remove(1));
            assert_eq!(Rc::strong_count(&marker), 200);

            let _ = table.drain().take(10).count();
            assert_eq!(Rc::strong_count(&marker), 1);

            for hash in 1..=50u64 {
                let _ = table.probe(hash, Rc::clone(&marker));
            }
            table.clear();
            assert_eq!(Rc::strong_count(&marker), 1);

            for hash in 1..=50u64 {
                let _ = table.probe(hash, Rc::clone(&marker));
            }
        }
        assert_eq!(Rc::strong_count(&marker), 1);
    }

    #[test]
    fn seeded_tables_are_reproducible() {
        let mut a = seeded(2, 50);
        let mut b = seeded(2, 50);
        for hash in 1..=500u64 {
            let _ = a.probe(hash, ());
            let _ = b.probe(hash, ());
        }
        assert_eq!(a.stats(), b.stats());
        assert_eq!(a.bag_histogram(), b.bag_histogram());
    }

    #[test]
    fn histograms_cover_every_bucket() {
        let mut table = seeded(4, 50);
        for hash in 1..=300u64 {
            let _ = table.probe(hash, ());
        }
        let bags = table.bag_histogram();
        let occupancy = table.occupancy_histogram();
        assert_eq!(bags.iter().sum::<usize>(), table.bucket_count());
        assert_eq!(occupancy.iter().sum::<usize>(), table.bucket_count());
        let nodes: usize = occupancy.iter().enumerate().map(|(n, c)| n * c).sum();
        assert_eq!(nodes, table.len());
        assert_eq!(
            table.bucket_count() - occupancy[0],
            table.stats().fill,
            "{:#?}",
            table
        );
    }

    #[test]
    fn debug_stats_accounting() {
        let mut table = seeded(3, 50);
        for hash in 1..=50u64 {
            let _ = table.probe(hash, 0u64);
        }
        let stats = table.debug_stats();
        assert_eq!(stats.table, table.stats());
        assert_eq!(stats.occupied_slots, 50);
        assert_eq!(stats.total_slots, stats.bags * BAG_SIZE);
        assert!(stats.slot_utilization > 0.0 && stats.slot_utilization <= 1.0);
        assert_eq!(
            stats.wasted_bytes,
            (stats.total_slots - 50) * core::mem::size_of::<Node<u64>>()
        );
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    #[cfg(feature = "std")]
    fn histogram_output() {
        let state = HashState::default();
        let mut table = HashTable::new(8);
        for k in 0..10_000u64 {
            let _ = table.probe(hash_key(&state, k), k);
        }

        table.print_bag_histogram();
        table.debug_stats().print();
    }

    #[test]
    fn invalid_config_is_reported() {
        let err = HashTable::<u8>::try_with_config(Config::new().with_fill_percent(0));
        assert!(matches!(
            err,
            Err(ConfigError::FillPercent {
                fill_percent: 0,
                ..
            })
        ));
        let err = HashTable::<u8>::try_with_config(Config::new().with_fill_percent(100));
        assert!(matches!(
            err,
            Err(ConfigError::FillPercent {
                fill_percent: 100,
                max: 98
            })
        ));
    }

    #[test]
    #[should_panic(expected = "invalid hash table configuration")]
    fn invalid_config_panics() {
        let _ = HashTable::<u8>::with_config(Config::new().with_fill_percent(101));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "reserved")]
    fn zero_hash_is_rejected() {
        let mut table = HashTable::new(2);
        let _ = table.probe(0, "zero");
    }

    #[test]
    fn debug_output_hides_salt() {
        let table: HashTable<u8, _> = seeded(2, 50);
        let output = alloc::format!("{:?}", table);
        assert!(output.contains("buckets: 4"));
        assert!(!output.contains("salt"));
    }
}
