//! A single level of the cache and the items in it.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::CacheFactory;

pub(super) type AnyValue = Arc<dyn Any + Send + Sync>;

/// Lifecycle of an item, see [`CacheManager`](super::CacheManager) for the transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
	Requested,
	Preparing,
	Prepared,
	Acquired,
	Released,
}

pub(super) struct CacheItem {
	pub state: ItemState,
	/// `None` once prepared means the factory had nothing for this key.
	pub value: Option<AnyValue>,
	/// Set instead of `value` when the factory failed.
	pub failure: Option<String>,
	/// Outstanding prefetches of bank 0 keys, or the pin held by the item above for lower banks.
	pub refcount: usize,
	/// Admission order, work is picked oldest first.
	pub seq: u64,
	/// Release clock stamp, the smallest released stamp is evicted first.
	pub last_used: u64,
}

impl CacheItem {
	pub fn requested(refcount: usize, seq: u64) -> Self {
		Self {
			state: ItemState::Requested,
			value: None,
			failure: None,
			refcount,
			seq,
			last_used: 0,
		}
	}

	pub fn populated(value: AnyValue, seq: u64, last_used: u64) -> Self {
		Self {
			state: ItemState::Released,
			value: Some(value),
			failure: None,
			refcount: 0,
			seq,
			last_used,
		}
	}

	pub fn is_released(&self) -> bool {
		self.state == ItemState::Released
	}

	pub fn is_in_flight(&self) -> bool {
		matches!(self.state, ItemState::Requested | ItemState::Preparing)
	}
}

/// Factory operations with the bank's value type erased so banks of different types can share one index.
pub(super) trait ErasedFactory<K>: Send + Sync {
	fn create(&self, key: &K, lower: Option<&AnyValue>) -> crate::Result<Option<AnyValue>>;
	fn destroy(&self, key: &K, value: &AnyValue);
	fn populate_cache(&self) -> Vec<(K, AnyValue)>;
}

pub(super) struct Erased<F>(pub F);

impl<K, F> ErasedFactory<K> for Erased<F>
where F: CacheFactory<K>
{
	fn create(&self, key: &K, lower: Option<&AnyValue>) -> crate::Result<Option<AnyValue>> {
		let lower = lower.map(|v| v.downcast_ref::<F::Lower>().expect("bank value type doesn't match the bank above it"));
		Ok(self.0.create(key, lower)?.map(|v| Arc::new(v) as AnyValue))
	}

	fn destroy(&self, key: &K, value: &AnyValue) {
		if let Some(v) = value.downcast_ref::<F::Value>() {
			self.0.destroy(key, v);
		}
	}

	fn populate_cache(&self) -> Vec<(K, AnyValue)> {
		self.0.populate_cache().into_iter().map(|(k, v)| (k, Arc::new(v) as AnyValue)).collect()
	}
}

/// Work handed to a worker to run outside the lock.
pub(super) struct Eviction<K> {
	pub bank: usize,
	pub key: K,
	pub value: AnyValue,
	pub factory: Arc<dyn ErasedFactory<K>>,
}

pub(super) struct Bank<K> {
	pub factory: Arc<dyn ErasedFactory<K>>,
	pub capacity: usize,
	pub max_workers: usize,
	pub items: BTreeMap<K, CacheItem>,
	/// Keys whose value is being destroyed, they can't be admitted again until that finishes.
	pub destroying: BTreeSet<K>,
}

impl<K: Ord + Clone> Bank<K> {
	pub fn new(factory: Arc<dyn ErasedFactory<K>>, capacity: usize, max_workers: usize) -> Self {
		Self {
			factory,
			capacity,
			max_workers,
			items: BTreeMap::new(),
			destroying: BTreeSet::new(),
		}
	}

	/// Items that hold a slot, everything but released ones.
	pub fn count_hard(&self) -> usize {
		self.items.values().filter(|i| !i.is_released()).count()
	}

	/// Every item in the index.
	pub fn count_soft(&self) -> usize {
		self.items.len()
	}

	pub fn count_in_flight(&self) -> usize {
		self.items.values().filter(|i| i.is_in_flight()).count()
	}

	/// Whether one more item may take a slot.
	pub fn has_free_slot(&self) -> bool {
		self.count_hard() < self.capacity
	}

	pub fn has_free_worker(&self) -> bool {
		self.count_in_flight() < self.max_workers
	}

	/// Removes released items, least recently used first, until the soft count is below capacity.
	///
	/// Linear scan per eviction, banks are small.
	pub fn evict_lru(&mut self, bank: usize, evicted: &mut Vec<Eviction<K>>) {
		while self.count_soft() >= self.capacity {
			let victim = self.items.iter()
				.filter(|(_, i)| i.is_released())
				.min_by_key(|(_, i)| i.last_used)
				.map(|(k, _)| k.clone());
			let Some(key) = victim else { break };
			if let Some(value) = self.items.remove(&key).and_then(|i| i.value) {
				self.destroying.insert(key.clone());
				evicted.push(Eviction { bank, key, value, factory: self.factory.clone() });
			}
		}
	}
}
