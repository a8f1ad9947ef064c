//! # Multi level cache
//!
//! A [`CacheManager`] keeps several banks of keyed items, ordered from the most refined (bank 0, handed to consumers)
//! to the least refined (the last bank). An item of bank `i` is created from the value of the same key in bank `i + 1`,
//! so a key requested from bank 0 travels up the pipeline one bank at a time.
//!
//! # Usage
//! 1. Create the manager with [`CacheManager::new`], this starts the worker threads.
//! 1. Register banks top down with [`CacheManager::add_bank`].
//! 1. [`CacheManager::prefetch`] every key that will be needed, in the order it will be needed.
//! 1. [`CacheManager::acquire`] and [`CacheManager::release`] each prefetched key.
//! 1. [`CacheManager::terminate`] once every acquired key has been released.
//!
//! # Item lifecycle
//! `REQUESTED -> PREPARING -> PREPARED -> ACQUIRED -> RELEASED -> (evicted)`
//!
//! Only released items can be evicted, least recently released first.
//! Every other item holds one of the bank's `capacity` slots and no request is admitted while the slots are full.
//! A released item may be revived by a new request as long as a slot is free.
//!
//! Acquiring a key that was never prefetched blocks forever.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

mod bank;
use bank::*;
pub use bank::ItemState;

/// Waits are bounded so a missed wakeup only costs one interval.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Keys the cache can be indexed by. `Display` names the key in logs and errors.
pub trait CacheKey: Ord + Clone + Display + Send + Sync + 'static {}
impl<T: Ord + Clone + Display + Send + Sync + 'static> CacheKey for T {}

/// Creates and destroys the values of one bank.
///
/// Called from worker threads without the manager's lock held,
/// implementations must only communicate with the manager through their return values.
pub trait CacheFactory<K>: Send + Sync + 'static {
	type Value: Send + Sync + 'static;
	/// Value type of the bank below this one, `()` for the last bank.
	type Lower: Send + Sync + 'static;

	/// Builds the value for `key` from the lower bank's value, `lower` is `None` for the last bank.
	///
	/// # Returns
	/// - `Ok(None)` when there is nothing to cache for `key`, consumers get an empty result.
	/// - `Err` for faults worth reporting, consumers get [`CachePreparation`](crate::Error::CachePreparation).
	fn create(&self, key: &K, lower: Option<&Self::Lower>) -> crate::Result<Option<Self::Value>>;

	/// Called once the value has been evicted.
	fn destroy(&self, _key: &K, _value: &Self::Value) {}

	/// Values that already exist when the bank is added, for example files left on disk by a previous run.
	fn populate_cache(&self) -> Vec<(K, Self::Value)> {
		Vec::new()
	}
}

/// Slot usage of a bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankStats {
	/// Items that are not released.
	pub hard: usize,
	/// All items.
	pub soft: usize,
	pub capacity: usize,
}

struct Request<K> {
	key: K,
	refs: usize,
}

enum Admission {
	/// Items are added to every bank above `existing`, `None` when no bank has the key.
	Ready { existing: Option<usize> },
	/// The bank has no free slot or worker.
	Full(usize),
	/// The key's old value is still being destroyed.
	Destroying,
}

enum LowerInput {
	Ready(Option<AnyValue>),
	Unavailable,
	Failed(String),
}

enum Outcome {
	Ready(AnyValue),
	Unavailable,
	Failed(String),
}

struct State<K> {
	banks: Vec<Bank<K>>,
	queue: VecDeque<Request<K>>,
	terminating: bool,
	seq: u64,
	clock: u64,
}

struct Shared<K> {
	state: Mutex<State<K>>,
	/// Signalled when a bank 0 item changes, acquirers wait on this.
	top_cond: Condvar,
	/// Signalled when there may be work for the workers.
	work_cond: Condvar,
}

impl<K> Shared<K> {
	fn notify_all(&self) {
		self.top_cond.notify_all();
		self.work_cond.notify_all();
	}
}

pub struct CacheManager<K: CacheKey> {
	shared: Arc<Shared<K>>,
	workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<K: CacheKey> CacheManager<K> {
	/// Creates a manager and starts `max_worker_threads` workers shared by every bank.
	///
	/// # Errors
	/// - [`IO`](crate::error::Error::IO) when a thread can't be spawned.
	pub fn new(max_worker_threads: usize) -> crate::Result<Self> {
		let shared = Arc::new(Shared {
			state: Mutex::new(State {
				banks: Vec::new(),
				queue: VecDeque::new(),
				terminating: false,
				seq: 0,
				clock: 0,
			}),
			top_cond: Condvar::new(),
			work_cond: Condvar::new(),
		});

		let mut workers = Vec::with_capacity(max_worker_threads);
		for i in 0..max_worker_threads {
			let shared = shared.clone();
			workers.push(
				std::thread::Builder::new()
					.name(format!("cache-worker-{}", i))
					.spawn(move || worker_loop(shared))?
			);
		}

		Ok(Self {
			shared,
			workers: Mutex::new(workers),
		})
	}

	/// Adds a bank below the existing ones.
	///
	/// # Parameters
	/// - `capacity` - Number of items that may hold a slot at once.
	/// - `max_workers` - Number of items of this bank that may wait for or be in preparation at once.
	pub fn add_bank<F: CacheFactory<K>>(&self, factory: F, capacity: usize, max_workers: usize) {
		assert!(capacity > 0 && max_workers > 0, "bank capacity and workers must be at least 1");

		let factory: Arc<dyn ErasedFactory<K>> = Arc::new(Erased(factory));
		let existing = factory.populate_cache();

		let mut evicted = Vec::new();
		{
			let mut state = self.shared.state.lock();
			let index = state.banks.len();
			let mut bank = Bank::new(factory, capacity, max_workers);
			for (key, value) in existing {
				bank.evict_lru(index, &mut evicted);
				state.seq += 1;
				state.clock += 1;
				log::debug!("Bank {} populated with {}", index, key);
				bank.items.insert(key, CacheItem::populated(value, state.seq, state.clock));
			}
			state.banks.push(bank);
		}

		destroy_all(&evicted);
		if !evicted.is_empty() {
			let mut state = self.shared.state.lock();
			for e in &evicted {
				state.banks[e.bank].destroying.remove(&e.key);
			}
		}
		self.shared.notify_all();
	}

	/// Queues `key` for background preparation, returns immediately.
	///
	/// Each prefetch must be matched by one [`acquire`](Self::acquire) and [`release`](Self::release).
	pub fn prefetch(&self, key: K) {
		let mut state = self.shared.state.lock();
		state.prefetch(key);
		drop(state);
		self.shared.work_cond.notify_all();
	}

	/// Blocks until the bank 0 value of a prefetched `key` is prepared and pins it.
	///
	/// The key must be released afterwards unless this returns [`CacheExhausted`](crate::Error::CacheExhausted).
	///
	/// # Returns
	/// `None` when a factory had nothing for the key.
	///
	/// # Errors
	/// - [`CachePreparation`](crate::Error::CachePreparation) when a factory failed to create the value.
	/// - [`CacheExhausted`](crate::Error::CacheExhausted) when the key can't be admitted because every slot is acquired.
	///
	/// # Panics
	/// When `V` isn't the value type of bank 0.
	pub fn acquire<V: Any + Send + Sync>(&self, key: &K) -> crate::Result<Option<Arc<V>>> {
		let mut state = self.shared.state.lock();
		loop {
			if let Some(item) = state.banks.first_mut().and_then(|b| b.items.get_mut(key)) {
				if matches!(item.state, ItemState::Prepared | ItemState::Acquired) {
					item.state = ItemState::Acquired;
					if let Some(reason) = &item.failure {
						return Err(crate::Error::CachePreparation { key: key.to_string(), reason: reason.clone() });
					}
					return Ok(item.value.clone().map(|v| v.downcast::<V>().unwrap_or_else(|_| panic!("bank 0 doesn't hold values of the requested type"))));
				}
			}

			if let Some((bank, capacity)) = state.exhausted_bank(key) {
				log::error!("Can't admit {}, all {} items of bank {} are acquired", key, capacity, bank);
				return Err(crate::Error::CacheExhausted { bank, capacity });
			}

			self.shared.top_cond.wait_for(&mut state, POLL_INTERVAL);
		}
	}

	/// Unpins an acquired key, once all its prefetches are released the item becomes an eviction candidate.
	///
	/// # Panics
	/// When `key` isn't acquired.
	pub fn release(&self, key: &K) {
		let mut state = self.shared.state.lock();
		let acquired = state.banks.first()
			.and_then(|b| b.items.get(key))
			.map_or(false, |i| i.state == ItemState::Acquired);
		assert!(acquired, "released {} which isn't acquired", key);
		state.release_item(0, key);
		drop(state);
		self.shared.notify_all();
	}

	pub fn bank_stats(&self) -> Vec<BankStats> {
		let state = self.shared.state.lock();
		state.banks.iter().map(|b| BankStats {
			hard: b.count_hard(),
			soft: b.count_soft(),
			capacity: b.capacity,
		}).collect()
	}

	/// Stops the workers after their current item and evicts everything.
	///
	/// Prefetched keys whose preparation never started are dropped.
	///
	/// # Panics
	/// When an item is still acquired, or prepared but never acquired.
	pub fn terminate(&self) {
		{
			let mut state = self.shared.state.lock();
			if state.terminating {
				return;
			}
			state.terminating = true;
		}
		self.shared.notify_all();

		let workers = std::mem::take(&mut *self.workers.lock());
		for w in workers {
			if w.join().is_err() {
				log::error!("Cache worker panicked");
			}
		}

		let evicted = {
			let mut state = self.shared.state.lock();
			state.queue.clear();
			state.drop_unstarted();
			if !std::thread::panicking() {
				for (i, bank) in state.banks.iter().enumerate() {
					for (key, item) in &bank.items {
						assert!(item.is_released(), "bank {} item {} is still {:?} at termination", i, key, item.state);
					}
				}
			}
			state.evict_all()
		};
		destroy_all(&evicted);
		log::debug!("Cache manager terminated, {} items evicted", evicted.len());
	}
}

impl<K: CacheKey> Drop for CacheManager<K> {
	fn drop(&mut self) {
		self.terminate();
	}
}

impl<K: CacheKey> State<K> {
	fn prefetch(&mut self, key: K) {
		if let Some(item) = self.banks.first_mut().and_then(|b| b.items.get_mut(&key)) {
			if !item.is_released() {
				item.refcount += 1;
				return;
			}
		}
		if let Some(r) = self.queue.iter_mut().find(|r| r.key == key) {
			r.refs += 1;
			return;
		}
		log::trace!("Queued {}", key);
		self.queue.push_back(Request { key, refs: 1 });
	}

	/// Walks the banks top down to the first one that already has `key`.
	fn admission(&self, key: &K) -> Admission {
		for (i, bank) in self.banks.iter().enumerate() {
			if bank.destroying.contains(key) {
				return Admission::Destroying;
			}
			match bank.items.get(key) {
				Some(item) => {
					if item.is_released() && !bank.has_free_slot() {
						return Admission::Full(i);
					}
					return Admission::Ready { existing: Some(i) };
				},
				None => {
					if !bank.has_free_slot() || !bank.has_free_worker() {
						return Admission::Full(i);
					}
				},
			}
		}
		Admission::Ready { existing: None }
	}

	/// Moves queued requests into the banks in FIFO order, stopping at the first one that doesn't fit.
	///
	/// # Returns
	/// Number of requests admitted.
	fn admit_requests(&mut self, evicted: &mut Vec<Eviction<K>>) -> usize {
		let mut admitted = 0;
		loop {
			let (key, refs) = match self.queue.front() {
				Some(r) => (r.key.clone(), r.refs),
				None => break,
			};
			let existing = match self.admission(&key) {
				Admission::Ready { existing } => existing,
				Admission::Full(_) | Admission::Destroying => break,
			};
			self.queue.pop_front();
			admitted += 1;

			let refs_for = |bank: usize| if bank == 0 { refs } else { 1 };
			for i in 0..existing.unwrap_or(self.banks.len()) {
				self.seq += 1;
				let seq = self.seq;
				let bank = &mut self.banks[i];
				bank.evict_lru(i, evicted);
				bank.items.insert(key.clone(), CacheItem::requested(refs_for(i), seq));
				log::debug!("Bank {} requested {}", i, key);
			}
			if let Some(i) = existing {
				if let Some(item) = self.banks[i].items.get_mut(&key) {
					item.refcount += refs_for(i);
					if item.is_released() {
						log::debug!("Bank {} revived {}", i, key);
						item.state = ItemState::Prepared;
					}
				}
			}
		}
		admitted
	}

	/// Oldest requested item whose lower item is ready.
	fn next_work(&self) -> Option<(usize, K)> {
		let mut best: Option<(u64, usize, &K)> = None;
		for (i, bank) in self.banks.iter().enumerate() {
			for (key, item) in &bank.items {
				if item.state != ItemState::Requested {
					continue;
				}
				let ready = match self.banks.get(i + 1) {
					None => true,
					Some(lower) => lower.items.get(key).map_or(false, |l| matches!(l.state, ItemState::Prepared | ItemState::Acquired)),
				};
				if ready && best.map_or(true, |(seq, _, _)| item.seq < seq) {
					best = Some((item.seq, i, key));
				}
			}
		}
		best.map(|(_, i, k)| (i, k.clone()))
	}

	/// Marks the item as preparing and pins the lower item for the duration of the create.
	fn start_work(&mut self, bank: usize, key: &K) -> LowerInput {
		if let Some(item) = self.banks[bank].items.get_mut(key) {
			item.state = ItemState::Preparing;
		}
		match self.banks.get_mut(bank + 1).and_then(|b| b.items.get_mut(key)) {
			None => LowerInput::Ready(None),
			Some(lower) => {
				if lower.state == ItemState::Prepared {
					lower.state = ItemState::Acquired;
				}
				match (&lower.value, &lower.failure) {
					(Some(v), _) => LowerInput::Ready(Some(v.clone())),
					(None, Some(reason)) => LowerInput::Failed(reason.clone()),
					(None, None) => LowerInput::Unavailable,
				}
			},
		}
	}

	fn finish_work(&mut self, bank: usize, key: &K, outcome: Outcome) {
		if let Some(item) = self.banks[bank].items.get_mut(key) {
			item.state = ItemState::Prepared;
			match outcome {
				Outcome::Ready(v) => item.value = Some(v),
				Outcome::Unavailable => {},
				Outcome::Failed(reason) => item.failure = Some(reason),
			}
		}
		if bank + 1 < self.banks.len() {
			self.release_item(bank + 1, key);
		}
	}

	/// Drops one reference, the last one releases the item.
	///
	/// Items without a value are removed rather than released, there's nothing worth keeping.
	fn release_item(&mut self, bank: usize, key: &K) {
		self.clock += 1;
		let clock = self.clock;
		let b = &mut self.banks[bank];
		let Some(item) = b.items.get_mut(key) else {
			panic!("bank {} has no item {} to release", bank, key);
		};
		assert!(item.refcount > 0, "bank {} item {} released too many times", bank, key);
		item.refcount -= 1;

		if item.refcount > 0 {
			if item.state == ItemState::Acquired {
				item.state = ItemState::Prepared;
			}
			return;
		}

		if item.value.is_some() {
			item.state = ItemState::Released;
			item.last_used = clock;
			log::trace!("Bank {} released {}", bank, key);
		} else {
			b.items.remove(key);
			log::trace!("Bank {} dropped empty item {}", bank, key);
		}
	}

	/// Finds the bank a queued `key` is stuck behind when nothing but a consumer release could free a slot.
	fn exhausted_bank(&self, key: &K) -> Option<(usize, usize)> {
		if !self.queue.iter().any(|r| &r.key == key) {
			return None;
		}
		if self.banks.iter().any(|b| b.count_in_flight() > 0 || !b.destroying.is_empty()) {
			return None;
		}
		let head = &self.queue.front()?.key;
		match self.admission(head) {
			Admission::Full(i) => {
				let bank = &self.banks[i];
				let pinned = bank.items.values().all(|item| matches!(item.state, ItemState::Acquired | ItemState::Released));
				pinned.then_some((i, bank.capacity))
			},
			_ => None,
		}
	}

	/// Removes requested items top down along with the pins they hold on lower banks.
	fn drop_unstarted(&mut self) {
		for i in 0..self.banks.len() {
			let keys: Vec<K> = self.banks[i].items.iter()
				.filter(|(_, item)| item.state == ItemState::Requested)
				.map(|(k, _)| k.clone())
				.collect();
			for key in keys {
				self.banks[i].items.remove(&key);
				if i + 1 < self.banks.len() && self.banks[i + 1].items.contains_key(&key) {
					self.release_item(i + 1, &key);
				}
			}
		}
	}

	fn evict_all(&mut self) -> Vec<Eviction<K>> {
		let mut evicted = Vec::new();
		for (i, bank) in self.banks.iter_mut().enumerate() {
			let factory = bank.factory.clone();
			for (key, item) in std::mem::take(&mut bank.items) {
				if let Some(value) = item.value {
					evicted.push(Eviction { bank: i, key, value, factory: factory.clone() });
				}
			}
		}
		evicted
	}
}

fn destroy_all<K: CacheKey>(evicted: &[Eviction<K>]) {
	for e in evicted {
		log::debug!("Bank {} evicting {}", e.bank, e.key);
		e.factory.destroy(&e.key, &e.value);
	}
}

fn run_create<K: CacheKey>(factory: &dyn ErasedFactory<K>, bank: usize, key: &K, lower: Option<&AnyValue>) -> Outcome {
	match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| factory.create(key, lower))) {
		Ok(Ok(Some(v))) => Outcome::Ready(v),
		Ok(Ok(None)) => {
			log::info!("Bank {} has no value for {}", bank, key);
			Outcome::Unavailable
		},
		Ok(Err(e)) => {
			log::warn!("Bank {} failed to prepare {}: {}", bank, key, e);
			Outcome::Failed(e.to_string())
		},
		Err(_) => {
			log::error!("Bank {} factory panicked preparing {}", bank, key);
			Outcome::Failed("factory panicked".to_string())
		},
	}
}

fn worker_loop<K: CacheKey>(shared: Arc<Shared<K>>) {
	let mut state = shared.state.lock();
	while !state.terminating {
		let mut evicted = Vec::new();
		if state.admit_requests(&mut evicted) > 0 {
			shared.work_cond.notify_all();
		}

		if !evicted.is_empty() {
			MutexGuard::unlocked(&mut state, || destroy_all(&evicted));
			for e in &evicted {
				state.banks[e.bank].destroying.remove(&e.key);
			}
			shared.notify_all();
			continue;
		}

		if let Some((bank, key)) = state.next_work() {
			let outcome = match state.start_work(bank, &key) {
				LowerInput::Unavailable => Outcome::Unavailable,
				LowerInput::Failed(reason) => Outcome::Failed(reason),
				LowerInput::Ready(lower) => {
					let factory = state.banks[bank].factory.clone();
					log::debug!("Bank {} preparing {}", bank, key);
					MutexGuard::unlocked(&mut state, || run_create(&*factory, bank, &key, lower.as_ref()))
				},
			};
			state.finish_work(bank, &key, outcome);
			shared.notify_all();
			continue;
		}

		shared.work_cond.wait_for(&mut state, POLL_INTERVAL);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Default, Clone)]
	struct Log {
		created: Arc<Mutex<Vec<u32>>>,
		destroyed: Arc<Mutex<Vec<u32>>>,
	}

	/// Last bank, values are strings, key 13 doesn't exist and key 66 fails.
	struct Disk {
		log: Log,
		existing: Vec<u32>,
	}

	impl CacheFactory<u32> for Disk {
		type Value = String;
		type Lower = ();

		fn create(&self, key: &u32, lower: Option<&()>) -> crate::Result<Option<String>> {
			assert!(lower.is_none());
			self.log.created.lock().push(*key);
			match key {
				13 => Ok(None),
				66 => Err(crate::Error::Remote("connection reset".to_string())),
				_ => Ok(Some(format!("repo-{}", key))),
			}
		}

		fn destroy(&self, key: &u32, _value: &String) {
			self.log.destroyed.lock().push(*key);
		}

		fn populate_cache(&self) -> Vec<(u32, String)> {
			self.existing.iter().map(|k| (*k, format!("repo-{}", k))).collect()
		}
	}

	/// Top bank built from the disk bank's string.
	struct Memory {
		log: Log,
	}

	impl CacheFactory<u32> for Memory {
		type Value = usize;
		type Lower = String;

		fn create(&self, key: &u32, lower: Option<&String>) -> crate::Result<Option<usize>> {
			self.log.created.lock().push(*key);
			Ok(lower.map(|s| s.len()))
		}

		fn destroy(&self, key: &u32, _value: &usize) {
			self.log.destroyed.lock().push(*key);
		}
	}

	fn pipeline(capacity: usize, existing: Vec<u32>) -> (CacheManager<u32>, Log, Log) {
		let mem = Log::default();
		let disk = Log::default();
		let mgr = CacheManager::new(2).unwrap();
		mgr.add_bank(Memory { log: mem.clone() }, capacity, 1);
		mgr.add_bank(Disk { log: disk.clone(), existing }, capacity, 2);
		(mgr, mem, disk)
	}

	fn get(mgr: &CacheManager<u32>, key: u32) -> crate::Result<Option<Arc<usize>>> {
		let r = mgr.acquire::<usize>(&key);
		mgr.release(&key);
		r
	}

	#[test]
	fn value_flows_through_both_banks() {
		let (mgr, mem, disk) = pipeline(2, vec![]);
		mgr.prefetch(1);
		assert_eq!(*get(&mgr, 1).unwrap().unwrap(), "repo-1".len());
		assert_eq!(*mem.created.lock(), vec![1]);
		assert_eq!(*disk.created.lock(), vec![1]);
		mgr.terminate();
	}

	#[test]
	fn unavailable_lower_value_is_none() {
		let (mgr, mem, _disk) = pipeline(2, vec![]);
		mgr.prefetch(13);
		mgr.prefetch(2);
		assert!(get(&mgr, 13).unwrap().is_none());
		assert!(get(&mgr, 2).unwrap().is_some());
		/* The memory factory is never asked to build from nothing */
		assert_eq!(*mem.created.lock(), vec![2]);
		mgr.terminate();
	}

	#[test]
	fn failed_create_is_reported() {
		let (mgr, _mem, _disk) = pipeline(2, vec![]);
		mgr.prefetch(66);
		assert!(matches!(get(&mgr, 66), Err(crate::Error::CachePreparation { .. })));
		mgr.terminate();
	}

	#[test]
	fn repeated_prefetch_prepares_once() {
		let (mgr, mem, _disk) = pipeline(2, vec![]);
		mgr.prefetch(4);
		mgr.prefetch(4);
		assert!(get(&mgr, 4).unwrap().is_some());
		assert!(get(&mgr, 4).unwrap().is_some());
		assert_eq!(*mem.created.lock(), vec![4]);
		mgr.terminate();
	}

	#[test]
	fn populated_values_skip_creation() {
		let (mgr, mem, disk) = pipeline(2, vec![7]);
		mgr.prefetch(7);
		assert!(get(&mgr, 7).unwrap().is_some());
		assert!(disk.created.lock().is_empty());
		assert_eq!(*mem.created.lock(), vec![7]);
		mgr.terminate();
	}

	#[test]
	fn hard_count_never_exceeds_capacity() {
		let (mgr, _mem, _disk) = pipeline(2, vec![]);
		let keys: Vec<u32> = (1..=8).collect();
		for k in &keys {
			mgr.prefetch(*k);
		}
		for k in &keys {
			for s in mgr.bank_stats() {
				assert!(s.hard <= s.capacity);
				assert!(s.soft <= s.capacity);
			}
			assert!(get(&mgr, *k).unwrap().is_some());
		}
		mgr.terminate();
	}

	#[test]
	fn least_recently_released_is_evicted_first() {
		let log = Log::default();
		let mgr = CacheManager::new(1).unwrap();
		mgr.add_bank(Disk { log: log.clone(), existing: vec![] }, 2, 1);
		for k in 1..=4u32 {
			mgr.prefetch(k);
			let v = mgr.acquire::<String>(&k).unwrap();
			mgr.release(&k);
			assert!(v.is_some());
		}
		assert_eq!(*log.destroyed.lock(), vec![1, 2]);
		mgr.terminate();
		assert_eq!(log.destroyed.lock().len(), 4);
	}

	#[test]
	fn revived_item_is_not_evicted() {
		let log = Log::default();
		let mgr = CacheManager::new(1).unwrap();
		mgr.add_bank(Disk { log: log.clone(), existing: vec![] }, 2, 1);
		for k in [1u32, 2, 1, 3] {
			mgr.prefetch(k);
			mgr.acquire::<String>(&k).unwrap();
			mgr.release(&k);
		}
		assert_eq!(*log.destroyed.lock(), vec![2]);
		assert_eq!(*log.created.lock(), vec![1, 2, 3]);
		mgr.terminate();
	}

	#[test]
	fn exhausted_bank_is_an_error() {
		let (mgr, _mem, _disk) = pipeline(1, vec![]);
		mgr.prefetch(1);
		mgr.prefetch(2);
		assert!(mgr.acquire::<usize>(&1).unwrap().is_some());
		assert!(matches!(mgr.acquire::<usize>(&2), Err(crate::Error::CacheExhausted { bank: 0, capacity: 1 })));
		mgr.release(&1);
		assert!(get(&mgr, 2).unwrap().is_some());
		mgr.terminate();
	}

	#[test]
	#[should_panic]
	fn terminate_with_acquired_item_panics() {
		let (mgr, _mem, _disk) = pipeline(2, vec![]);
		mgr.prefetch(1);
		mgr.acquire::<usize>(&1).unwrap();
		mgr.terminate();
	}
}
