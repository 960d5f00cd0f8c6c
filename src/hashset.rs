//! Open-addressing hash set.
//!
//! Linear probing over a power-of-two table. Removal leaves a tombstone so
//! probe chains stay intact; tombstones count toward the load factor and
//! disappear when the table is rebuilt.

use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash, RandomState};

const MIN_CAPACITY: usize = 8;

#[derive(Debug, Clone)]
enum Slot<T> {
	Empty,
	Tombstone,
	Full(T),
}

/// Hash set with open addressing and linear probing.
#[derive(Debug, Clone)]
pub struct OpenSet<T, S = RandomState> {
	slots: Vec<Slot<T>>,
	len: usize,
	tombstones: usize,
	hasher: S,
}

impl<T: Hash + Eq> OpenSet<T, RandomState> {
	pub fn new() -> Self {
		Self::with_hasher(RandomState::new())
	}

	pub fn with_capacity(capacity: usize) -> Self {
		let mut set = Self::new();
		set.rebuild(table_size(capacity));
		set
	}
}

impl<T: Hash + Eq> Default for OpenSet<T, RandomState> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T: Hash + Eq, S: BuildHasher> OpenSet<T, S> {
	pub fn with_hasher(hasher: S) -> Self {
		Self {
			slots: Vec::new(),
			len: 0,
			tombstones: 0,
			hasher,
		}
	}

	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	/// Number of slots in the table.
	pub fn capacity(&self) -> usize {
		self.slots.len()
	}

	fn home<Q: Hash + ?Sized>(&self, value: &Q) -> usize {
		(self.hasher.hash_one(value) as usize) & (self.slots.len() - 1)
	}

	/// Index of the slot holding `value`.
	fn find<Q>(&self, value: &Q) -> Option<usize>
	where
		T: Borrow<Q>,
		Q: Hash + Eq + ?Sized,
	{
		if self.slots.is_empty() {
			return None;
		}
		let mask = self.slots.len() - 1;
		let mut idx = self.home(value);
		for _ in 0..self.slots.len() {
			match &self.slots[idx] {
				Slot::Empty => return None,
				Slot::Full(v) if v.borrow() == value => return Some(idx),
				_ => {}
			}
			idx = (idx + 1) & mask;
		}
		None
	}

	pub fn contains<Q>(&self, value: &Q) -> bool
	where
		T: Borrow<Q>,
		Q: Hash + Eq + ?Sized,
	{
		self.find(value).is_some()
	}

	pub fn get<Q>(&self, value: &Q) -> Option<&T>
	where
		T: Borrow<Q>,
		Q: Hash + Eq + ?Sized,
	{
		match self.find(value).map(|idx| &self.slots[idx]) {
			Some(Slot::Full(v)) => Some(v),
			_ => None,
		}
	}

	/// Adds `value`. Returns `false` if an equal value was already present.
	pub fn insert(&mut self, value: T) -> bool {
		if self.contains(&value) {
			return false;
		}
		// keep at least one empty slot per four so probes terminate fast
		if (self.len + self.tombstones + 1) * 4 > self.slots.len() * 3 {
			let size = if (self.len + 1) * 2 > self.slots.len() {
				table_size(self.slots.len().max(MIN_CAPACITY / 2) * 2)
			} else {
				self.slots.len()
			};
			self.rebuild(size);
		}

		let mask = self.slots.len() - 1;
		let mut idx = self.home(&value);
		loop {
			match self.slots[idx] {
				Slot::Empty => break,
				Slot::Tombstone => {
					self.tombstones -= 1;
					break;
				}
				Slot::Full(_) => idx = (idx + 1) & mask,
			}
		}
		self.slots[idx] = Slot::Full(value);
		self.len += 1;
		true
	}

	/// Removes and returns the value equal to `value`.
	pub fn remove<Q>(&mut self, value: &Q) -> Option<T>
	where
		T: Borrow<Q>,
		Q: Hash + Eq + ?Sized,
	{
		let idx = self.find(value)?;
		self.len -= 1;
		self.tombstones += 1;
		match std::mem::replace(&mut self.slots[idx], Slot::Tombstone) {
			Slot::Full(v) => Some(v),
			_ => None,
		}
	}

	/// Removes everything, keeping the table.
	pub fn clear(&mut self) {
		for slot in &mut self.slots {
			*slot = Slot::Empty;
		}
		self.len = 0;
		self.tombstones = 0;
	}

	pub fn iter(&self) -> Iter<'_, T> {
		Iter {
			slots: self.slots.iter(),
			remaining: self.len,
		}
	}

	/// Reinserts every live value into a fresh table of `size` slots.
	fn rebuild(&mut self, size: usize) {
		let old = std::mem::replace(&mut self.slots, (0..size).map(|_| Slot::Empty).collect());
		self.tombstones = 0;
		let mask = size - 1;
		for slot in old {
			if let Slot::Full(value) = slot {
				let mut idx = self.home(&value);
				while matches!(self.slots[idx], Slot::Full(_)) {
					idx = (idx + 1) & mask;
				}
				self.slots[idx] = Slot::Full(value);
			}
		}
	}
}

/// Smallest power of two that holds `n` values under the load limit.
fn table_size(n: usize) -> usize {
	(n.saturating_mul(4) / 3 + 1).next_power_of_two().max(MIN_CAPACITY)
}

pub struct Iter<'a, T> {
	slots: std::slice::Iter<'a, Slot<T>>,
	remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
	type Item = &'a T;

	fn next(&mut self) -> Option<&'a T> {
		for slot in self.slots.by_ref() {
			if let Slot::Full(v) = slot {
				self.remaining -= 1;
				return Some(v);
			}
		}
		None
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		(self.remaining, Some(self.remaining))
	}
}

impl<T> ExactSizeIterator for Iter<'_, T> {}

impl<'a, T, S> IntoIterator for &'a OpenSet<T, S>
where
	T: Hash + Eq,
	S: BuildHasher,
{
	type Item = &'a T;
	type IntoIter = Iter<'a, T>;

	fn into_iter(self) -> Iter<'a, T> {
		self.iter()
	}
}

impl<T: Hash + Eq> FromIterator<T> for OpenSet<T, RandomState> {
	fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
		let mut set = Self::new();
		for value in iter {
			set.insert(value);
		}
		set
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn insert_contains_remove() {
		let mut set = OpenSet::new();
		assert!(set.insert("alpha".to_string()));
		assert!(set.insert("beta".to_string()));
		assert!(!set.insert("alpha".to_string()));
		assert_eq!(set.len(), 2);

		assert!(set.contains("alpha"));
		assert_eq!(set.remove("alpha").as_deref(), Some("alpha"));
		assert!(!set.contains("alpha"));
		assert!(set.contains("beta"));
		assert_eq!(set.remove("alpha"), None);
		assert_eq!(set.len(), 1);
	}

	#[test]
	fn grows_and_keeps_everything() {
		let mut set = OpenSet::new();
		for i in 0..1000u32 {
			assert!(set.insert(i));
		}
		assert_eq!(set.len(), 1000);
		assert!(set.capacity() >= 1000);
		assert!((0..1000u32).all(|i| set.contains(&i)));
		assert!(!set.contains(&1000));
	}

	#[test]
	fn tombstones_do_not_break_probe_chains() {
		// one bucket for everything: every value probes past the others
		#[derive(Default, Clone)]
		struct Constant;
		impl BuildHasher for Constant {
			type Hasher = Zero;
			fn build_hasher(&self) -> Zero {
				Zero
			}
		}
		struct Zero;
		impl std::hash::Hasher for Zero {
			fn finish(&self) -> u64 {
				0
			}
			fn write(&mut self, _: &[u8]) {}
		}

		let mut set = OpenSet::with_hasher(Constant);
		for i in 0..5 {
			set.insert(i);
		}
		assert_eq!(set.remove(&1), Some(1));
		assert_eq!(set.remove(&3), Some(3));
		assert!(set.contains(&4));
		assert!(set.contains(&2));

		// the freed slots are reused
		let capacity = set.capacity();
		assert!(set.insert(7));
		assert!(set.contains(&7));
		assert_eq!(set.capacity(), capacity);
	}

	#[test]
	fn churn_is_bounded_by_rebuilds() {
		let mut set = OpenSet::new();
		for i in 0..10_000u64 {
			set.insert(i);
			set.remove(&i);
		}
		assert!(set.is_empty());
		assert!(set.capacity() <= 16);
	}

	#[test]
	fn iter_and_clear() {
		let mut set: OpenSet<u8> = [3u8, 1, 2].into_iter().collect();
		let mut seen: Vec<u8> = set.iter().copied().collect();
		seen.sort();
		assert_eq!(seen, vec![1, 2, 3]);
		assert_eq!(set.iter().len(), 3);

		set.clear();
		assert!(set.is_empty());
		assert_eq!(set.iter().count(), 0);
		assert!(set.insert(1));
	}
}
