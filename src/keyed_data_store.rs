// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of Parity.

// Parity is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Parity is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Parity.  If not, see <http://www.gnu.org/licenses/>.

//! Per-bucket live index (spec §4.5): per-thread append buffers feeding a
//! periodic merge into one sorted, immutable snapshot. Sharded the way the
//! teacher shards value storage by size tier (`column.rs`'s
//! `value_tables: [ValueTable; 15]`), here by writer rather than by value
//! size, to keep write contention low without true thread-local storage.

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::bitpack::{self, BitReader, BitWriter};
use crate::buffered_keyed_data::BufferedKeyedData;
use crate::dimension_set::DimensionSet;
use crate::dimension_spec::DimensionSpecification;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::merge;
use crate::value::{Counted, MergeableValue, PersistValue, TYPE_TAG_HIT_COUNT};
use crate::varint;

const DEFAULT_SHARD_COUNT: usize = 16;
const DEFAULT_BASE_CAPACITY: usize = 256;

thread_local! {
	static SHARD_HINT: Cell<Option<usize>> = Cell::new(None);
}

struct Shard<V> {
	active: BufferedKeyedData<Counted<V>>,
	sealed: Vec<BufferedKeyedData<Counted<V>>>,
	next_capacity: usize,
}

pub struct KeyedDataStore<V> {
	dim_set: DimensionSet,
	base_capacity: usize,
	shards: Vec<RwLock<Shard<V>>>,
	merged: RwLock<Vec<(Key, Counted<V>)>>,
	merge_lock: Mutex<()>,
	next_shard: AtomicUsize,
}

impl<V: MergeableValue> KeyedDataStore<V> {
	pub fn new(dim_set: DimensionSet) -> KeyedDataStore<V> {
		Self::with_shards(dim_set, DEFAULT_SHARD_COUNT, DEFAULT_BASE_CAPACITY)
	}

	pub fn with_shards(dim_set: DimensionSet, shard_count: usize, base_capacity: usize) -> KeyedDataStore<V> {
		let shard_count = shard_count.max(1);
		let shards = (0..shard_count)
			.map(|_| {
				RwLock::new(Shard {
					active: BufferedKeyedData::new(base_capacity),
					sealed: Vec::new(),
					next_capacity: base_capacity * 2,
				})
			})
			.collect();
		KeyedDataStore {
			dim_set,
			base_capacity,
			shards,
			merged: RwLock::new(Vec::new()),
			merge_lock: Mutex::new(()),
			next_shard: AtomicUsize::new(0),
		}
	}

	pub fn dim_set(&self) -> &DimensionSet {
		&self.dim_set
	}

	/// Number of records in the last merged snapshot. `0` before the first
	/// `merge()`, regardless of how many writes are pending in shards (spec
	/// §4.5 "Pre-merge ... count == 0").
	pub fn len(&self) -> usize {
		self.merged.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn shard_for_current_thread(&self) -> usize {
		SHARD_HINT.with(|hint| {
			if let Some(idx) = hint.get() {
				return idx;
			}
			let idx = self.next_shard.fetch_add(1, Ordering::Relaxed) % self.shards.len();
			hint.set(Some(idx));
			idx
		})
	}

	pub fn add_value(&self, spec: &DimensionSpecification, value: V) -> Result<()> {
		let (key, _all_provided) = spec.create_key(&self.dim_set)?;
		self.add_keyed_value(key, value)
	}

	pub fn add_keyed_value(&self, key: Key, value: V) -> Result<()> {
		let shard_idx = self.shard_for_current_thread();
		let counted = Counted::single(value);
		loop {
			{
				let guard = self.shards[shard_idx].read();
				match guard.active.try_write(key.clone(), counted.clone()) {
					Ok(()) => return Ok(()),
					Err(crate::error::Error::Capacity) => {}
					Err(e) => return Err(e),
				}
			}
			self.grow_shard(shard_idx)?;
		}
	}

	fn grow_shard(&self, idx: usize) -> Result<()> {
		let mut guard = self.shards[idx].write();
		if guard.active.len() < guard.active.capacity() {
			// Another writer already grew this shard while we waited for the lock.
			return Ok(());
		}
		let next_capacity = guard.next_capacity;
		let mut old = std::mem::replace(&mut guard.active, BufferedKeyedData::new(next_capacity));
		guard.next_capacity = next_capacity.saturating_mul(2);
		old.seal()?;
		guard.sealed.push(old);
		Ok(())
	}

	/// Seal all per-thread buffers, sort each (stable), and k-way merge them
	/// together with the previously merged snapshot (spec §4.5). Concurrent
	/// `merge()` calls are serialized; concurrent readers see either the old
	/// or the new snapshot, never a partial one.
	pub fn merge(&self) -> Result<()> {
		let _serialize = self.merge_lock.lock();
		let mut sequences: Vec<Vec<(Key, Counted<V>)>> = Vec::new();
		{
			let existing = self.merged.read();
			if !existing.is_empty() {
				sequences.push(existing.clone());
			}
		}
		for shard_lock in self.shards.iter() {
			let mut guard = shard_lock.write();
			let mut active = std::mem::replace(&mut guard.active, BufferedKeyedData::new(self.base_capacity));
			guard.next_capacity = self.base_capacity * 2;
			active.seal()?;
			active.sort()?;
			sequences.push(active.into_records()?);
			for mut sealed in guard.sealed.drain(..) {
				sealed.sort()?;
				sequences.push(sealed.into_records()?);
			}
		}
		let merged = merge::k_way_merge(sequences)?;
		*self.merged.write() = merged;
		Ok(())
	}

	/// A point-in-time copy of the merged snapshot as `(Key, Value,
	/// DataCount)` triples (spec §4.6), ordered by Key.
	pub fn snapshot(&self) -> Vec<(Key, V, u32)> {
		self.merged.read().iter().map(|(k, c)| (k.clone(), c.value.clone(), c.count)).collect()
	}

	/// Rebuild a store directly from an already-merged, sorted snapshot
	/// (used after a bucket-level compaction merge).
	pub fn from_snapshot(dim_set: DimensionSet, records: Vec<(Key, V, u32)>) -> KeyedDataStore<V> {
		let store = Self::with_shards(dim_set, 1, DEFAULT_BASE_CAPACITY);
		*store.merged.write() = records.into_iter().map(|(k, v, count)| (k, Counted { value: v, count })).collect();
		store
	}
}

impl<V: MergeableValue + PersistValue> KeyedDataStore<V> {
	/// Serialize the merged snapshot (spec §4.5): a bit-packed Key stream
	/// (width per dimension from its live cardinality, independently padded
	/// per record), then the value column. Calling before the first `merge()`
	/// serializes an empty store, not the pending per-thread writes.
	pub fn serialize(&self) -> Vec<u8> {
		let snapshot = self.merged.read();
		let widths: Vec<u32> = self.dim_set.dimensions().iter().map(|d| bitpack::bits_for_cardinality(d.cardinality())).collect();

		let mut keys = BitWriter::new();
		for (key, _) in snapshot.iter() {
			for (position, &width) in widths.iter().enumerate() {
				keys.write_bits(key.get(position), width);
			}
			keys.pad_to_byte();
		}
		let key_bytes = keys.into_bytes();

		let mut values = Vec::new();
		for (_, counted) in snapshot.iter() {
			let encoded = counted.value.to_bytes();
			if V::TYPE_TAG == TYPE_TAG_HIT_COUNT {
				values.extend_from_slice(&encoded);
			} else {
				varint::write_len_prefixed(&mut values, &encoded);
			}
		}

		let mut out = Vec::with_capacity(key_bytes.len() + values.len() + 10);
		varint::write_u64(&mut out, key_bytes.len() as u64);
		out.extend_from_slice(&key_bytes);
		out.extend_from_slice(&values);
		out
	}

	/// Inverse of `serialize`: rebuilds a store holding exactly `count`
	/// records directly in merged (sealed, sorted) state. Per-key DataCount
	/// is not part of the persisted format, so every reloaded entry reports
	/// `DataCount == 1` (DESIGN.md Open Question).
	pub fn deserialize(dim_set: DimensionSet, count: usize, data: &[u8]) -> Result<KeyedDataStore<V>> {
		let mut offset = 0;
		let key_stream_len = varint::read_u64(data, &mut offset)? as usize;
		let key_end = offset
			.checked_add(key_stream_len)
			.ok_or_else(|| Error::PersistedData("key stream length overflow".into()))?;
		let key_bytes = data.get(offset..key_end).ok_or_else(|| Error::PersistedData("truncated key stream".into()))?;
		let mut value_offset = key_end;

		let widths: Vec<u32> = dim_set.dimensions().iter().map(|d| bitpack::bits_for_cardinality(d.cardinality())).collect();
		let mut keys = BitReader::new(key_bytes);

		let mut records = Vec::with_capacity(count);
		for _ in 0..count {
			let indices = keys.read_record(&widths)?;
			let key = Key::new(indices);
			let value = if V::TYPE_TAG == TYPE_TAG_HIT_COUNT {
				let bytes = data
					.get(value_offset..value_offset + 8)
					.ok_or_else(|| Error::PersistedData("truncated value stream".into()))?;
				value_offset += 8;
				V::from_bytes(bytes)?
			} else {
				let bytes = varint::read_len_prefixed(data, &mut value_offset)?;
				V::from_bytes(bytes)?
			};
			records.push((key, Counted::single(value)));
		}

		if let Some(last_two) = records.windows(2).find(|w| w[1].0 < w[0].0) {
			return Err(Error::PersistedData(format!(
				"persisted key stream is not sorted ascending near {:?}",
				last_two[0].0.as_slice()
			)));
		}

		let store = Self::with_shards(dim_set, 1, DEFAULT_BASE_CAPACITY);
		*store.merged.write() = records;
		Ok(store)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::dimension::Dimension;
	use crate::value::HitCount;
	use std::sync::Arc;
	use std::thread;

	fn dc_set() -> DimensionSet {
		DimensionSet::new(vec![Dimension::new("dc").unwrap()]).unwrap()
	}

	#[test]
	fn pre_merge_count_is_zero() {
		let store: KeyedDataStore<HitCount> = KeyedDataStore::new(dc_set());
		let spec = DimensionSpecification::new().with("dc", "sea");
		store.add_value(&spec, HitCount(3)).unwrap();
		assert_eq!(store.len(), 0);
	}

	#[test]
	fn merge_produces_sorted_deduplicated_snapshot() {
		let store: KeyedDataStore<HitCount> = KeyedDataStore::new(dc_set());
		let sea = DimensionSpecification::new().with("dc", "sea");
		let lax = DimensionSpecification::new().with("dc", "lax");
		store.add_value(&sea, HitCount(3)).unwrap();
		store.add_value(&sea, HitCount(2)).unwrap();
		store.add_value(&lax, HitCount(9)).unwrap();
		store.merge().unwrap();

		let snapshot = store.snapshot();
		assert_eq!(snapshot.len(), 2);
		for w in snapshot.windows(2) {
			assert!(w[0].0 < w[1].0);
		}
		assert!(snapshot.iter().any(|(_, v, _)| v.0 == 5));
		assert!(snapshot.iter().any(|(_, v, _)| v.0 == 9));
	}

	#[test]
	fn repeated_merges_accumulate() {
		let store: KeyedDataStore<HitCount> = KeyedDataStore::new(dc_set());
		let sea = DimensionSpecification::new().with("dc", "sea");
		store.add_value(&sea, HitCount(3)).unwrap();
		store.merge().unwrap();
		store.add_value(&sea, HitCount(4)).unwrap();
		store.merge().unwrap();
		let snapshot = store.snapshot();
		assert_eq!(snapshot.len(), 1);
		assert_eq!(snapshot[0].1.0, 7);
		assert_eq!(snapshot[0].2, 2);
	}

	#[test]
	fn concurrent_writers_all_counted_after_merge() {
		let store: Arc<KeyedDataStore<HitCount>> = Arc::new(KeyedDataStore::with_shards(dc_set(), 4, 8));
		let mut handles = Vec::new();
		for _ in 0..8 {
			let store = store.clone();
			handles.push(thread::spawn(move || {
				let spec = DimensionSpecification::new().with("dc", "sea");
				for _ in 0..50 {
					store.add_value(&spec, HitCount(1)).unwrap();
				}
			}));
		}
		for h in handles {
			h.join().unwrap();
		}
		store.merge().unwrap();
		let snapshot = store.snapshot();
		assert_eq!(snapshot.len(), 1);
		assert_eq!(snapshot[0].1.0, 400);
	}

	#[test]
	fn serialize_deserialize_round_trips() {
		let dim_set = dc_set();
		let store: KeyedDataStore<HitCount> = KeyedDataStore::new(dim_set.clone());
		let sea = DimensionSpecification::new().with("dc", "sea");
		let lax = DimensionSpecification::new().with("dc", "lax");
		store.add_value(&sea, HitCount(3)).unwrap();
		store.add_value(&lax, HitCount(9)).unwrap();
		store.merge().unwrap();

		let before = store.snapshot();
		let bytes = store.serialize();
		let restored: KeyedDataStore<HitCount> = KeyedDataStore::deserialize(dim_set, before.len(), &bytes).unwrap();
		let after = restored.snapshot();

		assert_eq!(before.len(), after.len());
		for ((k1, v1, _), (k2, v2, c2)) in before.iter().zip(after.iter()) {
			assert_eq!(k1, k2);
			assert_eq!(v1.0, v2.0);
			assert_eq!(*c2, 1);
		}
	}

	#[test]
	fn shard_growth_survives_overflow() {
		let store: KeyedDataStore<HitCount> = KeyedDataStore::with_shards(dc_set(), 1, 2);
		let spec = DimensionSpecification::new().with("dc", "sea");
		for _ in 0..20 {
			store.add_value(&spec, HitCount(1)).unwrap();
		}
		store.merge().unwrap();
		assert_eq!(store.snapshot()[0].1.0, 20);
	}
}
