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

//! `DataBucket` (spec §4.6): a half-open time interval owning one
//! `KeyedDataStore`, with a Writing/Sealed/Persisted/Released lifecycle.
//! Mirrors the teacher's `Column::open`/`write_plan`/`complete_plan` split
//! between an in-memory index and its on-disk form (column.rs), generalized
//! from index rebalancing to bucket seal/persist/compact.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::dimension::WILDCARD_INDEX;
use crate::dimension_set::DimensionSet;
use crate::dimension_spec::DimensionSpecification;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::keyed_data_store::KeyedDataStore;
use crate::merge::k_way_merge;
use crate::persist::{self, BucketHeader, Source};
use crate::time::Ticks;
use crate::value::{Counted, MergeableValue, PersistValue};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BucketState {
	Writing,
	Sealed,
	Persisted,
	Released,
}

struct Inner<V> {
	state: BucketState,
	store: Option<KeyedDataStore<V>>,
}

pub struct DataBucket<V> {
	counter_name: String,
	start: Ticks,
	end: Ticks,
	dim_set: DimensionSet,
	path: PathBuf,
	sources: RwLock<Vec<Source>>,
	inner: RwLock<Inner<V>>,
}

impl<V: MergeableValue + PersistValue> DataBucket<V> {
	pub fn new(counter_name: &str, start: Ticks, end: Ticks, dim_set: DimensionSet, path: PathBuf) -> Result<DataBucket<V>> {
		if end <= start {
			return Err(Error::InvalidArgument(format!("bucket end {} must be after start {}", end, start)));
		}
		Ok(DataBucket {
			counter_name: counter_name.to_string(),
			start,
			end,
			dim_set: dim_set.clone(),
			path,
			sources: RwLock::new(Vec::new()),
			inner: RwLock::new(Inner { state: BucketState::Writing, store: Some(KeyedDataStore::new(dim_set)) }),
		})
	}

	pub fn counter_name(&self) -> &str {
		&self.counter_name
	}

	pub fn start(&self) -> Ticks {
		self.start
	}

	pub fn end(&self) -> Ticks {
		self.end
	}

	pub fn dim_set(&self) -> &DimensionSet {
		&self.dim_set
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn state(&self) -> BucketState {
		self.inner.read().state
	}

	/// Record which machine(s) contributed data to this bucket (spec §6
	/// source list). Populated by whoever ingests writes on this bucket's
	/// behalf; a single-node bucket with no federation may leave this empty.
	pub fn set_sources(&self, sources: Vec<Source>) {
		*self.sources.write() = sources;
	}

	pub fn sources(&self) -> Vec<Source> {
		self.sources.read().clone()
	}

	fn covers(&self, ts: Ticks) -> bool {
		ts >= self.start && ts < self.end
	}

	/// Forwards to the live `KeyedDataStore` (spec §4.6). Rejects writes
	/// outside the half-open interval or to a Sealed/Persisted/Released bucket.
	pub fn add_value(&self, spec: &DimensionSpecification, value: V, ts: Ticks) -> Result<()> {
		if !self.covers(ts) {
			return Err(Error::InvalidArgument(format!("timestamp {} is outside bucket range [{}, {})", ts, self.start, self.end)));
		}
		let inner = self.inner.read();
		if inner.state != BucketState::Writing {
			return Err(Error::InvalidState("write to a sealed bucket".into()));
		}
		inner.store.as_ref().expect("Writing bucket always owns a live store").add_value(spec, value)
	}

	/// Idempotent. Runs a final `merge()` on the store (spec §4.6).
	pub fn seal(&self) -> Result<()> {
		let mut inner = self.inner.write();
		if inner.state != BucketState::Writing {
			return Ok(());
		}
		inner.store.as_ref().expect("Writing bucket always owns a live store").merge()?;
		inner.state = BucketState::Sealed;
		log::debug!(target: "metric-store", "sealed bucket {} [{}, {})", self.counter_name, self.start, self.end);
		Ok(())
	}

	/// Writes the bucket to `self.path` via temp-file + rename (spec §4.6).
	/// Requires the bucket to already be Sealed; a no-op if already Persisted.
	pub fn persist(&self) -> Result<()> {
		let mut inner = self.inner.write();
		match inner.state {
			BucketState::Persisted => return Ok(()),
			BucketState::Sealed => {}
			BucketState::Writing => return Err(Error::InvalidState("bucket must be sealed before it can be persisted".into())),
			BucketState::Released => return Ok(()),
		}
		let store = inner.store.as_ref().expect("Sealed bucket always owns a live store");
		let header = BucketHeader {
			counter_name: self.counter_name.clone(),
			start: self.start,
			end: self.end,
			type_tag: V::TYPE_TAG,
			sources: self.sources.read().clone(),
			key_count: store.len() as u32,
		};

		let tmp_path = self.path.with_extension("tmp");
		{
			let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(&tmp_path)?;
			persist::write_bucket(&mut file, &header, &self.dim_set, store)?;
		}
		fs::rename(&tmp_path, &self.path)?;
		inner.state = BucketState::Persisted;
		log::info!(target: "metric-store", "persisted bucket {} to {}", self.counter_name, self.path.display());
		Ok(())
	}

	/// Drops the in-memory store, leaving the file in place (spec §4.6).
	/// A no-op unless the bucket is Persisted.
	pub fn release_data(&self) -> Result<()> {
		let mut inner = self.inner.write();
		if inner.state != BucketState::Persisted {
			return Ok(());
		}
		inner.store = None;
		inner.state = BucketState::Released;
		Ok(())
	}

	/// Reload from disk if Released. A corrupt/truncated file surfaces as
	/// `PersistedData`; the bucket stays Released (and therefore unusable)
	/// rather than panicking or silently dropping the error.
	fn ensure_loaded(&self) -> Result<()> {
		let needs_reload = self.inner.read().state == BucketState::Released;
		if !needs_reload {
			return Ok(());
		}
		let mut inner = self.inner.write();
		if inner.state != BucketState::Released {
			return Ok(());
		}
		let file = fs::File::open(&self.path)?;
		// mmap the sealed file rather than read()ing it into a heap buffer,
		// the same tradeoff the teacher makes for its value tables
		// (column.rs): the bucket is immutable once persisted, so the
		// kernel's page cache does the buffering for us.
		let mmap = unsafe { memmap2::Mmap::map(&file)? };
		let mut cursor = std::io::Cursor::new(&mmap[..]);
		let (_header, _dim_set, store) = persist::read_bucket::<_, V>(&mut cursor)?
			.ok_or_else(|| Error::PersistedData(format!("bucket file {} is empty", self.path.display())))?;
		inner.store = Some(store);
		inner.state = BucketState::Persisted;
		log::debug!(target: "metric-store", "reloaded released bucket {}", self.path.display());
		Ok(())
	}

	/// `(Key, Value, DataCount)` triples matching `filter` (spec §4.6).
	pub fn get_matches(&self, filter: &Key) -> Result<Vec<(Key, V, u32)>> {
		self.ensure_loaded()?;
		let inner = self.inner.read();
		let store = inner.store.as_ref().expect("ensure_loaded guarantees a live store");
		Ok(store.snapshot().into_iter().filter(|(key, _, _)| Key::matches(filter, key)).collect())
	}

	/// Groups matches by the value at `split_dim`. Each group is keyed by a
	/// grouping identity Key with only `split_dim` populated and every other
	/// position wildcarded (spec §4.6).
	pub fn get_matches_split_by_dimension(&self, filter: &Key, split_dim: usize) -> Result<Vec<(Key, Vec<(Key, V, u32)>)>> {
		let matches = self.get_matches(filter)?;
		let width = self.dim_set.len();
		let mut groups: BTreeMap<u32, Vec<(Key, V, u32)>> = BTreeMap::new();
		for (key, value, count) in matches {
			let split_value = key.get(split_dim);
			groups.entry(split_value).or_insert_with(Vec::new).push((key, value, count));
		}
		Ok(groups.into_iter().map(|(value, entries)| (Key::wildcard_except(width, split_dim, value), entries)).collect())
	}

	/// Given contiguous, sealed buckets for the same counter, produce one
	/// compacted bucket spanning `[new_start, new_end)` (spec §4.6).
	/// `drop_dimensions` implements the "compaction drops low-value
	/// dimensions by policy" note (§4.6): names in this list are excluded
	/// from the output DimensionSet.
	pub fn compact(buckets: &[&DataBucket<V>], new_start: Ticks, new_end: Ticks, drop_dimensions: &[String], path: PathBuf) -> Result<DataBucket<V>> {
		if buckets.is_empty() {
			return Err(Error::InvalidArgument("cannot compact an empty bucket list".into()));
		}
		let counter_name = buckets[0].counter_name.clone();
		for bucket in buckets {
			if bucket.counter_name != counter_name {
				return Err(Error::InvalidArgument("cannot compact buckets from different counters".into()));
			}
			if bucket.state() != BucketState::Sealed && bucket.state() != BucketState::Persisted && bucket.state() != BucketState::Released {
				return Err(Error::InvalidState("compact requires sealed buckets".into()));
			}
		}

		let base_dim_set = buckets[0].dim_set.clone();
		let target_dims: Vec<_> = base_dim_set
			.dimensions()
			.iter()
			.filter(|d| !drop_dimensions.iter().any(|name| name.eq_ignore_ascii_case(&d.name())))
			.cloned()
			.collect();
		let target_dim_set = DimensionSet::new(target_dims)?.resorted();

		let mut sequences: Vec<Vec<(Key, Counted<V>)>> = Vec::with_capacity(buckets.len());
		for bucket in buckets {
			bucket.ensure_loaded()?;
			let inner = bucket.inner.read();
			let store = inner.store.as_ref().expect("ensure_loaded guarantees a live store");
			let mut projected: Vec<(Key, Counted<V>)> = store
				.snapshot()
				.into_iter()
				.map(|(key, value, count)| (project_key(&key, &bucket.dim_set, &target_dim_set), Counted { value, count }))
				.collect();
			projected.sort_by(|a, b| a.0.cmp(&b.0));
			sequences.push(projected);
		}

		let merged = k_way_merge(sequences)?;
		let records: Vec<(Key, V, u32)> = merged.into_iter().map(|(key, counted)| (key, counted.value, counted.count)).collect();

		let mut sources = Vec::new();
		for bucket in buckets {
			for source in bucket.sources.read().iter() {
				if !sources.iter().any(|s: &Source| s.name == source.name) {
					sources.push(source.clone());
				}
			}
		}

		log::info!(
			target: "metric-store",
			"compacted {} buckets for {} into [{}, {})",
			buckets.len(),
			counter_name,
			new_start,
			new_end
		);

		Ok(DataBucket {
			counter_name,
			start: new_start,
			end: new_end,
			dim_set: target_dim_set.clone(),
			path,
			sources: RwLock::new(sources),
			inner: RwLock::new(Inner {
				state: BucketState::Sealed,
				store: Some(KeyedDataStore::from_snapshot(target_dim_set, records)),
			}),
		})
	}
}

/// Project `key` (in `source`'s coordinates) onto `target`: matched
/// dimensions copy their index, dimensions present only in `target` become
/// wildcard. Mirrors `BufferedKeyedData::convert`, applied here to an
/// already-merged snapshot instead of a pre-merge buffer.
fn project_key(key: &Key, source: &DimensionSet, target: &DimensionSet) -> Key {
	let indices: Vec<u32> = target
		.dimensions()
		.iter()
		.map(|d| match source.find_index(&d.name()) {
			Some(source_index) => key.get(source_index),
			None => WILDCARD_INDEX,
		})
		.collect();
	Key::new(indices)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::dimension::Dimension;
	use crate::value::HitCount;
	use crate::testutil::TempDir;

	fn two_dim_set() -> (DimensionSet, Dimension, Dimension) {
		let dc = Dimension::new("dc").unwrap();
		let host = Dimension::new("host").unwrap();
		let set = DimensionSet::new(vec![dc.clone(), host.clone()]).unwrap();
		(set, dc, host)
	}

	#[test]
	fn rejects_writes_outside_range() {
		let (dim_set, _, _) = two_dim_set();
		let tmp = TempDir::new("rejects_writes_outside_range");
		let bucket: DataBucket<HitCount> = DataBucket::new("/hits", 1000, 2000, dim_set, tmp.path().join("b")).unwrap();
		let spec = DimensionSpecification::new().with("dc", "sea");
		assert!(bucket.add_value(&spec, HitCount(1), 999).is_err());
		assert!(bucket.add_value(&spec, HitCount(1), 2000).is_err());
		assert!(bucket.add_value(&spec, HitCount(1), 1500).is_ok());
	}

	#[test]
	fn seal_rejects_further_writes() {
		let (dim_set, _, _) = two_dim_set();
		let tmp = TempDir::new("seal_rejects_further_writes");
		let bucket: DataBucket<HitCount> = DataBucket::new("/hits", 0, 1000, dim_set, tmp.path().join("b")).unwrap();
		let spec = DimensionSpecification::new().with("dc", "sea");
		bucket.add_value(&spec, HitCount(3), 10).unwrap();
		bucket.seal().unwrap();
		assert!(bucket.add_value(&spec, HitCount(1), 20).is_err());
		assert_eq!(bucket.get_matches(&Key::wildcard(2)).unwrap()[0].1 .0, 3);
	}

	#[test]
	fn persist_then_release_then_reload_round_trips() {
		let (dim_set, _, _) = two_dim_set();
		let tmp = TempDir::new("persist_then_release_then_reload_round_trips");
		let path = tmp.path().join("bucket.data");
		let bucket: DataBucket<HitCount> = DataBucket::new("/hits", 0, 1000, dim_set, path).unwrap();
		let spec = DimensionSpecification::new().with("dc", "sea").with("host", "a");
		bucket.add_value(&spec, HitCount(7), 5).unwrap();
		bucket.seal().unwrap();
		bucket.persist().unwrap();
		bucket.release_data().unwrap();
		assert_eq!(bucket.state(), BucketState::Released);

		let matches = bucket.get_matches(&Key::wildcard(2)).unwrap();
		assert_eq!(matches.len(), 1);
		assert_eq!(matches[0].1 .0, 7);
		assert_eq!(bucket.state(), BucketState::Persisted);
	}

	#[test]
	fn split_by_dimension_groups_by_value() {
		let (dim_set, dc, host) = two_dim_set();
		let tmp = TempDir::new("split_by_dimension_groups_by_value");
		let bucket: DataBucket<HitCount> = DataBucket::new("/hits", 0, 1000, dim_set.clone(), tmp.path().join("b")).unwrap();
		let sea_a = DimensionSpecification::new().with("dc", "sea").with("host", "a");
		let sea_b = DimensionSpecification::new().with("dc", "sea").with("host", "b");
		let lax_c = DimensionSpecification::new().with("dc", "lax").with("host", "c");
		bucket.add_value(&sea_a, HitCount(1), 1).unwrap();
		bucket.add_value(&sea_b, HitCount(1), 2).unwrap();
		bucket.add_value(&lax_c, HitCount(1), 3).unwrap();
		bucket.seal().unwrap();

		let sea = dc.intern("sea").unwrap();
		let host_idx = dim_set.find_index("host").unwrap();
		let dc_idx = dim_set.find_index("dc").unwrap();
		let mut filter_indices = vec![0u32; dim_set.len()];
		filter_indices[dc_idx] = sea;
		let filter = Key::new(filter_indices);

		let groups = bucket.get_matches_split_by_dimension(&filter, host_idx).unwrap();
		assert_eq!(groups.len(), 2);
		for (group_key, entries) in &groups {
			assert_eq!(entries.len(), 1);
			assert_ne!(group_key.get(host_idx), WILDCARD_INDEX);
		}
	}

	#[test]
	fn compaction_preserves_totals() {
		let dc = Dimension::new("dc").unwrap();
		let dim_set = DimensionSet::new(vec![dc]).unwrap();
		let tmp = TempDir::new("compaction_preserves_totals");

		let b1: DataBucket<HitCount> = DataBucket::new("/hits", 0, 1000, dim_set.clone(), tmp.path().join("b1")).unwrap();
		let b2: DataBucket<HitCount> = DataBucket::new("/hits", 1000, 2000, dim_set.clone(), tmp.path().join("b2")).unwrap();
		let spec = DimensionSpecification::new().with("dc", "sea");
		b1.add_value(&spec, HitCount(3), 10).unwrap();
		b2.add_value(&spec, HitCount(4), 1010).unwrap();
		b1.seal().unwrap();
		b2.seal().unwrap();

		let compacted = DataBucket::compact(&[&b1, &b2], 0, 2000, &[], tmp.path().join("compacted")).unwrap();
		let matches = compacted.get_matches(&Key::wildcard(1)).unwrap();
		assert_eq!(matches.len(), 1);
		assert_eq!(matches[0].1 .0, 7);
		assert_eq!(matches[0].2, 2);
	}
}
