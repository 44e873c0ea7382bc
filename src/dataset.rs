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

//! `DataSet` (spec §4.8): a counter's ordered bucket list plus routing,
//! sealing/deletion/compaction policy, and cross-bucket queries. Mirrors the
//! teacher's `Column::trigger_rebalance`/rebalance-batch loop (`column.rs`),
//! generalized from index rebalancing to bucket-interval compaction.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::bucket::{BucketState, DataBucket};
use crate::counter_name;
use crate::dimension_set::DimensionSet;
use crate::dimension_spec::DimensionSpecification;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::options::DataSetOptions;
use crate::query::{DataSample, QuerySpec, TimeRange};
use crate::time::{self, Ticks};
use crate::value::{HitCount, Histogram, MergeableValue, PersistValue};

/// Counter name, storage path, DimensionSet, compaction configuration, and
/// an ordered (by start tick) bucket list (spec §3 "DataSet").
pub struct DataSet<V> {
	counter_name: String,
	path: PathBuf,
	dim_set: DimensionSet,
	options: DataSetOptions,
	buckets: RwLock<Vec<Arc<DataBucket<V>>>>,
	rejected_writes: AtomicU64,
}

impl<V: MergeableValue + PersistValue> DataSet<V> {
	pub fn new(counter_name: &str, path: PathBuf, dim_set: DimensionSet, options: DataSetOptions) -> Result<DataSet<V>> {
		if !counter_name::is_valid_counter_name(counter_name) {
			return Err(Error::InvalidArgument(format!("invalid counter name: {:?}", counter_name)));
		}
		fs::create_dir_all(&path)?;
		Ok(DataSet {
			counter_name: counter_name.to_string(),
			path,
			dim_set,
			options,
			buckets: RwLock::new(Vec::new()),
			rejected_writes: AtomicU64::new(0),
		})
	}

	pub fn counter_name(&self) -> &str {
		&self.counter_name
	}

	pub fn dim_set(&self) -> &DimensionSet {
		&self.dim_set
	}

	pub fn rejected_write_count(&self) -> u64 {
		self.rejected_writes.load(Ordering::Relaxed)
	}

	pub fn bucket_count(&self) -> usize {
		self.buckets.read().len()
	}

	/// Route a write to the bucket covering `ts`, creating one at the
	/// default interval if none exists (spec §4.8 steps 1-4).
	pub fn add_value(&self, spec: &DimensionSpecification, value: V, ts: Ticks, now: Ticks) -> Result<()> {
		if ts + self.options.max_age < now {
			return Ok(());
		}

		{
			let buckets = self.buckets.read();
			if let Some(bucket) = find_bucket(&buckets, ts) {
				return self.forward_write(bucket, spec, value, ts);
			}
		}

		let interval = self.options.compaction.default_interval;
		let start = time::floor_to_interval(ts, interval);
		let end = start + interval;

		let mut buckets = self.buckets.write();
		if let Some(bucket) = find_bucket(&buckets, ts) {
			let bucket = bucket.clone();
			drop(buckets);
			self.forward_write(&bucket, spec, value, ts)
		} else {
			let path = self.path.join(counter_name::bucket_filename(&self.counter_name, start, end));
			let bucket = Arc::new(DataBucket::new(&self.counter_name, start, end, self.dim_set.clone(), path)?);
			let insert_at = buckets.partition_point(|b| b.start() < start);
			buckets.insert(insert_at, bucket.clone());
			drop(buckets);
			self.forward_write(&bucket, spec, value, ts)
		}
	}

	fn forward_write(&self, bucket: &Arc<DataBucket<V>>, spec: &DimensionSpecification, value: V, ts: Ticks) -> Result<()> {
		match bucket.add_value(spec, value, ts) {
			Ok(()) => Ok(()),
			Err(Error::InvalidState(_)) => {
				self.rejected_writes.fetch_add(1, Ordering::Relaxed);
				Ok(())
			}
			Err(e) => Err(e),
		}
	}

	/// Seal overdue buckets, delete expired ones, and compact sealed runs
	/// eligible under the compaction schedule (spec §4.8). Intended to be
	/// called periodically or on demand; does not spawn its own background
	/// thread.
	pub fn run_maintenance(&self, now: Ticks) -> Result<()> {
		self.seal_overdue(now)?;
		self.release_idle(now)?;
		self.delete_expired(now)?;
		self.compact_overdue(now)?;
		Ok(())
	}

	fn seal_overdue(&self, now: Ticks) -> Result<()> {
		let targets: Vec<Arc<DataBucket<V>>> = {
			let buckets = self.buckets.read();
			buckets
				.iter()
				.filter(|b| b.state() == BucketState::Writing && b.end() + self.options.seal_time <= now)
				.cloned()
				.collect()
		};
		for bucket in targets {
			bucket.seal()?;
			bucket.persist()?;
		}
		Ok(())
	}

	/// Drop the in-memory store of any bucket that has sat Persisted for at
	/// least two sealing windows (spec §4.6 "Persisted -> Released" / §9
	/// "A heap-pressure hook can request background eviction"). The file
	/// stays on disk; `get_matches` transparently reloads it on next access.
	fn release_idle(&self, now: Ticks) -> Result<()> {
		let idle_threshold = self.options.seal_time.saturating_mul(2);
		let targets: Vec<Arc<DataBucket<V>>> = {
			let buckets = self.buckets.read();
			buckets.iter().filter(|b| b.state() == BucketState::Persisted && b.end() + idle_threshold <= now).cloned().collect()
		};
		for bucket in targets {
			bucket.release_data()?;
		}
		Ok(())
	}

	fn delete_expired(&self, now: Ticks) -> Result<()> {
		let mut buckets = self.buckets.write();
		let max_age = self.options.max_age;
		let counter_name = self.counter_name.clone();
		let mut first_err = None;
		buckets.retain(|bucket| {
			if bucket.end() + max_age > now {
				return true;
			}
			if let Err(e) = fs::remove_file(bucket.path()) {
				if e.kind() != std::io::ErrorKind::NotFound && first_err.is_none() {
					first_err = Some(Error::Io(e));
				}
			}
			log::info!(target: "metric-store", "deleted expired bucket {} [{}, {})", counter_name, bucket.start(), bucket.end());
			false
		});
		match first_err {
			Some(e) => Err(e),
			None => Ok(()),
		}
	}

	fn compact_overdue(&self, now: Ticks) -> Result<()> {
		for rule in self.options.compaction.rules().to_vec() {
			loop {
				let candidate = {
					let buckets = self.buckets.read();
					find_compactable_group(&buckets, rule.interval, rule.retention, now)
				};
				match candidate {
					None => break,
					Some((start_idx, end_idx, group_start, group_end)) => {
						self.compact_group(start_idx, end_idx, group_start, group_end)?;
					}
				}
			}
		}
		Ok(())
	}

	fn compact_group(&self, start_idx: usize, end_idx: usize, group_start: Ticks, group_end: Ticks) -> Result<()> {
		let compacted = {
			let buckets = self.buckets.read();
			if end_idx > buckets.len() || start_idx >= end_idx || buckets[start_idx].start() != group_start {
				// Bucket list changed under us since the group was found; skip
				// this round, the next maintenance pass will re-evaluate.
				return Ok(());
			}
			let refs: Vec<&DataBucket<V>> = buckets[start_idx..end_idx].iter().map(|b| b.as_ref()).collect();
			let path = self.path.join(counter_name::bucket_filename(&self.counter_name, group_start, group_end));
			DataBucket::compact(&refs, group_start, group_end, &[], path)?
		};
		compacted.persist()?;

		let mut buckets = self.buckets.write();
		if end_idx > buckets.len() || buckets[start_idx].start() != group_start {
			return Ok(());
		}
		let old_paths: Vec<PathBuf> = buckets[start_idx..end_idx].iter().map(|b| b.path().to_path_buf()).collect();
		buckets.splice(start_idx..end_idx, std::iter::once(Arc::new(compacted)));
		drop(buckets);

		for p in old_paths {
			let _ = fs::remove_file(p);
		}
		log::info!(target: "metric-store", "compacted {} into [{}, {})", self.counter_name, group_start, group_end);
		Ok(())
	}

	/// Gather matches across buckets overlapping `time_range`, optionally
	/// splitting by dimension and/or k-way merging across buckets (spec
	/// §4.8 steps 1-3). Returns `(Key, TimeRange, Value, DataCount,
	/// MachineCount)` tuples ready for type-specific `DataSample` projection.
	fn raw_query(&self, filter: &Key, query_spec: &QuerySpec, time_range: TimeRange) -> Result<Vec<(Key, TimeRange, V, u32, u32)>> {
		let overlapping: Vec<Arc<DataBucket<V>>> = {
			let buckets = self.buckets.read();
			buckets
				.iter()
				.filter(|b| TimeRange { start: b.start(), end: b.end() }.overlaps(&time_range))
				.cloned()
				.collect()
		};

		let mut per_bucket: Vec<(TimeRange, u32, Vec<(Key, V, u32)>)> = Vec::with_capacity(overlapping.len());
		for bucket in &overlapping {
			let range = TimeRange { start: bucket.start(), end: bucket.end() };
			let sources = bucket.sources();
			let machine_count = if sources.is_empty() { 1 } else { sources.len() as u32 };
			let matches = match query_spec.cross_query_dimension {
				Some(dim) => {
					let groups = bucket.get_matches_split_by_dimension(filter, dim)?;
					let mut merged = Vec::with_capacity(groups.len());
					for (group_key, entries) in groups {
						merged.push(merge_group(group_key, entries)?);
					}
					merged
				}
				None => bucket.get_matches(filter)?,
			};
			per_bucket.push((range, machine_count, matches));
		}

		if query_spec.combine {
			let mut combined: HashMap<Key, (V, u32, TimeRange, u32)> = HashMap::new();
			for (range, machine_count, matches) in per_bucket {
				for (key, value, count) in matches {
					combined
						.entry(key)
						.and_modify(|entry| {
							entry.0.merge(&value);
							entry.1 = entry.1.saturating_add(count);
							entry.2 = entry.2.union(&range);
							entry.3 = entry.3.saturating_add(machine_count);
						})
						.or_insert_with(|| (value, count, range, machine_count));
				}
			}
			let mut out: Vec<_> = combined.into_iter().map(|(key, (value, count, range, machine_count))| (key, range, value, count, machine_count)).collect();
			out.sort_by(|a, b| a.0.cmp(&b.0));
			Ok(out)
		} else {
			let mut out = Vec::new();
			for (range, machine_count, matches) in per_bucket {
				for (key, value, count) in matches {
					out.push((key, range, value, count, machine_count));
				}
			}
			out.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.start.cmp(&b.1.start)));
			Ok(out)
		}
	}
}

fn find_bucket<V>(buckets: &[Arc<DataBucket<V>>], ts: Ticks) -> Option<&Arc<DataBucket<V>>>
where
	V: MergeableValue + PersistValue,
{
	buckets.iter().find(|b| ts >= b.start() && ts < b.end())
}

fn merge_group<V: MergeableValue>(group_key: Key, entries: Vec<(Key, V, u32)>) -> Result<(Key, V, u32)> {
	let mut iter = entries.into_iter();
	let (_, mut value, mut count) = iter.next().ok_or_else(|| Error::Fatal("split-by-dimension produced an empty group".into()))?;
	for (_, v, c) in iter {
		value.merge(&v);
		count = count.saturating_add(c);
	}
	Ok((group_key, value, count))
}

/// Find one contiguous, gap-free run of sealed (or persisted/released)
/// buckets exactly tiling `[group_start, group_start + interval)`, none of
/// which is already at `interval` granularity or coarser, whose youngest
/// member is old enough to satisfy `retention` (spec §4.8 "Sealing/
/// compaction policy").
fn find_compactable_group<V>(buckets: &[Arc<DataBucket<V>>], interval: Ticks, retention: Ticks, now: Ticks) -> Option<(usize, usize, Ticks, Ticks)>
where
	V: MergeableValue + PersistValue,
{
	let mut i = 0;
	while i < buckets.len() {
		let b = &buckets[i];
		if b.state() == BucketState::Writing || b.end() - b.start() >= interval {
			i += 1;
			continue;
		}
		let group_start = time::floor_to_interval(b.start(), interval);
		if b.start() != group_start {
			i += 1;
			continue;
		}
		let group_end = group_start + interval;

		let mut j = i;
		let mut cursor = group_start;
		let mut complete = true;
		while cursor < group_end {
			let in_range = buckets.get(j);
			match in_range {
				Some(candidate) if candidate.start() == cursor && candidate.state() != BucketState::Writing && candidate.end() - candidate.start() < interval => {
					cursor = candidate.end();
					j += 1;
				}
				_ => {
					complete = false;
					break;
				}
			}
		}

		if complete && cursor == group_end && j > i {
			let youngest_end = buckets[j - 1].end();
			if youngest_end + retention <= now {
				return Some((i, j, group_start, group_end));
			}
		}
		i += 1;
	}
	None
}

impl DataSet<HitCount> {
	pub fn query_data(&self, filter: &Key, query_spec: &QuerySpec, time_range: TimeRange) -> Result<Vec<DataSample>> {
		let raw = self.raw_query(filter, query_spec, time_range)?;
		Ok(raw
			.into_iter()
			.map(|(key, range, value, _data_count, machine_count)| DataSample::HitCount {
				key,
				start: range.start,
				end: range.end,
				hit_count: value.0,
				machine_count,
			})
			.collect())
	}
}

impl DataSet<Histogram> {
	pub fn query_data(&self, filter: &Key, query_spec: &QuerySpec, time_range: TimeRange) -> Result<Vec<DataSample>> {
		let raw = self.raw_query(filter, query_spec, time_range)?;
		raw.into_iter()
			.map(|(key, range, value, _data_count, machine_count)| {
				crate::query::project_histogram(key, range.start, range.end, value, machine_count, query_spec.projection)
			})
			.collect()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::dimension::Dimension;
	use crate::options::CompactionConfig;
	use crate::testutil::TempDir;
	use crate::value::Rounding;

	fn dc_set() -> DimensionSet {
		DimensionSet::new(vec![Dimension::new("dc").unwrap()]).unwrap()
	}

	fn hit_count_options(default_interval: Ticks, seal_time: Ticks, max_age: Ticks) -> DataSetOptions {
		DataSetOptions::new(CompactionConfig::none(default_interval), seal_time, max_age).unwrap()
	}

	#[test]
	fn scenario_s1_hit_count_write_and_combined_query() {
		let tmp = TempDir::new("scenario_s1_hit_count_write_and_combined_query");
		let t0 = 1_700_000_000_000i64;
		let five_min = 5 * 60_000;
		let options = hit_count_options(five_min, five_min, Ticks::MAX / 2);
		let dataset: DataSet<HitCount> = DataSet::new("/hits", tmp.path().join("hits"), dc_set(), options).unwrap();

		let sea = DimensionSpecification::new().with("dc", "sea");
		let lax = DimensionSpecification::new().with("dc", "lax");
		dataset.add_value(&sea, HitCount(3), t0, t0).unwrap();
		dataset.add_value(&sea, HitCount(2), t0 + 1, t0).unwrap();
		dataset.add_value(&lax, HitCount(5), t0 + 2, t0).unwrap();
		dataset.buckets.read()[0].seal().unwrap();

		let mut combine = QuerySpec::new();
		combine.combine = true;
		let range = TimeRange::new(t0 - 1, t0 + five_min).unwrap();
		let samples = dataset.query_data(&Key::wildcard(1), &combine, range).unwrap();
		assert_eq!(samples.len(), 2);
		for sample in &samples {
			if let DataSample::HitCount { hit_count, .. } = sample {
				assert_eq!(*hit_count, 5);
			} else {
				panic!("expected HitCount sample");
			}
		}
	}

	#[test]
	fn writes_too_old_are_silently_dropped() {
		let tmp = TempDir::new("writes_too_old_are_silently_dropped");
		let options = hit_count_options(60_000, 60_000, 60_000);
		let dataset: DataSet<HitCount> = DataSet::new("/hits", tmp.path().join("hits"), dc_set(), options).unwrap();
		let spec = DimensionSpecification::new().with("dc", "sea");
		dataset.add_value(&spec, HitCount(1), 0, 10_000_000).unwrap();
		assert_eq!(dataset.bucket_count(), 0);
	}

	#[test]
	fn write_to_sealed_bucket_counted_and_dropped() {
		let tmp = TempDir::new("write_to_sealed_bucket_counted_and_dropped");
		let options = hit_count_options(60_000, 60_000, Ticks::MAX / 2);
		let dataset: DataSet<HitCount> = DataSet::new("/hits", tmp.path().join("hits"), dc_set(), options).unwrap();
		let spec = DimensionSpecification::new().with("dc", "sea");
		dataset.add_value(&spec, HitCount(1), 0, 0).unwrap();
		dataset.buckets.read()[0].seal().unwrap();
		dataset.add_value(&spec, HitCount(1), 10, 0).unwrap();
		assert_eq!(dataset.rejected_write_count(), 1);
	}

	#[test]
	fn scenario_s4_truncated_bucket_is_skipped_others_still_serve() {
		let tmp = TempDir::new("scenario_s4_truncated_bucket_is_skipped_others_still_serve");
		let options = hit_count_options(1000, 1000, Ticks::MAX / 2);
		let dataset: DataSet<HitCount> = DataSet::new("/hits", tmp.path().join("hits"), dc_set(), options).unwrap();
		let spec = DimensionSpecification::new().with("dc", "sea");

		dataset.add_value(&spec, HitCount(3), 10, 0).unwrap();
		dataset.add_value(&spec, HitCount(4), 1010, 0).unwrap();
		{
			let buckets = dataset.buckets.read();
			buckets[0].seal().unwrap();
			buckets[0].persist().unwrap();
			buckets[0].release_data().unwrap();
			buckets[1].seal().unwrap();
			buckets[1].persist().unwrap();
			buckets[1].release_data().unwrap();
		}

		let truncated_path = dataset.buckets.read()[0].path().to_path_buf();
		let original = fs::read(&truncated_path).unwrap();
		fs::write(&truncated_path, &original[..original.len() / 2]).unwrap();

		let mut combine = QuerySpec::new();
		combine.combine = true;
		let range = TimeRange::new(0, 2000).unwrap();
		let result = dataset.query_data(&Key::wildcard(1), &combine, range);
		assert!(result.is_err());

		let narrow_range = TimeRange::new(1000, 2000).unwrap();
		let samples = dataset.query_data(&Key::wildcard(1), &combine, narrow_range).unwrap();
		assert_eq!(samples.len(), 1);
	}

	#[test]
	fn scenario_s3_compaction_preserves_totals_over_contiguous_run() {
		let tmp = TempDir::new("scenario_s3_compaction_preserves_totals_over_contiguous_run");
		let one_min = 60_000;
		let five_min = 5 * one_min;
		let compaction = CompactionConfig::new(one_min, vec![crate::options::CompactionRule::new(five_min, 0).unwrap()]).unwrap();
		let options = DataSetOptions::new(compaction, 0, Ticks::MAX / 2).unwrap();
		let dataset: DataSet<HitCount> = DataSet::new("/hits", tmp.path().join("hits"), dc_set(), options).unwrap();
		let spec = DimensionSpecification::new().with("dc", "sea");

		let t0 = 0i64;
		for minute in 0..5 {
			dataset.add_value(&spec, HitCount(1), t0 + minute * one_min, t0).unwrap();
		}
		dataset.run_maintenance(t0 + 10 * one_min).unwrap();
		assert_eq!(dataset.bucket_count(), 1);

		let mut combine = QuerySpec::new();
		combine.combine = true;
		let range = TimeRange::new(t0, t0 + five_min).unwrap();
		let samples = dataset.query_data(&Key::wildcard(1), &combine, range).unwrap();
		assert_eq!(samples.len(), 1);
		if let DataSample::HitCount { hit_count, .. } = &samples[0] {
			assert_eq!(*hit_count, 5);
		} else {
			panic!("expected HitCount sample");
		}
	}

	#[test]
	fn scenario_s9_split_by_dimension_through_dataset() {
		let tmp = TempDir::new("scenario_s9_split_by_dimension_through_dataset");
		let dc = Dimension::new("dc").unwrap();
		let host = Dimension::new("host").unwrap();
		let dim_set = DimensionSet::new(vec![dc.clone(), host]).unwrap();
		let options = hit_count_options(1000, 1000, Ticks::MAX / 2);
		let dataset: DataSet<HitCount> = DataSet::new("/hits", tmp.path().join("hits"), dim_set.clone(), options).unwrap();

		let sea_a = DimensionSpecification::new().with("dc", "sea").with("host", "a");
		let sea_b = DimensionSpecification::new().with("dc", "sea").with("host", "b");
		let lax_c = DimensionSpecification::new().with("dc", "lax").with("host", "c");
		dataset.add_value(&sea_a, HitCount(1), 1, 0).unwrap();
		dataset.add_value(&sea_b, HitCount(1), 2, 0).unwrap();
		dataset.add_value(&lax_c, HitCount(1), 3, 0).unwrap();
		dataset.buckets.read()[0].seal().unwrap();

		let host_idx = dim_set.find_index("host").unwrap();
		let dc_idx = dim_set.find_index("dc").unwrap();
		let sea_idx = dc.try_lookup("sea").unwrap();
		let mut filter_indices = vec![0u32; dim_set.len()];
		filter_indices[dc_idx] = sea_idx;
		let filter = Key::new(filter_indices);

		let mut spec = QuerySpec::new();
		spec.cross_query_dimension = Some(host_idx);
		let range = TimeRange::new(0, 1000).unwrap();
		let samples = dataset.query_data(&filter, &spec, range).unwrap();
		assert_eq!(samples.len(), 2);
	}

	#[test]
	fn histogram_percentile_projection_end_to_end() {
		let tmp = TempDir::new("histogram_percentile_projection_end_to_end");
		let options = DataSetOptions::new(CompactionConfig::none(60_000), 60_000, Ticks::MAX / 2).unwrap();
		let dataset: DataSet<Histogram> = DataSet::new("/lat", tmp.path().join("lat"), DimensionSet::empty(), options).unwrap();
		let spec = DimensionSpecification::new();
		for v in 1..=100 {
			let mut h = Histogram::new();
			h.record(v, Rounding::None);
			dataset.add_value(&spec, h, 0, 0).unwrap();
		}
		dataset.buckets.read()[0].seal().unwrap();

		let mut query = QuerySpec::new();
		query.combine = true;
		query.projection = Some(crate::query::PercentileProjection::Percentile(50.0));
		let range = TimeRange::new(0, 60_000).unwrap();
		let samples = dataset.query_data(&Key::wildcard(0), &query, range).unwrap();
		assert_eq!(samples.len(), 1);
		if let DataSample::Percentile { percentile_value, .. } = &samples[0] {
			assert_eq!(*percentile_value, Some(50));
		} else {
			panic!("expected Percentile sample");
		}
	}
}
