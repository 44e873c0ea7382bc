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

//! Client-side time-range merge of federated per-machine samples (spec
//! §4.9). Keyed by the full dimension-set Key of each incoming sample; for
//! each key, a sorted list of non-overlapping time ranges with a running
//! merged value. A coarse lock on the key map plus a per-key-list lock
//! keeps contention scoped to one dimension-set at a time, mirroring the
//! shared/exclusive split `KeyedDataStore` uses internally (spec §5).

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};

use crate::key::Key;
use crate::percentile;
use crate::query::{DataSample, PercentileProjection, TimeRange};
use crate::value::{Histogram, MergeableValue};

struct Entry<V> {
	range: TimeRange,
	value: V,
	machine_count: u32,
}

/// One incoming per-machine observation for a single Key.
pub struct MachineResponse<V> {
	pub key: Key,
	pub range: TimeRange,
	pub value: V,
}

/// Merges federated per-machine responses into one sample per Key (spec
/// §4.9). Generic over any `MergeableValue` so the same merge algorithm
/// serves both `HitCount` and `Histogram` payloads.
pub struct CounterAggregator<V> {
	buckets: RwLock<HashMap<Key, Mutex<Vec<Entry<V>>>>>,
}

impl<V: MergeableValue> CounterAggregator<V> {
	pub fn new() -> CounterAggregator<V> {
		CounterAggregator { buckets: RwLock::new(HashMap::new()) }
	}

	/// Merge one machine's response in. Safe to call concurrently from many
	/// threads, including for the same and for different keys.
	pub fn add_machine_response(&self, response: MachineResponse<V>) {
		{
			let map = self.buckets.read();
			if let Some(list_lock) = map.get(&response.key) {
				Self::merge_into(list_lock, response.range, response.value);
				return;
			}
		}
		// Key not seen before: take the map write lock to insert it. Another
		// thread may have raced us to the same insert; re-check under the
		// write lock before creating a fresh list.
		let mut map = self.buckets.write();
		let list_lock = map.entry(response.key.clone()).or_insert_with(|| Mutex::new(Vec::new()));
		Self::merge_into(list_lock, response.range, response.value);
	}

	/// Walk the key's bucket list in ascending start time (spec §4.9):
	/// absorb every existing range that overlaps `range` into one enlarged
	/// entry, then insert it back in sorted position.
	fn merge_into(list_lock: &Mutex<Vec<Entry<V>>>, mut range: TimeRange, mut value: V) {
		let mut list = list_lock.lock();
		list.sort_by_key(|e| e.range.start);

		let mut merged_any = false;
		let mut i = 0;
		while i < list.len() {
			if list[i].range.start > range.end {
				break;
			}
			if list[i].range.overlaps(&range) {
				if !merged_any {
					// Seed the running merge from the incoming sample so the
					// first overlap's value is folded in rather than the
					// incoming value being discarded.
					let existing = list.remove(i);
					value.merge(&existing.value);
					range = range.union(&existing.range);
					merged_any = true;
				} else {
					let existing = list.remove(i);
					value.merge(&existing.value);
					range = range.union(&existing.range);
				}
			} else {
				i += 1;
			}
		}

		let insert_at = list.partition_point(|e| e.range.start < range.start);
		list.insert(insert_at, Entry { range, value, machine_count: 1 });
	}

	/// Final merged samples, one per Key, sorted by Key.
	pub fn into_samples(self) -> Vec<(Key, TimeRange, V, u32)> {
		let map = self.buckets.into_inner();
		let mut out = Vec::new();
		for (key, list_lock) in map {
			for entry in list_lock.into_inner() {
				out.push((key.clone(), entry.range, entry.value, entry.machine_count));
			}
		}
		out.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.start.cmp(&b.1.start)));
		out
	}
}

impl<V: MergeableValue> Default for CounterAggregator<V> {
	fn default() -> CounterAggregator<V> {
		CounterAggregator::new()
	}
}

impl CounterAggregator<Histogram> {
	/// Finalize into `DataSample`s, applying a percentile/average/min/max
	/// projection to each merged histogram if `projection` was requested at
	/// the aggregator rather than per-server (spec §4.9 "Additional mode").
	pub fn into_data_samples(self, projection: Option<PercentileProjection>) -> crate::error::Result<Vec<DataSample>> {
		let mut out = Vec::new();
		for (key, range, histogram, machine_count) in self.into_samples() {
			out.push(crate::query::project_histogram(key, range.start, range.end, histogram, machine_count, projection)?);
		}
		Ok(out)
	}
}

/// Standalone percentile projection over an already-merged histogram, used
/// by callers that merge samples through some other path but still want the
/// aggregator-side percentile post-processing (spec §4.9).
pub fn apply_percentile(histogram: &Histogram, p: f64) -> crate::error::Result<Option<i64>> {
	percentile::percentile_value(histogram, p)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::value::HitCount;

	fn key() -> Key {
		Key::new(vec![1, 2])
	}

	#[test]
	fn scenario_s6_counter_aggregator_time_merge() {
		let aggregator: CounterAggregator<HitCount> = CounterAggregator::new();
		let t0 = 1_000_000i64;
		aggregator.add_machine_response(MachineResponse {
			key: key(),
			range: TimeRange::new(t0, t0 + 5 * 60_000).unwrap(),
			value: HitCount(10),
		});
		aggregator.add_machine_response(MachineResponse {
			key: key(),
			range: TimeRange::new(t0 + 3 * 60_000, t0 + 8 * 60_000).unwrap(),
			value: HitCount(4),
		});

		let samples = aggregator.into_samples();
		assert_eq!(samples.len(), 1);
		let (_, range, value, _) = &samples[0];
		assert_eq!(*range, TimeRange::new(t0, t0 + 8 * 60_000).unwrap());
		assert_eq!(value.0, 14);
	}

	#[test]
	fn non_overlapping_ranges_stay_separate() {
		let aggregator: CounterAggregator<HitCount> = CounterAggregator::new();
		aggregator.add_machine_response(MachineResponse { key: key(), range: TimeRange::new(0, 1000).unwrap(), value: HitCount(1) });
		aggregator.add_machine_response(MachineResponse { key: key(), range: TimeRange::new(2000, 3000).unwrap(), value: HitCount(1) });
		let samples = aggregator.into_samples();
		assert_eq!(samples.len(), 2);
	}

	#[test]
	fn distinct_keys_are_independent() {
		let aggregator: CounterAggregator<HitCount> = CounterAggregator::new();
		let other_key = Key::new(vec![9, 9]);
		aggregator.add_machine_response(MachineResponse { key: key(), range: TimeRange::new(0, 1000).unwrap(), value: HitCount(1) });
		aggregator.add_machine_response(MachineResponse { key: other_key.clone(), range: TimeRange::new(0, 1000).unwrap(), value: HitCount(5) });
		let samples = aggregator.into_samples();
		assert_eq!(samples.len(), 2);
	}

	#[test]
	fn three_way_chain_merges_into_one_span() {
		let aggregator: CounterAggregator<HitCount> = CounterAggregator::new();
		aggregator.add_machine_response(MachineResponse { key: key(), range: TimeRange::new(0, 1000).unwrap(), value: HitCount(1) });
		aggregator.add_machine_response(MachineResponse { key: key(), range: TimeRange::new(2000, 3000).unwrap(), value: HitCount(1) });
		// Bridges the two existing ranges into one.
		aggregator.add_machine_response(MachineResponse { key: key(), range: TimeRange::new(900, 2100).unwrap(), value: HitCount(1) });
		let samples = aggregator.into_samples();
		assert_eq!(samples.len(), 1);
		assert_eq!(samples[0].1, TimeRange::new(0, 3000).unwrap());
		assert_eq!(samples[0].2 .0, 3);
	}

	#[test]
	fn aggregator_side_percentile_projection() {
		let aggregator: CounterAggregator<Histogram> = CounterAggregator::new();
		let mut h1 = Histogram::new();
		for v in 1..=50 {
			h1.record(v, crate::value::Rounding::None);
		}
		let mut h2 = Histogram::new();
		for v in 51..=100 {
			h2.record(v, crate::value::Rounding::None);
		}
		aggregator.add_machine_response(MachineResponse { key: key(), range: TimeRange::new(0, 1000).unwrap(), value: h1 });
		aggregator.add_machine_response(MachineResponse { key: key(), range: TimeRange::new(500, 1500).unwrap(), value: h2 });

		let samples = aggregator.into_data_samples(Some(PercentileProjection::Percentile(50.0))).unwrap();
		assert_eq!(samples.len(), 1);
		match &samples[0] {
			DataSample::Percentile { percentile_value, sample_count, .. } => {
				assert_eq!(*sample_count, 100);
				assert_eq!(*percentile_value, Some(50));
			}
			other => panic!("expected Percentile sample, got {:?}", other),
		}
	}
}
