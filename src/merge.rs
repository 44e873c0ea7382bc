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

//! K-way merge of sorted `(Key, Value)` sequences (spec §4.7). Maintains a
//! min-heap over `(currentKey, sourceIdx)`; equal keys are coalesced via
//! `MergeableValue::merge`, with ties broken by source order for
//! reproducibility. Mirrors the teacher's rebalance-batch loop in
//! `column.rs::rebalance` ("walk ascending, advance one source") but
//! generalized from a single ordered index table to N arbitrary sources.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::vec::IntoIter;

use crate::error::{Error, Result};
use crate::key::Key;
use crate::value::MergeableValue;

struct HeapEntry<V> {
	key: Key,
	value: V,
	source: usize,
}

impl<V> PartialEq for HeapEntry<V> {
	fn eq(&self, other: &Self) -> bool {
		self.key == other.key && self.source == other.source
	}
}
impl<V> Eq for HeapEntry<V> {}

impl<V> PartialOrd for HeapEntry<V> {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl<V> Ord for HeapEntry<V> {
	fn cmp(&self, other: &Self) -> Ordering {
		self.key.cmp(&other.key).then_with(|| self.source.cmp(&other.source))
	}
}

/// Merge N sorted `(Key, Value)` sequences into one sorted, deduplicated
/// sequence. All input sequences must already be sorted ascending by Key;
/// violating that is an invariant violation surfaced as `Error::Fatal`.
pub fn k_way_merge<V: MergeableValue>(sources: Vec<Vec<(Key, V)>>) -> Result<Vec<(Key, V)>> {
	let mut iters: Vec<IntoIter<(Key, V)>> = sources.into_iter().map(|v| v.into_iter()).collect();
	let mut heap: BinaryHeap<Reverse<HeapEntry<V>>> = BinaryHeap::new();

	for (idx, it) in iters.iter_mut().enumerate() {
		if let Some((key, value)) = it.next() {
			heap.push(Reverse(HeapEntry { key, value, source: idx }));
		}
	}

	let mut output: Vec<(Key, V)> = Vec::new();
	while let Some(Reverse(entry)) = heap.pop() {
		if let Some((key, value)) = iters[entry.source].next() {
			if key < entry.key {
				return Err(Error::Fatal("k-way merge source is not sorted ascending".into()));
			}
			heap.push(Reverse(HeapEntry { key, value, source: entry.source }));
		}

		match output.last_mut() {
			Some(last) if last.0 == entry.key => last.1.merge(&entry.value),
			Some(last) => {
				if entry.key < last.0 {
					return Err(Error::Fatal("k-way merge produced non-ascending output".into()));
				}
				output.push((entry.key, entry.value));
			}
			None => output.push((entry.key, entry.value)),
		}
	}
	Ok(output)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::value::HitCount;

	fn key(n: u32) -> Key {
		Key::new(vec![n])
	}

	#[test]
	fn merges_overlapping_sources() {
		let a = vec![(key(1), HitCount(1)), (key(3), HitCount(1)), (key(5), HitCount(1))];
		let b = vec![(key(2), HitCount(1)), (key(3), HitCount(1)), (key(4), HitCount(1))];
		let merged = k_way_merge(vec![a, b]).unwrap();
		let keys: Vec<u32> = merged.iter().map(|(k, _)| k.get(0)).collect();
		assert_eq!(keys, vec![1, 2, 3, 4, 5]);
		let key3 = merged.iter().find(|(k, _)| k.get(0) == 3).unwrap();
		assert_eq!(key3.1 .0, 2);
	}

	#[test]
	fn output_is_strictly_ascending() {
		let a = vec![(key(1), HitCount(1)), (key(2), HitCount(1))];
		let b = vec![(key(1), HitCount(1)), (key(2), HitCount(1))];
		let c = vec![(key(0), HitCount(1)), (key(2), HitCount(1))];
		let merged = k_way_merge(vec![a, b, c]).unwrap();
		for w in merged.windows(2) {
			assert!(w[0].0 < w[1].0);
		}
	}

	#[test]
	fn single_source_passthrough() {
		let a = vec![(key(1), HitCount(5))];
		let merged = k_way_merge(vec![a]).unwrap();
		assert_eq!(merged, vec![(key(1), HitCount(5))]);
	}

	#[test]
	fn empty_sources_yield_empty_output() {
		let merged: Vec<(Key, HitCount)> = k_way_merge(vec![vec![], vec![]]).unwrap();
		assert!(merged.is_empty());
	}

	#[test]
	fn unsorted_source_is_rejected() {
		let a = vec![(key(5), HitCount(1)), (key(1), HitCount(1))];
		assert!(k_way_merge(vec![a]).is_err());
	}
}
