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

//! The two first-class sample types (spec §3) and the `MergeableValue`
//! capability that lets `KeyedDataStore` stay generic over them (spec §9
//! "Polymorphic value types").

use std::collections::BTreeMap;
use crate::error::{Error, Result};
use crate::varint;

pub trait MergeableValue: Clone + Send + Sync {
	fn merge(&mut self, other: &Self);
	fn clear(&mut self);
}

/// Data type tags for the persisted bucket header (spec §6).
pub const TYPE_TAG_HIT_COUNT: u8 = 0;
pub const TYPE_TAG_VARIABLE_HISTOGRAM: u8 = 1;
pub const TYPE_TAG_UNKNOWN: u8 = 2;

/// Capability for a `MergeableValue` that also knows how to (de)serialize
/// itself into the persisted value stream (spec §6).
pub trait PersistValue: MergeableValue + Sized {
	const TYPE_TAG: u8;
	fn to_bytes(&self) -> Vec<u8>;
	fn from_bytes(data: &[u8]) -> Result<Self>;
}

/// Wraps a value with the number of raw source records that were folded
/// into it, so `KeyedDataStore`/`DataBucket` can report `DataCount` (spec
/// §4.6) alongside each merged entry.
#[derive(Clone, Debug, PartialEq)]
pub struct Counted<V> {
	pub value: V,
	pub count: u32,
}

impl<V> Counted<V> {
	pub fn single(value: V) -> Counted<V> {
		Counted { value, count: 1 }
	}
}

impl<V: MergeableValue> MergeableValue for Counted<V> {
	fn merge(&mut self, other: &Self) {
		self.value.merge(&other.value);
		self.count = self.count.saturating_add(other.count);
	}

	fn clear(&mut self) {
		self.value.clear();
		self.count = 0;
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HitCount(pub u64);

impl MergeableValue for HitCount {
	fn merge(&mut self, other: &Self) {
		self.0 = self.0.saturating_add(other.0);
	}

	fn clear(&mut self) {
		self.0 = 0;
	}
}

impl PersistValue for HitCount {
	const TYPE_TAG: u8 = TYPE_TAG_HIT_COUNT;

	fn to_bytes(&self) -> Vec<u8> {
		(self.0 as i64).to_le_bytes().to_vec()
	}

	fn from_bytes(data: &[u8]) -> Result<Self> {
		let bytes: [u8; 8] = data.try_into().map_err(|_| Error::PersistedData(format!("hit count value must be 8 bytes, got {}", data.len())))?;
		Ok(HitCount(i64::from_le_bytes(bytes) as u64))
	}
}

/// Quantization applied to a sample value before it is counted in a
/// `Histogram` (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rounding {
	None,
	/// Keep only the top `digits` significant decimal digits, e.g. 12345
	/// with 2 digits becomes 12000.
	SignificantDigits(u32),
	/// Round down to the nearest multiple of `factor` (used for byte-size
	/// histograms, e.g. rounding to the nearest 4 KiB page).
	ByteCount(u64),
}

impl Rounding {
	pub fn apply(&self, sample: i64) -> i64 {
		match self {
			Rounding::None => sample,
			Rounding::SignificantDigits(digits) => round_significant(sample, *digits),
			Rounding::ByteCount(factor) => round_byte_count(sample, *factor),
		}
	}
}

fn round_significant(sample: i64, digits: u32) -> i64 {
	if sample == 0 || digits == 0 {
		return sample;
	}
	let negative = sample < 0;
	let magnitude = sample.unsigned_abs();
	let total_digits = (magnitude as f64).log10().floor() as u32 + 1;
	if total_digits <= digits {
		return sample;
	}
	let drop = total_digits - digits;
	let scale = 10u64.saturating_pow(drop);
	let rounded = (magnitude + scale / 2) / scale * scale;
	let rounded = rounded as i64;
	if negative {
		-rounded
	} else {
		rounded
	}
}

fn round_byte_count(sample: i64, factor: u64) -> i64 {
	if factor == 0 {
		return sample;
	}
	let factor = factor as i64;
	(sample / factor) * factor
}

/// Mapping from sample value to occurrence count (spec §3). Merge = per-key
/// saturating add.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Histogram(pub BTreeMap<i64, u32>);

impl Histogram {
	pub fn new() -> Histogram {
		Histogram(BTreeMap::new())
	}

	pub fn record(&mut self, sample: i64, rounding: Rounding) {
		self.record_count(sample, 1, rounding);
	}

	pub fn record_count(&mut self, sample: i64, count: u32, rounding: Rounding) {
		let quantized = rounding.apply(sample);
		let entry = self.0.entry(quantized).or_insert(0);
		*entry = entry.saturating_add(count);
	}

	pub fn sample_count(&self) -> u64 {
		self.0.values().map(|&c| c as u64).sum()
	}

	pub fn min_key(&self) -> Option<i64> {
		self.0.keys().next().copied()
	}

	pub fn max_key(&self) -> Option<i64> {
		self.0.keys().next_back().copied()
	}
}

impl MergeableValue for Histogram {
	fn merge(&mut self, other: &Self) {
		for (&key, &count) in other.0.iter() {
			let entry = self.0.entry(key).or_insert(0);
			*entry = entry.saturating_add(count);
		}
	}

	fn clear(&mut self) {
		self.0.clear();
	}
}

impl PersistValue for Histogram {
	const TYPE_TAG: u8 = TYPE_TAG_VARIABLE_HISTOGRAM;

	fn to_bytes(&self) -> Vec<u8> {
		let mut out = Vec::new();
		for (&value, &count) in self.0.iter() {
			varint::write_i64(&mut out, value);
			varint::write_u64(&mut out, count as u64);
		}
		out
	}

	fn from_bytes(data: &[u8]) -> Result<Self> {
		let mut histogram = Histogram::new();
		let mut offset = 0;
		while offset < data.len() {
			let value = varint::read_i64(data, &mut offset)?;
			let count = varint::read_u64(data, &mut offset)? as u32;
			histogram.record_count(value, count, Rounding::None);
		}
		Ok(histogram)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn hit_count_merge_saturates() {
		let mut a = HitCount(u64::MAX - 1);
		a.merge(&HitCount(5));
		assert_eq!(a.0, u64::MAX);
	}

	#[test]
	fn histogram_merge_adds_per_key() {
		let mut a = Histogram::new();
		a.record(1, Rounding::None);
		a.record(1, Rounding::None);
		let mut b = Histogram::new();
		b.record(1, Rounding::None);
		b.record(2, Rounding::None);
		a.merge(&b);
		assert_eq!(a.0.get(&1), Some(&3));
		assert_eq!(a.0.get(&2), Some(&1));
		assert_eq!(a.sample_count(), 4);
	}

	#[test]
	fn significant_digits_rounding() {
		assert_eq!(Rounding::SignificantDigits(2).apply(12345), 12000);
		assert_eq!(Rounding::SignificantDigits(3).apply(999), 999);
		assert_eq!(Rounding::SignificantDigits(1).apply(-95), -100);
	}

	#[test]
	fn byte_count_rounding() {
		assert_eq!(Rounding::ByteCount(4096).apply(9000), 8192);
		assert_eq!(Rounding::ByteCount(4096).apply(4095), 0);
	}

	#[test]
	fn min_max_key() {
		let mut h = Histogram::new();
		for v in 1..=100 {
			h.record(v, Rounding::None);
		}
		assert_eq!(h.min_key(), Some(1));
		assert_eq!(h.max_key(), Some(100));
	}

	#[test]
	fn counted_merge_sums_both_value_and_count() {
		let mut a = Counted::single(HitCount(3));
		let b = Counted::single(HitCount(4));
		a.merge(&b);
		assert_eq!(a.value.0, 7);
		assert_eq!(a.count, 2);
	}

	#[test]
	fn hit_count_persist_round_trip() {
		let original = HitCount(42);
		let bytes = original.to_bytes();
		assert_eq!(bytes.len(), 8);
		assert_eq!(HitCount::from_bytes(&bytes).unwrap(), original);
	}

	#[test]
	fn histogram_persist_round_trip() {
		let mut original = Histogram::new();
		for v in 1..=50 {
			original.record(v, Rounding::None);
		}
		let bytes = original.to_bytes();
		let restored = Histogram::from_bytes(&bytes).unwrap();
		assert_eq!(restored, original);
	}
}
