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

//! Fixed- and variable-length packed value sequences for the Histogram
//! sample type (spec §4.4). A sealed store emits, per unique Key, either a
//! raw list of sample values (fixed-width, each occurrence counted once) or
//! a variable-length list of LEB128 `(value, count)` pairs.

use std::collections::BTreeMap;
use crate::error::{Error, Result};
use crate::value::Histogram;
use crate::varint;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixedElement {
	I16,
	U16,
	I32,
	U32,
	I64,
	U64,
}

impl FixedElement {
	fn byte_width(&self) -> usize {
		match self {
			FixedElement::I16 | FixedElement::U16 => 2,
			FixedElement::I32 | FixedElement::U32 => 4,
			FixedElement::I64 | FixedElement::U64 => 8,
		}
	}

	fn write(&self, out: &mut Vec<u8>, value: i64) -> Result<()> {
		match self {
			FixedElement::I16 => {
				let v: i16 = value.try_into().map_err(|_| Error::InvalidArgument(format!("{} does not fit in i16", value)))?;
				out.extend_from_slice(&v.to_le_bytes());
			}
			FixedElement::U16 => {
				let v: u16 = value.try_into().map_err(|_| Error::InvalidArgument(format!("{} does not fit in u16", value)))?;
				out.extend_from_slice(&v.to_le_bytes());
			}
			FixedElement::I32 => {
				let v: i32 = value.try_into().map_err(|_| Error::InvalidArgument(format!("{} does not fit in i32", value)))?;
				out.extend_from_slice(&v.to_le_bytes());
			}
			FixedElement::U32 => {
				let v: u32 = value.try_into().map_err(|_| Error::InvalidArgument(format!("{} does not fit in u32", value)))?;
				out.extend_from_slice(&v.to_le_bytes());
			}
			FixedElement::I64 => out.extend_from_slice(&value.to_le_bytes()),
			FixedElement::U64 => {
				let v: u64 = value.try_into().map_err(|_| Error::InvalidArgument(format!("{} does not fit in u64", value)))?;
				out.extend_from_slice(&v.to_le_bytes());
			}
		}
		Ok(())
	}

	fn read(&self, data: &[u8]) -> i64 {
		match self {
			FixedElement::I16 => i16::from_le_bytes(data[0..2].try_into().unwrap()) as i64,
			FixedElement::U16 => u16::from_le_bytes(data[0..2].try_into().unwrap()) as i64,
			FixedElement::I32 => i32::from_le_bytes(data[0..4].try_into().unwrap()) as i64,
			FixedElement::U32 => u32::from_le_bytes(data[0..4].try_into().unwrap()) as i64,
			FixedElement::I64 => i64::from_le_bytes(data[0..8].try_into().unwrap()),
			FixedElement::U64 => u64::from_le_bytes(data[0..8].try_into().unwrap()) as i64,
		}
	}
}

/// Encode `values` (one entry per occurrence, repeats allowed) as a
/// length-prefixed fixed-width array. Fails at construction time if any
/// value does not fit in `element`.
pub fn encode_fixed_array(values: &[i64], element: FixedElement) -> Result<Vec<u8>> {
	let mut out = Vec::with_capacity(values.len() * element.byte_width() + 4);
	varint::write_u64(&mut out, values.len() as u64);
	for &v in values {
		element.write(&mut out, v)?;
	}
	Ok(out)
}

/// Read a fixed-width array starting at `*offset`, adding one occurrence per
/// element into `map`. Advances `*offset` past the array.
pub fn read_fixed_into(data: &[u8], offset: &mut usize, element: FixedElement, map: &mut BTreeMap<i64, u32>) -> Result<()> {
	let count = varint::read_u64(data, offset)? as usize;
	let width = element.byte_width();
	let needed = count.checked_mul(width).ok_or_else(|| Error::PersistedData("fixed array length overflow".into()))?;
	let end = offset.checked_add(needed).ok_or_else(|| Error::PersistedData("fixed array length overflow".into()))?;
	let slice = data.get(*offset..end).ok_or_else(|| Error::PersistedData("truncated fixed value array".into()))?;
	for chunk in slice.chunks_exact(width) {
		let value = element.read(chunk);
		let entry = map.entry(value).or_insert(0);
		*entry = entry.saturating_add(1);
	}
	*offset = end;
	Ok(())
}

/// Encode a histogram as a byte-length-prefixed sequence of LEB128
/// `(value, count)` pairs.
pub fn encode_variable_array(histogram: &Histogram) -> Vec<u8> {
	let mut pairs = Vec::new();
	for (&value, &count) in histogram.0.iter() {
		varint::write_i64(&mut pairs, value);
		varint::write_u64(&mut pairs, count as u64);
	}
	let mut out = Vec::with_capacity(pairs.len() + 8);
	varint::write_u64(&mut out, pairs.len() as u64);
	out.extend_from_slice(&pairs);
	out
}

/// Read a byte-length-prefixed sequence of `(value, count)` pairs starting
/// at `*offset`, merging into `map`. Advances `*offset` past the blob.
pub fn read_variable_into(data: &[u8], offset: &mut usize, map: &mut BTreeMap<i64, u32>) -> Result<()> {
	let byte_len = varint::read_u64(data, offset)? as usize;
	let end = offset.checked_add(byte_len).ok_or_else(|| Error::PersistedData("variable array length overflow".into()))?;
	if end > data.len() {
		return Err(Error::PersistedData("truncated variable value array".into()));
	}
	while *offset < end {
		let value = varint::read_i64(data, offset)?;
		let count = varint::read_u64(data, offset)? as u32;
		let entry = map.entry(value).or_insert(0);
		*entry = entry.saturating_add(count);
	}
	if *offset != end {
		return Err(Error::PersistedData("variable array pairs overran declared length".into()));
	}
	Ok(())
}

/// Pick the narrowest fixed element type that holds every value in
/// `histogram`'s (pre-expansion) domain, or `None` if a variable-length
/// encoding is required (values repeat with counts > 1, which a
/// once-per-occurrence fixed array cannot represent compactly).
pub fn narrowest_fixed_element(histogram: &Histogram) -> Option<FixedElement> {
	if histogram.0.values().any(|&c| c > 1) {
		return None;
	}
	let (min, max) = histogram
		.0
		.keys()
		.fold((i64::MAX, i64::MIN), |(lo, hi), &k| (lo.min(k), hi.max(k)));
	if histogram.0.is_empty() {
		return Some(FixedElement::I16);
	}
	if min >= i16::MIN as i64 && max <= i16::MAX as i64 {
		Some(FixedElement::I16)
	} else if min >= 0 && max <= u16::MAX as i64 {
		Some(FixedElement::U16)
	} else if min >= i32::MIN as i64 && max <= i32::MAX as i64 {
		Some(FixedElement::I32)
	} else if min >= 0 && max <= u32::MAX as i64 {
		Some(FixedElement::U32)
	} else {
		Some(FixedElement::I64)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn fixed_round_trip() {
		let values = vec![1i64, 1, 2, 3, 3, 3];
		let encoded = encode_fixed_array(&values, FixedElement::I16).unwrap();
		let mut map = BTreeMap::new();
		let mut offset = 0;
		read_fixed_into(&encoded, &mut offset, FixedElement::I16, &mut map).unwrap();
		assert_eq!(offset, encoded.len());
		assert_eq!(map.get(&1), Some(&2));
		assert_eq!(map.get(&3), Some(&3));
	}

	#[test]
	fn fixed_rejects_oversized_value() {
		assert!(encode_fixed_array(&[100_000], FixedElement::I16).is_err());
	}

	#[test]
	fn variable_round_trip() {
		let mut histogram = Histogram::new();
		for v in 1..=100 {
			histogram.record(v, crate::value::Rounding::None);
		}
		let encoded = encode_variable_array(&histogram);
		let mut map = BTreeMap::new();
		let mut offset = 0;
		read_variable_into(&encoded, &mut offset, &mut map).unwrap();
		assert_eq!(offset, encoded.len());
		assert_eq!(map.len(), 100);
		assert_eq!(map.get(&50), Some(&1));
	}

	#[test]
	fn truncated_variable_array_errors() {
		let mut histogram = Histogram::new();
		histogram.record(1, crate::value::Rounding::None);
		let mut encoded = encode_variable_array(&histogram);
		encoded.truncate(encoded.len() - 1);
		let mut map = BTreeMap::new();
		let mut offset = 0;
		assert!(read_variable_into(&encoded, &mut offset, &mut map).is_err());
	}

	#[test]
	fn narrowest_element_picks_i16_when_small() {
		let mut histogram = Histogram::new();
		histogram.record(5, crate::value::Rounding::None);
		histogram.record(-5, crate::value::Rounding::None);
		assert_eq!(narrowest_fixed_element(&histogram), Some(FixedElement::I16));
	}

	#[test]
	fn narrowest_element_none_when_counts_repeat() {
		let mut histogram = Histogram::new();
		histogram.record(5, crate::value::Rounding::None);
		histogram.record(5, crate::value::Rounding::None);
		assert_eq!(narrowest_fixed_element(&histogram), None);
	}
}
