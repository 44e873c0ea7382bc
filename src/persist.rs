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

//! Framed on-disk bucket format (spec §6): a single block of `version(u16
//! LE) | length(u64 LE) | lz4-chunked content`, where content is the bucket
//! header record, the DimensionSet record, and the KeyedDataStore's own
//! serialized key/value streams, in that order. Mirrors the teacher's
//! `Header`/`Entry` manual little-endian layout in `table.rs`, generalized
//! from a fixed-size record to this crate's variable-length one.

use std::io::{Read, Write};

use crate::dimension::Dimension;
use crate::dimension_set::DimensionSet;
use crate::error::{Error, Result};
use crate::keyed_data_store::KeyedDataStore;
use crate::lz4_codec;
use crate::time::{self, Ticks};
use crate::value::{MergeableValue, PersistValue};
use crate::varint;

pub const FORMAT_VERSION: u16 = 1;

#[derive(Clone, Debug, PartialEq)]
pub enum SourceStatus {
	Ok,
	TimedOut,
	Failed(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Source {
	pub name: String,
	pub status: SourceStatus,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BucketHeader {
	pub counter_name: String,
	pub start: Ticks,
	pub end: Ticks,
	pub type_tag: u8,
	pub sources: Vec<Source>,
	pub key_count: u32,
}

fn write_source(out: &mut Vec<u8>, source: &Source) {
	varint::write_string(out, &source.name);
	match &source.status {
		SourceStatus::Ok => out.push(0),
		SourceStatus::TimedOut => out.push(1),
		SourceStatus::Failed(msg) => {
			out.push(2);
			varint::write_string(out, msg);
		}
	}
}

fn read_source(data: &[u8], offset: &mut usize) -> Result<Source> {
	let name = varint::read_string(data, offset)?;
	let tag = *data.get(*offset).ok_or_else(|| Error::PersistedData("truncated source record".into()))?;
	*offset += 1;
	let status = match tag {
		0 => SourceStatus::Ok,
		1 => SourceStatus::TimedOut,
		2 => SourceStatus::Failed(varint::read_string(data, offset)?),
		other => return Err(Error::PersistedData(format!("unknown source status tag {}", other))),
	};
	Ok(Source { name, status })
}

fn write_bucket_header(out: &mut Vec<u8>, header: &BucketHeader) {
	varint::write_string(out, &header.counter_name);
	varint::write_string(out, &time::ticks_to_iso8601(header.start));
	varint::write_string(out, &time::ticks_to_iso8601(header.end));
	out.push(header.type_tag);
	varint::write_u64(out, header.sources.len() as u64);
	for source in &header.sources {
		write_source(out, source);
	}
	varint::write_u64(out, header.key_count as u64);
}

fn read_bucket_header(data: &[u8], offset: &mut usize) -> Result<BucketHeader> {
	let counter_name = varint::read_string(data, offset)?;
	let start = time::iso8601_to_ticks(&varint::read_string(data, offset)?)?;
	let end = time::iso8601_to_ticks(&varint::read_string(data, offset)?)?;
	let type_tag = *data.get(*offset).ok_or_else(|| Error::PersistedData("truncated bucket header".into()))?;
	*offset += 1;
	let source_count = varint::read_u64(data, offset)? as usize;
	let mut sources = Vec::with_capacity(source_count);
	for _ in 0..source_count {
		sources.push(read_source(data, offset)?);
	}
	let key_count = varint::read_u64(data, offset)? as u32;
	Ok(BucketHeader { counter_name, start, end, type_tag, sources, key_count })
}

/// Dimension names are written in the set's current (cardinality-sorted)
/// order; values are written in interning order so that re-interning them
/// in the same order on read reproduces the original indices exactly.
fn write_dimension_set(out: &mut Vec<u8>, dim_set: &DimensionSet) -> Result<()> {
	varint::write_u64(out, dim_set.len() as u64);
	for dim in dim_set.dimensions() {
		varint::write_string(out, &dim.name());
		let cardinality = dim.cardinality();
		varint::write_u64(out, cardinality as u64);
		for index in 1..=cardinality {
			varint::write_string(out, &dim.index_to_string(index)?);
		}
	}
	Ok(())
}

fn read_dimension_set(data: &[u8], offset: &mut usize) -> Result<DimensionSet> {
	let count = varint::read_u64(data, offset)? as usize;
	let mut dims = Vec::with_capacity(count);
	for _ in 0..count {
		let name = varint::read_string(data, offset)?;
		let cardinality = varint::read_u64(data, offset)? as usize;
		let dim = Dimension::new(&name)?;
		for _ in 0..cardinality {
			let value = varint::read_string(data, offset)?;
			dim.intern(&value)?;
		}
		dims.push(dim);
	}
	DimensionSet::new(dims)
}

pub fn write_bucket<W: Write, V: MergeableValue + PersistValue>(
	writer: &mut W,
	header: &BucketHeader,
	dim_set: &DimensionSet,
	store: &KeyedDataStore<V>,
) -> Result<()> {
	debug_assert_eq!(header.type_tag, V::TYPE_TAG, "bucket header type tag must match the value type being persisted");
	let mut raw = Vec::new();
	write_bucket_header(&mut raw, header);
	write_dimension_set(&mut raw, dim_set)?;
	raw.extend_from_slice(&store.serialize());

	let mut content = Vec::new();
	lz4_codec::encode_chunk(&mut content, &raw, false)?;

	writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
	writer.write_all(&(content.len() as u64).to_le_bytes())?;
	writer.write_all(&content)?;
	Ok(())
}

/// `Ok(None)` means clean end-of-file with no bytes of a new block read at
/// all. Anything read past that point that doesn't add up to a complete,
/// well-formed block is a `PersistedData` error (spec §6): the bucket is
/// unusable, but the caller (DataSet) keeps serving its other buckets.
pub fn read_bucket<R: Read, V: MergeableValue + PersistValue>(reader: &mut R) -> Result<Option<(BucketHeader, DimensionSet, KeyedDataStore<V>)>> {
	let mut version_buf = [0u8; 2];
	let read = read_partial(reader, &mut version_buf)?;
	if read == 0 {
		return Ok(None);
	}
	if read < version_buf.len() {
		return Err(Error::PersistedData("truncated version header".into()));
	}
	let version = u16::from_le_bytes(version_buf);
	if version != FORMAT_VERSION {
		return Err(Error::PersistedData(format!("unsupported bucket format version {}", version)));
	}

	let mut len_buf = [0u8; 8];
	read_exact_or_truncated(reader, &mut len_buf)?;
	let content_len = u64::from_le_bytes(len_buf) as usize;

	let mut content = vec![0u8; content_len];
	read_exact_or_truncated(reader, &mut content)?;

	let mut chunk_offset = 0;
	let raw = lz4_codec::decode_chunk(&content, &mut chunk_offset)?;
	let mut offset = 0;
	let header = read_bucket_header(&raw, &mut offset)?;
	let dim_set = read_dimension_set(&raw, &mut offset)?;
	let body = raw.get(offset..).ok_or_else(|| Error::PersistedData("truncated value stream".into()))?;
	let store = KeyedDataStore::deserialize(dim_set.clone(), header.key_count as usize, body)?;
	Ok(Some((header, dim_set, store)))
}

fn read_partial<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
	let mut total = 0;
	while total < buf.len() {
		match reader.read(&mut buf[total..]) {
			Ok(0) => break,
			Ok(n) => total += n,
			Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
			Err(e) => return Err(e.into()),
		}
	}
	Ok(total)
}

fn read_exact_or_truncated<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
	match reader.read_exact(buf) {
		Ok(()) => Ok(()),
		Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(Error::PersistedData("truncated bucket data".into())),
		Err(e) => Err(e.into()),
	}
}
