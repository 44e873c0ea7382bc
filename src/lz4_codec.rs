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

//! Chunk-sequenced LZ4 framing (spec §6): each chunk is
//! `varint(flags) | varint(originalLength) | [varint(compressedLength) if compressed] | bytes`.
//! Flags bit 0 = compressed, bit 1 = high-compression hint, bits >= 2 reserved.

use crate::error::{Error, Result};
use crate::varint;

const FLAG_COMPRESSED: u64 = 0x1;
const FLAG_HIGH_COMPRESSION: u64 = 0x2;
const FLAG_RESERVED_MASK: u64 = !(FLAG_COMPRESSED | FLAG_HIGH_COMPRESSION);

/// Threshold below which a chunk is stored raw even if compression is requested:
/// LZ4 framing overhead outweighs the benefit for tiny payloads.
const MIN_COMPRESS_LEN: usize = 64;

pub fn encode_chunk(out: &mut Vec<u8>, data: &[u8], high_compression: bool) -> Result<()> {
	if data.len() < MIN_COMPRESS_LEN {
		varint::write_u64(out, 0);
		varint::write_u64(out, data.len() as u64);
		out.extend_from_slice(data);
		return Ok(());
	}

	let compressed = if high_compression {
		lz4::block::compress(data, Some(lz4::block::CompressionMode::HIGHCOMPRESSION(9)), false)
	} else {
		lz4::block::compress(data, Some(lz4::block::CompressionMode::DEFAULT), false)
	}
	.map_err(|e| Error::Fatal(format!("lz4 compression failed: {}", e)))?;

	let mut flags = FLAG_COMPRESSED;
	if high_compression {
		flags |= FLAG_HIGH_COMPRESSION;
	}
	varint::write_u64(out, flags);
	varint::write_u64(out, data.len() as u64);
	varint::write_u64(out, compressed.len() as u64);
	out.extend_from_slice(&compressed);
	Ok(())
}

/// Decode one chunk starting at `*offset`, advancing it past the chunk.
pub fn decode_chunk(data: &[u8], offset: &mut usize) -> Result<Vec<u8>> {
	let flags = varint::read_u64(data, offset)?;
	if flags & FLAG_RESERVED_MASK != 0 {
		return Err(Error::PersistedData(format!("reserved lz4 flag bits set: {:#x}", flags)));
	}
	let original_len = varint::read_u64(data, offset)? as usize;
	if flags & FLAG_COMPRESSED == 0 {
		let end = offset.checked_add(original_len).ok_or_else(|| Error::PersistedData("chunk length overflow".into()))?;
		let slice = data.get(*offset..end).ok_or_else(|| Error::PersistedData("truncated lz4 chunk".into()))?;
		*offset = end;
		return Ok(slice.to_vec());
	}

	let compressed_len = varint::read_u64(data, offset)? as usize;
	let end = offset.checked_add(compressed_len).ok_or_else(|| Error::PersistedData("chunk length overflow".into()))?;
	let slice = data.get(*offset..end).ok_or_else(|| Error::PersistedData("truncated lz4 chunk".into()))?;
	*offset = end;
	let decompressed = lz4::block::decompress(slice, Some(original_len as i32))
		.map_err(|e| Error::PersistedData(format!("lz4 decompression failed: {}", e)))?;
	if decompressed.len() != original_len {
		return Err(Error::PersistedData("lz4 decompressed length mismatch".into()));
	}
	Ok(decompressed)
}
