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

//! LEB128 variable-length integer encoding, used by the persisted bucket
//! format (§6) and the variable-length histogram value column (§4.4).
//! Treated as a primitive owned by this crate (see spec scope note): no
//! external varint crate was named by the retrieval pack.

use crate::error::{Error, Result};

pub fn write_u64(out: &mut Vec<u8>, mut value: u64) {
	loop {
		let byte = (value & 0x7f) as u8;
		value >>= 7;
		if value == 0 {
			out.push(byte);
			break;
		} else {
			out.push(byte | 0x80);
		}
	}
}

pub fn write_i64(out: &mut Vec<u8>, value: i64) {
	// zigzag encode so small negative numbers stay small.
	let zigzag = ((value << 1) ^ (value >> 63)) as u64;
	write_u64(out, zigzag);
}

pub fn read_u64(data: &[u8], offset: &mut usize) -> Result<u64> {
	let mut result: u64 = 0;
	let mut shift = 0u32;
	loop {
		let byte = *data.get(*offset).ok_or_else(|| {
			Error::PersistedData("truncated varint".into())
		})?;
		*offset += 1;
		result |= ((byte & 0x7f) as u64) << shift;
		if byte & 0x80 == 0 {
			break;
		}
		shift += 7;
		if shift >= 64 {
			return Err(Error::PersistedData("varint too long".into()));
		}
	}
	Ok(result)
}

pub fn read_i64(data: &[u8], offset: &mut usize) -> Result<i64> {
	let zigzag = read_u64(data, offset)?;
	Ok(((zigzag >> 1) as i64) ^ -((zigzag & 1) as i64))
}

pub fn write_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
	write_u64(out, bytes.len() as u64);
	out.extend_from_slice(bytes);
}

pub fn read_len_prefixed<'a>(data: &'a [u8], offset: &mut usize) -> Result<&'a [u8]> {
	let len = read_u64(data, offset)? as usize;
	let end = offset.checked_add(len).ok_or_else(|| Error::PersistedData("length overflow".into()))?;
	let slice = data.get(*offset..end).ok_or_else(|| Error::PersistedData("truncated length-prefixed field".into()))?;
	*offset = end;
	Ok(slice)
}

pub fn write_string(out: &mut Vec<u8>, s: &str) {
	write_len_prefixed(out, s.as_bytes());
}

pub fn read_string(data: &[u8], offset: &mut usize) -> Result<String> {
	let slice = read_len_prefixed(data, offset)?;
	String::from_utf8(slice.to_vec()).map_err(|_| Error::PersistedData("invalid utf8".into()))
}
