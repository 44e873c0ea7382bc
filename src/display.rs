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

/// Render a byte slice as a short hex string for log messages. Truncates past 16 bytes.
pub fn hex(data: &[u8]) -> String {
	let shown = &data[..data.len().min(16)];
	let mut out = String::with_capacity(shown.len() * 2 + 3);
	for b in shown {
		out.push_str(&format!("{:02x}", b));
	}
	if data.len() > shown.len() {
		out.push_str("..");
	}
	out
}

/// Render a dimension-index tuple for log messages, e.g. `[0, 3, 17]`.
pub fn indices(idx: &[u32]) -> String {
	let mut out = String::with_capacity(idx.len() * 4 + 2);
	out.push('[');
	for (i, v) in idx.iter().enumerate() {
		if i > 0 {
			out.push_str(", ");
		}
		out.push_str(&v.to_string());
	}
	out.push(']');
	out
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn hex_truncates() {
		let data: Vec<u8> = (0..20).collect();
		let s = hex(&data);
		assert!(s.ends_with(".."));
	}

	#[test]
	fn indices_format() {
		assert_eq!(indices(&[0, 3, 17]), "[0, 3, 17]");
	}
}
