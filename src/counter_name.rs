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

//! Counter-name validation for the wire boundary (spec §6, scenario S5) and
//! path-safe bucket-file naming (spec §9 "File naming").

/// Platform-reserved path characters this crate additionally forbids in a
/// counter name, beyond the `/` and `\` the spec calls out by name.
const RESERVED_PATH_CHARS: &[char] = &['\\', ':', '*', '?', '"', '<', '>', '|'];

/// `/foo/bar`-style counter names: must begin with `/`, not end with `/`,
/// contain no `\` or other reserved path characters, not be whitespace-only,
/// and not end with whitespace (spec §6, S5).
pub fn is_valid_counter_name(name: &str) -> bool {
	if name.is_empty() || name.trim().is_empty() {
		return false;
	}
	if !name.starts_with('/') {
		return false;
	}
	if name.ends_with('/') {
		return false;
	}
	if name.ends_with(char::is_whitespace) {
		return false;
	}
	if name.contains(RESERVED_PATH_CHARS) {
		return false;
	}
	true
}

/// Derive a filesystem-safe filename from `(counter_name, start, end)` (spec
/// §4.6, §9): slashes become `_`, and the tick range is appended so two
/// buckets for the same counter never collide.
pub fn bucket_filename(counter_name: &str, start: i64, end: i64) -> String {
	let escaped: String = counter_name
		.trim_start_matches('/')
		.chars()
		.map(|c| if c == '/' || c.is_whitespace() { '_' } else { c })
		.collect();
	format!("{}.{}-{}.bucket", escaped, start, end)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn scenario_s5_glob_against_counter_wildcard() {
		assert!(is_valid_counter_name("/foo/bar"));
		assert!(!is_valid_counter_name("/"));
		assert!(!is_valid_counter_name(""));
		assert!(!is_valid_counter_name("/foo/"));
		assert!(!is_valid_counter_name("/foo\\bar"));
		assert!(!is_valid_counter_name("/foo "));
	}

	#[test]
	fn missing_leading_slash_rejected() {
		assert!(!is_valid_counter_name("foo/bar"));
	}

	#[test]
	fn whitespace_only_rejected() {
		assert!(!is_valid_counter_name("   "));
	}

	#[test]
	fn filenames_are_distinct_and_path_safe() {
		let a = bucket_filename("/hits/sea", 0, 1000);
		let b = bucket_filename("/hits/sea", 1000, 2000);
		assert_ne!(a, b);
		assert!(!a.contains('/'));
	}
}
