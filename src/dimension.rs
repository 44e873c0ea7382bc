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

//! Dimension value interning (spec §3, §4.1). Each `Dimension` owns an
//! append-only string -> u32 table; index 0 is reserved as the wildcard.

use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::RwLock;

use crate::error::{Error, Result};

pub const WILDCARD_INDEX: u32 = 0;

/// Dimension names reserved by the query surface (spec §3); forbidden as user dimensions.
pub const RESERVED_NAMES: &[&str] = &[
	"machine",
	"machinefunction",
	"datacenter",
	"environment",
	"start",
	"end",
	"percentile",
	"aggregate",
	"dimension",
];

pub fn is_reserved_name(name: &str) -> bool {
	RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(name))
}

struct Inner {
	name: String,
	// Display-form values, indexed by their interned index - 1 (index 0 is the wildcard, not stored here).
	values: Vec<String>,
	lookup: HashMap<String, u32>,
	allowed: Option<std::collections::HashSet<String>>,
}

/// A named, interned dimension. Cheap to clone: clones share the same interning table.
#[derive(Clone)]
pub struct Dimension {
	inner: Arc<RwLock<Inner>>,
}

impl Dimension {
	pub fn new(name: &str) -> Result<Dimension> {
		Self::with_allowed_values(name, None)
	}

	pub fn with_allowed_values(name: &str, allowed: Option<Vec<String>>) -> Result<Dimension> {
		if name.trim().is_empty() {
			return Err(Error::InvalidArgument(format!("dimension name must not be empty or whitespace: {:?}", name)));
		}
		if is_reserved_name(name) {
			return Err(Error::InvalidArgument(format!("dimension name is reserved: {}", name)));
		}
		let allowed = allowed.map(|values| values.iter().map(|v| v.to_lowercase()).collect());
		Ok(Dimension {
			inner: Arc::new(RwLock::new(Inner {
				name: name.to_string(),
				values: Vec::new(),
				lookup: HashMap::new(),
				allowed,
			})),
		})
	}

	pub fn name(&self) -> String {
		self.inner.read().name.clone()
	}

	/// Number of distinct interned values (not counting the wildcard).
	pub fn cardinality(&self) -> u32 {
		self.inner.read().values.len() as u32
	}

	/// Intern `value`, returning its stable index. Case-insensitive; the
	/// first-seen casing is the one retained for display. The empty string
	/// is treated as the wildcard sentinel.
	pub fn intern(&self, value: &str) -> Result<u32> {
		if value.is_empty() {
			return Ok(WILDCARD_INDEX);
		}
		let normalized = value.to_lowercase();
		{
			let inner = self.inner.read();
			if let Some(&idx) = inner.lookup.get(&normalized) {
				return Ok(idx);
			}
			if let Some(allowed) = &inner.allowed {
				if !allowed.contains(&normalized) {
					return Err(Error::InvalidArgument(format!(
						"value {:?} is not in the allowed set for dimension {}",
						value, inner.name,
					)));
				}
			}
		}
		let mut inner = self.inner.write();
		// Re-check under the write lock: another thread may have interned it first.
		if let Some(&idx) = inner.lookup.get(&normalized) {
			return Ok(idx);
		}
		if let Some(allowed) = &inner.allowed {
			if !allowed.contains(&normalized) {
				return Err(Error::InvalidArgument(format!(
					"value {:?} is not in the allowed set for dimension {}",
					value, inner.name,
				)));
			}
		}
		inner.values.push(value.to_string());
		let idx = inner.values.len() as u32;
		inner.lookup.insert(normalized, idx);
		Ok(idx)
	}

	/// Inverse of `intern`. `WILDCARD_INDEX` maps to `"*"`.
	pub fn index_to_string(&self, index: u32) -> Result<String> {
		if index == WILDCARD_INDEX {
			return Ok("*".to_string());
		}
		let inner = self.inner.read();
		inner
			.values
			.get((index - 1) as usize)
			.cloned()
			.ok_or_else(|| Error::InvalidArgument(format!("index {} out of range for dimension {}", index, inner.name)))
	}

	/// Lookup without interning: `None` if the value has never been seen.
	pub fn try_lookup(&self, value: &str) -> Option<u32> {
		if value.is_empty() {
			return Some(WILDCARD_INDEX);
		}
		self.inner.read().lookup.get(&value.to_lowercase()).copied()
	}
}
