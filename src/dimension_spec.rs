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

//! User-facing dimension-name -> value mapping (spec §3, §4.1 `createKey`).

use std::collections::HashMap;
use crate::dimension_set::DimensionSet;
use crate::error::Result;
use crate::key::Key;

#[derive(Clone, Default, Debug)]
pub struct DimensionSpecification {
	// Keyed by lower-cased name; value retains caller-supplied casing.
	values: HashMap<String, String>,
}

impl DimensionSpecification {
	pub fn new() -> DimensionSpecification {
		DimensionSpecification { values: HashMap::new() }
	}

	pub fn with(mut self, name: &str, value: &str) -> DimensionSpecification {
		self.values.insert(name.to_lowercase(), value.to_string());
		self
	}

	pub fn get(&self, name: &str) -> Option<&str> {
		self.values.get(&name.to_lowercase()).map(|s| s.as_str())
	}

	/// Build a `Key` against `dim_set`: unrecognized names are ignored,
	/// unspecified dimensions become wildcard. Returns the key plus whether
	/// every dimension in the set was provided with a non-empty value.
	pub fn create_key(&self, dim_set: &DimensionSet) -> Result<(Key, bool)> {
		let mut indices = Vec::with_capacity(dim_set.len());
		let mut all_provided = true;
		for dim in dim_set.dimensions() {
			match self.get(&dim.name()) {
				Some(value) if !value.is_empty() => {
					indices.push(dim.intern(value)?);
				}
				_ => {
					all_provided = false;
					indices.push(crate::dimension::WILDCARD_INDEX);
				}
			}
		}
		Ok((Key::new(indices), all_provided && dim_set.len() > 0))
	}
}
