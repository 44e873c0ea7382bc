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

//! Ordered collection of `Dimension`s that together define a `Key` shape
//! (spec §3, §4.1). Ordered by descending live cardinality at construction
//! time so that high-selectivity dimensions are compared first during
//! sorted merges.

use std::collections::HashSet;
use crate::dimension::Dimension;
use crate::error::{Error, Result};

#[derive(Clone)]
pub struct DimensionSet {
	dims: Vec<Dimension>,
}

impl DimensionSet {
	pub fn new(mut dims: Vec<Dimension>) -> Result<DimensionSet> {
		let mut seen = HashSet::new();
		for d in &dims {
			if !seen.insert(d.name().to_lowercase()) {
				return Err(Error::InvalidArgument(format!("duplicate dimension name: {}", d.name())));
			}
		}
		// Stable sort: ties (equal cardinality, as at construction of a fresh
		// set this is usually all-zero) keep caller-supplied relative order.
		dims.sort_by(|a, b| b.cardinality().cmp(&a.cardinality()));
		Ok(DimensionSet { dims })
	}

	pub fn empty() -> DimensionSet {
		DimensionSet { dims: Vec::new() }
	}

	pub fn len(&self) -> usize {
		self.dims.len()
	}

	pub fn is_empty(&self) -> bool {
		self.dims.is_empty()
	}

	pub fn dimensions(&self) -> &[Dimension] {
		&self.dims
	}

	pub fn find_index(&self, name: &str) -> Option<usize> {
		self.dims.iter().position(|d| d.name().eq_ignore_ascii_case(name))
	}

	pub fn dimension(&self, position: usize) -> &Dimension {
		&self.dims[position]
	}

	/// Re-sort by current live cardinality. Used after compaction builds a
	/// canonical output set from converted input keys (spec §4.6, DESIGN.md
	/// Open Question: "canonical" reordering).
	pub fn resorted(&self) -> DimensionSet {
		let mut dims = self.dims.clone();
		dims.sort_by(|a, b| b.cardinality().cmp(&a.cardinality()));
		DimensionSet { dims }
	}
}

impl PartialEq for DimensionSet {
	fn eq(&self, other: &Self) -> bool {
		if self.dims.len() != other.dims.len() {
			return false;
		}
		let mut mine: Vec<String> = self.dims.iter().map(|d| d.name().to_lowercase()).collect();
		let mut theirs: Vec<String> = other.dims.iter().map(|d| d.name().to_lowercase()).collect();
		mine.sort();
		theirs.sort();
		mine == theirs
	}
}

impl Eq for DimensionSet {}
