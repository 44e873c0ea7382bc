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

//! Plain-data configuration (spec §1 "configuration file loading ... out of
//! scope", §3 "Compaction configuration"). Mirrors the teacher's `options.rs`
//! referenced from `table.rs` as `options: &Options`: constructed
//! programmatically by the caller, no file-format parsing lives here.

use crate::error::{Error, Result};
use crate::time::Ticks;

/// One `(interval, retention)` rule: once a sealed bucket group's youngest
/// member is older than `retention`, it becomes eligible for compaction into
/// `interval`-wide buckets (spec §3, §4.8).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompactionRule {
	pub interval: Ticks,
	pub retention: Ticks,
}

impl CompactionRule {
	pub fn new(interval: Ticks, retention: Ticks) -> Result<CompactionRule> {
		if interval <= 0 {
			return Err(Error::InvalidArgument(format!("compaction interval must be positive, got {}", interval)));
		}
		if retention < 0 {
			return Err(Error::InvalidArgument(format!("compaction retention must be non-negative, got {}", retention)));
		}
		Ok(CompactionRule { interval, retention })
	}
}

/// Ordered set of compaction rules plus the default (finest) interval new
/// buckets are created at (spec §3 "Compaction configuration"). Rules must be
/// supplied in ascending coarseness; each rule's interval must be an exact
/// multiple of the previous one so contiguous buckets tile evenly.
#[derive(Clone, Debug)]
pub struct CompactionConfig {
	pub default_interval: Ticks,
	rules: Vec<CompactionRule>,
}

impl CompactionConfig {
	pub fn new(default_interval: Ticks, rules: Vec<CompactionRule>) -> Result<CompactionConfig> {
		if default_interval <= 0 {
			return Err(Error::InvalidArgument(format!("default interval must be positive, got {}", default_interval)));
		}
		let mut previous = default_interval;
		for rule in &rules {
			if rule.interval <= previous {
				return Err(Error::InvalidArgument("compaction rules must be in strictly ascending interval order".into()));
			}
			if rule.interval % previous != 0 {
				return Err(Error::InvalidArgument(format!(
					"compaction interval {} is not a multiple of the preceding interval {}",
					rule.interval, previous
				)));
			}
			previous = rule.interval;
		}
		Ok(CompactionConfig { default_interval, rules })
	}

	/// No compaction beyond the default interval; buckets are sealed,
	/// persisted, and eventually deleted at `maxAge` but never coalesced.
	pub fn none(default_interval: Ticks) -> CompactionConfig {
		CompactionConfig { default_interval, rules: Vec::new() }
	}

	pub fn rules(&self) -> &[CompactionRule] {
		&self.rules
	}
}

/// Top-level knobs for a `DataSet` (spec §3 "DataSet", §4.8 routing/sealing).
#[derive(Clone, Debug)]
pub struct DataSetOptions {
	pub compaction: CompactionConfig,
	/// How long after a bucket's end tick it is sealed.
	pub seal_time: Ticks,
	/// How long after a bucket's end tick it is deleted entirely.
	pub max_age: Ticks,
}

impl DataSetOptions {
	pub fn new(compaction: CompactionConfig, seal_time: Ticks, max_age: Ticks) -> Result<DataSetOptions> {
		if seal_time < 0 {
			return Err(Error::InvalidArgument(format!("seal_time must be non-negative, got {}", seal_time)));
		}
		if max_age < seal_time {
			return Err(Error::InvalidArgument("max_age must be at least seal_time".into()));
		}
		Ok(DataSetOptions { compaction, seal_time, max_age })
	}
}

/// A named dimension plus its optional allowed-value restriction, as handed
/// to `DataSet::new` when declaring the shape of a counter (spec §3
/// "Dimension").
#[derive(Clone, Debug)]
pub struct DimensionOptions {
	pub name: String,
	pub allowed_values: Option<Vec<String>>,
}

impl DimensionOptions {
	pub fn new(name: &str) -> DimensionOptions {
		DimensionOptions { name: name.to_string(), allowed_values: None }
	}

	pub fn with_allowed_values(name: &str, allowed_values: Vec<String>) -> DimensionOptions {
		DimensionOptions { name: name.to_string(), allowed_values: Some(allowed_values) }
	}
}
