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

//! Query-side types that cross the core boundary (spec §4.8, §6): the time
//! range a query covers, the knobs a caller can set (`QuerySpec`), and the
//! wire-shaped output record (`DataSample`).

use crate::error::{Error, Result};
use crate::key::Key;
use crate::percentile;
use crate::time::Ticks;
use crate::value::Histogram;

/// Half-open `[start, end)` range over UTC ticks, the same shape a bucket
/// uses for its own span (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeRange {
	pub start: Ticks,
	pub end: Ticks,
}

impl TimeRange {
	pub fn new(start: Ticks, end: Ticks) -> Result<TimeRange> {
		if end <= start {
			return Err(Error::InvalidArgument(format!("time range end {} must be after start {}", end, start)));
		}
		Ok(TimeRange { start, end })
	}

	pub fn overlaps(&self, other: &TimeRange) -> bool {
		self.start < other.end && other.start < self.end
	}

	/// Smallest range covering both `self` and `other`.
	pub fn union(&self, other: &TimeRange) -> TimeRange {
		TimeRange { start: self.start.min(other.start), end: self.end.max(other.end) }
	}
}

/// How a histogram's percentile-dimension alias (spec §3 reserved names,
/// §4.8) should be projected at query time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PercentileProjection {
	Percentile(f64),
	Average,
	Minimum,
	Maximum,
}

impl PercentileProjection {
	/// `percentile` takes priority when present and numeric and in range;
	/// otherwise the `average`/`maximum`/`minimum` aliases are honored in
	/// that order (spec §4.8 step 4).
	pub fn from_query(percentile: Option<f64>, average: bool, maximum: bool, minimum: bool) -> Result<Option<PercentileProjection>> {
		if let Some(p) = percentile {
			if !(0.0..=100.0).contains(&p) {
				return Err(Error::InvalidArgument(format!("percentile {} is out of range [0, 100]", p)));
			}
			return Ok(Some(PercentileProjection::Percentile(p)));
		}
		if average {
			return Ok(Some(PercentileProjection::Average));
		}
		if maximum {
			return Ok(Some(PercentileProjection::Maximum));
		}
		if minimum {
			return Ok(Some(PercentileProjection::Minimum));
		}
		Ok(None)
	}
}

/// Caller-controlled knobs for `DataSet::query_data` (spec §4.8).
#[derive(Clone, Debug, Default)]
pub struct QuerySpec {
	/// K-way merge matches across buckets into one sample per output Key
	/// rather than one sample per `(bucket, key)` pair.
	pub combine: bool,
	/// When set, `getMatchesSplitByDimension` groups by this dimension's
	/// position within the queried DataSet's DimensionSet.
	pub cross_query_dimension: Option<usize>,
	pub projection: Option<PercentileProjection>,
	/// Surface per-source diagnostics on partial/timeout results (spec §7).
	pub include_request_diagnostics: bool,
}

impl QuerySpec {
	pub fn new() -> QuerySpec {
		QuerySpec::default()
	}
}

/// Output record for one Key over one (possibly combined) time range (spec
/// §4.8). Exactly one of the data fields is populated per instance, mirroring
/// the source's tagged-union `DataSampleType`.
#[derive(Clone, Debug, PartialEq)]
pub enum DataSample {
	HitCount { key: Key, start: Ticks, end: Ticks, hit_count: u64, machine_count: u32 },
	Histogram { key: Key, start: Ticks, end: Ticks, histogram: Histogram, sample_count: u64, machine_count: u32 },
	Percentile { key: Key, start: Ticks, end: Ticks, percentile: f64, percentile_value: Option<i64>, sample_count: u64, machine_count: u32 },
	Average { key: Key, start: Ticks, end: Ticks, average: Option<f64>, sample_count: u64 },
	Minimum { key: Key, start: Ticks, end: Ticks, min_value: Option<i64>, sample_count: u64 },
	Maximum { key: Key, start: Ticks, end: Ticks, max_value: Option<i64>, sample_count: u64 },
}

impl DataSample {
	pub fn key(&self) -> &Key {
		match self {
			DataSample::HitCount { key, .. } => key,
			DataSample::Histogram { key, .. } => key,
			DataSample::Percentile { key, .. } => key,
			DataSample::Average { key, .. } => key,
			DataSample::Minimum { key, .. } => key,
			DataSample::Maximum { key, .. } => key,
		}
	}

	pub fn time_range(&self) -> TimeRange {
		match *self {
			DataSample::HitCount { start, end, .. } => TimeRange { start, end },
			DataSample::Histogram { start, end, .. } => TimeRange { start, end },
			DataSample::Percentile { start, end, .. } => TimeRange { start, end },
			DataSample::Average { start, end, .. } => TimeRange { start, end },
			DataSample::Minimum { start, end, .. } => TimeRange { start, end },
			DataSample::Maximum { start, end, .. } => TimeRange { start, end },
		}
	}
}

/// Build the final histogram-derived sample for `key` over `[start, end)`
/// (spec §4.8 step 4). `raw` must already be the merged histogram for that
/// key/range; `machine_count` is the number of distinct sources folded in.
pub fn project_histogram(
	key: Key,
	start: Ticks,
	end: Ticks,
	raw: Histogram,
	machine_count: u32,
	projection: Option<PercentileProjection>,
) -> Result<DataSample> {
	let sample_count = raw.sample_count();
	match projection {
		None => Ok(DataSample::Histogram { key, start, end, histogram: raw, sample_count, machine_count }),
		Some(PercentileProjection::Percentile(p)) => {
			let value = percentile::percentile_value(&raw, p)?;
			Ok(DataSample::Percentile { key, start, end, percentile: p, percentile_value: value, sample_count, machine_count })
		}
		Some(PercentileProjection::Average) => Ok(DataSample::Average { key, start, end, average: percentile::average(&raw), sample_count }),
		Some(PercentileProjection::Minimum) => Ok(DataSample::Minimum { key, start, end, min_value: percentile::minimum(&raw), sample_count }),
		Some(PercentileProjection::Maximum) => Ok(DataSample::Maximum { key, start, end, max_value: percentile::maximum(&raw), sample_count }),
	}
}
