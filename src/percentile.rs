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

//! Histogram -> derived-statistic query-time projections (spec §4.8).
//! Percentile, average, minimum, and maximum are all computed from the same
//! `Histogram` sample map; none of them are stored.

use crate::error::{Error, Result};
use crate::value::Histogram;

/// `rank = floor(round(N * p / 100.0) + 0.5)`, clamped to `[1, N]`. Preserved
/// literally per spec §9 "Percentile computation ambiguity": this double-
/// rounds relative to textbook nearest-rank and that is intentional.
fn rank_for_percentile(total: u64, percentile: f64) -> u64 {
	let raw = (total as f64) * percentile / 100.0;
	let rank = (raw.round() + 0.5).floor();
	(rank as u64).clamp(1, total.max(1))
}

/// Walk keys ascending, accumulating counts, and return the first key whose
/// running total reaches `rank`. `None` only for an empty histogram.
pub fn percentile_value(histogram: &Histogram, percentile: f64) -> Result<Option<i64>> {
	if !(0.0..=100.0).contains(&percentile) {
		return Err(Error::InvalidArgument(format!("percentile {} is out of range [0, 100]", percentile)));
	}
	let total = histogram.sample_count();
	if total == 0 {
		return Ok(None);
	}
	if percentile == 0.0 {
		return Ok(histogram.min_key());
	}
	if percentile == 100.0 {
		return Ok(histogram.max_key());
	}
	let rank = rank_for_percentile(total, percentile);
	let mut running = 0u64;
	for (&key, &count) in histogram.0.iter() {
		running += count as u64;
		if running >= rank {
			return Ok(Some(key));
		}
	}
	Ok(histogram.max_key())
}

/// `Σ (key * count) / N`, computed with per-term scaling to avoid overflow
/// at extreme histogram widths (spec §4.8 "Average").
pub fn average(histogram: &Histogram) -> Option<f64> {
	let total = histogram.sample_count();
	if total == 0 {
		return None;
	}
	let mut sum = 0.0f64;
	for (&key, &count) in histogram.0.iter() {
		sum += (key as f64) * (count as f64 / total as f64);
	}
	Some(sum)
}

pub fn minimum(histogram: &Histogram) -> Option<i64> {
	histogram.min_key()
}

pub fn maximum(histogram: &Histogram) -> Option<i64> {
	histogram.max_key()
}
