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

//! UTC tick type and ISO-8601 interchange for bucket headers (spec §6).
//! Ticks are milliseconds since the Unix epoch throughout this crate.

use chrono::{DateTime, TimeZone, Utc};
use crate::error::{Error, Result};

pub type Ticks = i64;

pub fn now_ticks() -> Ticks {
	Utc::now().timestamp_millis()
}

pub fn ticks_to_iso8601(ticks: Ticks) -> String {
	let dt: DateTime<Utc> = Utc.timestamp_millis_opt(ticks).single().unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap());
	dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn iso8601_to_ticks(s: &str) -> Result<Ticks> {
	DateTime::parse_from_rfc3339(s)
		.map(|dt| dt.timestamp_millis())
		.map_err(|e| Error::PersistedData(format!("invalid ISO-8601 timestamp {:?}: {}", s, e)))
}

/// Round `ts` down to the start of the `interval`-wide bucket that contains it (spec §4.8).
pub fn floor_to_interval(ts: Ticks, interval: Ticks) -> Ticks {
	if interval <= 0 {
		return ts;
	}
	ts.div_euclid(interval) * interval
}
