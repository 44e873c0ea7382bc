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

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	/// A user-supplied name, timestamp, percentile, or dimension was rejected. No side effects occurred.
	InvalidArgument(String),
	/// Write after seal, sort before seal, double-convert, or similar state violation.
	InvalidState(String),
	/// Malformed, truncated, or version-incompatible on-disk data.
	PersistedData(String),
	/// A fan-out or query deadline was exceeded.
	Timeout(String),
	/// A write buffer is full; the caller should retry after a merge.
	Capacity,
	/// An ordering invariant was violated (k-way merge, index underflow). Does not corrupt persisted data.
	Fatal(String),
	Io(std::io::Error),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
			Error::InvalidState(msg) => write!(f, "invalid state: {}", msg),
			Error::PersistedData(msg) => write!(f, "persisted data error: {}", msg),
			Error::Timeout(msg) => write!(f, "timeout: {}", msg),
			Error::Capacity => write!(f, "write buffer is full"),
			Error::Fatal(msg) => write!(f, "fatal: {}", msg),
			Error::Io(err) => write!(f, "io error: {}", err),
		}
	}
}

impl std::error::Error for Error {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Error::Io(err) => Some(err),
			_ => None,
		}
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Error {
		Error::Io(err)
	}
}
