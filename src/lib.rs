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

//! Dimension-indexed, time-bucketed metric storage and aggregation.
//!
//! A `DataSet` holds, for one counter name, a run of time-bounded
//! `DataBucket`s keyed on an interned `Key` tuple over a fixed
//! `DimensionSet`; buckets seal, persist to disk and compact into coarser
//! intervals as they age out of their write window. `CounterAggregator`
//! merges per-machine samples reported for the same Key/time-range back
//! together on the query side, for callers that federate across machines
//! rather than writing into a single `DataSet` directly.

pub mod aggregator;
pub mod bitpack;
pub mod bucket;
pub mod buffered_keyed_data;
pub mod buffered_value_array;
pub mod counter_name;
pub mod dataset;
pub mod dimension;
pub mod dimension_set;
pub mod dimension_spec;
pub mod display;
pub mod error;
pub mod glob;
pub mod key;
pub mod keyed_data_store;
pub mod lz4_codec;
pub mod merge;
pub mod options;
pub mod percentile;
pub mod persist;
pub mod pool;
pub mod query;
pub mod scheduler;
#[cfg(test)]
mod testutil;
pub mod time;
pub mod value;
pub mod varint;

pub use aggregator::{CounterAggregator, MachineResponse};
pub use bucket::{BucketState, DataBucket};
pub use dataset::DataSet;
pub use dimension::Dimension;
pub use dimension_set::DimensionSet;
pub use dimension_spec::DimensionSpecification;
pub use error::{Error, Result};
pub use key::Key;
pub use keyed_data_store::KeyedDataStore;
pub use options::{CompactionConfig, CompactionRule, DataSetOptions, DimensionOptions};
pub use pool::{BufferPool, PooledBuffer};
pub use query::{DataSample, PercentileProjection, QuerySpec, TimeRange};
pub use scheduler::{Semaphore, SemaphorePermit, TaskRunner};
pub use time::Ticks;
pub use value::{Histogram, HitCount, MergeableValue, PersistValue, Rounding};
