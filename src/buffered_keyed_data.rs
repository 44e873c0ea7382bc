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

//! Single-writer-per-thread append arena (spec §4.3). Slots are reserved via
//! an atomic fetch-add on the arena offset, the same pattern the teacher
//! uses for on-disk slot reservation in `table.rs::ValueTable::next_free`,
//! generalized here to an in-memory, typed arena instead of a byte-addressed
//! file.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::dimension_set::DimensionSet;
use crate::error::{Error, Result};
use crate::key::Key;

/// Capacity for a buffer expected to hold `key_count` distinct keys.
/// The teacher sizes on-disk value tables in bytes; since each slot here is
/// a typed `(Key, V)` rather than a packed byte blob, the unit is records,
/// not bytes. Over-provisions by 12% to absorb read/no-match races between
/// threads sizing the buffer and threads writing into it.
pub fn buffer_size_for_key_count(key_count: usize, _dims: &DimensionSet) -> usize {
	key_count + key_count / 8 + 1
}

enum State {
	Writable,
	Sealed,
	Sorted,
	Converted,
}

pub struct BufferedKeyedData<V> {
	capacity: usize,
	offset: AtomicUsize,
	slots: Box<[UnsafeCell<MaybeUninit<(Key, V)>>]>,
	sealed: AtomicBool,
	records: Option<Vec<(Key, V)>>,
	state: State,
}

// SAFETY: each slot is written by exactly one thread (the thread that won
// the atomic fetch-add for that index) before seal, and read only after
// seal when writers have stopped.
unsafe impl<V: Send> Sync for BufferedKeyedData<V> {}

impl<V> BufferedKeyedData<V> {
	pub fn new(capacity: usize) -> BufferedKeyedData<V> {
		let mut slots = Vec::with_capacity(capacity);
		for _ in 0..capacity {
			slots.push(UnsafeCell::new(MaybeUninit::uninit()));
		}
		BufferedKeyedData {
			capacity,
			offset: AtomicUsize::new(0),
			slots: slots.into_boxed_slice(),
			sealed: AtomicBool::new(false),
			records: None,
			state: State::Writable,
		}
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	pub fn is_sealed(&self) -> bool {
		self.sealed.load(Ordering::Acquire)
	}

	/// Reserve a slot and write `(key, value)` into it. Returns
	/// `Err(Error::Capacity)` if the buffer is full rather than growing it;
	/// the caller is expected to flush/merge and retry with a fresh buffer.
	pub fn try_write(&self, key: Key, value: V) -> Result<()> {
		if self.is_sealed() {
			return Err(Error::InvalidState("write to sealed BufferedKeyedData".into()));
		}
		let index = self.offset.fetch_add(1, Ordering::AcqRel);
		if index >= self.capacity {
			return Err(Error::Capacity);
		}
		// SAFETY: `index` was granted to this call alone by the fetch_add
		// above; no other call can observe or write the same index.
		unsafe {
			(*self.slots[index].get()).write((key, value));
		}
		Ok(())
	}

	/// Number of records successfully written so far.
	pub fn len(&self) -> usize {
		self.offset.load(Ordering::Acquire).min(self.capacity)
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Transition Writable -> Sealed. Idempotent. Materializes the written
	/// slots into an owned `Vec` so later steps can work with safe code.
	pub fn seal(&mut self) -> Result<()> {
		if self.sealed.swap(true, Ordering::AcqRel) {
			return Ok(());
		}
		let n = self.len();
		let mut records = Vec::with_capacity(n);
		for slot in self.slots[..n].iter() {
			// SAFETY: every slot below `n` was written exactly once before
			// the offset reached or passed it, and sealing happens only
			// after all writers have returned (caller's responsibility, as
			// with the teacher's `complete_plan`/`enact_plan` boundary).
			let pair = unsafe { std::ptr::read(slot.get()).assume_init() };
			records.push(pair);
		}
		self.records = Some(records);
		self.state = State::Sealed;
		Ok(())
	}

	fn records_mut(&mut self) -> Result<&mut Vec<(Key, V)>> {
		self.records.as_mut().ok_or_else(|| Error::InvalidState("BufferedKeyedData is not sealed".into()))
	}

	pub fn records(&self) -> Result<&[(Key, V)]> {
		self.records.as_deref().ok_or_else(|| Error::InvalidState("BufferedKeyedData is not sealed".into()))
	}

	/// Stable sort by Key. Ties retain insertion order (spec §4.3, testable
	/// property 1): the record written later in time (the one still at a
	/// higher original index) lands later in the sorted sequence.
	pub fn sort(&mut self) -> Result<()> {
		if !matches!(self.state, State::Sealed | State::Sorted) {
			return Err(Error::InvalidState("sort requires a sealed buffer".into()));
		}
		self.records_mut()?.sort_by(|a, b| a.0.cmp(&b.0));
		self.state = State::Sorted;
		Ok(())
	}

	/// Project every Key onto `target`, matching dimensions by name against
	/// `source`. Target dimensions absent from `source` become wildcard
	/// (broadening); source dimensions absent from `target` are dropped.
	/// Record count is preserved; collisions are not merged here (spec
	/// §4.3, testable property 5).
	pub fn convert(&mut self, source: &DimensionSet, target: &DimensionSet) -> Result<()> {
		if matches!(self.state, State::Converted) {
			return Err(Error::InvalidState("BufferedKeyedData has already been converted".into()));
		}
		if !matches!(self.state, State::Sealed | State::Sorted) {
			return Err(Error::InvalidState("convert requires a sealed buffer".into()));
		}
		// position in `target` -> position in `source`, or None if the
		// target dimension is absent from the source (stays wildcard).
		let mapping: Vec<Option<usize>> = target
			.dimensions()
			.iter()
			.map(|d| source.find_index(&d.name()))
			.collect();

		for (key, _value) in self.records_mut()?.iter_mut() {
			let mut projected = Vec::with_capacity(target.len());
			for slot in &mapping {
				match slot {
					Some(src_idx) => projected.push(key.get(*src_idx)),
					None => projected.push(crate::dimension::WILDCARD_INDEX),
				}
			}
			*key = Key::new(projected);
		}
		self.state = State::Converted;
		Ok(())
	}

	pub fn into_records(self) -> Result<Vec<(Key, V)>> {
		self.records.ok_or_else(|| Error::InvalidState("BufferedKeyedData is not sealed".into()))
	}
}

impl<V> Drop for BufferedKeyedData<V> {
	fn drop(&mut self) {
		if self.records.is_some() {
			// Ownership of the written values has already moved into `records`.
			return;
		}
		let n = self.len();
		for slot in self.slots[..n].iter() {
			// SAFETY: these slots were written and never materialized/moved
			// out (seal() was never called), so they still own their value.
			unsafe {
				std::ptr::drop_in_place((*slot.get()).as_mut_ptr());
			}
		}
	}
}
