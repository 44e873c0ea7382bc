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

//! Pooled byte-buffer manager (spec §5, §9 "Memory pool shape"). Size
//! classes are powers of two from 4 KiB up to a large-block threshold, above
//! which allocations bypass the pool entirely. Modeled on the teacher's
//! preallocated, size-tiered `value_tables: [ValueTable; 15]` array in
//! `column.rs`, generalized from on-disk size tiers to in-memory buffer
//! size classes for temporary arenas and serialization buffers.

use parking_lot::Mutex;

const MIN_CLASS_SHIFT: u32 = 12; // 4 KiB
const MAX_CLASS_SHIFT: u32 = 20; // 1 MiB; anything larger bypasses the pool.
const NUM_CLASSES: usize = (MAX_CLASS_SHIFT - MIN_CLASS_SHIFT + 1) as usize;

fn class_for(size: usize) -> Option<usize> {
	if size == 0 {
		return Some(0);
	}
	let shift = (usize::BITS - (size - 1).leading_zeros()).max(MIN_CLASS_SHIFT);
	if shift > MAX_CLASS_SHIFT {
		return None;
	}
	Some((shift - MIN_CLASS_SHIFT) as usize)
}

fn class_size(class: usize) -> usize {
	1usize << (MIN_CLASS_SHIFT as usize + class)
}

/// Free-list pool of same-size byte buffers, one list per size class.
/// Requests above the largest class allocate directly and are never pooled.
pub struct BufferPool {
	free_lists: Vec<Mutex<Vec<Vec<u8>>>>,
}

impl BufferPool {
	pub fn new() -> BufferPool {
		BufferPool { free_lists: (0..NUM_CLASSES).map(|_| Mutex::new(Vec::new())).collect() }
	}

	/// Check out a buffer with capacity at least `size`, zero-length. Reused
	/// from the free list for its size class when available.
	pub fn acquire(&self, size: usize) -> PooledBuffer<'_> {
		match class_for(size) {
			Some(class) => {
				let mut buf = self.free_lists[class].lock().pop().unwrap_or_else(|| Vec::with_capacity(class_size(class)));
				buf.clear();
				PooledBuffer { pool: Some(self), class: Some(class), buf }
			}
			None => PooledBuffer { pool: None, class: None, buf: Vec::with_capacity(size) },
		}
	}

	fn release(&self, class: usize, mut buf: Vec<u8>) {
		buf.clear();
		let mut list = self.free_lists[class].lock();
		// Cap free-list depth so a burst of large requests doesn't pin
		// unbounded memory after the burst subsides.
		if list.len() < 64 {
			list.push(buf);
		}
	}
}

impl Default for BufferPool {
	fn default() -> BufferPool {
		BufferPool::new()
	}
}

/// RAII guard around a pooled `Vec<u8>`. Returns the buffer to its size
/// class's free list on drop; large (unpooled) buffers are simply dropped.
pub struct PooledBuffer<'a> {
	pool: Option<&'a BufferPool>,
	class: Option<usize>,
	buf: Vec<u8>,
}

impl<'a> std::ops::Deref for PooledBuffer<'a> {
	type Target = Vec<u8>;
	fn deref(&self) -> &Vec<u8> {
		&self.buf
	}
}

impl<'a> std::ops::DerefMut for PooledBuffer<'a> {
	fn deref_mut(&mut self) -> &mut Vec<u8> {
		&mut self.buf
	}
}

impl<'a> Drop for PooledBuffer<'a> {
	fn drop(&mut self) {
		if let (Some(pool), Some(class)) = (self.pool, self.class) {
			pool.release(class, std::mem::take(&mut self.buf));
		}
	}
}
