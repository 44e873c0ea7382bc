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

//! Bounded-parallelism background task runner and admission primitives
//! (spec §5, §9 "Task runner shape", "Admission/scheduler primitives"). A
//! fixed-size worker pool fed by an unbounded MPMC channel: `schedule` never
//! blocks the caller, `join` waits for the queue to drain or a deadline to
//! elapse. Constructed explicitly by whoever owns the `DataSet`/`DataBucket`
//! tree rather than reached for as a process-wide singleton (spec §9
//! "Global state"), so tests can swap in a runner sized for hermetic,
//! deterministic execution.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
	pending: AtomicUsize,
	drained: Condvar,
	drain_lock: Mutex<()>,
}

/// A fixed-size worker pool backing background compaction and persist jobs.
pub struct TaskRunner {
	sender: Option<Sender<Job>>,
	shared: Arc<Shared>,
	workers: Vec<std::thread::JoinHandle<()>>,
}

impl TaskRunner {
	/// `workers` is clamped to at least 1.
	pub fn new(workers: usize) -> TaskRunner {
		let workers = workers.max(1);
		let (sender, receiver): (Sender<Job>, Receiver<Job>) = unbounded();
		let shared = Arc::new(Shared { pending: AtomicUsize::new(0), drained: Condvar::new(), drain_lock: Mutex::new(()) });

		let handles = (0..workers)
			.map(|_| {
				let receiver = receiver.clone();
				let shared = shared.clone();
				std::thread::spawn(move || {
					while let Ok(job) = receiver.recv() {
						job();
						if shared.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
							let _guard = shared.drain_lock.lock();
							shared.drained.notify_all();
						}
					}
				})
			})
			.collect();

		TaskRunner { sender: Some(sender), shared, workers: handles }
	}

	/// Defaults to the number of available cores, falling back to 1 if the
	/// platform can't report it (spec DESIGN.md "Task runner default
	/// parallelism").
	pub fn with_default_parallelism() -> TaskRunner {
		let n = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
		TaskRunner::new(n)
	}

	/// Enqueue `work`. Never blocks; the runner backpressures by queueing
	/// (spec §5).
	pub fn schedule<F: FnOnce() + Send + 'static>(&self, work: F) {
		self.shared.pending.fetch_add(1, Ordering::AcqRel);
		let sender = self.sender.as_ref().expect("TaskRunner sender is only taken down on drop");
		if sender.send(Box::new(work)).is_err() {
			// Workers have already shut down; undo the optimistic increment
			// so a concurrent `join` doesn't wait forever for a job that
			// will never run.
			self.shared.pending.fetch_sub(1, Ordering::AcqRel);
		}
	}

	/// Block until the queue drains or `deadline` elapses, whichever is
	/// first. Returns `true` if the queue drained.
	pub fn join(&self, deadline: Duration) -> bool {
		let start = Instant::now();
		let mut guard = self.shared.drain_lock.lock();
		while self.shared.pending.load(Ordering::Acquire) > 0 {
			let elapsed = start.elapsed();
			if elapsed >= deadline {
				return false;
			}
			let remaining = deadline - elapsed;
			let timed_out = self.shared.drained.wait_for(&mut guard, remaining).timed_out();
			if timed_out && self.shared.pending.load(Ordering::Acquire) > 0 {
				return false;
			}
		}
		true
	}

	pub fn pending_count(&self) -> usize {
		self.shared.pending.load(Ordering::Acquire)
	}
}

impl Drop for TaskRunner {
	fn drop(&mut self) {
		// Dropping the sender closes the channel once all clones (including
		// the ones workers hold internally via `recv`) are gone; here it
		// unblocks the workers' `recv` loops so they can exit.
		self.sender.take();
		for worker in self.workers.drain(..) {
			let _ = worker.join();
		}
	}
}

/// Count-based semaphore bounding concurrent background jobs (spec §9
/// "Admission/scheduler primitives"). Blocking `acquire`/non-blocking
/// `try_acquire`, `Condvar`-backed.
pub struct Semaphore {
	state: Mutex<usize>,
	available: Condvar,
}

impl Semaphore {
	pub fn new(permits: usize) -> Semaphore {
		Semaphore { state: Mutex::new(permits), available: Condvar::new() }
	}

	pub fn acquire(&self) -> SemaphorePermit<'_> {
		let mut count = self.state.lock();
		while *count == 0 {
			self.available.wait(&mut count);
		}
		*count -= 1;
		SemaphorePermit { semaphore: self }
	}

	pub fn try_acquire(&self) -> Option<SemaphorePermit<'_>> {
		let mut count = self.state.lock();
		if *count == 0 {
			return None;
		}
		*count -= 1;
		Some(SemaphorePermit { semaphore: self })
	}

	fn release(&self) {
		let mut count = self.state.lock();
		*count += 1;
		self.available.notify_one();
	}
}

pub struct SemaphorePermit<'a> {
	semaphore: &'a Semaphore,
}

impl<'a> Drop for SemaphorePermit<'a> {
	fn drop(&mut self) {
		self.semaphore.release();
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::sync::atomic::AtomicU32;

	#[test]
	fn scheduled_jobs_all_run_before_join_returns() {
		let runner = TaskRunner::new(4);
		let counter = Arc::new(AtomicU32::new(0));
		for _ in 0..100 {
			let counter = counter.clone();
			runner.schedule(move || {
				counter.fetch_add(1, Ordering::SeqCst);
			});
		}
		assert!(runner.join(Duration::from_secs(5)));
		assert_eq!(counter.load(Ordering::SeqCst), 100);
	}

	#[test]
	fn join_with_no_pending_work_returns_immediately() {
		let runner = TaskRunner::new(2);
		assert!(runner.join(Duration::from_millis(50)));
	}

	#[test]
	fn semaphore_bounds_concurrent_holders() {
		let sem = Arc::new(Semaphore::new(2));
		let concurrent = Arc::new(AtomicU32::new(0));
		let max_seen = Arc::new(AtomicU32::new(0));
		let mut handles = Vec::new();
		for _ in 0..8 {
			let sem = sem.clone();
			let concurrent = concurrent.clone();
			let max_seen = max_seen.clone();
			handles.push(std::thread::spawn(move || {
				let _permit = sem.acquire();
				let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
				max_seen.fetch_max(now, Ordering::SeqCst);
				std::thread::sleep(Duration::from_millis(10));
				concurrent.fetch_sub(1, Ordering::SeqCst);
			}));
		}
		for h in handles {
			h.join().unwrap();
		}
		assert!(max_seen.load(Ordering::SeqCst) <= 2);
	}

	#[test]
	fn try_acquire_fails_when_exhausted() {
		let sem = Semaphore::new(1);
		let _first = sem.acquire();
		assert!(sem.try_acquire().is_none());
	}
}
