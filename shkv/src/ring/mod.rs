use std::marker::PhantomData;
use std::mem;
use std::thread;
use std::time::Duration;

use raw_sync::events::{Event, EventImpl, EventInit, EventState};
use raw_sync::locks::{LockImpl, LockInit, Mutex};
use raw_sync::Timeout;

use crate::errors::{sync_err, StoreError};

/// Pause before re-waiting after seeing a head addressed to another
/// consumer, so its rightful waiter gets a chance to run.
const FOREIGN_HEAD_BACKOFF: Duration = Duration::from_millis(1);

/// Head/tail/count triple at the start of a channel's shared region.
/// Only ever touched while holding the channel mutex.
#[repr(C)]
struct RingState {
    head: u32,
    tail: u32,
    count: u32,
}

/// Fixed-capacity circular buffer of `T` slots laid out in shared memory,
/// usable by producers and consumers in different processes.
///
/// One process-shared mutex guards the state and the slots. Two auto-reset
/// events stand in for the classic "not full" / "not empty" condition
/// variables: a set event stays signaled until one waiter consumes it, so
/// a wakeup raised between a guard check and the wait is never lost.
///
/// `put` blocks while the channel is full, `pop` while it is empty, and
/// `conditional_pop` additionally while the head message does not satisfy
/// the caller's predicate; every wakeup re-evaluates the guard before
/// touching a slot.
pub struct RingChannel<T> {
    lock: Box<dyn LockImpl>,
    not_empty: Box<dyn EventImpl>,
    not_full: Box<dyn EventImpl>,
    state: *mut RingState,
    slots: *mut T,
    capacity: usize,
    _marker: PhantomData<T>,
}

fn align_up(off: usize, align: usize) -> usize {
    (off + align - 1) & !(align - 1)
}

/// Bytes one channel of `capacity` slots occupies inside the segment.
/// Must walk the exact same offsets as [`RingChannel::attach`].
pub fn region_size<T>(capacity: usize) -> usize {
    let mut off = 0usize;
    off = align_up(off, 8) + Mutex::size_of(None);
    off = align_up(off, 8) + Event::size_of(None);
    off = align_up(off, 8) + Event::size_of(None);
    off = align_up(off, 8) + mem::size_of::<RingState>();
    align_up(off, mem::align_of::<T>()) + capacity * mem::size_of::<T>()
}

impl<T: Copy> RingChannel<T> {
    /// Lay a channel over `capacity` slots starting at `base`. The creating
    /// process initializes the primitives and the state; every other process
    /// attaches to the already-initialized ones. Returns the channel and the
    /// number of bytes consumed from `base`.
    ///
    /// # Safety
    ///
    /// `base` must point at least [`region_size::<T>`] writable bytes of a
    /// mapping shared by all participants, and `create` must be true for
    /// exactly the first attach over zeroed memory.
    pub unsafe fn attach(
        base: *mut u8,
        capacity: usize,
        create: bool,
    ) -> Result<(RingChannel<T>, usize), StoreError> {
        let mut off = align_up(0, 8);
        let lock_mem = base.add(off);
        off = align_up(off + Mutex::size_of(None), 8);
        let not_empty_mem = base.add(off);
        off = align_up(off + Event::size_of(None), 8);
        let not_full_mem = base.add(off);
        off = align_up(off + Event::size_of(None), 8);
        let state = base.add(off) as *mut RingState;
        off = align_up(off + mem::size_of::<RingState>(), mem::align_of::<T>());
        let slots = base.add(off) as *mut T;
        off += capacity * mem::size_of::<T>();

        let (lock, not_empty, not_full) = if create {
            state.write(RingState {
                head: 0,
                tail: 0,
                count: 0,
            });
            let (lock, _) = Mutex::new(lock_mem, state as *mut u8).map_err(sync_err)?;
            let (not_empty, _) = Event::new(not_empty_mem, true).map_err(sync_err)?;
            let (not_full, _) = Event::new(not_full_mem, true).map_err(sync_err)?;
            (lock, not_empty, not_full)
        } else {
            let (lock, _) =
                Mutex::from_existing(lock_mem, state as *mut u8).map_err(sync_err)?;
            let (not_empty, _) = Event::from_existing(not_empty_mem).map_err(sync_err)?;
            let (not_full, _) = Event::from_existing(not_full_mem).map_err(sync_err)?;
            (lock, not_empty, not_full)
        };

        Ok((
            RingChannel {
                lock,
                not_empty,
                not_full,
                state,
                slots,
                capacity,
                _marker: PhantomData,
            },
            off,
        ))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Blocking enqueue. FIFO, never drops or reorders.
    pub fn put(&self, msg: T) -> Result<(), StoreError> {
        loop {
            {
                let _guard = self.lock.lock().map_err(sync_err)?;
                let state = unsafe { &mut *self.state };
                if (state.count as usize) < self.capacity {
                    unsafe { self.slots.add(state.tail as usize).write(msg) };
                    state.tail = (state.tail + 1) % self.capacity as u32;
                    state.count += 1;
                    let free = self.capacity - state.count as usize;
                    drop(_guard);
                    self.not_empty.set(EventState::Signaled).map_err(sync_err)?;
                    if free > 0 {
                        // One set per pop can collapse under contention;
                        // chain the wakeup while slots are left.
                        self.not_full.set(EventState::Signaled).map_err(sync_err)?;
                    }
                    return Ok(());
                }
            }
            self.not_full.wait(Timeout::Infinite).map_err(sync_err)?;
        }
    }

    /// Blocking dequeue of the oldest message.
    pub fn pop(&self) -> Result<T, StoreError> {
        self.conditional_pop(|_| true, |_| {})
    }

    /// Blocking dequeue that only removes the head once `predicate` accepts
    /// it; `on_match` runs on the slot just before it is consumed. A waiter
    /// woken for a head addressed to someone else re-signals "not empty"
    /// before blocking again so the wakeup reaches the other consumers.
    pub fn conditional_pop<P, E>(
        &self,
        mut predicate: P,
        mut on_match: E,
    ) -> Result<T, StoreError>
    where
        P: FnMut(&T) -> bool,
        E: FnMut(&mut T),
    {
        loop {
            let mut head_is_foreign = false;
            {
                let _guard = self.lock.lock().map_err(sync_err)?;
                let state = unsafe { &mut *self.state };
                if state.count > 0 {
                    let head = unsafe { &mut *self.slots.add(state.head as usize) };
                    if predicate(head) {
                        on_match(head);
                        let msg = *head;
                        state.head = (state.head + 1) % self.capacity as u32;
                        state.count -= 1;
                        let remaining = state.count;
                        drop(_guard);
                        self.not_full.set(EventState::Signaled).map_err(sync_err)?;
                        if remaining > 0 {
                            // One set per put can collapse under contention;
                            // chain the wakeup while messages are left.
                            self.not_empty.set(EventState::Signaled).map_err(sync_err)?;
                        }
                        return Ok(msg);
                    }
                    head_is_foreign = true;
                }
            }
            if head_is_foreign {
                // Hand the wakeup back before blocking again, and give the
                // rightful consumer a chance to run.
                self.not_empty.set(EventState::Signaled).map_err(sync_err)?;
                thread::sleep(FOREIGN_HEAD_BACKOFF);
            }
            self.not_empty.wait(Timeout::Infinite).map_err(sync_err)?;
        }
    }
}
