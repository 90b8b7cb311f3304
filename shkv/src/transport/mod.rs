use std::mem;
use std::sync::atomic::{AtomicU32, Ordering};

use log::debug;
use shared_memory::{Shmem, ShmemConf, ShmemError};

use crate::core::{Request, Response, ShmemConfig};
use crate::errors::StoreError;
use crate::ring::{self, RingChannel};

// The client-id counter sits at the very start of the segment, padded so
// the request ring begins 8-aligned.
const COUNTER_AREA: usize = 8;

/// Bytes the whole transport segment occupies for a given ring capacity.
pub fn segment_size(cfg: &ShmemConfig) -> usize {
    COUNTER_AREA
        + ring::region_size::<Request>(cfg.ring_capacity)
        + pad8(ring::region_size::<Request>(cfg.ring_capacity))
        + ring::region_size::<Response>(cfg.ring_capacity)
}

fn pad8(off: usize) -> usize {
    (8 - off % 8) % 8
}

/// The shared-memory region every participant maps: one request ring, one
/// response ring, and a monotonic client-id counter. The server creates and
/// owns the segment (its drop unlinks the well-known name); clients open it
/// read/write and only ever unmap.
///
/// No pointers live inside the segment; each process rebuilds this view
/// from its own mapped base address.
pub struct Transport {
    // Keeps the mapping alive for as long as the rings are reachable.
    shmem: Shmem,
    next_client_id: *const AtomicU32,
    requests: RingChannel<Request>,
    responses: RingChannel<Response>,
}

// All shared state behind the segment's own process-shared mutexes and
// atomics; the raw pointers never escape the mapped region.
unsafe impl Send for Transport {}
unsafe impl Sync for Transport {}

impl Transport {
    /// Server side: create the segment under the configured link path and
    /// initialize the rings. If a link from a previous run is still present,
    /// attach to the existing segment instead.
    pub fn create(cfg: &ShmemConfig) -> Result<Transport, StoreError> {
        let size = segment_size(cfg);
        let shmem = match ShmemConf::new()
            .size(size)
            .flink(cfg.flink_path())
            .create()
        {
            Ok(m) => m,
            Err(ShmemError::LinkExists) => {
                debug!("segment link {} already exists, attaching", cfg.flink_path());
                ShmemConf::new().flink(cfg.flink_path()).open()?
            }
            Err(e) => return Err(e.into()),
        };
        let owner = shmem.is_owner();
        unsafe { Transport::attach(shmem, cfg, owner) }
    }

    /// Client side: open an existing segment. Failing here usually means the
    /// server has not been started.
    pub fn open(cfg: &ShmemConfig) -> Result<Transport, StoreError> {
        let shmem = ShmemConf::new().flink(cfg.flink_path()).open()?;
        unsafe { Transport::attach(shmem, cfg, false) }
    }

    unsafe fn attach(
        shmem: Shmem,
        cfg: &ShmemConfig,
        create: bool,
    ) -> Result<Transport, StoreError> {
        let base = shmem.as_ptr();
        if create {
            (base as *mut u32).write(0);
        }
        let next_client_id = base as *const AtomicU32;

        let mut off = COUNTER_AREA;
        let (requests, used) =
            RingChannel::<Request>::attach(base.add(off), cfg.ring_capacity, create)?;
        off += used + pad8(used);
        let (responses, _) =
            RingChannel::<Response>::attach(base.add(off), cfg.ring_capacity, create)?;

        debug!(
            "transport segment mapped: {} bytes, ring capacity {}",
            shmem.len(),
            cfg.ring_capacity
        );
        Ok(Transport {
            shmem,
            next_client_id,
            requests,
            responses,
        })
    }

    /// Whether this process created (and will unlink) the segment.
    pub fn is_owner(&self) -> bool {
        self.shmem.is_owner()
    }

    /// Hand out the next client id. Ids are never reused for the lifetime
    /// of the segment.
    pub fn register_client(&self) -> u32 {
        unsafe { &*self.next_client_id }.fetch_add(1, Ordering::SeqCst)
    }

    /// Fire-and-forget: enqueue the request without waiting for an answer.
    pub fn send(&self, request: Request) -> Result<(), StoreError> {
        self.requests.put(request)
    }

    /// Enqueue the request and block until the response addressed to this
    /// request's client id arrives. Responses for other clients are left in
    /// place for their own waiters.
    pub fn send_and_wait(&self, mut request: Request) -> Result<Response, StoreError> {
        request.wants_reply = true;
        let client_id = request.client_id;
        self.requests.put(request)?;
        self.responses
            .conditional_pop(|resp| resp.client_id == client_id, |_| {})
    }

    /// Server side: oldest pending request, regardless of origin.
    pub fn next_request(&self) -> Result<Request, StoreError> {
        self.requests.pop()
    }

    /// Server side: publish a response for its destination client.
    pub fn reply(&self, response: Response) -> Result<(), StoreError> {
        self.responses.put(response)
    }
}

// Compile-time guard: messages must stay flat and copyable to cross the
// process boundary by content.
const _: () = {
    assert!(mem::size_of::<Request>() <= 64);
    assert!(mem::size_of::<Response>() <= 64);
};
