use std::fs;
use std::process;
use std::sync::Arc;
use std::thread;

use log::{error, info};
use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;

use crate::core::{FixedStr, Op, Request, Response, ShmemConfig, Status};
use crate::errors::StoreError;
use crate::table::KvTable;
use crate::transport::Transport;

/// The long-lived server: one transport segment, one hash table, and a
/// fixed pool of identical worker threads. Workers are a pure throughput
/// knob; they share everything and differ only in which request they
/// happen to dequeue.
pub struct KvServer {
    transport: Arc<Transport>,
    table: Arc<KvTable>,
    workers: usize,
    flink_path: String,
}

impl KvServer {
    /// Create the transport segment and the table. The stripe count follows
    /// the initial capacity, bounding worker concurrency by the table's
    /// stripes.
    pub fn new(
        cfg: &ShmemConfig,
        workers: usize,
        initial_capacity: usize,
    ) -> Result<KvServer, StoreError> {
        let transport = Transport::create(cfg)?;
        let table = KvTable::new(initial_capacity, initial_capacity);
        Ok(KvServer {
            transport: Arc::new(transport),
            table: Arc::new(table),
            workers: workers.max(1),
            flink_path: cfg.flink_path(),
        })
    }

    /// Remove the segment's link from the namespace and exit when the
    /// process is asked to stop. Clients attached to the old segment keep
    /// their mapping; new clients will fail to connect until a server
    /// recreates it.
    pub fn install_signal_handler(&self) -> Result<(), StoreError> {
        let mut signals = Signals::new([SIGHUP, SIGINT, SIGQUIT, SIGTERM])?;
        let flink_path = self.flink_path.clone();
        thread::spawn(move || {
            if signals.forever().next().is_some() {
                info!("shutting down, unlinking {}", flink_path);
                let _ = fs::remove_file(&flink_path);
                process::exit(0);
            }
        });
        Ok(())
    }

    /// Spawn the worker pool and serve forever. Only returns on a failure
    /// to spawn; the service has no graceful shutdown besides termination.
    pub fn run(&self) -> Result<(), StoreError> {
        info!("starting server with {} workers", self.workers);
        let mut handles = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers {
            let transport = Arc::clone(&self.transport);
            let table = Arc::clone(&self.table);
            let handle = thread::Builder::new()
                .name(format!("kv-worker-{}", worker_id))
                .spawn(move || worker_loop(worker_id, &transport, &table))?;
            handles.push(handle);
        }
        for handle in handles {
            let _ = handle.join();
        }
        Ok(())
    }
}

fn worker_loop(worker_id: usize, transport: &Transport, table: &KvTable) {
    info!("worker#{}: waiting for requests", worker_id);
    loop {
        let request = match transport.next_request() {
            Ok(r) => r,
            Err(e) => fatal(worker_id, "dequeue", &e),
        };
        if let Some(response) = dispatch(table, &request) {
            if let Err(e) = transport.reply(response) {
                fatal(worker_id, "reply", &e);
            }
        }
    }
}

// A broken transport primitive means critical sections can no longer be
// trusted to complete; take the whole process down.
fn fatal(worker_id: usize, stage: &str, err: &StoreError) -> ! {
    error!("worker#{}: {} failed: {}", worker_id, stage, err);
    process::exit(1);
}

/// Apply one request to the table and build the response, if the request
/// calls for one. Reads always answer; inserts and removes answer only when
/// the sender asked for a reply. A miss is an ordinary outcome, never an
/// error: reads report `ReadFailed`, removes of absent keys are still
/// acknowledged.
pub fn dispatch(table: &KvTable, request: &Request) -> Option<Response> {
    match request.op {
        Op::Read => Some(match table.get(&request.key) {
            Some(value) => Response {
                client_id: request.client_id,
                status: Status::ReadSucceeded,
                value,
            },
            None => Response {
                client_id: request.client_id,
                status: Status::ReadFailed,
                value: FixedStr::default(),
            },
        }),
        Op::Insert => {
            table.insert(request.key, request.value);
            acknowledge(request)
        }
        Op::Remove => {
            table.remove(&request.key);
            acknowledge(request)
        }
    }
}

fn acknowledge(request: &Request) -> Option<Response> {
    request.wants_reply.then(|| Response {
        client_id: request.client_id,
        status: Status::Acknowledged,
        value: FixedStr::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(op: Op, key: &str, value: &str, wants_reply: bool) -> Request {
        Request {
            client_id: 7,
            op,
            wants_reply,
            key: FixedStr::from(key),
            value: FixedStr::from(value),
        }
    }

    #[test]
    fn read_hit_returns_value() {
        let table = KvTable::new(8, 8);
        table.insert(FixedStr::from("k"), FixedStr::from("v"));
        let resp = dispatch(&table, &request(Op::Read, "k", "", false)).unwrap();
        assert_eq!(resp.status, Status::ReadSucceeded);
        assert_eq!(resp.value, FixedStr::from("v"));
        assert_eq!(resp.client_id, 7);
    }

    #[test]
    fn read_miss_always_answers() {
        let table = KvTable::new(8, 8);
        // wants_reply is irrelevant for reads.
        let resp = dispatch(&table, &request(Op::Read, "missing", "", false)).unwrap();
        assert_eq!(resp.status, Status::ReadFailed);
    }

    #[test]
    fn fire_and_forget_insert_is_silent() {
        let table = KvTable::new(8, 8);
        assert!(dispatch(&table, &request(Op::Insert, "k", "v", false)).is_none());
        assert_eq!(table.get(&FixedStr::from("k")), Some(FixedStr::from("v")));
    }

    #[test]
    fn remove_of_absent_key_is_acknowledged() {
        let table = KvTable::new(8, 8);
        let resp = dispatch(&table, &request(Op::Remove, "missing", "", true)).unwrap();
        assert_eq!(resp.status, Status::Acknowledged);
    }
}
