use log::info;

use crate::core::{FixedStr, Op, Request, ShmemConfig, Status};
use crate::errors::StoreError;
use crate::transport::Transport;

/// Client-side handle on a running server: maps the transport segment and
/// holds the client id used to match responses. Dropping the client unmaps
/// the segment; it never unlinks it (that is the server's job).
pub struct KvClient {
    transport: Transport,
    client_id: u32,
}

impl KvClient {
    /// Open the segment (the server must have created it already) and
    /// register for a fresh client id.
    pub fn connect(cfg: &ShmemConfig) -> Result<KvClient, StoreError> {
        let transport = Transport::open(cfg)?;
        let client_id = transport.register_client();
        info!("registered as client #{}", client_id);
        Ok(KvClient {
            transport,
            client_id,
        })
    }

    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    /// Store `value` under `key`. With `fire_and_forget` the request is
    /// enqueued without waiting for the acknowledgment.
    pub fn insert(&self, key: &str, value: &str, fire_and_forget: bool) -> Result<(), StoreError> {
        let request = Request {
            client_id: self.client_id,
            op: Op::Insert,
            wants_reply: !fire_and_forget,
            key: FixedStr::from(key),
            value: FixedStr::from(value),
        };
        if fire_and_forget {
            self.transport.send(request)
        } else {
            self.transport.send_and_wait(request).map(|_| ())
        }
    }

    /// Remove `key`. Removing an absent key is not an error; the server
    /// still acknowledges when asked to.
    pub fn remove(&self, key: &str, fire_and_forget: bool) -> Result<(), StoreError> {
        let request = Request {
            client_id: self.client_id,
            op: Op::Remove,
            wants_reply: !fire_and_forget,
            key: FixedStr::from(key),
            value: FixedStr::default(),
        };
        if fire_and_forget {
            self.transport.send(request)
        } else {
            self.transport.send_and_wait(request).map(|_| ())
        }
    }

    /// Look up `key`. Always synchronous; `None` means the key is absent.
    pub fn read(&self, key: &str) -> Result<Option<FixedStr>, StoreError> {
        let request = Request {
            client_id: self.client_id,
            op: Op::Read,
            wants_reply: true,
            key: FixedStr::from(key),
            value: FixedStr::default(),
        };
        let response = self.transport.send_and_wait(request)?;
        Ok(match response.status {
            Status::ReadSucceeded => Some(response.value),
            _ => None,
        })
    }
}
