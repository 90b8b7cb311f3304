pub mod client;
pub mod core;
pub mod errors;
pub mod ring;
pub mod server;
pub mod table;
pub mod transport;


pub use crate::client::KvClient;
pub use crate::core::{FixedStr, Op, Request, Response, ShmemConfig, Status, FIXED_STR_LEN};
pub use crate::errors::StoreError;
pub use crate::server::KvServer;
pub use crate::table::KvTable;
pub use crate::transport::Transport;
