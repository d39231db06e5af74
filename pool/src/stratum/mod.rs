pub mod connection;
pub mod protocol;
pub mod server;

pub use connection::{ConnectionState, ExtraNonceProvider, WorkerContext};
pub use protocol::{StratumRequest, StratumResponse, WireError};
pub use server::StratumServer;
