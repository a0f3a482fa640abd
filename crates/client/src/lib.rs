// scrawl-client: the replica side of the sync protocol.

pub mod connection;
pub mod sync;

pub use sync::{ClientSync, OutboundOp, SyncError};
