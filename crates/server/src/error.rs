use scrawl_core::protocol::ServerFrame;
use scrawl_core::rope::RopeError;
use scrawl_core::types::{ClientId, DocId};
use thiserror::Error;

/// Errors a document session can hand back for a client request.
///
/// All of these surface as single `error` frames; the connection
/// survives unless the transport itself failed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("unknown document '{0}'")]
    UnknownDocument(DocId),

    #[error("client '{0}' has not joined this document")]
    NotJoined(ClientId),

    #[error("operation author does not match the connection's client id")]
    AuthorMismatch,

    #[error("base sequence {base_seq} is ahead of the server sequence {server_seq}")]
    BaseSeqAhead { base_seq: u64, server_seq: u64 },

    #[error("rope edit failed: {0}")]
    Rope(#[from] RopeError),
}

impl SessionError {
    pub fn to_frame(&self) -> ServerFrame {
        ServerFrame::Error { message: self.to_string() }
    }
}
