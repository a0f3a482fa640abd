// WebSocket message types for the scrawl sync protocol.
//
// Every frame is a UTF-8 JSON object with a `type` tag. Cursor payloads
// are opaque: whatever extra fields the sender attached ride along
// untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{ClientId, ClientInfo, DocId, Operation};

/// Frames a client sends to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    /// Join a document, optionally reclaiming a stable client id.
    Join {
        doc_id: DocId,
        client_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientId>,
    },

    /// Submit a local operation. `base_seq` is the highest server
    /// sequence the client had observed when the op was sent.
    Op {
        doc_id: DocId,
        #[serde(default)]
        base_seq: u64,
        operation: Operation,
    },

    /// Opaque cursor/presence payload, fanned out verbatim.
    Cursor {
        doc_id: DocId,
        client_id: ClientId,
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
}

/// Frames the server sends to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    /// Join response: the atomic (seq, snapshot, roster) triple.
    Joined { client_id: ClientId, seq: u64, doc: String, clients: Vec<ClientInfo> },

    /// Another client joined (sent to everyone else).
    Join { client_id: ClientId, client_name: String, color: String },

    /// A stamped operation in log order.
    Op { operation: Operation, server_seq: u64 },

    /// Acknowledgement of the receiver's own operation.
    Ack { client_seq: u64, server_seq: u64 },

    /// Cursor pass-through from another client.
    Cursor {
        client_id: ClientId,
        #[serde(flatten)]
        payload: Map<String, Value>,
    },

    /// A client left the document.
    Disconnect { client_id: ClientId },

    Error { message: String },
}

pub fn decode_client_frame(raw: &str) -> Result<ClientFrame, serde_json::Error> {
    serde_json::from_str(raw)
}

pub fn decode_server_frame(raw: &str) -> Result<ServerFrame, serde_json::Error> {
    serde_json::from_str(raw)
}

pub fn encode_frame<T: Serialize>(frame: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}
