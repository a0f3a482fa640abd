pub mod ws;

pub use ws::{decode_client_frame, decode_server_frame, encode_frame, ClientFrame, ServerFrame};
