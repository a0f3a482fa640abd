// WebSocket endpoint: one connection, one document, one socket loop.
//
// The loop multiplexes three sources: the heartbeat timer, the client's
// outbound queue (filled by the session under its lock), and inbound
// socket frames. Session frames are delivered FIFO per client; a closed
// outbound queue means the session dropped us (slow consumer) and the
// socket is torn down.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use scrawl_core::protocol::{decode_client_frame, encode_frame, ClientFrame, ServerFrame};
use scrawl_core::types::{ClientId, DocId};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::registry::SessionRegistry;
use crate::session::{DocumentSession, OUTBOUND_QUEUE_CAPACITY};

pub(crate) const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
pub(crate) const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
pub(crate) const WRITE_DEADLINE: Duration = Duration::from_secs(10);
pub(crate) const MAX_FRAME_BYTES: usize = 262_144;

pub fn router(registry: Arc<SessionRegistry>) -> Router {
    Router::new().route("/ws", get(ws_upgrade)).with_state(registry)
}

async fn ws_upgrade(
    State(registry): State<Arc<SessionRegistry>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_frame_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(registry, socket))
}

struct JoinedDoc {
    doc_id: DocId,
    client_id: ClientId,
    session: Arc<DocumentSession>,
}

enum LoopEvent {
    Heartbeat,
    Outbound(Option<ServerFrame>),
    Inbound(Option<Result<Message, axum::Error>>),
}

async fn handle_socket(registry: Arc<SessionRegistry>, mut socket: WebSocket) {
    let mut joined: Option<JoinedDoc> = None;
    let mut outbound_rx: Option<mpsc::Receiver<ServerFrame>> = None;

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.reset(); // skip the immediate first tick
    let mut last_activity = Instant::now();

    loop {
        // The select only picks an event; all handling happens below so
        // the branch futures' borrows are released first.
        let event = {
            let outbound = async {
                match outbound_rx.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = heartbeat.tick() => LoopEvent::Heartbeat,
                frame = outbound => LoopEvent::Outbound(frame),
                message = socket.recv() => LoopEvent::Inbound(message),
            }
        };

        match event {
            LoopEvent::Heartbeat => {
                if last_activity.elapsed() > IDLE_TIMEOUT {
                    warn!("idle timeout, closing connection");
                    break;
                }
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }

            LoopEvent::Outbound(Some(frame)) => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
            // The session dropped our handle (slow consumer).
            LoopEvent::Outbound(None) => break,

            LoopEvent::Inbound(maybe_message) => {
                let Some(Ok(message)) = maybe_message else {
                    break;
                };
                last_activity = Instant::now();

                match message {
                    Message::Text(raw) => {
                        let frame = match decode_client_frame(raw.as_str()) {
                            Ok(frame) => frame,
                            Err(error) => {
                                debug!(%error, "malformed frame");
                                let reply = ServerFrame::Error {
                                    message: format!("malformed frame: {error}"),
                                };
                                if send_frame(&mut socket, &reply).await.is_err() {
                                    break;
                                }
                                continue;
                            }
                        };
                        if let Err(error) =
                            dispatch_frame(&registry, frame, &mut joined, &mut outbound_rx).await
                        {
                            warn!(%error, "rejected frame");
                            if send_frame(&mut socket, &error.to_frame()).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Ping(payload) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Message::Pong(_) => {}
                    Message::Close(_) => break,
                    Message::Binary(_) => {}
                }
            }
        }
    }

    if let Some(doc) = joined.take() {
        registry.disconnect(&doc.doc_id, &doc.client_id).await;
    }
}

async fn dispatch_frame(
    registry: &Arc<SessionRegistry>,
    frame: ClientFrame,
    joined: &mut Option<JoinedDoc>,
    outbound_rx: &mut Option<mpsc::Receiver<ServerFrame>>,
) -> Result<(), SessionError> {
    match frame {
        ClientFrame::Join { doc_id, client_name, client_id } => {
            if let Some(previous) = joined.take() {
                *outbound_rx = None;
                registry.disconnect(&previous.doc_id, &previous.client_id).await;
            }

            let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
            let (session, assigned) = registry.join(&doc_id, client_id, &client_name, tx).await;
            *joined = Some(JoinedDoc { doc_id, client_id: assigned, session });
            *outbound_rx = Some(rx);
            Ok(())
        }

        ClientFrame::Op { doc_id, base_seq, operation } => match joined {
            Some(doc) if doc.doc_id == doc_id => {
                doc.session.apply(&doc.client_id, base_seq, operation).await
            }
            _ => Err(SessionError::UnknownDocument(doc_id)),
        },

        ClientFrame::Cursor { doc_id, payload, .. } => match joined {
            Some(doc) if doc.doc_id == doc_id => doc.session.cursor(&doc.client_id, payload).await,
            _ => Err(SessionError::UnknownDocument(doc_id)),
        },
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> Result<(), ()> {
    let encoded = encode_frame(frame).map_err(|_| ())?;
    match tokio::time::timeout(WRITE_DEADLINE, socket.send(Message::Text(encoded.into()))).await {
        Ok(Ok(())) => Ok(()),
        _ => Err(()),
    }
}
