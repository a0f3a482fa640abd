// WebSocket connection actor.
//
// Owns the socket and the ClientSync replica, bridging them to the
// application through a command channel (edits in) and an event channel
// (document changes out). On transport loss it reconnects with bounded
// backoff; the re-join adopts the server's fresh snapshot and drops any
// unacknowledged local edits.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use scrawl_core::protocol::{decode_server_frame, encode_frame, ClientFrame, ServerFrame};
use scrawl_core::types::{ClientId, DocId, ServerOperation};
use serde_json::{Map, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::sync::ClientSync;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_DELAYS: [Duration; 5] = [
    Duration::from_millis(500),
    Duration::from_millis(1_000),
    Duration::from_millis(2_000),
    Duration::from_millis(4_000),
    Duration::from_millis(8_000),
];

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub url: String,
    pub doc_id: DocId,
    pub client_name: String,
    pub client_id: Option<ClientId>,
}

/// Edits the application feeds into the replica.
#[derive(Debug, Clone)]
pub enum EditCommand {
    Insert { pos: u32, text: String },
    Delete { pos: u32, len: u32 },
}

/// What the replica reports back to the application.
#[derive(Debug, Clone)]
pub enum DocEvent {
    Joined { client_id: ClientId, seq: u64, text: String },
    Changed { text: String },
    PeerJoined { client_id: ClientId, name: String, color: String },
    PeerLeft { client_id: ClientId },
    PeerCursor { client_id: ClientId, payload: Map<String, Value> },
    ConnectionLost,
    ServerError { message: String },
}

enum SessionEnd {
    Finished,
    TransportLost,
}

/// Spawn the connection actor; returns the command sender and event
/// receiver the application talks through.
pub fn spawn(options: ConnectOptions) -> (mpsc::Sender<EditCommand>, mpsc::Receiver<DocEvent>) {
    let (command_tx, command_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(64);
    tokio::spawn(async move {
        if let Err(error) = run(options, command_rx, event_tx).await {
            warn!(%error, "connection actor exited");
        }
    });
    (command_tx, event_rx)
}

/// Drive the connection until the command channel closes.
pub async fn run(
    options: ConnectOptions,
    mut commands: mpsc::Receiver<EditCommand>,
    events: mpsc::Sender<DocEvent>,
) -> Result<()> {
    let mut stable_id = options.client_id.clone();
    let mut backoff = 0usize;

    loop {
        match session(&options, &mut stable_id, &mut backoff, &mut commands, &events).await {
            Ok(SessionEnd::Finished) => return Ok(()),
            Ok(SessionEnd::TransportLost) => {
                debug!("transport lost, scheduling reconnect");
            }
            Err(error) => {
                warn!(%error, "connection attempt failed");
            }
        }
        if events.send(DocEvent::ConnectionLost).await.is_err() {
            return Ok(());
        }

        let delay = RECONNECT_DELAYS[backoff.min(RECONNECT_DELAYS.len() - 1)];
        backoff += 1;
        sleep(delay).await;
    }
}

async fn session(
    options: &ConnectOptions,
    stable_id: &mut Option<ClientId>,
    backoff: &mut usize,
    commands: &mut mpsc::Receiver<EditCommand>,
    events: &mpsc::Sender<DocEvent>,
) -> Result<SessionEnd> {
    let (mut socket, _) = connect_async(&options.url)
        .await
        .with_context(|| format!("failed to connect to {}", options.url))?;

    send_frame(
        &mut socket,
        &ClientFrame::Join {
            doc_id: options.doc_id.clone(),
            client_name: options.client_name.clone(),
            client_id: stable_id.clone(),
        },
    )
    .await?;

    let mut sync = timeout(JOIN_TIMEOUT, await_joined(&mut socket, options, events))
        .await
        .context("timed out waiting for joined frame")??;
    *stable_id = Some(sync.client_id().clone());
    *backoff = 0;

    enum Incoming {
        Command(Option<EditCommand>),
        Socket(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
    }

    loop {
        // The select only picks a side; handling below runs with the
        // branch futures' borrows released.
        let incoming = tokio::select! {
            maybe_command = commands.recv() => Incoming::Command(maybe_command),
            maybe_message = socket.next() => Incoming::Socket(maybe_message),
        };

        match incoming {
            Incoming::Command(maybe_command) => {
                let Some(command) = maybe_command else {
                    let _ = socket.close(None).await;
                    return Ok(SessionEnd::Finished);
                };

                let sent = match command {
                    EditCommand::Insert { pos, text } => sync.insert(pos, &text),
                    EditCommand::Delete { pos, len } => sync.delete(pos, len),
                };
                match sent {
                    Ok(outbound) => {
                        // None means the edit queued behind the
                        // outstanding op; it rides out on the next ack.
                        if let Some(outbound) = outbound {
                            let frame = ClientFrame::Op {
                                doc_id: options.doc_id.clone(),
                                base_seq: outbound.base_seq,
                                operation: outbound.operation,
                            };
                            if send_frame(&mut socket, &frame).await.is_err() {
                                return Ok(SessionEnd::TransportLost);
                            }
                        }
                        let changed = DocEvent::Changed { text: sync.text().to_owned() };
                        if events.send(changed).await.is_err() {
                            return Ok(SessionEnd::Finished);
                        }
                    }
                    Err(error) => {
                        let report = DocEvent::ServerError { message: error.to_string() };
                        if events.send(report).await.is_err() {
                            return Ok(SessionEnd::Finished);
                        }
                    }
                }
            }

            Incoming::Socket(maybe_message) => {
                let Some(Ok(message)) = maybe_message else {
                    return Ok(SessionEnd::TransportLost);
                };

                match message {
                    Message::Text(raw) => {
                        let Ok(frame) = decode_server_frame(raw.as_str()) else {
                            warn!("undecodable server frame");
                            continue;
                        };
                        if handle_frame(frame, &mut sync, options, &mut socket, events).await?
                            == ControlFlow::Stop
                        {
                            return Ok(SessionEnd::Finished);
                        }
                    }
                    Message::Ping(payload) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            return Ok(SessionEnd::TransportLost);
                        }
                    }
                    Message::Close(_) => return Ok(SessionEnd::TransportLost),
                    _ => {}
                }
            }
        }
    }
}

#[derive(PartialEq)]
enum ControlFlow {
    Continue,
    Stop,
}

async fn handle_frame(
    frame: ServerFrame,
    sync: &mut ClientSync,
    options: &ConnectOptions,
    socket: &mut Socket,
    events: &mpsc::Sender<DocEvent>,
) -> Result<ControlFlow> {
    let event = match frame {
        ServerFrame::Op { operation, server_seq } => {
            match sync.handle_server_op(&ServerOperation { operation, server_seq }) {
                Some(_) => Some(DocEvent::Changed { text: sync.text().to_owned() }),
                None => None,
            }
        }
        ServerFrame::Ack { client_seq, server_seq } => {
            if let Some(next) = sync.handle_ack(client_seq, server_seq) {
                let frame = ClientFrame::Op {
                    doc_id: options.doc_id.clone(),
                    base_seq: next.base_seq,
                    operation: next.operation,
                };
                send_frame(socket, &frame).await?;
            }
            None
        }
        ServerFrame::Join { client_id, client_name, color } => {
            Some(DocEvent::PeerJoined { client_id, name: client_name, color })
        }
        ServerFrame::Disconnect { client_id } => Some(DocEvent::PeerLeft { client_id }),
        ServerFrame::Cursor { client_id, payload } => {
            Some(DocEvent::PeerCursor { client_id, payload })
        }
        ServerFrame::Error { message } => Some(DocEvent::ServerError { message }),
        // A joined frame mid-session would mean a crossed re-join; the
        // active replica state stays authoritative.
        ServerFrame::Joined { .. } => None,
    };

    if let Some(event) = event {
        if events.send(event).await.is_err() {
            return Ok(ControlFlow::Stop);
        }
    }
    Ok(ControlFlow::Continue)
}

async fn await_joined(
    socket: &mut Socket,
    options: &ConnectOptions,
    events: &mpsc::Sender<DocEvent>,
) -> Result<ClientSync> {
    loop {
        let message = socket
            .next()
            .await
            .ok_or_else(|| anyhow!("socket closed before joined frame"))?
            .context("socket error before joined frame")?;

        let Message::Text(raw) = message else {
            continue;
        };
        match decode_server_frame(raw.as_str()) {
            Ok(ServerFrame::Joined { client_id, seq, doc, .. }) => {
                let _ = events
                    .send(DocEvent::Joined {
                        client_id: client_id.clone(),
                        seq,
                        text: doc.clone(),
                    })
                    .await;
                return Ok(ClientSync::new(options.doc_id.clone(), client_id, seq, doc));
            }
            Ok(ServerFrame::Error { message }) => {
                return Err(anyhow!("server rejected join: {message}"));
            }
            Ok(_) | Err(_) => continue,
        }
    }
}

async fn send_frame(socket: &mut Socket, frame: &ClientFrame) -> Result<()> {
    let encoded = encode_frame(frame).context("failed to encode frame")?;
    socket.send(Message::Text(encoded.into())).await.context("failed to send frame")
}
