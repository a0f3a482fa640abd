// Per-document authoritative state.
//
// A session owns the rope, the append-only operation log, the monotonic
// server sequence, and the roster of connected clients. Every mutation
// runs under one lock: validate → rebase → rope edit → stamp → log →
// ack → broadcast is a single critical section, so clients observe
// operations in log order. Outbound delivery is a non-blocking enqueue
// onto bounded per-client channels; a full queue drops that client.

use std::collections::HashMap;

use scrawl_core::ot;
use scrawl_core::protocol::ServerFrame;
use scrawl_core::rope::Rope;
use scrawl_core::types::{color_for, ClientId, ClientInfo, DocId, Operation, ServerOperation};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::error::SessionError;

/// Bound on each client's outbound queue; overflow disconnects the client.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

pub struct DocumentSession {
    doc_id: DocId,
    state: Mutex<SessionState>,
}

struct SessionState {
    rope: Rope,
    server_seq: u64,
    ops: Vec<ServerOperation>,
    clients: HashMap<ClientId, ClientHandle>,
    joined_total: usize,
}

struct ClientHandle {
    name: String,
    color: String,
    outbound: mpsc::Sender<ServerFrame>,
    /// Highest acknowledged (client_seq, server_seq) pair for this client,
    /// used to re-ack replays after a reconnect.
    last_ack: Option<(u64, u64)>,
}

impl DocumentSession {
    pub fn new(doc_id: DocId) -> Self {
        Self::with_text(doc_id, "")
    }

    /// Bootstrap a session around existing text.
    pub fn with_text(doc_id: DocId, text: &str) -> Self {
        Self {
            doc_id,
            state: Mutex::new(SessionState {
                rope: Rope::new(text),
                server_seq: 0,
                ops: Vec::new(),
                clients: HashMap::new(),
                joined_total: 0,
            }),
        }
    }

    pub fn doc_id(&self) -> &DocId {
        &self.doc_id
    }

    /// Add a client to the roster and hand it the atomic
    /// (seq, snapshot, roster) triple through its outbound channel.
    ///
    /// A join with an id already in the roster replaces the stale handle
    /// (reconnect) and keeps its ack watermark.
    pub async fn join(
        &self,
        requested_id: Option<ClientId>,
        name: &str,
        outbound: mpsc::Sender<ServerFrame>,
    ) -> ClientId {
        let mut slow = Vec::new();
        let client_id = {
            let mut state = self.state.lock().await;
            let client_id = requested_id.unwrap_or_else(ClientId::mint);

            let previous = state.clients.remove(&client_id);
            let color = match &previous {
                Some(handle) => handle.color.clone(),
                None => {
                    let color = color_for(state.joined_total).to_owned();
                    state.joined_total += 1;
                    color
                }
            };
            let last_ack = previous.and_then(|handle| handle.last_ack);

            state.clients.insert(
                client_id.clone(),
                ClientHandle { name: name.to_owned(), color: color.clone(), outbound, last_ack },
            );

            let mut clients: Vec<ClientInfo> = state
                .clients
                .iter()
                .map(|(id, handle)| ClientInfo {
                    id: id.clone(),
                    name: handle.name.clone(),
                    color: handle.color.clone(),
                })
                .collect();
            clients.sort_by(|a, b| a.id.cmp(&b.id));

            let joined = ServerFrame::Joined {
                client_id: client_id.clone(),
                seq: state.server_seq,
                doc: state.rope.to_string(),
                clients,
            };
            enqueue(&state, &client_id, joined, &mut slow);

            let announce = ServerFrame::Join {
                client_id: client_id.clone(),
                client_name: name.to_owned(),
                color,
            };
            broadcast_except(&state, &client_id, announce, &mut slow);

            debug!(doc_id = %self.doc_id, client_id = %client_id, "client joined");
            client_id
        };

        self.drop_clients(slow).await;
        client_id
    }

    /// Apply one client operation: rebase past unseen log entries, clamp,
    /// mutate the rope, stamp, append, ack the author, fan out to others.
    pub async fn apply(
        &self,
        author: &ClientId,
        base_seq: u64,
        op: Operation,
    ) -> Result<(), SessionError> {
        let mut slow = Vec::new();
        let result = {
            let mut state = self.state.lock().await;

            if !state.clients.contains_key(author) {
                return Err(SessionError::NotJoined(author.clone()));
            }
            if op.client_id() != author {
                return Err(SessionError::AuthorMismatch);
            }
            if base_seq > state.server_seq {
                return Err(SessionError::BaseSeqAhead {
                    base_seq,
                    server_seq: state.server_seq,
                });
            }

            // Replay of an already-acknowledged op: re-ack, don't re-apply.
            let replayed = state.clients[author]
                .last_ack
                .filter(|(acked_client_seq, _)| op.client_seq() <= *acked_client_seq);
            if let Some((acked_client_seq, acked_server_seq)) = replayed {
                let ack = ServerFrame::Ack {
                    client_seq: acked_client_seq,
                    server_seq: acked_server_seq,
                };
                enqueue(&state, author, ack, &mut slow);
            } else {
                // Entry k of the log carries server_seq k+1, so the suffix
                // the author has not observed starts at index base_seq.
                let tail = state.ops[base_seq as usize..].iter().map(|entry| &entry.operation);
                let rebased = ot::rebase_past_log(&op, tail);
                let clamped = ot::clamp_to_len(&rebased, state.rope.len());

                match &clamped {
                    Operation::Insert { pos, text, .. } if !text.is_empty() => {
                        state.rope.insert(*pos, text)?;
                    }
                    Operation::Delete { pos, len, .. } if *len > 0 => {
                        state.rope.delete(*pos, *len)?;
                    }
                    _ => {} // Zero-width: no rope change, but still stamped.
                }

                state.server_seq += 1;
                let server_seq = state.server_seq;
                state.ops.push(ServerOperation { operation: clamped.clone(), server_seq });
                if let Some(handle) = state.clients.get_mut(author) {
                    handle.last_ack = Some((op.client_seq(), server_seq));
                }

                debug!(
                    doc_id = %self.doc_id,
                    client_id = %author,
                    client_seq = op.client_seq(),
                    server_seq,
                    "applied operation"
                );

                let ack = ServerFrame::Ack { client_seq: op.client_seq(), server_seq };
                enqueue(&state, author, ack, &mut slow);

                let fan_out = ServerFrame::Op { operation: clamped, server_seq };
                broadcast_except(&state, author, fan_out, &mut slow);
            }
            Ok(())
        };

        self.drop_clients(slow).await;
        result
    }

    /// Opaque cursor payload fan-out; the session neither validates nor
    /// transforms it.
    pub async fn cursor(
        &self,
        from: &ClientId,
        payload: Map<String, Value>,
    ) -> Result<(), SessionError> {
        let mut slow = Vec::new();
        {
            let state = self.state.lock().await;
            if !state.clients.contains_key(from) {
                return Err(SessionError::NotJoined(from.clone()));
            }
            let frame = ServerFrame::Cursor { client_id: from.clone(), payload };
            broadcast_except(&state, from, frame, &mut slow);
        }
        self.drop_clients(slow).await;
        Ok(())
    }

    /// Remove a client and tell the rest. Returns true when the roster is
    /// now empty and the session is eligible for reclamation.
    pub async fn disconnect(&self, client_id: &ClientId) -> bool {
        self.drop_clients(vec![client_id.clone()]).await
    }

    /// Remove clients from the roster, broadcasting a `disconnect` frame
    /// for each. Broadcast overflow feeds the worklist, so a cascade of
    /// slow consumers converges instead of recursing.
    async fn drop_clients(&self, mut worklist: Vec<ClientId>) -> bool {
        let mut state = self.state.lock().await;
        while let Some(client_id) = worklist.pop() {
            if state.clients.remove(&client_id).is_none() {
                continue;
            }
            debug!(doc_id = %self.doc_id, client_id = %client_id, "client removed from roster");
            let frame = ServerFrame::Disconnect { client_id };
            broadcast_all(&state, frame, &mut worklist);
        }
        state.clients.is_empty()
    }

    pub async fn client_count(&self) -> usize {
        self.state.lock().await.clients.len()
    }

    pub async fn text(&self) -> String {
        self.state.lock().await.rope.to_string()
    }

    pub async fn head_seq(&self) -> u64 {
        self.state.lock().await.server_seq
    }

    /// Stamped sequence numbers, in log order.
    pub async fn log_seqs(&self) -> Vec<u64> {
        self.state.lock().await.ops.iter().map(|entry| entry.server_seq).collect()
    }
}

fn enqueue(state: &SessionState, to: &ClientId, frame: ServerFrame, slow: &mut Vec<ClientId>) {
    if let Some(handle) = state.clients.get(to) {
        if handle.outbound.try_send(frame).is_err() {
            slow.push(to.clone());
        }
    }
}

fn broadcast_except(
    state: &SessionState,
    except: &ClientId,
    frame: ServerFrame,
    slow: &mut Vec<ClientId>,
) {
    for (client_id, handle) in &state.clients {
        if client_id == except {
            continue;
        }
        if handle.outbound.try_send(frame.clone()).is_err() {
            slow.push(client_id.clone());
        }
    }
}

fn broadcast_all(state: &SessionState, frame: ServerFrame, slow: &mut Vec<ClientId>) {
    for (client_id, handle) in &state.clients {
        if handle.outbound.try_send(frame.clone()).is_err() {
            slow.push(client_id.clone());
        }
    }
}
