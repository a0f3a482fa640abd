// ClientSync: the per-client protocol state machine.
//
// Local edits apply to the local buffer immediately and queue in the
// outbox. Send discipline is strict: one operation is outstanding at a
// time, and queued ops go out (in rewritten form) when the previous ack
// arrives, so every transmitted op is expressed against the client's
// current base sequence.
//
// An inbound server op is concurrent with exactly the outbox: it is
// folded through the queue (rewriting each entry) and the folded result
// is applied to the local buffer. The fold and the server's own rebase
// use the identical transform, which is what keeps replicas convergent.

use std::collections::VecDeque;

use scrawl_core::ot;
use scrawl_core::types::{char_len, ClientId, DocId, Operation, ServerOperation};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("edit at {pos} is out of bounds for a buffer of length {len}")]
    OutOfBounds { pos: u32, len: u32 },
}

/// An operation ready for the wire, tagged with the base sequence the
/// server should rebase it against.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundOp {
    pub base_seq: u64,
    pub operation: Operation,
}

#[derive(Debug)]
pub struct ClientSync {
    doc_id: DocId,
    client_id: ClientId,
    base_server_seq: u64,
    next_client_seq: u64,
    outbox: VecDeque<Operation>,
    awaiting_ack: bool,
    local_text: String,
}

impl ClientSync {
    /// Build a replica from a `joined` snapshot.
    pub fn new(doc_id: DocId, client_id: ClientId, base_server_seq: u64, snapshot: String) -> Self {
        Self {
            doc_id,
            client_id,
            base_server_seq,
            next_client_seq: 0,
            outbox: VecDeque::new(),
            awaiting_ack: false,
            local_text: snapshot,
        }
    }

    pub fn doc_id(&self) -> &DocId {
        &self.doc_id
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn text(&self) -> &str {
        &self.local_text
    }

    pub fn base_server_seq(&self) -> u64 {
        self.base_server_seq
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Author a local insert. Returns the frame to send now, or `None`
    /// when an earlier op is still awaiting its ack.
    pub fn insert(&mut self, pos: u32, text: &str) -> Result<Option<OutboundOp>, SyncError> {
        let len = char_len(&self.local_text);
        if pos > len {
            return Err(SyncError::OutOfBounds { pos, len });
        }
        let seq = self.next_client_seq;
        self.next_client_seq += 1;
        Ok(self.push_local(Operation::insert(pos, text, self.client_id.clone(), seq)))
    }

    /// Author a local delete.
    pub fn delete(&mut self, pos: u32, del_len: u32) -> Result<Option<OutboundOp>, SyncError> {
        let len = char_len(&self.local_text);
        if pos.saturating_add(del_len) > len {
            return Err(SyncError::OutOfBounds { pos, len });
        }
        let seq = self.next_client_seq;
        self.next_client_seq += 1;
        Ok(self.push_local(Operation::delete(pos, del_len, self.client_id.clone(), seq)))
    }

    fn push_local(&mut self, op: Operation) -> Option<OutboundOp> {
        ot::apply_to_string(&op, &mut self.local_text);
        self.outbox.push_back(op);
        if self.awaiting_ack {
            None
        } else {
            self.awaiting_ack = true;
            self.outbox.back().map(|op| OutboundOp {
                base_seq: self.base_server_seq,
                operation: op.clone(),
            })
        }
    }

    /// Integrate an inbound server op. Returns the rebased op that was
    /// applied locally, or `None` when the frame was our own echo or a
    /// stale replay.
    pub fn handle_server_op(&mut self, stamped: &ServerOperation) -> Option<Operation> {
        if stamped.operation.client_id() == &self.client_id {
            // Own op echoed back; already applied optimistically.
            self.base_server_seq = self.base_server_seq.max(stamped.server_seq);
            return None;
        }
        if stamped.server_seq <= self.base_server_seq {
            // Already covered by the join snapshot or a previous frame.
            return None;
        }

        let mut incoming = stamped.operation.clone();
        for local in self.outbox.iter_mut() {
            let rewritten = ot::transform(local, &incoming);
            incoming = ot::transform(&incoming, local);
            *local = rewritten;
        }

        ot::apply_to_string(&incoming, &mut self.local_text);
        self.base_server_seq = stamped.server_seq;
        Some(incoming)
    }

    /// Handle an ack: prune the outbox up to `client_seq`, advance the
    /// base, and hand back the next queued op to transmit (strict send).
    pub fn handle_ack(&mut self, client_seq: u64, server_seq: u64) -> Option<OutboundOp> {
        while let Some(front) = self.outbox.front() {
            if front.client_seq() <= client_seq {
                self.outbox.pop_front();
            } else {
                break;
            }
        }
        self.base_server_seq = self.base_server_seq.max(server_seq);

        match self.outbox.front() {
            Some(next) => Some(OutboundOp {
                base_seq: self.base_server_seq,
                operation: next.clone(),
            }),
            None => {
                self.awaiting_ack = false;
                None
            }
        }
    }

    /// Adopt a fresh snapshot after a reconnect. Unacknowledged local
    /// edits are discarded.
    pub fn adopt_snapshot(&mut self, base_server_seq: u64, snapshot: String) {
        self.base_server_seq = base_server_seq;
        self.local_text = snapshot;
        self.outbox.clear();
        self.awaiting_ack = false;
    }
}
