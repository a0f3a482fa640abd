// Rope: balanced binary tree of text chunks with O(log n) edits.
//
// The tree is the standard split/concat rope: every branch stores the
// total code-point length of its subtree, leaves hold bounded chunks.
// Joins keep subtree heights within one of each other via rotations.

use std::fmt;

use thiserror::Error;

/// Upper bound on the code-point length of a leaf chunk.
const MAX_LEAF_CHARS: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RopeError {
    #[error("position {pos} out of bounds for rope of length {len}")]
    OutOfBounds { pos: u32, len: u32 },
}

#[derive(Debug, Clone)]
enum Node {
    Leaf { text: String, len: u32 },
    Branch { left: Box<Node>, right: Box<Node>, len: u32, height: u8 },
}

impl Node {
    fn empty() -> Self {
        Node::Leaf { text: String::new(), len: 0 }
    }

    fn leaf(text: String) -> Self {
        let len = text.chars().count() as u32;
        Node::Leaf { text, len }
    }

    fn len(&self) -> u32 {
        match self {
            Node::Leaf { len, .. } | Node::Branch { len, .. } => *len,
        }
    }

    fn height(&self) -> u8 {
        match self {
            Node::Leaf { .. } => 1,
            Node::Branch { height, .. } => *height,
        }
    }

    fn into_children(self) -> (Node, Node) {
        match self {
            Node::Branch { left, right, .. } => (*left, *right),
            Node::Leaf { .. } => unreachable!("into_children on a leaf"),
        }
    }
}

fn branch(left: Node, right: Node) -> Node {
    let len = left.len() + right.len();
    let height = left.height().max(right.height()) + 1;
    Node::Branch { left: Box::new(left), right: Box::new(right), len, height }
}

/// Concatenate two subtrees, keeping the result balanced.
///
/// When one side is more than one level taller, the shorter side is pushed
/// down the taller side's inner spine and the seam is fixed by rotation.
fn join(left: Node, right: Node) -> Node {
    if left.len() == 0 {
        return right;
    }
    if right.len() == 0 {
        return left;
    }

    if left.height() > right.height() + 1 {
        let (ll, lr) = left.into_children();
        return rebalanced(ll, join(lr, right));
    }
    if right.height() > left.height() + 1 {
        let (rl, rr) = right.into_children();
        return rebalanced(join(left, rl), rr);
    }

    // Adjacent small leaves are merged so deletes don't fragment the tree.
    if let (Node::Leaf { text: lt, len: llen }, Node::Leaf { text: rt, len: rlen }) =
        (&left, &right)
    {
        if (*llen + *rlen) as usize <= MAX_LEAF_CHARS {
            let mut merged = lt.clone();
            merged.push_str(rt);
            return Node::leaf(merged);
        }
    }

    branch(left, right)
}

/// Combine two subtrees whose heights differ by at most two, rotating the
/// seam back into AVL shape when they differ by exactly two.
fn rebalanced(left: Node, right: Node) -> Node {
    let diff = i16::from(left.height()) - i16::from(right.height());
    if diff > 1 {
        let (ll, lr) = left.into_children();
        if lr.height() > ll.height() {
            let (lrl, lrr) = lr.into_children();
            branch(branch(ll, lrl), branch(lrr, right))
        } else {
            branch(ll, branch(lr, right))
        }
    } else if diff < -1 {
        let (rl, rr) = right.into_children();
        if rl.height() > rr.height() {
            let (rll, rlr) = rl.into_children();
            branch(branch(left, rll), branch(rlr, rr))
        } else {
            branch(branch(left, rl), rr)
        }
    } else {
        branch(left, right)
    }
}

/// Split `node` at code-point offset `pos` (0 ≤ pos ≤ node.len()).
fn split(node: Node, pos: u32) -> (Node, Node) {
    match node {
        Node::Leaf { text, len } => {
            if pos == 0 {
                (Node::empty(), Node::Leaf { text, len })
            } else if pos == len {
                (Node::Leaf { text, len }, Node::empty())
            } else {
                let byte = byte_of_char(&text, pos);
                let right = text[byte..].to_owned();
                let left = {
                    let mut t = text;
                    t.truncate(byte);
                    t
                };
                (Node::leaf(left), Node::leaf(right))
            }
        }
        Node::Branch { left, right, .. } => {
            let left_len = left.len();
            if pos < left_len {
                let (a, b) = split(*left, pos);
                (a, join(b, *right))
            } else {
                let (a, b) = split(*right, pos - left_len);
                (join(*left, a), b)
            }
        }
    }
}

fn byte_of_char(text: &str, char_pos: u32) -> usize {
    text.char_indices().nth(char_pos as usize).map(|(i, _)| i).unwrap_or(text.len())
}

/// Build a balanced tree over bounded chunks of `text`.
fn build(text: &str) -> Node {
    let chunks = chunk_leaves(text);
    if chunks.is_empty() {
        return Node::empty();
    }
    build_balanced(chunks)
}

fn build_balanced(mut chunks: Vec<Node>) -> Node {
    while chunks.len() > 1 {
        let mut next = Vec::with_capacity(chunks.len().div_ceil(2));
        let mut iter = chunks.into_iter();
        while let Some(left) = iter.next() {
            match iter.next() {
                Some(right) => next.push(branch(left, right)),
                None => next.push(left),
            }
        }
        chunks = next;
    }
    chunks.pop().unwrap_or_else(Node::empty)
}

fn chunk_leaves(text: &str) -> Vec<Node> {
    let mut leaves = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let split_at = rest
            .char_indices()
            .nth(MAX_LEAF_CHARS)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        leaves.push(Node::leaf(rest[..split_at].to_owned()));
        rest = &rest[split_at..];
    }
    leaves
}

/// Ordered character sequence with O(log n) insert and delete.
#[derive(Debug, Clone)]
pub struct Rope {
    root: Node,
}

impl Rope {
    pub fn new(text: &str) -> Self {
        Self { root: build(text) }
    }

    /// Total character count.
    pub fn len(&self) -> u32 {
        self.root.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn char_at(&self, index: u32) -> Result<char, RopeError> {
        if index >= self.len() {
            return Err(RopeError::OutOfBounds { pos: index, len: self.len() });
        }

        let mut node = &self.root;
        let mut offset = index;
        loop {
            match node {
                Node::Leaf { text, .. } => {
                    // In bounds by the check above.
                    return Ok(text.chars().nth(offset as usize).unwrap_or('\0'));
                }
                Node::Branch { left, right, .. } => {
                    if offset < left.len() {
                        node = left;
                    } else {
                        offset -= left.len();
                        node = right;
                    }
                }
            }
        }
    }

    /// Characters in `[start, end)`.
    pub fn substring(&self, start: u32, end: u32) -> Result<String, RopeError> {
        if start > end {
            return Err(RopeError::OutOfBounds { pos: start, len: self.len() });
        }
        if end > self.len() {
            return Err(RopeError::OutOfBounds { pos: end, len: self.len() });
        }

        let mut out = String::new();
        push_range(&self.root, start, end, &mut out);
        Ok(out)
    }

    pub fn insert(&mut self, pos: u32, text: &str) -> Result<(), RopeError> {
        if pos > self.len() {
            return Err(RopeError::OutOfBounds { pos, len: self.len() });
        }
        if text.is_empty() {
            return Ok(());
        }

        let root = std::mem::replace(&mut self.root, Node::empty());
        let (left, right) = split(root, pos);
        self.root = join(join(left, build(text)), right);
        Ok(())
    }

    pub fn delete(&mut self, pos: u32, len: u32) -> Result<(), RopeError> {
        let end = pos.checked_add(len).ok_or(RopeError::OutOfBounds { pos, len: self.len() })?;
        if end > self.len() {
            return Err(RopeError::OutOfBounds { pos: end, len: self.len() });
        }
        if len == 0 {
            return Ok(());
        }

        let root = std::mem::replace(&mut self.root, Node::empty());
        let (left, rest) = split(root, pos);
        let (_removed, right) = split(rest, len);
        self.root = join(left, right);
        Ok(())
    }
}

fn push_range(node: &Node, start: u32, end: u32, out: &mut String) {
    if start >= end {
        return;
    }
    match node {
        Node::Leaf { text, len } => {
            let from = byte_of_char(text, start);
            let to = if end >= *len { text.len() } else { byte_of_char(text, end) };
            out.push_str(&text[from..to]);
        }
        Node::Branch { left, right, .. } => {
            let left_len = left.len();
            if start < left_len {
                push_range(left, start, end.min(left_len), out);
            }
            if end > left_len {
                push_range(right, start.saturating_sub(left_len), end - left_len, out);
            }
        }
    }
}

impl fmt::Display for Rope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_node(node: &Node, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match node {
                Node::Leaf { text, .. } => f.write_str(text),
                Node::Branch { left, right, .. } => {
                    write_node(left, f)?;
                    write_node(right, f)
                }
            }
        }
        write_node(&self.root, f)
    }
}

impl From<&str> for Rope {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl Default for Rope {
    fn default() -> Self {
        Self::new("")
    }
}
