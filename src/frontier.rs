// SPDX-License-Identifier: Apache-2.0
//! The frontier (C3): the ordered, dispatchable view onto the dependency
//! graph, plus the per-construct bookkeeping ("wrapper") kept alongside it.
//!
//! The mutex and condition variable that guard this state live one level up,
//! in `scheduler.rs` — this module is pure bookkeeping over an
//! already-exclusively-borrowed `&mut Frontier`, which is what lets the
//! controller (`controller.rs`) re-enter frontier operations from inside a
//! `complete()` call without a second lock acquisition (§4.3, §9).

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::ident::NodeId;

/// The top-level construct a frontier wrapper was created for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WrapperKind {
    /// A genuinely dispatchable leaf: simple / background / pipeline.
    Simple,
    /// `&&`.
    And,
    /// `||`.
    Or,
    /// `if`.
    If,
    /// `while`.
    While,
    /// `until`.
    Until,
    /// `for`.
    For,
}

impl WrapperKind {
    /// Whether this kind still has expansions ahead of it. `Simple` wrappers
    /// never expand further, whether they started that way or were flipped
    /// to it once a compound construct finished its last expansion.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, WrapperKind::Simple)
    }
}

/// Per-construct state kept alongside a graph node while it is on the
/// frontier. A simple wrapper is removed the moment its graph node
/// completes; a compound wrapper persists until `active` reaches zero and
/// its kind has been flipped to `Simple` (terminal).
#[derive(Debug)]
pub struct FrontierWrapper {
    node_id: NodeId,
    kind: WrapperKind,
    /// Latest exit status reported by a relay-flagged child.
    pub status: i32,
    /// Outstanding child graph nodes spawned from this wrapper.
    pub active: u32,
    /// The loop iteration counter, advanced by the controller between turns.
    pub iteration: u64,
}

impl FrontierWrapper {
    /// The graph node this wrapper is attached to.
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The construct kind, possibly already flipped to `Simple` (terminal).
    #[must_use]
    pub fn kind(&self) -> WrapperKind {
        self.kind
    }

    pub(crate) fn set_kind(&mut self, kind: WrapperKind) {
        self.kind = kind;
    }
}

/// An entry taken off the dispatchable queue.
#[derive(Debug)]
pub enum RunnableItem {
    /// A real node, ready to hand to a worker.
    Node(NodeId),
    /// The end-of-input sentinel (invariant 6): sits on the frontier only
    /// when the frontier is otherwise empty.
    Eof,
}

/// The ordered, dispatchable view of the graph plus wrapper bookkeeping.
#[derive(Debug, Default)]
pub struct Frontier {
    wrappers: FxHashMap<NodeId, FrontierWrapper>,
    runnable: VecDeque<RunnableItem>,
    eof_requested: bool,
    eof_delivered: bool,
}

impl Frontier {
    /// Returns a wrapper by node id.
    #[must_use]
    pub fn wrapper(&self, id: NodeId) -> Option<&FrontierWrapper> {
        self.wrappers.get(&id)
    }

    /// Returns a mutable wrapper by node id.
    pub fn wrapper_mut(&mut self, id: NodeId) -> Option<&mut FrontierWrapper> {
        self.wrappers.get_mut(&id)
    }

    /// Registers a dispatchable leaf: creates its `Simple` wrapper and
    /// enqueues it for `take_runnable`.
    pub fn enqueue_simple(&mut self, id: NodeId) {
        self.wrappers.insert(
            id,
            FrontierWrapper {
                node_id: id,
                kind: WrapperKind::Simple,
                status: 0,
                active: 0,
                iteration: 0,
            },
        );
        self.runnable.push_back(RunnableItem::Node(id));
    }

    /// Registers a compound construct's wrapper without enqueuing it for
    /// dispatch — it is never handed to an executor; only its expanded
    /// children are.
    pub fn register_compound(&mut self, id: NodeId, kind: WrapperKind, iteration: u64) {
        self.wrappers.insert(
            id,
            FrontierWrapper {
                node_id: id,
                kind,
                status: 0,
                active: 0,
                iteration,
            },
        );
    }

    /// Whether this wrapper is eligible for removal: terminal kind and no
    /// outstanding children (invariant 5, reading right to left).
    #[must_use]
    pub fn is_removable(&self, id: NodeId) -> bool {
        self.wrappers
            .get(&id)
            .is_some_and(|w| w.kind.is_terminal() && w.active == 0)
    }

    /// Drops the wrapper bookkeeping for `id`. Does not touch the graph.
    pub fn remove_wrapper(&mut self, id: NodeId) {
        self.wrappers.remove(&id);
    }

    /// Pops the next runnable item, or `None` if the queue is empty (the
    /// caller should wait on the condvar in that case).
    ///
    /// Never yields [`RunnableItem::Eof`] — once end-of-input has drained the
    /// frontier, [`Self::eof_delivered`] is the sticky terminal signal every
    /// worker observes, rather than a one-shot queue entry only one worker
    /// could ever pop.
    pub fn pop_runnable(&mut self) -> Option<RunnableItem> {
        self.runnable.pop_front()
    }

    /// Whether end-of-input has been delivered: a terminal condition every
    /// caller of `take_runnable` checks before popping the queue, so every
    /// worker — not just the first to observe it — sees it (invariant 6,
    /// §8 invariant 4).
    #[must_use]
    pub fn eof_delivered(&self) -> bool {
        self.eof_delivered
    }

    /// Whether there is anything immediately runnable.
    #[must_use]
    pub fn has_runnable(&self) -> bool {
        !self.runnable.is_empty()
    }

    /// Whether the frontier holds no wrappers at all (used to decide when
    /// the EOF sentinel may be appended).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.wrappers.is_empty() && self.runnable.is_empty()
    }

    /// Marks end-of-input. If the frontier is already empty the sentinel is
    /// appended immediately; otherwise it is deferred until it drains.
    pub fn set_eof(&mut self) {
        self.eof_requested = true;
        self.maybe_deliver_eof();
    }

    /// Marks end-of-input delivered if it is due and has not already been
    /// flagged. Called after every removal that might have drained the
    /// frontier. Does not enqueue anything — delivery is the sticky
    /// `eof_delivered` flag itself, not a queue entry.
    pub fn maybe_deliver_eof(&mut self) {
        if self.eof_requested && !self.eof_delivered && self.is_empty() {
            self.eof_delivered = true;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;

    #[test]
    fn simple_wrapper_is_removable_immediately() {
        let mut f = Frontier::default();
        let id = NodeId(0);
        f.enqueue_simple(id);
        assert!(f.is_removable(id));
    }

    #[test]
    fn compound_wrapper_not_removable_until_active_drains() {
        let mut f = Frontier::default();
        let id = NodeId(0);
        f.register_compound(id, WrapperKind::If, 0);
        f.wrapper_mut(id).unwrap().active = 1;
        assert!(!f.is_removable(id));
        f.wrapper_mut(id).unwrap().active = 0;
        assert!(f.is_removable(id));
    }

    #[test]
    fn eof_deferred_until_frontier_drains() {
        let mut f = Frontier::default();
        let id = NodeId(0);
        f.enqueue_simple(id);
        f.set_eof();
        // Still one real node in flight; no sentinel yet.
        assert!(!f.eof_delivered());
        assert!(matches!(f.pop_runnable(), Some(RunnableItem::Node(_))));
        f.remove_wrapper(id);
        f.maybe_deliver_eof();
        assert!(f.eof_delivered());
    }

    #[test]
    fn eof_on_already_empty_frontier_delivers_immediately() {
        let mut f = Frontier::default();
        f.set_eof();
        assert!(f.eof_delivered());
    }

    #[test]
    fn eof_delivered_is_sticky_across_repeated_checks() {
        let mut f = Frontier::default();
        f.set_eof();
        assert!(f.eof_delivered());
        assert!(f.eof_delivered());
        f.maybe_deliver_eof();
        assert!(f.eof_delivered());
    }
}
