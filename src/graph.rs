// SPDX-License-Identifier: Apache-2.0
//! The dependency DAG (C2): graph nodes, edge insertion, and removal.
//!
//! Nodes live in an arena indexed by [`NodeId`] rather than behind `Rc`/
//! `RefCell`, so a node's `parent` back-reference is just another id, never
//! an owning pointer — the cycle between a node and the frontier wrapper
//! that owns it is broken by going through the arena (see §9).

use rustc_hash::FxHashMap;

use crate::command::{CommandTree, Jump};
use crate::footprint::{self, ConflictKind, Footprint};
use crate::ident::{NodeId, NodeIdAllocator};

/// Per-node role flags.
///
/// `invert` is not named in the data model of §3, but is required to
/// implement the `not`-inversion rule in §4.4 step 1; it is tracked here
/// alongside the named flags rather than re-deriving it from the payload on
/// every completion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeFlags {
    /// The scheduler owns the payload and frees it on removal.
    pub free_payload: bool,
    /// This node is the (or a) test of its parent compound construct.
    pub is_test: bool,
    /// This node is the (or a) body statement of its parent compound construct.
    pub is_body: bool,
    /// Copy this node's exit status into its parent's `status` as a test result.
    pub report_test_status: bool,
    /// Copy this node's exit status into its parent's `status` as a body result.
    pub report_body_status: bool,
    /// An odd number of `not` wrappers were peeled off this node's payload;
    /// its reported status must be inverted before it is relayed or used.
    pub invert: bool,
    /// Set by `continue`/`break` cancellation; a cancelled node is skipped
    /// by `take_runnable` without ever reaching the executor.
    pub cancelled: bool,
}

/// One scheduled unit of work.
#[derive(Debug)]
pub struct GraphNode {
    id: NodeId,
    /// Dispatchable payload. `None` once a simple leaf's command has been
    /// taken by a worker. A compound construct's payload is never taken —
    /// the controller re-reads it on every `advance()` call for the life of
    /// the construct's expansion (e.g. a `while` loop's test and body are
    /// the same payload across every iteration) — so it stays `Some` until
    /// the node itself is removed.
    pub payload: Option<CommandTree>,
    pub(crate) footprint: Footprint,
    pub(crate) blocked_by: usize,
    pub(crate) dependents: Vec<NodeId>,
    /// The frontier wrapper (by node id) this node was spawned under, if any.
    pub parent: Option<NodeId>,
    pub(crate) nest: u32,
    pub(crate) iteration: u64,
    pub flags: NodeFlags,
    is_compound: bool,
}

impl GraphNode {
    /// This node's id.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Whether this node is a compound construct (never dispatched; only
    /// ever expanded by the controller).
    #[must_use]
    pub fn is_compound(&self) -> bool {
        self.is_compound
    }

    /// Current count of unresolved incoming edges.
    #[must_use]
    pub fn blocked_by(&self) -> usize {
        self.blocked_by
    }

    /// The lexical loop-nesting depth this node was scheduled at.
    #[must_use]
    pub fn nest(&self) -> u32 {
        self.nest
    }

    /// The iteration counter of the nearest enclosing loop at schedule time.
    #[must_use]
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// The jump this node resolves to, if its footprint is a bare
    /// `continue`/`break` leaf.
    #[must_use]
    pub fn jump(&self) -> Option<Jump> {
        self.footprint.jump()
    }
}

/// Computes the conflict kind between a prospective new node and an existing
/// frontier root, per §4.2 rule 1: name-based conflict, escalated to a
/// write-collision when `new` carries a jump that must cancel `root`.
///
/// A jump cancels a root when the root's nest is at or below the jump's
/// target (i.e. the root lives inside, or at, the loop being exited) and the
/// iteration counters line up: `continue` only forces ordering against
/// same-iteration siblings, `break` against same-or-later ones, matching the
/// cancellation rule in §4.4.
fn conflict_kind(new: &GraphNode, root: &GraphNode) -> ConflictKind {
    let name_kind = footprint::name_conflict(&new.footprint, &root.footprint);
    if name_kind == ConflictKind::WriteCollision {
        return ConflictKind::WriteCollision;
    }
    if let Some(jump) = new.footprint.jump() {
        let escalate = match jump {
            Jump::Continue(target) => root.nest >= target && root.iteration == new.iteration,
            Jump::Break(target) => root.nest >= target && root.iteration >= new.iteration,
        };
        if escalate {
            return ConflictKind::WriteCollision;
        }
    }
    name_kind
}

/// Arena of graph nodes plus the ordered list of current frontier roots.
///
/// "Frontier root" here means any node with `blocked_by == 0` that has not
/// yet been removed — both truly dispatchable leaves and compound-construct
/// placeholders that are still waiting for their expanded children to drain.
/// Insertion order is preserved so `dep_walk` pins downstream traversal to
/// source order (§4.2's tie-break), satisfying invariant 3.
#[derive(Debug, Default)]
pub struct DagStore {
    nodes: FxHashMap<NodeId, GraphNode>,
    frontier_order: Vec<NodeId>,
    alloc: NodeIdAllocator,
}

impl DagStore {
    /// Returns a node by id.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(&id)
    }

    /// Returns a mutable node by id.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut GraphNode> {
        self.nodes.get_mut(&id)
    }

    /// The current frontier roots, in insertion order.
    #[must_use]
    pub fn frontier_roots(&self) -> &[NodeId] {
        &self.frontier_order
    }

    /// Adds a new node wrapping `payload`, computing its footprint and
    /// linking it behind any conflicting frontier roots (§4.2 `add`).
    ///
    /// Returns the new node's id. If `blocked_by` comes out zero the caller
    /// is responsible for promoting it onto the frontier (this store only
    /// tracks graph-level blocking, not frontier/wrapper bookkeeping).
    pub fn add(
        &mut self,
        payload: CommandTree,
        nest: u32,
        iteration: u64,
        parent: Option<NodeId>,
        mut flags: NodeFlags,
    ) -> NodeId {
        let (payload, invert) = payload.into_peeled_not();
        flags.invert ^= invert;
        let footprint = footprint::analyse(&payload, nest);
        let is_compound = payload.is_compound();
        let id = self.alloc.alloc();
        let node = GraphNode {
            id,
            payload: Some(payload),
            footprint,
            blocked_by: 0,
            dependents: Vec::new(),
            parent,
            nest,
            iteration,
            flags,
            is_compound,
        };
        self.nodes.insert(id, node);

        let roots: Vec<NodeId> = self.frontier_order.clone();
        let mut blocked_by = 0usize;
        for root in roots {
            blocked_by += self.dep_walk(id, root);
        }
        self.nodes
            .get_mut(&id)
            .unwrap_or_else(|| unreachable!("BUG: node {id} inserted moments ago is missing from the arena"))
            .blocked_by = blocked_by;
        id
    }

    /// Adds a node that already carries a precomputed footprint, bypassing
    /// `footprint::analyse`. Used by the controller when expanding a
    /// compound construct's children, whose footprint is the construct's
    /// own already-analysed sub-footprint rather than a fresh tree walk.
    ///
    /// When `parent` is `Some`, that node is excluded from the dep-walk
    /// roots: a compound construct's own graph node stays on the frontier
    /// for the whole lifetime of its expansion (so external dependents keep
    /// shadowing against it, per §4.4's while/until rule), but it must not
    /// be treated as a conflict source for its *own* freshly expanded
    /// children — that would wire up an edge that can only clear when the
    /// parent is removed, which never happens before its children are.
    pub(crate) fn add_with_footprint(
        &mut self,
        payload: Option<CommandTree>,
        footprint: Footprint,
        is_compound: bool,
        nest: u32,
        iteration: u64,
        parent: Option<NodeId>,
        flags: NodeFlags,
    ) -> NodeId {
        let id = self.alloc.alloc();
        let node = GraphNode {
            id,
            payload,
            footprint,
            blocked_by: 0,
            dependents: Vec::new(),
            parent,
            nest,
            iteration,
            flags,
            is_compound,
        };
        self.nodes.insert(id, node);

        let roots: Vec<NodeId> = self
            .frontier_order
            .iter()
            .copied()
            .filter(|&r| Some(r) != parent)
            .collect();
        let mut blocked_by = 0usize;
        for root in roots {
            blocked_by += self.dep_walk(id, root);
        }
        self.nodes
            .get_mut(&id)
            .unwrap_or_else(|| unreachable!("BUG: node {id} inserted moments ago is missing from the arena"))
            .blocked_by = blocked_by;
        id
    }

    /// Recursively walks `root`'s dependents looking for a place to attach
    /// `new`, per §4.2's edge-insertion algorithm. Returns the number of
    /// edges contributed via this root (0 or 1).
    fn dep_walk(&mut self, new: NodeId, root: NodeId) -> usize {
        let kind = conflict_kind(
            self.nodes
                .get(&new)
                .unwrap_or_else(|| unreachable!("BUG: new node {new} missing from the arena mid-insertion")),
            self.nodes
                .get(&root)
                .unwrap_or_else(|| unreachable!("BUG: frontier root {root} missing from the arena")),
        );
        if kind == ConflictKind::None {
            return 0;
        }
        let dependents = self
            .nodes
            .get(&root)
            .unwrap_or_else(|| unreachable!("BUG: frontier root {root} missing from the arena"))
            .dependents
            .clone();
        if dependents.iter().any(|&d| d == new) {
            return 0;
        }
        let mut contributed = 0;
        for dependent in dependents {
            contributed += self.dep_walk(new, dependent);
        }
        if contributed == 0 && kind == ConflictKind::WriteCollision {
            self.nodes
                .get_mut(&root)
                .unwrap_or_else(|| unreachable!("BUG: frontier root {root} missing from the arena"))
                .dependents
                .push(new);
            return 1;
        }
        0
    }

    /// Marks `id` as a frontier root (blocked_by reached zero).
    pub fn promote(&mut self, id: NodeId) {
        debug_assert_eq!(self.nodes[&id].blocked_by, 0);
        self.frontier_order.push(id);
    }

    /// Removes a completed node, cascading `blocked_by` decrements to its
    /// dependents and returning those that became newly unblocked (in
    /// dependents-insertion order, i.e. source order).
    ///
    /// This frees the node's footprint and dependents list; the payload was
    /// already taken by the executor (or never existed, for a compound
    /// construct), so nothing further needs disposing here regardless of
    /// `free_payload` — that flag documents ownership for embedding callers
    /// that hand the scheduler a payload needing explicit teardown.
    pub fn remove(&mut self, id: NodeId) -> Vec<NodeId> {
        let node = self
            .nodes
            .remove(&id)
            .unwrap_or_else(|| unreachable!("BUG: caller asked to remove node {id}, which is not in the arena"));
        self.frontier_order.retain(|&n| n != id);

        let mut newly_unblocked = Vec::new();
        for dependent_id in node.dependents {
            if let Some(dependent) = self.nodes.get_mut(&dependent_id) {
                dependent.blocked_by -= 1;
                if dependent.blocked_by == 0 {
                    newly_unblocked.push(dependent_id);
                }
            }
        }
        newly_unblocked
    }

    /// Replaces `id`'s footprint and re-checks its existing dependents
    /// against the narrower one, dropping edges that no longer conflict and
    /// decrementing the freed dependents' `blocked_by`.
    ///
    /// Used by the controller when a compound construct expands its test (or
    /// branch) as real children: the wrapper's own conservative footprint
    /// shrinks to whatever it still conservatively owns (§4.4 expansion).
    pub(crate) fn narrow_footprint(&mut self, id: NodeId, new_footprint: Footprint) -> Vec<NodeId> {
        let dependents = {
            let node = self
                .nodes
                .get_mut(&id)
                .unwrap_or_else(|| unreachable!("BUG: node {id} missing from the arena while narrowing its footprint"));
            node.footprint = new_footprint;
            std::mem::take(&mut node.dependents)
        };
        let mut kept = Vec::new();
        let mut newly_unblocked = Vec::new();
        for dependent_id in dependents {
            let kind = conflict_kind(
                self.nodes.get(&dependent_id).unwrap_or_else(|| {
                    unreachable!("BUG: dependent {dependent_id} of node {id} missing from the arena")
                }),
                self.nodes
                    .get(&id)
                    .unwrap_or_else(|| unreachable!("BUG: node {id} missing from the arena while narrowing its footprint")),
            );
            if kind == ConflictKind::None {
                let dependent = self.nodes.get_mut(&dependent_id).unwrap_or_else(|| {
                    unreachable!("BUG: dependent {dependent_id} of node {id} missing from the arena")
                });
                dependent.blocked_by -= 1;
                if dependent.blocked_by == 0 {
                    newly_unblocked.push(dependent_id);
                }
            } else {
                kept.push(dependent_id);
            }
        }
        self.nodes
            .get_mut(&id)
            .unwrap_or_else(|| unreachable!("BUG: node {id} missing from the arena while narrowing its footprint"))
            .dependents = kept;
        newly_unblocked
    }

    /// A snapshot of every live node id, for the cancellation walk, which has
    /// no cheaper way to find "descendants of a wrapper" than scanning parent
    /// chains (parent pointers form a tree with no children list).
    #[must_use]
    pub(crate) fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// Whether `node` is `ancestor` itself or a transitive child of it,
    /// walking `parent` pointers.
    #[must_use]
    pub(crate) fn is_self_or_descendant(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut cur = Some(node);
        while let Some(id) = cur {
            if id == ancestor {
                return true;
            }
            cur = self.nodes.get(&id).and_then(|n| n.parent);
        }
        false
    }

    /// If `id` is currently blocked by exactly one outstanding edge, clears
    /// it and reports that the caller should now treat `id` as a frontier
    /// root. Used by cancellation's "blocked_by already 1" fast path (§4.4).
    pub(crate) fn force_unblock(&mut self, id: NodeId) -> bool {
        let node = self
            .nodes
            .get_mut(&id)
            .unwrap_or_else(|| unreachable!("BUG: cancellation candidate {id} missing from the arena"));
        if node.blocked_by == 1 {
            node.blocked_by = 0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use crate::command::{Redirect, SimpleCommand};
    use crate::ident::ResourceName;

    fn write_file(name: &str) -> CommandTree {
        CommandTree::Simple(
            SimpleCommand::new(vec!["cat".to_owned()])
                .with_redirects(vec![Redirect::WriteTo(ResourceName::File(name.to_owned()))]),
        )
    }

    fn read_file(name: &str) -> CommandTree {
        CommandTree::Simple(
            SimpleCommand::new(vec!["cat".to_owned()])
                .with_redirects(vec![Redirect::ReadFrom(ResourceName::File(name.to_owned()))]),
        )
    }

    #[test]
    fn independent_writes_do_not_block() {
        let mut dag = DagStore::default();
        let a = dag.add(write_file("a"), 0, 0, None, NodeFlags::default());
        dag.promote(a);
        let b = dag.add(write_file("b"), 0, 0, None, NodeFlags::default());
        assert_eq!(dag.get(b).unwrap().blocked_by(), 0);
    }

    #[test]
    fn write_then_read_same_file_blocks() {
        let mut dag = DagStore::default();
        let a = dag.add(write_file("a"), 0, 0, None, NodeFlags::default());
        dag.promote(a);
        let b = dag.add(read_file("a"), 0, 0, None, NodeFlags::default());
        assert_eq!(dag.get(b).unwrap().blocked_by(), 1);
    }

    #[test]
    fn removing_predecessor_unblocks_dependent() {
        let mut dag = DagStore::default();
        let a = dag.add(write_file("a"), 0, 0, None, NodeFlags::default());
        dag.promote(a);
        let b = dag.add(read_file("a"), 0, 0, None, NodeFlags::default());
        let unblocked = dag.remove(a);
        assert_eq!(unblocked, vec![b]);
        assert_eq!(dag.get(b).unwrap().blocked_by(), 0);
    }

    #[test]
    fn read_read_never_blocks() {
        let mut dag = DagStore::default();
        let a = dag.add(read_file("a"), 0, 0, None, NodeFlags::default());
        dag.promote(a);
        let b = dag.add(read_file("a"), 0, 0, None, NodeFlags::default());
        assert_eq!(dag.get(b).unwrap().blocked_by(), 0);
    }

    #[test]
    fn chain_of_three_only_blocks_on_immediate_conflicts() {
        // cat a > b ; cat b > c ; cat a > d  (S1 from the testable-properties scenarios)
        let mut dag = DagStore::default();
        let n1 = CommandTree::Simple(
            SimpleCommand::new(vec!["cat".to_owned()]).with_redirects(vec![
                Redirect::ReadFrom(ResourceName::File("a".to_owned())),
                Redirect::WriteTo(ResourceName::File("b".to_owned())),
            ]),
        );
        let n2 = CommandTree::Simple(
            SimpleCommand::new(vec!["cat".to_owned()]).with_redirects(vec![
                Redirect::ReadFrom(ResourceName::File("b".to_owned())),
                Redirect::WriteTo(ResourceName::File("c".to_owned())),
            ]),
        );
        let n3 = CommandTree::Simple(
            SimpleCommand::new(vec!["cat".to_owned()]).with_redirects(vec![
                Redirect::ReadFrom(ResourceName::File("a".to_owned())),
                Redirect::WriteTo(ResourceName::File("d".to_owned())),
            ]),
        );
        let id1 = dag.add(n1, 0, 0, None, NodeFlags::default());
        dag.promote(id1);
        let id2 = dag.add(n2, 0, 0, None, NodeFlags::default());
        let id3 = dag.add(n3, 0, 0, None, NodeFlags::default());
        assert_eq!(dag.get(id2).unwrap().blocked_by(), 1);
        assert_eq!(dag.get(id3).unwrap().blocked_by(), 1);

        let unblocked = dag.remove(id1);
        assert_eq!(unblocked, vec![id2, id3]);
    }

    #[test]
    fn jump_escalates_against_same_iteration_sibling() {
        let mut dag = DagStore::default();
        let body = CommandTree::Simple(SimpleCommand::new(vec!["echo".to_owned()]));
        let root = dag.add(body, 1, 0, None, NodeFlags::default());
        dag.promote(root);
        let brk = CommandTree::Simple(SimpleCommand::new(vec!["break".to_owned()]));
        let jump = dag.add(brk, 1, 0, None, NodeFlags::default());
        assert_eq!(dag.get(jump).unwrap().blocked_by(), 1);
    }

    #[test]
    fn continue_does_not_escalate_against_later_iteration() {
        let mut dag = DagStore::default();
        let body = CommandTree::Simple(SimpleCommand::new(vec!["echo".to_owned()]));
        let root = dag.add(body, 1, 0, None, NodeFlags::default());
        dag.promote(root);
        let cont = CommandTree::Simple(SimpleCommand::new(vec!["continue".to_owned()]));
        let jump = dag.add(cont, 1, 1, None, NodeFlags::default());
        assert_eq!(dag.get(jump).unwrap().blocked_by(), 0);
    }
}
