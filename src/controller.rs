// SPDX-License-Identifier: Apache-2.0
//! The compound-construct controller (C4): expansion of `if`/`while`/
//! `until`/`&&`/`||`/`for` into child graph nodes, status relay from a
//! completed child back to its parent wrapper, and `continue`/`break`
//! cancellation (§4.4).
//!
//! Every entry point here assumes the frontier lock is already held by the
//! caller (`scheduler.rs`) — these are plain functions over `&mut DagStore`
//! / `&mut Frontier`, not a second lock acquisition, which is how this crate
//! gets away with a non-reentrant mutex where the original design called
//! for a recursive one (§9).

use crate::command::{CommandTree, Jump, SimpleCommand};
use crate::footprint::{self, Footprint};
use crate::frontier::{Frontier, WrapperKind};
use crate::graph::{DagStore, NodeFlags};
use crate::ident::NodeId;

/// Which half of a compound construct's expansion a child belongs to: the
/// test/left-operand (whose status decides what happens next) or the body/
/// right-operand/branch (whose status is just relayed upward).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Test,
    Body,
}

fn invert(status: i32) -> i32 {
    i32::from(status == 0)
}

/// Promotes a freshly-unblocked node: dispatches it to the frontier if it's
/// a simple leaf, or begins expanding it if it's a compound construct.
///
/// Called both when a brand-new node's `blocked_by` comes out zero at
/// `add` time and when removing a predecessor unblocks a waiting one — the
/// two cases are handled identically (§4.4's expansion rules don't care how
/// a node arrived at the frontier).
pub(crate) fn on_node_ready(dag: &mut DagStore, frontier: &mut Frontier, id: NodeId) {
    dag.promote(id);
    let node = dag
        .get(id)
        .unwrap_or_else(|| unreachable!("BUG: node {id} promoted moments ago is missing from the arena"));
    if node.flags.cancelled {
        finish_node(dag, frontier, id, 0);
        return;
    }
    if !node.is_compound() {
        frontier.enqueue_simple(id);
        return;
    }

    let nest = node.nest;
    let iteration = node.iteration;
    let payload = node
        .payload
        .clone()
        .unwrap_or_else(|| unreachable!("BUG: compound node {id} lost its payload before expansion"));

    match payload {
        CommandTree::And(left, right) => {
            init_and_or(dag, frontier, id, WrapperKind::And, &left, &right, nest, iteration);
        }
        CommandTree::Or(left, right) => {
            init_and_or(dag, frontier, id, WrapperKind::Or, &left, &right, nest, iteration);
        }
        CommandTree::If {
            test,
            then_branch,
            else_branch,
        } => {
            init_if(dag, frontier, id, &test, &then_branch, else_branch.as_deref(), nest, iteration);
        }
        CommandTree::While { test, .. } => {
            init_loop(dag, frontier, id, WrapperKind::While, &test, nest, iteration);
        }
        CommandTree::Until { test, .. } => {
            init_loop(dag, frontier, id, WrapperKind::Until, &test, nest, iteration);
        }
        CommandTree::For { var, words, body } => {
            init_for(dag, frontier, id, &var, &words, &body, nest);
        }
        other => unreachable!("is_compound() lied about {other:?}"),
    }
}

fn narrow_and_promote(dag: &mut DagStore, frontier: &mut Frontier, id: NodeId, new_footprint: Footprint) {
    let unblocked = dag.narrow_footprint(id, new_footprint);
    for nb in unblocked {
        on_node_ready(dag, frontier, nb);
    }
}

fn init_and_or(
    dag: &mut DagStore,
    frontier: &mut Frontier,
    id: NodeId,
    kind: WrapperKind,
    left: &CommandTree,
    right: &CommandTree,
    nest: u32,
    iteration: u64,
) {
    frontier.register_compound(id, kind, iteration);
    let new_footprint = footprint::analyse(right, nest);
    narrow_and_promote(dag, frontier, id, new_footprint);
    expand_list(dag, frontier, left, nest, iteration, id, Role::Test);
}

fn init_if(
    dag: &mut DagStore,
    frontier: &mut Frontier,
    id: NodeId,
    test: &CommandTree,
    then_branch: &CommandTree,
    else_branch: Option<&CommandTree>,
    nest: u32,
    iteration: u64,
) {
    frontier.register_compound(id, WrapperKind::If, iteration);
    let mut new_footprint = footprint::analyse(then_branch, nest);
    if let Some(else_branch) = else_branch {
        new_footprint.extend(footprint::analyse(else_branch, nest));
    }
    narrow_and_promote(dag, frontier, id, new_footprint);
    expand_list(dag, frontier, test, nest, iteration, id, Role::Test);
}

fn init_loop(
    dag: &mut DagStore,
    frontier: &mut Frontier,
    id: NodeId,
    kind: WrapperKind,
    test: &CommandTree,
    nest: u32,
    iteration: u64,
) {
    // Deliberately no narrow_footprint here: while/until keep their full,
    // original conservative footprint and dependents for as long as the
    // loop runs, so external dependents keep shadowing against the loop as
    // a whole rather than against whichever iteration happens to be live.
    frontier.register_compound(id, kind, iteration);
    expand_list(dag, frontier, test, nest, iteration, id, Role::Test);
}

fn init_for(
    dag: &mut DagStore,
    frontier: &mut Frontier,
    id: NodeId,
    var: &str,
    words: &[String],
    body: &CommandTree,
    nest: u32,
) {
    frontier.register_compound(id, WrapperKind::For, 0);
    if words.is_empty() {
        if let Some(w) = frontier.wrapper_mut(id) {
            w.set_kind(WrapperKind::Simple);
        }
        finish_node(dag, frontier, id, 0);
        return;
    }
    expand_for_iteration(dag, frontier, id, var, words, 0, body, nest);
}

fn expand_for_iteration(
    dag: &mut DagStore,
    frontier: &mut Frontier,
    parent: NodeId,
    var: &str,
    words: &[String],
    idx: usize,
    body: &CommandTree,
    nest: u32,
) {
    if let Some(w) = frontier.wrapper_mut(parent) {
        w.iteration = idx as u64;
    }
    let assign = CommandTree::Simple(SimpleCommand::new(Vec::new()).with_assign(var.to_owned()));
    let mut items = vec![assign];
    items.extend(body.flatten_sequence().into_iter().cloned());
    expand_list_from(dag, frontier, items, nest, idx as u64, parent, Role::Body);
}

fn for_advance(dag: &mut DagStore, frontier: &mut Frontier, parent: NodeId) {
    let node = dag
        .get(parent)
        .unwrap_or_else(|| unreachable!("BUG: for-wrapper {parent} missing from the arena"));
    let payload = node
        .payload
        .as_ref()
        .unwrap_or_else(|| unreachable!("BUG: for-wrapper {parent} lost its payload mid-expansion"));
    let (var, words, body) = match payload {
        CommandTree::For { var, words, body } => ((*var).clone(), (*words).clone(), (**body).clone()),
        other => unreachable!("for_advance called on non-for payload {other:?}"),
    };
    let nest = node.nest;
    let cur = frontier
        .wrapper(parent)
        .map_or(0, |w| w.iteration as usize);
    let next = cur + 1;
    if next < words.len() {
        expand_for_iteration(dag, frontier, parent, &var, &words, next, &body, nest);
    } else if let Some(w) = frontier.wrapper_mut(parent) {
        w.set_kind(WrapperKind::Simple);
    }
}

/// Flattens `branch` into its top-level `;`-connected statements and expands
/// each as a child of `parent`, per §4.4's "expansion of a command list".
fn expand_list(
    dag: &mut DagStore,
    frontier: &mut Frontier,
    branch: &CommandTree,
    nest: u32,
    iteration: u64,
    parent: NodeId,
    role: Role,
) {
    let items: Vec<CommandTree> = branch.flatten_sequence().into_iter().cloned().collect();
    expand_list_from(dag, frontier, items, nest, iteration, parent, role);
}

fn expand_list_from(
    dag: &mut DagStore,
    frontier: &mut Frontier,
    items: Vec<CommandTree>,
    nest: u32,
    iteration: u64,
    parent: NodeId,
    role: Role,
) {
    let len = items.len();
    for (i, item) in items.into_iter().enumerate() {
        let (payload, invert_flag) = item.into_peeled_not();
        let mut flags = NodeFlags {
            free_payload: true,
            invert: invert_flag,
            ..NodeFlags::default()
        };
        if i + 1 == len {
            match role {
                Role::Test => {
                    flags.is_test = true;
                    flags.report_test_status = true;
                }
                Role::Body => {
                    flags.is_body = true;
                    flags.report_body_status = true;
                }
            }
        }
        let child_footprint = footprint::analyse(&payload, nest);
        let is_compound = payload.is_compound();
        let id = dag.add_with_footprint(
            Some(payload),
            child_footprint,
            is_compound,
            nest,
            iteration,
            Some(parent),
            flags,
        );
        if let Some(w) = frontier.wrapper_mut(parent) {
            w.active += 1;
        }
        if dag
            .get(id)
            .unwrap_or_else(|| unreachable!("BUG: child node {id} just added is missing from the arena"))
            .blocked_by()
            == 0
        {
            on_node_ready(dag, frontier, id);
        }
    }
}

/// Runs the branch-decision step for a completing test/body child, per
/// §4.4's "on child completion" rule 3 (and the while/until body-advances-
/// the-loop half of the state machine, which that rule's prose folds into
/// the same step).
fn advance(dag: &mut DagStore, frontier: &mut Frontier, parent: NodeId, flags: NodeFlags, status: i32) {
    let Some(kind) = frontier.wrapper(parent).map(|w| w.kind()) else {
        return;
    };
    let nest = dag
        .get(parent)
        .unwrap_or_else(|| unreachable!("BUG: compound parent {parent} missing from the arena"))
        .nest;
    let iteration = frontier
        .wrapper(parent)
        .unwrap_or_else(|| unreachable!("BUG: compound parent {parent} has no frontier wrapper"))
        .iteration;
    let payload = dag
        .get(parent)
        .and_then(|n| n.payload.clone())
        .unwrap_or_else(|| unreachable!("BUG: compound parent {parent} lost its payload mid-expansion"));

    match (kind, flags.is_test, flags.is_body) {
        (WrapperKind::And, true, _) => {
            if let CommandTree::And(_, right) = &payload {
                if status == 0 {
                    expand_list(dag, frontier, right, nest, iteration, parent, Role::Body);
                }
            }
            set_simple(frontier, parent);
        }
        (WrapperKind::Or, true, _) => {
            if let CommandTree::Or(_, right) = &payload {
                if status != 0 {
                    expand_list(dag, frontier, right, nest, iteration, parent, Role::Body);
                }
            }
            set_simple(frontier, parent);
        }
        (WrapperKind::If, true, _) => {
            if let CommandTree::If {
                then_branch,
                else_branch,
                ..
            } = &payload
            {
                if status == 0 {
                    let then_footprint = footprint::analyse(then_branch, nest);
                    narrow_and_promote(dag, frontier, parent, then_footprint);
                    expand_list(dag, frontier, then_branch, nest, iteration, parent, Role::Body);
                } else if let Some(else_branch) = else_branch {
                    let else_footprint = footprint::analyse(else_branch, nest);
                    narrow_and_promote(dag, frontier, parent, else_footprint);
                    expand_list(dag, frontier, else_branch, nest, iteration, parent, Role::Body);
                } else {
                    narrow_and_promote(dag, frontier, parent, Footprint::empty());
                }
            }
            set_simple(frontier, parent);
        }
        (WrapperKind::While, true, _) => {
            if let CommandTree::While { body, .. } = &payload {
                if status == 0 {
                    expand_list(dag, frontier, body, nest + 1, iteration, parent, Role::Body);
                } else {
                    set_simple(frontier, parent);
                }
            }
        }
        (WrapperKind::Until, true, _) => {
            if let CommandTree::Until { body, .. } = &payload {
                if status != 0 {
                    expand_list(dag, frontier, body, nest + 1, iteration, parent, Role::Body);
                } else {
                    set_simple(frontier, parent);
                }
            }
        }
        (WrapperKind::While, _, true) => {
            if let CommandTree::While { test, .. } = &payload {
                expand_list(dag, frontier, test, nest, iteration + 1, parent, Role::Test);
                if let Some(w) = frontier.wrapper_mut(parent) {
                    w.iteration = iteration + 1;
                }
            }
        }
        (WrapperKind::Until, _, true) => {
            if let CommandTree::Until { test, .. } = &payload {
                expand_list(dag, frontier, test, nest, iteration + 1, parent, Role::Test);
                if let Some(w) = frontier.wrapper_mut(parent) {
                    w.iteration = iteration + 1;
                }
            }
        }
        (WrapperKind::For, _, true) => {
            for_advance(dag, frontier, parent);
        }
        _ => {}
    }
}

fn set_simple(frontier: &mut Frontier, id: NodeId) {
    if let Some(w) = frontier.wrapper_mut(id) {
        w.set_kind(WrapperKind::Simple);
    }
}

/// Finalises `id`'s lifecycle: relays its status to its parent (possibly
/// triggering the next expansion or cascading the parent's own completion),
/// then unconditionally removes `id` itself from the frontier and the DAG,
/// promoting whatever that unblocks.
///
/// This is the single path every node's completion funnels through,
/// whether it was actually executed by a worker, is a `continue`/`break`
/// leaf completing itself with no execution, or is a compound construct
/// whose expansion has fully drained (§4.4's state machine's "kind becomes
/// simple -> removable when active == 0" terminal transition).
pub(crate) fn finish_node(dag: &mut DagStore, frontier: &mut Frontier, id: NodeId, raw_status: i32) {
    let flags = dag
        .get(id)
        .unwrap_or_else(|| unreachable!("BUG: finishing node {id} is missing from the arena"))
        .flags;
    let status = if flags.invert { invert(raw_status) } else { raw_status };

    if let Some(parent) = dag
        .get(id)
        .unwrap_or_else(|| unreachable!("BUG: finishing node {id} is missing from the arena"))
        .parent
    {
        let node_iteration = dag
            .get(id)
            .unwrap_or_else(|| unreachable!("BUG: finishing node {id} is missing from the arena"))
            .iteration;

        if flags.report_test_status {
            if let Some(w) = frontier.wrapper_mut(parent) {
                w.status = status;
            }
        }
        if flags.report_body_status {
            if let Some(w) = frontier.wrapper_mut(parent) {
                if w.iteration == node_iteration {
                    w.status = status;
                }
            }
        }
        if flags.is_test || flags.is_body {
            advance(dag, frontier, parent, flags, status);
        }
        if let Some(w) = frontier.wrapper_mut(parent) {
            w.active = w.active.saturating_sub(1);
        }
        if frontier.is_removable(parent) {
            let parent_status = frontier.wrapper(parent).map_or(0, |w| w.status);
            finish_node(dag, frontier, parent, parent_status);
        }
    }

    frontier.remove_wrapper(id);
    let unblocked = dag.remove(id);
    for nb in unblocked {
        on_node_ready(dag, frontier, nb);
    }
    frontier.maybe_deliver_eof();
}

/// Resolves a `continue`/`break` leaf's effective target: the nearest
/// enclosing loop wrapper (`while`/`until`/`for`) whose body nest
/// (`wrapper.nest + 1`) equals the jump's target nest, per §4.4's "resolves
/// the effective target wrapper by walking parents until `nest == N` is
/// reached". Non-loop wrappers (`if`, `&&`, `||`) are transparent to the
/// walk — a jump can be nested inside a conditional inside the loop it
/// targets.
fn resolve_jump_target(dag: &DagStore, jump: NodeId, target_nest: u32) -> Option<NodeId> {
    let mut cur = dag.get(jump)?.parent;
    while let Some(wrapper_id) = cur {
        let node = dag.get(wrapper_id)?;
        if node.nest + 1 == target_nest {
            return Some(wrapper_id);
        }
        cur = node.parent;
    }
    None
}

/// Applies a `continue`/`break` leaf's cancellation semantics (§4.4) and
/// then finishes the leaf itself as a no-op. Called from `take_runnable`
/// instead of dispatching the node to a worker.
///
/// Known simplification (see `DESIGN.md`): cancellation reliably reaches
/// every not-yet-dispatched simple sibling in the target loop's current (or
/// later, for `break`) iteration. A nested compound construct that has
/// already begun its own expansion by the time the jump fires is marked
/// cancelled but is left to drain its already-spawned children rather than
/// being torn down mid-expansion.
pub(crate) fn apply_jump(dag: &mut DagStore, frontier: &mut Frontier, jump: NodeId) {
    let Some(target_jump) = dag.get(jump).and_then(|n| n.jump()) else {
        finish_node(dag, frontier, jump, 0);
        return;
    };
    let (target_nest, is_break) = match target_jump {
        Jump::Continue(n) => (n, false),
        Jump::Break(n) => (n, true),
    };
    let Some(target_wrapper) = resolve_jump_target(dag, jump, target_nest) else {
        // No enclosing loop at all (clamped to nothing, §7): a no-op.
        finish_node(dag, frontier, jump, 0);
        return;
    };

    if is_break {
        set_simple(frontier, target_wrapper);
    }

    let jump_iteration = dag
        .get(jump)
        .unwrap_or_else(|| unreachable!("BUG: jump node {jump} is missing from the arena"))
        .iteration;
    let candidates: Vec<NodeId> = dag
        .node_ids()
        .into_iter()
        .filter(|&candidate| candidate != jump && candidate != target_wrapper)
        .filter(|&candidate| dag.is_self_or_descendant(candidate, target_wrapper))
        .filter(|&candidate| {
            let node = dag
                .get(candidate)
                .unwrap_or_else(|| unreachable!("BUG: cancellation candidate {candidate} missing from the arena"));
            let nest_matches = node.nest >= target_nest;
            let iteration_matches = if is_break {
                node.iteration >= jump_iteration
            } else {
                node.iteration == jump_iteration
            };
            nest_matches && iteration_matches
        })
        .collect();

    for candidate in candidates {
        let Some(node) = dag.get_mut(candidate) else {
            continue;
        };
        if node.flags.cancelled {
            continue;
        }
        node.flags.cancelled = true;
        // Only a candidate that was genuinely still blocked (and whose sole
        // remaining edge we can assume belonged to the ordering we're now
        // collapsing) gets force-finished here. A candidate already at
        // blocked_by == 0 may already be sitting with a worker or queued in
        // `frontier.runnable`; `take_runnable` is responsible for noticing
        // its `cancelled` flag and finishing it without ever starting it.
        if dag.force_unblock(candidate) {
            finish_node(dag, frontier, candidate, 0);
        }
    }

    finish_node(dag, frontier, jump, 0);
}
