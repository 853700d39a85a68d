// SPDX-License-Identifier: Apache-2.0
//! The top-level `Scheduler`: the single mutex + condvar that guards the
//! dependency DAG and frontier (§5), and the public operations (`submit`,
//! `take_runnable`, `complete`, `set_eof`) a parser thread, worker pool, and
//! status-reporter thread drive it through.
//!
//! Diagnostics are emitted via `tracing` spans on every public operation
//! (§10.1) rather than a hand-rolled logging format — this crate never
//! installs a subscriber itself; that is the embedding shell's job.

use std::sync::{Arc, Condvar, Mutex};

use rustc_hash::FxHashSet;
use thiserror::Error;
use tracing::instrument;

use crate::command::CommandTree;
use crate::controller;
use crate::footprint::FootprintEntry;
use crate::frontier::{Frontier, RunnableItem};
use crate::graph::{DagStore, NodeFlags};
use crate::ident::{NodeId, ResourceName};

/// Resolves the scheduler's worker-pool size (§10.2).
///
/// Resolution order: an explicit [`SchedulerConfig::workers`], then the
/// `DASH_SCHED_WORKERS` environment variable (if set and a positive
/// integer), then [`std::thread::available_parallelism`], falling back to
/// `1` if even that is unavailable.
#[derive(Clone, Copy, Debug, Default)]
pub struct SchedulerConfig {
    /// Explicit worker count override. Takes precedence over the
    /// environment variable and the platform parallelism probe.
    pub workers: Option<usize>,
}

impl SchedulerConfig {
    /// Resolves the effective worker count per the precedence documented on
    /// this struct.
    #[must_use]
    pub fn resolve_workers(&self) -> usize {
        if let Some(n) = self.workers {
            return n.max(1);
        }
        if let Ok(value) = std::env::var("DASH_SCHED_WORKERS") {
            if let Ok(n) = value.parse::<usize>() {
                if n > 0 {
                    return n;
                }
            }
        }
        std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1)
    }
}

/// Recoverable scheduler errors (§7, §10.3).
///
/// Allocation failure is deliberately not a variant here — it is
/// unrecoverable by design and handled by Rust's normal global-allocator
/// abort path, not by this enum.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleError {
    /// `complete` was called with a node id this scheduler has no record of
    /// ever having taken.
    #[error("node {0} is not a node this scheduler handed to a worker")]
    UnknownNode(NodeId),
    /// `complete` was called twice for the same node.
    #[error("node {0} was already completed")]
    AlreadyCompleted(NodeId),
    /// `set_eof` was called a second time.
    #[error("end-of-input was already signalled")]
    EofAlreadySet,
}

/// Runs a command payload and reports its exit status.
///
/// Implemented by the embedding shell (forking an external process,
/// invoking a built-in, etc.); this crate only depends on the trait so its
/// own tests can supply a scripted fake.
pub trait Executor: Send + Sync {
    /// Synchronously runs `payload`, returning its exit status.
    fn execute(&self, payload: &CommandTree) -> i32;
}

/// Notified when a scheduled node's variable write has actually landed.
///
/// The scheduler itself has no variable storage; it only knows a completing
/// node's footprint included a write to a named variable. This hook lets an
/// external variable store update its own table, and is invoked from inside
/// `complete`, before the completing node's wrapper is removed, mirroring
/// how any other write's dependents are released (§6).
pub trait VariableWrites: Send + Sync {
    /// Called once per committed variable write in a completing node's
    /// footprint, in footprint order.
    fn write_committed(&self, name: &str);
}

/// One item a worker receives from [`Scheduler::take_runnable`].
#[derive(Debug)]
pub enum Runnable {
    /// A command ready to run, with its payload already taken from the
    /// graph node.
    Node {
        /// The node id, to be passed back to [`Scheduler::complete`].
        id: NodeId,
        /// The command to run.
        payload: CommandTree,
    },
    /// End of input: no more commands will ever be submitted and the
    /// frontier has fully drained. Workers should terminate on receipt.
    Eof,
}

struct Inner {
    dag: DagStore,
    frontier: Frontier,
    eof_set: bool,
    /// Nodes currently checked out to a worker via `take_runnable`, not yet
    /// reported back via `complete`. Distinguishes "unknown id" from
    /// "already completed" in `complete`'s error reporting.
    taken: FxHashSet<NodeId>,
}

impl Inner {
    fn new() -> Self {
        Self {
            dag: DagStore::default(),
            frontier: Frontier::default(),
            eof_set: false,
            taken: FxHashSet::default(),
        }
    }
}

/// The scheduler: one dependency DAG plus frontier, guarded by a single
/// mutex and condvar (§5), shared via `Arc` across a parser thread, a
/// worker pool, and an optional status-reporter thread.
pub struct Scheduler {
    inner: Mutex<Inner>,
    condvar: Condvar,
    config: SchedulerConfig,
    variable_writes: Option<Arc<dyn VariableWrites>>,
}

impl Scheduler {
    /// Builds a new scheduler with no variable-write notification hook.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        Self::with_variable_writes(config, None)
    }

    /// Builds a new scheduler that notifies `variable_writes` whenever a
    /// completing node's footprint includes a committed variable write.
    #[must_use]
    pub fn with_variable_writes(
        config: SchedulerConfig,
        variable_writes: Option<Arc<dyn VariableWrites>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::new()),
            condvar: Condvar::new(),
            config,
            variable_writes,
        })
    }

    /// The resolved worker-pool size (§10.2).
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.config.resolve_workers()
    }

    /// Submits a freshly parsed command tree (§6's parser feed).
    ///
    /// Wraps `tree` in a graph node, links it behind any conflicting
    /// frontier roots, and — if it comes out unblocked — promotes it onto
    /// the frontier (dispatching it immediately if it is a simple leaf, or
    /// beginning its expansion if it is a compound construct).
    #[instrument(skip(self, tree))]
    pub fn submit(&self, tree: CommandTree) -> NodeId {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|_| unreachable!("BUG: scheduler mutex poisoned"));
        let id = inner.dag.add(tree, 0, 0, None, NodeFlags::default());
        let blocked_by = inner
            .dag
            .get(id)
            .unwrap_or_else(|| unreachable!("BUG: node {id} just added is missing from the arena"))
            .blocked_by();
        if blocked_by == 0 {
            let Inner { dag, frontier, .. } = &mut *inner;
            controller::on_node_ready(dag, frontier, id);
        }
        self.condvar.notify_all();
        id
    }

    /// Signals end-of-input. The EOF sentinel is appended to the frontier
    /// immediately if it is already empty, or deferred until it drains.
    #[instrument(skip(self))]
    pub fn set_eof(&self) -> Result<(), ScheduleError> {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|_| unreachable!("BUG: scheduler mutex poisoned"));
        if inner.eof_set {
            return Err(ScheduleError::EofAlreadySet);
        }
        inner.eof_set = true;
        inner.frontier.set_eof();
        self.condvar.notify_all();
        Ok(())
    }

    /// Blocks until the frontier holds something runnable, then returns it.
    ///
    /// Nodes that turn out to be cancelled, or that are themselves a
    /// `continue`/`break` leaf, are resolved internally (never handed to
    /// the caller) before this function returns — a worker calling this
    /// only ever sees real work or [`Runnable::Eof`].
    #[instrument(skip(self))]
    pub fn take_runnable(&self) -> Runnable {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|_| unreachable!("BUG: scheduler mutex poisoned"));
        loop {
            // `eof_delivered` is sticky (invariant 6): checked unconditionally
            // before popping, so every worker in the pool observes it, not
            // just whichever one happened to pop a one-shot queue entry
            // (§8 invariant 4).
            if inner.frontier.eof_delivered() {
                return Runnable::Eof;
            }
            match inner.frontier.pop_runnable() {
                None => {
                    inner = self
                        .condvar
                        .wait(inner)
                        .unwrap_or_else(|_| unreachable!("BUG: scheduler mutex poisoned while waiting"));
                }
                Some(RunnableItem::Eof) => {
                    unreachable!("BUG: Eof is never queued; eof_delivered() is the terminal signal")
                }
                Some(RunnableItem::Node(id)) => {
                    let cancelled = inner.dag.get(id).is_some_and(|node| node.flags.cancelled);
                    let has_jump = inner.dag.get(id).is_some_and(|node| node.jump().is_some());
                    if cancelled || has_jump {
                        let Inner { dag, frontier, .. } = &mut *inner;
                        if has_jump && !cancelled {
                            controller::apply_jump(dag, frontier, id);
                        } else {
                            controller::finish_node(dag, frontier, id, 0);
                        }
                        self.condvar.notify_all();
                        continue;
                    }
                    let payload = inner
                        .dag
                        .get_mut(id)
                        .and_then(|node| node.payload.take())
                        .unwrap_or_else(|| unreachable!("BUG: runnable simple node {id} carries no payload"));
                    inner.taken.insert(id);
                    return Runnable::Node { id, payload };
                }
            }
        }
    }

    /// Blocks until the frontier is non-empty (used by a status-reporter
    /// thread that wants to know work is in flight, not what it is).
    #[instrument(skip(self))]
    pub fn wait_nonempty(&self) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|_| unreachable!("BUG: scheduler mutex poisoned"));
        while inner.frontier.is_empty() {
            inner = self
                .condvar
                .wait(inner)
                .unwrap_or_else(|_| unreachable!("BUG: scheduler mutex poisoned while waiting"));
        }
    }

    /// Reports a worker-executed node's exit status.
    ///
    /// Commits any variable writes in the node's footprint to the
    /// configured [`VariableWrites`] hook, then runs the compound-construct
    /// controller's on-completion logic (branch expansion, status relay,
    /// loop advance, cancellation cascades) and removes the node.
    #[instrument(skip(self))]
    pub fn complete(&self, id: NodeId, status: i32) -> Result<(), ScheduleError> {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|_| unreachable!("BUG: scheduler mutex poisoned"));
        if !inner.taken.remove(&id) {
            return Err(if inner.dag.get(id).is_some() {
                ScheduleError::UnknownNode(id)
            } else {
                ScheduleError::AlreadyCompleted(id)
            });
        }

        if let Some(hook) = &self.variable_writes {
            let Some(node) = inner.dag.get(id) else {
                return Err(ScheduleError::AlreadyCompleted(id));
            };
            let writes: Vec<String> = node
                .footprint
                .0
                .iter()
                .filter_map(|entry| match entry {
                    FootprintEntry::Write(ResourceName::Var(name)) => Some(name.clone()),
                    _ => None,
                })
                .collect();
            for name in writes {
                hook.write_committed(&name);
            }
        }

        let Inner { dag, frontier, .. } = &mut *inner;
        controller::finish_node(dag, frontier, id, status);
        self.condvar.notify_all();
        Ok(())
    }

    /// Spawns [`SchedulerConfig::resolve_workers`] worker threads, each
    /// looping `take_runnable` → `executor.execute` → `complete` until it
    /// receives [`Runnable::Eof`] (§5's worker-pool lifecycle).
    ///
    /// # Errors
    ///
    /// Returns the OS error from the first `spawn` that fails; any threads
    /// already spawned keep running to completion regardless.
    pub fn spawn_workers(
        self: &Arc<Self>,
        executor: Arc<dyn Executor>,
    ) -> std::io::Result<Vec<std::thread::JoinHandle<()>>> {
        (0..self.worker_count())
            .map(|idx| {
                let scheduler = Arc::clone(self);
                let executor = Arc::clone(&executor);
                std::thread::Builder::new()
                    .name(format!("dash-sched-worker-{idx}"))
                    .spawn(move || scheduler.worker_loop(executor.as_ref()))
            })
            .collect()
    }

    fn worker_loop(&self, executor: &dyn Executor) {
        loop {
            match self.take_runnable() {
                Runnable::Eof => break,
                Runnable::Node { id, payload } => {
                    let status = executor.execute(&payload);
                    if let Err(err) = self.complete(id, status) {
                        tracing::warn!(%err, ?id, "worker failed to report node completion");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use crate::command::{Redirect, SimpleCommand};

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
    fn independent_writes_are_both_immediately_runnable() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.submit(write_file("a"));
        scheduler.submit(write_file("b"));

        let first = scheduler.take_runnable();
        let second = scheduler.take_runnable();
        assert!(matches!(first, Runnable::Node { .. }));
        assert!(matches!(second, Runnable::Node { .. }));
    }

    #[test]
    fn write_then_read_serialises() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.submit(write_file("a"));
        scheduler.submit(read_file("a"));

        let Runnable::Node { id: first_id, .. } = scheduler.take_runnable() else {
            panic!("expected a runnable node");
        };
        scheduler.set_eof().unwrap();
        scheduler.complete(first_id, 0).unwrap();

        let Runnable::Node { .. } = scheduler.take_runnable() else {
            panic!("expected the reader to become runnable once the writer completed");
        };
    }

    #[test]
    fn eof_delivered_exactly_once_after_drain() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.submit(write_file("a"));
        let Runnable::Node { id, .. } = scheduler.take_runnable() else {
            panic!("expected a runnable node");
        };
        scheduler.set_eof().unwrap();
        scheduler.complete(id, 0).unwrap();

        assert!(matches!(scheduler.take_runnable(), Runnable::Eof));
    }

    #[test]
    fn double_eof_is_an_error() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.set_eof().unwrap();
        assert_eq!(scheduler.set_eof(), Err(ScheduleError::EofAlreadySet));
    }

    #[test]
    fn completing_an_untaken_node_is_an_error() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let id = scheduler.submit(write_file("a"));
        assert_eq!(scheduler.complete(id, 0), Err(ScheduleError::UnknownNode(id)));
    }

    #[test]
    fn double_complete_is_an_error() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.submit(write_file("a"));
        let Runnable::Node { id, .. } = scheduler.take_runnable() else {
            panic!("expected a runnable node");
        };
        scheduler.complete(id, 0).unwrap();
        assert_eq!(scheduler.complete(id, 0), Err(ScheduleError::AlreadyCompleted(id)));
    }

    struct RecordingVariableWrites {
        names: Mutex<Vec<String>>,
    }

    impl VariableWrites for RecordingVariableWrites {
        fn write_committed(&self, name: &str) {
            self.names.lock().unwrap().push(name.to_owned());
        }
    }

    #[test]
    fn variable_write_commits_invoke_the_hook() {
        let hook = Arc::new(RecordingVariableWrites {
            names: Mutex::new(Vec::new()),
        });
        let scheduler = Scheduler::with_variable_writes(
            SchedulerConfig::default(),
            Some(hook.clone() as Arc<dyn VariableWrites>),
        );
        let assign = CommandTree::Simple(SimpleCommand::new(Vec::new()).with_assign("i"));
        scheduler.submit(assign);
        let Runnable::Node { id, .. } = scheduler.take_runnable() else {
            panic!("expected a runnable node");
        };
        scheduler.complete(id, 0).unwrap();
        assert_eq!(hook.names.lock().unwrap().as_slice(), ["i"]);
    }

    #[test]
    fn worker_count_respects_explicit_override() {
        let config = SchedulerConfig { workers: Some(4) };
        assert_eq!(config.resolve_workers(), 4);
    }
}
