// SPDX-License-Identifier: Apache-2.0
//! A parallel, dependency-tracked command scheduler for a POSIX-style shell.
//!
//! A parser feeds [`CommandTree`]s into a [`Scheduler`] one at a time as it
//! reads them; the scheduler runs independent commands concurrently across a
//! worker pool while keeping commands that write and read the same file or
//! shell variable in their original source order. Compound constructs
//! (`if`/`while`/`until`/`for`/`&&`/`||`) are expanded into their constituent
//! children lazily, as their tests and branches resolve, rather than being
//! dispatched as a single unit.
//!
//! The four pieces making this up, matched to their own modules:
//! - [`footprint`]: walks a [`CommandTree`] into the files/variables it reads
//!   and writes.
//! - [`graph`]: the dependency DAG — arena-indexed nodes, conflict-based edge
//!   insertion, removal cascades.
//! - [`frontier`]: the ordered, dispatchable view onto the graph plus the
//!   per-construct bookkeeping kept while a node is expanding.
//! - [`controller`]: expansion and status relay for compound constructs, and
//!   `continue`/`break` cancellation.
//!
//! This crate never installs a `tracing` subscriber itself — the embedding
//! shell owns that decision. Every public [`Scheduler`] operation is wrapped
//! in its own span so a subscriber the shell installs gets useful structure
//! for free.

mod command;
mod controller;
mod footprint;
mod frontier;
mod graph;
mod ident;
mod scheduler;

pub use command::{CommandTree, Jump, Redirect, SimpleCommand};
pub use footprint::{name_conflict, ConflictKind, Footprint, FootprintEntry};
pub use frontier::{FrontierWrapper, RunnableItem, WrapperKind};
pub use graph::{DagStore, GraphNode, NodeFlags};
pub use ident::{NodeId, ResourceName};
pub use scheduler::{Executor, Runnable, ScheduleError, Scheduler, SchedulerConfig, VariableWrites};
