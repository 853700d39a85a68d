// SPDX-License-Identifier: Apache-2.0
//! Footprint analysis (C1): walking a parsed command tree into its read/write
//! footprint on files and shell variables, plus `continue`/`break` markers.
//!
//! This mirrors the conflict taxonomy of this codebase's own MWMR
//! independence checks (disjoint sets are independent; a write on either side
//! of a matching name conflicts; read-read never does) but over a single flat
//! list of `(mode, name)` entries rather than warp-scoped node/edge/port sets,
//! since a scheduled shell command's resources are just files and variables.

use crate::command::{redirect_names, CommandTree, Jump};
use crate::ident::ResourceName;

/// One entry in a command's footprint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FootprintEntry {
    /// The command reads `name`.
    Read(ResourceName),
    /// The command writes `name`.
    Write(ResourceName),
    /// The command is a `continue` targeting nest `N`.
    Continue(u32),
    /// The command is a `break` targeting nest `N`.
    Break(u32),
}

/// A command's complete footprint: an unordered (possibly duplicated) list
/// of entries. Deduplication is not required for correctness — only
/// independence-checking reads it, and repeated entries don't change the
/// outcome of that check.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Footprint(pub Vec<FootprintEntry>);

impl Footprint {
    /// An empty footprint.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    fn push(&mut self, entry: FootprintEntry) {
        self.0.push(entry);
    }

    pub(crate) fn extend(&mut self, other: Footprint) {
        self.0.extend(other.0);
    }

    /// Iterates the `(name, is_write)` resource accesses in this footprint,
    /// skipping `continue`/`break` markers.
    fn resource_accesses(&self) -> impl Iterator<Item = (&ResourceName, bool)> {
        self.0.iter().filter_map(|e| match e {
            FootprintEntry::Read(name) => Some((name, false)),
            FootprintEntry::Write(name) => Some((name, true)),
            FootprintEntry::Continue(_) | FootprintEntry::Break(_) => None,
        })
    }

    /// Returns the jump this footprint carries, if it is a `continue`/`break`
    /// leaf's footprint. A footprint never carries more than one.
    #[must_use]
    pub fn jump(&self) -> Option<Jump> {
        self.0.iter().find_map(|e| match *e {
            FootprintEntry::Continue(n) => Some(Jump::Continue(n)),
            FootprintEntry::Break(n) => Some(Jump::Break(n)),
            _ => None,
        })
    }
}

/// The outcome of comparing two footprints for name-based conflicts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictKind {
    /// No shared names and no jump escalation.
    None,
    /// Shared names, but every match is read/read.
    ReadOnly,
    /// At least one shared name has a write on either side, or a jump forces
    /// ordering regardless of name overlap.
    WriteCollision,
}

/// Computes the name-based conflict kind between two footprints.
///
/// Read-read matches never escalate; a single write (on either side) against
/// a matching name does. This is the footprint half of `dep_walk`'s conflict
/// check (§4.2 rule 1's first clause); the jump-escalation clause lives in
/// `graph.rs`, since it additionally needs the two nodes' nest/iteration.
#[must_use]
pub fn name_conflict(a: &Footprint, b: &Footprint) -> ConflictKind {
    let mut saw_match = false;
    for (name_a, write_a) in a.resource_accesses() {
        for (name_b, write_b) in b.resource_accesses() {
            if name_a == name_b {
                if write_a || write_b {
                    return ConflictKind::WriteCollision;
                }
                saw_match = true;
            }
        }
    }
    if saw_match {
        ConflictKind::ReadOnly
    } else {
        ConflictKind::None
    }
}

/// Walks `tree` and produces its footprint, per the construct rules in §4.1.
///
/// `nest` is the lexical loop-nesting depth the tree is evaluated at; it is
/// only consulted (and incremented) by `while`/`until` bodies and by the
/// `continue`/`break` jump-resolution rule.
#[must_use]
pub fn analyse(tree: &CommandTree, nest: u32) -> Footprint {
    match tree {
        CommandTree::Simple(cmd) => {
            let mut fp = Footprint::empty();
            if let Some(jump) = cmd.jump(nest) {
                fp.push(match jump {
                    Jump::Continue(n) => FootprintEntry::Continue(n),
                    Jump::Break(n) => FootprintEntry::Break(n),
                });
                return fp;
            }
            for (name, is_read) in redirect_names(&cmd.redirects) {
                fp.push(if is_read {
                    FootprintEntry::Read(name.clone())
                } else {
                    FootprintEntry::Write(name.clone())
                });
            }
            if let Some(var) = &cmd.assign {
                fp.push(FootprintEntry::Write(var.clone()));
            }
            fp
        }
        CommandTree::Background(inner, redirects) => {
            let mut fp = analyse(inner, nest);
            for (name, is_read) in redirect_names(redirects) {
                fp.push(if is_read {
                    FootprintEntry::Read(name.clone())
                } else {
                    FootprintEntry::Write(name.clone())
                });
            }
            fp
        }
        CommandTree::Pipeline(stages) => {
            let mut fp = Footprint::empty();
            for stage in stages {
                fp.extend(analyse(stage, nest));
            }
            fp
        }
        CommandTree::Sequence(left, right)
        | CommandTree::And(left, right)
        | CommandTree::Or(left, right) => {
            let mut fp = analyse(left, nest);
            fp.extend(analyse(right, nest));
            fp
        }
        CommandTree::Not(inner) => analyse(inner, nest),
        CommandTree::If {
            test,
            then_branch,
            else_branch,
        } => {
            let mut fp = analyse(test, nest);
            fp.extend(analyse(then_branch, nest));
            if let Some(else_branch) = else_branch {
                fp.extend(analyse(else_branch, nest));
            }
            fp
        }
        CommandTree::While { test, body } | CommandTree::Until { test, body } => {
            let mut fp = analyse(test, nest);
            fp.extend(analyse(body, nest + 1));
            fp
        }
        CommandTree::For { body, .. } => analyse(body, nest + 1),
        CommandTree::Case { arms, .. } => {
            let mut fp = Footprint::empty();
            for (_, arm) in arms {
                fp.extend(analyse(arm, nest));
            }
            fp
        }
        CommandTree::FunctionDef { body, .. } => analyse(body, nest),
        CommandTree::HereDoc { inner, .. } => analyse(inner, nest),
    }
}
