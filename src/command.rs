// SPDX-License-Identifier: Apache-2.0
//! A small, closed command-tree shape used as the scheduler's contract with
//! a parser: "hand me a tree, I'll tell you its footprint."
//!
//! This is scaffolding, not a parser. It carries no quoting, globbing,
//! command substitution, or redirection-target resolution — variable and
//! filename resolution is entirely the caller's job; by the time a
//! [`CommandTree`] reaches this crate every [`ResourceName`] is already
//! resolved.

use crate::ident::ResourceName;

/// A single redirection attached to a simple command or a wrapper.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Redirect {
    /// `< name` — the command reads from `name`.
    ReadFrom(ResourceName),
    /// `> name` — the command (over)writes `name`.
    WriteTo(ResourceName),
    /// `>> name` — the command appends to `name`.
    AppendTo(ResourceName),
}

impl Redirect {
    fn target(&self) -> &ResourceName {
        match self {
            Self::ReadFrom(name) | Self::WriteTo(name) | Self::AppendTo(name) => name,
        }
    }

    fn is_read(&self) -> bool {
        matches!(self, Self::ReadFrom(_))
    }
}

/// A simple command: a program invocation, a bare variable assignment, or
/// the `continue`/`break` control-flow builtins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimpleCommand {
    /// Argument vector, uninterpreted save for the `continue`/`break` check
    /// in [`crate::footprint::analyse`].
    pub argv: Vec<String>,
    /// Redirections attached directly to this command.
    pub redirects: Vec<Redirect>,
    /// A trailing bare assignment (`VAR=value`, no program), if this command
    /// is in fact just an assignment.
    pub assign: Option<ResourceName>,
}

impl SimpleCommand {
    /// Builds an ordinary program invocation with no redirections or
    /// trailing assignment.
    #[must_use]
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            redirects: Vec::new(),
            assign: None,
        }
    }

    /// Attaches redirections, builder-style.
    #[must_use]
    pub fn with_redirects(mut self, redirects: Vec<Redirect>) -> Self {
        self.redirects = redirects;
        self
    }

    /// Marks this command as a bare `VAR=value` assignment.
    #[must_use]
    pub fn with_assign(mut self, var: impl Into<String>) -> Self {
        self.assign = Some(ResourceName::Var(var.into()));
        self
    }

    /// Returns the effective jump target of a `continue`/`break` leaf, if
    /// this command's argument list is literally one of those builtins.
    ///
    /// `continue [N]` / `break [N]` target the nest `parent_nest - (N - 1)`,
    /// floored at 1; the default `N` is 1 (the immediately enclosing loop).
    #[must_use]
    pub fn jump(&self, parent_nest: u32) -> Option<Jump> {
        let (name, rest) = self.argv.split_first()?;
        let n: u32 = match rest.first() {
            Some(s) => s.parse().ok()?,
            None => 1,
        };
        let target = parent_nest.saturating_sub(n.saturating_sub(1)).max(1);
        match name.as_str() {
            "continue" => Some(Jump::Continue(target)),
            "break" => Some(Jump::Break(target)),
            _ => None,
        }
    }
}

/// The effective target of a `continue`/`break` leaf, already resolved to a
/// nest depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Jump {
    /// `continue N`, resolved to its target nest.
    Continue(u32),
    /// `break N`, resolved to its target nest.
    Break(u32),
}

impl Jump {
    /// The nest depth this jump targets.
    #[must_use]
    pub fn target(self) -> u32 {
        match self {
            Self::Continue(n) | Self::Break(n) => n,
        }
    }
}

/// A parsed command tree.
///
/// Only the constructs named in §4.1 are represented. Pattern-matched by the
/// footprint analyser (`footprint.rs`) and the compound-construct controller
/// (`controller.rs`); never interpreted for its own sake by this crate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandTree {
    /// A single program invocation or bare assignment.
    Simple(SimpleCommand),
    /// `inner &`, with redirections attached to the wrapper itself.
    Background(Box<CommandTree>, Vec<Redirect>),
    /// `a | b | c`, scheduled as a single unit.
    Pipeline(Vec<CommandTree>),
    /// `a ; b` — sequential composition with no conditional relationship.
    Sequence(Box<CommandTree>, Box<CommandTree>),
    /// `a && b`.
    And(Box<CommandTree>, Box<CommandTree>),
    /// `a || b`.
    Or(Box<CommandTree>, Box<CommandTree>),
    /// `! inner` — inverts the inner command's exit status.
    Not(Box<CommandTree>),
    /// `if test; then then_branch; [else else_branch]; fi`.
    If {
        /// The test to evaluate.
        test: Box<CommandTree>,
        /// Branch taken when the test exits zero.
        then_branch: Box<CommandTree>,
        /// Branch taken when the test exits non-zero, if present.
        else_branch: Option<Box<CommandTree>>,
    },
    /// `while test; do body; done`.
    While {
        /// The loop test, re-evaluated every iteration.
        test: Box<CommandTree>,
        /// The loop body.
        body: Box<CommandTree>,
    },
    /// `until test; do body; done` — the `until`/`while` sibling.
    Until {
        /// The loop test, re-evaluated every iteration.
        test: Box<CommandTree>,
        /// The loop body.
        body: Box<CommandTree>,
    },
    /// `for var in words; do body; done`.
    For {
        /// Loop variable name.
        var: String,
        /// Already-resolved word list to iterate over (no globbing here).
        words: Vec<String>,
        /// The loop body.
        body: Box<CommandTree>,
    },
    /// `case subject in pattern) arm ;; ... esac`, conservatively: every arm
    /// contributes to the footprint regardless of which one would actually
    /// match, since pattern matching is the parser's job.
    Case {
        /// The subject word.
        subject: String,
        /// `(pattern words, arm body)` pairs.
        arms: Vec<(Vec<String>, CommandTree)>,
    },
    /// `name() { body }`.
    FunctionDef {
        /// Function name.
        name: String,
        /// Function body.
        body: Box<CommandTree>,
    },
    /// `inner <<EOF ... EOF`, with the heredoc body carried as an opaque
    /// string (no here-doc expansion in this crate).
    HereDoc {
        /// The command the heredoc is attached to.
        inner: Box<CommandTree>,
        /// The literal heredoc body.
        document: String,
    },
}

impl CommandTree {
    /// Peels any number of `Not` wrappers, returning the innermost non-`Not`
    /// tree along with whether an odd number of negations were peeled.
    #[must_use]
    pub fn peel_not(&self) -> (&CommandTree, bool) {
        let mut invert = false;
        let mut cur = self;
        while let CommandTree::Not(inner) = cur {
            invert = !invert;
            cur = inner;
        }
        (cur, invert)
    }

    /// By-value variant of [`Self::peel_not`], used when taking ownership of
    /// a tree to store as a graph node's payload.
    #[must_use]
    pub fn into_peeled_not(mut self) -> (CommandTree, bool) {
        let mut invert = false;
        while let CommandTree::Not(inner) = self {
            invert = !invert;
            self = *inner;
        }
        (self, invert)
    }

    /// Returns `true` if the construct is a compound one that the controller
    /// (C4) expands rather than dispatching to the executor directly.
    #[must_use]
    pub fn is_compound(&self) -> bool {
        let (inner, _) = self.peel_not();
        matches!(
            inner,
            CommandTree::And(..)
                | CommandTree::Or(..)
                | CommandTree::If { .. }
                | CommandTree::While { .. }
                | CommandTree::Until { .. }
                | CommandTree::For { .. }
        )
    }

    /// Flattens a `;`-connected tree into an ordered list of its top-level
    /// statements, depth-first, as required by the "expansion of a command
    /// list" rule in §4.4.
    #[must_use]
    pub fn flatten_sequence(&self) -> Vec<&CommandTree> {
        let mut out = Vec::new();
        fn walk<'a>(tree: &'a CommandTree, out: &mut Vec<&'a CommandTree>) {
            if let CommandTree::Sequence(left, right) = tree {
                walk(left, out);
                walk(right, out);
            } else {
                out.push(tree);
            }
        }
        walk(self, &mut out);
        out
    }
}

pub(crate) fn redirect_names(redirects: &[Redirect]) -> impl Iterator<Item = (&ResourceName, bool)> {
    redirects.iter().map(|r| (r.target(), r.is_read()))
}
