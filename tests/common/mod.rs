// SPDX-License-Identifier: Apache-2.0
#![allow(missing_docs)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use dash_sched::{CommandTree, Executor, Runnable, Scheduler, SchedulerConfig, VariableWrites};

/// A scripted, single-threaded stand-in for the real command executor.
///
/// Each call to `execute` records the command's label (its joined argv, or
/// `assign:NAME` for a bare assignment) in source-visitation order and
/// returns whatever status was scripted for that label (`0` if none was).
pub struct ScriptedExecutor {
    statuses: HashMap<String, i32>,
    pub log: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(statuses: impl IntoIterator<Item = (&'static str, i32)>) -> Self {
        Self {
            statuses: statuses.into_iter().map(|(k, v)| (k.to_owned(), v)).collect(),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn label_of(payload: &CommandTree) -> String {
        match payload {
            CommandTree::Simple(cmd) => match &cmd.assign {
                Some(name) => format!("assign:{name}"),
                None => cmd.argv.join(" "),
            },
            other => format!("{other:?}"),
        }
    }
}

impl Executor for ScriptedExecutor {
    fn execute(&self, payload: &CommandTree) -> i32 {
        let label = Self::label_of(payload);
        let status = self.statuses.get(&label).copied().unwrap_or(0);
        self.log.lock().unwrap().push(label);
        status
    }
}

/// A scripted executor for commands whose status must vary across repeated
/// invocations of the exact same literal payload (e.g. a `while` test this
/// crate's variable-free `CommandTree` can't reparameterize per iteration).
/// Each label is scripted with a sequence of statuses, consumed one per
/// call; once exhausted, the last scripted status repeats.
pub struct SequencedExecutor {
    statuses: Mutex<HashMap<String, VecDeque<i32>>>,
    pub log: Mutex<Vec<String>>,
}

impl SequencedExecutor {
    pub fn new(statuses: impl IntoIterator<Item = (&'static str, Vec<i32>)>) -> Self {
        Self {
            statuses: Mutex::new(
                statuses
                    .into_iter()
                    .map(|(k, v)| (k.to_owned(), v.into_iter().collect()))
                    .collect(),
            ),
            log: Mutex::new(Vec::new()),
        }
    }
}

impl Executor for SequencedExecutor {
    fn execute(&self, payload: &CommandTree) -> i32 {
        let label = ScriptedExecutor::label_of(payload);
        let status = {
            let mut statuses = self.statuses.lock().unwrap();
            match statuses.get_mut(&label) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(0),
                Some(queue) => queue.front().copied().unwrap_or(0),
                None => 0,
            }
        };
        self.log.lock().unwrap().push(label);
        status
    }
}

/// Records every variable-write commit notification the scheduler reports.
#[derive(Default)]
pub struct RecordingVariableWrites {
    pub writes: Mutex<Vec<String>>,
}

impl VariableWrites for RecordingVariableWrites {
    fn write_committed(&self, name: &str) {
        self.writes.lock().unwrap().push(name.to_owned());
    }
}

/// Drains the scheduler on the calling thread: repeatedly takes the next
/// runnable node, runs it through `executor`, and reports completion, until
/// EOF is observed. Since nothing here ever blocks without a runnable item
/// already queued by a prior `submit`/`set_eof`, this never contends the
/// condvar wait path — it is a single-threaded stand-in for a real worker
/// pool, used by tests that only care about scheduling order, not actual
/// concurrency.
pub fn drain(scheduler: &Scheduler, executor: &dyn Executor) {
    loop {
        match scheduler.take_runnable() {
            Runnable::Eof => break,
            Runnable::Node { id, payload } => {
                let status = executor.execute(&payload);
                scheduler.complete(id, status).expect("complete a freshly taken node");
            }
        }
    }
}

pub fn new_scheduler() -> std::sync::Arc<Scheduler> {
    Scheduler::new(SchedulerConfig { workers: Some(1) })
}
