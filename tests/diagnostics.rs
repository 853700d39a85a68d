// SPDX-License-Identifier: Apache-2.0
//! Asserts the scheduler's public operations actually emit the `tracing`
//! spans §10.1 promises, using a capturing `Layer` rather than a formatting
//! subscriber — the same "install a `Layer` that records span/event names
//! into a shared buffer" shape this codebase's own translator tests use to
//! assert on diagnostics without parsing formatted log lines.
#![allow(missing_docs)]

mod common;

use std::sync::{Arc, Mutex};

use tracing::span::{Attributes, Id};
use tracing::{Metadata, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::Registry;

use common::{new_scheduler, ScriptedExecutor};
use dash_sched::{CommandTree, Redirect, ResourceName, Runnable, SimpleCommand};

#[derive(Clone, Default)]
struct SpanNameCapture {
    names: Arc<Mutex<Vec<String>>>,
}

impl SpanNameCapture {
    fn names(&self) -> Vec<String> {
        self.names.lock().unwrap().clone()
    }
}

impl<S> tracing_subscriber::Layer<S> for SpanNameCapture
where
    S: Subscriber,
{
    fn new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
        self.names.lock().unwrap().push(attrs.metadata().name().to_owned());
    }

    fn register_callsite(&self, _metadata: &'static Metadata<'static>) -> tracing::subscriber::Interest {
        tracing::subscriber::Interest::always()
    }
}

fn write_file(name: &str) -> CommandTree {
    CommandTree::Simple(
        SimpleCommand::new(vec!["cat".to_owned()])
            .with_redirects(vec![Redirect::WriteTo(ResourceName::File(name.to_owned()))]),
    )
}

/// Every public `Scheduler` operation opens its own span (§10.1); a
/// subscriber the embedding shell installs should see `submit`, a
/// `take_runnable` per dispatch, `complete`, and `set_eof` without this crate
/// ever installing a subscriber itself.
#[test]
fn public_operations_emit_their_own_spans() {
    let capture = SpanNameCapture::default();
    let subscriber = Registry::default().with(capture.clone());

    tracing::subscriber::with_default(subscriber, || {
        let scheduler = new_scheduler();
        let executor = ScriptedExecutor::new([]);

        scheduler.submit(write_file("a"));
        scheduler.set_eof().unwrap();

        let Runnable::Node { id, payload } = scheduler.take_runnable() else {
            panic!("expected a runnable node");
        };
        let status = executor.execute(&payload);
        scheduler.complete(id, status).unwrap();
        assert!(matches!(scheduler.take_runnable(), Runnable::Eof));
    });

    let names = capture.names();
    assert!(names.contains(&"submit".to_owned()), "names = {names:?}");
    assert!(names.contains(&"set_eof".to_owned()), "names = {names:?}");
    assert!(names.contains(&"complete".to_owned()), "names = {names:?}");
    assert!(
        names.iter().filter(|n| n.as_str() == "take_runnable").count() >= 2,
        "expected a take_runnable span for both the dispatched node and the EOF sentinel: {names:?}"
    );
}
