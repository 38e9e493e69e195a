//! Ordering guarantees of the response transport.
//!
//! Whatever subset of responses is deferred and in whatever order the
//! deferred ones complete, the peer sees them in submission order.

#![allow(clippy::unwrap_used)]

use std::io;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use proptest::prelude::*;

use hookwire_core::{
    Completer, Config, Executor, HookList, HookOutcome, HookResult, HookReturnCode, Response,
    ResponseTransport, ResponseWriter, Session,
};

#[derive(Clone, Default)]
struct Wire(Arc<Mutex<Vec<u8>>>);

impl Wire {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl ResponseWriter for Wire {
    fn write_bytes(&mut self, bytes: Bytes) -> io::Result<()> {
        self.0.lock().unwrap().extend_from_slice(&bytes);
        Ok(())
    }

    fn close(&mut self) {}
}

fn expected(count: usize) -> String {
    (0..count).map(|i| format!("250 R{i}\r\n")).collect()
}

/// Deferred markers plus a permutation giving the completion order.
fn scenario() -> impl Strategy<Value = (Vec<bool>, Vec<usize>)> {
    prop::collection::vec(any::<bool>(), 1..32).prop_flat_map(|markers| {
        let order: Vec<usize> = (0..markers.len()).collect();
        (Just(markers), Just(order).prop_shuffle())
    })
}

proptest! {
    #[test]
    fn responses_written_in_submission_order((markers, order) in scenario()) {
        let wire = Wire::default();
        let transport = ResponseTransport::new(wire.clone(), Session::new(), &Config::default());

        let mut completers: Vec<Option<Completer>> = Vec::new();
        for (i, deferred) in markers.iter().enumerate() {
            if *deferred {
                let (response, completer) = Response::deferred();
                transport.submit(response).unwrap();
                completers.push(Some(completer));
            } else {
                transport.submit(Response::line(format!("250 R{i}"))).unwrap();
                completers.push(None);
            }
        }

        for i in order {
            if let Some(completer) = completers[i].take() {
                completer.complete(Response::line(format!("250 R{i}")));
            }
        }

        prop_assert_eq!(wire.text(), expected(markers.len()));
        prop_assert_eq!(transport.pending(), 0);
    }

    #[test]
    fn completions_interleaved_with_submissions((markers, order) in scenario()) {
        let wire = Wire::default();
        let transport = ResponseTransport::new(wire.clone(), Session::new(), &Config::default());

        // Complete early entries while later ones are still being submitted.
        let mut completers: Vec<Option<Completer>> = Vec::new();
        let mut order = order.into_iter();
        for (i, deferred) in markers.iter().enumerate() {
            if *deferred {
                let (response, completer) = Response::deferred();
                transport.submit(response).unwrap();
                completers.push(Some(completer));
            } else {
                transport.submit(Response::line(format!("250 R{i}"))).unwrap();
                completers.push(None);
            }

            if let Some(next) = order.next()
                && let Some(completer) = completers.get_mut(next).and_then(Option::take)
            {
                completer.complete(Response::line(format!("250 R{next}")));
            }
        }
        for (i, slot) in completers.iter_mut().enumerate() {
            if let Some(completer) = slot.take() {
                completer.complete(Response::line(format!("250 R{i}")));
            }
        }

        prop_assert_eq!(wire.text(), expected(markers.len()));
    }
}

#[test]
fn completions_from_many_threads() {
    let wire = Wire::default();
    let transport = ResponseTransport::new(wire.clone(), Session::new(), &Config::default());

    let mut handles = Vec::new();
    for i in 0..16 {
        let (response, completer) = Response::deferred();
        transport.submit(response).unwrap();
        handles.push(std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(16 - i));
            completer.complete(Response::line(format!("250 R{i}")));
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(wire.text(), expected(16));
}

/// Holds jobs until the test runs them, in an order of its choosing.
#[derive(Default)]
struct ManualExecutor {
    jobs: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl ManualExecutor {
    fn run_reversed(&self) {
        let jobs: Vec<_> = self.jobs.lock().unwrap().drain(..).collect();
        for job in jobs.into_iter().rev() {
            job();
        }
    }
}

impl Executor for ManualExecutor {
    fn execute(&self, job: Box<dyn FnOnce() + Send>) {
        self.jobs.lock().unwrap().push(job);
    }
}

trait Deliver: Send + Sync {
    fn deliver(&self, recipient: &str) -> HookOutcome;
}

struct RejectB;

impl Deliver for RejectB {
    fn deliver(&self, recipient: &str) -> HookOutcome {
        if recipient == "b@example.com" {
            Ok(HookResult::deny())
        } else {
            Ok(HookResult::ok())
        }
    }
}

#[test]
fn fan_out_replies_in_declaration_order() {
    let wire = Wire::default();
    let transport = ResponseTransport::new(wire.clone(), Session::new(), &Config::default());
    let executor = ManualExecutor::default();
    let hook: Arc<dyn Deliver> = Arc::new(RejectB);
    let hooks = HookList::new("deliver", vec![hook]);

    let responses = hooks.fan_out_deferred(
        &executor,
        vec!["a@example.com".to_string(), "b@example.com".to_string()],
        |hook, recipient| hook.deliver(recipient),
        |recipient, result| match result.map(|r| r.code()) {
            Some(HookReturnCode::Deny) => Response::line(format!("550 <{recipient}> rejected")),
            _ => Response::line(format!("250 <{recipient}> delivered")),
        },
        |recipient| Response::line(format!("451 <{recipient}> aborted")),
    );
    for response in responses {
        transport.submit(response).unwrap();
    }
    transport.submit(Response::line("250 next")).unwrap();
    assert_eq!(wire.text(), "");

    // B's evaluation finishes first.
    executor.run_reversed();

    assert_eq!(
        wire.text(),
        "250 <a@example.com> delivered\r\n550 <b@example.com> rejected\r\n250 next\r\n"
    );
}
