//! Integration Tests for the Observable Engine
//!
//! These tests verify that cells, derived values, autoruns and transactions
//! work together correctly.

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use observable_core::{
    AutorunHandle, Disposable, Observable, ObservableError, Reader, Runtime, RuntimeConfig, SettableObservable,
};

fn counter() -> (Rc<Cell<usize>>, Rc<Cell<usize>>) {
    let count = Rc::new(Cell::new(0));
    (Rc::clone(&count), count)
}

/// A diamond recomputes its bottom once and never mixes old and new values.
#[test]
fn diamond_is_glitch_free() {
    let rt = Runtime::new();
    let a = rt.observable_value("a", 1);
    let left = rt.derived("left", move |r| Ok(a.read(r)? + 1));
    let right = rt.derived("right", move |r| Ok(a.read(r)? * 10));

    let (runs, inner) = counter();
    let bottom = rt.derived("bottom", move |r| {
        inner.set(inner.get() + 1);
        Ok((left.read(r)?, right.read(r)?))
    });

    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    let _watch = rt
        .autorun("watch", move |r| {
            log.borrow_mut().push(bottom.read(r)?);
            Ok(())
        })
        .unwrap();
    assert_eq!(runs.get(), 1);

    rt.transaction(|tx| a.set(tx, 2)).unwrap();

    assert_eq!(runs.get(), 2);
    assert_eq!(*seen.borrow(), vec![(2, 10), (3, 20)]);
}

/// Setting the cell to an equal value appends nothing.
#[test]
fn doubling_scenario() {
    let rt = Runtime::new();
    let a = rt.observable_value("a", 1);
    let b = rt.derived("b", move |r| Ok(a.read(r)? * 2));
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    let _run = rt
        .autorun("log", move |r| {
            sink.borrow_mut().push(b.read(r)?);
            Ok(())
        })
        .unwrap();
    assert_eq!(*log.borrow(), vec![2]);

    rt.transaction(|tx| a.set(tx, 5)).unwrap();
    assert_eq!(*log.borrow(), vec![2, 10]);

    a.set(&rt, 5).unwrap();
    assert_eq!(*log.borrow(), vec![2, 10]);
}

/// Only the outermost transaction commits.
#[test]
fn nested_transactions_commit_once() {
    let rt = Runtime::new();
    let a = rt.observable_value("a", 0);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    let _run = rt
        .autorun("log", move |r| {
            log.borrow_mut().push(a.read(r)?);
            Ok(())
        })
        .unwrap();

    rt.transaction(|tx1| {
        a.set(tx1, 2)?;
        tx1.runtime().transaction(|tx2| a.set(tx2, 3))?;
        assert!(tx1.runtime().in_transaction());
        Ok(())
    })
    .unwrap();

    assert_eq!(*seen.borrow(), vec![0, 3]);
    assert!(!rt.in_transaction());
}

/// An autorun whose derived dependency recomputes to an equal value does not
/// run.
#[test]
fn equal_derived_suppresses_autorun() {
    let rt = Runtime::new();
    let a = rt.observable_value("a", 4);
    let is_even = rt.derived("is_even", move |r| Ok(a.read(r)? % 2 == 0));
    let (runs, inner) = counter();
    let _run = rt
        .autorun("watch", move |r| {
            is_even.read(r)?;
            inner.set(inner.get() + 1);
            Ok(())
        })
        .unwrap();

    a.set(&rt, 6).unwrap();
    a.set(&rt, 8).unwrap();
    assert_eq!(runs.get(), 1);

    a.set(&rt, 9).unwrap();
    assert_eq!(runs.get(), 2);
}

/// Dependencies are replaced on every run, not accumulated.
#[test]
fn dependencies_follow_the_branch_taken() {
    let rt = Runtime::new();
    let flag = rt.observable_value("flag", true);
    let x = rt.observable_value("x", 0);
    let (runs, inner) = counter();
    let run = rt
        .autorun("branch", move |r| {
            inner.set(inner.get() + 1);
            if flag.read(r)? {
                x.read(r)?;
            }
            Ok(())
        })
        .unwrap();
    assert_eq!(rt.dependency_count(run.id()), 2);

    x.set(&rt, 1).unwrap();
    assert_eq!(runs.get(), 2);

    flag.set(&rt, false).unwrap();
    assert_eq!(runs.get(), 3);
    assert_eq!(rt.observer_count(x.id()), 0);

    x.set(&rt, 2).unwrap();
    assert_eq!(runs.get(), 3);

    flag.set(&rt, true).unwrap();
    x.set(&rt, 3).unwrap();
    assert_eq!(runs.get(), 5);
}

/// Writes to independent cells in one transaction run a shared autorun once.
#[test]
fn transaction_batches_independent_writes() {
    let rt = Runtime::new();
    let first = rt.observable_value("first", "Ada".to_string());
    let last = rt.observable_value("last", "Lovelace".to_string());
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    let _run = rt
        .autorun("full_name", move |r| {
            log.borrow_mut().push(format!("{} {}", first.read(r)?, last.read(r)?));
            Ok(())
        })
        .unwrap();

    rt.transaction(|tx| {
        first.set(tx, "Grace".to_string())?;
        last.set(tx, "Hopper".to_string())
    })
    .unwrap();

    assert_eq!(*seen.borrow(), vec!["Ada Lovelace", "Grace Hopper"]);
}

/// Reads inside a transaction see the writes made so far.
#[test]
fn reads_inside_transaction_are_consistent() {
    let rt = Runtime::new();
    let a = rt.observable_value("a", 1);
    let b = rt.derived("b", move |r| Ok(a.read(r)? * 2));
    let (runs, inner) = counter();
    let _run = rt
        .autorun("watch", move |r| {
            b.read(r)?;
            inner.set(inner.get() + 1);
            Ok(())
        })
        .unwrap();

    rt.transaction(|tx| {
        a.set(tx, 5)?;
        assert_eq!(b.get(tx.runtime())?, 10);
        assert_eq!(runs.get(), 1);
        Ok(())
    })
    .unwrap();
    assert_eq!(runs.get(), 2);
}

/// Disposing twice, or disposing something nobody reads, leaves no edges.
#[test]
fn disposal_is_idempotent() {
    let rt = Runtime::new();
    let a = rt.observable_value("a", 1);
    let d = rt.derived("d", move |r| Ok(a.read(r)? + 1));
    let (runs, inner) = counter();
    let run = rt
        .autorun("watch", move |r| {
            d.read(r)?;
            inner.set(inner.get() + 1);
            Ok(())
        })
        .unwrap();

    run.dispose();
    run.dispose();
    assert_eq!(rt.observer_count(d.id()), 0);
    assert_eq!(rt.observer_count(a.id()), 0);

    d.dispose(&rt);
    d.dispose(&rt);
    a.set(&rt, 2).unwrap();
    assert_eq!(runs.get(), 1);
    assert_eq!(rt.node_count(), 1);
}

/// An autorun disposed while the commit is underway does not run.
#[test]
fn disposal_drops_pending_runs() {
    let rt = Runtime::new();
    let a = rt.observable_value("a", 0);
    let victim: Rc<RefCell<Option<AutorunHandle>>> = Rc::new(RefCell::new(None));

    let slot = Rc::clone(&victim);
    let _killer = rt
        .autorun("killer", move |r| {
            if a.read(r)? > 0 {
                if let Some(handle) = slot.borrow_mut().take() {
                    handle.dispose();
                }
            }
            Ok(())
        })
        .unwrap();

    let (runs, inner) = counter();
    let handle = rt
        .autorun("victim", move |r| {
            a.read(r)?;
            inner.set(inner.get() + 1);
            Ok(())
        })
        .unwrap();
    *victim.borrow_mut() = Some(handle.clone());

    a.set(&rt, 1).unwrap();
    assert_eq!(runs.get(), 1);
    assert!(handle.is_disposed());
}

#[test]
fn leaked_reader_is_rejected() {
    let rt = Runtime::new();
    let a = rt.observable_value("a", 1);
    let leaked: Rc<RefCell<Option<Reader>>> = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&leaked);
    let run = rt
        .autorun("leak", move |r| {
            *slot.borrow_mut() = Some(r.clone());
            Ok(())
        })
        .unwrap();

    let reader = leaked.borrow_mut().take().unwrap();
    assert!(!reader.is_active());
    let err = a.read(&reader).unwrap_err();
    assert!(matches!(err, ObservableError::InvalidScope { owner } if owner == run.id()));
}

#[test]
fn writing_a_disposed_cell_fails() {
    let rt = Runtime::new();
    let a = rt.observable_value("a", 1);
    a.dispose(&rt);

    let err = a.set(&rt, 2).unwrap_err();
    assert!(matches!(err, ObservableError::Disposed { id } if id == a.id()));
}

/// One failing autorun does not keep the others in the commit from running,
/// and is retried on the next change.
#[test]
fn failures_are_isolated_per_autorun() {
    let rt = Runtime::new();
    let a = rt.observable_value("a", 1);

    let (failing_runs, inner) = counter();
    let _failing = rt
        .autorun("failing", move |r| {
            inner.set(inner.get() + 1);
            if a.read(r)? == 2 {
                return Err(ObservableError::failed("two is not allowed"));
            }
            Ok(())
        })
        .unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    let _healthy = rt
        .autorun("healthy", move |r| {
            log.borrow_mut().push(a.read(r)?);
            Ok(())
        })
        .unwrap();

    let err = a.set(&rt, 2).unwrap_err();
    assert_eq!(err.to_string(), "two is not allowed");
    assert_eq!(*seen.borrow(), vec![1, 2]);

    a.set(&rt, 3).unwrap();
    assert_eq!(failing_runs.get(), 3);
    assert_eq!(*seen.borrow(), vec![1, 2, 3]);
}

/// The body's error is returned but its writes still commit.
#[test]
fn failed_transaction_body_still_commits() {
    let rt = Runtime::new();
    let a = rt.observable_value("a", 1);
    let seen = Rc::new(Cell::new(0));
    let sink = Rc::clone(&seen);
    let _run = rt
        .autorun("watch", move |r| {
            sink.set(a.read(r)?);
            Ok(())
        })
        .unwrap();

    let result: Result<(), _> = rt.transaction(|tx| {
        a.set(tx, 2)?;
        Err(ObservableError::failed("aborted"))
    });

    assert!(matches!(result, Err(ObservableError::Failed { .. })));
    assert_eq!(seen.get(), 2);
}

/// A panicking equality function counts as "changed".
#[test]
fn panicking_equality_forces_propagation() {
    let rt = Runtime::new();
    let a = rt.observable_value_with_equality("a", 1, |old: &i32, new: &i32| {
        if *new == 13 {
            panic!("unlucky comparison");
        }
        old == new
    });
    let (runs, inner) = counter();
    let _run = rt
        .autorun("watch", move |r| {
            a.read(r)?;
            inner.set(inner.get() + 1);
            Ok(())
        })
        .unwrap();

    a.set(&rt, 13).unwrap();
    assert_eq!(runs.get(), 2);
    assert_eq!(a.get(&rt).unwrap(), 13);
}

/// Equality functions run with no engine state borrowed, so they may query
/// the runtime.
#[test]
fn equality_may_query_the_runtime() {
    let rt = Runtime::new();
    let seen = Rc::new(RefCell::new(Vec::new()));

    let (inspector, log) = (rt.clone(), Rc::clone(&seen));
    let a = rt.observable_value_with_equality("a", 1, move |old: &i32, new: &i32| {
        log.borrow_mut().push(("a", inspector.in_transaction()));
        old == new
    });
    let (inspector, log) = (rt.clone(), Rc::clone(&seen));
    let parity = rt.derived_with_equality(
        "parity",
        move |r| Ok(a.read(r)? % 2),
        move |old: &i32, new: &i32| {
            log.borrow_mut().push(("parity", inspector.observer_count(a.id()) > 0));
            old == new
        },
    );
    let (runs, inner) = counter();
    let _run = rt
        .autorun("watch", move |r| {
            parity.read(r)?;
            inner.set(inner.get() + 1);
            Ok(())
        })
        .unwrap();

    a.set(&rt, 3).unwrap();
    assert_eq!(*seen.borrow(), vec![("a", true), ("parity", true)]);
    assert_eq!(runs.get(), 1);
}

/// A panicking effect unwinds out of the write without leaving the runtime
/// stuck inside a transaction.
#[test]
fn panicking_autorun_does_not_wedge_the_runtime() {
    let rt = Runtime::new();
    let a = rt.observable_value("a", 0);
    let (runs, inner) = counter();
    let _run = rt
        .autorun("fragile", move |r| {
            inner.set(inner.get() + 1);
            if a.read(r)? == 1 {
                panic!("effect blew up");
            }
            Ok(())
        })
        .unwrap();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| a.set(&rt, 1)));
    assert!(outcome.is_err());
    assert!(!rt.in_transaction());
    assert!(!rt.is_evaluating());

    a.set(&rt, 2).unwrap();
    assert_eq!(runs.get(), 3);
    assert_eq!(a.get(&rt).unwrap(), 2);
}

/// Every transaction level a panic unwinds through is closed; writes made
/// before the panic commit with the next transaction.
#[test]
fn panicking_transaction_body_closes_every_level() {
    let rt = Runtime::new();
    let a = rt.observable_value("a", 0);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    let _run = rt
        .autorun("log", move |r| {
            log.borrow_mut().push(a.read(r)?);
            Ok(())
        })
        .unwrap();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        rt.transaction(|tx| {
            a.set(tx, 1)?;
            tx.runtime()
                .transaction(|_| -> Result<(), ObservableError> { panic!("body blew up") })
        })
    }));
    assert!(outcome.is_err());
    assert!(!rt.in_transaction());

    a.set(&rt, 2).unwrap();
    assert_eq!(*seen.borrow(), vec![0, 2]);
}

/// A failing derived read through several paths is evaluated once per
/// change, not once per reader.
#[test]
fn failing_derived_is_evaluated_once_per_change() {
    let rt = Runtime::new();
    let a = rt.observable_value("a", 0);
    let (evaluations, inner) = counter();
    let checked = rt.derived("checked", move |r| {
        inner.set(inner.get() + 1);
        match a.read(r)? {
            1 => Err(ObservableError::failed("one is rejected")),
            value => Ok(value),
        }
    });
    let next = rt.derived("next", move |r| Ok(checked.read(r)? + 1));
    let _first = rt.autorun("first", move |r| next.read(r).map(drop)).unwrap();
    let _second = rt.autorun("second", move |r| next.read(r).map(drop)).unwrap();
    assert_eq!(evaluations.get(), 1);

    let err = a.set(&rt, 1).unwrap_err();
    assert_eq!(err.to_string(), "one is rejected");
    assert_eq!(evaluations.get(), 2);

    // The next change retries.
    a.set(&rt, 2).unwrap();
    assert_eq!(evaluations.get(), 3);
    assert_eq!(next.get(&rt).unwrap(), 3);
}

/// Disposed nodes leave nothing behind, and their handles keep reporting
/// disposal rather than an unknown node.
#[test]
fn create_dispose_churn_leaves_no_residue() {
    let rt = Runtime::new();
    let a = rt.observable_value("a", 0);
    let baseline = rt.node_count();

    let first = rt.derived("first", move |r| a.read(r));
    first.dispose(&rt);
    for i in 0..1_000 {
        let step = rt.derived(format!("step_{i}"), move |r| Ok(a.read(r)? + 1));
        let run = rt.autorun(format!("run_{i}"), move |r| step.read(r).map(drop)).unwrap();
        run.dispose();
        step.dispose(&rt);
    }

    assert_eq!(rt.node_count(), baseline);
    assert_eq!(rt.observer_count(a.id()), 0);
    assert!(rt.is_disposed(first.id()));
    assert!(matches!(first.get(&rt), Err(ObservableError::Disposed { .. })));
    assert!(!Runtime::new().is_disposed(first.id()));
}

/// Writes issued by an autorun land as a follow-up round of the same commit.
#[test]
fn writes_from_autoruns_are_deferred() {
    let rt = Runtime::new();
    let a = rt.observable_value("a", 1);
    let b = rt.observable_value("b", 0);
    let _doubler = rt
        .autorun("doubler", move |r| {
            let value = a.read(r)?;
            b.set(r, value * 2)
        })
        .unwrap();
    assert_eq!(b.get(&rt).unwrap(), 2);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    let _recorder = rt
        .autorun("recorder", move |r| {
            log.borrow_mut().push(b.read(r)?);
            Ok(())
        })
        .unwrap();

    a.set(&rt, 5).unwrap();
    assert_eq!(*seen.borrow(), vec![2, 10]);
}

/// A read function that writes sees its write applied after it returns.
#[test]
fn writes_from_read_functions_are_deferred() {
    let rt = Runtime::new();
    let a = rt.observable_value("a", 3);
    let last_seen = rt.observable_value("last_seen", 0);
    let d = rt.derived("d", move |r| {
        let value = a.read(r)?;
        last_seen.set(r, value)?;
        Ok(value + 1)
    });

    assert_eq!(d.get(&rt).unwrap(), 4);
    assert_eq!(last_seen.get(&rt).unwrap(), 3);
}

#[test]
fn feedback_loop_fails_with_update_loop() {
    let rt = Runtime::with_config(RuntimeConfig { max_update_rounds: 5 });
    let a = rt.observable_value("a", 0);
    let before = rt.node_count();

    let err = rt
        .autorun("increment", move |r| {
            let value = a.read(r)?;
            a.set(r, value + 1)
        })
        .unwrap_err();

    assert!(matches!(err, ObservableError::UpdateLoop { rounds: 5 }));
    assert_eq!(rt.node_count(), before);

    // The runtime is usable again afterwards.
    a.set(&rt, 100).unwrap();
    assert_eq!(a.get(&rt).unwrap(), 100);
}

#[test]
fn keep_observed_keeps_derived_cached() {
    let rt = Runtime::new();
    let a = rt.observable_value("a", 2);
    let (runs, inner) = counter();
    let square = rt.derived("square", move |r| {
        inner.set(inner.get() + 1);
        Ok(a.read(r)? * a.read(r)?)
    });

    square.get(&rt).unwrap();
    square.get(&rt).unwrap();
    assert_eq!(runs.get(), 2);

    let keep = rt.keep_observed(square).unwrap();
    square.get(&rt).unwrap();
    square.get(&rt).unwrap();
    assert_eq!(runs.get(), 3);

    keep.dispose();
    assert_eq!(rt.observer_count(a.id()), 0);
}

#[test]
fn signal_reruns_autorun_on_every_trigger() {
    let rt = Runtime::new();
    let refresh = rt.observable_signal("refresh");
    let (runs, inner) = counter();
    let _run = rt
        .autorun("reload", move |r| {
            refresh.read(r)?;
            inner.set(inner.get() + 1);
            Ok(())
        })
        .unwrap();

    rt.transaction(|tx| {
        refresh.trigger(tx)?;
        refresh.trigger(tx)
    })
    .unwrap();
    assert_eq!(runs.get(), 2);
}

#[test]
fn config_from_json_drives_runtime() {
    let config = RuntimeConfig::from_json(r#"{ "max_update_rounds": 2 }"#).unwrap();
    let rt = Runtime::with_config(config);
    assert_eq!(rt.config().max_update_rounds, 2);
}
