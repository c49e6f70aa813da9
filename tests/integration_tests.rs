//! Integration tests for Eddy

use std::collections::BTreeSet;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use eddy::runtime::ReactiveRuntime;
use eddy::{
    batch, computed, create_container, create_signal, effect, record, ContainerOptions,
    FlushPolicy, StoreError, Value,
};

fn keys(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn burst_of_writes_coalesces_into_one_notification() {
    init_logs();
    let container =
        create_container(record! { "count" => 0 }, ContainerOptions::default()).unwrap();

    let notifications = Arc::new(Mutex::new(Vec::new()));
    let _sub = container.subscribe(
        {
            let notifications = notifications.clone();
            move |change| {
                notifications
                    .lock()
                    .unwrap()
                    .push((change.keys.clone(), change.prev.clone(), change.next.clone()));
            }
        },
        None,
    );

    container.write(record! { "count" => 1 }).unwrap();
    container.write(record! { "count" => 2 }).unwrap();
    container.write(record! { "count" => 3 }).unwrap();

    // Read-your-own-write: mid-batch reads see the latest value.
    assert_eq!(container.get("count"), Some(Value::Int(3)));
    assert!(notifications.lock().unwrap().is_empty());

    container.flush().unwrap();

    let delivered = notifications.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    let (changed, prev, next) = &delivered[0];
    assert_eq!(*changed, keys(&["count"]));
    assert_eq!(prev["count"], Value::Int(0));
    assert_eq!(next["count"], Value::Int(3));
}

#[test]
fn separate_flush_points_produce_separate_notifications() {
    let container =
        create_container(record! { "count" => 0 }, ContainerOptions::default()).unwrap();

    let rounds = Arc::new(AtomicUsize::new(0));
    let _sub = container.subscribe(
        {
            let rounds = rounds.clone();
            move |_| {
                rounds.fetch_add(1, Ordering::SeqCst);
            }
        },
        None,
    );

    container.write(record! { "count" => 1 }).unwrap();
    container.flush().unwrap();

    // A later scheduling turn writes again.
    container.write(record! { "count" => 2 }).unwrap();
    container.flush().unwrap();

    assert_eq!(rounds.load(Ordering::SeqCst), 2);
}

#[test]
fn disjoint_keys_notify_with_the_union() {
    let container = create_container(
        record! { "a" => 0, "b" => 0, "c" => 0 },
        ContainerOptions::default(),
    )
    .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let _sub = container.subscribe(
        {
            let seen = seen.clone();
            move |change| seen.lock().unwrap().push(change.keys.clone())
        },
        None,
    );

    container
        .batch(|| {
            container.write(record! { "a" => 1 }).unwrap();
            container.write(record! { "b" => 2 }).unwrap();
        })
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], keys(&["a", "b"]));
}

#[test]
fn key_filters_select_listeners() {
    let container =
        create_container(record! { "a" => 0, "b" => 0 }, ContainerOptions::default()).unwrap();

    let a_rounds = Arc::new(AtomicUsize::new(0));
    let _a_sub = container.subscribe(
        {
            let a_rounds = a_rounds.clone();
            move |_| {
                a_rounds.fetch_add(1, Ordering::SeqCst);
            }
        },
        Some(&["a"]),
    );

    container.write_sync(record! { "b" => 1 }).unwrap();
    assert_eq!(a_rounds.load(Ordering::SeqCst), 0);

    container.write_sync(record! { "a" => 1 }).unwrap();
    assert_eq!(a_rounds.load(Ordering::SeqCst), 1);
}

#[test]
fn tracked_consumers_follow_their_used_keys() {
    let container =
        create_container(record! { "a" => 0, "b" => 0 }, ContainerOptions::default()).unwrap();

    let rounds = Arc::new(AtomicUsize::new(0));
    let consumer = container.register_consumer({
        let rounds = rounds.clone();
        move |_| {
            rounds.fetch_add(1, Ordering::SeqCst);
        }
    });

    // The consumer has not tracked anything yet: interested in nothing.
    container.write_sync(record! { "a" => 1 }).unwrap();
    assert_eq!(rounds.load(Ordering::SeqCst), 0);

    container.track(&consumer, || {
        let _ = container.get("a");
    });

    container.write_sync(record! { "b" => 1 }).unwrap();
    assert_eq!(rounds.load(Ordering::SeqCst), 0);

    container.write_sync(record! { "a" => 2 }).unwrap();
    assert_eq!(rounds.load(Ordering::SeqCst), 1);

    // A later pass that reads only `b` replaces the set; `a` writes no
    // longer notify.
    container.track(&consumer, || {
        let _ = container.get("b");
    });
    container.write_sync(record! { "a" => 3 }).unwrap();
    assert_eq!(rounds.load(Ordering::SeqCst), 1);
}

#[test]
fn write_sync_callbacks_run_in_issue_order_after_listeners() {
    let container =
        create_container(record! { "count" => 0 }, ContainerOptions::default()).unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let _sub = container.subscribe(
        {
            let order = order.clone();
            move |_| order.lock().unwrap().push("listener")
        },
        None,
    );

    container
        .batch(|| {
            container
                .write_with(record! { "count" => 1 }, {
                    let order = order.clone();
                    move |_| order.lock().unwrap().push("first")
                })
                .unwrap();
            container
                .write_with(record! { "count" => 2 }, {
                    let order = order.clone();
                    move |next| {
                        // Last write wins: the batch's snapshot, not this
                        // write's intermediate state.
                        assert_eq!(next["count"], Value::Int(2));
                        order.lock().unwrap().push("second")
                    }
                })
                .unwrap();
        })
        .unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["listener", "first", "second"]);
}

#[test]
fn write_sync_flushes_even_inside_batch_scopes() {
    let container =
        create_container(record! { "count" => 0 }, ContainerOptions::default()).unwrap();

    let rounds = Arc::new(AtomicUsize::new(0));
    let _sub = container.subscribe(
        {
            let rounds = rounds.clone();
            move |_| {
                rounds.fetch_add(1, Ordering::SeqCst);
            }
        },
        None,
    );

    container
        .batch(|| {
            container.write(record! { "count" => 1 }).unwrap();
            container.write_sync(record! { "count" => 2 }).unwrap();
            assert_eq!(rounds.load(Ordering::SeqCst), 1);
            container.write(record! { "count" => 3 }).unwrap();
        })
        .unwrap();

    assert_eq!(rounds.load(Ordering::SeqCst), 2);
}

#[test]
fn writes_from_listeners_open_the_next_batch() {
    init_logs();
    let container =
        create_container(record! { "count" => 0, "echo" => 0 }, ContainerOptions::default())
            .unwrap();

    let rounds = Arc::new(Mutex::new(Vec::new()));
    let _sub = container.subscribe(
        {
            let rounds = rounds.clone();
            let container = container.clone();
            move |change| {
                rounds.lock().unwrap().push(change.keys.clone());
                if change.keys.contains("count") {
                    // Re-entrant write while this flush is running.
                    container.write(record! { "echo" => 1 }).unwrap();
                }
            }
        },
        None,
    );

    container.write_sync(record! { "count" => 1 }).unwrap();

    let rounds = rounds.lock().unwrap();
    assert_eq!(rounds.len(), 2);
    assert_eq!(rounds[0], keys(&["count"]));
    assert_eq!(rounds[1], keys(&["echo"]));
}

#[test]
fn panicking_listener_does_not_block_the_rest() {
    let container =
        create_container(record! { "count" => 0 }, ContainerOptions::default()).unwrap();

    let _bad = container.subscribe(|_| panic!("listener exploded"), None);

    let survivors = Arc::new(AtomicUsize::new(0));
    let _good = container.subscribe(
        {
            let survivors = survivors.clone();
            move |_| {
                survivors.fetch_add(1, Ordering::SeqCst);
            }
        },
        None,
    );

    let err = container.write_sync(record! { "count" => 1 }).unwrap_err();
    match err {
        StoreError::ListenerPanic { failed, total, first } => {
            assert_eq!(failed, 1);
            assert_eq!(total, 2);
            assert!(first.contains("listener exploded"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(survivors.load(Ordering::SeqCst), 1);

    // Scheduler state survives; the next flush works normally.
    drop(_bad);
    container.write_sync(record! { "count" => 2 }).unwrap();
    assert_eq!(survivors.load(Ordering::SeqCst), 2);
}

#[test]
fn non_record_arguments_are_rejected_before_any_write() {
    let err = create_container(Value::Int(1), ContainerOptions::default()).unwrap_err();
    assert!(matches!(err, StoreError::ExpectedRecord { kind: "int" }));

    let container =
        create_container(record! { "count" => 0 }, ContainerOptions::default()).unwrap();
    let err = container.write(Value::from("nope")).unwrap_err();
    assert!(matches!(err, StoreError::ExpectedRecord { kind: "string" }));
    // Nothing was recorded: flushing delivers nothing.
    let rounds = Arc::new(AtomicUsize::new(0));
    let _sub = container.subscribe(
        {
            let rounds = rounds.clone();
            move |_| {
                rounds.fetch_add(1, Ordering::SeqCst);
            }
        },
        None,
    );
    container.flush().unwrap();
    assert_eq!(rounds.load(Ordering::SeqCst), 0);
}

#[test]
fn remove_is_a_write_of_absent() {
    let container =
        create_container(record! { "count" => 0, "tmp" => 1 }, ContainerOptions::default())
            .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let _sub = container.subscribe(
        {
            let seen = seen.clone();
            move |change| seen.lock().unwrap().push(change.keys.clone())
        },
        None,
    );

    container.remove("tmp").unwrap();
    container.flush().unwrap();

    assert_eq!(container.get("tmp"), None);
    assert_eq!(*seen.lock().unwrap(), vec![keys(&["tmp"])]);
}

#[test]
fn immediate_policy_flushes_every_top_level_write() {
    let options = ContainerOptions {
        flush_policy: FlushPolicy::Immediate,
        ..ContainerOptions::default()
    };
    let container = create_container(record! { "count" => 0 }, options).unwrap();

    let rounds = Arc::new(AtomicUsize::new(0));
    let _sub = container.subscribe(
        {
            let rounds = rounds.clone();
            move |_| {
                rounds.fetch_add(1, Ordering::SeqCst);
            }
        },
        None,
    );

    container.write(record! { "count" => 1 }).unwrap();
    container.write(record! { "count" => 2 }).unwrap();
    assert_eq!(rounds.load(Ordering::SeqCst), 2);

    // Batch scopes still coalesce.
    container
        .batch(|| {
            container.write(record! { "count" => 3 }).unwrap();
            container.write(record! { "count" => 4 }).unwrap();
        })
        .unwrap();
    assert_eq!(rounds.load(Ordering::SeqCst), 3);
}

#[test]
fn restore_resets_to_the_initial_snapshot() {
    let container =
        create_container(record! { "count" => 0, "name" => "eddy" }, ContainerOptions::default())
            .unwrap();

    container.write_sync(record! { "count" => 9 }).unwrap();
    container.write_sync(record! { "extra" => true }).unwrap();

    let rounds = Arc::new(AtomicUsize::new(0));
    let _sub = container.subscribe(
        {
            let rounds = rounds.clone();
            move |_| {
                rounds.fetch_add(1, Ordering::SeqCst);
            }
        },
        None,
    );

    let restored = Arc::new(Mutex::new(None));
    container
        .restore_with({
            let restored = restored.clone();
            move |snapshot| {
                *restored.lock().unwrap() = Some(snapshot.clone());
            }
        })
        .unwrap();

    assert_eq!(rounds.load(Ordering::SeqCst), 1);
    assert_eq!(container.get("count"), Some(Value::Int(0)));
    assert_eq!(container.get("extra"), None);

    let snapshot = restored.lock().unwrap().clone().unwrap();
    assert_eq!(snapshot["count"], Value::Int(0));
    assert!(!snapshot.contains_key("extra"));
}

#[test]
fn restore_reinvokes_the_producer() {
    let calls = Arc::new(AtomicUsize::new(0));
    let init = eddy::ContainerInit::from_producer({
        let calls = calls.clone();
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            record! { "stamp" => n }
        }
    });
    let container = create_container(init, ContainerOptions::default()).unwrap();
    assert_eq!(container.get("stamp"), Some(Value::Int(0)));

    container.restore().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(container.get("stamp"), Some(Value::Int(1)));
}

#[test]
fn restore_requested_mid_flush_lands_in_the_next_batch() {
    let container =
        create_container(record! { "count" => 0 }, ContainerOptions::default()).unwrap();

    let rounds = Arc::new(AtomicUsize::new(0));
    let _sub = container.subscribe(
        {
            let rounds = rounds.clone();
            let container = container.clone();
            move |change| {
                let round = rounds.fetch_add(1, Ordering::SeqCst);
                if round == 0 {
                    assert_eq!(change.next["count"], Value::Int(5));
                    container.restore().unwrap();
                    // The running flush is untouched; the reset is queued.
                    assert_eq!(change.next["count"], Value::Int(5));
                }
            }
        },
        None,
    );

    container.write_sync(record! { "count" => 5 }).unwrap();

    assert_eq!(rounds.load(Ordering::SeqCst), 2);
    assert_eq!(container.get("count"), Some(Value::Int(0)));
}

#[test]
fn zero_to_one_consumer_transition_restores_per_policy() {
    let container =
        create_container(record! { "count" => 0 }, ContainerOptions::default()).unwrap();

    let first = container.register_consumer(|_| {});
    container.write_sync(record! { "count" => 7 }).unwrap();
    drop(first);
    assert_eq!(container.active_consumers(), 0);

    // Remount: state resets to the initial snapshot.
    let _second = container.register_consumer(|_| {});
    assert_eq!(container.get("count"), Some(Value::Int(0)));

    // With the option off, state is preserved across remounts.
    let preserved = create_container(
        record! { "count" => 0 },
        ContainerOptions {
            reset_on_zero_consumers: false,
            ..ContainerOptions::default()
        },
    )
    .unwrap();
    let first = preserved.register_consumer(|_| {});
    preserved.write_sync(record! { "count" => 7 }).unwrap();
    drop(first);
    let _second = preserved.register_consumer(|_| {});
    assert_eq!(preserved.get("count"), Some(Value::Int(7)));
}

#[test]
fn unsubscribed_listeners_miss_subsequent_flushes() {
    let container =
        create_container(record! { "count" => 0 }, ContainerOptions::default()).unwrap();

    let rounds = Arc::new(AtomicUsize::new(0));
    let sub = container.subscribe(
        {
            let rounds = rounds.clone();
            move |_| {
                rounds.fetch_add(1, Ordering::SeqCst);
            }
        },
        None,
    );

    container.write_sync(record! { "count" => 1 }).unwrap();
    assert_eq!(rounds.load(Ordering::SeqCst), 1);

    sub.unsubscribe();
    container.write_sync(record! { "count" => 2 }).unwrap();
    assert_eq!(rounds.load(Ordering::SeqCst), 1);
}

#[test]
fn signal_computed_effect_chain() {
    ReactiveRuntime::scope(|| {
        let (count, set_count) = create_signal(0);
        let double = computed(move || count.get() * 2);

        let effect_runs = Arc::new(AtomicUsize::new(0));
        let _effect = effect({
            let double = double.clone();
            let effect_runs = effect_runs.clone();
            move || {
                let _ = double.get();
                effect_runs.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(effect_runs.load(Ordering::SeqCst), 1);

        set_count.set(1);
        assert_eq!(double.get(), 2);
        assert_eq!(effect_runs.load(Ordering::SeqCst), 2);
    });
}

#[test]
fn signal_batch_settles_before_effects_observe() {
    ReactiveRuntime::scope(|| {
        let (a, set_a) = create_signal(1);
        let (b, set_b) = create_signal(1);

        let glitches = Arc::new(AtomicUsize::new(0));
        let _effect = effect({
            let glitches = glitches.clone();
            move || {
                // Invariant kept by the writer below: a == b.
                if a.get() != b.get() {
                    glitches.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        for n in 2..10 {
            batch(|| {
                set_a.set(n);
                set_b.set(n);
            });
        }
        assert_eq!(glitches.load(Ordering::SeqCst), 0);
    });
}
