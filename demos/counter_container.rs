//! A container-backed counter: batched writes, tracked consumers, restore.
//!
//! Run with: cargo run --example counter_container

use eddy::{create_container, record, ContainerOptions, Value};

fn main() -> Result<(), eddy::StoreError> {
    let container = create_container(
        record! { "count" => 0, "label" => "clicks" },
        ContainerOptions::default(),
    )?;

    let _sub = container.subscribe(
        |change| {
            println!(
                "changed {:?}: count {} -> {}",
                change.keys,
                change.prev["count"].as_int().unwrap_or(0),
                change.next["count"].as_int().unwrap_or(0),
            );
        },
        None,
    );

    // Three writes, one notification.
    container.batch(|| {
        for n in 1..=3 {
            container.write(record! { "count" => n }).unwrap();
        }
    })?;

    // A tracked consumer only cares about keys it actually read.
    let consumer = container.register_consumer(|change| {
        println!("consumer notified about {:?}", change.keys);
    });
    container.track(&consumer, || {
        let _ = container.get("count");
    });

    container.write_sync(record! { "label" => "ignored by consumer" })?;
    container.write_sync(record! { "count" => 10 })?;

    container.restore_with(|snapshot| {
        println!("restored, count = {:?}", snapshot.get("count"));
    })?;
    assert_eq!(container.get("count"), Some(Value::Int(0)));

    Ok(())
}
