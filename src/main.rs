//! Two replicas diverge offline, then reconcile and converge.
//!
//! Alice and Bob each hold their own store and mutate the same document
//! without talking to each other. Alice then advertises her heads over an
//! in-memory transport; Bob pulls exactly the missing events and applies
//! them, and Alice pulls Bob's branch the same way. Both sides end up with
//! identical heads and identical materialized values.

use mcrs_core::CrdtKind;
use mcrs_db::{CollectionSchema, Database};
use mcrs_replicator::{
    MemoryTransport, PeerId, Replicator, ReplicatorConfig, StoreSource, Transport,
    TransportSource,
};
use mcrs_txn::Rootstore;
use rand::Rng;
use std::sync::Arc;
use tracing::info;

fn schema() -> CollectionSchema {
    CollectionSchema::new("players")
        .with_field("name", CrdtKind::Register)
        .with_field("points", CrdtKind::PnCounter)
}

fn field_kind(field: &str) -> CrdtKind {
    schema().kind_of(field).unwrap_or(CrdtKind::Register)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let alice_root = Rootstore::new();
    let bob_root = Rootstore::new();
    let alice = Database::with_actor(alice_root.clone(), "alice".into());
    let bob = Database::with_actor(bob_root.clone(), "bob".into());
    alice.define_collection(schema());
    bob.define_collection(schema());

    // Offline phase: both replicas edit the same document independently.
    let mut rng = rand::thread_rng();
    alice
        .set_register("players", "p1", "name", b"Arthur".to_vec())
        .unwrap();
    bob.set_register("players", "p1", "name", b"Art".to_vec())
        .unwrap();
    for _ in 0..3 {
        alice
            .increment("players", "p1", "points", rng.gen_range(1..10))
            .unwrap();
        bob.increment("players", "p1", "points", rng.gen_range(1..10))
            .unwrap();
    }
    bob.decrement("players", "p1", "points", 2).unwrap();

    info!(
        alice_points = alice.counter_value("players", "p1", "points").unwrap(),
        bob_points = bob.counter_value("players", "p1", "points").unwrap(),
        "offline divergence"
    );

    // Wire the transports and replication endpoints. Alice pushes head
    // advertisements to Bob and serves his fetch requests; Bob only
    // reconciles what he receives.
    let alice_tx = Arc::new(MemoryTransport::new(PeerId::new("alice")));
    let bob_tx = Arc::new(MemoryTransport::new(PeerId::new("bob")));
    alice_tx.connect_to(&bob_tx);
    bob_tx.connect_to(&alice_tx);

    let alice_rep = Arc::new(Replicator::new(
        alice_root.clone(),
        alice_tx.clone(),
        ReplicatorConfig::new().with_target(PeerId::new("bob")),
    ));
    let bob_rep = Replicator::new(bob_root.clone(), bob_tx.clone(), ReplicatorConfig::new());
    let mut bob_inbox = bob_tx.subscribe().unwrap();

    // Alice's serving loop answers Bob's block fetches.
    let mut alice_inbox = alice_tx.subscribe().unwrap();
    let alice_server = tokio::spawn({
        let rep = alice_rep.clone();
        let source = StoreSource::new(bob_root.clone());
        async move {
            while let Some(envelope) = alice_inbox.recv().await {
                if let Err(e) = rep.handle_message(&source, envelope).await {
                    info!(error = %e, "alice failed to handle a message");
                }
            }
        }
    });

    for instance in alice_root.instances() {
        let kind = field_kind(&instance.field);
        let heads = alice_root.heads_of(&instance);
        alice_rep.advertise(&instance, kind, &heads).await;
    }

    // Bob consumes the advertisements and pulls the causal gap over the
    // wire, one fetch request per batch of missing blocks.
    let alice_wire = TransportSource::new(bob_tx.clone(), PeerId::new("alice"));
    while let Ok(envelope) = bob_inbox.try_recv() {
        bob_rep.handle_message(&alice_wire, envelope).await.unwrap();
    }

    // Alice pulls Bob's branch through an in-process source.
    let bob_source = StoreSource::new(bob_root.clone());
    for instance in bob_root.instances() {
        let kind = field_kind(&instance.field);
        let heads = bob_root.heads_of(&instance);
        alice_rep
            .reconcile(&bob_source, &instance, kind, &heads)
            .await
            .unwrap();
    }
    alice_server.abort();

    let alice_name = alice.register_value("players", "p1", "name").unwrap();
    let bob_name = bob.register_value("players", "p1", "name").unwrap();
    let alice_points = alice.counter_value("players", "p1", "points").unwrap();
    let bob_points = bob.counter_value("players", "p1", "points").unwrap();

    println!(
        "alice: name={:?} points={}",
        alice_name.as_deref().map(String::from_utf8_lossy),
        alice_points
    );
    println!(
        "bob:   name={:?} points={}",
        bob_name.as_deref().map(String::from_utf8_lossy),
        bob_points
    );

    assert_eq!(alice_name, bob_name);
    assert_eq!(alice_points, bob_points);
    for instance in alice_root.instances() {
        assert_eq!(
            alice_root.heads_of(&instance),
            bob_root.heads_of(&instance),
            "frontiers diverge for {instance}"
        );
    }
    println!("converged.");
}
