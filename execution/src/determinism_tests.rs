//! Replicas executing the same block against the same state must agree byte for byte.

use crate::{
    kv,
    mocks::{config, funded, header, identity, kv_tx, remove, set},
    Memory,
};
use commonware_codec::Encode;
use commonware_runtime::{deterministic::Runner, Runner as _};
use keel_types::{Block, ChangeSet};
use tokio_util::sync::CancellationToken;

fn genesis() -> Memory {
    funded(&[(&identity("alice"), 1_000), (&identity("bob"), 1_000)])
}

fn mixed_block() -> Block<keel_types::kv::KvMsg> {
    let alice = identity("alice");
    let bob = identity("bob");
    Block::new(
        header(4),
        vec![
            kv_tx(&alice, 0, 10_000, 5, set(b"x", b"1")),
            kv_tx(&bob, 0, 10_000, 5, remove(b"nothing")),
            vec![0xff; 3],
            kv_tx(&alice, 1, 1_010, 5, set(b"y", b"22")),
            kv_tx(&bob, 1, 10_000, 5, set(b"x", b"3")),
            kv_tx(&alice, 7, 10_000, 5, set(b"z", b"4")),
        ],
        vec![set(b"epoch", b"1")],
    )
}

async fn run(block: &Block<keel_types::kv::KvMsg>, state: &Memory) -> (Vec<u8>, ChangeSet) {
    let stf = kv::stf(&config()).unwrap();
    let (response, branch) = stf
        .deliver_block(&CancellationToken::new(), block, state)
        .await
        .unwrap();
    (
        response.encode().to_vec(),
        branch.into_change_set().unwrap(),
    )
}

#[test]
fn repeated_delivery_is_identical() {
    let executor = Runner::default();
    executor.start(|_| async move {
        let block = mixed_block();
        let (first_response, first_changes) = run(&block, &genesis()).await;
        let (second_response, second_changes) = run(&block, &genesis()).await;
        assert_eq!(first_response, second_response);
        assert_eq!(first_changes, second_changes);
    });
}

#[test]
fn independent_runtimes_agree() {
    let first = Runner::default().start(|_| async move {
        let stf = kv::stf(&config()).unwrap();
        let state = genesis();
        let (response, _) = stf
            .deliver_block(&CancellationToken::new(), &mixed_block(), &state)
            .await
            .unwrap();
        response.digest()
    });
    let second = Runner::default().start(|_| async move {
        let stf = kv::stf(&config()).unwrap();
        let state = genesis();
        let (response, _) = stf
            .deliver_block(&CancellationToken::new(), &mixed_block(), &state)
            .await
            .unwrap();
        response.digest()
    });
    assert_eq!(first, second);
}

#[test]
fn transaction_order_is_observable() {
    let executor = Runner::default();
    executor.start(|_| async move {
        let block = mixed_block();
        let mut reordered = block.clone();
        reordered.txs.swap(0, 4);

        let (forward, _) = run(&block, &genesis()).await;
        let (backward, _) = run(&reordered, &genesis()).await;
        assert_ne!(forward, backward);
    });
}
