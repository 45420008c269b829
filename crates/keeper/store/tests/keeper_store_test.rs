//! integration tests for safe-keeper-store

use core::num::NonZeroUsize;

use rust_decimal::Decimal;
use safe_keeper_domain::{
    outbound::{OutboundKind, OutboundMessage},
    request::{Action, Chain, Request, RequestState, Role},
    tx::{Recipient, Transaction},
    utxo::{BitcoinOutput, UtxoKind, UtxoState},
};
use safe_keeper_store::{KeeperStore, KeeperStoreError, establish_pool};
use safe_keeper_test_utils::{
    db::setup_test_db,
    keys::{TestKey, holder, signer},
    requests::{add_key_extra, at, make_request},
};
use uuid::Uuid;

const TX_A: &str = "f04f905bb7d8e5ae1d7cd19eac8be5814380ff3fee0c4782ecb9f76dcad1e4a8";

async fn setup_store() -> KeeperStore {
    let db_url = setup_test_db().await;

    establish_pool(db_url, NonZeroUsize::MIN)
        .await
        .map(KeeperStore::new)
        .expect("failed to initialize keeper store")
}

async fn pending(store: &KeeperStore, request: Request) -> Request {
    assert!(store.write_request_if_not_exists(&request).await.unwrap());
    request
}

fn fee_output(index: u32, satoshi: u64, request_id: u128) -> BitcoinOutput {
    BitcoinOutput::builder()
        .transaction_hash(TX_A.to_string())
        .index(index)
        .address("bc1qaccountant".to_string())
        .satoshi(satoshi)
        .script(vec![0x00, 0x14])
        .sequence(u32::MAX)
        .kind(UtxoKind::Fee)
        .holder(holder().public())
        .chain(Chain::Bitcoin)
        .request_id(Uuid::from_u128(request_id))
        .created_at(at(request_id as i64))
        .build()
}

fn message(id: u128, request_id: u128) -> OutboundMessage {
    OutboundMessage::builder()
        .id(Uuid::from_u128(id))
        .request_id(Uuid::from_u128(request_id))
        .receiver(Role::Signer)
        .kind(OutboundKind::KeygenRequest)
        .payload(vec![id as u8])
        .created_at(at(0))
        .build()
}

#[tokio::test]
async fn feed_is_replayed_in_arrival_order() {
    // Arrange
    let store = setup_store().await;
    let public = holder().public();

    for id in [3, 1, 2] {
        let request = make_request(id, Action::ObserverRequestSignerKeys, &public, vec![1], at(0));
        pending(&store, request).await;
    }

    // Act
    let rewritten = make_request(3, Action::ObserverRequestSignerKeys, &public, vec![9], at(9));
    let rewritten = store.write_request_if_not_exists(&rewritten).await.unwrap();

    let first = store.read_pending_request().await.unwrap().unwrap();
    store.finish_request(first.id()).await.unwrap();
    let second = store.read_pending_request().await.unwrap().unwrap();
    store.fail_request(second.id()).await.unwrap();
    let refinished = store.finish_request(second.id()).await;

    // Assert
    assert!(!rewritten);
    assert_eq!(first.id(), Uuid::from_u128(3));
    assert_eq!(first.extra(), [1]);
    assert_eq!(second.id(), Uuid::from_u128(1));
    assert!(matches!(refinished, Err(KeeperStoreError::Invariant(_))));

    let failed = store.read_request(second.id()).await.unwrap().unwrap();
    assert_eq!(failed.state(), RequestState::Failed);

    let third = store.read_pending_request().await.unwrap().unwrap();
    assert_eq!(third.id(), Uuid::from_u128(2));
}

#[tokio::test]
async fn spare_keys_are_handed_out_oldest_first() {
    // Arrange
    let store = setup_store().await;
    let keys = [signer(), TestKey::nth(7)];

    // Act
    for (id, key) in (1..).zip(&keys) {
        let request = make_request(
            id,
            Action::SignerKeygenOutput,
            &key.public(),
            add_key_extra(Role::Signer),
            at(id as i64),
        );
        let request = pending(&store, request).await;
        assert!(store.write_key_from_request(&request, Role::Signer).await.unwrap());
    }

    let again = make_request(
        3,
        Action::SignerKeygenOutput,
        &signer().public(),
        add_key_extra(Role::Signer),
        at(3),
    );
    let again = pending(&store, again).await;
    let rewritten = store.write_key_from_request(&again, Role::Signer).await.unwrap();

    // Assert
    assert!(!rewritten);
    assert_eq!(store.count_spare_keys(Role::Signer).await.unwrap(), 2);
    assert_eq!(store.count_spare_keys(Role::Observer).await.unwrap(), 0);

    let spare = store.read_spare_key(Role::Signer).await.unwrap().unwrap();
    assert_eq!(spare.public_key(), signer().public());
    assert!(spare.is_spare());

    let request = store.read_request(Uuid::from_u128(3)).await.unwrap().unwrap();
    assert_eq!(request.state(), RequestState::Done);
}

#[tokio::test]
async fn outbound_messages_are_queued_once_in_sequence() {
    // Arrange
    let store = setup_store().await;
    let public = holder().public();
    let first = pending(
        &store,
        make_request(1, Action::ObserverRequestSignerKeys, &public, vec![2], at(1)),
    )
    .await;
    let second = pending(
        &store,
        make_request(2, Action::ObserverRequestSignerKeys, &public, vec![1], at(2)),
    )
    .await;

    // Act
    store.write_outbound_with_request(&first, &[message(10, 1), message(11, 1)]).await.unwrap();
    store.write_outbound_with_request(&second, &[message(11, 2)]).await.unwrap();

    let messages = store.list_outbound_messages(0, 10).await.unwrap();
    let after_first = store.list_outbound_messages(messages[0].seq(), 10).await.unwrap();

    // Assert
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].id(), Uuid::from_u128(10));
    assert_eq!(messages[1].id(), Uuid::from_u128(11));
    assert_eq!(messages[1].request_id(), Uuid::from_u128(1));
    assert!(messages[0].seq() < messages[1].seq());

    assert_eq!(after_first.len(), 1);
    assert_eq!(after_first[0].id(), Uuid::from_u128(11));
}

#[tokio::test]
async fn failed_writes_leave_no_partial_effects() {
    // Arrange
    let store = setup_store().await;
    let public = holder().public();

    let deposit = pending(
        &store,
        make_request(1, Action::ObserverAccountantDeposit, &public, vec![], at(1)),
    )
    .await;
    store
        .write_bitcoin_output_with_request(
            &deposit,
            &fee_output(0, 10000, 1),
            Some(Decimal::new(10000, 8)),
            None,
        )
        .await
        .unwrap();

    // Act
    let duplicate = pending(
        &store,
        make_request(2, Action::ObserverAccountantDeposit, &public, vec![], at(2)),
    )
    .await;
    let duplicated = store
        .write_bitcoin_output_with_request(
            &duplicate,
            &fee_output(0, 10000, 2),
            Some(Decimal::new(10000, 8)),
            None,
        )
        .await;

    let proposal = pending(
        &store,
        make_request(3, Action::SafeProposeTransaction, &public, vec![], at(3)),
    )
    .await;
    let transaction = Transaction::builder()
        .transaction_hash("aa".repeat(32))
        .raw_transaction(vec![0x70, 0x73, 0x62, 0x74])
        .holder(public.clone())
        .chain(Chain::Bitcoin)
        .data(vec![Recipient { amount: Decimal::new(5000, 8), receiver: "bc1qreceiver".into() }])
        .fee(Decimal::new(20000, 8))
        .request_id(proposal.id())
        .aux(())
        .build();
    let overdrawn = store
        .write_transaction_with_request(
            &proposal,
            transaction,
            &[fee_output(0, 10000, 1)],
            &[],
            &[message(20, 3)],
        )
        .await;

    // Assert
    assert!(matches!(duplicated, Err(KeeperStoreError::Invariant(_))));
    assert!(matches!(overdrawn, Err(KeeperStoreError::Invariant(_))));

    assert_eq!(store.read_accountant_balance(&public).await.unwrap(), Decimal::new(10000, 8));
    assert!(store.read_transaction(&"aa".repeat(32)).await.unwrap().is_none());
    assert!(store.list_outbound_messages(0, 10).await.unwrap().is_empty());

    let output = store.read_bitcoin_output(TX_A, 0).await.unwrap().unwrap();
    assert_eq!(output.state(), UtxoState::Unspent);
    assert_eq!(output.spent_by(), None);

    for id in [2, 3] {
        let request = store.read_request(Uuid::from_u128(id)).await.unwrap().unwrap();
        assert_eq!(request.state(), RequestState::Pending);
    }
}
