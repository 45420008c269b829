//! integration tests for safe-keeper-engine

use core::{num::NonZeroUsize, time::Duration};

use std::{collections::BTreeSet, sync::Arc};

use bitcoin::Network;
use rust_decimal::Decimal;
use safe_keeper_bitcoin::{signature::message_digest, transaction::deserialize_psbt};
use safe_keeper_domain::{
    extra::{DepositExtra, ProposeAccountExtra, ProposeTransactionExtra, SignedReferenceExtra},
    outbound::OutboundKind,
    request::{Action, Chain, Request, RequestState, Role},
    safe::{Safe, SafeState},
    signature::SignatureState,
    tx::TransactionState,
    utxo::UtxoKind,
};
use safe_keeper_engine::{
    DispatchError, Dispatcher, KeeperConfig, KeeperEngine, Outcome, RetryPolicy,
    request::{GetSafeRequest, ListOutboundRequest, SubmitRequest},
    response::{GetSafeResponseDissolved, ListOutboundResponseDissolved, SubmitResponseDissolved},
};
use safe_keeper_rpc_client::ChainNetworkInfo;
use safe_keeper_store::{KeeperStore, establish_pool};
use safe_keeper_test_utils::{
    chain::MockChainRpc,
    db::{execute_sql, setup_test_db},
    keys::{accountant, holder, observer, signer},
    requests::{
        account_plan_extra, add_key_extra, at, make_paid_request, make_request,
        network_status_extra,
    },
};
use tokio::runtime::Runtime;
use uuid::Uuid;

const PRICE_ASSET: Uuid = Uuid::from_u128(0x5afe);

const HEIGHT: u64 = 782705;

const BLOCK_HASH: &str = "00000000000000000002a7c4c1e48d76c5a37902165a270156b7a8d72728a054";

const RECEIVER: &str = "bc1ql0up0wwazxt6xlj84u9fnvhnagjjetcn7h4z5xxvd0kf5xuczjgqq2aehc";

const SENDER: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";

const FUNDING: &str = "8d2b7a1c0f4e9d6b3a5c7e1f0b2d4a6c8e0f1a3b5c7d9e2f4a6b8c0d1e3f5a7b";

const TX_A: &str = "f04f905bb7d8e5ae1d7cd19eac8be5814380ff3fee0c4782ecb9f76dcad1e4a8";

const TX_B: &str = "afa34dd32333cc9d92f0deee82f8a84dfbb6db5be35bf37155189e35850d408e";

const TX_C: &str = "e2dd8f4ee81e4abf8c7f6b5c0e7d2a3c4b5a6978d0e1f2a3b4c5d6e7f8a9e282";

const TX_D: &str = "3c9e1b7f5a2d8c4e6b0a9f1d3e5c7b2a4d6f8e0c1b3a5d7f9e2c4b6a8d0f1e3c";

const NETWORK_REQUEST: u128 = 5;

const PROPOSE_REQUEST: u128 = 6;

fn config() -> KeeperConfig {
    config_for(Network::Bitcoin, &[])
}

fn config_for(network: Network, trusted_addresses: &[&str]) -> KeeperConfig {
    let rpc_retry = RetryPolicy::builder()
        .max_retries(2)
        .base_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(5))
        .build();
    let trusted_addresses: BTreeSet<String> =
        trusted_addresses.iter().map(ToString::to_string).collect();

    KeeperConfig::builder()
        .network(network)
        .timelock(Duration::from_secs(3600))
        .network_info_timeout(Duration::from_secs(600))
        .signature_timeout(Duration::from_secs(86400))
        .idle_interval(Duration::from_millis(20))
        .trusted_addresses(trusted_addresses)
        .rpc_retry(rpc_retry)
        .build()
}

async fn setup_store() -> KeeperStore {
    setup_store_at(setup_test_db().await).await
}

async fn setup_store_at(db_url: String) -> KeeperStore {
    establish_pool(db_url, NonZeroUsize::MIN)
        .await
        .map(KeeperStore::new)
        .expect("failed to initialize keeper store")
}

async fn setup_dispatcher() -> (Dispatcher, Arc<MockChainRpc>) {
    setup_dispatcher_with(config()).await
}

async fn setup_dispatcher_with(config: KeeperConfig) -> (Dispatcher, Arc<MockChainRpc>) {
    let store = setup_store().await;
    let chain = Arc::new(MockChainRpc::new());
    let dispatcher = Dispatcher::new(Arc::new(config), store, chain.clone());

    (dispatcher, chain)
}

/// Appends `request` to the feed and processes it.
async fn feed(dispatcher: &Dispatcher, request: Request) -> Outcome {
    let written = dispatcher.store().write_request_if_not_exists(&request).await.unwrap();
    assert!(written, "request {} fed twice", request.id());

    let (id, outcome) = dispatcher.step().await.unwrap().expect("request must be pending");
    assert_eq!(id, request.id());

    outcome
}

async fn request_state(dispatcher: &Dispatcher, id: u128) -> RequestState {
    dispatcher.store().read_request(Uuid::from_u128(id)).await.unwrap().unwrap().state()
}

/// Registers spare keys, an account plan and a network status, then proposes the safe of the test
/// holder.
async fn propose_safe(dispatcher: &Dispatcher) -> Safe {
    let keys = [
        (1, Action::SignerKeygenOutput, signer().public(), Role::Signer),
        (2, Action::ObserverAddKey, observer().public(), Role::Observer),
        (3, Action::ObserverAddKey, accountant().public(), Role::Accountant),
    ];
    for (id, action, public, role) in keys {
        let request = make_request(id, action, &public, add_key_extra(role), at(id as i64));
        assert_eq!(feed(dispatcher, request).await, Outcome::Committed);
    }

    let plan = make_request(
        4,
        Action::ObserverSetAccountPlan,
        &observer().public(),
        account_plan_extra(PRICE_ASSET, 100_000_000, 10_000),
        at(4),
    );
    assert_eq!(feed(dispatcher, plan).await, Outcome::Committed);

    let network = make_request(
        NETWORK_REQUEST,
        Action::ObserverUpdateNetworkStatus,
        &observer().public(),
        network_status_extra(10, HEIGHT, BLOCK_HASH),
        at(100),
    );
    assert_eq!(feed(dispatcher, network).await, Outcome::Committed);

    let extra = ProposeAccountExtra { threshold: 1, receivers: vec![Uuid::from_u128(0xbeef)] };
    let propose = make_paid_request(
        PROPOSE_REQUEST,
        Action::SafeProposeAccount,
        &holder().public(),
        extra.encode().unwrap(),
        PRICE_ASSET,
        Decimal::ONE,
        at(110),
    );
    assert_eq!(feed(dispatcher, propose).await, Outcome::Committed);

    dispatcher.store().read_safe(&holder().public()).await.unwrap().unwrap()
}

fn approve_safe(safe: &Safe) -> Request {
    let extra = SignedReferenceExtra {
        request_id: Uuid::from_u128(PROPOSE_REQUEST),
        signature: holder().sign(&message_digest(safe.address())),
    };

    make_request(7, Action::SafeApproveAccount, &holder().public(), extra.encode(), at(120))
}

/// Opens and approves the safe of the test holder.
async fn setup_safe(dispatcher: &Dispatcher) -> Safe {
    let safe = propose_safe(dispatcher).await;
    assert_eq!(feed(dispatcher, approve_safe(&safe)).await, Outcome::Committed);

    dispatcher.store().read_safe(&holder().public()).await.unwrap().unwrap()
}

fn deposit(
    id: u128,
    action: Action,
    hash: &str,
    index: u64,
    satoshi: u64,
    created_at: i64,
) -> Request {
    let extra = DepositExtra {
        chain: Chain::Bitcoin,
        asset_id: Chain::Bitcoin.asset_id(),
        hash: hash.to_string(),
        index,
        amount: satoshi,
    };

    make_request(id, action, &holder().public(), extra.encode(), at(created_at))
}

/// Registers the deposit transactions of [`fund_safe`] with the chain node.
fn register_deposits(chain: &MockChainRpc, safe: &Safe) {
    chain.add_transaction(TX_A, &[(FUNDING, 0)], HEIGHT, SENDER);
    chain.add_output(TX_A, 1, safe.address(), 15060);
    chain.add_output(TX_A, 2, safe.accountant_address(), 21720);

    chain.add_transaction(TX_B, &[(FUNDING, 1)], HEIGHT, SENDER);
    chain.add_output(TX_B, 0, safe.address(), 10000);

    chain.add_transaction(TX_C, &[(FUNDING, 2)], HEIGHT, SENDER);
    chain.add_output(TX_C, 0, safe.accountant_address(), 10000);
}

/// Deposits 25060 satoshi into the safe and 31720 satoshi into its accountant.
async fn fund_safe(dispatcher: &Dispatcher, chain: &MockChainRpc, safe: &Safe) {
    register_deposits(chain, safe);

    let deposits = [
        deposit(10, Action::ObserverAccountantDeposit, TX_A, 2, 21720, 200),
        deposit(11, Action::ObserverAccountantDeposit, TX_C, 0, 10000, 201),
        deposit(12, Action::ObserverHolderDeposit, TX_A, 1, 15060, 202),
        deposit(13, Action::ObserverHolderDeposit, TX_B, 0, 10000, 203),
    ];
    for request in deposits {
        assert_eq!(feed(dispatcher, request).await, Outcome::Committed);
    }
}

fn propose_transaction(id: u128, satoshi: i64, created_at: i64) -> Request {
    let extra = ProposeTransactionExtra {
        network_info_id: Uuid::from_u128(NETWORK_REQUEST),
        receiver: RECEIVER.to_string(),
    };

    make_paid_request(
        id,
        Action::SafeProposeTransaction,
        &holder().public(),
        extra.encode(),
        Chain::Bitcoin.asset_id(),
        Decimal::new(satoshi, 8),
        at(created_at),
    )
}

#[tokio::test]
async fn safe_is_proposed_and_approved_with_the_holder_signature() {
    // Arrange
    let (dispatcher, _) = setup_dispatcher().await;

    // Act
    let safe = setup_safe(&dispatcher).await;

    // Assert
    assert_eq!(safe.state(), SafeState::Approved);
    assert_eq!(safe.signer(), signer().public());
    assert_eq!(safe.observer(), observer().public());
    assert_eq!(safe.accountant(), accountant().public());
    assert!(safe.address().starts_with("bc1q"));

    let store = dispatcher.store();
    assert_eq!(store.count_spare_keys(Role::Signer).await.unwrap(), 0);
    assert!(store.is_safe_address(safe.address()).await.unwrap());

    let notifications: Vec<_> = store
        .list_outbound_messages(0, 100)
        .await
        .unwrap()
        .into_iter()
        .filter(|message| message.kind() == OutboundKind::ObserverNotification)
        .collect();
    assert_eq!(notifications.len(), 2);
    assert_eq!(notifications[1].request_id(), Uuid::from_u128(7));
}

#[tokio::test]
async fn safe_proposal_without_payment_is_rejected() {
    // Arrange
    let (dispatcher, _) = setup_dispatcher().await;
    let _ = setup_safe(&dispatcher).await;

    let extra = ProposeAccountExtra { threshold: 1, receivers: vec![Uuid::from_u128(0xbeef)] };
    let unpaid = make_paid_request(
        8,
        Action::SafeProposeAccount,
        &signer().public(),
        extra.encode().unwrap(),
        PRICE_ASSET,
        Decimal::new(5, 1),
        at(130),
    );

    // Act
    let outcome = feed(&dispatcher, unpaid).await;

    // Assert
    assert!(matches!(outcome, Outcome::Rejected(_)));
    assert_eq!(request_state(&dispatcher, 8).await, RequestState::Failed);
    assert!(dispatcher.store().read_safe(&signer().public()).await.unwrap().is_none());
}

#[tokio::test]
async fn approval_halts_when_the_safe_derives_to_another_address() {
    // Arrange
    let (dispatcher, chain) = setup_dispatcher().await;
    let safe = propose_safe(&dispatcher).await;
    let testnet = Dispatcher::new(
        Arc::new(config_for(Network::Testnet, &[])),
        dispatcher.store().clone(),
        chain,
    );
    testnet.store().write_request_if_not_exists(&approve_safe(&safe)).await.unwrap();

    // Act
    let err = testnet.step().await.unwrap_err();

    // Assert
    assert!(matches!(err, DispatchError::Invariant(_)));
    assert!(err.is_fatal());
    assert_eq!(request_state(&dispatcher, 7).await, RequestState::Pending);

    let proposed = dispatcher.store().read_safe(&holder().public()).await.unwrap().unwrap();
    assert_eq!(proposed.state(), SafeState::Proposed);
}

#[tokio::test]
async fn deposits_credit_the_accountant_and_bond_the_holder() {
    // Arrange
    let (dispatcher, chain) = setup_dispatcher().await;
    let safe = setup_safe(&dispatcher).await;

    // Act
    fund_safe(&dispatcher, &chain, &safe).await;

    // Assert
    let store = dispatcher.store();
    assert_eq!(store.read_accountant_balance(safe.holder()).await.unwrap(), Decimal::new(31720, 8));

    let mains = store.list_unspent_outputs(safe.holder(), UtxoKind::Main).await.unwrap();
    let fees = store.list_unspent_outputs(safe.holder(), UtxoKind::Fee).await.unwrap();
    assert_eq!(mains.iter().map(|utxo| utxo.satoshi()).sum::<u64>(), 25060);
    assert_eq!(fees.iter().map(|utxo| utxo.satoshi()).sum::<u64>(), 31720);

    let transfers = store
        .list_outbound_messages(0, 100)
        .await
        .unwrap()
        .into_iter()
        .filter(|message| message.kind() == OutboundKind::Transfer)
        .count();
    assert_eq!(transfers, 2);
}

#[tokio::test]
async fn duplicate_and_mismatched_deposits_are_handled() {
    // Arrange
    let (dispatcher, chain) = setup_dispatcher().await;
    let safe = setup_safe(&dispatcher).await;
    fund_safe(&dispatcher, &chain, &safe).await;

    // Act
    let duplicate =
        feed(&dispatcher, deposit(20, Action::ObserverHolderDeposit, TX_B, 0, 10000, 210)).await;
    let unknown =
        feed(&dispatcher, deposit(21, Action::ObserverHolderDeposit, TX_B, 7, 10000, 211)).await;

    chain.add_transaction(TX_D, &[(FUNDING, 3)], HEIGHT, SENDER);
    chain.add_output(TX_D, 0, safe.accountant_address(), 20000);
    let malicious = deposit(22, Action::ObserverHolderDeposit, TX_D, 0, 20000, 212);
    dispatcher.store().write_request_if_not_exists(&malicious).await.unwrap();
    let err = dispatcher.step().await.unwrap_err();

    // Assert
    assert!(matches!(duplicate, Outcome::Rejected(_)));
    assert!(matches!(unknown, Outcome::Rejected(_)));
    assert!(matches!(err, DispatchError::Invariant(_)));
    assert!(err.is_fatal());
    assert_eq!(request_state(&dispatcher, 22).await, RequestState::Pending);
}

#[tokio::test]
async fn unconfirmed_deposit_blocks_the_feed_until_it_confirms() {
    // Arrange
    let (dispatcher, chain) = setup_dispatcher().await;
    let safe = setup_safe(&dispatcher).await;

    chain.add_transaction(TX_B, &[(FUNDING, 1)], HEIGHT + 1, SENDER);
    chain.add_output(TX_B, 0, safe.address(), 10000);

    let pending = deposit(10, Action::ObserverHolderDeposit, TX_B, 0, 10000, 200);
    let next = deposit(11, Action::ObserverHolderDeposit, TX_B, 0, 10000, 201);
    dispatcher.store().write_request_if_not_exists(&pending).await.unwrap();
    dispatcher.store().write_request_if_not_exists(&next).await.unwrap();

    // Act
    let first = dispatcher.step().await.unwrap();
    let second = dispatcher.step().await.unwrap();

    // Assert
    assert!(matches!(first, Some((id, Outcome::Abstained(_))) if id == pending.id()));
    assert!(matches!(second, Some((id, Outcome::Abstained(_))) if id == pending.id()));
    assert_eq!(request_state(&dispatcher, 10).await, RequestState::Pending);
    assert_eq!(request_state(&dispatcher, 11).await, RequestState::Pending);
}

#[tokio::test]
async fn transient_chain_failures_are_retried() {
    // Arrange
    let (dispatcher, chain) = setup_dispatcher().await;
    let safe = setup_safe(&dispatcher).await;
    register_deposits(&chain, &safe);

    // Act
    chain.fail_next(2);
    let recovered =
        feed(&dispatcher, deposit(10, Action::ObserverHolderDeposit, TX_B, 0, 10000, 200)).await;

    chain.fail_next(10);
    let unavailable = deposit(11, Action::ObserverHolderDeposit, TX_A, 1, 15060, 201);
    dispatcher.store().write_request_if_not_exists(&unavailable).await.unwrap();
    let err = dispatcher.step().await.unwrap_err();

    // Assert
    assert_eq!(recovered, Outcome::Committed);
    assert!(matches!(err, DispatchError::Transient(_)));
    assert!(!err.is_fatal());
    assert_eq!(request_state(&dispatcher, 11).await, RequestState::Pending);
}

#[tokio::test]
async fn out_of_range_values_are_rejected_without_halting() {
    // Arrange
    let (dispatcher, chain) = setup_dispatcher().await;
    let safe = setup_safe(&dispatcher).await;
    register_deposits(&chain, &safe);

    let network = make_request(
        9,
        Action::ObserverUpdateNetworkStatus,
        &observer().public(),
        network_status_extra(1 << 63, HEIGHT, BLOCK_HASH),
        at(150),
    );

    // Act
    let fee_rate = feed(&dispatcher, network).await;
    let index = feed(
        &dispatcher,
        deposit(10, Action::ObserverHolderDeposit, TX_B, 0x8000_0000, 10000, 200),
    )
    .await;
    let wide_index = feed(
        &dispatcher,
        deposit(11, Action::ObserverHolderDeposit, TX_B, u64::from(u32::MAX) + 1, 10000, 201),
    )
    .await;
    let valid =
        feed(&dispatcher, deposit(12, Action::ObserverHolderDeposit, TX_B, 0, 10000, 202)).await;

    // Assert
    assert!(matches!(fee_rate, Outcome::Rejected(_)));
    assert!(matches!(index, Outcome::Rejected(_)));
    assert!(matches!(wide_index, Outcome::Rejected(_)));
    assert_eq!(valid, Outcome::Committed);
    for id in [9, 10, 11] {
        assert_eq!(request_state(&dispatcher, id).await, RequestState::Failed);
    }

    let info = dispatcher.store().read_latest_network_info(Chain::Bitcoin).await.unwrap();
    assert_eq!(info.unwrap().request_id(), Uuid::from_u128(NETWORK_REQUEST));
}

#[tokio::test]
async fn change_of_a_withdrawal_skips_the_minimum_credit_and_bond() {
    // Arrange
    let (dispatcher, chain) = setup_dispatcher().await;
    let safe = setup_safe(&dispatcher).await;
    fund_safe(&dispatcher, &chain, &safe).await;
    assert_eq!(feed(&dispatcher, propose_transaction(30, 12300, 300)).await, Outcome::Committed);

    let plan = make_request(
        31,
        Action::ObserverSetAccountPlan,
        &observer().public(),
        account_plan_extra(PRICE_ASSET, 100_000_000, 50_000_000),
        at(305),
    );
    assert_eq!(feed(&dispatcher, plan).await, Outcome::Committed);

    let store = dispatcher.store();
    let withdrawal = store.read_transaction_by_request_id(Uuid::from_u128(30)).await.unwrap();
    let withdrawal = withdrawal.expect("transaction must be proposed");
    let hash = withdrawal.transaction_hash();

    let psbt = deserialize_psbt(withdrawal.raw_transaction()).unwrap();
    let spent: Vec<_> = psbt
        .unsigned_tx
        .input
        .iter()
        .map(|input| (input.previous_output.txid.to_string(), input.previous_output.vout))
        .collect();
    let spent: Vec<_> = spent.iter().map(|(txid, vout)| (txid.as_str(), *vout)).collect();
    chain.add_transaction(hash, &spent, HEIGHT, SENDER);
    chain.add_output(hash, 1, safe.address(), 12760);
    chain.add_output(hash, 2, safe.accountant_address(), 27500);

    chain.add_transaction(TX_D, &[(FUNDING, 3)], HEIGHT, SENDER);
    chain.add_output(TX_D, 0, safe.address(), 10000);

    // Act
    let main_change =
        feed(&dispatcher, deposit(32, Action::ObserverHolderDeposit, hash, 1, 12760, 310)).await;
    let fee_change =
        feed(&dispatcher, deposit(33, Action::ObserverAccountantDeposit, hash, 2, 27500, 311))
            .await;
    let small =
        feed(&dispatcher, deposit(34, Action::ObserverHolderDeposit, TX_D, 0, 10000, 312)).await;

    // Assert
    assert_eq!(main_change, Outcome::Committed);
    assert_eq!(fee_change, Outcome::Committed);
    assert!(matches!(small, Outcome::Rejected(_)));

    assert_eq!(store.read_accountant_balance(safe.holder()).await.unwrap(), Decimal::new(27500, 8));

    let mains = store.list_unspent_outputs(safe.holder(), UtxoKind::Main).await.unwrap();
    let fees = store.list_unspent_outputs(safe.holder(), UtxoKind::Fee).await.unwrap();
    assert_eq!(mains.iter().map(|utxo| utxo.satoshi()).collect::<Vec<_>>(), vec![12760]);
    assert_eq!(fees.iter().map(|utxo| utxo.satoshi()).collect::<Vec<_>>(), vec![27500]);

    let transfers = store
        .list_outbound_messages(0, 100)
        .await
        .unwrap()
        .into_iter()
        .filter(|message| message.kind() == OutboundKind::Transfer)
        .count();
    assert_eq!(transfers, 2);
}

#[tokio::test]
async fn deposits_from_safes_and_trusted_senders_need_no_confirmations() {
    // Arrange
    let (dispatcher, chain) = setup_dispatcher_with(config_for(Network::Bitcoin, &[SENDER])).await;
    let safe = setup_safe(&dispatcher).await;

    chain.add_transaction(TX_B, &[(FUNDING, 1)], HEIGHT + 1, safe.address());
    chain.add_output(TX_B, 0, safe.address(), 10000);

    chain.add_transaction(TX_C, &[(FUNDING, 2)], HEIGHT + 1, SENDER);
    chain.add_output(TX_C, 0, safe.accountant_address(), 10000);

    // Act
    let from_safe =
        feed(&dispatcher, deposit(10, Action::ObserverHolderDeposit, TX_B, 0, 10000, 200)).await;
    let from_trusted =
        feed(&dispatcher, deposit(11, Action::ObserverAccountantDeposit, TX_C, 0, 10000, 201))
            .await;

    // Assert
    assert_eq!(from_safe, Outcome::Committed);
    assert_eq!(from_trusted, Outcome::Committed);
    assert_eq!(request_state(&dispatcher, 10).await, RequestState::Done);
    assert_eq!(request_state(&dispatcher, 11).await, RequestState::Done);
}

#[tokio::test]
async fn coinbase_deposit_waits_for_a_hundred_confirmations() {
    // Arrange
    let (dispatcher, chain) = setup_dispatcher().await;
    let safe = setup_safe(&dispatcher).await;

    chain.add_coinbase_transaction(TX_A, HEIGHT - 99);
    chain.add_output(TX_A, 1, safe.address(), 15060);

    chain.add_coinbase_transaction(TX_B, HEIGHT - 98);
    chain.add_output(TX_B, 0, safe.address(), 10000);

    // Act
    let mature =
        feed(&dispatcher, deposit(10, Action::ObserverHolderDeposit, TX_A, 1, 15060, 200)).await;
    let immature =
        feed(&dispatcher, deposit(11, Action::ObserverHolderDeposit, TX_B, 0, 10000, 201)).await;

    // Assert
    assert_eq!(mature, Outcome::Committed);
    assert!(matches!(immature, Outcome::Abstained(_)));
    assert_eq!(request_state(&dispatcher, 11).await, RequestState::Pending);

    let mains = dispatcher.store().list_unspent_outputs(safe.holder(), UtxoKind::Main).await;
    assert_eq!(mains.unwrap().iter().map(|utxo| utxo.satoshi()).collect::<Vec<_>>(), vec![15060]);
}

#[tokio::test]
async fn withdrawal_is_proposed_revoked_and_signed() {
    // Arrange
    let (dispatcher, chain) = setup_dispatcher().await;
    let safe = setup_safe(&dispatcher).await;
    fund_safe(&dispatcher, &chain, &safe).await;
    let store = dispatcher.store();

    // Act & Assert: proposal
    assert_eq!(feed(&dispatcher, propose_transaction(30, 12300, 300)).await, Outcome::Committed);

    let proposed = store.read_transaction_by_request_id(Uuid::from_u128(30)).await.unwrap();
    let proposed = proposed.expect("transaction must be proposed");
    assert_eq!(proposed.state(), TransactionState::Initial);
    assert_eq!(proposed.fee(), Decimal::new(4220, 8));
    assert_eq!(store.read_accountant_balance(safe.holder()).await.unwrap(), Decimal::new(27500, 8));

    let psbt = deserialize_psbt(proposed.raw_transaction()).unwrap();
    let values: Vec<_> = psbt.unsigned_tx.output.iter().map(|out| out.value.to_sat()).collect();
    assert_eq!(values, vec![12300, 12760, 27500, 0]);
    assert_eq!(psbt.unsigned_tx.input.len(), 4);
    assert!(store.list_unspent_outputs(safe.holder(), UtxoKind::Main).await.unwrap().is_empty());

    // Act & Assert: revocation
    let extra = SignedReferenceExtra {
        request_id: Uuid::from_u128(30),
        signature: holder().sign(&message_digest(proposed.transaction_hash())),
    };
    let revoke = make_request(
        31,
        Action::SafeRevokeTransaction,
        &holder().public(),
        extra.encode(),
        at(310),
    );
    assert_eq!(feed(&dispatcher, revoke).await, Outcome::Committed);

    let revoked = store.read_transaction(proposed.transaction_hash()).await.unwrap().unwrap();
    assert_eq!(revoked.state(), TransactionState::Failed);
    assert_eq!(store.read_accountant_balance(safe.holder()).await.unwrap(), Decimal::new(31720, 8));
    assert_eq!(store.list_unspent_outputs(safe.holder(), UtxoKind::Main).await.unwrap().len(), 2);

    // Act & Assert: proposal again, then the signer quorum answers
    assert_eq!(feed(&dispatcher, propose_transaction(32, 12300, 320)).await, Outcome::Committed);

    let transaction = store.read_transaction_by_request_id(Uuid::from_u128(32)).await.unwrap();
    let transaction = transaction.expect("transaction must be proposed");
    assert_ne!(transaction.transaction_hash(), proposed.transaction_hash());

    let signature_requests =
        store.list_signature_requests(transaction.transaction_hash()).await.unwrap();
    assert_eq!(signature_requests.len(), 2);

    let queued = store
        .list_outbound_messages(0, 100)
        .await
        .unwrap()
        .into_iter()
        .filter(|message| {
            message.kind() == OutboundKind::SignatureRequest
                && message.request_id() == Uuid::from_u128(32)
        })
        .count();
    assert_eq!(queued, 2);

    let expected = [TransactionState::Pending, TransactionState::Done];
    for (offset, (signature_request, state)) in signature_requests.iter().zip(expected).enumerate()
    {
        let response = make_request(
            signature_request.id().as_u128(),
            Action::SignerSignOutput,
            &signer().public(),
            signer().sign(signature_request.message()),
            at(330 + offset as i64),
        );
        assert_eq!(feed(&dispatcher, response).await, Outcome::Committed);

        let signed = store.read_transaction(transaction.transaction_hash()).await.unwrap();
        assert_eq!(signed.unwrap().state(), state);
    }

    let signature_requests =
        store.list_signature_requests(transaction.transaction_hash()).await.unwrap();
    assert!(signature_requests.iter().all(|sr| sr.state() == SignatureState::Done));
    assert!(store.list_unspent_outputs(safe.holder(), UtxoKind::Fee).await.unwrap().is_empty());

    let spent = store.list_outputs_spent_by(transaction.transaction_hash()).await.unwrap();
    assert_eq!(spent.len(), 4);
}

#[tokio::test]
async fn withdrawal_checks_network_info_and_signers() {
    // Arrange
    let (dispatcher, chain) = setup_dispatcher().await;
    let safe = setup_safe(&dispatcher).await;
    fund_safe(&dispatcher, &chain, &safe).await;

    // Act & Assert: the network status from t=100 expires after ten minutes
    let stale = feed(&dispatcher, propose_transaction(30, 12300, 701)).await;
    assert!(matches!(stale, Outcome::Rejected(_)));

    let dust = feed(&dispatcher, propose_transaction(31, 500, 300)).await;
    assert!(matches!(dust, Outcome::Rejected(_)));

    assert_eq!(feed(&dispatcher, propose_transaction(32, 12300, 310)).await, Outcome::Committed);
    let transaction =
        dispatcher.store().read_transaction_by_request_id(Uuid::from_u128(32)).await.unwrap();
    let transaction = transaction.expect("transaction must be proposed");
    let signature_requests =
        dispatcher.store().list_signature_requests(transaction.transaction_hash()).await.unwrap();

    // Act & Assert: the observer cannot answer a signature request
    let forged = make_request(
        signature_requests[0].id().as_u128(),
        Action::SignerSignOutput,
        &observer().public(),
        observer().sign(signature_requests[0].message()),
        at(320),
    );
    assert!(matches!(feed(&dispatcher, forged).await, Outcome::Rejected(_)));

    let signed =
        dispatcher.store().read_transaction(transaction.transaction_hash()).await.unwrap();
    assert_eq!(signed.unwrap().state(), TransactionState::Initial);
}

#[tokio::test]
async fn withdrawal_with_an_overflowing_fee_is_rejected() {
    // Arrange
    let (dispatcher, chain) = setup_dispatcher().await;
    let safe = setup_safe(&dispatcher).await;
    fund_safe(&dispatcher, &chain, &safe).await;

    let network = make_request(
        20,
        Action::ObserverUpdateNetworkStatus,
        &observer().public(),
        network_status_extra(i64::MAX as u64, HEIGHT, BLOCK_HASH),
        at(250),
    );
    assert_eq!(feed(&dispatcher, network).await, Outcome::Committed);

    let extra = ProposeTransactionExtra {
        network_info_id: Uuid::from_u128(20),
        receiver: RECEIVER.to_string(),
    };
    let propose = make_paid_request(
        30,
        Action::SafeProposeTransaction,
        &holder().public(),
        extra.encode(),
        Chain::Bitcoin.asset_id(),
        Decimal::new(12300, 8),
        at(300),
    );

    // Act
    let outcome = feed(&dispatcher, propose).await;

    // Assert
    assert!(matches!(outcome, Outcome::Rejected(_)));
    assert_eq!(request_state(&dispatcher, 30).await, RequestState::Failed);

    let store = dispatcher.store();
    assert!(store.read_transaction_by_request_id(Uuid::from_u128(30)).await.unwrap().is_none());
    assert_eq!(store.list_unspent_outputs(safe.holder(), UtxoKind::Main).await.unwrap().len(), 2);
}

#[tokio::test]
async fn signature_halts_when_the_stored_digest_differs_from_the_input() {
    // Arrange
    let db_url = setup_test_db().await;
    let store = setup_store_at(db_url.clone()).await;
    let chain = Arc::new(MockChainRpc::new());
    let dispatcher = Dispatcher::new(Arc::new(config()), store, chain.clone());

    let safe = setup_safe(&dispatcher).await;
    fund_safe(&dispatcher, &chain, &safe).await;
    assert_eq!(feed(&dispatcher, propose_transaction(30, 12300, 300)).await, Outcome::Committed);

    let transaction =
        dispatcher.store().read_transaction_by_request_id(Uuid::from_u128(30)).await.unwrap();
    let transaction = transaction.expect("transaction must be proposed");
    let signature_requests =
        dispatcher.store().list_signature_requests(transaction.transaction_hash()).await.unwrap();
    let signature_request = &signature_requests[0];

    let updated = execute_sql(
        &db_url,
        &format!(
            "UPDATE signature_requests SET message = decode(repeat('00', 32), 'hex') \
             WHERE id = '{}'",
            signature_request.id()
        ),
    );
    assert_eq!(updated, 1);

    let response = make_request(
        signature_request.id().as_u128(),
        Action::SignerSignOutput,
        &signer().public(),
        signer().sign(signature_request.message()),
        at(310),
    );
    dispatcher.store().write_request_if_not_exists(&response).await.unwrap();

    // Act
    let err = dispatcher.step().await.unwrap_err();

    // Assert
    assert!(matches!(err, DispatchError::Invariant(_)));
    assert!(err.is_fatal());
    let state = request_state(&dispatcher, signature_request.id().as_u128()).await;
    assert_eq!(state, RequestState::Pending);

    let unsigned =
        dispatcher.store().read_transaction(transaction.transaction_hash()).await.unwrap();
    assert_eq!(unsigned.unwrap().state(), TransactionState::Initial);
}

#[tokio::test]
async fn keeper_engine_accepts_requests_until_stopped() {
    // Arrange
    let store = setup_store().await;
    let chain = Arc::new(MockChainRpc::new());
    chain.set_network_info(ChainNetworkInfo {
        height: HEIGHT,
        fee_rate: 10,
        hash: BLOCK_HASH.to_string(),
        timestamp: at(0),
    });

    let engine = KeeperEngine::new(config(), store, chain)
        .start_dispatcher_runtime(Runtime::new().expect("failed to create tokio runtime"));

    let submit = |id: u128| {
        SubmitRequest::builder()
            .id(Uuid::from_u128(id))
            .action(Action::ObserverAddKey as u8)
            .role(Role::Observer as u8)
            .curve(1)
            .holder(observer().public())
            .asset_id(Uuid::nil())
            .amount(Decimal::ZERO)
            .extra(add_key_extra(Role::Observer))
            .created_at(at(id as i64))
            .build()
            .unwrap()
    };

    // Act
    let SubmitResponseDissolved { created } =
        engine.submit_request(submit(1)).await.unwrap().dissolve();
    let SubmitResponseDissolved { created: resubmitted } =
        engine.submit_request(submit(1)).await.unwrap().dissolve();

    let mut state = RequestState::Pending;
    for _ in 0..100 {
        let request = engine.store().read_request(Uuid::from_u128(1)).await.unwrap();
        state = request.unwrap().state();
        if state != RequestState::Pending {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let GetSafeResponseDissolved { safe } = engine
        .get_safe(GetSafeRequest::builder().holder(holder().public()).build())
        .await
        .unwrap()
        .dissolve();
    let ListOutboundResponseDissolved { messages } =
        engine.list_outbound(ListOutboundRequest::builder().build()).await.unwrap().dissolve();
    let key = engine.store().read_key(&observer().public()).await.unwrap();

    // Assert
    assert!(created);
    assert!(!resubmitted);
    assert_eq!(state, RequestState::Done);
    assert!(safe.is_none());
    assert!(messages.is_empty());
    assert!(key.is_some_and(|key| key.role() == Role::Observer && key.is_spare()));
    assert!(!engine.is_halted());

    engine.stop_dispatcher_runtime().await.unwrap();
}
