//! Persistence layer for the safe keeper.
//!
//! This crate stores the replayed request feed and every piece of custody state derived from it:
//! keys, network status, account plans, safes, script outputs, withdrawal transactions, signature
//! requests, accountant fee balances and the outbound message queue.
//!
//! # Architecture
//!
//! The store is built on top of [diesel](https://diesel.rs) with async PostgreSQL support:
//! - Connection pooling via deadpool
//! - One database transaction per processed request, so a request either commits all of its
//!   effects together with its final state or none of them
//! - A process-wide writer lock, so two multi-statement writes never interleave
//!
//! Methods named `*_with_request` / `*_from_request` mark the request `done` inside the same
//! database transaction as the effects they write.
//!
//! # Usage
//!
//! ```ignore
//! let pool = establish_pool(database_url, max_connections).await?;
//! let store = KeeperStore::new(pool);
//!
//! store.write_request_if_not_exists(&request).await?;
//! while let Some(request) = store.read_pending_request().await? {
//!     // dispatch
//! }
//! ```

mod error;
mod persistence;

pub use self::{
    error::{KeeperStoreError, Result},
    persistence::pool::{DbConn, DbPool, PoolError, establish_pool},
};

use core::{str::FromStr, time::Duration};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use diesel_async::AsyncConnection;
use futures::TryStreamExt;
use rust_decimal::Decimal;
use safe_keeper_domain::{
    Timestamps,
    key::Key,
    network::{AccountPlan, NetworkInfo},
    outbound::OutboundMessage,
    request::{Action, Chain, Curve, Request, RequestState, Role},
    safe::{Safe, SafeState},
    signature::SignatureRequest,
    tx::{Transaction, TransactionState, decode_recipients, encode_recipients},
    utxo::{BitcoinOutput, UtxoKind, UtxoState},
};
use tokio::sync::Mutex;
use uuid::Uuid;

use self::persistence::{
    record::{
        insert::{
            NewAccountPlanRecord, NewBitcoinOutputRecord, NewKeyRecord, NewNetworkInfoRecord,
            NewOutboundMessageRecord, NewRequestRecord, NewSafeRecord, NewSignatureRequestRecord,
            NewTransactionRecord,
        },
        select::{
            AccountPlanRecord, AccountPlanRecordDissolved, BitcoinOutputRecord,
            BitcoinOutputRecordDissolved, KeyRecord, KeyRecordDissolved, NetworkInfoRecord,
            NetworkInfoRecordDissolved, OutboundMessageRecord, OutboundMessageRecordDissolved,
            RequestRecord, RequestRecordDissolved, SafeRecord, SafeRecordDissolved,
            SignatureRequestRecord, SignatureRequestRecordDissolved, TransactionRecord,
            TransactionRecordDissolved,
        },
    },
    store,
};

/// The keeper store.
///
/// Cloning is cheap; clones share the pool and the writer lock.
#[derive(Clone)]
pub struct KeeperStore {
    pool: DbPool,
    writer: Arc<Mutex<()>>,
}

impl KeeperStore {
    /// Creates a new `KeeperStore` over the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        KeeperStore { pool, writer: Arc::new(Mutex::new(())) }
    }
}

// requests
impl KeeperStore {
    /// Appends a request to the feed unless a request with the same id already exists.
    ///
    /// Returns `true` if the request was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    #[tracing::instrument(skip_all, fields(id = %request.id(), action = %request.action()))]
    pub async fn write_request_if_not_exists(&self, request: &Request) -> Result<bool> {
        let amount = request.amount().normalize().to_string();
        let new_request = NewRequestRecord::builder()
            .id(request.id())
            .action(i16::from(request.action() as u8))
            .role(i16::from(request.role() as u8))
            .curve(i16::from(request.curve() as u8))
            .holder(request.holder())
            .asset_id(request.asset_id())
            .amount(&amount)
            .extra(request.extra())
            .state(RequestState::Pending.into())
            .created_at(request.created_at())
            .build();

        let _writer = self.writer.lock().await;
        store::save_new_request_if_absent(&mut self.get_conn().await?, new_request)
            .await
            .map_err(From::from)
    }

    /// Reads the pending request with the lowest arrival sequence.
    ///
    /// # Errors
    ///
    /// Returns [`KeeperStoreError::InvalidValue`] if the stored request carries an unknown tag,
    /// or an error if the database operation fails.
    #[tracing::instrument(skip(self))]
    pub async fn read_pending_request(&self) -> Result<Option<Request>> {
        store::fetch_first_pending_request(&mut self.get_conn().await?)
            .await?
            .map(make_request)
            .transpose()
    }

    #[tracing::instrument(skip(self))]
    pub async fn read_request(&self, id: Uuid) -> Result<Option<Request>> {
        store::fetch_request_by_id(&mut self.get_conn().await?, id)
            .await?
            .map(make_request)
            .transpose()
    }

    /// Marks a pending request `failed` without any other effect.
    ///
    /// # Errors
    ///
    /// Returns [`KeeperStoreError::Invariant`] if the request is not pending.
    #[tracing::instrument(skip(self))]
    pub async fn fail_request(&self, id: Uuid) -> Result<()> {
        self.set_request_state(id, RequestState::Failed).await
    }

    /// Marks a pending request `done` without any other effect.
    ///
    /// # Errors
    ///
    /// Returns [`KeeperStoreError::Invariant`] if the request is not pending.
    #[tracing::instrument(skip(self))]
    pub async fn finish_request(&self, id: Uuid) -> Result<()> {
        self.set_request_state(id, RequestState::Done).await
    }

    async fn set_request_state(&self, id: Uuid, state: RequestState) -> Result<()> {
        let _writer = self.writer.lock().await;
        self.get_conn()
            .await?
            .transaction(|conn| {
                Box::pin(async move { close_pending_request(conn, id, state).await })
            })
            .await
    }
}

// keys and outbound messages
impl KeeperStore {
    /// Registers the request holder as a spare key of `role` and finishes the request.
    ///
    /// Returns `false` if the key was already registered, in which case only the request is
    /// finished.
    #[tracing::instrument(skip_all, fields(request_id = %request.id(), %role))]
    pub async fn write_key_from_request(&self, request: &Request, role: Role) -> Result<bool> {
        let new_key = NewKeyRecord::builder()
            .public_key(request.holder())
            .curve(i16::from(request.curve() as u8))
            .role(i16::from(role as u8))
            .request_id(request.id())
            .created_at(request.created_at())
            .build();

        let _writer = self.writer.lock().await;
        self.get_conn()
            .await?
            .transaction(|conn| {
                Box::pin(async move {
                    let written = store::save_new_key_if_absent(conn, new_key).await?;
                    close_pending_request(conn, request.id(), RequestState::Done).await?;
                    Ok(written)
                })
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn read_key(&self, public_key: &str) -> Result<Option<Key>> {
        store::fetch_key_by_public_key(&mut self.get_conn().await?, public_key)
            .await?
            .map(make_key)
            .transpose()
    }

    /// Reads the oldest unassigned key of `role`, ordered by arrival then key.
    #[tracing::instrument(skip(self))]
    pub async fn read_spare_key(&self, role: Role) -> Result<Option<Key>> {
        store::fetch_oldest_spare_key_by_role(&mut self.get_conn().await?, i16::from(role as u8))
            .await?
            .map(make_key)
            .transpose()
    }

    #[tracing::instrument(skip(self))]
    pub async fn count_spare_keys(&self, role: Role) -> Result<u64> {
        let count =
            store::count_spare_keys_by_role(&mut self.get_conn().await?, i16::from(role as u8))
                .await?;

        u64::try_from(count).map_err(|_| KeeperStoreError::InvalidValue("negative count".into()))
    }

    /// Queues outbound messages and finishes the request.
    #[tracing::instrument(skip_all, fields(request_id = %request.id(), count = messages.len()))]
    pub async fn write_outbound_with_request(
        &self,
        request: &Request,
        messages: &[OutboundMessage],
    ) -> Result<()> {
        let _writer = self.writer.lock().await;
        self.get_conn()
            .await?
            .transaction(|conn| {
                Box::pin(async move {
                    for message in messages {
                        save_outbound(conn, message).await?;
                    }
                    close_pending_request(conn, request.id(), RequestState::Done).await
                })
            })
            .await
    }

    /// Lists queued outbound messages with a sequence greater than `after_seq`, in sequence
    /// order.
    #[tracing::instrument(skip(self))]
    pub async fn list_outbound_messages(
        &self,
        after_seq: i64,
        limit: u32,
    ) -> Result<Vec<OutboundMessage>> {
        let conn = &mut self.get_conn().await?;
        let records =
            store::stream_outbound_messages_after_seq(conn, after_seq, i64::from(limit))
                .await?
                .try_collect::<Vec<_>>()
                .await?;

        records.into_iter().map(make_outbound_message).collect()
    }
}

// network status and account plans
impl KeeperStore {
    /// Stores a network status report and finishes the request.
    #[tracing::instrument(skip_all, fields(request_id = %request.id(), height = info.height()))]
    pub async fn write_network_info_from_request(
        &self,
        request: &Request,
        info: &NetworkInfo,
    ) -> Result<()> {
        let new_info = NewNetworkInfoRecord::builder()
            .request_id(info.request_id())
            .chain(i16::from(info.chain() as u8))
            .fee_rate(to_i64(info.fee_rate(), "fee rate")?)
            .height(to_i64(info.height(), "height")?)
            .hash(info.hash())
            .created_at(info.created_at())
            .build();

        let _writer = self.writer.lock().await;
        self.get_conn()
            .await?
            .transaction(|conn| {
                Box::pin(async move {
                    store::save_new_network_info(conn, new_info).await?;
                    close_pending_request(conn, request.id(), RequestState::Done).await
                })
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn read_latest_network_info(&self, chain: Chain) -> Result<Option<NetworkInfo>> {
        let conn = &mut self.get_conn().await?;
        store::fetch_latest_network_info_by_chain(conn, i16::from(chain as u8))
            .await?
            .map(make_network_info)
            .transpose()
    }

    #[tracing::instrument(skip(self))]
    pub async fn read_network_info(&self, request_id: Uuid) -> Result<Option<NetworkInfo>> {
        store::fetch_network_info_by_request_id(&mut self.get_conn().await?, request_id)
            .await?
            .map(make_network_info)
            .transpose()
    }

    /// Stores an account plan and finishes the request.
    #[tracing::instrument(skip_all, fields(request_id = %request.id()))]
    pub async fn write_account_plan_from_request(
        &self,
        request: &Request,
        plan: &AccountPlan,
    ) -> Result<()> {
        let price_amount = plan.price_amount().normalize().to_string();
        let transaction_minimum = plan.transaction_minimum().normalize().to_string();
        let new_plan = NewAccountPlanRecord::builder()
            .request_id(plan.request_id())
            .chain(i16::from(plan.chain() as u8))
            .price_asset(plan.price_asset())
            .price_amount(&price_amount)
            .transaction_minimum(&transaction_minimum)
            .created_at(plan.created_at())
            .build();

        let _writer = self.writer.lock().await;
        self.get_conn()
            .await?
            .transaction(|conn| {
                Box::pin(async move {
                    store::save_new_account_plan(conn, new_plan).await?;
                    close_pending_request(conn, request.id(), RequestState::Done).await
                })
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn read_latest_account_plan(&self, chain: Chain) -> Result<Option<AccountPlan>> {
        let conn = &mut self.get_conn().await?;
        store::fetch_latest_account_plan_by_chain(conn, i16::from(chain as u8))
            .await?
            .map(make_account_plan)
            .transpose()
    }
}

// safes
impl KeeperStore {
    /// Stores a proposed safe, assigns its signer, observer and accountant keys to the holder,
    /// queues the observer notification and finishes the request.
    ///
    /// # Errors
    ///
    /// Returns [`KeeperStoreError::Invariant`] if one of the keys is no longer spare, or an error
    /// if a safe already exists for the holder or any of its keys.
    #[tracing::instrument(
        skip_all,
        fields(request_id = %request.id(), holder = %safe.holder(), address = %safe.address()),
    )]
    pub async fn write_safe_proposal_with_request(
        &self,
        request: &Request,
        safe: Safe<()>,
        notification: &OutboundMessage,
    ) -> Result<Safe> {
        let _writer = self.writer.lock().await;
        self.get_conn()
            .await?
            .transaction(|conn| {
                Box::pin(async move {
                    for key in [safe.signer(), safe.observer(), safe.accountant()] {
                        if !store::update_spare_key_holder(conn, key, safe.holder()).await? {
                            return Err(KeeperStoreError::Invariant(
                                format!("key {key} is not spare").into(),
                            ));
                        }
                    }

                    let timelock = to_i64(safe.timelock().as_secs(), "timelock")?;
                    let new_safe = NewSafeRecord::builder()
                        .holder(safe.holder())
                        .chain(i16::from(safe.chain() as u8))
                        .signer(safe.signer())
                        .observer(safe.observer())
                        .accountant(safe.accountant())
                        .timelock(timelock)
                        .address(safe.address())
                        .script(safe.script())
                        .accountant_address(safe.accountant_address())
                        .threshold(i16::from(safe.threshold()))
                        .receivers(safe.receivers())
                        .state(safe.state().into())
                        .request_id(safe.request_id())
                        .created_at(request.created_at())
                        .updated_at(request.created_at())
                        .build();

                    store::save_new_safe(conn, new_safe).await?;
                    save_outbound(conn, notification).await?;
                    close_pending_request(conn, request.id(), RequestState::Done).await?;

                    let timestamps = Timestamps::builder()
                        .created_at(request.created_at())
                        .updated_at(request.created_at())
                        .build();

                    Ok(safe.with_aux(timestamps).0)
                })
            })
            .await
    }

    /// Promotes a proposed safe to approved, queues the observer notification and finishes the
    /// request.
    ///
    /// # Errors
    ///
    /// Returns [`KeeperStoreError::Invariant`] if the safe is not in the proposed state.
    #[tracing::instrument(skip_all, fields(request_id = %request.id(), %holder))]
    pub async fn approve_safe_with_request(
        &self,
        request: &Request,
        holder: &str,
        notification: &OutboundMessage,
    ) -> Result<()> {
        let _writer = self.writer.lock().await;
        self.get_conn()
            .await?
            .transaction(|conn| {
                Box::pin(async move {
                    let approved = store::update_safe_state_by_holder(
                        conn,
                        holder,
                        SafeState::Proposed.into(),
                        SafeState::Approved.into(),
                        request.created_at(),
                    )
                    .await?;
                    if !approved {
                        return Err(KeeperStoreError::Invariant(
                            format!("safe of {holder} is not proposed").into(),
                        ));
                    }

                    save_outbound(conn, notification).await?;
                    close_pending_request(conn, request.id(), RequestState::Done).await
                })
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn read_safe(&self, holder: &str) -> Result<Option<Safe>> {
        store::fetch_safe_by_holder(&mut self.get_conn().await?, holder)
            .await?
            .map(make_safe)
            .transpose()
    }

    /// Returns whether `address` is the main or fee paying address of a known safe.
    #[tracing::instrument(skip(self))]
    pub async fn is_safe_address(&self, address: &str) -> Result<bool> {
        store::exists_safe_with_address(&mut self.get_conn().await?, address)
            .await
            .map_err(From::from)
    }
}

// outputs
impl KeeperStore {
    /// Records a verified deposit output and finishes the request.
    ///
    /// When `credit` is set the holder's accountant balance is credited by it. When `transfer`
    /// is set it is queued with the output.
    ///
    /// # Errors
    ///
    /// Returns [`KeeperStoreError::Invariant`] if the output already exists.
    #[tracing::instrument(
        skip_all,
        fields(
            request_id = %request.id(),
            transaction_hash = %output.transaction_hash(),
            index = output.index(),
            kind = %output.kind(),
        ),
    )]
    pub async fn write_bitcoin_output_with_request(
        &self,
        request: &Request,
        output: &BitcoinOutput,
        credit: Option<Decimal>,
        transfer: Option<&OutboundMessage>,
    ) -> Result<()> {
        let new_output = NewBitcoinOutputRecord::builder()
            .transaction_hash(output.transaction_hash())
            .output_index(to_i32(output.index(), "output index")?)
            .address(output.address())
            .satoshi(to_i64(output.satoshi(), "satoshi")?)
            .script(output.script())
            .sequence(i64::from(output.sequence()))
            .kind(output.kind().into())
            .state(output.state().into())
            .holder(output.holder())
            .chain(i16::from(output.chain() as u8))
            .request_id(output.request_id())
            .created_at(output.created_at())
            .updated_at(output.created_at())
            .build();

        let _writer = self.writer.lock().await;
        self.get_conn()
            .await?
            .transaction(|conn| {
                Box::pin(async move {
                    if !store::save_new_bitcoin_output_if_absent(conn, new_output).await? {
                        return Err(KeeperStoreError::Invariant(
                            format!(
                                "output {}:{} already exists",
                                output.transaction_hash(),
                                output.index()
                            )
                            .into(),
                        ));
                    }

                    if let Some(amount) = credit {
                        credit_accountant(conn, output.holder(), amount, request.created_at())
                            .await?;
                    }

                    if let Some(transfer) = transfer {
                        save_outbound(conn, transfer).await?;
                    }

                    close_pending_request(conn, request.id(), RequestState::Done).await
                })
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn read_bitcoin_output(
        &self,
        transaction_hash: &str,
        index: u32,
    ) -> Result<Option<BitcoinOutput>> {
        let conn = &mut self.get_conn().await?;
        store::fetch_bitcoin_output(conn, transaction_hash, to_i32(index, "output index")?)
            .await?
            .map(make_bitcoin_output)
            .transpose()
    }

    /// Lists the unspent outputs of `kind` owned by `holder`, in deposit order.
    #[tracing::instrument(skip(self))]
    pub async fn list_unspent_outputs(
        &self,
        holder: &str,
        kind: UtxoKind,
    ) -> Result<Vec<BitcoinOutput>> {
        let conn = &mut self.get_conn().await?;
        store::fetch_bitcoin_outputs_by_holder_kind_and_state(
            conn,
            holder,
            kind.into(),
            UtxoState::Unspent.into(),
        )
        .await?
        .into_iter()
        .map(make_bitcoin_output)
        .collect()
    }

    /// Lists the outputs locked or spent by a transaction, in deposit order.
    #[tracing::instrument(skip(self))]
    pub async fn list_outputs_spent_by(
        &self,
        transaction_hash: &str,
    ) -> Result<Vec<BitcoinOutput>> {
        store::fetch_bitcoin_outputs_by_spent_by(&mut self.get_conn().await?, transaction_hash)
            .await?
            .into_iter()
            .map(make_bitcoin_output)
            .collect()
    }
}

// transactions and signatures
impl KeeperStore {
    /// Stores a proposed withdrawal and finishes the request.
    ///
    /// In one database transaction: locks `inputs` for the withdrawal, debits the holder's
    /// accountant balance by the fee, stores the signature requests and queues `outbound`.
    ///
    /// # Errors
    ///
    /// Returns [`KeeperStoreError::Invariant`] if an input is not unspent or the debit would make
    /// the accountant balance negative. Nothing is written in that case.
    #[tracing::instrument(
        skip_all,
        fields(
            request_id = %request.id(),
            transaction_hash = %transaction.transaction_hash(),
            fee = %transaction.fee(),
            inputs = inputs.len(),
        ),
    )]
    pub async fn write_transaction_with_request(
        &self,
        request: &Request,
        transaction: Transaction<()>,
        inputs: &[BitcoinOutput],
        signature_requests: &[SignatureRequest],
        outbound: &[OutboundMessage],
    ) -> Result<Transaction> {
        let data = encode_recipients(transaction.data())?;
        let fee = transaction.fee().normalize().to_string();

        let _writer = self.writer.lock().await;
        self.get_conn()
            .await?
            .transaction(|conn| {
                Box::pin(async move {
                    let new_transaction = NewTransactionRecord::builder()
                        .transaction_hash(transaction.transaction_hash())
                        .raw_transaction(transaction.raw_transaction())
                        .holder(transaction.holder())
                        .chain(i16::from(transaction.chain() as u8))
                        .state(transaction.state().into())
                        .data(&data)
                        .fee(&fee)
                        .request_id(transaction.request_id())
                        .created_at(request.created_at())
                        .updated_at(request.created_at())
                        .build();
                    store::save_new_transaction(conn, new_transaction).await?;

                    for input in inputs {
                        let locked = store::lock_unspent_bitcoin_output(
                            conn,
                            input.transaction_hash(),
                            to_i32(input.index(), "output index")?,
                            transaction.transaction_hash(),
                            request.created_at(),
                        )
                        .await?;
                        if !locked {
                            return Err(KeeperStoreError::Invariant(
                                format!(
                                    "output {}:{} is not unspent",
                                    input.transaction_hash(),
                                    input.index()
                                )
                                .into(),
                            ));
                        }
                    }

                    debit_accountant(
                        conn,
                        transaction.holder(),
                        transaction.fee(),
                        request.created_at(),
                    )
                    .await?;

                    for signature_request in signature_requests {
                        let new_request = NewSignatureRequestRecord::builder()
                            .id(signature_request.id())
                            .transaction_hash(signature_request.transaction_hash())
                            .input_index(to_i32(signature_request.input_index(), "input index")?)
                            .signer(signature_request.signer())
                            .message(signature_request.message())
                            .state(signature_request.state().into())
                            .created_at(signature_request.created_at())
                            .updated_at(signature_request.created_at())
                            .build();
                        store::save_new_signature_request(conn, new_request).await?;
                    }

                    for message in outbound {
                        save_outbound(conn, message).await?;
                    }

                    close_pending_request(conn, request.id(), RequestState::Done).await?;

                    let timestamps = Timestamps::builder()
                        .created_at(request.created_at())
                        .updated_at(request.created_at())
                        .build();

                    Ok(transaction.with_aux(timestamps).0)
                })
            })
            .await
    }

    /// Stores a signer signature for a pending signature request and finishes the request.
    ///
    /// The transaction moves from `initial` to `pending` on its first signature. Returns the
    /// transaction state after the write.
    ///
    /// # Errors
    ///
    /// Returns [`KeeperStoreError::Invariant`] if the signature request is not pending.
    #[tracing::instrument(skip_all, fields(request_id = %request.id(), %signature_request_id))]
    pub async fn write_signature_response_with_request(
        &self,
        request: &Request,
        signature_request_id: Uuid,
        signature: &[u8],
    ) -> Result<TransactionState> {
        let _writer = self.writer.lock().await;
        self.get_conn()
            .await?
            .transaction(|conn| {
                Box::pin(async move {
                    let transaction_hash =
                        fulfill_signature_request(conn, request, signature_request_id, signature)
                            .await?;

                    let state = if store::update_transaction_state(
                        conn,
                        &transaction_hash,
                        TransactionState::Initial.into(),
                        TransactionState::Pending.into(),
                        request.created_at(),
                    )
                    .await?
                    {
                        TransactionState::Pending
                    } else {
                        read_transaction_state(conn, &transaction_hash).await?
                    };

                    close_pending_request(conn, request.id(), RequestState::Done).await?;

                    Ok(state)
                })
            })
            .await
    }

    /// Stores the last missing signer signature of a transaction and finalizes it.
    ///
    /// In one database transaction: fulfills the signature request, replaces the stored PSBT
    /// with `signed_transaction`, moves the transaction to `done`, marks its outputs spent,
    /// queues `notification` and finishes the request.
    ///
    /// # Errors
    ///
    /// Returns [`KeeperStoreError::Invariant`] if the signature request is not pending or the
    /// transaction is already final.
    #[tracing::instrument(skip_all, fields(request_id = %request.id(), %signature_request_id))]
    pub async fn finalize_transaction_with_request(
        &self,
        request: &Request,
        signature_request_id: Uuid,
        signature: &[u8],
        signed_transaction: &[u8],
        notification: &OutboundMessage,
    ) -> Result<()> {
        let _writer = self.writer.lock().await;
        self.get_conn()
            .await?
            .transaction(|conn| {
                Box::pin(async move {
                    let transaction_hash =
                        fulfill_signature_request(conn, request, signature_request_id, signature)
                            .await?;

                    // a single input transaction passes through pending in the same write
                    store::update_transaction_state(
                        conn,
                        &transaction_hash,
                        TransactionState::Initial.into(),
                        TransactionState::Pending.into(),
                        request.created_at(),
                    )
                    .await?;

                    let done = store::update_transaction_state(
                        conn,
                        &transaction_hash,
                        TransactionState::Pending.into(),
                        TransactionState::Done.into(),
                        request.created_at(),
                    )
                    .await?;
                    if !done {
                        return Err(KeeperStoreError::Invariant(
                            format!("transaction {transaction_hash} is not pending").into(),
                        ));
                    }

                    store::update_transaction_raw(
                        conn,
                        &transaction_hash,
                        signed_transaction,
                        request.created_at(),
                    )
                    .await?;

                    store::update_pending_bitcoin_outputs_by_spent_by(
                        conn,
                        &transaction_hash,
                        UtxoState::Spent.into(),
                        request.created_at(),
                    )
                    .await?;

                    save_outbound(conn, notification).await?;
                    close_pending_request(conn, request.id(), RequestState::Done).await
                })
            })
            .await
    }

    /// Revokes a proposed withdrawal and finishes the request.
    ///
    /// In one database transaction: releases the locked outputs, credits the holder's
    /// accountant balance by the transaction fee, closes outstanding signature requests and
    /// marks the transaction failed.
    ///
    /// # Errors
    ///
    /// Returns [`KeeperStoreError::NotFound`] if the transaction does not exist, or
    /// [`KeeperStoreError::Invariant`] if it is not in the initial state.
    #[tracing::instrument(skip_all, fields(request_id = %request.id(), %transaction_hash))]
    pub async fn revoke_transaction_with_request(
        &self,
        request: &Request,
        transaction_hash: &str,
    ) -> Result<()> {
        let _writer = self.writer.lock().await;
        self.get_conn()
            .await?
            .transaction(|conn| {
                Box::pin(async move {
                    let transaction = store::fetch_transaction_by_hash(conn, transaction_hash)
                        .await?
                        .map(make_transaction)
                        .transpose()?
                        .ok_or_else(|| {
                            KeeperStoreError::NotFound(
                                format!("transaction {transaction_hash}").into(),
                            )
                        })?;

                    let failed = store::update_transaction_state(
                        conn,
                        transaction_hash,
                        TransactionState::Initial.into(),
                        TransactionState::Failed.into(),
                        request.created_at(),
                    )
                    .await?;
                    if !failed {
                        return Err(KeeperStoreError::Invariant(
                            format!("transaction {transaction_hash} is not initial").into(),
                        ));
                    }

                    store::update_pending_bitcoin_outputs_by_spent_by(
                        conn,
                        transaction_hash,
                        UtxoState::Unspent.into(),
                        request.created_at(),
                    )
                    .await?;

                    credit_accountant(
                        conn,
                        transaction.holder(),
                        transaction.fee(),
                        request.created_at(),
                    )
                    .await?;

                    store::close_pending_signature_requests_by_transaction_hash(
                        conn,
                        transaction_hash,
                        request.created_at(),
                    )
                    .await?;

                    close_pending_request(conn, request.id(), RequestState::Done).await
                })
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn read_transaction(&self, transaction_hash: &str) -> Result<Option<Transaction>> {
        store::fetch_transaction_by_hash(&mut self.get_conn().await?, transaction_hash)
            .await?
            .map(make_transaction)
            .transpose()
    }

    #[tracing::instrument(skip(self))]
    pub async fn read_transaction_by_request_id(
        &self,
        request_id: Uuid,
    ) -> Result<Option<Transaction>> {
        store::fetch_transaction_by_request_id(&mut self.get_conn().await?, request_id)
            .await?
            .map(make_transaction)
            .transpose()
    }

    #[tracing::instrument(skip(self))]
    pub async fn read_signature_request(&self, id: Uuid) -> Result<Option<SignatureRequest>> {
        store::fetch_signature_request_by_id(&mut self.get_conn().await?, id)
            .await?
            .map(make_signature_request)
            .transpose()
    }

    /// Lists the signature requests of a transaction, in input order.
    #[tracing::instrument(skip(self))]
    pub async fn list_signature_requests(
        &self,
        transaction_hash: &str,
    ) -> Result<Vec<SignatureRequest>> {
        let conn = &mut self.get_conn().await?;
        store::fetch_signature_requests_by_transaction_hash(conn, transaction_hash)
            .await?
            .into_iter()
            .map(make_signature_request)
            .collect()
    }

    /// Reads the accountant fee balance of a holder. Holders without deposits have a zero
    /// balance.
    #[tracing::instrument(skip(self))]
    pub async fn read_accountant_balance(&self, holder: &str) -> Result<Decimal> {
        read_balance(&mut self.get_conn().await?, holder).await
    }

    async fn get_conn(&self) -> Result<DbConn> {
        self.pool
            .get()
            .await
            .inspect_err(|err| tracing::error!(%err, "failed to get a database connection"))
            .map_err(|_| KeeperStoreError::Pool)
    }
}

async fn close_pending_request(conn: &mut DbConn, id: Uuid, state: RequestState) -> Result<()> {
    if store::update_pending_request_state(conn, id, state.into()).await? {
        Ok(())
    } else {
        Err(KeeperStoreError::Invariant(format!("request {id} is not pending").into()))
    }
}

async fn save_outbound(conn: &mut DbConn, message: &OutboundMessage) -> Result<()> {
    let new_message = NewOutboundMessageRecord::builder()
        .id(message.id())
        .request_id(message.request_id())
        .receiver(i16::from(message.receiver() as u8))
        .kind(message.kind().into())
        .payload(message.payload())
        .created_at(message.created_at())
        .build();

    if !store::save_new_outbound_message_if_absent(conn, new_message).await? {
        tracing::debug!(id = %message.id(), "outbound message already queued");
    }

    Ok(())
}

async fn fulfill_signature_request(
    conn: &mut DbConn,
    request: &Request,
    id: Uuid,
    signature: &[u8],
) -> Result<String> {
    let signature_request = store::fetch_signature_request_by_id(conn, id)
        .await?
        .map(make_signature_request)
        .transpose()?
        .ok_or_else(|| KeeperStoreError::NotFound(format!("signature request {id}").into()))?;

    let fulfilled = store::update_pending_signature_request_signature(
        conn,
        id,
        signature,
        request.created_at(),
    )
    .await?;
    if !fulfilled {
        return Err(KeeperStoreError::Invariant(
            format!("signature request {id} is not pending").into(),
        ));
    }

    Ok(signature_request.transaction_hash().to_string())
}

async fn read_transaction_state(
    conn: &mut DbConn,
    transaction_hash: &str,
) -> Result<TransactionState> {
    store::fetch_transaction_by_hash(conn, transaction_hash)
        .await?
        .map(make_transaction)
        .transpose()?
        .map(|transaction| transaction.state())
        .ok_or_else(|| KeeperStoreError::NotFound(format!("transaction {transaction_hash}").into()))
}

async fn read_balance(conn: &mut DbConn, holder: &str) -> Result<Decimal> {
    store::fetch_accountant_balance(conn, holder)
        .await?
        .map(|balance| Decimal::from_str(&balance))
        .transpose()
        .map(Option::unwrap_or_default)
        .map_err(From::from)
}

async fn credit_accountant(
    conn: &mut DbConn,
    holder: &str,
    amount: Decimal,
    at: DateTime<Utc>,
) -> Result<Decimal> {
    let balance = read_balance(conn, holder).await? + amount;
    store::upsert_accountant_balance(conn, holder, &balance.normalize().to_string(), at).await?;

    Ok(balance)
}

async fn debit_accountant(
    conn: &mut DbConn,
    holder: &str,
    amount: Decimal,
    at: DateTime<Utc>,
) -> Result<Decimal> {
    let balance = read_balance(conn, holder).await? - amount;
    if balance.is_sign_negative() && !balance.is_zero() {
        return Err(KeeperStoreError::Invariant(
            format!("accountant balance of {holder} would be {balance}").into(),
        ));
    }

    store::upsert_accountant_balance(conn, holder, &balance.normalize().to_string(), at).await?;

    Ok(balance)
}

fn from_tag<T>(tag: i16, what: &'static str, from_repr: fn(u8) -> Option<T>) -> Result<T> {
    u8::try_from(tag)
        .ok()
        .and_then(from_repr)
        .ok_or_else(|| KeeperStoreError::InvalidValue(format!("unknown {what} tag {tag}").into()))
}

fn to_i64(value: u64, what: &'static str) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| KeeperStoreError::InvalidValue(format!("{what} out of range: {value}").into()))
}

fn to_i32(value: u32, what: &'static str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| KeeperStoreError::InvalidValue(format!("{what} out of range: {value}").into()))
}

fn to_u64(value: i64, what: &'static str) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| KeeperStoreError::InvalidValue(format!("negative {what}: {value}").into()))
}

fn to_u32<V>(value: V, what: &'static str) -> Result<u32>
where
    u32: TryFrom<V>,
    V: Copy + core::fmt::Display,
{
    u32::try_from(value)
        .map_err(|_| KeeperStoreError::InvalidValue(format!("{what} out of range: {value}").into()))
}

fn make_request(request_record: RequestRecord) -> Result<Request> {
    let RequestRecordDissolved {
        id,
        seq: _,
        action,
        role,
        curve,
        holder,
        asset_id,
        amount,
        extra,
        state,
        created_at,
    } = request_record.dissolve();

    let request = Request::builder()
        .id(id)
        .action(from_tag(action, "action", Action::from_repr)?)
        .role(from_tag(role, "role", Role::from_repr)?)
        .curve(from_tag(curve, "curve", Curve::from_repr)?)
        .holder(holder)
        .asset_id(asset_id)
        .amount(Decimal::from_str(&amount)?)
        .extra(extra)
        .state(state.into_inner())
        .created_at(created_at)
        .build();

    Ok(request)
}

fn make_key(key_record: KeyRecord) -> Result<Key> {
    let KeyRecordDissolved { public_key, curve, role, request_id, holder, created_at } =
        key_record.dissolve();

    let key = Key::builder()
        .public_key(public_key)
        .curve(from_tag(curve, "curve", Curve::from_repr)?)
        .role(from_tag(role, "role", Role::from_repr)?)
        .request_id(request_id)
        .maybe_holder(holder)
        .created_at(created_at)
        .build();

    Ok(key)
}

fn make_network_info(network_info_record: NetworkInfoRecord) -> Result<NetworkInfo> {
    let NetworkInfoRecordDissolved { request_id, chain, fee_rate, height, hash, created_at } =
        network_info_record.dissolve();

    let info = NetworkInfo::builder()
        .request_id(request_id)
        .chain(from_tag(chain, "chain", Chain::from_repr)?)
        .fee_rate(to_u64(fee_rate, "fee rate")?)
        .height(to_u64(height, "height")?)
        .hash(hash)
        .created_at(created_at)
        .build();

    Ok(info)
}

fn make_account_plan(account_plan_record: AccountPlanRecord) -> Result<AccountPlan> {
    let AccountPlanRecordDissolved {
        request_id,
        chain,
        price_asset,
        price_amount,
        transaction_minimum,
        created_at,
    } = account_plan_record.dissolve();

    let plan = AccountPlan::builder()
        .chain(from_tag(chain, "chain", Chain::from_repr)?)
        .price_asset(price_asset)
        .price_amount(Decimal::from_str(&price_amount)?)
        .transaction_minimum(Decimal::from_str(&transaction_minimum)?)
        .request_id(request_id)
        .created_at(created_at)
        .build();

    Ok(plan)
}

fn make_safe(safe_record: SafeRecord) -> Result<Safe> {
    let SafeRecordDissolved {
        holder,
        chain,
        signer,
        observer,
        accountant,
        timelock,
        address,
        script,
        accountant_address,
        threshold,
        receivers,
        state,
        request_id,
        created_at,
        updated_at,
    } = safe_record.dissolve();

    let threshold = u8::try_from(threshold)
        .map_err(|_| KeeperStoreError::InvalidValue(format!("threshold {threshold}").into()))?;

    let timestamps = Timestamps::builder().created_at(created_at).updated_at(updated_at).build();

    let safe = Safe::builder()
        .holder(holder)
        .chain(from_tag(chain, "chain", Chain::from_repr)?)
        .signer(signer)
        .observer(observer)
        .accountant(accountant)
        .timelock(Duration::from_secs(to_u64(timelock, "timelock")?))
        .address(address)
        .script(script)
        .accountant_address(accountant_address)
        .threshold(threshold)
        .receivers(receivers)
        .state(state.into_inner())
        .request_id(request_id)
        .aux(timestamps)
        .build();

    Ok(safe)
}

fn make_bitcoin_output(bitcoin_output_record: BitcoinOutputRecord) -> Result<BitcoinOutput> {
    let BitcoinOutputRecordDissolved {
        transaction_hash,
        output_index,
        seq: _,
        address,
        satoshi,
        script,
        sequence,
        kind,
        state,
        holder,
        chain,
        spent_by,
        request_id,
        created_at,
        updated_at: _,
    } = bitcoin_output_record.dissolve();

    let output = BitcoinOutput::builder()
        .transaction_hash(transaction_hash)
        .index(to_u32(output_index, "output index")?)
        .address(address)
        .satoshi(to_u64(satoshi, "satoshi")?)
        .script(script)
        .sequence(to_u32(sequence, "sequence")?)
        .kind(kind.into_inner())
        .state(state.into_inner())
        .holder(holder)
        .chain(from_tag(chain, "chain", Chain::from_repr)?)
        .maybe_spent_by(spent_by)
        .request_id(request_id)
        .created_at(created_at)
        .build();

    Ok(output)
}

fn make_transaction(transaction_record: TransactionRecord) -> Result<Transaction> {
    let TransactionRecordDissolved {
        transaction_hash,
        raw_transaction,
        holder,
        chain,
        state,
        data,
        fee,
        request_id,
        created_at,
        updated_at,
    } = transaction_record.dissolve();

    let timestamps = Timestamps::builder().created_at(created_at).updated_at(updated_at).build();

    let transaction = Transaction::builder()
        .transaction_hash(transaction_hash)
        .raw_transaction(raw_transaction)
        .holder(holder)
        .chain(from_tag(chain, "chain", Chain::from_repr)?)
        .state(state.into_inner())
        .data(decode_recipients(&data)?)
        .fee(Decimal::from_str(&fee)?)
        .request_id(request_id)
        .aux(timestamps)
        .build();

    Ok(transaction)
}

fn make_signature_request(
    signature_request_record: SignatureRequestRecord,
) -> Result<SignatureRequest> {
    let SignatureRequestRecordDissolved {
        id,
        transaction_hash,
        input_index,
        signer,
        message,
        signature,
        state,
        created_at,
        updated_at: _,
    } = signature_request_record.dissolve();

    let signature_request = SignatureRequest::builder()
        .id(id)
        .transaction_hash(transaction_hash)
        .input_index(to_u32(input_index, "input index")?)
        .signer(signer)
        .message(message)
        .maybe_signature(signature)
        .state(state.into_inner())
        .created_at(created_at)
        .build();

    Ok(signature_request)
}

fn make_outbound_message(
    outbound_message_record: OutboundMessageRecord,
) -> Result<OutboundMessage> {
    let OutboundMessageRecordDissolved {
        id,
        seq,
        request_id,
        receiver,
        kind,
        payload,
        created_at,
    } = outbound_message_record.dissolve();

    let message = OutboundMessage::builder()
        .id(id)
        .request_id(request_id)
        .receiver(from_tag(receiver, "role", Role::from_repr)?)
        .kind(kind.into_inner())
        .payload(payload)
        .seq(seq)
        .created_at(created_at)
        .build();

    Ok(message)
}
