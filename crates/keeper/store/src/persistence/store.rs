mod error;

pub use self::error::StoreError;

use chrono::{DateTime, Utc};
use diesel::{
    BoolExpressionMethods, ExpressionMethods, QueryDsl, dsl, result::OptionalExtension, upsert,
};
use diesel_async::RunQueryDsl;
use futures::{Stream, TryStreamExt};
use uuid::Uuid;

use super::{
    pool::DbConn,
    record::{
        RequestState, SafeState, SignatureState, TransactionState, UtxoKind, UtxoState,
        insert::{
            NewAccountPlanRecord, NewBitcoinOutputRecord, NewKeyRecord, NewNetworkInfoRecord,
            NewOutboundMessageRecord, NewRequestRecord, NewSafeRecord, NewSignatureRequestRecord,
            NewTransactionRecord,
        },
        select::{
            AccountPlanRecord, BitcoinOutputRecord, KeyRecord, NetworkInfoRecord,
            OutboundMessageRecord, RequestRecord, SafeRecord, SignatureRequestRecord,
            TransactionRecord,
        },
    },
    schema,
};

use self::error::Result;

pub async fn save_new_request_if_absent(
    conn: &mut DbConn,
    new_request: NewRequestRecord<'_>,
) -> Result<bool> {
    let affected = diesel::insert_into(schema::requests::table)
        .values(new_request)
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;

    Ok(affected == 1)
}

pub async fn fetch_first_pending_request(conn: &mut DbConn) -> Result<Option<RequestRecord>> {
    schema::requests::table
        .filter(schema::requests::state.eq(RequestState::from(
            safe_keeper_domain::request::RequestState::Pending,
        )))
        .order_by(schema::requests::seq.asc())
        .first(conn)
        .await
        .optional()
        .map_err(From::from)
}

pub async fn fetch_request_by_id(conn: &mut DbConn, id: Uuid) -> Result<Option<RequestRecord>> {
    schema::requests::table
        .filter(schema::requests::id.eq(id))
        .first(conn)
        .await
        .optional()
        .map_err(From::from)
}

/// Moves a pending request to `state`. Returns `false` if the request is no longer pending.
pub async fn update_pending_request_state(
    conn: &mut DbConn,
    id: Uuid,
    state: RequestState,
) -> Result<bool> {
    let pending = RequestState::from(safe_keeper_domain::request::RequestState::Pending);
    let affected = diesel::update(
        schema::requests::table
            .filter(schema::requests::id.eq(id))
            .filter(schema::requests::state.eq(pending)),
    )
    .set(schema::requests::state.eq(state))
    .execute(conn)
    .await?;

    assert!(affected <= 1, "duplicate request id must not exist");

    Ok(affected == 1)
}

pub async fn save_new_key_if_absent(conn: &mut DbConn, new_key: NewKeyRecord<'_>) -> Result<bool> {
    let affected = diesel::insert_into(schema::keys::table)
        .values(new_key)
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;

    Ok(affected == 1)
}

pub async fn fetch_key_by_public_key(
    conn: &mut DbConn,
    public_key: &str,
) -> Result<Option<KeyRecord>> {
    schema::keys::table
        .filter(schema::keys::public_key.eq(public_key))
        .first(conn)
        .await
        .optional()
        .map_err(From::from)
}

pub async fn fetch_oldest_spare_key_by_role(
    conn: &mut DbConn,
    role: i16,
) -> Result<Option<KeyRecord>> {
    schema::keys::table
        .filter(schema::keys::role.eq(role))
        .filter(schema::keys::holder.is_null())
        .order_by((schema::keys::created_at.asc(), schema::keys::public_key.asc()))
        .first(conn)
        .await
        .optional()
        .map_err(From::from)
}

pub async fn count_spare_keys_by_role(conn: &mut DbConn, role: i16) -> Result<i64> {
    schema::keys::table
        .filter(schema::keys::role.eq(role))
        .filter(schema::keys::holder.is_null())
        .count()
        .get_result(conn)
        .await
        .map_err(From::from)
}

pub async fn update_spare_key_holder(
    conn: &mut DbConn,
    public_key: &str,
    holder: &str,
) -> Result<bool> {
    let affected = diesel::update(
        schema::keys::table
            .filter(schema::keys::public_key.eq(public_key))
            .filter(schema::keys::holder.is_null()),
    )
    .set(schema::keys::holder.eq(holder))
    .execute(conn)
    .await?;

    assert!(affected <= 1, "duplicate public key must not exist");

    Ok(affected == 1)
}

pub async fn save_new_outbound_message_if_absent(
    conn: &mut DbConn,
    new_message: NewOutboundMessageRecord<'_>,
) -> Result<bool> {
    let affected = diesel::insert_into(schema::outbound_messages::table)
        .values(new_message)
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;

    Ok(affected == 1)
}

pub async fn stream_outbound_messages_after_seq(
    conn: &mut DbConn,
    after_seq: i64,
    limit: i64,
) -> Result<impl Stream<Item = Result<OutboundMessageRecord>>> {
    let stream = schema::outbound_messages::table
        .filter(schema::outbound_messages::seq.gt(after_seq))
        .order_by(schema::outbound_messages::seq.asc())
        .limit(limit)
        .load_stream(conn)
        .await?
        .map_err(From::from);

    Ok(stream)
}

pub async fn save_new_network_info(
    conn: &mut DbConn,
    new_info: NewNetworkInfoRecord<'_>,
) -> Result<()> {
    diesel::insert_into(schema::network_infos::table).values(new_info).execute(conn).await?;

    Ok(())
}

pub async fn fetch_latest_network_info_by_chain(
    conn: &mut DbConn,
    chain: i16,
) -> Result<Option<NetworkInfoRecord>> {
    schema::network_infos::table
        .filter(schema::network_infos::chain.eq(chain))
        .order_by((schema::network_infos::created_at.desc(), schema::network_infos::height.desc()))
        .first(conn)
        .await
        .optional()
        .map_err(From::from)
}

pub async fn fetch_network_info_by_request_id(
    conn: &mut DbConn,
    request_id: Uuid,
) -> Result<Option<NetworkInfoRecord>> {
    schema::network_infos::table
        .filter(schema::network_infos::request_id.eq(request_id))
        .first(conn)
        .await
        .optional()
        .map_err(From::from)
}

pub async fn save_new_account_plan(
    conn: &mut DbConn,
    new_plan: NewAccountPlanRecord<'_>,
) -> Result<()> {
    diesel::insert_into(schema::account_plans::table).values(new_plan).execute(conn).await?;

    Ok(())
}

pub async fn fetch_latest_account_plan_by_chain(
    conn: &mut DbConn,
    chain: i16,
) -> Result<Option<AccountPlanRecord>> {
    schema::account_plans::table
        .filter(schema::account_plans::chain.eq(chain))
        .order_by(schema::account_plans::created_at.desc())
        .first(conn)
        .await
        .optional()
        .map_err(From::from)
}

pub async fn save_new_safe(conn: &mut DbConn, new_safe: NewSafeRecord<'_>) -> Result<()> {
    diesel::insert_into(schema::safes::table).values(new_safe).execute(conn).await?;

    Ok(())
}

pub async fn fetch_safe_by_holder(conn: &mut DbConn, holder: &str) -> Result<Option<SafeRecord>> {
    schema::safes::table
        .filter(schema::safes::holder.eq(holder))
        .first(conn)
        .await
        .optional()
        .map_err(From::from)
}

/// Returns whether `address` is the main or fee paying address of any safe.
pub async fn exists_safe_with_address(conn: &mut DbConn, address: &str) -> Result<bool> {
    diesel::select(dsl::exists(
        schema::safes::table.filter(
            schema::safes::address
                .eq(address)
                .or(schema::safes::accountant_address.eq(address)),
        ),
    ))
    .get_result(conn)
    .await
    .map_err(From::from)
}

pub async fn update_safe_state_by_holder(
    conn: &mut DbConn,
    holder: &str,
    from: SafeState,
    to: SafeState,
    updated_at: DateTime<Utc>,
) -> Result<bool> {
    let affected = diesel::update(
        schema::safes::table
            .filter(schema::safes::holder.eq(holder))
            .filter(schema::safes::state.eq(from)),
    )
    .set((schema::safes::state.eq(to), schema::safes::updated_at.eq(updated_at)))
    .execute(conn)
    .await?;

    assert!(affected <= 1, "duplicate safe holder must not exist");

    Ok(affected == 1)
}

pub async fn save_new_bitcoin_output_if_absent(
    conn: &mut DbConn,
    new_output: NewBitcoinOutputRecord<'_>,
) -> Result<bool> {
    let affected = diesel::insert_into(schema::bitcoin_outputs::table)
        .values(new_output)
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;

    Ok(affected == 1)
}

pub async fn fetch_bitcoin_output(
    conn: &mut DbConn,
    transaction_hash: &str,
    output_index: i32,
) -> Result<Option<BitcoinOutputRecord>> {
    schema::bitcoin_outputs::table
        .filter(schema::bitcoin_outputs::transaction_hash.eq(transaction_hash))
        .filter(schema::bitcoin_outputs::output_index.eq(output_index))
        .first(conn)
        .await
        .optional()
        .map_err(From::from)
}

pub async fn fetch_bitcoin_outputs_by_holder_kind_and_state(
    conn: &mut DbConn,
    holder: &str,
    kind: UtxoKind,
    state: UtxoState,
) -> Result<Vec<BitcoinOutputRecord>> {
    schema::bitcoin_outputs::table
        .filter(schema::bitcoin_outputs::holder.eq(holder))
        .filter(schema::bitcoin_outputs::kind.eq(kind))
        .filter(schema::bitcoin_outputs::state.eq(state))
        .order_by(schema::bitcoin_outputs::seq.asc())
        .load(conn)
        .await
        .map_err(From::from)
}

pub async fn fetch_bitcoin_outputs_by_spent_by(
    conn: &mut DbConn,
    spent_by: &str,
) -> Result<Vec<BitcoinOutputRecord>> {
    schema::bitcoin_outputs::table
        .filter(schema::bitcoin_outputs::spent_by.eq(spent_by))
        .order_by(schema::bitcoin_outputs::seq.asc())
        .load(conn)
        .await
        .map_err(From::from)
}

/// Locks an unspent output for the transaction `spent_by`. Returns `false` if the output is
/// missing or not unspent.
pub async fn lock_unspent_bitcoin_output(
    conn: &mut DbConn,
    transaction_hash: &str,
    output_index: i32,
    spent_by: &str,
    updated_at: DateTime<Utc>,
) -> Result<bool> {
    let unspent = UtxoState::from(safe_keeper_domain::utxo::UtxoState::Unspent);
    let pending = UtxoState::from(safe_keeper_domain::utxo::UtxoState::Pending);

    let affected = diesel::update(
        schema::bitcoin_outputs::table
            .filter(schema::bitcoin_outputs::transaction_hash.eq(transaction_hash))
            .filter(schema::bitcoin_outputs::output_index.eq(output_index))
            .filter(schema::bitcoin_outputs::state.eq(unspent)),
    )
    .set((
        schema::bitcoin_outputs::state.eq(pending),
        schema::bitcoin_outputs::spent_by.eq(spent_by),
        schema::bitcoin_outputs::updated_at.eq(updated_at),
    ))
    .execute(conn)
    .await?;

    assert!(affected <= 1, "duplicate output must not exist");

    Ok(affected == 1)
}

/// Moves every pending output locked by `spent_by` to `to`, keeping the lock only when the
/// outputs are spent.
pub async fn update_pending_bitcoin_outputs_by_spent_by(
    conn: &mut DbConn,
    spent_by: &str,
    to: UtxoState,
    updated_at: DateTime<Utc>,
) -> Result<usize> {
    let pending = UtxoState::from(safe_keeper_domain::utxo::UtxoState::Pending);
    let keep_lock = matches!(to.into_inner(), safe_keeper_domain::utxo::UtxoState::Spent);

    diesel::update(
        schema::bitcoin_outputs::table
            .filter(schema::bitcoin_outputs::spent_by.eq(spent_by))
            .filter(schema::bitcoin_outputs::state.eq(pending)),
    )
    .set((
        schema::bitcoin_outputs::state.eq(to),
        schema::bitcoin_outputs::spent_by.eq(keep_lock.then_some(spent_by)),
        schema::bitcoin_outputs::updated_at.eq(updated_at),
    ))
    .execute(conn)
    .await
    .map_err(From::from)
}

pub async fn save_new_transaction(
    conn: &mut DbConn,
    new_transaction: NewTransactionRecord<'_>,
) -> Result<()> {
    diesel::insert_into(schema::transactions::table)
        .values(new_transaction)
        .execute(conn)
        .await?;

    Ok(())
}

pub async fn fetch_transaction_by_hash(
    conn: &mut DbConn,
    transaction_hash: &str,
) -> Result<Option<TransactionRecord>> {
    schema::transactions::table
        .filter(schema::transactions::transaction_hash.eq(transaction_hash))
        .first(conn)
        .await
        .optional()
        .map_err(From::from)
}

pub async fn fetch_transaction_by_request_id(
    conn: &mut DbConn,
    request_id: Uuid,
) -> Result<Option<TransactionRecord>> {
    schema::transactions::table
        .filter(schema::transactions::request_id.eq(request_id))
        .first(conn)
        .await
        .optional()
        .map_err(From::from)
}

pub async fn update_transaction_state(
    conn: &mut DbConn,
    transaction_hash: &str,
    from: TransactionState,
    to: TransactionState,
    updated_at: DateTime<Utc>,
) -> Result<bool> {
    let affected = diesel::update(
        schema::transactions::table
            .filter(schema::transactions::transaction_hash.eq(transaction_hash))
            .filter(schema::transactions::state.eq(from)),
    )
    .set((schema::transactions::state.eq(to), schema::transactions::updated_at.eq(updated_at)))
    .execute(conn)
    .await?;

    assert!(affected <= 1, "duplicate transaction hash must not exist");

    Ok(affected == 1)
}

pub async fn update_transaction_raw(
    conn: &mut DbConn,
    transaction_hash: &str,
    raw_transaction: &[u8],
    updated_at: DateTime<Utc>,
) -> Result<bool> {
    let affected = diesel::update(
        schema::transactions::table
            .filter(schema::transactions::transaction_hash.eq(transaction_hash)),
    )
    .set((
        schema::transactions::raw_transaction.eq(raw_transaction),
        schema::transactions::updated_at.eq(updated_at),
    ))
    .execute(conn)
    .await?;

    assert!(affected <= 1, "duplicate transaction hash must not exist");

    Ok(affected == 1)
}

pub async fn save_new_signature_request(
    conn: &mut DbConn,
    new_request: NewSignatureRequestRecord<'_>,
) -> Result<()> {
    diesel::insert_into(schema::signature_requests::table)
        .values(new_request)
        .execute(conn)
        .await?;

    Ok(())
}

pub async fn fetch_signature_request_by_id(
    conn: &mut DbConn,
    id: Uuid,
) -> Result<Option<SignatureRequestRecord>> {
    schema::signature_requests::table
        .filter(schema::signature_requests::id.eq(id))
        .first(conn)
        .await
        .optional()
        .map_err(From::from)
}

pub async fn fetch_signature_requests_by_transaction_hash(
    conn: &mut DbConn,
    transaction_hash: &str,
) -> Result<Vec<SignatureRequestRecord>> {
    schema::signature_requests::table
        .filter(schema::signature_requests::transaction_hash.eq(transaction_hash))
        .order_by(schema::signature_requests::input_index.asc())
        .load(conn)
        .await
        .map_err(From::from)
}

/// Fulfills a pending signature request. Returns `false` if it is missing or already done.
pub async fn update_pending_signature_request_signature(
    conn: &mut DbConn,
    id: Uuid,
    signature: &[u8],
    updated_at: DateTime<Utc>,
) -> Result<bool> {
    let pending = SignatureState::from(safe_keeper_domain::signature::SignatureState::Pending);
    let done = SignatureState::from(safe_keeper_domain::signature::SignatureState::Done);

    let affected = diesel::update(
        schema::signature_requests::table
            .filter(schema::signature_requests::id.eq(id))
            .filter(schema::signature_requests::state.eq(pending)),
    )
    .set((
        schema::signature_requests::signature.eq(signature),
        schema::signature_requests::state.eq(done),
        schema::signature_requests::updated_at.eq(updated_at),
    ))
    .execute(conn)
    .await?;

    assert!(affected <= 1, "duplicate signature request id must not exist");

    Ok(affected == 1)
}

pub async fn close_pending_signature_requests_by_transaction_hash(
    conn: &mut DbConn,
    transaction_hash: &str,
    updated_at: DateTime<Utc>,
) -> Result<usize> {
    let pending = SignatureState::from(safe_keeper_domain::signature::SignatureState::Pending);
    let done = SignatureState::from(safe_keeper_domain::signature::SignatureState::Done);

    diesel::update(
        schema::signature_requests::table
            .filter(schema::signature_requests::transaction_hash.eq(transaction_hash))
            .filter(schema::signature_requests::state.eq(pending)),
    )
    .set((
        schema::signature_requests::state.eq(done),
        schema::signature_requests::updated_at.eq(updated_at),
    ))
    .execute(conn)
    .await
    .map_err(From::from)
}

pub async fn fetch_accountant_balance(conn: &mut DbConn, holder: &str) -> Result<Option<String>> {
    schema::accountants::table
        .filter(schema::accountants::holder.eq(holder))
        .select(schema::accountants::balance)
        .first(conn)
        .await
        .optional()
        .map_err(From::from)
}

pub async fn upsert_accountant_balance(
    conn: &mut DbConn,
    holder: &str,
    balance: &str,
    updated_at: DateTime<Utc>,
) -> Result<()> {
    diesel::insert_into(schema::accountants::table)
        .values((
            schema::accountants::holder.eq(holder),
            schema::accountants::balance.eq(balance),
            schema::accountants::updated_at.eq(updated_at),
        ))
        .on_conflict(schema::accountants::holder)
        .do_update()
        .set((
            schema::accountants::balance.eq(upsert::excluded(schema::accountants::balance)),
            schema::accountants::updated_at.eq(upsert::excluded(schema::accountants::updated_at)),
        ))
        .execute(conn)
        .await?;

    Ok(())
}
