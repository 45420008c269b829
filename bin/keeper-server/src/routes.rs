use axum::{Json, extract::State, http::StatusCode};
use safe_keeper_domain::request::Chain;
use safe_keeper_engine::{
    request::{
        GetAccountantBalanceRequest, GetNetworkStatusRequest, GetSafeRequest,
        GetTransactionRequest, ListOutboundRequest, SubmitRequest,
    },
    response::{
        GetAccountantBalanceResponseDissolved, GetNetworkStatusResponseDissolved,
        GetSafeResponseDissolved, GetTransactionResponseDissolved, ListOutboundResponseDissolved,
        SubmitResponseDissolved,
    },
};

use crate::{
    App, AppDissolved,
    error::AppError,
    payload::{
        request::{
            GetAccountantBalanceRequestPayload, GetAccountantBalanceRequestPayloadDissolved,
            GetNetworkStatusRequestPayload, GetNetworkStatusRequestPayloadDissolved,
            GetSafeDetailsRequestPayload, GetSafeDetailsRequestPayloadDissolved,
            GetTransactionDetailsRequestPayload, GetTransactionDetailsRequestPayloadDissolved,
            ListOutboundRequestPayload, ListOutboundRequestPayloadDissolved,
            SubmitRequestPayload, SubmitRequestPayloadDissolved,
        },
        response::{
            GetAccountantBalanceResponsePayload, GetNetworkStatusResponsePayload,
            GetSafeDetailsResponsePayload, GetTransactionDetailsResponsePayload,
            ListOutboundResponsePayload, SubmitRequestResponsePayload,
        },
    },
};

#[tracing::instrument]
pub async fn health() -> StatusCode {
    StatusCode::OK
}

#[tracing::instrument(skip_all)]
pub async fn submit_request(
    State(app): State<App>,
    Json(payload): Json<SubmitRequestPayload>,
) -> Result<Json<SubmitRequestResponsePayload>, AppError> {
    let AppDissolved { engine } = app.dissolve();

    let SubmitRequestPayloadDissolved {
        id,
        action,
        role,
        curve,
        holder,
        asset_id,
        amount,
        extra,
        created_at,
    } = payload.dissolve();

    let request = SubmitRequest::builder()
        .id(id)
        .action(action)
        .role(role)
        .curve(curve)
        .holder(holder)
        .asset_id(asset_id)
        .amount(amount)
        .extra(extra)
        .created_at(created_at)
        .build()
        .inspect_err(|e| tracing::warn!(%id, "request envelope refused: {e}"))?;

    let SubmitResponseDissolved { created } = engine
        .submit_request(request)
        .await
        .inspect_err(|e| tracing::error!(%id, "failed to submit request: {e}"))?
        .dissolve();

    let response = SubmitRequestResponsePayload::builder().created(created).build();

    Ok(Json(response))
}

#[tracing::instrument(skip_all)]
pub async fn get_safe_details(
    State(app): State<App>,
    Json(payload): Json<GetSafeDetailsRequestPayload>,
) -> Result<Json<GetSafeDetailsResponsePayload>, AppError> {
    let AppDissolved { engine } = app.dissolve();

    let GetSafeDetailsRequestPayloadDissolved { holder } = payload.dissolve();

    let request = GetSafeRequest::builder().holder(holder).build();

    let GetSafeResponseDissolved { safe } = engine.get_safe(request).await?.dissolve();

    let safe = safe.ok_or(AppError::SafeNotFound)?;

    let response = GetSafeDetailsResponsePayload::builder().safe(safe.into()).build();

    Ok(Json(response))
}

#[tracing::instrument(skip_all)]
pub async fn get_transaction_details(
    State(app): State<App>,
    Json(payload): Json<GetTransactionDetailsRequestPayload>,
) -> Result<Json<GetTransactionDetailsResponsePayload>, AppError> {
    let AppDissolved { engine } = app.dissolve();

    let GetTransactionDetailsRequestPayloadDissolved { transaction_hash } = payload.dissolve();

    let request = GetTransactionRequest::builder().transaction_hash(transaction_hash).build();

    let GetTransactionResponseDissolved { transaction, signature_requests } =
        engine.get_transaction(request).await?.dissolve();

    let transaction = transaction.ok_or(AppError::TransactionNotFound)?;

    let response = GetTransactionDetailsResponsePayload::builder()
        .transaction(transaction.into())
        .signature_requests(signature_requests.into_iter().map(From::from).collect())
        .build();

    Ok(Json(response))
}

#[tracing::instrument(skip_all)]
pub async fn get_accountant_balance(
    State(app): State<App>,
    Json(payload): Json<GetAccountantBalanceRequestPayload>,
) -> Result<Json<GetAccountantBalanceResponsePayload>, AppError> {
    let AppDissolved { engine } = app.dissolve();

    let GetAccountantBalanceRequestPayloadDissolved { holder } = payload.dissolve();

    let request = GetAccountantBalanceRequest::builder().holder(holder).build();

    let GetAccountantBalanceResponseDissolved { balance } =
        engine.get_accountant_balance(request).await?.dissolve();

    let response = GetAccountantBalanceResponsePayload::builder().balance(balance).build();

    Ok(Json(response))
}

#[tracing::instrument(skip_all)]
pub async fn list_outbound(
    State(app): State<App>,
    Json(payload): Json<ListOutboundRequestPayload>,
) -> Result<Json<ListOutboundResponsePayload>, AppError> {
    let AppDissolved { engine } = app.dissolve();

    let ListOutboundRequestPayloadDissolved { after_seq, limit } = payload.dissolve();

    let request = ListOutboundRequest::builder()
        .maybe_after_seq(after_seq)
        .maybe_limit(limit)
        .build();

    let ListOutboundResponseDissolved { messages } =
        engine.list_outbound(request).await?.dissolve();

    let next_seq = messages.last().map(|message| message.seq());

    let response = ListOutboundResponsePayload::builder()
        .messages(messages.into_iter().map(From::from).collect())
        .maybe_next_seq(next_seq)
        .build();

    Ok(Json(response))
}

#[tracing::instrument(skip_all)]
pub async fn get_network_status(
    State(app): State<App>,
    Json(payload): Json<GetNetworkStatusRequestPayload>,
) -> Result<Json<GetNetworkStatusResponsePayload>, AppError> {
    let AppDissolved { engine } = app.dissolve();

    let GetNetworkStatusRequestPayloadDissolved { chain } = payload.dissolve();

    let chain = chain
        .map(|tag| Chain::from_repr(tag).ok_or(AppError::InvalidChain(tag)))
        .transpose()?;

    let request = GetNetworkStatusRequest::builder().maybe_chain(chain).build();

    let GetNetworkStatusResponseDissolved { info, head } =
        engine.get_network_status(request).await?.dissolve();

    let lag = info.as_ref().map(|info| head.height.saturating_sub(info.height()));

    let response = GetNetworkStatusResponsePayload::builder()
        .maybe_info(info.map(From::from))
        .head(head.into())
        .maybe_lag(lag)
        .build();

    Ok(Json(response))
}
