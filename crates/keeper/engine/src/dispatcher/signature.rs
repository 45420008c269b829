use bitcoin::hashes::{Hash, sha256};
use safe_keeper_bitcoin::{
    account::parse_public_key,
    signature::verify_signature,
    transaction::{add_partial_signature, deserialize_psbt, input_sighash, serialize_psbt},
};
use safe_keeper_domain::{
    outbound::{Operation, OperationKind, OutboundKind},
    request::{Request, Role},
    signature::SignatureState,
    tx::TransactionState,
    unique_id,
};

use super::{DispatchError, Dispatcher, Outcome, Result, is_expired, operation_message};

impl Dispatcher {
    /// Collects a signer signature for one input of a withdrawal.
    ///
    /// The request id is the id of the signature request it answers. The last missing signature
    /// finalizes the withdrawal.
    pub(super) async fn add_signature(&self, request: &Request) -> Result<Outcome> {
        let Some(signature_request) = self.store.read_signature_request(request.id()).await? else {
            return Ok(Outcome::finished("unknown signature request"));
        };
        if signature_request.state() == SignatureState::Done {
            return Ok(Outcome::finished("signature request already done"));
        }
        let timeout = self.config.signature_timeout();
        if is_expired(signature_request.created_at(), timeout, request.created_at()) {
            return Ok(Outcome::finished("signature request timed out"));
        }

        let hash = signature_request.transaction_hash();
        let Some(transaction) = self.store.read_transaction(hash).await? else {
            return Err(DispatchError::invariant(format!(
                "signature request {} of unknown transaction {hash}",
                signature_request.id()
            )));
        };
        if !matches!(transaction.state(), TransactionState::Initial | TransactionState::Pending) {
            return Ok(Outcome::finished(format!("transaction already {}", transaction.state())));
        }

        if request.holder() != signature_request.signer() {
            return Ok(Outcome::rejected("signature of another signer"));
        }

        let mut psbt = deserialize_psbt(transaction.raw_transaction())?;
        let index = signature_request.input_index() as usize;
        let digest = input_sighash(&psbt, index)?;
        if digest.as_slice() != signature_request.message() {
            return Err(DispatchError::invariant(format!(
                "signature request {} digest differs from input {index} of {hash}",
                signature_request.id()
            )));
        }

        if verify_signature(request.holder(), &digest, request.extra()).is_err() {
            return Ok(Outcome::rejected("invalid signer signature"));
        }

        let signature_requests = self.store.list_signature_requests(hash).await?;
        let outstanding = signature_requests
            .iter()
            .filter(|other| other.id() != signature_request.id())
            .any(|other| other.state() == SignatureState::Pending);
        if outstanding {
            let state = self
                .store
                .write_signature_response_with_request(
                    request,
                    signature_request.id(),
                    request.extra(),
                )
                .await?;
            tracing::info!(transaction_hash = %hash, index, %state, "signature collected");

            return Ok(Outcome::Committed);
        }

        for fulfilled in &signature_requests {
            let signature = if fulfilled.id() == signature_request.id() {
                request.extra()
            } else {
                match fulfilled.signature() {
                    Some(signature) => signature,
                    None => {
                        return Err(DispatchError::invariant(format!(
                            "signature request {} done without signature",
                            fulfilled.id()
                        )));
                    },
                }
            };
            add_partial_signature(
                &mut psbt,
                fulfilled.input_index() as usize,
                parse_public_key(fulfilled.signer())?,
                signature,
            )?;
        }

        let signed = serialize_psbt(&psbt);
        let holder = hex::decode(transaction.holder())
            .map_err(|err| DispatchError::other(format!("holder key: {err}")))?;
        let notification = Operation {
            id: unique_id(hash, &sha256::Hash::hash(&signed).to_string()),
            kind: OperationKind::TransactionSigned,
            curve: request.curve(),
            public: holder,
            extra: signed.clone(),
        };
        let notification = operation_message(
            request,
            Role::Observer,
            OutboundKind::ObserverNotification,
            &notification,
        );

        self.store
            .finalize_transaction_with_request(
                request,
                signature_request.id(),
                request.extra(),
                &signed,
                &notification,
            )
            .await?;
        tracing::info!(transaction_hash = %hash, "transaction signed");

        Ok(Outcome::Committed)
    }
}
