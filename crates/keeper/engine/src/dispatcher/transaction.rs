use bitcoin::ScriptBuf;
use safe_keeper_bitcoin::{
    BitcoinError, DUST_SATOSHI,
    account::parse_address,
    signature::{message_digest, verify_signature},
    transaction::{
        SpendableOutput, build_transaction, deserialize_psbt, input_sighash, serialize_psbt,
        spent_outpoints,
    },
};
use safe_keeper_domain::{
    VALUE_PRECISION, decimal_from_units, decimal_to_units,
    extra::{ProposeTransactionExtra, SignedReferenceExtra},
    outbound::{Operation, OperationKind, OutboundKind},
    request::{Chain, Request, Role},
    signature::{SignatureRequest, signature_request_id},
    tx::{Recipient, Transaction, TransactionState},
    unique_id,
    utxo::{BitcoinOutput, UtxoKind},
};

use super::{DispatchError, Dispatcher, Outcome, Result, is_expired, operation_message};

impl Dispatcher {
    /// Builds a withdrawal from every unspent output of the holder's safe and accountant.
    pub(super) async fn propose_transaction(&self, request: &Request) -> Result<Outcome> {
        let Ok(extra) = ProposeTransactionExtra::decode(request.extra()) else {
            return Ok(Outcome::rejected("malformed transaction proposal"));
        };
        if request.asset_id() != Chain::Bitcoin.asset_id() {
            return Ok(Outcome::rejected(format!("asset {} is not native", request.asset_id())));
        }
        let Some(satoshi) = decimal_to_units(request.amount(), VALUE_PRECISION) else {
            return Ok(Outcome::rejected(format!("amount {} not in satoshi", request.amount())));
        };

        let Some(safe) = self.store.read_safe(request.holder()).await? else {
            return Ok(Outcome::rejected("unknown safe"));
        };
        if !safe.is_approved() {
            return Ok(Outcome::rejected("safe not approved"));
        }

        let Some(info) = self.store.read_network_info(extra.network_info_id).await? else {
            return Ok(Outcome::rejected(format!("unknown network info {}", extra.network_info_id)));
        };
        if info.chain() != safe.chain() || info.created_at() > request.created_at() {
            return Ok(Outcome::rejected(format!("network info {} not usable", info.request_id())));
        }
        let timeout = self.config.network_info_timeout();
        if is_expired(info.created_at(), timeout, request.created_at()) {
            return Ok(Outcome::rejected(format!("network info {} is stale", info.request_id())));
        }

        let network = self.config.network();
        let Ok(receiver) = parse_address(&extra.receiver, network) else {
            return Ok(Outcome::rejected(format!("invalid receiver {}", extra.receiver)));
        };
        if satoshi < DUST_SATOSHI {
            return Ok(Outcome::rejected(format!("payment {satoshi} below dust")));
        }

        let mains = self.store.list_unspent_outputs(safe.holder(), UtxoKind::Main).await?;
        let fees = self.store.list_unspent_outputs(safe.holder(), UtxoKind::Fee).await?;
        if mains.is_empty() || fees.is_empty() {
            return Ok(Outcome::rejected("no spendable outputs"));
        }

        let safe_address = parse_address(safe.address(), network)?;
        let accountant_address = parse_address(safe.accountant_address(), network)?;
        let proposed = match build_transaction()
            .main_inputs(&spendable(&mains))
            .fee_inputs(&spendable(&fees))
            .receiver(&receiver)
            .amount(satoshi)
            .safe_address(&safe_address)
            .accountant_address(&accountant_address)
            .fee_rate(info.fee_rate())
            .memo(request.id().as_bytes())
            .call()
        {
            Ok(proposed) => proposed,
            Err(BitcoinError::InsufficientInputs(reason)) => return Ok(Outcome::Rejected(reason)),
            Err(err @ BitcoinError::FeeOverflow { .. }) => {
                return Ok(Outcome::rejected(err.to_string()));
            },
            Err(err) => return Err(err.into()),
        };

        let fee = decimal_from_units(proposed.fee, VALUE_PRECISION);
        let balance = self.store.read_accountant_balance(safe.holder()).await?;
        if balance < fee {
            return Ok(Outcome::rejected(format!("accountant balance {balance} below fee {fee}")));
        }

        let hash = proposed.txid.to_string();
        let psbt = serialize_psbt(&proposed.psbt);
        let signer = hex::decode(safe.signer())
            .map_err(|err| DispatchError::other(format!("signer key: {err}")))?;

        let mut signature_requests = Vec::with_capacity(proposed.main_inputs);
        let mut messages = Vec::with_capacity(proposed.main_inputs + 1);
        for index in 0..proposed.main_inputs {
            let digest = input_sighash(&proposed.psbt, index)?;
            let input_index = u32::try_from(index)
                .map_err(|_| DispatchError::other(format!("input index {index}")))?;
            let id = signature_request_id(&hash, input_index);

            let operation = Operation {
                id,
                kind: OperationKind::SignInput,
                curve: request.curve(),
                public: signer.clone(),
                extra: digest.to_vec(),
            };
            messages.push(operation_message(
                request,
                Role::Signer,
                OutboundKind::SignatureRequest,
                &operation,
            ));

            signature_requests.push(
                SignatureRequest::builder()
                    .id(id)
                    .transaction_hash(hash.clone())
                    .input_index(input_index)
                    .signer(safe.signer().to_string())
                    .message(digest.to_vec())
                    .created_at(request.created_at())
                    .build(),
            );
        }

        let holder = hex::decode(safe.holder())
            .map_err(|err| DispatchError::other(format!("holder key: {err}")))?;
        let notification = Operation {
            id: unique_id(&hash, "proposed"),
            kind: OperationKind::TransactionProposed,
            curve: request.curve(),
            public: holder,
            extra: psbt.clone(),
        };
        messages.push(operation_message(
            request,
            Role::Observer,
            OutboundKind::ObserverNotification,
            &notification,
        ));

        let transaction = Transaction::builder()
            .transaction_hash(hash)
            .raw_transaction(psbt)
            .holder(safe.holder().to_string())
            .chain(safe.chain())
            .data(vec![Recipient {
                amount: decimal_from_units(satoshi, VALUE_PRECISION),
                receiver: extra.receiver,
            }])
            .fee(fee)
            .request_id(request.id())
            .aux(())
            .build();

        let inputs = [mains, fees].concat();
        let transaction = self
            .store
            .write_transaction_with_request(
                request,
                transaction,
                &inputs,
                &signature_requests,
                &messages,
            )
            .await?;
        tracing::info!(
            transaction_hash = %transaction.transaction_hash(),
            fee = %transaction.fee(),
            inputs = inputs.len(),
            "transaction proposed"
        );

        Ok(Outcome::Committed)
    }

    /// Revokes a withdrawal nobody signed yet, on behalf of its holder.
    pub(super) async fn revoke_transaction(&self, request: &Request) -> Result<Outcome> {
        let Ok(extra) = SignedReferenceExtra::decode(request.extra()) else {
            return Ok(Outcome::rejected("malformed revocation"));
        };

        let Some(transaction) = self.store.read_transaction_by_request_id(extra.request_id).await?
        else {
            return Ok(Outcome::rejected(format!("no transaction of {}", extra.request_id)));
        };
        if transaction.holder() != request.holder() {
            return Ok(Outcome::rejected("transaction of another holder"));
        }
        if transaction.state() != TransactionState::Initial {
            return Ok(Outcome::rejected(format!("transaction already {}", transaction.state())));
        }

        let digest = message_digest(transaction.transaction_hash());
        if verify_signature(request.holder(), &digest, &extra.signature).is_err() {
            return Ok(Outcome::rejected("invalid holder signature"));
        }

        let Some(safe) = self.store.read_safe(transaction.holder()).await? else {
            return Err(DispatchError::invariant(format!(
                "transaction {} without safe",
                transaction.transaction_hash()
            )));
        };
        let inputs = self.store.list_outputs_spent_by(transaction.transaction_hash()).await?;
        if let Some(foreign) = inputs.iter().find(|input| {
            input.address() != safe.address() && input.address() != safe.accountant_address()
        }) {
            return Err(DispatchError::invariant(format!(
                "transaction {} spends foreign output {}:{}",
                transaction.transaction_hash(),
                foreign.transaction_hash(),
                foreign.index()
            )));
        }

        let mut spent = spent_outpoints(&deserialize_psbt(transaction.raw_transaction())?);
        let mut locked = inputs
            .iter()
            .map(|input| (input.transaction_hash().to_string(), input.index()))
            .collect::<Vec<_>>();
        spent.sort_unstable();
        locked.sort_unstable();
        if spent != locked {
            return Err(DispatchError::invariant(format!(
                "transaction {} locks {} outputs but spends {}",
                transaction.transaction_hash(),
                locked.len(),
                spent.len()
            )));
        }

        self.store
            .revoke_transaction_with_request(request, transaction.transaction_hash())
            .await?;
        tracing::info!(transaction_hash = %transaction.transaction_hash(), "transaction revoked");

        Ok(Outcome::Committed)
    }
}

fn spendable(outputs: &[BitcoinOutput]) -> Vec<SpendableOutput> {
    outputs
        .iter()
        .map(|output| SpendableOutput {
            transaction_hash: output.transaction_hash().to_string(),
            index: output.index(),
            satoshi: output.satoshi(),
            script: ScriptBuf::from_bytes(output.script().to_vec()),
        })
        .collect()
}
