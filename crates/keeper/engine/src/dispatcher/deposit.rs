use safe_keeper_bitcoin::{
    DUST_SATOSHI, MAX_SEQUENCE,
    account::is_multisig_holder_signer_script,
    finality::{CONFIRMATIONS_OVERRIDE, confirmations, is_final},
};
use safe_keeper_domain::{
    VALUE_PRECISION, bond_asset_id, decimal_from_units,
    extra::DepositExtra,
    outbound::{OutboundKind, OutboundMessage, Transfer},
    request::{Action, Request, Role},
    unique_id,
    utxo::{BitcoinOutput, MAX_OUTPUT_INDEX, UtxoKind},
};
use safe_keeper_rpc_client::ChainTransaction;

use super::{DispatchError, Dispatcher, Outcome, Result, is_expired};

/// Where a deposit must land and how the resulting output is spent.
struct DepositTarget {
    kind: UtxoKind,
    address: String,
    script: Vec<u8>,
    sequence: u32,
}

impl Dispatcher {
    /// Verifies a deposit reported by the observer and records it as a spendable output.
    pub(super) async fn process_deposit(&self, request: &Request) -> Result<Outcome> {
        let Ok(extra) = DepositExtra::decode(request.extra()) else {
            return Ok(Outcome::rejected("malformed deposit"));
        };
        if extra.asset_id != extra.chain.asset_id() {
            return Ok(Outcome::rejected(format!("asset {} is not native", extra.asset_id)));
        }
        let Some(index) =
            u32::try_from(extra.index).ok().filter(|index| *index <= MAX_OUTPUT_INDEX)
        else {
            return Ok(Outcome::rejected(format!("output index {} out of range", extra.index)));
        };

        let Some(safe) = self.store.read_safe(request.holder()).await? else {
            return Ok(Outcome::rejected("unknown safe"));
        };
        if !safe.is_approved() || safe.chain() != extra.chain {
            return Ok(Outcome::rejected("safe not approved"));
        }
        if self.store.read_bitcoin_output(&extra.hash, index).await?.is_some() {
            return Ok(Outcome::rejected(format!("output {}:{index} already recorded", extra.hash)));
        }

        let (main, fee) = self.derive_accounts(
            safe.holder(),
            safe.signer(),
            safe.observer(),
            safe.accountant(),
            safe.timelock(),
        )?;
        let target = match request.action() {
            Action::ObserverHolderDeposit if !is_multisig_holder_signer_script(safe.script()) => {
                return Err(DispatchError::invariant(format!(
                    "safe {} without holder signer script",
                    safe.address()
                )));
            },
            Action::ObserverHolderDeposit => DepositTarget {
                kind: UtxoKind::Main,
                address: safe.address().to_string(),
                script: safe.script().to_vec(),
                sequence: main.sequence.to_consensus_u32(),
            },
            _ => DepositTarget {
                kind: UtxoKind::Fee,
                address: safe.accountant_address().to_string(),
                script: fee.script.to_bytes(),
                sequence: MAX_SEQUENCE,
            },
        };

        let Some(plan) = self.store.read_latest_account_plan(extra.chain).await? else {
            return Ok(Outcome::rejected("no account plan"));
        };
        let Some(info) = self.store.read_latest_network_info(extra.chain).await? else {
            return Ok(Outcome::rejected("no network info"));
        };
        if info.created_at() > request.created_at() {
            return Err(DispatchError::invariant(format!(
                "network info {} dated after request",
                info.request_id()
            )));
        }
        let timeout = self.config.network_info_timeout();
        if is_expired(info.created_at(), timeout, request.created_at()) {
            return Ok(Outcome::rejected(format!("network info {} is stale", info.request_id())));
        }

        let result = self
            .call_chain("get_transaction_output", |chain| {
                chain.get_transaction_output(&extra.hash, index)
            })
            .await;
        let (transaction, output) = match result {
            Ok(found) => found,
            Err(err) if err.is_not_found() => {
                return Ok(Outcome::rejected(format!("output {}:{index} not found", extra.hash)));
            },
            Err(err) => return Err(err.into()),
        };
        if output.address != target.address || output.satoshi != extra.amount {
            return Err(DispatchError::invariant(format!(
                "malicious deposit {}:{index}: {} sat to {}",
                extra.hash, output.satoshi, output.address
            )));
        }

        let change = self.is_change(&transaction, index).await?;
        let amount = decimal_from_units(extra.amount, VALUE_PRECISION);
        if !change && amount < plan.transaction_minimum() {
            return Ok(Outcome::rejected(format!(
                "deposit {amount} below minimum {}",
                plan.transaction_minimum()
            )));
        }
        if extra.amount < DUST_SATOSHI {
            return Err(DispatchError::invariant(format!(
                "deposit {}:{index} of {} sat below dust",
                extra.hash, extra.amount
            )));
        }

        let sender = self
            .call_chain("get_transaction_sender", |chain| {
                chain.get_transaction_sender(&transaction)
            })
            .await?;
        let confirmed = if self.store.is_safe_address(&sender).await?
            || self.config.is_trusted_address(&sender)
        {
            CONFIRMATIONS_OVERRIDE
        } else {
            confirmations(info.height(), output.height)
        };
        if !is_final(confirmed, output.coinbase) {
            return Ok(Outcome::abstained(format!(
                "{confirmed} confirmations of {}:{index}",
                extra.hash
            )));
        }

        let utxo = BitcoinOutput::builder()
            .transaction_hash(extra.hash.clone())
            .index(index)
            .address(target.address)
            .satoshi(extra.amount)
            .script(target.script)
            .sequence(target.sequence)
            .kind(target.kind)
            .holder(safe.holder().to_string())
            .chain(extra.chain)
            .request_id(request.id())
            .created_at(request.created_at())
            .build();

        let (credit, transfer) = match (target.kind, change) {
            (UtxoKind::Fee, false) => (Some(amount), None),
            (UtxoKind::Main, false) => {
                let trace_id = unique_id(&request.id().to_string(), "bond");
                let transfer = Transfer {
                    asset_id: bond_asset_id(extra.asset_id, safe.holder()),
                    receivers: safe.receivers().to_vec(),
                    threshold: safe.threshold(),
                    amount,
                    trace_id,
                };
                let payload = serde_json::to_vec(&transfer)
                    .map_err(|err| DispatchError::other(format!("bond transfer: {err}")))?;

                let message = OutboundMessage::builder()
                    .id(trace_id)
                    .request_id(request.id())
                    .receiver(Role::Holder)
                    .kind(OutboundKind::Transfer)
                    .payload(payload)
                    .created_at(request.created_at())
                    .build();
                (None, Some(message))
            },
            (_, true) => (None, None),
        };

        self.store
            .write_bitcoin_output_with_request(request, &utxo, credit, transfer.as_ref())
            .await?;
        tracing::info!(kind = %target.kind, %amount, change, "deposit recorded");

        Ok(Outcome::Committed)
    }

    /// Returns whether output `index` of `transaction` is change of a withdrawal of this keeper.
    ///
    /// A withdrawal spends outputs the keeper has recorded, and its change follows the declared
    /// payments in output order.
    async fn is_change(&self, transaction: &ChainTransaction, index: u32) -> Result<bool> {
        let Some(input) = transaction.inputs.first() else {
            return Ok(false);
        };
        let spent = self.store.read_bitcoin_output(&input.transaction_hash, input.index).await?;
        let Some(spent) = spent else {
            return Ok(false);
        };
        let Some(spent_by) = spent.spent_by() else {
            return Ok(false);
        };

        let Some(withdrawal) = self.store.read_transaction(spent_by).await? else {
            return Err(DispatchError::invariant(format!(
                "output {}:{} spent by unknown transaction {spent_by}",
                input.transaction_hash, input.index
            )));
        };
        if withdrawal.data().is_empty() {
            return Err(DispatchError::invariant(format!(
                "transaction {spent_by} without recipients"
            )));
        }

        Ok(index as usize >= withdrawal.data().len())
    }
}
