use core::time::Duration;

use safe_keeper_bitcoin::{
    account::{
        WitnessKeyAccount, WitnessScriptAccount, build_witness_key_account,
        build_witness_script_account,
    },
    signature::{message_digest, verify_signature},
};
use safe_keeper_domain::{
    extra::{ProposeAccountExtra, SignedReferenceExtra},
    outbound::{Operation, OperationKind, OutboundKind, OutboundMessage, SafeProposal},
    request::{Chain, Request, Role},
    safe::{Safe, SafeState},
    unique_id,
};

use super::{DispatchError, Dispatcher, Outcome, Result, operation_message};

impl Dispatcher {
    /// Derives the main and fee paying accounts of a safe.
    pub(super) fn derive_accounts(
        &self,
        holder: &str,
        signer: &str,
        observer: &str,
        accountant: &str,
        timelock: Duration,
    ) -> Result<(WitnessScriptAccount, WitnessKeyAccount)> {
        let network = self.config.network();
        let main = build_witness_script_account(holder, signer, observer, timelock, network)?;
        let fee = build_witness_key_account(accountant, network)?;
        Ok((main, fee))
    }

    pub(super) async fn propose_account(&self, request: &Request) -> Result<Outcome> {
        let Ok(extra) = ProposeAccountExtra::decode(request.extra()) else {
            return Ok(Outcome::rejected("malformed safe proposal"));
        };

        if self.store.read_safe(request.holder()).await?.is_some() {
            return Ok(Outcome::rejected("safe already exists"));
        }

        let Some(plan) = self.store.read_latest_account_plan(Chain::Bitcoin).await? else {
            return Ok(Outcome::rejected("no account plan"));
        };
        if request.asset_id() != plan.price_asset() || request.amount() < plan.price_amount() {
            return Ok(Outcome::rejected(format!(
                "account price {} of {} not paid",
                plan.price_amount(),
                plan.price_asset()
            )));
        }

        let mut keys = Vec::with_capacity(3);
        for role in [Role::Signer, Role::Observer, Role::Accountant] {
            match self.store.read_spare_key(role).await? {
                Some(key) => keys.push(key.public_key().to_string()),
                None => return Ok(Outcome::rejected(format!("no spare {role} key"))),
            }
        }
        let [signer, observer, accountant] = <[String; 3]>::try_from(keys)
            .map_err(|_| DispatchError::other("spare keys lookup"))?;

        let timelock = self.config.timelock();
        let (main, fee) =
            self.derive_accounts(request.holder(), &signer, &observer, &accountant, timelock)?;

        let safe = Safe::builder()
            .holder(request.holder().to_string())
            .chain(Chain::Bitcoin)
            .signer(signer)
            .observer(observer)
            .accountant(accountant)
            .timelock(timelock)
            .address(main.address.to_string())
            .script(main.script.to_bytes())
            .accountant_address(fee.address.to_string())
            .threshold(extra.threshold)
            .receivers(extra.receivers)
            .state(SafeState::Proposed)
            .request_id(request.id())
            .aux(())
            .build();

        let proposal = SafeProposal {
            address: safe.address().to_string(),
            script: safe.script().to_vec(),
            sequence: main.sequence.to_consensus_u32(),
            accountant_address: safe.accountant_address().to_string(),
        };
        let notification = safe_notification(
            request,
            OperationKind::SafeProposed,
            "proposed",
            proposal.encode(),
        )?;

        let safe = self.store.write_safe_proposal_with_request(request, safe, &notification).await?;
        tracing::info!(address = %safe.address(), "safe proposed");

        Ok(Outcome::Committed)
    }

    pub(super) async fn approve_account(&self, request: &Request) -> Result<Outcome> {
        let Ok(extra) = SignedReferenceExtra::decode(request.extra()) else {
            return Ok(Outcome::rejected("malformed safe approval"));
        };

        let Some(safe) = self.store.read_safe(request.holder()).await? else {
            return Ok(Outcome::rejected("unknown safe"));
        };
        if safe.request_id() != extra.request_id {
            return Ok(Outcome::rejected("approval of another proposal"));
        }
        if safe.state() != SafeState::Proposed {
            return Ok(Outcome::rejected(format!("safe already {}", safe.state())));
        }

        let digest = message_digest(safe.address());
        if verify_signature(safe.holder(), &digest, &extra.signature).is_err() {
            return Ok(Outcome::rejected("invalid holder signature"));
        }

        let (main, fee) = self.derive_accounts(
            safe.holder(),
            safe.signer(),
            safe.observer(),
            safe.accountant(),
            safe.timelock(),
        )?;
        if main.address.to_string() != safe.address()
            || main.script.as_bytes() != safe.script()
            || fee.address.to_string() != safe.accountant_address()
        {
            return Err(DispatchError::invariant(format!(
                "safe of {} derives to {} instead of {}",
                safe.holder(),
                main.address,
                safe.address()
            )));
        }

        let notification = safe_notification(
            request,
            OperationKind::SafeApproved,
            "approved",
            safe.address().as_bytes().to_vec(),
        )?;

        self.store.approve_safe_with_request(request, safe.holder(), &notification).await?;

        Ok(Outcome::Committed)
    }
}

fn safe_notification(
    request: &Request,
    kind: OperationKind,
    label: &str,
    extra: Vec<u8>,
) -> Result<OutboundMessage> {
    let id = unique_id(&request.id().to_string(), label);
    let public = hex::decode(request.holder())
        .map_err(|err| DispatchError::other(format!("holder key: {err}")))?;

    let operation = Operation { id, kind, curve: request.curve(), public, extra };

    Ok(operation_message(request, Role::Observer, OutboundKind::ObserverNotification, &operation))
}
