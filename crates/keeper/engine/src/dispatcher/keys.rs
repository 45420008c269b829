use safe_keeper_domain::{
    extra::{AddKeyExtra, RequestSignerKeysExtra},
    outbound::{Operation, OperationKind, OutboundKind},
    request::{Action, Request, Role},
    unique_id,
};

use super::{Dispatcher, Outcome, Result, operation_message};

impl Dispatcher {
    /// Registers a spare key produced by the signer quorum or added by the observer.
    pub(super) async fn add_key(&self, request: &Request) -> Result<Outcome> {
        let Ok(AddKeyExtra { role }) = AddKeyExtra::decode(request.extra()) else {
            return Ok(Outcome::finished("malformed key extra"));
        };

        let allowed = match (request.action(), role) {
            (Action::SignerKeygenOutput, Role::Signer) => true,
            (Action::ObserverAddKey, Role::Observer | Role::Accountant) => true,
            _ => false,
        };
        if !allowed {
            return Ok(Outcome::finished(format!("{} may not add {role} keys", request.role())));
        }

        if !self.store.write_key_from_request(request, role).await? {
            tracing::info!(key = %request.holder(), "key already registered");
        }

        Ok(Outcome::Committed)
    }

    /// Asks the signer quorum for a batch of new keys.
    pub(super) async fn request_signer_keys(&self, request: &Request) -> Result<Outcome> {
        let Ok(RequestSignerKeysExtra { batch }) = RequestSignerKeysExtra::decode(request.extra())
        else {
            return Ok(Outcome::rejected("malformed key batch"));
        };

        let messages = (0..batch)
            .map(|index| {
                let id = unique_id(&request.id().to_string(), &format!("keygen:{index}"));
                let operation = Operation {
                    id,
                    kind: OperationKind::KeygenInput,
                    curve: request.curve(),
                    public: Vec::new(),
                    extra: Vec::new(),
                };

                operation_message(request, Role::Signer, OutboundKind::KeygenRequest, &operation)
            })
            .collect::<Vec<_>>();

        self.store.write_outbound_with_request(request, &messages).await?;

        Ok(Outcome::Committed)
    }
}
