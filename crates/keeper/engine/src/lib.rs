//! The safe keeper engine.
//!
//! [`KeeperEngine`] owns the dispatcher runtime, the single worker that replays the request feed
//! against the custody state, and serves the intake and read operations of the HTTP API.
//! Requests only enter the feed through [`KeeperEngine::submit_request`]; every state change
//! they cause happens on the runtime thread.

#![allow(missing_docs)]

mod config;
mod dispatcher;
mod dispatcher_runtime;
mod error;
mod types;

pub use self::{
    config::{KeeperConfig, RetryPolicy},
    dispatcher::{DispatchError, Dispatcher, Outcome},
    error::KeeperEngineError,
    types::{request, response},
};

use std::{sync::Arc, thread::JoinHandle};

use safe_keeper_rpc_client::ChainRpc;
use safe_keeper_store::KeeperStore;
use tokio::{
    runtime::Runtime,
    sync::{
        mpsc::{self, error::SendError},
        watch,
    },
};

use self::{
    dispatcher_runtime::msg::DispatcherMsg,
    error::KeeperEngineErrorKind,
    types::{
        request::{
            GetAccountantBalanceRequest, GetAccountantBalanceRequestDissolved,
            GetNetworkStatusRequest, GetNetworkStatusRequestDissolved, GetSafeRequest,
            GetSafeRequestDissolved, GetTransactionRequest, GetTransactionRequestDissolved,
            ListOutboundRequest, ListOutboundRequestDissolved, SubmitRequest,
            SubmitRequestDissolved,
        },
        response::{
            GetAccountantBalanceResponse, GetNetworkStatusResponse, GetSafeResponse,
            GetTransactionResponse, ListOutboundResponse, SubmitResponse,
        },
    },
};

pub struct KeeperEngine<R> {
    dispatcher: Dispatcher,
    runtime: R,
}

pub struct Stopped;

pub struct Started {
    sender: mpsc::UnboundedSender<DispatcherMsg>,
    halted: watch::Receiver<bool>,
    handle: JoinHandle<Result<(), DispatchError>>,
}

impl<R> KeeperEngine<R> {
    pub fn config(&self) -> &KeeperConfig {
        self.dispatcher.config()
    }

    pub fn store(&self) -> &KeeperStore {
        self.dispatcher.store()
    }
}

impl KeeperEngine<Stopped> {
    pub fn new(config: KeeperConfig, store: KeeperStore, chain: Arc<dyn ChainRpc>) -> Self {
        Self { dispatcher: Dispatcher::new(Arc::new(config), store, chain), runtime: Stopped }
    }

    pub fn start_dispatcher_runtime(self, rt: Runtime) -> KeeperEngine<Started> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (halted_sender, halted) = watch::channel(false);

        let handle =
            dispatcher_runtime::spawn_new(rt, receiver, halted_sender, self.dispatcher.clone());

        KeeperEngine { dispatcher: self.dispatcher, runtime: Started { sender, halted, handle } }
    }
}

impl KeeperEngine<Started> {
    /// Writes a request envelope to the feed and wakes the dispatcher.
    ///
    /// Submitting the same request id twice is a no-op.
    #[tracing::instrument(skip_all)]
    pub async fn submit_request(
        &self,
        request: SubmitRequest,
    ) -> Result<SubmitResponse, KeeperEngineError> {
        let SubmitRequestDissolved { request } = request.dissolve();

        let created = self
            .store()
            .write_request_if_not_exists(&request)
            .await
            .map_err(KeeperEngineErrorKind::from)?;

        if created {
            self.send_to_dispatcher_runtime(DispatcherMsg::Wake)
                .map_err(|_| KeeperEngineErrorKind::mpsc_sender("failed to send wake msg"))?;
        }

        Ok(SubmitResponse::builder().created(created).build())
    }

    pub async fn get_safe(
        &self,
        request: GetSafeRequest,
    ) -> Result<GetSafeResponse, KeeperEngineError> {
        let GetSafeRequestDissolved { holder } = request.dissolve();

        self.store()
            .read_safe(&holder)
            .await
            .map(|safe| GetSafeResponse::builder().maybe_safe(safe).build())
            .map_err(KeeperEngineErrorKind::from)
            .map_err(From::from)
    }

    pub async fn get_transaction(
        &self,
        request: GetTransactionRequest,
    ) -> Result<GetTransactionResponse, KeeperEngineError> {
        let GetTransactionRequestDissolved { transaction_hash } = request.dissolve();

        let transaction = self
            .store()
            .read_transaction(&transaction_hash)
            .await
            .map_err(KeeperEngineErrorKind::from)?;

        let signature_requests = match &transaction {
            Some(_) => self
                .store()
                .list_signature_requests(&transaction_hash)
                .await
                .map_err(KeeperEngineErrorKind::from)?,
            None => Vec::new(),
        };

        let response = GetTransactionResponse::builder()
            .maybe_transaction(transaction)
            .signature_requests(signature_requests)
            .build();

        Ok(response)
    }

    pub async fn get_accountant_balance(
        &self,
        request: GetAccountantBalanceRequest,
    ) -> Result<GetAccountantBalanceResponse, KeeperEngineError> {
        let GetAccountantBalanceRequestDissolved { holder } = request.dissolve();

        self.store()
            .read_accountant_balance(&holder)
            .await
            .map(|balance| GetAccountantBalanceResponse::builder().balance(balance).build())
            .map_err(KeeperEngineErrorKind::from)
            .map_err(From::from)
    }

    pub async fn list_outbound(
        &self,
        request: ListOutboundRequest,
    ) -> Result<ListOutboundResponse, KeeperEngineError> {
        let ListOutboundRequestDissolved { after_seq, limit } = request.dissolve();

        self.store()
            .list_outbound_messages(after_seq, limit)
            .await
            .map(|messages| ListOutboundResponse::builder().messages(messages).build())
            .map_err(KeeperEngineErrorKind::from)
            .map_err(From::from)
    }

    pub async fn get_network_status(
        &self,
        request: GetNetworkStatusRequest,
    ) -> Result<GetNetworkStatusResponse, KeeperEngineError> {
        let GetNetworkStatusRequestDissolved { chain } = request.dissolve();

        let info = self
            .store()
            .read_latest_network_info(chain)
            .await
            .map_err(KeeperEngineErrorKind::from)?;

        let head = self
            .dispatcher
            .chain()
            .get_latest_network_info()
            .await
            .map_err(KeeperEngineErrorKind::from)?;

        Ok(GetNetworkStatusResponse::builder().maybe_info(info).head(head).build())
    }

    /// Returns whether the dispatcher runtime has stopped.
    pub fn is_halted(&self) -> bool {
        *self.runtime.halted.borrow()
    }

    /// Completes once the dispatcher runtime has stopped, for any reason.
    pub async fn halted(&self) {
        let mut halted = self.runtime.halted.clone();
        // a dropped sender means the thread is gone as well
        let _ = halted.wait_for(|halted| *halted).await;
    }

    /// Stops the dispatcher runtime after the request in progress.
    ///
    /// # Errors
    ///
    /// Returns the fatal [`DispatchError`] if the runtime had already halted on one.
    pub async fn stop_dispatcher_runtime(
        self,
    ) -> Result<KeeperEngine<Stopped>, KeeperEngineError> {
        if !self.is_halted() {
            self.send_to_dispatcher_runtime(DispatcherMsg::Shutdown)
                .map_err(|_| KeeperEngineErrorKind::mpsc_sender("failed to send shutdown msg"))?;
        }

        self.runtime
            .handle
            .join()
            .map_err(|_| KeeperEngineErrorKind::other("dispatcher runtime thread misbehavior"))?
            .map_err(KeeperEngineErrorKind::from)?;

        Ok(KeeperEngine { dispatcher: self.dispatcher, runtime: Stopped })
    }

    fn send_to_dispatcher_runtime(
        &self,
        msg: DispatcherMsg,
    ) -> Result<(), SendError<DispatcherMsg>> {
        self.runtime.sender.send(msg)
    }
}
