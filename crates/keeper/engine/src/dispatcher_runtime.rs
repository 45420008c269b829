//! Dispatcher runtime, the one exclusive worker replaying the request feed.
//!
//! Every custody mutation happens on a dedicated thread that drives a [`Dispatcher`] inside a
//! tokio [`LocalSet`]. The rest of the process only writes requests to the store and talks to
//! the thread through a channel:
//!
//! ```text
//!  External Thread (Axum)            Runtime Thread (LocalSet)
//! ┌───────────────────────┐         ┌───────────────────────────────┐
//! │ KeeperEngine          │         │ Dispatcher                    │
//! │                       │         │                               │
//! │ mpsc::UnboundedSender ┼─────────│──> mpsc::UnboundedReceiver    │
//! │                       │         │                               │
//! │ watch::Receiver <─────┼─────────┤─── watch::Sender (on exit)    │
//! └───────────────────────┘         └───────────────────────────────┘
//! ```
//!
//! The loop drains pending requests one at a time. It idles for the configured interval when
//! the feed is empty, when the head request abstains, or when the chain node stays unavailable,
//! and wakes early on [`DispatcherMsg::Wake`]. A fatal [`DispatchError`] ends the thread with
//! that error so the supervisor can halt the process.
//!
//! [`LocalSet`]: tokio::task::LocalSet

pub mod msg;

use std::thread::{self, JoinHandle};

use tokio::{
    runtime::Runtime,
    sync::{
        mpsc::{self, error::TryRecvError},
        watch,
    },
    task::LocalSet,
};

use self::msg::DispatcherMsg;
use crate::dispatcher::{DispatchError, Dispatcher, Outcome};

/// Spawns the dispatcher thread.
///
/// `halted` is set once the thread leaves its loop, for any reason.
pub fn spawn_new(
    rt: Runtime,
    msg_receiver: mpsc::UnboundedReceiver<DispatcherMsg>,
    halted: watch::Sender<bool>,
    dispatcher: Dispatcher,
) -> JoinHandle<Result<(), DispatchError>> {
    thread::spawn(move || {
        let local = LocalSet::new();
        let local_runtime = local.run_until(run_dispatcher(msg_receiver, dispatcher));
        let result = rt.block_on(local_runtime);

        halted.send_replace(true);
        result
    })
}

#[tracing::instrument(skip_all)]
async fn run_dispatcher(
    mut msg_receiver: mpsc::UnboundedReceiver<DispatcherMsg>,
    dispatcher: Dispatcher,
) -> Result<(), DispatchError> {
    let idle_interval = dispatcher.config().idle_interval();
    tracing::info!(?idle_interval, "starting dispatcher runtime");

    loop {
        let idle = match dispatcher.step().await {
            Ok(Some((_, Outcome::Abstained(_)))) | Ok(None) => true,
            Ok(Some(_)) => false,
            Err(err) if !err.is_fatal() => {
                tracing::warn!(%err, "chain node unavailable, request stays pending");
                true
            },
            Err(err) => {
                tracing::error!(%err, "fatal dispatch error, halting dispatcher runtime");
                return Err(err);
            },
        };

        if !idle {
            match msg_receiver.try_recv() {
                Ok(DispatcherMsg::Shutdown) | Err(TryRecvError::Disconnected) => break,
                Ok(DispatcherMsg::Wake) | Err(TryRecvError::Empty) => continue,
            }
        }

        tokio::select! {
            msg = msg_receiver.recv() => match msg {
                Some(DispatcherMsg::Wake) => {},
                Some(DispatcherMsg::Shutdown) | None => break,
            },
            _ = tokio::time::sleep(idle_interval) => {},
        }
    }

    tracing::info!("shutting down dispatcher runtime");

    Ok(())
}
