use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use metrics::counter;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};

use crate::api::SymphonyClient;
use crate::backoff::{Backoff, BackoffSettings, BackoffStep};
use crate::codec::{self, NormalizedMessage};
use crate::directory::{DirectoryCache, UserLookup, UserQuery};
use crate::error::{SymphonyError, SymphonyResult};
use crate::telemetry;
use crate::types::RawMessage;

/// Lifecycle of a [`FeedClient`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedState {
    Idle,
    CreatingFeed,
    Polling,
    BackingOff,
    Terminal,
    Closed,
}

impl FeedState {
    fn is_final(self) -> bool {
        matches!(self, FeedState::Terminal | FeedState::Closed)
    }
}

#[derive(Debug)]
pub enum FeedEvent {
    /// A datafeed was created; emitted once per successful creation.
    Connected { datafeed_id: String },
    Message(NormalizedMessage),
    /// A recoverable fault. The client keeps running.
    Error(SymphonyError),
    /// Reconnect attempts are exhausted; emitted once per client lifetime.
    Shutdown,
}

pub type ShutdownHook = Box<dyn FnOnce() + Send + 'static>;

/// Receiving half of the feed event channel.
pub struct FeedEvents {
    rx: mpsc::UnboundedReceiver<FeedEvent>,
}

impl FeedEvents {
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<FeedEvent> {
        self.rx.try_recv().ok()
    }
}

/// Keeps a datafeed alive: creates it, polls it back to back and recreates it
/// with exponential backoff whenever creation or a read fails.
pub struct FeedClient {
    client: SymphonyClient,
    directory: Arc<DirectoryCache>,
    backoff: BackoffSettings,
    state: Arc<watch::Sender<FeedState>>,
    close_tx: watch::Sender<bool>,
    shutdown_hook: Mutex<Option<ShutdownHook>>,
    started: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FeedClient {
    pub fn new(
        client: SymphonyClient,
        directory: Arc<DirectoryCache>,
        backoff: BackoffSettings,
    ) -> Self {
        let (state, _) = watch::channel(FeedState::Idle);
        let (close_tx, _) = watch::channel(false);
        Self {
            client,
            directory,
            backoff,
            state: Arc::new(state),
            close_tx,
            shutdown_hook: Mutex::new(None),
            started: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// Runs `hook` once when reconnect attempts are exhausted.
    pub fn with_shutdown_hook(self, hook: impl FnOnce() + Send + 'static) -> Self {
        *self
            .shutdown_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
        self
    }

    pub fn state(&self) -> FeedState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    /// Spawns the feed task. Only the first call succeeds.
    pub fn start(&self) -> SymphonyResult<FeedEvents> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SymphonyError::validation("feed client already started"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = FeedWorker {
            client: self.client.clone(),
            directory: Arc::clone(&self.directory),
            state: Arc::clone(&self.state),
            close_rx: self.close_tx.subscribe(),
            events: tx,
            shutdown_hook: Mutex::new(
                self.shutdown_hook
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take(),
            ),
        };
        let span = telemetry::span_for_feed("datafeed.loop", self.client.agent_host());
        let handle = tokio::spawn(worker.run(Backoff::new(self.backoff)).instrument(span));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(FeedEvents { rx })
    }

    /// Stops polling. A read already in flight completes but its result is
    /// dropped. Cached tokens are kept.
    pub fn close(&self) {
        debug!("closing symphony datafeed poller");
        self.close_tx.send_replace(true);
        self.state.send_if_modified(|state| {
            if *state == FeedState::Terminal {
                return false;
            }
            *state = FeedState::Closed;
            true
        });
    }

    /// Handle to the spawned feed task, once started.
    pub fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl Drop for FeedClient {
    fn drop(&mut self) {
        self.close_tx.send_replace(true);
    }
}

struct FeedWorker {
    client: SymphonyClient,
    directory: Arc<DirectoryCache>,
    state: Arc<watch::Sender<FeedState>>,
    close_rx: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<FeedEvent>,
    shutdown_hook: Mutex<Option<ShutdownHook>>,
}

impl FeedWorker {
    async fn run(self, mut backoff: Backoff) {
        info!(
            max_attempts = backoff.settings().max_attempts,
            "starting symphony datafeed"
        );
        let own_user_id = self.resolve_identity().await;

        'connect: loop {
            if self.closed() {
                break;
            }
            self.set_state(FeedState::CreatingFeed);
            let created = self.client.create_datafeed().await;
            if self.closed() {
                break;
            }
            let datafeed_id = match created {
                Ok(response) => response.id,
                Err(err) => {
                    if self.on_failure(&mut backoff, "create", err).await {
                        continue;
                    }
                    break;
                }
            };

            tracing::Span::current().record("datafeed_id", datafeed_id.as_str());
            info!(%datafeed_id, "created symphony datafeed");
            self.set_state(FeedState::Polling);
            self.emit(FeedEvent::Connected {
                datafeed_id: datafeed_id.clone(),
            });

            loop {
                if self.closed() {
                    break 'connect;
                }
                debug!(%datafeed_id, "polling symphony datafeed");
                let read = self.client.read_datafeed(&datafeed_id).await;
                if self.closed() {
                    debug!(%datafeed_id, "discarding datafeed read after close");
                    break 'connect;
                }
                match read {
                    Ok(messages) => {
                        if backoff.attempts() > 0 {
                            debug!("datafeed polled successfully, resetting backoff");
                        }
                        backoff.reset();
                        self.dispatch(messages, own_user_id).await;
                    }
                    Err(err) => {
                        counter!("symphony_datafeed_reconnects_total").increment(1);
                        if self.on_failure(&mut backoff, "read", err).await {
                            continue 'connect;
                        }
                        break 'connect;
                    }
                }
                tokio::task::yield_now().await;
            }
        }
        debug!(state = ?*self.state.borrow(), "symphony datafeed task finished");
    }

    /// Looks up the bot's own user so its messages can be skipped.
    async fn resolve_identity(&self) -> Option<u64> {
        let session = match self.client.who_am_i().await {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "unable to resolve symphony identity");
                self.emit(FeedEvent::Error(err));
                return None;
            }
        };
        match self
            .client
            .get_user(&UserQuery::UserId(session.user_id))
            .await
        {
            Ok(user) => info!(
                user_id = user.id,
                display_name = user.display_name.as_deref().unwrap_or("-"),
                "connected to symphony"
            ),
            Err(err) => warn!(
                user_id = session.user_id,
                error = %err,
                "unable to fetch symphony bot profile"
            ),
        }
        Some(session.user_id)
    }

    async fn dispatch(&self, messages: Vec<RawMessage>, own_user_id: Option<u64>) {
        debug!(count = messages.len(), "received datafeed messages");
        for raw in messages {
            if !raw.is_chat_message() {
                debug!(message_type = %raw.message_type, "skipping non-chat datafeed entry");
                continue;
            }
            if own_user_id == Some(raw.from_user_id) {
                continue;
            }
            counter!("symphony_datafeed_messages_total").increment(1);
            let span = telemetry::span_for_message("datafeed.message", &raw.stream_id, &raw.id);
            let lookup = UserLookup::by_id(raw.from_user_id);
            let sender = match self
                .directory
                .resolve(&lookup, Some(&raw.stream_id))
                .instrument(span.clone())
                .await
            {
                Ok(sender) => sender,
                Err(err) => {
                    let _guard = span.enter();
                    warn!(user_id = raw.from_user_id, error = %err, "unable to fetch user details");
                    self.emit(FeedEvent::Error(err));
                    continue;
                }
            };
            let message = codec::decode(raw, sender);
            {
                let _guard = span.enter();
                debug!(user = %message.sender.username, "received symphony message");
            }
            self.emit(FeedEvent::Message(message));
        }
    }

    /// Records a failed attempt. Returns `true` when a new datafeed should be
    /// created, `false` when the worker must stop.
    async fn on_failure(
        &self,
        backoff: &mut Backoff,
        stage: &'static str,
        err: SymphonyError,
    ) -> bool {
        counter!(
            "symphony_errors_total",
            "kind" => err.kind(),
            "endpoint" => stage
        )
        .increment(1);
        match backoff.on_failure() {
            BackoffStep::Retry { attempt, delay } => {
                warn!(
                    stage,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "symphony datafeed failed, re-attempting"
                );
                self.emit(FeedEvent::Error(err));
                self.set_state(FeedState::BackingOff);
                let mut close_rx = self.close_rx.clone();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => !self.closed(),
                    _ = close_rx.wait_for(|closed| *closed) => false,
                }
            }
            BackoffStep::Exhausted { attempts } => {
                error!(
                    stage,
                    attempts,
                    error = %err,
                    "symphony datafeed reconnect attempts exhausted, shutting down"
                );
                self.set_state(FeedState::Terminal);
                let hook = self
                    .shutdown_hook
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(hook) = hook {
                    hook();
                }
                self.emit(FeedEvent::Shutdown);
                false
            }
        }
    }

    fn closed(&self) -> bool {
        *self.close_rx.borrow() || self.close_rx.has_changed().is_err()
    }

    fn set_state(&self, next: FeedState) {
        self.state.send_if_modified(|state| {
            if state.is_final() || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    fn emit(&self, event: FeedEvent) {
        if self.events.send(event).is_err() {
            debug!("feed event receiver dropped");
        }
    }
}
