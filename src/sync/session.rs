//! The `/sync` long-poll loop and the event handler boundary.
//!
//! One cycle fetches a batch, awaits the handler for every timeline event in
//! order, then persists `next_batch`. [`SmallBot::run`] chains cycles forever;
//! [`SmallBot::start`] is the outermost entry point that logs the first error
//! and stops.

use std::convert::Infallible;
use std::future::Future;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::{debug, info};

use crate::client::{SmallBot, SmallBotError};
use crate::sync::proto::{RawSyncResponse, SyncResponse, TimelineEvent};

/// Error type returned by event handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives every timeline event delivered by the sync loop.
///
/// Calls are strictly sequential: the next event is not dispatched until the
/// previous call has resolved. Returning an error stops the loop.
pub trait EventHandler: Send + Sync + 'static {
    fn handle<'a>(
        &'a self,
        client: &'a SmallBot,
        room_id: &'a str,
        event: &'a TimelineEvent,
    ) -> BoxFuture<'a, Result<(), HandlerError>>;
}

/// [`EventHandler`] backed by an async closure. Built with [`handler_fn`].
#[derive(Clone, Copy, Debug)]
pub struct HandlerFn<F> {
    f: F,
}

/// Wraps an async closure taking owned copies of the client, room id and
/// event.
///
/// ```no_run
/// use smallbot_sdk::sync::session::{handler_fn, HandlerError};
/// use smallbot_sdk::{SmallBot, TimelineEvent};
///
/// let handler = handler_fn(|client: SmallBot, room_id: String, event: TimelineEvent| async move {
///     if Some(event.sender.as_str()) != client.own_user_id() {
///         client.send_room_notice(&room_id, "pong").await?;
///     }
///     Ok::<(), HandlerError>(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(SmallBot, String, TimelineEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    HandlerFn { f }
}

impl<F, Fut> EventHandler for HandlerFn<F>
where
    F: Fn(SmallBot, String, TimelineEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn handle<'a>(
        &'a self,
        client: &'a SmallBot,
        room_id: &'a str,
        event: &'a TimelineEvent,
    ) -> BoxFuture<'a, Result<(), HandlerError>> {
        (self.f)(client.clone(), room_id.to_string(), event.clone()).boxed()
    }
}

impl SmallBot {
    /// Long-polls `/sync` once.
    ///
    /// Without `since` the server returns its initial batch. A response with
    /// no joined rooms yields an empty room map.
    pub async fn get_sync(&self, since: Option<&str>) -> Result<SyncResponse, SmallBotError> {
        let timeout = self.inner.sync_timeout.as_millis().to_string();
        let raw: RawSyncResponse = self
            .get(
                "sync",
                &[
                    ("full_state", "false"),
                    ("timeout", timeout.as_str()),
                    ("since", since.unwrap_or_default()),
                ],
            )
            .await?;
        Ok(raw.into())
    }

    /// Runs one sync cycle and returns the cursor for the next one.
    ///
    /// Every event is handed to the handler in room order, then in timeline
    /// order within the room. The new cursor is persisted only after all
    /// events were handled.
    pub async fn sync_once(&self, since: Option<&str>) -> Result<String, SmallBotError> {
        let batch = self.get_sync(since).await?;
        let event_count = batch.event_count();

        for (room_id, events) in &batch.rooms {
            for event in events {
                self.inner
                    .handler
                    .handle(self, room_id, event)
                    .await
                    .map_err(|source| SmallBotError::Handler {
                        room_id: room_id.clone(),
                        event_id: event.event_id.clone(),
                        source,
                    })?;
            }
        }
        debug!(
            event = "sync_cycle_dispatched",
            rooms = batch.rooms.len(),
            events = event_count
        );

        self.inner.store.write(&batch.next_batch).await?;
        debug!(event = "cursor_persisted", next_batch = %batch.next_batch);

        Ok(batch.next_batch)
    }

    /// Resolves the bot's identity, then syncs until the first error.
    ///
    /// The stored cursor is read once before the first cycle. This only
    /// returns with an error; nothing is retried.
    pub async fn run(&self) -> Result<Infallible, SmallBotError> {
        let user_id = self.resolve_user_id().await?;
        info!(event = "identity_resolved", user_id = %user_id);

        let mut since = self.inner.store.read().await?;
        loop {
            since = Some(self.sync_once(since.as_deref()).await?);
        }
    }

    /// Starts the sync loop and dispatches events until something fails.
    ///
    /// The first error from identity resolution, a request, the handler or the
    /// store is reported once through the logger's error channel and the loop
    /// stops for good. Restarting is up to the caller.
    ///
    /// The default [`TracingLogger`](crate::logger::TracingLogger) emits that
    /// error as a `tracing` event, which stays invisible unless the
    /// application installs a subscriber or configures its own
    /// [`Logger`](crate::logger::Logger) with
    /// [`SmallBotConfig::with_logger`](crate::client::SmallBotConfig::with_logger).
    ///
    /// ```no_run
    /// # async fn demo(bot: smallbot_sdk::SmallBot) {
    /// tracing_subscriber::fmt().with_target(false).init();
    /// bot.start().await;
    /// # }
    /// ```
    pub async fn start(&self) {
        match self.run().await {
            Ok(never) => match never {},
            Err(err) => self.inner.logger.error(&err.to_string()),
        }
    }
}
