use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::format::{PlainTextFormatter, StripTags};
use crate::logger::{Logger, TracingLogger};
use crate::store::{CursorStore, FileCursorStore, StoreError};
use crate::sync::proto::{
    JoinedRooms, MatrixErrorBody, RoomMessageContent, RoomName, SendEventResponse, UserProfile,
    WhoAmI, MSGTYPE_NOTICE, MSGTYPE_TEXT, ROOM_MESSAGE_EVENT,
};
use crate::sync::session::{EventHandler, HandlerError};
use crate::transport::{
    Method, ReqwestTransport, Transport, TransportError, TransportRequest,
};

const ERROR_BODY_SNIPPET_LEN: usize = 220;
/// Path prefix of the client-server API, relative to the homeserver URL.
pub const CLIENT_API_PREFIX: &str = "_matrix/client/r0/";

/// Bytes left unescaped in path segments and query values.
const URL_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SmallBotDefaults;

impl SmallBotDefaults {
    pub const HOMESERVER_URL: &'static str = "https://matrix.org";
    pub const SYNC_TIMEOUT: Duration = Duration::from_millis(10_000);
    pub const STORE_NAME: &'static str = "small.store";
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Session configuration.
///
/// Only the access token is required. Collaborators that are left unset get
/// their defaults in [`SmallBot::new`].
#[derive(Clone)]
pub struct SmallBotConfig {
    access_token: SecretString,
    homeserver_url: String,
    sync_timeout: Duration,
    user_id: Option<String>,
    store_name: PathBuf,
    connect_timeout: Duration,
    logger: Option<Arc<dyn Logger>>,
    store: Option<Arc<dyn CursorStore>>,
    formatter: Option<Arc<dyn PlainTextFormatter>>,
    transport: Option<Arc<dyn Transport>>,
}

impl SmallBotConfig {
    pub fn new(access_token: SecretString) -> Self {
        Self {
            access_token,
            homeserver_url: SmallBotDefaults::HOMESERVER_URL.to_string(),
            sync_timeout: SmallBotDefaults::SYNC_TIMEOUT,
            user_id: None,
            store_name: PathBuf::from(SmallBotDefaults::STORE_NAME),
            connect_timeout: SmallBotDefaults::CONNECT_TIMEOUT,
            logger: None,
            store: None,
            formatter: None,
            transport: None,
        }
    }

    /// Sets the homeserver base URL, with or without a trailing slash.
    pub fn with_homeserver_url(mut self, homeserver_url: impl Into<String>) -> Self {
        self.homeserver_url = homeserver_url.into().trim().to_string();
        self
    }

    /// Sets how long the server may hold a `/sync` request open.
    pub fn with_sync_timeout(mut self, sync_timeout: Duration) -> Self {
        self.sync_timeout = sync_timeout;
        self
    }

    /// Supplies the bot's own user id, which skips the `whoami` call on start.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// File used by the default cursor store. Ignored when a store is set.
    pub fn with_store_name(mut self, store_name: impl Into<PathBuf>) -> Self {
        self.store_name = store_name.into();
        self
    }

    /// Connect timeout of the default transport. Ignored when a transport is set.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn CursorStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn PlainTextFormatter>) -> Self {
        self.formatter = Some(formatter);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }
}

impl fmt::Debug for SmallBotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmallBotConfig")
            .field("homeserver_url", &self.homeserver_url)
            .field("sync_timeout", &self.sync_timeout)
            .field("user_id", &self.user_id)
            .field("store_name", &self.store_name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum SmallBotError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("http status {status} on {path}: {body}")]
    HttpStatus {
        path: String,
        status: u16,
        errcode: Option<String>,
        body: String,
    },

    #[error("failed to decode response from {path}: {source}. body={body}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
        body: String,
    },

    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("event handler failed on {event_id} in {room_id}: {source}")]
    Handler {
        room_id: String,
        event_id: String,
        #[source]
        source: HandlerError,
    },
}

impl SmallBotError {
    /// Matrix `errcode` of an error response, such as `M_FORBIDDEN`.
    pub fn errcode(&self) -> Option<&str> {
        match self {
            Self::HttpStatus { errcode, .. } => errcode.as_deref(),
            _ => None,
        }
    }
}

/// Handle to one Matrix session.
///
/// Cloning is cheap and every clone shares the same session state, which is
/// how handlers receive a client they can send with.
#[derive(Clone)]
pub struct SmallBot {
    pub(crate) inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    access_token: SecretString,
    homeserver_url: String,
    pub(crate) sync_timeout: Duration,
    user_id: OnceLock<String>,
    pub(crate) logger: Arc<dyn Logger>,
    pub(crate) store: Arc<dyn CursorStore>,
    formatter: Arc<dyn PlainTextFormatter>,
    transport: Arc<dyn Transport>,
    pub(crate) handler: Box<dyn EventHandler>,
    request_id: AtomicU64,
}

impl SmallBot {
    pub fn new<H>(config: SmallBotConfig, handler: H) -> Result<Self, SmallBotError>
    where
        H: EventHandler,
    {
        let transport: Arc<dyn Transport> = match config.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(config.connect_timeout)?),
        };
        let store: Arc<dyn CursorStore> = match config.store {
            Some(store) => store,
            None => Arc::new(FileCursorStore::new(config.store_name)),
        };
        let user_id = OnceLock::new();
        if let Some(configured) = config.user_id {
            let _ = user_id.set(configured);
        }

        Ok(Self {
            inner: Arc::new(SessionInner {
                access_token: config.access_token,
                homeserver_url: config.homeserver_url,
                sync_timeout: config.sync_timeout,
                user_id,
                logger: config.logger.unwrap_or_else(|| Arc::new(TracingLogger)),
                store,
                formatter: config.formatter.unwrap_or_else(|| Arc::new(StripTags)),
                transport,
                handler: Box::new(handler),
                request_id: AtomicU64::new(0),
            }),
        })
    }

    /// The bot's own user id, once configured or resolved.
    pub fn own_user_id(&self) -> Option<&str> {
        self.inner.user_id.get().map(String::as_str)
    }

    pub fn homeserver_url(&self) -> &str {
        &self.inner.homeserver_url
    }

    pub fn sync_timeout(&self) -> Duration {
        self.inner.sync_timeout
    }

    /// Performs an authenticated client-server API call.
    ///
    /// `path` is relative to `/_matrix/client/r0/`. Query pairs with an empty
    /// value are skipped. The body, when given, is sent as JSON.
    pub async fn request<T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<String>,
    ) -> Result<T, SmallBotError>
    where
        T: DeserializeOwned,
    {
        let endpoint = self.endpoint(path);
        let url = format!("{endpoint}?{}", self.query_string(query));

        let response = self
            .inner
            .transport
            .execute(TransportRequest {
                method: method.clone(),
                url,
                body,
            })
            .await?;
        self.inner
            .logger
            .info(&format!("Fetched from '{endpoint}'"));
        debug!(
            event = "request_completed",
            method = %method,
            path,
            status = response.status
        );

        if !response.is_success() {
            return Err(http_status_error(path, response.status, &response.body));
        }

        serde_json::from_str(&response.body).map_err(|source| SmallBotError::Decode {
            path: path.to_string(),
            source,
            body: summarize_body(&response.body),
        })
    }

    /// [`SmallBot::request`] with `GET` and no body.
    pub async fn get<T>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, SmallBotError>
    where
        T: DeserializeOwned,
    {
        self.request(Method::GET, path, query, None).await
    }

    /// Returns the user id the access token belongs to.
    pub async fn whoami(&self) -> Result<WhoAmI, SmallBotError> {
        self.get("account/whoami", &[]).await
    }

    /// Lists the ids of all rooms the bot has joined.
    pub async fn joined_rooms(&self) -> Result<JoinedRooms, SmallBotError> {
        self.get("joined_rooms", &[]).await
    }

    /// Returns the display name and avatar of `user_id`.
    pub async fn get_user_profile(&self, user_id: &str) -> Result<UserProfile, SmallBotError> {
        self.get(&format!("profile/{user_id}"), &[]).await
    }

    /// Returns the `m.room.name` state of `room_id`.
    pub async fn get_room_state_name(&self, room_id: &str) -> Result<RoomName, SmallBotError> {
        self.get(
            &format!("rooms/{}/state/m.room.name/", escape_component(room_id)),
            &[],
        )
        .await
    }

    /// Sends an `m.notice` message. See [`SmallBot::send_message`].
    pub async fn send_room_notice(
        &self,
        room_id: &str,
        formatted_body: &str,
    ) -> Result<SendEventResponse, SmallBotError> {
        self.send_message(room_id, MSGTYPE_NOTICE, formatted_body)
            .await
    }

    /// Sends an `m.text` message. See [`SmallBot::send_message`].
    pub async fn send_room_text(
        &self,
        room_id: &str,
        formatted_body: &str,
    ) -> Result<SendEventResponse, SmallBotError> {
        self.send_message(room_id, MSGTYPE_TEXT, formatted_body)
            .await
    }

    /// Sends an HTML `m.room.message` of type `msgtype`.
    ///
    /// The plain `body` is derived from `formatted_body` by the configured
    /// formatter.
    pub async fn send_message(
        &self,
        room_id: &str,
        msgtype: &str,
        formatted_body: &str,
    ) -> Result<SendEventResponse, SmallBotError> {
        let body = self.inner.formatter.to_plain(formatted_body);
        let content = RoomMessageContent::html(msgtype, body, formatted_body.to_string());
        self.send_event(room_id, ROOM_MESSAGE_EVENT, &content)
            .await
    }

    /// Sends a room event of any type under a fresh transaction id.
    pub async fn send_event<C>(
        &self,
        room_id: &str,
        event_type: &str,
        content: &C,
    ) -> Result<SendEventResponse, SmallBotError>
    where
        C: Serialize + ?Sized,
    {
        let body = serde_json::to_string(content).map_err(SmallBotError::Encode)?;
        let path = format!(
            "rooms/{}/send/{}/{}",
            escape_component(room_id),
            event_type,
            self.next_txn_id()
        );
        self.request(Method::PUT, &path, &[], Some(body)).await
    }

    /// Returns the configured user id, or resolves and caches it via `whoami`.
    pub(crate) async fn resolve_user_id(&self) -> Result<String, SmallBotError> {
        if let Some(user_id) = self.own_user_id() {
            return Ok(user_id.to_string());
        }
        let resolved = self.whoami().await?.user_id;
        Ok(self.inner.user_id.get_or_init(|| resolved).clone())
    }

    fn next_txn_id(&self) -> String {
        let sequence = self.inner.request_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        format!("{now_ms}__REQ{sequence}")
    }

    fn endpoint(&self, path: &str) -> String {
        let base = &self.inner.homeserver_url;
        let separator = if base.ends_with('/') { "" } else { "/" };
        format!("{base}{separator}{CLIENT_API_PREFIX}{path}")
    }

    fn query_string(&self, query: &[(&str, &str)]) -> String {
        let token = escape_component(self.inner.access_token.expose_secret());
        let mut parts = vec![format!("access_token={token}")];
        parts.extend(
            query
                .iter()
                .filter(|(_, value)| !value.is_empty())
                .map(|(key, value)| format!("{key}={}", escape_component(value))),
        );
        parts.join("&")
    }
}

impl fmt::Debug for SmallBot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmallBot")
            .field("homeserver_url", &self.inner.homeserver_url)
            .field("user_id", &self.own_user_id())
            .finish_non_exhaustive()
    }
}

/// Percent-encodes a room id or query value for use in a URL.
pub fn escape_component(value: &str) -> String {
    utf8_percent_encode(value, URL_COMPONENT).to_string()
}

fn http_status_error(path: &str, status: u16, body: &str) -> SmallBotError {
    match serde_json::from_str::<MatrixErrorBody>(body) {
        Ok(parsed) => SmallBotError::HttpStatus {
            path: path.to_string(),
            status,
            body: match parsed.error {
                Some(message) => format!("{}: {message}", parsed.errcode),
                None => parsed.errcode.clone(),
            },
            errcode: Some(parsed.errcode),
        },
        Err(_) => SmallBotError::HttpStatus {
            path: path.to_string(),
            status,
            errcode: None,
            body: summarize_body(body),
        },
    }
}

fn summarize_body(body: &str) -> String {
    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}
