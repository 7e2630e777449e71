//! In-process fakes shared by the unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use secrecy::SecretString;
use serde_json::{json, Value};

use crate::client::{SmallBot, SmallBotConfig, CLIENT_API_PREFIX};
use crate::logger::Logger;
use crate::store::MemoryCursorStore;
use crate::sync::proto::TimelineEvent;
use crate::sync::session::{EventHandler, HandlerError};
use crate::transport::{Method, Transport, TransportError, TransportRequest, TransportResponse};

pub(crate) const TEST_HOMESERVER: &str = "https://hs.test";
pub(crate) const TEST_TOKEN: &str = "syt_test_token";
pub(crate) const TEST_USER: &str = "@bot:test";

struct Route {
    method: Method,
    path_prefix: String,
    responses: VecDeque<TransportResponse>,
}

/// Transport answering from per-route response queues.
///
/// A request with no queued response fails with a transport error, which is
/// how tests end an otherwise endless sync loop.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn respond(&self, method: Method, path_prefix: &str, status: u16, body: Value) {
        self.respond_raw(method, path_prefix, status, &body.to_string());
    }

    pub(crate) fn respond_raw(&self, method: Method, path_prefix: &str, status: u16, body: &str) {
        let response = TransportResponse {
            status,
            body: body.to_string(),
        };
        let mut routes = self.routes.lock().expect("routes lock");
        match routes
            .iter_mut()
            .find(|route| route.method == method && route.path_prefix == path_prefix)
        {
            Some(route) => route.responses.push_back(response),
            None => routes.push(Route {
                method,
                path_prefix: path_prefix.to_string(),
                responses: VecDeque::from([response]),
            }),
        }
    }

    pub(crate) fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    /// API paths of all requests, without prefix and query string.
    pub(crate) fn paths(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|request| api_path(&request.url).to_string())
            .collect()
    }

    /// Full URLs of the requests whose API path equals `path`.
    pub(crate) fn urls_for(&self, path: &str) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|request| api_path(&request.url) == path)
            .map(|request| request.url)
            .collect()
    }

    fn next_response(&self, request: &TransportRequest) -> Option<TransportResponse> {
        let path = api_path(&request.url);
        let mut routes = self.routes.lock().expect("routes lock");
        routes
            .iter_mut()
            .filter(|route| route.method == request.method && path.starts_with(&route.path_prefix))
            .find_map(|route| route.responses.pop_front())
    }
}

impl Transport for ScriptedTransport {
    fn execute(
        &self,
        request: TransportRequest,
    ) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
        let response = self.next_response(&request).ok_or_else(|| {
            TransportError::Other(format!("no scripted response for {}", request.url))
        });
        self.requests.lock().expect("requests lock").push(request);
        futures_util::future::ready(response).boxed()
    }
}

fn api_path(url: &str) -> &str {
    let after_prefix = url
        .split_once(CLIENT_API_PREFIX)
        .map(|(_, rest)| rest)
        .unwrap_or(url);
    after_prefix
        .split_once('?')
        .map(|(path, _)| path)
        .unwrap_or(after_prefix)
}

#[derive(Default)]
pub(crate) struct RecordingLogger {
    infos: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingLogger {
    pub(crate) fn infos(&self) -> Vec<String> {
        self.infos.lock().expect("infos lock").clone()
    }

    pub(crate) fn errors(&self) -> Vec<String> {
        self.errors.lock().expect("errors lock").clone()
    }
}

impl Logger for RecordingLogger {
    fn info(&self, message: &str) {
        self.infos.lock().expect("infos lock").push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.errors
            .lock()
            .expect("errors lock")
            .push(message.to_string());
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct HandlerCall {
    pub(crate) room_id: String,
    pub(crate) event_id: String,
    /// Requests the observed transport had seen when the call started.
    pub(crate) requests_seen: usize,
}

/// Handler that records every call and can fail on one event id.
#[derive(Clone, Default)]
pub(crate) struct RecordingHandler {
    calls: Arc<Mutex<Vec<HandlerCall>>>,
    fail_on: Option<String>,
    observed: Option<Arc<ScriptedTransport>>,
}

impl RecordingHandler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_on(event_id: &str) -> Self {
        Self {
            fail_on: Some(event_id.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn observing(transport: Arc<ScriptedTransport>) -> Self {
        Self {
            observed: Some(transport),
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<HandlerCall> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl EventHandler for RecordingHandler {
    fn handle<'a>(
        &'a self,
        _client: &'a SmallBot,
        room_id: &'a str,
        event: &'a TimelineEvent,
    ) -> BoxFuture<'a, Result<(), HandlerError>> {
        async move {
            let requests_seen = self
                .observed
                .as_ref()
                .map(|transport| transport.requests().len())
                .unwrap_or_default();
            self.calls.lock().expect("calls lock").push(HandlerCall {
                room_id: room_id.to_string(),
                event_id: event.event_id.clone(),
                requests_seen,
            });
            if self.fail_on.as_deref() == Some(event.event_id.as_str()) {
                return Err(format!("handler rejected {}", event.event_id).into());
            }
            Ok(())
        }
        .boxed()
    }
}

/// Config pointing at the scripted transport, with nothing else set.
pub(crate) fn test_config(transport: &Arc<ScriptedTransport>) -> SmallBotConfig {
    SmallBotConfig::new(SecretString::new(TEST_TOKEN.to_string()))
        .with_homeserver_url(TEST_HOMESERVER)
        .with_transport(transport.clone())
}

/// Bot with a known user id, an empty in-memory store and a recording logger.
pub(crate) fn test_bot<H: EventHandler>(
    transport: &Arc<ScriptedTransport>,
    handler: H,
) -> (SmallBot, Arc<RecordingLogger>, Arc<MemoryCursorStore>) {
    let logger = Arc::new(RecordingLogger::default());
    let store = Arc::new(MemoryCursorStore::new());
    let config = test_config(transport)
        .with_user_id(TEST_USER)
        .with_logger(logger.clone())
        .with_store(store.clone());
    let bot = SmallBot::new(config, handler).expect("build test bot");
    (bot, logger, store)
}

pub(crate) fn message_event(event_id: &str, sender: &str, body: &str) -> Value {
    json!({
        "event_id": event_id,
        "sender": sender,
        "type": "m.room.message",
        "content": { "msgtype": "m.text", "body": body }
    })
}
