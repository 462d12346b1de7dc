#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use greentic_messaging_providers_symphony::config::{Credential, SymphonyConfig};
use greentic_messaging_providers_symphony::transport::{
    Headers, SharedTransport, Transport, endpoint_url,
};
use greentic_messaging_providers_symphony::{
    BackoffSettings, FeedEvent, FeedEvents, MemoryUserRegistry, SharedUserRegistry,
    SymphonyAdapter, SymphonyClient, SymphonyError, SymphonyResult,
};
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};

pub const POD_HOST: &str = "pod.symphony.test";
pub const AGENT_HOST: &str = "agent.symphony.test";
pub const KM_HOST: &str = "km.symphony.test";
pub const SESSION_HOST: &str = "auth.symphony.test";

pub const SESSION_AUTH: &str = "/sessionauth/v1/authenticate";
pub const KEY_AUTH: &str = "/keyauth/v1/authenticate";
pub const SESSION_INFO: &str = "/pod/v1/sessioninfo";
pub const USER_LOOKUP: &str = "/pod/v2/user";
pub const IM_CREATE: &str = "/pod/v1/im/create";
pub const DATAFEED_CREATE: &str = "/agent/v4/datafeed/create";
/// Prefix of every `GET /agent/v4/datafeed/{id}/read`.
pub const DATAFEED_READ: &str = "/agent/v4/datafeed/";
pub const MESSAGE_CREATE: &str = "/agent/v2/stream/";
pub const STRUCTURED_MESSAGE_CREATE: &str = "/agent/v4/stream/";

pub const SESSION_TOKEN: &str = "session-token-4f1c";
pub const KM_TOKEN: &str = "km-token-98ab";

/// How long an idle datafeed read blocks before answering 204.
pub const LONG_POLL: Duration = Duration::from_secs(30);

pub const BOT_ID: u64 = 7215545078229;
pub const SENDER_ID: u64 = 7215545078461;

type Handler = Arc<dyn Fn(&str, Option<&Value>) -> Reply + Send + Sync>;

#[derive(Clone)]
pub enum Reply {
    Json(Value),
    /// 204 / empty body.
    Empty,
    /// Non-2xx answer with the given body.
    Status(u16, String),
    /// Answer computed from the request path and body.
    Handler(Handler),
    Delayed(Duration, Box<Reply>),
}

impl Reply {
    pub fn handler(f: impl Fn(&str, Option<&Value>) -> Reply + Send + Sync + 'static) -> Self {
        Reply::Handler(Arc::new(f))
    }

    pub fn delayed(delay: Duration, reply: Reply) -> Self {
        Reply::Delayed(delay, Box::new(reply))
    }
}

#[derive(Clone, Debug)]
pub struct Call {
    pub method: Method,
    pub host: String,
    pub path: String,
    pub headers: Headers,
    pub body: Option<Value>,
}

impl Call {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }
}

struct Route {
    method: Method,
    prefix: String,
    queued: VecDeque<Reply>,
    fallback: Option<Reply>,
}

/// In-memory Symphony pod. Routes match on method and the longest path
/// prefix; queued replies are served first, then the route's fallback.
#[derive(Default)]
pub struct MockPlatform {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<Call>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// A healthy pod: tokens, identity, user lookups and an idle datafeed
    /// that long-polls before answering 204.
    pub fn symphony() -> Arc<Self> {
        let platform = Self::new();
        platform.fallback(
            Method::POST,
            SESSION_AUTH,
            Reply::Json(json!({"name": "sessionToken", "token": SESSION_TOKEN})),
        );
        platform.fallback(
            Method::POST,
            KEY_AUTH,
            Reply::Json(json!({"name": "keyManagerToken", "token": KM_TOKEN})),
        );
        platform.fallback(
            Method::GET,
            SESSION_INFO,
            Reply::Json(json!({"userId": BOT_ID})),
        );
        platform.fallback(Method::GET, USER_LOOKUP, Reply::handler(user_lookup));
        platform.fallback(
            Method::POST,
            DATAFEED_CREATE,
            Reply::Json(json!({"id": "feed-1"})),
        );
        platform.fallback(
            Method::GET,
            DATAFEED_READ,
            Reply::delayed(LONG_POLL, Reply::Empty),
        );
        platform.fallback(
            Method::POST,
            IM_CREATE,
            Reply::handler(|_, body| {
                let user = body
                    .and_then(|body| body.get(0))
                    .and_then(Value::as_u64)
                    .unwrap_or_default();
                Reply::Json(json!({"id": format!("im-{user}")}))
            }),
        );
        platform.fallback(Method::POST, MESSAGE_CREATE, Reply::handler(echo_message));
        platform.fallback(
            Method::POST,
            STRUCTURED_MESSAGE_CREATE,
            Reply::handler(echo_message),
        );
        Arc::new(platform)
    }

    /// Serves `reply` once, ahead of the route's fallback.
    pub fn on(&self, method: Method, prefix: &str, reply: Reply) {
        let mut routes = self.routes.lock().unwrap();
        route_mut(&mut routes, method, prefix).queued.push_back(reply);
    }

    pub fn fallback(&self, method: Method, prefix: &str, reply: Reply) {
        let mut routes = self.routes.lock().unwrap();
        route_mut(&mut routes, method, prefix).fallback = Some(reply);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: Method, prefix: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| call.method == method && call.path.starts_with(prefix))
            .collect()
    }

    pub fn count(&self, method: Method, prefix: &str) -> usize {
        self.calls_to(method, prefix).len()
    }

    fn next_reply(&self, method: &Method, path: &str) -> Option<Reply> {
        let mut routes = self.routes.lock().unwrap();
        let route = routes
            .iter_mut()
            .filter(|route| route.method == *method && path.starts_with(&route.prefix))
            .max_by_key(|route| route.prefix.len())?;
        route.queued.pop_front().or_else(|| route.fallback.clone())
    }
}

fn route_mut<'a>(routes: &'a mut Vec<Route>, method: Method, prefix: &str) -> &'a mut Route {
    let index = match routes
        .iter()
        .position(|route| route.method == method && route.prefix == prefix)
    {
        Some(index) => index,
        None => {
            routes.push(Route {
                method,
                prefix: prefix.to_string(),
                queued: VecDeque::new(),
                fallback: None,
            });
            routes.len() - 1
        }
    };
    &mut routes[index]
}

#[async_trait]
impl Transport for MockPlatform {
    async fn request(
        &self,
        method: Method,
        host: &str,
        path: &str,
        headers: Headers,
        body: Option<Value>,
    ) -> SymphonyResult<Option<Value>> {
        self.calls.lock().unwrap().push(Call {
            method: method.clone(),
            host: host.to_string(),
            path: path.to_string(),
            headers,
            body: body.clone(),
        });
        let mut reply = self
            .next_reply(&method, path)
            .unwrap_or_else(|| Reply::Status(404, format!("no route for {method} {path}")));
        loop {
            reply = match reply {
                Reply::Json(value) => return Ok(Some(value)),
                Reply::Empty => return Ok(None),
                Reply::Status(code, body) => {
                    return Err(SymphonyError::Transport {
                        url: endpoint_url(host, path),
                        status: Some(StatusCode::from_u16(code).expect("valid status")),
                        body,
                        source: None,
                    });
                }
                Reply::Handler(handler) => handler(path, body.as_ref()),
                Reply::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    *inner
                }
            };
        }
    }
}

pub fn user_lookup(path: &str, _: Option<&Value>) -> Reply {
    let query = path.split_once('?').map(|(_, query)| query).unwrap_or("");
    for pair in query.split('&') {
        match pair.split_once('=') {
            Some(("uid", id)) => {
                return match id.parse::<u64>() {
                    Ok(id) => Reply::Json(user_json(id)),
                    Err(_) => Reply::Status(400, "bad uid".into()),
                };
            }
            Some(("username", name)) => {
                return Reply::Json(user_json(id_for_name(name)));
            }
            Some(("email", email)) => {
                let email = urlencoding::decode(email).expect("utf-8 email");
                let name = email.split('@').next().unwrap_or_default();
                return Reply::Json(user_json(id_for_name(name)));
            }
            _ => {}
        }
    }
    Reply::Status(400, "missing user filter".into())
}

fn echo_message(path: &str, body: Option<&Value>) -> Reply {
    let stream = path
        .trim_start_matches("/agent/v2/stream/")
        .trim_start_matches("/agent/v4/stream/")
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string();
    let message = body
        .and_then(|body| body.get("message"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    Reply::Json(json!({
        "id": format!("sent-{}", message.len()),
        "timestamp": "1461808889185",
        "v2messageType": "V2Message",
        "streamId": stream,
        "message": message,
        "fromUserId": BOT_ID
    }))
}

/// Stable id for the synthetic users `user<id>`.
pub fn id_for_name(name: &str) -> u64 {
    name.trim_start_matches("user").parse().unwrap_or(SENDER_ID)
}

pub fn user_json(id: u64) -> Value {
    json!({
        "id": id,
        "username": format!("user{id}"),
        "emailAddress": format!("user{id}@symphony.com"),
        "displayName": format!("User {id}"),
        "firstName": "Test",
        "lastName": format!("{id}"),
        "company": "Symphony"
    })
}

pub fn chat_message(id: &str, stream: &str, from: u64, message: &str) -> Value {
    json!({
        "id": id,
        "timestamp": "1461808889185",
        "v2messageType": "V2Message",
        "streamId": stream,
        "message": message,
        "fromUserId": from
    })
}

/// A non-chat datafeed entry. These carry none of the chat fields, only the
/// envelope plus whatever `fields` the event type defines.
pub fn feed_entry(id: &str, message_type: &str, fields: Value) -> Value {
    let mut entry = json!({
        "id": id,
        "timestamp": "1461808889185",
        "v2messageType": message_type,
        "streamId": "stream-1"
    });
    if let (Some(entry), Value::Object(fields)) = (entry.as_object_mut(), fields) {
        entry.extend(fields);
    }
    entry
}

pub fn config(max_attempts: u32) -> SymphonyConfig {
    SymphonyConfig::new(
        POD_HOST,
        Credential {
            public_key: PathBuf::from("./certs/publicKey.pem"),
            private_key: PathBuf::from("./certs/privateKey.pem"),
            passphrase: "changeit".into(),
        },
    )
    .with_agent_host(AGENT_HOST)
    .with_key_manager_host(KM_HOST)
    .with_session_auth_host(SESSION_HOST)
    .with_backoff(BackoffSettings::default().with_max_attempts(max_attempts))
}

pub fn client(platform: &Arc<MockPlatform>, config: &SymphonyConfig) -> SymphonyClient {
    let transport: SharedTransport = platform.clone();
    SymphonyClient::with_transport(config, transport)
}

pub fn adapter(platform: &Arc<MockPlatform>, config: &SymphonyConfig) -> SymphonyAdapter {
    let registry: SharedUserRegistry = Arc::new(MemoryUserRegistry::new());
    SymphonyAdapter::with_client(config, client(platform, config), registry)
}

/// Next feed event, failing the test if none arrives within ten minutes of
/// (possibly paused) time.
pub async fn next_event(events: &mut FeedEvents) -> FeedEvent {
    tokio::time::timeout(Duration::from_secs(600), events.recv())
        .await
        .expect("feed event within timeout")
        .expect("feed channel open")
}
