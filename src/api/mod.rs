//! UI-side storage server API
//!
//! Every request travels as a `server-api` call through the correlated
//! channel; the host performs the HTTP exchange. This module also owns the
//! session token and the server health probe.

mod models;

pub use models::{
    DirectoryEntry, DirectoryInfo, DiskInfoResponse, ErrorResponse, FileInfo, HealthResponse,
    MessageResponse, SearchResult, ServerResponse, TokenResponse, UserResponse,
};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{BridgeError, BridgeResult, HostError, CODE_SERVER, CODE_UNKNOWN};
use crate::ipc::types::SERVER_API;
use crate::ipc::{CallOptions, CallState, ChannelEvent, CorrelatedChannel, RequestId};
use crate::remote_path::fs_endpoint;

pub const HEALTH_CHECK_ID: &str = "health-check";
const HEALTH_ENDPOINT: &str = "/health";

/// Arguments of one `server-api` call.
#[derive(Debug, Clone)]
pub struct ServerRequest {
    pub endpoint: String,
    pub method: String,
    pub query: Map<String, Value>,
    pub body: Option<Value>,
    pub headers: Map<String, Value>,
    /// Attach the session token as a `token` query parameter.
    pub auth: bool,
}

impl ServerRequest {
    pub fn new(method: &str, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: method.to_string(),
            query: Map::new(),
            body: None,
            headers: Map::new(),
            auth: true,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new("get", endpoint)
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new("post", endpoint)
    }

    pub fn put(endpoint: impl Into<String>) -> Self {
        Self::new("put", endpoint)
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new("delete", endpoint)
    }

    pub fn query(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.query.insert(key.to_string(), value.into());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_string(), Value::from(value));
        self
    }

    pub fn without_auth(mut self) -> Self {
        self.auth = false;
        self
    }

    fn into_args(self, token: Option<&str>) -> Vec<Value> {
        let mut query = Map::new();
        if let Some(token) = token {
            query.insert("token".to_string(), Value::from(token));
        }
        query.extend(self.query);
        vec![
            Value::from(self.endpoint),
            Value::from(self.method),
            Value::Object(query),
            self.body.unwrap_or(Value::Null),
            Value::Object(self.headers),
        ]
    }
}

#[derive(Debug, Default)]
struct Session {
    token: Option<String>,
    username: Option<String>,
    admin: bool,
}

struct ApiInner {
    channel: CorrelatedChannel,
    session: RwLock<Session>,
    ready: watch::Sender<bool>,
    authenticated: watch::Sender<bool>,
}

impl ApiInner {
    fn apply_health(&self, event: ChannelEvent) {
        match event.state {
            CallState::Done => {
                let running = event
                    .data
                    .into_iter()
                    .next()
                    .and_then(|v| serde_json::from_value::<ServerResponse>(v).ok())
                    .filter(|r| r.status == 200)
                    .and_then(|r| serde_json::from_value::<HealthResponse>(r.body).ok())
                    .is_some_and(|h| h.running);
                info!("health_check: server running={}", running);
                self.ready.send_replace(running);
            }
            CallState::Error => {
                warn!("health_check: probe failed: {}", event.host_error());
                self.ready.send_replace(false);
            }
            CallState::Start | CallState::Progress => {}
        }
    }
}

#[derive(Clone)]
pub struct ApiService {
    inner: Arc<ApiInner>,
}

impl ApiService {
    /// Starts disabled until the health probe reports the server running.
    pub fn new(channel: CorrelatedChannel) -> Self {
        let (ready, _) = watch::channel(false);
        let (authenticated, _) = watch::channel(false);
        Self {
            inner: Arc::new(ApiInner {
                channel,
                session: RwLock::new(Session::default()),
                ready,
                authenticated,
            }),
        }
    }

    pub fn channel(&self) -> &CorrelatedChannel {
        &self.inner.channel
    }

    pub fn is_disabled(&self) -> bool {
        !*self.inner.ready.borrow()
    }

    pub fn readiness(&self) -> watch::Receiver<bool> {
        self.inner.ready.subscribe()
    }

    pub async fn wait_ready(&self) -> BridgeResult<()> {
        let mut ready = self.inner.ready.subscribe();
        ready
            .wait_for(|ready| *ready)
            .await
            .map(|_| ())
            .map_err(|_| BridgeError::ChannelClosed)
    }

    pub fn auth_changes(&self) -> watch::Receiver<bool> {
        self.inner.authenticated.subscribe()
    }

    pub fn token(&self) -> Option<String> {
        self.read_session(|s| s.token.clone())
    }

    /// Restore a previously issued token, e.g. the last session's.
    pub fn restore_token(&self, token: impl Into<String>) {
        self.write_session(|s| s.token = Some(token.into()));
    }

    pub fn is_authenticated(&self) -> bool {
        self.read_session(|s| s.token.is_some())
    }

    pub fn is_admin(&self) -> bool {
        self.read_session(|s| s.admin)
    }

    pub fn username(&self) -> Option<String> {
        self.read_session(|s| s.username.clone())
    }

    fn read_session<R>(&self, f: impl FnOnce(&Session) -> R) -> R {
        let session = self.inner.session.read().unwrap_or_else(PoisonError::into_inner);
        f(&session)
    }

    fn write_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut session = self.inner.session.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut session)
    }

    pub(crate) fn clear_session(&self) {
        self.write_session(|s| *s = Session::default());
        self.inner.authenticated.send_replace(false);
    }

    /// Arm the recurring health probe. Its listener stays open on the fixed
    /// `health-check` identity and every later probe answers into it.
    pub fn start_health_probe(&self) -> BridgeResult<()> {
        let mut call = self.inner.channel.call(
            SERVER_API,
            vec![json!(HEALTH_ENDPOINT)],
            CallOptions::default().keep_open().forced_id(HEALTH_CHECK_ID),
        )?;
        let owner: Weak<ApiInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(event) = call.next_event().await {
                let Some(inner) = owner.upgrade() else {
                    break;
                };
                inner.apply_health(event);
            }
            debug!("health_check: listener closed");
        });
        Ok(())
    }

    /// Re-send the probe on the armed identity without a new listener.
    pub fn check_health(&self) -> BridgeResult<()> {
        self.inner.channel.send_with_id(
            SERVER_API,
            RequestId::forced(HEALTH_CHECK_ID),
            vec![json!(HEALTH_ENDPOINT)],
        )
    }

    pub fn spawn_health_interval(&self, every: Duration) -> JoinHandle<()> {
        let api = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if api.check_health().is_err() {
                    break;
                }
            }
        })
    }

    pub async fn server<T: DeserializeOwned>(&self, request: ServerRequest) -> BridgeResult<T> {
        if self.is_disabled() {
            return Err(BridgeError::ServiceDisabled);
        }
        let body = self.server_raw(request).await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn server_raw(&self, request: ServerRequest) -> BridgeResult<Value> {
        let token = if request.auth { self.token() } else { None };
        let endpoint = request.endpoint.clone();
        let call = self
            .inner
            .channel
            .call(SERVER_API, request.into_args(token.as_deref()), CallOptions::default())?;

        let data = call.finish().await.map_err(|e| match e {
            BridgeError::Host(err) => BridgeError::Host(HostError {
                code: err.code.or_else(|| Some(CODE_UNKNOWN.to_string())),
                ..err
            }),
            other => other,
        })?;

        let response: ServerResponse = data
            .into_iter()
            .next()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| BridgeError::Malformed {
                channel: SERVER_API.to_string(),
                reason: format!("empty response for {}", endpoint),
            })?;

        if response.status == 200 {
            return Ok(response.body);
        }
        debug!("server_api: {} -> status {}", endpoint, response.status);
        match serde_json::from_value::<ErrorResponse>(response.body) {
            Ok(err) if err.error => Err(BridgeError::Server {
                message: err.message,
                code: err.code.unwrap_or_else(|| CODE_SERVER.to_string()),
            }),
            _ => Err(BridgeError::Server {
                message: format!("Server responded with status {}!", response.status),
                code: CODE_SERVER.to_string(),
            }),
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> BridgeResult<()> {
        let basic = format!("Basic {}", BASE64.encode(format!("{}:{}", username, password)));
        let result = async {
            let response: TokenResponse = self
                .server(
                    ServerRequest::post("/auth/login")
                        .header("Authorization", &basic)
                        .without_auth(),
                )
                .await?;
            self.write_session(|s| s.token = Some(response.token));
            self.update_user().await
        }
        .await;

        match result {
            Ok(()) => {
                info!("auth: logged in as {}", username);
                self.inner.authenticated.send_replace(true);
                Ok(())
            }
            Err(e) => {
                self.clear_session();
                Err(e)
            }
        }
    }

    pub async fn reauthenticate(&self) -> BridgeResult<()> {
        let result = async {
            let response: TokenResponse = self.server(ServerRequest::post("/auth/renew")).await?;
            self.write_session(|s| s.token = Some(response.token));
            self.update_user().await
        }
        .await;

        match result {
            Ok(()) => {
                self.inner.authenticated.send_replace(true);
                Ok(())
            }
            Err(e) => {
                warn!("auth: renew failed: {}", e);
                self.clear_session();
                Err(e)
            }
        }
    }

    pub async fn logout(&self) -> BridgeResult<()> {
        let response: MessageResponse = self.server(ServerRequest::post("/auth/logout")).await?;
        info!("auth: {}", response.message);
        self.clear_session();
        Ok(())
    }

    async fn update_user(&self) -> BridgeResult<()> {
        match self.server::<UserResponse>(ServerRequest::get("/auth/user")).await {
            Ok(user) => {
                self.write_session(|s| {
                    s.admin = user.admin;
                    s.username = Some(user.username);
                });
                Ok(())
            }
            Err(e) => {
                self.write_session(|s| s.admin = false);
                Err(e)
            }
        }
    }

    fn require_admin(&self) -> BridgeResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(BridgeError::AdminRequired)
        }
    }

    pub async fn get_users(&self) -> BridgeResult<Vec<UserResponse>> {
        self.require_admin()?;
        self.server(ServerRequest::get("/auth/users")).await
    }

    pub async fn register(&self, username: &str, password: &str, admin: bool) -> BridgeResult<()> {
        self.require_admin()?;
        let response: MessageResponse = self
            .server(ServerRequest::post("/auth/register").body(json!({
                "username": username,
                "password": BASE64.encode(password),
                "admin": admin,
            })))
            .await?;
        info!("auth: {}", response.message);
        Ok(())
    }

    pub async fn update_password(&self, username: &str, new_password: &str) -> BridgeResult<()> {
        self.require_admin()?;
        let response: MessageResponse = self
            .server(ServerRequest::put("/auth/user").body(json!({
                "username": username,
                "password": BASE64.encode(new_password),
            })))
            .await?;
        info!("auth: {}", response.message);
        Ok(())
    }

    pub async fn delete_user(&self, username: &str) -> BridgeResult<()> {
        self.require_admin()?;
        let response: MessageResponse = self
            .server(ServerRequest::delete("/auth/user").body(json!({ "username": username })))
            .await?;
        info!("auth: {}", response.message);
        if self.username().as_deref() == Some(username) {
            self.clear_session();
        }
        Ok(())
    }

    pub async fn list_dir(&self, path: &str) -> BridgeResult<DirectoryInfo> {
        self.server(ServerRequest::get(fs_endpoint(path))).await
    }

    pub async fn mkdir(&self, path: &str) -> BridgeResult<()> {
        let response: MessageResponse = self
            .server(ServerRequest::post(fs_endpoint(path)).query("dir", true))
            .await?;
        debug!("fs: {}", response.message);
        Ok(())
    }

    pub async fn remove(&self, path: &str) -> BridgeResult<()> {
        let response: MessageResponse = self.server(ServerRequest::delete(fs_endpoint(path))).await?;
        debug!("fs: {}", response.message);
        Ok(())
    }

    /// `remove` authenticated with `token` rather than the current session.
    pub async fn remove_with_token(&self, path: &str, token: &str) -> BridgeResult<()> {
        let request = ServerRequest::delete(fs_endpoint(path))
            .without_auth()
            .query("token", token);
        let response: MessageResponse = self.server(request).await?;
        debug!("fs: {}", response.message);
        Ok(())
    }

    pub async fn disk_info(&self) -> BridgeResult<DiskInfoResponse> {
        self.server(ServerRequest::get("/space")).await
    }

    pub async fn search(&self, query: &str) -> BridgeResult<Vec<SearchResult>> {
        self.server(ServerRequest::get("/search").query("query", query)).await
    }
}
