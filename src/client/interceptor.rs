//! Session-aware client: attaches the access token and refreshes it on 401.
//!
//! At most one refresh is in flight per client. Calls that hit a 401 while a
//! refresh is running park a oneshot sender in a FIFO queue and are resumed
//! (or rejected) when it settles. Each call is replayed at most once.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::http::{HeaderValue, StatusCode, header};
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::ClientError;
use super::transport::{ApiRequest, ApiResponse, Transport, TransportError};

pub const LOGIN_PATH: &str = "/auth/login";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";

type Waiter = oneshot::Sender<Result<String, ClientError>>;

#[derive(Default)]
struct SessionState {
    access_token: Option<String>,
    refreshing: bool,
    waiters: Vec<Waiter>,
    /// Bumped whenever the session is ended or replaced
    epoch: u64,
}

impl SessionState {
    fn reset(&mut self) {
        self.access_token = None;
        self.epoch += 1;
    }
}

struct Inner<T> {
    transport: T,
    state: Mutex<SessionState>,
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish the outcome of a refresh started in `epoch` and wake every
    /// queued caller in order. A refresh that outlived its session publishes
    /// nothing and settles as [`ClientError::LoggedOut`].
    fn settle(
        &self,
        epoch: u64,
        result: Result<String, ClientError>,
    ) -> Result<String, ClientError> {
        let (result, waiters) = {
            let mut state = self.lock();
            let result = if state.epoch != epoch {
                debug!("Discarding refresh result from an ended session");
                Err(ClientError::LoggedOut)
            } else {
                match &result {
                    Ok(token) => state.access_token = Some(token.clone()),
                    Err(ClientError::RefreshAbandoned) => {}
                    Err(_) => state.access_token = None,
                }
                result
            };
            state.refreshing = false;
            (result, std::mem::take(&mut state.waiters))
        };

        if !waiters.is_empty() {
            debug!(waiters = waiters.len(), ok = result.is_ok(), "Resuming queued requests");
        }
        for waiter in waiters {
            // Receiver gone means that caller was cancelled
            let _ = waiter.send(result.clone());
        }
        result
    }
}

/// Settles the in-flight refresh as abandoned if the refreshing future is dropped.
struct RefreshGuard<'a, T> {
    inner: &'a Inner<T>,
    epoch: u64,
    settled: bool,
}

impl<T> RefreshGuard<'_, T> {
    fn settle(mut self, result: Result<String, ClientError>) -> Result<String, ClientError> {
        self.settled = true;
        self.inner.settle(self.epoch, result)
    }
}

impl<T> Drop for RefreshGuard<'_, T> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("Session refresh dropped before completion");
            let _ = self
                .inner
                .settle(self.epoch, Err(ClientError::RefreshAbandoned));
        }
    }
}

enum NextStep {
    Wait(oneshot::Receiver<Result<String, ClientError>>),
    Replay(String),
    Refresh { epoch: u64 },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    access_token: String,
}

/// Principal returned by a successful login.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub uuid: String,
    pub login: String,
    pub display_name: String,
    pub role: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
    user: SessionUser,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
}

/// API client holding one session. Clones share the session.
pub struct SessionClient<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SessionClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> SessionClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                state: Mutex::new(SessionState::default()),
            }),
        }
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Current access token, if any.
    pub fn access_token(&self) -> Option<String> {
        self.inner.lock().access_token.clone()
    }

    pub fn set_access_token(&self, token: impl Into<String>) {
        self.inner.lock().access_token = Some(token.into());
    }

    /// Forget the access token. An in-flight refresh still runs but its
    /// result is discarded.
    pub fn clear(&self) {
        self.inner.lock().reset();
    }

    /// Log in with a password and keep the returned access token.
    pub async fn login(&self, login: &str, password: &str) -> Result<SessionUser, ClientError> {
        let request = ApiRequest::post(LOGIN_PATH)
            .json(serde_json::json!({ "login": login, "password": password }));
        let response = self.inner.transport.send(request).await?;

        if !response.status.is_success() {
            return Err(rejected(&response));
        }

        let body: LoginResponse = response
            .json()
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        let mut state = self.inner.lock();
        state.reset();
        state.access_token = Some(body.access_token);
        Ok(body.user)
    }

    /// End the session on the server. Local state is cleared even if the call fails.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let result = self.inner.transport.send(ApiRequest::post(LOGOUT_PATH)).await;
        self.clear();
        result?;
        Ok(())
    }

    /// Refresh the access token now, joining a refresh already in flight.
    pub async fn refresh(&self) -> Result<String, ClientError> {
        let next = {
            let mut state = self.inner.lock();
            if state.refreshing {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                NextStep::Wait(rx)
            } else {
                state.refreshing = true;
                NextStep::Refresh { epoch: state.epoch }
            }
        };
        self.follow(next).await
    }

    /// Send a request with the session's access token, refreshing and
    /// replaying once on 401.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        if request.has_authorization() || is_session_endpoint(&request.path) {
            return Ok(self.inner.transport.send(request).await?);
        }

        let sent_with = self.access_token();
        let response = self.dispatch(request.clone(), sent_with.as_deref()).await?;
        if response.status != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!(path = %request.path, "Access token rejected, refreshing");
        let token = self.fresh_token(sent_with.as_deref()).await?;

        let replay = self.dispatch(request, Some(&token)).await?;
        if replay.status == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthorized);
        }
        Ok(replay)
    }

    /// Decide, under one lock, whether to wait for, reuse, or start a refresh.
    async fn fresh_token(&self, sent_with: Option<&str>) -> Result<String, ClientError> {
        let next = {
            let mut state = self.inner.lock();
            if state.refreshing {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                NextStep::Wait(rx)
            } else if let Some(current) = state
                .access_token
                .as_deref()
                .filter(|current| Some(*current) != sent_with)
            {
                NextStep::Replay(current.to_string())
            } else {
                state.refreshing = true;
                NextStep::Refresh { epoch: state.epoch }
            }
        };

        self.follow(next).await
    }

    async fn follow(&self, next: NextStep) -> Result<String, ClientError> {
        match next {
            NextStep::Wait(rx) => rx.await.unwrap_or(Err(ClientError::RefreshAbandoned)),
            NextStep::Replay(token) => Ok(token),
            NextStep::Refresh { epoch } => self.run_refresh(epoch).await,
        }
    }

    /// Perform the refresh call. The caller must have set the in-flight flag
    /// and read `epoch` under the same lock.
    async fn run_refresh(&self, epoch: u64) -> Result<String, ClientError> {
        let guard = RefreshGuard {
            inner: &self.inner,
            epoch,
            settled: false,
        };

        let result = self.request_refresh().await;
        if let Err(e) = &result {
            warn!(error = %e, "Session refresh failed");
        }
        guard.settle(result)
    }

    async fn request_refresh(&self) -> Result<String, ClientError> {
        let response = self
            .inner
            .transport
            .send(ApiRequest::post(REFRESH_PATH))
            .await?;

        if !response.status.is_success() {
            return Err(ClientError::RefreshRejected {
                status: response.status,
            });
        }

        let body: TokenResponse = response
            .json()
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(body.access_token)
    }

    async fn dispatch(
        &self,
        mut request: ApiRequest,
        token: Option<&str>,
    ) -> Result<ApiResponse, ClientError> {
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| TransportError::InvalidHeader(header::AUTHORIZATION))?;
            request.headers.insert(header::AUTHORIZATION, value);
        }
        Ok(self.inner.transport.send(request).await?)
    }
}

fn is_session_endpoint(path: &str) -> bool {
    let path = path.split('?').next().unwrap_or(path);
    matches!(path, LOGIN_PATH | REFRESH_PATH | LOGOUT_PATH)
}

fn rejected(response: &ApiResponse) -> ClientError {
    ClientError::Rejected {
        status: response.status,
        code: response.json::<ErrorBody>().ok().map(|body| body.code),
    }
}
