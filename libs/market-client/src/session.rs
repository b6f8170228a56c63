//! Marketplace session management.

use crate::{ClientError, Result};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Fixed delay between login retries while the marketplace is unreachable.
const LOGIN_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Connection parameters for the authenticated marketplace.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub login_path: String,
    pub status_path: String,
    pub backoffice_path: String,
    pub search_path: String,
    pub username: String,
    pub password: String,
}

/// Session credentials handed out by the status endpoint after login.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub pwdhash: String,
    pub player_id: String,
    pub player_name: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    pwd: Option<String>,
    #[serde(default)]
    playerid: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Default)]
struct SessionState {
    credentials: Option<Credentials>,
}

/// Authenticated marketplace client.
///
/// The session mutex serializes refresh attempts: callers that find the
/// session expired block on the in-flight login, then re-check "am I logged
/// in" instead of logging in a second time. While the marketplace rejects us
/// the client runs in an explicit degraded state and retries on a fixed
/// one-minute delay in the background; dependent fetches fail per-item with
/// [`ClientError::NotLoggedIn`] rather than aborting the run.
pub struct MarketClient {
    http: reqwest::Client,
    config: ClientConfig,
    session: Mutex<SessionState>,
    degraded: AtomicBool,
}

impl MarketClient {
    pub fn new(config: ClientConfig) -> Result<Arc<Self>> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Arc::new(Self {
            http,
            config,
            session: Mutex::new(SessionState::default()),
            degraded: AtomicBool::new(false),
        }))
    }

    /// True while login keeps failing and the background retry loop is active.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Current session credentials, if any.
    pub async fn credentials(&self) -> Option<Credentials> {
        self.session.lock().await.credentials.clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Log in, or confirm the existing session is still valid.
    ///
    /// On failure the client flips to degraded and keeps retrying in the
    /// background; the caller gets `Ok(false)` and should continue without
    /// listing access.
    pub async fn log_in(self: &Arc<Self>) -> Result<bool> {
        match self.log_in_once().await {
            Ok(logged_in) => Ok(logged_in),
            Err(err) => {
                warn!("Login failed, retrying every minute: {}", err);
                self.degraded.store(true, Ordering::SeqCst);
                self.spawn_login_retry();
                Ok(false)
            }
        }
    }

    fn spawn_login_retry(self: &Arc<Self>) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(LOGIN_RETRY_DELAY).await;
                match client.log_in_once().await {
                    Ok(true) => {
                        client.degraded.store(false, Ordering::SeqCst);
                        break;
                    }
                    Ok(false) => {}
                    Err(err) => debug!("Login retry failed: {}", err),
                }
            }
        });
    }

    /// One serialized login attempt. Holding the session lock across the
    /// whole exchange is what makes concurrent refreshes safe.
    async fn log_in_once(&self) -> Result<bool> {
        let mut state = self.session.lock().await;

        if state.credentials.is_some() && self.session_alive().await? {
            return Ok(true);
        }

        state.credentials = None;
        info!("Not logged in. Logging in as {}", self.config.username);

        let form = [
            ("loggingin", "1".to_string()),
            ("loginname", self.config.username.clone()),
            ("password", self.config.password.clone()),
            ("secure", "0".to_string()),
            ("submitbutton", "Log In".to_string()),
        ];

        let response = self
            .http
            .post(self.url(&self.config.login_path))
            .form(&form)
            .send()
            .await?;

        // A successful login is a redirect; anything else is a rejection
        if !response.status().is_redirection() {
            return Err(ClientError::LoginRejected(format!(
                "unexpected status {}",
                response.status()
            )));
        }

        let status: StatusResponse = self
            .http
            .get(self.url(&self.config.status_path))
            .query(&[("what", "status"), ("for", &self.config.user_agent)])
            .send()
            .await?
            .json()
            .await?;

        let pwdhash = match status.pwd {
            Some(pwd) if !pwd.is_empty() => pwd,
            _ => return Err(ClientError::MissingCredentials),
        };

        state.credentials = Some(Credentials {
            pwdhash,
            player_id: status.playerid.unwrap_or_default(),
            player_name: status.name.unwrap_or_default(),
        });

        info!("Login success.");
        Ok(true)
    }

    /// Cheap "am I logged in" probe: the status endpoint answers 200 with a
    /// session, redirects to the login page without one.
    async fn session_alive(&self) -> Result<bool> {
        let response = self
            .http
            .get(self.url(&self.config.status_path))
            .query(&[("what", "status"), ("for", &self.config.user_agent)])
            .send()
            .await;

        match response {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(err) => {
                warn!("Login check failed, assuming logged out: {}", err);
                Ok(false)
            }
        }
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }
}
