use crate::error::{GmailError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use yup_oauth2::storage::{TokenInfo, TokenStorage};
use yup_oauth2::{ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod};

pub const GMAIL_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";
pub const GMAIL_SEND_SCOPE: &str = "https://www.googleapis.com/auth/gmail.send";

// Tokens this close to expiry are treated as expired.
const EXPIRY_SKEW_SECS: i64 = 60;

// Google's access-token lifetime, assumed when a refresh omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

pub fn default_scopes() -> Vec<String> {
    vec![GMAIL_READONLY_SCOPE.to_string(), GMAIL_SEND_SCOPE.to_string()]
}

/// Persisted OAuth credential.
///
/// Field names follow the "authorized user" JSON Google's client libraries
/// write, and any field we don't model is kept in `extra` so a token file
/// survives a load/save cycle intact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Credential {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Credential {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        if self.token.is_empty() {
            return false;
        }
        match self.expiry {
            Some(expiry) => expiry > now + chrono::Duration::seconds(EXPIRY_SKEW_SECS),
            None => true,
        }
    }

    /// Whether every scope in `scopes` was granted to this credential.
    pub fn covers(&self, scopes: &[String]) -> bool {
        scopes.iter().all(|s| self.scopes.contains(s))
    }
}

/// Token returned by a completed consent flow.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsentGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

// Define a trait for credential persistence to allow mocking
#[cfg_attr(test, mockall::automock)]
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, contents: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Keeps the credential in a JSON file, overwritten on every save.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// The file holds a refresh token, so only the owner may read it.
#[cfg(unix)]
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    use std::fs::{OpenOptions, Permissions};
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies on creation; tighten a file left by an older run.
    file.set_permissions(Permissions::from_mode(0o600))?;
    file.write_all(contents.as_bytes())
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GmailError::Storage(format!(
                "reading {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn save(&self, contents: &str) -> Result<()> {
        write_private(&self.path, contents).map_err(|e| {
            GmailError::Storage(format!("writing {}: {}", self.path.display(), e))
        })
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GmailError::Storage(format!(
                "removing {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

// Implement the trait for the real keyring::Entry
impl TokenStore for Entry {
    fn load(&self) -> Result<Option<String>> {
        match self.get_password() {
            Ok(contents) => Ok(Some(contents)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(GmailError::Storage(e.to_string())),
        }
    }

    fn save(&self, contents: &str) -> Result<()> {
        self.set_password(contents)
            .map_err(|e| GmailError::Storage(e.to_string()))
    }

    fn clear(&self) -> Result<()> {
        match self.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(GmailError::Storage(e.to_string())),
        }
    }
}

// Define a trait for OAuth flow operations to allow mocking
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConsentFlow: Send + Sync {
    async fn obtain(&self, secret: ApplicationSecret, scopes: Vec<String>) -> Result<ConsentGrant>;
}

/// Installed-app flow: opens the consent page and listens on a local port
/// for the redirect.
pub struct InstalledConsentFlow {
    timeout: Duration,
}

impl InstalledConsentFlow {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

// yup-oauth2 only exposes the refresh token through its storage hook.
#[derive(Clone, Default)]
struct CapturedToken(Arc<Mutex<Option<TokenInfo>>>);

impl CapturedToken {
    fn take(&self) -> Option<TokenInfo> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }
}

#[async_trait]
impl TokenStorage for CapturedToken {
    async fn set(&self, _scopes: &[&str], token: TokenInfo) -> anyhow::Result<()> {
        let mut slot = self
            .0
            .lock()
            .map_err(|_| anyhow::anyhow!("token capture lock poisoned"))?;
        *slot = Some(token);
        Ok(())
    }

    async fn get(&self, _scopes: &[&str]) -> Option<TokenInfo> {
        self.0.lock().ok()?.clone()
    }
}

fn offset_to_utc(t: time::OffsetDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(t.unix_timestamp(), t.nanosecond())
}

#[async_trait]
impl ConsentFlow for InstalledConsentFlow {
    async fn obtain(&self, secret: ApplicationSecret, scopes: Vec<String>) -> Result<ConsentGrant> {
        let captured = CapturedToken::default();
        let auth =
            InstalledFlowAuthenticator::builder(secret, InstalledFlowReturnMethod::HTTPRedirect)
                .with_storage(Box::new(captured.clone()))
                .build()
                .await
                .map_err(|e| {
                    GmailError::Authentication(format!("could not start consent flow: {}", e))
                })?;

        let scope_refs: Vec<&str> = scopes.iter().map(|s| s.as_str()).collect();
        let access = tokio::time::timeout(self.timeout, auth.token(&scope_refs))
            .await
            .map_err(|_| {
                GmailError::Authentication(format!(
                    "no consent received within {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| GmailError::Authentication(e.to_string()))?;

        let access_token = access
            .token()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GmailError::Authentication("provider returned no access token".into()))?
            .to_string();

        Ok(ConsentGrant {
            access_token,
            refresh_token: captured.take().and_then(|info| info.refresh_token),
            expires_at: access.expiration_time().and_then(offset_to_utc),
        })
    }
}

/// Reads the OAuth client secret (`installed` or `web` layout).
pub async fn load_client_secret(path: impl AsRef<Path>) -> Result<ApplicationSecret> {
    let path = path.as_ref();
    yup_oauth2::read_application_secret(path)
        .await
        .map_err(|e| {
            GmailError::Authentication(format!(
                "could not read client secret {}: {}",
                path.display(),
                e
            ))
        })
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

/// Owns the persisted credential: loads it, refreshes it, and falls back to
/// interactive consent when neither works.
pub struct CredentialStore {
    secret: ApplicationSecret,
    storage: Box<dyn TokenStore>,
    flow: Box<dyn ConsentFlow>,
    http: reqwest::Client,
}

impl CredentialStore {
    pub fn new(
        secret: ApplicationSecret,
        storage: Box<dyn TokenStore>,
        flow: Box<dyn ConsentFlow>,
    ) -> Self {
        Self {
            secret,
            storage,
            flow,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Returns a credential that is valid for `scopes`, never an expired or
    /// under-scoped one.
    pub async fn load_or_authenticate(&self, scopes: &[String]) -> Result<Credential> {
        if let Some(credential) = self.load_persisted() {
            if credential.covers(scopes) {
                if credential.is_valid(Utc::now()) {
                    debug!("Using stored credential");
                    return Ok(credential);
                }
                return self.refresh(&credential, scopes).await;
            }
            info!("Stored credential does not cover the requested scopes, re-authorizing");
        }
        self.authorize(scopes).await
    }

    /// Replaces `stale` with a fresh credential, via the refresh token when
    /// possible and interactive consent otherwise.
    pub async fn refresh(&self, stale: &Credential, scopes: &[String]) -> Result<Credential> {
        if let Some(refresh_token) = stale.refresh_token.as_deref() {
            match self.exchange_refresh_token(stale, refresh_token).await {
                Ok(fresh) if fresh.covers(scopes) => {
                    self.persist(&fresh)?;
                    info!("Access token refreshed");
                    return Ok(fresh);
                }
                Ok(_) => warn!("Refreshed token no longer covers the requested scopes"),
                Err(e) => warn!("Token refresh failed: {}", e),
            }
        }
        self.authorize(scopes).await
    }

    /// Forgets the persisted credential.
    pub fn clear(&self) -> Result<()> {
        self.storage.clear()
    }

    fn load_persisted(&self) -> Option<Credential> {
        let contents = match self.storage.load() {
            Ok(Some(contents)) => contents,
            Ok(None) => return None,
            Err(e) => {
                warn!("Could not load stored credential: {}", e);
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(credential) => Some(credential),
            Err(e) => {
                warn!("Ignoring unreadable stored credential: {}", e);
                None
            }
        }
    }

    fn persist(&self, credential: &Credential) -> Result<()> {
        let contents = serde_json::to_string_pretty(credential)?;
        self.storage.save(&contents)
    }

    async fn exchange_refresh_token(
        &self,
        stale: &Credential,
        refresh_token: &str,
    ) -> Result<Credential> {
        let token_uri = stale
            .token_uri
            .clone()
            .unwrap_or_else(|| self.secret.token_uri.clone());
        let client_id = stale
            .client_id
            .clone()
            .unwrap_or_else(|| self.secret.client_id.clone());
        let client_secret = stale
            .client_secret
            .clone()
            .unwrap_or_else(|| self.secret.client_secret.clone());

        debug!("Refreshing access token at {}", token_uri);
        let response = self
            .http
            .post(&token_uri)
            .form(&[
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GmailError::remote(Some(status.as_u16()), error_text));
        }
        let refreshed: RefreshResponse = response.json().await?;

        let mut fresh = stale.clone();
        fresh.token = refreshed.access_token;
        if let Some(rotated) = refreshed.refresh_token {
            fresh.refresh_token = Some(rotated);
        }
        let lifetime = refreshed.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        fresh.expiry = Some(Utc::now() + chrono::Duration::seconds(lifetime));
        if let Some(scope) = refreshed.scope {
            fresh.scopes = scope.split_whitespace().map(str::to_string).collect();
        }
        fresh.token_uri = Some(token_uri);
        fresh.client_id = Some(client_id);
        fresh.client_secret = Some(client_secret);
        Ok(fresh)
    }

    async fn authorize(&self, scopes: &[String]) -> Result<Credential> {
        info!("Requesting authorization for {} scope(s)", scopes.len());
        let grant = self
            .flow
            .obtain(self.secret.clone(), scopes.to_vec())
            .await
            .map_err(|e| match e {
                GmailError::Authentication(_) => e,
                other => GmailError::Authentication(other.to_string()),
            })?;
        if grant.access_token.is_empty() {
            return Err(GmailError::Authentication(
                "consent flow returned an empty token".into(),
            ));
        }

        let credential = Credential {
            token: grant.access_token,
            refresh_token: grant.refresh_token,
            token_uri: Some(self.secret.token_uri.clone()),
            client_id: Some(self.secret.client_id.clone()),
            client_secret: Some(self.secret.client_secret.clone()),
            scopes: scopes.to_vec(),
            expiry: grant.expires_at,
            extra: serde_json::Map::new(),
        };
        self.persist(&credential)?;
        info!("Authorization complete, credential stored");
        Ok(credential)
    }
}
