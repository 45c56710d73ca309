//! Asynchronous TNLCM client implementation.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use sandbox_core::backend::Credentials;
use sandbox_core::Error;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use url::Url;

use crate::models::{Message, Tokens, TrialNetworkCreated, TrialNetworkRequest};
use crate::Result;

const USER_AGENT: &str = concat!("sandbox-tnlcm/", env!("CARGO_PKG_VERSION"));

/// Default timeout for TNLCM requests in seconds
pub const TNLCM_DEFAULT_TIMEOUT: u64 = 60;

/// Builder for [`TnlcmClient`].
#[derive(Debug, Clone)]
pub struct TnlcmClientBuilder {
    base_url: Url,
    timeout: Duration,
    accept_invalid_certs: bool,
    access_token: Option<SecretString>,
}

impl TnlcmClientBuilder {
    /// Create a builder for the API base URL, e.g. `http://tnlcm:5000/api/v1`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEndpoint`] when the URL does not parse or is
    /// not HTTP(S).
    pub fn new(base_url: impl AsRef<str>) -> Result<Self> {
        let mut base_url = Url::parse(base_url.as_ref())?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(Error::InvalidEndpoint(format!(
                "TNLCM URL must be http(s): {base_url}"
            )));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            base_url,
            timeout: Duration::from_secs(TNLCM_DEFAULT_TIMEOUT),
            accept_invalid_certs: false,
            access_token: None,
        })
    }

    /// Set request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Accept self-signed certificates.
    #[must_use]
    pub const fn with_insecure(mut self, insecure: bool) -> Self {
        self.accept_invalid_certs = insecure;
        self
    }

    /// Configure a bearer token obtained earlier.
    #[must_use]
    pub fn with_token(mut self, token: SecretString) -> Self {
        self.access_token = Some(token);
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Fails when the underlying HTTP client cannot be constructed.
    pub fn build(self) -> Result<TnlcmClient> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(self.timeout)
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .gzip(true)
            .build()?;
        Ok(TnlcmClient {
            http,
            base_url: self.base_url,
            access_token: self.access_token,
        })
    }
}

/// Asynchronous TNLCM client.
///
/// Requests are sent once; nothing is retried.
#[derive(Debug, Clone)]
pub struct TnlcmClient {
    http: reqwest::Client,
    base_url: Url,
    access_token: Option<SecretString>,
}

impl TnlcmClient {
    /// Construct a client directly from the base URL.
    ///
    /// # Errors
    ///
    /// Same as [`TnlcmClientBuilder::new`] and [`TnlcmClientBuilder::build`].
    pub fn new(base_url: impl AsRef<str>) -> Result<Self> {
        TnlcmClientBuilder::new(base_url)?.build()
    }

    /// Return the base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Check whether a bearer token is configured.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    /// Log in with HTTP basic credentials.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] on rejected credentials and the
    /// usual HTTP errors otherwise.
    pub async fn login(&self, credentials: &Credentials) -> Result<Tokens> {
        let request = self
            .request(Method::POST, "user/login")?
            .basic_auth(credentials.username(), Some(credentials.password()));
        let tokens: Tokens = decode(send(request).await?).await?;
        info!(user = %credentials.username, "logged in to TNLCM");
        Ok(tokens)
    }

    /// Log in and keep the access token for subsequent calls.
    ///
    /// # Errors
    ///
    /// Same as [`TnlcmClient::login`].
    pub async fn authenticate(mut self, credentials: &Credentials) -> Result<Self> {
        let tokens = self.login(credentials).await?;
        self.access_token = Some(tokens.access_token);
        Ok(self)
    }

    /// Register a trial network from a descriptor.
    ///
    /// # Errors
    ///
    /// Fails without a token, when the descriptor cannot be read or when the
    /// server rejects the descriptor.
    pub async fn create_trial_network(
        &self,
        request: &TrialNetworkRequest,
    ) -> Result<TrialNetworkCreated> {
        let form = request.to_form().await?;
        let builder = self.authorized(Method::POST, "trial-network")?.multipart(form);
        let created: TrialNetworkCreated = decode(send(builder).await?).await?;
        info!(tn_id = %created.tn_id, site = %request.deployment_site, "trial network created");
        Ok(created)
    }

    /// Deploy a registered trial network.
    ///
    /// # Errors
    ///
    /// Fails without a token or when the server refuses the deployment.
    pub async fn deploy_trial_network(&self, tn_id: &str) -> Result<Message> {
        let path = format!("trial-network/{tn_id}");
        let message = self.send_for_message(Method::PUT, &path).await?;
        info!(tn_id, "trial network deployment started");
        Ok(message)
    }

    /// Destroy the resources of a trial network.
    ///
    /// # Errors
    ///
    /// Fails without a token, for unknown ids or when the server refuses.
    pub async fn destroy_trial_network(&self, tn_id: &str) -> Result<Message> {
        let path = format!("trial-network/{tn_id}");
        let message = self.send_for_message(Method::DELETE, &path).await?;
        info!(tn_id, "trial network destroyed");
        Ok(message)
    }

    /// Remove every trace of a destroyed trial network.
    ///
    /// # Errors
    ///
    /// Fails without a token, for unknown ids or when the server refuses.
    pub async fn purge_trial_network(&self, tn_id: &str) -> Result<Message> {
        let path = format!("trial-network/purge/{tn_id}");
        let message = self.send_for_message(Method::DELETE, &path).await?;
        info!(tn_id, "trial network purged");
        Ok(message)
    }

    async fn send_for_message(&self, method: Method, path: &str) -> Result<Message> {
        let response = send(self.authorized(method, path)?).await?;
        // Some endpoints answer 204 or plain text.
        let text = response.text().await?;
        Ok(serde_json::from_str(&text).unwrap_or(Message { message: text }))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.base_url.join(path)?;
        debug!(%method, %url, "TNLCM request");
        Ok(self
            .http
            .request(method, url)
            .header("Accept", "application/json"))
    }

    fn authorized(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let token = self.access_token.as_ref().ok_or_else(|| {
            Error::InvalidRequest("TNLCM request requires a login first".to_string())
        })?;
        Ok(self.request(method, path)?.bearer_auth(token.expose_secret()))
    }
}

async fn send(request: RequestBuilder) -> Result<Response> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(map_status_to_error(status, error_message(text)))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let text = response.text().await?;
    Ok(serde_json::from_str(&text)?)
}

/// Prefer the `message` field of a JSON error body.
fn error_message(text: String) -> String {
    match serde_json::from_str::<Message>(&text) {
        Ok(body) if !body.message.is_empty() => body.message,
        _ => text,
    }
}

fn map_status_to_error(status: StatusCode, text: String) -> Error {
    match status {
        StatusCode::NOT_FOUND => Error::NotFound(text),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Error::InvalidRequest(text),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::InvalidRequest(format!("TNLCM authentication failed: {text}"))
        }
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => {
            Error::ServiceUnavailable(format!("TNLCM temporarily unavailable: {text}"))
        }
        status if status.is_server_error() => Error::ExternalServiceError {
            service: "TNLCM".to_string(),
            message: format!("server error {status}: {text}"),
        },
        _ => Error::HttpError(format!("TNLCM error {status}: {text}")),
    }
}
