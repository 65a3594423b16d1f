//! C5: authenticated gRPC channel factory for the engine (Zeebe gateway).

use std::time::Duration;

use relay_core::{EngineAuth, RelayError, Result};
use serde::Deserialize;
use tonic::codegen::InterceptedService;
use tonic::service::Interceptor;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::Request;

pub mod gateway_protocol {
    tonic::include_proto!("gateway_protocol");
}

use gateway_protocol::gateway_client::GatewayClient;

const PING_INTERVAL: Duration = Duration::from_secs(60);
const PING_TIMEOUT: Duration = Duration::from_secs(20);

/// A bearer token injected on every outbound call, the per-call equivalent of
/// the plaintext header interceptor (§4.5).
#[derive(Clone)]
pub(crate) struct BearerInterceptor {
    token: Option<String>,
}

impl Interceptor for BearerInterceptor {
    fn call(&mut self, mut req: Request<()>) -> std::result::Result<Request<()>, tonic::Status> {
        if let Some(token) = &self.token {
            let value = format!("Bearer {token}")
                .parse()
                .map_err(|_| tonic::Status::internal("invalid bearer token"))?;
            req.metadata_mut().insert("authorization", value);
        }
        Ok(req)
    }
}

/// Either a bare client (insecure / plaintext OAuth2) or one wrapped with a
/// bearer interceptor. Both expose the same RPC surface through `GatewayClient`.
pub(crate) type EngineClient = GatewayClient<InterceptedService<Channel, BearerInterceptor>>;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Builds authenticated transports to the engine, refreshing OAuth2 tokens as
/// needed via the shared [`relay_core::OAuth2State`] (§4.5).
pub struct ChannelFactory {
    address: String,
    use_tls: bool,
    auth: EngineAuth,
    http: reqwest::Client,
}

impl ChannelFactory {
    pub fn new(address: impl Into<String>, use_tls: bool, auth: EngineAuth) -> Self {
        Self {
            address: address.into(),
            use_tls,
            auth,
            http: reqwest::Client::new(),
        }
    }

    /// `get_token()`: returns the cached token if more than 60s remain,
    /// otherwise mints a fresh one via the `client_credentials` grant (§4.5).
    async fn get_token(&self) -> Result<Option<String>> {
        match &self.auth {
            EngineAuth::Insecure => Ok(None),
            EngineAuth::StaticToken(token) => Ok(Some(token.clone())),
            EngineAuth::OAuth2ClientCredentials(state) => {
                if let Some(token) = state.cached_token() {
                    return Ok(Some(token));
                }
                let resp = self
                    .http
                    .post(&state.token_url)
                    .form(&[
                        ("grant_type", "client_credentials"),
                        ("client_id", state.client_id.as_str()),
                        ("client_secret", state.client_secret.as_str()),
                        ("audience", state.audience.as_str()),
                    ])
                    .send()
                    .await
                    .map_err(|e| RelayError::Auth(format!("token request: {e}")))?;

                if resp.status().as_u16() >= 400 {
                    return Err(RelayError::Auth(format!(
                        "token endpoint returned {}",
                        resp.status()
                    )));
                }

                let body: TokenResponse = resp
                    .json()
                    .await
                    .map_err(|e| RelayError::Auth(format!("token response decode: {e}")))?;

                let expires_at = chrono::Utc::now() + chrono::Duration::seconds(body.expires_in);
                state.store_token(body.access_token.clone(), expires_at);
                Ok(Some(body.access_token))
            }
        }
    }

    /// Force a refresh ignoring any cached token (§4.5 `refresh_token()`).
    pub async fn refresh_token(&self) -> Result<Option<String>> {
        if let EngineAuth::OAuth2ClientCredentials(state) = &self.auth {
            state.store_token(String::new(), chrono::Utc::now());
        }
        self.get_token().await
    }

    /// Build a fresh, authenticated `EngineClient`.
    pub(crate) async fn connect(&self) -> Result<EngineClient> {
        let scheme = if self.use_tls { "https" } else { "http" };
        let uri = format!("{scheme}://{}", self.address);

        let mut endpoint = Endpoint::from_shared(uri)
            .map_err(|e| RelayError::Config(format!("invalid engine address: {e}")))?
            .http2_keep_alive_interval(PING_INTERVAL)
            .keep_alive_timeout(PING_TIMEOUT)
            .keep_alive_while_idle(true);

        if self.use_tls {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(|e| RelayError::Config(format!("tls config: {e}")))?;
        }

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| RelayError::Transient(format!("engine channel connect: {e}")))?;

        let token = self.get_token().await?;
        let client = GatewayClient::with_interceptor(channel, BearerInterceptor { token });
        Ok(client)
    }
}
