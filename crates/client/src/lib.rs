//! # Meshwork Client
//!
//! The outbound half of the encrypted envelope: [`MessageClient`] pushes
//! network messages between agents, [`ControlClient`] submits control
//! forms to an agent's `/control` endpoint (this is what the admin CLI
//! uses).
//!
//! Both seal the JSON payload with AES-128-EAX, put the base64
//! ciphertext in the body and the nonce/tag in the `Nonce`/`Tag`
//! headers, and expect the response in the same envelope under a fresh
//! nonce. Requests run under a hard 5 second timeout. The control
//! client additionally retries inside a 5 second budget with 0.5 s
//! linear backoff; the message client never retries — mesh delivery
//! falls back to the store-and-forward queue instead, and a client
//! retry would just double-send.

use std::time::{Duration, Instant};

use meshwork_core::form::Form;
use meshwork_core::message::NetworkMessage;
use meshwork_crypto::{EnvelopeError, SecretKey};
use thiserror::Error;
use tracing::{debug, warn};

/// Hard per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Total retry budget for the control client.
const RETRY_BUDGET: Duration = Duration::from_secs(5);
/// Linear backoff step between control-client attempts.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

pub const NONCE_HEADER: &str = "Nonce";
pub const TAG_HEADER: &str = "Tag";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("response is missing the {0} header")]
    MissingHeader(&'static str),

    #[error("response payload did not parse: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Pushes [`NetworkMessage`]s to peer `/mpi` endpoints. Every outgoing
/// message is stamped with this agent's id as `isrc`, which is how the
/// receiving side refreshes us in its peer table.
pub struct MessageClient {
    http: reqwest::Client,
    key: SecretKey,
    agtuuid: String,
}

impl MessageClient {
    pub fn new(key: SecretKey, agtuuid: impl Into<String>) -> MessageClient {
        MessageClient {
            http: build_http(),
            key,
            agtuuid: agtuuid.into(),
        }
    }

    /// Send one message; returns the peer's reply (normally an
    /// acknowledgement, or a MESSAGES_RESPONSE for a pull).
    pub async fn send(
        &self,
        url: &str,
        message: &NetworkMessage,
    ) -> Result<NetworkMessage, ClientError> {
        let mut message = message.clone();
        message.isrc = Some(self.agtuuid.clone());
        debug!(url, kind = %message.kind(), dest = message.dest.as_deref().unwrap_or("-"), "pushing message");

        let payload = serde_json::to_vec(&message)?;
        let reply = exchange(&self.http, &self.key, url, &payload).await?;
        Ok(serde_json::from_slice(&reply)?)
    }
}

/// Submits [`Form`]s to an agent's `/control` endpoint.
pub struct ControlClient {
    http: reqwest::Client,
    key: SecretKey,
}

impl ControlClient {
    pub fn new(key: SecretKey) -> ControlClient {
        ControlClient {
            http: build_http(),
            key,
        }
    }

    /// Submit a form, retrying transport failures inside the budget.
    pub async fn send(&self, url: &str, form: &Form) -> Result<Form, ClientError> {
        let payload = serde_json::to_vec(form)?;
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match exchange(&self.http, &self.key, url, &payload).await {
                Ok(reply) => return Ok(serde_json::from_slice(&reply)?),
                Err(error) => {
                    let backoff = RETRY_BACKOFF * attempt;
                    if started.elapsed() + backoff >= RETRY_BUDGET {
                        return Err(error);
                    }
                    warn!(url, attempt, %error, "control request failed, retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

fn build_http() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}

/// One sealed request/response exchange.
async fn exchange(
    http: &reqwest::Client,
    key: &SecretKey,
    url: &str,
    payload: &[u8],
) -> Result<Vec<u8>, ClientError> {
    let sealed = meshwork_crypto::seal(key, payload);

    let response = http
        .post(url)
        .header(NONCE_HEADER, sealed.nonce)
        .header(TAG_HEADER, sealed.tag)
        .body(sealed.body)
        .send()
        .await?
        .error_for_status()?;

    let nonce = header_value(&response, NONCE_HEADER)?;
    let tag = header_value(&response, TAG_HEADER)?;
    let body = response.bytes().await?;

    Ok(meshwork_crypto::open(key, &body, &nonce, &tag)?)
}

fn header_value(
    response: &reqwest::Response,
    name: &'static str,
) -> Result<String, ClientError> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or(ClientError::MissingHeader(name))
}
