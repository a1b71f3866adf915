//! The HTTP front: two POST endpoints behind the crypto envelope.
//!
//! `/control` carries a [`Form`] from a local operator or client;
//! `/mpi` carries a [`NetworkMessage`] from another agent. Both read
//! the base64 ciphertext body with its `Nonce`/`Tag` headers, verify
//! and decrypt before parsing anything, and answer in the same envelope
//! under a fresh nonce.
//!
//! Envelope or schema failures answer 500 with nothing but a logged
//! error — no state changes, no detail for the peer.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::routing::post;
use axum::Router;
use meshwork_core::form::Form;
use meshwork_core::message::NetworkMessage;
use tracing::{error, info};

use crate::runtime::Runtime;
use crate::{forms, router};

const NONCE: &str = "nonce";
const TAG: &str = "tag";

/// Build the agent's router.
pub fn build_router(rt: Arc<Runtime>) -> Router {
    Router::new()
        .route("/control", post(control_handler))
        .route("/mpi", post(mpi_handler))
        .with_state(rt)
}

/// Serve until the listener closes.
pub async fn serve(rt: Arc<Runtime>, listener: tokio::net::TcpListener) -> std::io::Result<()> {
    info!(addr = ?listener.local_addr().ok(), "agent listening");
    axum::serve(listener, build_router(rt)).await
}

async fn control_handler(
    State(rt): State<Arc<Runtime>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(HeaderMap, String), StatusCode> {
    let plaintext = open_envelope(&rt, &headers, &body)?;
    let form: Form = serde_json::from_slice(&plaintext).map_err(|err| {
        error!(%err, "control form failed validation");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let form = forms::process_form(&rt, form).await;
    seal_reply(&rt, &form)
}

async fn mpi_handler(
    State(rt): State<Arc<Runtime>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(HeaderMap, String), StatusCode> {
    let plaintext = open_envelope(&rt, &headers, &body)?;
    let message: NetworkMessage = serde_json::from_slice(&plaintext).map_err(|err| {
        error!(%err, "network message failed validation");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let reply = router::route(&rt, message).await;
    seal_reply(&rt, &reply)
}

fn open_envelope(
    rt: &Arc<Runtime>,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Vec<u8>, StatusCode> {
    let nonce = header(headers, NONCE)?;
    let tag = header(headers, TAG)?;
    meshwork_crypto::open(&rt.key, body, nonce, tag).map_err(|err| {
        error!(%err, "envelope rejected");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

fn seal_reply<T: serde::Serialize>(
    rt: &Arc<Runtime>,
    payload: &T,
) -> Result<(HeaderMap, String), StatusCode> {
    let json = serde_json::to_vec(payload).map_err(|err| {
        error!(%err, "reply serialization failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let sealed = meshwork_crypto::seal(&rt.key, &json);

    let mut headers = HeaderMap::new();
    headers.insert(NONCE, header_value(sealed.nonce)?);
    headers.insert(TAG, header_value(sealed.tag)?);
    Ok((headers, sealed.body))
}

fn header<'h>(headers: &'h HeaderMap, name: &'static str) -> Result<&'h str, StatusCode> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            error!(header = name, "request is missing an envelope header");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

fn header_value(value: String) -> Result<HeaderValue, StatusCode> {
    HeaderValue::from_str(&value).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
