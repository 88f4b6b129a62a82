// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Vault-compatible transit engine client.
//!
//! ## Endpoints
//!
//! - `POST /v1/transit/datakey/plaintext/{key}` - mint a data key
//! - `POST /v1/transit/decrypt/{key}` - unwrap a stored key ciphertext
//! - `GET  /v1/sys/seal-status` - seal state (unauthenticated)
//!
//! A sealed server answers key operations with HTTP 503 and an `errors`
//! array mentioning "sealed"; that is reported as [`KmsError::Sealed`].
//! Response bodies of successful key calls carry plaintext key material,
//! so they are held in zeroizing buffers and never echoed into errors.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;
use zeroize::Zeroizing;

use super::{DataKey, KeyCiphertext, KeyManagementClient, KmsError, KmsResult, SealStatus};
use crate::crypto::{PlaintextKey, KEY_SIZE};

const VAULT_TOKEN_HEADER: &str = "X-Vault-Token";

#[derive(Debug, Deserialize)]
struct SecretResponse<T> {
    data: T,
}

#[derive(Deserialize)]
struct DataKeyData {
    ciphertext: String,
    plaintext: Zeroizing<String>,
}

#[derive(Deserialize)]
struct DecryptData {
    plaintext: Zeroizing<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

/// HTTP client for the transit secrets engine.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct TransitClient {
    base_url: Url,
    token: String,
    http: Client,
}

impl fmt::Debug for TransitClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitClient")
            .field("base_url", &self.base_url.as_str())
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl TransitClient {
    /// Build a client for the server at `address` (e.g. `http://127.0.0.1:8200`).
    pub fn new(address: &str, token: impl Into<String>, timeout: Duration) -> KmsResult<Self> {
        let mut base_url = Url::parse(address)
            .map_err(|e| KmsError::Unavailable(format!("invalid transit address: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KmsError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            token: token.into(),
            http,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> KmsResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| KmsError::Unavailable(format!("invalid transit path {path}: {e}")))
    }

    async fn post_secret(&self, path: &str, body: &Value) -> KmsResult<Zeroizing<Vec<u8>>> {
        let response = self
            .http
            .post(self.endpoint(path)?)
            .header(VAULT_TOKEN_HEADER, &self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| KmsError::Unavailable(format!("transit request failed: {}", e.without_url())))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| KmsError::Unavailable(format!("transit response unreadable: {}", e.without_url())))?;

        if !status.is_success() {
            return Err(classify_failure(status, &bytes));
        }

        // Reuse the response buffer; a copy would leave key material unwiped.
        Ok(Zeroizing::new(Vec::from(bytes)))
    }
}

/// Map a non-success transit response onto the error taxonomy.
fn classify_failure(status: StatusCode, body: &[u8]) -> KmsError {
    let errors = serde_json::from_slice::<ErrorResponse>(body)
        .unwrap_or_default()
        .errors;

    let sealed = errors
        .iter()
        .any(|e| e.to_ascii_lowercase().contains("sealed"));
    if status == StatusCode::SERVICE_UNAVAILABLE && sealed {
        return KmsError::Sealed;
    }

    if errors.is_empty() {
        KmsError::Unavailable(format!("HTTP {status} from transit endpoint"))
    } else {
        KmsError::Unavailable(format!(
            "HTTP {status} from transit endpoint: {}",
            errors.join("; ")
        ))
    }
}

fn decode_plaintext(encoded: &str) -> KmsResult<PlaintextKey> {
    let bytes = Zeroizing::new(
        Base64::decode_vec(encoded)
            .map_err(|_| KmsError::Unavailable("transit returned undecodable key material".into()))?,
    );
    PlaintextKey::from_slice(&bytes).map_err(|_| {
        KmsError::Unavailable(format!(
            "transit returned a {}-byte key, expected {KEY_SIZE}",
            bytes.len()
        ))
    })
}

fn check_key_name(key_name: &str) -> KmsResult<()> {
    let valid = !key_name.is_empty()
        && key_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(KmsError::Unavailable(format!("invalid transit key name {key_name:?}")))
    }
}

#[async_trait]
impl KeyManagementClient for TransitClient {
    async fn mint_data_key(&self, key_name: &str) -> KmsResult<DataKey> {
        check_key_name(key_name)?;
        let body = self
            .post_secret(
                &format!("v1/transit/datakey/plaintext/{key_name}"),
                &json!({ "bits": KEY_SIZE * 8 }),
            )
            .await?;

        let response: SecretResponse<DataKeyData> = serde_json::from_slice(&body)
            .map_err(|_| KmsError::Unavailable("transit datakey response was malformed".into()))?;

        if response.data.ciphertext.is_empty() {
            return Err(KmsError::Unavailable(
                "transit returned an empty key ciphertext".into(),
            ));
        }

        Ok(DataKey {
            plaintext: decode_plaintext(&response.data.plaintext)?,
            ciphertext: KeyCiphertext::new(response.data.ciphertext.into_bytes()),
        })
    }

    async fn unwrap_data_key(
        &self,
        key_name: &str,
        ciphertext: &KeyCiphertext,
    ) -> KmsResult<PlaintextKey> {
        check_key_name(key_name)?;
        let ciphertext = std::str::from_utf8(ciphertext.as_bytes())
            .map_err(|_| KmsError::Unavailable("stored key ciphertext is not transit text".into()))?;

        let body = self
            .post_secret(
                &format!("v1/transit/decrypt/{key_name}"),
                &json!({ "ciphertext": ciphertext }),
            )
            .await?;

        let response: SecretResponse<DecryptData> = serde_json::from_slice(&body)
            .map_err(|_| KmsError::Unavailable("transit decrypt response was malformed".into()))?;

        decode_plaintext(&response.data.plaintext)
    }

    async fn seal_status(&self) -> KmsResult<SealStatus> {
        let response = self
            .http
            .get(self.endpoint("v1/sys/seal-status")?)
            .send()
            .await
            .map_err(|e| KmsError::Unavailable(format!("seal status request failed: {}", e.without_url())))?;

        if !response.status().is_success() {
            return Err(KmsError::Unavailable(format!(
                "HTTP {} from seal status endpoint",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| KmsError::Unavailable(format!("seal status response was malformed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Path,
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use tokio::net::TcpListener;

    const TOKEN: &str = "s.test-token";
    const KEY_B64: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=";

    async fn spawn(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(address: &str) -> TransitClient {
        TransitClient::new(address, TOKEN, Duration::from_secs(5)).unwrap()
    }

    fn healthy_transit() -> Router {
        Router::new()
            .route(
                "/v1/transit/datakey/plaintext/{key}",
                post(|Path(key): Path<String>, headers: HeaderMap| async move {
                    if headers.get(VAULT_TOKEN_HEADER).and_then(|v| v.to_str().ok()) != Some(TOKEN) {
                        return (StatusCode::FORBIDDEN, Json(json!({ "errors": ["permission denied"] })));
                    }
                    (
                        StatusCode::OK,
                        Json(json!({
                            "data": {
                                "ciphertext": format!("vault:v1:{key}-wrapped"),
                                "plaintext": KEY_B64
                            }
                        })),
                    )
                }),
            )
            .route(
                "/v1/transit/decrypt/{key}",
                post(|Json(body): Json<Value>| async move {
                    assert_eq!(body["ciphertext"], "vault:v1:my_app_key-wrapped");
                    Json(json!({ "data": { "plaintext": KEY_B64 } }))
                }),
            )
            .route(
                "/v1/sys/seal-status",
                get(|| async { Json(json!({ "type": "shamir", "initialized": true, "sealed": false })) }),
            )
    }

    fn expected_key() -> Vec<u8> {
        (0u8..32).collect()
    }

    #[tokio::test]
    async fn mint_returns_both_forms() {
        let address = spawn(healthy_transit()).await;
        let key = client(&address).mint_data_key("my_app_key").await.unwrap();

        assert_eq!(key.plaintext.as_bytes().to_vec(), expected_key());
        assert_eq!(key.ciphertext.as_bytes(), b"vault:v1:my_app_key-wrapped");
    }

    #[tokio::test]
    async fn unwrap_returns_plaintext() {
        let address = spawn(healthy_transit()).await;
        let ct = KeyCiphertext::new(b"vault:v1:my_app_key-wrapped".to_vec());
        let key = client(&address).unwrap_data_key("my_app_key", &ct).await.unwrap();

        assert_eq!(key.as_bytes().to_vec(), expected_key());
    }

    #[tokio::test]
    async fn seal_status_is_parsed() {
        let address = spawn(healthy_transit()).await;
        let status = client(&address).seal_status().await.unwrap();
        assert_eq!(
            status,
            SealStatus {
                sealed: false,
                initialized: true
            }
        );
    }

    #[tokio::test]
    async fn wrong_token_is_unavailable() {
        let address = spawn(healthy_transit()).await;
        let transit = TransitClient::new(&address, "wrong", Duration::from_secs(5)).unwrap();

        let err = transit.mint_data_key("my_app_key").await.unwrap_err();
        match err {
            KmsError::Unavailable(msg) => assert!(msg.contains("403")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn sealed_server_reports_sealed() {
        let router = Router::new().route(
            "/v1/transit/datakey/plaintext/{key}",
            post(|| async {
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({ "errors": ["Vault is sealed"] })),
                )
            }),
        );
        let address = spawn(router).await;

        let err = client(&address).mint_data_key("my_app_key").await.unwrap_err();
        assert_eq!(err, KmsError::Sealed);
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{addr}"))
            .mint_data_key("my_app_key")
            .await
            .unwrap_err();
        assert!(matches!(err, KmsError::Unavailable(_)));
    }

    #[tokio::test]
    async fn short_key_is_rejected_without_echoing_it() {
        let router = Router::new().route(
            "/v1/transit/datakey/plaintext/{key}",
            post(|| async {
                Json(json!({ "data": { "ciphertext": "vault:v1:x", "plaintext": "c2hvcnQta2V5" } }))
            }),
        );
        let address = spawn(router).await;

        let err = client(&address).mint_data_key("my_app_key").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("9-byte key"));
        assert!(!msg.contains("c2hvcnQta2V5"));
        assert!(!msg.contains("short-key"));
    }

    #[tokio::test]
    async fn key_names_cannot_escape_the_path() {
        let address = spawn(healthy_transit()).await;
        let err = client(&address).mint_data_key("../sys/raw").await.unwrap_err();
        assert!(matches!(err, KmsError::Unavailable(_)));
    }

    #[test]
    fn base_path_is_preserved() {
        let transit = client("http://vault.internal:8200/proxy");
        let url = transit.endpoint("v1/sys/seal-status").unwrap();
        assert_eq!(url.as_str(), "http://vault.internal:8200/proxy/v1/sys/seal-status");
    }

    #[test]
    fn debug_redacts_token() {
        let printed = format!("{:?}", client("http://127.0.0.1:8200"));
        assert!(!printed.contains(TOKEN));
    }
}
