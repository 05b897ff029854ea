use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::ConnectorError;

type HmacSha256 = Hmac<Sha256>;

/// How long a signed state stays valid (the consent screen round trip).
pub const STATE_MAX_AGE_SECS: i64 = 600;

/// Helper to create an HMAC instance, resolving trait ambiguity.
fn new_hmac(key: &[u8]) -> Result<HmacSha256, ConnectorError> {
    <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| ConnectorError::Internal(format!("HMAC init failed: {e}")))
}

/// A freshly issued state and the nonce it carries.
#[derive(Debug, Clone)]
pub struct IssuedState {
    pub state: String,
    pub nonce: String,
}

/// HMAC-SHA256 signer for the OAuth `state` parameter.
///
/// The payload is `nonce:timestamp`, so a callback carrying a valid state
/// proves this service started the flow within [`STATE_MAX_AGE_SECS`]. The
/// signature alone does not stop a replay inside that window; callers make the
/// nonce single use (see `TokenManager`).
pub struct StateSigner {
    hmac_key: Vec<u8>,
}

impl StateSigner {
    pub fn new(session_secret: &str) -> Result<Self, ConnectorError> {
        if session_secret.len() < 8 {
            return Err(ConnectorError::Internal(
                "SESSION_SECRET must be at least 8 characters".into(),
            ));
        }
        Ok(Self {
            hmac_key: session_secret.as_bytes().to_vec(),
        })
    }

    /// Sign a payload. Returns base64url(hmac || payload).
    pub fn sign(&self, payload: &str) -> Result<String, ConnectorError> {
        let mut mac = new_hmac(&self.hmac_key)?;
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();

        let mut combined = signature.to_vec();
        combined.extend_from_slice(payload.as_bytes());

        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&combined))
    }

    /// Verify and extract a signed payload.
    pub fn verify(&self, signed: &str) -> Result<String, ConnectorError> {
        let invalid = || ConnectorError::InvalidRequest("invalid state parameter".into());

        let combined = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(signed)
            .map_err(|_| invalid())?;

        if combined.len() < 32 {
            return Err(invalid());
        }

        let (signature, payload_bytes) = combined.split_at(32);

        let mut mac = new_hmac(&self.hmac_key)?;
        mac.update(payload_bytes);
        mac.verify_slice(signature).map_err(|_| invalid())?;

        String::from_utf8(payload_bytes.to_vec()).map_err(|_| invalid())
    }

    /// Issue a fresh `nonce:timestamp` state.
    pub fn issue_state(&self) -> Result<IssuedState, ConnectorError> {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        let nonce = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(nonce);
        let state = self.sign(&format!("{}:{}", nonce, Utc::now().timestamp()))?;
        Ok(IssuedState { state, nonce })
    }

    /// Check a state returned on the callback (signature, shape and age) and
    /// return its nonce.
    pub fn check_state(&self, signed: &str) -> Result<String, ConnectorError> {
        let payload = self.verify(signed)?;

        let (nonce, timestamp) = payload
            .rsplit_once(':')
            .and_then(|(nonce, ts)| Some((nonce, ts.parse::<i64>().ok()?)))
            .ok_or_else(|| ConnectorError::InvalidRequest("malformed state parameter".into()))?;

        if Utc::now().timestamp() - timestamp > STATE_MAX_AGE_SECS {
            return Err(ConnectorError::InvalidRequest(
                "authorization session expired; start again at /connect".into(),
            ));
        }

        Ok(nonce.to_string())
    }
}
