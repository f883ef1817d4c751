//! DPoP proof generation (RFC 9449, client side).
//!
//! Each authenticated identity holds a P-256 key pair; every signed request
//! carries a compact JWS binding `{jti, htm, htu, iat}` to that key, with the
//! public key embedded in the token header so the verifier need not look it
//! up. Proofs are single-use: every call mints a fresh `jti` and `iat`, and
//! signed tokens are never cached.

use base64::prelude::*;
use chrono::Utc;
use reqwest::Method;
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use serde::Serialize;
use url::Url;
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};

/// JWS header of a DPoP proof.
#[derive(Debug, Serialize)]
struct ProofHeader<'a> {
    typ: &'static str,
    alg: &'static str,
    jwk: &'a serde_json::Value,
}

/// JWT claims of a DPoP proof.
#[derive(Debug, Serialize)]
struct ProofClaims {
    jti: String,
    htm: String,
    htu: String,
    iat: i64,
}

/// A per-identity signing key for DPoP proofs.
///
/// The key pair is read-only after generation and safe to share across
/// threads; concurrent [`proof`](Self::proof) calls each mint their own
/// claims.
pub struct DpopKey {
    key_pair: EcdsaKeyPair,
    public_jwk: serde_json::Value,
    key_id: String,
}

impl DpopKey {
    /// Generate a fresh P-256 key pair with a random key id.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::KeyGeneration`] if the crypto provider fails.
    pub fn generate() -> ClientResult<Self> {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|e| ClientError::KeyGeneration(e.to_string()))?;
        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
                .map_err(|e| ClientError::KeyGeneration(e.to_string()))?;

        let mut key_id = Uuid::new_v4().simple().to_string();
        key_id.truncate(12);

        // Uncompressed point: 0x04 || x (32 bytes) || y (32 bytes).
        let public = key_pair.public_key().as_ref();
        let x = BASE64_URL_SAFE_NO_PAD.encode(&public[1..33]);
        let y = BASE64_URL_SAFE_NO_PAD.encode(&public[33..65]);
        let public_jwk = serde_json::json!({
            "kty": "EC",
            "crv": "P-256",
            "x": x,
            "y": y,
            "kid": key_id,
            "use": "sig",
            "alg": "ES256",
        });

        Ok(Self { key_pair, public_jwk, key_id })
    }

    /// The random identifier assigned to this key.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// The public half of the key as a JWK.
    #[must_use]
    pub fn public_jwk(&self) -> &serde_json::Value {
        &self.public_jwk
    }

    /// Mint a proof token for one request.
    ///
    /// The `htu` claim covers scheme, authority and path only; query and
    /// fragment are stripped per RFC 9449.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ProofGeneration`] if signing fails.
    pub fn proof(&self, method: &Method, url: &Url) -> ClientResult<String> {
        let header = ProofHeader { typ: "dpop+jwt", alg: "ES256", jwk: &self.public_jwk };
        let claims = ProofClaims {
            jti: Uuid::new_v4().to_string(),
            htm: method.as_str().to_string(),
            htu: htu_for(url),
            iat: Utc::now().timestamp(),
        };

        let header_json = serde_json::to_string(&header)
            .map_err(|e| ClientError::ProofGeneration(e.to_string()))?;
        let claims_json = serde_json::to_string(&claims)
            .map_err(|e| ClientError::ProofGeneration(e.to_string()))?;

        let signing_input = format!(
            "{}.{}",
            BASE64_URL_SAFE_NO_PAD.encode(header_json.as_bytes()),
            BASE64_URL_SAFE_NO_PAD.encode(claims_json.as_bytes()),
        );
        let rng = SystemRandom::new();
        let signature = self
            .key_pair
            .sign(&rng, signing_input.as_bytes())
            .map_err(|e| ClientError::ProofGeneration(e.to_string()))?;

        Ok(format!("{signing_input}.{}", BASE64_URL_SAFE_NO_PAD.encode(signature.as_ref())))
    }
}

impl std::fmt::Debug for DpopKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DpopKey").field("key_id", &self.key_id).finish()
    }
}

fn htu_for(url: &Url) -> String {
    let mut htu = url.clone();
    htu.set_query(None);
    htu.set_fragment(None);
    htu.to_string()
}
