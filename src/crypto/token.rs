use std::fmt;
use std::str::FromStr;

use base64_simd::URL_SAFE_NO_PAD;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::db::models::{Role, User};
use crate::error::TokenError;

type HmacSha256 = Hmac<Sha256>;

/// Signature scheme used for access tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenAlgorithm {
    HS256,
    EdDSA,
}

impl FromStr for TokenAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HS256" => Ok(TokenAlgorithm::HS256),
            "EDDSA" | "ED25519" => Ok(TokenAlgorithm::EdDSA),
            other => Err(format!("unsupported algorithm '{}'", other)),
        }
    }
}

impl fmt::Display for TokenAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenAlgorithm::HS256 => f.write_str("HS256"),
            TokenAlgorithm::EdDSA => f.write_str("EdDSA"),
        }
    }
}

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: TokenAlgorithm,
    typ: String,
}

enum Key {
    Hmac(Vec<u8>),
    Ed25519(SigningKey),
}

/// Issues and validates compact signed tokens (`header.claims.signature`).
///
/// Tokens are stateless: validity is signature plus expiry, nothing is
/// stored server-side.
pub struct TokenIssuer {
    key: Key,
    algorithm: TokenAlgorithm,
    expiry_secs: i64,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], algorithm: TokenAlgorithm, expiry_hours: u32) -> Self {
        let key = match algorithm {
            TokenAlgorithm::HS256 => Key::Hmac(secret.to_vec()),
            TokenAlgorithm::EdDSA => {
                let mut seed = [0u8; 32];
                seed.copy_from_slice(&Sha256::digest(secret));
                Key::Ed25519(SigningKey::from_bytes(&seed))
            }
        };

        Self {
            key,
            algorithm,
            expiry_secs: i64::from(expiry_hours) * 3600,
        }
    }

    pub fn algorithm(&self) -> TokenAlgorithm {
        self.algorithm
    }

    pub fn issue(&self, user: &User) -> Result<String, TokenError> {
        self.issue_at(user, chrono::Utc::now().timestamp())
    }

    /// Issue a token as if the current time were `now` (unix seconds).
    pub fn issue_at(&self, user: &User, now: i64) -> Result<String, TokenError> {
        let header = Header {
            alg: self.algorithm,
            typ: "JWT".to_string(),
        };
        let exp = now
            .checked_add(self.expiry_secs)
            .ok_or_else(|| TokenError::Signing("expiry overflows timestamp".to_string()))?;
        let claims = Claims {
            sub: user.username.clone(),
            role: user.role,
            iat: now,
            exp,
        };

        let signing_input = format!("{}.{}", encode_json(&header)?, encode_json(&claims)?);
        let signature = self.sign(signing_input.as_bytes())?;

        Ok(format!(
            "{}.{}",
            signing_input,
            URL_SAFE_NO_PAD.encode_to_string(signature)
        ))
    }

    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate_at(token, chrono::Utc::now().timestamp())
    }

    pub fn validate_at(&self, token: &str, now: i64) -> Result<Claims, TokenError> {
        let mut parts = token.split('.');
        let (header_b64, claims_b64, sig_b64) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(c), Some(s), None) => (h, c, s),
            _ => return Err(TokenError::Malformed("expected three segments".to_string())),
        };

        let header: Header = decode_json(header_b64)?;
        if header.alg != self.algorithm {
            return Err(TokenError::Malformed(format!(
                "algorithm {} does not match {}",
                header.alg, self.algorithm
            )));
        }

        let signature = URL_SAFE_NO_PAD
            .decode_to_vec(sig_b64)
            .map_err(|e| TokenError::Malformed(format!("signature encoding: {}", e)))?;
        let signing_input = format!("{}.{}", header_b64, claims_b64);
        self.verify(signing_input.as_bytes(), &signature)?;

        let claims: Claims = decode_json(claims_b64)?;
        if claims.exp <= now {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    fn sign(&self, input: &[u8]) -> Result<Vec<u8>, TokenError> {
        match &self.key {
            Key::Hmac(secret) => {
                let mut mac = HmacSha256::new_from_slice(secret)
                    .map_err(|e| TokenError::Signing(e.to_string()))?;
                mac.update(input);
                Ok(mac.finalize().into_bytes().to_vec())
            }
            Key::Ed25519(signing_key) => Ok(signing_key.sign(input).to_bytes().to_vec()),
        }
    }

    fn verify(&self, input: &[u8], signature: &[u8]) -> Result<(), TokenError> {
        match &self.key {
            Key::Hmac(secret) => {
                let mut mac = HmacSha256::new_from_slice(secret)
                    .map_err(|e| TokenError::Signing(e.to_string()))?;
                mac.update(input);
                // Constant-time comparison
                mac.verify_slice(signature).map_err(|_| TokenError::BadSignature)
            }
            Key::Ed25519(signing_key) => {
                let signature = Signature::from_slice(signature).map_err(|_| TokenError::BadSignature)?;
                signing_key
                    .verifying_key()
                    .verify(input, &signature)
                    .map_err(|_| TokenError::BadSignature)
            }
        }
    }
}

fn encode_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value).map_err(|e| TokenError::Signing(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode_to_string(json))
}

fn decode_json<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode_to_vec(segment)
        .map_err(|e| TokenError::Malformed(format!("segment encoding: {}", e)))?;
    serde_json::from_slice(&bytes).map_err(|e| TokenError::Malformed(e.to_string()))
}
