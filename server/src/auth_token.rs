use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{digest::KeyInit, Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};

const MIN_SECRET_LEN: usize = 32;
const TOKEN_TYPE: &str = "JWT";
/// Registered claim names that extra claims may not shadow.
const RESERVED_CLAIMS: [&str; 4] = ["sub", "role", "iat", "exp"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("session token secret is too short (min {MIN_SECRET_LEN} bytes)")]
    SecretTooShort,

    #[error("unsupported session token algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("session token is malformed")]
    Malformed,

    #[error("session token signature is invalid")]
    InvalidSignature,

    #[error("failed to serialize session token claims")]
    Encode,

    #[error("extra claim `{0}` collides with a registered claim")]
    ReservedClaim(String),
}

/// HMAC variants a deployment may declare for its session tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[default]
    #[serde(rename = "HS256")]
    Hs256,
    #[serde(rename = "HS384")]
    Hs384,
    #[serde(rename = "HS512")]
    Hs512,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Hs256 => "HS256",
            HashAlgorithm::Hs384 => "HS384",
            HashAlgorithm::Hs512 => "HS512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = TokenError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "HS256" => Ok(HashAlgorithm::Hs256),
            "HS384" => Ok(HashAlgorithm::Hs384),
            "HS512" => Ok(HashAlgorithm::Hs512),
            other => Err(TokenError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenHeader {
    alg: HashAlgorithm,
    typ: String,
}

/// Identity carried by a session token.
///
/// `iat` and `exp` are unix seconds. Anything in `extra` is flattened next to
/// the registered claims, so its keys must not reuse `sub`, `role`, `iat` or
/// `exp`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionClaims {
    pub sub: String,
    pub role: String,
    pub iat: u64,
    pub exp: u64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl SessionClaims {
    pub fn new(sub: impl Into<String>, role: impl Into<String>, iat: u64, exp: u64) -> Self {
        Self {
            sub: sub.into(),
            role: role.into(),
            iat,
            exp,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn claim(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.get(key)
    }

    pub fn is_expired(&self, reference_secs: u64) -> bool {
        reference_secs >= self.exp
    }
}

/// Signs and verifies compact `header.payload.signature` session tokens.
///
/// `decode` only checks structure and signature. Expiry is left to the
/// caller so that a token can be inspected after it has lapsed.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Arc<[u8]>,
    algorithm: HashAlgorithm,
    ttl: Duration,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(
        secret: Vec<u8>,
        algorithm: HashAlgorithm,
        ttl: Duration,
    ) -> Result<Self, TokenError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(TokenError::SecretTooShort);
        }

        Ok(Self {
            secret: Arc::<[u8]>::from(secret),
            algorithm,
            ttl,
        })
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Builds claims expiring one TTL after `issued_at` and encodes them.
    pub fn issue_session_token(
        &self,
        subject_id: &str,
        role: &str,
        extra: BTreeMap<String, serde_json::Value>,
        issued_at: u64,
    ) -> Result<String, TokenError> {
        let expires_at = issued_at.saturating_add(self.ttl.as_secs());
        let mut claims = SessionClaims::new(subject_id, role, issued_at, expires_at);
        claims.extra = extra;
        self.encode(&claims)
    }

    pub fn encode(&self, claims: &SessionClaims) -> Result<String, TokenError> {
        if let Some(key) = claims
            .extra
            .keys()
            .find(|key| RESERVED_CLAIMS.contains(&key.as_str()))
        {
            return Err(TokenError::ReservedClaim(key.clone()));
        }

        let header = TokenHeader {
            alg: self.algorithm,
            typ: TOKEN_TYPE.to_string(),
        };
        let header = serde_json::to_vec(&header).map_err(|_| TokenError::Encode)?;
        let payload = serde_json::to_vec(claims).map_err(|_| TokenError::Encode)?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let signature = self.sign(signing_input.as_bytes())?;

        Ok(format!(
            "{signing_input}.{}",
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    pub fn decode(&self, token: &str) -> Result<SessionClaims, TokenError> {
        let mut parts = token.split('.');
        let (header_b64, payload_b64, signature_b64) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(h), Some(p), Some(s), None) if !h.is_empty() && !p.is_empty() => (h, p, s),
                _ => return Err(TokenError::Malformed),
            };

        let header = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|_| TokenError::Malformed)?;
        let header: TokenHeader =
            serde_json::from_slice(&header).map_err(|_| TokenError::Malformed)?;
        if header.alg != self.algorithm {
            return Err(TokenError::InvalidSignature);
        }

        // An undecodable signature can never verify.
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenError::InvalidSignature)?;

        let signing_input = &token[..header_b64.len() + 1 + payload_b64.len()];
        self.verify(signing_input.as_bytes(), &signature)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenError::Malformed)?;
        serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)
    }

    fn sign(&self, bytes: &[u8]) -> Result<Vec<u8>, TokenError> {
        match self.algorithm {
            HashAlgorithm::Hs256 => mac_bytes::<Hmac<Sha256>>(&self.secret, bytes),
            HashAlgorithm::Hs384 => mac_bytes::<Hmac<Sha384>>(&self.secret, bytes),
            HashAlgorithm::Hs512 => mac_bytes::<Hmac<Sha512>>(&self.secret, bytes),
        }
    }

    fn verify(&self, bytes: &[u8], signature: &[u8]) -> Result<(), TokenError> {
        match self.algorithm {
            HashAlgorithm::Hs256 => verify_mac::<Hmac<Sha256>>(&self.secret, bytes, signature),
            HashAlgorithm::Hs384 => verify_mac::<Hmac<Sha384>>(&self.secret, bytes, signature),
            HashAlgorithm::Hs512 => verify_mac::<Hmac<Sha512>>(&self.secret, bytes, signature),
        }
    }
}

fn mac_bytes<M: Mac + KeyInit>(secret: &[u8], bytes: &[u8]) -> Result<Vec<u8>, TokenError> {
    let mut mac =
        <M as Mac>::new_from_slice(secret).map_err(|_| TokenError::InvalidSignature)?;
    mac.update(bytes);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn verify_mac<M: Mac + KeyInit>(
    secret: &[u8],
    bytes: &[u8],
    signature: &[u8],
) -> Result<(), TokenError> {
    let mut mac =
        <M as Mac>::new_from_slice(secret).map_err(|_| TokenError::InvalidSignature)?;
    mac.update(bytes);
    mac.verify_slice(signature)
        .map_err(|_| TokenError::InvalidSignature)
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &[u8] = b"01234567890123456789012345678901";

    fn test_codec() -> TokenCodec {
        TokenCodec::new(SECRET.to_vec(), HashAlgorithm::Hs256, Duration::from_secs(30))
            .expect("valid codec")
    }

    fn flip_char(part: &str, index: usize) -> String {
        let mut chars: Vec<char> = part.chars().collect();
        chars[index] = if chars[index] == 'A' { 'B' } else { 'A' };
        chars.into_iter().collect()
    }

    #[test]
    fn encode_decode_roundtrip() {
        let codec = test_codec();
        let claims = SessionClaims::new("65f0c0ffee", "customer", 1_000, 1_030)
            .with_claim("email", json!("fern@example.com"))
            .with_claim("name", json!("Fern"));

        let token = codec.encode(&claims).expect("encode");
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(codec.decode(&token).expect("decode"), claims);
    }

    #[test]
    fn extra_claims_cannot_shadow_registered_ones() {
        let codec = test_codec();
        let claims = SessionClaims::new("1", "customer", 10, 20).with_claim("role", json!("admin"));
        assert!(matches!(
            codec.encode(&claims),
            Err(TokenError::ReservedClaim(key)) if key == "role"
        ));

        let extra = BTreeMap::from([("exp".to_string(), json!(u64::MAX))]);
        assert!(matches!(
            codec.issue_session_token("1", "customer", extra, 10),
            Err(TokenError::ReservedClaim(_))
        ));
    }

    #[test]
    fn encode_is_deterministic() {
        let codec = test_codec();
        let claims = SessionClaims::new("1", "admin", 10, 20);
        assert_eq!(codec.encode(&claims).unwrap(), codec.encode(&claims).unwrap());
    }

    #[test]
    fn issue_session_token_applies_ttl() {
        let codec = test_codec();
        let token = codec
            .issue_session_token("42", "admin", BTreeMap::new(), 1_000)
            .expect("issue token");

        let claims = codec.decode(&token).expect("decode");
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.role, "admin");
        assert_eq!(claims.iat, 1_000);
        assert_eq!(claims.exp, 1_030);
    }

    #[test]
    fn decode_does_not_enforce_expiry() {
        let codec = test_codec();
        let claims = SessionClaims::new("1", "customer", 1, 2);
        let token = codec.encode(&claims).unwrap();

        let decoded = codec.decode(&token).expect("expired tokens still decode");
        assert!(decoded.is_expired(now_secs()));
    }

    #[test]
    fn rejects_tampered_signature() {
        let codec = test_codec();
        let token = codec.encode(&SessionClaims::new("1", "customer", 10, 20)).unwrap();
        let (signing_input, signature) = token.rsplit_once('.').unwrap();
        let tampered = format!("{signing_input}.{}", flip_char(signature, 3));

        assert_eq!(codec.decode(&tampered), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn rejects_tampered_payload() {
        let codec = test_codec();
        let token = codec.encode(&SessionClaims::new("1", "customer", 10, 20)).unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        let tampered = format!("{}.{}.{}", parts[0], flip_char(parts[1], 2), parts[2]);

        assert_eq!(codec.decode(&tampered), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn rejects_token_signed_with_other_secret() {
        let codec = test_codec();
        let other = TokenCodec::new(
            b"abcdefghijabcdefghijabcdefghijab".to_vec(),
            HashAlgorithm::Hs256,
            Duration::from_secs(30),
        )
        .unwrap();
        let token = other.encode(&SessionClaims::new("1", "admin", 10, 20)).unwrap();

        assert_eq!(codec.decode(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn rejects_algorithm_mismatch() {
        let hs512 =
            TokenCodec::new(SECRET.to_vec(), HashAlgorithm::Hs512, Duration::from_secs(30))
                .unwrap();
        let token = hs512.encode(&SessionClaims::new("1", "admin", 10, 20)).unwrap();

        assert_eq!(test_codec().decode(&token), Err(TokenError::InvalidSignature));
        assert!(hs512.decode(&token).is_ok());
    }

    #[test]
    fn rejects_malformed_structure() {
        let codec = test_codec();
        for token in ["", "abc", "a.b", "a.b.c.d", ".payload.sig", "!!!.b.c"] {
            assert_eq!(codec.decode(token), Err(TokenError::Malformed), "token {token:?}");
        }
    }

    #[test]
    fn rejects_short_secret() {
        let result = TokenCodec::new(b"short".to_vec(), HashAlgorithm::Hs256, Duration::ZERO);
        assert!(matches!(result, Err(TokenError::SecretTooShort)));
    }

    #[test]
    fn parses_algorithm_names() {
        assert_eq!("hs384".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Hs384);
        assert_eq!("HS512".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Hs512);
        assert!(matches!(
            "RS256".parse::<HashAlgorithm>(),
            Err(TokenError::UnsupportedAlgorithm(_))
        ));
    }
}
