use chrono::{Duration, Utc};
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use super::ServiceError;
use crate::config::TokenConfig;
use crate::models::{TokenData, TokenKind};

/// Shortest accepted HMAC secret.
pub const MIN_SIGNING_KEY_BYTES: usize = 32;

/// Claims carried by both access and refresh strings.
///
/// Everything needed to locate the record is in here, so malformedness and
/// kind are decided without touching the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Unique per signed string
    pub jti: Uuid,
    /// Token record ID
    pub tid: Uuid,
    /// Namespace of the token record
    pub ns: String,
    /// Identity the token was issued to
    pub sub: Uuid,
    pub kind: TokenKind,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

struct SigningKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKey {
    fn from_secret(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

struct KeyRing {
    active_kid: String,
    keys: HashMap<String, SigningKey>,
}

/// Signs and verifies token strings (HS256 JWT, `kid` in the header).
///
/// Cloning shares the key ring, so a rotation is seen by every clone.
#[derive(Clone)]
pub struct TokenSigner {
    ring: Arc<RwLock<KeyRing>>,
    access_token_expiry: Duration,
    refresh_token_expiry: Duration,
}

impl TokenSigner {
    pub fn new(config: &TokenConfig) -> Result<Self, ServiceError> {
        let signer = Self::from_secret(
            &config.signing_key_id,
            config.signing_key.as_bytes(),
            config.access_token_expiry_minutes,
            config.refresh_token_expiry_days,
        )?;

        tracing::info!(kid = %config.signing_key_id, "Token signer initialized with HS256 key");

        Ok(signer)
    }

    pub fn from_secret(
        kid: &str,
        secret: &[u8],
        access_token_expiry_minutes: i64,
        refresh_token_expiry_days: i64,
    ) -> Result<Self, ServiceError> {
        check_key(kid, secret)?;

        let mut keys = HashMap::new();
        keys.insert(kid.to_string(), SigningKey::from_secret(secret));

        Ok(Self {
            ring: Arc::new(RwLock::new(KeyRing {
                active_kid: kid.to_string(),
                keys,
            })),
            access_token_expiry: lifetime(
                Duration::try_minutes(access_token_expiry_minutes),
                "access",
            )?,
            refresh_token_expiry: lifetime(
                Duration::try_days(refresh_token_expiry_days),
                "refresh",
            )?,
        })
    }

    /// Sign a string of the given kind for a token record.
    pub fn sign(&self, record: &TokenData, kind: TokenKind) -> Result<String, ServiceError> {
        let now = Utc::now();
        let lifetime = match kind {
            TokenKind::Access => self.access_token_expiry,
            TokenKind::Refresh => self.refresh_token_expiry,
        };

        let expires_at = now.checked_add_signed(lifetime).ok_or_else(|| {
            ServiceError::Internal(anyhow::anyhow!(
                "{} token expiry is out of range",
                kind.as_str()
            ))
        })?;

        let claims = TokenClaims {
            jti: Uuid::new_v4(),
            tid: record.uuid,
            ns: record.namespace.clone(),
            sub: record.identity,
            kind,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        self.encode_claims(&claims)
    }

    fn encode_claims(&self, claims: &TokenClaims) -> Result<String, ServiceError> {
        let ring = self
            .ring
            .read()
            .map_err(|e| anyhow::anyhow!("Signing key ring lock poisoned: {}", e))?;
        let key = ring
            .keys
            .get(&ring.active_kid)
            .ok_or_else(|| anyhow::anyhow!("Active signing key '{}' missing", ring.active_kid))?;

        let header = Header {
            kid: Some(ring.active_kid.clone()),
            ..Header::new(Algorithm::HS256)
        };

        encode(&header, claims, &key.encoding)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to encode token: {}", e)))
    }

    /// Decode and verify a string of either kind.
    ///
    /// Fails for malformed strings, unknown key IDs, bad signatures and
    /// expired strings alike.
    pub fn decode(&self, token: &str) -> Result<TokenClaims, anyhow::Error> {
        let header =
            decode_header(token).map_err(|e| anyhow::anyhow!("Malformed token: {}", e))?;
        let kid = header
            .kid
            .ok_or_else(|| anyhow::anyhow!("Token header has no key id"))?;

        let ring = self
            .ring
            .read()
            .map_err(|e| anyhow::anyhow!("Signing key ring lock poisoned: {}", e))?;
        let key = ring
            .keys
            .get(&kid)
            .ok_or_else(|| anyhow::anyhow!("Unknown signing key '{}'", kid))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        let data = decode::<TokenClaims>(token, &key.decoding, &validation)
            .map_err(|e| anyhow::anyhow!("Invalid token: {}", e))?;

        Ok(data.claims)
    }

    /// Install a new signing key.
    ///
    /// With `retain_previous`, strings signed by earlier keys keep verifying;
    /// without it they become invalid immediately.
    pub fn rotate(&self, kid: &str, secret: &[u8], retain_previous: bool) -> Result<(), ServiceError> {
        check_key(kid, secret)?;

        let mut ring = self
            .ring
            .write()
            .map_err(|e| anyhow::anyhow!("Signing key ring lock poisoned: {}", e))?;

        if !retain_previous {
            ring.keys.clear();
        }
        ring.keys
            .insert(kid.to_string(), SigningKey::from_secret(secret));
        let previous = std::mem::replace(&mut ring.active_kid, kid.to_string());

        tracing::info!(
            kid = %kid,
            previous_kid = %previous,
            retained_keys = ring.keys.len(),
            "Signing key rotated"
        );

        Ok(())
    }

    pub fn active_key_id(&self) -> Result<String, ServiceError> {
        let ring = self
            .ring
            .read()
            .map_err(|e| anyhow::anyhow!("Signing key ring lock poisoned: {}", e))?;
        Ok(ring.active_kid.clone())
    }

    pub fn key_ids(&self) -> Result<Vec<String>, ServiceError> {
        let ring = self
            .ring
            .read()
            .map_err(|e| anyhow::anyhow!("Signing key ring lock poisoned: {}", e))?;
        let mut ids: Vec<String> = ring.keys.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

fn lifetime(value: Option<Duration>, kind: &str) -> Result<Duration, ServiceError> {
    match value {
        Some(duration) if duration > Duration::zero() => Ok(duration),
        _ => Err(ServiceError::InvalidArgument(format!(
            "{} token expiry must be positive and in range",
            kind
        ))),
    }
}

fn check_key(kid: &str, secret: &[u8]) -> Result<(), ServiceError> {
    if kid.trim().is_empty() {
        return Err(ServiceError::InvalidArgument(
            "Signing key id must not be empty".to_string(),
        ));
    }
    if secret.len() < MIN_SIGNING_KEY_BYTES {
        return Err(ServiceError::InvalidArgument(format!(
            "Signing key must be at least {} bytes",
            MIN_SIGNING_KEY_BYTES
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";
    const OTHER_SECRET: &[u8] = b"fedcba9876543210fedcba9876543210";

    fn signer() -> TokenSigner {
        TokenSigner::from_secret("k1", SECRET, 15, 30).unwrap()
    }

    fn record() -> TokenData {
        TokenData::new("acme".into(), Uuid::new_v4(), vec![], "test".into())
    }

    #[test]
    fn test_sign_and_decode_both_kinds() {
        let signer = signer();
        let record = record();

        let access = signer.sign(&record, TokenKind::Access).unwrap();
        let refresh = signer.sign(&record, TokenKind::Refresh).unwrap();
        assert_ne!(access, refresh);

        let access_claims = signer.decode(&access).unwrap();
        assert_eq!(access_claims.tid, record.uuid);
        assert_eq!(access_claims.ns, "acme");
        assert_eq!(access_claims.sub, record.identity);
        assert_eq!(access_claims.kind, TokenKind::Access);

        let refresh_claims = signer.decode(&refresh).unwrap();
        assert_eq!(refresh_claims.tid, record.uuid);
        assert_ne!(refresh_claims.jti, access_claims.jti);
        assert_eq!(refresh_claims.kind, TokenKind::Refresh);
        assert!(refresh_claims.exp > access_claims.exp);
    }

    #[test]
    fn test_rejects_garbage_and_tampering() {
        let signer = signer();
        assert!(signer.decode("").is_err());
        assert!(signer.decode("not-a-token").is_err());

        // Payload of one token under the signature of another.
        let first = signer.sign(&record(), TokenKind::Access).unwrap();
        let second = signer.sign(&record(), TokenKind::Access).unwrap();
        let first: Vec<&str> = first.split('.').collect();
        let second: Vec<&str> = second.split('.').collect();
        let spliced = format!("{}.{}.{}", first[0], second[1], first[2]);
        assert!(signer.decode(&spliced).is_err());
    }

    #[test]
    fn test_rejects_foreign_key() {
        let token = signer().sign(&record(), TokenKind::Access).unwrap();
        let stranger = TokenSigner::from_secret("k1", OTHER_SECRET, 15, 30).unwrap();
        assert!(stranger.decode(&token).is_err());
    }

    #[test]
    fn test_rejects_expired() {
        let signer = signer();
        let claims = TokenClaims {
            jti: Uuid::new_v4(),
            tid: Uuid::new_v4(),
            ns: String::new(),
            sub: Uuid::new_v4(),
            kind: TokenKind::Access,
            iat: Utc::now().timestamp() - 7200,
            exp: Utc::now().timestamp() - 3600,
        };
        let token = signer.encode_claims(&claims).unwrap();
        assert!(signer.decode(&token).is_err());
    }

    #[test]
    fn test_rotation_retaining_previous_key() {
        let signer = signer();
        let old = signer.sign(&record(), TokenKind::Access).unwrap();

        signer.rotate("k2", OTHER_SECRET, true).unwrap();
        assert_eq!(signer.active_key_id().unwrap(), "k2");
        assert_eq!(signer.key_ids().unwrap(), vec!["k1", "k2"]);

        let new = signer.sign(&record(), TokenKind::Access).unwrap();
        assert!(signer.decode(&old).is_ok());
        assert!(signer.decode(&new).is_ok());
        assert_eq!(decode_header(&new).unwrap().kid.as_deref(), Some("k2"));
    }

    #[test]
    fn test_rotation_dropping_previous_key() {
        let signer = signer();
        let shared = signer.clone();
        let old = signer.sign(&record(), TokenKind::Refresh).unwrap();

        signer.rotate("k2", OTHER_SECRET, false).unwrap();
        assert!(shared.decode(&old).is_err());
        assert_eq!(shared.key_ids().unwrap(), vec!["k2"]);
    }

    #[test]
    fn test_strings_for_one_record_are_unique() {
        let signer = signer();
        let record = record();

        let first = signer.sign(&record, TokenKind::Access).unwrap();
        let second = signer.sign(&record, TokenKind::Access).unwrap();

        assert_ne!(first, second);
        assert_eq!(
            signer.decode(&first).unwrap().tid,
            signer.decode(&second).unwrap().tid
        );
    }

    #[test]
    fn test_out_of_range_expiry_is_rejected() {
        assert!(matches!(
            TokenSigner::from_secret("k1", SECRET, 15, i64::MAX),
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            TokenSigner::from_secret("k1", SECRET, 0, 30),
            Err(ServiceError::InvalidArgument(_))
        ));

        // Representable as a duration but past chrono's last date.
        let signer = TokenSigner::from_secret("k1", SECRET, 15, 100_000_000).unwrap();
        assert!(matches!(
            signer.sign(&record(), TokenKind::Refresh),
            Err(ServiceError::Internal(_))
        ));
    }

    #[test]
    fn test_rejects_weak_keys() {
        assert!(matches!(
            TokenSigner::from_secret("k1", b"short", 15, 30),
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            signer().rotate(" ", OTHER_SECRET, true),
            Err(ServiceError::InvalidArgument(_))
        ));
    }
}
