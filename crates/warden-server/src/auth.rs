use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Lifetime of an issued service token.
pub const SERVICE_TOKEN_TTL: Duration = Duration::from_secs(5 * 60);

const ALGORITHM: Algorithm = Algorithm::ES256;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("target service must not be empty")]
    EmptyTarget,

    #[error("failed to read key file '{0}': {1}")]
    KeyFile(String, String),

    #[error("invalid key for service '{0}': {1}")]
    InvalidKey(String, String),

    #[error("failed to sign token: {0}")]
    Signing(String),

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("unexpected signing algorithm {0}")]
    UnexpectedAlgorithm(String),

    #[error("unknown issuer '{0}'")]
    UnknownIssuer(String),

    #[error("token subject does not match its issuer")]
    SubjectMismatch,

    #[error("token is not addressed to this service")]
    AudienceMismatch,

    #[error("token has expired")]
    Expired,

    #[error("token is not valid yet")]
    NotYetValid,

    #[error("invalid token signature")]
    InvalidSignature,
}

impl TokenError {
    /// Short, secret-free label used in audit events and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            TokenError::EmptyTarget => "empty_target",
            TokenError::KeyFile(..) | TokenError::InvalidKey(..) => "invalid_key",
            TokenError::Signing(_) => "signing_failed",
            TokenError::Malformed(_) => "malformed",
            TokenError::UnexpectedAlgorithm(_) => "unexpected_algorithm",
            TokenError::UnknownIssuer(_) => "unknown_issuer",
            TokenError::SubjectMismatch => "subject_mismatch",
            TokenError::AudienceMismatch => "audience_mismatch",
            TokenError::Expired => "expired",
            TokenError::NotYetValid => "not_yet_valid",
            TokenError::InvalidSignature => "invalid_signature",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Vec<String>,
    pub iat: u64,
    pub nbf: u64,
    pub exp: u64,
}

/// Source of the current time in whole seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

fn read_key_file(path: &Path) -> Result<Vec<u8>, TokenError> {
    std::fs::read(path).map_err(|e| TokenError::KeyFile(path.display().to_string(), e.to_string()))
}

/// Issues tokens asserting "this service may call `target`".
pub struct ServiceTokenGenerator {
    service: String,
    key: EncodingKey,
    clock: Arc<dyn Clock>,
}

impl ServiceTokenGenerator {
    /// `private_key_pem` is a PKCS#8 P-256 private key.
    pub fn from_pem(service: impl Into<String>, private_key_pem: &[u8]) -> Result<Self, TokenError> {
        let service = service.into();
        let key = EncodingKey::from_ec_pem(private_key_pem)
            .map_err(|e| TokenError::InvalidKey(service.clone(), e.to_string()))?;
        Ok(Self {
            service,
            key,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn from_file(service: impl Into<String>, path: &Path) -> Result<Self, TokenError> {
        Self::from_pem(service, &read_key_file(path)?)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn generate(&self, target: &str) -> Result<String, TokenError> {
        if target.is_empty() {
            return Err(TokenError::EmptyTarget);
        }

        let now = self.clock.now();
        let claims = ServiceClaims {
            iss: self.service.clone(),
            sub: self.service.clone(),
            aud: vec![target.to_string()],
            iat: now,
            nbf: now,
            exp: now + SERVICE_TOKEN_TTL.as_secs(),
        };

        jsonwebtoken::encode(&Header::new(ALGORITHM), &claims, &self.key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }
}

/// Public keys of the services allowed to call this one.
#[derive(Clone, Default)]
pub struct ServiceKeyRegistry {
    keys: HashMap<String, DecodingKey>,
}

impl ServiceKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `public_key_pem` is an SPKI P-256 public key.
    pub fn insert_pem(&mut self, service: &str, public_key_pem: &[u8]) -> Result<(), TokenError> {
        let key = DecodingKey::from_ec_pem(public_key_pem)
            .map_err(|e| TokenError::InvalidKey(service.to_string(), e.to_string()))?;
        self.keys.insert(service.to_string(), key);
        Ok(())
    }

    pub fn load<'a, I>(entries: I) -> Result<Self, TokenError>
    where
        I: IntoIterator<Item = (&'a String, &'a std::path::PathBuf)>,
    {
        let mut registry = Self::new();
        for (service, path) in entries {
            registry.insert_pem(service, &read_key_file(path)?)?;
        }
        Ok(registry)
    }

    pub fn get(&self, service: &str) -> Option<&DecodingKey> {
        self.keys.get(service)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Verifies inbound service tokens addressed to `service`.
pub struct ServiceTokenValidator {
    service: String,
    registry: ServiceKeyRegistry,
    leeway: u64,
    clock: Arc<dyn Clock>,
}

impl ServiceTokenValidator {
    pub fn new(service: impl Into<String>, registry: ServiceKeyRegistry) -> Self {
        Self {
            service: service.into(),
            registry,
            leeway: 0,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway.as_secs();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the name of the calling service.
    pub fn validate(&self, token: &str) -> Result<String, TokenError> {
        let header =
            jsonwebtoken::decode_header(token).map_err(|e| TokenError::Malformed(e.to_string()))?;
        if header.alg != ALGORITHM {
            return Err(TokenError::UnexpectedAlgorithm(format!("{:?}", header.alg)));
        }

        let issuer = peek_issuer(token)?;
        let key = self
            .registry
            .get(&issuer)
            .ok_or_else(|| TokenError::UnknownIssuer(issuer.clone()))?;

        let mut validation = Validation::new(ALGORITHM);
        validation.set_audience(&[self.service.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub", "aud"]);
        // Time checks run below against the injected clock.
        validation.validate_exp = false;
        validation.validate_nbf = false;

        let claims = jsonwebtoken::decode::<ServiceClaims>(token, key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                ErrorKind::InvalidAudience => TokenError::AudienceMismatch,
                ErrorKind::InvalidAlgorithm => {
                    TokenError::UnexpectedAlgorithm(format!("{:?}", header.alg))
                }
                _ => TokenError::Malformed(e.to_string()),
            })?
            .claims;

        if claims.sub != claims.iss {
            return Err(TokenError::SubjectMismatch);
        }

        let now = self.clock.now();
        if now > claims.exp.saturating_add(self.leeway) {
            return Err(TokenError::Expired);
        }
        if now.saturating_add(self.leeway) < claims.nbf {
            return Err(TokenError::NotYetValid);
        }

        Ok(claims.iss)
    }
}

#[derive(Deserialize)]
struct IssuerOnly {
    iss: String,
}

/// Reads `iss` without verifying the signature, to pick the verification key.
fn peek_issuer(token: &str) -> Result<String, TokenError> {
    let mut validation = Validation::new(ALGORITHM);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    jsonwebtoken::decode::<IssuerOnly>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims.iss)
        .map_err(|e| TokenError::Malformed(e.to_string()))
}
