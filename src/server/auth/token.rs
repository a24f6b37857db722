use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use super::context::{AccessContext, Claims, PrincipalRole};

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Invalid base64 secret: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("Signing secret must be at least 32 bytes, got {0}")]
    SecretTooShort(usize),
    #[error("Invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("System time error: {0}")]
    SystemTime(#[from] std::time::SystemTimeError),
}

/// HS256 verification of platform access tokens.
///
/// Tokens are issued elsewhere; `issue` exists for operators and tests that need a token signed
/// with the same secret.
pub struct TokenVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: Option<String>,
}

impl TokenVerifier {
    /// `secret_base64` must decode to at least 32 bytes.
    pub fn new(secret_base64: &str, issuer: Option<String>) -> Result<Self, TokenError> {
        let secret = BASE64.decode(secret_base64.trim())?;
        if secret.len() < 32 {
            return Err(TokenError::SecretTooShort(secret.len()));
        }
        Ok(Self {
            encoding_key: EncodingKey::from_secret(&secret),
            decoding_key: DecodingKey::from_secret(&secret),
            issuer,
        })
    }

    pub fn verify(&self, token: &str) -> Result<AccessContext, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        let data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims.into())
    }

    pub fn issue(
        &self,
        subject: &str,
        role: PrincipalRole,
        tenant_id: Option<uuid::Uuid>,
        namespace: Option<&str>,
        ttl_seconds: u64,
    ) -> Result<String, TokenError> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        let claims = Claims {
            sub: subject.to_string(),
            tid: tenant_id,
            ns: namespace.map(str::to_string),
            role,
            iat: now,
            exp: now + ttl_seconds,
        };
        let token = match &self.issuer {
            Some(issuer) => {
                #[derive(serde::Serialize)]
                struct WithIssuer<'a> {
                    #[serde(flatten)]
                    claims: &'a Claims,
                    iss: &'a str,
                }
                encode(
                    &Header::new(Algorithm::HS256),
                    &WithIssuer {
                        claims: &claims,
                        iss: issuer,
                    },
                    &self.encoding_key,
                )?
            }
            None => encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?,
        };
        Ok(token)
    }
}
