use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::chat::{IdentityVerifier, ParticipantId};
use crate::error::{AppError, AuthError};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,  // Participant ID
    pub exp: i64,     // Expiration time
    pub iat: i64,     // Issued at
}

/// Issues and verifies HS256 access tokens.
pub struct TokenService {
    jwt_secret: String,
    token_expiry: Duration,
}

impl TokenService {
    pub fn new(jwt_secret: String, token_expiry_hours: i64) -> Self {
        Self {
            jwt_secret,
            token_expiry: Duration::hours(token_expiry_hours),
        }
    }

    pub fn issue(&self, participant_id: ParticipantId) -> Result<String, AppError> {
        self.issue_with_expiry(participant_id, self.token_expiry)
    }

    pub fn issue_with_expiry(&self, participant_id: ParticipantId, expiry: Duration) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            sub: participant_id.to_string(),
            exp: (now + expiry).timestamp(),
            iat: now.timestamp(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )?;

        Ok(token)
    }

    fn decode_token(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &validation,
        )?;

        Ok(claims.claims)
    }
}

impl IdentityVerifier for TokenService {
    fn verify(&self, token: &str) -> Result<ParticipantId, AppError> {
        let claims = self.decode_token(token)?;
        claims
            .sub
            .parse::<ParticipantId>()
            .map_err(|_| AppError::AuthError(AuthError::InvalidToken))
    }
}
