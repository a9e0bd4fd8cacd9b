//! User model and token claims

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use crate::{config::AuthConfig, error::AppError};

/// User identifier from the user directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct UserId(pub i32);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Role {
    Admin,
    User,
}

/// User directory record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub role: Role,
}

/// JWT claims carried by bearer tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaims {
    /// User id, as a string
    pub sub: String,
    pub role: Role,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

impl UserClaims {
    /// Create a new JWT token
    pub fn create_token(&self, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{encode, EncodingKey, Header};
        encode(
            &Header::default(),
            self,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
    }

    /// Parse JWT token, checking signature, expiry, issuer and audience
    pub fn from_token(token: &str, auth: &AuthConfig) -> Result<Self, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{decode, DecodingKey, Validation};
        let mut validation = Validation::default();
        validation.set_issuer(&[&auth.issuer]);
        validation.set_audience(&[&auth.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        let token_data = decode::<Self>(
            token,
            &DecodingKey::from_secret(auth.jwt_secret.as_bytes()),
            &validation,
        )?;
        Ok(token_data.claims)
    }

    /// User id of the token subject
    pub fn user_id(&self) -> Result<UserId, AppError> {
        self.sub
            .parse::<i32>()
            .map(UserId)
            .map_err(|_| AppError::Authentication("User ID claim missing in token".to_string()))
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        match self.role {
            Role::Admin => Ok(()),
            Role::User => Err(AppError::Authorization("Admin role required".to_string())),
        }
    }

    /// Admins may access anyone, users only themselves
    pub fn require_self_or_admin(&self, user_id: UserId) -> Result<(), AppError> {
        if self.role == Role::Admin || self.user_id()? == user_id {
            Ok(())
        } else {
            Err(AppError::Authorization(
                "You cannot access another user's data".to_string(),
            ))
        }
    }
}
