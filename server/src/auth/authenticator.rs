use async_trait::async_trait;

use crate::auth::{jwt, AuthError, Identity};
use crate::db::{models, DbPool};

/// Resolves a bearer credential into an [`Identity`].
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn resolve(&self, credential: &str) -> Result<Identity, AuthError>;
}

/// Validates an HS256 access token and loads the user row it names.
pub struct JwtAuthenticator {
    secret: Vec<u8>,
    db: DbPool,
}

impl JwtAuthenticator {
    pub fn new(secret: Vec<u8>, db: DbPool) -> Self {
        Self { secret, db }
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn resolve(&self, credential: &str) -> Result<Identity, AuthError> {
        if credential.is_empty() {
            return Err(AuthError::MissingCredential);
        }

        let claims = jwt::validate_access_token(&self.secret, credential).map_err(|err| {
            if matches!(err.kind(), jsonwebtoken::errors::ErrorKind::ExpiredSignature) {
                AuthError::Expired
            } else {
                AuthError::Invalid(err)
            }
        })?;

        let db = self.db.clone();
        let user_id = claims.sub.clone();
        let row = tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|e| AuthError::Lookup(format!("DB lock: {e}")))?;
            models::find_user(&conn, &user_id).map_err(|e| AuthError::Lookup(e.to_string()))
        })
        .await
        .map_err(|e| AuthError::Lookup(format!("Task join: {e}")))??;

        row.map(Identity::from)
            .ok_or(AuthError::UnknownUser(claims.sub))
    }
}
