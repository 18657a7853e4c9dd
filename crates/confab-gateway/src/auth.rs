use jsonwebtoken::{DecodingKey, Validation, decode};
use uuid::Uuid;

use confab_types::api::Claims;
use confab_types::error::ChatError;

/// Identity attached to a connection after a successful `auth` frame.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: Uuid,
    pub display_name: String,
}

/// Credential → identity resolution. Token issuance lives outside the
/// core; this seam only validates whatever credential the client presents.
/// Tests stub it to avoid minting real tokens.
pub trait IdentityResolver: Send + Sync + 'static {
    fn resolve(&self, credential: &str) -> Result<Identity, ChatError>;
}

/// Production resolver: validates a signed JWT bearing [`Claims`].
pub struct JwtResolver {
    secret: String,
}

impl JwtResolver {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl IdentityResolver for JwtResolver {
    fn resolve(&self, credential: &str) -> Result<Identity, ChatError> {
        let token_data = decode::<Claims>(
            credential,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| ChatError::Unauthenticated)?;

        Ok(Identity {
            user_id: token_data.claims.sub,
            display_name: token_data.claims.display_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn token(secret: &str, sub: Uuid) -> String {
        let claims = Claims {
            sub,
            display_name: "alice".into(),
            exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_resolves() {
        let user = Uuid::new_v4();
        let resolver = JwtResolver::new("secret");
        let identity = resolver.resolve(&token("secret", user)).unwrap();
        assert_eq!(identity.user_id, user);
        assert_eq!(identity.display_name, "alice");
    }

    #[test]
    fn wrong_secret_is_unauthenticated() {
        let resolver = JwtResolver::new("secret");
        let err = resolver.resolve(&token("other", Uuid::new_v4())).unwrap_err();
        assert!(matches!(err, ChatError::Unauthenticated));
    }
}
