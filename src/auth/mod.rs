pub mod permissions;

use axum::{extract::FromRequestParts, http::request::Parts};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::ServiceError;

pub use permissions::consts;

/// JWT claims carried by every caller token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id
    pub sub: Uuid,
    /// The location this user belongs to, if any
    pub home_location_id: Option<Uuid>,
    /// Granted capabilities in `module:action` form
    pub permissions: Vec<String>,
    pub exp: usize,
    pub iat: usize,
}

/// The identity a core operation runs under. Built from verified claims at
/// the transport edge; tests construct it directly.
#[derive(Debug, Clone)]
pub struct CallerContext {
    pub user_id: Uuid,
    pub home_location_id: Option<Uuid>,
    pub permissions: HashSet<String>,
}

impl CallerContext {
    pub fn new(
        user_id: Uuid,
        home_location_id: Option<Uuid>,
        permissions: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            user_id,
            home_location_id,
            permissions: permissions.into_iter().collect(),
        }
    }
}

impl From<Claims> for CallerContext {
    fn from(claims: Claims) -> Self {
        Self::new(claims.sub, claims.home_location_id, claims.permissions)
    }
}

/// Answers "may this actor perform `module:action`".
///
/// The default implementation checks the actor's own permission strings;
/// deployments with a central policy service can swap in another oracle.
pub trait PermissionOracle: Send + Sync {
    fn has_capability(&self, actor: &CallerContext, module: &str, action: &str) -> bool;

    /// Capability check that fails with `Forbidden` naming the capability.
    fn ensure(&self, actor: &CallerContext, module: &str, action: &str) -> Result<(), ServiceError> {
        if self.has_capability(actor, module, action) {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!(
                "missing capability {}:{}",
                module, action
            )))
        }
    }
}

/// Oracle backed by the permission strings in the caller's claims.
/// Supports exact grants, `module:*`, and the super-grant `*`.
#[derive(Debug, Default, Clone)]
pub struct ClaimsPermissionOracle;

impl PermissionOracle for ClaimsPermissionOracle {
    fn has_capability(&self, actor: &CallerContext, module: &str, action: &str) -> bool {
        let exact = format!("{}:{}", module, action);
        let wildcard = format!("{}:*", module);
        actor.permissions.contains(&exact)
            || actor.permissions.contains(&wildcard)
            || actor.permissions.contains("*")
    }
}

/// Verifies and issues caller tokens.
#[derive(Clone)]
pub struct AuthService {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    token_ttl_secs: usize,
}

impl AuthService {
    pub fn new(jwt_secret: &str, token_ttl_secs: usize) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            token_ttl_secs,
        }
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, ServiceError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| ServiceError::Unauthorized(format!("invalid token: {}", e)))
    }

    /// Issues a token for the given identity; used by tests and tooling.
    pub fn issue_token(
        &self,
        user_id: Uuid,
        home_location_id: Option<Uuid>,
        permissions: Vec<String>,
    ) -> Result<String, ServiceError> {
        let now = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: user_id,
            home_location_id,
            permissions,
            iat: now,
            exp: now + self.token_ttl_secs,
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::InternalError(format!("failed to sign token: {}", e)))
    }
}

/// Extracts the verified caller from the `Authorization: Bearer` header.
#[async_trait::async_trait]
impl FromRequestParts<crate::AppState> for CallerContext {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &crate::AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("missing authorization header".into()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ServiceError::Unauthorized("expected bearer token".into()))?;

        let claims = state.auth_service.verify_token(token)?;
        Ok(claims.into())
    }
}

/// Shared handle used by services to run capability checks.
pub type SharedPermissionOracle = Arc<dyn PermissionOracle>;

#[cfg(test)]
mod tests {
    use super::*;

    fn actor_with(perms: &[&str]) -> CallerContext {
        CallerContext::new(
            Uuid::new_v4(),
            None,
            perms.iter().map(|s| s.to_string()),
        )
    }

    #[test]
    fn exact_grant_allows() {
        let oracle = ClaimsPermissionOracle;
        let actor = actor_with(&["testing:create"]);
        assert!(oracle.has_capability(&actor, "testing", "create"));
        assert!(!oracle.has_capability(&actor, "testing", "accept"));
    }

    #[test]
    fn module_wildcard_allows_all_actions() {
        let oracle = ClaimsPermissionOracle;
        let actor = actor_with(&["testing:*"]);
        assert!(oracle.has_capability(&actor, "testing", "cancel"));
        assert!(!oracle.has_capability(&actor, "stock", "read"));
    }

    #[test]
    fn ensure_names_the_missing_capability() {
        let oracle = ClaimsPermissionOracle;
        let actor = actor_with(&[]);
        let err = oracle.ensure(&actor, "testing", "accept").unwrap_err();
        assert!(err.to_string().contains("testing:accept"));
    }

    #[test]
    fn token_round_trip() {
        let auth = AuthService::new("test_secret_key_for_testing_purposes_only_32chars", 3600);
        let user = Uuid::new_v4();
        let loc = Uuid::new_v4();
        let token = auth
            .issue_token(user, Some(loc), vec!["testing:read".into()])
            .unwrap();
        let claims = auth.verify_token(&token).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.home_location_id, Some(loc));
        assert_eq!(claims.permissions, vec!["testing:read".to_string()]);
    }
}
