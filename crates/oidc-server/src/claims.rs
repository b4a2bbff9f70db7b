//! Claim types and the claims mapper.
//!
//! The mapper is applied to a ticket's claims right before any token is
//! issued. Its output is exactly what the access token and the ID token
//! carry.

use serde_json::{Map, Value};

use crate::ticket::Claim;

/// Well-known claim types.
pub mod claim_types {
    pub const SUBJECT: &str = "sub";
    pub const NAME: &str = "name";
    pub const EMAIL: &str = "email";
    pub const ROLE: &str = "role";
    pub const NAME_IDENTIFIER: &str =
        "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier";
}

/// JWT claim names the signing service sets itself.
pub const REGISTERED_CLAIMS: &[&str] = &["iss", "sub", "aud", "exp", "iat", "nonce"];

/// Transforms a claim set before it is placed in a token.
///
/// Any `Fn(Vec<Claim>) -> Vec<Claim>` closure is a mapper.
pub trait ClaimsMapper: Send + Sync {
    fn map_claims(&self, claims: Vec<Claim>) -> Vec<Claim>;
}

impl<F> ClaimsMapper for F
where
    F: Fn(Vec<Claim>) -> Vec<Claim> + Send + Sync,
{
    fn map_claims(&self, claims: Vec<Claim>) -> Vec<Claim> {
        self(claims)
    }
}

/// Mapper that returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityClaimsMapper;

impl ClaimsMapper for IdentityClaimsMapper {
    fn map_claims(&self, claims: Vec<Claim>) -> Vec<Claim> {
        claims
    }
}

/// Returns the subject identifier of a principal.
///
/// Looks for `sub` first and falls back to the name identifier claim.
#[must_use]
pub fn subject(claims: &[Claim]) -> Option<&str> {
    let find = |claim_type: &str| {
        claims
            .iter()
            .find(|c| c.claim_type() == claim_type)
            .map(Claim::value)
    };
    find(claim_types::SUBJECT).or_else(|| find(claim_types::NAME_IDENTIFIER))
}

/// Flattens claims into a JSON object.
///
/// Repeated claim types become arrays. Types listed in `skip` are left out.
#[must_use]
pub fn to_json_object(claims: &[Claim], skip: &[&str]) -> Map<String, Value> {
    let mut object = Map::new();
    for claim in claims {
        if skip.contains(&claim.claim_type()) {
            continue;
        }
        let value = Value::String(claim.value().to_string());
        match object.get_mut(claim.claim_type()) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                object.insert(claim.claim_type().to_string(), value);
            }
        }
    }
    object
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_mapper() {
        let claims = vec![Claim::new("sub", "alice"), Claim::new("role", "admin")];
        assert_eq!(IdentityClaimsMapper.map_claims(claims.clone()), claims);
    }

    #[test]
    fn test_closure_mapper() {
        let mapper = |claims: Vec<Claim>| {
            claims
                .into_iter()
                .filter(|c| c.claim_type() != "role")
                .collect::<Vec<_>>()
        };
        let mapped = mapper.map_claims(vec![Claim::new("sub", "alice"), Claim::new("role", "admin")]);
        assert_eq!(mapped, vec![Claim::new("sub", "alice")]);
    }

    #[test]
    fn test_subject_fallback() {
        let claims = vec![Claim::new(claim_types::NAME_IDENTIFIER, "42")];
        assert_eq!(subject(&claims), Some("42"));

        let claims = vec![
            Claim::new(claim_types::NAME_IDENTIFIER, "42"),
            Claim::new(claim_types::SUBJECT, "alice"),
        ];
        assert_eq!(subject(&claims), Some("alice"));

        assert_eq!(subject(&[]), None);
    }

    #[test]
    fn test_to_json_object() {
        let claims = vec![
            Claim::new("sub", "alice"),
            Claim::new("role", "admin"),
            Claim::new("role", "user"),
            Claim::new("email", "alice@example.com"),
        ];

        let object = to_json_object(&claims, REGISTERED_CLAIMS);
        assert!(!object.contains_key("sub"));
        assert_eq!(object["role"], serde_json::json!(["admin", "user"]));
        assert_eq!(object["email"], "alice@example.com");
    }
}
