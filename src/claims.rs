//! Claims-based principal and the Keycloak realm-role enricher.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const SUBJECT_CLAIM: &str = "sub";
pub const NAME_CLAIM: &str = "name";
pub const ROLE_CLAIM: &str = "roles";
/// Keycloak's realm-role container: `{"roles": [...]}`.
pub const REALM_ACCESS_CLAIM: &str = "realm_access";

/// A single `type = value` claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    #[serde(rename = "type")]
    pub claim_type: String,
    pub value: String,
}

impl Claim {
    #[must_use]
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }
}

/// The authenticated caller for one request.
///
/// Built fresh on every request from the session cookie or the bearer token.
/// Claims may be appended but are never removed or renamed.
#[derive(Debug, Clone)]
pub struct Principal {
    claims: Vec<Claim>,
    name_claim_type: String,
    role_claim_type: String,
}

impl Principal {
    /// Principal using `name` for the display name and `roles` for roles.
    #[must_use]
    pub fn new(claims: Vec<Claim>) -> Self {
        Self {
            claims,
            name_claim_type: NAME_CLAIM.into(),
            role_claim_type: ROLE_CLAIM.into(),
        }
    }

    #[must_use]
    pub fn with_claim_types(
        mut self,
        name_claim_type: impl Into<String>,
        role_claim_type: impl Into<String>,
    ) -> Self {
        self.name_claim_type = name_claim_type.into();
        self.role_claim_type = role_claim_type.into();
        self
    }

    #[must_use]
    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    #[must_use]
    pub fn role_claim_type(&self) -> &str {
        &self.role_claim_type
    }

    /// Value of the first claim of the given type.
    #[must_use]
    pub fn find_first(&self, claim_type: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|c| c.claim_type == claim_type)
            .map(|c| c.value.as_str())
    }

    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.find_first(SUBJECT_CLAIM)
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.find_first(&self.name_claim_type)
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.claims
            .iter()
            .filter(|c| c.claim_type == self.role_claim_type)
            .map(|c| c.value.as_str())
    }

    #[must_use]
    pub fn is_in_role(&self, role: &str) -> bool {
        self.roles().any(|r| r == role)
    }

    pub fn add_claim(&mut self, claim: Claim) {
        self.claims.push(claim);
    }

    pub fn add_role(&mut self, role: impl Into<String>) {
        let claim = Claim::new(self.role_claim_type.clone(), role);
        self.claims.push(claim);
    }
}

/// Flatten a JWT payload into claims.
///
/// Arrays produce one claim per element; objects are kept as a JSON string
/// (this is how `realm_access` reaches the enricher); nulls are dropped.
#[must_use]
pub fn claims_from_json(payload: &Map<String, Value>) -> Vec<Claim> {
    let mut claims = Vec::with_capacity(payload.len());
    for (claim_type, value) in payload {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                claims.extend(
                    items
                        .iter()
                        .filter(|item| !item.is_null())
                        .map(|item| Claim::new(claim_type.clone(), scalar_to_string(item))),
                );
            }
            other => claims.push(Claim::new(claim_type.clone(), scalar_to_string(other))),
        }
    }
    claims
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Decode a JWT payload without verifying its signature.
///
/// Only for tokens received directly from the token endpoint over TLS; never
/// for tokens presented by a client.
#[must_use]
pub fn decode_unverified_payload(token: &str) -> Option<Map<String, Value>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[derive(Debug, thiserror::Error)]
pub enum ClaimParseFailure {
    #[error("realm_access is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("realm_access is not a JSON object")]
    NotAnObject,
    #[error("realm_access roles is not a list of strings")]
    InvalidRoles,
}

/// Append one role claim per entry of the `realm_access` claim's `roles` list.
///
/// A missing or malformed claim leaves the principal untouched. Returns the
/// number of roles added.
pub fn enrich_roles(principal: &mut Principal) -> usize {
    let Some(raw) = principal.find_first(REALM_ACCESS_CLAIM).map(str::to_owned) else {
        return 0;
    };

    let roles = match parse_realm_roles(&raw) {
        Ok(roles) => roles,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring realm_access claim");
            return 0;
        }
    };

    let added = roles.len();
    for role in roles {
        principal.add_role(role);
    }
    added
}

/// Field names are matched case-insensitively; `roles` may be absent or null.
fn parse_realm_roles(raw: &str) -> Result<Vec<String>, ClaimParseFailure> {
    let Value::Object(fields) = serde_json::from_str::<Value>(raw)? else {
        return Err(ClaimParseFailure::NotAnObject);
    };

    let roles = fields
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("roles"))
        .map(|(_, value)| value);

    match roles {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_owned)
                    .ok_or(ClaimParseFailure::InvalidRoles)
            })
            .collect(),
        Some(_) => Err(ClaimParseFailure::InvalidRoles),
    }
}
