//! Client-role aggregation
//!
//! Flattens the provider's `resource_access` claim into `client:role` strings.

use super::IntrospectionError;
use serde_json::Value;

/// Ordered `client:role` grants, duplicates kept
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSet(Vec<String>);

impl RoleSet {
    /// Flatten a `resource_access` value of the form
    /// `{ "<client>": { "roles": ["<role>", ...] }, ... }`.
    ///
    /// Clients are visited in the order the provider sent them, roles in array
    /// order. A missing claim or a client without a `roles` array is an error.
    pub fn from_resource_access(resource_access: Option<&Value>) -> Result<Self, IntrospectionError> {
        let clients = resource_access
            .and_then(Value::as_object)
            .ok_or_else(|| {
                IntrospectionError::Malformed("resource_access is missing or not an object".into())
            })?;

        let mut roles = Vec::new();
        for (client, grant) in clients {
            let client_roles = grant
                .get("roles")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    IntrospectionError::Malformed(format!(
                        "resource_access.{} has no roles array",
                        client
                    ))
                })?;

            for role in client_roles {
                roles.push(format!("{}:{}", client, role_name(role)));
            }
        }

        Ok(Self(roles))
    }

    /// Exact-match membership test
    pub fn contains(&self, role: &str) -> bool {
        self.0.iter().any(|r| r == role)
    }

    pub fn join(&self, separator: &str) -> String {
        self.0.join(separator)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<String>> for RoleSet {
    fn from(roles: Vec<String>) -> Self {
        Self(roles)
    }
}

/// Role names are strings; anything else is rendered as its JSON text.
fn role_name(role: &Value) -> String {
    match role {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
