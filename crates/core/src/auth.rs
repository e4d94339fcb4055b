use crate::model::AuthUser;
use async_trait::async_trait;
use std::collections::HashMap;

/// Resolves a bearer token to a user.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `None` for unknown or malformed tokens.
    async fn authenticate(&self, token: &str) -> Option<AuthUser>;
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthConfigError {
    #[error("auth entry '{0}' is not of the form token=user_id[:email[:name]]")]
    MalformedEntry(String),
    #[error("auth token for user '{0}' is empty")]
    EmptyToken(String),
}

/// A fixed token table, for development and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticTokenIdentity {
    users: HashMap<String, AuthUser>,
}

impl StaticTokenIdentity {
    /// Parses `token=user_id:email:name` entries separated by `;`.
    ///
    /// Email and name are optional; empty fields are treated as absent.
    pub fn parse(entries: &str) -> Result<Self, AuthConfigError> {
        let mut users = HashMap::new();
        for entry in entries.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (token, identity) = entry
                .split_once('=')
                .ok_or_else(|| AuthConfigError::MalformedEntry(entry.to_string()))?;
            let mut fields = identity.splitn(3, ':').map(str::trim);
            let id = fields.next().unwrap_or_default();
            if id.is_empty() {
                return Err(AuthConfigError::MalformedEntry(entry.to_string()));
            }
            let token = token.trim();
            if token.is_empty() {
                return Err(AuthConfigError::EmptyToken(id.to_string()));
            }

            let mut user = AuthUser::new(id);
            user.email = fields.next().filter(|s| !s.is_empty()).map(String::from);
            user.name = fields.next().filter(|s| !s.is_empty()).map(String::from);
            users.insert(token.to_string(), user);
        }
        Ok(Self { users })
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenIdentity {
    async fn authenticate(&self, token: &str) -> Option<AuthUser> {
        self.users.get(token).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_full_and_partial_entries() {
        let identity = StaticTokenIdentity::parse(
            "dev-token=user_2abc:ada@example.com:Ada Lovelace; other=user_3def",
        )
        .unwrap();
        assert_eq!(identity.len(), 2);

        let ada = identity.authenticate("dev-token").await.unwrap();
        assert_eq!(ada.id, "user_2abc");
        assert_eq!(ada.email.as_deref(), Some("ada@example.com"));
        assert_eq!(ada.name.as_deref(), Some("Ada Lovelace"));

        let other = identity.authenticate("other").await.unwrap();
        assert_eq!(other.id, "user_3def");
        assert_eq!(other.email, None);
    }

    #[tokio::test]
    async fn unknown_token_is_not_authenticated() {
        let identity = StaticTokenIdentity::parse("a=user_1").unwrap();
        assert!(identity.authenticate("b").await.is_none());
        assert!(identity.authenticate("").await.is_none());
    }

    #[test]
    fn blank_config_yields_no_users() {
        assert!(StaticTokenIdentity::parse("").unwrap().is_empty());
        assert!(StaticTokenIdentity::parse(" ; ;").unwrap().is_empty());
    }

    #[test]
    fn malformed_entries_are_rejected() {
        assert_eq!(
            StaticTokenIdentity::parse("no-equals-sign").unwrap_err(),
            AuthConfigError::MalformedEntry("no-equals-sign".into())
        );
        assert!(matches!(
            StaticTokenIdentity::parse("token=:a@b.c"),
            Err(AuthConfigError::MalformedEntry(_))
        ));
        assert_eq!(
            StaticTokenIdentity::parse("=user_1").unwrap_err(),
            AuthConfigError::EmptyToken("user_1".into())
        );
    }
}
