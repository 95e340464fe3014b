//! Request-scoped caller identity.

use serde::{Deserialize, Serialize};

/// Identity claims of an authenticated end user or operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Subject at the identity provider.
    pub subject: String,
    /// Display name, if the provider sent one.
    pub name: Option<String>,
    /// Email address, if the provider sent one.
    pub email: Option<String>,
    /// Whether the provider verified the email address.
    pub email_verified: bool,
    /// Group memberships at the identity provider.
    pub groups: Vec<String>,
}

impl Identity {
    /// Whether the identity carries `group`.
    #[must_use]
    pub fn has_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

/// Kind of caller, without associated data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallerKind {
    /// No credentials were presented.
    Anonymous,
    /// An attendee.
    User,
    /// An attendee with the operator group and the admin request flag.
    Operator,
    /// Server-to-server caller using the shared secret.
    Machine,
}

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// No credentials were presented on an open path.
    Anonymous,
    /// An attendee.
    User(Identity),
    /// An operator.
    Operator(Identity),
    /// A machine caller authenticated by the shared API secret.
    Machine,
}

impl Caller {
    /// The caller kind.
    #[must_use]
    pub const fn kind(&self) -> CallerKind {
        match self {
            Self::Anonymous => CallerKind::Anonymous,
            Self::User(_) => CallerKind::User,
            Self::Operator(_) => CallerKind::Operator,
            Self::Machine => CallerKind::Machine,
        }
    }

    /// Operators and machines hold administrative rights.
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self, Self::Operator(_) | Self::Machine)
    }

    /// Whether no credentials were presented.
    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    /// Identity claims, for users and operators.
    #[must_use]
    pub const fn identity(&self) -> Option<&Identity> {
        match self {
            Self::User(identity) | Self::Operator(identity) => Some(identity),
            Self::Anonymous | Self::Machine => None,
        }
    }

    /// Whether the caller's identity carries `group`.
    #[must_use]
    pub fn has_group(&self, group: &str) -> bool {
        self.identity().is_some_and(|i| i.has_group(group))
    }

    /// Who to record as the originator of a change.
    #[must_use]
    pub fn requested_by(&self) -> String {
        match self {
            Self::Anonymous => "anonymous".to_string(),
            Self::User(identity) => format!("user:{}", identity.subject),
            Self::Operator(identity) => format!("operator:{}", identity.subject),
            Self::Machine => "api".to_string(),
        }
    }
}

/// Credentials presented by the caller, kept for forwarding downstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Credentials {
    /// Nothing to forward.
    #[default]
    None,
    /// The shared API secret.
    ApiKey(String),
    /// A bearer access token.
    Bearer(String),
    /// The identity/access token cookie pair.
    Cookies {
        /// Name of the identity token cookie.
        id_token_name: String,
        /// Identity token value.
        id_token: String,
        /// Name of the access token cookie.
        access_token_name: String,
        /// Access token value.
        access_token: String,
    },
}

/// Everything the cores need to know about the current request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Request id, echoed on the response and forwarded downstream.
    pub request_id: String,
    /// The authenticated caller.
    pub caller: Caller,
    /// Credentials to forward to downstream services.
    pub credentials: Credentials,
}

impl RequestContext {
    /// Create a request context.
    #[must_use]
    pub const fn new(request_id: String, caller: Caller, credentials: Credentials) -> Self {
        Self {
            request_id,
            caller,
            credentials,
        }
    }

    /// A context for an anonymous caller.
    #[must_use]
    pub fn anonymous(request_id: impl Into<String>) -> Self {
        Self::new(request_id.into(), Caller::Anonymous, Credentials::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(groups: &[&str]) -> Identity {
        Identity {
            subject: "101".to_string(),
            groups: groups.iter().map(ToString::to_string).collect(),
            ..Identity::default()
        }
    }

    #[test]
    fn test_admin_rights() {
        assert!(Caller::Machine.is_admin());
        assert!(Caller::Operator(identity(&["admin"])).is_admin());
        assert!(!Caller::User(identity(&["admin"])).is_admin());
        assert!(!Caller::Anonymous.is_admin());
    }

    #[test]
    fn test_group_lookup() {
        let caller = Caller::User(identity(&["staff"]));
        assert!(caller.has_group("staff"));
        assert!(!caller.has_group("admin"));
        assert!(!Caller::Machine.has_group("staff"));
    }

    #[test]
    fn test_requested_by() {
        assert_eq!(Caller::User(identity(&[])).requested_by(), "user:101");
        assert_eq!(Caller::Machine.requested_by(), "api");
        assert_eq!(Caller::Machine.kind(), CallerKind::Machine);
    }
}
