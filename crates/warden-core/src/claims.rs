use serde::Serialize;

/// Subject id used upstream for unauthenticated callers.
pub const GUEST_SUBJECT: &str = "guest";

pub fn is_guest(subject_id: &str) -> bool {
    subject_id.is_empty() || subject_id == GUEST_SUBJECT
}

/// Authorization facts about one subject, valid for a single request.
///
/// When `error` is set the admin and banned flags could not be evaluated;
/// [`RoleClaims::admin`] and [`RoleClaims::banned`] return `None` in that
/// case so a failed lookup can never be read as a definitive `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleClaims {
    subject: String,
    authenticated: bool,
    admin: bool,
    banned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl RoleClaims {
    pub fn guest(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            authenticated: false,
            admin: false,
            banned: false,
            error: None,
        }
    }

    pub fn evaluated(subject: impl Into<String>, admin: bool, banned: bool) -> Self {
        Self {
            subject: subject.into(),
            authenticated: true,
            admin,
            banned,
            error: None,
        }
    }

    pub fn failed(subject: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            authenticated: true,
            admin: false,
            banned: false,
            error: Some(error.into()),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn admin(&self) -> Option<bool> {
        self.error.is_none().then_some(self.admin)
    }

    pub fn banned(&self) -> Option<bool> {
        self.error.is_none().then_some(self.banned)
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// True only for an authenticated, evaluated, admin and not banned subject.
    pub fn is_active_admin(&self) -> bool {
        self.authenticated && self.admin() == Some(true) && self.banned() == Some(false)
    }
}
