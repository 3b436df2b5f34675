//! Authentication callback for backends that protect devices.

use md5::{Digest, Md5};

use crate::backend::Credentials;

/// Marker separating a resource name from an MD5 challenge.
const MD5_MARKER: &str = "$MD5$";
/// Longest challenge that is hashed.
const MAX_CHALLENGE: usize = 128;

/// Prompt answering a backend's request for credentials.
pub trait Authenticator: Send + Sync {
    /// Ask for a username and password for `resource` (the name shown to
    /// the user, without any challenge). `rejected` counts the answers the
    /// backend already refused during this open. `None` cancels the open.
    fn authenticate(&self, resource: &str, rejected: usize) -> Option<Credentials>;
}

/// Authenticator that always cancels.
pub struct NoAuthenticator;

impl Authenticator for NoAuthenticator {
    fn authenticate(&self, _resource: &str, _rejected: usize) -> Option<Credentials> {
        None
    }
}

/// Answers with fixed credentials, and cancels once they were refused.
pub struct StaticAuthenticator {
    username: String,
    password: String,
}

impl StaticAuthenticator {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self, _resource: &str, rejected: usize) -> Option<Credentials> {
        (rejected == 0).then(|| Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        })
    }
}

/// Part of a resource string to show the user.
pub fn resource_name(resource: &str) -> &str {
    match resource.find(MD5_MARKER) {
        Some(pos) => &resource[..pos],
        None => resource,
    }
}

impl Credentials {
    /// Credentials to hand back for `resource`.
    ///
    /// When the resource carries an MD5 challenge the password is replaced
    /// by `$MD5$` followed by the hex digest of challenge and password.
    pub fn for_resource(resource: &str, username: &str, password: &str) -> Self {
        let password = match resource.find(MD5_MARKER) {
            Some(pos) => {
                let challenge = resource[pos + MD5_MARKER.len()..].as_bytes();
                let challenge = &challenge[..challenge.len().min(MAX_CHALLENGE)];
                let mut hasher = Md5::new();
                hasher.update(challenge);
                hasher.update(password.as_bytes());
                format!("{MD5_MARKER}{}", hex::encode(hasher.finalize()))
            }
            None => password.to_string(),
        };
        Self {
            username: username.to_string(),
            password,
        }
    }
}
