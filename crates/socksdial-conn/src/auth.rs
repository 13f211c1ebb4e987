//! Where SOCKS5 username/password credentials come from.

use std::collections::HashMap;

/// A username, and maybe a password, for a SOCKS5 proxy.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// The username.
    pub username: String,
    /// The password, if any.  A missing password is sent as an empty one.
    pub password: Option<String>,
}

impl Credentials {
    /// Return credentials for `username` with `password`.
    pub fn new<U, P>(username: U, password: Option<P>) -> Self
    where
        U: Into<String>,
        P: Into<String>,
    {
        Credentials {
            username: username.into(),
            password: password.map(Into::into),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A source of credentials for SOCKS proxies.
pub trait Authenticator: Send + Sync {
    /// Return credentials for the proxy at `host`:`port`, if we have any.
    ///
    /// `scheme` names the protocol asking; it is always `"SOCKS5"` here.
    fn request_credentials(&self, host: &str, port: u16, scheme: &str) -> Option<Credentials>;
}

/// An [`Authenticator`] with a fixed table of credentials, keyed by proxy
/// host and port.
#[derive(Clone, Debug, Default)]
pub struct StaticAuthenticator {
    /// Map from (host, port) to the credentials for that proxy.
    creds: HashMap<(String, u16), Credentials>,
}

impl StaticAuthenticator {
    /// Return a new authenticator that knows no credentials.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `creds` for the proxy at `host`:`port`.
    pub fn insert<S: Into<String>>(&mut self, host: S, port: u16, creds: Credentials) {
        self.creds.insert((host.into(), port), creds);
    }

    /// Return true if no credentials are known.
    pub fn is_empty(&self) -> bool {
        self.creds.is_empty()
    }
}

impl Authenticator for StaticAuthenticator {
    fn request_credentials(&self, host: &str, port: u16, _scheme: &str) -> Option<Credentials> {
        self.creds.get(&(host.to_string(), port)).cloned()
    }
}

/// Return the name of the user running this process, if we can find it.
pub(crate) fn os_user_name() -> Option<String> {
    ["USER", "USERNAME"]
        .iter()
        .filter_map(|v| std::env::var(v).ok())
        .find(|s| !s.is_empty())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn static_lookup() {
        let mut a = StaticAuthenticator::new();
        assert!(a.is_empty());
        a.insert("proxy.example", 1080, Credentials::new("alice", Some("hunter2")));
        let c = a.request_credentials("proxy.example", 1080, "SOCKS5").unwrap();
        assert_eq!(c.username, "alice");
        assert_eq!(c.password.as_deref(), Some("hunter2"));
        assert!(a.request_credentials("proxy.example", 1081, "SOCKS5").is_none());
        assert!(a.request_credentials("other.example", 1080, "SOCKS5").is_none());
    }

    #[test]
    fn debug_hides_password() {
        let c = Credentials::new("bob", Some("secret"));
        let s = format!("{:?}", c);
        assert!(s.contains("bob"));
        assert!(!s.contains("secret"));
    }
}
