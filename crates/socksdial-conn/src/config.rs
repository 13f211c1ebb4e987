//! Configuration for dialing connections.

use crate::auth::{Credentials, StaticAuthenticator};
use crate::endpoint::{Endpoint, ProxyCandidate};
use crate::{Error, Result};

use derive_builder::Builder;
use serde::Deserialize;
use socksdial_proto::SocksVersion;
use std::convert::TryFrom;
use std::time::Duration;

/// Configuration for one SOCKS proxy.
///
/// This type is immutable once constructed.  To create an object of this
/// type, use [`ProxyConfigBuilder`].
#[derive(Debug, Clone, Builder, Deserialize)]
#[builder(setter(prefix = "set"))]
pub struct ProxyConfig {
    /// Where the proxy listens, as `host:port`.
    pub(crate) address: String,

    /// Which SOCKS version to speak: 4 or 5.
    #[builder(default = "5")]
    #[serde(default = "default_socks_version")]
    pub(crate) version: u8,

    /// Username for SOCKS5 username/password authentication.
    #[builder(default)]
    pub(crate) username: Option<String>,

    /// Password for SOCKS5 username/password authentication.
    #[builder(default)]
    pub(crate) password: Option<String>,
}

/// Return the SOCKS version we use when none is configured.
fn default_socks_version() -> u8 {
    5
}

impl ProxyConfig {
    /// Return the proxy described by this configuration.
    pub fn candidate(&self) -> Result<ProxyCandidate> {
        let address: Endpoint = self
            .address
            .parse()
            .map_err(|e| Error::InvalidConfig(format!("proxy address: {}", e)))?;
        let version = SocksVersion::try_from(self.version)
            .map_err(|_| Error::InvalidConfig(format!("SOCKS version {}", self.version)))?;
        Ok(ProxyCandidate::new(address, version))
    }
}

/// Configuration for dialing connections.
///
/// This type is immutable once constructed.  To create an object of this
/// type, use [`ConnectConfigBuilder`].
#[derive(Debug, Clone, Builder, Deserialize)]
#[builder(setter(prefix = "set"))]
pub struct ConnectConfig {
    /// How long a whole connect may take, across every proxy we try.
    /// Zero means "forever".
    #[builder(default = "Duration::from_secs(30)")]
    #[serde(with = "humantime_serde")]
    pub(crate) connect_timeout: Duration,

    /// The user id to send to SOCKS4 proxies.  If unset, we send the name
    /// of the user running this process.
    #[builder(default)]
    #[serde(default)]
    pub(crate) socks4_user_id: Option<String>,

    /// Proxies to try, in order.  If empty, we connect directly.
    #[builder(default)]
    #[serde(default)]
    pub(crate) proxies: Vec<ProxyConfig>,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        ConnectConfigBuilder::default().build().unwrap()
    }
}

impl ConnectConfig {
    /// Return the configured connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Return the configured SOCKS4 user id, if any.
    pub fn socks4_user_id(&self) -> Option<&str> {
        self.socks4_user_id.as_deref()
    }

    /// Return the configured proxies.
    pub fn proxies(&self) -> &[ProxyConfig] {
        &self.proxies[..]
    }

    /// Return every configured proxy as a candidate, in order.
    pub fn candidates(&self) -> Result<Vec<ProxyCandidate>> {
        self.proxies.iter().map(ProxyConfig::candidate).collect()
    }

    /// Return an authenticator that knows every configured username.
    pub fn authenticator(&self) -> Result<StaticAuthenticator> {
        let mut auth = StaticAuthenticator::new();
        for p in &self.proxies {
            if let Some(user) = &p.username {
                let c = p.candidate()?;
                auth.insert(
                    c.address().host_string(),
                    c.address().port(),
                    Credentials::new(user.clone(), p.password.clone()),
                );
            }
        }
        Ok(auth)
    }
}
