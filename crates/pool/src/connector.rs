//! The connector trait and the parameters it connects with.
//!
//! A [`Connector`] opens, probes and closes physical connections. The pool
//! owns no connection internals beyond these three operations.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::error::{Error, Result};

/// Where and as whom to connect.
#[derive(Clone)]
pub struct ConnectParams {
    url: Url,
    user: Option<String>,
    password: Option<SecretString>,
}

impl ConnectParams {
    /// Parameters for `url` with no credentials.
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| Error::configuration_with(format!("invalid connection url {url:?}"), e))?;
        Ok(Self {
            url,
            user: None,
            password: None,
        })
    }

    /// Attach credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.user = Some(user.into());
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Read `url`, `user` and `password` from flat properties.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        let url = props
            .get("url")
            .ok_or_else(|| Error::configuration("connection property `url` is missing"))?;
        let mut params = Self::new(url)?;
        params.user = props.get("user").cloned();
        params.password = props.get("password").cloned().map(SecretString::from);
        Ok(params)
    }

    /// The target url.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The url scheme, which selects the driver.
    #[must_use]
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// The user to authenticate as, if any.
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// The password, exposed for the connector that needs it.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_ref().map(|p| p.expose_secret())
    }
}

impl fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectParams")
            .field("url", &self.url.as_str())
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Opens, probes and closes physical connections.
///
/// `close` and `is_alive` take a shared reference: a caller may still hold
/// the loan while the pool probes or closes the connection underneath it.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The physical connection type.
    type Connection: Send + Sync + 'static;

    /// The error the driver reports.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Name used in logs and errors (e.g. "postgres").
    fn name(&self) -> &str;

    /// Whether this connector can serve `params`.
    ///
    /// A pool refuses to start when this returns `false`.
    fn accepts(&self, _params: &ConnectParams) -> bool {
        true
    }

    /// Open a new connection.
    async fn open(
        &self,
        params: &ConnectParams,
    ) -> std::result::Result<Self::Connection, Self::Error>;

    /// Report whether `conn` can still serve requests.
    async fn is_alive(&self, conn: &Self::Connection) -> std::result::Result<bool, Self::Error>;

    /// Close `conn`. Called at most once per pooled connection.
    async fn close(&self, conn: &Self::Connection) -> std::result::Result<(), Self::Error>;
}
