use std::fmt::{self, Display};

use http::{uri::Scheme, Uri};
use serde::{Deserialize, Serialize};

/// Address of an HTTP endpoint, either the lock server or a client's
/// callback listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    scheme: String,
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn localhost(port: u16) -> Self {
        Endpoint {
            scheme: "http".to_owned(),
            host: "127.0.0.1".to_owned(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The `<host>:<port>` form, without the scheme.
    pub fn to_authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Full URL for a request path on this endpoint.
    pub fn url(&self, path: &str) -> String {
        format!("{self}{path}")
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl TryFrom<Uri> for Endpoint {
    type Error = anyhow::Error;

    fn try_from(value: Uri) -> Result<Self, Self::Error> {
        let host = value
            .host()
            .ok_or(anyhow::anyhow!(
                "cannot parse endpoint host from URI '{value:?}'"
            ))?
            .to_owned();
        if host.is_empty() {
            return Err(anyhow::anyhow!("no host part in URI '{value:?}'"));
        }
        Ok(Self {
            scheme: value.scheme().unwrap_or(&Scheme::HTTP).to_string(),
            host,
            port: value.port_u16().unwrap_or(80),
        })
    }
}

#[cfg(test)]
mod tests {
    use http::Uri;

    use super::Endpoint;

    #[test]
    fn localhost() {
        let endpoint = Endpoint::localhost(4117);
        assert_eq!(endpoint.scheme, "http");
        assert_eq!(endpoint.host(), "127.0.0.1");
        assert_eq!(endpoint.port(), 4117);
    }

    #[test]
    fn try_from_uri() {
        let uri = Uri::from_static("https://locks.internal:9999");
        let endpoint = Endpoint::try_from(uri).unwrap();
        assert_eq!(endpoint.scheme, "https");
        assert_eq!(endpoint.host(), "locks.internal");
        assert_eq!(endpoint.port(), 9999);
    }

    #[test]
    fn try_from_defaults() {
        let uri = Uri::from_static("locks.internal");
        let endpoint = Endpoint::try_from(uri).unwrap();
        assert_eq!(endpoint.scheme, "http");
        assert_eq!(endpoint.port(), 80);
    }

    #[test]
    fn try_from_rejects_missing_host() {
        let uri = Uri::from_static("/:9999/acquire");
        let err = Endpoint::try_from(uri).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot parse endpoint host from URI '/:9999/acquire'"
        );
    }

    #[test]
    fn url_joins_path() {
        let endpoint = Endpoint::localhost(4117);
        assert_eq!(endpoint.url("/acquire"), "http://127.0.0.1:4117/acquire");
        assert_eq!(endpoint.to_authority(), "127.0.0.1:4117");
    }
}
