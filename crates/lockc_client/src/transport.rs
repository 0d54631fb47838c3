//! Request side of the lock protocol: how acquire and release calls reach
//! the server. The [`Transport`] trait is the seam tests use to substitute
//! the wire with a scripted or in-process server.

use std::time::Duration;

use lockc_proto::{
    AcquireRequest, ClientId, Endpoint, LockId, ReleaseRequest, Status, StatusReply,
    ACQUIRE_PATH, RELEASE_PATH,
};
use serde::Serialize;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Operations a client issues against the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Acquire,
    Release,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("lock server request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("lock server replied {status} to {op:?}")]
    Rejected { op: Op, status: reqwest::StatusCode },
}

pub trait Transport: Send + Sync {
    fn call(&self, op: Op, lid: LockId, client_id: &ClientId)
        -> Result<Status, TransportError>;
}

/// Production transport: JSON over HTTP to the lock server.
pub struct HttpTransport {
    http: reqwest::blocking::Client,
    server: Endpoint,
}

impl HttpTransport {
    pub fn new(server: Endpoint) -> Result<Self, TransportError> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(concat!("lockc-client/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http, server })
    }

    fn post<B: Serialize>(
        &self,
        op: Op,
        path: &str,
        body: &B,
    ) -> Result<Status, TransportError> {
        let response = self.http.post(self.server.url(path)).json(body).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Rejected { op, status });
        }
        let reply: StatusReply = response.json()?;
        Ok(reply.status)
    }
}

impl Transport for HttpTransport {
    fn call(
        &self,
        op: Op,
        lid: LockId,
        client_id: &ClientId,
    ) -> Result<Status, TransportError> {
        match op {
            Op::Acquire => self.post(
                op,
                ACQUIRE_PATH,
                &AcquireRequest {
                    lid,
                    client_id: client_id.clone(),
                },
            ),
            Op::Release => self.post(
                op,
                RELEASE_PATH,
                &ReleaseRequest {
                    lid,
                    client_id: client_id.clone(),
                },
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use http::Uri;
    use mockito::Matcher;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn transport_for(server: &mockito::ServerGuard) -> HttpTransport {
        let endpoint =
            Endpoint::try_from(server.url().parse::<Uri>().unwrap()).unwrap();
        HttpTransport::new(endpoint).unwrap()
    }

    #[test]
    fn acquire_posts_id_and_parses_reply() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/acquire")
            .match_body(Matcher::Json(json!({
                "lid": 7,
                "client_id": "127.0.0.1:4117",
            })))
            .with_body(r#"{"status":"retry"}"#)
            .create();

        let transport = transport_for(&server);
        let status = transport
            .call(Op::Acquire, LockId(7), &ClientId::new("127.0.0.1", 4117))
            .unwrap();

        assert_eq!(status, Status::Retry);
        mock.assert();
    }

    #[test]
    fn release_posts_to_release_path() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/release")
            .match_body(Matcher::Json(json!({
                "lid": 7,
                "client_id": "127.0.0.1:4117",
            })))
            .with_body(r#"{"status":"ok"}"#)
            .create();

        let transport = transport_for(&server);
        let status = transport
            .call(Op::Release, LockId(7), &ClientId::new("127.0.0.1", 4117))
            .unwrap();

        assert_eq!(status, Status::Ok);
        mock.assert();
    }

    #[test]
    fn non_success_reply_is_rejected() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/acquire")
            .with_status(500)
            .create();

        let transport = transport_for(&server);
        let err = transport
            .call(Op::Acquire, LockId(1), &ClientId::new("127.0.0.1", 4117))
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "lock server replied 500 Internal Server Error to Acquire"
        );
    }
}
