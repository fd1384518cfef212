//! Transport contract
//!
//! The lifecycle engine does not speak HTTP itself. It hands a [`Request`]
//! to a [`Transport`] and later receives the matching [`Outcome`] from the
//! host. Payloads are opaque JSON values; their shape is the widget's concern.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use slotmap::new_key_type;

new_key_type! {
    /// Handle identifying an in-flight request
    pub struct RequestId;
}

/// HTTP method, with the body for POST requests
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Method {
    Get,
    Post(Value),
}

impl Method {
    pub fn is_post(&self) -> bool {
        matches!(self, Method::Post(_))
    }
}

/// A request issued by a polling state
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    /// Handle the host passes back when the request completes
    pub id: RequestId,
    pub method: Method,
    pub url: String,
    pub timeout_ms: u64,
    /// Token of the polling cycle that issued the request
    pub token: u64,
}

/// How a request ended
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    /// The server answered with data
    Success(Value),
    /// The server answered with an application-level error
    Error(Value),
    /// No usable answer: timeout or connection failure
    Failure { timed_out: bool, status: u16 },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Transport failure caused by the request timeout
    pub fn timeout() -> Self {
        Outcome::Failure {
            timed_out: true,
            status: 0,
        }
    }

    /// Transport failure with the given status (0 when the connection failed)
    pub fn failure(status: u16) -> Self {
        Outcome::Failure {
            timed_out: false,
            status,
        }
    }
}

/// Sends requests on behalf of the lifecycle engine
pub trait Transport {
    /// Issue a request; the host reports completion separately
    fn send(&mut self, request: Request);

    /// Refresh the authentication token before a request
    ///
    /// Only called when login-based authentication is configured.
    fn refresh_auth(&mut self) {}
}

/// Transport that records requests without sending them
///
/// Useful for tests and for hosts that batch requests themselves.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Vec<Request>,
    auth_refreshes: usize,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request sent so far, oldest first
    pub fn sent(&self) -> &[Request] {
        &self.sent
    }

    /// Most recent request
    pub fn last(&self) -> Option<&Request> {
        self.sent.last()
    }

    /// Take the recorded requests, leaving the log empty
    pub fn take_sent(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.sent)
    }

    /// Number of auth refreshes requested
    pub fn auth_refreshes(&self) -> usize {
        self.auth_refreshes
    }
}

impl Transport for RecordingTransport {
    fn send(&mut self, request: Request) {
        tracing::trace!(url = %request.url, token = request.token, "recorded request");
        self.sent.push(request);
    }

    fn refresh_auth(&mut self) {
        self.auth_refreshes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use slotmap::SlotMap;

    #[test]
    fn test_recording_transport() {
        let mut ids: SlotMap<RequestId, ()> = SlotMap::with_key();
        let mut transport = RecordingTransport::new();

        transport.send(Request {
            id: ids.insert(()),
            method: Method::Get,
            url: "/machines/1".into(),
            timeout_ms: 1_000,
            token: 1,
        });
        transport.refresh_auth();
        transport.send(Request {
            id: ids.insert(()),
            method: Method::Post(json!({ "period": "shift" })),
            url: "/production".into(),
            timeout_ms: 1_000,
            token: 2,
        });

        assert_eq!(transport.sent().len(), 2);
        assert!(transport.last().is_some_and(|r| r.method.is_post()));
        assert_eq!(transport.auth_refreshes(), 1);

        let taken = transport.take_sent();
        assert_eq!(taken[0].url, "/machines/1");
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_outcome_constructors() {
        assert_eq!(
            Outcome::timeout(),
            Outcome::Failure {
                timed_out: true,
                status: 0
            }
        );
        assert!(!Outcome::failure(503).is_success());
        assert!(Outcome::Success(Value::Null).is_success());
    }
}
