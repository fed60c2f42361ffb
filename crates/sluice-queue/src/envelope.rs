//! Request and response envelopes.
//!
//! A `RequestEnvelope` is one unit of queued work plus a write-once result
//! slot. The slot is filled by whichever side wins the race for the envelope
//! (a worker on success, the sweeper on expiry) and the waiting submitter is
//! woken through the envelope's completion signal.

use std::fmt;
use std::sync::OnceLock;

use tokio::sync::Notify;
use tokio::time::Instant;

/// Message attached to every expiry response.
pub const TIMEOUT_MESSAGE: &str = "request timed out";

/// Outcome of a request, modelled on HTTP status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseStatus {
    Success,
    RequestTimeout,
    InternalError,
}

impl ResponseStatus {
    /// Numeric HTTP-style code.
    pub fn code(self) -> u16 {
        match self {
            ResponseStatus::Success => 200,
            ResponseStatus::RequestTimeout => 408,
            ResponseStatus::InternalError => 500,
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseStatus::Success => "success",
            ResponseStatus::RequestTimeout => "request_timeout",
            ResponseStatus::InternalError => "internal_error",
        };
        write!(f, "{} {}", self.code(), name)
    }
}

/// Result delivered to a submitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope<Resp> {
    pub status: ResponseStatus,
    pub message: String,
    /// Handler output. Present only on success.
    pub data: Option<Resp>,
}

impl<Resp> ResponseEnvelope<Resp> {
    pub fn success(data: Resp) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: String::new(),
            data: Some(data),
        }
    }

    pub fn timeout() -> Self {
        Self {
            status: ResponseStatus::RequestTimeout,
            message: TIMEOUT_MESSAGE.to_string(),
            data: None,
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::InternalError,
            message: message.into(),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

/// One in-flight request.
pub struct RequestEnvelope<Req, Resp> {
    id: String,
    payload: Req,
    created_at: Instant,
    response: OnceLock<ResponseEnvelope<Resp>>,
    completion: Notify,
}

impl<Req, Resp> RequestEnvelope<Req, Resp> {
    pub fn new(payload: Req) -> Self {
        Self {
            id: new_request_id(),
            payload,
            created_at: Instant::now(),
            response: OnceLock::new(),
            completion: Notify::new(),
        }
    }

    /// Process-unique id: 128 random bits, hex-encoded.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn payload(&self) -> &Req {
        &self.payload
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// True once the envelope has been waiting at least `threshold`.
    pub fn is_expired(&self, threshold: std::time::Duration) -> bool {
        self.created_at.elapsed() >= threshold
    }

    /// The response, if one has been attached.
    pub fn response(&self) -> Option<&ResponseEnvelope<Resp>> {
        self.response.get()
    }

    /// Attach a response. Only the first call succeeds; later calls return
    /// false and leave the slot untouched.
    pub fn respond(&self, response: ResponseEnvelope<Resp>) -> bool {
        self.response.set(response).is_ok()
    }

    /// Wake the waiting submitter. Safe to call before the wait starts and
    /// safe to call more than once; repeated signals collapse into one.
    pub fn signal(&self) {
        self.completion.notify_one();
    }

    /// Wait until a response is attached.
    ///
    /// A signal without a response (a faulted handler) does not end the
    /// wait; the submitter keeps waiting for the expiry sweep.
    pub async fn wait(&self) -> &ResponseEnvelope<Resp> {
        loop {
            if let Some(response) = self.response.get() {
                return response;
            }
            self.completion.notified().await;
        }
    }
}

impl<Req, Resp> fmt::Debug for RequestEnvelope<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestEnvelope")
            .field("id", &self.id)
            .field("age", &self.created_at.elapsed())
            .field("responded", &self.response.get().is_some())
            .finish()
    }
}

fn new_request_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}
