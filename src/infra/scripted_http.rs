use crate::app::ports::{HttpClientPort, HttpGetResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// In-memory HTTP client for development/testing.
///
/// Replies are served in the order they were queued; once the queue is empty
/// the fallback reply (if any) is repeated. Every request is recorded.
#[derive(Clone, Default)]
pub struct ScriptedHttp {
    inner: Arc<Mutex<Script>>,
}

#[derive(Default)]
struct Script {
    replies: VecDeque<Result<HttpGetResult, String>>,
    fallback: Option<Result<HttpGetResult, String>>,
    requests: Vec<RecordedRequest>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl ScriptedHttp {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reply_json(self, status: u16, body: serde_json::Value) -> Self {
        self.push(Ok(json_response(status, &body)));
        self
    }

    pub fn reply_status(self, status: u16, body: &str) -> Self {
        self.push(Ok(HttpGetResult {
            status,
            bytes: body.as_bytes().to_vec(),
            content_type: "text/plain".to_string(),
        }));
        self
    }

    pub fn reply_transport_error(self, message: &str) -> Self {
        self.push(Err(message.to_string()));
        self
    }

    /// Reply used whenever the queue is exhausted.
    pub fn otherwise_json(self, status: u16, body: serde_json::Value) -> Self {
        self.lock().fallback = Some(Ok(json_response(status, &body)));
        self
    }

    fn push(&self, reply: Result<HttpGetResult, String>) {
        self.lock().replies.push_back(reply);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }
}

fn json_response(status: u16, body: &serde_json::Value) -> HttpGetResult {
    HttpGetResult {
        status,
        bytes: body.to_string().into_bytes(),
        content_type: "application/json".to_string(),
    }
}

#[async_trait]
impl HttpClientPort for ScriptedHttp {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpGetResult, String> {
        let mut script = self.lock();
        script.requests.push(RecordedRequest {
            url: url.to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
        match script.replies.pop_front() {
            Some(reply) => reply,
            None => script
                .fallback
                .clone()
                .unwrap_or_else(|| Err("no scripted reply left".to_string())),
        }
    }
}
