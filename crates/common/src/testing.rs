//! In-memory [`HttpTransport`] for tests.
//!
//! Responses are scripted per method and URL substring. Each route hands out its
//! responses in order and keeps repeating the last one once the rest are used.
//! Every request is recorded for later assertions.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::http::{HttpResponse, HttpTransport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<serde_json::Value>,
}

struct Route {
    method: Method,
    pattern: String,
    responses: VecDeque<Result<HttpResponse, TransportError>>,
}

#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// A 200 response carrying `value` as its JSON body.
pub fn json_ok(value: serde_json::Value) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse::new(200, value.to_string()))
}

/// A bare response with the given status.
pub fn status(code: u16) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse::new(code, ""))
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_get(
        self,
        pattern: &str,
        responses: Vec<Result<HttpResponse, TransportError>>,
    ) -> Self {
        self.route(Method::Get, pattern, responses)
    }

    pub fn on_post(
        self,
        pattern: &str,
        responses: Vec<Result<HttpResponse, TransportError>>,
    ) -> Self {
        self.route(Method::Post, pattern, responses)
    }

    fn route(
        self,
        method: Method,
        pattern: &str,
        responses: Vec<Result<HttpResponse, TransportError>>,
    ) -> Self {
        self.routes.lock().unwrap().push(Route {
            method,
            pattern: pattern.to_string(),
            responses: responses.into(),
        });
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests of `method` whose URL contains `pattern`.
    pub fn count(&self, method: Method, pattern: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.url.contains(pattern))
            .count()
    }

    /// JSON bodies POSTed to URLs containing `pattern`, in send order.
    pub fn posted(&self, pattern: &str) -> Vec<serde_json::Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == Method::Post && r.url.contains(pattern))
            .filter_map(|r| r.body.clone())
            .collect()
    }

    fn respond(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            method,
            url: url.to_string(),
            body,
        });

        let mut routes = self.routes.lock().unwrap();
        let Some(route) = routes
            .iter_mut()
            .find(|r| r.method == method && url.contains(&r.pattern) && !r.responses.is_empty())
        else {
            return Ok(HttpResponse::new(404, format!("no scripted route for {url}")));
        };

        if route.responses.len() > 1 {
            route.responses.pop_front().expect("checked non-empty")
        } else {
            route.responses[0].clone()
        }
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        self.respond(Method::Get, url, None)
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<HttpResponse, TransportError> {
        self.respond(Method::Post, url, Some(body.clone()))
    }
}
