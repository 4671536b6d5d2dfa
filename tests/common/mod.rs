//! Shared test support: a scripted transport and DTO builders.
#![allow(dead_code)]

use lobsync::dto::{PersistentObjectAttributeDto, PersistentObjectDto};
use lobsync::service::transport::ByteStream;
use lobsync::{
    DefaultServiceHooks, HttpRequest, HttpResponse, HttpTransport, Service, ServiceConfig,
    ServiceHooks,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

type RequestObserver = Box<dyn Fn(&HttpRequest) + Send + Sync>;

struct ScriptedResponse {
    response: HttpResponse,
    gate: Option<Arc<tokio::sync::Notify>>,
}

/// Transport that replays scripted responses and records every request.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
    observer: Mutex<Option<RequestObserver>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_response(&self, response: HttpResponse) {
        self.responses
            .lock()
            .expect("poisoned")
            .push_back(ScriptedResponse { response, gate: None });
    }

    pub fn push_json(&self, body: serde_json::Value) {
        self.push_response(HttpResponse::ok(body.to_string().into_bytes()));
    }

    /// Scripts a response that is only delivered once the returned gate is
    /// notified; the request stays in flight until then.
    pub fn push_gated_json(&self, body: serde_json::Value) -> Arc<tokio::sync::Notify> {
        let gate = Arc::new(tokio::sync::Notify::new());
        self.responses.lock().expect("poisoned").push_back(ScriptedResponse {
            response: HttpResponse::ok(body.to_string().into_bytes()),
            gate: Some(gate.clone()),
        });
        gate
    }

    pub fn push_status(&self, status: u16, headers: &[(&str, &str)]) {
        self.push_response(HttpResponse {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.to_string()))
                .collect(),
            body: Vec::new(),
        });
    }

    fn pop_scripted(&self) -> Option<ScriptedResponse> {
        self.responses.lock().expect("poisoned").pop_front()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("poisoned").clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("poisoned").len()
    }

    pub fn set_observer<F>(&self, observer: F)
    where
        F: Fn(&HttpRequest) + Send + Sync + 'static,
    {
        *self.observer.lock().expect("poisoned") = Some(Box::new(observer));
    }

    /// The JSON body of the nth recorded request.
    pub fn request_body(&self, index: usize) -> serde_json::Value {
        match &self.requests()[index].body {
            Some(lobsync::HttpBody::Json(json)) => json.clone(),
            Some(lobsync::HttpBody::Multipart { data, .. }) => data.clone(),
            None => serde_json::Value::Null,
        }
    }
}

#[async_trait::async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> lobsync::Result<HttpResponse> {
        if let Some(observer) = &*self.observer.lock().expect("poisoned") {
            observer(&request);
        }
        self.requests.lock().expect("poisoned").push(request);

        match self.pop_scripted() {
            Some(scripted) => {
                if let Some(gate) = scripted.gate {
                    gate.notified().await;
                }
                Ok(scripted.response)
            }
            None => Ok(HttpResponse::ok(b"{}".to_vec())),
        }
    }

    async fn send_streaming(&self, request: HttpRequest) -> lobsync::Result<ByteStream> {
        self.requests.lock().expect("poisoned").push(request);
        let chunks: Vec<lobsync::Result<Vec<u8>>> = Vec::new();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

pub fn service_with(transport: Arc<MockTransport>) -> Arc<Service> {
    service_with_hooks(transport, Arc::new(DefaultServiceHooks::new()))
}

pub fn service_with_hooks(
    transport: Arc<MockTransport>,
    hooks: Arc<dyn ServiceHooks>,
) -> Arc<Service> {
    Service::with_collaborators(
        ServiceConfig::new("https://backend.example.com"),
        hooks,
        transport,
        None,
    )
}

pub fn attribute_dto(id: &str, name: &str, type_name: &str) -> PersistentObjectAttributeDto {
    PersistentObjectAttributeDto {
        id: id.to_string(),
        name: name.to_string(),
        type_name: type_name.to_string(),
        label: name.to_string(),
        visibility: Some("Always".to_string()),
        ..Default::default()
    }
}

pub fn object_dto(attributes: Vec<PersistentObjectAttributeDto>) -> PersistentObjectDto {
    PersistentObjectDto {
        id: "po-type".to_string(),
        type_name: "Customer".to_string(),
        label: "Customer".to_string(),
        object_id: Some("42".to_string()),
        actions: vec!["Edit".to_string(), "Save".to_string()],
        attributes,
        ..Default::default()
    }
}
