//! Test doubles shared by the worker, registration and push tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::host::WorkerHost;
use crate::http::{Request, Response, ResponseKind};
use crate::network::Network;
use crate::push::Notification;

type Responder = Box<dyn Fn(&Request) -> Option<Response> + Send + Sync>;

/// A network with scripted responses. Unscripted URLs fail as if offline.
#[derive(Default)]
pub struct MockNetwork {
    routes: Mutex<HashMap<(Method, Url), Response>>,
    responder: Mutex<Option<Responder>>,
    gates: Mutex<HashMap<Url, Arc<Notify>>>,
    offline: Mutex<bool>,
    calls: Mutex<Vec<(Method, Url)>>,
    bodies: Mutex<Vec<bytes::Bytes>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `body` with status 200 for GET `url`.
    pub fn serve(&self, url: &str, body: &str) {
        self.route(Method::GET, url, Response::new(StatusCode::OK, body.to_string()));
    }

    pub fn route(&self, method: Method, url: &str, response: Response) {
        self.routes
            .lock()
            .unwrap()
            .insert((method, Url::parse(url).unwrap()), response);
    }

    /// Answers every request `responder` returns `Some` for, ahead of the
    /// fixed routes.
    pub fn respond_with(
        &self,
        responder: impl Fn(&Request) -> Option<Response> + Send + Sync + 'static,
    ) {
        *self.responder.lock().unwrap() = Some(Box::new(responder));
    }

    /// Holds every fetch of `url` until the returned handle is notified.
    pub fn gate(&self, url: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(Url::parse(url).unwrap(), Arc::clone(&gate));
        gate
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap() = offline;
    }

    pub fn calls(&self) -> Vec<(Method, Url)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn bodies(&self) -> Vec<bytes::Bytes> {
        self.bodies.lock().unwrap().clone()
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        self.calls
            .lock()
            .unwrap()
            .push((request.method.clone(), request.url.clone()));
        self.bodies.lock().unwrap().push(request.body.clone());
        let gate = self.gates.lock().unwrap().get(&request.url).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if *self.offline.lock().unwrap() {
            return Err(Error::Network("offline".to_string()));
        }
        if let Some(response) = self.responder.lock().unwrap().as_ref().and_then(|f| f(request)) {
            return Ok(response);
        }
        self.routes
            .lock()
            .unwrap()
            .get(&(request.method.clone(), request.url.clone()))
            .cloned()
            .ok_or_else(|| Error::Network(format!("no route to {}", request.url)))
    }
}

/// Builds a basic 200 response.
pub fn ok(body: &str) -> Response {
    Response::new(StatusCode::OK, body.to_string()).with_kind(ResponseKind::Basic)
}

/// A host that records every callback.
#[derive(Default)]
pub struct RecordingHost {
    skip_waiting: AtomicUsize,
    claims: AtomicUsize,
    fail_claim: Mutex<bool>,
    notifications: Mutex<Vec<Notification>>,
    closed: Mutex<Vec<Uuid>>,
    windows: Mutex<Vec<Url>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_claim() -> Self {
        let host = Self::default();
        *host.fail_claim.lock().unwrap() = true;
        host
    }

    pub fn skip_waiting_calls(&self) -> usize {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    pub fn claim_calls(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn closed(&self) -> Vec<Uuid> {
        self.closed.lock().unwrap().clone()
    }

    pub fn windows(&self) -> Vec<Url> {
        self.windows.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerHost for RecordingHost {
    async fn skip_waiting(&self) -> Result<()> {
        self.skip_waiting.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn claim_clients(&self) -> Result<usize> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        if *self.fail_claim.lock().unwrap() {
            return Err(Error::Host("claim refused".to_string()));
        }
        Ok(1)
    }

    async fn show_notification(&self, notification: &Notification) -> Result<()> {
        self.notifications.lock().unwrap().push(notification.clone());
        Ok(())
    }

    async fn close_notification(&self, id: Uuid) -> Result<()> {
        self.closed.lock().unwrap().push(id);
        Ok(())
    }

    async fn open_window(&self, url: &Url) -> Result<()> {
        self.windows.lock().unwrap().push(url.clone());
        Ok(())
    }
}
