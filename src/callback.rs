//! Loopback listener receiving the browser-posted `SAMLResponse`.
//!
//! The IdP's final page auto-submits a form to `http://127.0.0.1:35001/`. The
//! assertion is URL-escaped and handed to the worker through a bounded queue.

use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use log::{debug, info, warn};
use tiny_http::{Header, Method, Request, Response, Server};

use crate::error::{AppError, Result};

/// Largest form body accepted; real assertions stay well below this.
const MAX_BODY: u64 = 4 * 1024 * 1024;

const DONE_PAGE: &str =
    "<html><body><h2>VPN auth complete. You can close this tab.</h2></body></html>";

#[derive(Debug, PartialEq)]
enum Reply {
    /// Anything but POST.
    WrongMethod(String),
    /// POST without a usable `SAMLResponse`.
    Empty,
    /// Body over `MAX_BODY`.
    TooLarge,
    /// URL-escaped assertion ready for the worker.
    Accepted(String),
}

// ── Request parsing ───────────────────────────────────────────────────────────

fn extract_saml_from_form(body: &[u8]) -> Option<String> {
    url::form_urlencoded::parse(body)
        .find(|(key, _)| key == "SAMLResponse")
        .map(|(_, val)| val.into_owned())
        .filter(|val| !val.is_empty())
}

fn extract_saml_from_query(url_str: &str) -> Option<String> {
    let (_, query) = url_str.split_once('?')?;
    extract_saml_from_form(query.as_bytes())
}

/// Query-string escaping with Go's unreserved set: `~` stays literal and `*`
/// is percent-encoded, unlike the WHATWG form set.
fn query_escape(value: &str) -> String {
    let escaped: String = url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
    // A literal `%` is always escaped to `%25`, so `%7E` can only be a `~`.
    escaped.replace('*', "%2A").replace("%7E", "~")
}

/// `None` when the body is larger than `limit`.
fn read_body(reader: impl Read, limit: u64) -> std::io::Result<Option<Vec<u8>>> {
    let mut body = Vec::new();
    reader.take(limit + 1).read_to_end(&mut body)?;
    Ok((body.len() as u64 <= limit).then_some(body))
}

fn classify(method: &Method, url: &str, body: &[u8]) -> Reply {
    if *method != Method::Post {
        return Reply::WrongMethod(method.to_string());
    }
    match extract_saml_from_form(body).or_else(|| extract_saml_from_query(url)) {
        Some(saml) => Reply::Accepted(query_escape(&saml)),
        None => Reply::Empty,
    }
}

// ── Server ────────────────────────────────────────────────────────────────────

pub struct CallbackServer {
    server: Arc<Server>,
    assertions: Sender<String>,
}

/// Keeps the listener thread alive; `shutdown` stops accepting and joins it.
pub struct CallbackHandle {
    server: Arc<Server>,
    thread: JoinHandle<()>,
}

impl CallbackServer {
    pub fn bind(addr: &str, assertions: Sender<String>) -> Result<Self> {
        let server = Server::http(addr)
            .map_err(|e| AppError::Callback(format!("Cannot bind SAML listener on {}: {}", addr, e)))?;
        Ok(Self { server: Arc::new(server), assertions })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    pub fn spawn(self) -> Result<CallbackHandle> {
        if let Some(addr) = self.local_addr() {
            info!("Starting HTTP server at {}", addr);
        }
        let server = Arc::clone(&self.server);
        let thread = thread::Builder::new()
            .name("saml-callback".into())
            .spawn(move || self.serve())?;
        Ok(CallbackHandle { server, thread })
    }

    fn serve(self) {
        for request in self.server.incoming_requests() {
            let tx = self.assertions.clone();
            let spawned = thread::Builder::new()
                .name("saml-request".into())
                .spawn(move || handle_request(request, &tx));
            if let Err(e) = spawned {
                warn!("Cannot spawn request handler: {}", e);
            }
        }
        debug!("SAML listener stopped");
    }
}

impl CallbackHandle {
    pub fn shutdown(self) {
        self.server.unblock();
        let _ = self.thread.join();
    }
}

fn handle_request(mut request: Request, assertions: &Sender<String>) {
    let reply = match read_body(request.as_reader(), MAX_BODY) {
        Ok(Some(body)) => classify(request.method(), request.url(), &body),
        Ok(None) => Reply::TooLarge,
        Err(e) => {
            warn!("Cannot read callback body: {}", e);
            classify(request.method(), request.url(), &[])
        }
    };

    match reply {
        Reply::WrongMethod(method) => {
            respond(
                request,
                405,
                "text/plain; charset=utf-8",
                format!("Error: POST method expected, {} received", method),
            );
        }
        Reply::TooLarge => {
            warn!("Callback body exceeds {} bytes, discarded", MAX_BODY);
            respond(request, 413, "text/plain; charset=utf-8", "Error: request body too large".to_string());
        }
        Reply::Empty => {
            warn!("SAMLResponse field is empty or doesn't exist");
            respond_empty(request);
        }
        Reply::Accepted(saml) => {
            info!("Got SAMLResponse field ({} chars)", saml.len());
            if assertions.send(saml).is_err() {
                warn!("Worker is gone, dropping SAMLResponse");
            }
            respond(request, 200, "text/html; charset=utf-8", DONE_PAGE.to_string());
        }
    }
}

fn respond(request: Request, status: u16, content_type: &str, body: String) {
    let mut response = Response::from_string(body).with_status_code(status);
    if let Ok(header) = Header::from_bytes("Content-Type", content_type) {
        response.add_header(header);
    }
    if let Err(e) = request.respond(response) {
        debug!("Callback response not delivered: {}", e);
    }
}

fn respond_empty(request: Request) {
    if let Err(e) = request.respond(Response::empty(200)) {
        debug!("Callback response not delivered: {}", e);
    }
}
