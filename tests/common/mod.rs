//! Shared helpers for integration tests: throwaway HTTP servers on
//! `127.0.0.1:0` that record what they receive.

#![allow(dead_code)]

use cas_gateway::http::parser::{ParseError, parse_http_request};
use cas_gateway::http::request::Request;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use url::Url;

pub const SESSION_KEY: &str = "0123456789abcdef0123456789abcdef";

type Handler = Arc<dyn Fn(&Request) -> Vec<u8> + Send + Sync>;

/// A backend that answers every request with the bytes its handler returns
pub struct MockBackend {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Request>>>,
    closed: Arc<AtomicUsize>,
}

impl MockBackend {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&Request) -> Vec<u8> + Send + Sync + 'static,
    {
        Self::spawn(Some(Arc::new(handler)), Duration::ZERO).await
    }

    /// Like [`MockBackend::start`], but waits `delay` before answering
    pub async fn start_delayed<F>(delay: Duration, handler: F) -> Self
    where
        F: Fn(&Request) -> Vec<u8> + Send + Sync + 'static,
    {
        Self::spawn(Some(Arc::new(handler)), delay).await
    }

    /// Accepts connections and reads requests but never answers
    pub async fn start_silent() -> Self {
        Self::spawn(None, Duration::ZERO).await
    }

    async fn spawn(handler: Option<Handler>, delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicUsize::new(0));

        let recorded = Arc::clone(&requests);
        let closed_by_peer = Arc::clone(&closed);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let handler = handler.clone();
                let recorded = Arc::clone(&recorded);
                let closed_by_peer = Arc::clone(&closed_by_peer);
                tokio::spawn(async move {
                    serve_one(socket, handler, delay, recorded, closed_by_peer).await;
                });
            }
        });

        Self {
            addr,
            requests,
            closed,
        }
    }

    /// Connections the peer closed before getting an answer
    pub fn closed_by_peer(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).unwrap()
    }

    pub async fn requests(&self) -> Vec<Request> {
        self.requests.lock().await.clone()
    }

    pub async fn last_request(&self) -> Option<Request> {
        self.requests.lock().await.last().cloned()
    }
}

async fn serve_one(
    mut socket: TcpStream,
    handler: Option<Handler>,
    delay: Duration,
    recorded: Arc<Mutex<Vec<Request>>>,
    closed: Arc<AtomicUsize>,
) {
    let mut buffer = Vec::new();
    let request = loop {
        match parse_http_request(&buffer) {
            Ok((request, _)) => break request,
            Err(ParseError::Incomplete) => {}
            Err(_) => return,
        }
        let mut chunk = [0u8; 4096];
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
        }
    };

    recorded.lock().await.push(request.clone());

    match handler {
        Some(handler) => {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let bytes = handler(&request);
            let _ = socket.write_all(&bytes).await;
            let _ = socket.shutdown().await;
        }
        None => {
            // Hold the connection open until the peer gives up
            let mut sink = [0u8; 1024];
            while matches!(socket.read(&mut sink).await, Ok(n) if n > 0) {}
            closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A complete `Connection: close` response with a Content-Length
pub fn raw_response(status: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {}\r\n", status);
    for (k, v) in headers {
        out.push_str(&format!("{}: {}\r\n", k, v));
    }
    out.push_str(&format!("Content-Length: {}\r\nConnection: close\r\n\r\n", body.len()));

    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(body);
    bytes
}

/// A CAS 2.0/3.0 XML success document
pub fn cas_xml_success(user: &str, attributes: &[(&str, &str)]) -> String {
    let attrs: String = attributes
        .iter()
        .map(|(k, v)| format!("<cas:{k}>{v}</cas:{k}>"))
        .collect();
    format!(
        "<cas:serviceResponse xmlns:cas=\"http://www.yale.edu/tp/cas\">\
           <cas:authenticationSuccess>\
             <cas:user>{user}</cas:user>\
             <cas:attributes>{attrs}</cas:attributes>\
           </cas:authenticationSuccess>\
         </cas:serviceResponse>"
    )
}

/// A CAS XML failure document
pub fn cas_xml_failure(code: &str, description: &str) -> String {
    format!(
        "<cas:serviceResponse xmlns:cas=\"http://www.yale.edu/tp/cas\">\
           <cas:authenticationFailure code=\"{code}\">{description}</cas:authenticationFailure>\
         </cas:serviceResponse>"
    )
}

/// A port nothing is listening on
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
