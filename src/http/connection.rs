use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use crate::gateway::Gateway;
use crate::http::parser::{ParseError, parse_http_request};
use crate::http::request::{Method, Request};
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;

pub struct Connection {
    stream: TcpStream,
    peer: Option<SocketAddr>,
    buffer: Vec<u8>,
    state: ConnectionState,
    gateway: Arc<Gateway>,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter, bool), // bool = keep_alive?
    Closed,
}

/// What reading from the client produced
enum ReadOutcome {
    Request(Request),
    Malformed(ParseError),
    Eof,
}

impl Connection {
    pub fn new(stream: TcpStream, gateway: Arc<Gateway>) -> Self {
        let peer = stream.peer_addr().ok();
        Self {
            stream,
            peer,
            buffer: Vec::with_capacity(4096),
            state: ConnectionState::Reading,
            gateway,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            let state = std::mem::replace(&mut self.state, ConnectionState::Closed);

            self.state = match state {
                ConnectionState::Reading => match self.read_request().await? {
                    ReadOutcome::Request(mut req) => {
                        req.remote_addr = self.peer;
                        ConnectionState::Processing(req)
                    }
                    ReadOutcome::Malformed(e) => {
                        tracing::warn!(peer = ?self.peer, error = ?e, "Malformed request");
                        let response = Response::bad_request();
                        ConnectionState::Writing(ResponseWriter::new(&with_close(response)), false)
                    }
                    ReadOutcome::Eof => ConnectionState::Closed,
                },

                ConnectionState::Processing(req) => {
                    let keep_alive = req.keep_alive();
                    let is_head = req.method == Method::HEAD;
                    let gateway = Arc::clone(&self.gateway);

                    // Dropping the gateway future cancels its CAS/backend calls
                    let response = tokio::select! {
                        response = gateway.handle(req) => Some(response),
                        _ = client_gone(&self.stream) => None,
                    };

                    match response {
                        Some(mut response) => {
                            if is_head {
                                response.body.clear();
                            }
                            let response = if keep_alive { response } else { with_close(response) };
                            ConnectionState::Writing(ResponseWriter::new(&response), keep_alive)
                        }
                        None => {
                            tracing::info!(peer = ?self.peer, "Client disconnected, request abandoned");
                            ConnectionState::Closed
                        }
                    }
                }

                ConnectionState::Writing(mut writer, keep_alive) => {
                    writer.write_to_stream(&mut self.stream).await?;

                    if keep_alive {
                        ConnectionState::Reading // go back for next request
                    } else {
                        ConnectionState::Closed
                    }
                }

                ConnectionState::Closed => break,
            };
        }

        Ok(())
    }

    async fn read_request(&mut self) -> anyhow::Result<ReadOutcome> {
        loop {
            // Try parsing whatever we already have
            match parse_http_request(&self.buffer) {
                Ok((request, consumed)) => {
                    // Remove consumed bytes
                    self.buffer.drain(..consumed);
                    return Ok(ReadOutcome::Request(request));
                }

                Err(ParseError::Incomplete) => {
                    // Need more data → fall through to read
                }

                Err(e) => return Ok(ReadOutcome::Malformed(e)),
            }

            // Read more data
            let mut temp = [0u8; 4096];
            let n = self.stream.read(&mut temp).await?;

            if n == 0 {
                // Client closed connection
                return Ok(ReadOutcome::Eof);
            }

            self.buffer.extend_from_slice(&temp[..n]);
        }
    }
}

fn with_close(mut response: Response) -> Response {
    response.headers.insert("Connection", "close");
    response
}

/// Resolves once the client has closed its side of the connection.
///
/// Pipelined bytes are left in the socket for the next read.
async fn client_gone(stream: &TcpStream) {
    let mut byte = [0u8; 1];
    match stream.peek(&mut byte).await {
        Ok(0) | Err(_) => {}
        Ok(_) => std::future::pending::<()>().await,
    }
}
