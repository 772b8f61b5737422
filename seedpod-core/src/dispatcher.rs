//! Operation dispatcher: one reply endpoint, one request handled at a time.
//!
//! Connections are accepted and read on background tasks, but every decoded
//! request is funneled into a single loop that owns the [`Service`]. Each
//! request gets exactly one response: the connection task waits on a oneshot
//! reply before it reads the next frame, and the loop always produces a
//! [`Response`] value, so no handler path can skip or double the reply.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

use crate::error::OpError;
use crate::protocol::{find_operation, Operation, Request, Response, Status};
use crate::wire::{self, ReadFrame};

const INBOUND_QUEUE: usize = 64;

/// Request handlers of one process role.
#[async_trait]
pub trait Service: Send {
    /// Static operation table. Requests naming anything else get a 500.
    fn operations(&self) -> &'static [Operation];

    /// Handle one request whose name is in the operation table. Required keys
    /// may be missing; the handler decides whether that is an error.
    async fn handle(&mut self, request: Request) -> Response;

    /// Called when the receive timeout expires with no request pending.
    async fn on_idle(&mut self) {}
}

struct Inbound {
    peer: SocketAddr,
    request: Result<Request, OpError>,
    reply: oneshot::Sender<Response>,
}

pub struct Dispatcher {
    listener: TcpListener,
    receive_timeout: Option<Duration>,
}

impl Dispatcher {
    /// Bind the reply endpoint. `receive_timeout` drives [`Service::on_idle`].
    pub async fn bind(addr: SocketAddr, receive_timeout: Option<Duration>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "dispatcher listening");
        Ok(Self {
            listener,
            receive_timeout,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve forever.
    pub async fn run<S: Service>(self, service: &mut S) {
        self.run_until(service, std::future::pending::<()>()).await
    }

    /// Serve until `shutdown` resolves. A request already being handled is
    /// answered before returning.
    pub async fn run_until<S, F>(self, service: &mut S, shutdown: F)
    where
        S: Service,
        F: Future<Output = ()>,
    {
        let (tx, mut rx) = mpsc::channel::<Inbound>(INBOUND_QUEUE);
        let acceptor = tokio::spawn(accept_loop(self.listener, tx));
        tokio::pin!(shutdown);

        loop {
            let next = tokio::select! {
                _ = &mut shutdown => break,
                next = receive(&mut rx, self.receive_timeout) => next,
            };
            match next {
                Received::Request(inbound) => {
                    let response = dispatch(service, inbound.request).await;
                    if inbound.reply.send(response).is_err() {
                        tracing::debug!(peer = %inbound.peer, "peer left before reply");
                    }
                }
                Received::Timeout => service.on_idle().await,
                Received::Closed => break,
            }
        }
        acceptor.abort();
    }
}

enum Received {
    Request(Inbound),
    Timeout,
    Closed,
}

async fn receive(rx: &mut mpsc::Receiver<Inbound>, timeout: Option<Duration>) -> Received {
    let next = match timeout {
        Some(t) => match tokio::time::timeout(t, rx.recv()).await {
            Ok(next) => next,
            Err(_) => return Received::Timeout,
        },
        None => rx.recv().await,
    };
    match next {
        Some(inbound) => Received::Request(inbound),
        None => Received::Closed,
    }
}

/// Produce the single response for one received envelope.
async fn dispatch<S: Service>(service: &mut S, request: Result<Request, OpError>) -> Response {
    let request = match request {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "rejecting envelope");
            return Response::from_error(&e);
        }
    };
    let Some(operation) = find_operation(service.operations(), &request.operation) else {
        tracing::warn!(operation = %request.operation, "operation not found");
        return Response::from_error(&OpError::UnknownOperation(request.operation));
    };
    let missing = operation.missing_args(&request.args);
    if !missing.is_empty() {
        tracing::debug!(operation = operation.name, ?missing, "request lacks required args");
    }
    tracing::debug!(operation = operation.name, "dispatching");
    let response = service.handle(request).await;
    if response.status != Status::Ok {
        tracing::debug!(operation = operation.name, status = response.status.code(), "request failed");
    }
    response
}

async fn accept_loop(listener: TcpListener, tx: mpsc::Sender<Inbound>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(serve_connection(stream, peer, tx.clone()));
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Read a request, wait for its response, write it; repeat.
async fn serve_connection(mut stream: TcpStream, peer: SocketAddr, tx: mpsc::Sender<Inbound>) {
    loop {
        let request = match wire::read_frame::<_, Request>(&mut stream).await {
            Ok(ReadFrame::Message(r)) => Ok(r),
            Ok(ReadFrame::Malformed(e)) => Err(OpError::from(e)),
            Ok(ReadFrame::Closed) => break,
            Err(e) => {
                tracing::debug!(%peer, error = %e, "connection read failed");
                break;
            }
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        let inbound = Inbound {
            peer,
            request,
            reply: reply_tx,
        };
        if tx.send(inbound).await.is_err() {
            break;
        }
        let response = match reply_rx.await {
            Ok(r) => r,
            Err(_) => break,
        };
        let frame = match wire::encode_frame(&response) {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(%peer, error = %e, "cannot encode response");
                let fallback = Response::text(Status::InternalError, e.to_string());
                match wire::encode_frame(&fallback) {
                    Ok(f) => f,
                    Err(_) => break,
                }
            }
        };
        if let Err(e) = wire::write_frame(&mut stream, &frame).await {
            tracing::debug!(%peer, error = %e, "connection write failed");
            break;
        }
    }
}
