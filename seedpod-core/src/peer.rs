//! Peer client: calls another process's dispatcher over one reusable connection.

use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;
use tokio::net::TcpStream;

use crate::error::OpError;
use crate::protocol::{Payload, Request, Response};
use crate::wire::{self, ReadFrame};

/// Timeouts and retry budget for outbound calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Extra attempts after the first failure.
    pub retries: u32,
    /// Delay before the first retry; doubles each time.
    pub backoff: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
            retries: 2,
            backoff: Duration::from_millis(250),
        }
    }
}

impl CallPolicy {
    /// Single short attempt, used for liveness checks.
    pub fn single_attempt(timeout: Duration) -> Self {
        Self {
            connect_timeout: timeout,
            request_timeout: timeout,
            retries: 0,
            backoff: Duration::ZERO,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

pub struct PeerClient {
    addr: SocketAddr,
    policy: CallPolicy,
    stream: Option<TcpStream>,
}

impl PeerClient {
    pub fn new(addr: SocketAddr, policy: CallPolicy) -> Self {
        Self {
            addr,
            policy,
            stream: None,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Send `request` and wait for its response, retrying transport failures.
    /// Exhausted retries yield `OpError::Unreachable`.
    pub async fn call(&mut self, request: &Request) -> Result<Response, OpError> {
        let frame = wire::encode_frame(request)?;
        let mut delay = self.policy.backoff;
        let mut attempt = 0;
        loop {
            match self.exchange(&frame).await {
                Ok(response) => return Ok(response),
                Err(Attempt::Malformed(e)) => {
                    self.stream = None;
                    return Err(e);
                }
                Err(Attempt::Transport(reason)) => {
                    // The connection's alternation state is unknown now.
                    self.stream = None;
                    if attempt >= self.policy.retries {
                        return Err(OpError::Unreachable {
                            addr: self.addr,
                            reason,
                        });
                    }
                    attempt += 1;
                    tracing::warn!(
                        addr = %self.addr,
                        operation = %request.operation,
                        attempt,
                        %reason,
                        "retrying call"
                    );
                    tokio::time::sleep(jitter(delay)).await;
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }

    /// Like [`call`](Self::call) but a non-200 reply becomes `OpError::Remote`.
    pub async fn call_ok(&mut self, request: &Request) -> Result<Payload, OpError> {
        self.call(request).await?.into_result()
    }

    async fn exchange(&mut self, frame: &[u8]) -> Result<Response, Attempt> {
        if self.stream.is_none() {
            let connected =
                tokio::time::timeout(self.policy.connect_timeout, TcpStream::connect(self.addr))
                    .await
                    .map_err(|_| Attempt::Transport("connect timed out".into()))?
                    .map_err(|e| Attempt::Transport(e.to_string()))?;
            self.stream = Some(connected);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(Attempt::Transport("not connected".into()));
        };
        let exchange = async {
            wire::write_frame(stream, frame).await?;
            wire::read_frame::<_, Response>(stream).await
        };
        match tokio::time::timeout(self.policy.request_timeout, exchange).await {
            Err(_) => Err(Attempt::Transport("request timed out".into())),
            Ok(Err(e)) => Err(Attempt::Transport(e.to_string())),
            Ok(Ok(ReadFrame::Closed)) => Err(Attempt::Transport("connection closed".into())),
            Ok(Ok(ReadFrame::Malformed(e))) => Err(Attempt::Malformed(e.into())),
            Ok(Ok(ReadFrame::Message(response))) => Ok(response),
        }
    }
}

enum Attempt {
    Transport(String),
    Malformed(OpError),
}

fn jitter(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }
    let spread = base.as_millis() as u64 / 4;
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}
