use std::{net::SocketAddr, time::Duration};

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::error::{MediaError, Result};

pub async fn bind_loopback() -> Result<TcpListener> {
    Ok(TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?)
}

pub fn tcp_url(port: u16) -> String {
    format!("tcp://127.0.0.1:{}", port)
}

/// Ephemeral loopback listener that hands out exactly one connection. The
/// socket stops listening as soon as that connection is accepted (or the
/// wait is abandoned), so a second producer can never attach.
pub struct SingleAccept {
    listener: TcpListener,
    port: u16,
}

impl SingleAccept {
    pub async fn bind() -> Result<Self> {
        let listener = bind_loopback().await?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        tcp_url(self.port)
    }

    pub async fn accept(self) -> Result<TcpStream> {
        let (stream, peer) = self.listener.accept().await?;
        log::trace!("single accept on {} from {}", self.port, peer);
        Ok(stream)
    }

    /// `Ok(None)` when `cancel` fires first.
    pub async fn accept_until(
        self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<Option<TcpStream>> {
        let port = self.port;
        tokio::select! {
            _ = cancel.cancelled() => Ok(None),
            accepted = tokio::time::timeout(timeout, self.accept()) => match accepted {
                Ok(stream) => stream.map(Some),
                Err(_) => Err(MediaError::Timeout(format!("no connection on port {}", port))),
            },
        }
    }
}

#[cfg(test)]
#[path = "listener_test.rs"]
mod listener_test;
