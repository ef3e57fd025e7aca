//! Loop-back TCP echo server, the counterpart of the LOCAL TCP probe.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, error, info, warn};

use crate::monitoring::probe::GOODBYE;

pub struct EchoServer {
    listener: TcpListener,
}

impl EchoServer {
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until Ctrl-C
    pub async fn run(self) -> io::Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Accept connections until `shutdown` resolves
    ///
    /// Connections already accepted keep running on their own tasks.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> io::Result<()> {
        let addr = self.local_addr()?;
        info!(%addr, "echo server listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(async move {
                            if let Err(e) = echo(stream, peer).await {
                                warn!(%peer, "echo connection failed: {}", e);
                            }
                        });
                    }
                    Err(e) => error!("accept error: {}", e),
                },
            }
        }

        info!(%addr, "echo server shutting down");
        Ok(())
    }
}

/// Echo reads back until the peer closes or says goodbye
async fn echo(mut stream: TcpStream, peer: SocketAddr) -> io::Result<()> {
    debug!(%peer, "connection accepted");
    let mut buf = [0u8; 1024];

    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 || &buf[..n] == GOODBYE.as_bytes() {
            break;
        }
        debug!(%peer, message = %String::from_utf8_lossy(&buf[..n]), "echoing");
        stream.write_all(&buf[..n]).await?;
    }

    debug!(%peer, "connection closed");
    Ok(())
}
