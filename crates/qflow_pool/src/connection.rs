//! TCP connection factory.

use crate::error::FactoryError;
use crate::factory::ResourceFactory;
use async_trait::async_trait;
use futures::FutureExt;
use qflow_core::ResourceKind;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tracing::debug;

/// A pooled TCP connection
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl TcpConnection {
    /// The underlying stream. Reads and writes go through its `&self` methods.
    #[must_use]
    pub const fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Remote address
    #[must_use]
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }
}

/// Opens TCP connections to one address
#[derive(Debug, Clone)]
pub struct TcpConnectionFactory {
    addr: String,
    nodelay: bool,
}

impl TcpConnectionFactory {
    /// Connect to `addr` (`host:port`)
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            nodelay: true,
        }
    }

    /// Toggle `TCP_NODELAY` on new connections
    #[must_use]
    pub const fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Target address
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl ResourceFactory for TcpConnectionFactory {
    type Resource = TcpConnection;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Connection
    }

    async fn create(&self) -> Result<TcpConnection, FactoryError> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(self.nodelay)?;
        let peer = stream.peer_addr()?;
        debug!(peer = %peer, "connection opened");
        Ok(TcpConnection { stream, peer })
    }

    async fn destroy(&self, conn: &TcpConnection) {
        // The socket closes when the pool drops its last handle.
        debug!(peer = %conn.peer, "connection retired");
    }

    async fn validate(&self, conn: &TcpConnection) -> bool {
        if !matches!(conn.stream.take_error(), Ok(None)) {
            return false;
        }
        let mut probe = [0u8; 1];
        // Peek without waiting: pending means open and idle, zero bytes
        // means the peer hung up.
        match conn.stream.peek(&mut probe).now_or_never() {
            None => true,
            Some(Ok(n)) => n > 0,
            Some(Err(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::lease::ReleaseOutcome;
    use crate::pool::ResourcePool;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_and_validate() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let factory = TcpConnectionFactory::new(addr.to_string());

        let conn = factory.create().await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        assert_eq!(conn.peer(), addr);
        assert!(factory.validate(&conn).await);

        drop(server_side);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!factory.validate(&conn).await);
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(TcpConnectionFactory::new(addr.to_string()).create().await.is_err());
    }

    #[tokio::test]
    async fn test_pool_reuses_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let config = PoolConfig::new("tcp", ResourceKind::Connection).with_bounds(0, 2);
        let pool = ResourcePool::new(config, TcpConnectionFactory::new(addr.to_string())).unwrap();
        let conn = pool.acquire().await.unwrap();
        let local = conn.stream().local_addr().unwrap();
        pool.release(conn, ReleaseOutcome::Success).await;

        let again = pool.acquire().await.unwrap();
        assert_eq!(again.stream().local_addr().unwrap(), local);
        assert_eq!(pool.stats().total_created, 1);
        pool.release(again, ReleaseOutcome::Success).await;
        server.abort();
    }
}
