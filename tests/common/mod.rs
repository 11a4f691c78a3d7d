//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use connect_tunnel::config::TunnelConfig;
use connect_tunnel::http::InterceptorChain;
use connect_tunnel::lifecycle::Shutdown;
use connect_tunnel::net::{ConnectionTracker, Listener};
use connect_tunnel::TunnelServer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Start a backend that echoes every byte back until the peer closes.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    addr
}

/// Start a backend that writes `greeting` and then closes the connection.
pub async fn start_closing_backend(greeting: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let _ = socket.write_all(greeting).await;
            let _ = socket.shutdown().await;
        }
    });

    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// A tunnel server running on an ephemeral port.
pub struct TestTunnel {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub config_updates: mpsc::UnboundedSender<TunnelConfig>,
    pub tracker: ConnectionTracker,
    pub handle: JoinHandle<()>,
}

impl TestTunnel {
    pub async fn start(config: TunnelConfig) -> Self {
        Self::start_with(config, InterceptorChain::new()).await
    }

    pub async fn start_with(config: TunnelConfig, interceptors: InterceptorChain) -> Self {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listener = Listener::from_listener(tcp, config.listener.max_connections).unwrap();
        let addr = listener.local_addr().unwrap();

        let shutdown = Shutdown::new();
        let (config_updates, updates_rx) = mpsc::unbounded_channel();
        let server = TunnelServer::new(config).with_interceptors(interceptors);
        let tracker = server.tracker();
        let server_shutdown = shutdown.subscribe();

        let handle = tokio::spawn(async move {
            server.run(listener, updates_rx, server_shutdown).await.unwrap();
        });

        Self {
            addr,
            shutdown,
            config_updates,
            tracker,
            handle,
        }
    }

    pub async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.addr).await.unwrap()
    }

    /// Open a connection and send a CONNECT for `target`.
    pub async fn open(&self, target: &str) -> TcpStream {
        let mut stream = self.connect().await;
        let request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        stream
    }

    /// Wait until the server has no live connections.
    pub async fn drained(&self) -> bool {
        self.tracker.wait_for_drain(Duration::from_secs(5)).await
    }
}

/// Read exactly `len` bytes, failing the test after a few seconds.
pub async fn read_exact(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("timed out reading from tunnel")
        .unwrap();
    buf
}

/// Read until the peer closes, failing the test after a few seconds.
pub async fn read_to_end(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
        .await
        .expect("timed out waiting for close")
        .unwrap();
    buf
}

pub const ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";
pub const UNSUPPORTED_SCHEME: &[u8] = b"HTTP/1.1 400 Unsupported protocol scheme\r\nConnection: close\r\n\r\n";
