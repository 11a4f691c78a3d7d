//! Connection driver: runs the handshake, dials upstream, then relays bytes
//! between the two legs until either one closes.
//!
//! # Ordering
//! - The handshake reply is written to the client before any upstream byte.
//! - Bytes the client sent after its CONNECT head reach upstream only after
//!   the reply has been queued.
//! - The handshake and dial run in one task that owns the state machine.
//!   Once established, each direction is copied independently and the
//!   state machine only hears about the close.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;

use crate::error::{Result, TunnelError};
use crate::http::Target;
use crate::net::connection::ConnectionId;
use crate::resilience::timeouts::{run_with_timeout, ActivityClock};
use crate::tunnel::context::TunnelContext;
use crate::tunnel::handshake::{ClientConnection, Leg, Signal};
use crate::tunnel::upstream::Upstream;

/// Why an established tunnel ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientClosed,
    UpstreamClosed,
    Idle,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::ClientClosed => "client_closed",
            CloseReason::UpstreamClosed => "upstream_closed",
            CloseReason::Idle => "idle",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// Totals for a tunnel that was established and then closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSummary {
    pub target: Target,
    /// Bytes relayed from the client to upstream.
    pub bytes_up: u64,
    /// Bytes relayed from upstream to the client.
    pub bytes_down: u64,
    pub duration: Duration,
    pub reason: CloseReason,
}

/// How long a refused client may keep sending before its socket is dropped.
const LINGER: Duration = Duration::from_millis(250);

/// Upper bound on bytes discarded while lingering.
const LINGER_MAX_BYTES: usize = 64 * 1024;

/// Serve one client connection to completion.
///
/// Returns `Err` when the handshake fails or a relay I/O error occurs. In
/// every case both legs are closed when this returns.
pub async fn serve_connection<C, U>(
    client: C,
    id: ConnectionId,
    context: Arc<TunnelContext>,
    upstream: &U,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<TunnelSummary>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: Upstream,
{
    let mut client = client;
    let mut conn = ClientConnection::new(id, context.clone());
    let mut buf = BytesMut::with_capacity(context.read_buffer_bytes);

    let target = match await_connect(&mut client, &mut conn, &mut buf, &context, &mut shutdown).await {
        Ok(target) => target,
        Err(e) => {
            finish(&mut client, &mut conn).await;
            return Err(e);
        }
    };

    let dialed = open_upstream(&mut client, &mut conn, &mut buf, &context, upstream, &target, &mut shutdown).await;
    let upstream_stream = match dialed {
        Ok(stream) => stream,
        Err(e) => return Err(abort_dial(&mut client, &mut conn, e).await),
    };

    conn.upstream_established();
    tracing::debug!(connection_id = %id, target = %target, "Tunnel established");

    let started = Instant::now();
    let (mut client_rd, mut client_wr) = tokio::io::split(client);
    let (mut upstream_rd, mut upstream_wr) = tokio::io::split(upstream_stream);

    if let Err(e) = write_chunks(&mut client_wr, conn.take_client_outbound()).await {
        conn.on_close(Leg::Client);
        return Err(e.into());
    }
    let early = match write_chunks(&mut upstream_wr, conn.take_upstream_outbound()).await {
        Ok(n) => n,
        Err(e) => {
            conn.on_close(Leg::Upstream);
            return Err(e.into());
        }
    };

    // From here on each direction is pumped on its own, so a peer that
    // stops reading while it writes back cannot stall the other direction.
    let bytes_up = AtomicU64::new(early);
    let bytes_down = AtomicU64::new(0);
    let activity = ActivityClock::new();
    let chunk_size = context.read_buffer_bytes;

    let ended = tokio::select! {
        res = pump(&mut client_rd, &mut upstream_wr, buf, chunk_size, &bytes_up, &activity) => {
            res.map(|()| CloseReason::ClientClosed).map_err(|e| (Leg::Client, e))
        }
        res = pump(&mut upstream_rd, &mut client_wr, BytesMut::with_capacity(chunk_size), chunk_size, &bytes_down, &activity) => {
            res.map(|()| CloseReason::UpstreamClosed).map_err(|e| (Leg::Upstream, e))
        }
        _ = shutdown.recv() => Ok(CloseReason::Shutdown),
        _ = activity.idle_for(context.idle_timeout) => Ok(CloseReason::Idle),
    };

    let reason = match ended {
        Ok(reason) => reason,
        Err((leg, e)) => {
            conn.on_close(leg);
            return Err(e.into());
        }
    };
    conn.on_close(match reason {
        CloseReason::UpstreamClosed => Leg::Upstream,
        _ => Leg::Client,
    });

    let _ = client_wr.shutdown().await;
    let _ = upstream_wr.shutdown().await;

    Ok(TunnelSummary {
        target,
        bytes_up: bytes_up.into_inner(),
        bytes_down: bytes_down.into_inner(),
        duration: started.elapsed(),
        reason,
    })
}

/// Read and parse until the client has sent a complete, accepted CONNECT.
async fn await_connect<C>(
    client: &mut C,
    conn: &mut ClientConnection,
    buf: &mut BytesMut,
    context: &TunnelContext,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<Target>
where
    C: AsyncRead + Unpin,
{
    let deadline = tokio::time::Instant::now() + context.handshake_timeout;
    loop {
        let chunk = tokio::select! {
            read = tokio::time::timeout_at(deadline, read_chunk(client, buf, context.read_buffer_bytes)) => {
                match read {
                    Ok(Ok(Some(chunk))) => chunk,
                    Ok(Ok(None)) => {
                        conn.on_close(Leg::Client);
                        return Err(TunnelError::ClientClosed);
                    }
                    Ok(Err(e)) => {
                        conn.on_close(Leg::Client);
                        return Err(e.into());
                    }
                    Err(_) => {
                        conn.on_close(Leg::Client);
                        return Err(TunnelError::HandshakeTimeout(context.handshake_timeout.as_secs()));
                    }
                }
            }
            _ = shutdown.recv() => {
                conn.on_close(Leg::Client);
                return Err(TunnelError::Shutdown);
            }
        };

        match conn.on_client_data(chunk)? {
            Signal::NeedMore | Signal::Relay => continue,
            Signal::Connect(target) => return Ok(target),
        }
    }
}

/// Dial `target` under the connect timeout.
///
/// Client bytes arriving meanwhile are queued for upstream. A client hang-up
/// or shutdown abandons the dial and closes the connection with no reply.
async fn open_upstream<C, U>(
    client: &mut C,
    conn: &mut ClientConnection,
    buf: &mut BytesMut,
    context: &TunnelContext,
    upstream: &U,
    target: &Target,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<U::Stream>
where
    C: AsyncRead + Unpin,
    U: Upstream,
{
    let dial = run_with_timeout(Some(context.connect_timeout), upstream.open(target));
    tokio::pin!(dial);

    loop {
        tokio::select! {
            dialed = &mut dial => {
                return dialed.unwrap_or_else(|| {
                    Err(TunnelError::UpstreamTimeout {
                        target: target.to_string(),
                        secs: context.connect_timeout.as_secs(),
                    })
                });
            }
            read = read_chunk(client, buf, context.read_buffer_bytes) => match read {
                Ok(Some(chunk)) => {
                    conn.on_client_data(chunk)?;
                }
                Ok(None) => {
                    conn.on_close(Leg::Client);
                    return Err(TunnelError::ClientClosed);
                }
                Err(e) => {
                    conn.on_close(Leg::Client);
                    return Err(e.into());
                }
            },
            _ = shutdown.recv() => {
                conn.on_close(Leg::Client);
                return Err(TunnelError::Shutdown);
            }
        }
    }
}

/// Queue the failure reply, if the connection is still waiting on the dial,
/// and close the client.
async fn abort_dial<C>(client: &mut C, conn: &mut ClientConnection, error: TunnelError) -> TunnelError
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    conn.upstream_failed(&error);
    finish(client, conn).await;
    error
}

/// Flush any final reply, then close the client socket. Write errors are
/// ignored: the connection is going away regardless.
///
/// Input the client already sent is drained for a short while first, so
/// closing with unread bytes does not reset the connection under the reply.
async fn finish<C>(client: &mut C, conn: &mut ClientConnection)
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let _ = write_chunks(client, conn.take_client_outbound()).await;
    let _ = client.shutdown().await;

    let mut sink = [0u8; 4096];
    let _ = tokio::time::timeout(LINGER, async {
        let mut drained = 0;
        while drained < LINGER_MAX_BYTES {
            match client.read(&mut sink).await {
                Ok(0) | Err(_) => break,
                Ok(n) => drained += n,
            }
        }
    })
    .await;
}

/// Copy one direction of an established tunnel until `reader` hits EOF.
async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    mut buf: BytesMut,
    chunk_size: usize,
    total: &AtomicU64,
    activity: &ActivityClock,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(chunk) = read_chunk(reader, &mut buf, chunk_size).await? {
        activity.touch();
        writer.write_all(&chunk).await?;
        writer.flush().await?;
        total.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        activity.touch();
    }
    Ok(())
}

/// Read one chunk. `None` on EOF.
///
/// Cancel safe: no bytes are lost if the future is dropped before completion.
async fn read_chunk<R>(reader: &mut R, buf: &mut BytesMut, size: usize) -> std::io::Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    buf.reserve(size);
    let n = reader.read_buf(buf).await?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(buf.split().freeze()))
}

async fn write_chunks<W>(writer: &mut W, chunks: Vec<Bytes>) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    if chunks.is_empty() {
        return Ok(0);
    }
    let mut written = 0u64;
    for chunk in chunks {
        writer.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    writer.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::io::DuplexStream;

    const CONNECT_REQ: &[u8] = b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n";
    const ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";

    /// Hands out the far end of an in-memory pipe for every dial.
    struct PipeUpstream {
        dials: AtomicUsize,
        targets: Mutex<Vec<Target>>,
        far_ends: Mutex<Option<tokio::sync::mpsc::UnboundedSender<DuplexStream>>>,
    }

    impl PipeUpstream {
        fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<DuplexStream>) {
            let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
            (
                Self {
                    dials: AtomicUsize::new(0),
                    targets: Mutex::new(Vec::new()),
                    far_ends: Mutex::new(Some(tx)),
                },
                rx,
            )
        }
    }

    impl Upstream for PipeUpstream {
        type Stream = DuplexStream;

        async fn open(&self, target: &Target) -> Result<DuplexStream> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            self.targets.lock().unwrap().push(target.clone());
            let (near, far) = tokio::io::duplex(64 * 1024);
            if let Some(tx) = self.far_ends.lock().unwrap().as_ref() {
                let _ = tx.send(far);
            }
            Ok(near)
        }
    }

    struct RefusingUpstream;

    impl Upstream for RefusingUpstream {
        type Stream = DuplexStream;

        async fn open(&self, target: &Target) -> Result<DuplexStream> {
            Err(TunnelError::UpstreamConnect {
                target: target.to_string(),
                reason: "connection refused".into(),
            })
        }
    }

    /// Each dial gets a small in-memory pipe whose far end echoes.
    struct EchoUpstream;

    impl Upstream for EchoUpstream {
        type Stream = DuplexStream;

        async fn open(&self, _target: &Target) -> Result<DuplexStream> {
            let (near, far) = tokio::io::duplex(1024);
            tokio::spawn(async move {
                let (mut rd, mut wr) = tokio::io::split(far);
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
            Ok(near)
        }
    }

    struct HangingUpstream;

    impl Upstream for HangingUpstream {
        type Stream = DuplexStream;

        async fn open(&self, _target: &Target) -> Result<DuplexStream> {
            std::future::pending().await
        }
    }

    fn shutdown_rx() -> (broadcast::Sender<()>, broadcast::Receiver<()>) {
        broadcast::channel(1)
    }

    async fn read_exact_vec(stream: &mut DuplexStream, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        stream.read_exact(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn relays_both_directions_after_reply() {
        let (upstream, mut far_ends) = PipeUpstream::new();
        let upstream = Arc::new(upstream);
        let (mut client, server_side) = tokio::io::duplex(64 * 1024);
        let (_tx, rx) = shutdown_rx();

        let up = upstream.clone();
        let task = tokio::spawn(async move {
            serve_connection(server_side, ConnectionId::new(), Arc::new(TunnelContext::default()), up.as_ref(), rx).await
        });

        client.write_all(CONNECT_REQ).await.unwrap();
        assert_eq!(read_exact_vec(&mut client, ESTABLISHED.len()).await, ESTABLISHED);

        let mut far = far_ends.recv().await.unwrap();
        assert_eq!(upstream.targets.lock().unwrap()[0], Target::new("example.com", 443));

        // Something that looks like HTTP is still forwarded untouched.
        let second = b"GET /secret HTTP/1.1\r\nHost: x\r\n\r\n";
        client.write_all(second).await.unwrap();
        assert_eq!(read_exact_vec(&mut far, second.len()).await, second);

        far.write_all(b"pong").await.unwrap();
        assert_eq!(read_exact_vec(&mut client, 4).await, b"pong");

        drop(far);
        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.reason, CloseReason::UpstreamClosed);
        assert_eq!(summary.bytes_up, second.len() as u64);
        assert_eq!(summary.bytes_down, 4);

        // Client leg was closed with the upstream leg.
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn client_close_closes_upstream() {
        let (upstream, mut far_ends) = PipeUpstream::new();
        let (mut client, server_side) = tokio::io::duplex(4096);
        let (_tx, rx) = shutdown_rx();

        let task = tokio::spawn(async move {
            serve_connection(server_side, ConnectionId::new(), Arc::new(TunnelContext::default()), &upstream, rx).await
        });

        client.write_all(CONNECT_REQ).await.unwrap();
        read_exact_vec(&mut client, ESTABLISHED.len()).await;
        let mut far = far_ends.recv().await.unwrap();

        drop(client);
        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.reason, CloseReason::ClientClosed);

        let mut rest = Vec::new();
        far.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn early_data_reaches_upstream_after_reply() {
        let (upstream, mut far_ends) = PipeUpstream::new();
        let (mut client, server_side) = tokio::io::duplex(4096);
        let (_tx, rx) = shutdown_rx();

        tokio::spawn(async move {
            let _ = serve_connection(server_side, ConnectionId::new(), Arc::new(TunnelContext::default()), &upstream, rx).await;
        });

        let mut input = CONNECT_REQ.to_vec();
        input.extend_from_slice(b"client-hello");
        client.write_all(&input).await.unwrap();

        assert_eq!(read_exact_vec(&mut client, ESTABLISHED.len()).await, ESTABLISHED);
        let mut far = far_ends.recv().await.unwrap();
        assert_eq!(read_exact_vec(&mut far, 12).await, b"client-hello");
    }

    #[tokio::test]
    async fn non_connect_gets_400_without_dialing() {
        let (upstream, _far_ends) = PipeUpstream::new();
        let upstream = Arc::new(upstream);
        let (mut client, server_side) = tokio::io::duplex(4096);
        let (_tx, rx) = shutdown_rx();

        let up = upstream.clone();
        let task = tokio::spawn(async move {
            serve_connection(server_side, ConnectionId::new(), Arc::new(TunnelContext::default()), up.as_ref(), rx).await
        });

        client.write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n").await.unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"HTTP/1.1 400 Unsupported protocol scheme\r\nConnection: close\r\n\r\n");

        assert!(matches!(task.await.unwrap(), Err(TunnelError::UnsupportedMethod(_))));
        assert_eq!(upstream.dials.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refused_upstream_gets_502() {
        let (mut client, server_side) = tokio::io::duplex(4096);
        let (_tx, rx) = shutdown_rx();

        let task = tokio::spawn(async move {
            serve_connection(server_side, ConnectionId::new(), Arc::new(TunnelContext::default()), &RefusingUpstream, rx).await
        });

        client.write_all(CONNECT_REQ).await.unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"HTTP/1.1 502 Bad Gateway\r\nConnection: close\r\n\r\n");
        assert!(matches!(task.await.unwrap(), Err(TunnelError::UpstreamConnect { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_upstream_gets_504() {
        let (mut client, server_side) = tokio::io::duplex(4096);
        let (_tx, rx) = shutdown_rx();

        let task = tokio::spawn(async move {
            serve_connection(server_side, ConnectionId::new(), Arc::new(TunnelContext::default()), &HangingUpstream, rx).await
        });

        client.write_all(CONNECT_REQ).await.unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"HTTP/1.1 504 Gateway Timeout\r\nConnection: close\r\n\r\n");
        assert!(matches!(task.await.unwrap(), Err(TunnelError::UpstreamTimeout { secs: 10, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handshake_times_out_silently() {
        let (mut client, server_side) = tokio::io::duplex(4096);
        let (_tx, rx) = shutdown_rx();

        let task = tokio::spawn(async move {
            serve_connection(server_side, ConnectionId::new(), Arc::new(TunnelContext::default()), &RefusingUpstream, rx).await
        });

        client.write_all(b"CONNECT example.com:443 HTTP/1.1\r\n").await.unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert!(reply.is_empty());
        assert!(matches!(task.await.unwrap(), Err(TunnelError::HandshakeTimeout(10))));
    }

    #[tokio::test]
    async fn shutdown_closes_established_tunnel() {
        let (upstream, mut far_ends) = PipeUpstream::new();
        let (mut client, server_side) = tokio::io::duplex(4096);
        let (tx, rx) = shutdown_rx();

        let task = tokio::spawn(async move {
            serve_connection(server_side, ConnectionId::new(), Arc::new(TunnelContext::default()), &upstream, rx).await
        });

        client.write_all(CONNECT_REQ).await.unwrap();
        read_exact_vec(&mut client, ESTABLISHED.len()).await;
        let _far = far_ends.recv().await.unwrap();

        tx.send(()).unwrap();
        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.reason, CloseReason::Shutdown);
    }

    #[tokio::test]
    async fn full_duplex_echo_does_not_stall() {
        let (client, server_side) = tokio::io::duplex(1024);
        let (_tx, rx) = shutdown_rx();

        let task = tokio::spawn(async move {
            serve_connection(server_side, ConnectionId::new(), Arc::new(TunnelContext::default()), &EchoUpstream, rx).await
        });

        let (mut client_rd, mut client_wr) = tokio::io::split(client);
        client_wr.write_all(CONNECT_REQ).await.unwrap();
        let mut reply = vec![0u8; ESTABLISHED.len()];
        client_rd.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, ESTABLISHED);

        let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
        let sent = payload.clone();
        let writer = tokio::spawn(async move {
            client_wr.write_all(&sent).await.unwrap();
            client_wr
        });

        let mut echoed = vec![0u8; payload.len()];
        tokio::time::timeout(Duration::from_secs(5), client_rd.read_exact(&mut echoed))
            .await
            .expect("relay stalled with traffic in both directions")
            .unwrap();
        assert_eq!(echoed, payload);

        let client_wr = writer.await.unwrap();
        drop(client_wr);
        drop(client_rd);
        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.bytes_up, payload.len() as u64);
        assert_eq!(summary.bytes_down, payload.len() as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_tunnel_closes_both_legs() {
        let (upstream, mut far_ends) = PipeUpstream::new();
        let (mut client, server_side) = tokio::io::duplex(4096);
        let (_tx, rx) = shutdown_rx();
        let context = TunnelContext {
            idle_timeout: Some(Duration::from_secs(30)),
            ..TunnelContext::default()
        };

        let task = tokio::spawn(async move {
            serve_connection(server_side, ConnectionId::new(), Arc::new(context), &upstream, rx).await
        });

        client.write_all(CONNECT_REQ).await.unwrap();
        read_exact_vec(&mut client, ESTABLISHED.len()).await;
        let mut far = far_ends.recv().await.unwrap();
        let started = tokio::time::Instant::now();

        // Traffic restarts the idle timer.
        tokio::time::sleep(Duration::from_secs(20)).await;
        client.write_all(b"x").await.unwrap();
        assert_eq!(read_exact_vec(&mut far, 1).await, b"x");
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!task.is_finished());

        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.reason, CloseReason::Idle);
        assert!(started.elapsed() >= Duration::from_secs(50));

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        far.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn shutdown_during_dial_closes_without_reply() {
        let (mut client, server_side) = tokio::io::duplex(4096);
        let (tx, rx) = shutdown_rx();

        let task = tokio::spawn(async move {
            serve_connection(server_side, ConnectionId::new(), Arc::new(TunnelContext::default()), &HangingUpstream, rx).await
        });

        client.write_all(CONNECT_REQ).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("dial was not abandoned on shutdown")
            .unwrap();
        assert!(matches!(result, Err(TunnelError::Shutdown)));

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn client_hangup_during_dial_abandons_it() {
        let (mut client, server_side) = tokio::io::duplex(4096);
        let (_tx, rx) = shutdown_rx();

        let task = tokio::spawn(async move {
            serve_connection(server_side, ConnectionId::new(), Arc::new(TunnelContext::default()), &HangingUpstream, rx).await
        });

        client.write_all(CONNECT_REQ).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(client);

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("dial was not abandoned when the client left")
            .unwrap();
        assert!(matches!(result, Err(TunnelError::ClientClosed)));
    }

    #[tokio::test]
    async fn shutdown_during_handshake_is_reported_as_shutdown() {
        let (mut client, server_side) = tokio::io::duplex(4096);
        let (tx, rx) = shutdown_rx();

        let task = tokio::spawn(async move {
            serve_connection(server_side, ConnectionId::new(), Arc::new(TunnelContext::default()), &RefusingUpstream, rx).await
        });

        client.write_all(b"CONNECT example.com:443 HTTP/1.1\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(()).unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, TunnelError::Shutdown));
        assert_eq!(err.outcome(), "shutdown");
    }
}
