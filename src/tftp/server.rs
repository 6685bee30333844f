//! TFTP server implementation.
//!
//! A read-only TFTP server for serving PXE boot files.
//! Implements RFC 1350 (TFTP) with RFC 2347 (options), RFC 2348 (blksize)
//! and RFC 2349 (timeout, tsize) support.
//!
//! Everything happens on the listening port: transfers are told apart by the
//! client's address and each one is driven by its own task, which gets the
//! client's packets through a channel.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use super::packet::{ErrorCode, Packet, Request};
use super::path::resolve;
use crate::net::bind_udp;
use crate::shutdown;

/// Per-packet wait before retransmitting.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long in-flight transfers may run after shutdown is requested.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Retransmissions of one packet before the transfer is abandoned.
const MAX_RETRIES: u32 = 5;

/// Default block size
const DEFAULT_BLOCK_SIZE: usize = 512;

/// Block size bounds (RFC 2348)
const MIN_BLOCK_SIZE: usize = 8;
const MAX_BLOCK_SIZE: usize = 65464;

/// Largest UDP payload.
const MAX_DATAGRAM: usize = 65536;

/// Client packets buffered per transfer.
const SESSION_QUEUE: usize = 16;

/// TFTP server for serving boot files.
pub struct TftpServer {
    socket: Arc<UdpSocket>,
    /// Root directory for TFTP files.
    root: PathBuf,
    timeout: Duration,
    grace: Duration,
}

impl TftpServer {
    /// Bind the TFTP socket.
    ///
    /// # Arguments
    /// * `bind_addr` - Address to bind to (usually 0.0.0.0:69)
    /// * `interface` - Optional interface to pin the socket to
    /// * `root` - Root directory to serve files from
    pub fn bind(
        bind_addr: SocketAddr,
        interface: Option<&str>,
        root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let socket = bind_udp(bind_addr, interface).context("Failed to create TFTP socket")?;

        Ok(Self {
            socket: Arc::new(socket),
            root: root.into(),
            timeout: DEFAULT_TIMEOUT,
            grace: DEFAULT_SHUTDOWN_GRACE,
        })
    }

    /// Override the default per-packet timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override how long transfers may finish after shutdown.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Serve until `shutdown` turns true.
    ///
    /// After shutdown no new transfers are accepted; running ones get the
    /// grace period to finish and are aborted after that.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            addr = %self.local_addr()?,
            root = %self.root.display(),
            "TFTP server listening"
        );

        let mut demux = Demux {
            socket: Arc::clone(&self.socket),
            root: self.root.clone(),
            timeout: self.timeout,
            routes: HashMap::new(),
            next_session: 0,
            tasks: JoinSet::new(),
        };
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                _ = shutdown::requested(&mut shutdown) => break,
                Some(joined) = demux.tasks.join_next() => demux.reap(joined),
                received = self.socket.recv_from(&mut buf) => {
                    let (len, peer) = received.context("Failed to read from TFTP socket")?;
                    demux.dispatch(&buf[..len], peer, true).await;
                }
            }
        }

        if !demux.tasks.is_empty() {
            info!(transfers = demux.tasks.len(), "waiting for in-flight transfers");

            let deadline = tokio::time::sleep(self.grace);
            tokio::pin!(deadline);

            while !demux.tasks.is_empty() {
                tokio::select! {
                    _ = &mut deadline => {
                        warn!(transfers = demux.tasks.len(), "aborting in-flight transfers");
                        demux.abort_all();
                        break;
                    }
                    Some(joined) = demux.tasks.join_next() => demux.reap(joined),
                    received = self.socket.recv_from(&mut buf) => {
                        let (len, peer) = received.context("Failed to read from TFTP socket")?;
                        demux.dispatch(&buf[..len], peer, false).await;
                    }
                }
            }
        }

        info!("TFTP server stopped");
        Ok(())
    }
}

/// Inbox of the transfer currently bound to a client address.
struct Route {
    session: u64,
    inbox: mpsc::Sender<Packet>,
}

/// Routes datagrams arriving on the shared port to their transfer.
struct Demux {
    socket: Arc<UdpSocket>,
    root: PathBuf,
    timeout: Duration,
    routes: HashMap<SocketAddr, Route>,
    next_session: u64,
    tasks: JoinSet<(SocketAddr, u64)>,
}

impl Demux {
    async fn dispatch(&mut self, data: &[u8], peer: SocketAddr, accepting: bool) {
        let packet = match Packet::parse(data) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(%peer, error = %e, "ignoring malformed packet");
                return;
            }
        };

        match packet {
            Packet::ReadRequest(request) => {
                let live = self
                    .routes
                    .get(&peer)
                    .is_some_and(|route| !route.inbox.is_closed());
                if live {
                    debug!(%peer, "ignoring duplicate read request");
                } else if !accepting {
                    self.reply(peer, Packet::error(ErrorCode::NotDefined, "Server shutting down"))
                        .await;
                } else {
                    self.spawn(peer, request);
                }
            }
            Packet::WriteRequest(request) => {
                warn!(%peer, filename = %request.filename, "write request denied (read-only server)");
                self.reply(peer, Packet::error(ErrorCode::AccessViolation, "Write not supported"))
                    .await;
            }
            packet => self.route(peer, packet).await,
        }
    }

    async fn route(&mut self, peer: SocketAddr, packet: Packet) {
        let aborts = matches!(packet, Packet::Error { .. });

        let Some(route) = self.routes.get(&peer) else {
            // never answer an error with an error
            if !aborts {
                debug!(%peer, "packet for unknown transfer");
                self.reply(peer, Packet::error(ErrorCode::UnknownTransferId, "Unknown transfer ID"))
                    .await;
            }
            return;
        };

        match route.inbox.try_send(packet) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!(%peer, "transfer queue full, dropping packet"),
            Err(TrySendError::Closed(_)) => {
                self.routes.remove(&peer);
            }
        }

        // an ERROR ends the transfer, the client may start a new one right away
        if aborts {
            self.routes.remove(&peer);
        }
    }

    fn spawn(&mut self, peer: SocketAddr, request: Request) {
        let (tx, rx) = mpsc::channel(SESSION_QUEUE);
        let session_id = self.next_session;
        self.next_session = self.next_session.wrapping_add(1);
        self.routes.insert(
            peer,
            Route {
                session: session_id,
                inbox: tx,
            },
        );

        let session = Session {
            socket: Arc::clone(&self.socket),
            peer,
            timeout: self.timeout,
            inbox: rx,
        };
        let root = self.root.clone();

        self.tasks.spawn(async move {
            session.serve(&root, request).await;
            (peer, session_id)
        });
    }

    fn reap(&mut self, joined: Result<(SocketAddr, u64), JoinError>) {
        match joined {
            Ok((peer, session)) => {
                // the peer may already have started a newer transfer
                if self
                    .routes
                    .get(&peer)
                    .is_some_and(|route| route.session == session)
                {
                    self.routes.remove(&peer);
                }
            }
            Err(e) if e.is_panic() => error!(error = %e, "TFTP transfer task panicked"),
            Err(_) => {}
        }
    }

    fn abort_all(&mut self) {
        self.tasks.abort_all();
        self.routes.clear();
    }

    async fn reply(&self, peer: SocketAddr, packet: Packet) {
        if let Err(e) = self.socket.send_to(&packet.to_bytes(), peer).await {
            debug!(%peer, error = %e, "failed to send reply");
        }
    }
}

/// Options accepted for one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Negotiated {
    block_size: usize,
    timeout: Option<Duration>,
    /// Echoed back in the OACK, in request order.
    acked: Vec<(String, String)>,
}

fn negotiate(request: &Request, file_size: u64) -> Negotiated {
    let mut negotiated = Negotiated {
        block_size: DEFAULT_BLOCK_SIZE,
        timeout: None,
        acked: Vec::new(),
    };

    for (name, value) in &request.options {
        match name.as_str() {
            "blksize" => {
                if let Ok(requested) = value.parse::<usize>() {
                    if requested >= MIN_BLOCK_SIZE {
                        let size = requested.min(MAX_BLOCK_SIZE);
                        negotiated.block_size = size;
                        negotiated.acked.push((name.clone(), size.to_string()));
                    }
                }
            }
            "tsize" => negotiated.acked.push((name.clone(), file_size.to_string())),
            "timeout" => {
                if let Ok(secs) = value.parse::<u64>() {
                    if (1..=255).contains(&secs) {
                        negotiated.timeout = Some(Duration::from_secs(secs));
                        negotiated.acked.push((name.clone(), secs.to_string()));
                    }
                }
            }
            _ => {}
        }
    }

    negotiated
}

/// One read transfer.
struct Session {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    timeout: Duration,
    inbox: mpsc::Receiver<Packet>,
}

impl Session {
    async fn serve(mut self, root: &Path, request: Request) {
        let peer = self.peer;
        match self.transfer(root, &request).await {
            Ok(bytes) => info!(%peer, filename = %request.filename, bytes, "file sent"),
            Err(e) => error!(
                %peer,
                filename = %request.filename,
                error = %format_args!("{e:#}"),
                "transfer failed"
            ),
        }
    }

    async fn transfer(&mut self, root: &Path, request: &Request) -> Result<u64> {
        // netascii is served as-is
        if request.mode != "octet" && request.mode != "netascii" {
            self.send(Packet::error(ErrorCode::IllegalOperation, "Unsupported transfer mode"))
                .await?;
            bail!("unsupported transfer mode {:?}", request.mode);
        }

        let path = resolve(root, &request.filename);
        let (mut file, size) = match open_file(&path).await {
            Ok(opened) => opened,
            Err(e) => {
                self.send(Packet::error(ErrorCode::FileNotFound, "File not found"))
                    .await?;
                return Err(e).with_context(|| format!("failed to open {}", path.display()));
            }
        };

        let negotiated = negotiate(request, size);
        if let Some(timeout) = negotiated.timeout {
            self.timeout = timeout;
        }
        if !negotiated.acked.is_empty() {
            let oack = Packet::OptionAck(negotiated.acked).to_bytes();
            self.exchange(&oack, 0)
                .await
                .context("option negotiation failed")?;
        }

        let block_size = negotiated.block_size;
        let mut buf = vec![0u8; block_size];
        let mut block: u16 = 1;
        let mut sent: u64 = 0;

        loop {
            let len = match read_block(&mut file, &mut buf).await {
                Ok(len) => len,
                Err(e) => {
                    self.send(Packet::error(ErrorCode::NotDefined, "Read error"))
                        .await?;
                    return Err(e).with_context(|| format!("failed to read {}", path.display()));
                }
            };

            let data = Packet::Data {
                block,
                data: buf[..len].to_vec(),
            }
            .to_bytes();
            self.exchange(&data, block).await?;
            sent += len as u64;

            if len < block_size {
                break;
            }
            block = block.wrapping_add(1);
        }

        Ok(sent)
    }

    /// Send `packet` and wait for the ACK of `block`, retransmitting on timeout.
    async fn exchange(&mut self, packet: &[u8], block: u16) -> Result<()> {
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                debug!(peer = %self.peer, block, attempt, "retransmitting");
            }

            self.socket
                .send_to(packet, self.peer)
                .await
                .context("failed to send to client")?;

            let deadline = Instant::now() + self.timeout;
            loop {
                match timeout_at(deadline, self.inbox.recv()).await {
                    Err(_) => break,
                    Ok(None) => bail!("transfer cancelled"),
                    Ok(Some(Packet::Ack(acked))) if acked == block => return Ok(()),
                    // stale duplicate, keep waiting
                    Ok(Some(Packet::Ack(_))) => {}
                    Ok(Some(Packet::Error { code, message })) => {
                        bail!("client aborted transfer: {message} (code {code})")
                    }
                    Ok(Some(_)) => {
                        self.send(Packet::error(ErrorCode::IllegalOperation, "Unexpected packet"))
                            .await?;
                        bail!("unexpected packet while waiting for ACK of block {block}");
                    }
                }
            }
        }

        bail!("timed out waiting for ACK of block {block}")
    }

    async fn send(&self, packet: Packet) -> Result<()> {
        self.socket
            .send_to(&packet.to_bytes(), self.peer)
            .await
            .context("failed to send to client")?;
        Ok(())
    }
}

async fn open_file(path: &Path) -> std::io::Result<(File, u64)> {
    let file = File::open(path).await?;
    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "not a regular file",
        ));
    }
    Ok((file, metadata.len()))
}

/// Fill `buf` from `file`, short only at end of file.
async fn read_block(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    fn request(options: &[(&str, &str)]) -> Request {
        Request {
            filename: "snp.efi".to_string(),
            mode: "octet".to_string(),
            options: options
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    mod negotiate_tests {
        use super::*;

        #[test]
        fn test_no_options() {
            let negotiated = negotiate(&request(&[]), 100);
            assert_eq!(negotiated.block_size, DEFAULT_BLOCK_SIZE);
            assert!(negotiated.acked.is_empty());
        }

        #[test]
        fn test_blksize_and_tsize() {
            let negotiated = negotiate(&request(&[("blksize", "1468"), ("tsize", "0")]), 4096);
            assert_eq!(negotiated.block_size, 1468);
            assert_eq!(
                negotiated.acked,
                vec![
                    ("blksize".to_string(), "1468".to_string()),
                    ("tsize".to_string(), "4096".to_string()),
                ]
            );
        }

        #[test]
        fn test_blksize_is_clamped() {
            let negotiated = negotiate(&request(&[("blksize", "100000")]), 0);
            assert_eq!(negotiated.block_size, MAX_BLOCK_SIZE);
        }

        #[test]
        fn test_blksize_too_small_is_ignored() {
            let negotiated = negotiate(&request(&[("blksize", "4")]), 0);
            assert_eq!(negotiated.block_size, DEFAULT_BLOCK_SIZE);
            assert!(negotiated.acked.is_empty());
        }

        #[test]
        fn test_timeout_bounds() {
            let negotiated = negotiate(&request(&[("timeout", "3")]), 0);
            assert_eq!(negotiated.timeout, Some(Duration::from_secs(3)));

            assert_eq!(negotiate(&request(&[("timeout", "0")]), 0).timeout, None);
            assert_eq!(negotiate(&request(&[("timeout", "256")]), 0).timeout, None);
        }

        #[test]
        fn test_unknown_options_are_ignored() {
            let negotiated = negotiate(&request(&[("windowsize", "4")]), 0);
            assert!(negotiated.acked.is_empty());
        }
    }

    struct Harness {
        addr: SocketAddr,
        client: UdpSocket,
        shutdown: watch::Sender<bool>,
        handle: JoinHandle<Result<()>>,
    }

    impl Harness {
        async fn start(root: &Path, grace: Duration) -> Self {
            let server = TftpServer::bind("127.0.0.1:0".parse().unwrap(), None, root)
                .unwrap()
                .with_shutdown_grace(grace);
            let addr = server.local_addr().unwrap();
            let (shutdown, rx) = watch::channel(false);
            let handle = tokio::spawn(server.run(rx));
            let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            Self {
                addr,
                client,
                shutdown,
                handle,
            }
        }

        async fn send(&self, packet: Packet) {
            self.client
                .send_to(&packet.to_bytes(), self.addr)
                .await
                .unwrap();
        }

        async fn recv(&self) -> Packet {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            let (len, from) = timeout(Duration::from_secs(5), self.client.recv_from(&mut buf))
                .await
                .unwrap()
                .unwrap();
            // single port: everything comes back from the listening address
            assert_eq!(from, self.addr);
            Packet::parse(&buf[..len]).unwrap()
        }

        async fn read(&self, filename: &str, options: &[(&str, &str)]) {
            self.send(Packet::ReadRequest(Request {
                filename: filename.to_string(),
                mode: "octet".to_string(),
                options: options
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            }))
            .await;
        }

        async fn stop(self) {
            self.shutdown.send(true).unwrap();
            timeout(Duration::from_secs(10), self.handle)
                .await
                .unwrap()
                .unwrap()
                .unwrap();
        }
    }

    fn root_with(name: &str, contents: &[u8]) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(name), contents).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_read_default_block_size() {
        let contents: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        let root = root_with("undionly.kpxe", &contents);
        let harness = Harness::start(root.path(), DEFAULT_SHUTDOWN_GRACE).await;

        harness.read("undionly.kpxe", &[]).await;

        let mut received = Vec::new();
        for expected_block in 1..=2u16 {
            match harness.recv().await {
                Packet::Data { block, data } => {
                    assert_eq!(block, expected_block);
                    received.extend(data);
                }
                other => panic!("expected DATA, got {other:?}"),
            }
            harness.send(Packet::Ack(expected_block)).await;
        }

        assert_eq!(received, contents);
        harness.stop().await;
    }

    #[tokio::test]
    async fn test_exact_multiple_ends_with_empty_block() {
        let root = root_with("snp.efi", &[7u8; 512]);
        let harness = Harness::start(root.path(), DEFAULT_SHUTDOWN_GRACE).await;

        harness.read("snp.efi", &[]).await;

        assert!(matches!(harness.recv().await, Packet::Data { block: 1, data } if data.len() == 512));
        harness.send(Packet::Ack(1)).await;
        assert!(matches!(harness.recv().await, Packet::Data { block: 2, data } if data.is_empty()));
        harness.send(Packet::Ack(2)).await;

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_option_negotiation() {
        let contents = vec![1u8; 3000];
        let root = root_with("snp.efi", &contents);
        let harness = Harness::start(root.path(), DEFAULT_SHUTDOWN_GRACE).await;

        harness
            .read("snp.efi", &[("blksize", "1468"), ("tsize", "0")])
            .await;

        assert_eq!(
            harness.recv().await,
            Packet::OptionAck(vec![
                ("blksize".to_string(), "1468".to_string()),
                ("tsize".to_string(), "3000".to_string()),
            ])
        );
        harness.send(Packet::Ack(0)).await;

        let mut received = 0;
        for expected_block in 1..=3u16 {
            match harness.recv().await {
                Packet::Data { block, data } => {
                    assert_eq!(block, expected_block);
                    received += data.len();
                }
                other => panic!("expected DATA, got {other:?}"),
            }
            harness.send(Packet::Ack(expected_block)).await;
        }
        assert_eq!(received, 3000);

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_missing_file() {
        let root = TempDir::new().unwrap();
        let harness = Harness::start(root.path(), DEFAULT_SHUTDOWN_GRACE).await;

        harness.read("nope.efi", &[]).await;
        assert!(matches!(
            harness.recv().await,
            Packet::Error { code, .. } if code == ErrorCode::FileNotFound as u16
        ));

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_traversal_cannot_escape_root() {
        let outer = TempDir::new().unwrap();
        fs::write(outer.path().join("secret"), b"secret").unwrap();
        let root = outer.path().join("tftp");
        fs::create_dir_all(&root).unwrap();
        let harness = Harness::start(&root, DEFAULT_SHUTDOWN_GRACE).await;

        harness.read("../secret", &[]).await;
        assert!(matches!(
            harness.recv().await,
            Packet::Error { code, .. } if code == ErrorCode::FileNotFound as u16
        ));

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_write_request_is_denied() {
        let root = TempDir::new().unwrap();
        let harness = Harness::start(root.path(), DEFAULT_SHUTDOWN_GRACE).await;

        harness
            .send(Packet::WriteRequest(Request {
                filename: "upload.bin".to_string(),
                mode: "octet".to_string(),
                options: Vec::new(),
            }))
            .await;
        assert!(matches!(
            harness.recv().await,
            Packet::Error { code, .. } if code == ErrorCode::AccessViolation as u16
        ));
        assert!(!root.path().join("upload.bin").exists());

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_ack_without_transfer() {
        let root = TempDir::new().unwrap();
        let harness = Harness::start(root.path(), DEFAULT_SHUTDOWN_GRACE).await;

        harness.send(Packet::Ack(1)).await;
        assert!(matches!(
            harness.recv().await,
            Packet::Error { code, .. } if code == ErrorCode::UnknownTransferId as u16
        ));

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_read_request_right_after_client_error_is_served() {
        // PXE ROMs ask for tsize, abort with ERROR 8, then re-request at once
        // from the same port
        let contents = vec![3u8; 100];
        let root = root_with("undionly.kpxe", &contents);
        let harness = Harness::start(root.path(), DEFAULT_SHUTDOWN_GRACE).await;

        for _ in 0..5 {
            harness.read("undionly.kpxe", &[("tsize", "0")]).await;
            assert_eq!(
                harness.recv().await,
                Packet::OptionAck(vec![("tsize".to_string(), "100".to_string())])
            );
            harness
                .send(Packet::Error {
                    code: 8,
                    message: "size known".to_string(),
                })
                .await;
        }

        harness.read("undionly.kpxe", &[]).await;
        match harness.recv().await {
            Packet::Data { block, data } => {
                assert_eq!(block, 1);
                assert_eq!(data, contents);
            }
            other => panic!("expected DATA, got {other:?}"),
        }
        harness.send(Packet::Ack(1)).await;

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_shutdown_aborts_stalled_transfer_after_grace() {
        let root = root_with("snp.efi", &[0u8; 2048]);
        let harness = Harness::start(root.path(), Duration::from_millis(100)).await;

        harness.read("snp.efi", &[]).await;
        assert!(matches!(harness.recv().await, Packet::Data { block: 1, .. }));

        // never ACK; the server must still stop once the grace period expires
        harness.stop().await;
    }
}
