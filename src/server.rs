//! TCP listener for Gopher connections.
//!
//! Accepts connections and spawns one independent task per connection.
//! Fan-out is unbounded unless `max_connections` is configured.

use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::gopher::{handle_connection, Site};

/// Pause before accepting again after running out of descriptors or memory.
const EXHAUSTED_BACKOFF: Duration = Duration::from_millis(100);

/// Server instance
pub struct Server {
    listen: String,
    site: Arc<Site>,
    request_timeout: Option<Duration>,
    connection_limit: Option<Arc<Semaphore>>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: &Config) -> Self {
        Server {
            listen: config.listen.clone(),
            site: config.site(),
            request_timeout: config.request_timeout,
            connection_limit: config
                .max_connections
                .map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    /// Bind the configured address and serve until accept fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.listen).await?;
        info!(address = %listener.local_addr()?, root = %self.site.root.display(), "Server listening");
        self.serve(listener).await?;
        Ok(())
    }

    /// Accept loop over an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        loop {
            // Wait for a connection slot
            let permit = match &self.connection_limit {
                Some(limit) => Some(Arc::clone(limit).acquire_owned().await.map_err(|e| {
                    error!(error = %e, "Connection limit closed");
                    io::Error::other(e)
                })?),
                None => None,
            };

            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "New connection");

                    let site = Arc::clone(&self.site);
                    let request_timeout = self.request_timeout;

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &site, request_timeout).await {
                            debug!(peer = %peer, error = %e, "Connection closed without response");
                        }
                        drop(permit);
                    });
                }
                Err(e) => accept_failed(e).await?,
            }
        }
    }
}

/// How the accept loop reacts to a failed `accept`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptFailure {
    /// Caused by a single peer; accept again right away.
    Transient,
    /// Process ran out of descriptors, buffers or memory; back off and retry.
    Exhausted,
    /// Listener itself is broken.
    Fatal,
}

fn classify_accept_error(e: &io::Error) -> AcceptFailure {
    match e.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => return AcceptFailure::Transient,
        io::ErrorKind::OutOfMemory => return AcceptFailure::Exhausted,
        _ => {}
    }
    match e.raw_os_error() {
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM) => {
            AcceptFailure::Exhausted
        }
        _ => AcceptFailure::Fatal,
    }
}

/// Log an accept failure; only a fatal one is returned to end the loop.
async fn accept_failed(e: io::Error) -> io::Result<()> {
    match classify_accept_error(&e) {
        AcceptFailure::Transient => {
            debug!(error = %e, "Transient accept failure");
            Ok(())
        }
        AcceptFailure::Exhausted => {
            warn!(error = %e, "Accept failed on exhausted resources, backing off");
            tokio::time::sleep(EXHAUSTED_BACKOFF).await;
            Ok(())
        }
        AcceptFailure::Fatal => {
            error!(error = %e, "Failed to accept connection");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gopher::ExtensionMatch;
    use std::net::SocketAddr;
    use std::path::Path;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn config(root: &Path, max_connections: Option<usize>) -> Config {
        Config {
            listen: "127.0.0.1:0".to_string(),
            root: root.to_path_buf(),
            host: "127.0.0.1".to_string(),
            port: 70,
            max_connections,
            request_timeout: None,
            extension_match: ExtensionMatch::Suffix,
            listing_terminator: false,
            log_level: "info".to_string(),
        }
    }

    async fn start(config: Config) -> SocketAddr {
        let listener = TcpListener::bind(&config.listen).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Server::new(&config);
        tokio::spawn(async move { server.serve(listener).await });
        addr
    }

    async fn request(addr: SocketAddr, line: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(line).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        response
    }

    fn doc_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("articles")).unwrap();
        std::fs::write(dir.path().join("articles/a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("articles/b.txt"), b"b").unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"read me\r\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_scenario_over_tcp() {
        let dir = doc_tree();
        let addr = start(config(dir.path(), None)).await;

        assert_eq!(
            request(addr, b"\r\n").await,
            b"1articles\tarticles\t127.0.0.1\t70\r\n\
              0readme.txt\treadme.txt\t127.0.0.1\t70\r\n"
        );
        assert_eq!(
            request(addr, b"articles\r\n").await,
            b"0a.txt\tarticles/a.txt\t127.0.0.1\t70\r\n\
              0b.txt\tarticles/b.txt\t127.0.0.1\t70\r\n"
        );
        assert_eq!(request(addr, b"readme.txt\r\n").await, b"read me\r\n");
        assert!(request(addr, b"../../etc/passwd\r\n").await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_connections() {
        let dir = doc_tree();
        let addr = start(config(dir.path(), Some(2))).await;

        // An idle client holds one slot; the other still serves requests.
        let _idle = TcpStream::connect(addr).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            tasks.push(tokio::spawn(async move {
                request(addr, b"readme.txt\r\n").await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), b"read me\r\n");
        }
    }

    #[tokio::test]
    async fn test_connection_limit_holds_back_requests() {
        let dir = doc_tree();
        let addr = start(config(dir.path(), Some(1))).await;

        // The only slot is taken by a client that never sends a request.
        let idle = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut pending = tokio::spawn(async move { request(addr, b"readme.txt\r\n").await });
        assert!(
            tokio::time::timeout(Duration::from_millis(200), &mut pending)
                .await
                .is_err(),
            "request served while the slot was held"
        );

        drop(idle);
        let response = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .expect("request not served after the slot was freed")
            .unwrap();
        assert_eq!(response, b"read me\r\n");
    }

    #[test]
    fn test_classify_accept_error() {
        let kind = |kind| classify_accept_error(&io::Error::from(kind));
        let os = |code| classify_accept_error(&io::Error::from_raw_os_error(code));

        assert_eq!(kind(io::ErrorKind::ConnectionAborted), AcceptFailure::Transient);
        assert_eq!(kind(io::ErrorKind::ConnectionReset), AcceptFailure::Transient);
        assert_eq!(kind(io::ErrorKind::OutOfMemory), AcceptFailure::Exhausted);
        assert_eq!(os(libc::EMFILE), AcceptFailure::Exhausted);
        assert_eq!(os(libc::ENFILE), AcceptFailure::Exhausted);
        assert_eq!(os(libc::ENOBUFS), AcceptFailure::Exhausted);
        assert_eq!(os(libc::ENOMEM), AcceptFailure::Exhausted);
        assert_eq!(os(libc::EBADF), AcceptFailure::Fatal);
        assert_eq!(kind(io::ErrorKind::PermissionDenied), AcceptFailure::Fatal);
    }

    #[tokio::test]
    async fn test_descriptor_exhaustion_keeps_loop_alive() {
        let started = std::time::Instant::now();
        accept_failed(io::Error::from_raw_os_error(libc::EMFILE))
            .await
            .expect("running out of descriptors must not end the accept loop");
        assert!(started.elapsed() >= EXHAUSTED_BACKOFF);

        assert!(accept_failed(io::Error::from_raw_os_error(libc::EBADF))
            .await
            .is_err());
    }
}
