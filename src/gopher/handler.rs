//! Gopher connection handler.
//!
//! One request per connection: read the selector line, resolve it,
//! write a menu or the file bytes, flush and close.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};
use tracing::{debug, trace};

use super::item::EntryKind;
use super::menu::{format_listing, read_entries, MenuOptions};
use super::selector::{parse_request_line, resolve, ResolveError};
use super::Site;

/// Longest accepted selector, excluding the line terminator.
pub const MAX_SELECTOR_LEN: usize = 4096;

/// Write buffer size
const BUFFER_SIZE: usize = 16 * 1024;

/// Reasons a connection ends without a complete response.
#[derive(Debug)]
pub enum HandlerError {
    /// Client closed or failed before sending a full request line.
    ReadFailure(io::Error),
    RequestTooLong,
    /// No request line within the configured deadline.
    Timeout,
    Resolution(ResolveError),
    /// Entry is neither a directory nor a regular file.
    UnsupportedEntryKind(PathBuf),
    /// Writing the response failed.
    Io(io::Error),
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::ReadFailure(e) => write!(f, "failed to read request line: {e}"),
            HandlerError::RequestTooLong => {
                write!(f, "request line longer than {MAX_SELECTOR_LEN} bytes")
            }
            HandlerError::Timeout => write!(f, "timed out waiting for request line"),
            HandlerError::Resolution(e) => write!(f, "{e}"),
            HandlerError::UnsupportedEntryKind(path) => {
                write!(f, "unsupported file type with file '{}'", path.display())
            }
            HandlerError::Io(e) => write!(f, "failed to write response: {e}"),
        }
    }
}

impl std::error::Error for HandlerError {}

impl From<ResolveError> for HandlerError {
    fn from(e: ResolveError) -> Self {
        HandlerError::Resolution(e)
    }
}

/// Handle a Gopher connection.
///
/// Nothing is written unless the selector resolves. Once a response has
/// started, the output is flushed and the stream shut down even if the
/// response fails part way.
pub async fn handle_connection<S>(
    mut stream: S,
    site: &Site,
    request_timeout: Option<Duration>,
) -> Result<(), HandlerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let line = match request_timeout {
        Some(limit) => tokio::time::timeout(limit, read_request_line(&mut stream))
            .await
            .map_err(|_| HandlerError::Timeout)??,
        None => read_request_line(&mut stream).await?,
    };

    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, &mut stream);
    let result = respond(&line, site, &mut writer).await;
    let closed = writer.shutdown().await;

    result?;
    closed.map_err(HandlerError::Io)
}

/// Read up to and including the first `\n`.
async fn read_request_line<R>(stream: R) -> Result<Vec<u8>, HandlerError>
where
    R: AsyncRead + Unpin,
{
    // Room for the selector plus "\r\n".
    let limit = MAX_SELECTOR_LEN + 2;
    let mut reader = BufReader::new(stream).take(limit as u64);
    let mut line = Vec::with_capacity(256);

    reader
        .read_until(b'\n', &mut line)
        .await
        .map_err(HandlerError::ReadFailure)?;

    if let Some(selector) = line.strip_suffix(b"\n") {
        let selector = selector.strip_suffix(b"\r").unwrap_or(selector);
        if selector.len() > MAX_SELECTOR_LEN {
            return Err(HandlerError::RequestTooLong);
        }
        Ok(line)
    } else if line.len() >= limit {
        Err(HandlerError::RequestTooLong)
    } else {
        Err(HandlerError::ReadFailure(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before end of request line",
        )))
    }
}

async fn respond<W>(line: &[u8], site: &Site, writer: &mut W) -> Result<(), HandlerError>
where
    W: AsyncWrite + Unpin,
{
    let selector = parse_request_line(line)?;
    let resolved = resolve(&site.root, selector).await.inspect_err(|e| {
        debug!(selector, error = %e, "Failed to resolve selector");
    })?;
    trace!(selector, path = %resolved.path.display(), kind = ?resolved.kind, "Resolved");

    match resolved.kind {
        EntryKind::Directory => {
            let entries = read_entries(&resolved.path)
                .await
                .map_err(|e| ResolveError::Unreadable(resolved.path.clone(), e))?;
            let menu = format_listing(
                entries,
                |name| resolved.child_selector(name),
                MenuOptions {
                    host: &site.host,
                    port: site.port,
                    extension_match: site.extension_match,
                    terminator: site.listing_terminator,
                },
            );
            writer.write_all(&menu).await.map_err(HandlerError::Io)?;
        }
        EntryKind::File => {
            let mut file = tokio::fs::File::open(&resolved.path)
                .await
                .map_err(|e| ResolveError::Unreadable(resolved.path.clone(), e))?;
            let sent = tokio::io::copy(&mut file, writer)
                .await
                .map_err(HandlerError::Io)?;
            trace!(selector, bytes = sent, "File sent");
        }
        EntryKind::Other => return Err(HandlerError::UnsupportedEntryKind(resolved.path)),
    }

    Ok(())
}
