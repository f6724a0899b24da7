//! Directory menu rendering.

use bytes::{BufMut, BytesMut};
use std::path::Path;
use tracing::{debug, warn};

use super::item::{EntryKind, ExtensionMatch, ItemType};

/// Listing terminator written after the last item when enabled.
pub const TERMINATOR: &[u8] = b".\r\n";

/// A directory entry as seen by the menu renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// One line of a Gopher menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItem<'a> {
    pub item_type: ItemType,
    pub display: &'a str,
    pub selector: String,
    pub host: &'a str,
    pub port: u16,
}

impl MenuItem<'_> {
    /// Append `<type><display>\t<selector>\t<host>\t<port>\r\n`.
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.item_type.code());
        buf.extend_from_slice(self.display.as_bytes());
        buf.put_u8(b'\t');
        buf.extend_from_slice(self.selector.as_bytes());
        buf.put_u8(b'\t');
        buf.extend_from_slice(self.host.as_bytes());
        buf.put_u8(b'\t');
        buf.extend_from_slice(self.port.to_string().as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
}

/// Rendering parameters for one listing.
#[derive(Debug, Clone, Copy)]
pub struct MenuOptions<'a> {
    pub host: &'a str,
    pub port: u16,
    pub extension_match: ExtensionMatch,
    pub terminator: bool,
}

/// Render `entries` sorted by name.
///
/// `child_selector` maps an entry name to the selector advertised for it.
pub fn format_listing<F>(
    mut entries: Vec<DirEntry>,
    child_selector: F,
    options: MenuOptions<'_>,
) -> BytesMut
where
    F: Fn(&str) -> String,
{
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    let mut buf = BytesMut::with_capacity(entries.len() * 64);
    for entry in &entries {
        MenuItem {
            item_type: ItemType::classify(entry.kind, &entry.name, options.extension_match),
            display: &entry.name,
            selector: child_selector(&entry.name),
            host: options.host,
            port: options.port,
        }
        .write_to(&mut buf);
    }
    if options.terminator {
        buf.extend_from_slice(TERMINATOR);
    }
    buf
}

/// Names that would break the tab/CRLF framing of a menu line.
fn representable(name: &str) -> bool {
    !name.contains(['\t', '\r', '\n'])
}

/// List the immediate children of `dir`.
///
/// Entries that cannot be inspected are skipped and the listing continues.
pub async fn read_entries(dir: &Path) -> std::io::Result<Vec<DirEntry>> {
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    let mut entries = Vec::new();

    loop {
        let entry = match read_dir.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Directory read failed, listing truncated");
                break;
            }
        };

        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            warn!(path = %entry.path().display(), "Skipping non UTF-8 entry name");
            continue;
        };
        if !representable(&name) {
            warn!(path = %entry.path().display(), "Skipping entry name with control characters");
            continue;
        }

        // Follow symlinks, as selector resolution does.
        match tokio::fs::metadata(entry.path()).await {
            Ok(metadata) => entries.push(DirEntry {
                name,
                kind: metadata.file_type().into(),
            }),
            Err(e) => {
                debug!(path = %entry.path().display(), error = %e, "Skipping entry");
            }
        }
    }

    Ok(entries)
}
