//! Gopher protocol implementation (RFC 1436).
//!
//! A request is a single selector line; the response is either a menu
//! of the directory the selector names or the raw bytes of a file.
//!
//! ```text
//! Request:  <selector>\r\n
//! Menu:     <type><display>\t<selector>\t<host>\t<port>\r\n  (one per entry)
//! File:     <file bytes, no framing>
//! ```
//!
//! The connection is closed after every response. Errors are never
//! reported on the wire; the connection is simply closed.
//!
//! ## Modules
//! - `selector`: cleans the selector and confines it to the server root
//! - `item`: maps directory entries to item type codes
//! - `menu`: renders directory listings
//! - `handler`: drives one connection from request line to close

pub mod handler;
pub mod item;
pub mod menu;
pub mod selector;

pub use handler::handle_connection;
pub use item::ExtensionMatch;

use std::path::PathBuf;

/// Read-only settings shared by every connection.
#[derive(Debug, Clone)]
pub struct Site {
    /// Absolute directory that no selector may escape.
    pub root: PathBuf,
    /// Host advertised in menu lines.
    pub host: String,
    /// Port advertised in menu lines.
    pub port: u16,
    pub extension_match: ExtensionMatch,
    pub listing_terminator: bool,
}
