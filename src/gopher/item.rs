//! Gopher item types.

use serde::Deserialize;
use std::fs::FileType;

/// Kind of a filesystem entry, after following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Other,
}

impl From<FileType> for EntryKind {
    fn from(file_type: FileType) -> Self {
        if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        }
    }
}

/// How file names are compared against the extension table.
///
/// `Prefix` reproduces the historical behaviour where only names that
/// start with the extension (e.g. a file literally named `.html`) match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionMatch {
    #[default]
    Suffix,
    Prefix,
}

impl ExtensionMatch {
    fn matches(self, name: &str, extension: &str) -> bool {
        match self {
            ExtensionMatch::Suffix => name.ends_with(extension),
            ExtensionMatch::Prefix => name.starts_with(extension),
        }
    }
}

/// Item type code written as the first byte of a menu line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    /// `0`: plain text file
    Text,
    /// `1`: directory
    Directory,
    /// `9`: binary file
    Binary,
    /// `g`: GIF image
    Gif,
    /// `h`: HTML file
    Html,
    /// `I`: image of unspecified format
    Image,
}

/// Extension table, checked in order; first match wins.
const EXTENSIONS: &[(&str, ItemType)] = &[
    (".html", ItemType::Html),
    (".txt", ItemType::Text),
    (".gif", ItemType::Gif),
    (".png", ItemType::Image),
    (".jpg", ItemType::Image),
    (".jpeg", ItemType::Image),
];

impl ItemType {
    /// Classify an entry by kind and, for non-directories, by file name.
    pub fn classify(kind: EntryKind, name: &str, mode: ExtensionMatch) -> Self {
        if kind == EntryKind::Directory {
            return ItemType::Directory;
        }
        EXTENSIONS
            .iter()
            .find(|(extension, _)| mode.matches(name, extension))
            .map(|&(_, item_type)| item_type)
            .unwrap_or(ItemType::Binary)
    }

    pub fn code(self) -> u8 {
        match self {
            ItemType::Text => b'0',
            ItemType::Directory => b'1',
            ItemType::Binary => b'9',
            ItemType::Gif => b'g',
            ItemType::Html => b'h',
            ItemType::Image => b'I',
        }
    }
}
