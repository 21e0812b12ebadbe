use std::ffi::OsStr;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::{DirectoryIndex, ServerConfig};
use crate::http::response::StatusCode;

pub const INDEX_FILE: &str = "index.html";

#[derive(Debug, Error)]
pub enum ResolveError {
    /// Missing, unreadable during canonicalization, or outside the root.
    /// The client sees the same 404 for all three.
    #[error("not found")]
    NotFound,
    #[error("directory has no index and listings are disabled")]
    Forbidden,
    #[error("filesystem error: {0}")]
    Io(#[from] io::Error),
}

impl ResolveError {
    pub fn status(&self) -> StatusCode {
        match self {
            ResolveError::NotFound => StatusCode::NotFound,
            ResolveError::Forbidden => StatusCode::Forbidden,
            ResolveError::Io(_) => StatusCode::InternalServerError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    File(PathBuf),
    /// Directory without an index file, to be rendered as a listing
    Directory(PathBuf),
}

/// Maps request targets onto files below the document root.
#[derive(Debug, Clone, Copy)]
pub struct PathResolver<'a> {
    root: &'a Path,
    directory_index: DirectoryIndex,
}

impl<'a> PathResolver<'a> {
    pub fn new(config: &'a ServerConfig) -> Self {
        Self::with_root(&config.document_root, config.directory_index)
    }

    /// `root` must already be canonical.
    pub fn with_root(root: &'a Path, directory_index: DirectoryIndex) -> Self {
        Self {
            root,
            directory_index,
        }
    }

    pub fn resolve(&self, uri: &str) -> Result<Resolved, ResolveError> {
        let decoded = urlencoding::decode_binary(strip_query(uri).as_bytes());

        let mut candidate = self.root.to_path_buf();
        for segment in decoded.split(|b| *b == b'/') {
            match segment {
                b"" | b"." => continue,
                s if s.contains(&0) => return Err(ResolveError::NotFound),
                s => candidate.push(OsStr::from_bytes(s)),
            }
        }

        // Containment comes first; index and listing fallbacks only ever see
        // paths already known to be inside the root.
        let canonical = self.contain(&candidate)?;
        if !fs::metadata(&canonical)?.is_dir() {
            return Ok(Resolved::File(canonical));
        }

        match self.contain(&canonical.join(INDEX_FILE)) {
            Ok(index) if index.is_file() => return Ok(Resolved::File(index)),
            Ok(_) | Err(ResolveError::NotFound) => {}
            Err(e) => return Err(e),
        }

        match self.directory_index {
            DirectoryIndex::Listing => Ok(Resolved::Directory(canonical)),
            DirectoryIndex::Forbidden => Err(ResolveError::Forbidden),
        }
    }

    fn contain(&self, candidate: &Path) -> Result<PathBuf, ResolveError> {
        let canonical = candidate
            .canonicalize()
            .map_err(|_| ResolveError::NotFound)?;
        if !canonical.starts_with(self.root) {
            return Err(ResolveError::NotFound);
        }
        Ok(canonical)
    }
}

/// Request path without `?query` or `#fragment`.
pub fn strip_query(uri: &str) -> &str {
    match uri.find(['?', '#']) {
        Some(end) => &uri[..end],
        None => uri,
    }
}
