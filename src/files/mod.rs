//! Static file serving.
//!
//! - **`resolve`**: maps request targets to paths inside the document root
//! - **`listing`**: HTML index pages for directories without `index.html`

use std::fs::File;
use std::io;
use std::path::Path;

use crate::http::mime;
use crate::http::response::{Response, ResponseBuilder, StatusCode};

pub mod listing;
pub mod resolve;

pub use resolve::{PathResolver, ResolveError, Resolved};

/// 200 response streaming `path` from disk.
///
/// The length is taken from the open handle's metadata, so it matches what
/// the writer will read unless the file changes underneath.
pub fn file_response(path: &Path) -> io::Result<Response> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();

    Ok(ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Type", mime::content_type(path))
        .file(file, len)
        .build())
}

/// 200 response carrying a generated listing of `dir`.
pub fn listing_response(dir: &Path, uri: &str) -> io::Result<Response> {
    let body = listing::render(dir, uri)?;

    Ok(ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Type", "text/html; charset=utf-8")
        .body(body)
        .build())
}
