use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use html_escape::{encode_double_quoted_attribute, encode_text};

use crate::files::resolve::strip_query;

struct Entry {
    name: String,
    is_dir: bool,
}

/// Renders an HTML index of `dir`.
///
/// `uri` is the request target the listing answers; links are built from it
/// so they work with or without a trailing slash.
pub fn render(dir: &Path, uri: &str) -> io::Result<Vec<u8>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        // Follow symlinks so a link to a directory is listed as one.
        let is_dir = fs::metadata(entry.path())
            .map(|m| m.is_dir())
            .unwrap_or(false);
        entries.push(Entry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir,
        });
    }
    entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));

    let raw_path = strip_query(uri);
    let base = if raw_path.ends_with('/') {
        raw_path.to_string()
    } else {
        format!("{raw_path}/")
    };
    let decoded = urlencoding::decode(&base).unwrap_or_else(|_| base.as_str().into());
    let title = encode_text(&decoded);

    let mut html = String::with_capacity(512 + entries.len() * 96);
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>Index of {title}</title></head>\n\
         <body>\n<h1>Index of {title}</h1>\n<hr>\n<ul>\n"
    );
    if base != "/" {
        let parent = format!("{base}..");
        let _ = writeln!(
            html,
            "<li><a href=\"{}\">../</a></li>",
            encode_double_quoted_attribute(&parent)
        );
    }
    for entry in &entries {
        let slash = if entry.is_dir { "/" } else { "" };
        let href = format!("{base}{}{slash}", urlencoding::encode(&entry.name));
        let _ = writeln!(
            html,
            "<li><a href=\"{href}\">{name}{slash}</a></li>",
            href = encode_double_quoted_attribute(&href),
            name = encode_text(&entry.name),
        );
    }
    html.push_str("</ul>\n<hr>\n</body>\n</html>\n");

    Ok(html.into_bytes())
}
