//! Formula-level reference tokens (`[1]`, `[C:\Data\Prices.xlsx]`, `[https://host/a.xlsx]`) to
//! registry positions.

use super::link::ExternalLink;

const WEB_PROTOCOLS: [&str; 4] = ["http://", "https://", "ftp://", "ftps://"];
const FILE_SCHEME: &str = "file:///";

pub(crate) fn has_web_protocol(uri: &str) -> bool {
    WEB_PROTOCOLS.iter().any(|scheme| {
        uri.get(..scheme.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(scheme))
    })
}

/// Drop a `file:///` prefix. `file:///C:/x` becomes `C:/x`; `file:///srv/x` keeps its root.
pub(crate) fn strip_file_scheme(uri: &str) -> &str {
    match uri.strip_prefix(FILE_SCHEME) {
        Some(rest) if has_drive_prefix(rest) => rest,
        Some(_) => &uri[FILE_SCHEME.len() - 1..],
        None => uri,
    }
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Unicode case-insensitive equality without allocating folded copies.
fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// A filesystem path resolved lexically to an absolute, `/`-separated form.
#[derive(Debug, PartialEq, Eq)]
struct FullPath(String);

impl FullPath {
    fn new(path: &str) -> Self {
        let path = path.replace('\\', "/");
        let rooted = if is_rooted(&path) {
            path
        } else {
            // Relative paths are anchored at the process working directory.
            let cwd = std::env::current_dir()
                .map(|dir| dir.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            format!("{}/{path}", cwd.trim_end_matches('/'))
        };
        Self(collapse_dot_segments(&rooted))
    }

    fn file_name(&self) -> Option<&str> {
        self.0.rsplit('/').next().filter(|name| !name.is_empty())
    }
}

fn is_rooted(path: &str) -> bool {
    path.starts_with('/') || has_drive_prefix(path)
}

fn collapse_dot_segments(path: &str) -> String {
    let (root, rest) = match path.strip_prefix('/') {
        Some(rest) => ("/", rest),
        None => match path.split_once('/') {
            // Drive-letter root (`C:`).
            Some((drive, rest)) if drive.ends_with(':') => (drive, rest),
            _ => ("", path),
        },
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    match root {
        "/" => format!("/{}", segments.join("/")),
        "" => segments.join("/"),
        drive => format!("{drive}/{}", segments.join("/")),
    }
}

/// Resolve `token` to a zero-based position in `links`.
///
/// Digit-only tokens are 1-based ordinals. Web-protocol tokens match workbook reference URIs
/// case-insensitively and never fall back. Anything else is treated as a local path: a full-path
/// match wins immediately, otherwise the last workbook sharing the token's file name is returned.
pub(crate) fn resolve_reference(links: &[ExternalLink], token: &str) -> Option<usize> {
    if token.is_empty() {
        return None;
    }

    if token.bytes().all(|b| b.is_ascii_digit()) {
        let ordinal: usize = token.parse().ok()?;
        let index = ordinal.checked_sub(1)?;
        return (index < links.len()).then_some(index);
    }

    let mut workbooks = links
        .iter()
        .enumerate()
        .filter_map(|(index, link)| link.as_workbook().map(|book| (index, book)));

    if has_web_protocol(token) {
        return workbooks
            .find(|(_, book)| eq_ignore_case(book.reference_uri(), token))
            .map(|(index, _)| index);
    }

    let wanted = FullPath::new(strip_file_scheme(token));
    let mut by_file_name = None;
    for (index, book) in workbooks {
        let uri = book.reference_uri();
        if has_web_protocol(uri) {
            if eq_ignore_case(uri, token) {
                return Some(index);
            }
            continue;
        }

        let candidate = FullPath::new(strip_file_scheme(uri));
        if candidate == wanted {
            return Some(index);
        }
        if candidate.file_name().is_some() && candidate.file_name() == wanted.file_name() {
            by_file_name = Some(index);
        }
    }
    by_file_name
}
