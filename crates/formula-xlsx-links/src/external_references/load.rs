use std::path::{Path, PathBuf};

use super::link::ExternalWorkbook;
use super::resolve::{has_web_protocol, strip_file_scheme};
use super::ExternalLinkError;
use crate::{XlsxPackage, XlsxPackageLimits};

/// Where external workbook files are looked up when links are loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalLinkOptions {
    /// Directory of the workbook owning the links; relative references are tried here first.
    pub workbook_dir: Option<PathBuf>,
    /// Extra directories probed for references that are not reachable as written.
    pub directories: Vec<PathBuf>,
    /// Inflation limits applied to every loaded external package.
    pub limits: XlsxPackageLimits,
}

impl ExternalWorkbook {
    /// Load the referenced workbook into [`package`](Self::package).
    ///
    /// Web-protocol references are never fetched. On failure the reason is kept in
    /// [`load_error`](Self::load_error) and any previously loaded package is left in place.
    pub fn load(&mut self, options: &ExternalLinkOptions) -> Result<(), ExternalLinkError> {
        match read_external_package(&self.reference_uri, options) {
            Ok(package) => {
                self.set_package(package);
                Ok(())
            }
            Err(err) => {
                self.load_error = Some(err.to_string());
                Err(err)
            }
        }
    }
}

fn read_external_package(
    uri: &str,
    options: &ExternalLinkOptions,
) -> Result<XlsxPackage, ExternalLinkError> {
    let fail = |reason: String| ExternalLinkError::Load {
        uri: uri.to_string(),
        reason,
    };

    if uri.trim().is_empty() {
        return Err(fail("reference is empty".to_string()));
    }
    if has_web_protocol(uri) {
        return Err(fail("web references are not fetched".to_string()));
    }

    let path = candidate_paths(uri, options)
        .into_iter()
        .find(|path| path.is_file())
        .ok_or_else(|| fail("file not found".to_string()))?;

    let bytes =
        std::fs::read(&path).map_err(|err| fail(format!("{}: {err}", path.display())))?;
    XlsxPackage::from_bytes_limited(&bytes, options.limits)
        .map_err(|err| fail(format!("{}: {err}", path.display())))
}

/// Paths probed for `uri`, in order.
pub(crate) fn candidate_paths(uri: &str, options: &ExternalLinkOptions) -> Vec<PathBuf> {
    let local = strip_file_scheme(uri);
    let path = if std::path::MAIN_SEPARATOR == '\\' {
        PathBuf::from(local)
    } else {
        PathBuf::from(local.replace('\\', "/"))
    };

    let mut candidates = Vec::new();
    if path.is_absolute() {
        candidates.push(path.clone());
    } else {
        if let Some(dir) = &options.workbook_dir {
            candidates.push(dir.join(&path));
        }
        candidates.push(path.clone());
    }

    let file_name = path.file_name().map(Path::new);
    for dir in &options.directories {
        if path.is_relative() {
            candidates.push(dir.join(&path));
        }
        if let Some(name) = file_name {
            candidates.push(dir.join(name));
        }
    }
    candidates.dedup();
    candidates
}
