use std::collections::BTreeMap;
use std::io::{Cursor, Write};

use thiserror::Error;

use crate::openxml::{parse_relationships, resolve_target};
use crate::zip_util::{zip_part_names_equivalent, InflateBudget};

const REL_TYPE_OFFICE_DOCUMENT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
const DEFAULT_WORKBOOK_PART: &str = "xl/workbook.xml";

/// Maximum allowed *inflated* bytes for a single ZIP entry in an XLSX package.
pub const MAX_XLSX_PACKAGE_PART_BYTES: u64 = 256 * 1024 * 1024; // 256 MiB

/// Maximum allowed *inflated* bytes across all ZIP entries in an XLSX package.
pub const MAX_XLSX_PACKAGE_TOTAL_BYTES: u64 = 512 * 1024 * 1024; // 512 MiB

/// Size limits enforced by [`XlsxPackage::from_bytes_limited`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XlsxPackageLimits {
    /// Maximum allowed uncompressed bytes for any single part.
    pub max_part_bytes: u64,
    /// Maximum allowed uncompressed bytes across the whole package.
    pub max_total_bytes: u64,
}

impl Default for XlsxPackageLimits {
    fn default() -> Self {
        Self {
            max_part_bytes: MAX_XLSX_PACKAGE_PART_BYTES,
            max_total_bytes: MAX_XLSX_PACKAGE_TOTAL_BYTES,
        }
    }
}

#[derive(Debug, Error)]
pub enum XlsxError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("xml error: {0}")]
    RoXml(#[from] roxmltree::Error),
    #[error("utf-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("xml attribute error: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
    #[error("missing required attribute: {0}")]
    MissingAttr(&'static str),
    #[error("missing xlsx part: {0}")]
    MissingPart(String),
    #[error("invalid xlsx: {0}")]
    Invalid(String),
    #[error("xlsx package part is too large to load safely: {part} is {size} bytes (max {max} bytes)")]
    PartTooLarge { part: String, size: u64, max: u64 },
    #[error("xlsx package is too large to load safely: {total} bytes uncompressed (max {max})")]
    PackageTooLarge { total: u64, max: u64 },
}

/// Key/value view of an OPC container, keyed by part name.
///
/// Lookups are expected to tolerate the same producer quirks as [`XlsxPackage::part`] (leading
/// `/`, `\` separators, ASCII case). Writes replace an equivalent existing part in place.
pub trait PartStore {
    fn part(&self, name: &str) -> Option<&[u8]>;
    fn set_part(&mut self, name: &str, bytes: Vec<u8>);
    fn remove_part(&mut self, name: &str) -> Option<Vec<u8>>;

    fn has_part(&self, name: &str) -> bool {
        self.part(name).is_some()
    }
}

/// In-memory representation of an XLSX/XLSM package as a map of part name -> bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XlsxPackage {
    parts: BTreeMap<String, Vec<u8>>,
}

impl XlsxPackage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, XlsxError> {
        Self::from_bytes_limited(bytes, XlsxPackageLimits::default())
    }

    pub fn from_bytes_limited(bytes: &[u8], limits: XlsxPackageLimits) -> Result<Self, XlsxError> {
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes))?;

        let mut parts = BTreeMap::new();
        let mut budget = InflateBudget::new(limits);
        for i in 0..zip.len() {
            let file = zip.by_index(i)?;
            if !file.is_file() {
                continue;
            }
            let name = file.name().to_string();
            let declared_size = file.size();
            let bytes = budget.read_part(&name, declared_size, file)?;
            parts.insert(name, bytes);
        }

        Ok(Self { parts })
    }

    /// Construct a package from an already-inflated part map.
    pub fn from_parts(parts: BTreeMap<String, Vec<u8>>) -> Self {
        Self { parts }
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        let key = self.existing_key(name)?;
        self.parts.get(key).map(Vec::as_slice)
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.keys().map(String::as_str)
    }

    pub fn parts_map(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.parts
    }

    pub fn set_part(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        let name = name.into();
        let key = match self.existing_key(&name) {
            Some(existing) => existing.to_string(),
            None => name.strip_prefix('/').map(str::to_string).unwrap_or(name),
        };
        self.parts.insert(key, bytes);
    }

    pub fn remove_part(&mut self, name: &str) -> Option<Vec<u8>> {
        let key = self.existing_key(name)?.to_string();
        self.parts.remove(&key)
    }

    pub fn write_to_bytes(&self) -> Result<Vec<u8>, XlsxError> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> Result<(), XlsxError> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::FileOptions::<()>::default()
            .compression_method(zip::CompressionMethod::Deflated);

        for (name, bytes) in &self.parts {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(bytes)?;
        }

        let cursor = zip.finish()?;
        w.write_all(&cursor.into_inner())?;
        Ok(())
    }

    /// Find the stored key for `name`, preferring exact matches over the tolerant scan.
    fn existing_key(&self, name: &str) -> Option<&str> {
        if let Some((key, _)) = self.parts.get_key_value(name) {
            return Some(key.as_str());
        }
        if let Some((key, _)) = name
            .strip_prefix('/')
            .and_then(|stripped| self.parts.get_key_value(stripped))
        {
            return Some(key.as_str());
        }

        // Non-canonical producer output: `\` separators, ASCII case differences, percent-encoding.
        self.parts
            .keys()
            .find(|key| zip_part_names_equivalent(key.as_str(), name))
            .map(String::as_str)
    }
}

impl PartStore for XlsxPackage {
    fn part(&self, name: &str) -> Option<&[u8]> {
        XlsxPackage::part(self, name)
    }

    fn set_part(&mut self, name: &str, bytes: Vec<u8>) {
        XlsxPackage::set_part(self, name, bytes)
    }

    fn remove_part(&mut self, name: &str) -> Option<Vec<u8>> {
        XlsxPackage::remove_part(self, name)
    }
}

/// Locate the main workbook part via the package-level `_rels/.rels` `officeDocument`
/// relationship, falling back to `xl/workbook.xml`.
pub fn workbook_part_name<S: PartStore + ?Sized>(store: &S) -> Result<String, XlsxError> {
    if let Some(root_rels) = store.part("_rels/.rels") {
        let office_document = parse_relationships(root_rels)?
            .into_iter()
            .find(|rel| rel.type_uri == REL_TYPE_OFFICE_DOCUMENT);
        if let Some(rel) = office_document {
            let resolved = resolve_target("", &rel.target);
            if store.has_part(&resolved) {
                return Ok(resolved);
            }
        }
    }
    Ok(DEFAULT_WORKBOOK_PART.to_string())
}
