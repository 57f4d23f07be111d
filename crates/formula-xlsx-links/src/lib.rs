//! External workbook links for XLSX/XLSM packages.
//!
//! The crate exposes:
//!
//! - [`XlsxPackage`]: an in-memory Open Packaging Convention (OPC) package (part name -> bytes),
//!   and the [`PartStore`] trait the link table reads and edits through.
//! - [`ExternalReferences`]: the ordered table of external links declared by the workbook's
//!   `<externalReferences>` element. Formulas address it with 1-based tokens (`[1]Sheet1!A1`) or
//!   with a file name/URL; [`ExternalReferences::resolve`] maps either to a position.
//! - [`openxml`]: relationship parsing and editing helpers shared by the link table.
//!
//! Deleting links rewrites formulas through a caller-supplied [`FormulaLinkBreaker`] before any
//! part or XML is touched.

mod content_types;
pub mod external_references;
pub mod openxml;
mod package;
mod zip_util;

pub use external_references::{
    CachedCell, CachedSheetData, DdeLink, ExternalDefinedName, ExternalLink, ExternalLinkError,
    ExternalLinkKind, ExternalLinkOptions, ExternalLinkType, ExternalReferences, ExternalWorkbook,
    FormulaLinkBreaker, OleLink,
};
pub use package::{
    workbook_part_name, PartStore, XlsxError, XlsxPackage, XlsxPackageLimits,
    MAX_XLSX_PACKAGE_PART_BYTES, MAX_XLSX_PACKAGE_TOTAL_BYTES,
};
