//! The workbook's external link table (`<externalReferences>` and `xl/externalLinks/*.xml`).
//!
//! [`ExternalReferences`] is an ordered registry: a link's position is its identity, and position
//! `i` always corresponds to the `i`-th `<externalReference>` element of the workbook part and to
//! the 1-based token `[i + 1]` used by formulas. Mutations keep four representations in step: the
//! formulas (through a [`FormulaLinkBreaker`]), the package parts, the workbook XML, and the
//! in-memory list. Indices shift on delete, so callers must not hold them across mutations.

mod error;
mod link;
mod load;
mod parse;
mod resolve;
mod workbook_xml;

use std::collections::HashSet;
use std::ops::Index;
use std::path::PathBuf;

pub use error::ExternalLinkError;
pub use link::{
    CachedCell, CachedSheetData, DdeLink, ExternalDefinedName, ExternalLink, ExternalLinkKind,
    ExternalLinkType, ExternalWorkbook, OleLink,
};
pub use load::ExternalLinkOptions;

use crate::content_types::{ensure_override, remove_overrides, CONTENT_TYPES_PART};
use crate::openxml::{append_relationship, rels_part_name, relative_target, remove_relationships};
use crate::package::{workbook_part_name, PartStore};
use crate::XlsxError;
use workbook_xml::ReferenceRemoval;

pub const REL_TYPE_EXTERNAL_LINK: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/externalLink";
pub const REL_TYPE_EXTERNAL_LINK_PATH: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/externalLinkPath";
pub const EXTERNAL_LINK_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.externalLink+xml";

const SPREADSHEETML_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";

/// Rewrites formulas that point into the link table before links disappear.
///
/// Implemented by the formula layer. An error aborts the surrounding delete/clear before anything
/// has been removed.
pub trait FormulaLinkBreaker {
    /// Replace every formula reference to link `link_index` (0-based) with its fallback.
    fn break_links(&mut self, link_index: usize, is_workbook: bool) -> Result<(), ExternalLinkError>;

    /// Replace every formula reference to any external link.
    fn break_all_links(&mut self) -> Result<(), ExternalLinkError>;
}

#[derive(Debug, Clone, Default)]
pub struct ExternalReferences {
    links: Vec<ExternalLink>,
    options: ExternalLinkOptions,
}

impl ExternalReferences {
    /// Empty table, as for a new workbook.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every external link of the workbook in `store`.
    ///
    /// Fails on the first missing relationship, missing part, or malformed link part. A link part
    /// must hold exactly one `externalBook`, `ddeLink`, or `oleLink` element: a part with none of
    /// them is an [`XlsxError::Invalid`] error rather than a skipped entry, and so is a
    /// relationship id or link part referenced twice.
    pub fn load<S: PartStore + ?Sized>(store: &S) -> Result<Self, ExternalLinkError> {
        let mut refs = Self::new();
        for link in parse::load_external_links(store)? {
            refs.add_internal(link);
        }
        Ok(refs)
    }

    pub fn with_options(mut self, options: ExternalLinkOptions) -> Self {
        self.options = options;
        self
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ExternalLink> {
        self.links.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ExternalLink> {
        self.links.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ExternalLink> {
        self.links.iter()
    }

    /// Current position of `link`, matched by its backing part.
    pub fn index_of(&self, link: &ExternalLink) -> Option<usize> {
        self.links
            .iter()
            .position(|candidate| candidate.part_name == link.part_name)
    }

    /// Resolve a formula reference token (`"1"`, a path, or a URL) to a 0-based index.
    ///
    /// `None` means the reference is unresolved; it is not an error.
    pub fn resolve(&self, token: &str) -> Option<usize> {
        resolve::resolve_reference(&self.links, token)
    }

    /// Append a link whose parts and `<externalReference>` element already exist.
    pub(crate) fn add_internal(&mut self, link: ExternalLink) -> usize {
        self.links.push(link);
        self.links.len() - 1
    }

    /// Create a new external workbook link to `uri` and return its index.
    ///
    /// Writes the link part, its `externalLinkPath` relationship, the workbook relationship, the
    /// content-type override, and a trailing `<externalReference>`; the store is untouched if any
    /// of those rewrites fails.
    pub fn add_external_workbook<S: PartStore + ?Sized>(
        &mut self,
        store: &mut S,
        uri: &str,
    ) -> Result<usize, ExternalLinkError> {
        let workbook_part = workbook_part_name(store)?;
        let workbook_xml = store
            .part(&workbook_part)
            .ok_or_else(|| XlsxError::MissingPart(workbook_part.clone()))?;

        let dir = workbook_part
            .rsplit_once('/')
            .map(|(dir, _)| format!("{dir}/"))
            .unwrap_or_default();
        let part_name = (1u32..=u32::MAX)
            .map(|n| format!("{dir}externalLinks/externalLink{n}.xml"))
            .find(|name| !store.has_part(name))
            .ok_or_else(|| XlsxError::Invalid("no free external link part name".to_string()))?;

        let (link_rels, link_rel_id) =
            append_relationship(None, REL_TYPE_EXTERNAL_LINK_PATH, uri, Some("External"))?;
        let workbook_rels_part = rels_part_name(&workbook_part);
        let (workbook_rels, workbook_rel_id) = append_relationship(
            store.part(&workbook_rels_part),
            REL_TYPE_EXTERNAL_LINK,
            &relative_target(&workbook_part, &part_name),
            None,
        )?;
        let updated_workbook = workbook_xml::append_external_reference(workbook_xml, &workbook_rel_id)?;
        let content_types = match store.part(CONTENT_TYPES_PART) {
            Some(xml) => ensure_override(xml, &part_name, EXTERNAL_LINK_CONTENT_TYPE)?,
            None => None,
        };

        store.set_part(&part_name, external_book_part(&link_rel_id));
        store.set_part(&rels_part_name(&part_name), link_rels);
        store.set_part(&workbook_rels_part, workbook_rels);
        store.set_part(&workbook_part, updated_workbook);
        if let Some(content_types) = content_types {
            store.set_part(CONTENT_TYPES_PART, content_types);
        }

        let kind = ExternalLinkKind::Workbook(ExternalWorkbook {
            rel_id: Some(link_rel_id),
            reference_uri: uri.to_string(),
            ..ExternalWorkbook::default()
        });
        let index = self.add_internal(ExternalLink::new(part_name, workbook_rel_id, kind));
        log::debug!("added external workbook link {} -> {uri}", index + 1);
        Ok(index)
    }

    /// Remove the link at `index`.
    ///
    /// Workbook links have their formula references broken first; DDE and OLE links do not. Then
    /// the link's parts, its `<externalReference>` element (and the container once empty), and
    /// finally the in-memory entry are removed. Later links shift down by one.
    pub fn delete<S, B>(
        &mut self,
        store: &mut S,
        breaker: &mut B,
        index: usize,
    ) -> Result<(), ExternalLinkError>
    where
        S: PartStore + ?Sized,
        B: FormulaLinkBreaker + ?Sized,
    {
        let count = self.links.len();
        let link = self
            .links
            .get(index)
            .ok_or(ExternalLinkError::IndexOutOfRange { index, count })?;

        let plan = RemovalPlan::prepare(
            store,
            std::slice::from_ref(link),
            ReferenceScope::Listed,
        )?;

        if link.link_type() == ExternalLinkType::ExternalBook {
            breaker.break_links(index, true)?;
        }
        plan.remove_parts(store);
        plan.rewrite_workbook(store);
        self.links.remove(index);

        log::debug!("deleted external link {} ({count} -> {})", index + 1, count - 1);
        Ok(())
    }

    /// Remove `link`, located by identity.
    pub fn delete_link<S, B>(
        &mut self,
        store: &mut S,
        breaker: &mut B,
        link: &ExternalLink,
    ) -> Result<(), ExternalLinkError>
    where
        S: PartStore + ?Sized,
        B: FormulaLinkBreaker + ?Sized,
    {
        let index = self.index_of(link).ok_or(ExternalLinkError::NotFound)?;
        self.delete(store, breaker, index)
    }

    /// Remove every link, breaking all formula links in one call.
    pub fn clear<S, B>(&mut self, store: &mut S, breaker: &mut B) -> Result<(), ExternalLinkError>
    where
        S: PartStore + ?Sized,
        B: FormulaLinkBreaker + ?Sized,
    {
        if self.links.is_empty() {
            return Ok(());
        }

        let plan = RemovalPlan::prepare(store, &self.links, ReferenceScope::All)?;
        breaker.break_all_links()?;
        plan.remove_parts(store);
        plan.rewrite_workbook(store);

        log::debug!("cleared {} external links", self.links.len());
        self.links.clear();
        Ok(())
    }

    /// Load every workbook link whose package is not loaded yet.
    ///
    /// Every unloaded link is attempted even after a failure. Returns `true` only if all attempts
    /// succeeded; failures are logged and kept in [`ExternalWorkbook::load_error`].
    pub fn load_workbooks(&mut self) -> bool {
        let options = &self.options;
        let mut all_loaded = true;
        for (index, link) in self.links.iter_mut().enumerate() {
            let ExternalLinkKind::Workbook(book) = &mut link.kind else {
                continue;
            };
            if book.is_loaded() {
                continue;
            }
            if let Err(err) = book.load(options) {
                log::warn!("external link {} not loaded: {err}", index + 1);
                all_loaded = false;
            }
        }
        all_loaded
    }

    pub fn options(&self) -> &ExternalLinkOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut ExternalLinkOptions {
        &mut self.options
    }

    /// Extra directories searched for external workbook files.
    pub fn directories(&self) -> &[PathBuf] {
        &self.options.directories
    }

    pub fn directories_mut(&mut self) -> &mut Vec<PathBuf> {
        &mut self.options.directories
    }

    pub fn set_workbook_dir(&mut self, dir: impl Into<PathBuf>) {
        self.options.workbook_dir = Some(dir.into());
    }
}

impl Index<usize> for ExternalReferences {
    type Output = ExternalLink;

    fn index(&self, index: usize) -> &ExternalLink {
        &self.links[index]
    }
}

impl<'a> IntoIterator for &'a ExternalReferences {
    type Item = &'a ExternalLink;
    type IntoIter = std::slice::Iter<'a, ExternalLink>;

    fn into_iter(self) -> Self::IntoIter {
        self.links.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReferenceScope {
    /// Only the `<externalReference>` elements of the listed links.
    Listed,
    /// The whole `<externalReferences>` container.
    All,
}

/// Package edits for removing a set of links, computed up front so that applying them cannot
/// fail halfway.
#[derive(Debug)]
struct RemovalPlan {
    /// Link parts and their `.rels` parts.
    removed_parts: Vec<String>,
    /// Workbook `.rels` and `[Content_Types].xml` without the removed entries.
    package_updates: Vec<(String, Vec<u8>)>,
    /// Workbook part without the removed `<externalReference>` elements.
    workbook: (String, Vec<u8>),
}

impl RemovalPlan {
    fn prepare<S: PartStore + ?Sized>(
        store: &S,
        links: &[ExternalLink],
        scope: ReferenceScope,
    ) -> Result<Self, ExternalLinkError> {
        let workbook_part = workbook_part_name(store)?;
        let workbook_xml = store
            .part(&workbook_part)
            .ok_or_else(|| XlsxError::MissingPart(workbook_part.clone()))?;

        let rel_ids: HashSet<&str> = links.iter().map(ExternalLink::relationship_id).collect();
        let removal = match scope {
            ReferenceScope::Listed => ReferenceRemoval::Ids(&rel_ids),
            ReferenceScope::All => ReferenceRemoval::All,
        };
        let workbook = (
            workbook_part.clone(),
            workbook_xml::remove_external_references(workbook_xml, removal)?,
        );

        let mut removed_parts = Vec::new();
        for link in links {
            removed_parts.push(link.part_name.clone());
            let rels = rels_part_name(&link.part_name);
            if store.has_part(&rels) {
                removed_parts.push(rels);
            }
        }

        let mut package_updates = Vec::new();
        let workbook_rels = rels_part_name(&workbook_part);
        if let Some(xml) = store.part(&workbook_rels) {
            package_updates.push((workbook_rels, remove_relationships(xml, &rel_ids)?));
        }
        if let Some(xml) = store.part(CONTENT_TYPES_PART) {
            let part_names: Vec<&str> = links.iter().map(ExternalLink::part_name).collect();
            package_updates.push((
                CONTENT_TYPES_PART.to_string(),
                remove_overrides(xml, &part_names)?,
            ));
        }

        Ok(Self {
            removed_parts,
            package_updates,
            workbook,
        })
    }

    fn remove_parts<S: PartStore + ?Sized>(&self, store: &mut S) {
        for part in &self.removed_parts {
            store.remove_part(part);
        }
        for (part, bytes) in &self.package_updates {
            store.set_part(part, bytes.clone());
        }
    }

    fn rewrite_workbook<S: PartStore + ?Sized>(self, store: &mut S) {
        let (part, bytes) = self.workbook;
        store.set_part(&part, bytes);
    }
}

fn external_book_part(rel_id: &str) -> Vec<u8> {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<externalLink xmlns="{SPREADSHEETML_NS}" xmlns:r="{}"><externalBook r:id="{rel_id}"/></externalLink>"#,
        workbook_xml::RELATIONSHIPS_NS
    )
    .into_bytes()
}
