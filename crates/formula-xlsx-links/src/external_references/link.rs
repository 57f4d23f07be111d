use crate::XlsxPackage;

/// Discriminant of an [`ExternalLink`], matching the element stored in its link part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalLinkType {
    /// `<externalBook>`: a reference to another workbook.
    ExternalBook,
    /// `<ddeLink>`: a dynamic data exchange link.
    DdeLink,
    /// `<oleLink>`: a link to an OLE object.
    OleLink,
}

/// One `xl/externalLinks/externalLinkN.xml` part and the `<externalReference>` pointing at it.
///
/// A link's registry index is its position; it is never stored on the link itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalLink {
    pub(crate) part_name: String,
    pub(crate) workbook_rel_id: String,
    pub(crate) kind: ExternalLinkKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExternalLinkKind {
    Workbook(ExternalWorkbook),
    Dde(DdeLink),
    Ole(OleLink),
}

impl ExternalLink {
    pub(crate) fn new(
        part_name: impl Into<String>,
        workbook_rel_id: impl Into<String>,
        kind: ExternalLinkKind,
    ) -> Self {
        Self {
            part_name: part_name.into(),
            workbook_rel_id: workbook_rel_id.into(),
            kind,
        }
    }

    pub fn link_type(&self) -> ExternalLinkType {
        match self.kind {
            ExternalLinkKind::Workbook(_) => ExternalLinkType::ExternalBook,
            ExternalLinkKind::Dde(_) => ExternalLinkType::DdeLink,
            ExternalLinkKind::Ole(_) => ExternalLinkType::OleLink,
        }
    }

    /// Package part backing this link (e.g. `xl/externalLinks/externalLink1.xml`).
    pub fn part_name(&self) -> &str {
        &self.part_name
    }

    /// Relationship id carried by this link's `<externalReference r:id>` in the workbook part.
    pub fn relationship_id(&self) -> &str {
        &self.workbook_rel_id
    }

    pub fn kind(&self) -> &ExternalLinkKind {
        &self.kind
    }

    pub fn as_workbook(&self) -> Option<&ExternalWorkbook> {
        match &self.kind {
            ExternalLinkKind::Workbook(workbook) => Some(workbook),
            _ => None,
        }
    }

    pub fn as_workbook_mut(&mut self) -> Option<&mut ExternalWorkbook> {
        match &mut self.kind {
            ExternalLinkKind::Workbook(workbook) => Some(workbook),
            _ => None,
        }
    }

    pub fn as_dde(&self) -> Option<&DdeLink> {
        match &self.kind {
            ExternalLinkKind::Dde(dde) => Some(dde),
            _ => None,
        }
    }

    pub fn as_ole(&self) -> Option<&OleLink> {
        match &self.kind {
            ExternalLinkKind::Ole(ole) => Some(ole),
            _ => None,
        }
    }
}

/// `<externalBook>` contents plus the lazily loaded target package.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalWorkbook {
    pub(crate) rel_id: Option<String>,
    pub(crate) reference_uri: String,
    pub(crate) sheet_names: Vec<String>,
    pub(crate) defined_names: Vec<ExternalDefinedName>,
    pub(crate) cached_sheets: Vec<CachedSheetData>,
    pub(crate) package: Option<XlsxPackage>,
    pub(crate) load_error: Option<String>,
}

impl ExternalWorkbook {
    /// The `externalLinkPath` relationship target, verbatim (`file:///…`, a relative path, or a
    /// web URL).
    pub fn reference_uri(&self) -> &str {
        &self.reference_uri
    }

    /// Relationship id of `<externalBook r:id>` within the link part.
    pub fn relationship_id(&self) -> Option<&str> {
        self.rel_id.as_deref()
    }

    pub fn sheet_names(&self) -> &[String] {
        &self.sheet_names
    }

    pub fn defined_names(&self) -> &[ExternalDefinedName] {
        &self.defined_names
    }

    pub fn cached_sheets(&self) -> &[CachedSheetData] {
        &self.cached_sheets
    }

    /// Cached value for `cell_ref` on the sheet at `sheet_index` (position in
    /// [`sheet_names`](Self::sheet_names)).
    pub fn cached_value(&self, sheet_index: u32, cell_ref: &str) -> Option<&CachedCell> {
        self.cached_sheets
            .iter()
            .find(|sheet| sheet.sheet_id == sheet_index)?
            .cells
            .iter()
            .find(|cell| cell.reference.eq_ignore_ascii_case(cell_ref))
    }

    pub fn is_loaded(&self) -> bool {
        self.package.is_some()
    }

    pub fn package(&self) -> Option<&XlsxPackage> {
        self.package.as_ref()
    }

    /// Attach a package loaded by the caller, e.g. for web-protocol references that
    /// [`load`](Self::load) refuses to fetch.
    pub fn set_package(&mut self, package: XlsxPackage) {
        self.package = Some(package);
        self.load_error = None;
    }

    /// Reason the most recent load attempt failed, if it did.
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }
}

/// `<definedName>` cached from the external workbook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalDefinedName {
    pub name: String,
    pub refers_to: Option<String>,
    pub sheet_id: Option<u32>,
}

/// `<sheetData>` from the `<sheetDataSet>` cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedSheetData {
    pub sheet_id: u32,
    pub refresh_error: bool,
    pub cells: Vec<CachedCell>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedCell {
    /// A1-style reference (`r` attribute).
    pub reference: String,
    /// SpreadsheetML cell type (`t` attribute); `None` means numeric.
    pub value_type: Option<String>,
    pub value: Option<String>,
}

/// `<ddeLink>` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DdeLink {
    pub service: String,
    pub topic: String,
    pub items: Vec<String>,
}

/// `<oleLink>` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OleLink {
    pub prog_id: String,
    pub rel_id: Option<String>,
    /// Target of the `r:id` relationship (the linked OLE source).
    pub target: Option<String>,
    pub items: Vec<String>,
}
