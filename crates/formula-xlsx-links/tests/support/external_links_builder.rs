#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::{Cursor, Write};

use formula_xlsx_links::XlsxPackage;

pub const REL_TYPE_EXTERNAL_LINK: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/externalLink";
pub const REL_TYPE_EXTERNAL_LINK_PATH: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/externalLinkPath";
const REL_TYPE_OLE_OBJECT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/oleObject";
const REL_TYPE_WORKSHEET: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet";
const EXTERNAL_LINK_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.externalLink+xml";

/// Test helper for synthetic workbooks carrying `<externalReferences>`.
///
/// Link `i` (0-based) is stored at `xl/externalLinks/externalLink{i+1}.xml` and referenced from
/// the workbook through relationship `rId{i+2}` (`rId1` is the only worksheet).
#[derive(Debug, Clone, Default)]
pub struct ExternalLinkPackageBuilder {
    links: Vec<LinkSpec>,
    extra_parts: BTreeMap<String, Vec<u8>>,
    omit_content_types: bool,
}

#[derive(Debug, Clone)]
enum LinkSpec {
    Book { uri: String, sheet_names: Vec<String> },
    Dde { service: String, topic: String, items: Vec<String> },
    Ole { prog_id: String, target: String },
    Raw { xml: String },
}

impl ExternalLinkPackageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn external_book(self, uri: impl Into<String>) -> Self {
        self.external_book_with_sheets(uri, &["Sheet1"])
    }

    pub fn external_book_with_sheets(mut self, uri: impl Into<String>, sheets: &[&str]) -> Self {
        self.links.push(LinkSpec::Book {
            uri: uri.into(),
            sheet_names: sheets.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn dde_link(mut self, service: impl Into<String>, topic: impl Into<String>, items: &[&str]) -> Self {
        self.links.push(LinkSpec::Dde {
            service: service.into(),
            topic: topic.into(),
            items: items.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn ole_link(mut self, prog_id: impl Into<String>, target: impl Into<String>) -> Self {
        self.links.push(LinkSpec::Ole {
            prog_id: prog_id.into(),
            target: target.into(),
        });
        self
    }

    /// A link part written verbatim (no `.rels` part), e.g. malformed XML.
    pub fn raw_link(mut self, xml: impl Into<String>) -> Self {
        self.links.push(LinkSpec::Raw { xml: xml.into() });
        self
    }

    pub fn part(mut self, part_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.extra_parts.insert(part_name.into(), bytes.into());
        self
    }

    pub fn without_content_types(mut self) -> Self {
        self.omit_content_types = true;
        self
    }

    pub fn build_parts(self) -> BTreeMap<String, Vec<u8>> {
        let mut parts: BTreeMap<String, Vec<u8>> = BTreeMap::new();

        if !self.omit_content_types {
            parts.insert(
                "[Content_Types].xml".to_string(),
                content_types_xml(self.links.len()).into_bytes(),
            );
        }
        parts.insert("_rels/.rels".to_string(), root_rels_xml().into_bytes());
        parts.insert(
            "xl/workbook.xml".to_string(),
            workbook_xml(self.links.len()).into_bytes(),
        );
        parts.insert(
            "xl/_rels/workbook.xml.rels".to_string(),
            workbook_rels_xml(self.links.len()).into_bytes(),
        );
        parts.insert(
            "xl/worksheets/sheet1.xml".to_string(),
            minimal_worksheet_xml().into_bytes(),
        );

        for (idx, link) in self.links.iter().enumerate() {
            let n = idx + 1;
            let (xml, rels) = link_part_xml(link);
            parts.insert(link_part_name(idx), xml.into_bytes());
            if let Some(rels) = rels {
                parts.insert(
                    format!("xl/externalLinks/_rels/externalLink{n}.xml.rels"),
                    rels.into_bytes(),
                );
            }
        }

        parts.extend(self.extra_parts);
        parts
    }

    pub fn build_package(self) -> XlsxPackage {
        XlsxPackage::from_parts(self.build_parts())
    }

    pub fn build_bytes(self) -> Vec<u8> {
        write_zip(self.build_parts())
    }
}

pub fn link_part_name(index: usize) -> String {
    format!("xl/externalLinks/externalLink{}.xml", index + 1)
}

pub fn link_rels_part_name(index: usize) -> String {
    format!("xl/externalLinks/_rels/externalLink{}.xml.rels", index + 1)
}

/// Minimal workbook package (one sheet) used as an external link target on disk.
pub fn target_workbook_bytes(sheet_name: &str) -> Vec<u8> {
    let mut parts = BTreeMap::new();
    parts.insert("_rels/.rels".to_string(), root_rels_xml().into_bytes());
    parts.insert(
        "xl/workbook.xml".to_string(),
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
  <sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets>
</workbook>"#,
            xml_escape(sheet_name)
        )
        .into_bytes(),
    );
    parts.insert(
        "xl/worksheets/sheet1.xml".to_string(),
        minimal_worksheet_xml().into_bytes(),
    );
    write_zip(parts)
}

fn link_part_xml(link: &LinkSpec) -> (String, Option<String>) {
    const HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<externalLink xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">"#;

    match link {
        LinkSpec::Book { uri, sheet_names } => {
            let mut xml = String::from(HEADER);
            xml.push_str(r#"<externalBook r:id="rId1"><sheetNames>"#);
            for name in sheet_names {
                xml.push_str(&format!(r#"<sheetName val="{}"/>"#, xml_escape(name)));
            }
            xml.push_str(r#"</sheetNames><sheetDataSet>"#);
            for idx in 0..sheet_names.len() {
                xml.push_str(&format!(
                    r#"<sheetData sheetId="{idx}"><row r="1"><cell r="A1"><v>{idx}</v></cell></row></sheetData>"#
                ));
            }
            xml.push_str("</sheetDataSet></externalBook></externalLink>");
            (
                xml,
                Some(single_relationship_xml(
                    REL_TYPE_EXTERNAL_LINK_PATH,
                    uri,
                    Some("External"),
                )),
            )
        }
        LinkSpec::Dde {
            service,
            topic,
            items,
        } => {
            let mut xml = String::from(HEADER);
            xml.push_str(&format!(
                r#"<ddeLink ddeService="{}" ddeTopic="{}"><ddeItems>"#,
                xml_escape(service),
                xml_escape(topic)
            ));
            for item in items {
                xml.push_str(&format!(r#"<ddeItem name="{}" advise="1"/>"#, xml_escape(item)));
            }
            xml.push_str("</ddeItems></ddeLink></externalLink>");
            (xml, None)
        }
        LinkSpec::Ole { prog_id, target } => {
            let xml = format!(
                r#"{HEADER}<oleLink r:id="rId1" progId="{}"><oleItems><oleItem name="'" advise="1"/></oleItems></oleLink></externalLink>"#,
                xml_escape(prog_id)
            );
            (
                xml,
                Some(single_relationship_xml(REL_TYPE_OLE_OBJECT, target, Some("External"))),
            )
        }
        LinkSpec::Raw { xml } => (xml.clone(), None),
    }
}

fn single_relationship_xml(type_uri: &str, target: &str, target_mode: Option<&str>) -> String {
    let mode = target_mode
        .map(|mode| format!(r#" TargetMode="{mode}""#))
        .unwrap_or_default();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="{type_uri}" Target="{}"{mode}/>
</Relationships>"#,
        xml_escape(target)
    )
}

fn content_types_xml(link_count: usize) -> String {
    let mut out = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
  <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
  <Default Extension="xml" ContentType="application/xml"/>
  <Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
  <Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>
"#,
    );
    for idx in 0..link_count {
        out.push_str(&format!(
            "  <Override PartName=\"/{}\" ContentType=\"{EXTERNAL_LINK_CONTENT_TYPE}\"/>\n",
            link_part_name(idx)
        ));
    }
    out.push_str("</Types>");
    out
}

fn root_rels_xml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>
</Relationships>"#
        .to_string()
}

fn workbook_xml(link_count: usize) -> String {
    let mut out = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
  <sheets>
    <sheet name="Sheet1" sheetId="1" r:id="rId1"/>
  </sheets>
"#,
    );
    if link_count > 0 {
        out.push_str("  <externalReferences>\n");
        for idx in 0..link_count {
            out.push_str(&format!(
                "    <externalReference r:id=\"rId{}\"/>\n",
                idx + 2
            ));
        }
        out.push_str("  </externalReferences>\n");
    }
    out.push_str("  <calcPr calcId=\"191029\"/>\n</workbook>");
    out
}

fn workbook_rels_xml(link_count: usize) -> String {
    let mut out = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
"#,
    );
    out.push_str(&format!(
        "  <Relationship Id=\"rId1\" Type=\"{REL_TYPE_WORKSHEET}\" Target=\"worksheets/sheet1.xml\"/>\n"
    ));
    for idx in 0..link_count {
        out.push_str(&format!(
            "  <Relationship Id=\"rId{}\" Type=\"{REL_TYPE_EXTERNAL_LINK}\" Target=\"externalLinks/externalLink{}.xml\"/>\n",
            idx + 2,
            idx + 1
        ));
    }
    out.push_str("</Relationships>");
    out
}

fn minimal_worksheet_xml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
  <dimension ref="A1"/>
  <sheetData/>
</worksheet>"#
        .to_string()
}

fn write_zip(parts: BTreeMap<String, Vec<u8>>) -> Vec<u8> {
    let cursor = Cursor::new(Vec::new());
    let mut zip = zip::ZipWriter::new(cursor);
    let options = zip::write::FileOptions::<()>::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for (name, bytes) in parts {
        zip.start_file(name, options).unwrap();
        zip.write_all(&bytes).unwrap();
    }

    zip.finish().unwrap().into_inner()
}

fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
