mod support;

use formula_xlsx_links::{
    ExternalLinkError, ExternalLinkType, ExternalReferences, XlsxError, XlsxPackage,
};
use pretty_assertions::assert_eq;

use support::external_links_builder::{link_part_name, ExternalLinkPackageBuilder};

#[test]
fn links_load_in_external_reference_order() {
    let pkg = ExternalLinkPackageBuilder::new()
        .external_book_with_sheets("file:///C:/Data/Prices.xlsx", &["Q1", "Q2"])
        .dde_link("Excel", r"C:\Data\[Book1.xlsx]Sheet1", &["R1C1", "R2C2"])
        .ole_link("Word.Document.12", "file:///C:/Docs/Memo.docx")
        .build_package();

    let refs = ExternalReferences::load(&pkg).expect("load links");
    assert_eq!(refs.len(), 3);

    let types: Vec<ExternalLinkType> = refs.iter().map(|link| link.link_type()).collect();
    assert_eq!(
        types,
        vec![
            ExternalLinkType::ExternalBook,
            ExternalLinkType::DdeLink,
            ExternalLinkType::OleLink
        ]
    );

    let book = refs[0].as_workbook().expect("workbook link");
    assert_eq!(book.reference_uri(), "file:///C:/Data/Prices.xlsx");
    assert_eq!(book.relationship_id(), Some("rId1"));
    assert_eq!(book.sheet_names(), &["Q1".to_string(), "Q2".to_string()]);
    assert_eq!(
        book.cached_value(1, "A1").and_then(|cell| cell.value.as_deref()),
        Some("1")
    );
    assert!(!book.is_loaded());

    let dde = refs[1].as_dde().expect("dde link");
    assert_eq!(dde.service, "Excel");
    assert_eq!(dde.items, vec!["R1C1".to_string(), "R2C2".to_string()]);

    let ole = refs[2].as_ole().expect("ole link");
    assert_eq!(ole.prog_id, "Word.Document.12");
    assert_eq!(ole.target.as_deref(), Some("file:///C:/Docs/Memo.docx"));

    for (idx, link) in refs.iter().enumerate() {
        assert_eq!(link.part_name(), link_part_name(idx));
        assert_eq!(link.relationship_id(), format!("rId{}", idx + 2));
    }
}

#[test]
fn links_load_from_zip_bytes() {
    let bytes = ExternalLinkPackageBuilder::new()
        .external_book("Prices.xlsx")
        .build_bytes();
    let pkg = XlsxPackage::from_bytes(&bytes).expect("read package");

    let refs = ExternalReferences::load(&pkg).expect("load links");
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].as_workbook().unwrap().reference_uri(), "Prices.xlsx");
}

#[test]
fn workbook_without_external_references_is_empty() {
    let pkg = ExternalLinkPackageBuilder::new().build_package();
    let refs = ExternalReferences::load(&pkg).expect("load links");
    assert!(refs.is_empty());
    assert_eq!(refs.resolve("1"), None);
}

#[test]
fn unknown_elements_in_link_parts_are_skipped() {
    let pkg = ExternalLinkPackageBuilder::new()
        .raw_link(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<externalLink xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
  <extLst><ext uri="{00000000-0000-0000-0000-000000000000}"><custom/></ext></extLst>
  <ddeLink ddeService="Excel" ddeTopic="Sheet1"/>
</externalLink>"#,
        )
        .build_package();

    let refs = ExternalReferences::load(&pkg).expect("load links");
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].as_dde().unwrap().topic, "Sheet1");
}

#[test]
fn missing_workbook_relationship_fails_the_load() {
    let mut pkg = ExternalLinkPackageBuilder::new()
        .external_book("Prices.xlsx")
        .build_package();
    pkg.set_part(
        "xl/_rels/workbook.xml.rels",
        br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
</Relationships>"#
            .to_vec(),
    );

    let err = ExternalReferences::load(&pkg).unwrap_err();
    assert!(
        matches!(&err, ExternalLinkError::MissingRelationship { id, .. } if id == "rId2"),
        "{err}"
    );
}

#[test]
fn missing_link_part_fails_the_load() {
    let mut pkg = ExternalLinkPackageBuilder::new()
        .external_book("Prices.xlsx")
        .build_package();
    pkg.remove_part(&link_part_name(0));

    let err = ExternalReferences::load(&pkg).unwrap_err();
    assert!(
        matches!(&err, ExternalLinkError::Xlsx(XlsxError::MissingPart(part)) if part == "xl/externalLinks/externalLink1.xml"),
        "{err}"
    );
}

#[test]
fn malformed_link_part_fails_the_load() {
    let pkg = ExternalLinkPackageBuilder::new()
        .external_book("Prices.xlsx")
        .raw_link("<externalLink><externalBook><sheetNames>")
        .build_package();

    assert!(ExternalReferences::load(&pkg).is_err());
}

#[test]
fn missing_external_book_target_fails_the_load() {
    let pkg = ExternalLinkPackageBuilder::new()
        .raw_link(
            r#"<externalLink xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><externalBook r:id="rId1"/></externalLink>"#,
        )
        .build_package();

    let err = ExternalReferences::load(&pkg).unwrap_err();
    assert!(
        matches!(&err, ExternalLinkError::MissingRelationship { part, id } if part == "xl/externalLinks/externalLink1.xml" && id == "rId1"),
        "{err}"
    );
}

fn replace_in_part(pkg: &mut XlsxPackage, part: &str, from: &str, to: &str) {
    let text = String::from_utf8(pkg.part(part).expect("part").to_vec()).unwrap();
    assert!(text.contains(from), "{text}");
    pkg.set_part(part, text.replace(from, to).into_bytes());
}

#[test]
fn repeated_external_reference_id_fails_the_load() {
    let mut pkg = ExternalLinkPackageBuilder::new()
        .external_book("/a/first.xlsx")
        .external_book("/b/second.xlsx")
        .build_package();
    replace_in_part(&mut pkg, "xl/workbook.xml", r#"r:id="rId3""#, r#"r:id="rId2""#);

    let err = ExternalReferences::load(&pkg).unwrap_err();
    assert!(
        matches!(&err, ExternalLinkError::Xlsx(XlsxError::Invalid(msg)) if msg.contains("rId2")),
        "{err}"
    );
}

#[test]
fn two_relationships_to_one_link_part_fail_the_load() {
    let mut pkg = ExternalLinkPackageBuilder::new()
        .external_book("/a/first.xlsx")
        .external_book("/b/second.xlsx")
        .build_package();
    replace_in_part(
        &mut pkg,
        "xl/_rels/workbook.xml.rels",
        "externalLinks/externalLink2.xml",
        "externalLinks/externalLink1.xml",
    );

    let err = ExternalReferences::load(&pkg).unwrap_err();
    assert!(
        matches!(&err, ExternalLinkError::Xlsx(XlsxError::Invalid(msg)) if msg.contains("xl/externalLinks/externalLink1.xml")),
        "{err}"
    );
}

#[test]
fn link_part_without_a_link_element_fails_the_load() {
    let pkg = ExternalLinkPackageBuilder::new()
        .external_book("/a/first.xlsx")
        .raw_link(
            r#"<externalLink xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><extLst/></externalLink>"#,
        )
        .build_package();

    let err = ExternalReferences::load(&pkg).unwrap_err();
    assert!(
        matches!(&err, ExternalLinkError::Xlsx(XlsxError::Invalid(msg)) if msg.starts_with("xl/externalLinks/externalLink2.xml has no")),
        "{err}"
    );
}
