//! Reads `<externalReference>` entries from the workbook part and materializes each link part.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::link::{
    CachedCell, CachedSheetData, DdeLink, ExternalDefinedName, ExternalLink, ExternalLinkKind,
    ExternalWorkbook, OleLink,
};
use super::{workbook_xml, ExternalLinkError};
use crate::openxml::{find_relationship, local_name, resolve_relationship_target};
use crate::package::{workbook_part_name, PartStore};
use crate::zip_util::zip_part_names_equivalent;
use crate::XlsxError;

/// Load every external link in `<externalReferences>` document order.
///
/// Any missing relationship, missing part, or malformed link XML fails the whole load, as does a
/// relationship id or link part referenced twice.
pub(crate) fn load_external_links<S: PartStore + ?Sized>(
    store: &S,
) -> Result<Vec<ExternalLink>, ExternalLinkError> {
    let workbook_part = workbook_part_name(store)?;
    let workbook_xml = store
        .part(&workbook_part)
        .ok_or_else(|| XlsxError::MissingPart(workbook_part.clone()))?;

    let rel_ids = workbook_xml::external_reference_ids(workbook_xml)?;
    let mut links: Vec<ExternalLink> = Vec::with_capacity(rel_ids.len());
    for rel_id in rel_ids {
        if links.iter().any(|link| link.workbook_rel_id == rel_id) {
            return Err(XlsxError::Invalid(format!(
                "{workbook_part} references external link {rel_id} more than once"
            ))
            .into());
        }
        let part_name = resolve_relationship_target(store, &workbook_part, &rel_id)?
            .ok_or_else(|| ExternalLinkError::MissingRelationship {
                part: workbook_part.clone(),
                id: rel_id.clone(),
            })?;
        if links
            .iter()
            .any(|link| zip_part_names_equivalent(&link.part_name, &part_name))
        {
            return Err(XlsxError::Invalid(format!(
                "{part_name} is referenced by more than one external link"
            ))
            .into());
        }
        let bytes = store
            .part(&part_name)
            .ok_or_else(|| XlsxError::MissingPart(part_name.clone()))?;

        let kind = parse_link_part(store, &part_name, bytes)?;
        log::debug!(
            "loaded external link {} ({rel_id}) from {part_name}",
            links.len() + 1
        );
        links.push(ExternalLink::new(part_name, rel_id, kind));
    }

    Ok(links)
}

/// Parse one link part and resolve the relationships its link element declares.
pub(crate) fn parse_link_part<S: PartStore + ?Sized>(
    store: &S,
    part_name: &str,
    xml: &[u8],
) -> Result<ExternalLinkKind, ExternalLinkError> {
    let mut kind = read_link_element(part_name, xml)?;
    match &mut kind {
        ExternalLinkKind::Workbook(workbook) => {
            if let Some(id) = workbook.rel_id.as_deref() {
                let rel = find_relationship(store, part_name, id)?.ok_or_else(|| {
                    ExternalLinkError::MissingRelationship {
                        part: part_name.to_string(),
                        id: id.to_string(),
                    }
                })?;
                workbook.reference_uri = rel.target;
            }
        }
        ExternalLinkKind::Ole(ole) => {
            if let Some(id) = ole.rel_id.as_deref() {
                ole.target = find_relationship(store, part_name, id)?.map(|rel| rel.target);
            }
        }
        ExternalLinkKind::Dde(_) => {}
    }
    Ok(kind)
}

/// Stream the part forward, dispatching on element local names. Exactly one `externalBook`,
/// `ddeLink`, or `oleLink` element is expected; anything else (the `externalLink` root, `extLst`,
/// `mc:AlternateContent`) is skipped.
fn read_link_element(part_name: &str, xml: &[u8]) -> Result<ExternalLinkKind, XlsxError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut found: Option<ExternalLinkKind> = None;

    loop {
        let opened = match reader.read_event_into(&mut buf)? {
            Event::Start(e) => Some((e.into_owned(), true)),
            Event::Empty(e) => Some((e.into_owned(), false)),
            Event::Eof => break,
            _ => None,
        };
        buf.clear();
        let Some((start, has_children)) = opened else {
            continue;
        };

        let kind = match start.local_name().as_ref() {
            b"externalBook" => ExternalLinkKind::Workbook(read_external_book(
                &mut reader,
                &start,
                has_children,
                part_name,
            )?),
            b"ddeLink" => ExternalLinkKind::Dde(DdeLink {
                service: attr_value(&start, b"ddeService")?.unwrap_or_default(),
                topic: attr_value(&start, b"ddeTopic")?.unwrap_or_default(),
                items: read_item_names(&mut reader, has_children, b"ddeItem", "ddeLink", part_name)?,
            }),
            b"oleLink" => ExternalLinkKind::Ole(OleLink {
                prog_id: attr_value(&start, b"progId")?.unwrap_or_default(),
                rel_id: attr_value(&start, b"id")?,
                target: None,
                items: read_item_names(&mut reader, has_children, b"oleItem", "oleLink", part_name)?,
            }),
            _ => continue,
        };

        if found.replace(kind).is_some() {
            return Err(XlsxError::Invalid(format!(
                "{part_name} declares more than one external link"
            )));
        }
    }

    found.ok_or_else(|| {
        XlsxError::Invalid(format!(
            "{part_name} has no externalBook, ddeLink, or oleLink element"
        ))
    })
}

fn read_external_book(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
    has_children: bool,
    part_name: &str,
) -> Result<ExternalWorkbook, XlsxError> {
    let mut workbook = ExternalWorkbook {
        rel_id: attr_value(start, b"id")?,
        ..ExternalWorkbook::default()
    };
    if !has_children {
        return Ok(workbook);
    }

    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut sheet: Option<CachedSheetData> = None;
    let mut cell: Option<CachedCell> = None;
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                depth += 1;
                match e.local_name().as_ref() {
                    b"sheetData" => sheet = Some(cached_sheet_from(e)?),
                    b"cell" => cell = Some(cached_cell_from(e)?),
                    b"v" => in_value = true,
                    _ => read_book_entry(e, &mut workbook)?,
                }
            }
            Event::Empty(ref e) => match e.local_name().as_ref() {
                b"sheetData" => workbook.cached_sheets.push(cached_sheet_from(e)?),
                b"cell" => {
                    let empty = cached_cell_from(e)?;
                    if let Some(sheet) = sheet.as_mut() {
                        sheet.cells.push(empty);
                    }
                }
                _ => read_book_entry(e, &mut workbook)?,
            },
            Event::Text(ref t) if in_value => {
                if let Some(cell) = cell.as_mut() {
                    cell.value
                        .get_or_insert_with(String::new)
                        .push_str(&t.unescape()?);
                }
            }
            Event::End(ref e) => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
                match e.local_name().as_ref() {
                    b"v" => in_value = false,
                    b"cell" => {
                        if let (Some(done), Some(sheet)) = (cell.take(), sheet.as_mut()) {
                            sheet.cells.push(done);
                        }
                    }
                    b"sheetData" => {
                        if let Some(done) = sheet.take() {
                            workbook.cached_sheets.push(done);
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => return Err(unterminated(part_name, "externalBook")),
            _ => {}
        }
        buf.clear();
    }

    Ok(workbook)
}

/// `sheetNames/sheetName` and `definedNames/definedName` entries.
fn read_book_entry(e: &BytesStart<'_>, workbook: &mut ExternalWorkbook) -> Result<(), XlsxError> {
    match e.local_name().as_ref() {
        b"sheetName" => {
            workbook
                .sheet_names
                .push(attr_value(e, b"val")?.unwrap_or_default());
        }
        b"definedName" => {
            let name = attr_value(e, b"name")?.ok_or(XlsxError::MissingAttr("name"))?;
            workbook.defined_names.push(ExternalDefinedName {
                name,
                refers_to: attr_value(e, b"refersTo")?,
                sheet_id: parse_u32_attr(e, b"sheetId")?,
            });
        }
        _ => {}
    }
    Ok(())
}

fn cached_sheet_from(e: &BytesStart<'_>) -> Result<CachedSheetData, XlsxError> {
    Ok(CachedSheetData {
        sheet_id: parse_u32_attr(e, b"sheetId")?.ok_or(XlsxError::MissingAttr("sheetId"))?,
        refresh_error: attr_value(e, b"refreshError")?
            .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true")),
        cells: Vec::new(),
    })
}

fn cached_cell_from(e: &BytesStart<'_>) -> Result<CachedCell, XlsxError> {
    Ok(CachedCell {
        reference: attr_value(e, b"r")?.ok_or(XlsxError::MissingAttr("r"))?,
        value_type: attr_value(e, b"t")?,
        value: None,
    })
}

/// Collect the `name` of every `item_tag` descendant until the closing tag of the link element.
fn read_item_names(
    reader: &mut Reader<&[u8]>,
    has_children: bool,
    item_tag: &[u8],
    link_tag: &str,
    part_name: &str,
) -> Result<Vec<String>, XlsxError> {
    let mut items = Vec::new();
    if !has_children {
        return Ok(items);
    }

    let mut buf = Vec::new();
    let mut depth = 0usize;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                if e.local_name().as_ref() == item_tag {
                    items.push(item_name(e)?);
                }
                depth += 1;
            }
            Event::Empty(ref e) if e.local_name().as_ref() == item_tag => {
                items.push(item_name(e)?)
            }
            Event::End(_) => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            Event::Eof => return Err(unterminated(part_name, link_tag)),
            _ => {}
        }
        buf.clear();
    }

    Ok(items)
}

// Item names default to "0" in the schema.
fn item_name(e: &BytesStart<'_>) -> Result<String, XlsxError> {
    Ok(attr_value(e, b"name")?.unwrap_or_else(|| "0".to_string()))
}

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, XlsxError> {
    for attr in e.attributes() {
        let attr = attr?;
        if local_name(attr.key.as_ref()) == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn parse_u32_attr(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<u32>, XlsxError> {
    match attr_value(e, key)? {
        Some(raw) => raw.trim().parse::<u32>().map(Some).map_err(|_| {
            XlsxError::Invalid(format!(
                "invalid {} value {raw:?}",
                String::from_utf8_lossy(key)
            ))
        }),
        None => Ok(None),
    }
}

fn unterminated(part_name: &str, tag: &str) -> XlsxError {
    XlsxError::Invalid(format!("{part_name}: unterminated <{tag}> element"))
}
