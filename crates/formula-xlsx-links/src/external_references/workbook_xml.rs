//! `<externalReferences>` handling inside the workbook part.
//!
//! Links keep only the relationship id of their `<externalReference>` element; every edit here
//! locates elements by that id and rewrites the part as a stream so unrelated markup (namespace
//! prefixes, `mc:AlternateContent`, extension lists) survives byte-for-byte.

use std::collections::HashSet;

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::openxml::local_name;
use crate::XlsxError;

pub(crate) const RELATIONSHIPS_NS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

const CONTAINER: &[u8] = b"externalReferences";
const REFERENCE: &[u8] = b"externalReference";

/// Relationship ids of every `<externalReference>`, in document order.
pub(crate) fn external_reference_ids(workbook_xml: &[u8]) -> Result<Vec<String>, XlsxError> {
    let xml = std::str::from_utf8(workbook_xml)?;
    let xml = xml.strip_prefix('\u{feff}').unwrap_or(xml);
    let doc = roxmltree::Document::parse(xml)?;

    let mut ids = Vec::new();
    let containers = doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "externalReferences");
    for container in containers {
        for reference in container
            .children()
            .filter(|n| n.is_element() && n.tag_name().name() == "externalReference")
        {
            let id = reference
                .attributes()
                .find(|a| a.name() == "id" && a.namespace() == Some(RELATIONSHIPS_NS))
                .or_else(|| reference.attributes().find(|a| a.name() == "id"))
                .ok_or(XlsxError::MissingAttr("r:id"))?;
            ids.push(id.value().to_string());
        }
    }
    Ok(ids)
}

/// Which `<externalReference>` elements a rewrite drops.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ReferenceRemoval<'a> {
    /// Drop references with these relationship ids; the container goes once it is empty.
    Ids(&'a HashSet<&'a str>),
    /// Drop the whole `<externalReferences>` container.
    All,
}

struct PendingContainer {
    start: BytesStart<'static>,
    events: Vec<Event<'static>>,
    kept: usize,
    depth: usize,
}

pub(crate) fn remove_external_references(
    workbook_xml: &[u8],
    removal: ReferenceRemoval<'_>,
) -> Result<Vec<u8>, XlsxError> {
    let mut reader = Reader::from_reader(workbook_xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(workbook_xml.len()));
    let mut buf = Vec::new();

    // The container is buffered until its end tag so it can be dropped if nothing survives.
    let mut container: Option<PendingContainer> = None;
    let mut skip_depth = 0usize;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        if matches!(event, Event::Eof) {
            break;
        }

        if skip_depth > 0 {
            match event {
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => skip_depth -= 1,
                _ => {}
            }
            buf.clear();
            continue;
        }

        let Some(pending) = container.as_mut() else {
            match event {
                Event::Start(ref e) if local_name(e.name().as_ref()) == CONTAINER => {
                    if matches!(removal, ReferenceRemoval::All) {
                        skip_depth = 1;
                    } else {
                        container = Some(PendingContainer {
                            start: e.clone().into_owned(),
                            events: Vec::new(),
                            kept: 0,
                            depth: 0,
                        });
                    }
                }
                // An empty container never survives a removal.
                Event::Empty(ref e) if local_name(e.name().as_ref()) == CONTAINER => {}
                ev => writer.write_event(ev.into_owned())?,
            }
            buf.clear();
            continue;
        };

        match event {
            Event::Start(ref e) if pending.depth == 0 && is_reference(e) => {
                if removal_matches(removal, e)? {
                    skip_depth = 1;
                } else {
                    pending.kept += 1;
                    pending.depth += 1;
                    pending.events.push(Event::Start(e.clone().into_owned()));
                }
            }
            Event::Empty(ref e) if pending.depth == 0 && is_reference(e) => {
                if !removal_matches(removal, e)? {
                    pending.kept += 1;
                    pending.events.push(Event::Empty(e.clone().into_owned()));
                }
            }
            Event::Start(ref e) => {
                if pending.depth == 0 {
                    pending.kept += 1;
                }
                pending.depth += 1;
                pending.events.push(Event::Start(e.clone().into_owned()));
            }
            Event::Empty(ref e) => {
                if pending.depth == 0 {
                    pending.kept += 1;
                }
                pending.events.push(Event::Empty(e.clone().into_owned()));
            }
            Event::End(ref e) if pending.depth == 0 => {
                if let Some(done) = container.take() {
                    if done.kept > 0 {
                        writer.write_event(Event::Start(done.start))?;
                        for ev in done.events {
                            writer.write_event(ev)?;
                        }
                        writer.write_event(Event::End(e.to_owned()))?;
                    }
                }
            }
            Event::End(ref e) => {
                pending.depth -= 1;
                pending.events.push(Event::End(e.clone().into_owned()));
            }
            ev => pending.events.push(ev.into_owned()),
        }
        buf.clear();
    }

    if container.is_some() {
        return Err(XlsxError::Invalid(
            "unterminated <externalReferences> element".to_string(),
        ));
    }
    Ok(writer.into_inner())
}

fn is_reference(e: &BytesStart<'_>) -> bool {
    local_name(e.name().as_ref()) == REFERENCE
}

fn removal_matches(removal: ReferenceRemoval<'_>, e: &BytesStart<'_>) -> Result<bool, XlsxError> {
    let ids = match removal {
        ReferenceRemoval::All => return Ok(true),
        ReferenceRemoval::Ids(ids) => ids,
    };
    for attr in e.attributes() {
        let attr = attr?;
        if local_name(attr.key.as_ref()) == b"id" {
            return Ok(ids.contains(attr.unescape_value()?.as_ref()));
        }
    }
    Ok(false)
}

/// Prefixes in effect on the workbook root element.
#[derive(Debug, Default)]
struct WorkbookPrefixes {
    element: Option<String>,
    relationships: Option<String>,
}

impl WorkbookPrefixes {
    fn from_root(e: &BytesStart<'_>) -> Result<Self, XlsxError> {
        let name = e.name();
        let element = name
            .prefix()
            .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned());
        let mut relationships = None;
        for attr in e.attributes() {
            let attr = attr?;
            if let Some(prefix) = attr.key.as_ref().strip_prefix(b"xmlns:") {
                if attr.unescape_value()?.as_ref() == RELATIONSHIPS_NS {
                    relationships = Some(String::from_utf8_lossy(prefix).into_owned());
                }
            }
        }
        Ok(Self {
            element,
            relationships,
        })
    }

    fn qualify(&self, local: &str) -> String {
        match &self.element {
            Some(prefix) => format!("{prefix}:{local}"),
            None => local.to_string(),
        }
    }

    fn reference(&self, rel_id: &str) -> BytesStart<'static> {
        let mut reference = BytesStart::new(self.qualify("externalReference"));
        match &self.relationships {
            Some(prefix) => reference.push_attribute((format!("{prefix}:id").as_str(), rel_id)),
            None => {
                reference.push_attribute(("xmlns:r", RELATIONSHIPS_NS));
                reference.push_attribute(("r:id", rel_id));
            }
        }
        reference
    }

    fn write_container(&self, writer: &mut Writer<Vec<u8>>, rel_id: &str) -> Result<(), XlsxError> {
        let container = self.qualify("externalReferences");
        writer.write_event(Event::Start(BytesStart::new(container.as_str())))?;
        writer.write_event(Event::Empty(self.reference(rel_id)))?;
        writer.write_event(Event::End(BytesEnd::new(container)))?;
        Ok(())
    }
}

/// Append `<externalReference r:id="{rel_id}"/>` as the last reference, creating the
/// `<externalReferences>` container after `<sheets>`/`<functionGroups>` when it is absent.
pub(crate) fn append_external_reference(
    workbook_xml: &[u8],
    rel_id: &str,
) -> Result<Vec<u8>, XlsxError> {
    let has_container = contains_container(workbook_xml)?;

    let mut reader = Reader::from_reader(workbook_xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(workbook_xml.len() + 128));
    let mut buf = Vec::new();

    let mut prefixes = WorkbookPrefixes::default();
    let mut depth = 0usize;
    let mut in_container = false;
    let mut insert_before_next = false;
    let mut done = false;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Eof => break,
            Event::Start(ref e) => {
                let local = local_name(e.name().as_ref()).to_vec();
                if depth == 0 {
                    prefixes = WorkbookPrefixes::from_root(e)?;
                } else if depth == 1 && !done {
                    if has_container && local == CONTAINER {
                        in_container = true;
                    } else if insert_before_next && local != b"functionGroups" {
                        prefixes.write_container(&mut writer, rel_id)?;
                        done = true;
                    }
                }
                depth += 1;
                writer.write_event(Event::Start(e.to_owned()))?;
            }
            Event::Empty(ref e) => {
                let local = local_name(e.name().as_ref()).to_vec();
                if depth == 0 {
                    return Err(XlsxError::Invalid("workbook part has an empty root".to_string()));
                }
                if depth == 1 && !done {
                    if has_container && local == CONTAINER {
                        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                        writer.write_event(Event::Start(e.to_owned()))?;
                        writer.write_event(Event::Empty(prefixes.reference(rel_id)))?;
                        writer.write_event(Event::End(BytesEnd::new(name)))?;
                        done = true;
                        buf.clear();
                        continue;
                    }
                    if insert_before_next && local != b"functionGroups" {
                        prefixes.write_container(&mut writer, rel_id)?;
                        done = true;
                    }
                }
                writer.write_event(Event::Empty(e.to_owned()))?;
                if depth == 1 && !done && !has_container && is_anchor(&local) {
                    insert_before_next = true;
                }
            }
            Event::End(ref e) => {
                depth = depth.saturating_sub(1);
                let local = local_name(e.name().as_ref()).to_vec();
                if depth == 1 && in_container && local == CONTAINER {
                    writer.write_event(Event::Empty(prefixes.reference(rel_id)))?;
                    in_container = false;
                    done = true;
                }
                if depth == 0 && !done {
                    prefixes.write_container(&mut writer, rel_id)?;
                    done = true;
                }
                writer.write_event(Event::End(e.to_owned()))?;
                if depth == 1 && !done && !has_container && is_anchor(&local) {
                    insert_before_next = true;
                }
            }
            ev => writer.write_event(ev.into_owned())?,
        }
        buf.clear();
    }

    if !done {
        return Err(XlsxError::Invalid(
            "workbook part has no root element".to_string(),
        ));
    }
    Ok(writer.into_inner())
}

// `<externalReferences>` follows `<sheets>` and the optional `<functionGroups>` in CT_Workbook.
fn is_anchor(local: &[u8]) -> bool {
    local == b"sheets" || local == b"functionGroups"
}

fn contains_container(workbook_xml: &[u8]) -> Result<bool, XlsxError> {
    let mut reader = Reader::from_reader(workbook_xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) | Event::Empty(ref e)
                if local_name(e.name().as_ref()) == CONTAINER =>
            {
                return Ok(true)
            }
            Event::Eof => return Ok(false),
            _ => {}
        }
        buf.clear();
    }
}
