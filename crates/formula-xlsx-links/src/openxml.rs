//! OPC relationship helpers: parsing `.rels` parts, resolving targets, and editing relationship
//! lists without disturbing unrelated entries.

use std::collections::HashSet;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::package::{PartStore, XlsxError};

pub const PACKAGE_RELATIONSHIPS_NS: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub type_uri: String,
    pub target: String,
    pub target_mode: Option<String>,
}

impl Relationship {
    pub fn is_external(&self) -> bool {
        self.target_mode
            .as_deref()
            .is_some_and(|mode| mode.trim().eq_ignore_ascii_case("External"))
    }
}

pub fn rels_part_name(part_name: &str) -> String {
    let part_name = part_name.strip_prefix('/').unwrap_or(part_name);
    match part_name.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part_name}.rels"),
    }
}

/// Look up relationship `relationship_id` declared by `part_name`.
///
/// Returns `Ok(None)` when the part has no `.rels` part or the id is not declared.
pub fn find_relationship<S: PartStore + ?Sized>(
    store: &S,
    part_name: &str,
    relationship_id: &str,
) -> Result<Option<Relationship>, XlsxError> {
    let Some(rels_bytes) = store.part(&rels_part_name(part_name)) else {
        return Ok(None);
    };
    Ok(parse_relationships(rels_bytes)?
        .into_iter()
        .find(|rel| rel.id == relationship_id))
}

/// Resolve relationship `relationship_id` of `part_name` to the part name it targets.
///
/// External targets (`TargetMode="External"`) are not package parts and resolve to `None`.
pub fn resolve_relationship_target<S: PartStore + ?Sized>(
    store: &S,
    part_name: &str,
    relationship_id: &str,
) -> Result<Option<String>, XlsxError> {
    let Some(rel) = find_relationship(store, part_name, relationship_id)? else {
        return Ok(None);
    };
    if rel.is_external() {
        return Ok(None);
    }
    let target = strip_fragment(&rel.target);
    if target.is_empty() {
        return Ok(None);
    }
    Ok(Some(resolve_target(part_name, target)))
}

fn strip_fragment(target: &str) -> &str {
    target
        .split_once('#')
        .map(|(base, _)| base)
        .unwrap_or(target)
}

pub fn resolve_target(base_part: &str, target: &str) -> String {
    // OPC part names do not include fragments (`foo.xml#bar`).
    let target = strip_fragment(target);
    if target.is_empty() {
        return base_part
            .strip_prefix('/')
            .unwrap_or(base_part)
            .to_string();
    }

    // Absolute targets are rooted at the package root, relative ones at the source part's folder.
    let (target, base_dir) = match target.strip_prefix('/') {
        Some(target) => (target, ""),
        None => (
            target,
            base_part
                .rsplit_once('/')
                .map(|(dir, _)| dir)
                .unwrap_or(""),
        ),
    };

    let mut components: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            _ => components.push(segment),
        }
    }

    components.join("/")
}

/// Express `target_part` relative to the folder of `source_part`, as relationship targets
/// conventionally are (`externalLinks/externalLink1.xml` from `xl/workbook.xml`).
pub fn relative_target(source_part: &str, target_part: &str) -> String {
    let source_dir: Vec<&str> = source_part
        .rsplit_once('/')
        .map(|(dir, _)| dir.split('/').filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    let target: Vec<&str> = target_part.split('/').filter(|s| !s.is_empty()).collect();

    let common = source_dir
        .iter()
        .zip(&target)
        .take_while(|(a, b)| a == b)
        .count();
    let mut out: Vec<&str> = vec![".."; source_dir.len() - common];
    out.extend_from_slice(&target[common..]);
    out.join("/")
}

pub fn parse_relationships(xml: &[u8]) -> Result<Vec<Relationship>, XlsxError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut relationships = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) | Event::Empty(ref e)
                if local_name(e.name().as_ref()).eq_ignore_ascii_case(b"Relationship") =>
            {
                // Entries missing `Id`, `Type`, or `Target` are unusable and skipped.
                relationships.extend(relationship_from(e)?);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(relationships)
}

fn relationship_from(e: &BytesStart<'_>) -> Result<Option<Relationship>, XlsxError> {
    let (mut id, mut type_uri, mut target, mut target_mode) = (None, None, None, None);
    for attr in e.attributes() {
        let attr = attr?;
        let slot = match local_name(attr.key.as_ref()).to_ascii_lowercase().as_slice() {
            b"id" => &mut id,
            b"type" => &mut type_uri,
            b"target" => &mut target,
            b"targetmode" => &mut target_mode,
            _ => continue,
        };
        *slot = Some(attr.unescape_value()?.into_owned());
    }

    Ok(match (id, type_uri, target) {
        (Some(id), Some(type_uri), Some(target)) => Some(Relationship {
            id,
            type_uri,
            target,
            target_mode,
        }),
        _ => None,
    })
}

/// Drop every `<Relationship>` whose `Id` is in `ids`, leaving the rest of the part untouched.
pub fn remove_relationships(rels_xml: &[u8], ids: &HashSet<&str>) -> Result<Vec<u8>, XlsxError> {
    let mut reader = Reader::from_reader(rels_xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(rels_xml.len()));

    let mut buf = Vec::new();
    let mut skipping = false;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Eof => break,
            Event::Start(ref e) if is_relationship(e) => {
                if relationship_id_in(e, ids)? {
                    skipping = true;
                } else {
                    writer.write_event(Event::Start(e.to_owned()))?;
                }
            }
            Event::Empty(ref e) if is_relationship(e) => {
                if !relationship_id_in(e, ids)? {
                    writer.write_event(Event::Empty(e.to_owned()))?;
                }
            }
            Event::End(ref e) if skipping && local_name(e.name().as_ref()) == b"Relationship" => {
                skipping = false;
            }
            ev if skipping => drop(ev),
            ev => writer.write_event(ev.into_owned())?,
        }
        buf.clear();
    }

    Ok(writer.into_inner())
}

fn is_relationship(e: &BytesStart<'_>) -> bool {
    local_name(e.name().as_ref()) == b"Relationship"
}

fn relationship_id_in(e: &BytesStart<'_>, ids: &HashSet<&str>) -> Result<bool, XlsxError> {
    for attr in e.attributes() {
        let attr = attr?;
        if local_name(attr.key.as_ref()).eq_ignore_ascii_case(b"Id") {
            return Ok(ids.contains(attr.unescape_value()?.as_ref()));
        }
    }
    Ok(false)
}

/// Append a relationship to `rels_xml` (or to a fresh `.rels` part when `None`), allocating the
/// next free `rIdN`. Returns the rewritten part and the new relationship id.
pub fn append_relationship(
    rels_xml: Option<&[u8]>,
    type_uri: &str,
    target: &str,
    target_mode: Option<&str>,
) -> Result<(Vec<u8>, String), XlsxError> {
    let existing = match rels_xml {
        Some(xml) => parse_relationships(xml)?,
        None => Vec::new(),
    };
    let next = existing
        .iter()
        .filter_map(|rel| rel.id.strip_prefix("rId")?.parse::<u32>().ok())
        .max()
        .unwrap_or(0)
        .checked_add(1)
        .ok_or_else(|| XlsxError::Invalid("no relationship id left after rId4294967295".to_string()))?;
    let id = format!("rId{next}");

    let mut relationship = BytesStart::new("Relationship");
    relationship.push_attribute(("Id", id.as_str()));
    relationship.push_attribute(("Type", type_uri));
    relationship.push_attribute(("Target", target));
    if let Some(mode) = target_mode {
        relationship.push_attribute(("TargetMode", mode));
    }

    let Some(rels_xml) = rels_xml else {
        let mut writer = Writer::new(Vec::new());
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
        let mut root = BytesStart::new("Relationships");
        root.push_attribute(("xmlns", PACKAGE_RELATIONSHIPS_NS));
        writer.write_event(Event::Start(root))?;
        writer.write_event(Event::Empty(relationship))?;
        writer.write_event(Event::End(BytesEnd::new("Relationships")))?;
        return Ok((writer.into_inner(), id));
    };

    let mut reader = Reader::from_reader(rels_xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(rels_xml.len() + 256));
    let mut buf = Vec::new();
    let mut inserted = false;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Eof => break,
            Event::End(ref e) if local_name(e.name().as_ref()) == b"Relationships" => {
                writer.write_event(Event::Empty(relationship.borrow()))?;
                inserted = true;
                writer.write_event(Event::End(e.to_owned()))?;
            }
            Event::Empty(ref e) if local_name(e.name().as_ref()) == b"Relationships" => {
                writer.write_event(Event::Start(e.to_owned()))?;
                writer.write_event(Event::Empty(relationship.borrow()))?;
                inserted = true;
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                writer.write_event(Event::End(BytesEnd::new(name)))?;
            }
            ev => writer.write_event(ev.into_owned())?,
        }
        buf.clear();
    }

    if !inserted {
        return Err(XlsxError::Invalid(
            "relationships part has no <Relationships> root".to_string(),
        ));
    }
    Ok((writer.into_inner(), id))
}

pub fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|b| *b == b':') {
        Some(idx) => &name[idx + 1..],
        None => name,
    }
}
