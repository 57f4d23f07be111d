use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::openxml::local_name;
use crate::XlsxError;

pub(crate) const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

/// Remove the `<Override>` entries whose `PartName` matches any of `part_names`.
pub(crate) fn remove_overrides(ct_xml: &[u8], part_names: &[&str]) -> Result<Vec<u8>, XlsxError> {
    let mut reader = Reader::from_reader(ct_xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(ct_xml.len()));

    let mut buf = Vec::new();
    let mut skipping = false;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Eof => break,
            Event::Start(ref e) if is_override(e) => {
                if override_matches(e, part_names)? {
                    skipping = true;
                } else {
                    writer.write_event(Event::Start(e.to_owned()))?;
                }
            }
            Event::Empty(ref e) if is_override(e) => {
                if !override_matches(e, part_names)? {
                    writer.write_event(Event::Empty(e.to_owned()))?;
                }
            }
            Event::End(ref e) if skipping && local_name(e.name().as_ref()) == b"Override" => {
                skipping = false;
            }
            ev if skipping => drop(ev),
            ev => writer.write_event(ev.into_owned())?,
        }
        buf.clear();
    }

    Ok(writer.into_inner())
}

/// Ensure an `<Override>` for `part_name` advertising `content_type` exists.
///
/// Returns `Ok(None)` when an override for the part is already present.
pub(crate) fn ensure_override(
    ct_xml: &[u8],
    part_name: &str,
    content_type: &str,
) -> Result<Option<Vec<u8>>, XlsxError> {
    let mut reader = Reader::from_reader(ct_xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(ct_xml.len() + 160));
    let mut buf = Vec::new();

    let absolute = format!("/{}", part_name.trim_start_matches('/'));
    let mut override_tag: Option<String> = None;
    let mut inserted = false;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Eof => break,
            Event::Start(ref e) | Event::Empty(ref e) if is_override(e) => {
                if override_matches(e, &[part_name])? {
                    return Ok(None);
                }
                if override_tag.is_none() {
                    override_tag = Some(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                }
                writer.write_event(event.borrow())?;
            }
            Event::End(ref e) if local_name(e.name().as_ref()) == b"Types" => {
                let tag = override_tag.clone().unwrap_or_else(|| prefixed(e.name().as_ref(), "Override"));
                let mut entry = BytesStart::new(tag);
                entry.push_attribute(("PartName", absolute.as_str()));
                entry.push_attribute(("ContentType", content_type));
                writer.write_event(Event::Empty(entry))?;
                inserted = true;
                writer.write_event(Event::End(e.to_owned()))?;
            }
            Event::Empty(ref e) if local_name(e.name().as_ref()) == b"Types" => {
                let root = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                writer.write_event(Event::Start(e.to_owned()))?;
                let mut entry = BytesStart::new(prefixed(root.as_bytes(), "Override"));
                entry.push_attribute(("PartName", absolute.as_str()));
                entry.push_attribute(("ContentType", content_type));
                writer.write_event(Event::Empty(entry))?;
                inserted = true;
                writer.write_event(Event::End(BytesEnd::new(root)))?;
            }
            ev => writer.write_event(ev.into_owned())?,
        }
        buf.clear();
    }

    if !inserted {
        return Err(XlsxError::Invalid(
            "[Content_Types].xml has no <Types> root".to_string(),
        ));
    }
    Ok(Some(writer.into_inner()))
}

fn is_override(e: &BytesStart<'_>) -> bool {
    local_name(e.name().as_ref()) == b"Override"
}

fn override_matches(e: &BytesStart<'_>, part_names: &[&str]) -> Result<bool, XlsxError> {
    for attr in e.attributes() {
        let attr = attr?;
        if local_name(attr.key.as_ref()) == b"PartName" {
            let value = attr.unescape_value()?;
            return Ok(part_names.iter().any(|name| {
                crate::zip_util::zip_part_names_equivalent(value.as_ref(), name)
            }));
        }
    }
    Ok(false)
}

fn prefixed(container_name: &[u8], local: &str) -> String {
    match container_name.iter().position(|b| *b == b':') {
        Some(idx) => format!("{}:{local}", String::from_utf8_lossy(&container_name[..idx])),
        None => local.to_string(),
    }
}
