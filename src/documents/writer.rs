//! Serialization of a [`Document`] through a quick-xml `Writer`

use std::io::Write;

use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::{Document, NodeId, NodeKind};
use crate::error::Result;
use crate::names::join_qname;

/// Write `doc` with an XML declaration
///
/// Pretty output drops whitespace-only text and indents by two spaces;
/// compact output keeps character data exactly as stored.
pub(super) fn write<W: Write>(doc: &Document, out: W, pretty: bool) -> Result<()> {
    let mut writer = if pretty {
        Writer::new_with_indent(out, b' ', 2)
    } else {
        Writer::new(out)
    };

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    if let Some(doctype) = doc.doctype() {
        separate(&mut writer, pretty)?;
        writer.write_event(Event::DocType(BytesText::from_escaped(format!(" {}", doctype))))?;
    }

    for node in &doc.prolog {
        separate(&mut writer, pretty)?;
        write_node(doc, &mut writer, *node, pretty)?;
    }
    separate(&mut writer, pretty)?;
    write_node(doc, &mut writer, doc.root(), pretty)?;
    for node in &doc.epilog {
        separate(&mut writer, pretty)?;
        write_node(doc, &mut writer, *node, pretty)?;
    }

    writer.get_mut().write_all(b"\n")?;
    Ok(())
}

/// Top-level items sit on their own lines; the indenting writer does this itself
fn separate<W: Write>(writer: &mut Writer<W>, pretty: bool) -> Result<()> {
    if !pretty {
        writer.get_mut().write_all(b"\n")?;
    }
    Ok(())
}

fn is_blank(doc: &Document, id: NodeId) -> bool {
    matches!(doc.kind(id), NodeKind::Text(s) if s.trim().is_empty())
}

fn write_node<W: Write>(doc: &Document, writer: &mut Writer<W>, id: NodeId, pretty: bool) -> Result<()> {
    match doc.kind(id) {
        NodeKind::Element(element) => {
            let name = element.prefixed_name();
            let mut start = BytesStart::new(name.as_str());

            for (prefix, uri) in element.namespaces.iter() {
                let key = match prefix {
                    Some(p) => format!("xmlns:{}", p),
                    None => "xmlns".to_string(),
                };
                start.push_attribute((key.as_str(), uri));
            }
            for (qname, attr) in &element.attributes {
                let key = join_qname(attr.prefix.as_deref(), &qname.local_name);
                start.push_attribute((key.as_str(), attr.value.as_str()));
            }

            let children: Vec<NodeId> = doc
                .children(id)
                .iter()
                .copied()
                .filter(|c| !(pretty && is_blank(doc, *c)))
                .collect();

            if children.is_empty() {
                writer.write_event(Event::Empty(start))?;
            } else {
                writer.write_event(Event::Start(start))?;
                for child in children {
                    write_node(doc, writer, child, pretty)?;
                }
                writer.write_event(Event::End(BytesEnd::new(name.as_str())))?;
            }
        }
        NodeKind::Text(text) => {
            writer.write_event(Event::Text(BytesText::new(text)))?;
        }
        NodeKind::CData(text) if !text.contains("]]>") => {
            writer.write_event(Event::CData(BytesCData::new(text.as_str())))?;
        }
        NodeKind::CData(text) => {
            writer.write_event(Event::Text(BytesText::new(text)))?;
        }
        NodeKind::Comment(text) => {
            writer.write_event(Event::Comment(BytesText::from_escaped(text.as_str())))?;
        }
        NodeKind::ProcessingInstruction(text) => {
            writer.write_event(Event::PI(BytesText::from_escaped(text.as_str())))?;
        }
    }
    Ok(())
}
