//! Catalog documents: XML lists of overlay definitions.
//!
//! Two layouts are understood. The current one:
//!
//! ```xml
//! <repositories version="1.0">
//!   <repo quality="experimental" status="unofficial" priority="40">
//!     <name>foo</name>
//!     <description>Foo overlay</description>
//!     <homepage>https://example.org/foo</homepage>
//!     <owner type="person"><email>dev@example.org</email><name>Dev</name></owner>
//!     <source type="git">https://example.org/foo.git</source>
//!     <feed>https://example.org/foo/atom</feed>
//!   </repo>
//! </repositories>
//! ```
//!
//! and the legacy one, where name, type, src and contact are attributes of
//! an `<overlay>` element.

use thiserror::Error;

use crate::overlay::types::{MAX_PRIORITY, Overlay, Owner, Quality, Source, SourceType};
use crate::overlay::xml::{self, Element, XmlError};

#[derive(Error, Debug, Clone)]
#[error("XML parsing failed for \"{origin}\" ({source})")]
pub struct DocumentError {
    pub origin: String,
    #[source]
    pub source: XmlError,
}

/// Result of reading one document.
#[derive(Debug, Default)]
pub struct ParsedDocument {
    /// Entries in document order
    pub overlays: Vec<Overlay>,
    /// Entries that could not be turned into overlays, with reasons
    pub skipped: Vec<String>,
}

const ENTRY_TAGS: [&str; 2] = ["repo", "overlay"];

pub fn parse_document(text: &str, origin: &str) -> Result<ParsedDocument, DocumentError> {
    let root = xml::parse(text).map_err(|source| DocumentError {
        origin: origin.to_string(),
        source,
    })?;

    let entries: Vec<&Element> = if ENTRY_TAGS.contains(&root.name.as_str()) {
        vec![&root]
    } else {
        root.children
            .iter()
            .filter(|c| ENTRY_TAGS.contains(&c.name.as_str()))
            .collect()
    };

    let mut parsed = ParsedDocument::default();
    for (index, entry) in entries.into_iter().enumerate() {
        match parse_entry(entry) {
            Ok(overlay) => parsed.overlays.push(overlay),
            Err(reason) => parsed
                .skipped
                .push(format!("{origin}: entry #{}: {reason}", index + 1)),
        }
    }
    Ok(parsed)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn text_or_attr(entry: &Element, key: &str) -> Option<String> {
    entry.child_text(key).or_else(|| {
        entry
            .attr(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

fn parse_sources(entry: &Element, name: &str) -> Result<Vec<Source>, String> {
    let mut sources = Vec::new();
    for node in entry.children_named("source") {
        let Some(kind) = node.attr("type") else {
            continue;
        };
        let kind: SourceType = kind.parse().map_err(|e| format!("overlay \"{name}\": {e}"))?;
        let url = node.text.trim();
        if url.is_empty() {
            continue;
        }
        sources.push(Source {
            kind,
            url: url.to_string(),
        });
    }

    if sources.is_empty() {
        if let (Some(kind), Some(src)) = (entry.attr("type"), entry.attr("src")) {
            let kind: SourceType = kind.parse().map_err(|e| format!("overlay \"{name}\": {e}"))?;
            sources.push(Source {
                kind,
                url: src.trim().to_string(),
            });
        }
    }

    if sources.is_empty() {
        return Err(format!("overlay \"{name}\" is missing a \"source\" entry"));
    }
    Ok(sources)
}

fn parse_owner(entry: &Element) -> Owner {
    match entry.child("owner") {
        Some(owner) if owner.child("email").is_some() => Owner {
            kind: owner.attr("type").map(String::from),
            name: owner.child_text("name"),
            contact: owner.child_text("email"),
        },
        owner => Owner {
            kind: owner.and_then(|o| o.attr("type")).map(String::from),
            name: owner.and_then(|o| o.child_text("name")),
            contact: entry.attr("contact").map(|c| c.trim().to_string()).filter(|c| !c.is_empty()),
        },
    }
}

fn parse_entry(entry: &Element) -> Result<Overlay, String> {
    let name = text_or_attr(entry, "name").ok_or("missing a \"name\" entry")?;
    let sources = parse_sources(entry, &name)?;

    let priority = match entry.attr("priority") {
        Some(p) => Some(
            p.trim()
                .parse::<u8>()
                .ok()
                .filter(|p| *p <= MAX_PRIORITY)
                .ok_or_else(|| format!("overlay \"{name}\" has invalid priority \"{p}\""))?,
        ),
        None => None,
    };

    let description = entry
        .child("description")
        .map(|d| collapse_whitespace(&d.text))
        .filter(|d| !d.is_empty());

    let feeds = entry
        .children_named("feed")
        .map(|f| f.text.trim().to_string())
        .filter(|f| !f.is_empty())
        .collect();

    Ok(Overlay {
        owner: parse_owner(entry),
        description,
        homepage: entry.child_text("homepage").or_else(|| entry.child_text("link")),
        quality: entry.attr("quality").map(Quality::parse_lenient).unwrap_or_default(),
        status: entry.attr("status").map(String::from),
        sources,
        feeds,
        priority,
        branch: text_or_attr(entry, "branch"),
        subpath: text_or_attr(entry, "subpath"),
        irc: entry.child_text("irc"),
        name,
    })
}
