//! Placeholder substitution for the archive documents.
//!
//! `{{ key }}` is required and fails the render when `key` is absent.
//! `{{? key }}` is optional: the whole line is dropped when `key` is absent.
//! Values are written as JSON string literals, which both the YAML and the
//! JSON documents accept verbatim.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use crate::error::ArchiveError;

pub type TemplateContext = BTreeMap<String, String>;

enum Segment<'a> {
    Text(&'a str),
    Placeholder { key: &'a str, optional: bool },
}

/// Render `source` against `context`
pub fn render(name: &str, source: &str, context: &TemplateContext) -> Result<String, ArchiveError> {
    let mut output = String::with_capacity(source.len());

    'lines: for (index, line) in source.split_inclusive('\n').enumerate() {
        let segments = split_line(line).ok_or_else(|| ArchiveError::MalformedTemplate {
            template: name.to_string(),
            line: index + 1,
        })?;

        let mut rendered = String::with_capacity(line.len());
        for segment in segments {
            match segment {
                Segment::Text(text) => rendered.push_str(text),
                Segment::Placeholder { key, optional } => match context.get(key) {
                    Some(value) => rendered.push_str(&quote(value)),
                    None if optional => continue 'lines,
                    None => {
                        return Err(ArchiveError::TemplateRender {
                            template: name.to_string(),
                            field: key.to_string(),
                        })
                    }
                },
            }
        }
        output.push_str(&rendered);
    }

    Ok(output)
}

fn split_line(line: &str) -> Option<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut rest = line;

    while let Some(open) = rest.find("{{") {
        segments.push(Segment::Text(&rest[..open]));
        let after_open = &rest[open + 2..];
        let close = after_open.find("}}")?;

        let inner = after_open[..close].trim();
        let (key, optional) = match inner.strip_prefix('?') {
            Some(key) => (key.trim(), true),
            None => (inner, false),
        };
        if key.is_empty() {
            return None;
        }
        segments.push(Segment::Placeholder { key, optional });
        rest = &after_open[close + 2..];
    }

    segments.push(Segment::Text(rest));
    Some(segments)
}

fn quote(value: &str) -> String {
    JsonValue::String(value.to_string()).to_string()
}
