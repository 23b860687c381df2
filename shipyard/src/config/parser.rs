//! `{{key}}` template parsing

/// A piece of a parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Key(String),
}

/// Split a template into literal text and `{{key}}` references.
///
/// An unterminated `{{` is kept as literal text. Whitespace around the key is
/// ignored.
pub fn parse(template: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };

        let key = after[..end].trim();
        if key.is_empty() {
            // `{{}}` is not a reference
            push_text(&mut segments, &rest[..start + 4 + end]);
        } else {
            push_text(&mut segments, &rest[..start]);
            segments.push(Segment::Key(key.to_string()));
        }
        rest = &after[end + 2..];
    }

    push_text(&mut segments, rest);
    segments
}

/// Whether the template references any key
pub fn has_references(template: &str) -> bool {
    parse(template)
        .iter()
        .any(|segment| matches!(segment, Segment::Key(_)))
}

fn push_text(segments: &mut Vec<Segment>, text: &str) {
    if text.is_empty() {
        return;
    }
    match segments.last_mut() {
        Some(Segment::Text(existing)) => existing.push_str(text),
        _ => segments.push(Segment::Text(text.to_string())),
    }
}
