//! JSON Pointer (RFC 6901) segment encoding and decoding.
//!
//! Pointers used as `$ref` values are URI fragments: `#/components/schemas/Pet`.
//! Each segment escapes `~` as `~0` and `/` as `~1`, and may additionally be
//! percent-encoded because it lives inside a URI.

/// Escape a single segment: `~` becomes `~0`, then `/` becomes `~1`.
///
/// The order matters: escaping `/` first would turn `/` into `~1` and then
/// into `~01`.
pub fn encode(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Unescape a single segment in one left-to-right pass.
///
/// `~01` decodes to `~1` (a literal tilde followed by `1`), never to `~/`.
/// A `~` not followed by `0` or `1` is kept as-is.
pub fn decode(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('0') => {
                chars.next();
                out.push('~');
            }
            Some('1') => {
                chars.next();
                out.push('/');
            }
            _ => out.push('~'),
        }
    }
    out
}

/// Returns true for in-document fragment pointers (`#`, `#/...`).
pub fn is_local(reference: &str) -> bool {
    reference.starts_with('#')
}

/// Split a fragment pointer into decoded segments.
///
/// The leading `#` and `/` are stripped. Segments are percent-decoded and then
/// RFC 6901 unescaped; a segment whose percent-encoding is not valid UTF-8 is
/// unescaped from its raw form. `#` and `#/` yield no segments.
pub fn segments(pointer: &str) -> Vec<String> {
    let path = pointer.strip_prefix('#').unwrap_or(pointer);
    let Some(path) = path.strip_prefix('/') else {
        return Vec::new();
    };
    if path.is_empty() {
        return Vec::new();
    }

    path.split('/')
        .map(|raw| match urlencoding::decode(raw) {
            Ok(unescaped) => decode(&unescaped),
            Err(_) => decode(raw),
        })
        .collect()
}

/// The decoded last segment of a pointer, e.g. `Pet` for `#/components/schemas/Pet`.
pub fn last_segment(pointer: &str) -> Option<String> {
    segments(pointer).pop()
}

/// Build a fragment pointer from unescaped segments.
pub fn from_segments<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut pointer = String::from("#");
    for segment in segments {
        pointer.push('/');
        pointer.push_str(&encode(segment.as_ref()));
    }
    pointer
}
