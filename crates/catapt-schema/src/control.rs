//! Debian control paragraphs (`Key: value` blocks).
//!
//! Used for the `control` member of a package, the `Packages` index and the
//! `Release` manifest.

use crate::SchemaError;

/// One control block. Field order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Paragraph {
    fields: Vec<(String, String)>,
}

impl Paragraph {
    /// An empty paragraph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Builder-style set that skips `None`.
    pub fn with_opt(self, key: impl Into<String>, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.with(key, value),
            None => self,
        }
    }

    /// Set a field, replacing an existing value in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self
            .fields
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&key))
        {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((key, value)),
        }
    }

    /// Field lookup; keys are case-insensitive as in dpkg.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Iterate fields in order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether no field carries a value.
    pub fn is_empty(&self) -> bool {
        self.fields.iter().all(|(_, v)| v.is_empty())
    }

    /// Drop fields with empty values, which emission omits anyway.
    pub fn without_empty(mut self) -> Self {
        self.fields.retain(|(_, v)| !v.is_empty());
        self
    }

    /// Render as text, terminated by a newline (no trailing blank line).
    pub fn emit(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.fields {
            if value.is_empty() {
                continue;
            }
            let mut lines = value.split('\n');
            let first = lines.next().unwrap_or_default();
            out.push_str(key);
            out.push(':');
            if !first.is_empty() {
                out.push(' ');
                out.push_str(first);
            }
            out.push('\n');
            for line in lines {
                out.push(' ');
                if line.is_empty() {
                    out.push('.');
                } else {
                    out.push_str(line);
                }
                out.push('\n');
            }
        }
        out
    }

    /// Parse a single paragraph; fails if `text` holds more than one.
    pub fn parse(text: &str) -> Result<Self, SchemaError> {
        let mut paragraphs = parse_paragraphs(text)?;
        match paragraphs.len() {
            0 => Ok(Self::new()),
            1 => Ok(paragraphs.remove(0)),
            n => Err(SchemaError::parse(format!(
                "expected one paragraph, found {n}"
            ))),
        }
    }
}

/// Render paragraphs separated by a single blank line.
pub fn emit_paragraphs<'a>(paragraphs: impl IntoIterator<Item = &'a Paragraph>) -> String {
    paragraphs
        .into_iter()
        .map(Paragraph::emit)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a multi-paragraph file. Unknown fields are kept verbatim.
pub fn parse_paragraphs(text: &str) -> Result<Vec<Paragraph>, SchemaError> {
    let mut paragraphs = Vec::new();
    let mut current = Paragraph::new();

    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            if !current.fields.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        if let Some(rest) = line.strip_prefix([' ', '\t']) {
            let Some((_, value)) = current.fields.last_mut() else {
                return Err(SchemaError::parse(format!(
                    "line {}: continuation line without a field",
                    index + 1
                )));
            };
            value.push('\n');
            if rest != "." {
                value.push_str(rest);
            }
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            return Err(SchemaError::parse(format!(
                "line {}: expected 'Key: value', got '{line}'",
                index + 1
            )));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(SchemaError::parse(format!("line {}: empty field name", index + 1)));
        }
        current
            .fields
            .push((key.to_string(), value.trim_start().to_string()));
    }

    if !current.fields.is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_continuations_and_skips_empty_fields() {
        let p = Paragraph::new()
            .with("Package", "foo")
            .with("Depends", "")
            .with("Description", "short\nlong line\n\nafter gap");
        assert_eq!(
            p.emit(),
            "Package: foo\nDescription: short\n long line\n .\n after gap\n"
        );
    }

    #[test]
    fn empty_first_line_emits_bare_key() {
        let p = Paragraph::new().with("SHA256", "\nabc 1 a\ndef 2 b");
        assert_eq!(p.emit(), "SHA256:\n abc 1 a\n def 2 b\n");
    }

    #[test]
    fn parse_after_emit_recovers_paragraph() {
        let p = Paragraph::new()
            .with("Package", "foo")
            .with("Section", "")
            .with("Description", "short\nlong line\n\nafter gap")
            .with("SHA256", "\nabc 1 a")
            .with("X-Custom", "kept");
        let parsed = Paragraph::parse(&p.emit()).unwrap();
        assert_eq!(parsed, p.without_empty());
        assert_eq!(parsed.get("x-custom"), Some("kept"));
    }

    #[test]
    fn multi_paragraph_files() {
        let text = "Package: a\nVersion: 1\n\nPackage: b\nVersion: 2\n";
        let ps = parse_paragraphs(text).unwrap();
        assert_eq!(ps.len(), 2);
        assert_eq!(ps[1].get("Package"), Some("b"));
        assert_eq!(emit_paragraphs(&ps), text);
    }

    #[test]
    fn line_without_colon_is_rejected() {
        let err = parse_paragraphs("Package: a\nnot a field\n").unwrap_err();
        assert!(matches!(err, SchemaError::Parse(_)));
    }

    #[test]
    fn set_replaces_in_place() {
        let mut p = Paragraph::new().with("A", "1").with("B", "2");
        p.set("a", "3");
        let keys: Vec<_> = p.fields().map(|(k, v)| format!("{k}={v}")).collect();
        assert_eq!(keys, vec!["A=3", "B=2"]);
    }
}
