//! Frontmatter extraction
//!
//! Documents may open with a YAML block fenced by `---` lines. The block is
//! split off, parsed with serde_yaml and mapped onto [`Frontmatter`]; keys the
//! site does not interpret are preserved in `extra` as JSON values.
//!
//! MDX documents additionally carry top-level `import`/`export` statements,
//! which [`strip_mdx`] removes before rendering.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_yaml::Value;
use thiserror::Error;

use crate::models::Frontmatter;

#[derive(Debug, Error, PartialEq)]
pub enum FrontmatterError {
    #[error("Frontmatter block is not terminated")]
    Unterminated,

    #[error("Invalid frontmatter YAML: {0}")]
    Yaml(String),

    #[error("Invalid frontmatter field '{field}': {message}")]
    InvalidField { field: String, message: String },
}

impl FrontmatterError {
    fn field(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// A document split into its frontmatter and markdown body
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub frontmatter: Frontmatter,
    pub body: String,
}

/// Split and parse the frontmatter of a document.
///
/// A document without a leading `---` line has default frontmatter and its
/// whole text as body.
pub fn parse(source: &str) -> Result<ParsedDocument, FrontmatterError> {
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);

    let Some((yaml, body)) = split(source)? else {
        return Ok(ParsedDocument {
            frontmatter: Frontmatter::default(),
            body: source.to_string(),
        });
    };

    let value: Value = if yaml.trim().is_empty() {
        Value::Null
    } else {
        serde_yaml::from_str(yaml).map_err(|e| FrontmatterError::Yaml(e.to_string()))?
    };

    Ok(ParsedDocument {
        frontmatter: from_value(value)?,
        body: body.to_string(),
    })
}

/// Returns `(yaml, body)` when the document opens with a frontmatter fence
fn split(source: &str) -> Result<Option<(&str, &str)>, FrontmatterError> {
    let mut lines = source.split_inclusive('\n');
    let mut position = 0;

    // Leading blank lines are tolerated before the opening fence
    let opening = loop {
        match lines.next() {
            Some(line) if line.trim().is_empty() => position += line.len(),
            Some(line) => break line,
            None => return Ok(None),
        }
    };
    if opening.trim_end() != "---" {
        return Ok(None);
    }
    position += opening.len();

    let yaml_start = position;
    for line in lines {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            let yaml = &source[yaml_start..position];
            let body = &source[position + line.len()..];
            return Ok(Some((yaml, body)));
        }
        position += line.len();
    }

    Err(FrontmatterError::Unterminated)
}

fn from_value(value: Value) -> Result<Frontmatter, FrontmatterError> {
    let mapping = match value {
        Value::Null => return Ok(Frontmatter::default()),
        Value::Mapping(mapping) => mapping,
        _ => return Err(FrontmatterError::Yaml("frontmatter must be a mapping".to_string())),
    };

    let mut fm = Frontmatter::default();
    for (key, value) in mapping {
        let key = match key {
            Value::String(key) => key,
            other => {
                return Err(FrontmatterError::Yaml(format!(
                    "frontmatter keys must be strings, found {:?}",
                    other
                )))
            }
        };

        match key.as_str() {
            "title" => fm.title = optional_string(&key, value)?,
            "description" => fm.description = optional_string(&key, value)?,
            "summary" => fm.summary = optional_string(&key, value)?,
            "author" => fm.author = optional_string(&key, value)?,
            "slug" => {
                fm.slug = optional_string(&key, value)?
                    .map(|slug| slug.trim_matches('/').to_string())
                    .filter(|slug| !slug.is_empty())
            }
            "date" => fm.date = optional_date(&key, value)?,
            "updated" => fm.updated = optional_date(&key, value)?,
            "tags" => fm.tags = tags(&key, value)?,
            "draft" => fm.draft = boolean(&key, value, false)?,
            "toc" => fm.toc = boolean(&key, value, true)?,
            "order" => {
                fm.order = match value {
                    Value::Null => None,
                    Value::Number(n) => Some(
                        n.as_i64()
                            .ok_or_else(|| FrontmatterError::field(&key, "expected an integer"))?,
                    ),
                    Value::String(s) => Some(
                        s.trim()
                            .parse()
                            .map_err(|_| FrontmatterError::field(&key, "expected an integer"))?,
                    ),
                    _ => return Err(FrontmatterError::field(&key, "expected an integer")),
                }
            }
            _ => {
                let json = serde_json::to_value(&value)
                    .map_err(|e| FrontmatterError::field(&key, e.to_string()))?;
                fm.extra.insert(key, json);
            }
        }
    }

    Ok(fm)
}

fn optional_string(field: &str, value: Value) -> Result<Option<String>, FrontmatterError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        _ => Err(FrontmatterError::field(field, "expected a string")),
    }
}

fn boolean(field: &str, value: Value, default: bool) -> Result<bool, FrontmatterError> {
    match value {
        Value::Null => Ok(default),
        Value::Bool(b) => Ok(b),
        _ => Err(FrontmatterError::field(field, "expected true or false")),
    }
}

/// Tags come either as a YAML list or a comma separated string
fn tags(field: &str, value: Value) -> Result<Vec<String>, FrontmatterError> {
    let raw: Vec<String> = match value {
        Value::Null => Vec::new(),
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        Value::Sequence(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                Value::Number(n) => Ok(n.to_string()),
                _ => Err(FrontmatterError::field(field, "tags must be strings")),
            })
            .collect::<Result<_, _>>()?,
        _ => return Err(FrontmatterError::field(field, "expected a list of tags")),
    };

    let mut tags: Vec<String> = Vec::with_capacity(raw.len());
    for tag in raw {
        let tag = tag.trim();
        if !tag.is_empty() && !tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            tags.push(tag.to_string());
        }
    }
    Ok(tags)
}

fn optional_date(field: &str, value: Value) -> Result<Option<DateTime<Utc>>, FrontmatterError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => parse_date(&s)
            .map(Some)
            .ok_or_else(|| FrontmatterError::field(field, format!("unrecognized date '{}'", s))),
        _ => Err(FrontmatterError::field(field, "expected a date string")),
    }
}

/// Parse `YYYY-MM-DD`, RFC 3339, or `YYYY-MM-DD HH:MM:SS` (taken as UTC)
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Remove top-level MDX `import`/`export` statements.
///
/// Lines inside fenced code blocks are kept. A statement that opens braces or
/// parentheses swallows the following lines until they are balanced again.
pub fn strip_mdx(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut fence: Option<String> = None;
    let mut open_brackets: i64 = 0;

    for line in body.split_inclusive('\n') {
        if open_brackets > 0 {
            open_brackets += bracket_balance(line);
            continue;
        }

        let trimmed = line.trim_start();
        if let Some(marker) = &fence {
            if trimmed.starts_with(marker.as_str()) {
                fence = None;
            }
            out.push_str(line);
            continue;
        }

        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            let marker: String = trimmed.chars().take_while(|c| *c == '`' || *c == '~').collect();
            fence = Some(marker);
            out.push_str(line);
            continue;
        }

        // Only unindented statements count; indented ones are code
        if line.starts_with("import ") || line.starts_with("export ") {
            open_brackets = bracket_balance(line).max(0);
            continue;
        }

        out.push_str(line);
    }

    out
}

fn bracket_balance(line: &str) -> i64 {
    line.chars().fold(0, |acc, c| match c {
        '{' | '(' | '[' => acc + 1,
        '}' | ')' | ']' => acc - 1,
        _ => acc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_document_without_frontmatter() {
        let doc = parse("# Hello\n\nBody").unwrap();
        assert_eq!(doc.frontmatter, Frontmatter::default());
        assert_eq!(doc.body, "# Hello\n\nBody");
    }

    #[test]
    fn test_known_fields() {
        let source = "---\ntitle: Ownership\ndescription: Borrowing explained\ndate: 2024-03-05\ntags: [rust, memory]\ndraft: true\norder: 2\ntoc: false\nauthor: Ana\n---\n# Body\n";
        let doc = parse(source).unwrap();
        let fm = doc.frontmatter;
        assert_eq!(fm.title.as_deref(), Some("Ownership"));
        assert_eq!(fm.description.as_deref(), Some("Borrowing explained"));
        assert_eq!(fm.tags, vec!["rust", "memory"]);
        assert!(fm.draft);
        assert!(!fm.toc);
        assert_eq!(fm.order, Some(2));
        assert_eq!(fm.author.as_deref(), Some("Ana"));
        let date = fm.date.unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (2024, 3, 5));
        assert_eq!(doc.body, "# Body\n");
    }

    #[test]
    fn test_bom_and_leading_blank_lines() {
        let doc = parse("\u{feff}\n\n---\ntitle: Hi\n---\nText").unwrap();
        assert_eq!(doc.frontmatter.title.as_deref(), Some("Hi"));
        assert_eq!(doc.body, "Text");
    }

    #[test]
    fn test_empty_block_gives_defaults() {
        let doc = parse("---\n---\nBody").unwrap();
        assert_eq!(doc.frontmatter, Frontmatter::default());
        assert_eq!(doc.body, "Body");
    }

    #[test]
    fn test_unterminated_block() {
        assert_eq!(
            parse("---\ntitle: Oops\n\nNo closing fence").unwrap_err(),
            FrontmatterError::Unterminated
        );
    }

    #[test]
    fn test_invalid_yaml() {
        let err = parse("---\ntitle: [unclosed\n---\n").unwrap_err();
        assert!(matches!(err, FrontmatterError::Yaml(_)));
    }

    #[test]
    fn test_non_mapping_rejected() {
        assert!(matches!(
            parse("---\n- a\n- b\n---\n").unwrap_err(),
            FrontmatterError::Yaml(_)
        ));
    }

    #[test]
    fn test_comma_separated_tags_deduplicated() {
        let doc = parse("---\ntags: \"rust, Rust , async,\"\n---\n").unwrap();
        assert_eq!(doc.frontmatter.tags, vec!["rust", "async"]);
    }

    #[test]
    fn test_unknown_keys_kept_in_extra() {
        let doc = parse("---\ntitle: T\ncover: /img/a.png\nseries:\n  name: basics\n---\n").unwrap();
        let extra = &doc.frontmatter.extra;
        assert_eq!(extra["cover"], serde_json::json!("/img/a.png"));
        assert_eq!(extra["series"]["name"], serde_json::json!("basics"));
        assert!(!extra.contains_key("title"));
    }

    #[test]
    fn test_bad_field_types() {
        assert!(matches!(
            parse("---\ndraft: maybe\n---\n").unwrap_err(),
            FrontmatterError::InvalidField { .. }
        ));
        assert!(matches!(
            parse("---\ndate: yesterday\n---\n").unwrap_err(),
            FrontmatterError::InvalidField { .. }
        ));
        assert!(matches!(
            parse("---\norder: 1.5\n---\n").unwrap_err(),
            FrontmatterError::InvalidField { .. }
        ));
    }

    #[test]
    fn test_slug_override_is_trimmed() {
        let doc = parse("---\nslug: /custom/path/\n---\n").unwrap();
        assert_eq!(doc.frontmatter.slug.as_deref(), Some("custom/path"));
    }

    #[test]
    fn test_parse_date_formats() {
        let d = parse_date("2023-12-01").unwrap();
        assert_eq!((d.year(), d.month(), d.day(), d.hour()), (2023, 12, 1, 0));

        let d = parse_date("2023-12-01T10:30:00+02:00").unwrap();
        assert_eq!(d.hour(), 8);

        let d = parse_date("2023-12-01 10:30:00").unwrap();
        assert_eq!((d.hour(), d.minute()), (10, 30));

        assert!(parse_date("01/12/2023").is_none());
    }

    #[test]
    fn test_strip_mdx_statements() {
        let body = "import Chart from '../components/Chart'\nexport const meta = {\n  wide: true,\n}\n\n# Title\n\n<Chart data={[1, 2]} />\n";
        let stripped = strip_mdx(body);
        assert_eq!(stripped, "\n# Title\n\n<Chart data={[1, 2]} />\n");
    }

    #[test]
    fn test_strip_mdx_keeps_code_fences() {
        let body = "```js\nimport x from 'y'\nexport default x\n```\nimport z from 'z'\n";
        let stripped = strip_mdx(body);
        assert_eq!(stripped, "```js\nimport x from 'y'\nexport default x\n```\n");
    }

    #[test]
    fn test_strip_mdx_ignores_indented_and_prose() {
        let body = "    import kept\nimporting things is fine\n";
        assert_eq!(strip_mdx(body), body);
    }
}
