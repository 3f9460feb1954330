//! Markdown rendering service
//!
//! This module turns a document body into HTML with syntax highlighted code
//! blocks, heading anchors, an optional table of contents, and rewritten
//! links. It uses pulldown-cmark for parsing and syntect for highlighting.
//!
//! # Example
//!
//! ```
//! use scriptorium::services::markdown::{MarkdownRenderer, RenderOptions};
//!
//! let renderer = MarkdownRenderer::new();
//! let doc = renderer.render_document("[[toc]]\n\n## Hello World\n\nSome **bold** text.", &RenderOptions::default());
//! assert!(doc.html.contains(r#"<h2 id="hello-world">"#));
//! assert!(doc.html.contains(r#"<nav class="toc">"#));
//! assert_eq!(doc.toc[0].anchor, "hello-world");
//! ```

use pulldown_cmark::{html, CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use syntect::highlighting::ThemeSet;
use syntect::html::highlighted_html_for_string;
use syntect::parsing::SyntaxSet;

use crate::models::TocEntry;

const DEFAULT_THEME: &str = "base16-ocean.dark";

/// Marker splitting the summary from the rest of a document
pub const MORE_MARKER: &str = "<!-- more -->";

const WORDS_PER_MINUTE: usize = 200;

/// Per-document rendering options
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions<'a> {
    /// Inject the table of contents at `[[toc]]` / `<!-- toc -->` markers
    pub toc: bool,
    /// Maximum summary length in characters
    pub summary_length: usize,
    /// Source path of the document relative to the content root, used to
    /// resolve relative links
    pub source: Option<&'a str>,
    pub links: Option<&'a LinkMap>,
}

impl Default for RenderOptions<'_> {
    fn default() -> Self {
        Self {
            toc: true,
            summary_length: 200,
            source: None,
            links: None,
        }
    }
}

/// Output of [`MarkdownRenderer::render_document`]
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDocument {
    pub html: String,
    /// Nested table of contents; empty when disabled
    pub toc: Vec<TocEntry>,
    /// Text of the first level-one heading
    pub first_heading: Option<String>,
    pub summary: String,
    pub word_count: usize,
    pub reading_minutes: usize,
}

/// Maps document source paths to their public routes
#[derive(Debug, Clone, Default)]
pub struct LinkMap {
    routes: HashMap<String, String>,
}

impl LinkMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document; `source` is relative to the content root
    pub fn insert(&mut self, source: &str, route: &str) {
        self.routes.insert(normalize_path(source), route.to_string());
    }

    /// Resolve a link to a markdown file written in document `from`.
    ///
    /// Returns `None` for anything that is not a link to a known `.md`/`.mdx`
    /// document.
    pub fn resolve(&self, from: &str, href: &str) -> Option<String> {
        if is_external(href) || href.contains(':') || !looks_like_document(href) {
            return None;
        }

        let (path, fragment) = match href.split_once('#') {
            Some((path, fragment)) => (path, Some(fragment)),
            None => (href, None),
        };
        let path = path.split('?').next().unwrap_or(path);

        let decoded = percent_decode(path);
        let joined = if let Some(absolute) = decoded.strip_prefix('/') {
            absolute.to_string()
        } else {
            let dir = from.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
            format!("{}/{}", dir, decoded)
        };

        let route = self.routes.get(&normalize_path(&joined))?;
        Some(match fragment {
            Some(fragment) if !fragment.is_empty() => {
                format!("{}#{}", route, slugify(&percent_decode(fragment)))
            }
            _ => route.clone(),
        })
    }
}

fn looks_like_document(href: &str) -> bool {
    let path = href.split(['#', '?']).next().unwrap_or(href).to_lowercase();
    path.ends_with(".md") || path.ends_with(".mdx")
}

/// Collapse `.` and `..` segments and use `/` separators
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

fn percent_decode(s: &str) -> String {
    urlencoding::decode(s)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

fn is_external(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Anchor slug for a heading or fragment.
///
/// Lowercases, keeps alphanumerics and other non-ASCII characters, turns
/// whitespace, `-` and `_` into single dashes and drops remaining ASCII
/// punctuation. An empty result becomes `section`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    for c in text.trim().chars().flat_map(char::to_lowercase) {
        if c.is_whitespace() || c == '-' || c == '_' {
            pending_dash = true;
        } else if c.is_alphanumeric() || !c.is_ascii() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        }
    }

    if slug.is_empty() {
        "section".to_string()
    } else {
        slug
    }
}

/// Hands out unique heading ids within one document
#[derive(Debug, Default)]
struct AnchorSet {
    used: HashSet<String>,
    counters: HashMap<String, usize>,
}

impl AnchorSet {
    fn unique(&mut self, base: String) -> String {
        if self.used.insert(base.clone()) {
            return base;
        }
        let counter = self.counters.entry(base.clone()).or_insert(0);
        loop {
            *counter += 1;
            let candidate = format!("{}-{}", base, counter);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

/// Count words; every CJK character counts as one word
pub fn count_words(text: &str) -> usize {
    let mut count = 0;
    let mut in_word = false;
    for c in text.chars() {
        if is_cjk(c) {
            count += 1;
            in_word = false;
        } else if c.is_whitespace() {
            in_word = false;
        } else if !in_word {
            count += 1;
            in_word = true;
        }
    }
    count
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30FF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{AC00}'..='\u{D7AF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{20000}'..='\u{2A6DF}')
}

pub fn reading_minutes(words: usize) -> usize {
    words.div_ceil(WORDS_PER_MINUTE).max(1)
}

/// Normalize whitespace and cut to `max_chars` characters, appending `…`
/// when something was removed.
pub fn summarize(text: &str, max_chars: usize) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.chars().count() <= max_chars {
        return normalized;
    }
    let cut: String = normalized.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}

fn parser_options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options.insert(Options::ENABLE_SMART_PUNCTUATION);
    options.insert(Options::ENABLE_HEADING_ATTRIBUTES);
    options
}

/// A thread-safe Markdown renderer with syntax highlighting support.
///
/// Syntax definitions and themes are loaded once and shared between clones.
#[derive(Clone)]
pub struct MarkdownRenderer {
    syntax_set: Arc<SyntaxSet>,
    theme_set: Arc<ThemeSet>,
    theme_name: String,
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MarkdownRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkdownRenderer")
            .field("theme_name", &self.theme_name)
            .finish()
    }
}

impl MarkdownRenderer {
    pub fn new() -> Self {
        Self::with_theme(DEFAULT_THEME)
    }

    /// Creates a renderer using the given syntect theme, falling back to
    /// `base16-ocean.dark` when the theme is unknown.
    pub fn with_theme(theme_name: &str) -> Self {
        let syntax_set = SyntaxSet::load_defaults_newlines();
        let theme_set = ThemeSet::load_defaults();

        let validated_theme = if theme_set.themes.contains_key(theme_name) {
            theme_name.to_string()
        } else {
            tracing::warn!("Unknown syntax theme '{}', using {}", theme_name, DEFAULT_THEME);
            DEFAULT_THEME.to_string()
        };

        Self {
            syntax_set: Arc::new(syntax_set),
            theme_set: Arc::new(theme_set),
            theme_name: validated_theme,
        }
    }

    pub fn theme_name(&self) -> &str {
        &self.theme_name
    }

    /// Renders Markdown text to HTML with default options.
    pub fn render(&self, markdown: &str) -> String {
        self.render_document(markdown, &RenderOptions::default()).html
    }

    /// Renders a document body and collects everything derived from it.
    pub fn render_document(&self, markdown: &str, options: &RenderOptions<'_>) -> RenderedDocument {
        let parser = Parser::new_ext(markdown, parser_options());

        let mut compiler = Compiler::new(self, options);
        for event in parser {
            compiler.push(event);
        }
        let compiled = compiler.finish();

        let mut html_output = String::new();
        html::push_html(&mut html_output, compiled.events.into_iter());

        let summary_source = compiled
            .lead
            .or(compiled.first_paragraph)
            .unwrap_or_default();

        RenderedDocument {
            html: html_output,
            toc: compiled.toc,
            first_heading: compiled.first_heading,
            summary: summarize(&summary_source, options.summary_length),
            word_count: compiled.word_count,
            reading_minutes: reading_minutes(compiled.word_count),
        }
    }

    /// Applies syntax highlighting to a code block, or renders it plain
    /// with a language class when the language is not recognized.
    fn highlight_code(&self, code: &str, lang: &str) -> String {
        let syntax = self
            .syntax_set
            .find_syntax_by_token(lang)
            .or_else(|| self.syntax_set.find_syntax_by_extension(lang));

        match (syntax, self.theme_set.themes.get(&self.theme_name)) {
            (Some(syntax), Some(theme)) => {
                highlighted_html_for_string(code, &self.syntax_set, syntax, theme)
                    .unwrap_or_else(|_| plain_code_block(code))
            }
            _ => plain_code_block_with_lang(code, lang),
        }
    }
}

fn plain_code_block(code: &str) -> String {
    format!("<pre><code>{}</code></pre>", html_escape(code))
}

fn plain_code_block_with_lang(code: &str, lang: &str) -> String {
    format!(
        "<pre><code class=\"language-{}\">{}</code></pre>",
        html_escape(lang),
        html_escape(code)
    )
}

/// Escapes HTML special characters in a string.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

fn is_toc_marker(html: &str) -> bool {
    html.trim().eq_ignore_ascii_case("<!-- toc -->")
}

fn is_more_marker(html: &str) -> bool {
    html.trim().eq_ignore_ascii_case(MORE_MARKER)
}

/// Render a nested TOC as `<nav class="toc">` with `<ul>` lists
fn toc_html(entries: &[TocEntry]) -> String {
    fn list(entries: &[TocEntry], out: &mut String) {
        out.push_str("<ul>");
        for entry in entries {
            out.push_str(&format!(
                "<li><a href=\"#{}\">{}</a>",
                html_escape(&entry.anchor),
                html_escape(&entry.title)
            ));
            if !entry.children.is_empty() {
                list(&entry.children, out);
            }
            out.push_str("</li>");
        }
        out.push_str("</ul>");
    }

    let mut out = String::from("<nav class=\"toc\">");
    if !entries.is_empty() {
        list(entries, &mut out);
    }
    out.push_str("</nav>\n");
    out
}

/// Nest `entry` under the last entry of a shallower level
fn insert_toc_entry(entries: &mut Vec<TocEntry>, entry: TocEntry) {
    if let Some(last) = entries.last_mut() {
        if entry.level > last.level {
            insert_toc_entry(&mut last.children, entry);
            return;
        }
    }
    entries.push(entry);
}

struct HeadingBuffer<'a> {
    level: pulldown_cmark::HeadingLevel,
    id: Option<CowStr<'a>>,
    classes: Vec<CowStr<'a>>,
    attrs: Vec<(CowStr<'a>, Option<CowStr<'a>>)>,
    text: String,
    events: Vec<Event<'a>>,
}

struct CodeBuffer {
    lang: Option<String>,
    content: String,
}

struct ParagraphState {
    /// Index in the output where the paragraph starts
    start: usize,
    plain_start: usize,
    text: String,
    only_text: bool,
}

struct Compiled<'a> {
    events: Vec<Event<'a>>,
    toc: Vec<TocEntry>,
    first_heading: Option<String>,
    first_paragraph: Option<String>,
    /// Plain text before the first `<!-- more -->` block
    lead: Option<String>,
    word_count: usize,
}

/// Single pass over parser events: highlights code, assigns heading ids,
/// rewrites links and records TOC markers and text statistics.
struct Compiler<'a, 'r> {
    renderer: &'r MarkdownRenderer,
    options: &'r RenderOptions<'r>,
    out: Vec<Event<'a>>,
    anchors: AnchorSet,
    headings: Vec<TocEntry>,
    heading: Option<HeadingBuffer<'a>>,
    code: Option<CodeBuffer>,
    paragraph: Option<ParagraphState>,
    /// One flag per open link: whether it was emitted as raw HTML
    links: Vec<bool>,
    toc_slots: Vec<usize>,
    plain: String,
    more_mark: Option<usize>,
    first_heading: Option<String>,
    first_paragraph: Option<String>,
}

impl<'a, 'r> Compiler<'a, 'r> {
    fn new(renderer: &'r MarkdownRenderer, options: &'r RenderOptions<'r>) -> Self {
        Self {
            renderer,
            options,
            out: Vec::new(),
            anchors: AnchorSet::default(),
            headings: Vec::new(),
            heading: None,
            code: None,
            paragraph: None,
            links: Vec::new(),
            toc_slots: Vec::new(),
            plain: String::new(),
            more_mark: None,
            first_heading: None,
            first_paragraph: None,
        }
    }

    fn emit(&mut self, event: Event<'a>) {
        match self.heading.as_mut() {
            Some(heading) => heading.events.push(event),
            None => self.out.push(event),
        }
    }

    fn push_text(&mut self, text: &str) {
        self.plain.push_str(text);
        if let Some(heading) = self.heading.as_mut() {
            heading.text.push_str(text);
        }
        if let Some(paragraph) = self.paragraph.as_mut() {
            paragraph.text.push_str(text);
        }
    }

    fn push(&mut self, event: Event<'a>) {
        if !matches!(event, Event::Text(_)) {
            if let Some(paragraph) = self.paragraph.as_mut() {
                if !matches!(event, Event::End(TagEnd::Paragraph)) {
                    paragraph.only_text = false;
                }
            }
        }

        match event {
            Event::Start(Tag::CodeBlock(kind)) => {
                let lang = match kind {
                    CodeBlockKind::Fenced(info) => info
                        .split_whitespace()
                        .next()
                        .map(str::to_string)
                        .filter(|lang| !lang.is_empty()),
                    CodeBlockKind::Indented => None,
                };
                self.code = Some(CodeBuffer {
                    lang,
                    content: String::new(),
                });
            }
            Event::End(TagEnd::CodeBlock) => {
                if let Some(code) = self.code.take() {
                    let html = match code.lang {
                        Some(ref lang) => self.renderer.highlight_code(&code.content, lang),
                        None => plain_code_block(&code.content),
                    };
                    self.emit(Event::Html(html.into()));
                }
            }
            Event::Text(text) if self.code.is_some() => {
                if let Some(code) = self.code.as_mut() {
                    code.content.push_str(&text);
                }
            }

            Event::Start(Tag::Heading {
                level,
                id,
                classes,
                attrs,
            }) => {
                self.heading = Some(HeadingBuffer {
                    level,
                    id,
                    classes,
                    attrs,
                    text: String::new(),
                    events: Vec::new(),
                });
            }
            Event::End(TagEnd::Heading(level)) => {
                self.plain.push(' ');
                if let Some(heading) = self.heading.take() {
                    self.finish_heading(heading);
                } else {
                    self.out.push(Event::End(TagEnd::Heading(level)));
                }
            }

            Event::Start(Tag::Paragraph) => {
                self.paragraph = Some(ParagraphState {
                    start: self.out.len(),
                    plain_start: self.plain.len(),
                    text: String::new(),
                    only_text: true,
                });
                self.emit(Event::Start(Tag::Paragraph));
            }
            Event::End(TagEnd::Paragraph) => {
                let paragraph = self.paragraph.take();
                match paragraph {
                    Some(p) if p.only_text && p.text.trim() == "[[toc]]" => {
                        self.out.truncate(p.start);
                        self.plain.truncate(p.plain_start);
                        self.toc_slots.push(self.out.len());
                        self.out.push(Event::Html(CowStr::Borrowed("")));
                    }
                    Some(p) => {
                        if self.first_paragraph.is_none() && !p.text.trim().is_empty() {
                            self.first_paragraph = Some(p.text);
                        }
                        self.plain.push(' ');
                        self.emit(Event::End(TagEnd::Paragraph));
                    }
                    None => self.emit(Event::End(TagEnd::Paragraph)),
                }
            }

            Event::Html(html) if is_toc_marker(&html) && self.heading.is_none() => {
                self.toc_slots.push(self.out.len());
                self.out.push(Event::Html(CowStr::Borrowed("")));
            }
            Event::Html(html) if is_more_marker(&html) && self.more_mark.is_none() => {
                self.more_mark = Some(self.plain.len());
                self.emit(Event::Html(html));
            }

            Event::Start(Tag::Link {
                link_type,
                dest_url,
                title,
                id,
            }) => {
                let dest_url = self.rewrite_href(dest_url);
                if is_external(&dest_url) {
                    let mut tag = format!(
                        "<a href=\"{}\" target=\"_blank\" rel=\"noopener noreferrer\"",
                        html_escape(&dest_url)
                    );
                    if !title.is_empty() {
                        tag.push_str(&format!(" title=\"{}\"", html_escape(&title)));
                    }
                    tag.push('>');
                    self.links.push(true);
                    self.emit(Event::Html(tag.into()));
                } else {
                    self.links.push(false);
                    self.emit(Event::Start(Tag::Link {
                        link_type,
                        dest_url,
                        title,
                        id,
                    }));
                }
            }
            Event::End(TagEnd::Link) => {
                if self.links.pop().unwrap_or(false) {
                    self.emit(Event::Html(CowStr::Borrowed("</a>")));
                } else {
                    self.emit(Event::End(TagEnd::Link));
                }
            }

            Event::Text(text) => {
                self.push_text(&text);
                self.emit(Event::Text(text));
            }
            Event::Code(code) => {
                self.push_text(&code);
                self.emit(Event::Code(code));
            }
            Event::SoftBreak | Event::HardBreak => {
                self.push_text(" ");
                self.emit(event);
            }
            Event::End(end) => {
                self.plain.push(' ');
                self.emit(Event::End(end));
            }
            other => self.emit(other),
        }
    }

    fn rewrite_href(&self, href: CowStr<'a>) -> CowStr<'a> {
        if let Some(fragment) = href.strip_prefix('#') {
            return format!("#{}", slugify(&percent_decode(fragment))).into();
        }
        if let (Some(links), Some(source)) = (self.options.links, self.options.source) {
            if let Some(route) = links.resolve(source, &href) {
                return route.into();
            }
            if !is_external(&href) && looks_like_document(&href) {
                tracing::debug!("Unresolved document link '{}' in {}", href, source);
            }
        }
        href
    }

    fn finish_heading(&mut self, heading: HeadingBuffer<'a>) {
        let title = heading.text.split_whitespace().collect::<Vec<_>>().join(" ");
        let base = match heading.id {
            Some(ref id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => slugify(&title),
        };
        let anchor = self.anchors.unique(base);

        if heading.level == pulldown_cmark::HeadingLevel::H1 && self.first_heading.is_none() {
            self.first_heading = Some(title.clone());
        }
        self.headings.push(TocEntry {
            level: heading.level as u8,
            title,
            anchor: anchor.clone(),
            children: Vec::new(),
        });

        self.out.push(Event::Start(Tag::Heading {
            level: heading.level,
            id: Some(anchor.into()),
            classes: heading.classes,
            attrs: heading.attrs,
        }));
        self.out.extend(heading.events);
        self.out.push(Event::End(TagEnd::Heading(heading.level)));
    }

    fn finish(mut self) -> Compiled<'a> {
        let toc = if self.options.toc {
            let mut tree = Vec::new();
            for entry in std::mem::take(&mut self.headings) {
                insert_toc_entry(&mut tree, entry);
            }
            tree
        } else {
            Vec::new()
        };

        if self.options.toc && !self.toc_slots.is_empty() {
            let nav = toc_html(&toc);
            for slot in &self.toc_slots {
                self.out[*slot] = Event::Html(nav.clone().into());
            }
        }

        Compiled {
            events: self.out,
            toc,
            first_heading: self.first_heading,
            first_paragraph: self.first_paragraph,
            lead: self.more_mark.map(|mark| self.plain[..mark].to_string()),
            word_count: count_words(&self.plain),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_with(markdown: &str, options: &RenderOptions<'_>) -> RenderedDocument {
        MarkdownRenderer::new().render_document(markdown, options)
    }

    #[test]
    fn test_with_invalid_theme_falls_back() {
        let renderer = MarkdownRenderer::with_theme("nonexistent-theme");
        assert_eq!(renderer.theme_name(), "base16-ocean.dark");
        let renderer = MarkdownRenderer::with_theme("InspiredGitHub");
        assert_eq!(renderer.theme_name(), "InspiredGitHub");
    }

    #[test]
    fn test_render_basic_markdown() {
        let renderer = MarkdownRenderer::new();
        let html = renderer.render("This is **bold**, *italic* and ~~gone~~.\n\n- [x] Done\n\n| A | B |\n|---|---|\n| 1 | 2 |");
        assert!(html.contains("<strong>bold</strong>"));
        assert!(html.contains("<em>italic</em>"));
        assert!(html.contains("<del>gone</del>"));
        assert!(html.contains("type=\"checkbox\""));
        assert!(html.contains("<table>"));
    }

    #[test]
    fn test_render_code_block_with_rust() {
        let renderer = MarkdownRenderer::new();
        let html = renderer.render("```rust\nfn main() {}\n```");
        assert!(html.contains("<pre"));
        assert!(html.contains("style="));
    }

    #[test]
    fn test_render_code_block_with_unknown_language() {
        let renderer = MarkdownRenderer::new();
        let html = renderer.render("```unknownlang\n<b>code</b>\n```");
        assert!(html.contains("<pre><code class=\"language-unknownlang\">"));
        assert!(html.contains("&lt;b&gt;code&lt;/b&gt;"));
    }

    #[test]
    fn test_code_without_language_is_escaped() {
        let renderer = MarkdownRenderer::new();
        let html = renderer.render("```\n<script>alert('xss')</script>\n```");
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_heading_ids_and_duplicates() {
        let doc = render_with(
            "# Intro\n\n## Setup\n\n## Setup\n\n## Setup\n\n## Custom {#my-id}\n",
            &RenderOptions::default(),
        );
        assert!(doc.html.contains(r#"<h1 id="intro">"#));
        assert!(doc.html.contains(r#"<h2 id="setup">"#));
        assert!(doc.html.contains(r#"<h2 id="setup-1">"#));
        assert!(doc.html.contains(r#"<h2 id="setup-2">"#));
        assert!(doc.html.contains(r#"<h2 id="my-id">Custom</h2>"#));
        assert_eq!(doc.first_heading.as_deref(), Some("Intro"));
    }

    #[test]
    fn test_toc_tree_nesting() {
        let doc = render_with(
            "## A\n\n### A.1\n\n#### A.1.a\n\n### A.2\n\n## B\n",
            &RenderOptions::default(),
        );
        assert_eq!(doc.toc.len(), 2);
        assert_eq!(doc.toc[0].title, "A");
        assert_eq!(doc.toc[0].children.len(), 2);
        assert_eq!(doc.toc[0].children[0].children[0].anchor, "a1a");
        assert_eq!(doc.toc[1].anchor, "b");
    }

    #[test]
    fn test_toc_injection_markers() {
        let doc = render_with("[[toc]]\n\n## One\n\n## Two\n", &RenderOptions::default());
        assert!(doc.html.starts_with("<nav class=\"toc\"><ul><li><a href=\"#one\">One</a></li>"));
        assert!(!doc.html.contains("[[toc]]"));

        let doc = render_with("<!-- toc -->\n\n## Only\n", &RenderOptions::default());
        assert!(doc.html.contains("<a href=\"#only\">Only</a>"));
        assert!(!doc.html.contains("<!-- toc -->"));
    }

    #[test]
    fn test_toc_disabled_removes_marker() {
        let options = RenderOptions {
            toc: false,
            ..RenderOptions::default()
        };
        let doc = render_with("[[toc]]\n\n## One\n", &options);
        assert!(doc.toc.is_empty());
        assert!(!doc.html.contains("toc"));
        assert!(doc.html.contains(r#"<h2 id="one">"#));
    }

    #[test]
    fn test_fragment_links_are_slugified() {
        let doc = render_with("[jump](#Some%20Heading)", &RenderOptions::default());
        assert!(doc.html.contains(r##"href="#some-heading""##));
    }

    #[test]
    fn test_external_links_open_in_new_tab() {
        let doc = render_with("[site](https://example.com \"Example\")", &RenderOptions::default());
        assert!(doc.html.contains(
            r#"<a href="https://example.com" target="_blank" rel="noopener noreferrer" title="Example">site</a>"#
        ));
    }

    #[test]
    fn test_relative_document_links_rewritten() {
        let mut links = LinkMap::new();
        links.insert("posts/intro.md", "/posts/intro");
        links.insert("courses/rust/ownership.mdx", "/courses/rust/ownership");
        let options = RenderOptions {
            source: Some("courses/rust/index.md"),
            links: Some(&links),
            ..RenderOptions::default()
        };
        let doc = render_with(
            "[a](./ownership.mdx#Move%20Semantics) [b](../../posts/intro.md) [c](missing.md) [d](/posts/intro.md)",
            &options,
        );
        assert!(doc.html.contains(r##"href="/courses/rust/ownership#move-semantics""##));
        assert!(doc.html.contains(r#"href="/posts/intro""#));
        assert!(doc.html.contains(r#"href="missing.md""#));
        assert_eq!(doc.html.matches(r#"href="/posts/intro""#).count(), 2);
    }

    #[test]
    fn test_link_map_ignores_non_documents() {
        let mut links = LinkMap::new();
        links.insert("posts/a.md", "/posts/a");
        assert_eq!(links.resolve("posts/b.md", "a.png"), None);
        assert_eq!(links.resolve("posts/b.md", "mailto:x@y.z"), None);
        assert_eq!(links.resolve("posts/b.md", "https://x.y/a.md"), None);
        assert_eq!(links.resolve("posts/b.md", "a.md").as_deref(), Some("/posts/a"));
    }

    #[test]
    fn test_summary_first_paragraph() {
        let doc = render_with(
            "# Title\n\nFirst   paragraph\nspans lines.\n\nSecond paragraph.",
            &RenderOptions::default(),
        );
        assert_eq!(doc.summary, "First paragraph spans lines.");
    }

    #[test]
    fn test_summary_more_marker() {
        let doc = render_with(
            "Intro one.\n\nIntro `two`.\n\n<!-- more -->\n\nRest of the story.",
            &RenderOptions::default(),
        );
        assert_eq!(doc.summary, "Intro one. Intro two.");
    }

    #[test]
    fn test_summary_more_marker_ignores_toc_placeholder() {
        let doc = render_with(
            "[[toc]]\n\nIntro text.\n\n<!-- more -->\n\nRest",
            &RenderOptions::default(),
        );
        assert_eq!(doc.summary, "Intro text.");
    }

    #[test]
    fn test_summary_more_marker_inside_code_fence_is_literal() {
        let doc = render_with(
            "Lead paragraph.\n\n```\n<p>a</p>\n<!-- more -->\n```\n\nAfter the fence.",
            &RenderOptions::default(),
        );
        assert_eq!(doc.summary, "Lead paragraph.");
        assert!(doc.html.contains("&lt;!-- more --&gt;"));
    }

    #[test]
    fn test_summary_truncated() {
        let options = RenderOptions {
            summary_length: 10,
            ..RenderOptions::default()
        };
        let doc = render_with("Ünïcödé text that is long", &options);
        assert_eq!(doc.summary, "Ünïcödé te…");
    }

    #[test]
    fn test_summary_skips_toc_marker() {
        let doc = render_with("[[toc]]\n\nReal intro.\n\n## H", &RenderOptions::default());
        assert_eq!(doc.summary, "Real intro.");
    }

    #[test]
    fn test_word_count_and_reading_time() {
        let doc = render_with(
            "# Title here\n\nOne two three.\n\n```rust\nlet ignored = 1;\n```\n",
            &RenderOptions::default(),
        );
        assert_eq!(doc.word_count, 5);
        assert_eq!(doc.reading_minutes, 1);
    }

    #[test]
    fn test_count_words_cjk() {
        assert_eq!(count_words("你好世界"), 4);
        assert_eq!(count_words("Rust 很好 indeed"), 4);
        assert_eq!(count_words("  "), 0);
    }

    #[test]
    fn test_reading_minutes() {
        assert_eq!(reading_minutes(0), 1);
        assert_eq!(reading_minutes(200), 1);
        assert_eq!(reading_minutes(201), 2);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  snake_case -- dash "), "snake-case-dash");
        assert_eq!(slugify("Über Größe"), "über-größe");
        assert_eq!(slugify("中文 标题"), "中文-标题");
        assert_eq!(slugify("!!!"), "section");
    }

    #[test]
    fn test_html_escape_function() {
        assert_eq!(html_escape("<>&\"'"), "&lt;&gt;&amp;&quot;&#x27;");
    }

    mod props {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_slug_is_clean(text in "\\PC{0,40}") {
                let slug = slugify(&text);
                prop_assert!(!slug.is_empty());
                prop_assert!(!slug.starts_with('-') && !slug.ends_with('-'));
                prop_assert!(!slug.contains("--"));
                prop_assert!(!slug.chars().any(|c| c.is_ascii_uppercase() || c.is_whitespace()));
            }

            #[test]
            fn prop_summary_respects_length(text in "[a-z ]{0,300}", max in 1usize..120) {
                let summary = summarize(&text, max);
                prop_assert!(summary.trim_end_matches('…').chars().count() <= max);
            }

            #[test]
            fn prop_anchor_set_unique(words in proptest::collection::vec("[ab]{1,2}", 1..30)) {
                let mut anchors = AnchorSet::default();
                let mut seen = std::collections::HashSet::new();
                for word in words {
                    prop_assert!(seen.insert(anchors.unique(word)));
                }
            }
        }
    }
}
