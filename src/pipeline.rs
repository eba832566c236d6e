//! Turns one raw completion into a display card: normalize the text, render
//! it as markdown, and strip anything that could act on the terminal.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use pulldown_cmark::{CodeBlockKind, CowStr, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use ratatui::style::{Style, Stylize};
use ratatui::text::{Line, Span, Text};
use tracing::warn;

use crate::clipboard::{Clipboard, ClipboardError, CopyControl};

#[derive(Debug, thiserror::Error)]
pub(crate) enum RenderError {
    #[error("markdown engine failed: {0}")]
    Engine(String),
}

/// Markdown-to-rich-text converter. Output must already be safe to print.
pub(crate) trait MarkdownEngine {
    fn render(&self, markdown: &str) -> Result<Text<'static>, RenderError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RenderMode {
    Rich,
    Plain,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Normalized {
    /// Steps 1-3: what plain mode shows.
    pub(crate) plain: String,
    /// Step 4 applied on top: what the markdown engine sees.
    pub(crate) markdown: String,
}

pub(crate) fn normalize(raw: &str) -> Normalized {
    let unescaped = raw.replace("\\n", "\n");
    let collapsed = collapse_blank_runs(&unescaped);
    let plain = collapsed
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    let markdown = mark_soft_breaks(&plain);
    Normalized { plain, markdown }
}

fn collapse_blank_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = 0usize;
    for ch in text.chars() {
        if ch == '\n' {
            run += 1;
            if run <= 2 {
                out.push('\n');
            }
        } else {
            run = 0;
            out.push(ch);
        }
    }
    out
}

/// A lone newline becomes a markdown hard break; paragraph breaks stay as is.
fn mark_soft_breaks(text: &str) -> String {
    let chars = text.chars().collect::<Vec<_>>();
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    for (i, &ch) in chars.iter().enumerate() {
        let lone_newline = ch == '\n'
            && (i == 0 || chars[i - 1] != '\n')
            && !matches!(chars.get(i + 1), Some('\n'));
        if lone_newline {
            out.push_str("  \n");
        } else {
            out.push(ch);
        }
    }
    out
}

/// Removes escape sequences and control characters so model output cannot
/// drive the terminal.
pub(crate) fn sanitize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_escape = false;
    let mut in_csi = false;

    for ch in text.chars() {
        if in_escape {
            if in_csi {
                // CSI sequence terminates at bytes in range 0x40..0x7E.
                if ('@'..='~').contains(&ch) {
                    in_escape = false;
                    in_csi = false;
                }
                continue;
            }
            if ch == '[' {
                in_csi = true;
                continue;
            }
            in_escape = false;
            continue;
        }

        match ch {
            '\u{1b}' => in_escape = true,
            '\t' => out.push_str("    "),
            '\n' | '\r' => out.push(' '),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }

    out
}

fn is_safe_url(url: &str) -> bool {
    let lower = url.trim().to_ascii_lowercase();
    ["http://", "https://", "mailto:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}

/// Keeps the visible text of an HTML fragment, dropping tags and anything
/// inside `<script>`/`<style>`. `depth` carries over between fragments.
fn strip_html(fragment: &str, depth: &mut usize) -> String {
    let mut out = String::new();
    let mut rest = fragment;
    while let Some(open) = rest.find('<') {
        if *depth == 0 {
            out.push_str(&rest[..open]);
        }
        let after = &rest[open + 1..];
        let Some(close) = after.find('>') else {
            rest = "";
            break;
        };
        let tag = after[..close].trim().to_ascii_lowercase();
        let closing = tag.starts_with('/');
        let name = tag
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or_default();
        if matches!(name, "script" | "style") {
            if closing {
                *depth = depth.saturating_sub(1);
            } else if !tag.ends_with('/') {
                *depth += 1;
            }
        }
        rest = &after[close + 1..];
    }
    if *depth == 0 {
        out.push_str(rest);
    }
    out
}

/// pulldown-cmark backed engine producing styled terminal lines.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct CmarkEngine;

impl MarkdownEngine for CmarkEngine {
    fn render(&self, markdown: &str) -> Result<Text<'static>, RenderError> {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_STRIKETHROUGH);
        let parser = Parser::new_ext(markdown, options);
        let mut w = Writer::default();
        for event in parser {
            w.handle_event(event);
        }
        Ok(w.finish())
    }
}

#[derive(Default)]
struct Writer {
    lines: Vec<Line<'static>>,
    current: Vec<Span<'static>>,
    line_open: bool,
    inline_styles: Vec<Style>,
    list_indices: Vec<Option<u64>>,
    quote_depth: usize,
    link: Option<String>,
    in_code_block: bool,
    needs_blank: bool,
    html_depth: usize,
}

impl Writer {
    fn handle_event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start_tag(tag),
            Event::End(tag) => self.end_tag(tag),
            Event::Text(text) => self.text(text),
            Event::Code(code) => {
                if self.html_depth == 0 {
                    self.push_span(Span::styled(sanitize_text(&code), Style::new().cyan()));
                }
            }
            Event::SoftBreak => self.push_span(Span::raw(" ")),
            Event::HardBreak => self.close_line(),
            Event::Rule => {
                self.blank_line();
                self.lines.push(Line::from("———".dim()));
                self.needs_blank = true;
            }
            Event::Html(html) => self.block_html(&html),
            Event::InlineHtml(html) => {
                let visible = strip_html(&html, &mut self.html_depth);
                if !visible.trim().is_empty() {
                    self.push_span(Span::styled(sanitize_text(&visible), self.style()));
                }
            }
            Event::TaskListMarker(done) => {
                self.push_span(Span::raw(if done { "[x] " } else { "[ ] " }));
            }
            Event::FootnoteReference(_) => {}
        }
    }

    fn start_tag(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => {
                if self.needs_blank && !self.line_open {
                    self.blank_line();
                }
            }
            Tag::Heading { level, .. } => {
                self.blank_line_if_needed();
                let style = match level {
                    HeadingLevel::H1 => Style::new().bold().underlined(),
                    HeadingLevel::H2 => Style::new().bold(),
                    _ => Style::new().bold().italic(),
                };
                self.inline_styles.push(style);
            }
            Tag::BlockQuote => {
                self.blank_line_if_needed();
                self.quote_depth += 1;
            }
            Tag::CodeBlock(kind) => {
                self.blank_line_if_needed();
                if let CodeBlockKind::Fenced(lang) = kind {
                    let lang = sanitize_text(lang.trim());
                    if !lang.is_empty() {
                        self.lines
                            .push(Line::from(Span::styled(lang, Style::new().dim().italic())));
                    }
                }
                self.in_code_block = true;
            }
            Tag::List(start) => {
                if self.list_indices.is_empty() {
                    self.blank_line_if_needed();
                } else {
                    self.close_line();
                }
                self.list_indices.push(start);
            }
            Tag::Item => {
                self.close_line();
                self.needs_blank = false;
                let depth = self.list_indices.len();
                let marker = match self.list_indices.last_mut() {
                    Some(Some(n)) => {
                        let marker = format!("{n}. ");
                        *n += 1;
                        marker
                    }
                    _ => "• ".to_string(),
                };
                let mut spans = self.quote_prefix();
                spans.push(Span::raw("  ".repeat(depth.saturating_sub(1))));
                spans.push(Span::styled(marker, Style::new().dim()));
                self.current = spans;
                self.line_open = true;
            }
            Tag::Emphasis => self.push_inline_style(Style::new().italic()),
            Tag::Strong => self.push_inline_style(Style::new().bold()),
            Tag::Strikethrough => self.push_inline_style(Style::new().crossed_out()),
            Tag::Link { dest_url, .. } => {
                self.link = Some(dest_url.to_string());
                self.push_inline_style(Style::new().underlined());
            }
            _ => {}
        }
    }

    fn end_tag(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph | TagEnd::Heading(_) => {
                if matches!(tag, TagEnd::Heading(_)) {
                    self.inline_styles.pop();
                }
                self.close_line();
                self.needs_blank = true;
            }
            TagEnd::BlockQuote => {
                self.close_line();
                self.quote_depth = self.quote_depth.saturating_sub(1);
                self.needs_blank = true;
            }
            TagEnd::CodeBlock => {
                self.close_line();
                self.in_code_block = false;
                self.needs_blank = true;
            }
            TagEnd::List(_) => {
                self.close_line();
                self.list_indices.pop();
                self.needs_blank = self.list_indices.is_empty();
            }
            TagEnd::Item => self.close_line(),
            TagEnd::Emphasis | TagEnd::Strong | TagEnd::Strikethrough => {
                self.inline_styles.pop();
            }
            TagEnd::Link => {
                self.inline_styles.pop();
                if let Some(url) = self.link.take() {
                    if is_safe_url(&url) {
                        self.push_span(Span::styled(
                            format!(" ({})", sanitize_text(url.trim())),
                            Style::new().dim(),
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, text: CowStr<'_>) {
        if self.html_depth > 0 {
            return;
        }
        if !self.in_code_block {
            let style = self.style();
            self.push_span(Span::styled(sanitize_text(&text), style));
            return;
        }
        let code_style = Style::new().cyan();
        let parts = text.split('\n').collect::<Vec<_>>();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                self.close_line();
            }
            if part.is_empty() && i + 1 == parts.len() {
                continue;
            }
            self.open_line();
            if !part.is_empty() {
                self.current
                    .push(Span::styled(sanitize_text(part), code_style));
            }
        }
    }

    fn block_html(&mut self, html: &str) {
        for piece in html.split('\n') {
            let visible = strip_html(piece, &mut self.html_depth);
            let visible = visible.trim();
            if visible.is_empty() {
                continue;
            }
            self.blank_line_if_needed();
            self.push_span(Span::raw(sanitize_text(visible)));
            self.close_line();
        }
    }

    fn style(&self) -> Style {
        self.inline_styles.last().copied().unwrap_or_default()
    }

    fn push_inline_style(&mut self, style: Style) {
        let merged = self.style().patch(style);
        self.inline_styles.push(merged);
    }

    fn quote_prefix(&self) -> Vec<Span<'static>> {
        if self.quote_depth == 0 {
            Vec::new()
        } else {
            vec![Span::styled("> ".repeat(self.quote_depth), Style::new().dim())]
        }
    }

    fn open_line(&mut self) {
        if self.line_open {
            return;
        }
        let mut spans = self.quote_prefix();
        if !self.list_indices.is_empty() {
            spans.push(Span::raw("  ".repeat(self.list_indices.len())));
        }
        self.current = spans;
        self.line_open = true;
    }

    fn close_line(&mut self) {
        if self.line_open {
            self.lines.push(Line::from(std::mem::take(&mut self.current)));
            self.line_open = false;
        }
    }

    fn push_span(&mut self, span: Span<'static>) {
        if span.content.is_empty() {
            return;
        }
        self.open_line();
        self.current.push(span);
    }

    fn blank_line(&mut self) {
        self.close_line();
        if !self.lines.is_empty() {
            self.lines.push(Line::default());
        }
        self.needs_blank = false;
    }

    fn blank_line_if_needed(&mut self) {
        if self.needs_blank {
            self.blank_line();
        } else {
            self.close_line();
        }
    }

    fn finish(mut self) -> Text<'static> {
        self.close_line();
        while self
            .lines
            .last()
            .is_some_and(|line| line.spans.iter().all(|s| s.content.trim().is_empty()))
        {
            self.lines.pop();
        }
        Text::from(self.lines)
    }
}

/// One rendered completion plus its copy control.
#[derive(Clone, Debug)]
pub(crate) struct CompletionCard {
    pub(crate) original: String,
    pub(crate) body: Text<'static>,
    pub(crate) mode: RenderMode,
    pub(crate) copy: CopyControl,
}

impl CompletionCard {
    /// Body as unstyled text, one line per rendered line.
    pub(crate) fn plain_text(&self) -> String {
        self.body
            .lines
            .iter()
            .map(|line| {
                line.spans
                    .iter()
                    .map(|span| span.content.as_ref())
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Copies the untouched original text, not the rendered body.
    pub(crate) fn copy_original(
        &mut self,
        clipboard: &mut dyn Clipboard,
        now: Instant,
    ) -> Result<(), ClipboardError> {
        self.copy.copy(&self.original, clipboard, now)
    }
}

pub(crate) struct RenderPipeline {
    engine: Option<Box<dyn MarkdownEngine>>,
}

impl RenderPipeline {
    pub(crate) fn new(plain: bool) -> Self {
        if plain {
            Self { engine: None }
        } else {
            Self::with_engine(Box::new(CmarkEngine))
        }
    }

    pub(crate) fn with_engine(engine: Box<dyn MarkdownEngine>) -> Self {
        Self {
            engine: Some(engine),
        }
    }

    pub(crate) fn is_plain(&self) -> bool {
        self.engine.is_none()
    }

    /// Returns `None` for absent or blank input instead of an empty card.
    pub(crate) fn render(&self, raw: Option<&str>) -> Option<CompletionCard> {
        let raw = raw.filter(|s| !s.is_empty())?;
        let normalized = normalize(raw);
        if normalized.plain.is_empty() {
            return None;
        }

        let (body, mode) = match &self.engine {
            None => (plain_body(&normalized.plain), RenderMode::Plain),
            Some(engine) => {
                match catch_unwind(AssertUnwindSafe(|| engine.render(&normalized.markdown))) {
                    Ok(Ok(text)) => (text, RenderMode::Rich),
                    Ok(Err(err)) => {
                        warn!("{err}; showing plain text");
                        (plain_body(&normalized.plain), RenderMode::Plain)
                    }
                    Err(_) => {
                        warn!("markdown engine panicked; showing plain text");
                        (plain_body(&normalized.plain), RenderMode::Plain)
                    }
                }
            }
        };

        Some(CompletionCard {
            original: raw.to_string(),
            body,
            mode,
            copy: CopyControl::default(),
        })
    }
}

fn plain_body(plain: &str) -> Text<'static> {
    Text::from(
        plain
            .split('\n')
            .map(|line| Line::from(sanitize_text(line)))
            .collect::<Vec<_>>(),
    )
}
