use ratatui::style::Style;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use super::*;

const BANNER_MAX_WIDTH: usize = 76;
const KEYS_HINT: &str =
    "Enter generate · Alt+Enter newline · Tab/↑↓ settings · F1-F4 tones · Ctrl+Y copy · Ctrl+L clear";

fn truncate_display_width(text: &str, max_width: usize) -> String {
    let mut out = String::new();
    let mut used = 0usize;
    for ch in text.chars() {
        let cw = UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + cw > max_width {
            break;
        }
        out.push(ch);
        used += cw;
    }
    out
}

fn fit_to_display_width(text: &str, width: usize) -> String {
    let mut fitted = truncate_display_width(text, width);
    let used = UnicodeWidthStr::width(fitted.as_str());
    if used < width {
        fitted.push_str(&" ".repeat(width - used));
    }
    fitted
}

/// Splits styled spans into rows no wider than `max_width` columns.
pub(super) fn wrap_spans(spans: Vec<Span<'static>>, max_width: usize) -> Vec<Vec<Span<'static>>> {
    if max_width == 0 {
        return vec![spans];
    }
    let mut rows: Vec<Vec<Span<'static>>> = Vec::new();
    let mut row: Vec<Span<'static>> = Vec::new();
    let mut row_width = 0usize;

    for span in spans {
        let style = span.style;
        let mut chunk = String::new();
        for ch in span.content.chars() {
            let w = UnicodeWidthChar::width(ch).unwrap_or(0);
            if row_width + w > max_width && row_width > 0 {
                if !chunk.is_empty() {
                    row.push(Span::styled(std::mem::take(&mut chunk), style));
                }
                rows.push(std::mem::take(&mut row));
                row_width = 0;
            }
            chunk.push(ch);
            row_width += w;
        }
        if !chunk.is_empty() {
            row.push(Span::styled(chunk, style));
        }
    }
    if !row.is_empty() || rows.is_empty() {
        rows.push(row);
    }
    rows
}

impl App {
    pub(super) fn render_entries_lines_range(
        &self,
        width: u16,
        start: usize,
        end: usize,
    ) -> Vec<Line<'static>> {
        let mut lines = Vec::<Line<'static>>::new();
        let end = end.min(self.entries.len());
        let start = start.min(end);
        for entry in &self.entries[start..end] {
            self.render_entry(entry, width, &mut lines);
        }
        lines
    }

    fn render_entry(&self, entry: &TranscriptEntry, width: u16, lines: &mut Vec<Line<'static>>) {
        let palette = self.theme_palette();
        match entry {
            TranscriptEntry::Banner { endpoint, plain } => {
                let mode = if *plain { "plain text" } else { "markdown" };
                let rows = [
                    (
                        format!(" {APP_NAME} {}", env!("CARGO_PKG_VERSION")),
                        palette.title_style(),
                    ),
                    (format!(" endpoint: {endpoint}"), palette.secondary_style()),
                    (format!(" rendering: {mode}"), palette.secondary_style()),
                    (format!(" {KEYS_HINT}"), palette.muted_style()),
                ];
                push_banner(lines, &rows, width, palette);
            }
            TranscriptEntry::Prompt(text) => {
                let w = width as usize;
                let style = palette.prompt_style();
                for part in text.split('\n') {
                    let content = if part.is_empty() { " " } else { part };
                    let mut row = format!("> {content}");
                    let row_w = UnicodeWidthStr::width(row.as_str());
                    if row_w < w {
                        row.push_str(&" ".repeat(w - row_w));
                    }
                    lines.push(Line::from(Span::styled(row, style)));
                }
            }
            TranscriptEntry::Heading(text) => {
                lines.push(Line::from(""));
                lines.push(Line::from(Span::styled(
                    format!("── {text} ──"),
                    palette.title_style(),
                )));
            }
            TranscriptEntry::Card { number, body } => {
                let label = format!("#{number}");
                let label_w = UnicodeWidthStr::width(label.as_str());
                let label_sep = format!("{label} {CARD_DIVIDER}");
                let indent_sep = format!("{}{CARD_DIVIDER}", " ".repeat(label_w + 1));
                let content_width = (width as usize).saturating_sub(label_w + 3);
                let body_style = palette.body_style();

                let mut first = true;
                for body_line in &body.lines {
                    let spans = body_line
                        .spans
                        .iter()
                        .map(|s| Span::styled(s.content.to_string(), body_style.patch(s.style)))
                        .collect::<Vec<_>>();
                    for row in wrap_spans(spans, content_width) {
                        let (prefix, style) = if first {
                            (label_sep.clone(), palette.card_label_style())
                        } else {
                            (indent_sep.clone(), palette.divider_style())
                        };
                        first = false;
                        let mut out = vec![Span::styled(prefix, style)];
                        out.extend(row);
                        lines.push(Line::from(out));
                    }
                }
                lines.push(Line::from(""));
            }
            TranscriptEntry::Summary(text) => {
                lines.push(Line::from(Span::styled(text.clone(), palette.muted_style())));
                lines.push(Line::from(""));
            }
            TranscriptEntry::System(text) => {
                push_tagged_lines(
                    lines,
                    "[sys] ",
                    text,
                    palette.secondary_style(),
                    palette.secondary_style(),
                );
            }
            TranscriptEntry::Error(text) => {
                push_tagged_lines(
                    lines,
                    "[err] ",
                    text,
                    palette.error_label_style(),
                    palette.error_style(),
                );
            }
        }
    }
}

fn push_banner(
    lines: &mut Vec<Line<'static>>,
    rows: &[(String, Style)],
    width: u16,
    palette: ThemePalette,
) {
    let outer = (width.max(1) as usize).min(BANNER_MAX_WIDTH);
    if outer < 6 {
        for (text, style) in rows {
            lines.push(Line::from(Span::styled(text.trim_start().to_string(), *style)));
        }
        return;
    }
    let border = palette.panel_border_style();
    let inner = outer - 2;
    let content_width = inner - 2;
    lines.push(Line::from(Span::styled(format!("╭{}╮", "─".repeat(inner)), border)));
    for (text, style) in rows {
        lines.push(Line::from(vec![
            Span::styled("│ ", border),
            Span::styled(fit_to_display_width(text, content_width), *style),
            Span::styled(" │", border),
        ]));
    }
    lines.push(Line::from(Span::styled(format!("╰{}╯", "─".repeat(inner)), border)));
    lines.push(Line::from(""));
}

fn push_tagged_lines(
    lines: &mut Vec<Line<'static>>,
    tag: &str,
    text: &str,
    tag_style: Style,
    style: Style,
) {
    let indent = " ".repeat(tag.len());
    for (idx, part) in text.split('\n').enumerate() {
        let prefix = if idx == 0 { tag.to_string() } else { indent.clone() };
        lines.push(Line::from(vec![
            Span::styled(prefix, tag_style),
            Span::styled(part.to_string(), style),
        ]));
    }
}
