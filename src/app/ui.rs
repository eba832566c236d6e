use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::Style;
use ratatui::widgets::{Block, BorderType, Borders, Clear, Padding};
use ratatui::Frame;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use super::*;

const PANEL_PADDING_X: u16 = 1;
const PANEL_PADDING_Y: u16 = 0;
const PANEL_HORIZONTAL_INSET: u16 = 2 + PANEL_PADDING_X * 2;
const PANEL_VERTICAL_INSET: u16 = 2 + PANEL_PADDING_Y * 2;
const PROMPT_PREFIX: &str = "> ";

pub(super) fn draw(f: &mut Frame, app: &App) {
    let frame_area = f.area();
    let theme = app.theme_palette();
    let prompt_width = UnicodeWidthStr::width(PROMPT_PREFIX) as u16;
    let composer_width = frame_area.width.saturating_sub(PANEL_HORIZONTAL_INSET).max(1);

    let settings_h: u16 = 2 + PANEL_VERTICAL_INSET;
    let status_h: u16 = 1 + PANEL_VERTICAL_INSET;
    let max_input_height = frame_area
        .height
        .saturating_sub(settings_h + status_h)
        .max(3);
    let input_height = input_rows(&app.input, composer_width, prompt_width)
        .saturating_add(PANEL_VERTICAL_INSET)
        .min(max_input_height);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(input_height),
            Constraint::Length(settings_h),
            Constraint::Length(status_h),
        ])
        .split(frame_area);
    let (input_chunk, settings_chunk, status_chunk) = (chunks[0], chunks[1], chunks[2]);

    let input = Paragraph::new(Text::from(build_input_lines(app, theme)))
        .style(theme.input_surface_style())
        .block(panel_block(theme, "describe your product"))
        .wrap(Wrap { trim: false });
    f.render_widget(input, input_chunk);

    let settings = Paragraph::new(Text::from(vec![
        build_knob_line(app, theme),
        build_tone_line(app, theme),
    ]))
    .style(theme.panel_surface_style())
    .block(panel_block(theme, "settings"));
    f.render_widget(settings, settings_chunk);

    if matches!(app.mode, Mode::Normal) {
        let content_width = input_chunk
            .width
            .saturating_sub(PANEL_HORIZONTAL_INSET)
            .max(1);
        let content_height = input_chunk
            .height
            .saturating_sub(PANEL_VERTICAL_INSET)
            .max(1);
        let (cx, cy) = input_cursor_position(&app.input, app.cursor, content_width, prompt_width);
        let cursor_x =
            input_chunk.x + 1 + PANEL_PADDING_X + cx.min(content_width.saturating_sub(1));
        let cursor_y =
            input_chunk.y + 1 + PANEL_PADDING_Y + cy.min(content_height.saturating_sub(1));
        f.set_cursor_position((cursor_x, cursor_y));
    }

    if matches!(app.mode, Mode::ConfirmClear) {
        let prompt = Paragraph::new(Line::from(vec![
            Span::styled(
                format!("Delete all {} saved results? ", app.session.history().len()),
                theme.body_style(),
            ),
            Span::styled("y", theme.selected_style()),
            Span::styled(" yes  ", theme.muted_style()),
            Span::styled("n", theme.selected_style()),
            Span::styled(" no", theme.muted_style()),
        ]))
        .block(titled_block(
            theme,
            "clear history",
            theme.confirm_title_style(),
        ));
        f.render_widget(Clear, status_chunk);
        f.render_widget(prompt, status_chunk);
    } else {
        let status = Paragraph::new(build_status_line(app, theme, Instant::now()))
            .style(theme.status_style())
            .block(panel_block(theme, "status"));
        f.render_widget(status, status_chunk);
    }
}

pub(super) fn draw_exit(f: &mut Frame) {
    f.render_widget(Clear, f.area());
}

fn panel_block(theme: ThemePalette, title: &str) -> Block<'static> {
    titled_block(theme, title, theme.title_style())
}

fn titled_block(theme: ThemePalette, title: &str, title_style: Style) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(theme.panel_border_style())
        .title(Span::styled(format!(" {} ", title), title_style))
        .padding(Padding::new(
            PANEL_PADDING_X,
            PANEL_PADDING_X,
            PANEL_PADDING_Y,
            PANEL_PADDING_Y,
        ))
        .style(theme.panel_surface_style())
}

fn build_input_lines(app: &App, theme: ThemePalette) -> Vec<Line<'static>> {
    let prompt_style = theme.prompt_style();
    if app.input.is_empty() {
        return vec![Line::from(vec![
            Span::styled(PROMPT_PREFIX, prompt_style),
            Span::styled(
                "e.g. a neighbourhood bakery opening a second shop",
                theme.muted_style(),
            ),
        ])];
    }

    let indent = " ".repeat(PROMPT_PREFIX.chars().count());
    let text_style = Style::default().fg(theme.input_text);
    app.input
        .split('\n')
        .enumerate()
        .map(|(idx, part)| {
            let prefix = if idx == 0 {
                PROMPT_PREFIX.to_string()
            } else {
                indent.clone()
            };
            Line::from(vec![
                Span::styled(prefix, prompt_style),
                Span::styled(part.to_string(), text_style),
            ])
        })
        .collect()
}

fn build_knob_line(app: &App, theme: ThemePalette) -> Line<'static> {
    let mut spans = Vec::new();
    for (i, knob) in Knob::all().into_iter().enumerate() {
        if i > 0 {
            spans.push(Span::raw("  "));
        }
        let text = format!("{} {}", knob.label(), app.settings.value_label(knob));
        let style = if knob == app.knob {
            theme.selected_style()
        } else {
            theme.secondary_style()
        };
        spans.push(Span::styled(text, style));
    }
    Line::from(spans)
}

fn build_tone_line(app: &App, theme: ThemePalette) -> Line<'static> {
    let mut spans = vec![Span::styled("tones ", theme.muted_style())];
    for (i, tone) in Tone::all().into_iter().enumerate() {
        let on = app.tones.contains(tone);
        let mark = if on { "■" } else { "□" };
        let style = if on {
            theme.selected_style()
        } else {
            theme.muted_style()
        };
        spans.push(Span::styled(format!("F{} ", i + 1), theme.muted_style()));
        spans.push(Span::styled(format!("{mark} {}", tone.as_str()), style));
        spans.push(Span::raw("  "));
    }
    Line::from(spans)
}

pub(super) fn build_status_line(app: &App, theme: ThemePalette, now: Instant) -> Line<'static> {
    let mut spans = Vec::new();
    if let Some(err) = &app.error {
        spans.push(Span::styled("error ", theme.error_label_style()));
        spans.push(Span::styled(err.clone(), theme.error_style()));
    } else if app.is_running() {
        let frame = SPINNER_FRAMES[app.spinner_idx % SPINNER_FRAMES.len()];
        spans.push(Span::styled(format!("{frame} "), theme.spinner_style()));
        let elapsed = app.elapsed_label().unwrap_or_default();
        spans.push(Span::styled(
            format!("generating {elapsed} · Esc cancel"),
            theme.status_style(),
        ));
    } else {
        spans.push(Span::styled(app.last_status.clone(), theme.status_style()));
    }

    spans.push(Span::styled(
        format!(" | {}/{}", app.input.chars().count(), MAX_PROMPT_CHARS),
        theme.muted_style(),
    ));

    if let Some(card) = app.cards.get(app.selected_card) {
        spans.push(Span::styled(
            format!(" | result {}/{} ", app.selected_card + 1, app.cards.len()),
            theme.muted_style(),
        ));
        let label_style = if card.copy.is_confirming(now) {
            theme.prompt_style()
        } else {
            theme.secondary_style()
        };
        spans.push(Span::styled(card.copy.label(now), label_style));
    }
    spans.push(Span::styled(" | Ctrl+C exit", theme.muted_style()));
    Line::from(spans)
}

fn input_rows(input: &str, width: u16, prompt_width: u16) -> u16 {
    let (_, y) = input_cursor_position(input, input.len(), width, prompt_width);
    y.saturating_add(1)
}

/// Column and row of the byte offset `cursor` once `input` is wrapped to `width`.
pub(super) fn input_cursor_position(
    input: &str,
    cursor: usize,
    width: u16,
    prompt_width: u16,
) -> (u16, u16) {
    let width = width.max(1) as usize;
    let mut x = prompt_width as usize;
    let mut y = 0usize;
    let mut consumed = 0usize;

    for ch in input.chars() {
        let len = ch.len_utf8();
        if consumed + len > cursor {
            break;
        }
        consumed += len;
        if ch == '\n' {
            x = prompt_width as usize;
            y += 1;
            continue;
        }
        let ch_width = UnicodeWidthChar::width(ch).unwrap_or(1).max(1);
        if x + ch_width > width {
            x = 0;
            y += 1;
        }
        x += ch_width;
        if x >= width {
            x = 0;
            y += 1;
        }
    }

    (x.min(u16::MAX as usize) as u16, y.min(u16::MAX as usize) as u16)
}
