use std::time::Duration;

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Text;

use crate::api::{ApiError, Generation};

/// Identifies one generation request; replies carrying any other id are stale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct RequestId(pub(crate) u64);

impl RequestId {
    pub(crate) fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Finished {
        id: RequestId,
        result: Result<Generation, ApiError>,
        elapsed: Duration,
    },
    /// The worker died before producing a result.
    Failed { id: RequestId, reason: String },
}

/// One block of transcript output, appended above the live viewport.
#[derive(Clone, Debug)]
pub(crate) enum TranscriptEntry {
    Banner { endpoint: String, plain: bool },
    Prompt(String),
    Heading(String),
    Card { number: usize, body: Text<'static> },
    Summary(String),
    System(String),
    Error(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Mode {
    Normal,
    ConfirmClear,
}

#[derive(Clone, Copy)]
pub(crate) struct ThemePalette {
    pub(crate) prompt: Color,
    pub(crate) input_text: Color,
    pub(crate) muted_text: Color,
    pub(crate) highlight_fg: Color,
    pub(crate) highlight_bg: Color,
    pub(crate) status_text: Color,
    pub(crate) card_divider: Color,
    pub(crate) card_label: Color,
    pub(crate) body_text: Color,
    pub(crate) system_text: Color,
    pub(crate) error_label: Color,
    pub(crate) error_text: Color,
    pub(crate) banner_title: Color,
    pub(crate) panel_bg: Color,
    pub(crate) panel_fg: Color,
    pub(crate) confirm_title: Color,
    pub(crate) spinner: Color,
}

pub(crate) fn default_palette() -> ThemePalette {
    ThemePalette {
        prompt: Color::Rgb(130, 200, 170),
        input_text: Color::Rgb(232, 236, 240),
        muted_text: Color::Rgb(128, 136, 148),
        highlight_fg: Color::Rgb(250, 250, 250),
        highlight_bg: Color::Rgb(62, 92, 120),
        status_text: Color::Rgb(170, 178, 190),
        card_divider: Color::Rgb(90, 140, 180),
        card_label: Color::Rgb(120, 180, 220),
        body_text: Color::Rgb(220, 224, 230),
        system_text: Color::Rgb(150, 160, 175),
        error_label: Color::Rgb(225, 105, 105),
        error_text: Color::Rgb(235, 130, 130),
        banner_title: Color::Rgb(205, 215, 228),
        panel_bg: Color::Rgb(16, 20, 26),
        panel_fg: Color::Rgb(220, 226, 234),
        confirm_title: Color::Rgb(228, 180, 120),
        spinner: Color::Rgb(130, 200, 170),
    }
}

impl ThemePalette {
    pub(crate) fn prompt_style(self) -> Style {
        Style::default()
            .fg(self.prompt)
            .add_modifier(Modifier::BOLD)
    }

    pub(crate) fn title_style(self) -> Style {
        Style::default()
            .fg(self.banner_title)
            .add_modifier(Modifier::BOLD)
    }

    pub(crate) fn body_style(self) -> Style {
        Style::default().fg(self.body_text)
    }

    pub(crate) fn secondary_style(self) -> Style {
        Style::default().fg(self.system_text)
    }

    pub(crate) fn muted_style(self) -> Style {
        Style::default().fg(self.muted_text)
    }

    pub(crate) fn status_style(self) -> Style {
        Style::default().fg(self.status_text)
    }

    pub(crate) fn error_style(self) -> Style {
        Style::default().fg(self.error_text)
    }

    pub(crate) fn error_label_style(self) -> Style {
        Style::default()
            .fg(self.error_label)
            .add_modifier(Modifier::BOLD)
    }

    pub(crate) fn card_label_style(self) -> Style {
        Style::default()
            .fg(self.card_label)
            .add_modifier(Modifier::BOLD)
    }

    pub(crate) fn divider_style(self) -> Style {
        Style::default().fg(self.card_divider)
    }

    pub(crate) fn panel_surface_style(self) -> Style {
        Style::default().bg(self.panel_bg).fg(self.panel_fg)
    }

    pub(crate) fn panel_border_style(self) -> Style {
        Style::default().fg(self.highlight_bg)
    }

    pub(crate) fn input_surface_style(self) -> Style {
        Style::default().fg(self.input_text)
    }

    pub(crate) fn selected_style(self) -> Style {
        Style::default()
            .fg(self.highlight_fg)
            .bg(self.highlight_bg)
            .add_modifier(Modifier::BOLD)
    }

    pub(crate) fn confirm_title_style(self) -> Style {
        Style::default()
            .fg(self.confirm_title)
            .add_modifier(Modifier::BOLD)
    }

    pub(crate) fn spinner_style(self) -> Style {
        Style::default().fg(self.spinner)
    }
}
