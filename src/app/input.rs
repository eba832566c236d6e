use super::*;

impl App {
    pub(super) fn handle_paste_event(&mut self, raw: &str) {
        let normalized = if raw.contains('\r') {
            raw.replace("\r\n", "\n").replace('\r', "\n")
        } else {
            raw.to_string()
        };
        if normalized.is_empty() {
            return;
        }
        let room = self.remaining_chars();
        if normalized.chars().count() > room {
            self.last_status = format!("paste trimmed to {MAX_PROMPT_CHARS} characters");
        }
        self.insert_str(&normalized);
    }

    pub(super) fn handle_key(&mut self, key: KeyEvent) {
        match self.mode {
            Mode::ConfirmClear => self.handle_confirm_key(key),
            Mode::Normal => self.handle_normal_key(key),
        }
    }

    fn handle_confirm_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.resolve_clear(Confirmation::Declined);
            self.cancel_request();
            self.should_quit = true;
            return;
        }
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => self.resolve_clear(Confirmation::Accepted),
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                self.resolve_clear(Confirmation::Declined)
            }
            _ => {}
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('c') => {
                    self.cancel_request();
                    self.should_quit = true;
                    return;
                }
                KeyCode::Char('l') => {
                    if self.session.history().is_empty() {
                        self.last_status = "history is already empty".to_string();
                    } else {
                        self.mode = Mode::ConfirmClear;
                    }
                    return;
                }
                KeyCode::Char('y') => {
                    self.copy_selected_card();
                    return;
                }
                KeyCode::Char('n') => {
                    self.select_card(true);
                    return;
                }
                KeyCode::Char('p') => {
                    self.select_card(false);
                    return;
                }
                KeyCode::Char('r') => {
                    self.show_history();
                    return;
                }
                KeyCode::Char('u') => {
                    self.input.clear();
                    self.cursor = 0;
                    return;
                }
                KeyCode::Char('a') => {
                    self.cursor = 0;
                    return;
                }
                KeyCode::Char('e') => {
                    self.cursor = self.input.len();
                    return;
                }
                KeyCode::Char('j') => {
                    self.insert_char('\n');
                    return;
                }
                _ => {}
            }
        }

        if key.modifiers.contains(KeyModifiers::ALT) && matches!(key.code, KeyCode::Backspace) {
            self.backspace_word();
            return;
        }

        match key.code {
            KeyCode::Enter => {
                if key
                    .modifiers
                    .intersects(KeyModifiers::SHIFT | KeyModifiers::ALT)
                {
                    self.insert_char('\n');
                } else {
                    self.submit_prompt();
                }
            }
            KeyCode::Esc => {
                if self.is_running() {
                    self.cancel_request();
                } else {
                    self.error = None;
                }
            }
            KeyCode::Tab => self.knob = self.knob.next(),
            KeyCode::Up => self.settings.nudge(self.knob, 1),
            KeyCode::Down => self.settings.nudge(self.knob, -1),
            KeyCode::F(n @ 1..=4) => {
                let tone = Tone::all()[usize::from(n - 1)];
                let on = self.tones.toggle(tone);
                self.last_status = format!("{} {}", tone.as_str(), if on { "on" } else { "off" });
            }
            KeyCode::Backspace => self.backspace(),
            KeyCode::Delete => self.delete(),
            KeyCode::Left => self.move_left(),
            KeyCode::Right => self.move_right(),
            KeyCode::Home => self.cursor = 0,
            KeyCode::End => self.cursor = self.input.len(),
            KeyCode::Char(c) => self.insert_char(c),
            _ => {}
        }
    }

    fn remaining_chars(&self) -> usize {
        MAX_PROMPT_CHARS.saturating_sub(self.input.chars().count())
    }

    /// Inserts at the cursor, silently dropping anything past the prompt limit.
    pub(super) fn insert_char(&mut self, c: char) {
        if self.remaining_chars() == 0 {
            return;
        }
        if self.cursor >= self.input.len() {
            self.input.push(c);
        } else {
            self.input.insert(self.cursor, c);
        }
        self.cursor += c.len_utf8();
    }

    pub(super) fn insert_str(&mut self, s: &str) {
        for c in s.chars().take(self.remaining_chars()) {
            self.insert_char(c);
        }
    }

    pub(super) fn backspace(&mut self) {
        if self.cursor == 0 || self.input.is_empty() {
            return;
        }
        if let Some(prev_idx) = self.input[..self.cursor]
            .char_indices()
            .last()
            .map(|(i, _)| i)
        {
            self.input.drain(prev_idx..self.cursor);
            self.cursor = prev_idx;
        }
    }

    pub(super) fn backspace_word(&mut self) {
        while self.cursor > 0 && self.input[..self.cursor].ends_with(char::is_whitespace) {
            self.backspace();
        }
        while self.cursor > 0 && !self.input[..self.cursor].ends_with(char::is_whitespace) {
            self.backspace();
        }
    }

    pub(super) fn delete(&mut self) {
        let Some(ch) = self.input[self.cursor..].chars().next() else {
            return;
        };
        let end = self.cursor + ch.len_utf8();
        self.input.drain(self.cursor..end);
    }

    pub(super) fn move_left(&mut self) {
        if let Some((prev_idx, _)) = self.input[..self.cursor].char_indices().last() {
            self.cursor = prev_idx;
        }
    }

    pub(super) fn move_right(&mut self) {
        if let Some(ch) = self.input[self.cursor..].chars().next() {
            self.cursor += ch.len_utf8();
        }
    }
}
