use super::*;

pub(crate) fn run_app(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    mut app: App,
) -> Result<()> {
    const ACTIVE_POLL_MS: u64 = 33;
    const IDLE_POLL_MS: u64 = 100;
    const SPINNER_TICK_MS: u64 = 120;
    const MAX_EVENTS_PER_FRAME: u16 = 64;
    let mut last_spinner_tick = Instant::now();
    let mut needs_draw = true;
    let mut was_confirming_copy = false;

    loop {
        if app.poll_worker() {
            needs_draw = true;
        }
        if app.is_running() && last_spinner_tick.elapsed() >= Duration::from_millis(SPINNER_TICK_MS)
        {
            app.spinner_idx = (app.spinner_idx + 1) % SPINNER_FRAMES.len();
            last_spinner_tick = Instant::now();
            needs_draw = true;
        }
        // Redraw once more when the copy confirmation expires.
        let confirming_copy = app.copy_confirming(Instant::now());
        if confirming_copy != was_confirming_copy {
            was_confirming_copy = confirming_copy;
            needs_draw = true;
        }

        if app.needs_screen_clear {
            app.needs_screen_clear = false;
            crossterm::execute!(
                std::io::stdout(),
                TermClear(ClearType::Purge),
                crossterm::cursor::MoveTo(0, 0)
            )?;
            terminal.clear()?;
            needs_draw = true;
        }

        if needs_draw {
            flush_new_entries(terminal, &mut app)?;
            terminal.draw(|f| ui::draw(f, &app))?;
            needs_draw = false;
        }

        if app.should_quit {
            break;
        }

        let timeout = if app.is_running() || confirming_copy {
            Duration::from_millis(ACTIVE_POLL_MS)
        } else {
            Duration::from_millis(IDLE_POLL_MS)
        };
        if !event::poll(timeout).context("event poll")? {
            continue;
        }

        let mut drained_events: u16 = 0;
        loop {
            match event::read().context("event read")? {
                Event::Key(key) => {
                    if !matches!(key.kind, KeyEventKind::Release) {
                        app.handle_key(key);
                        needs_draw = true;
                    }
                }
                Event::Paste(text) => {
                    app.handle_paste_event(&text);
                    needs_draw = true;
                }
                Event::Resize(_, _) => needs_draw = true,
                _ => {}
            }

            drained_events = drained_events.saturating_add(1);
            if drained_events >= MAX_EVENTS_PER_FRAME {
                break;
            }
            if !event::poll(Duration::from_millis(0)).context("event poll drain")? {
                break;
            }
        }
    }

    info!("exiting");
    // Clear the live panels while keeping the transcript in scrollback.
    terminal.draw(ui::draw_exit)?;
    Ok(())
}

/// Writes entries added since the last flush above the inline viewport.
fn flush_new_entries(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut App,
) -> Result<()> {
    if app.flushed_entries >= app.entries.len() {
        return Ok(());
    }
    let width = terminal
        .size()
        .context("terminal size for insert")?
        .width
        .max(1);
    let new_lines = app.render_entries_lines_range(width, app.flushed_entries, app.entries.len());
    let probe = Paragraph::new(Text::from(new_lines.clone())).wrap(Wrap { trim: false });
    let height = probe.line_count(width).min(u16::MAX as usize) as u16;
    if height == 0 {
        app.flushed_entries = app.entries.len();
        return Ok(());
    }

    let insert_result = catch_unwind(AssertUnwindSafe(|| {
        terminal.insert_before(height, |buf| {
            let paragraph = Paragraph::new(Text::from(new_lines)).wrap(Wrap { trim: false });
            paragraph.render(buf.area, buf);
        })
    }));
    match insert_result {
        Ok(res) => res.context("insert transcript lines")?,
        Err(_) => {
            // Retry on the next frame instead of dropping the entries.
            warn!("transcript insert panicked");
            return Ok(());
        }
    }
    app.flushed_entries = app.entries.len();
    Ok(())
}
