use std::io::Stdout;

use anyhow::{bail, Context, Result};
use crossterm::cursor;
use crossterm::event::{
    DisableBracketedPaste, EnableBracketedPaste, KeyboardEnhancementFlags,
    PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, supports_keyboard_enhancement};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::Rect;
use ratatui::{Terminal, TerminalOptions, Viewport};
use tracing::{info, warn};

mod api;
mod app;
mod clipboard;
mod config;
mod headless;
mod logging;
mod pipeline;
mod session;
mod store;

use api::{CompletionClient, Tone, ToneSet};
use clipboard::SystemClipboard;
use config::Config;
use pipeline::RenderPipeline;
use session::CompletionSession;
use store::CompletionStore;

const USAGE: &str = "\
usage: adgenius [--plain] [--print <prompt> [--tone <name>]...] [--history]

  --print <prompt>  generate once, print the results and exit
  --tone <name>     professional, persuasive, casual or friendly (repeatable)
  --history         print the most recent saved results
  --plain           show results as plain text instead of markdown
  --version         print the version
  --help            show this message
";

#[derive(Debug, PartialEq)]
enum Command {
    Interactive,
    Print(String),
    History,
}

#[derive(Debug, PartialEq)]
enum CliAction {
    Run {
        command: Command,
        plain: bool,
        tones: ToneSet,
    },
    Version,
    Help,
}

fn parse_args(args: &[String]) -> Result<CliAction> {
    let mut command = Command::Interactive;
    let mut plain = false;
    let mut tones = ToneSet::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--version" | "-v" => return Ok(CliAction::Version),
            "--help" | "-h" => return Ok(CliAction::Help),
            "--plain" => plain = true,
            "--history" => command = Command::History,
            "--print" | "-p" => {
                let Some(prompt) = iter.next() else {
                    bail!("--print needs a prompt");
                };
                command = Command::Print(prompt.clone());
            }
            "--tone" => {
                let Some(name) = iter.next() else {
                    bail!("--tone needs a name");
                };
                let Some(tone) = Tone::from_name(name) else {
                    bail!("unknown tone: {name}");
                };
                if !tones.contains(tone) {
                    tones.toggle(tone);
                }
            }
            unknown => bail!("unknown argument: {unknown}"),
        }
    }
    Ok(CliAction::Run {
        command,
        plain,
        tones,
    })
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, plain, tones) = match parse_args(&args) {
        Ok(CliAction::Run {
            command,
            plain,
            tones,
        }) => (command, plain, tones),
        Ok(CliAction::Version) => {
            println!("adgenius {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Ok(CliAction::Help) => {
            print!("{USAGE}");
            return Ok(());
        }
        Err(err) => {
            eprintln!("{err}");
            eprint!("{USAGE}");
            std::process::exit(2);
        }
    };

    let mut config = Config::from_env();
    config.plain |= plain;
    let log_guard = match logging::init(&config.log_path()) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("logging disabled: {err:#}");
            None
        }
    };
    info!(
        version = env!("CARGO_PKG_VERSION"),
        endpoint = %config.endpoint,
        plain = config.plain,
        "starting"
    );

    let store = open_store(&config)?;
    let mut session = CompletionSession::new(store, RenderPipeline::new(config.plain));
    let client = CompletionClient::new(config.endpoint.clone(), config.request_timeout)
        .context("build http client")?;

    match command {
        Command::Print(prompt) => {
            let code = headless::run_print(
                &mut std::io::stdout().lock(),
                &mut std::io::stderr().lock(),
                &mut session,
                &client,
                &prompt,
                &tones,
            )?;
            if code != 0 {
                drop(session);
                drop(log_guard);
                std::process::exit(code);
            }
            Ok(())
        }
        Command::History => headless::print_history(&mut std::io::stdout().lock(), &session),
        Command::Interactive => {
            let app = app::App::new(session, client, Box::new(SystemClipboard::default()));
            let mut terminal = setup_terminal()?;
            let result = app::run_app(&mut terminal, app);
            restore_terminal(&mut terminal)?;
            result
        }
    }
}

/// Falls back to session-only storage so a broken data directory never blocks generation.
fn open_store(config: &Config) -> Result<CompletionStore> {
    match CompletionStore::open(&config.storage_path(), config.storage_quota_bytes) {
        Ok(store) => Ok(store),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "storage unavailable; history kept in memory only");
            CompletionStore::in_memory(config.storage_quota_bytes)
        }
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    // insert_before needs at least one row above the viewport.
    if matches!(cursor::position(), Ok((_, 0))) {
        println!();
    }

    enable_raw_mode().context("enable raw mode")?;

    let (term_width, term_height) = crossterm::terminal::size().unwrap_or((80, 24));
    let inline_height = compute_inline_height(term_height);

    let mut terminal = match Terminal::with_options(
        CrosstermBackend::new(std::io::stdout()),
        TerminalOptions {
            viewport: Viewport::Inline(inline_height),
        },
    ) {
        Ok(t) => t,
        Err(inline_err) => {
            // Some terminals reject the cursor-position query Inline needs.
            let fallback_rect = Rect::new(
                0,
                term_height.saturating_sub(inline_height),
                term_width.max(1),
                inline_height.max(1),
            );
            Terminal::with_options(
                CrosstermBackend::new(std::io::stdout()),
                TerminalOptions {
                    viewport: Viewport::Fixed(fallback_rect),
                },
            )
            .with_context(|| format!("create terminal (inline failed: {inline_err})"))?
        }
    };

    if matches!(supports_keyboard_enhancement(), Ok(true)) {
        crossterm::execute!(
            std::io::stdout(),
            PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES)
        )
        .ok();
    }
    crossterm::execute!(std::io::stdout(), EnableBracketedPaste).ok();

    terminal.hide_cursor().ok();
    Ok(terminal)
}

fn compute_inline_height(term_height: u16) -> u16 {
    let max_allowed = term_height.saturating_sub(1).max(1);
    if let Ok(raw) = std::env::var("ADGENIUS_INLINE_HEIGHT") {
        if let Ok(parsed) = raw.trim().parse::<u16>() {
            return parsed.clamp(1, max_allowed);
        }
    }

    // Composer + settings + status panels.
    13u16.min(max_allowed).max(6)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    crossterm::execute!(std::io::stdout(), DisableBracketedPaste).ok();
    crossterm::execute!(std::io::stdout(), PopKeyboardEnhancementFlags).ok();
    disable_raw_mode().context("disable raw mode")?;
    terminal.show_cursor().context("show cursor")?;
    println!();
    Ok(())
}
