use std::io::Write;

use anyhow::{Context, Result};
use tracing::warn;

use crate::api::{CompletionClient, CompletionRequest, ToneSet, GENERIC_ERROR};
use crate::config::GenerationSettings;
use crate::pipeline::CompletionCard;
use crate::session::CompletionSession;

/// Exit status for a request the service failed.
pub(crate) const EXIT_REQUEST_FAILED: i32 = 1;
/// Exit status for input rejected before sending.
pub(crate) const EXIT_BAD_INPUT: i32 = 2;

/// One-shot generation: prints each card and the usage summary, records history.
pub(crate) fn run_print(
    out: &mut dyn Write,
    err: &mut dyn Write,
    session: &mut CompletionSession,
    client: &CompletionClient,
    prompt: &str,
    tones: &ToneSet,
) -> Result<i32> {
    let request = match CompletionRequest::build(prompt, &GenerationSettings::default(), tones) {
        Ok(request) => request,
        Err(e) => {
            writeln!(err, "{e}").context("write stderr")?;
            return Ok(EXIT_BAD_INPUT);
        }
    };
    match session.generate(client, &request) {
        Ok(report) => {
            write_cards(out, &report.cards)?;
            writeln!(out, "{}", report.summary_line()).context("write stdout")?;
            Ok(0)
        }
        Err(e) => {
            warn!(err = %e, "headless generation failed");
            writeln!(err, "{GENERIC_ERROR}").context("write stderr")?;
            Ok(EXIT_REQUEST_FAILED)
        }
    }
}

pub(crate) fn print_history(out: &mut dyn Write, session: &CompletionSession) -> Result<()> {
    let cards = session.history_cards();
    if cards.is_empty() {
        writeln!(out, "no saved results").context("write stdout")?;
        return Ok(());
    }
    write_cards(out, &cards)
}

fn write_cards(out: &mut dyn Write, cards: &[CompletionCard]) -> Result<()> {
    for (idx, card) in cards.iter().enumerate() {
        writeln!(out, "#{}", idx + 1).context("write stdout")?;
        writeln!(out, "{}", card.plain_text()).context("write stdout")?;
        writeln!(out).context("write stdout")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Generation, TokenUsage};
    use crate::pipeline::RenderPipeline;
    use crate::store::CompletionStore;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session() -> CompletionSession {
        let store = CompletionStore::in_memory(1 << 20).expect("store");
        CompletionSession::new(store, RenderPipeline::new(true))
    }

    #[test]
    fn history_lists_newest_first() {
        let mut session = session();
        session.apply(
            Generation {
                completions: vec!["old".to_string(), "new".to_string()],
                usage: TokenUsage::default(),
            },
            Duration::ZERO,
        )
        .expect("apply");
        let mut out = Vec::new();
        print_history(&mut out, &session).expect("print");
        assert_eq!(String::from_utf8(out).expect("utf8"), "#1\nnew\n\n#2\nold\n\n");
    }

    #[test]
    fn empty_history_says_so() {
        let mut out = Vec::new();
        print_history(&mut out, &session()).expect("print");
        assert_eq!(String::from_utf8(out).expect("utf8"), "no saved results\n");
    }

    #[test]
    fn blank_prompt_exits_with_input_error() {
        let mut session = session();
        let client =
            CompletionClient::new("http://127.0.0.1:9/api/complete", Duration::from_secs(1))
                .expect("client");
        let (mut out, mut err) = (Vec::new(), Vec::new());
        let code = run_print(&mut out, &mut err, &mut session, &client, "  ", &ToneSet::default())
            .expect("run");
        assert_eq!(code, EXIT_BAD_INPUT);
        assert!(out.is_empty());
        assert_eq!(
            String::from_utf8(err).expect("utf8"),
            "Please describe your product or service\n"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn prints_cards_and_summary() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "completions": ["Fresh bread\ndaily"],
                "metadata": {"input_tokens": 2, "output_tokens": 4}
            })))
            .mount(&server)
            .await;
        let endpoint = format!("{}/api/complete", server.uri());

        let (code, out, history) = tokio::task::spawn_blocking(move || {
            let mut session = session();
            let client = CompletionClient::new(endpoint, Duration::from_secs(10)).expect("client");
            let mut out = Vec::new();
            let mut err = Vec::new();
            let code = run_print(
                &mut out,
                &mut err,
                &mut session,
                &client,
                "bakery",
                &ToneSet::default(),
            )
            .expect("run");
            (code, out, session.history().clone())
        })
        .await
        .expect("join");

        assert_eq!(code, 0);
        let out = String::from_utf8(out).expect("utf8");
        assert!(out.starts_with("#1\nFresh bread\ndaily\n\n"));
        assert!(out.contains("total 6"));
        assert_eq!(history.entries(), ["Fresh bread\ndaily".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_error_prints_generic_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let endpoint = format!("{}/api/complete", server.uri());

        let (code, err) = tokio::task::spawn_blocking(move || {
            let mut session = session();
            let client = CompletionClient::new(endpoint, Duration::from_secs(10)).expect("client");
            let mut out = Vec::new();
            let mut err = Vec::new();
            let code = run_print(&mut out, &mut err, &mut session, &client, "x", &ToneSet::default())
                .expect("run");
            (code, err)
        })
        .await
        .expect("join");

        assert_eq!(code, EXIT_REQUEST_FAILED);
        assert_eq!(String::from_utf8(err).expect("utf8"), format!("{GENERIC_ERROR}\n"));
    }
}
