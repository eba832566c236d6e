use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::api::{ApiError, CompletionClient, CompletionRequest, Generation, TokenUsage};
use crate::pipeline::{CompletionCard, RenderPipeline};
use crate::store::{CompletionHistory, CompletionStore, Confirmation, PersistOutcome};

/// Outcome of one successful generation, ready for display.
#[derive(Clone, Debug)]
pub(crate) struct GenerationReport {
    pub(crate) cards: Vec<CompletionCard>,
    pub(crate) usage: TokenUsage,
    pub(crate) elapsed: Duration,
    pub(crate) persisted: PersistOutcome,
}

impl GenerationReport {
    pub(crate) fn processing_time_label(&self) -> String {
        format!("{:.2}s", self.elapsed.as_secs_f64())
    }

    pub(crate) fn token_labels(&self) -> [(&'static str, String); 3] {
        [
            ("input", count_label(self.usage.input_tokens)),
            ("generated", count_label(self.usage.output_tokens)),
            ("total", count_label(self.usage.total())),
        ]
    }

    pub(crate) fn summary_line(&self) -> String {
        let tokens = self
            .token_labels()
            .iter()
            .map(|(label, value)| format!("{label} {value}"))
            .collect::<Vec<_>>()
            .join(" | ");
        format!("{} | tokens: {}", self.processing_time_label(), tokens)
    }
}

fn count_label(value: Option<u64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| v.to_string())
}

/// Owns the completion history and the collaborators that read and write it.
pub(crate) struct CompletionSession {
    store: CompletionStore,
    history: CompletionHistory,
    pipeline: RenderPipeline,
}

impl CompletionSession {
    pub(crate) fn new(store: CompletionStore, pipeline: RenderPipeline) -> Self {
        let history = store.load();
        info!(entries = history.len(), "history loaded");
        Self {
            store,
            history,
            pipeline,
        }
    }

    pub(crate) fn history(&self) -> &CompletionHistory {
        &self.history
    }

    pub(crate) fn pipeline(&self) -> &RenderPipeline {
        &self.pipeline
    }

    /// Blocking request + apply, used by the headless path.
    pub(crate) fn generate(
        &mut self,
        client: &CompletionClient,
        request: &CompletionRequest,
    ) -> Result<GenerationReport, ApiError> {
        let started = Instant::now();
        let generation = client.complete(request)?;
        self.apply(generation, started.elapsed())
    }

    /// Renders every returned completion and records the ones that produced
    /// a card, newest last in the batch ending up first in history. A batch
    /// that renders no card at all is `ApiError::Empty` and changes nothing.
    pub(crate) fn apply(
        &mut self,
        generation: Generation,
        elapsed: Duration,
    ) -> Result<GenerationReport, ApiError> {
        let mut cards = Vec::with_capacity(generation.completions.len());
        let mut history = self.history.clone();
        for completion in generation.completions {
            match self.pipeline.render(Some(&completion)) {
                Some(card) => {
                    cards.push(card);
                    history = history.record(completion);
                }
                None => warn!("received empty completion; skipping"),
            }
        }
        if cards.is_empty() {
            return Err(ApiError::Empty);
        }
        let persisted = self.store.persist(&mut history);
        if persisted != PersistOutcome::Saved {
            warn!(?persisted, "history only partially persisted");
        }
        self.history = history;
        info!(
            cards = cards.len(),
            history = self.history.len(),
            "generation applied"
        );
        Ok(GenerationReport {
            cards,
            usage: generation.usage,
            elapsed,
            persisted,
        })
    }

    /// Cards for the visible slice of history, newest first.
    pub(crate) fn history_cards(&self) -> Vec<CompletionCard> {
        self.history
            .recent()
            .iter()
            .filter_map(|entry| {
                let card = self.pipeline.render(Some(entry));
                if card.is_none() {
                    warn!("history entry rendered no card");
                }
                card
            })
            .collect()
    }

    pub(crate) fn clear_history(&mut self, confirmation: Confirmation) -> bool {
        self.store.clear(&mut self.history, confirmation)
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &CompletionStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{CompletionRequest, ToneSet};
    use crate::config::GenerationSettings;
    use crate::store::HISTORY_DISPLAY_LIMIT;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session_in(dir: &TempDir) -> CompletionSession {
        let store =
            CompletionStore::open(&dir.path().join("storage.db"), 1 << 20).expect("open store");
        CompletionSession::new(store, RenderPipeline::new(false))
    }

    fn generation(items: &[&str]) -> Generation {
        Generation {
            completions: items.iter().map(|s| s.to_string()).collect(),
            usage: TokenUsage::default(),
        }
    }

    #[test]
    fn apply_records_batch_newest_last_first() {
        let dir = TempDir::new().expect("tempdir");
        let mut session = session_in(&dir);
        let report = session
            .apply(generation(&["first", "second"]), Duration::from_millis(1500))
            .expect("apply");

        assert_eq!(report.cards.len(), 2);
        assert_eq!(report.persisted, PersistOutcome::Saved);
        assert_eq!(
            session.history().entries(),
            ["second".to_string(), "first".to_string()]
        );
        assert_eq!(report.processing_time_label(), "1.50s");
        assert_eq!(report.token_labels()[2].1, "N/A");
    }

    #[test]
    fn history_survives_reopen_and_display_is_capped() {
        let dir = TempDir::new().expect("tempdir");
        {
            let mut session = session_in(&dir);
            for i in 0..8 {
                session
                    .apply(generation(&[format!("ad {i}").as_str()]), Duration::ZERO)
                    .expect("apply");
            }
        }
        let session = session_in(&dir);
        assert_eq!(session.history().len(), 8);
        let cards = session.history_cards();
        assert_eq!(cards.len(), HISTORY_DISPLAY_LIMIT);
        assert_eq!(cards[0].original, "ad 7");
        assert_eq!(cards[4].original, "ad 3");
    }

    #[test]
    fn clear_history_honours_confirmation() {
        let dir = TempDir::new().expect("tempdir");
        let mut session = session_in(&dir);
        session.apply(generation(&["keep"]), Duration::ZERO).expect("apply");

        assert!(!session.clear_history(Confirmation::Declined));
        assert_eq!(session.history().len(), 1);
        assert!(session.store().raw().is_some());

        assert!(session.clear_history(Confirmation::Accepted));
        assert!(session.history().is_empty());
        assert_eq!(session.store().raw(), None);
    }

    #[test]
    fn batch_with_nothing_displayable_is_empty_and_changes_nothing() {
        let dir = TempDir::new().expect("tempdir");
        let mut session = session_in(&dir);
        session.apply(generation(&["kept"]), Duration::ZERO).expect("apply");

        let err = session
            .apply(generation(&["   ", "\\n"]), Duration::ZERO)
            .expect_err("blank batch");
        assert!(matches!(err, ApiError::Empty));
        assert_eq!(session.history().entries(), ["kept".to_string()]);
        assert_eq!(session.store().raw().as_deref(), Some(r#"["kept"]"#));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn round_trip_records_and_reports_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/complete"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "completions": ["Buy now!"],
                "metadata": {"input_tokens": 5, "output_tokens": 3}
            })))
            .mount(&server)
            .await;
        let dir = TempDir::new().expect("tempdir");
        let endpoint = format!("{}/api/complete", server.uri());

        let (report, history, raw) = tokio::task::spawn_blocking(move || {
            let mut session = session_in(&dir);
            let client = CompletionClient::new(endpoint, Duration::from_secs(10)).expect("client");
            let req = CompletionRequest::build(
                "new bakery",
                &GenerationSettings::default(),
                &ToneSet::default(),
            )
            .expect("build");
            let report = session.generate(&client, &req).expect("generate");
            let history = session.history().clone();
            let raw = session.store().raw();
            (report, history, raw)
        })
        .await
        .expect("join");

        assert_eq!(history.entries()[0], "Buy now!");
        assert_eq!(raw.as_deref(), Some(r#"["Buy now!"]"#));
        assert_eq!(report.token_labels()[2], ("total", "8".to_string()));
        assert!(report.summary_line().contains("total 8"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_error_leaves_history_unchanged() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let dir = TempDir::new().expect("tempdir");
        let endpoint = format!("{}/api/complete", server.uri());

        let (err, before, after, raw) = tokio::task::spawn_blocking(move || {
            let mut session = session_in(&dir);
            session
                .apply(generation(&["existing"]), Duration::ZERO)
                .expect("apply");
            let before = session.history().clone();
            let client = CompletionClient::new(endpoint, Duration::from_secs(10)).expect("client");
            let req = CompletionRequest::build(
                "anything",
                &GenerationSettings::default(),
                &ToneSet::default(),
            )
            .expect("build");
            let err = session.generate(&client, &req).expect_err("500 must fail");
            (err, before, session.history().clone(), session.store().raw())
        })
        .await
        .expect("join");

        assert!(matches!(err, ApiError::Status(500)));
        assert_eq!(before, after);
        assert_eq!(raw.as_deref(), Some(r#"["existing"]"#));
    }
}
