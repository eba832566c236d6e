use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::GenerationSettings;

pub(crate) const MAX_PROMPT_CHARS: usize = 500;
pub(crate) const GENERIC_ERROR: &str =
    "An error occurred while generating ad copy. Please try again.";

#[derive(Debug, thiserror::Error)]
pub(crate) enum InputError {
    #[error("Please describe your product or service")]
    EmptyPrompt,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("response carried no usable completion")]
    Empty,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Tone {
    Professional,
    Persuasive,
    Casual,
    Friendly,
}

impl Tone {
    pub(crate) fn all() -> [Tone; 4] {
        [Tone::Professional, Tone::Persuasive, Tone::Casual, Tone::Friendly]
    }

    pub(crate) fn from_name(name: &str) -> Option<Tone> {
        Tone::all()
            .into_iter()
            .find(|tone| tone.as_str().eq_ignore_ascii_case(name.trim()))
    }

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Tone::Professional => "professional",
            Tone::Persuasive => "persuasive",
            Tone::Casual => "casual",
            Tone::Friendly => "friendly",
        }
    }
}

/// Tones selected for the next request, kept in a stable order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct ToneSet(BTreeSet<Tone>);

impl ToneSet {
    pub(crate) fn toggle(&mut self, tone: Tone) -> bool {
        if self.0.remove(&tone) {
            false
        } else {
            self.0.insert(tone);
            true
        }
    }

    pub(crate) fn contains(&self, tone: Tone) -> bool {
        self.0.contains(&tone)
    }

    pub(crate) fn to_vec(&self) -> Vec<Tone> {
        self.0.iter().copied().collect()
    }
}

impl FromIterator<Tone> for ToneSet {
    fn from_iter<T: IntoIterator<Item = Tone>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct CompletionRequest {
    pub(crate) text: String,
    pub(crate) temperature: f32,
    pub(crate) max_new_tokens: u32,
    pub(crate) top_p: f32,
    pub(crate) top_k: u32,
    pub(crate) repetition_penalty: f32,
    pub(crate) tones: Vec<Tone>,
}

impl CompletionRequest {
    pub(crate) fn build(
        prompt: &str,
        settings: &GenerationSettings,
        tones: &ToneSet,
    ) -> Result<Self, InputError> {
        if prompt.trim().is_empty() {
            return Err(InputError::EmptyPrompt);
        }
        let settings = settings.clamped();
        Ok(Self {
            text: clamp_prompt(prompt),
            temperature: settings.temperature,
            max_new_tokens: settings.max_new_tokens,
            top_p: settings.top_p,
            top_k: settings.top_k,
            repetition_penalty: settings.repetition_penalty,
            tones: tones.to_vec(),
        })
    }
}

/// Hard clamp applied to the prompt editor and again before sending.
pub(crate) fn clamp_prompt(prompt: &str) -> String {
    match prompt.char_indices().nth(MAX_PROMPT_CHARS) {
        Some((idx, _)) => prompt[..idx].to_string(),
        None => prompt.to_string(),
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub(crate) struct TokenUsage {
    #[serde(default)]
    pub(crate) input_tokens: Option<u64>,
    #[serde(default)]
    pub(crate) output_tokens: Option<u64>,
}

impl TokenUsage {
    pub(crate) fn total(&self) -> Option<u64> {
        Some(self.input_tokens? + self.output_tokens?)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Generation {
    pub(crate) completions: Vec<String>,
    pub(crate) usage: TokenUsage,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireCompletions {
    Many(Vec<serde_json::Value>),
    One(String),
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    completions: Option<WireCompletions>,
    #[serde(default)]
    metadata: Option<TokenUsage>,
    // Older servers put the counts next to `completions`.
    #[serde(flatten)]
    legacy: TokenUsage,
}

/// Accepts both `{completions: [..], metadata: {..}}` and the legacy
/// `{completions: "..", input_tokens, output_tokens}` shape.
pub(crate) fn parse_response(body: &str) -> Result<Generation, ApiError> {
    let wire: WireResponse = serde_json::from_str(body)?;
    let completions = match wire.completions {
        Some(WireCompletions::Many(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) if !s.trim().is_empty() => Some(s),
                _ => None,
            })
            .collect::<Vec<_>>(),
        Some(WireCompletions::One(s)) if !s.trim().is_empty() => vec![s],
        _ => Vec::new(),
    };
    if completions.is_empty() {
        return Err(ApiError::Empty);
    }
    Ok(Generation {
        completions,
        usage: wire.metadata.unwrap_or(wire.legacy),
    })
}

pub(crate) struct CompletionClient {
    http: reqwest::blocking::Client,
    endpoint: String,
}

impl CompletionClient {
    pub(crate) fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    pub(crate) fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub(crate) fn complete(&self, request: &CompletionRequest) -> Result<Generation, ApiError> {
        info!(
            endpoint = %self.endpoint,
            chars = request.text.chars().count(),
            tones = request.tones.len(),
            "requesting completions"
        );
        let resp = self.http.post(&self.endpoint).json(request).send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }
        let body = resp.text()?;
        debug!(bytes = body.len(), "completion response received");
        parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn parses_current_shape_with_metadata() {
        let generation = parse_response(
            r#"{"completions":["Buy now!","Save today"],"metadata":{"input_tokens":5,"output_tokens":3}}"#,
        )
        .expect("parse");
        assert_eq!(generation.completions, vec!["Buy now!", "Save today"]);
        assert_eq!(generation.usage.total(), Some(8));
    }

    #[test]
    fn parses_legacy_single_string_shape() {
        let generation =
            parse_response(r#"{"completions":"Fresh bread daily","input_tokens":4,"output_tokens":6}"#)
                .expect("parse");
        assert_eq!(generation.completions, vec!["Fresh bread daily"]);
        assert_eq!(generation.usage.input_tokens, Some(4));
        assert_eq!(generation.usage.total(), Some(10));
    }

    #[test]
    fn missing_counts_leave_total_unknown() {
        let generation = parse_response(r#"{"completions":["x"],"metadata":{"input_tokens":2}}"#)
            .expect("parse");
        assert_eq!(generation.usage.output_tokens, None);
        assert_eq!(generation.usage.total(), None);
    }

    #[test]
    fn blank_entries_are_skipped() {
        let generation =
            parse_response(r#"{"completions":["", null, 7, "kept"]}"#).expect("parse");
        assert_eq!(generation.completions, vec!["kept"]);
    }

    #[test]
    fn empty_or_missing_completions_are_errors() {
        assert!(matches!(parse_response(r#"{"completions":[]}"#), Err(ApiError::Empty)));
        assert!(matches!(parse_response(r#"{"completions":"   "}"#), Err(ApiError::Empty)));
        assert!(matches!(
            parse_response(r#"{"completions":["   ", "\t\n"]}"#),
            Err(ApiError::Empty)
        ));
        assert!(matches!(parse_response(r#"{"detail":"boom"}"#), Err(ApiError::Empty)));
        assert!(matches!(parse_response("not json"), Err(ApiError::Decode(_))));
    }

    #[test]
    fn build_rejects_blank_prompt() {
        let err = CompletionRequest::build("   \n", &GenerationSettings::default(), &ToneSet::default())
            .expect_err("blank prompt");
        assert_eq!(err.to_string(), "Please describe your product or service");
    }

    #[test]
    fn build_clamps_prompt_and_orders_tones() {
        let long = "é".repeat(MAX_PROMPT_CHARS + 20);
        let tones: ToneSet = [Tone::Friendly, Tone::Professional].into_iter().collect();
        let req = CompletionRequest::build(&long, &GenerationSettings::default(), &tones)
            .expect("build");
        assert_eq!(req.text.chars().count(), MAX_PROMPT_CHARS);
        assert_eq!(req.tones, vec![Tone::Professional, Tone::Friendly]);
        let wire = serde_json::to_value(&req).expect("serialize");
        assert_eq!(wire["tones"], serde_json::json!(["professional", "friendly"]));
        assert_eq!(wire["top_k"], serde_json::json!(50));
    }

    #[test]
    fn tone_names_parse_case_insensitively() {
        assert_eq!(Tone::from_name("Casual"), Some(Tone::Casual));
        assert_eq!(Tone::from_name(" friendly "), Some(Tone::Friendly));
        assert_eq!(Tone::from_name("angry"), None);
    }

    #[test]
    fn tone_toggle_flips_membership() {
        let mut tones = ToneSet::default();
        assert!(tones.toggle(Tone::Casual));
        assert!(tones.contains(Tone::Casual));
        assert!(!tones.toggle(Tone::Casual));
        assert!(!tones.contains(Tone::Casual));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn posts_request_and_decodes_completions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/complete"))
            .and(body_partial_json(serde_json::json!({"text": "bakery ad", "tones": ["casual"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "completions": ["Buy now!"],
                "metadata": {"input_tokens": 5, "output_tokens": 3}
            })))
            .mount(&server)
            .await;

        let endpoint = format!("{}/api/complete", server.uri());
        let result = tokio::task::spawn_blocking(move || {
            let client = CompletionClient::new(endpoint, Duration::from_secs(10))?;
            let tones: ToneSet = [Tone::Casual].into_iter().collect();
            let req = CompletionRequest::build("bakery ad", &GenerationSettings::default(), &tones)
                .expect("build");
            client.complete(&req)
        })
        .await
        .expect("join");

        let generation = result.expect("complete");
        assert_eq!(generation.completions, vec!["Buy now!"]);
        assert_eq!(generation.usage.total(), Some(8));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let endpoint = format!("{}/api/complete", server.uri());
        let result = tokio::task::spawn_blocking(move || {
            let client = CompletionClient::new(endpoint, Duration::from_secs(10))?;
            let req = CompletionRequest::build("x", &GenerationSettings::default(), &ToneSet::default())
                .expect("build");
            client.complete(&req)
        })
        .await
        .expect("join");

        assert!(matches!(result, Err(ApiError::Status(500))));
    }
}
