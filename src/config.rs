use std::path::PathBuf;
use std::time::Duration;

pub(crate) const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8000/api/complete";
const DEFAULT_STORAGE_QUOTA_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Runtime settings gathered from `ADGENIUS_*` environment variables.
#[derive(Clone, Debug)]
pub(crate) struct Config {
    pub(crate) endpoint: String,
    pub(crate) home: PathBuf,
    pub(crate) storage_quota_bytes: usize,
    pub(crate) request_timeout: Duration,
    pub(crate) plain: bool,
}

impl Config {
    pub(crate) fn from_env() -> Self {
        let endpoint = env_string("ADGENIUS_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let home = env_string("ADGENIUS_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(default_home);
        let storage_quota_bytes = env_parsed("ADGENIUS_STORAGE_QUOTA")
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_STORAGE_QUOTA_BYTES);
        let timeout_secs = env_parsed("ADGENIUS_TIMEOUT_SECS")
            .filter(|n: &u64| *n > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Self {
            endpoint,
            home,
            storage_quota_bytes,
            request_timeout: Duration::from_secs(timeout_secs),
            plain: false,
        }
    }

    pub(crate) fn storage_path(&self) -> PathBuf {
        self.home.join("storage.db")
    }

    pub(crate) fn log_path(&self) -> PathBuf {
        self.home.join("adgenius.log")
    }
}

fn default_home() -> PathBuf {
    if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".adgenius")
    } else {
        PathBuf::from(".adgenius")
    }
}

fn env_string(key: &str) -> Option<String> {
    let raw = std::env::var(key).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key)?.parse().ok()
}

/// Sampling knobs sent with every request, clamped to the ranges the
/// completion service accepts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct GenerationSettings {
    pub(crate) temperature: f32,
    pub(crate) max_new_tokens: u32,
    pub(crate) top_p: f32,
    pub(crate) top_k: u32,
    pub(crate) repetition_penalty: f32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_new_tokens: 200,
            top_p: 0.9,
            top_k: 50,
            repetition_penalty: 1.1,
        }
    }
}

/// Which knob the composer's arrow keys currently adjust.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Knob {
    Temperature,
    MaxNewTokens,
    TopP,
    TopK,
    RepetitionPenalty,
}

impl Knob {
    pub(crate) fn all() -> [Knob; 5] {
        [
            Knob::Temperature,
            Knob::MaxNewTokens,
            Knob::TopP,
            Knob::TopK,
            Knob::RepetitionPenalty,
        ]
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            Knob::Temperature => "temp",
            Knob::MaxNewTokens => "max",
            Knob::TopP => "top-p",
            Knob::TopK => "top-k",
            Knob::RepetitionPenalty => "rep",
        }
    }

    pub(crate) fn next(self) -> Knob {
        let all = Knob::all();
        let idx = all.iter().position(|k| *k == self).unwrap_or(0);
        all[(idx + 1) % all.len()]
    }
}

impl GenerationSettings {
    pub(crate) fn clamped(self) -> Self {
        Self {
            temperature: round2(self.temperature.clamp(0.0, 1.0)),
            max_new_tokens: self.max_new_tokens.clamp(1, 500),
            top_p: round2(self.top_p.clamp(0.0, 1.0)),
            top_k: self.top_k.clamp(1, 100),
            repetition_penalty: round2(self.repetition_penalty.clamp(1.0, 2.0)),
        }
    }

    /// Moves `knob` by `steps` increments and re-clamps.
    pub(crate) fn nudge(&mut self, knob: Knob, steps: i32) {
        match knob {
            Knob::Temperature => self.temperature += 0.1 * steps as f32,
            Knob::TopP => self.top_p += 0.05 * steps as f32,
            Knob::RepetitionPenalty => self.repetition_penalty += 0.1 * steps as f32,
            Knob::MaxNewTokens => {
                self.max_new_tokens = add_signed(self.max_new_tokens, steps * 10);
            }
            Knob::TopK => self.top_k = add_signed(self.top_k, steps * 5),
        }
        *self = self.clamped();
    }

    pub(crate) fn value_label(&self, knob: Knob) -> String {
        match knob {
            Knob::Temperature => format!("{:.1}", self.temperature),
            Knob::MaxNewTokens => self.max_new_tokens.to_string(),
            Knob::TopP => format!("{:.2}", self.top_p),
            Knob::TopK => self.top_k.to_string(),
            Knob::RepetitionPenalty => format!("{:.1}", self.repetition_penalty),
        }
    }
}

fn add_signed(value: u32, delta: i32) -> u32 {
    if delta >= 0 {
        value.saturating_add(delta as u32)
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}

fn round2(v: f32) -> f32 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_service_schema() {
        let s = GenerationSettings::default();
        assert_eq!(s, s.clamped());
        assert_eq!(s.max_new_tokens, 200);
        assert_eq!(s.top_k, 50);
    }

    #[test]
    fn nudge_stays_within_service_ranges() {
        let mut s = GenerationSettings::default();
        s.nudge(Knob::Temperature, 20);
        assert_eq!(s.temperature, 1.0);
        s.nudge(Knob::TopK, -100);
        assert_eq!(s.top_k, 1);
        s.nudge(Knob::MaxNewTokens, 1000);
        assert_eq!(s.max_new_tokens, 500);
        s.nudge(Knob::RepetitionPenalty, -5);
        assert_eq!(s.repetition_penalty, 1.0);
    }

    #[test]
    fn knob_cycle_wraps() {
        assert_eq!(Knob::RepetitionPenalty.next(), Knob::Temperature);
        assert_eq!(Knob::Temperature.next(), Knob::MaxNewTokens);
    }
}
