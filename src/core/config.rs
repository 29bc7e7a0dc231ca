use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

// ---------------------------------------------------------------------------
// EngineConfig: file-based config loader (leer-tranquilo.json) with env-var overrides
// ---------------------------------------------------------------------------

pub const ENV_CONFIG_PATH: &str = "LEER_TRANQUILO_CONFIG";
pub const ENV_EXPAND_REPLIES: &str = "LT_EXPAND_REPLIES";
pub const ENV_MAX_DURATION_MS: &str = "LT_MAX_DURATION_MS";
pub const ENV_VIEWPORT_ONLY: &str = "LT_VIEWPORT_ONLY";

/// Candidate detection settings (mirrors the `expansion` key in leer-tranquilo.json).
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ExpansionConfig {
    /// Locale → regular expressions matched against a control's label.
    pub patterns: BTreeMap<String, Vec<String>>,
    /// "View N replies" style labels. Only used when `expand_replies` is on.
    pub reply_patterns: Vec<String>,
    /// Open reply threads. Default: `true` (the comment widget hides most of
    /// a discussion behind "ver respuestas" controls).
    pub expand_replies: bool,
    /// Vendor attribute/class signatures that mark an expand control.
    pub vendor_selectors: Vec<String>,
    /// Vendor signatures that mark a reply-thread control.
    pub reply_vendor_selectors: Vec<String>,
    /// Labels longer than this never match: it is a comment, not a button.
    pub max_label_chars: usize,
    /// Only expand candidates intersecting the (margin-expanded) viewport.
    pub viewport_only: bool,
    pub viewport_margin_px: f64,
    /// Cap on nodes returned by each deep query.
    pub query_limit: usize,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        let patterns = [
            (
                "es",
                vec![
                    r"ver\s*m[aá]s",
                    r"mostrar\s*m[aá]s",
                    r"cargar\s*m[aá]s",
                    r"desplegar",
                    r"ampliar",
                    r"leer\s*m[aá]s",
                ],
            ),
            (
                "en",
                vec![
                    r"see\s*more",
                    r"show\s*more",
                    r"\bexpand\b",
                    r"load\s*more",
                    r"view\s*\d+\s*more",
                    r"read\s*more",
                    r"continue\s*reading",
                ],
            ),
            ("pt", vec![r"ver\s*mais", r"mostrar\s*mais", r"carregar\s*mais"]),
            ("fr", vec![r"voir\s*plus", r"afficher\s*plus", r"lire\s*la\s*suite"]),
            ("de", vec![r"mehr\s*(anzeigen|laden)", r"weiterlesen"]),
            ("it", vec![r"mostra\s*(di\s*)?pi[uù]", r"carica\s*altr"]),
        ]
        .into_iter()
        .map(|(locale, list)| {
            (
                locale.to_string(),
                list.into_iter().map(str::to_string).collect(),
            )
        })
        .collect();

        Self {
            patterns,
            reply_patterns: [
                r"more\s*repl(y|ies)",
                r"view\s*\d*\s*repl(y|ies)",
                r"show\s*\d*\s*repl(y|ies)",
                r"ver\s*\d*\s*respuestas?",
                r"mostrar\s*\d*\s*respuestas?",
                r"ver\s*\d*\s*respostas?",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            expand_replies: true,
            vendor_selectors: vec!["[data-click-to-expand]".to_string()],
            reply_vendor_selectors: vec![
                r#"[data-test-id*="repl" i]"#.to_string(),
                r#"[data-testid*="repl" i]"#.to_string(),
            ],
            max_label_chars: 80,
            viewport_only: false,
            viewport_margin_px: 600.0,
            query_limit: 5_000,
        }
    }
}

/// Scheduler cadence and termination thresholds (the `scheduler` key).
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Hard ceiling on the click budget.
    pub max_budget: u32,
    /// Budget granted back at every tick (capped at `max_budget`).
    pub budget_refill: u32,
    /// Delay after a pass that activated something.
    pub active_delay_ms: u64,
    /// Base delay after an idle pass; grows with consecutive idle ticks.
    pub idle_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Quiescence requires both this many idle ticks …
    pub freeze_idle_ticks: u32,
    /// … and this much time since the last successful activation.
    pub freeze_quiet_ms: u64,
    /// Liveness ceiling: OneShot sessions freeze after this long regardless.
    pub max_duration_ms: u64,
    /// Optional ceiling on full passes.
    pub max_passes: Option<u32>,
    /// Run a OneShot session as soon as the frame boots.
    pub auto_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_budget: 40,
            budget_refill: 20,
            active_delay_ms: 400,
            idle_delay_ms: 800,
            max_delay_ms: 4_000,
            freeze_idle_ticks: 4,
            freeze_quiet_ms: 4_000,
            max_duration_ms: 60_000,
            max_passes: None,
            auto_start: false,
        }
    }
}

/// Reading-anchor capture/restore settings (the `anchor` key).
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct AnchorConfig {
    /// Fraction of the viewport height where the reading line sits.
    pub offset_ratio: f64,
    pub snippet_chars: usize,
    pub capture_throttle_ms: u64,
    /// Scroll deltas below this are not worth a new record (jiggles, rounding).
    pub min_scroll_delta_px: f64,
    /// Added + removed nodes that count as a disruptive re-render.
    pub burst_threshold: usize,
    pub burst_window_ms: u64,
    pub burst_debounce_ms: u64,
    /// Staggered restore attempts after boot, tolerating late hydration.
    pub boot_retry_ms: Vec<u64>,
    /// Max depth of the structural selector chain.
    pub selector_depth: usize,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            offset_ratio: 0.3,
            snippet_chars: 140,
            capture_throttle_ms: 250,
            min_scroll_delta_px: 4.0,
            burst_threshold: 40,
            burst_window_ms: 1_000,
            burst_debounce_ms: 300,
            boot_retry_ms: vec![0, 400, 1_200, 2_500],
            selector_depth: 4,
        }
    }
}

/// Top-level config loaded from `leer-tranquilo.json`.
#[derive(Deserialize, Default, Clone, Debug)]
#[serde(default)]
pub struct EngineConfig {
    pub expansion: ExpansionConfig,
    pub scheduler: SchedulerConfig,
    pub anchor: AnchorConfig,
}

impl EngineConfig {
    /// Apply `LT_*` environment overrides on top of file values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(b) = env_flag(ENV_EXPAND_REPLIES) {
            self.expansion.expand_replies = b;
        }
        if let Some(b) = env_flag(ENV_VIEWPORT_ONLY) {
            self.expansion.viewport_only = b;
        }
        if let Some(ms) = std::env::var(ENV_MAX_DURATION_MS)
            .ok()
            .and_then(|v| v.trim().parse().ok())
        {
            self.scheduler.max_duration_ms = ms;
        }
        self
    }
}

fn env_flag(key: &str) -> Option<bool> {
    let v = std::env::var(key).ok()?;
    let v = v.trim().to_ascii_lowercase();
    if v.is_empty() {
        return None;
    }
    Some(!matches!(v.as_str(), "0" | "false" | "no" | "off" | "disabled"))
}

/// Load `leer-tranquilo.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `LEER_TRANQUILO_CONFIG` env var path
/// 2. `./leer-tranquilo.json`
/// 3. `../leer-tranquilo.json`
/// 4. `~/.leer-tranquilo/leer-tranquilo.json`
///
/// Missing file → `EngineConfig::default()` (silent, env overrides still apply).
/// Parse error → log a warning, use defaults.
pub fn load_config() -> EngineConfig {
    let mut candidates = vec![
        PathBuf::from("leer-tranquilo.json"),
        PathBuf::from("../leer-tranquilo.json"),
    ];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".leer-tranquilo").join("leer-tranquilo.json"));
    }
    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        candidates.insert(0, PathBuf::from(env_path));
    }

    for path in &candidates {
        let Ok(contents) = std::fs::read_to_string(path) else {
            continue; // not at this path, try next
        };
        return match serde_json::from_str::<EngineConfig>(&contents) {
            Ok(cfg) => {
                tracing::info!("leer-tranquilo.json loaded from {}", path.display());
                cfg.with_env_overrides()
            }
            Err(e) => {
                tracing::warn!(
                    "leer-tranquilo.json parse error at {}: {}; using defaults",
                    path.display(),
                    e
                );
                EngineConfig::default().with_env_overrides()
            }
        };
    }

    EngineConfig::default().with_env_overrides()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg: EngineConfig = serde_json::from_value(json!({
            "expansion": { "expand_replies": false },
            "scheduler": { "max_duration_ms": 5000 }
        }))
        .unwrap();
        assert!(!cfg.expansion.expand_replies);
        assert_eq!(cfg.scheduler.max_duration_ms, 5000);
        assert_eq!(cfg.scheduler.max_budget, 40);
        assert!(cfg.expansion.patterns.contains_key("es"));
        assert_eq!(cfg.anchor.snippet_chars, 140);
    }

    #[test]
    fn test_reply_expansion_defaults_on() {
        assert!(EngineConfig::default().expansion.expand_replies);
    }

    #[test]
    fn test_pattern_table_is_replaceable() {
        let cfg: EngineConfig = serde_json::from_value(json!({
            "expansion": { "patterns": { "nl": ["meer\\s*tonen"] } }
        }))
        .unwrap();
        assert_eq!(cfg.expansion.patterns.len(), 1);
        assert_eq!(cfg.expansion.patterns["nl"], vec!["meer\\s*tonen".to_string()]);
    }
}
