use std::env;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_MODERATION_WEBHOOK_URL: &str = "http://localhost:5678/webhook/moderation";
pub const DEFAULT_FACTCHECK_WEBHOOK_URL: &str = "http://localhost:5678/webhook/factcheck";

/// Configuration for the analysis client, passed in at construction instead
/// of living in module-level globals.
#[derive(Clone, Debug)]
pub struct AnalysisConfig {
    /// Primary analysis host.
    pub base_url: String,
    /// Workflow fallback endpoint for moderation.
    pub moderation_webhook_url: String,
    /// Workflow fallback endpoint for fact-checking.
    pub factcheck_webhook_url: String,
    /// Per-request timeout applied to every tier.
    pub request_timeout: Duration,
    /// Terms the terminal moderation heuristic matches, case-insensitively.
    /// Replaceable policy, not a fixed algorithm.
    pub denylist: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            moderation_webhook_url: DEFAULT_MODERATION_WEBHOOK_URL.to_string(),
            factcheck_webhook_url: DEFAULT_FACTCHECK_WEBHOOK_URL.to_string(),
            request_timeout: Duration::from_secs(5),
            denylist: default_denylist(),
        }
    }
}

impl AnalysisConfig {
    /// Reads `API_BASE_URL`, `MODERATION_WEBHOOK_URL` and
    /// `FACTCHECK_WEBHOOK_URL`, keeping the documented local defaults for
    /// anything unset.
    pub fn from_env() -> Self {
        let mut config = AnalysisConfig::default();
        if let Ok(url) = env::var("API_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(url) = env::var("MODERATION_WEBHOOK_URL") {
            config.moderation_webhook_url = url;
        }
        if let Ok(url) = env::var("FACTCHECK_WEBHOOK_URL") {
            config.factcheck_webhook_url = url;
        }
        config
    }
}

fn default_denylist() -> Vec<String> {
    ["toxic", "hateful", "vile"]
        .iter()
        .map(|term| (*term).to_string())
        .collect()
}

/// Reconnect timing for the dispatch channel.
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (0-based), exponential in
    /// `multiplier` and capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.min(24) as i32);
        let millis = (self.base_delay.as_millis() as f64 * exp)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

/// Configuration for the dispatch channel.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// HTTP(S) base of the realtime host; the socket URL is derived from it.
    pub base_url: String,
    /// Outgoing events buffered while disconnected before the oldest are
    /// dropped and a gap is signalled.
    pub buffer_capacity: usize,
    pub reconnect: ReconnectPolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            buffer_capacity: 256,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ChannelConfig {
    pub fn from_env() -> Self {
        let mut config = ChannelConfig::default();
        if let Ok(url) = env::var("API_BASE_URL") {
            config.base_url = url;
        }
        config
    }

    /// Socket endpoint for a room: http→ws (and https→wss) scheme swap plus
    /// the `/ws/debate/{room_id}` path.
    #[must_use]
    pub fn ws_url(&self, room_id: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("http") {
            format!("ws{rest}")
        } else {
            base.to_string()
        };
        format!("{ws_base}/ws/debate/{room_id}")
    }
}
