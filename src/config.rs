//! Environment-driven configuration and data-directory layout.
//!
//! All tunables are read once at startup into a [`Settings`] struct and
//! injected into components — no component reads the environment itself.

use std::path::PathBuf;
use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "orderdesk";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default per-call timeout for network collaborators.
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;

/// Total processing deadline for a single message.
pub const MESSAGE_DEADLINE_SECS: u64 = 300;

/// Runtime settings, resolved from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root of the on-disk state (catalog/, audit/, feedback/, health/, embeddings/).
    pub data_dir: PathBuf,

    // Mailbox. Host credentials are reserved for an injected IMAP client;
    // the bundled production mailbox consumes a Maildir.
    pub mailbox_host: Option<String>,
    pub mailbox_user: Option<String>,
    pub mailbox_password: Option<String>,
    pub mailbox_port: u16,
    pub mailbox_maildir: Option<PathBuf>,

    // ERP endpoint (Odoo-style JSON-RPC).
    pub erp_url: Option<String>,
    pub erp_db: Option<String>,
    pub erp_user: Option<String>,
    pub erp_password: Option<String>,

    // LLM provider (OpenAI-compatible HTTP).
    pub llm_api_key: Option<String>,
    pub llm_base_url: String,
    pub llm_model: String,
    pub embedding_model: String,

    // Chat gateway (operator channel).
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,

    // Supervisor cadence.
    pub poll_interval: Duration,
    pub max_consecutive_failures: u32,
    pub heartbeat_interval: Duration,
    pub sync_interval: Duration,

    // Matching thresholds.
    pub semantic_floor: f32,
    pub auto_threshold: f32,
    pub review_threshold: f32,

    // Feature gates.
    pub enable_order_creation: bool,
    pub enable_notifications: bool,
    pub immediate_retrain: bool,

    // Operator alerting.
    pub admin_alert_address: Option<String>,

    // Extraction guards.
    pub own_company_aliases: Vec<String>,
    pub generic_nouns: Vec<String>,

    // Worker sizing.
    pub processing_workers: usize,
    pub line_item_fanout: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            mailbox_host: None,
            mailbox_user: None,
            mailbox_password: None,
            mailbox_port: 993,
            mailbox_maildir: None,
            erp_url: None,
            erp_db: None,
            erp_user: None,
            erp_password: None,
            llm_api_key: None,
            llm_base_url: "https://api.openai.com/v1".to_string(),
            llm_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            telegram_bot_token: None,
            telegram_chat_id: None,
            poll_interval: Duration::from_secs(60),
            max_consecutive_failures: 3,
            heartbeat_interval: Duration::from_secs(300),
            sync_interval: Duration::from_secs(1800),
            semantic_floor: 0.60,
            auto_threshold: 0.95,
            review_threshold: 0.75,
            enable_order_creation: false,
            enable_notifications: true,
            immediate_retrain: false,
            admin_alert_address: None,
            own_company_aliases: Vec::new(),
            generic_nouns: default_generic_nouns(),
            processing_workers: 1,
            line_item_fanout: 4,
        }
    }
}

impl Settings {
    /// Resolve settings from the process environment.
    pub fn from_env() -> Self {
        let mut s = Settings::default();

        if let Some(dir) = env_string("ORDERDESK_DATA_DIR") {
            s.data_dir = PathBuf::from(dir);
        }

        s.mailbox_host = env_string("MAILBOX_HOST");
        s.mailbox_user = env_string("MAILBOX_USER");
        s.mailbox_password = env_string("MAILBOX_PASSWORD");
        if let Some(port) = env_parse::<u16>("MAILBOX_PORT") {
            s.mailbox_port = port;
        }
        s.mailbox_maildir = env_string("MAILBOX_MAILDIR").map(PathBuf::from);

        s.erp_url = env_string("ERP_URL");
        s.erp_db = env_string("ERP_DB");
        s.erp_user = env_string("ERP_USER");
        s.erp_password = env_string("ERP_PASSWORD");

        s.llm_api_key = env_string("LLM_API_KEY");
        if let Some(url) = env_string("LLM_BASE_URL") {
            s.llm_base_url = url;
        }
        if let Some(model) = env_string("LLM_MODEL") {
            s.llm_model = model;
        }
        if let Some(model) = env_string("EMBEDDING_MODEL") {
            s.embedding_model = model;
        }

        s.telegram_bot_token = env_string("TELEGRAM_BOT_TOKEN");
        s.telegram_chat_id = env_string("TELEGRAM_CHAT_ID");

        if let Some(secs) = env_parse::<u64>("POLL_INTERVAL_SECONDS") {
            s.poll_interval = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse::<u32>("MAX_CONSECUTIVE_FAILURES") {
            s.max_consecutive_failures = n.max(1);
        }
        if let Some(secs) = env_parse::<u64>("HEARTBEAT_INTERVAL_SECONDS") {
            s.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("SYNC_INTERVAL_SECONDS") {
            s.sync_interval = Duration::from_secs(secs);
        }

        if let Some(v) = env_parse::<f32>("SEMANTIC_FLOOR") {
            s.semantic_floor = v;
        }
        if let Some(v) = env_parse::<f32>("AUTO_THRESHOLD") {
            s.auto_threshold = v;
        }
        if let Some(v) = env_parse::<f32>("REVIEW_THRESHOLD") {
            s.review_threshold = v;
        }

        if let Some(v) = env_bool("ENABLE_ORDER_CREATION") {
            s.enable_order_creation = v;
        }
        if let Some(v) = env_bool("ENABLE_NOTIFICATIONS") {
            s.enable_notifications = v;
        }
        if let Some(v) = env_bool("IMMEDIATE_RETRAIN") {
            s.immediate_retrain = v;
        }

        s.admin_alert_address = env_string("ADMIN_ALERT_ADDRESS");

        if let Some(aliases) = env_string("OWN_COMPANY_ALIASES") {
            s.own_company_aliases = split_list(&aliases);
        }
        if let Some(nouns) = env_string("GENERIC_NOUNS") {
            s.generic_nouns = split_list(&nouns);
        }

        if let Some(n) = env_parse::<usize>("PROCESSING_WORKERS") {
            s.processing_workers = n.clamp(1, 4);
        }
        if let Some(n) = env_parse::<usize>("LINE_ITEM_FANOUT") {
            s.line_item_fanout = n.clamp(1, 8);
        }

        s
    }

    pub fn catalog_dir(&self) -> PathBuf {
        self.data_dir.join("catalog")
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.data_dir.join("audit")
    }

    pub fn feedback_dir(&self) -> PathBuf {
        self.data_dir.join("feedback")
    }

    pub fn health_dir(&self) -> PathBuf {
        self.data_dir.join("health")
    }

    pub fn embeddings_dir(&self) -> PathBuf {
        self.data_dir.join("embeddings")
    }

    pub fn maildir(&self) -> PathBuf {
        self.mailbox_maildir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("mailbox"))
    }
}

/// Default data directory: ~/orderdesk (user-visible).
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("orderdesk")
}

/// Default log filter when RUST_LOG is unset.
pub fn default_log_filter() -> String {
    format!("{APP_NAME}=info,warn")
}

/// Domain nouns that must never be treated as product codes.
fn default_generic_nouns() -> Vec<String> {
    [
        "tape", "blade", "seal", "foil", "roll", "sleeve", "klebeband",
        "messer", "dichtung", "folie", "rolle",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.trim().parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    env_string(key).map(|v| {
        matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
