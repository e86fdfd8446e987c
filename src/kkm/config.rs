//! Gateway configuration.
//!
//! `KkmConfig` is a plain value loaded once per process and handed to every
//! [`Device`](super::device::Device) explicitly. Out-of-range values are clamped
//! into their bounds with a warning rather than rejected.

use crate::kkm::error::{KkmError, Result};
use crate::kkm::types::TimeZone;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Fixed polling quantum of the confirmation protocol.
pub const SLEEP_QUANTUM: Duration = Duration::from_millis(200);

/// Baseline wait unit; the default confirmation budget.
pub const BASIC_SLEEP: Duration = Duration::from_millis(1000);

pub const ALLOWED_BAUD_RATES: [u32; 11] = [
    1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600,
];

pub const MIN_LINE_LENGTH: u32 = 24;
pub const MAX_LINE_LENGTH: u32 = 192;

pub const MIN_CASH_IN_OUT: f64 = 0.01;
pub const MIN_PRICE: f64 = 0.01;
pub const MIN_QUANTITY: f64 = 0.001;

/// Bounds for the configurable ceilings (`maxCashInOut`, `maxPrice`, `maxQuantity`).
pub const MIN_CEILING: f64 = 1.0;
pub const MAX_CEILING: f64 = 1e9;

/// Environment variable naming a config file when `--config` is not given.
pub const CONFIG_ENV: &str = "KKM_CONFIG";

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Operator identity used by CLI-initiated shift operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorIdentity {
    pub name: String,
    pub inn: String,
}

impl Default for OperatorIdentity {
    fn default() -> Self {
        Self {
            name: "Operator".into(),
            inn: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KkmConfig {
    /// Directory holding one `<serial>.json` descriptor per learned device.
    pub db_directory: PathBuf,
    pub default_baud_rate: u32,
    /// Fallback receipt width when the device reports none.
    pub default_line_length: u32,
    /// Applied at connect only when configured.
    #[serde(deserialize_with = "deserialize_time_zone")]
    pub time_zone: Option<TimeZone>,
    /// Confirmation budget in milliseconds.
    pub document_closing_timeout: u64,
    pub cli_operator: OperatorIdentity,
    /// Title of the user attribute carrying the customer account.
    pub customer_account_field: String,
    pub max_cash_in_out: f64,
    pub max_price: f64,
    pub max_quantity: f64,
    /// Driver backend; only `emulator` ships with this crate.
    pub driver: String,
}

impl Default for KkmConfig {
    fn default() -> Self {
        Self {
            db_directory: PathBuf::from("kkm"),
            default_baud_rate: 115200,
            default_line_length: 42,
            time_zone: None,
            document_closing_timeout: BASIC_SLEEP.as_millis() as u64,
            cli_operator: OperatorIdentity::default(),
            customer_account_field: "Account (payment identifier):".into(),
            max_cash_in_out: 5e5,
            max_price: 3e5,
            max_quantity: 1e3,
            driver: "emulator".into(),
        }
    }
}

fn deserialize_time_zone<'de, D>(deserializer: D) -> std::result::Result<Option<TimeZone>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) => TimeZone::parse(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown time zone '{s}'"))),
    }
}

impl KkmConfig {
    /// Load from a JSON file and normalize. A missing file is an error here; the
    /// caller decides whether defaults are acceptable.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            KkmError::Validation(format!("Cannot read config {}: {e}", path.display()))
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let cfg: KkmConfig = serde_json::from_str(content)?;
        Ok(cfg.normalized())
    }

    /// Resolve the config source: explicit path, then `KKM_CONFIG`, then defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::load(p);
        }
        match std::env::var(CONFIG_ENV) {
            Ok(p) if !p.trim().is_empty() => Self::load(Path::new(p.trim())),
            _ => Ok(Self::default()),
        }
    }

    /// Clamp every bounded value into range, warning about each adjustment.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();

        if self.db_directory.as_os_str().is_empty() {
            warn!("Config: empty dbDirectory, using default");
            self.db_directory = defaults.db_directory;
        }

        if !ALLOWED_BAUD_RATES.contains(&self.default_baud_rate) {
            warn!(
                baud_rate = self.default_baud_rate,
                "Config: defaultBaudRate not allowed, using default"
            );
            self.default_baud_rate = defaults.default_baud_rate;
        }

        let line = self
            .default_line_length
            .clamp(MIN_LINE_LENGTH, MAX_LINE_LENGTH);
        if line != self.default_line_length {
            warn!(
                requested = self.default_line_length,
                applied = line,
                "Config: defaultLineLength out of range"
            );
            self.default_line_length = line;
        }

        let min_timeout = SLEEP_QUANTUM.as_millis() as u64;
        let max_timeout = 10 * BASIC_SLEEP.as_millis() as u64;
        let timeout = self.document_closing_timeout.clamp(min_timeout, max_timeout);
        if timeout != self.document_closing_timeout {
            warn!(
                requested = self.document_closing_timeout,
                applied = timeout,
                "Config: documentClosingTimeout out of range"
            );
            self.document_closing_timeout = timeout;
        }

        let name = self.cli_operator.name.trim().to_string();
        if name.is_empty() || name.chars().count() > 64 {
            warn!("Config: cliOperator.name invalid, using default");
            self.cli_operator.name = defaults.cli_operator.name;
        } else {
            self.cli_operator.name = name;
        }
        if self.cli_operator.inn.chars().count() > 12 {
            warn!("Config: cliOperator.inn too long, ignored");
            self.cli_operator.inn.clear();
        }

        self.max_cash_in_out = clamp_ceiling("maxCashInOut", self.max_cash_in_out);
        self.max_price = clamp_ceiling("maxPrice", self.max_price);
        self.max_quantity = clamp_ceiling("maxQuantity", self.max_quantity);
        self
    }

    pub fn document_closing_timeout(&self) -> Duration {
        Duration::from_millis(self.document_closing_timeout)
    }

    pub fn time_zone_configured(&self) -> bool {
        self.time_zone.is_some()
    }

    /// Path of the descriptor record for `serial`.
    pub fn descriptor_path(&self, serial: &str) -> PathBuf {
        self.db_directory.join(format!("{serial}.json"))
    }
}

fn clamp_ceiling(key: &str, value: f64) -> f64 {
    let clamped = if value.is_nan() {
        MIN_CEILING
    } else {
        value.clamp(MIN_CEILING, MAX_CEILING)
    };
    if clamped != value {
        warn!(key, requested = value, applied = clamped, "Config: ceiling out of range");
    }
    clamped
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
