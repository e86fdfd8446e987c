//! Connection descriptors and their on-disk registry.
//!
//! A descriptor is an ordered token list such as `com,3,115200`: transport
//! kind first, transport-specific tokens after. Learned descriptors are kept
//! one per device as `<dbDirectory>/<serial>.json`, a JSON array of the tokens.
//! A later save for the same serial overwrites the earlier record.

use crate::kkm::config::{KkmConfig, ALLOWED_BAUD_RATES};
use crate::kkm::driver::{FiscalDriver, Setting, PORT_COM, SETTING_AUTO};
use crate::kkm::error::{KkmError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const SEPARATOR: char = ',';

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Com,
    Usb,
    TcpIp,
    Bluetooth,
}

impl Transport {
    /// Accepts `com`, `usb`, `tcpip`/`ip`, `bluetooth`/`bt` (already lowercased).
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "com" => Some(Transport::Com),
            "usb" => Some(Transport::Usb),
            "tcpip" | "ip" => Some(Transport::TcpIp),
            "bluetooth" | "bt" => Some(Transport::Bluetooth),
            _ => None,
        }
    }
}

fn is_allowed_name(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

// ---------------------------------------------------------------------------
// ConnParams
// ---------------------------------------------------------------------------

/// An unverified descriptor, as typed by a user or loaded from a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnParams {
    transport: Transport,
    tokens: Vec<String>,
}

impl ConnParams {
    /// Parse the delimited wire form.
    pub fn resolve(descriptor: &str) -> Result<Self> {
        Self::from_tokens(descriptor.split(SEPARATOR).map(str::to_string).collect())
    }

    /// Validate a token list: at least two tokens and a known transport kind.
    pub fn from_tokens(mut tokens: Vec<String>) -> Result<Self> {
        if tokens.len() < 2 {
            return Err(KkmError::InvalidConnParams);
        }
        tokens[0] = tokens[0].trim().to_lowercase();
        let transport = Transport::parse(&tokens[0]).ok_or(KkmError::InvalidConnParams)?;
        Ok(Self { transport, tokens })
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Stage and commit the driver settings for this descriptor.
    ///
    /// Only the serial line transport is wired up; the others fail before the
    /// driver is touched.
    pub fn apply(&self, driver: &mut dyn FiscalDriver, config: &KkmConfig) -> Result<()> {
        match self.transport() {
            Transport::Com => self.apply_com(driver, config),
            Transport::Usb | Transport::TcpIp | Transport::Bluetooth => {
                Err(KkmError::NotImplemented)
            }
        }
    }

    fn apply_com(&self, driver: &mut dyn FiscalDriver, config: &KkmConfig) -> Result<()> {
        let port = &self.tokens[1];
        if port.is_empty() {
            return Err(KkmError::InvalidConnParams);
        }
        let com_file = if port.starts_with('/') {
            port.clone()
        } else {
            format!("COM{port}")
        };
        let baud_rate = match self.tokens.get(2) {
            None => config.default_baud_rate,
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|b| ALLOWED_BAUD_RATES.contains(b))
                .ok_or(KkmError::InvalidConnParams)?,
        };

        driver.set_setting(Setting::Port, PORT_COM);
        driver.set_setting(Setting::ComFile, &com_file);
        driver.set_setting(Setting::BaudRate, &baud_rate.to_string());
        Self::apply_common(driver, config);
        if driver.apply_settings() < 0 {
            let description = driver.error_description();
            driver.reset_error();
            return Err(KkmError::Driver(description));
        }
        debug!(com_file = %com_file, baud_rate, "Connection settings applied");
        Ok(())
    }

    fn apply_common(driver: &mut dyn FiscalDriver, config: &KkmConfig) {
        driver.set_setting(Setting::Model, SETTING_AUTO);
        if let Some(tz) = config.time_zone {
            driver.set_setting(Setting::TimeZone, &tz.code().to_string());
        }
        driver.set_setting(Setting::OfdChannel, SETTING_AUTO);
    }

    /// Persist under `serial`, overwriting any earlier record. The serial must
    /// be one `KnownConnParams::load` accepts.
    pub fn save(&self, serial: &str, config: &KkmConfig) -> Result<PathBuf> {
        let saving_error =
            || KkmError::Registry(format!("Could not save connection parameters for '{serial}'"));
        if serial.is_empty() {
            return Err(KkmError::Registry(
                "Could not save connection parameters for '-'".into(),
            ));
        }
        KnownConnParams::filter_serial_number(serial).map_err(|_| saving_error())?;
        let dir = &config.db_directory;
        if !dir.is_dir() {
            std::fs::create_dir_all(dir).map_err(|_| saving_error())?;
        }
        let path = config.descriptor_path(serial);
        let json = serde_json::to_string(&self.tokens)?;
        std::fs::write(&path, json).map_err(|_| saving_error())?;
        if !path.is_file() {
            return Err(saving_error());
        }
        info!(serial, path = %path.display(), "Connection parameters saved");
        Ok(path)
    }
}

impl fmt::Display for ConnParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = SEPARATOR.to_string();
        f.write_str(&self.tokens.join(&sep))
    }
}

// ---------------------------------------------------------------------------
// KnownConnParams
// ---------------------------------------------------------------------------

/// A descriptor bound to the serial number the device must report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownConnParams {
    params: ConnParams,
    serial_number: String,
}

impl KnownConnParams {
    pub fn new(params: ConnParams, serial_number: impl Into<String>) -> Self {
        Self {
            params,
            serial_number: serial_number.into(),
        }
    }

    /// Load the record of `serial` from the configured directory.
    pub fn load(serial: &str, config: &KkmConfig) -> Result<Self> {
        let serial = Self::filter_serial_number(serial)?;
        let path = config.descriptor_path(serial);
        Self::read(Self::filter_file_path(&path)?, serial)
    }

    /// Load a record by path; the serial number is the file stem.
    pub fn load_path(path: &Path) -> Result<Self> {
        let path = Self::filter_file_path(path)?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| invalid_file_path(path))?;
        let serial = Self::filter_serial_number(stem)?;
        Self::read(path, serial)
    }

    fn read(path: &Path, serial: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            KkmError::Registry(format!("Could not read file '{}': {e}", path.display()))
        })?;
        let tokens: Vec<String> = serde_json::from_str(&content)?;
        let params = ConnParams::from_tokens(tokens)?;
        debug!(serial, path = %path.display(), "Connection parameters loaded");
        Ok(Self::new(params, serial))
    }

    fn filter_serial_number(serial: &str) -> Result<&str> {
        if is_allowed_name(serial) {
            Ok(serial)
        } else {
            Err(KkmError::Validation("Invalid serial number".into()))
        }
    }

    fn filter_file_path(path: &Path) -> Result<&Path> {
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let stem_ok = path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(is_allowed_name);
        if is_json && stem_ok && path.is_file() {
            Ok(path)
        } else {
            Err(invalid_file_path(path))
        }
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn params(&self) -> &ConnParams {
        &self.params
    }
}

fn invalid_file_path(path: &Path) -> KkmError {
    KkmError::Registry(format!("Invalid file path '{}'", path.display()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
