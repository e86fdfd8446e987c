//! Clap derive structures and dispatch for `kkmop`.
//!
//! Every command prints exactly one JSON object on stdout. Logs go to stderr
//! and the rolling log file.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use kkm_gateway::handler::{Handler, Method, Request};
use kkm_gateway::kkm::driver::DriverFactory;
use kkm_gateway::kkm::emulator::EmulatedDevice;
use kkm_gateway::kkm::result::{MESSAGE_KEY, OK, SUCCESS_KEY};
use kkm_gateway::kkm::{merge_all, KkmConfig, OperationResult};
use kkm_gateway::{about_info, ports};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// kkmop -- fiscal register operations from the command line
#[derive(Debug, Parser)]
#[command(
    name = "kkmop",
    version,
    about = "Operate fiscal cash registers (KKM) from the command line",
    long_about = "Learns device connection parameters, registers receipts and cash\n\
        documents, closes shifts and prints reports. Each command prints one\n\
        JSON object; the exit status is 0 only when it reports success.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Configuration file (JSON)
    #[arg(long, env = "KKM_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `info,kkm_gateway=trace` (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Serial number reported by the bundled emulator
    #[arg(
        long,
        env = "KKM_EMULATE_SERIAL",
        default_value = "00106700000001",
        global = true
    )]
    pub emulate_serial: String,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SerialArg {
    /// Serial number of a learned device
    pub serial: String,
}

#[derive(Debug, Args)]
pub struct PayloadArgs {
    /// Serial number of a learned device
    pub serial: String,

    /// Details as a JSON object, or `-` to read it from stdin
    pub payload: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Probe connection descriptors (e.g. `com,3` or `com,/dev/ttyUSB0,115200`)
    /// and remember each device under its serial number
    Learn {
        #[arg(required = true)]
        descriptors: Vec<String>,
    },

    #[command(flatten)]
    Device(DeviceCommand),

    /// List serial ports with a suggested descriptor
    Ports,

    /// Print the effective configuration
    ShowConfig,

    /// Print version and build information
    Version,
}

/// Commands that run one session against a learned device.
#[derive(Debug, Subcommand)]
pub enum DeviceCommand {
    /// Device status only
    BaseStatus(SerialArg),

    /// Status, shift, receipt, cash, OFD exchange, last documents and errors
    Status(SerialArg),

    /// Everything `status` reports plus storage, registration and versions
    FullStatus(SerialArg),

    /// Cash drawer statistics
    CashStat(SerialArg),

    /// Print the demo report
    DemoPrint(SerialArg),

    /// Print the device information report
    Info(SerialArg),

    /// Print the fiscal storage registrations report
    FnRegs(SerialArg),

    /// Print the OFD exchange status report
    OfdStatus(SerialArg),

    /// Print the OFD connection test
    OfdTest(SerialArg),

    /// Print the unsent shift close reports
    ShiftReports(SerialArg),

    /// Reprint the last document
    LastDocument(SerialArg),

    /// Print a non-fiscal document
    PrintDoc(PayloadArgs),

    /// Register a sale receipt
    Sell(PayloadArgs),

    /// Register a sale return receipt
    SellReturn(PayloadArgs),

    /// Register a cash income
    CashIn(PayloadArgs),

    /// Register a cash outcome
    CashOut(PayloadArgs),

    /// Print an X report
    ReportX(SerialArg),

    /// Close the shift (Z report)
    #[command(alias = "report-z")]
    CloseShift(SerialArg),

    /// Cancel any open receipt, withdraw the drawer and close the shift
    ResetState(SerialArg),
}

impl DeviceCommand {
    /// Build the request. Payloads are read here, so `-` consumes stdin.
    fn into_request(self, config: &KkmConfig) -> anyhow::Result<Request> {
        let request = match self {
            Self::BaseStatus(a) => device(Method::Get, "base-status", a),
            Self::Status(a) => device(Method::Get, "status", a),
            Self::FullStatus(a) => device(Method::Get, "full-status", a),
            Self::CashStat(a) => device(Method::Get, "cash-stat", a),

            Self::DemoPrint(a) => device(Method::Post, "print-demo", a),
            Self::Info(a) => device(Method::Post, "print-info", a),
            Self::FnRegs(a) => device(Method::Post, "print-fn-registrations", a),
            Self::OfdStatus(a) => device(Method::Post, "print-ofd-exchange-status", a),
            Self::OfdTest(a) => device(Method::Post, "print-ofd-test", a),
            Self::ShiftReports(a) => device(Method::Post, "print-close-shift-reports", a),
            Self::LastDocument(a) => device(Method::Post, "print-last-document", a),

            Self::PrintDoc(a) => with_payload("print-non-fiscal-doc", a)?,
            Self::Sell(a) => with_payload("sell", a)?,
            Self::SellReturn(a) => with_payload("sell-return", a)?,
            Self::CashIn(a) => with_payload("cash-in", a)?,
            Self::CashOut(a) => with_payload("cash-out", a)?,

            Self::ReportX(a) => shift(config, "report-x", a, false, false),
            Self::CloseShift(a) => shift(config, "close-shift", a, true, false),
            Self::ResetState(a) => shift(config, "reset-state", a, true, true),
        };
        Ok(request)
    }
}

// ── Dispatch ─────────────────────────────────────────────────────────

/// Run one command. Returns the JSON answer; `Err` only for failures that
/// happen before any device is touched (bad config, unreadable payload).
pub fn run(cli: Cli) -> anyhow::Result<Map<String, Value>> {
    let Cli { global, command } = cli;
    match command {
        Command::Ports => {
            let ports = ports::list_ports().map_err(anyhow::Error::msg)?;
            let mut json = ok_object();
            json.insert("ports".into(), serde_json::to_value(ports)?);
            Ok(json)
        }
        Command::Version => {
            let mut json = ok_object();
            if let Value::Object(about) = about_info() {
                json.extend(about);
            }
            Ok(json)
        }
        Command::ShowConfig => {
            let config = load_config(&global)?;
            let mut json = ok_object();
            json.insert("config".into(), serde_json::to_value(&config)?);
            Ok(json)
        }
        Command::Learn { descriptors } => {
            let handler = build_handler(&global)?;
            Ok(learn(&handler, &descriptors))
        }
        Command::Device(command) => {
            let handler = build_handler(&global)?;
            debug!(command = ?command, "dispatching command");
            let request = command.into_request(handler.config())?;
            match handler.handle(&request).body {
                Value::Object(json) => Ok(json),
                other => bail!("Unexpected response body: {other}"),
            }
        }
    }
}

fn load_config(global: &GlobalOpts) -> anyhow::Result<KkmConfig> {
    KkmConfig::resolve(global.config.as_deref()).context("Failed to load config")
}

fn build_handler(global: &GlobalOpts) -> anyhow::Result<Handler> {
    let config = load_config(global)?;
    let factory = driver_factory(&config, global)?;
    Ok(Handler::new(Arc::new(config), factory))
}

fn ok_object() -> Map<String, Value> {
    let mut json = Map::new();
    json.insert(SUCCESS_KEY.into(), Value::Bool(true));
    json.insert(MESSAGE_KEY.into(), Value::String(OK.into()));
    json
}

fn driver_factory(config: &KkmConfig, global: &GlobalOpts) -> anyhow::Result<DriverFactory> {
    match config.driver.as_str() {
        "emulator" => Ok(EmulatedDevice::new(&global.emulate_serial).factory()),
        other => bail!("Unsupported driver '{other}'"),
    }
}

fn learn(handler: &Handler, descriptors: &[String]) -> Map<String, Value> {
    let results: Vec<OperationResult> = descriptors
        .iter()
        .enumerate()
        .map(|(i, descriptor)| {
            let prefix = format!("PP [{}]: ", i + 1);
            handler
                .learn_descriptor(descriptor, prefix.clone())
                .unwrap_or_else(|e| {
                    warn!("{}Learning '{}' failed: {}", prefix, descriptor, e);
                    OperationResult::from(&e)
                })
        })
        .collect();
    merge_all(&results)
}

fn device(method: Method, action: &str, arg: SerialArg) -> Request {
    Request::new(method, format!("kkm/{action}")).serial(arg.serial)
}

fn with_payload(action: &str, args: PayloadArgs) -> anyhow::Result<Request> {
    let raw = if args.payload == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read payload from stdin")?;
        buf
    } else {
        args.payload
    };
    let details: Value = serde_json::from_str(&raw).context("Payload is not valid JSON")?;
    Ok(Request::new(Method::Post, format!("kkm/{action}"))
        .serial(args.serial)
        .details(details))
}

/// Shift commands run as the operator configured for the command line.
fn shift(config: &KkmConfig, action: &str, arg: SerialArg, close_shift: bool, cash_out: bool) -> Request {
    let operator = &config.cli_operator;
    let mut identity = json!({ "name": operator.name });
    if !operator.inn.is_empty() {
        identity["inn"] = Value::String(operator.inn.clone());
    }
    device(Method::Post, action, arg).details(json!({
        "operator": identity,
        "closeShift": close_shift,
        "cashOut": cash_out,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_report_z_is_close_shift() {
        let cli = Cli::try_parse_from(["kkmop", "report-z", "00106700000001"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Device(DeviceCommand::CloseShift(_))
        ));
    }

    #[test]
    fn test_learn_requires_descriptor() {
        assert!(Cli::try_parse_from(["kkmop", "learn"]).is_err());
        let cli = Cli::try_parse_from(["kkmop", "learn", "com,3", "com,4"]).unwrap();
        match cli.command {
            Command::Learn { descriptors } => assert_eq!(descriptors, ["com,3", "com,4"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_shift_details_use_cli_operator() {
        let mut config = KkmConfig::default();
        config.cli_operator.name = "Night Shift".into();
        let request = shift(
            &config,
            "reset-state",
            SerialArg {
                serial: "00106700000001".into(),
            },
            true,
            true,
        );
        assert_eq!(request.path, "kkm/reset-state");
        assert_eq!(request.details["operator"], json!({ "name": "Night Shift" }));
        assert_eq!(request.details["closeShift"], true);
        assert_eq!(request.details["cashOut"], true);
    }

    #[test]
    fn test_version_runs_without_config() {
        let cli = Cli::try_parse_from(["kkmop", "--config", "/nonexistent/kkm.json", "version"])
            .unwrap();
        let json = run(cli).unwrap();
        assert_eq!(json[SUCCESS_KEY], true);
        assert_eq!(json["name"], "kkm-gateway");

        let cli = Cli::try_parse_from(["kkmop", "--config", "/nonexistent/kkm.json", "show-config"])
            .unwrap();
        let err = run(cli).unwrap_err();
        assert_eq!(err.to_string(), "Failed to load config");
    }

    #[test]
    fn test_device_commands_map_to_requests() {
        let config = KkmConfig::default();
        let cli = Cli::try_parse_from(["kkmop", "report-x", "00106700000001"]).unwrap();
        let Command::Device(command) = cli.command else {
            panic!("report-x is a device command");
        };
        let request = command.into_request(&config).unwrap();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.path, "kkm/report-x");
        assert_eq!(request.serial.as_deref(), Some("00106700000001"));
        assert_eq!(request.details["closeShift"], false);

        let cli = Cli::try_parse_from(["kkmop", "cash-stat", "00106700000001"]).unwrap();
        let Command::Device(command) = cli.command else {
            panic!("cash-stat is a device command");
        };
        let request = command.into_request(&config).unwrap();
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.path, "kkm/cash-stat");
    }

    #[test]
    fn test_unknown_driver_is_rejected() {
        let config = KkmConfig {
            driver: "atol".into(),
            ..KkmConfig::default()
        };
        let global = GlobalOpts {
            config: None,
            log_level: None,
            log_json: false,
            emulate_serial: "1".into(),
        };
        let err = driver_factory(&config, &global).err().unwrap();
        assert_eq!(err.to_string(), "Unsupported driver 'atol'");
    }
}
