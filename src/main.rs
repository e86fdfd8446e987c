mod cli;

use std::process::ExitCode;

use clap::Parser;
use serde_json::{json, Value};
use tracing::error;

use crate::cli::Cli;
use kkm_gateway::kkm::result::SUCCESS_KEY;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = kkm_gateway::init_logging(cli.global.log_level.as_deref(), cli.global.log_json) {
        eprintln!("{e}");
    }

    let answer = match cli::run(cli) {
        Ok(json) => Value::Object(json),
        Err(e) => {
            error!("{e:#}");
            json!({ "success": false, "message": format!("{e:#}") })
        }
    };

    let success = answer
        .get(SUCCESS_KEY)
        .and_then(Value::as_bool)
        .unwrap_or(false);
    match serde_json::to_string_pretty(&answer) {
        Ok(text) => println!("{text}"),
        Err(e) => {
            eprintln!("Failed to render answer: {e}");
            return ExitCode::FAILURE;
        }
    }

    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
