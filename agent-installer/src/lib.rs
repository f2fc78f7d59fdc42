// Agent service-account installer
// Main library entry point

pub mod capability;
pub mod config;
pub mod error;
pub mod installation;
pub mod journal;
pub mod models;
pub mod security;
mod smoke;
pub mod utils;

pub use config::InstallerConfig;
pub use error::InstallError;
pub use installation::eligibility::{can_install, EligibilityDecision, EligibilityReason};
pub use installation::InstallEngine;
pub use models::requests::InstallRequest;
pub use models::responses::{InstallOutcome, InstallReport, RollbackOutcome};

use log::{error, info};
use std::path::Path;

use journal::{FileStateStore, StateStore};
use models::state::MachineFacts;

/// Initialize logging system with dual format (JSON + human-readable)
pub fn init_logging(with_stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let log_dir = utils::path_resolver::resolve_log_folder()?;

    let timestamp = chrono::Utc::now().format("%Y-%m-%d-%H%M%S");

    // JSON log file for structured parsing
    let json_log_file = log_dir.join(format!("installer-{}.log", timestamp));

    // Human-readable log file (.txt)
    let txt_log_file = log_dir.join(format!("installer-{}.txt", timestamp));

    // - JSON format to .log file
    // - Human-readable format to .txt file
    // - Optional: human-readable to stdout (off when stdout carries machine-readable output)
    let mut dispatch = fern::Dispatch::new().level(log::LevelFilter::Debug);

    if with_stdout {
        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .level(log::LevelFilter::Info)
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let txt_line = utils::logging::format_human_readable_log(
                        &timestamp_local.to_string(),
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}", txt_line));
                })
                .chain(std::io::stdout()),
        );
    }

    dispatch = dispatch
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_utc = chrono::Utc::now().to_rfc3339();
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let json_line = utils::logging::format_json_log(
                        &timestamp_utc,
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}\n", json_line));
                })
                .chain(fern::log_file(json_log_file)?),
        )
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let txt_line = utils::logging::format_human_readable_log(
                        &timestamp_local.to_string(),
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}\n", txt_line));
                })
                .chain(fern::log_file(txt_log_file)?),
        );

    dispatch.apply()?;

    log::info!(
        "[PHASE: initialization] Logging initialized, log directory: {:?}",
        log_dir
    );
    Ok(())
}

fn load_config_or_exit(config_path: Option<&Path>) -> InstallerConfig {
    match InstallerConfig::load(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("[PHASE: initialization] [STEP: config] {:#}", e);
            eprintln!("Invalid installer configuration: {:#}", e);
            std::process::exit(2);
        }
    }
}

/// Non-interactive engine smoke against the simulated machine (for automated verification).
/// Writes `install_smoke_transcript.log` under the log folder and exits 0/1.
pub fn run_install_smoke(config_path: Option<&Path>) {
    if let Err(e) = init_logging(false) {
        eprintln!("Failed to initialize logging: {}", e);
    }
    info!(
        "[PHASE: initialization] Install smoke starting at {}",
        chrono::Utc::now()
    );

    let cfg = load_config_or_exit(config_path);
    let out_dir = match utils::path_resolver::resolve_log_folder() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to resolve log folder: {}", e);
            std::process::exit(1);
        }
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build();
    let result = match rt {
        Ok(rt) => rt.block_on(smoke::install_smoke(&cfg, &out_dir)),
        Err(e) => Err(anyhow::anyhow!(
            "Failed to create async runtime for install smoke: {}",
            e
        )),
    };

    match result {
        Ok((path, true)) => {
            info!(
                "[PHASE: smoke] [STEP: done] All scenarios passed; transcript at {:?}",
                path
            );
            println!("{}", path.display());
        }
        Ok((path, false)) => {
            error!(
                "[PHASE: smoke] [STEP: done] Scenario failures; see {:?}",
                path
            );
            eprintln!("Install smoke failed; transcript at {}", path.display());
            std::process::exit(1);
        }
        Err(e) => {
            error!("[PHASE: smoke] [STEP: done] Smoke exited with error: {:?}", e);
            eprintln!("Installer error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Evaluate the eligibility decision for hypothetical facts and print it as JSON.
pub fn run_plan(facts: MachineFacts, password_provided: bool, reset_requested: bool) {
    let decision = can_install(&facts, password_provided, reset_requested);
    let rendered = serde_json::json!({
        "facts": facts,
        "passwordProvided": password_provided,
        "resetRequested": reset_requested,
        "decision": decision,
        "hint": decision.reason.operator_hint(),
    });
    match serde_json::to_string_pretty(&rendered) {
        Ok(s) => println!("{}", s),
        Err(e) => {
            eprintln!("Failed to render decision: {}", e);
            std::process::exit(1);
        }
    }
    if !decision.allowed {
        std::process::exit(3);
    }
}

/// Print the install record and any unfinished attempt journals under the configured state
/// directory. Exits 4 when a journal is still waiting to be rolled back.
pub fn run_show_state(config_path: Option<&Path>) {
    let cfg = load_config_or_exit(config_path);
    let store = FileStateStore::new(cfg.state_dir.clone());

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build();
    let result = match rt {
        Ok(rt) => rt.block_on(describe_state(&store)),
        Err(e) => Err(anyhow::anyhow!("Failed to create async runtime: {}", e)),
    };

    match result {
        Ok((rendered, pending)) => {
            println!("{}", rendered);
            if pending > 0 {
                std::process::exit(4);
            }
        }
        Err(e) => {
            eprintln!("Failed to read installer state in {:?}: {:#}", store.dir(), e);
            std::process::exit(1);
        }
    }
}

/// JSON view of a state store plus the number of pending attempts.
async fn describe_state(store: &FileStateStore) -> anyhow::Result<(String, usize)> {
    let record = store.load_install_record().await?;
    let mut pending = Vec::new();
    for attempt_id in store.pending_attempts().await? {
        let entries = store.read_all(attempt_id).await?;
        pending.push(serde_json::json!({
            "attemptId": attempt_id,
            "entries": entries,
        }));
    }
    let count = pending.len();
    let rendered = serde_json::to_string_pretty(&serde_json::json!({
        "stateDir": store.dir(),
        "installRecord": record,
        "pendingAttempts": pending,
    }))?;
    Ok((rendered, count))
}

/// Print the effective configuration (defaults + file + environment) as TOML.
pub fn run_print_config(config_path: Option<&Path>) {
    let cfg = load_config_or_exit(config_path);
    match cfg.to_toml_string() {
        Ok(s) => print!("{}", s),
        Err(e) => {
            eprintln!("{:#}", e);
            std::process::exit(1);
        }
    }
}
