use std::path::PathBuf;

use agent_installer::models::state::MachineFacts;
use agent_installer::utils::logging::mask_credential_arg;

const USAGE: &str = "\
Usage: agent-installer <mode> [options]

Modes:
  --install-smoke            Run the engine against a simulated machine and write a transcript
  --plan [facts...]          Print the eligibility decision for the given facts
      --dc --user-exists --service-exists --domain-user --password --reset
  --print-config             Print the effective configuration as TOML
  --state                    Print the install record and unfinished attempt journals
                             from the state directory (exit 4 if any are pending)

Options:
  --config <path>            TOML file layered over the defaults
                             (environment: AGENT_INSTALLER__<KEY>)";

/// Value of `--name <value>` or `--name=<value>`.
fn arg_value(args: &[String], name: &str) -> Option<String> {
    let prefix = format!("{}=", name);
    let mut iter = args.iter();
    while let Some(a) = iter.next() {
        if a == name {
            return iter.next().cloned();
        }
        if let Some(v) = a.strip_prefix(&prefix) {
            return Some(v.to_string());
        }
    }
    None
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let has = |flag: &str| args.iter().any(|a| a == flag);
    let config_path = arg_value(&args, "--config").map(PathBuf::from);

    if has("--help") || has("-h") || args.len() < 2 {
        println!("{}", USAGE);
        return;
    }

    // Non-interactive engine proof mode (simulated machine + in-memory journal).
    // Writes `install_smoke_transcript.log` under the log folder and exits 0/1.
    if has("--install-smoke") {
        agent_installer::run_install_smoke(config_path.as_deref());
        return;
    }

    // Pure decision table lookup; exits 3 when the install would be rejected.
    if has("--plan") {
        let facts = MachineFacts {
            is_domain_controller: has("--dc"),
            user_exists: has("--user-exists"),
            service_exists: has("--service-exists"),
            is_domain_user: has("--domain-user"),
        };
        agent_installer::run_plan(facts, has("--password"), has("--reset"));
        return;
    }

    if has("--state") {
        agent_installer::run_show_state(config_path.as_deref());
        return;
    }

    if has("--print-config") {
        agent_installer::run_print_config(config_path.as_deref());
        return;
    }

    let shown: Vec<String> = args.iter().skip(1).map(|a| mask_credential_arg(a)).collect();
    eprintln!("Unknown arguments: {}", shown.join(" "));
    eprintln!("{}", USAGE);
    std::process::exit(2);
}
