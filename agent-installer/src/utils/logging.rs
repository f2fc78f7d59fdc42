// Logging utilities
// Structured logging with JSON and human-readable formats.
//
// Messages carry `[PHASE: ...] [STEP: ...]` tags; the formatters lift them into fields so the
// JSON sink can be filtered per phase (installation / rollback / uninstall / probe / journal).

use log::Level;
use serde_json::json;

/// Mask sensitive data in logs
pub fn mask_sensitive(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }

    let visible = 4;
    let start: String = chars[..visible].iter().collect();
    let end: String = chars[chars.len() - visible..].iter().collect();

    format!("{}...{}", start, end)
}

/// Mask command-line style `key=value` arguments whose key looks like a credential.
pub fn mask_credential_arg(arg: &str) -> String {
    let Some((key, _)) = arg.split_once('=') else {
        return arg.to_string();
    };
    let norm = key.trim().to_ascii_lowercase().replace([' ', '_', '-'], "");
    if norm.contains("password") || norm == "pwd" || norm.contains("secret") || norm.contains("token")
    {
        return format!("{}=***", key.trim());
    }
    arg.to_string()
}

/// Parse phase and step from log message
/// Extracts [PHASE: ...] and [STEP: ...] patterns
pub fn parse_log_metadata(message: &str) -> (Option<String>, Option<String>, String) {
    let mut phase = None;
    let mut step = None;
    let mut cleaned_message = message.to_string();

    if let Some((value, rest)) = extract_tag(&cleaned_message, "[PHASE:") {
        phase = Some(value);
        cleaned_message = rest;
    }

    if let Some((value, rest)) = extract_tag(&cleaned_message, "[STEP:") {
        step = Some(value);
        cleaned_message = rest;
    }

    (phase, step, cleaned_message)
}

fn extract_tag(message: &str, tag: &str) -> Option<(String, String)> {
    let start = message.find(tag)?;
    let end = message[start..].find(']')?;
    let value = message[start + tag.len()..start + end].trim().to_string();
    let rest = format!("{} {}", &message[..start], &message[start + end + 1..])
        .trim()
        .to_string();
    Some((value, rest))
}

/// Format log entry as JSON for structured logging
pub fn format_json_log(
    timestamp: &str,
    level: Level,
    target: &str,
    message: &str,
    phase: Option<&str>,
    step: Option<&str>,
) -> String {
    let mut log_entry = json!({
        "timestamp": timestamp,
        "level": level.as_str(),
        "target": target,
        "message": message,
    });

    if let Some(phase) = phase {
        log_entry["phase"] = json!(phase);
    }

    if let Some(step) = step {
        log_entry["step"] = json!(step);
    }

    serde_json::to_string(&log_entry).unwrap_or_else(|_| "{}".to_string())
}

/// Format log entry as human-readable text
pub fn format_human_readable_log(
    timestamp: &str,
    level: Level,
    target: &str,
    message: &str,
    phase: Option<&str>,
    step: Option<&str>,
) -> String {
    let mut log_line = format!("[{}] [{}]", timestamp, level.as_str());

    if let Some(phase) = phase {
        log_line.push_str(&format!(" [PHASE: {}]", phase));
    }

    if let Some(step) = step {
        log_line.push_str(&format!(" [STEP: {}]", step));
    }

    log_line.push_str(&format!(" [{}] {}", target, message));
    log_line
}
