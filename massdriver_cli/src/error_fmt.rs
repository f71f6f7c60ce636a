//! Human-readable error descriptions and structured JSON error formatting.

use massdriver_core::DriverError;
use serde_json::json;

use crate::shot::ShotError;

fn describe_driver(de: &DriverError) -> String {
    match de {
        DriverError::OutOfSequence { expected, got } => format!(
            "What happened: Stage {got} fired while stage {expected} was expected.\nLikely causes: Sense gates wired in the wrong order, a gate triggered by debris, or stage pins swapped in [[stages]].\nHow to fix: Check that [[stages]] lists gates in barrel order and that each sense pin sees only its own gate."
        ),
        DriverError::SensePin => "What happened: A gate already reads occupied.\nLikely causes: Projectile or debris in the gate, missing pull resistor, or [sense] edge inverted.\nHow to fix: Clear the gate and check [sense] mode/edge against the sensor's output.".to_string(),
        DriverError::PulseWidthExceeded { width_us, max_us } => format!(
            "What happened: A {width_us}us pulse exceeds the {max_us}us limit.\nLikely causes: Shape typo or a limit set too low.\nHow to fix: Shorten the pulse or raise limits.max_pulse_us if the coil can take it."
        ),
        DriverError::NotUnderdamped { .. } => format!(
            "What happened: {de}.\nLikely causes: Resistance at or above 2*sqrt(L/C).\nHow to fix: Lower the resistance or raise L/C; the model only covers oscillating discharges."
        ),
        DriverError::Hardware(msg) => format!(
            "What happened: Hardware access failed ({msg}).\nLikely causes: Wrong pin numbers, missing GPIO permissions, or the pin is claimed by another process.\nHow to fix: Check pin numbers in the config and run with access to /dev/gpiomem."
        ),
        other => format!(
            "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
        ),
    }
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(se) = err.downcast_ref::<ShotError>() {
        return match se {
            ShotError::Timeout { ms, stage } => format!(
                "What happened: The shot did not complete within {ms} ms (waiting on stage {stage}).\nLikely causes: Projectile stalled, a sense gate never saw it, or the timeout is too short.\nHow to fix: Check the gate wiring and [sense] edge, or raise --timeout-ms."
            ),
            ShotError::Interrupted => "What happened: Shot interrupted by Ctrl-C.\nAll actuators were forced low.".to_string(),
            ShotError::Failed { source, .. } => describe_driver(source),
        };
    }

    if let Some(de) = err.downcast_ref::<DriverError>() {
        return describe_driver(de);
    }

    // whole context chain, outermost first
    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("curve csv must have headers") {
        return "Invalid headers in curve CSV. Expected 'code,voltage'.".to_string();
    }

    if lower.contains("read config") || lower.contains("parse config") {
        return format!(
            "What happened: {msg}.\nLikely causes: Wrong --config path or TOML syntax error.\nHow to fix: Point --config at a valid file; see etc/massdriver.toml for a sample."
        );
    }

    if lower.contains("must be") || lower.contains("already in use") || lower.contains("expected 1..=") {
        return format!(
            "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
        );
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: 3 for sequencing failures, 4 for timeouts, 1 otherwise.
/// Usage errors exit with 2 from clap before reaching here.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if let Some(se) = err.downcast_ref::<ShotError>() {
        return match se {
            ShotError::Failed { .. } => 3,
            ShotError::Timeout { .. } => 4,
            ShotError::Interrupted => 1,
        };
    }
    match err.downcast_ref::<DriverError>() {
        Some(DriverError::OutOfSequence { .. } | DriverError::DriverBusy) => 3,
        _ => 1,
    }
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(se) = err.downcast_ref::<ShotError>() {
        return match se {
            ShotError::Failed { .. } => "DriverFailed",
            ShotError::Timeout { .. } => "Timeout",
            ShotError::Interrupted => "Interrupted",
        };
    }
    if err.downcast_ref::<DriverError>().is_some() {
        return "DriverError";
    }
    "Error"
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    let details = match err.downcast_ref::<ShotError>() {
        Some(ShotError::Timeout { ms, stage }) => Some(json!({ "timeout_ms": ms, "stage": stage })),
        Some(ShotError::Failed { stage, source }) => {
            Some(json!({ "stage": stage, "error": source.to_string() }))
        }
        _ => None,
    };
    let mut obj = json!({ "reason": reason_name(err), "message": humanize(err) });
    if let Some(d) = details {
        obj["details"] = d;
    }
    obj.to_string()
}
