//! User-Friendly Error Formatting
//!
//! Provides user-friendly error messages with troubleshooting hints
//! for common error scenarios.

use std::fmt::Write;

/// Format error for user consumption
///
/// Takes technical error and produces user-friendly message with
/// troubleshooting steps and context.
pub fn format_user_error(error: &anyhow::Error) -> String {
    let mut output = String::new();

    // Header
    writeln!(&mut output).ok();
    writeln!(
        &mut output,
        "╔════════════════════════════════════════════════════════════╗"
    )
    .ok();
    writeln!(
        &mut output,
        "║                     ERROR                                  ║"
    )
    .ok();
    writeln!(
        &mut output,
        "╚════════════════════════════════════════════════════════════╝"
    )
    .ok();
    writeln!(&mut output).ok();

    // Match against the whole context chain, not just the outermost message
    let error_msg = format!("{:#}", error);

    if error_msg.contains("No frame accepted within") {
        format_startup_timeout_error(&mut output);
    } else if error_msg.contains("did not stop within") {
        format_join_timeout_error(&mut output);
    } else if error_msg.contains("backend") || error_msg.contains("Encoder") {
        format_device_error(&mut output, &error_msg);
    } else if error_msg.contains("dropped") || error_msg.contains("congested") {
        format_congestion_error(&mut output);
    } else if error_msg.contains("config") || error_msg.contains("Invalid") {
        format_config_error(&mut output);
    } else {
        format_generic_error(&mut output, &error_msg);
    }

    // Technical details
    writeln!(&mut output).ok();
    writeln!(
        &mut output,
        "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━"
    )
    .ok();
    writeln!(&mut output, "Technical Details:").ok();
    writeln!(&mut output).ok();
    writeln!(&mut output, "{:#}", error).ok();
    writeln!(&mut output).ok();

    // Footer with help
    writeln!(
        &mut output,
        "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━"
    )
    .ok();
    writeln!(&mut output, "Need Help?").ok();
    writeln!(
        &mut output,
        "  - Run with --verbose for detailed logs: lamco-encode -vvv"
    )
    .ok();
    writeln!(
        &mut output,
        "  - Write logs to a file: lamco-encode --log-file encode.log"
    )
    .ok();
    writeln!(
        &mut output,
        "╚════════════════════════════════════════════════════════════╝"
    )
    .ok();

    output
}

fn format_device_error(output: &mut String, error: &str) {
    writeln!(output, "Encoder Device Error").ok();
    writeln!(output).ok();
    writeln!(output, "The encoder device could not be created or failed.").ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. Unknown backend name").ok();
    writeln!(output, "     → Check [device] backend in the config file").ok();
    writeln!(
        output,
        "     → Available: auto, {}",
        crate::encoder::available_backends().join(", ")
    )
    .ok();
    writeln!(output).ok();
    writeln!(output, "  2. Unsupported stream parameters").ok();
    writeln!(output, "     → Width and height must be even and non-zero").ok();
    writeln!(
        output,
        "     → B-frames need [device] queue_depth above the B-frame count"
    )
    .ok();
    if error.contains("Device lost") {
        writeln!(output).ok();
        writeln!(output, "  3. Device lost during encoding").ok();
        writeln!(output, "     → Stop the session and create a new one").ok();
    }
}

fn format_startup_timeout_error(output: &mut String) {
    writeln!(output, "Encoder Startup Timeout").ok();
    writeln!(output).ok();
    writeln!(
        output,
        "The encoder device did not accept the first frame in time."
    )
    .ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. Device input queue never drains").ok();
    writeln!(output, "     → Make sure packets are being retrieved").ok();
    writeln!(output).ok();
    writeln!(output, "  2. Timeout too short for the device").ok();
    writeln!(output, "     → Raise [session] startup_timeout_ms").ok();
}

fn format_join_timeout_error(output: &mut String) {
    writeln!(output, "Shutdown Timeout").ok();
    writeln!(output).ok();
    writeln!(
        output,
        "An encode worker did not stop in time and was left running."
    )
    .ok();
    writeln!(output).ok();
    writeln!(output, "Troubleshooting:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. A device call is blocking").ok();
    writeln!(output, "     → Look for 'Slow device call' warnings in the log").ok();
    writeln!(output).ok();
    writeln!(output, "  2. Timeout too short").ok();
    writeln!(output, "     → Raise [session] join_timeout_ms").ok();
}

fn format_congestion_error(output: &mut String) {
    writeln!(output, "Encoder Congestion").ok();
    writeln!(output).ok();
    writeln!(output, "Frames were dropped because the encoder fell behind.").ok();
    writeln!(output).ok();
    writeln!(output, "Troubleshooting:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. Retrieve packets more often").ok();
    writeln!(output, "  2. Lower the frame rate or resolution").ok();
    writeln!(
        output,
        "  3. Raise [session] frame_queue_capacity to absorb bursts"
    )
    .ok();
}

fn format_config_error(output: &mut String) {
    writeln!(output, "Configuration Error").ok();
    writeln!(output).ok();
    writeln!(output, "Problem with configuration file or arguments.").ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. Configuration file not found").ok();
    writeln!(
        output,
        "     → Specify: lamco-encode -c /path/to/encode.toml"
    )
    .ok();
    writeln!(output).ok();
    writeln!(output, "  2. Invalid TOML syntax").ok();
    writeln!(output, "     → Check for typos, missing quotes, etc.").ok();
    writeln!(output).ok();
    writeln!(output, "  3. Invalid values").ok();
    writeln!(output, "     → Resolution must be even, frame rate non-zero").ok();
    writeln!(
        output,
        "     → b_frame_pattern: none, one, two, three"
    )
    .ok();
    writeln!(
        output,
        "     → quality_preset: speed, balanced, quality"
    )
    .ok();
}

fn format_generic_error(output: &mut String, error: &str) {
    writeln!(output, "Encoder Error").ok();
    writeln!(output).ok();
    writeln!(output, "An error occurred while encoding.").ok();
    writeln!(output).ok();
    writeln!(output, "Error: {}", error).ok();
    writeln!(output).ok();
    writeln!(output, "Troubleshooting:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. Re-run with -vv to see session state transitions").ok();
    writeln!(output, "  2. Check the statistics printed at shutdown").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_format_user_error() {
        let error = anyhow::anyhow!("No encoder backend available: unknown backend 'nvenc'");
        let formatted = format_user_error(&error);
        assert!(formatted.contains("ERROR"));
        assert!(formatted.contains("Encoder Device Error"));
        assert!(formatted.contains("synthetic"));
    }

    #[test]
    fn test_startup_timeout_formatting() {
        let error = anyhow::anyhow!("No frame accepted within 5000ms of the first submission");
        let formatted = format_user_error(&error);
        assert!(formatted.contains("startup_timeout_ms"));
    }

    #[test]
    fn test_config_error_uses_context_chain() {
        let error = Err::<(), _>(anyhow::anyhow!("Invalid B-frame pattern: four"))
            .context("Failed to load config")
            .unwrap_err();
        let formatted = format_user_error(&error);
        assert!(formatted.contains("Configuration Error"));
        assert!(formatted.contains("four"));
    }
}
