// src/utils/log.rs

//! Operator-facing console sections.
//!
//! Everything goes through the `log` facade at `info`, so `RUST_LOG`
//! filtering applies to these lines like any other.

const RULE_WIDTH: usize = 60;

/// Log a header
pub fn header(title: &str) {
    let border = "═".repeat(RULE_WIDTH);
    log::info!("{border}");
    log::info!("  {title}");
    log::info!("{border}");
}

/// Log a step in a process
pub fn step(step_num: usize, total: usize, message: &str) {
    log::info!("[STEP {step_num}/{total}] {message}");
}

/// Log a sub-item (indented)
pub fn sub_item(message: &str) {
    log::info!("    {message}");
}

/// Log a separator line
pub fn separator() {
    log::info!("{}", "─".repeat(RULE_WIDTH));
}

/// Log a summary section
pub fn summary(title: &str, items: &[(&str, String)]) {
    for line in summary_lines(title, items) {
        log::info!("{line}");
    }
}

fn summary_lines(title: &str, items: &[(&str, String)]) -> Vec<String> {
    let width = items.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    std::iter::once(format!("[SUMMARY] {title}"))
        .chain(
            items
                .iter()
                .map(|(key, value)| format!("    {key:<width$}  {value}")),
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_aligns_values() {
        let lines = summary_lines(
            "Run",
            &[("new", "3".to_string()), ("unchanged", "10".to_string())],
        );
        assert_eq!(lines[0], "[SUMMARY] Run");
        assert_eq!(lines[1], "    new        3");
        assert_eq!(lines[2], "    unchanged  10");
    }
}
