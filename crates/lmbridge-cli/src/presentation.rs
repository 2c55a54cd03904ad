//! Table formatting for CLI output.

use std::fmt::Write;

use lmbridge_core::{ModelCapabilities, PoolSnapshot};

const ID_WIDTH: usize = 40;

/// Truncates a string to at most `max_len` characters, adding "..." if needed.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Comma-separated capability tags, or `-` for a text-only model.
pub fn capability_flags(model: &ModelCapabilities) -> String {
    let flags: Vec<&str> = [
        (model.supports_vision, "vision"),
        (model.supports_tools, "tools"),
        (model.supports_multimodal, "multimodal"),
    ]
    .into_iter()
    .filter_map(|(on, name)| on.then_some(name))
    .collect();
    if flags.is_empty() {
        "-".to_string()
    } else {
        flags.join(",")
    }
}

/// The pool as an aligned table, best tier first.
pub fn format_pool(snapshot: &PoolSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<ID_WIDTH$}  {:<10}  {:>8}  {:>9}  CAPABILITIES",
        "MODEL", "TIER", "SCORE", "CONTEXT"
    );
    let _ = writeln!(out, "{}", "-".repeat(ID_WIDTH + 47));
    for (tier, model) in snapshot.pool.iter() {
        let _ = writeln!(
            out,
            "{:<ID_WIDTH$}  {:<10}  {:>8.1}  {:>9}  {}",
            truncate_string(&model.id, ID_WIDTH),
            tier.as_str(),
            model.score(),
            model.max_input_tokens,
            capability_flags(model),
        );
    }
    out
}
