//! Tracking of engine option state across search boundaries.
//!
//! Engines reject `setoption` while searching, so writes that arrive
//! mid-search are queued and flushed the moment the engine yields with
//! `bestmove`. The registry also remembers the last value sent for each
//! option so the hub's menus can reflect engine state, including for
//! options that were never actually delivered because no engine is
//! loaded.

use std::collections::HashMap;

/// Last-sent option values plus the queue of deferred `setoption` lines.
#[derive(Debug, Default)]
pub struct OptionRegistry {
    sent: HashMap<String, String>,
    pending: Vec<String>,
}

impl OptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `name -> value` and return the ack pair for the hub.
    /// Keys are lowercased; values are kept verbatim.
    pub fn record(&mut self, name: &str, value: &str) -> (String, String) {
        let key = name.to_lowercase();
        self.sent.insert(key.clone(), value.to_string());
        (key, value.to_string())
    }

    /// Defer a raw `setoption` line until the next search boundary.
    pub fn queue(&mut self, line: String) {
        self.pending.push(line);
    }

    /// Take the deferred lines, in arrival order, leaving the queue
    /// empty. The caller sends each with the force flag set.
    pub fn drain(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending)
    }

    /// Ack pair re-asserting the recorded value for `name`, or the
    /// empty string if nothing has been sent for it.
    pub fn re_ack(&self, name: &str) -> (String, String) {
        let key = name.to_lowercase();
        let value = self.sent.get(&key).cloned().unwrap_or_default();
        (key, value)
    }

    /// True iff `UCI_Chess960` has been set to the string `"true"`.
    pub fn in_960_mode(&self) -> bool {
        self.sent.get("uci_chess960").map(String::as_str) == Some("true")
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Forget everything sent. Used when a fresh engine starts, since it
    /// has not been told anything yet.
    pub fn clear(&mut self) {
        self.sent.clear();
        self.pending.clear();
    }
}

/// Extract `(name, value)` from a `setoption` line. The `name` and
/// `value` keywords are matched case-insensitively and must appear in
/// that order with a non-empty name between them; the value keeps its
/// original case. Returns `None` for button-style lines without a
/// value clause.
pub(crate) fn parse_setoption(line: &str) -> Option<(String, String)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let name_idx = tokens.iter().position(|t| t.eq_ignore_ascii_case("name"))?;
    let value_idx = tokens.iter().position(|t| t.eq_ignore_ascii_case("value"))?;
    if value_idx <= name_idx + 1 {
        return None;
    }
    let name = tokens[name_idx + 1..value_idx].join(" ");
    let value = tokens[value_idx + 1..].join(" ");
    Some((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_lowercases_key_and_keeps_value() {
        let mut registry = OptionRegistry::new();
        let (key, value) = registry.record("Syzygy Path", "/Data/TB");
        assert_eq!(key, "syzygy path");
        assert_eq!(value, "/Data/TB");
        assert_eq!(registry.re_ack("SYZYGY PATH"), (key, value));
    }

    #[test]
    fn test_re_ack_unknown_is_empty() {
        let registry = OptionRegistry::new();
        assert_eq!(registry.re_ack("Threads"), ("threads".to_string(), String::new()));
    }

    #[test]
    fn test_drain_preserves_order_and_empties() {
        let mut registry = OptionRegistry::new();
        registry.queue("setoption name A value 1".to_string());
        registry.queue("setoption name B value 2".to_string());
        let drained = registry.drain();
        assert_eq!(
            drained,
            ["setoption name A value 1", "setoption name B value 2"]
        );
        assert_eq!(registry.pending_len(), 0);
        assert!(registry.drain().is_empty());
    }

    #[test]
    fn test_960_mode_requires_exact_true() {
        let mut registry = OptionRegistry::new();
        assert!(!registry.in_960_mode());
        registry.record("UCI_Chess960", "false");
        assert!(!registry.in_960_mode());
        registry.record("UCI_Chess960", "true");
        assert!(registry.in_960_mode());
        registry.clear();
        assert!(!registry.in_960_mode());
    }

    #[test]
    fn test_parse_setoption() {
        assert_eq!(
            parse_setoption("setoption name Threads value 4"),
            Some(("Threads".to_string(), "4".to_string()))
        );
        // Multi-word names and values survive; keyword case is ignored.
        assert_eq!(
            parse_setoption("setoption NAME Skill Level VALUE 10"),
            Some(("Skill Level".to_string(), "10".to_string()))
        );
        // Value case is preserved.
        assert_eq!(
            parse_setoption("setoption name WeightsFile value /Nets/T78.pb.GZ"),
            Some(("WeightsFile".to_string(), "/Nets/T78.pb.GZ".to_string()))
        );
        // Button-style and malformed lines are not recorded.
        assert_eq!(parse_setoption("setoption name Clear Hash"), None);
        assert_eq!(parse_setoption("setoption value 4 name Threads"), None);
        assert_eq!(parse_setoption("setoption name value 4"), None);
        // An empty value clause still records.
        assert_eq!(
            parse_setoption("setoption name LogFile value"),
            Some(("LogFile".to_string(), String::new()))
        );
    }
}
