//! Runtime tunables for a driver instance.

/// Hub-supplied configuration, read when commands are translated to wire
/// traffic. All fields are plain values; the hub rebuilds the driver to
/// change them.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Log outgoing `position` commands. These can be very long in deep
    /// games, so they are omitted from the log by default.
    pub log_positions: bool,
    /// Log incoming `info` lines. Off by default since engines emit
    /// hundreds per second.
    pub log_info_lines: bool,
    /// Interpret a search limit as `go movetime <n>` milliseconds
    /// instead of `go nodes <n>`.
    pub use_movetime: bool,
    /// Allow `searchmoves` restrictions to be appended to `go` commands.
    pub searchmoves_buttons: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            log_positions: false,
            log_info_lines: false,
            use_movetime: false,
            searchmoves_buttons: true,
        }
    }
}
