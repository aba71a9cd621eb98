//! Async driver for UCI chess engine subprocesses.
//!
//! The driver owns a long-running engine process and mediates between it
//! and a hub application: the hub requests searches and option changes at
//! any moment, while the engine only yields control through its own
//! `bestmove` replies. The driver keeps the two coherent, discarding
//! stale results, deferring option writes to search boundaries, and
//! relaunching superseded searches exactly once per engine reply.
//!
//! All mutable state lives in a single actor task; the hub talks to it
//! through a cloneable [`DriverHandle`] and consumes a stream of
//! [`DriverEvent`]s.

pub mod config;
pub mod driver;
pub mod node;
pub mod options;
pub mod protocol;
pub mod search;
pub mod state;
pub mod transport;

pub use config::DriverConfig;
pub use driver::{Driver, DriverError, DriverHandle};
pub use node::{BoardNode, CastlingNotation, GameNode, NodeError, NodeRef};
pub use search::SearchParams;
pub use state::{DriverStatus, SearchPhase};
pub use transport::{EngineLine, Transport};

use std::fmt;
use std::path::PathBuf;

/// Events delivered from the driver actor to the hub.
#[derive(Clone)]
pub enum DriverEvent {
    /// The engine subprocess was spawned.
    EngineStarted(PathBuf),
    /// A `setoption` value was recorded or re-asserted. The key is
    /// lowercased; the value is the empty string if none has been sent
    /// for that key yet.
    OptionSent { key: String, value: String },
    /// A search concluded on the position the hub asked for. The raw
    /// `bestmove` line is forwarded together with the node it belongs to.
    BestMove { line: String, node: NodeRef },
    /// An `info` line from the currently running search.
    Info {
        line: String,
        node: NodeRef,
        cycle: u64,
        subcycle: u64,
    },
    /// A line the engine wrote to stderr, control characters stripped.
    Stderr(String),
    /// Any stdout line not consumed by the driver itself.
    Misc(String),
    /// A user-facing warning (spawn failure, lost engine connection).
    Alert(String),
}

impl fmt::Debug for DriverEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EngineStarted(path) => f.debug_tuple("EngineStarted").field(path).finish(),
            Self::OptionSent { key, value } => f
                .debug_struct("OptionSent")
                .field("key", key)
                .field("value", value)
                .finish(),
            Self::BestMove { line, .. } => f
                .debug_struct("BestMove")
                .field("line", line)
                .finish_non_exhaustive(),
            Self::Info {
                line,
                cycle,
                subcycle,
                ..
            } => f
                .debug_struct("Info")
                .field("line", line)
                .field("cycle", cycle)
                .field("subcycle", subcycle)
                .finish_non_exhaustive(),
            Self::Stderr(line) => f.debug_tuple("Stderr").field(line).finish(),
            Self::Misc(line) => f.debug_tuple("Misc").field(line).finish(),
            Self::Alert(msg) => f.debug_tuple("Alert").field(msg).finish(),
        }
    }
}
