//! The driver's search-lifecycle state.
//!
//! The heart of the crate is the `{running, desired, completed}` triple
//! of [`SearchParams`] handles. `running` is what the engine is working
//! on right now, `desired` is what the hub wants, and `completed` is
//! what was running when the last `bestmove` arrived. All transitions
//! between them happen in the driver actor; this module holds the data
//! and the pure judgements over it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::DriverConfig;
use crate::node::same_node;
use crate::options::OptionRegistry;
use crate::search::SearchParams;

/// The four observable lifecycle states, derived from the triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    /// No search in flight.
    Inactive,
    /// The engine is searching exactly what the hub wants.
    Running,
    /// A `stop` is outstanding; a different search will launch on the
    /// next `bestmove`.
    Changing,
    /// A `stop` is outstanding; the driver will go idle on the next
    /// `bestmove`.
    Ending,
}

/// Point-in-time snapshot of driver state for the hub.
#[derive(Debug, Clone)]
pub struct DriverStatus {
    pub phase: SearchPhase,
    pub cycle: u64,
    pub subcycle: u64,
    pub leelaish: bool,
    pub chess960: bool,
    pub handshake_complete: bool,
    /// How long ago a `stop` was sent that has not yet been answered by
    /// a `bestmove`. A watchdog can use this to spot hung engines.
    pub unresolved_stop_age: Option<Duration>,
    pub pending_options: usize,
}

pub(crate) struct DriverState {
    pub config: DriverConfig,
    pub running: Arc<SearchParams>,
    pub desired: Arc<SearchParams>,
    pub completed: Arc<SearchParams>,
    pub registry: OptionRegistry,
    pub received_uciok: bool,
    pub received_readyok: bool,
    pub quit_requested: bool,
    /// Set once, the first time a forwarded info line carries the
    /// `VerboseMoveStats` dialect. Gates option routing and the info
    /// filter below.
    pub leelaish: bool,
    pub warned_send_failure: bool,
    pub last_send: Option<String>,
    pub unresolved_stop_time: Option<Instant>,
    pub suppress_cycle_info: Option<u64>,
    pub cycle: u64,
    pub subcycle: u64,
}

impl DriverState {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            running: SearchParams::none(),
            desired: SearchParams::none(),
            completed: SearchParams::none(),
            registry: OptionRegistry::new(),
            received_uciok: false,
            received_readyok: false,
            quit_requested: false,
            leelaish: false,
            warned_send_failure: false,
            last_send: None,
            unresolved_stop_time: None,
            suppress_cycle_info: None,
            cycle: 0,
            subcycle: 0,
        }
    }

    pub fn handshake_complete(&self) -> bool {
        self.received_uciok && self.received_readyok
    }

    pub fn phase(&self) -> SearchPhase {
        if self.running.node().is_none() {
            SearchPhase::Inactive
        } else if Arc::ptr_eq(&self.running, &self.desired) {
            SearchPhase::Running
        } else if self.desired.node().is_some() {
            SearchPhase::Changing
        } else {
            SearchPhase::Ending
        }
    }

    /// Bookkeeping for a freshly emitted `go`: the desired search is now
    /// the running one (same instance), any info suppression is lifted,
    /// and both cycle counters advance.
    pub fn note_go(&mut self) {
        self.running = self.desired.clone();
        self.suppress_cycle_info = None;
        self.cycle += 1;
        self.subcycle += 1;
    }

    /// Why an incoming info line should be dropped, if it should be.
    ///
    /// Alpha-beta engines flush garbage-short principal variations right
    /// after a `stop`, so while the desired node differs from the
    /// running one their info is suppressed; Leela-like engines keep
    /// streaming usable stats and are exempt.
    pub fn info_drop_reason(&self) -> Option<&'static str> {
        let Some(running_node) = self.running.node() else {
            return Some("no search running");
        };
        if running_node.is_destroyed() {
            return Some("running node destroyed");
        }
        if !self.leelaish {
            let same = match self.desired.node() {
                Some(desired_node) => same_node(desired_node, running_node),
                None => false,
            };
            if !same {
                return Some("between searches");
            }
        }
        if self.suppress_cycle_info == Some(self.cycle) {
            return Some("analysis forgotten for this cycle");
        }
        None
    }

    pub fn status(&self) -> DriverStatus {
        DriverStatus {
            phase: self.phase(),
            cycle: self.cycle,
            subcycle: self.subcycle,
            leelaish: self.leelaish,
            chess960: self.registry.in_960_mode(),
            handshake_complete: self.handshake_complete(),
            unresolved_stop_age: self.unresolved_stop_time.map(|t| t.elapsed()),
            pending_options: self.registry.pending_len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{BoardNode, NodeRef};

    fn state() -> DriverState {
        DriverState::new(DriverConfig::default())
    }

    fn params(node: &NodeRef, limit: Option<u64>) -> Arc<SearchParams> {
        SearchParams::new(Some(node.clone()), limit, &[])
    }

    #[test]
    fn test_phase_derivation() {
        let node: NodeRef = BoardNode::startpos();
        let mut s = state();
        assert_eq!(s.phase(), SearchPhase::Inactive);

        s.desired = params(&node, None);
        s.note_go();
        assert_eq!(s.phase(), SearchPhase::Running);

        let other: NodeRef = BoardNode::startpos();
        s.desired = params(&other, None);
        assert_eq!(s.phase(), SearchPhase::Changing);

        s.desired = SearchParams::none();
        assert_eq!(s.phase(), SearchPhase::Ending);

        s.running = SearchParams::none();
        assert_eq!(s.phase(), SearchPhase::Inactive);
    }

    #[test]
    fn test_note_go_bumps_counters_and_clears_suppression() {
        let node: NodeRef = BoardNode::startpos();
        let mut s = state();
        s.suppress_cycle_info = Some(0);
        s.desired = params(&node, Some(100));
        s.note_go();
        assert_eq!(s.cycle, 1);
        assert_eq!(s.subcycle, 1);
        assert_eq!(s.suppress_cycle_info, None);
        assert!(Arc::ptr_eq(&s.running, &s.desired));
    }

    #[test]
    fn test_info_dropped_without_search() {
        let s = state();
        assert_eq!(s.info_drop_reason(), Some("no search running"));
    }

    #[test]
    fn test_info_dropped_when_node_destroyed() {
        let node = BoardNode::startpos();
        let shared: NodeRef = node.clone();
        let mut s = state();
        s.desired = params(&shared, None);
        s.note_go();
        assert_eq!(s.info_drop_reason(), None);
        node.destroy();
        assert_eq!(s.info_drop_reason(), Some("running node destroyed"));
    }

    #[test]
    fn test_info_dropped_between_searches_unless_leelaish() {
        let node: NodeRef = BoardNode::startpos();
        let mut s = state();
        s.desired = params(&node, None);
        s.note_go();
        s.desired = SearchParams::none();
        assert_eq!(s.info_drop_reason(), Some("between searches"));
        s.leelaish = true;
        assert_eq!(s.info_drop_reason(), None);
    }

    #[test]
    fn test_info_kept_when_new_desired_shares_the_node() {
        // A limit change relaunches on the same node; its info is still
        // attributable to that node and is not suppressed.
        let node: NodeRef = BoardNode::startpos();
        let mut s = state();
        s.desired = params(&node, Some(100));
        s.note_go();
        s.desired = params(&node, Some(200));
        assert_eq!(s.phase(), SearchPhase::Changing);
        assert_eq!(s.info_drop_reason(), None);
    }

    #[test]
    fn test_info_suppressed_for_current_cycle_only() {
        let node: NodeRef = BoardNode::startpos();
        let mut s = state();
        s.desired = params(&node, None);
        s.note_go();
        s.suppress_cycle_info = Some(s.cycle);
        assert_eq!(
            s.info_drop_reason(),
            Some("analysis forgotten for this cycle")
        );
        // A new go lifts the suppression.
        s.running = SearchParams::none();
        s.desired = params(&node, None);
        s.note_go();
        assert_eq!(s.info_drop_reason(), None);
    }
}
