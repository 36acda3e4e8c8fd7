//! The frame scheduler: per-output frame pacing and token lifecycle.
//!
//! Each output runs its own independent frame cycle:
//!
//! ```text
//!   Idle --damage--> Collecting --budget spent--> Composing
//!    ^                                                |
//!    |<-- ack / abort -- Presenting <-- presented ----+
//! ```
//!
//! Every cycle is identified by a [`FrameToken`], minted when the cycle
//! leaves `Idle` and retired exactly once, on ack, abort, or output
//! removal. Tokens are how the rest of the session correlates
//! presentation feedback with the state snapshot a frame was composed
//! from; a token that is never retired is a leaked frame.
//!
//! The scheduler is pure bookkeeping: it decides *when* to compose, the
//! session decides *what* and talks to the backend.

use indexmap::IndexMap;
use strum::Display;
use tracing::{debug, trace, warn};

use crate::output::OutputId;

/// The phase of one output's frame cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "lowercase")]
pub enum FramePhase {
    /// No frame in flight; waiting for damage.
    #[default]
    Idle,
    /// Damage seen; batching further commits before composing.
    Collecting,
    /// Ready to be composed and handed to the backend.
    Composing,
    /// Submitted; waiting for the backend's presentation ack.
    Presenting,
}

/// Identifies one frame cycle on one output.
///
/// Tokens are unique for the lifetime of a session and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameToken(u64);

/// What the session should do for an output this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStep {
    /// Nothing to do yet.
    Wait,
    /// Compose a render list and submit it to the backend.
    Compose(FrameToken),
}

#[derive(Debug, Clone, Copy)]
struct Schedule {
    phase: FramePhase,
    token: Option<FrameToken>,
    /// Remaining collect ticks before the cycle moves to Composing.
    collect_left: u32,
}

/// Drives the frame cycle of every tracked output.
#[derive(Debug)]
pub struct FrameScheduler {
    schedules: IndexMap<OutputId, Schedule>,
    /// Tokens minted but not yet retired, and the output each belongs to.
    live: IndexMap<FrameToken, OutputId>,
    next_token: u64,
    collect_budget: u32,
}

impl FrameScheduler {
    /// Creates a scheduler that batches commits for `collect_budget`
    /// ticks before composing.
    pub fn new(collect_budget: u32) -> Self {
        Self {
            schedules: IndexMap::new(),
            live: IndexMap::new(),
            next_token: 0,
            collect_budget,
        }
    }

    /// Begins scheduling frames for an output.
    pub fn track(&mut self, output: OutputId) {
        self.schedules.insert(
            output,
            Schedule {
                phase: FramePhase::Idle,
                token: None,
                collect_left: 0,
            },
        );
    }

    /// Stops scheduling frames for an output.
    ///
    /// If a cycle is in flight its token is retired and the frame is
    /// dropped; the backend's eventual ack (if any) will be ignored.
    pub fn untrack(&mut self, output: OutputId) -> Option<FrameToken> {
        let schedule = self.schedules.shift_remove(&output)?;
        if let Some(token) = schedule.token {
            self.live.shift_remove(&token);
            warn!(
                "output {} removed in {} phase, frame {:?} dropped",
                output, schedule.phase, token
            );
            return Some(token);
        }
        None
    }

    /// The phase an output's cycle is in, if the output is tracked.
    pub fn phase(&self, output: OutputId) -> Option<FramePhase> {
        self.schedules.get(&output).map(|s| s.phase)
    }

    /// Tokens minted but not yet retired.
    ///
    /// At most one per tracked output at any instant; anything beyond
    /// that is a leak.
    pub fn live_tokens(&self) -> Vec<FrameToken> {
        self.live.keys().copied().collect()
    }

    /// Notes that damage reached an output.
    ///
    /// Starts a new cycle if the output is idle; otherwise the damage
    /// simply rides along with the cycle already in flight (it stays
    /// accumulated on the output until a later cycle picks it up).
    pub fn note_damage(&mut self, output: OutputId) -> Option<FrameToken> {
        let budget = self.collect_budget;
        let schedule = self.schedules.get_mut(&output)?;
        if schedule.phase != FramePhase::Idle {
            return None;
        }

        let token = FrameToken(self.next_token);
        self.next_token += 1;

        schedule.phase = FramePhase::Collecting;
        schedule.token = Some(token);
        schedule.collect_left = budget;
        self.live.insert(token, output);

        trace!("output {}: frame {:?} collecting", output, token);
        Some(token)
    }

    /// Advances an output's cycle by one tick.
    pub fn tick(&mut self, output: OutputId) -> FrameStep {
        let Some(schedule) = self.schedules.get_mut(&output) else {
            return FrameStep::Wait;
        };

        match schedule.phase {
            FramePhase::Collecting => {
                if schedule.collect_left > 0 {
                    schedule.collect_left -= 1;
                }
                if schedule.collect_left == 0 {
                    schedule.phase = FramePhase::Composing;
                    let token = schedule.token.expect("collecting cycle has a token");
                    return FrameStep::Compose(token);
                }
                FrameStep::Wait
            }
            _ => FrameStep::Wait,
        }
    }

    /// Records that the composed frame was handed to the backend.
    pub fn presented(&mut self, output: OutputId) {
        if let Some(schedule) = self.schedules.get_mut(&output) {
            debug_assert_eq!(schedule.phase, FramePhase::Composing);
            schedule.phase = FramePhase::Presenting;
        }
    }

    /// Aborts the cycle in flight, retiring its token.
    ///
    /// Used when presentation fails (the frame is skipped, nothing else
    /// stops) or when shutdown drains an output.
    pub fn abort(&mut self, output: OutputId) -> Option<FrameToken> {
        let schedule = self.schedules.get_mut(&output)?;
        let token = schedule.token.take()?;

        debug!("output {}: frame {:?} aborted in {} phase", output, token, schedule.phase);
        schedule.phase = FramePhase::Idle;
        schedule.collect_left = 0;
        self.live.shift_remove(&token);
        Some(token)
    }

    /// Completes the cycle on a presentation ack, retiring its token.
    ///
    /// Returns the retired token on success, or `None` if the ack was
    /// stale (the output was already removed or the cycle aborted).
    pub fn ack(&mut self, output: OutputId, success: bool) -> Option<FrameToken> {
        let schedule = self.schedules.get_mut(&output)?;
        if schedule.phase != FramePhase::Presenting {
            return None;
        }

        let token = schedule.token.take()?;
        schedule.phase = FramePhase::Idle;
        self.live.shift_remove(&token);

        if success {
            trace!("output {}: frame {:?} presented", output, token);
        } else {
            debug!("output {}: frame {:?} failed to present, skipped", output, token);
        }
        Some(token)
    }

    /// Tests whether any tracked output still has a cycle in flight.
    ///
    /// Shutdown drains until this returns false.
    pub fn any_in_flight(&self) -> bool {
        !self.live.is_empty()
    }
}
