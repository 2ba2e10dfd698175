//! Revalidation state machine.
//!
//! One machine per preview session decides when every live query refetches.
//! It is a plain struct: the session actor feeds it focus, timer and
//! connectivity inputs and acts on the transitions it reports.
//!
//! ```text
//! hit --focus/timer/pause--> stale --resume--> refresh
//!  ^                           |                  |
//!  |                     start_refresh      start_refresh
//!  |                           v                  v
//!  +-------- all tickets finished ---------- inflight
//! ```

use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RevalidateState {
	/// Content is fresh.
	#[default]
	Hit,
	/// A trigger fired; content should be refetched.
	Stale,
	/// Connectivity came back while stale; refetch now.
	Refresh,
	/// A refresh cycle is running.
	Inflight,
}

impl RevalidateState {
	/// Whether entering this state should start a refresh cycle.
	pub const fn wants_refresh(self) -> bool {
		matches!(self, Self::Stale | Self::Refresh)
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Hit => "hit",
			Self::Stale => "stale",
			Self::Refresh => "refresh",
			Self::Inflight => "inflight",
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Visibility {
	#[default]
	Visible,
	Hidden,
}

/// Completion handle returned by [`RevalidateMachine::start_refresh`].
///
/// Not `Clone`: each ticket is finished exactly once by the cycle that owns it.
#[derive(Debug, PartialEq, Eq, Hash)]
#[must_use = "a refresh ticket must be passed back to finish_refresh"]
pub struct RefreshTicket(u64);

impl RefreshTicket {
	pub const fn id(&self) -> u64 {
		self.0
	}
}

#[derive(Debug)]
pub struct RevalidateMachine {
	state: RevalidateState,
	online: bool,
	visibility: Visibility,
	paused: bool,
	next_ticket: u64,
	outstanding: BTreeSet<u64>,
}

impl Default for RevalidateMachine {
	fn default() -> Self {
		Self::new()
	}
}

impl RevalidateMachine {
	pub fn new() -> Self {
		Self {
			state: RevalidateState::Hit,
			online: true,
			visibility: Visibility::Visible,
			paused: false,
			next_ticket: 0,
			outstanding: BTreeSet::new(),
		}
	}

	pub const fn state(&self) -> RevalidateState {
		self.state
	}

	/// Offline or hidden.
	pub const fn is_paused(&self) -> bool {
		self.paused
	}

	/// Number of refreshes started but not yet finished.
	pub fn outstanding(&self) -> usize {
		self.outstanding.len()
	}

	/// Window focus. Returns the new state if it changed.
	pub fn on_focus(&mut self) -> Option<RevalidateState> {
		self.mark_stale()
	}

	/// Interval timer tick. Returns the new state if it changed.
	pub fn on_timer(&mut self) -> Option<RevalidateState> {
		self.mark_stale()
	}

	pub fn set_online(&mut self, online: bool) -> Option<RevalidateState> {
		self.online = online;
		self.update_pause()
	}

	pub fn set_visibility(&mut self, visibility: Visibility) -> Option<RevalidateState> {
		self.visibility = visibility;
		self.update_pause()
	}

	/// Enters `inflight` and returns the ticket that ends this refresh.
	pub fn start_refresh(&mut self) -> RefreshTicket {
		self.next_ticket += 1;
		self.outstanding.insert(self.next_ticket);
		self.state = RevalidateState::Inflight;
		RefreshTicket(self.next_ticket)
	}

	/// Ends one refresh. The machine returns to `hit` once no refresh is
	/// outstanding. Unknown tickets are ignored.
	pub fn finish_refresh(&mut self, ticket: RefreshTicket) -> Option<RevalidateState> {
		if !self.outstanding.remove(&ticket.0) {
			return None;
		}
		if self.outstanding.is_empty() && self.state == RevalidateState::Inflight {
			self.state = RevalidateState::Hit;
			return Some(self.state);
		}
		None
	}

	fn mark_stale(&mut self) -> Option<RevalidateState> {
		if self.state != RevalidateState::Hit {
			return None;
		}
		self.state = RevalidateState::Stale;
		Some(self.state)
	}

	fn update_pause(&mut self) -> Option<RevalidateState> {
		let paused = !self.online || self.visibility == Visibility::Hidden;
		if paused == self.paused {
			return None;
		}
		self.paused = paused;
		match (paused, self.state) {
			(true, RevalidateState::Hit) => {
				self.state = RevalidateState::Stale;
				Some(self.state)
			}
			(false, RevalidateState::Stale) => {
				self.state = RevalidateState::Refresh;
				Some(self.state)
			}
			_ => None,
		}
	}
}
