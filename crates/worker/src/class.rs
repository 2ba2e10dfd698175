/// Execution classes used for tracing spawned work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Work that directly gates what a subscriber sees next (actor loops, projections).
	Interactive,
	/// Network round trips to the content backend.
	Network,
	/// Timers and long-lived forwarders that can be delayed without harm.
	Background,
}

impl TaskClass {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Interactive => "interactive",
			Self::Network => "network",
			Self::Background => "background",
		}
	}
}
