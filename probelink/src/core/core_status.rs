/// The state of the core as tracked by core control.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
pub enum CoreState {
    /// The state is not known. This is always the case when the core is first
    /// created, and after a failed core operation.
    #[default]
    Unknown,
    /// The core is halted. This also specifies the reason as a payload.
    Halted(HaltReason),
    /// The core is running.
    Running,
    /// A single step is in progress.
    Stepping,
    /// A reset sequence is in progress.
    Reset,
}

impl CoreState {
    /// Returns `true` if the core is currently halted.
    pub fn is_halted(&self) -> bool {
        matches!(self, CoreState::Halted(_))
    }

    /// Returns `true` if the core is currently running.
    pub fn is_running(&self) -> bool {
        self == &Self::Running
    }

    /// Core registers can only be accessed while the core is not executing.
    pub fn allows_register_access(&self) -> bool {
        matches!(self, CoreState::Halted(_) | CoreState::Stepping)
    }
}

/// The reason why a core was halted.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum HaltReason {
    /// Multiple reasons for a halt.
    ///
    /// This can happen for example when a single instruction
    /// step ends up on a breakpoint, after which both breakpoint and step / request
    /// are set.
    Multiple,
    /// Core halted due to a breakpoint instruction or comparator.
    Breakpoint,
    /// Core halted due to a vector catch, e.g. a reset with vector catch enabled.
    VectorCatch,
    /// Core halted due to a data watchpoint
    Watchpoint,
    /// Core halted after single step
    Step,
    /// Core halted because of a debugger request
    Request,
    /// External halt request
    External,
    /// Unknown reason for halt.
    ///
    /// This can happen for example when the core is already halted when we connect.
    Unknown,
}
