use std::time::Duration;

use super::report::{SectorFailure, VerifySummary};

/// A structure to manage the flashing procedure progress reporting.
///
/// This struct stores a handler closure which will be called everytime an event happens during the flashing process.
///
/// # Example
///
/// ```
/// use probelink::flashing::FlashProgress;
///
/// // Print events
/// let progress = FlashProgress::new(|event| println!("Event: {:#?}", event));
/// ```
pub struct FlashProgress {
    handler: Box<dyn Fn(ProgressEvent) + Send>,
}

impl Default for FlashProgress {
    fn default() -> Self {
        Self::new(|_| {})
    }
}

impl std::fmt::Debug for FlashProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FlashProgress")
    }
}

impl FlashProgress {
    /// Create a new `FlashProgress` structure with a given `handler` to be called on events.
    pub fn new(handler: impl Fn(ProgressEvent) + Send + 'static) -> Self {
        Self {
            handler: Box::new(handler),
        }
    }

    fn emit(&self, event: ProgressEvent) {
        (self.handler)(event);
    }

    pub(super) fn sector_started(&self, address: u64, size: u64) {
        self.emit(ProgressEvent::SectorStarted { address, size });
    }

    pub(super) fn sector_finished(&self, address: u64, size: u64, time: Duration) {
        self.emit(ProgressEvent::SectorFinished {
            address,
            size,
            time,
        });
    }

    pub(super) fn sector_unchanged(&self, address: u64, size: u64) {
        self.emit(ProgressEvent::SectorUnchanged { address, size });
    }

    pub(super) fn sector_failed(&self, address: u64, failure: SectorFailure, attempts: u32) {
        self.emit(ProgressEvent::SectorFailed {
            address,
            failure,
            attempts,
        });
    }

    pub(super) fn verify_finished(&self, summary: VerifySummary) {
        self.emit(ProgressEvent::VerifyFinished { summary });
    }
}

/// Possible events during the flashing process.
///
/// Every sector reports `SectorStarted` followed by one of `SectorFinished`,
/// `SectorUnchanged` or `SectorFailed`. `VerifyFinished` comes last when
/// verification is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    SectorStarted {
        address: u64,
        size: u64,
    },
    /// The sector was erased and programmed.
    SectorFinished {
        address: u64,
        size: u64,
        /// The time it took to erase and program this sector.
        time: Duration,
    },
    /// The sector already held the planned data.
    SectorUnchanged {
        address: u64,
        size: u64,
    },
    /// All attempts for the sector failed.
    SectorFailed {
        address: u64,
        failure: SectorFailure,
        attempts: u32,
    },
    VerifyFinished {
        summary: VerifySummary,
    },
}
