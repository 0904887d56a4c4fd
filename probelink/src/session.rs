use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use crate::architecture::arm::core::{Armv7m, CortexMState};
use crate::architecture::arm::memory::ArmMemory;
use crate::architecture::arm::{ArmCommunicationInterface, MemoryAp};
use crate::config::{FlashConfig, SessionConfig};
use crate::error::{Error, StateError};
use crate::flashing::{FlashAlgorithm, Flasher};
use crate::probe::cmsisdap::CmsisDap;
use crate::probe::{Transport, WireProtocol};

/// The main struct of the crate: a probe attached to a target with one Cortex-M core.
///
/// All operations go through `&mut self`, so a session is driven by one
/// caller at a time. Use [`SharedSession`] to hand it between threads.
///
/// ```no_run
/// use probelink::{Session, SessionConfig};
/// # fn run(transport: Box<dyn probelink::probe::Transport>) -> Result<(), probelink::Error> {
/// let mut session = Session::attach(transport, SessionConfig::default())?;
///
/// let mut core = session.core();
/// core.halt(std::time::Duration::from_millis(100))?;
/// let pc = core.read_core_register(probelink::RegisterId::PC)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Session {
    interface: ArmCommunicationInterface,
    core_state: CortexMState,
    config: SessionConfig,
}

impl Session {
    /// Opens the probe on `transport`, connects to the target, powers up the
    /// debug port and reads the state of the core.
    #[tracing::instrument(skip(transport))]
    pub fn attach(transport: Box<dyn Transport>, config: SessionConfig) -> Result<Self, Error> {
        let mut probe = CmsisDap::new(transport, &config)?;
        probe.attach()?;

        let mut interface = ArmCommunicationInterface::new(probe, &config);
        interface.debug_port_start()?;

        let mut session = Self {
            interface,
            core_state: CortexMState::new(),
            config,
        };
        let state = session.core().status()?;
        tracing::debug!("Core is {:?}", state);

        Ok(session)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The DP/AP transaction queue.
    pub fn interface(&mut self) -> &mut ArmCommunicationInterface {
        &mut self.interface
    }

    /// The core of the target.
    pub fn core(&mut self) -> Armv7m<'_> {
        Armv7m::new(
            ArmMemory::new(&mut self.interface, MemoryAp(0)),
            &mut self.core_state,
            &self.config,
        )
    }

    /// Target memory through the first MEM-AP.
    pub fn memory(&mut self) -> ArmMemory<'_> {
        ArmMemory::new(&mut self.interface, MemoryAp(0))
    }

    /// A flasher which runs `algorithm` on the core of this session.
    pub fn flasher(&mut self, algorithm: FlashAlgorithm, config: FlashConfig) -> Flasher<'_> {
        let halt_timeout = self.config.halt_timeout;
        Flasher::new(self.core(), algorithm, config, halt_timeout)
    }

    /// Changes the SWJ clock. Fails while transfers are queued.
    pub fn set_speed(&mut self, speed_khz: u32) -> Result<u32, Error> {
        let speed = self.interface.set_speed(speed_khz)?;
        self.config.speed_khz = speed;
        Ok(speed)
    }

    /// Changes the wire protocol. Fails while transfers are queued.
    pub fn select_protocol(&mut self, protocol: WireProtocol) -> Result<(), Error> {
        self.interface.select_protocol(protocol)?;
        self.config.protocol = protocol;
        self.core_state.invalidate();
        Ok(())
    }

    /// Connects again after a protocol error. The core state becomes unknown.
    pub fn reattach(&mut self) -> Result<(), Error> {
        tracing::info!("Re-attaching to the target");
        self.core_state.invalidate();
        self.interface.reattach()?;
        Ok(())
    }

    /// Sends what is queued and disconnects from the target.
    pub fn detach(mut self) -> Result<(), Error> {
        self.interface.detach()?;
        Ok(())
    }

    /// Fails with [`StateError::BatchInFlight`] while transfers are queued.
    pub fn ensure_idle(&self) -> Result<(), Error> {
        match self.interface.pending() {
            0 => Ok(()),
            n => Err(StateError::BatchInFlight(n).into()),
        }
    }
}

/// A [`Session`] which can be shared between threads.
///
/// Only one user holds the session at a time. A second user is turned away
/// with [`Error::ConcurrentAccess`] instead of waiting.
#[derive(Debug, Clone)]
pub struct SharedSession(Arc<Mutex<Session>>);

impl SharedSession {
    pub fn new(session: Session) -> Self {
        Self(Arc::new(Mutex::new(session)))
    }

    /// Takes the session for exclusive use.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, Session>, Error> {
        match self.0.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(Error::ConcurrentAccess),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
        }
    }
}

impl From<Session> for SharedSession {
    fn from(session: Session) -> Self {
        Self::new(session)
    }
}
