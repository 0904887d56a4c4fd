//! CMSIS-DAP protocol engine.
//!
//! Turns a packet [`Transport`] into batched DP/AP register transfers, with
//! packet splitting, WAIT retry and fault classification.
pub mod commands;

use std::{thread, time::Duration};

use commands::{
    general::{
        connect::ConnectRequest,
        disconnect::DisconnectRequest,
        host_status::HostStatusRequest,
        info::{Capabilities, CapabilitiesCommand, FirmwareVersionCommand, PacketCountCommand},
        reset::ResetRequest,
    },
    swd,
    swj::{clock::SwjClockRequest, sequence::SequenceRequest},
    transfer::{
        configure::ConfigureRequest, transfers_per_packet, Ack, BlockKind, Transfer,
        TransferBlockRequest, TransferError, TransferRequest,
    },
    CmsisDapDevice, CmsisDapError, CommandId, Request, Status,
};

use crate::{
    architecture::arm::PortType,
    config::SessionConfig,
    probe::{DebugProbeError, Transport, WireProtocol},
};

/// Result of one transfer of a batch. Reads carry their value.
pub type TransferResult = Result<Option<u32>, TransferError>;

/// How the host retries transfers the target answered with WAIT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub retries: u32,
    pub backoff: Duration,
    pub backoff_max: Duration,
}

impl WaitPolicy {
    fn from_config(config: &SessionConfig) -> Self {
        Self {
            retries: config.wait_retries,
            backoff: config.wait_backoff,
            backoff_max: config.wait_backoff_max,
        }
    }
}

/// Tracks retries and the doubling backoff of a single call.
///
/// The retry bound covers the whole call, replays after partial progress included.
struct Backoff {
    policy: WaitPolicy,
    attempts: u32,
    next: Duration,
}

impl Backoff {
    fn new(policy: WaitPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            next: policy.backoff,
        }
    }

    /// Sleeps before the next retry, or returns `false` once the retries are used up.
    fn wait(&mut self) -> bool {
        if self.attempts >= self.policy.retries {
            return false;
        }
        self.attempts += 1;
        thread::sleep(self.next);
        self.next = (self.next * 2).min(self.policy.backoff_max);
        true
    }
}

/// Failure of a block transfer.
#[derive(Debug, thiserror::Error)]
pub enum BlockTransferError {
    #[error("Block transfer failed after {completed} words")]
    Transfer {
        error: TransferError,
        completed: usize,
    },
    #[error(transparent)]
    Probe(#[from] CmsisDapError),
}

pub struct CmsisDap {
    device: CmsisDapDevice,
    protocol: WireProtocol,

    packet_count: u8,
    capabilities: Capabilities,
    firmware_version: Option<String>,
    connected: bool,
    reconnect_required: bool,

    /// Speed in kHz
    speed_khz: u32,
    probe_wait_retry: u16,
    wait: WaitPolicy,

    /// Zero based JTAG device index, ignored for SWD.
    dap_index: u8,
}

impl std::fmt::Debug for CmsisDap {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("CmsisDap")
            .field("protocol", &self.protocol)
            .field("packet_size", &self.device.packet_size())
            .field("packet_count", &self.packet_count)
            .field("capabilities", &self.capabilities)
            .field("firmware_version", &self.firmware_version)
            .field("connected", &self.connected)
            .field("speed_khz", &self.speed_khz)
            .finish()
    }
}

impl CmsisDap {
    /// Opens the engine on a transport and reads the probe information.
    ///
    /// The target is not touched until [`CmsisDap::attach`].
    pub fn new(
        transport: Box<dyn Transport>,
        config: &SessionConfig,
    ) -> Result<Self, DebugProbeError> {
        let mut device = CmsisDapDevice::new(transport, config.packet_timeout);

        // Discard anything left in buffer, as otherwise
        // we'll get out of sync between requests and responses.
        device.drain();

        let packet_size = device.find_packet_size()?;
        device.drain();

        let packet_count = commands::send_command(&mut device, &PacketCountCommand {})?;
        let capabilities = commands::send_command(&mut device, &CapabilitiesCommand {})?;
        let firmware_version = commands::send_command(&mut device, &FirmwareVersionCommand {})
            .ok()
            .flatten();
        tracing::debug!(
            "Probe: packet size {}, packet count {}, {:?}, firmware {:?}",
            packet_size,
            packet_count,
            capabilities,
            firmware_version
        );

        if !capabilities.supports(config.protocol) {
            return Err(DebugProbeError::UnsupportedProtocol(config.protocol));
        }

        Ok(Self {
            device,
            protocol: config.protocol,
            packet_count,
            capabilities,
            firmware_version,
            connected: false,
            reconnect_required: false,
            speed_khz: config.speed_khz,
            probe_wait_retry: config.probe_wait_retry,
            wait: WaitPolicy::from_config(config),
            dap_index: 0,
        })
    }

    pub fn packet_size(&self) -> usize {
        self.device.packet_size()
    }

    pub fn packet_count(&self) -> u8 {
        self.packet_count
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn firmware_version(&self) -> Option<&str> {
        self.firmware_version.as_deref()
    }

    pub fn protocol(&self) -> WireProtocol {
        self.protocol
    }

    /// Get the currently set maximum speed.
    ///
    /// CMSIS-DAP offers no possibility to get the actual speed used.
    pub fn speed_khz(&self) -> u32 {
        self.speed_khz
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Set after a protocol error, until the next [`CmsisDap::attach`].
    pub fn reconnect_required(&self) -> bool {
        self.reconnect_required
    }

    /// Sends a raw command and returns the response payload after the echoed command byte.
    pub fn send_command(
        &mut self,
        command_id: u8,
        payload: &[u8],
    ) -> Result<Vec<u8>, CmsisDapError> {
        commands::send_raw(&mut self.device, command_id, payload)
    }

    fn send<Req>(&mut self, request: &Req) -> Result<(), CmsisDapError>
    where
        Req: Request<Response = Status>,
    {
        match commands::send_command(&mut self.device, request)? {
            Status::DapOk => Ok(()),
            Status::DapError => Err(CmsisDapError::ErrorResponse(Req::COMMAND_ID)),
        }
    }

    /// Connects to the target with the selected protocol and configures the probe.
    ///
    /// Also clears the reconnect requirement left by a protocol error.
    #[tracing::instrument(skip(self))]
    pub fn attach(&mut self) -> Result<(), DebugProbeError> {
        tracing::debug!("Attaching to target system (clock = {}kHz)", self.speed_khz);

        self.device.drain();
        self.device.find_packet_size()?;

        let response =
            commands::send_command(&mut self.device, &ConnectRequest::from(self.protocol))?;
        if !response.matches(self.protocol) {
            return Err(CmsisDapError::InitFailed(self.protocol.to_string()).into());
        }

        // Set speed after connecting as it can be reset during protocol selection
        self.send(&SwjClockRequest::from_khz(self.speed_khz))?;

        self.send(&ConfigureRequest {
            idle_cycles: 0,
            wait_retry: self.probe_wait_retry,
            match_retry: 0,
        })?;

        if self.protocol == WireProtocol::Swd {
            self.send(&swd::configure::ConfigureRequest::default())?;

            for sequence in SequenceRequest::jtag_to_swd() {
                self.send(&sequence)?;
            }
        }

        // Tell the probe we are connected so it can turn on an LED.
        let _ = self.send(&HostStatusRequest::connected(true));

        self.connected = true;
        self.reconnect_required = false;
        tracing::info!("Attached with {} at {} kHz", self.protocol, self.speed_khz);

        Ok(())
    }

    /// Leave debug mode.
    pub fn detach(&mut self) -> Result<(), DebugProbeError> {
        let response = commands::send_command(&mut self.device, &DisconnectRequest);

        // Tell probe we are disconnected so it can turn off its LED.
        let _ = self.send(&HostStatusRequest::connected(false));
        self.connected = false;

        match response? {
            Status::DapOk => Ok(()),
            Status::DapError => Err(CmsisDapError::ErrorResponse(CommandId::Disconnect).into()),
        }
    }

    /// Sets the SWJ clock. Takes effect immediately when connected.
    pub fn set_speed(&mut self, speed_khz: u32) -> Result<u32, DebugProbeError> {
        if speed_khz == 0 {
            return Err(DebugProbeError::UnsupportedSpeed(speed_khz));
        }
        if self.connected {
            self.send(&SwjClockRequest::from_khz(speed_khz))?;
        }
        self.speed_khz = speed_khz;

        Ok(speed_khz)
    }

    /// Switches the wire protocol, reconnecting if already attached.
    pub fn select_protocol(&mut self, protocol: WireProtocol) -> Result<(), DebugProbeError> {
        if !self.capabilities.supports(protocol) {
            return Err(DebugProbeError::UnsupportedProtocol(protocol));
        }
        self.protocol = protocol;

        if self.connected {
            self.attach()?;
        }
        Ok(())
    }

    /// Pulses nRESET.
    pub fn target_reset(&mut self) -> Result<(), DebugProbeError> {
        let response = commands::send_command(&mut self.device, &ResetRequest)?;
        tracing::info!("Target reset response: {:?}", response);
        match response.status {
            Status::DapOk => Ok(()),
            Status::DapError => Err(CmsisDapError::ErrorResponse(CommandId::ResetTarget).into()),
        }
    }

    fn ensure_usable(&self) -> Result<(), CmsisDapError> {
        if self.reconnect_required {
            Err(CmsisDapError::ReconnectRequired)
        } else {
            Ok(())
        }
    }

    fn protocol_error(&mut self) -> CmsisDapError {
        tracing::warn!("Protocol error reported by probe, re-attach required");
        self.reconnect_required = true;
        CmsisDapError::ProtocolError
    }

    /// Executes a batch of transfers and returns one result per transfer, in request order.
    ///
    /// The batch is split into as many packets as needed. Transfers answered
    /// with WAIT are replayed with backoff. After a FAULT or missing
    /// acknowledge, the failing transfer resolves to that error and every
    /// later one to [`TransferError::Aborted`].
    #[tracing::instrument(skip_all, fields(transfers = transfers.len()))]
    pub fn queue_transfer_block(
        &mut self,
        transfers: &[Transfer],
    ) -> Result<Vec<TransferResult>, CmsisDapError> {
        self.ensure_usable()?;

        let mut results: Vec<TransferResult> = Vec::with_capacity(transfers.len());
        let mut backoff = Backoff::new(self.wait);

        while results.len() < transfers.len() {
            let remaining = &transfers[results.len()..];
            let chunk_len = transfers_per_packet(remaining, self.packet_size());
            if chunk_len == 0 {
                return Err(CmsisDapError::NoPacketSize);
            }
            let chunk = &remaining[..chunk_len];

            let response = commands::send_command(
                &mut self.device,
                &TransferRequest {
                    dap_index: self.dap_index,
                    transfers: chunk,
                },
            )?;

            tracing::debug!(
                "{} of {} transfers executed, ack {:?}",
                response.count,
                chunk_len,
                response.ack
            );

            let mut data = response.data.into_iter();
            for transfer in &chunk[..response.count] {
                results.push(Ok(if transfer.is_read() { data.next() } else { None }));
            }

            if response.protocol_error {
                return Err(self.protocol_error());
            }

            match response.ack {
                Ack::Ok if response.count == chunk_len => {}
                Ack::Ok | Ack::Wait => {
                    if response.ack == Ack::Ok {
                        tracing::warn!(
                            "Only {}/{} transfers were executed, but no error was reported",
                            response.count,
                            chunk_len
                        );
                    }
                    if !backoff.wait() {
                        tracing::debug!(
                            "WAIT retries exhausted after {} transfers",
                            results.len()
                        );
                        results.resize(transfers.len(), Err(TransferError::Wait));
                    }
                }
                Ack::Fault | Ack::NoAck => {
                    let error = response.ack.error().unwrap_or(TransferError::Fault);
                    tracing::debug!("Transfer {} failed: {:?}", results.len(), error);
                    results.push(Err(error));
                    results.resize(transfers.len(), Err(TransferError::Aborted));
                }
            }
        }

        Ok(results)
    }

    /// Writes `values` to one register with DAP_TransferBlock.
    pub fn transfer_block_write(
        &mut self,
        port: PortType,
        address: u8,
        values: &[u32],
    ) -> Result<(), BlockTransferError> {
        self.ensure_usable()?;

        // Command byte, DAP index, two count bytes and the request byte.
        let chunk_words = (self.packet_size().saturating_sub(5) / 4).min(u16::MAX as usize);
        if chunk_words == 0 {
            return Err(CmsisDapError::NoPacketSize.into());
        }

        let mut done = 0;
        let mut backoff = Backoff::new(self.wait);
        while done < values.len() {
            let len = chunk_words.min(values.len() - done);
            let request = TransferBlockRequest {
                dap_index: self.dap_index,
                port,
                address,
                kind: BlockKind::Write(&values[done..done + len]),
            };
            tracing::debug!("Transfer block write: offset={} len={} words", done, len);

            let response = commands::send_command(&mut self.device, &request)?;
            let count = response.count.min(len);
            done += count;
            self.block_outcome(
                response.ack,
                response.protocol_error,
                count,
                len,
                done,
                &mut backoff,
            )?;
        }

        Ok(())
    }

    /// Reads `values.len()` words from one register with DAP_TransferBlock.
    pub fn transfer_block_read(
        &mut self,
        port: PortType,
        address: u8,
        values: &mut [u32],
    ) -> Result<(), BlockTransferError> {
        self.ensure_usable()?;

        // Command byte, two count bytes and the response byte.
        let chunk_words = (self.packet_size().saturating_sub(4) / 4).min(u16::MAX as usize);
        if chunk_words == 0 {
            return Err(CmsisDapError::NoPacketSize.into());
        }

        let mut done = 0;
        let mut backoff = Backoff::new(self.wait);
        while done < values.len() {
            let len = chunk_words.min(values.len() - done);
            let request = TransferBlockRequest {
                dap_index: self.dap_index,
                port,
                address,
                kind: BlockKind::Read(len as u16),
            };
            tracing::debug!("Transfer block read: offset={} len={} words", done, len);

            let response = commands::send_command(&mut self.device, &request)?;
            let count = response.data.len().min(len);
            values[done..done + count].copy_from_slice(&response.data[..count]);
            done += count;
            self.block_outcome(
                response.ack,
                response.protocol_error,
                count,
                len,
                done,
                &mut backoff,
            )?;
        }

        Ok(())
    }

    /// Classifies the response to one block chunk. `Ok` means carry on.
    fn block_outcome(
        &mut self,
        ack: Ack,
        protocol_error: bool,
        count: usize,
        requested: usize,
        completed: usize,
        backoff: &mut Backoff,
    ) -> Result<(), BlockTransferError> {
        if protocol_error {
            return Err(self.protocol_error().into());
        }
        match ack {
            Ack::Ok if count == requested => Ok(()),
            Ack::Ok | Ack::Wait => {
                if backoff.wait() {
                    Ok(())
                } else {
                    Err(BlockTransferError::Transfer {
                        error: TransferError::Wait,
                        completed,
                    })
                }
            }
            Ack::Fault | Ack::NoAck => Err(BlockTransferError::Transfer {
                error: ack.error().unwrap_or(TransferError::Fault),
                completed,
            }),
        }
    }
}

impl Drop for CmsisDap {
    fn drop(&mut self) {
        if self.connected {
            tracing::debug!("Detaching from CMSIS-DAP probe");
            // We ignore the error cases as we can't do much about it anyways.
            let _ = self.detach();
        }
    }
}
