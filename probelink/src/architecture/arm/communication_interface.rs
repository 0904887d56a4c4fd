//! The DP/AP transaction queue.
//!
//! Register accesses are collected into a pending batch and sent to the
//! probe on [`ArmCommunicationInterface::flush`]. Reads hand out a
//! [`DeferredRead`] which can be redeemed once the batch was flushed.
use std::{collections::HashMap, time::Duration};

use super::{
    ap::ApRegister,
    dp::{Abort, Ctrl, DebugPortId, DpRegister, Select, DPIDR},
    ArmError, PortType, Register,
};
use crate::{
    config::SessionConfig,
    deadline::Deadline,
    probe::{
        cmsisdap::{
            commands::transfer::{Transfer, TransferError},
            BlockTransferError, CmsisDap,
        },
        queue::{DeferredResultIndex, DeferredResultSet},
        WireProtocol,
    },
};

/// Handle to the result of a queued read.
///
/// Dropping the handle discards the result.
#[derive(Debug)]
#[must_use = "the read result can only be retrieved through this handle"]
pub struct DeferredRead(DeferredResultIndex);

#[derive(Debug)]
struct PendingTransfer {
    transfer: Transfer,
    read: Option<DeferredResultIndex>,
}

/// Owns the protocol engine and queues DP/AP transfers for it.
#[derive(Debug)]
pub struct ArmCommunicationInterface {
    probe: CmsisDap,
    /// Last SELECT value written, `None` when unknown.
    select: Option<Select>,
    /// Last CSW value written per AP.
    csw: HashMap<u8, u32>,
    pending: Vec<PendingTransfer>,
    results: DeferredResultSet<Result<u32, TransferError>>,
    power_up_timeout: Duration,
    debug_port_id: Option<DebugPortId>,
}

impl ArmCommunicationInterface {
    pub fn new(probe: CmsisDap, config: &SessionConfig) -> Self {
        Self {
            probe,
            select: None,
            csw: HashMap::new(),
            pending: Vec::new(),
            results: DeferredResultSet::default(),
            power_up_timeout: config.power_up_timeout,
            debug_port_id: None,
        }
    }

    pub fn probe(&self) -> &CmsisDap {
        &self.probe
    }

    pub fn probe_mut(&mut self) -> &mut CmsisDap {
        &mut self.probe
    }

    /// Number of transfers waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// The DPIDR contents read by [`Self::debug_port_start`].
    pub fn debug_port_id(&self) -> Option<&DebugPortId> {
        self.debug_port_id.as_ref()
    }

    fn ensure_idle(&self) -> Result<(), ArmError> {
        match self.pending.len() {
            0 => Ok(()),
            n => Err(ArmError::BatchInFlight(n)),
        }
    }

    fn invalidate_caches(&mut self) {
        self.select = None;
        self.csw.clear();
    }

    /// Queues a SELECT write if the wanted fields differ from the last issued value.
    fn select(&mut self, ap_sel: Option<u8>, ap_bank: Option<u8>, dp_bank: Option<u8>) {
        let mut wanted = self.select.unwrap_or_default();
        if let Some(ap) = ap_sel {
            wanted.set_ap_sel(ap);
        }
        if let Some(bank) = ap_bank {
            wanted.set_ap_bank_sel(bank);
        }
        if let Some(bank) = dp_bank {
            wanted.set_dp_bank_sel(bank);
        }

        if self.select != Some(wanted) {
            tracing::debug!(
                "Changing SELECT to AP {}, AP bank {}, DP bank {}",
                wanted.ap_sel(),
                wanted.ap_bank_sel(),
                wanted.dp_bank_sel()
            );
            self.push(
                Transfer::write(PortType::DebugPort, Select::ADDRESS, wanted.into()),
                None,
            );
            self.select = Some(wanted);
        }
    }

    fn push(&mut self, transfer: Transfer, read: Option<DeferredResultIndex>) {
        self.pending.push(PendingTransfer { transfer, read });
    }

    fn select_ap(&mut self, ap: u8, address: u8) {
        self.select(Some(ap), Some(address >> 4), None);
    }

    /// DP addresses carry the bank in bits 7:4. Only CTRL/STAT (0x4) is banked.
    fn select_dp(&mut self, address: u8) {
        if address & 0xF == Ctrl::ADDRESS {
            self.select(None, None, Some(address >> 4));
        }
    }

    fn queue_read(&mut self, transfer: Transfer) -> DeferredRead {
        let index = DeferredResultIndex::new();
        self.push(transfer, Some(index.share()));
        DeferredRead(index)
    }

    /// Queues a read of an AP register. Bits 7:4 of `address` select the bank.
    pub fn read_ap(&mut self, ap: u8, address: u8) -> DeferredRead {
        self.select_ap(ap, address);
        self.queue_read(Transfer::read(PortType::AccessPort, address & 0xC))
    }

    pub fn write_ap(&mut self, ap: u8, address: u8, value: u32) {
        self.select_ap(ap, address);
        self.push(
            Transfer::write(PortType::AccessPort, address & 0xC, value),
            None,
        );
    }

    pub fn read_dp(&mut self, address: u8) -> DeferredRead {
        self.select_dp(address);
        self.queue_read(Transfer::read(PortType::DebugPort, address & 0xC))
    }

    pub fn write_dp(&mut self, address: u8, value: u32) {
        if address & 0xF == Select::ADDRESS {
            // Written as requested, and remembered for later accesses.
            self.push(
                Transfer::write(PortType::DebugPort, Select::ADDRESS, value),
                None,
            );
            self.select = Some(Select::from(value));
            return;
        }
        self.select_dp(address);
        self.push(
            Transfer::write(PortType::DebugPort, address & 0xC, value),
            None,
        );
    }

    /// Redeems a read handle. Fails with [`ArmError::NotFlushed`] if the read is still queued.
    pub fn take(&mut self, read: DeferredRead) -> Result<u32, ArmError> {
        match self.results.take(read.0) {
            Ok(result) => result.map_err(ArmError::TransferFault),
            Err(_) => Err(ArmError::NotFlushed),
        }
    }

    /// Sends all queued transfers and resolves the queued reads.
    ///
    /// After a FAULT, a missing acknowledge or exhausted WAIT retries, the
    /// sticky errors are cleared through ABORT and every unresolved read
    /// resolves to a transfer fault.
    #[tracing::instrument(skip(self), fields(pending = self.pending.len()))]
    pub fn flush(&mut self) -> Result<(), ArmError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let pending = std::mem::take(&mut self.pending);
        let transfers: Vec<Transfer> = pending.iter().map(|p| p.transfer).collect();

        let results = match self.probe.queue_transfer_block(&transfers) {
            Ok(results) => results,
            Err(error) => {
                tracing::debug!("Batch failed in the probe: {}", error);
                self.invalidate_caches();
                for read in pending.iter().filter_map(|p| p.read.as_ref()) {
                    self.results.push(read, Err(TransferError::Aborted));
                }
                self.results.prune();
                return Err(error.into());
            }
        };

        let mut failure = None;
        for (transfer, result) in pending.iter().zip(results) {
            if let Err(error) = result {
                failure.get_or_insert(error);
            }
            if let Some(read) = &transfer.read {
                let value = result.and_then(|value| value.ok_or(TransferError::Aborted));
                self.results.push(read, value);
            }
        }
        self.results.prune();

        match failure {
            None => Ok(()),
            Some(error) => {
                self.recover(error);
                Err(ArmError::TransferFault(error))
            }
        }
    }

    /// Clears the sticky error flags directly through the engine.
    fn recover(&mut self, error: TransferError) {
        self.invalidate_caches();

        let abort = Abort::clear_sticky(error == TransferError::Wait);
        tracing::debug!("Clearing sticky errors after {:?} with {:?}", error, abort);

        let transfer = Transfer::write(PortType::DebugPort, Abort::ADDRESS, abort.into());
        match self.probe.queue_transfer_block(&[transfer]) {
            Ok(results) if results.iter().all(Result::is_ok) => {}
            Ok(results) => tracing::warn!("Writing ABORT failed: {:?}", results),
            Err(e) => tracing::warn!("Writing ABORT failed: {}", e),
        }
    }

    /// Enqueues, flushes and returns a single DP read.
    pub fn read_dp_now(&mut self, address: u8) -> Result<u32, ArmError> {
        let read = self.read_dp(address);
        self.flush()?;
        self.take(read)
    }

    /// Enqueues, flushes and returns a single AP read.
    pub fn read_ap_now(&mut self, ap: u8, address: u8) -> Result<u32, ArmError> {
        let read = self.read_ap(ap, address);
        self.flush()?;
        self.take(read)
    }

    pub fn read_dp_register<R: DpRegister>(&mut self) -> Result<R, ArmError> {
        let address = R::ADDRESS | (R::DP_BANK.unwrap_or(0) << 4);
        self.read_dp_now(address).map(R::from)
    }

    /// Queues a typed DP register write.
    pub fn write_dp_register<R: DpRegister>(&mut self, register: R) {
        let address = R::ADDRESS | (R::DP_BANK.unwrap_or(0) << 4);
        self.write_dp(address, register.into());
    }

    pub fn read_ap_register<R: ApRegister>(&mut self, ap: u8) -> Result<R, ArmError> {
        self.read_ap_now(ap, R::ADDRESS).map(R::from)
    }

    /// Queues a typed AP register write.
    pub fn write_ap_register<R: ApRegister>(&mut self, ap: u8, register: R) {
        self.write_ap(ap, R::ADDRESS, register.into());
    }

    /// Writes `values` to one AP register with block transfers.
    pub fn write_ap_block(
        &mut self,
        ap: u8,
        address: u8,
        values: &[u32],
    ) -> Result<(), ArmError> {
        self.select_ap(ap, address);
        self.flush()?;

        let result = self
            .probe
            .transfer_block_write(PortType::AccessPort, address & 0xC, values);
        self.block_result(result)
    }

    /// Fills `values` from one AP register with block transfers.
    pub fn read_ap_block(
        &mut self,
        ap: u8,
        address: u8,
        values: &mut [u32],
    ) -> Result<(), ArmError> {
        self.select_ap(ap, address);
        self.flush()?;

        let result = self
            .probe
            .transfer_block_read(PortType::AccessPort, address & 0xC, values);
        self.block_result(result)
    }

    fn block_result(&mut self, result: Result<(), BlockTransferError>) -> Result<(), ArmError> {
        match result {
            Ok(()) => Ok(()),
            Err(BlockTransferError::Transfer { error, completed }) => {
                tracing::debug!("Block transfer failed after {} words", completed);
                self.recover(error);
                Err(ArmError::TransferFault(error))
            }
            Err(BlockTransferError::Probe(error)) => {
                self.invalidate_caches();
                Err(error.into())
            }
        }
    }

    pub(crate) fn cached_csw(&self, ap: u8) -> Option<u32> {
        self.csw.get(&ap).copied()
    }

    pub(crate) fn remember_csw(&mut self, ap: u8, csw: u32) {
        self.csw.insert(ap, csw);
    }

    /// Powers up the debug port.
    ///
    /// Reads DPIDR, clears sticky errors, requests debug and system power
    /// and waits for both acknowledges.
    #[tracing::instrument(skip(self))]
    pub fn debug_port_start(&mut self) -> Result<(), ArmError> {
        self.invalidate_caches();

        let dpidr: DPIDR = self.read_dp_register()?;
        let id = DebugPortId::from(dpidr);
        tracing::info!(
            "Debug port {:?}, designer {}",
            id.version,
            id.designer.get().unwrap_or("<unknown>")
        );
        self.debug_port_id = Some(id);

        self.write_dp_register(Abort::clear_sticky(false));
        self.write_dp_register(Select(0));

        let mut ctrl = Ctrl(0);
        ctrl.set_cdbgpwrupreq(true);
        ctrl.set_csyspwrupreq(true);
        ctrl.set_mask_lane(0b1111);
        self.write_dp_register(ctrl);
        self.flush()?;

        let deadline = Deadline::after(self.power_up_timeout);
        let powered = deadline.poll(Duration::from_millis(1), || {
            let ctrl: Ctrl = self.read_dp_register()?;
            Ok::<_, ArmError>((ctrl.csyspwrupack() && ctrl.cdbgpwrupack()).then_some(()))
        })?;

        match powered {
            Some(()) => Ok(()),
            None => Err(ArmError::Timeout("debug and system power-up")),
        }
    }

    /// Re-attaches the probe and powers up the debug port again.
    pub fn reattach(&mut self) -> Result<(), ArmError> {
        self.pending.clear();
        self.probe.attach()?;
        self.debug_port_start()
    }

    /// Changes the SWJ clock. Requires an empty queue.
    pub fn set_speed(&mut self, speed_khz: u32) -> Result<u32, ArmError> {
        self.ensure_idle()?;
        Ok(self.probe.set_speed(speed_khz)?)
    }

    /// Changes the wire protocol. Requires an empty queue.
    pub fn select_protocol(&mut self, protocol: WireProtocol) -> Result<(), ArmError> {
        self.ensure_idle()?;
        self.probe.select_protocol(protocol)?;
        if self.probe.is_connected() {
            self.debug_port_start()?;
        }
        Ok(())
    }

    /// Pulses nRESET after sending the queued transfers.
    pub fn target_reset(&mut self) -> Result<(), ArmError> {
        self.flush()?;
        self.probe.target_reset()?;
        self.invalidate_caches();
        Ok(())
    }

    /// Flushes what is queued and disconnects the probe.
    pub fn detach(&mut self) -> Result<(), ArmError> {
        let flushed = self.flush();
        self.probe.detach()?;
        flushed
    }
}
