//! Batching, ordering and error recovery of the DP/AP transaction queue.

mod common;

use common::{attach, attach_with, RAM_START};
use pretty_assertions::assert_eq;
use probelink::architecture::arm::{ArmError, PortType};
use probelink::probe::fake_probe::Injected;
use probelink::probe::CmsisDapError;
use probelink::{
    CoreState, DebugProbeError, Error, FakeProbe, MemoryInterface, SessionConfig, StateError,
    TransferError,
};

const CSW_WORD_INCREMENT: u32 = 0xA200_0012;
const DRW: u8 = 0x0C;
const TAR: u8 = 0x04;
const CSW: u8 = 0x00;
const IDR: u8 = 0xFC;
const SELECT: u8 = 0x08;

fn ram_words(count: usize) -> Vec<u32> {
    (0..count as u32).map(|i| 0x1000_0000 | (i * 0x0101)).collect()
}

fn fill_ram(probe: &FakeProbe, words: &[u32]) {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    probe.write_ram(RAM_START, &bytes);
}

#[test]
fn flushing_an_empty_queue_sends_nothing() {
    let probe = FakeProbe::new();
    let mut session = attach(&probe);
    probe.clear_log();

    session.interface().flush().unwrap();

    assert!(probe.requests().is_empty());
}

#[test]
fn reads_resolve_in_order_across_packets() {
    let probe = FakeProbe::new();
    let words = ram_words(40);
    fill_ram(&probe, &words);

    let mut session = attach(&probe);
    let interface = session.interface();
    interface.write_ap(0, CSW, CSW_WORD_INCREMENT);
    interface.write_ap(0, TAR, RAM_START);
    interface.flush().unwrap();
    probe.clear_log();

    let reads: Vec<_> = (0..words.len()).map(|_| interface.read_ap(0, DRW)).collect();
    assert_eq!(interface.pending(), words.len());
    interface.flush().unwrap();

    // 64 byte packets carry at most 15 read results.
    assert!(probe.command_count(0x05) >= 3);

    let values: Vec<u32> = reads
        .into_iter()
        .map(|read| interface.take(read).unwrap())
        .collect();
    assert_eq!(values, words);
}

#[test]
fn many_writes_are_split_and_applied_in_order() {
    let probe = FakeProbe::new();
    let mut session = attach(&probe);
    probe.clear_log();

    let mut memory = session.memory();
    for i in 0..200u32 {
        memory.write_word_32(u64::from(RAM_START + 4 * i), i ^ 0x5A5A_0000).unwrap();
    }
    memory.flush().unwrap();

    assert!(probe.command_count(0x05) > 1);
    for request in probe.requests() {
        assert!(request.len() <= 64);
    }

    let ram = probe.read_ram(RAM_START, 800);
    for (i, word) in ram.chunks(4).enumerate() {
        let word = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        assert_eq!(word, i as u32 ^ 0x5A5A_0000);
    }
}

#[test]
fn select_is_written_once_per_bank_change() {
    let probe = FakeProbe::new();
    let mut session = attach(&probe);
    let interface = session.interface();
    interface.flush().unwrap();
    probe.clear_log();

    let reads: Vec<_> = [IDR, IDR, CSW, TAR, IDR]
        .into_iter()
        .map(|address| interface.read_ap(0, address))
        .collect();
    interface.flush().unwrap();

    let selects = probe
        .transfers()
        .into_iter()
        .filter(|t| t.port == PortType::DebugPort && t.address == SELECT && t.write.is_some())
        .count();
    assert_eq!(selects, 3);

    let idr = reads.into_iter().next().unwrap();
    assert_eq!(interface.take(idr).unwrap(), 0x2477_0011);
}

#[test]
fn taking_a_read_before_flush_fails() {
    let probe = FakeProbe::new();
    let mut session = attach(&probe);
    let interface = session.interface();

    let read = interface.read_dp(0x0);
    assert!(matches!(interface.take(read), Err(ArmError::NotFlushed)));
}

#[test]
fn wait_is_retried_until_the_target_accepts() {
    let probe = FakeProbe::new();
    let mut session = attach(&probe);
    let interface = session.interface();
    interface.flush().unwrap();
    probe.clear_log();

    probe.inject(&[Injected::Wait, Injected::Wait]);
    interface.write_ap(0, TAR, RAM_START + 0x10);
    interface.flush().unwrap();

    assert_eq!(probe.command_count(0x05), 3);
    assert!(probe.aborts().is_empty());
    assert_eq!(interface.read_ap_now(0, TAR).unwrap(), RAM_START + 0x10);
}

#[test]
fn exhausted_wait_retries_abort_the_transaction() {
    let probe = FakeProbe::new();
    let config = SessionConfig {
        wait_retries: 2,
        ..Default::default()
    };
    let mut session = attach_with(&probe, config);
    let interface = session.interface();
    interface.flush().unwrap();
    probe.clear_log();

    probe.inject(&[Injected::Wait; 3]);
    let read = interface.read_ap(0, IDR);
    let result = interface.flush();

    assert!(matches!(
        result,
        Err(ArmError::TransferFault(TransferError::Wait))
    ));
    assert!(matches!(
        interface.take(read),
        Err(ArmError::TransferFault(TransferError::Wait))
    ));
    // ORUNERRCLR | WDERRCLR | STKERRCLR | STKCMPCLR | DAPABORT
    assert_eq!(probe.aborts(), vec![0b1_1111]);
}

#[test]
fn wait_retries_are_bounded_across_the_whole_batch() {
    let probe = FakeProbe::new();
    let config = SessionConfig {
        wait_retries: 1,
        ..Default::default()
    };
    let mut session = attach_with(&probe, config);
    let interface = session.interface();
    interface.read_ap_now(0, IDR).unwrap();
    probe.clear_log();

    // Every replay gets one transfer further before the next WAIT.
    probe.inject(&[Injected::Ok, Injected::Wait, Injected::Ok, Injected::Wait]);
    let reads = [
        interface.read_ap(0, IDR),
        interface.read_ap(0, IDR),
        interface.read_ap(0, IDR),
    ];
    assert!(interface.flush().is_err());

    let [first, second, third] = reads;
    assert!(interface.take(first).is_ok());
    assert!(interface.take(second).is_ok());
    assert!(matches!(
        interface.take(third),
        Err(ArmError::TransferFault(TransferError::Wait))
    ));
    // Two attempts, then ABORT.
    assert_eq!(probe.command_count(0x05), 3);
    assert_eq!(probe.aborts(), vec![0b1_1111]);
}

#[test]
fn fault_in_a_batch_resolves_earlier_reads_and_fails_later_ones() {
    let probe = FakeProbe::new();
    let words = ram_words(4);
    fill_ram(&probe, &words);

    let mut session = attach(&probe);
    let interface = session.interface();
    interface.write_ap(0, CSW, CSW_WORD_INCREMENT);
    interface.write_ap(0, TAR, RAM_START);
    interface.flush().unwrap();
    probe.clear_log();

    probe.inject(&[Injected::Ok, Injected::Fault]);
    let first = interface.read_ap(0, DRW);
    let second = interface.read_ap(0, DRW);
    let third = interface.read_ap(0, DRW);

    assert!(matches!(
        interface.flush(),
        Err(ArmError::TransferFault(TransferError::Fault))
    ));
    assert_eq!(interface.take(first).unwrap(), words[0]);
    assert!(matches!(
        interface.take(second),
        Err(ArmError::TransferFault(TransferError::Fault))
    ));
    assert!(matches!(
        interface.take(third),
        Err(ArmError::TransferFault(TransferError::Aborted))
    ));

    // ORUNERRCLR | WDERRCLR | STKERRCLR | STKCMPCLR
    assert_eq!(probe.aborts(), vec![0b1_1110]);

    // Sticky errors are cleared, the next access goes through.
    assert_eq!(interface.read_ap_now(0, IDR).unwrap(), 0x2477_0011);
}

#[test]
fn missing_acknowledge_is_reported() {
    let probe = FakeProbe::new();
    let mut session = attach(&probe);

    probe.inject(&[Injected::NoAck]);
    assert!(matches!(
        session.interface().read_dp_now(0x0),
        Err(ArmError::TransferFault(TransferError::NoAck))
    ));
    assert_eq!(session.interface().read_dp_now(0x0).unwrap(), 0x2BA0_1477);
}

#[test]
fn protocol_error_requires_reattach() {
    let probe = FakeProbe::new();
    let mut session = attach(&probe);

    probe.inject(&[Injected::ProtocolError]);
    assert!(matches!(
        session.interface().read_dp_now(0x0),
        Err(ArmError::Probe(DebugProbeError::CmsisDap(
            CmsisDapError::ProtocolError
        )))
    ));

    probe.clear_log();
    assert!(matches!(
        session.interface().read_dp_now(0x0),
        Err(ArmError::Probe(DebugProbeError::CmsisDap(
            CmsisDapError::ReconnectRequired
        )))
    ));
    assert!(probe.requests().is_empty());

    session.reattach().unwrap();
    assert_eq!(session.interface().read_dp_now(0x0).unwrap(), 0x2BA0_1477);
    assert_eq!(session.core().state(), CoreState::Unknown);
}

#[test]
fn speed_change_is_refused_while_transfers_are_queued() {
    let probe = FakeProbe::new();
    let mut session = attach(&probe);

    session.interface().write_dp(SELECT, 0);
    assert!(matches!(
        session.set_speed(4_000),
        Err(Error::InvalidState(StateError::BatchInFlight(1)))
    ));
    assert!(matches!(
        session.ensure_idle(),
        Err(Error::InvalidState(StateError::BatchInFlight(1)))
    ));

    session.interface().flush().unwrap();
    assert_eq!(session.set_speed(4_000).unwrap(), 4_000);
    assert_eq!(probe.clock_khz(), 4_000);
    assert_eq!(session.config().speed_khz, 4_000);
}
