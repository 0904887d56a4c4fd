//! Programming flash through a flash algorithm on the emulated target.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{attach, flash_algorithm, pattern, FLASH_START, SECTOR_SIZE};
use pretty_assertions::assert_eq;
use probelink::flashing::{
    FlashAlgorithm, FlashError, FlashPlan, FlashProgress, ProgressEvent, SectorFailure,
    SectorStatus,
};
use probelink::probe::fake_probe::{Routine, RoutineBehavior};
use probelink::{CoreState, Error, FakeProbe, FlashConfig};

fn plan(algorithm: &FlashAlgorithm, address: u64, data: &[u8]) -> FlashPlan {
    let mut builder = FlashPlan::builder(algorithm);
    builder.add_data(address, data).unwrap();
    builder.build().unwrap()
}

fn recorder() -> (FlashProgress, Arc<Mutex<Vec<ProgressEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let progress = FlashProgress::new(move |event| sink.lock().unwrap().push(event));
    (progress, events)
}

#[test]
fn programs_and_verifies_the_planned_data() {
    let probe = FakeProbe::new();
    let algorithm = flash_algorithm(&probe);
    let mut session = attach(&probe);

    let data = pattern(0x500, 3);
    let report = session
        .flasher(algorithm.clone(), FlashConfig::default())
        .program(plan(&algorithm, FLASH_START, &data))
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.programmed_sectors(), 2);
    assert_eq!(report.bytes_written(), 2 * SECTOR_SIZE);
    let verify = report.verify.unwrap();
    assert_eq!(verify.sectors_checked, 2);
    assert_eq!(verify.mismatched_bytes, 0);

    assert_eq!(probe.read_flash(FLASH_START, data.len()), data);
    // The rest of the second sector stays erased.
    assert_eq!(
        probe.read_flash(FLASH_START + 0x500, 0x300),
        vec![0xFF; 0x300]
    );
    assert!(session.core().state().is_halted());
}

#[test]
fn routines_follow_the_calling_sequence() {
    let probe = FakeProbe::new();
    let algorithm = flash_algorithm(&probe);
    let mut session = attach(&probe);
    probe.clear_log();

    let data = pattern(0x100, 9);
    session
        .flasher(algorithm.clone(), FlashConfig::default())
        .program(plan(&algorithm, FLASH_START + SECTOR_SIZE, &data))
        .unwrap()
        .into_result()
        .unwrap();

    let calls: Vec<(Routine, u32)> = probe
        .routine_calls()
        .into_iter()
        .map(|call| (call.routine, call.args[0]))
        .collect();
    let sector = (FLASH_START + SECTOR_SIZE) as u32;
    assert_eq!(
        calls,
        vec![
            (Routine::Init, FLASH_START as u32),
            (Routine::EraseSector, sector),
            (Routine::UnInit, 1),
            (Routine::Init, FLASH_START as u32),
            (Routine::ProgramPage, sector),
            (Routine::ProgramPage, sector + 0x100),
            (Routine::ProgramPage, sector + 0x200),
            (Routine::ProgramPage, sector + 0x300),
            (Routine::UnInit, 2),
        ]
    );

    let init = probe.routine_calls()[0];
    assert_eq!(init.args, [FLASH_START as u32, 0, 1]);
    let program = probe.routine_calls()[4];
    assert_eq!(program.args[1], 0x100);
    assert!(algorithm.page_buffers.contains(&u64::from(program.args[2])));
}

#[test]
fn reprogramming_the_same_plan_leaves_sectors_unchanged() {
    let probe = FakeProbe::new();
    let algorithm = flash_algorithm(&probe);
    let mut session = attach(&probe);

    let data = pattern(0x800, 1);
    let plan = plan(&algorithm, FLASH_START, &data);
    session
        .flasher(algorithm.clone(), FlashConfig::default())
        .program(plan.clone())
        .unwrap()
        .into_result()
        .unwrap();
    probe.clear_log();

    let report = session
        .flasher(algorithm, FlashConfig::default())
        .program(plan)
        .unwrap();

    assert_eq!(report.unchanged_sectors(), 2);
    assert_eq!(report.bytes_written(), 0);
    assert_eq!(report.verify.unwrap().mismatched_bytes, 0);
    assert!(report.is_success());
    assert!(probe
        .routine_calls()
        .iter()
        .all(|call| call.routine != Routine::EraseSector));
}

#[test]
fn skip_unchanged_can_be_turned_off() {
    let probe = FakeProbe::new();
    let algorithm = flash_algorithm(&probe);
    let data = pattern(SECTOR_SIZE as usize, 4);
    probe.write_flash(FLASH_START, &data);

    let mut session = attach(&probe);
    let config = FlashConfig {
        skip_unchanged: false,
        ..Default::default()
    };
    let report = session
        .flasher(algorithm.clone(), config)
        .program(plan(&algorithm, FLASH_START, &data))
        .unwrap();

    assert_eq!(report.programmed_sectors(), 1);
    assert_eq!(report.sectors[0].status, SectorStatus::Programmed);
}

#[test]
fn a_hanging_erase_fails_only_its_sector() {
    let probe = FakeProbe::new();
    let algorithm = flash_algorithm(&probe);
    let mut session = attach(&probe);

    let stuck = FLASH_START + SECTOR_SIZE;
    probe.override_routine(Routine::EraseSector, Some(stuck as u32), RoutineBehavior::Hang);

    let config = FlashConfig {
        erase_timeout: Some(Duration::from_millis(30)),
        sector_retries: 0,
        ..Default::default()
    };
    let (progress, events) = recorder();
    let data = pattern(3 * SECTOR_SIZE as usize, 5);
    let report = session
        .flasher(algorithm.clone(), config)
        .with_progress(progress)
        .program(plan(&algorithm, FLASH_START, &data))
        .unwrap();

    assert_eq!(report.total_sectors(), 3);
    assert_eq!(report.programmed_sectors(), 2);
    assert_eq!(report.failed_sectors(), 1);
    assert_eq!(
        report.sectors[1].status,
        SectorStatus::Failed(SectorFailure::EraseTimeout)
    );
    assert_eq!(report.sectors[1].attempts, 1);
    assert!(report.fatal.is_none());

    let sector = SECTOR_SIZE as usize;
    assert_eq!(probe.read_flash(FLASH_START, sector), data[..sector]);
    assert_eq!(
        probe.read_flash(FLASH_START + 2 * SECTOR_SIZE, sector),
        data[2 * sector..]
    );

    assert!(events.lock().unwrap().contains(&ProgressEvent::SectorFailed {
        address: stuck,
        failure: SectorFailure::EraseTimeout,
        attempts: 1,
    }));

    assert!(matches!(
        report.into_result(),
        Err(FlashError::SectorsFailed {
            failed: 1,
            total: 3
        })
    ));
}

#[test]
fn failing_erase_is_retried() {
    let probe = FakeProbe::new();
    let algorithm = flash_algorithm(&probe);
    let mut session = attach(&probe);
    probe.override_routine(
        Routine::EraseSector,
        Some(FLASH_START as u32),
        RoutineBehavior::Return(7),
    );

    let report = session
        .flasher(algorithm.clone(), FlashConfig::default())
        .program(plan(&algorithm, FLASH_START, &[0x12; 16]))
        .unwrap();

    assert_eq!(
        report.sectors[0].status,
        SectorStatus::Failed(SectorFailure::EraseError(7))
    );
    assert_eq!(report.sectors[0].attempts, 3);
    let erases = probe
        .routine_calls()
        .iter()
        .filter(|call| call.routine == Routine::EraseSector)
        .count();
    assert_eq!(erases, 3);
}

#[test]
fn failing_program_page_is_reported() {
    let probe = FakeProbe::new();
    let algorithm = flash_algorithm(&probe);
    let mut session = attach(&probe);
    probe.override_routine(Routine::ProgramPage, None, RoutineBehavior::Return(2));

    let config = FlashConfig {
        sector_retries: 1,
        ..Default::default()
    };
    let report = session
        .flasher(algorithm.clone(), config)
        .program(plan(&algorithm, FLASH_START, &[0x34; 16]))
        .unwrap();

    assert_eq!(
        report.sectors[0].status,
        SectorStatus::Failed(SectorFailure::ProgramError(2))
    );
    assert_eq!(report.sectors[0].attempts, 2);
    assert!(report.verify.is_some());
}

#[test]
fn failing_init_aborts_flashing() {
    let probe = FakeProbe::new();
    let algorithm = flash_algorithm(&probe);
    let mut session = attach(&probe);
    probe.override_routine(Routine::Init, None, RoutineBehavior::Return(1));

    let data = pattern(2 * SECTOR_SIZE as usize, 8);
    let report = session
        .flasher(algorithm.clone(), FlashConfig::default())
        .program(plan(&algorithm, FLASH_START, &data))
        .unwrap();

    assert!(matches!(
        report.fatal,
        Some(Error::AlgorithmError {
            routine: "init",
            code: 1
        })
    ));
    // Init fails before anything was erased.
    assert_eq!(report.not_attempted_sectors(), 2);
    assert_eq!(report.failed_sectors(), 0);
    assert!(report.verify.is_none());
    assert!(matches!(
        report.into_result(),
        Err(FlashError::Core(Error::AlgorithmError { .. }))
    ));
}

#[test]
fn progress_reports_every_sector() {
    let probe = FakeProbe::new();
    let algorithm = flash_algorithm(&probe);
    let data = pattern(SECTOR_SIZE as usize, 2);
    probe.write_flash(FLASH_START + SECTOR_SIZE, &data);

    let mut session = attach(&probe);
    let mut builder = FlashPlan::builder(&algorithm);
    builder
        .add_data(FLASH_START, &data)
        .unwrap()
        .add_data(FLASH_START + SECTOR_SIZE, &data)
        .unwrap();
    let plan = builder.build().unwrap();

    let (progress, events) = recorder();
    session
        .flasher(algorithm, FlashConfig::default())
        .with_progress(progress)
        .program(plan)
        .unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 5);
    assert_eq!(
        events[0],
        ProgressEvent::SectorStarted {
            address: FLASH_START,
            size: SECTOR_SIZE
        }
    );
    assert!(matches!(
        events[1],
        ProgressEvent::SectorFinished { address, .. } if address == FLASH_START
    ));
    assert_eq!(
        events[3],
        ProgressEvent::SectorUnchanged {
            address: FLASH_START + SECTOR_SIZE,
            size: SECTOR_SIZE
        }
    );
    assert!(matches!(
        events[4],
        ProgressEvent::VerifyFinished { summary } if summary.sectors_checked == 2
    ));
}

#[test]
fn unknown_core_state_refuses_to_flash() {
    let probe = FakeProbe::new();
    let algorithm = flash_algorithm(&probe);
    let mut session = attach(&probe);
    session.reattach().unwrap();
    probe.clear_log();

    let result = session
        .flasher(algorithm.clone(), FlashConfig::default())
        .program(plan(&algorithm, FLASH_START, &[0; 4]));

    assert!(matches!(result, Err(FlashError::CoreStateUnknown)));
    assert!(probe.requests().is_empty());
}

#[test]
fn run_after_starts_the_application() {
    let probe = FakeProbe::new();
    let algorithm = flash_algorithm(&probe);
    let mut session = attach(&probe);

    let config = FlashConfig {
        run_after: true,
        ..Default::default()
    };
    session
        .flasher(algorithm.clone(), config)
        .program(plan(&algorithm, FLASH_START, &[0x55; 8]))
        .unwrap()
        .into_result()
        .unwrap();

    assert_eq!(session.core().state(), CoreState::Running);
    assert!(!probe.is_halted());
    assert_eq!(probe.register(15), 0x0800_0100);
}

#[test]
fn reused_flasher_uploads_the_algorithm_again() {
    let probe = FakeProbe::new();
    let algorithm = flash_algorithm(&probe);
    let mut session = attach(&probe);
    let load_address = algorithm.load_address as u32;
    let plan = plan(&algorithm, FLASH_START, &pattern(0x100, 4));

    let config = FlashConfig {
        run_after: true,
        skip_unchanged: false,
        ..Default::default()
    };
    let mut flasher = session.flasher(algorithm, config);
    flasher.program(plan.clone()).unwrap().into_result().unwrap();

    // The application owns the RAM once it runs.
    probe.write_ram(load_address, &[0; 0x40]);

    flasher.program(plan).unwrap().into_result().unwrap();
    assert_eq!(probe.read_ram(load_address, 4), vec![0x00, 0xBE, 0x0A, 0xE0]);
}

#[test]
fn aborting_after_an_erase_fails_the_sector() {
    let probe = FakeProbe::new();
    let algorithm = flash_algorithm(&probe);
    probe.write_flash(FLASH_START, &pattern(SECTOR_SIZE as usize, 1));
    let mut session = attach(&probe);
    probe.override_routine(Routine::UnInit, None, RoutineBehavior::Return(1));

    let data = pattern(2 * SECTOR_SIZE as usize, 6);
    let report = session
        .flasher(algorithm.clone(), FlashConfig::default())
        .program(plan(&algorithm, FLASH_START, &data))
        .unwrap();

    assert!(matches!(
        report.fatal,
        Some(Error::AlgorithmError {
            routine: "uninit",
            code: 1
        })
    ));
    assert_eq!(
        report.sectors[0].status,
        SectorStatus::Failed(SectorFailure::Aborted)
    );
    assert_eq!(report.failed_sectors(), 1);
    assert_eq!(report.not_attempted_sectors(), 1);
    assert_eq!(
        probe.read_flash(FLASH_START, SECTOR_SIZE as usize),
        vec![0xFF; SECTOR_SIZE as usize]
    );
}

#[test]
fn plans_outside_the_flash_are_rejected() {
    let probe = FakeProbe::new();
    let algorithm = flash_algorithm(&probe);

    let mut builder = FlashPlan::builder(&algorithm);
    assert!(matches!(
        builder.add_data(FLASH_START + 0x1FF0, &[0; 0x20]),
        Err(FlashError::AddressNotInFlash { .. })
    ));

    builder.add_data(FLASH_START, &[0; 0x20]).unwrap();
    assert!(matches!(
        builder.add_data(FLASH_START + 0x10, &[0; 4]),
        Err(FlashError::DataOverlaps { .. })
    ));
}
