use std::sync::mpsc;
use std::time::Duration;
use cyton_impedance::cyton::BoardCommand;
use cyton_impedance::simulator::{Fault, SimulatedBoard};
use cyton_impedance::{
    check_impedance, BoardHandle, CancelToken, ChannelOutcome, FailureReason, ImpedanceError,
    ImpedanceSequencer, MeasurementConfig,
};

fn quick_config(channels: usize) -> MeasurementConfig {
    MeasurementConfig::for_port("sim")
        .with_channel_count(channels)
        .with_settle(Duration::ZERO)
        .with_command_timeout(Duration::from_millis(50))
}

fn command_log(handle: &BoardHandle<SimulatedBoard>) -> Vec<BoardCommand> {
    handle.inspect(|b| b.command_log().to_vec()).unwrap()
}

fn reset_count(log: &[BoardCommand]) -> usize {
    log.iter().filter(|c| **c == BoardCommand::ResetDefaults).count()
}

fn enabled_channels(log: &[BoardCommand]) -> Vec<u8> {
    log.iter()
        .filter(|c| c.enables_lead_off())
        .filter_map(|c| c.channel())
        .collect()
}

#[test]
fn channels_run_in_ascending_order_one_drive_at_a_time() {
    let config = quick_config(4);
    let handle = BoardHandle::new(SimulatedBoard::cyton(4, 20_000.0));
    let report = check_impedance(&config, &handle).unwrap();

    let order: Vec<u8> = report.results.iter().map(|r| r.channel).collect();
    assert_eq!(order, vec![1, 2, 3, 4]);
    assert_eq!(report.valid_count(), 4);

    let log = command_log(&handle);
    assert_eq!(enabled_channels(&log), vec![1, 2, 3, 4]);
    // every enable is preceded by the previous channel's disable
    let mut driven: Option<u8> = None;
    for cmd in &log {
        if cmd.enables_lead_off() {
            assert_eq!(driven, None, "{cmd} sent while another channel was driven");
            driven = cmd.channel();
        } else if let BoardCommand::LeadOff { channel, .. } = cmd {
            if driven == Some(*channel) {
                driven = None;
            }
        }
    }
    assert_eq!(handle.inspect(|b| b.max_simultaneous_drive()).unwrap(), 1);
}

#[test]
fn reset_runs_once_after_a_clean_run() {
    let config = quick_config(3);
    let handle = BoardHandle::new(SimulatedBoard::cyton(3, 8_000.0));
    check_impedance(&config, &handle).unwrap();
    let log = command_log(&handle);
    assert_eq!(reset_count(&log), 1);
    // reset is the last thing the run does
    let reset_at = log.iter().position(|c| *c == BoardCommand::ResetDefaults).unwrap();
    assert_eq!(&log[reset_at + 1..], &[
        BoardCommand::lead_off_off(1),
        BoardCommand::lead_off_off(2),
        BoardCommand::lead_off_off(3),
    ]);
    assert!(handle.inspect(|b| b.driven_channels()).unwrap().is_empty());
}

#[test]
fn rejected_channel_fails_alone_and_reset_still_runs_once() {
    let config = quick_config(3);
    let handle = BoardHandle::new(SimulatedBoard::cyton(3, 8_000.0).with_fault(2, Fault::RejectCommands));
    let report = check_impedance(&config, &handle).unwrap();
    assert_eq!(report.get(1).unwrap().outcome, ChannelOutcome::Done);
    assert_eq!(
        report.get(2).unwrap().outcome,
        ChannelOutcome::Failed(FailureReason::BoardCommandError)
    );
    assert_eq!(report.get(2).unwrap().impedance_ohms, None);
    assert_eq!(report.get(3).unwrap().outcome, ChannelOutcome::Done);
    assert_eq!(reset_count(&command_log(&handle)), 1);
}

#[test]
fn unanswered_command_times_out_for_that_channel() {
    let config = quick_config(3);
    let handle = BoardHandle::new(SimulatedBoard::cyton(3, 8_000.0).with_fault(2, Fault::NoResponse));
    let report = check_impedance(&config, &handle).unwrap();
    assert_eq!(report.get(2).unwrap().failure(), Some(FailureReason::Timeout));
    assert!(report.get(1).unwrap().valid);
    assert!(report.get(3).unwrap().valid);
}

#[test]
fn stalled_stream_times_out_and_drive_is_released() {
    let config = quick_config(2);
    let handle = BoardHandle::new(SimulatedBoard::cyton(2, 8_000.0).with_fault(1, Fault::StallStream));
    let report = check_impedance(&config, &handle).unwrap();
    assert_eq!(report.get(1).unwrap().failure(), Some(FailureReason::Timeout));
    assert!(report.get(2).unwrap().valid);
    let log = command_log(&handle);
    let off_1 = log.iter().position(|c| *c == BoardCommand::lead_off_off(1)).unwrap();
    let on_2 = log.iter().position(|c| c.enables_lead_off() && c.channel() == Some(2)).unwrap();
    assert!(off_1 < on_2);
}

#[test]
fn short_stream_below_rms_window_is_insufficient() {
    let config = quick_config(2);
    let handle = BoardHandle::new(SimulatedBoard::cyton(2, 8_000.0).with_fault(1, Fault::ShortStream(100)));
    let report = check_impedance(&config, &handle).unwrap();
    assert_eq!(report.get(1).unwrap().failure(), Some(FailureReason::InsufficientSamples));
    assert_eq!(report.get(1).unwrap().impedance_ohms, None);
    assert_eq!(report.get(2).unwrap().outcome, ChannelOutcome::Done);
}

#[test]
fn truncated_stream_longer_than_rms_window_is_still_insufficient() {
    let config = quick_config(2);
    for frames in [250, 300, 499] {
        let board = SimulatedBoard::cyton(2, 10_000.0)
            .with_noise(0.0)
            .with_fault(1, Fault::ShortStream(frames));
        let handle = BoardHandle::new(board);
        let report = check_impedance(&config, &handle).unwrap();
        let result = report.get(1).unwrap();
        assert_eq!(result.failure(), Some(FailureReason::InsufficientSamples), "{frames} frames");
        assert_eq!(result.impedance_ohms, None);
        assert!(!result.valid);
        assert!(report.get(2).unwrap().valid);
        assert!(handle.inspect(|b| b.driven_channels()).unwrap().is_empty());
    }
}

#[test]
fn acquisition_shorter_than_rms_window_fails_every_channel() {
    let config = quick_config(3)
        .with_acquisition(Duration::from_millis(500))
        .with_rms_window(Duration::from_secs(1));
    let handle = BoardHandle::new(SimulatedBoard::cyton(3, 8_000.0));
    let report = check_impedance(&config, &handle).unwrap();
    assert_eq!(report.results.len(), 3);
    for result in &report.results {
        assert_eq!(result.failure(), Some(FailureReason::InsufficientSamples));
        assert_eq!(result.impedance_ohms, None);
        assert!(!result.valid);
    }
    let log = command_log(&handle);
    assert!(enabled_channels(&log).is_empty());
    assert_eq!(reset_count(&log), 1);
}

#[test]
fn cancel_mid_run_skips_remaining_channels_and_resets_once() {
    let config = quick_config(5);
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let board = SimulatedBoard::cyton(5, 8_000.0).with_command_hook(move |cmd| {
        if cmd.enables_lead_off() && cmd.channel() == Some(3) {
            trigger.cancel();
        }
    });
    let handle = BoardHandle::new(board);
    let report = ImpedanceSequencer::new(&config, cancel).run(&handle).unwrap();

    assert!(report.cancelled);
    assert!(report.get(1).unwrap().valid);
    assert!(report.get(2).unwrap().valid);
    for ch in 3..=5 {
        assert_eq!(report.get(ch).unwrap().failure(), Some(FailureReason::Cancelled));
    }
    let log = command_log(&handle);
    assert_eq!(enabled_channels(&log), vec![1, 2, 3]);
    assert_eq!(reset_count(&log), 1);
    assert!(handle.inspect(|b| b.driven_channels()).unwrap().is_empty());
}

#[test]
fn cancelled_before_start_touches_no_channel() {
    let config = quick_config(2);
    let cancel = CancelToken::new();
    cancel.cancel();
    let handle = BoardHandle::new(SimulatedBoard::cyton(2, 8_000.0));
    let report = ImpedanceSequencer::new(&config, cancel).run(&handle).unwrap();
    assert!(report.cancelled);
    assert!(report.results.iter().all(|r| r.failure() == Some(FailureReason::Cancelled)));
    let log = command_log(&handle);
    assert_eq!(log[0], BoardCommand::ResetDefaults);
    assert_eq!(reset_count(&log), 1);
}

#[test]
fn failed_reset_is_fatal() {
    let config = quick_config(2);
    let handle = BoardHandle::new(SimulatedBoard::cyton(2, 8_000.0).with_failing_reset());
    let err = check_impedance(&config, &handle).unwrap_err();
    assert!(matches!(err, ImpedanceError::ResetFailed(_)), "{err}");
    assert!(!handle.is_busy());
}

#[test]
fn failed_default_command_still_switches_every_channel_off() {
    let config = quick_config(3);
    let handle = BoardHandle::new(SimulatedBoard::cyton(3, 8_000.0).with_failing_reset());
    let err = check_impedance(&config, &handle).unwrap_err();
    match err {
        ImpedanceError::ResetFailed(inner) => assert!(matches!(*inner, ImpedanceError::Timeout(_))),
        other => panic!("unexpected error {other}"),
    }
    let log = command_log(&handle);
    let reset_at = log.iter().position(|c| *c == BoardCommand::ResetDefaults).unwrap();
    assert_eq!(&log[reset_at + 1..], &[
        BoardCommand::lead_off_off(1),
        BoardCommand::lead_off_off(2),
        BoardCommand::lead_off_off(3),
    ]);
    assert!(handle.inspect(|b| b.driven_channels()).unwrap().is_empty());
}

#[test]
fn held_claim_makes_a_second_run_busy() {
    let config = quick_config(2);
    let handle = BoardHandle::new(SimulatedBoard::cyton(2, 8_000.0));
    let claim = handle.claim().unwrap();
    let err = check_impedance(&config, &handle).unwrap_err();
    assert!(matches!(err, ImpedanceError::DeviceBusy));
    drop(claim);
    assert!(command_log(&handle).is_empty());
    assert!(check_impedance(&config, &handle).is_ok());
}

#[test]
fn concurrent_run_is_rejected_while_first_is_active() {
    let (started_tx, started_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let mut gate = Some((started_tx, go_rx));
    let board = SimulatedBoard::cyton(2, 8_000.0).with_command_hook(move |cmd| {
        if cmd.enables_lead_off() {
            if let Some((started, go)) = gate.take() {
                started.send(()).unwrap();
                go.recv().unwrap();
            }
        }
    });
    let handle = BoardHandle::new(board);
    let first = {
        let handle = handle.clone();
        std::thread::spawn(move || check_impedance(&quick_config(2), &handle))
    };
    started_rx.recv().unwrap();
    assert!(handle.is_busy());
    let err = check_impedance(&quick_config(2), &handle).unwrap_err();
    assert!(matches!(err, ImpedanceError::DeviceBusy));
    go_tx.send(()).unwrap();
    let report = first.join().unwrap().unwrap();
    assert_eq!(report.valid_count(), 2);
    assert!(!handle.is_busy());
}

#[test]
fn invalid_config_is_rejected_before_touching_the_board() {
    let config = quick_config(2).with_passband(60.0, 10.0);
    let handle = BoardHandle::new(SimulatedBoard::cyton(2, 8_000.0));
    assert!(matches!(
        check_impedance(&config, &handle),
        Err(ImpedanceError::InvalidConfig(_))
    ));
    assert!(command_log(&handle).is_empty());
}

#[test]
fn more_channels_than_the_board_is_invalid() {
    let config = quick_config(8);
    let handle = BoardHandle::new(SimulatedBoard::cyton(4, 8_000.0));
    assert!(matches!(
        check_impedance(&config, &handle),
        Err(ImpedanceError::InvalidConfig(_))
    ));
}

#[test]
fn daisy_channels_are_measured() {
    let config = quick_config(10);
    let handle = BoardHandle::new(SimulatedBoard::cyton(10, 15_000.0).with_electrode(10, Some(40_000.0)));
    let report = check_impedance(&config, &handle).unwrap();
    assert_eq!(report.valid_count(), 10);
    let z10 = report.get(10).unwrap().impedance_ohms.unwrap();
    assert!((z10 - 40_000.0).abs() < 0.03 * 40_000.0, "z10 = {z10}");
    let log = command_log(&handle);
    assert!(log.iter().any(|c| c.to_ascii() == "zW01Z"));
}
