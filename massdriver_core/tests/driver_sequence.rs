//! Sequencing rules of the mass driver, exercised with pinless mock stages.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use massdriver_core::mocks::MockStage;
use massdriver_core::{DriverError, MassDriver, State};
use massdriver_traits::{PinChange, PinMode};
use rstest::rstest;

type Errors = Arc<Mutex<Vec<(i8, DriverError)>>>;
type Done = Arc<Mutex<Option<Vec<Duration>>>>;

struct Rig {
    driver: MassDriver<MockStage>,
    stages: Vec<MockStage>,
    errors: Errors,
    done: Done,
}

fn rig(n: usize) -> Rig {
    let stages: Vec<MockStage> = (0..n).map(|_| MockStage::new()).collect();
    let errors: Errors = Arc::default();
    let done: Done = Arc::default();
    let (e, d) = (errors.clone(), done.clone());
    let driver = MassDriver::builder()
        .with_stages(stages.iter().cloned())
        .on_error(move |idx, err| e.lock().unwrap().push((idx, err.clone())))
        .on_complete(move |ts| *d.lock().unwrap() = Some(ts.to_vec()))
        .build()
        .unwrap();
    driver.configure(PinMode::InputPullUp, PinChange::Falling).unwrap();
    Rig {
        driver,
        stages,
        errors,
        done,
    }
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

#[test]
fn stages_complete_in_order() {
    let r = rig(3);
    r.driver.arm().unwrap();
    assert_eq!(r.driver.status(), (State::Armed, 0));
    assert_eq!(r.stages[0].arms(), 1);
    assert_eq!(r.stages[1].arms(), 0);

    assert!(r.stages[0].complete(ms(1)));
    assert_eq!(r.driver.status(), (State::Active, 1));
    assert_eq!(r.stages[1].arms(), 1);

    assert!(r.stages[1].complete(ms(2)));
    assert_eq!(r.driver.status(), (State::Active, 2));

    assert!(r.stages[2].complete(ms(3)));
    assert_eq!(r.driver.state(), State::Done);
    assert_eq!(r.done.lock().unwrap().clone(), Some(vec![ms(1), ms(2), ms(3)]));
    assert_eq!(r.driver.timestamps(), vec![ms(1), ms(2), ms(3)]);
    assert!(r.errors.lock().unwrap().is_empty());
}

#[test]
fn single_stage_goes_straight_to_done() {
    let r = rig(1);
    r.driver.arm().unwrap();
    r.stages[0].complete(ms(7));
    assert_eq!(r.driver.state(), State::Done);
    assert_eq!(r.driver.timestamps(), vec![ms(7)]);
}

#[test]
fn report_from_wrong_stage_fails_sequence() {
    let r = rig(3);
    r.driver.arm().unwrap();

    r.stages[1].complete(ms(1));
    assert_eq!(r.driver.status(), (State::Failed, 1));
    assert_eq!(
        r.errors.lock().unwrap().first().cloned(),
        Some((1, DriverError::OutOfSequence { expected: 0, got: 1 }))
    );
    // nothing downstream of the bad report was armed
    assert_eq!(r.stages[2].arms(), 0);
    assert_eq!(r.driver.timestamps(), vec![Duration::ZERO; 3]);

    // the correct stage reporting late does not revive it
    r.stages[0].complete(ms(2));
    assert_eq!(r.driver.state(), State::Failed);
    assert!(r.done.lock().unwrap().is_none());
}

#[test]
fn repeated_report_fails_sequence() {
    let r = rig(3);
    r.driver.arm().unwrap();
    r.stages[0].complete(ms(1));
    r.stages[0].complete(ms(2));
    assert_eq!(r.driver.status(), (State::Failed, 0));
    assert_eq!(r.driver.timestamps()[0], ms(1));
}

#[test]
fn arm_while_busy_is_rejected() {
    let r = rig(2);
    r.driver.arm().unwrap();
    assert_eq!(r.driver.arm(), Err(DriverError::DriverBusy));
    assert_eq!(r.errors.lock().unwrap().as_slice(), &[(-1, DriverError::DriverBusy)]);
    // the rejected arm left the running sequence alone
    assert_eq!(r.stages[0].resets(), 1);
    assert_eq!(r.stages[0].arms(), 1);
    assert_eq!(r.driver.status(), (State::Armed, 0));
}

#[rstest]
#[case::active(&[0], State::Active)]
#[case::done(&[0, 1, 2], State::Done)]
#[case::failed(&[1], State::Failed)]
fn arm_rejected_until_reset(#[case] reports: &[usize], #[case] state: State) {
    let r = rig(3);
    r.driver.arm().unwrap();
    for (t, &i) in reports.iter().enumerate() {
        r.stages[i].complete(ms(t as u64 + 1));
    }
    let status = r.driver.status();
    assert_eq!(status.0, state);
    let stamps = r.driver.timestamps();
    let counts: Vec<_> = r.stages.iter().map(|s| (s.arms(), s.resets())).collect();

    assert_eq!(r.driver.arm(), Err(DriverError::DriverBusy));
    assert_eq!(r.errors.lock().unwrap().last().cloned(), Some((-1, DriverError::DriverBusy)));
    assert_eq!(r.driver.status(), status);
    assert_eq!(r.driver.timestamps(), stamps);
    let after: Vec<_> = r.stages.iter().map(|s| (s.arms(), s.resets())).collect();
    assert_eq!(after, counts);

    r.driver.reset();
    r.driver.arm().unwrap();
    assert_eq!(r.driver.status(), (State::Armed, 0));
}

#[test]
fn first_stage_arm_failure() {
    let r = rig(2);
    r.stages[0].fail_arm(true);
    assert!(matches!(r.driver.arm(), Err(DriverError::Hardware(_))));
    assert_eq!(r.driver.status(), (State::Failed, 0));
    assert_eq!(r.errors.lock().unwrap()[0].0, 0);

    r.driver.reset();
    assert_eq!(r.driver.status(), (State::Idle, -1));
    r.stages[0].fail_arm(false);
    r.driver.arm().unwrap();
    assert_eq!(r.driver.state(), State::Armed);
}

#[test]
fn next_stage_arm_failure() {
    let r = rig(3);
    r.stages[1].fail_arm(true);
    r.driver.arm().unwrap();
    r.stages[0].complete(ms(1));
    assert_eq!(r.driver.status(), (State::Failed, 1));
    assert!(matches!(r.errors.lock().unwrap()[0], (1, DriverError::Hardware(_))));
}

#[test]
fn abort_resets_and_aborts_every_stage() {
    let r = rig(3);
    r.driver.arm().unwrap();
    r.stages[0].complete(ms(1));
    r.driver.abort();
    assert_eq!(r.driver.status(), (State::Idle, -1));
    assert_eq!(r.driver.timestamps(), vec![Duration::ZERO; 3]);
    for s in &r.stages {
        assert_eq!(s.aborts(), 1);
        assert_eq!(s.resets(), 2);
    }
    r.driver.arm().unwrap();
}

#[rstest]
#[case(PinMode::Output, PinChange::Falling, DriverError::InvalidPinMode)]
#[case(PinMode::Input, PinChange::Toggle, DriverError::InvalidPinChange)]
fn configure_validates_sense_settings(
    #[case] mode: PinMode,
    #[case] change: PinChange,
    #[case] err: DriverError,
) {
    let driver = MassDriver::builder()
        .with_stage(MockStage::new())
        .build()
        .unwrap();
    assert_eq!(driver.configure(mode, change), Err(err));
}

#[test]
fn stage_lookup_and_count() {
    let r = rig(2);
    assert_eq!(r.driver.len(), 2);
    assert!(r.driver.stage(1).is_ok());
    assert_eq!(r.driver.stage(2).err(), Some(DriverError::InvalidStage(2)));
    assert_eq!(r.driver.stage(-1).err(), Some(DriverError::InvalidStage(-1)));
    assert_eq!(
        MassDriver::<MockStage>::builder().build().err(),
        Some(DriverError::StageCount(0))
    );
}
