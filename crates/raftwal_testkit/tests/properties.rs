//! Property tests of the durable log against the reference model.

use proptest::prelude::*;
use raftwal_core::{ConfState, Entry, HardState, Snapshot, WalError, SLOTS_PER_SEGMENT};
use raftwal_testkit::prelude::*;

fn assert_matches_model(log: &TestLog, model: &ModelLog) -> Result<(), TestCaseError> {
    prop_assert_eq!(log.first_index().unwrap(), model.first_index());
    prop_assert_eq!(log.last_index().unwrap(), model.last_index());
    prop_assert_eq!(
        log.entries(model.first_index(), model.last_index() + 1, None)
            .unwrap(),
        model.entries(model.first_index(), model.last_index() + 1).unwrap()
    );
    prop_assert_eq!(log.term(model.floor()).unwrap(), model.term(model.floor()).unwrap());
    prop_assert_eq!(log.initial_state().unwrap().hard_state, model.hard_state());
    Ok(())
}

proptest! {
    #![proptest_config(PropTestConfig::default().to_proptest_config())]

    #[test]
    fn operations_match_model(ops in operation_sequence_strategy(40)) {
        let mut log = TestLog::new();
        let mut model = ModelLog::new();
        let mut floor = 0;

        for op in ops {
            match op {
                LogOperation::Append { back, count, term_bump, fill } => {
                    let batch = model.batch(back, count, term_bump, fill);
                    log.append(&batch).unwrap();
                    model.append(&batch);
                }
                LogOperation::Snapshot { back } => {
                    let index = model.snapshot_target(back);
                    let expected = model.compact(index);
                    let actual = log.create_snapshot(index, ConfState::with_voters([1]), vec![7]);
                    match (expected, actual) {
                        (Ok(()), Ok(snapshot)) => {
                            prop_assert_eq!(snapshot.metadata.index, index);
                        }
                        (Err(WalError::SnapshotOutOfDate), Err(WalError::SnapshotOutOfDate)) => {}
                        (Err(WalError::Unavailable), Err(WalError::Unavailable)) => {}
                        (expected, actual) => {
                            prop_assert!(false, "snapshot at {}: model {:?}, log {:?}", index, expected, actual);
                        }
                    }
                }
                LogOperation::SetHardState(hs) => {
                    log.set_hard_state(&hs).unwrap();
                    model.set_hard_state(hs);
                }
                LogOperation::Reopen => log.reopen(),
            }

            // The floor never moves backwards.
            prop_assert!(model.floor() >= floor);
            floor = model.floor();

            assert_matches_model(&log, &model)?;
        }

        log.reopen();
        assert_matches_model(&log, &model)?;
    }

    #[test]
    fn saved_batches_read_back(batch in batch_strategy(1, 3, 64)) {
        let mut log = TestLog::new();
        let last = batch.len() as u64;
        log.save(&HardState::new(3, 1, last), &batch, &Snapshot::default()).unwrap();
        prop_assert_eq!(log.entries(1, last + 1, None).unwrap(), batch.clone());

        log.reopen();
        prop_assert_eq!(log.entries(1, last + 1, None).unwrap(), batch);
    }

    #[test]
    fn max_size_limits_but_never_empties(batch in batch_strategy(1, 1, 32), max_size in 0u64..2048) {
        let log = TestLog::new();
        log.append(&batch).unwrap();
        let last = batch.len() as u64;

        let got = log.entries(1, last + 1, Some(max_size)).unwrap();
        prop_assert!(!got.is_empty());
        prop_assert_eq!(&got[..], &batch[..got.len()]);
        if got.len() > 1 {
            let total: u64 = got.iter().map(Entry::size).sum();
            prop_assert!(total <= max_size);
        }
    }

    #[test]
    fn hard_state_is_idempotent(hs in hard_state_strategy()) {
        let mut log = TestLog::new();
        log.set_hard_state(&hs).unwrap();
        let once = log.initial_state().unwrap();
        log.set_hard_state(&hs).unwrap();
        prop_assert_eq!(log.initial_state().unwrap(), once);

        log.reopen();
        let expected = if hs.is_empty() { HardState::default() } else { hs };
        prop_assert_eq!(log.initial_state().unwrap().hard_state, expected);
    }
}

#[test]
fn rotation_is_transparent() {
    let mut log = TestLog::new();
    let count = SLOTS_PER_SEGMENT + 500;
    for start in (1..=count).step_by(1000) {
        let end = (start + 1000).min(count + 1);
        log.append(&entries(start..end, 1)).unwrap();
    }
    assert_eq!(log.segments().unwrap().len(), 2);

    let boundary = SLOTS_PER_SEGMENT;
    let across = log.entries(boundary - 2, boundary + 3, None).unwrap();
    assert_eq!(across, entries(boundary - 2..boundary + 3, 1));

    // Overwrite reaching back into the first segment drops the second.
    log.append(&entries(boundary - 10..boundary - 5, 2)).unwrap();
    assert_eq!(log.last_index().unwrap(), boundary - 6);
    assert_eq!(log.segments().unwrap().len(), 1);

    log.reopen();
    assert_eq!(log.last_index().unwrap(), boundary - 6);
    assert_eq!(log.term(boundary - 6).unwrap(), 2);
    assert_eq!(log.term(boundary - 11).unwrap(), 1);
    assert!(matches!(log.term(boundary), Err(WalError::Unavailable)));
}

#[test]
fn example_scenario() {
    let log = TestLog::new();
    log.save(&HardState::new(1, 1, 2), &entries(1..3, 1), &Snapshot::default())
        .unwrap();

    let snapshot = log
        .create_snapshot(2, ConfState::with_voters([1]), b"snap".to_vec())
        .unwrap();

    assert_eq!(log.first_index().unwrap(), 3);
    assert!(matches!(log.entries(1, 2, None), Err(WalError::Compacted)));
    assert_eq!(snapshot.metadata.index, 2);
    assert_eq!(snapshot.metadata.term, 1);
    assert_eq!(log.snapshot().unwrap().data, b"snap".to_vec());
}
