//! Crash recovery tests: orphaned working copies at the next open.

use sealdb_core::sql::SQLITE_HEADER;
use sealdb_core::{CoreError, DiscardReason, RecoveryOutcome};
use sealdb_testkit::prelude::*;
use std::time::Duration;

#[test]
fn correct_horse_scenario() {
    let vault = TestVault::new();

    let db = vault.open("correct-horse").unwrap();
    insert_item(&db, "the row");
    db.request_flush(Duration::ZERO);
    assert!(db.wait_idle(IDLE_TIMEOUT));
    crash(db, CrashPoint::BeforeFlush);

    let db = vault.open("correct-horse").unwrap();
    assert_eq!(item_names(&db), vec!["the row"]);
}

#[test]
fn unsealed_writes_are_promoted_and_persisted() {
    let mut vault = TestVault::new();
    vault.configure(|c| c.auto_flush(false));

    let db = vault.open(PASSWORD).unwrap();
    insert_item(&db, "sealed");
    db.flush_now().unwrap();
    insert_item(&db, "only in working copy");
    let orphan = crash(db, CrashPoint::BeforeFlush);

    assert_eq!(vault.sealed_item_names(PASSWORD), vec!["sealed"]);

    let db = vault.open(PASSWORD).unwrap();
    assert!(matches!(
        db.recovery(),
        RecoveryOutcome::Promoted { path, .. } if *path == orphan
    ));
    assert_eq!(item_names(&db), vec!["sealed", "only in working copy"]);
    assert!(!orphan.exists());
    db.close().unwrap();

    assert_eq!(
        vault.sealed_item_names(PASSWORD),
        vec!["sealed", "only in working copy"]
    );
}

#[test]
fn promotion_is_sealed_without_further_writes() {
    let mut vault = TestVault::new();
    vault.configure(|c| c.auto_flush(false));

    let db = vault.open(PASSWORD).unwrap();
    insert_item(&db, "a");
    crash(db, CrashPoint::BeforeFlush);

    let db = vault.open(PASSWORD).unwrap();
    assert!(matches!(db.recovery(), RecoveryOutcome::Promoted { .. }));
    assert!(db.wait_idle(IDLE_TIMEOUT));
    assert_eq!(vault.sealed_item_names(PASSWORD), vec!["a"]);
    assert!(db.stats().flushes_completed >= 1);
}

#[test]
fn flushed_orphan_is_discarded_as_identical() {
    let vault = TestVault::new();
    let db = vault.open(PASSWORD).unwrap();
    insert_item(&db, "bolt");
    let orphan = crash(db, CrashPoint::AfterFlush);

    let db = vault.open(PASSWORD).unwrap();
    assert_eq!(
        db.recovery(),
        &RecoveryOutcome::Discarded {
            path: orphan.clone(),
            reason: DiscardReason::Identical,
        }
    );
    assert!(!orphan.exists());
    assert_eq!(item_names(&db), vec!["bolt"]);
}

#[test]
fn orphan_sealed_but_not_recorded_is_promoted() {
    let vault = TestVault::new();
    let db = vault.open(PASSWORD).unwrap();
    insert_item(&db, "bolt");
    crash_before_sequence_recorded(&vault, db);

    let db = vault.open(PASSWORD).unwrap();
    assert!(matches!(db.recovery(), RecoveryOutcome::Promoted { .. }));
    assert_eq!(item_names(&db), vec!["bolt"]);
}

#[test]
fn stale_orphan_is_discarded() {
    let mut vault = TestVault::new();
    vault.configure(|c| c.auto_flush(false));

    // Session A crashes after its first flush.
    let db = vault.open(PASSWORD).unwrap();
    insert_item(&db, "old");
    db.flush_now().unwrap();
    let stale = crash(db, CrashPoint::BeforeFlush);
    let stale_bytes = std::fs::read(&stale).unwrap();

    // Session B takes over and seals more.
    let db = vault.open(PASSWORD).unwrap();
    insert_item(&db, "new");
    db.flush_now().unwrap();
    db.flush_now().unwrap();
    db.close().unwrap();

    // Session A's copy reappears as the recorded orphan.
    let orphan = plant_orphan(&vault, "stale.db", &stale_bytes);

    let db = vault.open(PASSWORD).unwrap();
    assert!(matches!(
        db.recovery(),
        RecoveryOutcome::Discarded {
            reason: DiscardReason::Stale { .. },
            ..
        }
    ));
    assert!(!orphan.exists());
    assert_eq!(item_names(&db), vec!["old", "new"]);
}

#[test]
fn half_written_orphans_are_discarded() {
    let cases: [(&str, Vec<u8>, DiscardReason); 2] = [
        ("empty.db", Vec::new(), DiscardReason::Empty),
        ("garbage.db", b"not a database at all".to_vec(), DiscardReason::BadHeader),
    ];

    for (name, contents, expected) in cases {
        let vault = TestVault::new();
        let db = vault.open(PASSWORD).unwrap();
        insert_item(&db, "bolt");
        db.close().unwrap();

        let orphan = plant_orphan(&vault, name, &contents);
        let db = vault.open(PASSWORD).unwrap();

        assert_eq!(
            db.recovery(),
            &RecoveryOutcome::Discarded {
                path: orphan.clone(),
                reason: expected,
            }
        );
        assert!(!orphan.exists());
        assert_eq!(item_names(&db), vec!["bolt"]);
    }
}

#[test]
fn damaged_orphan_never_blocks_open() {
    let vault = TestVault::new();
    let db = vault.open(PASSWORD).unwrap();
    insert_item(&db, "bolt");
    db.close().unwrap();

    let mut contents = SQLITE_HEADER.to_vec();
    contents.extend(std::iter::repeat(0xa5).take(8192));
    plant_orphan(&vault, "damaged.db", &contents);

    let db = vault.open(PASSWORD).unwrap();
    assert!(matches!(db.recovery(), RecoveryOutcome::Discarded { .. }));
    assert_eq!(item_names(&db), vec!["bolt"]);
}

#[test]
fn missing_orphan_is_clean() {
    let vault = TestVault::new();
    vault.open(PASSWORD).unwrap().close().unwrap();
    let orphan = plant_orphan(&vault, "gone.db", b"x");
    std::fs::remove_file(&orphan).unwrap();

    let db = vault.open(PASSWORD).unwrap();
    assert_eq!(db.recovery(), &RecoveryOutcome::Clean);
}

#[test]
fn wrong_password_with_orphan_present_leaves_everything() {
    let vault = TestVault::new();
    let db = vault.open(PASSWORD).unwrap();
    insert_item(&db, "bolt");
    db.flush_now().unwrap();
    insert_item(&db, "nut");
    let orphan = crash(db, CrashPoint::BeforeFlush);
    let sealed = vault.sealed_bytes();

    assert!(matches!(
        vault.open("wrong"),
        Err(CoreError::WrongPassword)
    ));
    assert!(orphan.exists());
    assert_eq!(vault.sealed_bytes(), sealed);

    let db = vault.open(PASSWORD).unwrap();
    assert_eq!(item_names(&db), vec!["bolt", "nut"]);
}

#[test]
fn crash_before_first_flush_of_new_database() {
    let mut vault = TestVault::new();
    vault.configure(|c| c.auto_flush(false));

    let db = vault.open(PASSWORD).unwrap();
    insert_item(&db, "first");
    crash(db, CrashPoint::BeforeFlush);
    assert!(vault.sealed_bytes().map_or(true, |b| b.is_empty()));

    let db = vault.open(PASSWORD).unwrap();
    assert!(matches!(db.recovery(), RecoveryOutcome::Promoted { .. }));
    assert_eq!(item_names(&db), vec!["first"]);
}

#[test]
fn tampered_sealed_file_is_rejected() {
    let vault = TestVault::new();
    let db = vault.open(PASSWORD).unwrap();
    insert_item(&db, "bolt");
    db.close().unwrap();

    let len = vault.sealed_bytes().unwrap().len() as u64;
    flip_byte(&vault.path(), len / 2);

    assert!(matches!(
        vault.open(PASSWORD),
        Err(CoreError::WrongPassword)
    ));
}
