//! Behavior every records backend must share.

use fsrecords_storage::{
    open_records_storage, ConnectionStatus, Header, RecordField, RecordLayout, RecordsStorage,
    StorageError, StorageKind, StorageOptions,
};
use proptest::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn open(kind: StorageKind, path: &Path) -> Box<dyn RecordsStorage> {
    open_records_storage(kind, path, RecordLayout::default(), StorageOptions::default()).unwrap()
}

fn open_read_only(kind: StorageKind, path: &Path) -> Box<dyn RecordsStorage> {
    open_records_storage(kind, path, RecordLayout::default(), StorageOptions::read_only()).unwrap()
}

#[test]
fn fresh_storage_is_empty() {
    let dir = tempdir().unwrap();
    for kind in StorageKind::ALL {
        let records = open(kind, &dir.path().join(kind.as_str()));
        assert_eq!(records.kind(), kind);
        assert_eq!(records.records_count(), 0);
        assert_eq!(records.version(), 0);
        assert_eq!(records.global_mod_count(), 0);
        assert_eq!(records.connection_status(), ConnectionStatus::SafelyClosed);
        assert!(!records.is_dirty());
        records.close().unwrap();
    }
}

#[test]
fn fields_survive_reopen() {
    let dir = tempdir().unwrap();
    for kind in StorageKind::ALL {
        let path = dir.path().join(kind.as_str());
        {
            let records = open(kind, &path);
            for i in 1..=10 {
                let id = records.allocate_record().unwrap();
                assert_eq!(id, i);
                records.set_parent(id, i - 1).unwrap();
                records.set_name_ref(id, i * 100).unwrap();
                records.set_flags(id, -(i as i32)).unwrap();
                records.set_attribute_ref(id, i * 3).unwrap();
                records.set_content_ref(id, i * 5).unwrap();
                records.set_record_timestamp(id, 1_700_000_000_000 + i64::from(i)).unwrap();
                records.set_length(id, i64::MAX - i64::from(i)).unwrap();
            }
            records.set_version(42).unwrap();
            records.set_timestamp(123_456).unwrap();
            assert!(records.is_dirty());
            records.close().unwrap();
        }

        let records = open(kind, &path);
        assert_eq!(records.records_count(), 10, "{kind}");
        assert_eq!(records.version(), 42);
        assert_eq!(records.timestamp(), 123_456);
        for i in 1..=10u32 {
            assert_eq!(records.parent(i).unwrap(), i - 1);
            assert_eq!(records.name_ref(i).unwrap(), i * 100);
            assert_eq!(records.flags(i).unwrap(), -(i as i32));
            assert_eq!(records.attribute_ref(i).unwrap(), i * 3);
            assert_eq!(records.content_ref(i).unwrap(), i * 5);
            assert_eq!(records.record_timestamp(i).unwrap(), 1_700_000_000_000 + i64::from(i));
            assert_eq!(records.length(i).unwrap(), i64::MAX - i64::from(i));
        }
        records.close().unwrap();
    }
}

#[test]
fn out_of_range_ids_are_rejected() {
    let dir = tempdir().unwrap();
    for kind in StorageKind::ALL {
        let records = open(kind, &dir.path().join(kind.as_str()));
        let id = records.allocate_record().unwrap();

        for bad in [0, id + 1, u32::MAX] {
            assert!(matches!(
                records.get_int(bad, RecordField::Flags),
                Err(StorageError::IndexOutOfRange { .. })
            ));
            assert!(matches!(
                records.set_long(bad, RecordField::Length, 1),
                Err(StorageError::IndexOutOfRange { .. })
            ));
        }
        assert_eq!(records.records_count(), 1);
        records.close().unwrap();
    }
}

#[test]
fn field_width_is_enforced() {
    let dir = tempdir().unwrap();
    for kind in StorageKind::ALL {
        let records = open(kind, &dir.path().join(kind.as_str()));
        let id = records.allocate_record().unwrap();
        assert!(matches!(
            records.get_int(id, RecordField::Length),
            Err(StorageError::InvalidLayout(_))
        ));
        assert!(matches!(
            records.set_long(id, RecordField::Parent, 1),
            Err(StorageError::InvalidLayout(_))
        ));
        records.close().unwrap();
    }
}

#[test]
fn writes_bump_mod_counts() {
    let dir = tempdir().unwrap();
    for kind in StorageKind::ALL {
        let records = open(kind, &dir.path().join(kind.as_str()));
        let a = records.allocate_record().unwrap();
        let b = records.allocate_record().unwrap();

        records.set_flags(a, 1).unwrap();
        let after_first = records.global_mod_count();
        assert!(after_first > 0);
        assert_eq!(records.mod_count(a).unwrap() as u32, after_first);

        records.set_length(b, 10).unwrap();
        assert!(records.global_mod_count() > after_first);
        assert_eq!(records.mod_count(b).unwrap() as u32, records.global_mod_count());
        assert_eq!(records.mod_count(a).unwrap() as u32, after_first);
        records.close().unwrap();
    }
}

#[test]
fn clean_record_zeroes_fields() {
    let dir = tempdir().unwrap();
    for kind in StorageKind::ALL {
        let records = open(kind, &dir.path().join(kind.as_str()));
        let id = records.allocate_record().unwrap();
        records.set_parent(id, 7).unwrap();
        records.set_length(id, 99).unwrap();
        records.clean_record(id).unwrap();
        for field in RecordField::ALL {
            match field.width() {
                fsrecords_storage::FieldWidth::Int => {
                    assert_eq!(records.get_int(id, field).unwrap(), 0, "{kind} {field:?}");
                }
                fsrecords_storage::FieldWidth::Long => {
                    assert_eq!(records.get_long(id, field).unwrap(), 0, "{kind} {field:?}");
                }
            }
        }
        assert_eq!(records.records_count(), 1);
        records.close().unwrap();
    }
}

/// Backends page their files in 4 KiB units.
const PAGE_BYTES: usize = 4096;

#[test]
fn records_spanning_several_pages_survive_reopen() {
    let dir = tempdir().unwrap();
    let record_size = RecordLayout::default().record_size();
    let total = (3 * PAGE_BYTES / record_size + 7) as u32;
    for kind in StorageKind::ALL {
        let path = dir.path().join(kind.as_str());
        {
            let records = open(kind, &path);
            for id in 1..=total {
                assert_eq!(records.allocate_record().unwrap(), id);
                records.set_parent(id, id - 1).unwrap();
                records.set_length(id, i64::from(id) << 20).unwrap();
            }
            for id in (1..=total).filter(|id| id % 10 == 1) {
                records.clean_record(id).unwrap();
            }
            records.close().unwrap();
        }

        let records = open(kind, &path);
        assert_eq!(records.records_count(), total, "{kind}");
        for id in 1..=total {
            let (parent, length) = if id % 10 == 1 {
                (0, 0)
            } else {
                (id - 1, i64::from(id) << 20)
            };
            assert_eq!(records.parent(id).unwrap(), parent, "{kind} record {id}");
            assert_eq!(records.length(id).unwrap(), length, "{kind} record {id}");
        }
        records.close().unwrap();
    }
}

#[test]
fn other_record_size_is_a_layout_mismatch() {
    let dir = tempdir().unwrap();
    let wide = RecordLayout::new(48).unwrap();
    for kind in StorageKind::ALL {
        let path = dir.path().join(kind.as_str());
        {
            let records =
                open_records_storage(kind, &path, wide, StorageOptions::default()).unwrap();
            let id = records.allocate_record().unwrap();
            records.set_flags(id, 5).unwrap();
            records.close().unwrap();
        }
        assert_eq!(Header::read_from(&path).unwrap().record_size, 48);

        let err = open_records_storage(kind, &path, RecordLayout::default(), StorageOptions::default())
            .err()
            .unwrap();
        assert!(
            matches!(err, StorageError::LayoutMismatch { expected: 40, found: 48 }),
            "{kind}: {err}"
        );
        assert!(err.is_structural());

        let records = open_records_storage(kind, &path, wide, StorageOptions::default()).unwrap();
        assert_eq!(records.flags(1).unwrap(), 5, "{kind}");
        records.close().unwrap();
    }
}

#[test]
fn status_is_written_on_force() {
    let dir = tempdir().unwrap();
    for kind in StorageKind::ALL {
        let path = dir.path().join(kind.as_str());
        let records = open(kind, &path);
        records.set_connection_status(ConnectionStatus::Connected).unwrap();
        records.force().unwrap();
        assert!(!records.is_dirty());
        assert_eq!(Header::read_from(&path).unwrap().status, ConnectionStatus::Connected);

        records.set_connection_status(ConnectionStatus::SafelyClosed).unwrap();
        records.close().unwrap();
        assert_eq!(Header::read_from(&path).unwrap().status, ConnectionStatus::SafelyClosed);
    }
}

#[test]
fn dropped_storage_keeps_last_forced_header() {
    let dir = tempdir().unwrap();
    for kind in StorageKind::ALL {
        let path = dir.path().join(kind.as_str());
        {
            let records = open(kind, &path);
            records.set_connection_status(ConnectionStatus::Connected).unwrap();
            records.force().unwrap();
            records.set_connection_status(ConnectionStatus::SafelyClosed).unwrap();
            // dropped without close
        }
        assert_eq!(
            Header::read_from(&path).unwrap().status,
            ConnectionStatus::Connected,
            "{kind}"
        );
    }
}

#[test]
fn closed_storage_rejects_access() {
    let dir = tempdir().unwrap();
    for kind in StorageKind::ALL {
        let records = open(kind, &dir.path().join(kind.as_str()));
        let id = records.allocate_record().unwrap();
        records.close().unwrap();
        assert!(records.is_closed());
        records.close().unwrap();

        assert!(matches!(records.flags(id), Err(StorageError::Closed)));
        assert!(matches!(records.allocate_record(), Err(StorageError::Closed)));
        assert!(matches!(records.force(), Err(StorageError::Closed)));
    }
}

#[test]
fn read_only_storage_reads_but_never_writes() {
    let dir = tempdir().unwrap();
    for kind in StorageKind::ALL {
        let path = dir.path().join(kind.as_str());
        {
            let records = open(kind, &path);
            let id = records.allocate_record().unwrap();
            records.set_content_ref(id, 77).unwrap();
            records.close().unwrap();
        }
        let before = std::fs::read(&path).unwrap();

        let records = open_read_only(kind, &path);
        assert!(records.is_read_only());
        assert_eq!(records.content_ref(1).unwrap(), 77);
        assert!(matches!(records.set_content_ref(1, 1), Err(StorageError::ReadOnly)));
        assert!(matches!(records.clean_record(1), Err(StorageError::ReadOnly)));
        assert!(matches!(records.set_version(3), Err(StorageError::ReadOnly)));
        assert!(matches!(
            records.set_connection_status(ConnectionStatus::Connected),
            Err(StorageError::ReadOnly)
        ));
        records.force().unwrap();
        records.close().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), before, "{kind}");
    }
}

#[test]
fn garbage_file_is_corrupted() {
    let dir = tempdir().unwrap();
    for kind in StorageKind::ALL {
        let path = dir.path().join(kind.as_str());
        std::fs::write(&path, vec![0xA5u8; 128 * 1024]).unwrap();
        let err = open_records_storage(kind, &path, RecordLayout::default(), StorageOptions::default())
            .err()
            .unwrap();
        assert!(err.is_structural(), "{kind}: {err}");
        assert!(path.exists());
    }
}

#[test]
fn concurrent_writers_on_distinct_records() {
    let dir = tempdir().unwrap();
    for kind in StorageKind::ALL {
        let records: Arc<dyn RecordsStorage> =
            Arc::from(open(kind, &dir.path().join(kind.as_str())));
        for _ in 0..64 {
            records.allocate_record().unwrap();
        }

        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let records = Arc::clone(&records);
                std::thread::spawn(move || {
                    for id in (1..=64u32).filter(|id| id % 4 == t) {
                        records.set_flags(id, id as i32).unwrap();
                        records.set_name_ref(id, id + 1000).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for id in 1..=64u32 {
            assert_eq!(records.flags(id).unwrap(), id as i32, "{kind}");
            assert_eq!(records.name_ref(id).unwrap(), id + 1000, "{kind}");
        }
        records.close().unwrap();
    }
}

fn field_strategy() -> impl Strategy<Value = RecordField> {
    prop::sample::select(RecordField::ALL.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn backends_agree_on_field_values(
        writes in prop::collection::vec((1u32..=20, field_strategy(), any::<i64>()), 1..60)
    ) {
        let dir = tempdir().unwrap();
        let mut snapshots = Vec::new();

        for kind in StorageKind::ALL {
            let path = dir.path().join(kind.as_str());
            let records = open(kind, &path);
            for _ in 0..20 {
                records.allocate_record().unwrap();
            }
            for &(id, field, value) in &writes {
                if field == RecordField::ModCount {
                    continue;
                }
                match field.width() {
                    fsrecords_storage::FieldWidth::Int => records.set_int(id, field, value as i32).unwrap(),
                    fsrecords_storage::FieldWidth::Long => records.set_long(id, field, value).unwrap(),
                }
            }
            records.close().unwrap();

            let records = open(kind, &path);
            let mut snapshot = Vec::new();
            for id in 1..=20u32 {
                for field in RecordField::ALL {
                    let value = match field.width() {
                        fsrecords_storage::FieldWidth::Int => i64::from(records.get_int(id, field).unwrap()),
                        fsrecords_storage::FieldWidth::Long => records.get_long(id, field).unwrap(),
                    };
                    snapshot.push(value);
                }
            }
            snapshots.push((snapshot, records.global_mod_count()));
            records.close().unwrap();
        }

        prop_assert_eq!(&snapshots[0], &snapshots[1]);
        prop_assert_eq!(&snapshots[1], &snapshots[2]);
    }
}
