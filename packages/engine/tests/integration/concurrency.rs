use std::time::Duration;

use engine::{LoadOptions, SaveOptions, SyncError};

use crate::common::{Gate, Harness, OWNER, RESOURCE, doc};

mod cross_process {
    use super::*;

    #[tokio::test]
    async fn same_expected_revision_admits_one_writer() {
        let a = Harness::new();
        let b = a.peer();
        a.engine
            .save(OWNER, RESOURCE, &doc("Resume", 1), SaveOptions::new())
            .await
            .unwrap();

        // Both writers pass their conflict check and upload before either
        // reaches the pointer store.
        let gate = Gate::new(2);
        a.pointers.gate_sets(Some(gate.clone()));

        let spawn_save = |h: &Harness, title: &'static str| {
            let engine = h.engine.clone();
            tokio::spawn(async move {
                engine
                    .save(
                        OWNER,
                        RESOURCE,
                        &doc(title, 2),
                        SaveOptions::new().with_expected_revision(1),
                    )
                    .await
            })
        };
        let first = spawn_save(&a, "From A");
        let second = spawn_save(&b, "From B");

        gate.wait_arrived().await;
        a.pointers.gate_sets(None);
        gate.release().await;

        let results = [first.await.unwrap(), second.await.unwrap()];
        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        let losers: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();

        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].revision, 2);
        assert_eq!(
            losers,
            vec![&SyncError::StaleWrite {
                attempted: 2,
                live: Some(2)
            }]
        );

        // The winner removes revision 1, the loser removes its own upload.
        a.settle().await;
        b.settle().await;
        assert_eq!(a.blobs.inner().paths(), vec![winners[0].blob_path.clone()]);
        assert_eq!(a.status.conflicts().len() + b.status.conflicts().len(), 1);
    }

    #[tokio::test]
    async fn peer_with_stale_view_gets_conflict() {
        let a = Harness::new();
        let b = a.peer();
        for version in 1..=2 {
            a.engine
                .save(OWNER, RESOURCE, &doc("Resume", version), SaveOptions::new())
                .await
                .unwrap();
        }

        let err = b
            .engine
            .save(
                OWNER,
                RESOURCE,
                &doc("Stale", 2),
                SaveOptions::new().with_expected_revision(1),
            )
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(err.live_revision(), Some(2));
    }

    #[tokio::test]
    async fn peer_cache_is_not_invalidated_by_remote_save() {
        let a = Harness::new();
        let b = a.peer();
        a.engine
            .save(OWNER, RESOURCE, &doc("Resume", 1), SaveOptions::new())
            .await
            .unwrap();
        b.engine.load(OWNER, RESOURCE, LoadOptions::default()).await.unwrap();

        a.engine
            .save(OWNER, RESOURCE, &doc("Resume", 2), SaveOptions::new())
            .await
            .unwrap();

        // No read-your-writes across processes until the entry expires.
        let cached = b
            .engine
            .load(OWNER, RESOURCE, LoadOptions::default())
            .await
            .unwrap()
            .into_loaded()
            .unwrap();
        assert_eq!(cached.record.revision, 1);

        let fresh = b
            .engine
            .load(OWNER, RESOURCE, LoadOptions::bypass_cache())
            .await
            .unwrap()
            .into_loaded()
            .unwrap();
        assert_eq!(fresh.record.revision, 2);
    }
}

mod in_process {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_saves_of_one_document_serialize() {
        let h = Harness::new();

        let mut handles = Vec::new();
        for version in 0..10 {
            let engine = h.engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .save(OWNER, RESOURCE, &doc("Resume", version), SaveOptions::new())
                    .await
            }));
        }

        let mut revisions = Vec::new();
        for handle in handles {
            revisions.push(handle.await.unwrap().unwrap().revision);
        }
        revisions.sort_unstable();

        assert_eq!(revisions, (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn other_documents_proceed_while_one_is_held() {
        let h = Harness::new();
        let gate = Gate::new(1);
        h.pointers.gate_sets(Some(gate.clone()));

        let parked = {
            let engine = h.engine.clone();
            tokio::spawn(async move {
                engine
                    .save(OWNER, "resume", &doc("Resume", 1), SaveOptions::new())
                    .await
            })
        };
        gate.wait_arrived().await;
        h.pointers.gate_sets(None);

        let mut same_key = {
            let engine = h.engine.clone();
            tokio::spawn(async move {
                engine
                    .save(OWNER, "resume", &doc("Resume", 2), SaveOptions::new())
                    .await
            })
        };

        let other = h
            .engine
            .save(OWNER, "cover-letter", &doc("Letter", 1), SaveOptions::new())
            .await
            .unwrap();
        assert_eq!(other.revision, 1);

        assert!(
            tokio::time::timeout(Duration::from_millis(50), &mut same_key)
                .await
                .is_err(),
            "same-document save must wait for the held one"
        );

        gate.release().await;
        assert_eq!(parked.await.unwrap().unwrap().revision, 1);
        assert_eq!(same_key.await.unwrap().unwrap().revision, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn loads_never_observe_a_torn_document() {
        let h = Harness::new();
        // Superseded blobs stay so racing loads can still fetch them.
        h.blobs.fail_deletes(true);
        h.engine
            .save(OWNER, RESOURCE, &doc("Resume", 1), SaveOptions::new())
            .await
            .unwrap();

        let writer = {
            let engine = h.engine.clone();
            tokio::spawn(async move {
                for version in 2..=20 {
                    engine
                        .save(OWNER, RESOURCE, &doc("Resume", version), SaveOptions::new())
                        .await
                        .unwrap();
                }
            })
        };

        let mut readers = Vec::new();
        for _ in 0..4 {
            let engine = h.engine.clone();
            readers.push(tokio::spawn(async move {
                let mut last_seen = 0;
                for _ in 0..25 {
                    let loaded = engine
                        .load(OWNER, RESOURCE, LoadOptions::bypass_cache())
                        .await
                        .unwrap()
                        .into_loaded()
                        .unwrap();
                    assert_eq!(loaded.payload.version, loaded.record.revision);
                    assert!(loaded.record.revision >= last_seen);
                    last_seen = loaded.record.revision;
                    tokio::task::yield_now().await;
                }
            }));
        }

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
    }
}
