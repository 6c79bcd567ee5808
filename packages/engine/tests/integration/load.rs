use std::time::Duration;

use ::common::storage::{BlobMeta, BlobStore};
use chrono::Utc;
use engine::config::EngineConfig;
use engine::model::PointerRecord;
use engine::telemetry::{Operation, Outcome};
use engine::{ErrorCode, LoadOptions, LoadSource, SaveOptions};

use crate::common::{Gate, Harness, OWNER, RESOURCE, doc};

fn ttl_config(secs: u64) -> EngineConfig {
    EngineConfig {
        cache_ttl_secs: secs,
        ..EngineConfig::default()
    }
}

mod empty {
    use super::*;

    #[tokio::test]
    async fn never_saved_document_is_not_found() {
        let h = Harness::new();

        let result = h
            .engine
            .load(OWNER, RESOURCE, LoadOptions::default())
            .await
            .unwrap();
        assert!(result.is_not_found());
        assert!(h.engine.head(OWNER, RESOURCE).await.unwrap().is_none());

        h.settle().await;
        let loads = h.telemetry.for_operation(Operation::Load);
        assert_eq!(loads.len(), 1);
        assert_eq!(loads[0].outcome, Outcome::NotFound);
    }
}

mod caching {
    use super::*;

    #[tokio::test]
    async fn second_load_is_served_from_cache() {
        let h = Harness::new();
        h.engine
            .save(OWNER, RESOURCE, &doc("Resume", 1), SaveOptions::new())
            .await
            .unwrap();

        let first = h.engine.load(OWNER, RESOURCE, LoadOptions::default()).await.unwrap();
        let reads_after_first = h.pointers.reads();
        let second = h.engine.load(OWNER, RESOURCE, LoadOptions::default()).await.unwrap();

        assert_eq!(first.into_loaded().unwrap().source, LoadSource::Backend);
        let second = second.into_loaded().unwrap();
        assert_eq!(second.source, LoadSource::Cache);
        assert_eq!(second.payload, doc("Resume", 1));
        assert_eq!(h.pointers.reads(), reads_after_first);

        h.settle().await;
        let hits: Vec<_> = h
            .telemetry
            .for_operation(Operation::Load)
            .into_iter()
            .filter(|e| e.is_cache_hit())
            .collect();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_refetched() {
        let h = Harness::with_config(ttl_config(30));
        h.engine
            .save(OWNER, RESOURCE, &doc("Resume", 1), SaveOptions::new())
            .await
            .unwrap();
        h.engine.load(OWNER, RESOURCE, LoadOptions::default()).await.unwrap();

        tokio::time::advance(Duration::from_secs(29)).await;
        let fresh = h.engine.load(OWNER, RESOURCE, LoadOptions::default()).await.unwrap();
        assert_eq!(fresh.into_loaded().unwrap().source, LoadSource::Cache);

        tokio::time::advance(Duration::from_secs(2)).await;
        let expired = h.engine.load(OWNER, RESOURCE, LoadOptions::default()).await.unwrap();
        assert_eq!(expired.into_loaded().unwrap().source, LoadSource::Backend);
    }

    #[tokio::test]
    async fn save_invalidates_cached_payload() {
        let h = Harness::new();
        h.engine
            .save(OWNER, RESOURCE, &doc("Resume", 1), SaveOptions::new())
            .await
            .unwrap();
        h.engine.load(OWNER, RESOURCE, LoadOptions::default()).await.unwrap();

        h.engine
            .save(OWNER, RESOURCE, &doc("Resume", 2), SaveOptions::new())
            .await
            .unwrap();
        let loaded = h
            .engine
            .load(OWNER, RESOURCE, LoadOptions::default())
            .await
            .unwrap()
            .into_loaded()
            .unwrap();

        assert_eq!(loaded.source, LoadSource::Backend);
        assert_eq!(loaded.payload, doc("Resume", 2));
        assert_eq!(loaded.record.revision, 2);
    }

    #[tokio::test]
    async fn bypassing_cache_reads_backend() {
        let h = Harness::new();
        h.engine
            .save(OWNER, RESOURCE, &doc("Resume", 1), SaveOptions::new())
            .await
            .unwrap();
        h.engine.load(OWNER, RESOURCE, LoadOptions::default()).await.unwrap();

        let loaded = h
            .engine
            .load(OWNER, RESOURCE, LoadOptions::bypass_cache())
            .await
            .unwrap()
            .into_loaded()
            .unwrap();
        assert_eq!(loaded.source, LoadSource::Backend);
    }

    #[tokio::test]
    async fn disabled_cache_never_serves() {
        let h = Harness::with_config(EngineConfig {
            cache_enabled: false,
            ..EngineConfig::default()
        });
        h.engine
            .save(OWNER, RESOURCE, &doc("Resume", 1), SaveOptions::new())
            .await
            .unwrap();

        for _ in 0..3 {
            let loaded = h
                .engine
                .load(OWNER, RESOURCE, LoadOptions::default())
                .await
                .unwrap()
                .into_loaded()
                .unwrap();
            assert_eq!(loaded.source, LoadSource::Backend);
        }
        assert!(h.engine.cache().is_empty());
    }

    #[tokio::test]
    async fn explicit_invalidation_forces_refetch() {
        let h = Harness::new();
        h.engine
            .save(OWNER, RESOURCE, &doc("Resume", 1), SaveOptions::new())
            .await
            .unwrap();
        h.engine.load(OWNER, RESOURCE, LoadOptions::default()).await.unwrap();

        h.engine.invalidate(OWNER, RESOURCE).unwrap();

        let loaded = h
            .engine
            .load(OWNER, RESOURCE, LoadOptions::default())
            .await
            .unwrap()
            .into_loaded()
            .unwrap();
        assert_eq!(loaded.source, LoadSource::Backend);
    }

    #[tokio::test]
    async fn load_racing_a_save_does_not_cache_old_payload() {
        let h = Harness::new();
        h.engine
            .save(OWNER, RESOURCE, &doc("Resume", 1), SaveOptions::new())
            .await
            .unwrap();

        let gate = Gate::new(1);
        h.blobs.gate_fetches(Some(gate.clone()));
        let racing_load = {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.load(OWNER, RESOURCE, LoadOptions::default()).await })
        };
        gate.wait_arrived().await;
        h.blobs.gate_fetches(None);
        // Keep the revision 1 blob around for the parked fetch.
        h.blobs.fail_deletes(true);

        h.engine
            .save(OWNER, RESOURCE, &doc("Resume", 2), SaveOptions::new())
            .await
            .unwrap();
        gate.release().await;

        let raced = racing_load.await.unwrap().unwrap().into_loaded().unwrap();
        assert_eq!(raced.record.revision, 1);
        assert_eq!(raced.payload, doc("Resume", 1));

        let next = h
            .engine
            .load(OWNER, RESOURCE, LoadOptions::default())
            .await
            .unwrap()
            .into_loaded()
            .unwrap();
        assert_eq!(next.source, LoadSource::Backend);
        assert_eq!(next.record.revision, 2);
    }
}

mod failures {
    use super::*;

    #[tokio::test]
    async fn orphaned_pointer_fails_without_self_healing() {
        let h = Harness::new();
        let saved = h
            .engine
            .save(OWNER, RESOURCE, &doc("Resume", 1), SaveOptions::new())
            .await
            .unwrap();
        h.blobs.inner().delete(&saved.blob_path).await.unwrap();

        let err = h
            .engine
            .load(OWNER, RESOURCE, LoadOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unknown);
        assert!(!err.is_retryable());
        assert_eq!(h.engine.head(OWNER, RESOURCE).await.unwrap().unwrap().revision, 1);

        h.settle().await;
        let errors = h.status.errors();
        assert_eq!(errors.len(), 1);
        assert!(!errors[0].retryable);
    }

    #[tokio::test]
    async fn unparseable_payload_is_a_load_failure() {
        let h = Harness::new();
        let saved = h
            .engine
            .save(OWNER, RESOURCE, &doc("Resume", 1), SaveOptions::new())
            .await
            .unwrap();
        h.blobs
            .inner()
            .put(
                &saved.blob_path,
                br#"{"title": "Resu"#,
                BlobMeta::new(1, "application/json"),
            )
            .await
            .unwrap();

        let err = h
            .engine
            .load(OWNER, RESOURCE, LoadOptions::bypass_cache())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unknown);
        assert!(h.engine.cache().is_empty());
    }

    #[tokio::test]
    async fn pointer_and_path_revision_must_agree() {
        let h = Harness::new();
        let path = "alice/resume/payload-0000000002-deadbeef.json";
        h.blobs
            .inner()
            .put(path, br#"{"title":"x","version":2,"body":""}"#, BlobMeta::new(2, "application/json"))
            .await
            .unwrap();
        h.pointers
            .force(PointerRecord {
                owner_id: OWNER.into(),
                resource_id: RESOURCE.into(),
                blob_path: path.into(),
                revision: 1,
                payload_size_bytes: 10,
                synced_at: Utc::now(),
                summary: serde_json::Value::Null,
            })
            .await;

        let err = h
            .engine
            .load(OWNER, RESOURCE, LoadOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unknown);
    }
}
