mod common;

use common::{seed_decisions, setup_store, tamper, TS};
use decision_ledger::ledger::event::{canonical_json, compute_event_hash, sha256_hex};
use decision_ledger::ledger::{self, GENESIS_HASH};
use decision_ledger::LedgerError;
use serde_json::json;

#[tokio::test]
async fn test_verify_returns_last_hash() {
    let store = setup_store().await;
    let hashes = seed_decisions(&store, 5).await;

    assert_eq!(ledger::verify(&store).await.unwrap(), hashes[4]);
    assert_eq!(store.tip().await.unwrap(), hashes[4]);
}

#[tokio::test]
async fn test_verify_empty_store_is_genesis() {
    let store = setup_store().await;
    assert_eq!(ledger::verify(&store).await.unwrap(), GENESIS_HASH);
}

#[tokio::test]
async fn test_concrete_two_event_scenario() {
    let store = setup_store().await;
    let payload = json!({"title": "Adopt RFC 12", "owner": "ops"});

    let e1 = store
        .append_at(TS[0], "decision.create", "decision", "D-1", &payload)
        .await
        .unwrap();
    let material = format!(
        "GENESIS|{}|decision.create|decision|D-1|{}",
        TS[0],
        r#"{"owner":"ops","title":"Adopt RFC 12"}"#
    );
    assert_eq!(e1, sha256_hex(material.as_bytes()));

    let e2 = store
        .append_at(TS[1], "outcome.add", "decision", "D-1", &json!({"result": "shipped"}))
        .await
        .unwrap();
    let material = format!("{}|{}|outcome.add|decision|D-1|{{\"result\":\"shipped\"}}", e1, TS[1]);
    assert_eq!(e2, sha256_hex(material.as_bytes()));
    assert_eq!(ledger::verify(&store).await.unwrap(), e2);
}

#[tokio::test]
async fn test_each_hashed_field_is_tamper_evident() {
    let cases = [
        ("created_at", "2026-01-05T09:15:00Z"),
        ("event_type", "decision.delete"),
        ("entity_type", "outcome"),
        ("entity_id", "D-99"),
        ("payload_json", r#"{"title":"Decision 2","votes":7}"#),
    ];

    for (column, value) in cases {
        let store = setup_store().await;
        seed_decisions(&store, 3).await;
        tamper(&store, 2, column, value).await;

        let err = ledger::verify(&store).await.unwrap_err();
        assert!(
            matches!(err, LedgerError::Tamper { position: 2, .. }),
            "{} mutation gave {:?}",
            column,
            err
        );
    }
}

#[tokio::test]
async fn test_prev_hash_mutation_breaks_chain() {
    let store = setup_store().await;
    seed_decisions(&store, 3).await;
    tamper(&store, 2, "prev_hash", GENESIS_HASH).await;

    let err = ledger::verify(&store).await.unwrap_err();
    assert!(matches!(err, LedgerError::ChainIntegrity { position: 2, .. }));
    assert!(err.is_chain_fault());
}

#[tokio::test]
async fn test_deleted_event_breaks_chain() {
    let store = setup_store().await;
    seed_decisions(&store, 4).await;
    sqlx::query("DELETE FROM ledger_events WHERE seq = 2")
        .execute(store.database().pool())
        .await
        .unwrap();

    let err = ledger::verify(&store).await.unwrap_err();
    assert!(matches!(err, LedgerError::ChainIntegrity { position: 2, .. }));
}

#[tokio::test]
async fn test_reordered_events_break_chain() {
    let store = setup_store().await;
    seed_decisions(&store, 3).await;
    tamper(&store, 2, "created_at", TS[2]).await;
    tamper(&store, 3, "created_at", TS[1]).await;

    let err = ledger::verify(&store).await.unwrap_err();
    assert!(matches!(err, LedgerError::ChainIntegrity { position: 2, .. }));

    let report = ledger::inspect(&store).await.unwrap();
    assert!(!report.is_valid());
    assert_eq!(report.entry_count, 3);
}

#[tokio::test]
async fn test_identical_inputs_give_identical_hashes() {
    let first = setup_store().await;
    let second = setup_store().await;

    let a = seed_decisions(&first, 4).await;
    let b = seed_decisions(&second, 4).await;
    assert_eq!(a, b);

    let ids_a: Vec<String> = first.all_events().await.unwrap().into_iter().map(|e| e.event_id).collect();
    let ids_b: Vec<String> = second.all_events().await.unwrap().into_iter().map(|e| e.event_id).collect();
    assert_ne!(ids_a, ids_b);
}

#[tokio::test]
async fn test_same_second_events_keep_insertion_order() {
    let store = setup_store().await;
    let mut hashes = Vec::new();
    for i in 0..3 {
        hashes.push(
            store
                .append_at(TS[0], "vote.cast", "decision", "D-1", &json!({"n": i}))
                .await
                .unwrap(),
        );
    }

    let events = store.all_events().await.unwrap();
    let stored: Vec<String> = events.into_iter().map(|e| e.event_hash).collect();
    assert_eq!(stored, hashes);
    assert_eq!(ledger::verify(&store).await.unwrap(), hashes[2]);
}

#[tokio::test]
async fn test_payload_is_stored_canonically() {
    let store = setup_store().await;
    let payload = json!({"z": [1, {"b": 2, "a": 1}], "a": "é"});
    store
        .append_at(TS[0], "decision.create", "decision", "D-1", &payload)
        .await
        .unwrap();

    let event = &store.all_events().await.unwrap()[0];
    assert_eq!(event.payload_json, canonical_json(&payload).unwrap());
    assert_eq!(event.payload_json, r#"{"a":"é","z":[1,{"a":1,"b":2}]}"#);
    assert_eq!(event.payload().unwrap(), payload);
}

#[tokio::test]
async fn test_append_refuses_tampered_tip() {
    let store = setup_store().await;
    seed_decisions(&store, 2).await;
    tamper(&store, 2, "entity_id", "D-42").await;

    let err = store
        .append_at(TS[2], "decision.create", "decision", "D-3", &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Tamper { position: 2, .. }));
    assert_eq!(store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_append_refuses_chain_with_deleted_event() {
    let store = setup_store().await;
    seed_decisions(&store, 3).await;
    sqlx::query("DELETE FROM ledger_events WHERE seq = 2")
        .execute(store.database().pool())
        .await
        .unwrap();
    assert!(ledger::verify(&store).await.unwrap_err().is_chain_fault());

    let err = store
        .append_at(TS[3], "decision.create", "decision", "D-4", &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ChainIntegrity { position: 2, .. }));
    assert_eq!(store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_append_refuses_break_after_checkpoint() {
    let store = setup_store().await;
    seed_decisions(&store, 2).await;
    ledger::verify_incremental(&store).await.unwrap();

    for (i, ts) in TS[2..4].iter().enumerate() {
        store
            .append_at(ts, "outcome.add", "outcome", &format!("O-{}", i), &json!({}))
            .await
            .unwrap();
    }
    tamper(&store, 3, "prev_hash", GENESIS_HASH).await;

    let err = store
        .append_at(TS[4], "outcome.add", "outcome", "O-9", &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ChainIntegrity { position: 3, .. }));
    assert_eq!(store.count().await.unwrap(), 4);
}

#[tokio::test]
async fn test_append_rejects_hash_already_stored() {
    let store = setup_store().await;
    let hashes = seed_decisions(&store, 1).await;
    ledger::verify_incremental(&store).await.unwrap();

    // A row carrying the next event's hash, ordered before the checkpoint.
    let payload = json!({"title": "Decision 2"});
    let next_hash = compute_event_hash(
        &hashes[0],
        TS[1],
        "decision.create",
        "decision",
        "D-2",
        &canonical_json(&payload).unwrap(),
    );
    sqlx::query(
        "INSERT INTO ledger_events (seq, event_id, created_at, event_type, entity_type, \
         entity_id, payload_json, prev_hash, event_hash) \
         VALUES (0, 'stray', ?, 'decision.create', 'decision', 'D-2', '{}', ?, ?)",
    )
    .bind(TS[0])
    .bind(&hashes[0])
    .bind(&next_hash)
    .execute(store.database().pool())
    .await
    .unwrap();

    let err = store
        .append_at(TS[1], "decision.create", "decision", "D-2", &payload)
        .await
        .unwrap_err();
    match err {
        LedgerError::DuplicateEvent { event_hash } => assert_eq!(event_hash, next_hash),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(LedgerError::DuplicateEvent { event_hash: next_hash }.is_retryable());
    assert_eq!(store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_clock_behind_tip_uses_tip_time() {
    let store = setup_store().await;
    let future = "2999-01-01T00:00:00Z";
    let first = store
        .append_at(future, "decision.create", "decision", "D-1", &json!({}))
        .await
        .unwrap();
    let second = store
        .append("outcome.add", "decision", "D-1", &json!({"result": "ok"}))
        .await
        .unwrap();

    let events = store.all_events().await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].created_at, future);
    assert_eq!(events[1].prev_hash, first);
    assert_eq!(ledger::verify(&store).await.unwrap(), second);
}

#[tokio::test]
async fn test_domain_write_commits_and_rolls_back_with_event() {
    let store = setup_store().await;
    sqlx::query("CREATE TABLE decisions (id TEXT PRIMARY KEY, title TEXT NOT NULL)")
        .execute(store.database().pool())
        .await
        .unwrap();

    {
        let mut tx = store.begin().await.unwrap();
        sqlx::query("INSERT INTO decisions (id, title) VALUES ('D-1', 'dropped')")
            .execute(tx.connection())
            .await
            .unwrap();
        tx.append_at(TS[0], "decision.create", "decision", "D-1", &json!({"title": "dropped"}))
            .await
            .unwrap();
        // dropped without commit
    }

    let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM decisions")
        .fetch_one(store.database().pool())
        .await
        .unwrap();
    assert_eq!(rows, 0);
    assert_eq!(store.count().await.unwrap(), 0);

    let mut tx = store.begin().await.unwrap();
    sqlx::query("INSERT INTO decisions (id, title) VALUES ('D-1', 'kept')")
        .execute(tx.connection())
        .await
        .unwrap();
    let hash = tx
        .append_at(TS[0], "decision.create", "decision", "D-1", &json!({"title": "kept"}))
        .await
        .unwrap();
    let committed = tx.commit().await.unwrap();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].event_hash, hash);

    let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM decisions")
        .fetch_one(store.database().pool())
        .await
        .unwrap();
    assert_eq!(rows, 1);
    assert_eq!(ledger::verify(&store).await.unwrap(), hash);
}

#[tokio::test]
async fn test_incremental_verification_resumes_from_checkpoint() {
    let store = setup_store().await;
    seed_decisions(&store, 3).await;

    let first = ledger::verify_incremental(&store).await.unwrap();
    assert!(!first.resumed);
    assert_eq!(first.chain_length, 3);
    assert_eq!(first.events_checked, 3);

    let hashes = {
        let mut hashes = Vec::new();
        for (i, ts) in TS[3..].iter().enumerate() {
            hashes.push(
                store
                    .append_at(ts, "outcome.add", "outcome", &format!("O-{}", i), &json!({}))
                    .await
                    .unwrap(),
            );
        }
        hashes
    };

    let second = ledger::verify_incremental(&store).await.unwrap();
    assert!(second.resumed);
    assert_eq!(second.chain_length, 5);
    assert_eq!(second.events_checked, 3);
    assert_eq!(second.tip_hash, hashes[1]);

    let checkpoint = store.load_checkpoint().await.unwrap().unwrap();
    assert_eq!(checkpoint.event_hash, hashes[1]);
    assert_eq!(checkpoint.position, 5);
}

#[tokio::test]
async fn test_incremental_verification_detects_rewritten_checkpoint() {
    let store = setup_store().await;
    seed_decisions(&store, 3).await;
    ledger::verify_incremental(&store).await.unwrap();

    tamper(&store, 3, "payload_json", r#"{"title":"rewritten"}"#).await;

    let err = ledger::verify_incremental(&store).await.unwrap_err();
    assert!(matches!(err, LedgerError::Tamper { position: 3, .. }));
}

#[tokio::test]
async fn test_list_recent_is_newest_first() {
    let store = setup_store().await;
    let hashes = seed_decisions(&store, 4).await;

    let recent = store.list_recent(2).await.unwrap();
    let got: Vec<&str> = recent.iter().map(|e| e.event_hash.as_str()).collect();
    assert_eq!(got, vec![hashes[3].as_str(), hashes[2].as_str()]);

    assert!(matches!(
        store.list_recent(0).await,
        Err(LedgerError::ValidationError(_))
    ));
}
