//! Property tests for the object store facade.

use proptest::prelude::*;
use serde_json::Value;
use std::collections::BTreeMap;
use stowdb_core::{Database, Key, MigrationRegistry};
use stowdb_engine::StoreOptions;
use stowdb_testkit::{identities_registry, key_strategy, keyed_record_strategy, value_strategy};
use stowdb_testkit::{TestEngine, IDENTITIES, TEST_DB};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("Failed to build runtime")
}

async fn kv_db(engine: &TestEngine) -> Database {
    let mut registry = MigrationRegistry::new();
    registry
        .step(0, "create_kv", |upgrade| {
            upgrade.create_object_store("kv", StoreOptions::new())?;
            Ok(())
        })
        .unwrap();
    engine.opener(registry).open("kv_db", 1).await.unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn put_then_get_returns_the_value(key in key_strategy(), value in value_strategy()) {
        let rt = runtime();
        let engine = TestEngine::in_memory();
        let (stored_key, read) = rt.block_on(async {
            let kv = kv_db(&engine).await.store("kv");
            let stored_key = kv.put(value.clone(), Some(key.clone())).await.unwrap();
            (stored_key, kv.get(key.clone()).await.unwrap())
        });
        prop_assert_eq!(stored_key, key);
        prop_assert_eq!(read, Some(value));
    }

    #[test]
    fn unwritten_keys_are_absent(
        written in prop::collection::vec(keyed_record_strategy(), 0..8),
        probe in key_strategy(),
    ) {
        let rt = runtime();
        let engine = TestEngine::in_memory();

        // Later writes to the same key replace earlier ones.
        let expected: BTreeMap<Key, Value> = written.iter().cloned().collect();

        let (read, count) = rt.block_on(async {
            let db = engine
                .opener(identities_registry())
                .open(TEST_DB, 1)
                .await
                .unwrap();
            let identities = db.store(IDENTITIES);
            for (_, record) in &written {
                identities.put(record.clone(), None).await.unwrap();
            }
            (
                identities.get(probe.clone()).await.unwrap(),
                identities.count().await.unwrap(),
            )
        });

        prop_assert_eq!(read, expected.get(&probe).cloned());
        prop_assert_eq!(count, expected.len() as u64);
    }
}
