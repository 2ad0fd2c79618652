//! Mapping-set lifecycle and the single-active invariant, exercised against
//! a real SQLite database.

use tempfile::TempDir;

use field_harmonizer::db;
use field_harmonizer::error::HarmonizerError;
use field_harmonizer::mapping_store::{MappingSetUpdate, MappingStore};
use field_harmonizer::migrate;
use field_harmonizer::models::{FieldMapping, FieldName};

async fn setup_store() -> (TempDir, MappingStore) {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("fhz.sqlite")).await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    (tmp, MappingStore::new(pool))
}

fn rule(original: &str, target: &str) -> FieldMapping {
    FieldMapping {
        original_field: FieldName::new(original).unwrap(),
        target_field: FieldName::new(target).unwrap(),
    }
}

#[tokio::test]
async fn create_starts_inactive_and_round_trips() {
    let (_tmp, store) = setup_store().await;

    let set = store
        .create(
            "vehicles-v1",
            Some("first pass".to_string()),
            vec![rule("cost", "price"), rule("km", "mileage")],
        )
        .await
        .unwrap();
    assert!(!set.is_active);

    let loaded = store.get(&set.id).await.unwrap();
    assert_eq!(loaded.name, "vehicles-v1");
    assert_eq!(loaded.description.as_deref(), Some("first pass"));
    assert_eq!(loaded.mappings, set.mappings);
    assert!(!loaded.is_active);

    assert_eq!(store.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn duplicate_name_is_rejected() {
    let (_tmp, store) = setup_store().await;
    store.create("vehicles-v1", None, vec![]).await.unwrap();

    let err = store.create("vehicles-v1", None, vec![]).await.unwrap_err();
    assert!(matches!(err, HarmonizerError::DuplicateName(_)));
}

#[tokio::test]
async fn get_unknown_id_is_not_found() {
    let (_tmp, store) = setup_store().await;
    let err = store.get("nope").await.unwrap_err();
    assert!(matches!(err, HarmonizerError::NotFound(_)));
}

#[tokio::test]
async fn ambiguous_update_is_rejected_and_leaves_set_unchanged() {
    let (_tmp, store) = setup_store().await;
    let set = store
        .create("vehicles-v1", None, vec![rule("cost", "price")])
        .await
        .unwrap();

    let err = store
        .update(
            &set.id,
            MappingSetUpdate {
                mappings: Some(vec![rule("cost", "price"), rule("amount", "price")]),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HarmonizerError::DuplicateTarget { .. }));

    let loaded = store.get(&set.id).await.unwrap();
    assert_eq!(loaded.mappings, vec![rule("cost", "price")]);
}

#[tokio::test]
async fn update_rename_onto_existing_name_is_rejected() {
    let (_tmp, store) = setup_store().await;
    store.create("vehicles-v1", None, vec![]).await.unwrap();
    let other = store.create("homes-v1", None, vec![]).await.unwrap();

    let err = store
        .update(
            &other.id,
            MappingSetUpdate {
                name: Some("vehicles-v1".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HarmonizerError::DuplicateName(_)));
}

#[tokio::test]
async fn activation_moves_the_single_active_flag() {
    let (_tmp, store) = setup_store().await;
    let x = store.create("x", None, vec![]).await.unwrap();
    let y = store.create("y", None, vec![]).await.unwrap();

    store.activate(&x.id).await.unwrap();
    assert!(store.get(&x.id).await.unwrap().is_active);

    store.activate(&y.id).await.unwrap();
    assert!(!store.get(&x.id).await.unwrap().is_active);
    assert!(store.get(&y.id).await.unwrap().is_active);

    // Exactly one active set, from any reader's perspective.
    let active: Vec<_> = store
        .list()
        .await
        .unwrap()
        .into_iter()
        .filter(|s| s.is_active)
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, y.id);
}

#[tokio::test]
async fn reactivating_the_active_set_is_a_no_op() {
    let (_tmp, store) = setup_store().await;
    let x = store.create("x", None, vec![]).await.unwrap();

    store.activate(&x.id).await.unwrap();
    store.activate(&x.id).await.unwrap();
    assert!(store.get(&x.id).await.unwrap().is_active);
}

#[tokio::test]
async fn deactivate_returns_the_set_to_draft() {
    let (_tmp, store) = setup_store().await;
    let x = store.create("x", None, vec![]).await.unwrap();

    store.activate(&x.id).await.unwrap();
    store.deactivate(&x.id).await.unwrap();
    assert!(!store.get(&x.id).await.unwrap().is_active);
    assert!(store.active().await.unwrap().is_none());
}

#[tokio::test]
async fn deleting_an_active_set_is_rejected() {
    let (_tmp, store) = setup_store().await;
    let x = store.create("x", None, vec![]).await.unwrap();
    store.activate(&x.id).await.unwrap();

    let err = store.delete(&x.id).await.unwrap_err();
    assert!(matches!(err, HarmonizerError::ActiveMappingDelete(_)));

    // Still present, still active.
    let loaded = store.get(&x.id).await.unwrap();
    assert!(loaded.is_active);
}

#[tokio::test]
async fn deleting_an_inactive_set_works() {
    let (_tmp, store) = setup_store().await;
    let x = store.create("x", None, vec![]).await.unwrap();
    store.activate(&x.id).await.unwrap();
    store.deactivate(&x.id).await.unwrap();

    store.delete(&x.id).await.unwrap();
    let err = store.get(&x.id).await.unwrap_err();
    assert!(matches!(err, HarmonizerError::NotFound(_)));
}

#[tokio::test]
async fn schema_migration_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("fhz.sqlite")).await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();

    let store = MappingStore::new(pool);
    for name in ["a", "b"] {
        store.create(name, None, vec![]).await.unwrap();
    }
    assert_eq!(store.list().await.unwrap().len(), 2);
}
