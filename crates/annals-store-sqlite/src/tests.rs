//! Integration tests for the engine over `SqliteStore` against an in-memory
//! database.

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

use annals_core::{
  ActorId, Attributes, Bound, Draft, Engine, EntityType, Error, Record, Registry,
  Scalar, Versioned, ViolationKind,
  identity::{self, Fixed, Whodunnit},
  storage::Storage,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::SqliteStore;

fn ts(secs: i64) -> DateTime<Utc> { DateTime::from_timestamp(secs, 0).unwrap() }

fn registry() -> Registry {
  let mut registry = Registry::new();
  registry
    .register(
      EntityType::versioned("categories")
        .validates_uniqueness_of(["name"], Vec::<String>::new())
        .unwrap()
        .append_only(),
    )
    .unwrap();
  registry
    .register(
      EntityType::versioned("products")
        .validates_uniqueness_of(["sku"], Vec::<String>::new())
        .unwrap()
        .attribute("price")
        .belongs_to("category", "category_id", "categories"),
    )
    .unwrap();
  // Not append-only: removable regardless of dependents.
  registry
    .register(EntityType::versioned("vendors").attribute("name"))
    .unwrap();
  registry
    .register(
      EntityType::versioned("listings")
        .attribute("title")
        .belongs_to("vendor", "vendor_id", "vendors"),
    )
    .unwrap();
  registry
}

async fn engine_with<I: annals_core::Identity>(identity: I) -> Engine<SqliteStore, I> {
  let registry = registry();
  let store = SqliteStore::open_in_memory(&registry)
    .await
    .expect("in-memory store");
  Engine::new(store, registry, identity).expect("engine")
}

async fn engine() -> Engine<SqliteStore> {
  let registry = registry();
  let store = SqliteStore::open_in_memory(&registry)
    .await
    .expect("in-memory store");
  Engine::anonymous(store, registry).expect("engine")
}

fn kinds(err: &Error) -> Vec<ViolationKind> {
  err
    .validation()
    .map(|errors| errors.iter().map(|e| e.kind).collect())
    .unwrap_or_default()
}

fn changes<const N: usize>(pairs: [(&str, Scalar); N]) -> Attributes {
  pairs.into_iter().map(|(k, v)| (k.to_owned(), v)).collect()
}

// ─── Creation ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_opens_a_new_chain() {
  let e = engine().await;

  let product = e
    .create("products", Draft::new().with("sku", "X").with("price", 9.5))
    .await
    .unwrap();

  assert_eq!(product.group_id, product.id);
  assert!(product.is_open());
  assert_eq!(product.get("category_id"), Some(&Scalar::Null));

  let fetched = e.get("products", product.id).await.unwrap().unwrap();
  assert_eq!(fetched, product);
}

#[tokio::test]
async fn create_rejects_unknown_attributes_and_entities() {
  let e = engine().await;

  let err = e
    .create("products", Draft::new().with("colour", "red"))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::UnknownAttribute { .. }));

  let err = e.create("ghosts", Draft::new()).await.unwrap_err();
  assert!(matches!(err, Error::UnknownEntity(_)));
}

#[tokio::test]
async fn inverted_interval_is_rejected() {
  let e = engine().await;

  let err = e
    .create(
      "products",
      Draft::new().with("sku", "X").created_at(ts(10)).obsoleted_at(ts(5)),
    )
    .await
    .unwrap_err();
  assert_eq!(kinds(&err), [ViolationKind::InvalidInterval]);
}

#[tokio::test]
async fn second_open_version_in_a_chain_is_rejected() {
  let e = engine().await;
  let first = e
    .create("products", Draft::new().with("sku", "X"))
    .await
    .unwrap();

  let err = e
    .create("products", Draft::new().with("sku", "Y").in_group(first.group_id))
    .await
    .unwrap_err();
  assert_eq!(kinds(&err), [ViolationKind::OpenVersionExists]);

  // A closed historical version can still be back-filled into the chain.
  e.create(
    "products",
    Draft::new()
      .with("sku", "Y")
      .in_group(first.group_id)
      .created_at(ts(5))
      .obsoleted_at(ts(10)),
  )
  .await
  .unwrap();
}

// ─── Uniqueness ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn two_open_rows_with_the_same_key_collide() {
  let e = engine().await;
  e.create("products", Draft::new().with("sku", "X")).await.unwrap();

  let err = e
    .create("products", Draft::new().with("sku", "X"))
    .await
    .unwrap_err();
  assert_eq!(kinds(&err), [ViolationKind::UniquenessViolation]);

  let errors = err.validation().unwrap();
  let on_sku: Vec<_> = errors.on("sku").collect();
  assert_eq!(on_sku.len(), 1);
  assert_eq!(on_sku[0].message, "record must be unique");
}

#[tokio::test]
async fn open_and_closed_rows_may_share_a_key() {
  let e = engine().await;
  e.create("products", Draft::new().with("sku", "X")).await.unwrap();
  e.create(
    "products",
    Draft::new().with("sku", "X").created_at(ts(5)).obsoleted_at(ts(10)),
  )
  .await
  .unwrap();
}

#[tokio::test]
async fn closed_rows_with_different_ends_may_share_a_key() {
  let e = engine().await;
  e.create(
    "products",
    Draft::new().with("sku", "X").created_at(ts(5)).obsoleted_at(ts(10)),
  )
  .await
  .unwrap();
  e.create(
    "products",
    Draft::new().with("sku", "X").created_at(ts(5)).obsoleted_at(ts(11)),
  )
  .await
  .unwrap();

  let err = e
    .create(
      "products",
      Draft::new().with("sku", "X").created_at(ts(6)).obsoleted_at(ts(11)),
    )
    .await
    .unwrap_err();
  assert_eq!(kinds(&err), [ViolationKind::UniquenessViolation]);
}

#[tokio::test]
async fn storage_index_catches_writes_that_skip_the_pre_check() {
  let e = engine().await;
  let entity = e.registry().get("products").unwrap().clone();

  let row = |sku: &str| {
    let id = Uuid::new_v4();
    let mut attributes = Attributes::new();
    attributes.insert("sku".into(), Scalar::from(sku));
    Record {
      id,
      group_id: id,
      user_id: None,
      created_dt: ts(5),
      obsoleted_dt: Bound::Infinity,
      o_user_id: None,
      attributes,
    }
  };

  e.storage().insert(&entity, &row("X")).await.unwrap();
  let err = e.storage().insert(&entity, &row("X")).await.unwrap_err();
  assert_eq!(kinds(&err), [ViolationKind::UniquenessViolation]);
}

// ─── Updates ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unchanged_update_is_a_no_op() {
  let e = engine_with(Fixed(ActorId(1))).await;
  let product = e
    .create("products", Draft::new().with("sku", "X"))
    .await
    .unwrap();

  let same = e
    .update("products", product.id, changes([("sku", Scalar::from("X"))]))
    .await
    .unwrap();
  assert_eq!(same, product);
}

#[tokio::test]
async fn update_rewrites_attributes_but_not_interval() {
  let e = engine().await;
  let product = e
    .create("products", Draft::new().with("sku", "X").with("price", 1.0))
    .await
    .unwrap();

  let updated = e
    .update("products", product.id, changes([("price", Scalar::from(2.0))]))
    .await
    .unwrap();
  assert_eq!(updated.get("price"), Some(&Scalar::Real(2.0)));
  assert_eq!(updated.created_dt, product.created_dt);
  assert_eq!(updated.obsoleted_dt, Bound::Infinity);

  let fetched = e.get("products", product.id).await.unwrap().unwrap();
  assert_eq!(fetched, updated);
}

#[tokio::test]
async fn update_into_a_taken_key_is_rejected() {
  let e = engine().await;
  e.create("products", Draft::new().with("sku", "X")).await.unwrap();
  let other = e
    .create("products", Draft::new().with("sku", "Y"))
    .await
    .unwrap();

  let err = e
    .update("products", other.id, changes([("sku", Scalar::from("X"))]))
    .await
    .unwrap_err();
  assert_eq!(kinds(&err), [ViolationKind::UniquenessViolation]);
}

// ─── Actor stamping ──────────────────────────────────────────────────────────

#[tokio::test]
async fn whodunnit_stamps_the_scoped_actor() {
  let e = engine_with(Whodunnit).await;

  let product = identity::scope(
    Some(ActorId(42)),
    e.create("products", Draft::new().with("sku", "X")),
  )
  .await
  .unwrap();
  assert_eq!(product.user_id, Some(ActorId(42)));

  let closed = identity::scope(
    Some(ActorId(43)),
    e.obsolete("products", product.id, None),
  )
  .await
  .unwrap();
  assert_eq!(closed.user_id, Some(ActorId(42)));
  assert_eq!(closed.o_user_id, Some(ActorId(43)));
}

#[tokio::test]
async fn unresolved_actor_does_not_block_the_write() {
  let e = engine_with(Whodunnit).await;

  // No scope: the lookup fails and the actor is left unset.
  let product = e
    .create("products", Draft::new().with("sku", "X"))
    .await
    .unwrap();
  assert_eq!(product.user_id, None);
}

// ─── Obsoleting and superseding ──────────────────────────────────────────────

#[tokio::test]
async fn obsolete_closes_exactly_once() {
  let e = engine().await;
  let product = e
    .create("products", Draft::new().with("sku", "X").created_at(ts(5)))
    .await
    .unwrap();

  let closed = e.obsolete("products", product.id, Some(ts(10))).await.unwrap();
  assert_eq!(closed.obsoleted_dt, Bound::At(ts(10)));

  let err = e
    .obsolete("products", product.id, Some(ts(11)))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::AlreadyObsoleted { .. }));

  let fetched = e.get("products", product.id).await.unwrap().unwrap();
  assert_eq!(fetched.obsoleted_dt, Bound::At(ts(10)));
}

#[tokio::test]
async fn obsolete_before_creation_is_rejected() {
  let e = engine().await;
  let product = e
    .create("products", Draft::new().with("sku", "X").created_at(ts(5)))
    .await
    .unwrap();

  let err = e
    .obsolete("products", product.id, Some(ts(5)))
    .await
    .unwrap_err();
  assert_eq!(kinds(&err), [ViolationKind::InvalidInterval]);
}

#[tokio::test]
async fn supersede_closes_old_and_opens_new_version() {
  let e = engine().await;
  let original = e
    .create("products", Draft::new().with("sku", "X").with("price", 1.0))
    .await
    .unwrap();

  let sup = e
    .supersede("products", original.id, changes([("price", Scalar::from(2.0))]))
    .await
    .unwrap()
    .expect("a new version");

  assert_eq!(sup.previous.id, original.id);
  assert_eq!(sup.current.group_id, original.group_id);
  assert_ne!(sup.current.id, original.id);
  assert_eq!(sup.previous.obsoleted_dt, Bound::At(sup.current.created_dt));
  assert!(sup.current.is_open());

  let history = e.history("products", original.group_id).await.unwrap();
  assert_eq!(history.len(), 2);
  assert_eq!(history[0], sup.previous);
  assert_eq!(history[1], sup.current);

  // At the close instant only the old version is visible.
  let group_id = original.group_id;
  let at_close = e
    .as_of(sup.current.created_dt, |scope| async move {
      scope.group("products", group_id).await
    })
    .await
    .unwrap()
    .unwrap();
  assert_eq!(at_close.id, original.id);

  let now = e
    .as_of("infinity", |scope| async move {
      scope.group("products", group_id).await
    })
    .await
    .unwrap()
    .unwrap();
  assert_eq!(now.id, sup.current.id);
}

#[tokio::test]
async fn supersede_without_changes_writes_nothing() {
  let e = engine().await;
  let product = e
    .create("products", Draft::new().with("sku", "X"))
    .await
    .unwrap();

  let sup = e
    .supersede("products", product.id, Attributes::new())
    .await
    .unwrap();
  assert!(sup.is_none());
  assert_eq!(e.history("products", product.group_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn supersede_of_a_closed_version_fails() {
  let e = engine().await;
  let product = e
    .create("products", Draft::new().with("sku", "X"))
    .await
    .unwrap();
  e.obsolete("products", product.id, None).await.unwrap();

  let err = e
    .supersede("products", product.id, changes([("sku", Scalar::from("Y"))]))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::AlreadyObsoleted { .. }));
}

// ─── References ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn reference_to_closed_parent_is_dangling() {
  let e = engine().await;
  let parent = e
    .create("categories", Draft::new().with("name", "Tools"))
    .await
    .unwrap();
  e.obsolete("categories", parent.id, None).await.unwrap();

  let err = e
    .create(
      "products",
      Draft::new().with("sku", "X").with("category_id", parent.id),
    )
    .await
    .unwrap_err();
  assert_eq!(kinds(&err), [ViolationKind::DanglingReference]);
  assert_eq!(err.validation().unwrap().on("category").count(), 1);
}

#[tokio::test]
async fn reference_to_open_or_missing_parent_passes() {
  let e = engine().await;
  let parent = e
    .create("categories", Draft::new().with("name", "Tools"))
    .await
    .unwrap();

  e.create(
    "products",
    Draft::new().with("sku", "X").with("category_id", parent.id),
  )
  .await
  .unwrap();
  e.create(
    "products",
    Draft::new().with("sku", "Y").with("category_id", Uuid::new_v4()),
  )
  .await
  .unwrap();
}

#[tokio::test]
async fn every_failed_rule_is_reported_together() {
  let e = engine().await;
  let parent = e
    .create("categories", Draft::new().with("name", "Tools"))
    .await
    .unwrap();
  e.obsolete("categories", parent.id, None).await.unwrap();
  e.create("products", Draft::new().with("sku", "X")).await.unwrap();

  let err = e
    .create(
      "products",
      Draft::new().with("sku", "X").with("category_id", parent.id),
    )
    .await
    .unwrap_err();
  assert_eq!(kinds(&err), [
    ViolationKind::UniquenessViolation,
    ViolationKind::DanglingReference,
  ]);
}

// ─── Removal ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn open_dependents_block_removal_until_closed() {
  let e = engine().await;
  let parent = e
    .create("categories", Draft::new().with("name", "Tools"))
    .await
    .unwrap();
  let child = e
    .create(
      "products",
      Draft::new().with("sku", "X").with("category_id", parent.id),
    )
    .await
    .unwrap();

  let err = e.remove("categories", parent.id).await.unwrap_err();
  assert_eq!(kinds(&err), [ViolationKind::ReferentialBlock]);
  assert!(err.to_string().contains("products"));
  assert!(e.get("categories", parent.id).await.unwrap().is_some());

  e.obsolete("products", child.id, None).await.unwrap();
  e.remove("categories", parent.id).await.unwrap();
  assert!(e.get("categories", parent.id).await.unwrap().is_none());
}

#[tokio::test]
async fn non_append_only_types_are_removed_freely() {
  let e = engine().await;
  let vendor = e
    .create("vendors", Draft::new().with("name", "Acme"))
    .await
    .unwrap();
  e.create(
    "listings",
    Draft::new().with("title", "Anvil").with("vendor_id", vendor.id),
  )
  .await
  .unwrap();

  e.remove("vendors", vendor.id).await.unwrap();
}

#[tokio::test]
async fn removing_a_missing_row_is_not_found() {
  let e = engine().await;
  let err = e.remove("categories", Uuid::new_v4()).await.unwrap_err();
  assert!(matches!(err, Error::NotFound { .. }));
}

// ─── Point-in-time reads ─────────────────────────────────────────────────────

#[tokio::test]
async fn as_of_honours_interval_boundaries() {
  let e = engine().await;
  e.create(
    "products",
    Draft::new().with("sku", "X").created_at(ts(5)).obsoleted_at(ts(10)),
  )
  .await
  .unwrap();

  for (secs, visible) in [(4, 0), (5, 0), (6, 1), (10, 1), (11, 0)] {
    let rows = e
      .as_of(ts(secs), |scope| async move { scope.all("products").await })
      .await
      .unwrap();
    assert_eq!(rows.len(), visible, "at t={secs}");
  }
}

#[tokio::test]
async fn as_of_accepts_every_infinity_spelling() {
  let e = engine().await;
  e.create("products", Draft::new().with("sku", "open")).await.unwrap();
  e.create(
    "products",
    Draft::new().with("sku", "closed").created_at(ts(5)).obsoleted_at(ts(10)),
  )
  .await
  .unwrap();

  for marker in [
    Scalar::Real(f64::INFINITY),
    Scalar::from("infinity"),
    Scalar::from("Infinity"),
  ] {
    let rows = e
      .as_of(marker, |scope| async move { scope.all("products").await })
      .await
      .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("sku"), Some(&Scalar::from("open")));
  }
}

#[tokio::test]
async fn as_of_null_fails_before_running_the_lookup() {
  let e = engine().await;
  let ran = Arc::new(AtomicBool::new(false));

  let flag = ran.clone();
  let err = e
    .as_of(None::<i64>, |scope| async move {
      flag.store(true, Ordering::SeqCst);
      scope.all("products").await
    })
    .await
    .unwrap_err();

  assert!(matches!(err, Error::InvalidTimestamp(_)));
  assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn as_of_find_by_filters_within_the_scope() {
  let e = engine().await;
  e.create("products", Draft::new().with("sku", "X").with("price", 1.0))
    .await
    .unwrap();
  e.create("products", Draft::new().with("sku", "Y").with("price", 2.0))
    .await
    .unwrap();

  let (ts_seen, rows) = e
    .as_of("infinity", |scope| async move {
      let rows = scope.find_by("products", [("price", 2.0)]).await?;
      Ok::<_, Error>((scope.ts(), rows))
    })
    .await
    .unwrap();

  assert_eq!(ts_seen, Bound::Infinity);
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].get("sku"), Some(&Scalar::from("Y")));

  let err = e
    .as_of("infinity", |scope| async move {
      scope.find_by("products", [("colour", "red")]).await
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::UnknownAttribute { .. }));
}

// ─── Foreign-key spelling ────────────────────────────────────────────────────

#[tokio::test]
async fn any_id_spelling_still_blocks_parent_removal() {
  let e = engine().await;
  let parent = e
    .create("categories", Draft::new().with("name", "Tools"))
    .await
    .unwrap();

  let child = e
    .create(
      "products",
      Draft::new()
        .with("sku", "X")
        .with("category_id", parent.id.hyphenated().to_string().to_uppercase()),
    )
    .await
    .unwrap();
  assert_eq!(child.get("category_id"), Some(&Scalar::from(parent.id)));

  let err = e.remove("categories", parent.id).await.unwrap_err();
  assert_eq!(kinds(&err), [ViolationKind::ReferentialBlock]);
  assert!(e.get("categories", parent.id).await.unwrap().is_some());
}

#[tokio::test]
async fn respelled_foreign_key_is_not_a_change() {
  let e = engine().await;
  let parent = e
    .create("categories", Draft::new().with("name", "Tools"))
    .await
    .unwrap();
  let child = e
    .create(
      "products",
      Draft::new().with("sku", "X").with("category_id", parent.id),
    )
    .await
    .unwrap();

  let sup = e
    .supersede(
      "products",
      child.id,
      changes([("category_id", Scalar::from(parent.id.simple().to_string()))]),
    )
    .await
    .unwrap();
  assert!(sup.is_none());
}

#[tokio::test]
async fn foreign_key_that_is_not_an_id_is_rejected() {
  let e = engine().await;

  for value in [Scalar::Integer(1), Scalar::from("abc")] {
    let err = e
      .create(
        "products",
        Draft::new().with("sku", "X").with("category_id", value),
      )
      .await
      .unwrap_err();
    assert!(matches!(err, Error::UnsupportedValue { .. }));
  }

  let product = e
    .create("products", Draft::new().with("sku", "X"))
    .await
    .unwrap();
  let err = e
    .update("products", product.id, changes([("category_id", Scalar::from("abc"))]))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::UnsupportedValue { .. }));
}

// ─── Timestamp range ─────────────────────────────────────────────────────────

/// 10000-01-01T00:00:00Z, the first instant without a four-digit year.
const YEAR_10000: i64 = 253_402_300_800;

#[tokio::test]
async fn as_of_beyond_year_9999_is_rejected() {
  let e = engine().await;
  e.create("products", Draft::new().with("sku", "X")).await.unwrap();

  let rows = e
    .as_of(YEAR_10000 - 1, |scope| async move { scope.all("products").await })
    .await
    .unwrap();
  assert_eq!(rows.len(), 1);

  let err = e
    .as_of(YEAR_10000, |scope| async move { scope.all("products").await })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::InvalidTimestamp(_)));
}

#[tokio::test]
async fn writes_outside_four_digit_years_are_rejected() {
  let e = engine().await;

  let err = e
    .create("products", Draft::new().with("sku", "X").created_at(ts(YEAR_10000)))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::InvalidTimestamp(_)));

  let err = e
    .create(
      "products",
      Draft::new().with("sku", "X").created_at(ts(5)).obsoleted_at(ts(YEAR_10000)),
    )
    .await
    .unwrap_err();
  assert!(matches!(err, Error::InvalidTimestamp(_)));

  let product = e
    .create("products", Draft::new().with("sku", "X"))
    .await
    .unwrap();
  let err = e
    .obsolete("products", product.id, Some(ts(YEAR_10000)))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::InvalidTimestamp(_)));
  assert!(e.get("products", product.id).await.unwrap().unwrap().is_open());
}

// ─── Typed entities ──────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Warehouse {
  code: String,
  city: Option<String>,
}

impl Versioned for Warehouse {
  const ENTITY: &'static str = "warehouses";

  fn declare(entity: EntityType) -> annals_core::Result<EntityType> {
    entity
      .attribute("city")
      .validates_uniqueness_of(["code"], Vec::<String>::new())
  }
}

#[tokio::test]
async fn typed_entities_round_trip() {
  let mut registry = Registry::new();
  registry.register_type::<Warehouse>().unwrap();
  let store = SqliteStore::open_in_memory(&registry).await.unwrap();
  let e = Engine::anonymous(store, registry).unwrap();

  let warehouse = Warehouse { code: "AMS-1".into(), city: Some("Amsterdam".into()) };
  let record = e.create_entity(&warehouse).await.unwrap();
  assert_eq!(record.decode::<Warehouse>().unwrap(), warehouse);

  let err = e.create_entity(&warehouse).await.unwrap_err();
  assert_eq!(kinds(&err), [ViolationKind::UniquenessViolation]);
}
