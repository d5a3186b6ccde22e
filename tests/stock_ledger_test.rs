//! Ledger-level tests: each stock operation's preconditions and counter
//! effects, exercised directly against a transaction.

mod common;

use assert_matches::assert_matches;
use common::TestApp;
use labtrack_api::entities::{LocationType, SerialStatus, TestOutcome, TransferType};
use labtrack_api::errors::ServiceError;
use labtrack_api::services::stock_ledger;
use sea_orm::TransactionTrait;
use uuid::Uuid;

#[tokio::test]
async fn reserve_bumps_pending_without_touching_available() {
    let app = TestApp::new().await;
    let outlet = app.seed_location("Outlet", LocationType::Outlet).await;
    let center = app.seed_location("Lab", LocationType::TestingCenter).await;
    let product = app.seed_product("BULK", false).await;
    app.seed_stock(&outlet, &product, 10).await;

    let txn = app.db.begin().await.unwrap();
    stock_ledger::reserve_for_testing(&txn, outlet.id, product.id, false, 3, &[], center.id)
        .await
        .expect("reserve");
    txn.commit().await.unwrap();

    let entry = app.entry(outlet.id, product.id).await;
    assert_eq!(entry.pending_testing, 3);
    assert_eq!(entry.available, 10);
    assert_eq!(entry.total, 10);
}

#[tokio::test]
async fn reserve_fails_on_insufficient_stock() {
    let app = TestApp::new().await;
    let outlet = app.seed_location("Outlet", LocationType::Outlet).await;
    let center = app.seed_location("Lab", LocationType::TestingCenter).await;
    let product = app.seed_product("BULK", false).await;
    app.seed_stock(&outlet, &product, 2).await;

    let txn = app.db.begin().await.unwrap();
    let err =
        stock_ledger::reserve_for_testing(&txn, outlet.id, product.id, false, 3, &[], center.id)
            .await
            .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));
}

#[tokio::test]
async fn reserve_fails_when_serial_is_not_available() {
    let app = TestApp::new().await;
    let outlet = app.seed_location("Outlet", LocationType::Outlet).await;
    let center = app.seed_location("Lab", LocationType::TestingCenter).await;
    let product = app.seed_product("SER", true).await;
    let entry = app.seed_stock(&outlet, &product, 1).await;
    app.seed_serials(&entry, &["SN-1"]).await;

    let serials = vec!["SN-1".to_string()];
    let txn = app.db.begin().await.unwrap();
    stock_ledger::reserve_for_testing(&txn, outlet.id, product.id, true, 1, &serials, center.id)
        .await
        .expect("first reserve");
    // Same serial again within another request: first writer already won.
    let err = stock_ledger::reserve_for_testing(
        &txn, outlet.id, product.id, true, 1, &serials, center.id,
    )
    .await
    .unwrap_err();
    assert_matches!(err, ServiceError::SerialUnavailable(_));
}

#[tokio::test]
async fn commit_requires_a_prior_reservation() {
    let app = TestApp::new().await;
    let outlet = app.seed_location("Outlet", LocationType::Outlet).await;
    let center = app.seed_location("Lab", LocationType::TestingCenter).await;
    let product = app.seed_product("BULK", false).await;
    app.seed_stock(&outlet, &product, 5).await;

    let txn = app.db.begin().await.unwrap();
    let err =
        stock_ledger::commit_to_testing(&txn, outlet.id, product.id, false, 2, &[], center.id)
            .await
            .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));
}

#[tokio::test]
async fn receive_rejects_duplicate_serials_at_destination() {
    let app = TestApp::new().await;
    let outlet = app.seed_location("Outlet", LocationType::Outlet).await;
    let center = app.seed_location("Lab", LocationType::TestingCenter).await;
    let product = app.seed_product("SER", true).await;
    let center_entry = app.seed_stock(&center, &product, 1).await;
    app.seed_serials(&center_entry, &["SN-DUP"]).await;

    let serials = vec!["SN-DUP".to_string()];
    let txn = app.db.begin().await.unwrap();
    let err = stock_ledger::receive_for_testing(
        &txn,
        center.id,
        product.id,
        1,
        &serials,
        outlet.id,
        Uuid::new_v4(),
    )
    .await
    .unwrap_err();
    assert_matches!(err, ServiceError::DuplicateSerial(_));
}

#[tokio::test]
async fn receive_creates_the_destination_entry_when_absent() {
    let app = TestApp::new().await;
    let outlet = app.seed_location("Outlet", LocationType::Outlet).await;
    let center = app.seed_location("Lab", LocationType::TestingCenter).await;
    let product = app.seed_product("SER", true).await;

    assert!(app.maybe_entry(center.id, product.id).await.is_none());

    let serials = vec!["SN-NEW".to_string()];
    let txn = app.db.begin().await.unwrap();
    stock_ledger::receive_for_testing(
        &txn,
        center.id,
        product.id,
        1,
        &serials,
        outlet.id,
        Uuid::new_v4(),
    )
    .await
    .expect("receive");
    txn.commit().await.unwrap();

    let entry = app.entry(center.id, product.id).await;
    assert_eq!(entry.total, 1);
    assert_eq!(entry.available, 1);
    assert_eq!(entry.under_testing, 1);
    let record = app.serial(center.id, product.id, "SN-NEW").await;
    assert_eq!(record.status, SerialStatus::UnderTesting);
    assert_eq!(record.original_outlet_id, Some(outlet.id));
    assert_eq!(record.history().unwrap().len(), 1);
}

#[tokio::test]
async fn record_result_moves_counters_and_stamps_history() {
    let app = TestApp::new().await;
    let outlet = app.seed_location("Outlet", LocationType::Outlet).await;
    let center = app.seed_location("Lab", LocationType::TestingCenter).await;
    let product = app.seed_product("SER", true).await;
    let tester = Uuid::new_v4();

    let serials = vec!["SN-T".to_string()];
    let txn = app.db.begin().await.unwrap();
    stock_ledger::receive_for_testing(
        &txn,
        center.id,
        product.id,
        1,
        &serials,
        outlet.id,
        Uuid::new_v4(),
    )
    .await
    .expect("receive");
    let record = stock_ledger::record_test_result(
        &txn,
        center.id,
        product.id,
        "SN-T",
        TestOutcome::Passed,
        Some("ok".to_string()),
        tester,
    )
    .await
    .expect("record");
    txn.commit().await.unwrap();

    assert_eq!(record.status, SerialStatus::Passed);
    assert_eq!(record.test_result, Some(TestOutcome::Passed));
    assert_eq!(record.tested_by, Some(tester));
    assert!(record.tested_at.is_some());
    // Stamped in place, not appended.
    let history = record.history().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, SerialStatus::Passed);
    assert_eq!(history[0].test_result, Some(TestOutcome::Passed));

    let entry = app.entry(center.id, product.id).await;
    assert_eq!(entry.under_testing, 0);
    assert_eq!(entry.passed, 1);

    // A second result for the same serial is refused.
    let txn = app.db.begin().await.unwrap();
    let err = stock_ledger::record_test_result(
        &txn,
        center.id,
        product.id,
        "SN-T",
        TestOutcome::Failed,
        None,
        tester,
    )
    .await
    .unwrap_err();
    assert_matches!(err, ServiceError::AlreadyProcessed(_));
}

#[tokio::test]
async fn unknown_serial_is_reported_as_not_found() {
    let app = TestApp::new().await;
    let outlet = app.seed_location("Outlet", LocationType::Outlet).await;
    let center = app.seed_location("Lab", LocationType::TestingCenter).await;
    let product = app.seed_product("SER", true).await;
    app.seed_stock(&center, &product, 0).await;
    let _ = outlet;

    let txn = app.db.begin().await.unwrap();
    let err = stock_ledger::record_test_result(
        &txn,
        center.id,
        product.id,
        "SN-GHOST",
        TestOutcome::Passed,
        None,
        Uuid::new_v4(),
    )
    .await
    .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn full_serial_lifecycle_round_trip() {
    let app = TestApp::new().await;
    let outlet = app.seed_location("Outlet", LocationType::Outlet).await;
    let center = app.seed_location("Lab", LocationType::TestingCenter).await;
    let product = app.seed_product("SER", true).await;
    let entry = app.seed_stock(&outlet, &product, 1).await;
    app.seed_serials(&entry, &["SN-RT"]).await;
    let request_id = Uuid::new_v4();
    let serials = vec!["SN-RT".to_string()];

    let txn = app.db.begin().await.unwrap();
    stock_ledger::reserve_for_testing(&txn, outlet.id, product.id, true, 1, &serials, center.id)
        .await
        .expect("reserve");
    stock_ledger::commit_to_testing(&txn, outlet.id, product.id, true, 1, &serials, center.id)
        .await
        .expect("commit");
    stock_ledger::receive_for_testing(
        &txn, center.id, product.id, 1, &serials, outlet.id, request_id,
    )
    .await
    .expect("receive");
    stock_ledger::record_test_result(
        &txn,
        center.id,
        product.id,
        "SN-RT",
        TestOutcome::Passed,
        None,
        Uuid::new_v4(),
    )
    .await
    .expect("record");
    let returned = stock_ledger::return_serials_to_outlet(
        &txn,
        center.id,
        product.id,
        &serials,
        outlet.id,
        TransferType::TestingToOutlet,
    )
    .await
    .expect("return");
    stock_ledger::restore_at_outlet(&txn, outlet.id, product.id, 1, &returned, center.id)
        .await
        .expect("restore");
    txn.commit().await.unwrap();

    // Outlet: back where it started, with the result stamped on the record.
    let outlet_entry = app.entry(outlet.id, product.id).await;
    assert!(outlet_entry.counters_non_negative());
    assert_eq!(outlet_entry.total, 1);
    assert_eq!(outlet_entry.available, 1);
    assert_eq!(outlet_entry.pending_testing, 0);

    // Center: everything shed, nothing negative.
    let center_entry = app.entry(center.id, product.id).await;
    assert!(center_entry.counters_non_negative());
    assert_eq!(center_entry.total, 0);
    assert_eq!(center_entry.available, 0);
    assert_eq!(center_entry.under_testing, 0);
    assert_eq!(center_entry.passed, 0);

    // History grew monotonically at every hop: reserve, commit, restore.
    let outlet_copy = app.serial(outlet.id, product.id, "SN-RT").await;
    assert_eq!(outlet_copy.history().unwrap().len(), 3);
    assert_eq!(outlet_copy.status, SerialStatus::Available);
    assert_eq!(outlet_copy.test_result, Some(TestOutcome::Passed));

    let center_copy = app.serial(center.id, product.id, "SN-RT").await;
    assert_eq!(center_copy.history().unwrap().len(), 2);
    assert_eq!(center_copy.status, SerialStatus::Returned);
}
