//! Property-based tests for the ledger's pure invariants: serde round-trips
//! of transfer history and the line-resolution rule.

use proptest::prelude::*;
use uuid::Uuid;

use labtrack_api::entities::serial_record::encode_history;
use labtrack_api::entities::testing_request_line::{encode_states, LineSerialState};
use labtrack_api::entities::{SerialStatus, TestOutcome, TransferEvent, TransferType};

fn serial_status_strategy() -> impl Strategy<Value = SerialStatus> {
    prop_oneof![
        Just(SerialStatus::Available),
        Just(SerialStatus::PendingTesting),
        Just(SerialStatus::UnderTesting),
        Just(SerialStatus::Tested),
        Just(SerialStatus::Passed),
        Just(SerialStatus::Failed),
        Just(SerialStatus::Returned),
        Just(SerialStatus::Rejected),
    ]
}

fn outcome_strategy() -> impl Strategy<Value = Option<TestOutcome>> {
    prop_oneof![
        Just(None),
        Just(Some(TestOutcome::Passed)),
        Just(Some(TestOutcome::Failed)),
        Just(Some(TestOutcome::Tested)),
    ]
}

fn transfer_event_strategy() -> impl Strategy<Value = TransferEvent> {
    (
        serial_status_strategy(),
        outcome_strategy(),
        prop_oneof![
            Just(TransferType::OutletToTesting),
            Just(TransferType::TestingToOutlet)
        ],
    )
        .prop_map(|(status, test_result, transfer_type)| TransferEvent {
            from_location: Uuid::new_v4(),
            to_location: Uuid::new_v4(),
            date: chrono::Utc::now(),
            transfer_type,
            status,
            test_result,
        })
}

proptest! {
    /// Any transfer history survives the JSON column round trip with
    /// order, length, and every field intact.
    #[test]
    fn transfer_history_round_trips(events in prop::collection::vec(transfer_event_strategy(), 0..8)) {
        let encoded = encode_history(&events).expect("encode");
        let decoded: Vec<TransferEvent> = serde_json::from_value(encoded).expect("decode");
        prop_assert_eq!(decoded, events);
    }

    /// A non-serialized line is resolved exactly when its outcome tallies
    /// cover the full quantity.
    #[test]
    fn quantity_line_resolution_matches_tallies(
        quantity in 1i32..100,
        passed in 0i32..100,
        failed in 0i32..100,
        tested in 0i32..100,
    ) {
        let line = labtrack_api::entities::testing_request_line::Model {
            id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            line_no: 1,
            product_id: Uuid::new_v4(),
            quantity,
            serial_numbers: serde_json::json!([]),
            serial_states: serde_json::json!([]),
            passed_qty: passed,
            failed_qty: failed,
            tested_qty: tested,
            remark: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        prop_assert_eq!(line.is_resolved(), passed + failed + tested >= quantity);
    }

    /// A serialized line is resolved exactly when no serial is still moving
    /// through the pending/under-testing stages.
    #[test]
    fn serialized_line_resolution_requires_every_outcome(
        statuses in prop::collection::vec(serial_status_strategy(), 1..6)
    ) {
        let states: Vec<LineSerialState> = statuses
            .iter()
            .enumerate()
            .map(|(i, status)| LineSerialState {
                serial_number: format!("SN-{}", i),
                status: *status,
                test_result: None,
                test_remark: None,
                tested_at: None,
                tested_by: None,
            })
            .collect();
        let line = labtrack_api::entities::testing_request_line::Model {
            id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            line_no: 1,
            product_id: Uuid::new_v4(),
            quantity: statuses.len() as i32,
            serial_numbers: serde_json::json!([]),
            serial_states: encode_states(&states).expect("encode"),
            passed_qty: 0,
            failed_qty: 0,
            tested_qty: 0,
            remark: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        let expected = statuses.iter().all(|s| matches!(
            s,
            SerialStatus::Tested | SerialStatus::Passed | SerialStatus::Failed | SerialStatus::Returned
        ));
        prop_assert_eq!(line.is_resolved(), expected);
    }
}
