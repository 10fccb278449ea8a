mod common;

use common::{TABLE, loaded, wait_for_calls};
use tasklist_core::store::{StoreError, StoreOp};

#[tokio::test]
async fn moving_last_onto_first_yields_c_a_b() {
    let fx = loaded(&["A", "B", "C"]).await;

    let moved = fx.list.reorder(3, Some(1)).await.expect("reorder");
    assert!(moved);

    assert_eq!(fx.texts(), vec!["C", "A", "B"]);
    assert_eq!(fx.ids(), vec![3, 1, 2]);
    assert_eq!(fx.indices(), vec![0, 1, 2]);

    let remote: Vec<(i64, i32)> = fx
        .store
        .rows(TABLE)
        .iter()
        .map(|t| (t.id, t.order_index))
        .collect();
    assert_eq!(remote, vec![(3, 0), (1, 1), (2, 2)]);
    assert_eq!(fx.store.calls(StoreOp::UpdateMany), 1);
    assert_eq!(fx.store.calls(StoreOp::Update), 0);
    assert!(fx.reporter.notices().is_empty());
}

#[tokio::test]
async fn every_pair_is_a_single_element_move_with_dense_indices() {
    let texts = ["A", "B", "C", "D"];
    for moved in 1..=4i64 {
        for target in 1..=4i64 {
            if moved == target {
                continue;
            }
            let fx = loaded(&texts).await;
            fx.list
                .reorder(moved, Some(target))
                .await
                .expect("reorder");

            let mut expected: Vec<i64> = (1..=4).collect();
            let from = (moved - 1) as usize;
            let to = (target - 1) as usize;
            let item = expected.remove(from);
            expected.insert(to, item);

            assert_eq!(fx.ids(), expected, "move {moved} onto {target}");
            assert_eq!(fx.indices(), vec![0, 1, 2, 3]);

            let remote_ids: Vec<i64> = fx.store.rows(TABLE).iter().map(|t| t.id).collect();
            assert_eq!(remote_ids, expected);
        }
    }
}

#[tokio::test]
async fn missing_or_same_target_is_a_no_op() {
    let fx = loaded(&["A", "B"]).await;
    let calls_before = fx.store.total_calls();

    assert!(!fx.list.reorder(1, None).await.expect("absent target"));
    assert!(!fx.list.reorder(2, Some(2)).await.expect("same target"));
    assert!(!fx.list.reorder(1, Some(42)).await.expect("unknown target"));
    assert!(!fx.list.reorder(42, Some(1)).await.expect("unknown moved"));

    assert_eq!(fx.store.total_calls(), calls_before);
    assert_eq!(fx.ids(), vec![1, 2]);
}

#[tokio::test]
async fn failed_persist_restores_the_previous_sequence() {
    let fx = loaded(&["A", "B", "C", "D"]).await;
    let before = fx.list.tasks();
    fx.store
        .fail_next(StoreOp::UpdateMany, StoreError::Connection("reset by peer".to_string()));

    let err = fx
        .list
        .reorder(1, Some(4))
        .await
        .expect_err("store rejected the batch");
    assert!(!err.is_relation_missing());

    assert_eq!(fx.list.tasks(), before);
    assert_eq!(
        fx.reporter.errors(),
        vec!["Could not save the new order. Please try again.".to_string()]
    );

    let remote_ids: Vec<i64> = fx.store.rows(TABLE).iter().map(|t| t.id).collect();
    assert_eq!(remote_ids, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn new_order_is_visible_while_the_store_is_pending() {
    let fx = loaded(&["A", "B", "C"]).await;
    let gate = fx.store.hold(StoreOp::UpdateMany);

    let (result, seen) = tokio::join!(fx.list.reorder(1, Some(3)), async {
        wait_for_calls(&fx.store, StoreOp::UpdateMany, 1).await;
        let seen = fx.texts();
        gate.notify_one();
        seen
    });

    assert!(result.expect("reorder"));
    assert_eq!(seen, vec!["B", "C", "A"]);
    assert_eq!(fx.texts(), vec!["B", "C", "A"]);
}

#[tokio::test]
async fn late_failure_reloads_instead_of_clobbering_newer_state() {
    let fx = loaded(&["A", "B", "C"]).await;
    fx.store
        .fail_next(StoreOp::UpdateMany, StoreError::Query("deadlock detected".to_string()));
    let gate = fx.store.hold(StoreOp::UpdateMany);

    let (reordered, inserted) = tokio::join!(fx.list.reorder(3, Some(1)), async {
        wait_for_calls(&fx.store, StoreOp::UpdateMany, 1).await;
        let inserted = fx.list.insert("D").await;
        gate.notify_one();
        inserted
    });

    assert!(reordered.is_err());
    let inserted = inserted.expect("insert").expect("non-blank");
    assert_eq!(inserted.order_index, 3);

    // The store never applied the reorder, so the reload shows the initial
    // order plus the concurrent insert.
    assert_eq!(fx.texts(), vec!["A", "B", "C", "D"]);
    assert_eq!(fx.store.calls(StoreOp::List), 2);
}
