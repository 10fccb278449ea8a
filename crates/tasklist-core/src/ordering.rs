//! Pure helpers for the dense `order_index` sequence.

use std::collections::HashMap;

use crate::task::{Task, TaskPatch};

/// Next index for an appended task: one past the current maximum, or 1 for
/// an empty list.
pub fn next_order_index(tasks: &[Task]) -> i32 {
    tasks
        .iter()
        .map(|t| t.order_index)
        .max()
        .map_or(1, |max| max.saturating_add(1))
}

/// Removes the element at `from` and reinserts it at `to`. Everything else
/// keeps its relative order.
pub fn move_item<T>(items: &mut Vec<T>, from: usize, to: usize) {
    if from >= items.len() || to >= items.len() || from == to {
        return;
    }
    let item = items.remove(from);
    items.insert(to, item);
}

/// Patches for every task whose index differs from its position.
pub fn dense_updates(tasks: &[Task]) -> Vec<(i64, TaskPatch)> {
    tasks
        .iter()
        .enumerate()
        .filter_map(|(position, task)| {
            let position = position as i32;
            (task.order_index != position).then(|| (task.id, TaskPatch::order_index(position)))
        })
        .collect()
}

/// Rearranges `tasks` to follow `order` (a list of ids), assigning each
/// listed task its position as index. Tasks missing from `order` keep their
/// index and move to the end in their current relative order.
pub fn apply_sequence(tasks: &mut Vec<Task>, order: &[i64]) {
    let positions: HashMap<i64, usize> = order
        .iter()
        .enumerate()
        .map(|(pos, id)| (*id, pos))
        .collect();

    for task in tasks.iter_mut() {
        if let Some(pos) = positions.get(&task.id) {
            task.order_index = *pos as i32;
        }
    }
    tasks.sort_by_key(|t| positions.get(&t.id).copied().unwrap_or(usize::MAX));
}

/// Stable sort matching the store's `ORDER BY order_index, id`.
pub fn sort_by_order(tasks: &mut [Task]) {
    tasks.sort_by_key(|t| (t.order_index, t.id));
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{apply_sequence, dense_updates, move_item, next_order_index};
    use crate::task::{Task, TaskPatch};

    fn task(id: i64, order_index: i32) -> Task {
        let now = Utc::now();
        Task {
            id,
            text: format!("t{id}"),
            completed: false,
            order_index,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn next_order_index_starts_at_one_and_follows_max() {
        assert_eq!(next_order_index(&[]), 1);
        assert_eq!(next_order_index(&[task(1, 0), task(2, 7), task(3, 3)]), 8);
    }

    #[test]
    fn move_item_is_remove_and_reinsert_not_swap() {
        let mut items = vec!['a', 'b', 'c', 'd', 'e'];
        move_item(&mut items, 1, 3);
        assert_eq!(items, vec!['a', 'c', 'd', 'b', 'e']);

        move_item(&mut items, 4, 0);
        assert_eq!(items, vec!['e', 'a', 'c', 'd', 'b']);
    }

    #[test]
    fn move_item_matches_reference_permutation_for_small_lists() {
        for len in 2..=6usize {
            for from in 0..len {
                for to in 0..len {
                    if from == to {
                        continue;
                    }
                    let mut items: Vec<usize> = (0..len).collect();
                    move_item(&mut items, from, to);

                    assert_eq!(items[to], from, "moved element lands on target slot");
                    let rest: Vec<usize> = items.iter().copied().filter(|v| *v != from).collect();
                    let expected: Vec<usize> = (0..len).filter(|v| *v != from).collect();
                    assert_eq!(rest, expected, "others keep relative order");
                }
            }
        }
    }

    #[test]
    fn move_item_ignores_out_of_range_indices() {
        let mut items = vec![1, 2, 3];
        move_item(&mut items, 5, 0);
        move_item(&mut items, 0, 9);
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[test]
    fn dense_updates_only_lists_changed_rows() {
        let tasks = vec![task(3, 2), task(1, 1), task(2, 5)];
        assert_eq!(
            dense_updates(&tasks),
            vec![(3, TaskPatch::order_index(0)), (2, TaskPatch::order_index(2))]
        );

        let dense = vec![task(3, 0), task(1, 1), task(2, 2)];
        assert!(dense_updates(&dense).is_empty());
    }

    #[test]
    fn apply_sequence_keeps_unlisted_tasks_at_the_end() {
        let mut tasks = vec![task(1, 0), task(2, 1), task(9, 10), task(3, 2)];
        apply_sequence(&mut tasks, &[3, 1, 2]);

        let ids: Vec<i64> = tasks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![3, 1, 2, 9]);
        let indices: Vec<i32> = tasks.iter().map(|t| t.order_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 10]);
    }
}
