use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use clipwatch::pipeline::ReorderBuffer;
use clipwatch::Task;

fn task(id: u64) -> Task {
    Task::new(id, Vec::new(), Vec::new(), Arc::from(Vec::new()), (1.0, 1.0), 0)
}

#[test]
fn shuffled_completion_is_displayed_in_id_order() {
    for seed in 0..20 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut ids: Vec<u64> = (0..64).collect();
        ids.shuffle(&mut rng);

        let mut buffer = ReorderBuffer::new();
        let mut displayed = Vec::new();
        for id in ids {
            buffer.insert(task(id)).unwrap();
            while let Some((_, task)) = buffer.pop_next() {
                displayed.push(task.id());
            }
        }

        assert_eq!(displayed, (0..64).collect::<Vec<_>>(), "seed {}", seed);
        assert!(buffer.is_empty());
        assert_eq!(buffer.next_id(), 64);
    }
}

#[test]
fn late_task_holds_back_everything_after_it() {
    let mut buffer = ReorderBuffer::new();
    for id in 1..5 {
        buffer.insert(task(id)).unwrap();
    }
    assert!(buffer.pop_next().is_none());
    assert_eq!(buffer.len(), 4);

    buffer.insert(task(0)).unwrap();
    let order: Vec<u64> = std::iter::from_fn(|| buffer.pop_next().map(|(_, t)| t.id())).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
}
