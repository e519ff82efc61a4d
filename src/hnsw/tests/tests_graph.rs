//! Graph construction, traversal, and repair tests.

#[cfg(test)]
mod tests {
    use crate::hnsw::{
        Scored, assign_level, connect_back, connect_new_node, search_layer_base,
        search_layer_upper, unlink,
    };
    use crate::layout::{Layout, LayoutOptions, NO_NEIGHBOR};
    use crate::score::Metric;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn open_layout(tmp: &TempDir, dim: usize, max_neighbors: usize) -> Layout {
        Layout::open(
            tmp.path().join("graph.vlm"),
            &LayoutOptions {
                dim,
                max_count: 32,
                max_neighbors,
                max_layers: 3,
                metric: Metric::Dot,
            },
        )
        .unwrap()
    }

    /// Performs the data-write half of an insert, then wires the node.
    fn insert_node(layout: &mut Layout, deleted: &HashSet<u32>, vector: &[f32], level: usize) -> u32 {
        let slot = layout.header.count as u32;
        layout.write_vector(slot, vector);
        layout.set_tombstone(slot, false);
        layout.clear_neighbor_lists(slot);
        connect_new_node(layout, deleted, slot, vector, level);
        layout.header.count += 1;
        slot
    }

    fn live_neighbors(layout: &Layout, slot: u32, layer: usize) -> Vec<i32> {
        layout
            .neighbors(slot, layer)
            .iter()
            .copied()
            .take_while(|&n| n != NO_NEIGHBOR)
            .collect()
    }

    // ----------------------------------------------------------------
    // Level assignment
    // ----------------------------------------------------------------

    #[test]
    fn levels_are_bounded_and_bottom_heavy() {
        let mut rng = StdRng::seed_from_u64(7);
        let m_l = 1.0 / 16.0f64.ln();

        let mut histogram = [0usize; 5];
        for _ in 0..2000 {
            let level = assign_level(&mut rng, m_l, 5);
            assert!(level < 5);
            histogram[level] += 1;
        }

        // The distribution decays geometrically: the base layer
        // dominates and each layer above it is rarer than the last.
        assert!(histogram[0] > histogram[1]);
        assert!(histogram[1] > histogram[2]);
    }

    #[test]
    fn single_layer_graphs_always_assign_level_zero() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert_eq!(assign_level(&mut rng, 1.0 / 16.0f64.ln(), 1), 0);
        }
    }

    // ----------------------------------------------------------------
    // Construction
    // ----------------------------------------------------------------

    #[test]
    fn first_node_becomes_the_entry_point() {
        let tmp = TempDir::new().unwrap();
        let mut layout = open_layout(&tmp, 4, 4);
        let deleted = HashSet::new();

        let slot = insert_node(&mut layout, &deleted, &[1.0, 0.0, 0.0, 0.0], 1);
        assert_eq!(layout.header.entry_point, slot as i32);
        assert_eq!(layout.header.entry_point_level, 1);
    }

    #[test]
    fn higher_level_insert_takes_over_the_entry_point() {
        let tmp = TempDir::new().unwrap();
        let mut layout = open_layout(&tmp, 4, 4);
        let deleted = HashSet::new();

        insert_node(&mut layout, &deleted, &[1.0, 0.0, 0.0, 0.0], 0);
        let promoted = insert_node(&mut layout, &deleted, &[0.0, 1.0, 0.0, 0.0], 2);

        assert_eq!(layout.header.entry_point, promoted as i32);
        assert_eq!(layout.header.entry_point_level, 2);
    }

    #[test]
    fn base_layer_links_are_bidirectional() {
        let tmp = TempDir::new().unwrap();
        let mut layout = open_layout(&tmp, 4, 4);
        let deleted = HashSet::new();

        let a = insert_node(&mut layout, &deleted, &[1.0, 0.0, 0.0, 0.0], 0);
        let b = insert_node(&mut layout, &deleted, &[0.9, 0.1, 0.0, 0.0], 0);
        let c = insert_node(&mut layout, &deleted, &[0.0, 1.0, 0.0, 0.0], 0);

        assert!(live_neighbors(&layout, a, 0).contains(&(b as i32)));
        assert!(live_neighbors(&layout, b, 0).contains(&(a as i32)));
        assert!(live_neighbors(&layout, c, 0).contains(&(a as i32)));
        assert!(live_neighbors(&layout, a, 0).contains(&(c as i32)));
    }

    #[test]
    fn neighbor_lists_never_contain_self_or_duplicates() {
        let tmp = TempDir::new().unwrap();
        let mut layout = open_layout(&tmp, 4, 2);
        let deleted = HashSet::new();

        let vectors: [[f32; 4]; 6] = [
            [1.0, 0.0, 0.0, 0.0],
            [0.8, 0.2, 0.0, 0.0],
            [0.6, 0.4, 0.0, 0.0],
            [0.4, 0.6, 0.0, 0.0],
            [0.2, 0.8, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
        ];
        for v in &vectors {
            insert_node(&mut layout, &deleted, v, 0);
        }

        for slot in 0..layout.header.count as u32 {
            for layer in 0..3 {
                let list = live_neighbors(&layout, slot, layer);
                assert!(!list.contains(&(slot as i32)), "slot {slot} references itself");
                let unique: HashSet<i32> = list.iter().copied().collect();
                assert_eq!(unique.len(), list.len(), "slot {slot} has duplicate edges");
            }
        }
    }

    #[test]
    fn full_list_keeps_the_better_edge() {
        let tmp = TempDir::new().unwrap();
        let mut layout = open_layout(&tmp, 4, 2);

        // Owner at slot 0 with a full list of two mediocre neighbours.
        layout.write_vector(0, &[1.0, 0.0, 0.0, 0.0]);
        layout.write_vector(1, &[0.0, 1.0, 0.0, 0.0]);
        layout.write_vector(2, &[0.1, 0.9, 0.0, 0.0]);
        layout.write_vector(3, &[0.95, 0.05, 0.0, 0.0]);
        layout.header.count = 4;
        for slot in 0..5 {
            layout.clear_neighbor_lists(slot);
        }
        layout.write_neighbors(0, 0, &[1, 2]);
        layout.write_neighbors(1, 0, &[0]);
        layout.write_neighbors(2, 0, &[0]);

        // Slot 3 scores far better against the owner than slot 1 does,
        // so it evicts the worst edge.
        connect_back(&mut layout, 0, 3, 0);
        let list = live_neighbors(&layout, 0, 0);
        assert_eq!(list.len(), 2);
        assert!(list.contains(&3));
        assert!(!list.contains(&1));

        // The evicted node lost its half-edge back to the owner too.
        assert!(!live_neighbors(&layout, 1, 0).contains(&0));

        // A worse candidate than every current edge is rejected.
        layout.write_vector(4, &[-1.0, 0.0, 0.0, 0.0]);
        layout.header.count = 5;
        connect_back(&mut layout, 0, 4, 0);
        assert!(!live_neighbors(&layout, 0, 0).contains(&4));
    }

    // ----------------------------------------------------------------
    // Traversal
    // ----------------------------------------------------------------

    #[test]
    fn greedy_descent_reaches_the_local_best() {
        let tmp = TempDir::new().unwrap();
        let mut layout = open_layout(&tmp, 4, 4);
        let deleted = HashSet::new();

        let far = insert_node(&mut layout, &deleted, &[0.0, 1.0, 0.0, 0.0], 1);
        let near = insert_node(&mut layout, &deleted, &[0.9, 0.1, 0.0, 0.0], 1);
        insert_node(&mut layout, &deleted, &[0.5, 0.5, 0.0, 0.0], 1);

        let query = [1.0, 0.0, 0.0, 0.0];
        let found = search_layer_upper(&layout, &deleted, &query, far, 1);
        assert_eq!(found, near);
    }

    #[test]
    fn base_search_returns_descending_scores() {
        let tmp = TempDir::new().unwrap();
        let mut layout = open_layout(&tmp, 4, 4);
        let deleted = HashSet::new();

        for v in [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.7, 0.7, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ] {
            insert_node(&mut layout, &deleted, &v, 0);
        }

        let query = [1.0, 0.0, 0.0, 0.0];
        let results = search_layer_base(&layout, &deleted, &query, 0, 0, 4);

        assert!(!results.is_empty());
        assert_eq!(results[0].slot, 0);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn base_search_skips_deleted_slots() {
        let tmp = TempDir::new().unwrap();
        let mut layout = open_layout(&tmp, 4, 4);
        let mut deleted = HashSet::new();

        insert_node(&mut layout, &deleted, &[1.0, 0.0, 0.0, 0.0], 0);
        let victim = insert_node(&mut layout, &deleted, &[0.99, 0.01, 0.0, 0.0], 0);
        insert_node(&mut layout, &deleted, &[0.0, 1.0, 0.0, 0.0], 0);

        deleted.insert(victim);
        let query = [1.0, 0.0, 0.0, 0.0];
        let results = search_layer_base(&layout, &deleted, &query, 0, 0, 4);

        assert!(results.iter().all(|s| s.slot != victim));
    }

    #[test]
    fn base_search_with_zero_beam_is_empty() {
        let tmp = TempDir::new().unwrap();
        let mut layout = open_layout(&tmp, 4, 4);
        let deleted = HashSet::new();
        insert_node(&mut layout, &deleted, &[1.0, 0.0, 0.0, 0.0], 0);

        assert!(search_layer_base(&layout, &deleted, &[1.0, 0.0, 0.0, 0.0], 0, 0, 0).is_empty());
    }

    // ----------------------------------------------------------------
    // Repair
    // ----------------------------------------------------------------

    #[test]
    fn unlink_erases_every_back_reference() {
        let tmp = TempDir::new().unwrap();
        let mut layout = open_layout(&tmp, 4, 4);
        let mut deleted = HashSet::new();

        let vectors: [[f32; 4]; 5] = [
            [1.0, 0.0, 0.0, 0.0],
            [0.9, 0.1, 0.0, 0.0],
            [0.8, 0.2, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.9, 0.1, 0.0],
        ];
        for v in &vectors {
            insert_node(&mut layout, &deleted, v, 1);
        }

        let victim = 1u32;
        deleted.insert(victim);
        unlink(&mut layout, &deleted, victim);

        for slot in 0..layout.header.count as u32 {
            for layer in 0..3 {
                assert!(
                    !live_neighbors(&layout, slot, layer).contains(&(victim as i32)),
                    "slot {slot} layer {layer} still references the victim"
                );
            }
        }
        for layer in 0..3 {
            assert!(live_neighbors(&layout, victim, layer).is_empty());
        }
    }

    #[test]
    fn unlink_compacts_the_surviving_list() {
        let tmp = TempDir::new().unwrap();
        let mut layout = open_layout(&tmp, 4, 4);

        layout.write_vector(0, &[1.0, 0.0, 0.0, 0.0]);
        layout.header.count = 4;
        layout.write_neighbors(0, 0, &[1, 2, 3]);
        layout.write_neighbors(2, 0, &[0]);

        let deleted: HashSet<u32> = [2u32].into_iter().collect();
        unlink(&mut layout, &deleted, 2);

        // 2 disappears from the middle, the tail shifts left.
        assert_eq!(layout.neighbors(0, 0), &[1, 3, NO_NEIGHBOR, NO_NEIGHBOR]);
    }

    // ----------------------------------------------------------------
    // Ordering
    // ----------------------------------------------------------------

    #[test]
    fn scored_orders_by_score_then_slot() {
        let lo = Scored { slot: 1, score: 0.5 };
        let hi = Scored { slot: 9, score: 0.9 };
        assert!(hi > lo);

        // Equal scores break ties toward the lower slot.
        let a = Scored { slot: 2, score: 0.5 };
        let b = Scored { slot: 8, score: 0.5 };
        assert!(a > b);
    }
}
