//! Approximate-search recall against the exact linear scan.

#[cfg(test)]
mod tests {
    use crate::engine::tests::helpers::*;
    use crate::engine::{Engine, EngineOptions};
    use crate::score::Metric;
    use tempfile::TempDir;

    #[test]
    fn top_1_recall_is_at_least_90_percent() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(
            tmp.path().join("db.vlm"),
            EngineOptions {
                dim: 16,
                max_count: 1024,
                max_neighbors: 16,
                max_layers: 4,
                metric: Metric::Dot,
            },
        )
        .unwrap();

        for vector in seeded_vectors(90, 1000, 16) {
            engine.add(&vector, b"", None).unwrap();
        }

        let queries = seeded_vectors(91, 50, 16);
        let mut agreed = 0;
        for query in &queries {
            let graph = engine.search_with(query, 1, 100, None).unwrap();
            let exact = engine.search_linear(query, 1).unwrap();
            if graph[0].id == exact[0].id {
                agreed += 1;
            }
        }

        assert!(
            agreed >= 45,
            "graph search agreed with the exact scan on only {agreed}/50 queries"
        );
    }

    #[test]
    fn recall_holds_after_heavy_deletion() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(
            tmp.path().join("db.vlm"),
            EngineOptions {
                dim: 16,
                max_count: 512,
                max_neighbors: 16,
                max_layers: 4,
                metric: Metric::Dot,
            },
        )
        .unwrap();

        let mut ids = Vec::new();
        for vector in seeded_vectors(92, 400, 16) {
            ids.push(engine.add(&vector, b"", None).unwrap());
        }
        for id in ids.iter().step_by(2) {
            engine.delete(*id).unwrap();
        }

        let queries = seeded_vectors(93, 30, 16);
        let mut agreed = 0;
        for query in &queries {
            let graph = engine.search_with(query, 1, 100, None).unwrap();
            let exact = engine.search_linear(query, 1).unwrap();
            if !graph.is_empty() && graph[0].id == exact[0].id {
                agreed += 1;
            }
        }

        // Eager rewiring keeps the survivors reachable; allow a bit
        // more slack than the pristine-index bound.
        assert!(
            agreed >= 24,
            "post-delete recall too low: {agreed}/30 queries agreed"
        );
    }
}
