//! Capacity limits, counters, and health checks.

#[cfg(test)]
mod tests {
    use crate::engine::tests::helpers::*;
    use crate::engine::{Engine, EngineError};
    use tempfile::TempDir;

    #[test]
    fn add_beyond_capacity_raises_db_full() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path().join("db.vlm"), tiny_dot_options()).unwrap();

        for i in 0..8 {
            engine.add(&[i as f32, 1.0, 0.0, 0.0], b"", None).unwrap();
        }

        let err = engine
            .add(&[9.0, 9.0, 9.0, 9.0], b"overflow", None)
            .unwrap_err();
        assert!(matches!(err, EngineError::DbFull { max_count: 8 }));
        assert_eq!(engine.count().unwrap(), 8);
    }

    #[test]
    fn tombstones_do_not_free_physical_capacity() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path().join("db.vlm"), tiny_dot_options()).unwrap();

        let mut ids = Vec::new();
        for i in 0..8 {
            ids.push(engine.add(&[i as f32, 1.0, 0.0, 0.0], b"", None).unwrap());
        }
        for id in &ids[..4] {
            engine.delete(*id).unwrap();
        }

        // Four documents are gone, but their slots are not reusable.
        let err = engine.add(&[0.5, 0.5, 0.5, 0.5], b"", None).unwrap_err();
        assert!(matches!(err, EngineError::DbFull { .. }));
    }

    #[test]
    fn counters_track_adds_and_deletes() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path().join("db.vlm"), tiny_dot_options()).unwrap();

        assert_eq!(engine.count().unwrap(), 0);
        assert_eq!(engine.deleted_count().unwrap(), 0);
        assert!(engine.is_empty().unwrap());

        let a = engine.add(&[1.0, 0.0, 0.0, 0.0], b"", None).unwrap();
        engine.add(&[0.0, 1.0, 0.0, 0.0], b"", None).unwrap();
        assert_eq!(engine.count().unwrap(), 2);
        assert_eq!(engine.len().unwrap(), 2);

        engine.delete(a).unwrap();
        assert_eq!(engine.count().unwrap(), 2);
        assert_eq!(engine.deleted_count().unwrap(), 1);
        assert_eq!(engine.len().unwrap(), 1);
    }

    #[test]
    fn stats_snapshot_is_consistent() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path().join("db.vlm"), tiny_dot_options()).unwrap();

        let a = engine.add(&[1.0, 0.0, 0.0, 0.0], b"", None).unwrap();
        engine.add(&[0.0, 1.0, 0.0, 0.0], b"", None).unwrap();
        engine.delete(a).unwrap();

        let stats = engine.stats().unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.deleted_count, 1);
        assert_eq!(stats.live_count, 1);
        assert_eq!(stats.max_count, 8);
        assert_eq!(stats.dim, 4);
        assert!(stats.entry_point >= 0);
        assert!(stats.file_size_bytes > 0);
    }

    #[test]
    fn engine_stays_healthy_through_mixed_workload() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path().join("db.vlm"), dot_options(8, 64)).unwrap();
        assert!(engine.is_healthy());

        let mut ids = Vec::new();
        for vector in seeded_vectors(3, 30, 8) {
            ids.push(engine.add(&vector, b"", None).unwrap());
        }
        assert!(engine.is_healthy());

        for id in ids.iter().step_by(2) {
            engine.delete(*id).unwrap();
        }
        assert!(engine.is_healthy());
    }
}
