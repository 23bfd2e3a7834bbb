use glam::Vec3;
use mapstream_common::MapId;
use mapstream_persist::{MapProject, RecordStore};

use crate::EngineError;
use crate::config::EngineConfig;
use crate::session::MapSession;

/// Moves between maps of a project, keeping the object records of every
/// visited map in a [`RecordStore`].
pub struct Engine {
    config: EngineConfig,
    project: MapProject,
    store: RecordStore,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        project: MapProject,
        store: RecordStore,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            project,
            store,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn project(&self) -> &MapProject {
        &self.project
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Open a map, restoring the records saved when it was last left.
    pub fn enter_map(
        &mut self,
        map: MapId,
        reference: Vec3,
        is_start_map: bool,
    ) -> Result<MapSession, EngineError> {
        let records = self.store.load(map)?;
        tracing::info!(map = map.0, restored = records.is_some(), "entering map");
        MapSession::open(
            self.config.clone(),
            &self.project,
            map,
            records,
            reference,
            is_start_map,
        )
    }

    /// Close a map and save its records.
    pub fn leave_map(&mut self, session: MapSession) -> Result<(), EngineError> {
        let map = session.map_id();
        let records = session.close();
        self.store.save(map, &records)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapstream_common::{EntityId, GlobalPortionCoord, StateId};
    use std::time::Duration;

    fn project(root: &std::path::Path) -> MapProject {
        let project = MapProject::new(root);
        let dir = project.map_dir(MapId(2));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            root.join("tilesets.json"),
            r#"{"tilesets":[{"id":1,"picture":1}]}"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("infos.json"),
            r#"{"name":"Cave","length":32,"width":32,"height":16,"depth":0,"tileset":1}"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("objects.json"),
            r#"{"objects":[{"id":1,"position":[2.0,0.0,2.0]}]}"#,
        )
        .unwrap();
        for (x, z) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
            std::fs::write(
                dir.join(format!("{x}_0_{z}.json")),
                r#"{"lands":[],"objects":[{"id":1,"position":[2,0,2]}]}"#,
            )
            .unwrap();
        }
        project
    }

    fn enter(engine: &mut Engine) -> MapSession {
        let mut session = engine.enter_map(MapId(2), Vec3::ZERO, false).unwrap();
        while !session.is_ready() {
            session.tick(Vec3::ZERO).unwrap();
            session.settle(Duration::from_secs(5)).unwrap();
        }
        session
    }

    #[test]
    fn records_persist_across_visits() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RecordStore::open(tmp.path().join("save")).unwrap();
        let config = EngineConfig {
            ray_far: 0,
            ..EngineConfig::default()
        };
        let mut engine = Engine::new(config, project(&tmp.path().join("game")), store).unwrap();

        let mut session = enter(&mut engine);
        session
            .set_state_override(EntityId(1), vec![StateId(4)])
            .unwrap();
        session
            .move_object(EntityId(1), Vec3::new(20.0, 0.0, 2.0))
            .unwrap();
        engine.leave_map(session).unwrap();

        let session = enter(&mut engine);
        let home = GlobalPortionCoord::new(0, 0, 0);
        let portion = session.portion_at(home).unwrap();
        assert_eq!(portion.object_states(EntityId(1)), vec![StateId(4)]);
        // Moved objects were sent home on close.
        assert_eq!(portion.resident_objects().count(), 1);
        let record = session.records().record(GlobalPortionCoord::new(1, 0, 0)).unwrap();
        assert!(record.moved_in.is_empty());
    }
}
