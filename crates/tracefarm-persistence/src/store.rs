use crate::{PersistenceError, Result, SceneRecord};
use parking_lot::Mutex;
use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};
use std::path::PathBuf;
use std::sync::Arc;
use tracefarm_core::SceneId;
use tracing::{debug, info};

/// Configuration for scene store
#[derive(Debug, Clone)]
pub struct SceneStoreConfig {
    pub data_dir: PathBuf,
}

impl Default for SceneStoreConfig {
    fn default() -> Self {
        SceneStoreConfig {
            data_dir: PathBuf::from("./data"),
        }
    }
}

/// Column family names
const CF_ACTIVE: &str = "active";
const CF_FINISHED: &str = "finished";

/// Persistent scene metadata store using RocksDB
///
/// Unfinished scenes live in the `active` column family and move to
/// `finished` once their image has been written.
pub struct SceneStore {
    db: Arc<DB>,
    // serializes read-modify-write cycles on records
    write_lock: Mutex<()>,
}

impl SceneStore {
    /// Open or create scene store
    pub fn open(config: SceneStoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let db_path = config.data_dir.join("scenes");

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACTIVE, Options::default()),
            ColumnFamilyDescriptor::new(CF_FINISHED, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, db_path, cf_descriptors)?;

        info!("Opened scene store at {:?}", config.data_dir);

        Ok(SceneStore {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Create and store a new scene
    pub fn create_scene(&self, width: u32, height: u32) -> Result<SceneRecord> {
        let record = SceneRecord::new(width, height)?;
        let cf = self.cf(CF_ACTIVE)?;
        self.db.put_cf(cf, record.id.as_bytes(), record.to_bytes()?)?;

        debug!("Stored scene {} ({}x{})", record.id, width, height);
        Ok(record)
    }

    /// Get a scene by ID (searches both column families)
    pub fn get_scene(&self, scene_id: &SceneId) -> Result<Option<SceneRecord>> {
        let key = scene_id.as_bytes();

        for cf_name in &[CF_ACTIVE, CF_FINISHED] {
            let cf = self.cf(cf_name)?;
            if let Some(value) = self.db.get_cf(cf, key)? {
                return Ok(Some(SceneRecord::from_bytes(&value)?));
            }
        }

        Ok(None)
    }

    /// All scenes that have not finished rendering
    pub fn unfinished_scenes(&self) -> Result<Vec<SceneRecord>> {
        self.scenes_in_cf(CF_ACTIVE)
    }

    pub fn finished_scenes(&self) -> Result<Vec<SceneRecord>> {
        self.scenes_in_cf(CF_FINISHED)
    }

    /// Count a joining worker and mark the scene as started
    pub fn record_worker_joined(&self, scene_id: &SceneId) -> Result<SceneRecord> {
        self.update_active(scene_id, SceneRecord::worker_joined)
    }

    /// Count a departing worker
    pub fn record_worker_left(&self, scene_id: &SceneId) -> Result<SceneRecord> {
        self.update_active(scene_id, SceneRecord::worker_left)
    }

    /// Zero the connected-worker count of every unfinished scene.
    ///
    /// Run at startup, before any worker can have joined.
    pub fn reset_worker_counts(&self) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let cf = self.cf(CF_ACTIVE)?;

        let mut batch = WriteBatch::default();
        let mut reset = 0;
        for mut record in self.scenes_in_cf(CF_ACTIVE)? {
            if record.workers_connected == 0 {
                continue;
            }
            record.reset_workers();
            batch.put_cf(cf, record.id.as_bytes(), record.to_bytes()?);
            reset += 1;
        }
        self.db.write(batch)?;

        debug!("Reset worker counts on {} scenes", reset);
        Ok(reset)
    }

    /// Move a scene to the finished column family
    pub fn mark_finished(&self, scene_id: &SceneId, artifact_path: Option<String>) -> Result<SceneRecord> {
        let _guard = self.write_lock.lock();
        let key = scene_id.as_bytes();

        let active_cf = self.cf(CF_ACTIVE)?;
        let value = self
            .db
            .get_cf(active_cf, key)?
            .ok_or_else(|| PersistenceError::SceneNotFound(scene_id.to_string()))?;

        let mut record = SceneRecord::from_bytes(&value)?;
        record.finish(artifact_path);

        let finished_cf = self.cf(CF_FINISHED)?;
        let mut batch = WriteBatch::default();
        batch.delete_cf(active_cf, key);
        batch.put_cf(finished_cf, key, record.to_bytes()?);
        self.db.write(batch)?;

        info!("Scene {} marked finished", scene_id);
        Ok(record)
    }

    fn update_active<F>(&self, scene_id: &SceneId, update: F) -> Result<SceneRecord>
    where
        F: FnOnce(&mut SceneRecord),
    {
        let _guard = self.write_lock.lock();
        let key = scene_id.as_bytes();
        let cf = self.cf(CF_ACTIVE)?;

        let value = self
            .db
            .get_cf(cf, key)?
            .ok_or_else(|| PersistenceError::SceneNotFound(scene_id.to_string()))?;

        let mut record = SceneRecord::from_bytes(&value)?;
        update(&mut record);
        self.db.put_cf(cf, key, record.to_bytes()?)?;

        Ok(record)
    }

    fn scenes_in_cf(&self, cf_name: &str) -> Result<Vec<SceneRecord>> {
        let cf = self.cf(cf_name)?;

        let mut scenes = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item?;
            scenes.push(SceneRecord::from_bytes(&value)?);
        }

        Ok(scenes)
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PersistenceError::Other(format!("CF {} not found", name)))
    }
}
