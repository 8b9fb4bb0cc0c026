use crate::{JobStore, PersistenceError, Result};
use chrono::{DateTime, Utc};
use job_queue_core::{Job, JobId, JobStatus, QueueStats};
use parking_lot::Mutex;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use std::path::PathBuf;
use tracing::{debug, info};
use uuid::Uuid;

/// Configuration for the RocksDB job store
#[derive(Debug, Clone)]
pub struct RocksStoreConfig {
    pub data_dir: PathBuf,
    /// fsync every write batch before acknowledging it
    pub sync_writes: bool,
}

impl Default for RocksStoreConfig {
    fn default() -> Self {
        RocksStoreConfig {
            data_dir: PathBuf::from("./data"),
            sync_writes: true,
        }
    }
}

/// Column family names, one per status
const CF_QUEUED: &str = "queued";
const CF_RUNNING: &str = "running";
const CF_SUCCEEDED: &str = "succeeded";
const CF_FAILED: &str = "failed";
/// Claim index: `available_at` millis (order preserving) ++ job id -> empty
const CF_CLAIM_INDEX: &str = "claim_index";

const INDEX_KEY_LEN: usize = 8 + 16;

/// Durable job store using RocksDB.
///
/// A record lives in exactly one status column family and moves between
/// them in a single `WriteBatch`. Queued records also have an entry in the
/// claim index so `claim_next` reads them in `(available_at, id)` order.
pub struct RocksJobStore {
    db: DB,
    config: RocksStoreConfig,
    /// Serialises every read-check-write sequence
    write_lock: Mutex<()>,
}

fn cf_name(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Queued => CF_QUEUED,
        JobStatus::Running => CF_RUNNING,
        JobStatus::Succeeded => CF_SUCCEEDED,
        JobStatus::Failed => CF_FAILED,
    }
}

fn index_key(job: &Job) -> [u8; INDEX_KEY_LEN] {
    // Flipping the sign bit makes big-endian byte order match numeric order.
    let millis = (job.available_at.timestamp_millis() as u64) ^ (1 << 63);
    let mut key = [0u8; INDEX_KEY_LEN];
    key[..8].copy_from_slice(&millis.to_be_bytes());
    key[8..].copy_from_slice(job.id.as_bytes());
    key
}

fn index_entry(key: &[u8]) -> Result<(i64, JobId)> {
    if key.len() != INDEX_KEY_LEN {
        return Err(PersistenceError::Other(format!(
            "corrupt claim index key of {} bytes",
            key.len()
        )));
    }
    let mut millis = [0u8; 8];
    millis.copy_from_slice(&key[..8]);
    let millis = (u64::from_be_bytes(millis) ^ (1 << 63)) as i64;
    let id = Uuid::from_slice(&key[8..]).map_err(|e| PersistenceError::Other(e.to_string()))?;
    Ok((millis, id))
}

fn decode(value: &[u8]) -> Result<Job> {
    Ok(serde_json::from_slice(value)?)
}

impl RocksJobStore {
    /// Open or create the job store
    pub fn open(config: RocksStoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let db_path = config.data_dir.join("jobs");

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = [CF_QUEUED, CF_RUNNING, CF_SUCCEEDED, CF_FAILED, CF_CLAIM_INDEX]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&db_opts, db_path, cf_descriptors)?;

        info!("Opened job store at {:?}", config.data_dir);

        Ok(RocksJobStore {
            db,
            config,
            write_lock: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PersistenceError::Other(format!("CF {} not found", name)))
    }

    fn status_cf(&self, status: JobStatus) -> Result<&ColumnFamily> {
        self.cf(cf_name(status))
    }

    /// Stage the move of a record from its previous state (if any) to `job`.
    fn stage(&self, batch: &mut WriteBatch, previous: Option<&Job>, job: &Job) -> Result<()> {
        let index = self.cf(CF_CLAIM_INDEX)?;
        if let Some(previous) = previous {
            batch.delete_cf(self.status_cf(previous.status)?, previous.id.as_bytes());
            if previous.status == JobStatus::Queued {
                batch.delete_cf(index, index_key(previous));
            }
        }
        batch.put_cf(self.status_cf(job.status)?, job.id.as_bytes(), serde_json::to_vec(job)?);
        if job.status == JobStatus::Queued {
            batch.put_cf(index, index_key(job), b"");
        }
        Ok(())
    }

    fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &opts)?;
        Ok(())
    }

    fn read_in(&self, status: JobStatus, id: &JobId) -> Result<Option<Job>> {
        match self.db.get_cf(self.status_cf(status)?, id.as_bytes())? {
            Some(value) => Ok(Some(decode(&value)?)),
            None => Ok(None),
        }
    }

    fn exists(&self, id: &JobId) -> Result<bool> {
        for status in JobStatus::ALL {
            if self.db.get_pinned_cf(self.status_cf(status)?, id.as_bytes())?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl JobStore for RocksJobStore {
    fn insert(&self, job: &Job) -> Result<()> {
        let _guard = self.write_lock.lock();
        if self.exists(&job.id)? {
            return Err(PersistenceError::AlreadyExists(job.id));
        }

        let mut batch = WriteBatch::default();
        self.stage(&mut batch, None, job)?;
        self.commit(batch)?;

        debug!(job_id = %job.id, status = %job.status, "Stored job");
        Ok(())
    }

    fn get(&self, id: &JobId) -> Result<Option<Job>> {
        // A snapshot keeps a record that is mid-move visible in exactly one family.
        let snapshot = self.db.snapshot();
        for status in JobStatus::ALL {
            if let Some(value) = snapshot.get_cf(self.status_cf(status)?, id.as_bytes())? {
                return Ok(Some(decode(&value)?));
            }
        }
        Ok(None)
    }

    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>> {
        let _guard = self.write_lock.lock();
        let index = self.cf(CF_CLAIM_INDEX)?;
        let now_millis = now.timestamp_millis();

        let mut candidate = None;
        for item in self.db.iterator_cf(index, IteratorMode::Start) {
            let (key, _) = item?;
            let (millis, id) = index_entry(&key)?;
            if millis > now_millis {
                break;
            }
            match self.read_in(JobStatus::Queued, &id)? {
                // Same millisecond as `now` but not yet due; a later entry may be.
                Some(job) if !job.is_claimable_at(now) => continue,
                Some(job) => {
                    candidate = Some(job);
                    break;
                }
                None => continue,
            }
        }

        let Some(queued) = candidate else {
            return Ok(None);
        };

        let mut running = queued.clone();
        running.claim(now)?;

        let mut batch = WriteBatch::default();
        self.stage(&mut batch, Some(&queued), &running)?;
        self.commit(batch)?;

        debug!(job_id = %running.id, job_type = %running.job_type, "Claimed job");
        Ok(Some(running))
    }

    fn compare_and_swap(&self, expected: JobStatus, job: &Job) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let Some(current) = self.read_in(expected, &job.id)? else {
            return Ok(false);
        };

        let mut batch = WriteBatch::default();
        self.stage(&mut batch, Some(&current), job)?;
        self.commit(batch)?;

        debug!(job_id = %job.id, from = %expected, to = %job.status, "Updated job");
        Ok(true)
    }

    fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let cf = self.status_cf(status)?;
        let mut jobs = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            jobs.push(decode(&value)?);
        }
        jobs.sort_by_key(|job| job.claim_key());
        Ok(jobs)
    }

    fn count_by_status(&self) -> Result<QueueStats> {
        let snapshot = self.db.snapshot();
        let mut stats = QueueStats::default();
        for status in JobStatus::ALL {
            for item in snapshot.iterator_cf(self.status_cf(status)?, IteratorMode::Start) {
                item?;
                stats.record(status);
            }
        }
        Ok(stats)
    }

    fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let mut batch = WriteBatch::default();
        let mut count = 0;

        for status in [JobStatus::Succeeded, JobStatus::Failed] {
            let cf = self.status_cf(status)?;
            for item in self.db.iterator_cf(cf, IteratorMode::Start) {
                let (key, value) = item?;
                let job = decode(&value)?;
                if job.completed_at.is_some_and(|done| done < cutoff) {
                    batch.delete_cf(cf, &key);
                    count += 1;
                }
            }
        }

        if count > 0 {
            self.commit(batch)?;
            info!("Purged {} terminal jobs completed before {}", count, cutoff);
        }

        Ok(count)
    }
}
