//! RocksDB-backed store
//!
//! One column family per record collection. Values are JSON so the database
//! stays inspectable with generic tooling. A commit checks its preconditions
//! under a process-wide commit lock and then writes a single RocksDB
//! `WriteBatch`, so a status change and its audit entry land together or
//! not at all.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::schema::{self, keys, ALL_CFS};
use super::store::{Record, RecordView, SharedStore, Store, StoreError, StoreResult, WriteBatch};
use super::types::*;

/// Durable state store
pub struct RocksStore {
    db: RwLock<DB>,
    commit_lock: Mutex<()>,
    path: PathBuf,
}

impl RocksStore {
    /// Open or create a state store at the given path
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;

        Ok(Self {
            db: RwLock::new(db),
            commit_lock: Mutex::new(()),
            path,
        })
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedStore {
        Arc::new(self)
    }

    /// Get the database path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    // =========================================================================
    // Generic operations
    // =========================================================================

    fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &str) -> StoreResult<Option<T>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        match db.get_cf(&cf, key.as_bytes())? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Deserialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn exists(&self, cf_name: &str, key: &str) -> StoreResult<bool> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;
        Ok(db.get_cf(&cf, key.as_bytes())?.is_some())
    }

    /// All values whose key starts with `prefix`, in key order
    fn scan<T: DeserializeOwned>(&self, cf_name: &str, prefix: &str) -> StoreResult<Vec<T>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        let mut values = Vec::new();
        let iter = db.prefix_iterator_cf(&cf, prefix.as_bytes());

        for result in iter {
            let (key, value) = result?;
            if !key.starts_with(prefix.as_bytes()) {
                break; // Prefix no longer matches
            }
            let decoded = serde_json::from_slice(&value)
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            values.push(decoded);
        }

        Ok(values)
    }

    /// Column family and key a record is stored under
    fn locate(record: &Record) -> (&'static str, String) {
        match record {
            Record::Report(r) => (schema::CF_REPORTS, keys::report(&r.id)),
            Record::Assignment(a) => (
                schema::CF_ASSIGNMENTS,
                keys::assignment(&a.report_id, &a.id),
            ),
            Record::Escalation(e) => (
                schema::CF_ESCALATIONS,
                keys::escalation(&e.report_id, &e.id),
            ),
            Record::Proof(p) => (schema::CF_PROOFS, keys::proof(&p.report_id, &p.id)),
            Record::Message(m) => (
                schema::CF_MESSAGES,
                keys::message(&m.report_id, m.channel.as_str(), &m.created_at, &m.id),
            ),
            Record::Activity(e) => (
                schema::CF_ACTIVITY,
                keys::activity(&e.report_id, &e.created_at, &e.id),
            ),
            Record::Worker(w) => (schema::CF_WORKERS, keys::worker(&w.id)),
        }
    }

    fn encode_record(record: &Record) -> StoreResult<Vec<u8>> {
        match record {
            Record::Report(r) => Self::encode(r),
            Record::Assignment(a) => Self::encode(a),
            Record::Escalation(e) => Self::encode(e),
            Record::Proof(p) => Self::encode(p),
            Record::Message(m) => Self::encode(m),
            Record::Activity(e) => Self::encode(e),
            Record::Worker(w) => Self::encode(w),
        }
    }
}

impl RecordView for RocksStore {
    fn view_report(&self, report_id: &str) -> StoreResult<Option<Report>> {
        self.get(schema::CF_REPORTS, &keys::report(report_id))
    }

    fn view_proof(&self, proof_id: &str) -> StoreResult<Option<ResolutionProof>> {
        Ok(self
            .scan::<ResolutionProof>(schema::CF_PROOFS, "proof:")?
            .into_iter()
            .find(|p| p.id == proof_id))
    }

    fn view_escalation(&self, escalation_id: &str) -> StoreResult<Option<Escalation>> {
        Ok(self
            .scan::<Escalation>(schema::CF_ESCALATIONS, "esc:")?
            .into_iter()
            .find(|e| e.id == escalation_id))
    }

    fn view_report_escalations(&self, report_id: &str) -> StoreResult<Vec<Escalation>> {
        self.scan(schema::CF_ESCALATIONS, &keys::escalation_prefix(report_id))
    }

    fn view_report_assignments(&self, report_id: &str) -> StoreResult<Vec<Assignment>> {
        self.scan(schema::CF_ASSIGNMENTS, &keys::assignment_prefix(report_id))
    }
}

impl Store for RocksStore {
    fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let _guard = self.commit_lock.lock().map_err(|_| StoreError::LockPoisoned)?;
        let (preconditions, records) = batch.into_parts();

        for precondition in preconditions {
            if !precondition.holds(self)? {
                return Err(StoreError::PreconditionFailed(precondition));
            }
        }

        let mut located = Vec::with_capacity(records.len());
        for record in &records {
            let (cf_name, key) = Self::locate(record);
            if matches!(record, Record::Message(_) | Record::Activity(_))
                && self.exists(cf_name, &key)?
            {
                return Err(StoreError::AppendOnly {
                    collection: cf_name,
                    id: key,
                });
            }
            located.push((cf_name, key, Self::encode_record(record)?));
        }

        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut write_batch = rocksdb::WriteBatch::default();
        for (cf_name, key, bytes) in &located {
            let cf = db
                .cf_handle(cf_name)
                .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;
            write_batch.put_cf(&cf, key.as_bytes(), bytes);
        }
        db.write(write_batch)?;
        debug!(records = located.len(), "Batch committed");
        Ok(())
    }

    fn get_report(&self, report_id: &str) -> StoreResult<Option<Report>> {
        self.view_report(report_id)
    }

    fn list_reports(&self, filter: &ReportFilter) -> StoreResult<Vec<Report>> {
        let mut reports: Vec<Report> = self
            .scan::<Report>(schema::CF_REPORTS, "report:")?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        reports.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(reports)
    }

    fn get_assignment(&self, assignment_id: &str) -> StoreResult<Option<Assignment>> {
        Ok(self
            .scan::<Assignment>(schema::CF_ASSIGNMENTS, "asg:")?
            .into_iter()
            .find(|a| a.id == assignment_id))
    }

    fn report_assignments(&self, report_id: &str) -> StoreResult<Vec<Assignment>> {
        let mut assignments = self.view_report_assignments(report_id)?;
        assignments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(assignments)
    }

    fn worker_assignments(&self, worker_id: &str) -> StoreResult<Vec<Assignment>> {
        let mut assignments: Vec<Assignment> = self
            .scan::<Assignment>(schema::CF_ASSIGNMENTS, "asg:")?
            .into_iter()
            .filter(|a| a.worker_id == worker_id)
            .collect();
        assignments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(assignments)
    }

    fn get_escalation(&self, escalation_id: &str) -> StoreResult<Option<Escalation>> {
        self.view_escalation(escalation_id)
    }

    fn report_escalations(&self, report_id: &str) -> StoreResult<Vec<Escalation>> {
        let mut escalations = self.view_report_escalations(report_id)?;
        escalations.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(escalations)
    }

    fn get_proof(&self, proof_id: &str) -> StoreResult<Option<ResolutionProof>> {
        self.view_proof(proof_id)
    }

    fn report_proofs(&self, report_id: &str) -> StoreResult<Vec<ResolutionProof>> {
        let mut proofs: Vec<ResolutionProof> =
            self.scan(schema::CF_PROOFS, &keys::proof_prefix(report_id))?;
        proofs.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        Ok(proofs)
    }

    fn channel_messages(&self, report_id: &str, channel: Channel) -> StoreResult<Vec<Message>> {
        self.scan(
            schema::CF_MESSAGES,
            &keys::message_prefix(report_id, channel.as_str()),
        )
    }

    fn report_activity(&self, report_id: &str) -> StoreResult<Vec<ActivityLogEntry>> {
        self.scan(schema::CF_ACTIVITY, &keys::activity_prefix(report_id))
    }

    fn get_worker(&self, worker_id: &str) -> StoreResult<Option<WorkerProfile>> {
        self.get(schema::CF_WORKERS, &keys::worker(worker_id))
    }

    fn list_workers(&self) -> StoreResult<Vec<WorkerProfile>> {
        self.scan(schema::CF_WORKERS, "worker:")
    }
}
