//! Read dispatch: point reads and scans with sampled verification.
//!
//! Reads call the primary synchronously; a primary error propagates
//! unchanged and the secondary is left untouched. On success the read
//! sampler decides whether to replay the read on the secondary, and the
//! verification continuation compares the two results after the caller
//! has already received the primary's.

use crate::error::MirrorError;
use crate::model::{Get, RequestResources, RowResult, Scan};
use crate::scanner::MirroringScanner;
use crate::verify;

use super::MirroringTable;

impl MirroringTable {
    #[tracing::instrument(skip(self, get), fields(table = %self.name))]
    pub async fn exists(&self, get: &Get) -> Result<bool, MirrorError> {
        self.ensure_open()?;
        let result = self.primary_call("exists", self.primary_backend().exists(get)).await?;

        if self.read_sampler().should_sample_next_read() {
            let backend = self.secondary().backend();
            let secondary_get = get.clone();
            self.schedule_read_verification(
                "exists",
                RequestResources::for_bools(1),
                move || async move { backend.exists(&secondary_get).await },
                verify::exists_continuation(self.mismatch_detector().clone(), get.clone(), result),
            );
        }
        Ok(result)
    }

    #[tracing::instrument(skip(self, gets), fields(table = %self.name, count = gets.len()))]
    pub async fn exists_all(&self, gets: &[Get]) -> Result<Vec<bool>, MirrorError> {
        self.ensure_open()?;
        let result = self
            .primary_call("exists_all", self.primary_backend().exists_all(gets))
            .await?;

        if self.read_sampler().should_sample_next_read() {
            let backend = self.secondary().backend();
            let secondary_gets = gets.to_vec();
            self.schedule_read_verification(
                "exists_all",
                RequestResources::for_bools(result.len()),
                move || async move { backend.exists_all(&secondary_gets).await },
                verify::exists_all_continuation(
                    self.mismatch_detector().clone(),
                    gets.to_vec(),
                    result.clone(),
                ),
            );
        }
        Ok(result)
    }

    #[tracing::instrument(skip(self, get), fields(table = %self.name))]
    pub async fn get(&self, get: &Get) -> Result<RowResult, MirrorError> {
        self.ensure_open()?;
        let result = self.primary_call("get", self.primary_backend().get(get)).await?;

        if self.read_sampler().should_sample_next_read() {
            let backend = self.secondary().backend();
            let secondary_get = get.clone();
            self.schedule_read_verification(
                "get",
                RequestResources::for_result(&result),
                move || async move { backend.get(&secondary_get).await },
                verify::get_continuation(
                    self.mismatch_detector().clone(),
                    get.clone(),
                    result.clone(),
                ),
            );
        }
        Ok(result)
    }

    #[tracing::instrument(skip(self, gets), fields(table = %self.name, count = gets.len()))]
    pub async fn get_all(&self, gets: &[Get]) -> Result<Vec<RowResult>, MirrorError> {
        self.ensure_open()?;
        let result = self
            .primary_call("get_all", self.primary_backend().get_all(gets))
            .await?;

        if self.read_sampler().should_sample_next_read() {
            let backend = self.secondary().backend();
            let secondary_gets = gets.to_vec();
            self.schedule_read_verification(
                "get_all",
                RequestResources::for_results(&result),
                move || async move { backend.get_all(&secondary_gets).await },
                verify::get_all_continuation(
                    self.mismatch_detector().clone(),
                    gets.to_vec(),
                    result.clone(),
                ),
            );
        }
        Ok(result)
    }

    /// Opens a streaming scan. The scanner holds a table reference until
    /// it is closed, so the table's close completion waits for it.
    #[tracing::instrument(skip(self, scan), fields(table = %self.name))]
    pub async fn get_scanner(&self, scan: Scan) -> Result<MirroringScanner, MirrorError> {
        self.ensure_open()?;
        let primary_stream = self
            .primary_call("scan", self.primary_backend().scan(&scan))
            .await?;

        let sampled = self.read_sampler().should_sample_next_read();
        Ok(MirroringScanner::new(
            scan,
            primary_stream,
            self.secondary().clone(),
            self.mismatch_detector().clone(),
            self.flow_controller().clone(),
            self.refs().hold(),
            sampled,
        ))
    }
}
