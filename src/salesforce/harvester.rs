//! Paginated result harvester for completed Bulk API v2 query jobs.
//!
//! Drives the results endpoint page by page and merges every page into
//! one CSV artifact with a single normalized header:
//!
//! 1. Fetch the first page (unsized) and write it with its header normalized.
//! 2. Read the job's total record count with one status query.
//! 3. Follow `Sforce-Locator` with `maxRecords` set to the fixed page size,
//!    or to the exact remainder for the last page, until the running tally
//!    reaches the total.
//! 4. Query status once more for the summary metadata.
//!
//! # Page accounting
//!
//! After the first page, the tally advances by the page size that was
//! *requested*, not by the page's own `Sforce-NumberOfRecords`. A server
//! returning a short page therefore goes unnoticed under
//! [`PageCountPolicy::TrustRequested`]. Use [`PageCountPolicy::Reconcile`]
//! to fail with `IncompleteHarvest` instead.
//!
//! # Failure
//!
//! Any error aborts the harvest and leaves the destination partially
//! written. No retry is attempted.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Local};
use reqwest::Method;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{HarvestOptions, PageCountPolicy, PollConfig};
use crate::error::AppError;
use crate::salesforce::bulk_query_v2::{
    error_from_response, redact_id, BulkJob, BulkQueryClient, JobStatus,
};
use crate::salesforce::client::{TransportRequest, TransportResponse};
use crate::streaming::MergedCsvWriter;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Header name for the locator used in result pagination.
pub const SFORCE_LOCATOR_HEADER: &str = "Sforce-Locator";

/// Header name for the number of records in the current result page.
pub const SFORCE_NUMBER_OF_RECORDS_HEADER: &str = "Sforce-NumberOfRecords";

/// Timestamp layout used in [`HarvestResult`] summaries.
pub const SUMMARY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// One page of query results.
#[derive(Debug, Clone)]
pub struct ResultPage {
    /// CSV text: header line, then records.
    pub body: String,
    /// Value of `Sforce-NumberOfRecords`, if the page carried one.
    pub record_count: Option<u64>,
    /// Locator for the next page; `None` on the final page.
    pub continuation_token: Option<String>,
}

impl ResultPage {
    fn from_response(response: TransportResponse) -> Result<Self, AppError> {
        let record_count = match response.header_str(SFORCE_NUMBER_OF_RECORDS_HEADER) {
            Some(raw) => Some(raw.trim().parse::<u64>().map_err(|_| {
                AppError::Transport(format!(
                    "Invalid {} header on results page",
                    SFORCE_NUMBER_OF_RECORDS_HEADER
                ))
            })?),
            None => None,
        };

        let continuation_token = response
            .header_str(SFORCE_LOCATOR_HEADER)
            .map(str::trim)
            .filter(|loc| !loc.is_empty() && *loc != "null")
            .map(str::to_string);

        Ok(Self {
            body: response.body,
            record_count,
            continuation_token,
        })
    }

    fn require_record_count(&self) -> Result<u64, AppError> {
        self.record_count.ok_or_else(|| {
            AppError::Transport(format!(
                "Results page is missing the {} header",
                SFORCE_NUMBER_OF_RECORDS_HEADER
            ))
        })
    }
}

/// Summary of a completed harvest.
#[derive(Debug, Clone, Serialize)]
pub struct HarvestResult {
    pub job_id: String,
    pub sfdc_object: Option<String>,
    pub job_creator_id: Option<String>,
    pub destination: PathBuf,
    pub processed_records: u64,
    pub total_records: u64,
    #[serde(serialize_with = "serialize_summary_time")]
    pub start_time: DateTime<Local>,
    #[serde(serialize_with = "serialize_summary_time")]
    pub end_time: DateTime<Local>,
    pub elapsed_seconds: f64,
    pub pages_fetched: u64,
    pub bytes_written: u64,
}

fn serialize_summary_time<S>(time: &DateTime<Local>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&time.format(SUMMARY_TIME_FORMAT).to_string())
}

/// Size to request for the next page.
///
/// The fixed page size, or the exact remainder when a full page would
/// overshoot the total.
pub fn next_page_size(processed: u64, total: u64, page_size: u64) -> u64 {
    let remaining = total.saturating_sub(processed);
    if processed.saturating_add(page_size) > total {
        remaining
    } else {
        page_size
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ResultHarvester
// ─────────────────────────────────────────────────────────────────────────────

/// Downloads the full result set of a bulk query job into one CSV file.
#[derive(Clone)]
pub struct ResultHarvester {
    jobs: BulkQueryClient,
    options: HarvestOptions,
}

impl ResultHarvester {
    /// # Errors
    ///
    /// Returns `AppError::InvalidConfig` for a zero page size.
    pub fn new(jobs: BulkQueryClient, options: HarvestOptions) -> Result<Self, AppError> {
        options.validate()?;
        Ok(Self { jobs, options })
    }

    /// Harvests all results of `job_id` into `destination`.
    ///
    /// # Errors
    ///
    /// - `AppError::JobNotFound` - unknown job id
    /// - `AppError::Transport` - network failure, or a page missing its
    ///   record count or (before the total is reached) its locator
    /// - `AppError::IncompleteHarvest` - the tally did not land exactly on
    ///   the total, or a page came back short under `Reconcile`
    /// - `AppError::Internal` - the destination could not be written
    pub async fn harvest(&self, job_id: &str, destination: &Path) -> Result<HarvestResult, AppError> {
        let start_time = Local::now();
        let clock = Instant::now();

        let first_page = self.fetch_page(job_id, None, None).await?;

        let mut writer = MergedCsvWriter::create(destination).await?;
        writer.write_first_page(&first_page.body).await?;

        let status = self.jobs.get_status(job_id, &self.options.request).await?;
        let total_records = status.number_records_processed.ok_or_else(|| {
            AppError::Transport(format!(
                "Status of job {} carries no record count",
                redact_id(job_id)
            ))
        })?;

        let mut processed_records = first_page.require_record_count()?;
        let mut locator = first_page.continuation_token;
        let mut pages_fetched = 1u64;

        info!(
            "[BULK] Job {}: {} of {} records",
            redact_id(job_id),
            processed_records,
            total_records
        );

        while processed_records < total_records {
            let token = locator.take().ok_or_else(|| {
                AppError::Transport(format!(
                    "Results for job {} ended without a locator at {} of {} records",
                    redact_id(job_id),
                    processed_records,
                    total_records
                ))
            })?;

            let pull_size =
                next_page_size(processed_records, total_records, self.options.page_size);
            let page = self.fetch_page(job_id, Some(&token), Some(pull_size)).await?;

            if self.options.page_count_policy == PageCountPolicy::Reconcile {
                let received = page.require_record_count()?;
                if received != pull_size {
                    warn!(
                        "[BULK] Job {}: requested {} records, page reported {}",
                        redact_id(job_id),
                        pull_size,
                        received
                    );
                    writer.finish().await?;
                    return Err(AppError::IncompleteHarvest {
                        job_id: job_id.to_string(),
                        processed: processed_records + received,
                        total: total_records,
                    });
                }
            }

            writer.append_page(&page.body).await?;
            processed_records += pull_size;
            pages_fetched += 1;
            locator = page.continuation_token;

            info!(
                "[BULK] Job {}: {} of {} records",
                redact_id(job_id),
                processed_records,
                total_records
            );
        }

        let bytes_written = writer.finish().await?;

        if processed_records != total_records {
            return Err(AppError::IncompleteHarvest {
                job_id: job_id.to_string(),
                processed: processed_records,
                total: total_records,
            });
        }

        let end_time = Local::now();
        let elapsed_seconds = clock.elapsed().as_secs_f64();

        let final_status = self.jobs.get_status(job_id, &self.options.request).await?;

        info!(
            "[BULK] Harvest complete for job {}: {} records, {} pages, {} bytes in {:.1}s",
            redact_id(job_id),
            processed_records,
            pages_fetched,
            bytes_written,
            elapsed_seconds
        );

        Ok(HarvestResult {
            job_id: job_id.to_string(),
            sfdc_object: final_status.object,
            job_creator_id: final_status.created_by_id,
            destination: destination.to_path_buf(),
            processed_records,
            total_records,
            start_time,
            end_time,
            elapsed_seconds,
            pages_fetched,
            bytes_written,
        })
    }

    /// Submits `soql`, waits for the job to complete, then harvests it.
    ///
    /// # Errors
    ///
    /// `AppError::Submission("no job id available")` if the job was accepted
    /// without a readable id, plus any error from the individual steps.
    pub async fn export(
        &self,
        soql: &str,
        destination: &Path,
        poll: &PollConfig,
    ) -> Result<HarvestResult, AppError> {
        let job_id = self
            .jobs
            .submit(soql, &self.options.request)
            .await?
            .ok_or_else(|| AppError::Submission("no job id available".to_string()))?;

        let mut job = BulkJob::submitted(job_id, soql);
        let status: JobStatus = self
            .jobs
            .wait_for_completion(&job.job_id, poll, &self.options.request)
            .await?;
        job.apply_status(&status);

        info!(
            "[BULK] Job {} is {} with {} records",
            redact_id(&job.job_id),
            job.state,
            job.total_records.unwrap_or(0)
        );

        self.harvest(&job.job_id, destination).await
    }

    /// Requests one results page.
    async fn fetch_page(
        &self,
        job_id: &str,
        locator: Option<&str>,
        max_records: Option<u64>,
    ) -> Result<ResultPage, AppError> {
        let mut request = TransportRequest::new(Method::GET, self.jobs.results_path(job_id));
        if let Some(loc) = locator {
            request = request.query_pair("locator", loc);
        }
        if let Some(max) = max_records {
            request = request.query_pair("maxRecords", max.to_string());
        }
        let request = request.with_options(&self.options.request);

        info!(
            "[BULK] GET /jobs/query/{}/results{}",
            redact_id(job_id),
            if locator.is_some() { " (paginated)" } else { "" }
        );

        let response = self.jobs.transport().request(request).await?;

        info!(
            "[BULK] GET /jobs/query/{}/results -> {}",
            redact_id(job_id),
            response.status.as_u16()
        );

        if !response.status.is_success() {
            return Err(error_from_response(&response, Some(job_id)));
        }

        ResultPage::from_response(response)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
