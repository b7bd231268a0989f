//! Salesforce HTTP client and Bulk API v2 query layer.
//!
//! - **Transport** ([`client`]) sends authenticated requests and never logs
//!   tokens or sensitive URL parameters
//! - **Job lifecycle** ([`bulk_query_v2`]) submits query jobs and reads their status
//! - **Harvest** ([`harvester`]) pages through a completed job's results into
//!   one CSV file with a normalized header ([`header`])

/// Salesforce REST API version used when none is configured.
pub const API_VERSION: &str = "v60.0";

pub mod bulk_query_v2;
pub mod client;
pub mod harvester;
pub mod header;

#[cfg(test)]
pub(crate) mod testing;

pub use bulk_query_v2::{BulkJob, BulkJobState, BulkQueryClient, JobStatus};
pub use client::{LoggingMode, SalesforceClient, Transport};
pub use harvester::{HarvestResult, ResultHarvester};
pub use header::normalize_header;
