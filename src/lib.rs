//! Salesforce Bulk API v2 export harvester.
//!
//! Submits SOQL query jobs, waits for them to complete and pages through
//! their results into a single CSV file with a normalized header. The
//! [`operators`] module holds the integrations an export pipeline usually
//! needs next to it.

pub mod config;
pub mod error;
pub mod operators;
pub mod salesforce;
pub mod streaming;

pub use config::{ClientConfig, HarvestOptions, PageCountPolicy, PollConfig, RequestOptions};
pub use error::AppError;
pub use salesforce::{BulkQueryClient, HarvestResult, ResultHarvester, SalesforceClient};
