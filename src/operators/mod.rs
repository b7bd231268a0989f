//! Operators for the systems around an export: a PostgreSQL target, an SSH
//! tunnel to reach it, and a survey API as a second data source.

pub mod database;
pub mod survey;
pub mod tunnel;

pub use database::{DatabaseCredentials, DatabaseOperator};
pub use survey::{FormSummary, ResponsePage, SubmissionFields, SurveyOperator};
pub use tunnel::{TunnelConfig, TunnelOperator};
