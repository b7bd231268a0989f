//! Single-header CSV artifact assembled from paginated result bodies.
//!
//! The first page is written with its header line rewritten by
//! [`normalize_header`]; every later page is appended without its own
//! header line. A page that does not end in a line break is followed by
//! one before the next page is appended, so rows never glue together.
//!
//! The destination is written in place. If a harvest fails part way,
//! the file is left as it is and must be treated as invalid.

use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::error::AppError;
use crate::salesforce::header::normalize_header;

/// Splits a body into its first line, that line's terminator, and the rest.
///
/// Recognizes LF and CRLF. A body without a line break is all first line.
pub fn split_first_line(body: &str) -> (&str, &str, &str) {
    match body.find('\n') {
        Some(newline) => {
            let line_end = if newline > 0 && body.as_bytes()[newline - 1] == b'\r' {
                newline - 1
            } else {
                newline
            };
            (
                &body[..line_end],
                &body[line_end..=newline],
                &body[newline + 1..],
            )
        }
        None => (body, "", ""),
    }
}

/// Writer for the merged destination artifact.
pub struct MergedCsvWriter {
    out: BufWriter<File>,
    bytes_written: u64,
    /// Terminator observed on the first page's header line.
    line_ending: String,
    at_line_start: bool,
}

impl MergedCsvWriter {
    /// Creates (or truncates) the destination, creating parent directories.
    pub async fn create(destination: &Path) -> Result<Self, AppError> {
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::Internal(format!("Failed to create output directory: {}", e))
            })?;
        }

        let file = File::create(destination)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to create output file: {}", e)))?;

        Ok(Self {
            out: BufWriter::new(file),
            bytes_written: 0,
            line_ending: "\n".to_string(),
            at_line_start: true,
        })
    }

    /// Writes the first page: normalized header, then the page's records.
    pub async fn write_first_page(&mut self, body: &str) -> Result<(), AppError> {
        let (header, terminator, rest) = split_first_line(body);
        if !terminator.is_empty() {
            self.line_ending = terminator.to_string();
        }

        let header = normalize_header(header);
        self.write(&header).await?;
        self.write(terminator).await?;
        self.write(rest).await
    }

    /// Appends a later page, dropping its header line.
    pub async fn append_page(&mut self, body: &str) -> Result<(), AppError> {
        let (_, _, records) = split_first_line(body);
        if records.is_empty() {
            return Ok(());
        }

        if !self.at_line_start {
            let line_ending = self.line_ending.clone();
            self.write(&line_ending).await?;
        }
        self.write(records).await
    }

    /// Flushes buffered output to disk.
    pub async fn finish(mut self) -> Result<u64, AppError> {
        self.out
            .flush()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to flush output file: {}", e)))?;
        Ok(self.bytes_written)
    }

    async fn write(&mut self, text: &str) -> Result<(), AppError> {
        if text.is_empty() {
            return Ok(());
        }
        self.out
            .write_all(text.as_bytes())
            .await
            .map_err(|e| AppError::Internal(format!("Error writing to file: {}", e)))?;
        self.bytes_written += text.len() as u64;
        self.at_line_start = text.ends_with('\n');
        Ok(())
    }
}
