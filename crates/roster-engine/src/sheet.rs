//! Remote roster record adapter.
//!
//! Translates membership snapshots into the remote sheet layout:
//! row 1 holds the `Username` header, rows 2..N hold one label each with
//! no gaps. Rows are always overwritten wholesale.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::EngineError;
use crate::identity::MemberLabel;

/// Literal value of the header cell.
pub const HEADER_VALUE: &str = "Username";

/// Default sheet (tab) name.
pub const DEFAULT_SHEET_NAME: &str = "VC_Roster";

/// Cell-range operations the remote tabular store supports.
///
/// Ranges are A1 notation (`'Sheet'!A2:A`). Rows are row-major.
#[async_trait]
pub trait SheetTransport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Read a range. Missing cells are omitted; an empty range is `[]`.
    async fn get_range(&self, range: &str) -> Result<Vec<Vec<String>>, Self::Error>;

    /// Write rows starting at the top-left of `range`.
    async fn update_range(&self, range: &str, rows: Vec<Vec<String>>) -> Result<(), Self::Error>;

    /// Clear every cell in `range`.
    async fn clear_range(&self, range: &str) -> Result<(), Self::Error>;
}

/// The roster record on a single sheet.
pub struct RosterSheet<T> {
    transport: T,
    sheet_name: String,
}

impl<T: SheetTransport> RosterSheet<T> {
    pub fn new(transport: T, sheet_name: impl Into<String>) -> Self {
        Self {
            transport,
            sheet_name: sheet_name.into(),
        }
    }

    /// Range of the header cell.
    pub fn header_range(&self) -> String {
        format!("{}!A1", self.quoted_name())
    }

    /// Range covering every data row.
    pub fn data_range(&self) -> String {
        format!("{}!A2:A", self.quoted_name())
    }

    /// Anchor cell where data rows are written.
    pub fn data_anchor(&self) -> String {
        format!("{}!A2", self.quoted_name())
    }

    fn quoted_name(&self) -> String {
        format!("'{}'", self.sheet_name.replace('\'', "''"))
    }

    /// Write the header if the header cell is empty.
    ///
    /// A failed read counts as empty, so the header gets (re)written.
    #[tracing::instrument(skip(self), fields(sheet = %self.sheet_name))]
    pub async fn ensure_header(&self) -> Result<(), EngineError> {
        let range = self.header_range();
        let present = match self.transport.get_range(&range).await {
            Ok(rows) => first_cell(&rows).is_some_and(|v| !v.is_empty()),
            Err(e) => {
                warn!(error = %e, range = %range, "failed to read header, rewriting it");
                false
            }
        };

        if present {
            debug!("header already present");
            return Ok(());
        }

        self.transport
            .update_range(&range, vec![vec![HEADER_VALUE.to_string()]])
            .await
            .map_err(EngineError::remote)?;
        debug!("wrote header");
        Ok(())
    }

    /// Read the current data rows. A failed read yields no rows.
    pub async fn read_data_rows(&self) -> Vec<MemberLabel> {
        let range = self.data_range();
        match self.transport.get_range(&range).await {
            Ok(rows) => rows
                .into_iter()
                .filter_map(|row| row.into_iter().next())
                .filter(|cell| !cell.is_empty())
                .map(MemberLabel::from)
                .collect(),
            Err(e) => {
                warn!(error = %e, range = %range, "failed to read roster rows");
                Vec::new()
            }
        }
    }

    /// Replace every data row with `labels`.
    ///
    /// Duplicates are dropped keeping the first occurrence. The data range
    /// is cleared first; the write is skipped when nothing remains.
    /// Returns the number of rows written.
    #[tracing::instrument(skip(self, labels), fields(sheet = %self.sheet_name, count = labels.len()))]
    pub async fn overwrite_all(&self, labels: &[MemberLabel]) -> Result<usize, EngineError> {
        let unique = dedup_labels(labels);

        self.transport
            .clear_range(&self.data_range())
            .await
            .map_err(EngineError::remote)?;

        if unique.is_empty() {
            debug!("roster empty, cleared rows only");
            return Ok(0);
        }

        let rows: Vec<Vec<String>> = unique
            .iter()
            .map(|label| vec![label.as_str().to_string()])
            .collect();
        let written = rows.len();

        self.transport
            .update_range(&self.data_anchor(), rows)
            .await
            .map_err(EngineError::remote)?;

        debug!(rows = written, "wrote roster rows");
        Ok(written)
    }
}

/// Drop repeated labels, keeping first-occurrence order.
pub fn dedup_labels(labels: &[MemberLabel]) -> Vec<MemberLabel> {
    let mut seen = HashSet::with_capacity(labels.len());
    labels
        .iter()
        .filter(|label| seen.insert(label.as_str()))
        .cloned()
        .collect()
}

fn first_cell(rows: &[Vec<String>]) -> Option<&str> {
    rows.first().and_then(|row| row.first()).map(String::as_str)
}
