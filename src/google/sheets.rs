use crate::google::auth::{GoogleAuthError, ServiceAccountAuth};
use crate::google::config::SHEETS_ROOT;
use crate::models::{Row, columns};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SheetsError {
    #[error(transparent)]
    Auth(#[from] GoogleAuthError),
    #[error("sheets request failed: {0}")]
    Request(String),
    #[error("invalid sheets response: {0}")]
    Deserialize(String),
}

/// Tabular source of listing rows and sink for per-row results.
#[allow(async_fn_in_trait)]
pub trait RowStore {
    async fn fetch_rows(&self) -> Result<Vec<Row>, SheetsError>;

    /// Writes header-named values into one row. Returns the number of cells written.
    async fn update_cells(
        &self,
        row_index: u32,
        updates: &[(&str, String)],
    ) -> Result<usize, SheetsError>;
}

impl<T: RowStore> RowStore for &T {
    async fn fetch_rows(&self) -> Result<Vec<Row>, SheetsError> {
        (**self).fetch_rows().await
    }

    async fn update_cells(
        &self,
        row_index: u32,
        updates: &[(&str, String)],
    ) -> Result<usize, SheetsError> {
        (**self).update_cells(row_index, updates).await
    }
}

#[derive(Debug, Default, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpdateRequest<'a> {
    value_input_option: &'static str,
    data: Vec<CellUpdate<'a>>,
}

#[derive(Debug, Serialize)]
struct CellUpdate<'a> {
    range: String,
    values: [[&'a str; 1]; 1],
}

#[derive(Clone)]
pub struct GoogleSheets {
    http: Client,
    auth: Arc<ServiceAccountAuth>,
    sheets_id: String,
    sheet_name: String,
}

impl GoogleSheets {
    pub fn new(
        http: Client,
        auth: Arc<ServiceAccountAuth>,
        sheets_id: impl Into<String>,
        sheet_name: impl Into<String>,
    ) -> Self {
        Self {
            http,
            auth,
            sheets_id: sheets_id.into(),
            sheet_name: sheet_name.into(),
        }
    }

    async fn read_range(&self, cells: &str) -> Result<Vec<Vec<String>>, SheetsError> {
        let range = a1_range(&self.sheet_name, cells);
        debug!(target = "lbc.sheets", range = %range, "reading range");
        let url = format!(
            "{}/spreadsheets/{}/values/{}",
            *SHEETS_ROOT,
            self.sheets_id,
            urlencoding::encode(&range)
        );
        let token = self.auth.access_token().await?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| SheetsError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(SheetsError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let payload: ValueRange = response
            .json()
            .await
            .map_err(|err| SheetsError::Deserialize(err.to_string()))?;
        Ok(payload.values)
    }
}

impl RowStore for GoogleSheets {
    async fn fetch_rows(&self) -> Result<Vec<Row>, SheetsError> {
        let values = self.read_range("A:Z").await?;
        if values.is_empty() {
            warn!(target = "lbc.sheets", "empty spreadsheet");
        }
        Ok(rows_from_values(&values))
    }

    async fn update_cells(
        &self,
        row_index: u32,
        updates: &[(&str, String)],
    ) -> Result<usize, SheetsError> {
        let header = self
            .read_range("1:1")
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();
        let positions = header_positions(&header);

        let mut data = Vec::with_capacity(updates.len());
        for (name, value) in updates {
            let Some(idx) = positions.get(*name) else {
                warn!(target = "lbc.sheets", column = %name, "column not found in header, skipping");
                continue;
            };
            let cell = format!("{}{}", col_to_a1(*idx), row_index);
            data.push(CellUpdate {
                range: a1_range(&self.sheet_name, &cell),
                values: [[value.as_str()]],
            });
        }

        if data.is_empty() {
            warn!(target = "lbc.sheets", row = row_index, "no valid cells to update");
            return Ok(0);
        }

        let written = data.len();
        let body = BatchUpdateRequest {
            value_input_option: "USER_ENTERED",
            data,
        };
        let url = format!(
            "{}/spreadsheets/{}/values:batchUpdate",
            *SHEETS_ROOT, self.sheets_id
        );
        let token = self.auth.access_token().await?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|err| SheetsError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(SheetsError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }
        debug!(target = "lbc.sheets", row = row_index, cells = written, "row updated");
        Ok(written)
    }
}

/// Maps a raw value grid (header first) onto rows numbered from 2.
pub fn rows_from_values(values: &[Vec<String>]) -> Vec<Row> {
    let Some((header, body)) = values.split_first() else {
        return Vec::new();
    };
    let positions = header_positions(header);
    debug!(
        target = "lbc.sheets",
        header_columns = header.len(),
        mapped = positions.len(),
        "header mapped"
    );

    body.iter()
        .enumerate()
        .map(|(offset, cells)| {
            Row::from_cells(offset as u32 + 2, |name| {
                positions
                    .get(name)
                    .and_then(|idx| cells.get(*idx))
                    .map(String::as_str)
            })
        })
        .collect()
}

/// First position of each tracked header.
fn header_positions(header: &[String]) -> HashMap<&'static str, usize> {
    columns::TRACKED
        .iter()
        .filter_map(|name| {
            header
                .iter()
                .position(|cell| cell == name)
                .map(|idx| (*name, idx))
        })
        .collect()
}

/// 0-based column index to A1 letters.
pub fn col_to_a1(idx: usize) -> String {
    let mut n = idx + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

fn a1_range(sheet_name: &str, cells: &str) -> String {
    format!("'{}'!{}", sheet_name.replace('\'', "''"), cells)
}
