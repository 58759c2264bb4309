//! Long-term historical data store.
//!
//! Data is kept as one CSV file per symbol, data type and day:
//!
//! ```text
//! <base>/<SYMBOL>/<data_type>/<YYYY-MM-DD>.csv
//! <base>/<SYMBOL>/<data_type>/<YYYY-MM-DD>.meta.json
//! <base>/metadata.json
//! ```
//!
//! The `.meta.json` sidecar records when and from where the file was stored
//! and how to turn the rows back into JSON. `metadata.json` indexes which
//! symbols and data types have been collected.

use crate::domain::{normalize_symbol, DataType, PipelineError};
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

const INDEX_FILE: &str = "metadata.json";

/// Held while a day's CSV and sidecar are written or read as a pair, and
/// around every read-modify-write of the index.
static STORE_LOCK: Mutex<()> = Mutex::new(());

fn store_lock() -> MutexGuard<'static, ()> {
    STORE_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How the stored rows map back to the original JSON value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadShape {
    /// Array of objects, one row each
    Records,
    /// Single object, one row
    Object,
    /// Scalar or mixed array under a `value` column
    Scalar,
}

/// How the cells of a column are encoded. An empty cell always means the
/// row has no such key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// Every present value is a non-empty string, written raw
    String,
    /// Cells are JSON text
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
}

/// Sidecar stored next to every CSV file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    pub symbol: String,
    pub data_type: DataType,
    pub date: NaiveDate,
    pub source: String,
    /// Unix timestamp when stored
    pub stored_at: i64,
    pub record_count: usize,
    pub shape: PayloadShape,
    pub columns: Vec<ColumnSpec>,
    /// Cache key of the request that produced the payload, when stored
    /// through the cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_key: Option<String>,
}

impl FileMetadata {
    pub fn age_secs(&self) -> u64 {
        Utc::now().timestamp().saturating_sub(self.stored_at).max(0) as u64
    }
}

/// Index entry for one symbol/data type pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTypeSummary {
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub files: usize,
    pub last_updated: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolMetadata {
    pub data_types: BTreeMap<DataType, DataTypeSummary>,
}

/// Contents of `metadata.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoricalIndex {
    pub symbols: BTreeMap<String, SymbolMetadata>,
    pub last_updated: Option<i64>,
}

#[derive(Clone)]
pub struct HistoricalStore {
    base_path: PathBuf,
}

impl HistoricalStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        let path = base_path.as_ref().to_path_buf();
        if let Err(e) = fs::create_dir_all(&path) {
            warn!("Failed to create historical directory {}: {}", path.display(), e);
        }
        Self { base_path: path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn data_dir(&self, symbol: &str, data_type: DataType) -> PathBuf {
        self.base_path.join(symbol).join(data_type.as_str())
    }

    fn csv_path(&self, symbol: &str, data_type: DataType, date: NaiveDate) -> PathBuf {
        self.data_dir(symbol, data_type).join(format!("{}.csv", date.format("%Y-%m-%d")))
    }

    fn meta_path(&self, symbol: &str, data_type: DataType, date: NaiveDate) -> PathBuf {
        self.data_dir(symbol, data_type).join(format!("{}.meta.json", date.format("%Y-%m-%d")))
    }

    fn index_path(&self) -> PathBuf {
        self.base_path.join(INDEX_FILE)
    }

    /// Store a JSON payload for a symbol/data type/day, replacing any earlier
    /// file for that day, and update the index.
    pub fn store(
        &self,
        symbol: &str,
        data_type: DataType,
        date: NaiveDate,
        data: &Value,
        source: &str,
    ) -> Result<FileMetadata> {
        self.store_response(symbol, data_type, date, data, source, None)
    }

    /// Like [`store`](Self::store), also recording which cache request the
    /// payload answers so it can serve that request again.
    pub fn store_response(
        &self,
        symbol: &str,
        data_type: DataType,
        date: NaiveDate,
        data: &Value,
        source: &str,
        request_key: Option<&str>,
    ) -> Result<FileMetadata> {
        let symbol = normalize_symbol(symbol)?;
        let dir = self.data_dir(&symbol, data_type);
        fs::create_dir_all(&dir).map_err(|e| PipelineError::file("create directory", &dir, e))?;

        let _guard = store_lock();
        let (shape, rows) = flatten(data);
        let columns = infer_columns(&rows);

        let csv_path = self.csv_path(&symbol, data_type, date);
        write_csv(&csv_path, &columns, &rows)?;

        let meta = FileMetadata {
            symbol: symbol.clone(),
            data_type,
            date,
            source: source.to_string(),
            stored_at: Utc::now().timestamp(),
            record_count: rows.len(),
            shape,
            columns,
            request_key: request_key.map(str::to_string),
        };
        let meta_path = self.meta_path(&symbol, data_type, date);
        write_json_atomic(&meta_path, &meta)?;

        self.record_in_index(&symbol, data_type, date)?;
        debug!("Stored {} {} for {} ({} rows)", data_type, date, symbol, meta.record_count);
        Ok(meta)
    }

    /// Sidecar for a stored day. A sidecar that does not decode is removed
    /// together with its CSV file and reported as missing.
    pub fn metadata(&self, symbol: &str, data_type: DataType, date: NaiveDate) -> Result<Option<FileMetadata>> {
        let symbol = normalize_symbol(symbol)?;
        let path = self.meta_path(&symbol, data_type, date);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PipelineError::file("read", &path, e).into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) => {
                warn!("Corrupted sidecar {}, removing day: {}", path.display(), e);
                let csv_path = self.csv_path(&symbol, data_type, date);
                for stale in [&path, &csv_path] {
                    if let Err(e) = fs::remove_file(stale) {
                        if e.kind() != ErrorKind::NotFound {
                            warn!("Failed to remove {}: {}", stale.display(), e);
                        }
                    }
                }
                Ok(None)
            }
        }
    }

    /// Payload stored for `date` by the request with `request_key` and its
    /// age in seconds, if it is younger than `max_age_secs`.
    pub fn load_response(
        &self,
        symbol: &str,
        data_type: DataType,
        date: NaiveDate,
        request_key: &str,
        max_age_secs: u64,
    ) -> Result<Option<(Value, u64)>> {
        match self.metadata(symbol, data_type, date)? {
            Some(meta) if meta.request_key.as_deref() == Some(request_key) && meta.age_secs() < max_age_secs => {
                let age = meta.age_secs();
                Ok(self.load(symbol, data_type, date)?.map(|value| (value, age)))
            }
            _ => Ok(None),
        }
    }

    /// Load the payload stored for a day.
    pub fn load(&self, symbol: &str, data_type: DataType, date: NaiveDate) -> Result<Option<Value>> {
        let _guard = store_lock();
        let Some(meta) = self.metadata(symbol, data_type, date)? else {
            return Ok(None);
        };
        let csv_path = self.csv_path(&meta.symbol, data_type, date);
        if !csv_path.exists() {
            return Ok(None);
        }
        let rows = read_csv(&csv_path, &meta.columns)?;
        Ok(Some(unflatten(meta.shape, rows)))
    }

    /// Dates with stored files, ascending.
    pub fn list_dates(&self, symbol: &str, data_type: DataType) -> Result<Vec<NaiveDate>> {
        let symbol = normalize_symbol(symbol)?;
        let dir = self.data_dir(&symbol, data_type);
        if !dir.exists() {
            return Ok(vec![]);
        }

        let mut dates = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| PipelineError::file("list", &dir, e))? {
            let name = entry?.file_name().to_string_lossy().to_string();
            if let Some(stem) = name.strip_suffix(".csv") {
                if let Ok(date) = NaiveDate::parse_from_str(stem, "%Y-%m-%d") {
                    dates.push(date);
                }
            }
        }
        dates.sort();
        Ok(dates)
    }

    pub fn load_latest(&self, symbol: &str, data_type: DataType) -> Result<Option<(NaiveDate, Value)>> {
        for date in self.list_dates(symbol, data_type)?.into_iter().rev() {
            if let Some(value) = self.load(symbol, data_type, date)? {
                return Ok(Some((date, value)));
            }
        }
        Ok(None)
    }

    /// Payloads for every stored day in `[start, end]`.
    pub fn load_range(
        &self,
        symbol: &str,
        data_type: DataType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, Value)>> {
        let mut out = Vec::new();
        for date in self.list_dates(symbol, data_type)? {
            if date < start || date > end {
                continue;
            }
            if let Some(value) = self.load(symbol, data_type, date)? {
                out.push((date, value));
            }
        }
        Ok(out)
    }

    pub fn read_index(&self) -> Result<HistoricalIndex> {
        let _guard = store_lock();
        self.read_index_locked()
    }

    fn read_index_locked(&self) -> Result<HistoricalIndex> {
        let path = self.index_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HistoricalIndex::default()),
            Err(e) => return Err(PipelineError::file("read", &path, e).into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(index) => Ok(index),
            Err(e) => {
                warn!("Corrupted historical index {}, rebuilding: {}", path.display(), e);
                self.rebuild_index_locked()
            }
        }
    }

    pub fn list_symbols(&self) -> Result<Vec<String>> {
        Ok(self.read_index()?.symbols.keys().cloned().collect())
    }

    pub fn symbol_metadata(&self, symbol: &str) -> Result<Option<SymbolMetadata>> {
        let symbol = normalize_symbol(symbol)?;
        Ok(self.read_index()?.symbols.remove(&symbol))
    }

    /// Caller holds the store lock.
    fn record_in_index(&self, symbol: &str, data_type: DataType, date: NaiveDate) -> Result<()> {
        let mut index = self.read_index_locked()?;
        let now = Utc::now().timestamp();
        let files = self.list_dates(symbol, data_type)?.len();

        let summary = index
            .symbols
            .entry(symbol.to_string())
            .or_default()
            .data_types
            .entry(data_type)
            .or_insert(DataTypeSummary {
                first_date: date,
                last_date: date,
                files: 0,
                last_updated: now,
            });
        summary.first_date = summary.first_date.min(date);
        summary.last_date = summary.last_date.max(date);
        summary.files = files;
        summary.last_updated = now;
        index.last_updated = Some(now);

        write_json_atomic(&self.index_path(), &index)
    }

    /// Delete everything stored for a symbol and drop it from the index.
    pub fn delete_symbol(&self, symbol: &str) -> Result<bool> {
        let symbol = normalize_symbol(symbol)?;
        let _guard = store_lock();
        let dir = self.base_path.join(&symbol);
        let existed = dir.exists();
        if existed {
            fs::remove_dir_all(&dir).map_err(|e| PipelineError::file("delete", &dir, e))?;
        }

        let mut index = self.read_index_locked()?;
        if index.symbols.remove(&symbol).is_some() {
            index.last_updated = Some(Utc::now().timestamp());
            write_json_atomic(&self.index_path(), &index)?;
        }
        Ok(existed)
    }

    /// Rebuild `metadata.json` by scanning the directory tree.
    pub fn rebuild_index(&self) -> Result<HistoricalIndex> {
        let _guard = store_lock();
        self.rebuild_index_locked()
    }

    fn rebuild_index_locked(&self) -> Result<HistoricalIndex> {
        let mut index = HistoricalIndex::default();

        if self.base_path.exists() {
            let entries = fs::read_dir(&self.base_path)
                .map_err(|e| PipelineError::file("list", &self.base_path, e))?;
            for entry in entries {
                let entry = entry?;
                if !entry.path().is_dir() {
                    continue;
                }
                let symbol = entry.file_name().to_string_lossy().to_string();
                if normalize_symbol(&symbol).ok().as_deref() != Some(symbol.as_str()) {
                    debug!("Skipping non-symbol directory {}", symbol);
                    continue;
                }

                let mut symbol_meta = SymbolMetadata::default();
                for sub in fs::read_dir(entry.path())? {
                    let sub = sub?;
                    let Ok(data_type) = sub.file_name().to_string_lossy().parse::<DataType>() else {
                        continue;
                    };
                    let dates = self.list_dates(&symbol, data_type)?;
                    let (Some(first), Some(last)) = (dates.first(), dates.last()) else {
                        continue;
                    };
                    let last_updated = self
                        .metadata(&symbol, data_type, *last)?
                        .map(|m| m.stored_at)
                        .unwrap_or_default();
                    symbol_meta.data_types.insert(
                        data_type,
                        DataTypeSummary {
                            first_date: *first,
                            last_date: *last,
                            files: dates.len(),
                            last_updated,
                        },
                    );
                }

                if !symbol_meta.data_types.is_empty() {
                    index.symbols.insert(symbol, symbol_meta);
                }
            }
        }

        index.last_updated = Some(Utc::now().timestamp());
        write_json_atomic(&self.index_path(), &index)?;
        info!("Historical index rebuilt: {} symbols", index.symbols.len());
        Ok(index)
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
    let content = serde_json::to_string_pretty(value)?;
    fs::write(&tmp, content).map_err(|e| PipelineError::file("write", &tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| PipelineError::file("rename", path, e))?;
    Ok(())
}

/// Turn a JSON payload into rows of column -> value.
fn flatten(data: &Value) -> (PayloadShape, Vec<Map<String, Value>>) {
    match data {
        Value::Array(items) if items.iter().all(Value::is_object) => {
            let rows = items
                .iter()
                .filter_map(|item| item.as_object().cloned())
                .collect();
            (PayloadShape::Records, rows)
        }
        Value::Object(map) => (PayloadShape::Object, vec![map.clone()]),
        other => {
            let mut row = Map::new();
            row.insert("value".to_string(), other.clone());
            (PayloadShape::Scalar, vec![row])
        }
    }
}

fn unflatten(shape: PayloadShape, rows: Vec<Map<String, Value>>) -> Value {
    match shape {
        PayloadShape::Records => Value::Array(rows.into_iter().map(Value::Object).collect()),
        PayloadShape::Object => rows.into_iter().next().map(Value::Object).unwrap_or(Value::Null),
        PayloadShape::Scalar => rows
            .into_iter()
            .next()
            .and_then(|mut row| row.remove("value"))
            .unwrap_or(Value::Null),
    }
}

/// Columns in first-seen order; a column is `String` when every value in it
/// is a non-empty string, so an empty cell can stand for a missing key.
fn infer_columns(rows: &[Map<String, Value>]) -> Vec<ColumnSpec> {
    let mut columns: Vec<ColumnSpec> = Vec::new();
    for row in rows {
        for (name, value) in row {
            let is_string = matches!(value, Value::String(s) if !s.is_empty());
            match columns.iter_mut().find(|c| &c.name == name) {
                Some(col) => {
                    if !is_string {
                        col.kind = ColumnKind::Json;
                    }
                }
                None => columns.push(ColumnSpec {
                    name: name.clone(),
                    kind: if is_string { ColumnKind::String } else { ColumnKind::Json },
                }),
            }
        }
    }
    columns
}

fn write_csv(path: &Path, columns: &[ColumnSpec], rows: &[Map<String, Value>]) -> Result<()> {
    let tmp = path.with_extension(format!("csv.{}.tmp", Uuid::new_v4().simple()));
    {
        let mut writer = csv::Writer::from_path(&tmp)
            .with_context(|| format!("Failed to create CSV file {}", tmp.display()))?;
        writer.write_record(columns.iter().map(|c| c.name.as_str()))?;

        for row in rows {
            let record: Vec<String> = columns
                .iter()
                .map(|col| match (row.get(&col.name), col.kind) {
                    (None, _) => String::new(),
                    (Some(Value::String(s)), ColumnKind::String) => s.clone(),
                    (Some(value), _) => value.to_string(),
                })
                .collect();
            writer.write_record(&record)?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp, path).map_err(|e| PipelineError::file("rename", path, e))?;
    Ok(())
}

fn read_csv(path: &Path, columns: &[ColumnSpec]) -> Result<Vec<Map<String, Value>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = Map::new();
        for (name, cell) in headers.iter().zip(record.iter()) {
            let kind = columns
                .iter()
                .find(|c| c.name == name)
                .map(|c| c.kind)
                .unwrap_or(ColumnKind::String);
            if cell.is_empty() {
                continue;
            }
            let value = match kind {
                ColumnKind::String => Value::String(cell.to_string()),
                ColumnKind::Json => serde_json::from_str(cell).map_err(|e| {
                    PipelineError::data(format!("invalid JSON cell in column {}: {}", name, e))
                        .with_context("path", path.display().to_string())
                })?,
            };
            row.insert(name.to_string(), value);
        }
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_records_round_trip() {
        let dir = tempdir().unwrap();
        let store = HistoricalStore::new(dir.path());
        let bars = json!([
            {"date": "2024-03-01", "close": 180.5, "volume": 1000, "note": null},
            {"date": "2024-03-02", "close": 181.0, "volume": 1200, "note": "split"}
        ]);

        let meta = store.store("aapl", DataType::Prices, day(2), &bars, "yahoo_finance").unwrap();
        assert_eq!(meta.symbol, "AAPL");
        assert_eq!(meta.record_count, 2);
        assert_eq!(meta.shape, PayloadShape::Records);

        assert!(dir.path().join("AAPL/prices/2024-03-02.csv").exists());
        assert!(dir.path().join("AAPL/prices/2024-03-02.meta.json").exists());

        let loaded = store.load("AAPL", DataType::Prices, day(2)).unwrap().unwrap();
        assert_eq!(loaded, bars);
    }

    #[test]
    fn test_object_and_scalar_payloads() {
        let dir = tempdir().unwrap();
        let store = HistoricalStore::new(dir.path());

        let fees = json!({"fastestFee": 21, "economyFee": 4, "nested": {"a": [1, 2]}});
        store.store("BTC", DataType::Network, day(1), &fees, "mempool").unwrap();
        assert_eq!(store.load("BTC", DataType::Network, day(1)).unwrap().unwrap(), fees);

        store.store("BTC", DataType::Onchain, day(1), &json!(871234), "mempool").unwrap();
        assert_eq!(store.load("BTC", DataType::Onchain, day(1)).unwrap().unwrap(), json!(871234));
    }

    #[test]
    fn test_index_tracks_date_range() {
        let dir = tempdir().unwrap();
        let store = HistoricalStore::new(dir.path());
        store.store("SPY", DataType::Quote, day(5), &json!({"price": 1}), "yahoo_finance").unwrap();
        store.store("SPY", DataType::Quote, day(3), &json!({"price": 2}), "yahoo_finance").unwrap();
        store.store("QQQ", DataType::Quote, day(4), &json!({"price": 3}), "yahoo_finance").unwrap();

        assert_eq!(store.list_symbols().unwrap(), vec!["QQQ".to_string(), "SPY".to_string()]);

        let spy = store.symbol_metadata("spy").unwrap().unwrap();
        let summary = &spy.data_types[&DataType::Quote];
        assert_eq!(summary.first_date, day(3));
        assert_eq!(summary.last_date, day(5));
        assert_eq!(summary.files, 2);

        let (latest, value) = store.load_latest("SPY", DataType::Quote).unwrap().unwrap();
        assert_eq!(latest, day(5));
        assert_eq!(value["price"], 1);

        let range = store.load_range("SPY", DataType::Quote, day(1), day(4)).unwrap();
        assert_eq!(range.len(), 1);
        assert_eq!(range[0].0, day(3));
    }

    #[test]
    fn test_rebuild_index_from_tree() {
        let dir = tempdir().unwrap();
        let store = HistoricalStore::new(dir.path());
        store.store("ETH-USD", DataType::Prices, day(1), &json!([{"close": 1}]), "coingecko").unwrap();
        fs::remove_file(dir.path().join(INDEX_FILE)).unwrap();

        let index = store.rebuild_index().unwrap();
        assert!(index.symbols.contains_key("ETH-USD"));
        assert_eq!(store.list_symbols().unwrap(), vec!["ETH-USD".to_string()]);
    }

    #[test]
    fn test_missing_days() {
        let dir = tempdir().unwrap();
        let store = HistoricalStore::new(dir.path());
        store.store("DGS10", DataType::Macro, day(1), &json!({"value": 4.2}), "fred").unwrap();

        assert!(store.metadata("DGS10", DataType::Macro, day(1)).unwrap().unwrap().age_secs() < 60);
        assert!(store.metadata("DGS10", DataType::Macro, day(2)).unwrap().is_none());
        assert!(store.load("DGS10", DataType::Macro, day(2)).unwrap().is_none());
    }

    #[test]
    fn test_sparse_records_keep_missing_null_and_empty_apart() {
        let dir = tempdir().unwrap();
        let store = HistoricalStore::new(dir.path());
        let records = json!([
            {"id": "a", "note": "", "tag": "x"},
            {"id": "b", "note": null},
            {"id": "c", "extra": 1},
            {"id": "", "tag": "null"},
            {}
        ]);

        store.store("SPY", DataType::Fundamentals, day(1), &records, "test").unwrap();
        let meta = store.metadata("SPY", DataType::Fundamentals, day(1)).unwrap().unwrap();
        let kind = |name: &str| meta.columns.iter().find(|c| c.name == name).unwrap().kind;
        assert_eq!(kind("tag"), ColumnKind::String);
        assert_eq!(kind("note"), ColumnKind::Json);
        assert_eq!(kind("id"), ColumnKind::Json);

        let loaded = store.load("SPY", DataType::Fundamentals, day(1)).unwrap().unwrap();
        assert_eq!(loaded, records);

        let object = json!({"name": "", "unit": null});
        store.store("SPY", DataType::Quote, day(1), &object, "test").unwrap();
        assert_eq!(store.load("SPY", DataType::Quote, day(1)).unwrap().unwrap(), object);
    }

    #[test]
    fn test_undecodable_sidecar_drops_the_day() {
        let dir = tempdir().unwrap();
        let store = HistoricalStore::new(dir.path());
        store.store("AAPL", DataType::Quote, day(1), &json!({"price": 1}), "test").unwrap();
        let sidecar = dir.path().join("AAPL/quote/2024-03-01.meta.json");
        fs::write(&sidecar, [0xff, 0xfe, 0x00, 0x7b]).unwrap();

        assert!(store.metadata("AAPL", DataType::Quote, day(1)).unwrap().is_none());
        assert!(!sidecar.exists());
        assert!(!dir.path().join("AAPL/quote/2024-03-01.csv").exists());
        assert!(store.load("AAPL", DataType::Quote, day(1)).unwrap().is_none());

        fs::write(dir.path().join(INDEX_FILE), [0xc3, 0x28]).unwrap();
        assert!(store.read_index().is_ok());
    }

    #[test]
    fn test_concurrent_stores_keep_index_complete() {
        let dir = tempdir().unwrap();
        let store = HistoricalStore::new(dir.path());
        let symbols = ["AAPL", "MSFT", "SPY", "QQQ", "NVDA", "TSLA"];

        std::thread::scope(|scope| {
            for symbol in symbols {
                let store = store.clone();
                scope.spawn(move || {
                    for d in 1..=3 {
                        store.store(symbol, DataType::Prices, day(d), &json!([{"close": d}]), "test").unwrap();
                    }
                });
            }
        });

        let index = store.read_index().unwrap();
        assert_eq!(index.symbols.len(), symbols.len());
        for symbol in symbols {
            assert_eq!(index.symbols[symbol].data_types[&DataType::Prices].files, 3);
        }
        let leftovers = fs::read_dir(dir.path().join("AAPL/prices"))
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_load_response_matches_request_key() {
        let dir = tempdir().unwrap();
        let store = HistoricalStore::new(dir.path());
        let quote = json!({"price": 190.1});
        store
            .store_response("AAPL", DataType::Quote, day(1), &quote, "yahoo_finance", Some("abc"))
            .unwrap();

        let (hit, age) = store.load_response("AAPL", DataType::Quote, day(1), "abc", 60).unwrap().unwrap();
        assert_eq!(hit, quote);
        assert!(age < 60);
        assert!(store.load_response("AAPL", DataType::Quote, day(1), "other", 60).unwrap().is_none());
        assert!(store.load_response("AAPL", DataType::Quote, day(1), "abc", 0).unwrap().is_none());

        // Plain stores carry no key and never answer a cache request.
        store.store("MSFT", DataType::Quote, day(1), &json!({"price": 1}), "test").unwrap();
        assert!(store.load_response("MSFT", DataType::Quote, day(1), "abc", 60).unwrap().is_none());
    }

    #[test]
    fn test_rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let store = HistoricalStore::new(dir.path());

        for bad in ["../etc", "a/b", "", "..", "A B"] {
            let err = store
                .store(bad, DataType::Quote, day(1), &json!(1), "test")
                .unwrap_err();
            let inner = err.downcast_ref::<PipelineError>().unwrap();
            assert_eq!(inner.kind(), "ValidationError", "symbol {:?}", bad);
        }
    }

    #[test]
    fn test_delete_symbol() {
        let dir = tempdir().unwrap();
        let store = HistoricalStore::new(dir.path());
        store.store("AAPL", DataType::Quote, day(1), &json!({"p": 1}), "test").unwrap();

        assert!(store.delete_symbol("AAPL").unwrap());
        assert!(store.list_symbols().unwrap().is_empty());
        assert!(!store.delete_symbol("AAPL").unwrap());
    }
}
