//! Frozen reference baseline store.
//!
//! The baseline is the single source of statistical truth for drift
//! verdicts, so it is immutable after creation and its digest is verified
//! on every load. Serialization is canonical: columns in schema order,
//! values in a fixed float encoding, rows sorted by their encoded line, so
//! the digest is reproducible across implementations.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use risk_structs::{CoreError, FeatureRow, FeatureSchema};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

const DATA_FILE: &str = "reference_data.csv";
const METADATA_FILE: &str = "reference_metadata.json";

/// Sidecar metadata persisted next to the canonical CSV.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BaselineMetadata {
    reference_id: Uuid,
    feature_schema: FeatureSchema,
    row_count: u64,
    content_digest: String,
    created_at: DateTime<Utc>,
}

/// A verified, in-memory reference baseline.
#[derive(Debug, Clone)]
pub struct ReferenceBaseline {
    pub reference_id: Uuid,
    pub feature_schema: FeatureSchema,
    pub row_count: u64,
    pub content_digest: String,
    pub created_at: DateTime<Utc>,
    rows: Vec<FeatureRow>,
}

impl ReferenceBaseline {
    #[must_use]
    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    /// Non-null values of one column, in row order.
    #[must_use]
    pub fn column_values(&self, column_index: usize) -> Vec<f64> {
        self.rows
            .iter()
            .filter_map(|row| row.get(column_index).copied().flatten())
            .collect()
    }
}

/// On-disk store for the reference baseline.
#[derive(Debug, Clone)]
pub struct BaselineStore {
    dir: PathBuf,
}

impl BaselineStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn data_path(&self) -> PathBuf {
        self.dir.join(DATA_FILE)
    }

    fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.metadata_path().exists()
    }

    /// One-shot baseline creation.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::AlreadyExists`] if a baseline is already on
    /// disk, or with [`CoreError::InvariantViolation`] if a row does not
    /// match the schema.
    pub fn bootstrap(
        &self,
        schema: FeatureSchema,
        rows: Vec<FeatureRow>,
        now: DateTime<Utc>,
    ) -> Result<ReferenceBaseline, CoreError> {
        if self.exists() {
            return Err(CoreError::AlreadyExists(format!(
                "reference baseline at {}",
                self.dir.display()
            )));
        }
        if let Some(bad) = rows.iter().find(|row| !schema.matches_row(row)) {
            return Err(CoreError::InvariantViolation(format!(
                "baseline row has {} values, schema has {} columns",
                bad.len(),
                schema.len()
            )));
        }

        let csv = canonical_csv(&schema, &rows);
        let content_digest = sha256_hex(csv.as_bytes());

        let metadata = BaselineMetadata {
            reference_id: Uuid::new_v4(),
            feature_schema: schema.clone(),
            row_count: rows.len() as u64,
            content_digest: content_digest.clone(),
            created_at: now,
        };

        fs::create_dir_all(&self.dir)?;
        fs::write(self.data_path(), &csv)?;
        fs::write(self.metadata_path(), serde_json::to_vec_pretty(&metadata)?)?;

        info!(
            reference_id = %metadata.reference_id,
            rows = rows.len(),
            digest = %content_digest,
            "reference baseline created"
        );

        Ok(ReferenceBaseline {
            reference_id: metadata.reference_id,
            feature_schema: schema,
            row_count: metadata.row_count,
            content_digest,
            created_at: metadata.created_at,
            rows,
        })
    }

    /// Loads the baseline, recomputing and verifying its digest.
    ///
    /// Idempotent; a successful result may be cached in memory for the
    /// process lifetime.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::Integrity`] on a digest mismatch, a missing
    /// file or a malformed row.
    pub fn load(&self) -> Result<ReferenceBaseline, CoreError> {
        let metadata_raw = fs::read(self.metadata_path()).map_err(|err| {
            CoreError::Integrity(format!(
                "reference metadata missing at {}: {err}",
                self.metadata_path().display()
            ))
        })?;
        let metadata: BaselineMetadata = serde_json::from_slice(&metadata_raw)
            .map_err(|err| CoreError::Integrity(format!("reference metadata malformed: {err}")))?;

        let csv = fs::read_to_string(self.data_path()).map_err(|err| {
            CoreError::Integrity(format!(
                "reference data missing at {}: {err}",
                self.data_path().display()
            ))
        })?;

        let digest = sha256_hex(csv.as_bytes());
        if digest != metadata.content_digest {
            return Err(CoreError::Integrity(format!(
                "reference digest mismatch: stored {}, computed {digest}",
                metadata.content_digest
            )));
        }

        let rows = parse_canonical_csv(&metadata.feature_schema, &csv)?;
        if rows.len() as u64 != metadata.row_count {
            return Err(CoreError::Integrity(format!(
                "reference row count mismatch: stored {}, parsed {}",
                metadata.row_count,
                rows.len()
            )));
        }

        Ok(ReferenceBaseline {
            reference_id: metadata.reference_id,
            feature_schema: metadata.feature_schema,
            row_count: metadata.row_count,
            content_digest: digest,
            created_at: metadata.created_at,
            rows,
        })
    }
}

/// Canonical CSV encoding: header in schema order, one line per row,
/// lines sorted lexicographically.
fn canonical_csv(schema: &FeatureSchema, rows: &[FeatureRow]) -> String {
    let header = schema
        .columns()
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(",");

    let mut lines: Vec<String> = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|v| format_value(*v))
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect();
    lines.sort_unstable();

    let mut out = String::with_capacity(header.len() + lines.len() * 32);
    out.push_str(&header);
    out.push('\n');
    for line in lines {
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn parse_canonical_csv(schema: &FeatureSchema, csv: &str) -> Result<Vec<FeatureRow>, CoreError> {
    let mut lines = csv.lines();
    let Some(header) = lines.next() else {
        return Err(CoreError::Integrity("reference data is empty".into()));
    };

    let expected_header = schema
        .columns()
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(",");
    if header != expected_header {
        return Err(CoreError::Integrity(
            "reference header does not match the stored schema".into(),
        ));
    }

    lines
        .enumerate()
        .map(|(idx, line)| {
            let row: FeatureRow = line
                .split(',')
                .map(parse_value)
                .collect::<Result<_, _>>()
                .map_err(|err| {
                    CoreError::Integrity(format!("reference row {} malformed: {err}", idx + 1))
                })?;
            if !schema.matches_row(&row) {
                return Err(CoreError::Integrity(format!(
                    "reference row {} has {} values, schema has {}",
                    idx + 1,
                    row.len(),
                    schema.len()
                )));
            }
            Ok(row)
        })
        .collect()
}

/// Fixed value encoding: empty string for missing, shortest f64
/// round-trip representation otherwise.
fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v}"),
        None => String::new(),
    }
}

fn parse_value(raw: &str) -> Result<Option<f64>, std::num::ParseFloatError> {
    if raw.is_empty() {
        Ok(None)
    } else {
        raw.parse::<f64>().map(Some)
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().fold(String::with_capacity(64), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

/// Reads feature rows from a plain CSV file whose header must match the
/// schema column names. Used by the bootstrap command.
///
/// # Errors
///
/// Returns an error on I/O failure, header mismatch or malformed values.
pub fn read_rows_csv(path: &Path, schema: &FeatureSchema) -> Result<Vec<FeatureRow>, CoreError> {
    let raw = fs::read_to_string(path)?;
    let mut lines = raw.lines();

    let Some(header) = lines.next() else {
        return Err(CoreError::InsufficientData(format!(
            "{} is empty",
            path.display()
        )));
    };
    let expected = schema
        .columns()
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(",");
    if header.trim() != expected {
        return Err(CoreError::InvariantViolation(format!(
            "{} header does not match the feature schema",
            path.display()
        )));
    }

    lines
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            let row: FeatureRow = line
                .split(',')
                .map(|v| parse_value(v.trim()))
                .collect::<Result<_, _>>()
                .map_err(|err| {
                    CoreError::InvariantViolation(format!(
                        "{} row {}: {err}",
                        path.display(),
                        idx + 1
                    ))
                })?;
            if !schema.matches_row(&row) {
                return Err(CoreError::InvariantViolation(format!(
                    "{} row {} has {} values, schema has {}",
                    path.display(),
                    idx + 1,
                    row.len(),
                    schema.len()
                )));
            }
            Ok(row)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use risk_structs::{FeatureColumn, SemanticType};

    use super::*;

    fn small_schema() -> FeatureSchema {
        FeatureSchema::new(vec![
            FeatureColumn::new("age", SemanticType::Ordinal),
            FeatureColumn::new("MonthlyIncome", SemanticType::Continuous),
        ])
    }

    fn sample_rows() -> Vec<FeatureRow> {
        vec![
            vec![Some(52.0), Some(8300.0)],
            vec![Some(31.0), Some(4100.5)],
            vec![Some(44.0), None],
        ]
    }

    #[test]
    fn test_bootstrap_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = BaselineStore::new(dir.path());
        let created = store
            .bootstrap(small_schema(), sample_rows(), Utc::now())
            .expect("bootstrap");

        let loaded = store.load().expect("load verifies");
        assert_eq!(loaded.reference_id, created.reference_id);
        assert_eq!(loaded.row_count, 3);
        assert_eq!(loaded.content_digest, created.content_digest);
        assert_eq!(loaded.rows().len(), 3);
    }

    #[test]
    fn test_bootstrap_is_one_shot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = BaselineStore::new(dir.path());
        store
            .bootstrap(small_schema(), sample_rows(), Utc::now())
            .expect("first bootstrap");

        let err = store
            .bootstrap(small_schema(), sample_rows(), Utc::now())
            .expect_err("second bootstrap must fail");
        assert!(matches!(err, CoreError::AlreadyExists(_)));
    }

    #[test]
    fn test_digest_is_order_independent() {
        let dir_a = tempfile::tempdir().expect("tempdir");
        let dir_b = tempfile::tempdir().expect("tempdir");
        let mut reversed = sample_rows();
        reversed.reverse();

        let a = BaselineStore::new(dir_a.path())
            .bootstrap(small_schema(), sample_rows(), Utc::now())
            .expect("bootstrap a");
        let b = BaselineStore::new(dir_b.path())
            .bootstrap(small_schema(), reversed, Utc::now())
            .expect("bootstrap b");

        assert_eq!(a.content_digest, b.content_digest);
    }

    #[test]
    fn test_tampering_fails_integrity() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = BaselineStore::new(dir.path());
        store
            .bootstrap(small_schema(), sample_rows(), Utc::now())
            .expect("bootstrap");

        let data_path = dir.path().join(DATA_FILE);
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&data_path)
            .expect("open");
        writeln!(file, "99,1").expect("tamper");

        let err = store.load().expect_err("tampered baseline must fail");
        assert!(matches!(err, CoreError::Integrity(_)));
    }

    #[test]
    fn test_missing_values_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = BaselineStore::new(dir.path());
        store
            .bootstrap(small_schema(), sample_rows(), Utc::now())
            .expect("bootstrap");

        let loaded = store.load().expect("load");
        let with_missing = loaded
            .rows()
            .iter()
            .find(|row| row[1].is_none())
            .expect("missing value survives round trip");
        assert_eq!(with_missing[0], Some(44.0));

        // Column accessor drops the missing entry.
        assert_eq!(loaded.column_values(1).len(), 2);
    }

    #[test]
    fn test_read_rows_csv_header_check() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rows.csv");
        fs::write(&path, "age,WrongName\n52,8300\n").expect("write");

        let err = read_rows_csv(&path, &small_schema()).expect_err("bad header");
        assert!(matches!(err, CoreError::InvariantViolation(_)));

        fs::write(&path, "age,MonthlyIncome\n52,8300\n31,\n").expect("write");
        let rows = read_rows_csv(&path, &small_schema()).expect("parse");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][1], None);
    }
}
