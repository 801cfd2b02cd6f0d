//! Feature schema shared by the baseline store, monitoring and training.
//!
//! A feature row is an ordered sequence of optional values aligned with the
//! schema columns; `None` marks a missing value. Each column carries an
//! explicit semantic type so drift tests can dispatch on it instead of
//! guessing from the data.

use serde::{Deserialize, Serialize};

/// Statistical family of a feature column.
///
/// Continuous and ordinal columns are compared with rank-based tests;
/// categorical columns carry discrete codes and are compared with
/// frequency-based tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Continuous,
    Ordinal,
    Categorical,
}

/// One named, typed column of the feature schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub semantic_type: SemanticType,
}

impl FeatureColumn {
    pub fn new(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            semantic_type,
        }
    }
}

/// Ordered feature schema.
///
/// Column order defines the layout of every feature row in the prediction
/// ledger and of the canonical reference serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    columns: Vec<FeatureColumn>,
}

/// A feature row aligned with a [`FeatureSchema`]; `None` marks a missing
/// value.
pub type FeatureRow = Vec<Option<f64>>;

impl FeatureSchema {
    #[must_use]
    pub fn new(columns: Vec<FeatureColumn>) -> Self {
        Self { columns }
    }

    #[must_use]
    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Position of a column by name.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Returns true if `row` has one slot per schema column.
    #[must_use]
    pub fn matches_row(&self, row: &FeatureRow) -> bool {
        row.len() == self.columns.len()
    }

    /// The schema of the credit-risk workload ("Give Me Some Credit"
    /// feature set).
    #[must_use]
    pub fn credit_risk_default() -> Self {
        use SemanticType::{Categorical, Continuous, Ordinal};

        Self::new(vec![
            FeatureColumn::new("RevolvingUtilizationOfUnsecuredLines", Continuous),
            FeatureColumn::new("age", Ordinal),
            FeatureColumn::new("NumberOfTime30_59DaysPastDueNotWorse", Ordinal),
            FeatureColumn::new("DebtRatio", Continuous),
            FeatureColumn::new("MonthlyIncome", Continuous),
            FeatureColumn::new("NumberOfOpenCreditLinesAndLoans", Ordinal),
            FeatureColumn::new("NumberOfTimes90DaysLate", Ordinal),
            FeatureColumn::new("NumberRealEstateLoansOrLines", Ordinal),
            FeatureColumn::new("NumberOfTime60_89DaysPastDueNotWorse", Ordinal),
            FeatureColumn::new("NumberOfDependents", Categorical),
        ])
    }
}
