//! RollupSpec - aggregation configuration handed to a destination when it is
//! provisioned. Never consulted on the dispatch path.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use crate::{ContractError, Granularity};

/// Dimension selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DimensionSpec {
    /// Fixed list of dimension columns
    Specific { dimensions: Vec<String> },
    /// Every non-aggregated, non-timestamp field is a dimension unless excluded
    Schemaless {
        #[serde(default)]
        exclusions: Vec<String>,
    },
}

impl DimensionSpec {
    pub fn specific<I, S>(dimensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Specific {
            dimensions: dimensions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn schemaless() -> Self {
        Self::Schemaless {
            exclusions: Vec::new(),
        }
    }

    pub fn schemaless_with_exclusions<I, S>(exclusions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Schemaless {
            exclusions: exclusions.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether a field would be stored as a dimension
    pub fn includes(&self, field: &str) -> bool {
        match self {
            Self::Specific { dimensions } => dimensions.iter().any(|d| d == field),
            Self::Schemaless { exclusions } => !exclusions.iter().any(|d| d == field),
        }
    }

    fn names(&self) -> &[String] {
        match self {
            Self::Specific { dimensions } => dimensions,
            Self::Schemaless { exclusions } => exclusions,
        }
    }
}

impl Default for DimensionSpec {
    fn default() -> Self {
        Self::schemaless()
    }
}

/// Aggregation function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Aggregator {
    Count { name: String },
    LongSum { name: String, field_name: String },
    DoubleSum { name: String, field_name: String },
    LongMin { name: String, field_name: String },
    LongMax { name: String, field_name: String },
    DoubleMin { name: String, field_name: String },
    DoubleMax { name: String, field_name: String },
    HyperUnique { name: String, field_name: String },
}

impl Aggregator {
    pub fn count(name: impl Into<String>) -> Self {
        Self::Count { name: name.into() }
    }

    /// Output column name
    pub fn name(&self) -> &str {
        match self {
            Self::Count { name }
            | Self::LongSum { name, .. }
            | Self::DoubleSum { name, .. }
            | Self::LongMin { name, .. }
            | Self::LongMax { name, .. }
            | Self::DoubleMin { name, .. }
            | Self::DoubleMax { name, .. }
            | Self::HyperUnique { name, .. } => name,
        }
    }

    /// Input field, if the aggregator reads one
    pub fn field_name(&self) -> Option<&str> {
        match self {
            Self::Count { .. } => None,
            Self::LongSum { field_name, .. }
            | Self::DoubleSum { field_name, .. }
            | Self::LongMin { field_name, .. }
            | Self::LongMax { field_name, .. }
            | Self::DoubleMin { field_name, .. }
            | Self::DoubleMax { field_name, .. }
            | Self::HyperUnique { field_name, .. } => Some(field_name),
        }
    }
}

/// Sub-bucket truncation applied to stored rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryGranularity {
    /// No truncation
    None,
    Second,
    #[default]
    Minute,
    FifteenMinute,
    ThirtyMinute,
    Hour,
    Day,
    /// Collapse everything in the bucket to one instant
    All,
}

impl QueryGranularity {
    /// Equivalent segment granularity, for coarseness comparisons
    fn as_segment(self) -> Option<Granularity> {
        match self {
            Self::None | Self::All => None,
            Self::Second => Some(Granularity::Second),
            Self::Minute => Some(Granularity::Minute),
            Self::FifteenMinute => Some(Granularity::FifteenMinute),
            Self::ThirtyMinute => Some(Granularity::ThirtyMinute),
            Self::Hour => Some(Granularity::Hour),
            Self::Day => Some(Granularity::Day),
        }
    }

    /// Whether rows can be truncated to this granularity inside a `segment` bucket
    pub fn fits_within(self, segment: Granularity) -> bool {
        self.as_segment().is_none_or(|q| q <= segment)
    }
}

/// Rollup configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupSpec {
    #[serde(default)]
    pub query_granularity: QueryGranularity,
    pub dimensions: DimensionSpec,
    pub aggregators: Vec<Aggregator>,
}

impl RollupSpec {
    pub fn new(
        dimensions: DimensionSpec,
        aggregators: Vec<Aggregator>,
        query_granularity: QueryGranularity,
    ) -> Self {
        Self {
            dimensions,
            aggregators,
            query_granularity,
        }
    }

    /// Stable fingerprint stored with each destination registration
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        serde_json::to_string(self)
            .unwrap_or_default()
            .hash(&mut hasher);
        hasher.finish()
    }

    /// Structural checks that serde cannot express
    pub fn validate(&self, segment: Granularity) -> Result<(), ContractError> {
        if self.aggregators.is_empty() {
            return Err(ContractError::config_validation(
                "rollup.aggregators",
                "at least one aggregator is required",
            ));
        }

        let mut seen = HashSet::new();
        for agg in &self.aggregators {
            if agg.name().is_empty() {
                return Err(ContractError::config_validation(
                    "rollup.aggregators",
                    "aggregator name cannot be empty",
                ));
            }
            if !seen.insert(agg.name()) {
                return Err(ContractError::config_validation(
                    format!("rollup.aggregators[name={}]", agg.name()),
                    "duplicate aggregator name",
                ));
            }
        }

        if let DimensionSpec::Specific { dimensions } = &self.dimensions {
            if dimensions.is_empty() {
                return Err(ContractError::config_validation(
                    "rollup.dimensions",
                    "specific dimensions require at least one name",
                ));
            }
            if let Some(clash) = dimensions.iter().find(|d| seen.contains(d.as_str())) {
                return Err(ContractError::config_validation(
                    format!("rollup.dimensions[{clash}]"),
                    "dimension shadows an aggregator output",
                ));
            }
        }

        if self.dimensions.names().iter().any(String::is_empty) {
            return Err(ContractError::config_validation(
                "rollup.dimensions",
                "dimension names cannot be empty",
            ));
        }

        if !self.query_granularity.fits_within(segment) {
            return Err(ContractError::config_validation(
                "rollup.query_granularity",
                format!(
                    "query granularity {:?} is coarser than segment granularity {segment}",
                    self.query_granularity
                ),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregators() -> Vec<Aggregator> {
        vec![Aggregator::count("cnt")]
    }

    #[test]
    fn test_specific_dimensions() {
        let rollup = RollupSpec::new(
            DimensionSpec::specific(["column"]),
            aggregators(),
            QueryGranularity::Minute,
        );
        match &rollup.dimensions {
            DimensionSpec::Specific { dimensions } => assert_eq!(dimensions[0], "column"),
            other => panic!("expected specific dimensions, got {other:?}"),
        }
        assert!(rollup.dimensions.includes("column"));
        assert!(!rollup.dimensions.includes("other"));
    }

    #[test]
    fn test_schemaless_dimensions() {
        let rollup = RollupSpec::new(
            DimensionSpec::schemaless(),
            aggregators(),
            QueryGranularity::Minute,
        );
        match &rollup.dimensions {
            DimensionSpec::Schemaless { exclusions } => assert!(exclusions.is_empty()),
            other => panic!("expected schemaless dimensions, got {other:?}"),
        }
    }

    #[test]
    fn test_schemaless_with_exclusions() {
        let rollup = RollupSpec::new(
            DimensionSpec::schemaless_with_exclusions(["column"]),
            aggregators(),
            QueryGranularity::Minute,
        );
        match &rollup.dimensions {
            DimensionSpec::Schemaless { exclusions } => assert_eq!(exclusions[0], "column"),
            other => panic!("expected schemaless dimensions, got {other:?}"),
        }
        assert!(!rollup.dimensions.includes("column"));
        assert!(rollup.dimensions.includes("anything_else"));
    }

    #[test]
    fn test_tagged_serde() {
        let json = r#"{"dimensions":{"mode":"specific","dimensions":["page"]},
                       "aggregators":[{"type":"long_sum","name":"added","field_name":"delta"}]}"#;
        let rollup: RollupSpec = serde_json::from_str(json).unwrap();
        assert_eq!(rollup.query_granularity, QueryGranularity::Minute);
        assert_eq!(rollup.aggregators[0].field_name(), Some("delta"));
    }

    #[test]
    fn test_validate_rejects_duplicate_aggregators() {
        let rollup = RollupSpec::new(
            DimensionSpec::schemaless(),
            vec![Aggregator::count("n"), Aggregator::count("n")],
            QueryGranularity::Minute,
        );
        let err = rollup.validate(Granularity::Hour).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_validate_rejects_coarse_query_granularity() {
        let rollup = RollupSpec::new(
            DimensionSpec::schemaless(),
            aggregators(),
            QueryGranularity::Day,
        );
        assert!(rollup.validate(Granularity::Hour).is_err());
        assert!(rollup.validate(Granularity::Day).is_ok());
    }

    #[test]
    fn test_fingerprint_stable() {
        let a = RollupSpec::new(DimensionSpec::schemaless(), aggregators(), QueryGranularity::Minute);
        let b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
