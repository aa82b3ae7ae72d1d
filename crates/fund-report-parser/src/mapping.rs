//! Versioned concept-mapping configuration.
//!
//! One JSON file per taxonomy version (filename stem = version) declares
//! which concepts feed which business fields. Adding a taxonomy version is
//! a configuration change, never a code change. Rule kinds:
//!
//! - `scalars`: field -> candidate concept ids, first matching fact wins.
//! - `tables.top_holdings`: facts grouped by `contextRef`, one row per
//!   group, optionally ordered by the rank concept.
//! - `tables.industry_allocations`: facts grouped by the explicit member on
//!   a configured axis; the row label is the member's taxonomy label.
//! - `tables.asset_allocations`: a scalar group with one entry per asset
//!   class, each naming its own value and ratio concepts.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use fund_report_core::error::{IngestError, IngestResult};

/// Complete concept mapping for one taxonomy version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConceptMappingsConfig {
    /// Business field -> candidate concept ids.
    #[serde(default)]
    pub scalars: HashMap<String, Vec<String>>,

    #[serde(default)]
    pub tables: TablesConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TablesConfig {
    #[serde(default)]
    pub top_holdings: Option<ContextTableConfig>,

    #[serde(default)]
    pub industry_allocations: Option<DimensionTableConfig>,

    #[serde(default)]
    pub asset_allocations: Option<ScalarGroupConfig>,
}

/// Table mapped by grouping facts on their `contextRef`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextTableConfig {
    /// Accepted for config-file symmetry; grouping is always by contextRef.
    #[serde(default)]
    pub group_by: Option<String>,

    /// Row field -> candidate concept ids.
    pub fields: HashMap<String, Vec<String>>,
}

/// Table mapped by grouping facts on an explicit dimension member.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DimensionTableConfig {
    #[serde(default)]
    pub group_by: Option<String>,

    /// Axis whose members partition the rows, e.g. `cn:IndustryAxis`.
    pub axis: String,

    pub fields: HashMap<String, Vec<String>>,
}

/// Fixed-label scalar group (the asset allocation breakdown).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScalarGroupConfig {
    #[serde(default)]
    pub kind: Option<String>,

    pub entries: Vec<ScalarGroupEntry>,
}

/// One asset-class entry of the scalar group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalarGroupEntry {
    /// Fixed row label, e.g. "股票".
    pub label: String,

    #[serde(default)]
    pub subtype: Option<String>,

    /// Concepts carrying the market value.
    pub market_value: Vec<String>,

    /// Concepts carrying the net-value ratio.
    #[serde(default)]
    pub net_value_ratio: Vec<String>,
}

impl ConceptMappingsConfig {
    /// Concept ids configured for one scalar field.
    pub fn scalar(&self, field: &str) -> &[String] {
        self.scalars
            .get(field)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Load one mapping file.
    pub fn load_file(path: &Path) -> IngestResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            IngestError::Parse(format!(
                "invalid concept mapping {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Load every `<version>.json` in a mappings directory, keyed by
    /// filename stem.
    pub fn load_dir(dir: &Path) -> HashMap<String, Self> {
        let mut configs = HashMap::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), "no concept mappings available: {}", e);
                return configs;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(version) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match Self::load_file(&path) {
                Ok(config) => {
                    debug!(version, "loaded concept mapping");
                    configs.insert(version.to_string(), config);
                }
                Err(e) => warn!(file = %path.display(), "skipping bad mapping: {}", e),
            }
        }
        configs
    }
}

/// Mapping fixture mirroring the shipped config layout; shared by the
/// mapper and facade tests.
#[cfg(test)]
pub(crate) const TEST_MAPPING_JSON: &str = r#"{
  "scalars": {
    "fund_code": ["cn:FundCode"],
    "fund_name": ["cn:FundName", "cn:FundFullName"],
    "fund_manager": ["cn:FundManager"],
    "report_type": ["cn:ReportTypeCode"],
    "report_period_start": ["cn:ReportPeriodStartDate"],
    "report_period_end": ["cn:ReportPeriodEndDate"],
    "net_asset_value": ["cn:NetAssetValuePerShare"],
    "total_net_assets": ["cn:TotalNetAssets"],
    "period_profit": ["cn:PeriodProfit"]
  },
  "tables": {
    "top_holdings": {
      "group_by": "contextRef",
      "fields": {
        "rank": ["cn:HoldingRank"],
        "security_code": ["cn:SecurityCode"],
        "security_name": ["cn:SecurityName"],
        "shares": ["cn:SharesHeld"],
        "market_value": ["cn:HoldingMarketValue"],
        "net_value_ratio": ["cn:HoldingNetValueRatio"]
      }
    },
    "industry_allocations": {
      "group_by": "dimension",
      "axis": "cn:IndustryAxis",
      "fields": {
        "market_value": ["cn:IndustryMarketValue"],
        "net_value_ratio": ["cn:IndustryNetValueRatio"]
      }
    },
    "asset_allocations": {
      "kind": "scalar_group",
      "entries": [
        {
          "label": "股票",
          "market_value": ["cn:EquityMarketValue"],
          "net_value_ratio": ["cn:EquityNetValueRatio"]
        },
        {
          "label": "债券",
          "market_value": ["cn:BondMarketValue"],
          "net_value_ratio": ["cn:BondNetValueRatio"]
        },
        {
          "label": "银行存款",
          "market_value": ["cn:DepositMarketValue"],
          "net_value_ratio": ["cn:DepositNetValueRatio"]
        }
      ]
    }
  }
}"#;
