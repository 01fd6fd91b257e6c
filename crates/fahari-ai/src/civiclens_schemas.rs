// Structured output types for CivicLens issue analysis.
// The JSON schema sent to the model is derived from these types.

use schemars::generate::SchemaSettings;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Thematic category of a civic issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum IssueCategory {
    Governance,
    Infrastructure,
    #[serde(rename = "Human Rights")]
    HumanRights,
    Environment,
    Health,
    Education,
    Security,
    Other,
}

impl IssueCategory {
    pub const ALL: [IssueCategory; 8] = [
        IssueCategory::Governance,
        IssueCategory::Infrastructure,
        IssueCategory::HumanRights,
        IssueCategory::Environment,
        IssueCategory::Health,
        IssueCategory::Education,
        IssueCategory::Security,
        IssueCategory::Other,
    ];

    /// Wire name used in model output
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Governance => "Governance",
            Self::Infrastructure => "Infrastructure",
            Self::HumanRights => "Human Rights",
            Self::Environment => "Environment",
            Self::Health => "Health",
            Self::Education => "Education",
            Self::Security => "Security",
            Self::Other => "Other",
        }
    }

    /// Exact wire-name lookup. Anything else is not a category.
    pub fn from_wire(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == value)
    }
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How time-sensitive a reported issue is, ordered from least to most urgent
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum UrgencyLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl UrgencyLevel {
    pub const ALL: [UrgencyLevel; 4] = [
        UrgencyLevel::Low,
        UrgencyLevel::Medium,
        UrgencyLevel::High,
        UrgencyLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Critical => "Critical",
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|u| u.as_str() == value)
    }
}

impl fmt::Display for UrgencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured analysis of a civic issue report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CivicLensAnalysis {
    /// Relevant issue categories (at least one)
    #[schemars(length(min = 1))]
    pub issue_category: Vec<IssueCategory>,
    /// Single urgency level for the issue
    pub urgency_level: UrgencyLevel,
    /// Identified systemic issues or recurring problems
    pub systemic_patterns: Vec<String>,
    /// Specific institutions, organizations, or government bodies mentioned
    pub institutions_mentioned: Vec<String>,
    /// Specific locations, cities, regions, or landmarks mentioned
    pub geographic_references: Vec<String>,
    /// Actionable suggestions or strategies for advocacy related to the issue
    pub advocacy_insights: Vec<String>,
}

impl CivicLensAnalysis {
    pub fn has_category(&self, category: IssueCategory) -> bool {
        self.issue_category.contains(&category)
    }
}

/// Shape-only view of model output; enumeration membership is checked afterwards
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawAnalysis {
    pub issue_category: Vec<String>,
    pub urgency_level: String,
    pub systemic_patterns: Vec<String>,
    pub institutions_mentioned: Vec<String>,
    pub geographic_references: Vec<String>,
    pub advocacy_insights: Vec<String>,
}

/// Field names every analysis must carry
pub const REQUIRED_FIELDS: [&str; 6] = [
    "issueCategory",
    "urgencyLevel",
    "systemicPatterns",
    "institutionsMentioned",
    "geographicReferences",
    "advocacyInsights",
];

/// JSON schema for `CivicLensAnalysis`, inlined and stripped of meta keys the
/// generation API does not need.
pub fn analysis_response_schema() -> Value {
    let generator = SchemaSettings::draft2020_12()
        .with(|settings| settings.inline_subschemas = true)
        .into_generator();
    let schema = generator.into_root_schema_for::<CivicLensAnalysis>();

    let mut value = schema.as_value().clone();
    if let Some(object) = value.as_object_mut() {
        object.remove("$schema");
        object.remove("title");
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    // Depth-first search so the test does not depend on how subschemas are wrapped
    fn enum_values(schema: &Value) -> Vec<String> {
        fn find(value: &Value) -> Option<&Vec<Value>> {
            match value {
                Value::Object(map) => map
                    .get("enum")
                    .and_then(Value::as_array)
                    .or_else(|| map.values().find_map(find)),
                Value::Array(items) => items.iter().find_map(find),
                _ => None,
            }
        }

        find(schema)
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_schema_required_fields() {
        let schema = analysis_response_schema();
        assert_eq!(schema["type"], "object");

        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        for field in REQUIRED_FIELDS {
            assert!(required.contains(&field), "missing required field {field}");
        }
    }

    #[test]
    fn test_schema_enumerations_are_inlined() {
        let schema = analysis_response_schema();
        let properties = &schema["properties"];

        let categories = enum_values(&properties["issueCategory"]);
        assert_eq!(categories.len(), 8);
        assert!(categories.contains(&"Human Rights".to_string()));

        let urgency = enum_values(&properties["urgencyLevel"]);
        assert_eq!(urgency, vec!["Low", "Medium", "High", "Critical"]);

        assert!(schema.get("$schema").is_none());
    }

    #[test]
    fn test_wire_names_round_trip_through_serde() {
        for category in IssueCategory::ALL {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{}\"", category.as_str()));
            assert_eq!(IssueCategory::from_wire(category.as_str()), Some(category));
        }
        assert_eq!(IssueCategory::from_wire("human rights"), None);
        assert_eq!(UrgencyLevel::from_wire("Severe"), None);
    }

    #[test]
    fn test_urgency_is_ordered() {
        assert!(UrgencyLevel::Low < UrgencyLevel::Medium);
        assert!(UrgencyLevel::High < UrgencyLevel::Critical);
        assert_eq!(UrgencyLevel::ALL.iter().max(), Some(&UrgencyLevel::Critical));
    }

    #[test]
    fn test_analysis_serializes_camel_case() {
        let analysis = CivicLensAnalysis {
            issue_category: vec![IssueCategory::Health],
            urgency_level: UrgencyLevel::Medium,
            systemic_patterns: vec![],
            institutions_mentioned: vec!["Ministry of Health".to_string()],
            geographic_references: vec![],
            advocacy_insights: vec![],
        };
        let json = serde_json::to_value(&analysis).unwrap();
        assert_eq!(json["issueCategory"][0], "Health");
        assert_eq!(json["institutionsMentioned"][0], "Ministry of Health");
        assert!(analysis.has_category(IssueCategory::Health));
    }
}
