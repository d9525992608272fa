use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Testing pattern of an experiment; selects the winner and weight policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestingPattern {
    Conformance,
    Canary,
    BlueGreen,
    #[serde(rename = "A/B")]
    AB,
    #[serde(rename = "A/B/n")]
    ABN,
}

/// Direction in which a reward metric is considered better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreferredDirection {
    High,
    Low,
}

/// Authentication mode for a metrics backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthType {
    Basic,
    Bearer,
    #[serde(rename = "APIKey")]
    ApiKey,
}

/// HTTP method used to query a metrics backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Method {
    #[default]
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "POST")]
    Post,
}

/// A named string value; used for version variables, query params, and
/// header templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedValue {
    pub name: String,
    pub value: String,
}

/// One version taking part in an experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionDetail {
    /// Version name, unique within the experiment
    pub name: String,
    /// Variables usable as interpolation placeholders in metric queries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Vec<NamedValue>>,
}

/// Baseline and candidate versions. The baseline is always index 0 of the
/// assembled version list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub baseline: VersionDetail,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<VersionDetail>>,
}

/// Per-candidate traffic constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightsConfig {
    /// Absolute cap on any candidate's weight, in percent
    #[serde(default = "default_weight_cap")]
    pub max_candidate_weight: f64,
    /// Cap on any candidate's weight increase per iteration, in percent
    #[serde(default = "default_weight_cap")]
    pub max_candidate_weight_increment: f64,
}

fn default_weight_cap() -> f64 {
    100.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    pub testing_pattern: TestingPattern,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weights: Option<WeightsConfig>,
}

/// An upper and/or lower limit on a metric value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Objective {
    pub metric: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upper_limit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lower_limit: Option<f64>,
}

/// A metric whose preferred direction selects the winner among feasible
/// versions. Only the first reward of an experiment is consulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reward {
    pub metric: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_direction: Option<PreferredDirection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Criteria {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objectives: Option<Vec<Objective>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewards: Option<Vec<Reward>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentSpec {
    pub strategy: Strategy,
    pub version_info: VersionInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub criteria: Option<Criteria>,
}

/// Spec of a metric resource: how to query one backend for one value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    /// Query parameter templates, interpolated per version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<NamedValue>>,
    /// Header value templates; interpolated against secret data only for
    /// Bearer and APIKey auth
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_templates: Option<Vec<NamedValue>>,
    /// Request body template; the interpolated string must parse as JSON
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default)]
    pub method: Method,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_type: Option<AuthType>,
    /// Secret reference, either `"namespace/name"` or a bare `"name"`
    /// resolved in the current pod namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// jq program extracting a single number from the backend response
    pub jq_expression: String,
    pub provider: String,
    /// Backend URL; interpolated against secret data when a secret is
    /// referenced
    pub url_template: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub metric_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_size: Option<Value>,
}

/// A metric resource as embedded in experiment status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricResource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub spec: MetricSpec,
}

/// Name under which objectives and rewards reference a metric, together
/// with the metric resource itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricInfo {
    pub name: String,
    pub metric_obj: MetricResource,
}

/// Aggregated value of one metric for one version. `None` means the fetch
/// failed or yielded no number.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionMetric {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedMetric {
    pub data: BTreeMap<String, VersionMetric>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedMetricsAnalysis {
    pub data: BTreeMap<String, AggregatedMetric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Objective satisfaction per version: one boolean per objective, in
/// objective order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionAssessmentsAnalysis {
    pub data: BTreeMap<String, Vec<bool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerAssessmentData {
    /// True iff a single best version was identified
    #[serde(default)]
    pub winner_found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
    /// Feasible versions tied for the best reward value; a subset of the
    /// feasible set
    #[serde(default)]
    pub best_versions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WinnerAssessmentAnalysis {
    #[serde(default)]
    pub data: WinnerAssessmentData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Weight recommendation for one version, in integer percent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionWeight {
    pub name: String,
    pub value: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightsAnalysis {
    pub data: Vec<VersionWeight>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The four analysis sections, populated in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregated_metrics: Option<AggregatedMetricsAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_assessments: Option<VersionAssessmentsAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_assessment: Option<WinnerAssessmentAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weights: Option<WeightsAnalysis>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentStatus {
    /// Experiment start; drives the `elapsedTime` placeholder
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Vec<MetricInfo>>,
    /// Weights applied in the previous iteration; the implicit initial
    /// distribution is 100 on the baseline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_weight_distribution: Option<Vec<VersionWeight>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Analysis>,
}

/// The experiment resource: input of an assessment call and, with
/// `status.analysis` populated, its output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentResource {
    pub spec: ExperimentSpec,
    pub status: ExperimentStatus,
}

impl ExperimentResource {
    /// Ordered version list: baseline first, then candidates.
    pub fn versions(&self) -> Vec<&VersionDetail> {
        let mut versions = vec![&self.spec.version_info.baseline];
        if let Some(candidates) = &self.spec.version_info.candidates {
            versions.extend(candidates.iter());
        }
        versions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn testing_pattern_wire_names() {
        assert_eq!(
            serde_json::to_string(&TestingPattern::AB).unwrap(),
            "\"A/B\""
        );
        assert_eq!(
            serde_json::from_str::<TestingPattern>("\"A/B/n\"").unwrap(),
            TestingPattern::ABN
        );
        assert_eq!(
            serde_json::from_str::<TestingPattern>("\"Conformance\"").unwrap(),
            TestingPattern::Conformance
        );
    }

    #[test]
    fn metric_spec_defaults_to_get() {
        let spec: MetricSpec = serde_json::from_value(serde_json::json!({
            "provider": "prometheus",
            "jqExpression": ".data.result[0].value[1] | tonumber",
            "urlTemplate": "http://prometheus:9090/api/v1/query"
        }))
        .unwrap();
        assert_eq!(spec.method, Method::Get);
        assert!(spec.secret.is_none());
    }

    #[test]
    fn versions_puts_baseline_first() {
        let expr: ExperimentResource = serde_json::from_value(serde_json::json!({
            "spec": {
                "strategy": {"testingPattern": "Canary"},
                "versionInfo": {
                    "baseline": {"name": "default"},
                    "candidates": [{"name": "canary"}]
                }
            },
            "status": {"startTime": "2020-04-03T12:55:50.568Z"}
        }))
        .unwrap();
        let names: Vec<_> = expr.versions().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["default", "canary"]);
    }
}
