//! `NetworkPerformanceTest` Custom Resource Definition for netperf test runs

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "networkmachinery.io",
    version = "v1alpha1",
    kind = "NetworkPerformanceTest"
)]
#[kube(status = "NetworkPerformanceTestStatus")]
#[kube(shortname = "npt")]
#[kube(printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#)]
#[kube(printcolumn = r#"{"name":"Iterations","type":"integer","jsonPath":".spec.iterations"}"#)]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
pub struct NetworkPerformanceTestSpec {
    /// Kind of test to run (e.g. "pod2pod")
    #[serde(rename = "type")]
    pub test_type: String,
    /// Number of netperf iterations; admission currently only accepts 1
    pub iterations: i32,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct NetworkPerformanceTestStatus {
    #[serde(default)]
    pub phase: NetworkPerformanceTestPhase,
    #[serde(default)]
    pub output: NetworkPerformanceTestOutput,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct NetworkPerformanceTestOutput {
    /// Bandwidth per measured path, keyed by MSS column
    #[serde(default)]
    pub bandwidth: ResultTable,
}

/// Phase of a `NetworkPerformanceTest`
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum NetworkPerformanceTestPhase {
    /// Test accepted, worker not finished yet
    #[default]
    Pending,
    /// Results were parsed and recorded
    Succeeded,
    Failed,
    Unknown,
}

impl NetworkPerformanceTestPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for NetworkPerformanceTestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered measurement table: row key -> (column header -> value)
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(transparent)]
pub struct ResultTable(BTreeMap<String, BTreeMap<String, String>>);

impl ResultTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row, replacing any earlier row with the same key
    pub fn insert_row(&mut self, key: impl Into<String>, columns: BTreeMap<String, String>) {
        self.0.insert(key.into(), columns);
    }

    #[must_use]
    pub fn row(&self, key: &str) -> Option<&BTreeMap<String, String>> {
        self.0.get(key)
    }

    #[must_use]
    pub fn value(&self, row: &str, column: &str) -> Option<&str> {
        self.0.get(row)?.get(column).map(String::as_str)
    }

    pub fn rows(&self) -> impl Iterator<Item = (&String, &BTreeMap<String, String>)> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl NetworkPerformanceTest {
    /// Current phase, treating a missing status as `Pending`
    #[must_use]
    pub fn phase(&self) -> NetworkPerformanceTestPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.phase == NetworkPerformanceTestPhase::Succeeded)
    }

    #[must_use]
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::CustomResourceExt;
    use serde_json::json;

    #[test]
    fn crd_is_cluster_scoped_with_status() {
        let crd = NetworkPerformanceTest::crd();
        assert_eq!(crd.spec.group, "networkmachinery.io");
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.names.kind, "NetworkPerformanceTest");

        let version = &crd.spec.versions[0];
        assert_eq!(version.name, "v1alpha1");
        assert!(version
            .subresources
            .as_ref()
            .and_then(|s| s.status.as_ref())
            .is_some());
    }

    #[test]
    fn spec_uses_type_field_name() {
        let spec: NetworkPerformanceTestSpec =
            serde_json::from_value(json!({"type": "pod2pod", "iterations": 1})).unwrap();
        assert_eq!(spec.test_type, "pod2pod");
        assert_eq!(spec.iterations, 1);

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["type"], "pod2pod");
    }

    #[test]
    fn status_serializes_bandwidth_table_as_nested_map() {
        let mut table = ResultTable::new();
        table.insert_row(
            "1 iperf TCP. Same VM using Pod IP",
            BTreeMap::from([("96".to_string(), "1234.5".to_string())]),
        );
        let status = NetworkPerformanceTestStatus {
            phase: NetworkPerformanceTestPhase::Succeeded,
            output: NetworkPerformanceTestOutput { bandwidth: table },
        };

        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["phase"], "Succeeded");
        assert_eq!(
            value["output"]["bandwidth"]["1 iperf TCP. Same VM using Pod IP"]["96"],
            "1234.5"
        );
    }

    #[test]
    fn empty_status_defaults_to_pending() {
        let status: NetworkPerformanceTestStatus = serde_json::from_value(json!({})).unwrap();
        assert_eq!(status.phase, NetworkPerformanceTestPhase::Pending);
        assert!(status.output.bandwidth.is_empty());
    }

    #[test]
    fn phase_helpers_reflect_status() {
        let mut test = NetworkPerformanceTest::new(
            "sample",
            NetworkPerformanceTestSpec {
                test_type: "pod2pod".to_string(),
                iterations: 1,
            },
        );
        assert_eq!(test.phase(), NetworkPerformanceTestPhase::Pending);
        assert!(!test.is_succeeded());

        test.status = Some(NetworkPerformanceTestStatus {
            phase: NetworkPerformanceTestPhase::Succeeded,
            ..Default::default()
        });
        assert!(test.is_succeeded());
        assert!(!test.is_being_deleted());
    }
}
