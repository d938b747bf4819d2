use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ServiceError;

/// Quality of one blocking stage measured against the ground truth.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockingStats {
    pub stage: String,
    pub blocks: usize,
    pub comparisons: u64,
    pub detected_duplicates: usize,
    pub existing_duplicates: usize,
    /// Recall of the stage.
    pub pair_completeness: f64,
    /// Precision of the stage.
    pub pairs_quality: f64,
    pub reduction_ratio: f64,
    pub f_measure: f64,
}

/// Quality of the final clusters measured against the ground truth.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStats {
    pub clusters: usize,
    pub reported_duplicates: usize,
    pub true_positives: usize,
    pub existing_duplicates: usize,
    pub precision: f64,
    pub recall: f64,
    pub f_measure: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
    pub blocking_secs: f64,
    pub matching_secs: f64,
}

impl Timings {
    pub fn total_secs(&self) -> f64 {
        self.blocking_secs + self.matching_secs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub blocking: Vec<BlockingStats>,
    pub clustering: ClusterStats,
    /// Ground-truth rows that referenced unknown identifiers.
    pub unresolved_pairs: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetReport {
    pub path: String,
    pub status: DatasetStatus,
    pub profiles: usize,
    pub skipped_rows: usize,
    /// Candidate pairs the similarity matcher scored.
    pub compared_pairs: usize,
    pub detected_duplicates: usize,
    pub timings: Timings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ServiceError>,
}

impl DatasetReport {
    pub fn failed(path: impl Into<String>, error: ServiceError) -> Self {
        DatasetReport {
            path: path.into(),
            status: DatasetStatus::Failed,
            profiles: 0,
            skipped_rows: 0,
            compared_pairs: 0,
            detected_duplicates: 0,
            timings: Timings::default(),
            evaluation: None,
            error: Some(error),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunReport<'a> {
    datasets: &'a [DatasetReport],
    failed_datasets: usize,
    total_duplicates: usize,
}

pub fn make_report_payload(
    datasets: &[DatasetReport],
    total_duplicates: usize,
) -> Result<Value, ServiceError> {
    let failed_datasets = datasets
        .iter()
        .filter(|report| report.status == DatasetStatus::Failed)
        .count();
    let report = RunReport {
        datasets,
        failed_datasets,
        total_duplicates,
    };
    serde_json::to_value(report).map_err(ServiceError::internal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_counts_failures() {
        let ok = DatasetReport {
            path: "X1.csv".into(),
            status: DatasetStatus::Completed,
            profiles: 10,
            skipped_rows: 1,
            compared_pairs: 5,
            detected_duplicates: 3,
            timings: Timings {
                blocking_secs: 0.5,
                matching_secs: 0.25,
            },
            evaluation: None,
            error: None,
        };
        let failed = DatasetReport::failed("X2.csv", ServiceError::resource_not_found("X2.csv"));
        let payload = make_report_payload(&[ok, failed], 3).unwrap();
        assert_eq!(payload["failedDatasets"], 1);
        assert_eq!(payload["totalDuplicates"], 3);
        assert_eq!(payload["datasets"][0]["status"], "completed");
        assert_eq!(payload["datasets"][0]["skippedRows"], 1);
        assert_eq!(payload["datasets"][0]["comparedPairs"], 5);
        assert!(payload["datasets"][0].get("error").is_none());
        assert_eq!(payload["datasets"][1]["error"]["kind"], 3);
    }

    #[test]
    fn total_time_sums_phases() {
        let timings = Timings {
            blocking_secs: 1.5,
            matching_secs: 2.0,
        };
        assert_eq!(timings.total_secs(), 3.5);
    }
}
