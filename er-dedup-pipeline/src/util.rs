use csv::{ReaderBuilder, StringRecord, Writer};
use er_dedup::dto::EntityProfile;
use er_dedup::error::ServiceError;
use er_dedup::util::{read_object, write_object};
use serde_json::Value;
use std::path::Path;
use tracing::warn;

pub const OUTPUT_HEADER: [&str; 2] = ["left_instance_id", "right_instance_id"];

/// Profiles of one dataset plus the number of rows that could not be used.
#[derive(Debug)]
pub struct Dataset {
    pub profiles: Vec<EntityProfile>,
    pub skipped_rows: usize,
}

///
/// Loads a headered CSV file into profiles. Every column except `id_column`
/// becomes an attribute; empty values are left out.
///
/// Rows with a missing or empty identifier, or whose field count differs
/// from the header, are skipped with a warning. A file where every row was
/// skipped is a malformed-record error.
///
pub fn pull_data_file(path: &Path, id_column: &str) -> Result<Dataset, ServiceError> {
    let bytes = read_object(path)?;
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes.as_slice());
    let headers = reader
        .headers()
        .map_err(|err| {
            ServiceError::malformed_record(format!("{}: unreadable header: {}", path.display(), err))
        })?
        .clone();
    let id_index = headers
        .iter()
        .position(|name| name.trim() == id_column)
        .ok_or_else(|| {
            ServiceError::malformed_record(format!(
                "{}: no identifier column '{}'",
                path.display(),
                id_column
            ))
        })?;

    let mut profiles = Vec::new();
    let mut skipped_rows = 0;
    for result in reader.records() {
        let record = match result {
            Ok(record) => record,
            Err(err) => {
                warn!("{}: skipping unparsable row: {}", path.display(), err);
                skipped_rows += 1;
                continue;
            }
        };
        match to_profile(profiles.len(), &headers, &record, id_index) {
            Ok(profile) => profiles.push(profile),
            Err(reason) => {
                let line = record.position().map_or(0, |pos| pos.line());
                warn!("{}:{}: skipping row, {}", path.display(), line, reason);
                skipped_rows += 1;
            }
        }
    }
    if profiles.is_empty() && skipped_rows > 0 {
        return Err(ServiceError::malformed_record(format!(
            "{}: all {} rows are malformed",
            path.display(),
            skipped_rows
        )));
    }
    Ok(Dataset {
        profiles,
        skipped_rows,
    })
}

fn to_profile(
    index: usize,
    headers: &StringRecord,
    record: &StringRecord,
    id_index: usize,
) -> Result<EntityProfile, String> {
    if record.len() != headers.len() {
        return Err(format!(
            "expected {} fields, found {}",
            headers.len(),
            record.len()
        ));
    }
    let id = record.get(id_index).map(str::trim).unwrap_or_default();
    if id.is_empty() {
        return Err(String::from("identifier is empty"));
    }
    let mut profile = EntityProfile::new(index, id);
    for (i, (name, value)) in headers.iter().zip(record.iter()).enumerate() {
        if i != id_index && !value.trim().is_empty() {
            profile.add_attribute(name, value);
        }
    }
    Ok(profile)
}

/// Reads `leftId,rightId` rows without a header. Extra columns are ignored.
pub fn pull_ground_truth(path: &Path) -> Result<Vec<(String, String)>, ServiceError> {
    let bytes = read_object(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes.as_slice());
    let mut pairs = Vec::new();
    for result in reader.records() {
        match result {
            Ok(record) if record.len() >= 2 => {
                pairs.push((record[0].trim().to_string(), record[1].trim().to_string()));
            }
            Ok(record) => {
                let line = record.position().map_or(0, |pos| pos.line());
                warn!("{}:{}: skipping ground-truth row with {} fields", path.display(), line, record.len());
            }
            Err(err) => warn!("{}: skipping unparsable ground-truth row: {}", path.display(), err),
        }
    }
    Ok(pairs)
}

/// Writes detected duplicate pairs under the `left_instance_id,right_instance_id` header.
pub fn push_result_file(path: &Path, duplicates: &[(String, String)]) -> Result<(), ServiceError> {
    let mut writer = Writer::from_writer(vec![]);
    writer
        .write_record(OUTPUT_HEADER)
        .map_err(ServiceError::internal)?;
    for (left, right) in duplicates {
        writer
            .write_record([left, right])
            .map_err(ServiceError::internal)?;
    }
    let object = writer.into_inner().map_err(ServiceError::internal)?;
    write_object(path, object)
}

pub fn push_report_file(path: &Path, report: &Value) -> Result<(), ServiceError> {
    let object = serde_json::to_vec_pretty(report).map_err(ServiceError::internal)?;
    write_object(path, object)
}
