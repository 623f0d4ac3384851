//! Bulk CSV import.
//!
//! Record format (leading column is the record type discriminator):
//!
//! ```text
//! operator,Id,ModelName,Name,ObjectIDs
//! stop_area,Id,ParentId,ReferentId,ModelName,Name,ObjectIDs,LineIds,Attributes,References,CollectedAlways,CollectChildren,CollectGeneralMessages
//! line,Id,ModelName,Name,ObjectIDs,Attributes,References,CollectGeneralMessages
//! vehicle_journey,Id,ModelName,Name,ObjectIDs,LineId,OriginName,DestinationName,Attributes,References
//! stop_visit,Id,ModelName,ObjectIDs,StopAreaId,VehicleJourneyId,PassageOrder,Schedules,Attributes,References
//! ```
//!
//! Comments start with `#`, separators are commas, quotes escape with a
//! doubled quote. Rows land in a [`ModelWriter`]; the database-backed writer
//! is an external collaborator, the in-memory one below backs tests.

use crate::error::LoaderError;
use crate::observability::events;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::path::Path;
use tracing::debug;

const COMPONENT: &str = "csv_loader";

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RecordType {
    StopArea,
    Line,
    VehicleJourney,
    StopVisit,
    Operator,
}

impl RecordType {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "stop_area" => Some(RecordType::StopArea),
            "line" => Some(RecordType::Line),
            "vehicle_journey" => Some(RecordType::VehicleJourney),
            "stop_visit" => Some(RecordType::StopVisit),
            "operator" => Some(RecordType::Operator),
            _ => None,
        }
    }

    fn expected_fields(&self) -> usize {
        match self {
            RecordType::StopArea => 13,
            RecordType::Line => 8,
            RecordType::VehicleJourney => 10,
            RecordType::StopVisit => 10,
            RecordType::Operator => 5,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StopAreaRow {
    pub id: String,
    pub parent_id: Option<String>,
    pub referent_id: Option<String>,
    pub model_name: String,
    pub name: String,
    pub object_ids: BTreeMap<String, String>,
    pub line_ids: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    pub references: Value,
    pub collected_always: bool,
    pub collect_children: bool,
    pub collect_general_messages: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LineRow {
    pub id: String,
    pub model_name: String,
    pub name: String,
    pub object_ids: BTreeMap<String, String>,
    pub attributes: BTreeMap<String, String>,
    pub references: Value,
    pub collect_general_messages: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VehicleJourneyRow {
    pub id: String,
    pub model_name: String,
    pub name: String,
    pub object_ids: BTreeMap<String, String>,
    pub line_id: String,
    pub origin_name: String,
    pub destination_name: String,
    pub attributes: BTreeMap<String, String>,
    pub references: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StopVisitRow {
    pub id: String,
    pub model_name: String,
    pub object_ids: BTreeMap<String, String>,
    pub stop_area_id: String,
    pub vehicle_journey_id: String,
    pub passage_order: u32,
    pub schedules: Value,
    pub attributes: BTreeMap<String, String>,
    pub references: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OperatorRow {
    pub id: String,
    pub model_name: String,
    pub name: String,
    pub object_ids: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ImportRow {
    StopArea(StopAreaRow),
    Line(LineRow),
    VehicleJourney(VehicleJourneyRow),
    StopVisit(StopVisitRow),
    Operator(OperatorRow),
}

impl ImportRow {
    pub fn record_type(&self) -> RecordType {
        match self {
            ImportRow::StopArea(_) => RecordType::StopArea,
            ImportRow::Line(_) => RecordType::Line,
            ImportRow::VehicleJourney(_) => RecordType::VehicleJourney,
            ImportRow::StopVisit(_) => RecordType::StopVisit,
            ImportRow::Operator(_) => RecordType::Operator,
        }
    }

    pub fn model_name(&self) -> &str {
        match self {
            ImportRow::StopArea(row) => &row.model_name,
            ImportRow::Line(row) => &row.model_name,
            ImportRow::VehicleJourney(row) => &row.model_name,
            ImportRow::StopVisit(row) => &row.model_name,
            ImportRow::Operator(row) => &row.model_name,
        }
    }
}

/// Persistence sink for imported rows.
pub trait ModelWriter: Send + Sync {
    /// Drops every stored row of `record_type` scoped to `model_name`.
    fn purge(&self, record_type: RecordType, referential_slug: &str, model_name: &str);

    fn write(&self, referential_slug: &str, row: ImportRow);
}

/// Table-per-type writer kept in memory; backs tests and dry runs.
#[derive(Default)]
pub struct MemoryModelWriter {
    rows: Mutex<Vec<(String, ImportRow)>>,
}

impl MemoryModelWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self, record_type: RecordType) -> Vec<ImportRow> {
        self.rows
            .lock()
            .iter()
            .filter(|(_, row)| row.record_type() == record_type)
            .map(|(_, row)| row.clone())
            .collect()
    }
}

impl ModelWriter for MemoryModelWriter {
    fn purge(&self, record_type: RecordType, referential_slug: &str, model_name: &str) {
        self.rows.lock().retain(|(slug, row)| {
            !(row.record_type() == record_type
                && slug == referential_slug
                && row.model_name() == model_name)
        });
    }

    fn write(&self, referential_slug: &str, row: ImportRow) {
        self.rows
            .lock()
            .push((referential_slug.to_string(), row));
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ImportSummary {
    pub stop_areas: usize,
    pub lines: usize,
    pub vehicle_journeys: usize,
    pub stop_visits: usize,
    pub operators: usize,
    pub errors: usize,
}

impl ImportSummary {
    fn total(&self) -> usize {
        self.stop_areas + self.lines + self.vehicle_journeys + self.stop_visits + self.operators
    }
}

pub struct CsvLoader {
    referential_slug: String,
    force: bool,
}

impl CsvLoader {
    pub fn new(referential_slug: impl Into<String>, force: bool) -> Self {
        Self {
            referential_slug: referential_slug.into(),
            force,
        }
    }

    pub fn load_path(
        &self,
        path: impl AsRef<Path>,
        writer: &dyn ModelWriter,
    ) -> Result<ImportSummary, LoaderError> {
        let file = std::fs::File::open(path)?;
        self.load_reader(file, writer)
    }

    pub fn load_reader<R: Read>(
        &self,
        reader: R,
        writer: &dyn ModelWriter,
    ) -> Result<ImportSummary, LoaderError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .trim(csv::Trim::Fields)
            .from_reader(reader);

        let mut summary = ImportSummary::default();
        let mut purged: HashSet<(RecordType, String)> = HashSet::new();

        for (index, record) in csv_reader.records().enumerate() {
            let line_number = index + 1;
            let record = match record {
                Ok(record) => record,
                Err(err) => {
                    summary.errors += 1;
                    debug!(
                        event = events::LOADER_RECORD_REJECTED,
                        component = COMPONENT,
                        line = line_number,
                        err = %err,
                        "unreadable record"
                    );
                    continue;
                }
            };
            if record.is_empty() {
                continue;
            }
            match self.parse_record(&record) {
                Ok(row) => {
                    if self.force {
                        let key = (row.record_type(), row.model_name().to_string());
                        if purged.insert(key.clone()) {
                            writer.purge(key.0, &self.referential_slug, &key.1);
                        }
                    }
                    match &row {
                        ImportRow::StopArea(_) => summary.stop_areas += 1,
                        ImportRow::Line(_) => summary.lines += 1,
                        ImportRow::VehicleJourney(_) => summary.vehicle_journeys += 1,
                        ImportRow::StopVisit(_) => summary.stop_visits += 1,
                        ImportRow::Operator(_) => summary.operators += 1,
                    }
                    writer.write(&self.referential_slug, row);
                }
                Err(reason) => {
                    summary.errors += 1;
                    debug!(
                        event = events::LOADER_RECORD_REJECTED,
                        component = COMPONENT,
                        line = line_number,
                        reason,
                        "rejected record"
                    );
                }
            }
        }

        if summary.total() == 0 {
            if summary.errors == 0 {
                return Err(LoaderError::EmptyFile);
            }
            return Err(LoaderError::NothingImported(summary.errors));
        }

        debug!(
            event = events::LOADER_IMPORT_SUMMARY,
            component = COMPONENT,
            stop_areas = summary.stop_areas,
            lines = summary.lines,
            vehicle_journeys = summary.vehicle_journeys,
            stop_visits = summary.stop_visits,
            operators = summary.operators,
            errors = summary.errors,
            "import finished"
        );
        Ok(summary)
    }

    fn parse_record(&self, record: &csv::StringRecord) -> Result<ImportRow, String> {
        let record_type = RecordType::parse(&record[0])
            .ok_or_else(|| format!("unknown record type: {}", &record[0]))?;
        if record.len() != record_type.expected_fields() {
            return Err(format!(
                "wrong number of entries, expected {} got {}",
                record_type.expected_fields(),
                record.len()
            ));
        }
        match record_type {
            RecordType::StopArea => Ok(ImportRow::StopArea(StopAreaRow {
                id: record[1].to_string(),
                parent_id: optional(&record[2]),
                referent_id: optional(&record[3]),
                model_name: record[4].to_string(),
                name: record[5].to_string(),
                object_ids: json_map(&record[6])?,
                line_ids: json_list(&record[7])?,
                attributes: json_map(&record[8])?,
                references: json_value(&record[9])?,
                collected_always: parse_bool(&record[10])?,
                collect_children: parse_bool(&record[11])?,
                collect_general_messages: parse_bool(&record[12])?,
            })),
            RecordType::Line => Ok(ImportRow::Line(LineRow {
                id: record[1].to_string(),
                model_name: record[2].to_string(),
                name: record[3].to_string(),
                object_ids: json_map(&record[4])?,
                attributes: json_map(&record[5])?,
                references: json_value(&record[6])?,
                collect_general_messages: parse_bool(&record[7])?,
            })),
            RecordType::VehicleJourney => Ok(ImportRow::VehicleJourney(VehicleJourneyRow {
                id: record[1].to_string(),
                model_name: record[2].to_string(),
                name: record[3].to_string(),
                object_ids: json_map(&record[4])?,
                line_id: record[5].to_string(),
                origin_name: record[6].to_string(),
                destination_name: record[7].to_string(),
                attributes: json_map(&record[8])?,
                references: json_value(&record[9])?,
            })),
            RecordType::StopVisit => Ok(ImportRow::StopVisit(StopVisitRow {
                id: record[1].to_string(),
                model_name: record[2].to_string(),
                object_ids: json_map(&record[3])?,
                stop_area_id: record[4].to_string(),
                vehicle_journey_id: record[5].to_string(),
                passage_order: parse_order(&record[6])?,
                schedules: json_value(&record[7])?,
                attributes: json_map(&record[8])?,
                references: json_value(&record[9])?,
            })),
            RecordType::Operator => Ok(ImportRow::Operator(OperatorRow {
                id: record[1].to_string(),
                model_name: record[2].to_string(),
                name: record[3].to_string(),
                object_ids: json_map(&record[4])?,
            })),
        }
    }
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn json_map(value: &str) -> Result<BTreeMap<String, String>, String> {
    if value.is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(value).map_err(|err| format!("invalid json object: {err}"))
}

fn json_list(value: &str) -> Result<Vec<String>, String> {
    if value.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(value).map_err(|err| format!("invalid json array: {err}"))
}

fn json_value(value: &str) -> Result<Value, String> {
    if value.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(value).map_err(|err| format!("invalid json: {err}"))
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value {
        "" | "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        other => Err(format!("invalid boolean: {other}")),
    }
}

fn parse_order(value: &str) -> Result<u32, String> {
    if value.is_empty() {
        return Ok(0);
    }
    value
        .parse()
        .map_err(|err| format!("invalid passage order: {err}"))
}

#[cfg(test)]
mod tests {
    use super::{CsvLoader, ImportRow, MemoryModelWriter, RecordType};

    const SAMPLE: &str = "\
# comment line
operator,op-1,2017-01-01,Transdev,{}
line,li-1,2017-01-01,Ligne 12,\"{\"\"external\"\":\"\"line:12\"\"}\",{},,false
stop_area,sa-1,,,2017-01-01,Gare,\"{\"\"external\"\":\"\"stop:1\"\"}\",\"[\"\"li-1\"\"]\",{},,true,false,false
";

    #[test]
    fn records_are_parsed_and_written() {
        let writer = MemoryModelWriter::new();
        let loader = CsvLoader::new("referential", false);

        let summary = loader
            .load_reader(SAMPLE.as_bytes(), &writer)
            .expect("import should succeed");

        assert_eq!(summary.operators, 1);
        assert_eq!(summary.lines, 1);
        assert_eq!(summary.stop_areas, 1);
        assert_eq!(summary.errors, 0);

        let lines = writer.rows(RecordType::Line);
        let ImportRow::Line(line) = &lines[0] else {
            panic!("expected a line row");
        };
        assert_eq!(line.name, "Ligne 12");
        assert_eq!(line.object_ids.get("external").unwrap(), "line:12");
    }

    #[test]
    fn wrong_field_count_is_counted_not_fatal() {
        let writer = MemoryModelWriter::new();
        let loader = CsvLoader::new("referential", false);

        let summary = loader
            .load_reader("operator,op-1,2017-01-01\noperator,op-2,2017-01-01,Transdev,{}\n".as_bytes(), &writer)
            .expect("import should succeed");

        assert_eq!(summary.operators, 1);
        assert_eq!(summary.errors, 1);
    }

    #[test]
    fn empty_file_is_an_error() {
        let writer = MemoryModelWriter::new();
        let loader = CsvLoader::new("referential", false);

        assert!(loader.load_reader("".as_bytes(), &writer).is_err());
    }

    #[test]
    fn force_purges_once_per_model_name() {
        let writer = MemoryModelWriter::new();

        CsvLoader::new("referential", true)
            .load_reader(
                "operator,op-1,m,One,{}\noperator,op-2,m,Two,{}\n".as_bytes(),
                &writer,
            )
            .unwrap();
        assert_eq!(writer.rows(RecordType::Operator).len(), 2);

        CsvLoader::new("referential", true)
            .load_reader("operator,op-3,m,Three,{}\n".as_bytes(), &writer)
            .unwrap();

        let rows = writer.rows(RecordType::Operator);
        assert_eq!(rows.len(), 1);
        let ImportRow::Operator(operator) = &rows[0] else {
            panic!("expected an operator row");
        };
        assert_eq!(operator.name, "Three");
    }
}
