use crate::query::Record;
use indexmap::IndexMap;

/// Field by which records are grouped.
pub const GROUP_FIELD: &str = "codigo_lote";
/// Numeric field which is summed within each group.
pub const AREA_FIELD: &str = "area_terreno_m2";

/// Summary of all records sharing a `codigo_lote`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LotSummary {
    pub codigo_lote: String,
    pub count_predios: u64,
    pub total_area_m2: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum AggregationError {
    #[error("row {row} is missing field '{field}'")]
    MissingField { field: &'static str, row: usize },
    #[error("row {row} has non-numeric '{field}' value {}", describe_value(.value))]
    InvalidNumericField {
        field: &'static str,
        /// Offending value, or None if the field is absent.
        value: Option<String>,
        row: usize,
    },
}

fn describe_value(value: &Option<String>) -> String {
    match value {
        Some(value) => format!("{value:?}"),
        None => "<absent>".to_string(),
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    count: u64,
    total: f64,
}

/// Group `records` by their `codigo_lote`, counting records and summing
/// `area_terreno_m2` within each group. Groups are returned in the order
/// in which their key was first seen. The first malformed record fails
/// the whole aggregation.
pub fn aggregate<'r, I>(records: I) -> Result<Vec<LotSummary>, AggregationError>
where
    I: IntoIterator<Item = &'r Record>,
{
    let mut groups: IndexMap<&'r str, Accumulator> = IndexMap::new();

    for (row, record) in records.into_iter().enumerate() {
        let lote = record
            .get(GROUP_FIELD)
            .ok_or(AggregationError::MissingField {
                field: GROUP_FIELD,
                row,
            })?;
        let area = parse_area(record, row)?;

        let acc = groups.entry(lote.as_str()).or_default();
        acc.count += 1;
        acc.total += area;
    }

    Ok(groups
        .into_iter()
        .map(|(lote, Accumulator { count, total })| LotSummary {
            codigo_lote: lote.to_string(),
            count_predios: count,
            total_area_m2: total,
        })
        .collect())
}

fn parse_area(record: &Record, row: usize) -> Result<f64, AggregationError> {
    let value = record
        .get(AREA_FIELD)
        .ok_or(AggregationError::InvalidNumericField {
            field: AREA_FIELD,
            value: None,
            row,
        })?;

    match value.trim().parse::<f64>() {
        // NaN and infinities parse, but have no JSON representation in a summary total.
        Ok(area) if area.is_finite() => Ok(area),
        _ => Err(AggregationError::InvalidNumericField {
            field: AREA_FIELD,
            value: Some(value.clone()),
            row,
        }),
    }
}
