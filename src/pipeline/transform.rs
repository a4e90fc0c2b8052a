use crate::error::{EtlError, EtlResult};
use crate::model::{INDEX_LABEL, RawRecord, TransformedDataset, UnifiedDataset, UsageRecord};

/// Floors the three year columns into nullable integers and labels the
/// positional index. Every other field passes through untouched.
pub fn transform(dataset: UnifiedDataset) -> EtlResult<TransformedDataset> {
    let rows = dataset
        .rows
        .into_iter()
        .enumerate()
        .map(|(row, record)| transform_record(row, record))
        .collect::<EtlResult<Vec<_>>>()?;

    Ok(TransformedDataset {
        index_label: INDEX_LABEL,
        rows,
    })
}

fn transform_record(row: usize, record: RawRecord) -> EtlResult<UsageRecord> {
    let year = |value: Option<f64>| {
        floor_year(value).map_err(|reason| EtlError::Transform { row, reason })
    };

    Ok(UsageRecord {
        year_wb: year(record.year_wb)?,
        year_itu: year(record.year_itu)?,
        year_cia: year(record.year_cia)?,
        location: record.location,
        rate_wb: record.rate_wb,
        rate_itu: record.rate_itu,
        users_cia: record.users_cia,
        notes: record.notes,
    })
}

/// Missing stays missing; a present value floors toward negative infinity.
pub fn floor_year(value: Option<f64>) -> Result<Option<i32>, String> {
    let Some(value) = value else {
        return Ok(None);
    };
    if value.is_nan() {
        return Ok(None);
    }

    let floored = value.floor();
    if !floored.is_finite() || floored < f64::from(i32::MIN) || floored > f64::from(i32::MAX) {
        return Err(format!("year value out of range: {value}"));
    }

    Ok(Some(floored as i32))
}
