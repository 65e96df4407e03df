use super::geocoder::GeocodedPoint;
use std::collections::BTreeMap;
use std::io::{Read, Write};

pub const STREET_ADDRESS_COLUMN: &str = "Street Address";
pub const POINT_TABLE_HEADER: [&str; 3] = ["X", "Y", "Type"];

/// One row of the published address sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRecord {
    pub street_address: String,
    /// Every other column of the row, keyed by header.
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug)]
pub enum TableError {
    Csv(csv::Error),
    Io(std::io::Error),
    MissingColumn { column: &'static str, found: Vec<String> },
}

impl std::fmt::Display for TableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableError::Csv(err) => write!(f, "invalid address table: {}", err),
            TableError::Io(err) => write!(f, "unable to write point table: {}", err),
            TableError::MissingColumn { column, found } => write!(
                f,
                "address table has no '{}' column (found: {})",
                column,
                found.join(", ")
            ),
        }
    }
}

impl std::error::Error for TableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TableError::Csv(err) => Some(err),
            TableError::Io(err) => Some(err),
            TableError::MissingColumn { .. } => None,
        }
    }
}

impl From<csv::Error> for TableError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

impl From<std::io::Error> for TableError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

fn normalize_header(header: &str) -> String {
    header
        .trim_start_matches('\u{feff}')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

/// Parses the raw sheet, keeping source order. The street address column is
/// matched ignoring case and surrounding whitespace.
pub fn read_address_records<R: Read>(reader: R) -> Result<Vec<AddressRecord>, TableError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(|header| header.trim_start_matches('\u{feff}').to_string())
        .collect();
    let wanted = normalize_header(STREET_ADDRESS_COLUMN);
    let address_index = headers
        .iter()
        .position(|header| normalize_header(header) == wanted)
        .ok_or_else(|| TableError::MissingColumn {
            column: STREET_ADDRESS_COLUMN,
            found: headers.clone(),
        })?;

    let mut records = Vec::new();
    for row in csv_reader.records() {
        let row = row?;
        let street_address = row.get(address_index).unwrap_or_default().to_string();
        let metadata = headers
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != address_index)
            .map(|(index, header)| {
                (header.clone(), row.get(index).unwrap_or_default().to_string())
            })
            .collect();
        records.push(AddressRecord {
            street_address,
            metadata,
        });
    }

    Ok(records)
}

/// Writes the `X,Y,Type` table the engine turns into points. The header is
/// written even when `points` is empty.
pub fn write_point_table<W: Write>(writer: W, points: &[GeocodedPoint]) -> Result<(), TableError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(POINT_TABLE_HEADER)?;
    for point in points {
        csv_writer.write_record([
            point.x.to_string(),
            point.y.to_string(),
            point.category.label().to_string(),
        ])?;
    }
    csv_writer.flush()?;
    Ok(())
}
