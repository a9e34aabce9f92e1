use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::SweepError;
use crate::measurement::Reading;
use crate::sweep::SweepResult;
use crate::types::MeasurementMode;

/// Artifacts of one run, all named after the CSV file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub csv: PathBuf,
    pub png: PathBuf,
    /// Points streamed while the sweep runs
    pub run_log: PathBuf,
    /// Full result written once the sweep completes
    pub summary: PathBuf,
}

impl OutputPaths {
    pub fn from_csv<P: Into<PathBuf>>(csv: P) -> Self {
        let csv = csv.into();
        Self {
            png: csv.with_extension("png"),
            run_log: csv.with_extension("jsonl"),
            summary: csv.with_extension("json"),
            csv,
        }
    }
}

/// Column headers for a result table
pub fn headers(result: &SweepResult) -> Vec<String> {
    let mut headers = vec!["Bias_Voltage".to_string(), "Bias_Current".to_string()];
    let levels = &result.config.trigger_levels;

    match result.config.mode {
        MeasurementMode::FilteredPcr => {
            for (j, level) in levels.iter().enumerate() {
                headers.push(format!("Counts_TL{}({})", j + 1, level));
            }
            for (j, level) in levels.iter().enumerate() {
                headers.push(format!("DCounts_TL{}({})", j + 1, level));
            }
        }
        MeasurementMode::Dcr => {
            let bins = result.num_bins();
            for (j, level) in levels.iter().enumerate() {
                for k in 0..bins {
                    headers.push(format!("DCR_TL{}({})_Bin{}", j + 1, level, k + 1));
                }
            }
        }
    }
    headers
}

fn field(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => v.to_string(),
        _ => String::new(),
    }
}

/// Data fields of one row, in header order
fn row_fields(result: &SweepResult, readings: &[Option<Reading>]) -> Vec<String> {
    let levels = result.config.trigger_levels.len();
    let slot = |j: usize| readings.get(j).and_then(Option::as_ref);
    let mut fields = Vec::new();

    match result.config.mode {
        MeasurementMode::FilteredPcr => {
            for j in 0..levels {
                fields.push(field(slot(j).map(Reading::value)));
            }
            for j in 0..levels {
                fields.push(field(slot(j).and_then(Reading::dark)));
            }
        }
        MeasurementMode::Dcr => {
            let bins = result.num_bins();
            for j in 0..levels {
                let rates: &[f64] = match slot(j) {
                    Some(Reading::Rate(rates)) => rates.as_slice(),
                    _ => &[],
                };
                for k in 0..bins {
                    fields.push(field(rates.get(k).copied()));
                }
            }
        }
    }
    fields
}

/// Write the result table; missing values become empty fields
pub fn write_csv(result: &SweepResult, path: &Path) -> Result<(), SweepError> {
    let file = File::create(path).map_err(|source| SweepError::Io {
        source,
        context: format!("Could not create CSV file at {:?}", path),
    })?;
    let mut writer = csv::Writer::from_writer(file);

    writer.write_record(headers(result))?;
    for point in &result.points {
        let mut record = vec![
            field(Some(point.bias_voltage)),
            field(Some(point.current_ua)),
        ];
        record.extend(row_fields(result, &point.readings));
        writer.write_record(&record)?;
    }
    writer.flush().map_err(|source| SweepError::Io {
        source,
        context: format!("Could not flush CSV file at {:?}", path),
    })?;
    Ok(())
}

/// A result table read back from disk
#[derive(Debug, Clone, PartialEq)]
pub struct SweepTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<f64>>>,
}

impl SweepTable {
    pub fn column(&self, header: &str) -> Option<Vec<Option<f64>>> {
        let index = self.headers.iter().position(|h| h == header)?;
        Some(self.rows.iter().map(|row| row.get(index).copied().flatten()).collect())
    }
}

/// Parse a table written by [`write_csv`]; empty fields read as `None`
pub fn read_table(path: &Path) -> Result<SweepTable, SweepError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row = record
            .iter()
            .map(|value| {
                let value = value.trim();
                if value.is_empty() {
                    Ok(None)
                } else {
                    value.parse::<f64>().map(Some).map_err(|_| {
                        SweepError::Measurement(format!("'{}' in {:?} is not a number", value, path))
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(row);
    }

    Ok(SweepTable { headers, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GateWindows, ShutdownPolicy, SweepConfig};
    use crate::sweep::SweepPoint;
    use crate::types::TriggerLevel;
    use std::time::Duration;

    fn result(mode: MeasurementMode, integration_time: f64) -> SweepResult {
        SweepResult::new(SweepConfig {
            start: 0.05,
            stop: 0.06,
            step: 0.01,
            integration_time,
            mode,
            trigger_levels: vec![
                TriggerLevel::parse("-0.02").unwrap(),
                TriggerLevel::parse("-0.03").unwrap(),
            ],
            fudge_factor: 1.0,
            bin_duration: 0.1,
            settle_time: Duration::ZERO,
            series_resistance: 1.02e6,
            gating: GateWindows::default(),
            shutdown: ShutdownPolicy::default(),
        })
    }

    #[test]
    fn test_output_paths() {
        let paths = OutputPaths::from_csv("/data/PCR_Curve_Data_20260101.csv");
        assert_eq!(paths.png, PathBuf::from("/data/PCR_Curve_Data_20260101.png"));
        assert_eq!(paths.run_log, PathBuf::from("/data/PCR_Curve_Data_20260101.jsonl"));
        assert_eq!(paths.summary, PathBuf::from("/data/PCR_Curve_Data_20260101.json"));
    }

    #[test]
    fn test_filtered_headers() {
        let result = result(MeasurementMode::FilteredPcr, 1.0);
        assert_eq!(
            headers(&result),
            vec![
                "Bias_Voltage",
                "Bias_Current",
                "Counts_TL1(-0.02)",
                "Counts_TL2(-0.03)",
                "DCounts_TL1(-0.02)",
                "DCounts_TL2(-0.03)",
            ]
        );
    }

    #[test]
    fn test_dcr_headers() {
        let result = result(MeasurementMode::Dcr, 0.3);
        let headers = headers(&result);
        assert_eq!(headers.len(), 2 + 2 * 3);
        assert_eq!(headers[2], "DCR_TL1(-0.02)_Bin1");
        assert_eq!(headers[4], "DCR_TL1(-0.02)_Bin3");
        assert_eq!(headers[7], "DCR_TL2(-0.03)_Bin3");
    }

    #[test]
    fn test_filtered_table_reads_back() {
        let mut result = result(MeasurementMode::FilteredPcr, 1.0);
        result.points.push(SweepPoint {
            bias_voltage: 0.05,
            current_ua: 0.049,
            readings: vec![
                Some(Reading::Gated { signal: 1234.5, dark: 87.25 }),
                None,
            ],
        });
        result.points.push(SweepPoint::missing(0.06, 0.0588, 2));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("curve.csv");
        write_csv(&result, &path).unwrap();
        let table = read_table(&path).unwrap();

        assert_eq!(table.headers, headers(&result));
        assert_eq!(
            table.rows[0],
            vec![Some(0.05), Some(0.049), Some(1234.5), None, Some(87.25), None]
        );
        assert_eq!(
            table.rows[1],
            vec![Some(0.06), Some(0.0588), None, None, None, None]
        );
        assert_eq!(
            table.column("Counts_TL1(-0.02)"),
            Some(vec![Some(1234.5), None])
        );
    }

    #[test]
    fn test_dcr_table_pads_missing_levels() {
        let mut result = result(MeasurementMode::Dcr, 0.2);
        result.points.push(SweepPoint {
            bias_voltage: 0.05,
            current_ua: 0.049,
            readings: vec![Some(Reading::Rate(vec![10.0, 20.0])), None],
        });

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dcr.csv");
        write_csv(&result, &path).unwrap();
        let table = read_table(&path).unwrap();

        assert_eq!(
            table.rows[0],
            vec![Some(0.05), Some(0.049), Some(10.0), Some(20.0), None, None]
        );
    }

    #[test]
    fn test_raw_missing_fields_are_empty() {
        let mut result = result(MeasurementMode::FilteredPcr, 1.0);
        result.points.push(SweepPoint::missing(0.05, 0.049, 2));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.csv");
        write_csv(&result, &path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().nth(1), Some("0.05,0.049,,,,"));
    }
}
