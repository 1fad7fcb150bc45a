use crate::analyzers::AnalyzerReport;
use crate::error::VelaError;
use std::io::Write;
use std::path::Path;

/// CSV writer for engine output rows.
///
/// Columns are the union of every feed's OHLCV, each registered
/// indicator's output lines and each observer's lines; analyzer summaries
/// are appended as a trailing `analyzer,key,value` section after the run.
pub struct CsvWriter {
    out: csv::Writer<Box<dyn Write + Send>>,
    columns: usize,
}

impl CsvWriter {
    pub fn to_path(path: impl AsRef<Path>) -> Result<Self, VelaError> {
        let file = std::fs::File::create(path)?;
        Ok(Self::from_writer(Box::new(file)))
    }

    pub fn from_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: csv::Writer::from_writer(out),
            columns: 0,
        }
    }

    pub fn headers(&mut self, columns: &[String]) -> Result<(), VelaError> {
        self.columns = columns.len();
        self.out.write_record(columns)?;
        Ok(())
    }

    pub fn row(&mut self, values: &[String]) -> Result<(), VelaError> {
        debug_assert_eq!(values.len(), self.columns);
        self.out.write_record(values)?;
        Ok(())
    }

    /// Append the end-of-run analyzer section and flush.
    pub fn finalize(&mut self, reports: &[AnalyzerReport]) -> Result<(), VelaError> {
        if !reports.is_empty() {
            self.out
                .write_record(["analyzer", "key", "value"].iter())?;
            for report in reports {
                for (key, value) in &report.values {
                    self.out.write_record(
                        [
                            report.name.to_string(),
                            key.to_string(),
                            value.to_string(),
                        ]
                        .iter(),
                    )?;
                }
            }
        }
        self.out.flush()?;
        Ok(())
    }
}

/// Render a float for CSV output: empty for NaN, plain otherwise.
pub fn cell(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_and_summary_round_trip_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");

        {
            let mut writer = CsvWriter::to_path(&path).unwrap();
            writer
                .headers(&["datetime".into(), "close".into()])
                .unwrap();
            writer
                .row(&["2024-01-02".into(), cell(101.5)])
                .unwrap();
            writer.row(&["2024-01-03".into(), cell(f64::NAN)]).unwrap();

            let mut report = AnalyzerReport::new("trades");
            report.push("closed", 1);
            writer.finalize(&[report]).unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "datetime,close");
        assert_eq!(lines[1], "2024-01-02,101.5");
        assert_eq!(lines[2], "2024-01-03,");
        assert_eq!(lines[3], "analyzer,key,value");
        assert_eq!(lines[4], "trades,closed,1");
    }
}
