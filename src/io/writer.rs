//! Console and CSV output of training statistics.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::loss::Stats;

/// Name of the statistics table inside the save directory.
pub const STATS_FILE: &str = "train_stats.csv";

const COLUMNS: [&str; 10] = [
    "step",
    "pmove",
    "energy",
    "energy_imag",
    "potential",
    "kinetic",
    "variance",
    "Lz",
    "Lz_square",
    "L_square",
];

/// One row of statistics.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepRecord {
    pub step: usize,
    pub pmove: f64,
    pub stats: Stats,
}

impl StepRecord {
    pub fn new(step: usize, pmove: f64, stats: Stats) -> Self {
        Self { step, pmove, stats }
    }

    fn values(&self) -> [f64; 10] {
        let s = &self.stats;
        [
            self.step as f64,
            self.pmove,
            s.energy.re,
            s.energy.im,
            s.potential,
            s.kinetic.re,
            s.variance,
            s.angular_momentum_z,
            s.angular_momentum_z_square,
            s.angular_momentum_square,
        ]
    }
}

/// Receives one record per completed training step.
pub trait StatsWriter {
    fn log(&mut self, record: &StepRecord) -> Result<()>;

    /// Push buffered rows to durable storage.
    fn force_flush(&mut self) -> Result<()>;
}

/// Prints a compact line through `log` and appends full rows to a CSV file.
pub struct TableWriter {
    hidden: Vec<&'static str>,
    csv: Option<BufWriter<File>>,
}

impl TableWriter {
    /// Console-only writer.
    pub fn console() -> Self {
        Self {
            hidden: Vec::new(),
            csv: None,
        }
    }

    /// Writer that also appends to `dir/train_stats.csv`, writing the header
    /// only when the file is new or empty.
    pub fn create(dir: Option<&Path>) -> Result<Self> {
        let Some(dir) = dir else {
            return Ok(Self::console());
        };
        std::fs::create_dir_all(dir)?;
        let path = dir.join(STATS_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let fresh = file.metadata()?.len() == 0;
        let mut csv = BufWriter::new(file);
        if fresh {
            writeln!(csv, "{}", COLUMNS.join(","))?;
        }
        Ok(Self {
            hidden: Vec::new(),
            csv: Some(csv),
        })
    }

    /// Leave these columns out of the console line.
    pub fn hide(mut self, columns: &[&'static str]) -> Self {
        self.hidden.extend_from_slice(columns);
        self
    }

    fn console_line(&self, record: &StepRecord) -> String {
        COLUMNS
            .iter()
            .zip(record.values())
            .filter(|(name, _)| !self.hidden.contains(*name))
            .map(|(name, value)| match *name {
                "step" => format!("{name}={}", record.step),
                _ => format!("{name}={value:.4}"),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl StatsWriter for TableWriter {
    fn log(&mut self, record: &StepRecord) -> Result<()> {
        log::info!("{}", self.console_line(record));
        if let Some(csv) = self.csv.as_mut() {
            let mut row = vec![record.step.to_string()];
            row.extend(record.values()[1..].iter().map(|v| v.to_string()));
            writeln!(csv, "{}", row.join(","))?;
        }
        Ok(())
    }

    fn force_flush(&mut self) -> Result<()> {
        if let Some(csv) = self.csv.as_mut() {
            csv.flush()?;
            csv.get_ref().sync_data()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    fn record(step: usize) -> StepRecord {
        StepRecord::new(
            step,
            0.5,
            Stats {
                energy: Complex64::new(1.25, 0.0),
                potential: 2.0,
                kinetic: Complex64::new(-0.75, 0.0),
                variance: 0.1,
                angular_momentum_z: 0.0,
                angular_momentum_z_square: 0.5,
                angular_momentum_square: 1.0,
            },
        )
    }

    #[test]
    fn test_csv_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut writer = TableWriter::create(Some(dir.path())).unwrap();
            writer.log(&record(0)).unwrap();
            writer.force_flush().unwrap();
        }
        {
            let mut writer = TableWriter::create(Some(dir.path())).unwrap();
            writer.log(&record(1)).unwrap();
            writer.force_flush().unwrap();
        }
        let text = std::fs::read_to_string(dir.path().join(STATS_FILE)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], COLUMNS.join(","));
        assert!(lines[1].starts_with("0,0.5,1.25,0,"));
        assert!(lines[2].starts_with("1,"));
    }

    #[test]
    fn test_hidden_columns_left_out_of_console() {
        let writer = TableWriter::console().hide(&["kinetic", "potential", "Lz_square"]);
        let line = writer.console_line(&record(3));
        assert!(line.starts_with("step=3 pmove=0.5000 energy=1.2500"));
        assert!(!line.contains("kinetic"));
        assert!(!line.contains("potential"));
        assert!(!line.contains("Lz_square"));
        assert!(line.contains("L_square=1.0000"));
    }
}
