//! Calibration result recording.
//!
//! Scan orchestrators append one row per operating point into a named,
//! numbered dataset. The [`ResultRecorder`] trait is the boundary to the
//! actual results store; [`DirRecorder`] writes plain CSV files with a JSON
//! parameter sidecar into a session directory, and [`MemoryRecorder`] keeps
//! everything in memory for tests and dry runs.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Number identifying a dataset within a session.
pub type DatasetId = u32;

/// Column metadata for a dataset.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Column {
    /// Quantity name, e.g. "Frequency".
    pub name: String,
    /// Legend distinguishing columns of the same quantity, e.g. "A".
    pub legend: String,
    /// Unit, e.g. "GHz".
    pub unit: String,
}

impl Column {
    /// Creates a column description.
    pub fn new(name: &str, legend: &str, unit: &str) -> Column {
        Column {
            name: name.to_string(),
            legend: legend.to_string(),
            unit: unit.to_string(),
        }
    }

    fn header(&self) -> String {
        let mut header = self.name.clone();
        if !self.legend.is_empty() {
            header.push(' ');
            header.push_str(&self.legend);
        }
        if !self.unit.is_empty() {
            header.push_str(&format!(" ({})", self.unit));
        }
        header
    }
}

/// Destination for calibration results.
pub trait ResultRecorder {
    /// Creates a new numbered dataset with the given name and columns.
    ///
    /// Session storage creation is idempotent; dataset numbers within a
    /// session are ascending.
    async fn create_dataset(
        &mut self,
        name: &str,
        independents: &[Column],
        dependents: &[Column],
    ) -> Result<DatasetId>;

    /// Attaches a named parameter to a dataset.
    async fn add_parameter(
        &mut self,
        dataset: DatasetId,
        name: &str,
        value: serde_json::Value,
    ) -> Result<()>;

    /// Appends one row of values to a dataset.
    async fn append(&mut self, dataset: DatasetId, row: &[f64]) -> Result<()>;
}

/// Recorder writing datasets into a session directory.
///
/// Each dataset becomes `NNNNN - name.csv` plus `NNNNN - name.json` holding
/// the creation time and attached parameters.
#[derive(Debug)]
pub struct DirRecorder {
    session_dir: PathBuf,
    paths: HashMap<DatasetId, PathBuf>,
}

impl DirRecorder {
    /// Opens a session directory, creating it if needed.
    pub async fn new(session_dir: impl AsRef<Path>) -> Result<DirRecorder> {
        let session_dir = session_dir.as_ref().to_path_buf();
        fs::create_dir_all(&session_dir)
            .await
            .with_context(|| format!("failed to create session directory {session_dir:?}"))?;
        Ok(DirRecorder {
            session_dir,
            paths: HashMap::new(),
        })
    }

    async fn next_number(&self) -> Result<DatasetId> {
        let mut max = 0;
        let mut entries = fs::read_dir(&self.session_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(number) = name.split(" - ").next().and_then(|n| n.parse::<u32>().ok()) {
                max = max.max(number);
            }
        }
        Ok(max + 1)
    }

    fn csv_path(&self, dataset: DatasetId) -> Result<&PathBuf> {
        self.paths
            .get(&dataset)
            .ok_or_else(|| anyhow::anyhow!("unknown dataset {dataset}"))
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        path.with_extension("json")
    }
}

impl ResultRecorder for DirRecorder {
    async fn create_dataset(
        &mut self,
        name: &str,
        independents: &[Column],
        dependents: &[Column],
    ) -> Result<DatasetId> {
        let number = self.next_number().await?;
        let path = self.session_dir.join(format!("{number:05} - {name}.csv"));
        let header = independents
            .iter()
            .chain(dependents.iter())
            .map(Column::header)
            .collect::<Vec<_>>()
            .join(", ");
        fs::write(&path, format!("{header}\n")).await?;
        let sidecar = serde_json::json!({
            "name": name,
            "created": chrono::Utc::now().to_rfc3339(),
            "parameters": {},
        });
        fs::write(
            Self::sidecar_path(&path),
            serde_json::to_string_pretty(&sidecar)?,
        )
        .await?;
        self.paths.insert(number, path);
        tracing::info!(number, name, "created dataset");
        Ok(number)
    }

    async fn add_parameter(
        &mut self,
        dataset: DatasetId,
        name: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        let sidecar = Self::sidecar_path(self.csv_path(dataset)?);
        let mut contents: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&sidecar).await?)?;
        contents["parameters"][name] = value;
        fs::write(&sidecar, serde_json::to_string_pretty(&contents)?).await?;
        Ok(())
    }

    async fn append(&mut self, dataset: DatasetId, row: &[f64]) -> Result<()> {
        let line = row
            .iter()
            .map(|x| x.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(self.csv_path(dataset)?)
            .await?;
        file.write_all(format!("{line}\n").as_bytes()).await?;
        Ok(())
    }
}

/// In-memory recorder.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    datasets: Vec<MemoryDataset>,
}

/// One dataset held by a [`MemoryRecorder`].
#[derive(Debug)]
pub struct MemoryDataset {
    /// Dataset name.
    pub name: String,
    /// Independent-variable columns.
    pub independents: Vec<Column>,
    /// Dependent-variable columns.
    pub dependents: Vec<Column>,
    /// Attached parameters.
    pub parameters: serde_json::Map<String, serde_json::Value>,
    /// Appended rows.
    pub rows: Vec<Vec<f64>>,
}

impl MemoryRecorder {
    /// Creates an empty recorder.
    pub fn new() -> MemoryRecorder {
        MemoryRecorder::default()
    }

    /// Returns a dataset by number.
    pub fn dataset(&self, dataset: DatasetId) -> Option<&MemoryDataset> {
        self.datasets.get(dataset.checked_sub(1)? as usize)
    }
}

impl ResultRecorder for MemoryRecorder {
    async fn create_dataset(
        &mut self,
        name: &str,
        independents: &[Column],
        dependents: &[Column],
    ) -> Result<DatasetId> {
        self.datasets.push(MemoryDataset {
            name: name.to_string(),
            independents: independents.to_vec(),
            dependents: dependents.to_vec(),
            parameters: serde_json::Map::new(),
            rows: Vec::new(),
        });
        Ok(self.datasets.len() as DatasetId)
    }

    async fn add_parameter(
        &mut self,
        dataset: DatasetId,
        name: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        let dataset = self
            .datasets
            .get_mut(dataset.checked_sub(1).unwrap_or(u32::MAX) as usize)
            .ok_or_else(|| anyhow::anyhow!("unknown dataset {dataset}"))?;
        dataset.parameters.insert(name.to_string(), value);
        Ok(())
    }

    async fn append(&mut self, dataset: DatasetId, row: &[f64]) -> Result<()> {
        let dataset = self
            .datasets
            .get_mut(dataset.checked_sub(1).unwrap_or(u32::MAX) as usize)
            .ok_or_else(|| anyhow::anyhow!("unknown dataset {dataset}"))?;
        dataset.rows.push(row.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn memory_recorder() {
        let mut recorder = MemoryRecorder::new();
        let id = recorder
            .create_dataset(
                "zeros",
                &[Column::new("Frequency", "", "GHz")],
                &[
                    Column::new("DAC zero", "A", "clics"),
                    Column::new("DAC zero", "B", "clics"),
                ],
            )
            .await
            .unwrap();
        recorder
            .add_parameter(id, "amplitude", serde_json::json!(2.7))
            .await
            .unwrap();
        recorder.append(id, &[4.0, 37.0, -12.0]).await.unwrap();
        let dataset = recorder.dataset(id).unwrap();
        assert_eq!(dataset.rows, vec![vec![4.0, 37.0, -12.0]]);
        assert_eq!(dataset.parameters["amplitude"], serde_json::json!(2.7));
        assert!(recorder.dataset(id + 1).is_none());
    }

    #[tokio::test]
    async fn dir_recorder_numbers_ascend() {
        let dir = std::env::temp_dir().join(format!("iqcal-test-{}", std::process::id()));
        let _ = tokio::fs::remove_dir_all(&dir).await;
        let mut recorder = DirRecorder::new(&dir).await.unwrap();
        let cols = [Column::new("Time", "", "ns")];
        let first = recorder.create_dataset("pulse", &cols, &cols).await.unwrap();
        let second = recorder.create_dataset("pulse", &cols, &cols).await.unwrap();
        assert_eq!(second, first + 1);
        recorder.append(second, &[1.0, 2.0]).await.unwrap();
        recorder
            .add_parameter(second, "carrier", serde_json::json!(4.0))
            .await
            .unwrap();
        let csv = tokio::fs::read_to_string(dir.join(format!("{second:05} - pulse.csv")))
            .await
            .unwrap();
        assert!(csv.ends_with("1, 2\n"));
        let sidecar: serde_json::Value = serde_json::from_str(
            &tokio::fs::read_to_string(dir.join(format!("{second:05} - pulse.json")))
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(sidecar["parameters"]["carrier"], serde_json::json!(4.0));
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
