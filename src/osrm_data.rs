//! Prepares an OSRM dataset (Geofabrik extract + MLD preprocessing) so a
//! local `osrm-routed` can serve the dispatch engine in integration runs.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::info;

const OSRM_IMAGE: &str = "osrm/osrm-backend";

#[derive(Debug, Clone)]
pub struct GeofabrikRegion {
    /// Geofabrik region path, e.g. "asia/gcc-states".
    pub path: String,
}

impl GeofabrikRegion {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().filter(|name| !name.is_empty()).unwrap_or("region")
    }

    pub fn url(&self) -> String {
        format!("https://download.geofabrik.de/{}-latest.osm.pbf", self.path)
    }
}

#[derive(Debug, Clone)]
pub struct OsrmDatasetConfig {
    pub region: GeofabrikRegion,
    pub data_root: PathBuf,
    /// Routing profile script inside the OSRM image.
    pub profile: String,
}

impl OsrmDatasetConfig {
    pub fn new(region: GeofabrikRegion, data_root: impl Into<PathBuf>) -> Self {
        Self {
            region,
            data_root: data_root.into(),
            profile: "/opt/car.lua".to_string(),
        }
    }
}

/// Paths of a dataset ready for `osrm-routed --algorithm mld`.
#[derive(Debug, Clone)]
pub struct OsrmDataset {
    pub data_dir: PathBuf,
    pub osrm_base: PathBuf,
    pub pbf_path: PathBuf,
}

#[derive(Debug, Error)]
pub enum OsrmDataError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("download failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("osrm preprocessing failed: {0}")]
    ProcessFailure(String),
}

impl OsrmDataset {
    /// Downloads and preprocesses whatever is missing. Existing artifacts are
    /// reused.
    pub fn ensure(config: &OsrmDatasetConfig) -> Result<Self, OsrmDataError> {
        let region = config.region.name();
        let data_root = if config.data_root.is_absolute() {
            config.data_root.clone()
        } else {
            std::env::current_dir()?.join(&config.data_root)
        };
        let data_dir = data_root.join(region);
        fs::create_dir_all(&data_dir)?;

        let pbf_path = data_dir.join(format!("{}-latest.osm.pbf", region));
        if !pbf_path.exists() {
            info!(url = %config.region.url(), "downloading extract");
            download(&config.region.url(), &pbf_path)?;
        }

        let osrm_base = data_dir.join(format!("{}-latest.osrm", region));
        if !osrm_base.exists() {
            run_docker(
                &["osrm-extract", "-p", &config.profile, &container_path(&pbf_path)],
                &data_dir,
            )?;
        }

        if !mld_ready(&osrm_base) {
            let base = container_path(&osrm_base);
            run_docker(&["osrm-partition", &base], &data_dir)?;
            run_docker(&["osrm-customize", &base], &data_dir)?;
        }

        Ok(Self {
            data_dir,
            osrm_base,
            pbf_path,
        })
    }

    /// Dataset path as seen from inside a container with `data_dir` at `/data`.
    pub fn container_osrm_path(&self) -> String {
        container_path(&self.osrm_base)
    }
}

fn download(url: &str, dest: &Path) -> Result<(), OsrmDataError> {
    let response = reqwest::blocking::get(url)?.error_for_status()?;
    let tmp_path = dest.with_extension("tmp");
    let mut writer = BufWriter::new(File::create(&tmp_path)?);
    writer.write_all(&response.bytes()?)?;
    writer.flush()?;
    fs::rename(tmp_path, dest)?;
    Ok(())
}

fn mld_ready(osrm_base: &Path) -> bool {
    osrm_base.exists()
        && ["osrm.partition", "osrm.mldgr", "osrm.cells"]
            .iter()
            .all(|ext| osrm_base.with_extension(ext).exists())
}

fn run_docker(args: &[&str], data_dir: &Path) -> Result<(), OsrmDataError> {
    info!(step = args.first().copied().unwrap_or_default(), "running osrm preprocessing");
    let status = Command::new("docker")
        .args(["run", "--rm", "-t", "-v"])
        .arg(format!("{}:/data", data_dir.display()))
        .arg(OSRM_IMAGE)
        .args(args)
        .status()?;

    if status.success() {
        Ok(())
    } else {
        Err(OsrmDataError::ProcessFailure(format!("docker exited with {}", status)))
    }
}

fn container_path(path: &Path) -> String {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    format!("/data/{}", name)
}
