//! Directory-per-class dataset loader
//!
//! Expects one sub-directory per label under the root, each holding image
//! files:
//!
//! ```text
//! root/
//!   airplanes/image_0001.jpg
//!   airplanes/image_0002.jpg
//!   Faces/image_0001.jpg
//! ```
//!
//! Records get the id `<label>/<file name>` and are decoded on first use.

use super::{GroupedDataset, Record};
use crate::core::{PhowError, Result};
use image::ImageFormat;
use log::{debug, info};
use std::fs;
use std::path::Path;

impl GroupedDataset {
    /// Index every decodable image under `root`, one group per sub-directory
    pub fn from_directory<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        let entries = fs::read_dir(root).map_err(|e| {
            PhowError::Dataset(format!("cannot read dataset root {}: {e}", root.display()))
        })?;

        let mut dataset = GroupedDataset::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let Some(label) = visible_name(&path) else {
                continue;
            };
            if !path.is_dir() {
                debug!("Skipping non-directory {}", path.display());
                continue;
            }

            for file in fs::read_dir(&path)? {
                let file = file?.path();
                let Some(name) = visible_name(&file) else {
                    continue;
                };
                if file.is_file() && ImageFormat::from_path(&file).is_ok() {
                    dataset.insert(label.clone(), Record::from_file(format!("{label}/{name}"), file));
                }
            }
        }

        if dataset.is_empty() {
            return Err(PhowError::Dataset(format!(
                "no images found under {}",
                root.display()
            )));
        }
        info!(
            "Found {} images in {} groups under {}",
            dataset.len(),
            dataset.num_groups(),
            root.display()
        );
        Ok(dataset)
    }
}

/// File name as UTF-8, skipping hidden entries
fn visible_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    if name.starts_with('.') {
        None
    } else {
        Some(name.to_string())
    }
}
