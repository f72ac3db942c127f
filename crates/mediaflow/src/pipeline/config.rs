use std::path::{Path, PathBuf};

use crate::config::Config;

pub struct PipelineConfig {
    pub metadata_file_name: String,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            metadata_file_name: config.metadata_file_name.clone(),
        }
    }

    /// Location of the metadata snapshot for a job writing into `output_directory`.
    pub fn metadata_path(&self, output_directory: &Path) -> PathBuf {
        output_directory.join(&self.metadata_file_name)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
