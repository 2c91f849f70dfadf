use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

const APP_DIR: &str = "kitchen-pa";

fn platform_app_root() -> PathBuf {
    if let Some(project_dirs) = ProjectDirs::from("", "", APP_DIR) {
        return project_dirs.data_dir().to_path_buf();
    }

    if let Some(base_dirs) = BaseDirs::new() {
        return base_dirs.data_local_dir().join(APP_DIR);
    }

    std::env::temp_dir().join(APP_DIR)
}

/// Root data directory. `KITCHEN_PA_HOME` wins over the platform default.
pub fn app_root() -> PathBuf {
    std::env::var("KITCHEN_PA_HOME")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(platform_app_root)
}

pub fn default_db_path() -> String {
    app_root()
        .join("data")
        .join("kitchen-pa.db")
        .to_string_lossy()
        .to_string()
}

pub fn default_config_path() -> String {
    app_root()
        .join("config.json")
        .to_string_lossy()
        .to_string()
}
