use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub db_path: PathBuf,
    /// Uploaded transcript files live here, addressed by their storage path.
    pub bucket_dir: PathBuf,
    pub token_path: PathBuf,
}

impl AppPaths {
    pub fn new() -> Self {
        let data_dir = discover_data_dir();
        let log_dir = data_dir.join("logs");
        let db_path = data_dir.join("insight.db");
        let bucket_dir = data_dir.join("bucket");
        let token_path = data_dir.join(".session_token");

        for dir in [&data_dir, &log_dir, &bucket_dir] {
            let _ = fs::create_dir_all(dir);
        }

        AppPaths {
            data_dir,
            log_dir,
            db_path,
            bucket_dir,
            token_path,
        }
    }

    #[cfg(test)]
    pub fn for_test(root: &std::path::Path) -> Self {
        let data_dir = root.to_path_buf();
        let log_dir = data_dir.join("logs");
        let db_path = data_dir.join("insight.db");
        let bucket_dir = data_dir.join("bucket");
        let token_path = data_dir.join(".session_token");
        for dir in [&data_dir, &log_dir, &bucket_dir] {
            let _ = fs::create_dir_all(dir);
        }
        AppPaths {
            data_dir,
            log_dir,
            db_path,
            bucket_dir,
            token_path,
        }
    }
}

fn discover_data_dir() -> PathBuf {
    if let Ok(dir) = env::var("INSIGHT_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if cfg!(target_os = "windows") {
        let base = env::var("LOCALAPPDATA")
            .unwrap_or_else(|_| env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string()));
        return PathBuf::from(base).join("Insight");
    }

    if cfg!(target_os = "macos") {
        return home_dir()
            .join("Library")
            .join("Application Support")
            .join("Insight");
    }

    let xdg = env::var("XDG_DATA_HOME").unwrap_or_else(|_| {
        home_dir()
            .join(".local/share")
            .to_string_lossy()
            .to_string()
    });
    PathBuf::from(xdg).join("insight")
}

fn home_dir() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}
