use derive_yaml::FromYaml;
use crate::config::parser::FromYaml; // Import trait

// --- Constants ---
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9113;
pub const DEFAULT_REACTORS: usize = 2;
pub const DEFAULT_WRITERS: usize = 4;
pub const DEFAULT_QUEUE_DEPTH: usize = 4;
pub const DEFAULT_MAX_PACK_BODY: u64 = 128 * 1024 * 1024;
pub const DEFAULT_ALLOWED_ROOT: &str = "/data";
pub const DEFAULT_PRESET: &str = "safe";
pub const DEFAULT_LOG_DIR: &str = "/data/ftxd/logs";
pub const DEFAULT_PID_FILE: &str = "/data/ftxd/ftxd.pid";

#[derive(Debug, Clone, FromYaml)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, FromYaml)]
pub struct ExtractionConfig {
    pub preset: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            preset: DEFAULT_PRESET.to_string(),
        }
    }
}

#[derive(Debug, Clone, FromYaml)]
pub struct AppConfig {
    pub listen: ListenConfig,
    pub reactors: usize,
    pub writers: usize,
    pub queue_depth: usize,
    pub max_pack_body: u64,
    pub allowed_roots: Vec<String>,
    pub extraction: ExtractionConfig,
    pub log_dir: Option<String>,
    pub pid_file: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            reactors: DEFAULT_REACTORS,
            writers: DEFAULT_WRITERS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            max_pack_body: DEFAULT_MAX_PACK_BODY,
            allowed_roots: vec![DEFAULT_ALLOWED_ROOT.to_string()],
            extraction: ExtractionConfig::default(),
            log_dir: Some(DEFAULT_LOG_DIR.to_string()),
            pid_file: Some(DEFAULT_PID_FILE.to_string()),
        }
    }
}
