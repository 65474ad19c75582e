use crate::config::types::AppConfig;
use std::fmt;

impl fmt::Display for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\x1b[1;36m🌐 FTXD CONFIGURATION\x1b[0m")?;
        writeln!(f, "├── listen: {}:{}", self.listen.host, self.listen.port)?;
        writeln!(f, "├── reactors: {}", self.reactors)?;
        writeln!(f, "├── writers: {}", self.writers)?;
        writeln!(f, "├── queue_depth: {}", self.queue_depth)?;
        writeln!(f, "├── max_pack_body: {} bytes", self.max_pack_body)?;
        writeln!(f, "├── allowed_roots:")?;
        for (i, root) in self.allowed_roots.iter().enumerate() {
            let last = i + 1 == self.allowed_roots.len();
            writeln!(f, "│     {} {}", if last { "└──" } else { "├──" }, root)?;
        }
        writeln!(f, "├── extraction.preset: {}", self.extraction.preset)?;
        writeln!(
            f,
            "├── log_dir: {}",
            self.log_dir.as_deref().unwrap_or("(stdout only)")
        )?;
        writeln!(
            f,
            "└── pid_file: {}",
            self.pid_file.as_deref().unwrap_or("(none)")
        )
    }
}

pub fn display_config(config: &AppConfig) {
    println!("{}", config);
}
