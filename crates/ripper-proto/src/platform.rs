use std::path::PathBuf;

pub const DEFAULT_CONTROL_PORT: u16 = 9877;

pub fn control_address(bind_address: &str, port: u16) -> String {
    format!("{}:{}", bind_address, port)
}

pub fn default_control_address() -> String {
    control_address("127.0.0.1", DEFAULT_CONTROL_PORT)
}

pub fn data_dir() -> PathBuf {
    // XDG-style layout on macOS too, instead of Application Support
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("ripper")
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ripper")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("ripper")
    }

    #[cfg(windows)]
    {
        // Portable install: config.toml beside the executable wins
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                if exe_dir.join("config.toml").exists() {
                    return exe_dir.to_path_buf();
                }
            }
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ripper")
    }
}

pub fn log_path() -> PathBuf {
    data_dir().join("ripperd.log")
}
