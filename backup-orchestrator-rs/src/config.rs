use std::path::PathBuf;

use crate::backup_manager::VbrmAutoCreate;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub log_level: String,
    pub vbrm_auto_create: VbrmAutoCreate,
    pub delete_vbrm: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("./data");
        Self {
            port: 7001,
            db_path: data_dir.join("orchestrator.db"),
            data_dir,
            log_level: "info".into(),
            vbrm_auto_create: VbrmAutoCreate::All,
            delete_vbrm: false,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let data_dir = var("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir);

        Self {
            port: var("PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            db_path: data_dir.join("orchestrator.db"),
            data_dir,
            log_level: var("LOG_LEVEL").unwrap_or(defaults.log_level),
            vbrm_auto_create: var("VBRM_AUTO_CREATE")
                .and_then(|v| match v.parse() {
                    Ok(mode) => Some(mode),
                    Err(e) => {
                        tracing::warn!("{e}, using {:?}", defaults.vbrm_auto_create);
                        None
                    }
                })
                .unwrap_or(defaults.vbrm_auto_create),
            delete_vbrm: var("DELETE_VBRM")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
                .unwrap_or(defaults.delete_vbrm),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]);
        assert_eq!(config.port, 7001);
        assert_eq!(config.db_path, PathBuf::from("./data/orchestrator.db"));
        assert_eq!(config.vbrm_auto_create, VbrmAutoCreate::All);
        assert!(!config.delete_vbrm);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("PORT", "8080"),
            ("DATA_DIR", "/var/lib/bro"),
            ("VBRM_AUTO_CREATE", "default"),
            ("DELETE_VBRM", "TRUE"),
        ]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.db_path, PathBuf::from("/var/lib/bro/orchestrator.db"));
        assert_eq!(config.vbrm_auto_create, VbrmAutoCreate::Default);
        assert!(config.delete_vbrm);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config(&[("PORT", "abc"), ("VBRM_AUTO_CREATE", "sometimes")]);
        assert_eq!(config.port, 7001);
        assert_eq!(config.vbrm_auto_create, VbrmAutoCreate::All);
    }
}
