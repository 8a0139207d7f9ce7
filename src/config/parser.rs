use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and validates a configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to read, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Logged at startup so runs can be matched to the configuration that drove them.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(hash_content(&content))
}

/// Loads a configuration along with the hash of the exact text that was parsed
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    Ok((config, hash_content(&content)))
}

fn hash_content(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Scheduling;
    use crate::state::CrawlMode;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let config_content = r#"
[crawler]
start-id = 1
end-id = 5000
max-requests-per-second = 30
mode = "missing"
consecutive-invalid-threshold = 500

[api]
base-url = "https://api.example.com/3/movie"
language = "en-US"

[output]
database-path = "./test.db"
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.crawler.start_id, 1);
        assert_eq!(config.crawler.end_id, 5000);
        assert_eq!(config.crawler.mode, CrawlMode::Missing);
        assert_eq!(config.api.language.as_deref(), Some("en-US"));
    }

    #[test]
    fn test_defaults_applied() {
        let config_content = r#"
[crawler]
start-id = 10
end-id = 20
max-requests-per-second = 5
mode = "fresh"
consecutive-invalid-threshold = 3

[api]
base-url = "https://api.example.com/items"

[output]
database-path = "./test.db"
"#;

        let config = parse_config(config_content).unwrap();

        assert_eq!(config.crawler.refresh_interval, 100);
        assert_eq!(config.crawler.throttle_backoff_ms, 30_000);
        assert_eq!(config.crawler.scheduling, Scheduling::Sequential);
        assert!(config.crawler.reset_on_transient_error);
        assert_eq!(config.api.token_env, "API_TOKEN");
        assert_eq!(config.api.request_timeout_secs, 30);
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let result = parse_config("this is not valid TOML {{{");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_with_unknown_mode() {
        let config_content = r#"
[crawler]
start-id = 1
end-id = 10
max-requests-per-second = 5
mode = "everything"
consecutive-invalid-threshold = 3

[api]
base-url = "https://api.example.com/items"

[output]
database-path = "./test.db"
"#;

        assert!(matches!(
            parse_config(config_content),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let config_content = r#"
[crawler]
start-id = 50
end-id = 10
max-requests-per-second = 5
mode = "fresh"
consecutive-invalid-threshold = 3

[api]
base-url = "https://api.example.com/items"

[output]
database-path = "./test.db"
"#;

        let result = parse_config(config_content);
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        assert_ne!(hash_content("content 1"), hash_content("content 2"));
    }

    #[test]
    fn test_load_with_hash_matches_file_hash() {
        let file = create_temp_config(
            r#"
[crawler]
start-id = 1
end-id = 2
max-requests-per-second = 1
mode = "fresh"
consecutive-invalid-threshold = 1

[api]
base-url = "http://localhost:8080/items"

[output]
database-path = "./test.db"
"#,
        );

        let (config, hash) = load_config_with_hash(file.path()).unwrap();
        assert_eq!(config.crawler.end_id, 2);
        assert_eq!(hash, compute_config_hash(file.path()).unwrap());
    }
}
