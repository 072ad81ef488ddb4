use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::{models::ServerConfig, validation::ServerConfigValidator};

/// Environment variables with this prefix override file values, e.g.
/// `SWITCHYARD_ROUTING__BUILD_ID=abc`.
pub const ENV_PREFIX: &str = "SWITCHYARD";

/// Load a configuration file and reject it unless it validates, including
/// a trial compile of the route table.
pub async fn load_config(config_path: &str) -> Result<ServerConfig> {
    let config = load_config_sync(config_path)?;
    ServerConfigValidator::validate(&config)
        .with_context(|| format!("Invalid configuration in {config_path}"))?;
    Ok(config)
}

/// Parse a configuration file (YAML, JSON, TOML or INI by extension) plus
/// environment overrides. Does not validate.
pub fn load_config_sync(config_path: &str) -> Result<ServerConfig> {
    let config_path = Path::new(config_path);

    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Yaml,
    };
    let path_str = config_path
        .to_str()
        .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?;

    let settings = Config::builder()
        .add_source(File::new(path_str, format))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })
}

/// Parse without validating, so `validate` can report every problem itself.
pub async fn load_config_unchecked(config_path: &str) -> Result<ServerConfig> {
    load_config_sync(config_path)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[tokio::test]
    async fn test_load_yaml_config() {
        let yaml_content = r#"
listen_addr: "127.0.0.1:3000"
pages: ["/about", "/blog/[slug]"]
routing:
  base_path: "/docs"
  redirects:
    - source: "/old"
      destination: "/new"
      permanent: true
  rewrites:
    fallback:
      - source: "/:path*"
        destination: "https://legacy.example.com/:path*"
  dynamic_routes:
    - page: "/blog/[slug]"
      pattern: "/blog/:slug"
  i18n:
    locales: ["en", "fr"]
    default_locale: "en"
"#;

        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:3000");
        assert_eq!(config.pages.len(), 2);
        assert_eq!(config.routing.base_path, "/docs");
        assert_eq!(config.routing.redirects[0].status(), 308);
        assert_eq!(config.routing.rewrites.fallback.len(), 1);
        assert!(config.routing.i18n.as_ref().unwrap().locale_detection);
        assert_eq!(config.routing.internal_prefix, "/_sw");
    }

    #[tokio::test]
    async fn test_load_json_config() {
        let json_content = r#"
{
  "listen_addr": "127.0.0.1:3000",
  "middleware_worker": { "endpoint": "http://127.0.0.1:9001" },
  "routing": {
    "middleware": [{ "source": "/account/:path*" }],
    "headers": [
      {
        "source": "/:path*",
        "headers": [{ "key": "x-frame-options", "value": "DENY" }],
        "has": [{ "type": "header", "key": "x-debug" }]
      }
    ]
  }
}
"#;

        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, "{}", json_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        let worker = config.middleware_worker.unwrap();
        assert_eq!(worker.ready_path, "/_sw/ready");
        assert_eq!(worker.timeout, "10s");
        assert_eq!(config.routing.middleware.len(), 1);
        assert_eq!(config.routing.headers[0].has.len(), 1);
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_rules() {
        let yaml_content = r#"
listen_addr: "127.0.0.1:3000"
routing:
  redirects:
    - source: "no-leading-slash"
      destination: "/new"
"#;

        let mut temp_file = NamedTempFile::with_suffix(".yml").unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();
        let path = temp_file.path().to_str().unwrap();

        assert!(load_config_unchecked(path).await.is_ok());
        assert!(load_config(path).await.is_err());
    }
}
