//! Module repository - a plain HTTP directory of module files
//!
//! Files are fetched from `<raw-url>/<file>`. The directory may also publish
//! `modules_db.json`, an index searched by `mfind`:
//!
//! ```json
//! {"weather": {"version": "1.1", "description": "Forecasts",
//!              "keywords": ["forecast"], "commands": ["weather"]}}
//! ```

use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::application::errors::RepositoryError;
use crate::infrastructure::config::RepositoryConfig;

pub const INDEX_FILE: &str = "modules_db.json";

/// One module as described by the repository index
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IndexEntry {
    pub version: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub commands: Vec<String>,
}

/// The repository index, keyed by module name
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct ModuleIndex {
    modules: BTreeMap<String, IndexEntry>,
}

impl ModuleIndex {
    pub fn parse(json: &str) -> Result<Self, RepositoryError> {
        serde_json::from_str(json).map_err(|e| RepositoryError::Parse(e.to_string()))
    }

    /// Modules whose name or description contains `query`, or with a keyword
    /// or command equal to it. Case-insensitive, sorted by name.
    pub fn search(&self, query: &str) -> Vec<(&str, &IndexEntry)> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }
        let equals = |items: &[String]| items.iter().any(|i| i.to_lowercase() == query);

        self.modules
            .iter()
            .filter(|(name, entry)| {
                name.to_lowercase().contains(&query)
                    || entry.description.to_lowercase().contains(&query)
                    || equals(&entry.keywords)
                    || equals(&entry.commands)
            })
            .map(|(name, entry)| (name.as_str(), entry))
            .collect()
    }
}

pub struct ModuleRepository {
    client: Client,
    base_url: Option<String>,
    default_extension: String,
}

impl ModuleRepository {
    pub fn new(config: &RepositoryConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config
                .raw_url
                .as_deref()
                .map(|url| url.trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
            default_extension: config.default_extension.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    /// File name for a requested module, adding the default extension when
    /// none was given
    pub fn file_for(&self, requested: &str) -> String {
        if requested.contains('.') {
            requested.to_string()
        } else {
            format!("{}.{}", requested, self.default_extension)
        }
    }

    fn url(&self, file: &str) -> Result<String, RepositoryError> {
        let base = self.base_url.as_ref().ok_or(RepositoryError::NotConfigured)?;
        Ok(format!("{}/{}", base, file))
    }

    /// Download `file` from the repository
    pub async fn fetch(&self, file: &str) -> Result<Vec<u8>, RepositoryError> {
        let url = self.url(file)?;
        tracing::debug!("Fetching {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RepositoryError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RepositoryError::NotFound(format!("{} ({})", file, response.status())));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| RepositoryError::Network(e.to_string()))?;
        Ok(body.to_vec())
    }

    pub async fn index(&self) -> Result<ModuleIndex, RepositoryError> {
        let body = self.fetch(INDEX_FILE).await?;
        ModuleIndex::parse(&String::from_utf8_lossy(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"{
        "weather": {"version": "1.1", "description": "Forecasts for a city",
                    "keywords": ["forecast", "Rain"], "commands": ["weather"]},
        "translate": {"version": "2.0", "description": "Translate text",
                      "commands": ["tr"]},
        "notes": {}
    }"#;

    fn names(index: &ModuleIndex, query: &str) -> Vec<String> {
        index.search(query).into_iter().map(|(n, _)| n.to_string()).collect()
    }

    #[test]
    fn test_search_fields() {
        let index = ModuleIndex::parse(INDEX).unwrap();
        assert_eq!(names(&index, "t").len(), 3);

        assert_eq!(names(&index, "WEATH"), vec!["weather"]);
        assert_eq!(names(&index, "city"), vec!["weather"]);
        assert_eq!(names(&index, "rain"), vec!["weather"]);
        assert_eq!(names(&index, "tr"), vec!["translate"]);
        assert!(names(&index, "  ").is_empty());
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        let index = ModuleIndex::parse(r#"{"a": {"keywords": ["forecast"]}}"#).unwrap();
        assert!(index.search("cast").is_empty());
        assert_eq!(index.search("forecast").len(), 1);
    }

    #[test]
    fn test_invalid_index() {
        assert!(matches!(ModuleIndex::parse("[1, 2]"), Err(RepositoryError::Parse(_))));
    }

    #[tokio::test]
    async fn test_unconfigured_repository() {
        let repository = ModuleRepository::new(&RepositoryConfig::default());
        assert!(!repository.is_configured());
        assert_eq!(repository.file_for("echo"), "echo.py");
        assert_eq!(repository.file_for("echo.sh"), "echo.sh");
        assert!(matches!(
            repository.fetch("echo.py").await,
            Err(RepositoryError::NotConfigured)
        ));
    }
}
