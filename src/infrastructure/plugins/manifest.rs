//! Plugin header - metadata declared in a plugin's leading comment lines
//!
//! ```text
//! #!/usr/bin/env python3
//! # version: 1.2
//! # author: someone
//! # description: Current weather for a city
//! # system_requires: ffmpeg
//! # requires: requests, beautifulsoup4
//! ```

use once_cell::sync::Lazy;
use regex_lite::Regex;

static HEADER_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:#|//)\s*(version|author|description|system_requires?|requires?)\s*:\s*(.*?)\s*$",
    )
    .expect("header pattern is valid")
});

/// Metadata parsed from a plugin header. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginManifest {
    pub version: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    /// System packages, installed before `requires`
    pub system_requires: Vec<String>,
    /// Packages to install before the plugin starts
    pub requires: Vec<String>,
}

fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
}

impl PluginManifest {
    /// Parse the comment block at the top of `source`.
    ///
    /// A shebang and blank lines before the block are skipped; parsing stops
    /// at the first line that is not a comment. Binary plugins simply yield
    /// an empty manifest.
    pub fn parse(source: &str) -> Self {
        let mut manifest = PluginManifest::default();

        let lines = source
            .lines()
            .map(str::trim)
            .skip_while(|l| l.is_empty() || l.starts_with("#!"))
            .take_while(|l| l.starts_with('#') || l.starts_with("//"));

        for line in lines {
            let Some(caps) = HEADER_FIELD.captures(line) else {
                continue;
            };
            let value = caps[2].to_string();
            match &caps[1] {
                "version" => manifest.version = Some(value),
                "author" => manifest.author = Some(value),
                "description" => manifest.description = Some(value),
                key if key.starts_with("system_") => {
                    manifest.system_requires.extend(split_list(&value))
                }
                _ => manifest.requires.extend(split_list(&value)),
            }
        }

        manifest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_header() {
        let source = "#!/usr/bin/env python3\n\
                      # version: 1.2\n\
                      # author: someone\n\
                      # description: Current weather\n\
                      # requires: requests, bs4 ,\n\
                      import requests\n";
        let manifest = PluginManifest::parse(source);
        assert_eq!(manifest.version.as_deref(), Some("1.2"));
        assert_eq!(manifest.author.as_deref(), Some("someone"));
        assert_eq!(manifest.description.as_deref(), Some("Current weather"));
        assert_eq!(manifest.requires, vec!["requests", "bs4"]);
    }

    #[test]
    fn test_system_requirements_are_separate() {
        let source = "# system_requires: ffmpeg, sox\n# system_require: git\n# requires: pydub\n";
        let manifest = PluginManifest::parse(source);
        assert_eq!(manifest.system_requires, vec!["ffmpeg", "sox", "git"]);
        assert_eq!(manifest.requires, vec!["pydub"]);
    }

    #[test]
    fn test_no_header_means_no_requirements() {
        let manifest = PluginManifest::parse("import os\n# requires: late\n");
        assert_eq!(manifest, PluginManifest::default());
    }

    #[test]
    fn test_slash_comments_and_singular_key() {
        let manifest = PluginManifest::parse("\n// require: fakepkg12345\n// free text\n");
        assert_eq!(manifest.requires, vec!["fakepkg12345"]);
    }

    #[test]
    fn test_binary_content_is_ignored() {
        let bytes = [0x7f, b'E', b'L', b'F', 0x02, 0x01, b'\n', b'#', b' ', b'r'];
        let manifest = PluginManifest::parse(&String::from_utf8_lossy(&bytes));
        assert!(manifest.requires.is_empty());
    }
}
