//! Command tokenizer - splits prefixed text into a command and its arguments
//!
//! The prefix is compared as a literal string, so operator-chosen prefixes
//! such as `$.` or `*` need no escaping.

use crate::domain::entities::ArgGrammar;

/// A prefixed line split into command name and trimmed remainder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandLine<'a> {
    pub command: &'a str,
    pub rest: &'a str,
}

/// Strip `prefix` from `text` and split off the command name.
///
/// Returns `None` when the text does not start with the prefix or no command
/// name directly follows it.
pub fn tokenize<'a>(prefix: &str, text: &'a str) -> Option<CommandLine<'a>> {
    let body = text.trim_end().strip_prefix(prefix)?;
    if body.is_empty() || body.starts_with(char::is_whitespace) {
        return None;
    }

    let (command, rest) = match body.find(char::is_whitespace) {
        Some(at) => (&body[..at], body[at..].trim()),
        None => (body, ""),
    };
    Some(CommandLine { command, rest })
}

pub(crate) fn is_word(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

impl ArgGrammar {
    /// Match the remainder of a command line, returning the captured arguments
    pub fn capture(&self, rest: &str) -> Option<Vec<String>> {
        match self {
            ArgGrammar::None => rest.is_empty().then(Vec::new),
            ArgGrammar::Word => is_word(rest).then(|| vec![rest.to_string()]),
            ArgGrammar::File => {
                let valid = match rest.split_once('.') {
                    Some((stem, ext)) => is_word(stem) && is_word(ext),
                    None => is_word(rest),
                };
                valid.then(|| vec![rest.to_string()])
            }
            ArgGrammar::Rest => (!rest.is_empty()).then(|| vec![rest.to_string()]),
            ArgGrammar::OptionalRest => Some(if rest.is_empty() {
                Vec::new()
            } else {
                vec![rest.to_string()]
            }),
            ArgGrammar::WordRest => {
                let (word, text) = rest.split_once(char::is_whitespace)?;
                let text = text.trim();
                (is_word(word) && !text.is_empty())
                    .then(|| vec![word.to_string(), text.to_string()])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_plain_prefix() {
        let line = tokenize(".", ".ulm echo").unwrap();
        assert_eq!(line.command, "ulm");
        assert_eq!(line.rest, "echo");

        let line = tokenize(".", ".help\n").unwrap();
        assert_eq!(line.command, "help");
        assert_eq!(line.rest, "");
    }

    #[test]
    fn test_tokenize_rejects_other_prefixes() {
        assert!(tokenize(".", "!help").is_none());
        assert!(tokenize(".", "help").is_none());
        assert!(tokenize(".", ". help").is_none());
        assert!(tokenize(".", ".").is_none());
    }

    #[test]
    fn test_tokenize_metacharacter_prefix() {
        let line = tokenize("$.", "$.ping").unwrap();
        assert_eq!(line.command, "ping");
        assert!(tokenize("$.", "x.ping").is_none());

        let line = tokenize("*", "*calc 2*3").unwrap();
        assert_eq!(line.rest, "2*3");
    }

    #[test]
    fn test_capture_grammars() {
        assert_eq!(ArgGrammar::None.capture(""), Some(vec![]));
        assert_eq!(ArgGrammar::None.capture("x"), None);

        assert_eq!(ArgGrammar::Word.capture("echo"), Some(vec!["echo".to_string()]));
        assert_eq!(ArgGrammar::Word.capture("two words"), None);
        assert_eq!(ArgGrammar::Word.capture(""), None);

        assert_eq!(ArgGrammar::File.capture("echo.py"), Some(vec!["echo.py".to_string()]));
        assert_eq!(ArgGrammar::File.capture("echo"), Some(vec!["echo".to_string()]));
        assert_eq!(ArgGrammar::File.capture("../echo.py"), None);

        assert_eq!(ArgGrammar::Rest.capture(""), None);
        assert_eq!(ArgGrammar::Rest.capture("1 + 2"), Some(vec!["1 + 2".to_string()]));

        assert_eq!(ArgGrammar::OptionalRest.capture(""), Some(vec![]));
        assert_eq!(
            ArgGrammar::OptionalRest.capture("prefix !"),
            Some(vec!["prefix !".to_string()])
        );

        assert_eq!(
            ArgGrammar::WordRest.capture("en  hello world"),
            Some(vec!["en".to_string(), "hello world".to_string()])
        );
        assert_eq!(ArgGrammar::WordRest.capture("en"), None);
    }
}
