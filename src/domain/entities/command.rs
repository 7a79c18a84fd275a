use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle of a binding registered with the command router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(pub u64);

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Shape of the arguments that follow a command name.
///
/// Matching against incoming text lives in `application::routing::grammar`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgGrammar {
    /// No arguments at all
    #[default]
    None,
    /// A single word of letters, digits or underscores
    Word,
    /// A file name: a word with an optional `.ext` suffix
    File,
    /// Any non-empty text
    Rest,
    /// Optional free text
    OptionalRest,
    /// A word followed by non-empty text
    WordRest,
}

impl ArgGrammar {
    pub fn usage(&self) -> &'static str {
        match self {
            ArgGrammar::None => "",
            ArgGrammar::Word => " <name>",
            ArgGrammar::File => " <file>",
            ArgGrammar::Rest => " <text>",
            ArgGrammar::OptionalRest => " [text]",
            ArgGrammar::WordRest => " <name> <text>",
        }
    }
}

/// A command as declared by a plugin's `on_load` hook or the core set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "args")]
    pub grammar: ArgGrammar,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, grammar: ArgGrammar) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            grammar,
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }
}
