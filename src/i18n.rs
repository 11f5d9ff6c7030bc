//! Translatable messages and the string catalog used to render them.
//!
//! Message keys are English text with Go-style positional verbs (`%s`, `%d`,
//! `%v`, `%w`). English therefore needs no catalog file: an unknown key renders
//! as itself. Other languages are loaded once from `strings_<lang>.ini` files
//! and only read afterwards.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{LibError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub key: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<MessageArg>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageArg {
    Number(i64),
    Text(String),
    Message(Message),
}

impl Message {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<MessageArg>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl From<&str> for MessageArg {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MessageArg {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for MessageArg {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for MessageArg {
    fn from(value: i32) -> Self {
        Self::Number(i64::from(value))
    }
}

impl From<usize> for MessageArg {
    fn from(value: usize) -> Self {
        Self::Number(value as i64)
    }
}

impl From<Message> for MessageArg {
    fn from(value: Message) -> Self {
        Self::Message(value)
    }
}

/// Renders `message` with `strings`, falling back to the raw key for missing
/// entries. Nested messages are rendered with the same table.
pub fn render(message: &Message, strings: Option<&HashMap<String, String>>) -> String {
    let format = strings
        .and_then(|strings| strings.get(&message.key))
        .map(String::as_str)
        .unwrap_or(&message.key);

    let mut args = message.args.iter();
    let mut output = String::with_capacity(format.len());
    let mut chars = format.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            output.push(ch);
            continue;
        }
        match chars.peek().copied() {
            Some('%') => {
                chars.next();
                output.push('%');
            }
            Some(verb @ ('s' | 'd' | 'v' | 'w')) => {
                chars.next();
                match args.next() {
                    Some(MessageArg::Text(text)) => output.push_str(text),
                    Some(MessageArg::Number(number)) => output.push_str(&number.to_string()),
                    Some(MessageArg::Message(nested)) => output.push_str(&render(nested, strings)),
                    None => {
                        output.push('%');
                        output.push(verb);
                    }
                }
            }
            _ => output.push('%'),
        }
    }

    output
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    languages: HashMap<String, HashMap<String, String>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `strings_<lang>.ini` from `dir` for every supported language
    /// except English. Unreadable files are logged and skipped.
    pub fn load_dir(dir: impl AsRef<Path>, supported: &[String]) -> Self {
        let dir = dir.as_ref();
        let mut catalog = Self::new();
        for lang in supported {
            if lang == "en" {
                continue;
            }

            let path: PathBuf = dir.join(format!("strings_{lang}.ini"));
            match load_file(&path) {
                Ok(strings) => {
                    tracing::debug!(lang = %lang, entries = strings.len(), "loaded string table");
                    catalog.languages.insert(lang.clone(), strings);
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err.source, "could not load string table");
                }
            }
        }
        catalog
    }

    /// Loads the string tables named by `SUPPORTED_LANGUAGES` from `LANGUAGES_PATH`.
    pub fn from_config(config: &Config) -> Self {
        Self::load_dir(&config.languages_path, &config.supported_languages)
    }

    pub fn insert_language(&mut self, lang: impl Into<String>, strings: HashMap<String, String>) {
        self.languages.insert(lang.into(), strings);
    }

    /// Resolves a language tag, falling back from `de-DE` to `de`.
    pub fn strings_for(&self, lang: &str) -> Option<&HashMap<String, String>> {
        if let Some(strings) = self.languages.get(lang) {
            return Some(strings);
        }
        lang.split_once('-')
            .and_then(|(prefix, _)| self.languages.get(prefix))
    }

    pub fn translate(&self, message: &Message, lang: &str) -> String {
        render(message, self.strings_for(lang))
    }

    pub fn translate_error(&self, err: &LibError, lang: &str) -> String {
        self.translate(&err.to_message(), lang)
    }
}

pub fn parse_strings(contents: &str) -> HashMap<String, String> {
    let mut strings = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        if !value.is_empty() {
            strings.insert(key.trim().to_string(), value.to_string());
        }
    }
    strings
}

fn load_file(path: &Path) -> Result<HashMap<String, String>> {
    let contents = fs::read_to_string(path).map_err(|err| {
        LibError::unknown(
            "could not read string table",
            anyhow!("{}: {}", path.display(), err),
        )
    })?;
    Ok(parse_strings(&contents))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn german() -> HashMap<String, String> {
        parse_strings(
            "; membership strings\n\
             cannot apply: current status is %s = Antrag kann nicht gestellt werden: Status ist %s\n\
             could not store census: %w = Mitgliedermeldung konnte nicht gespeichert werden: %w\n\
             line %d: blank row found = Zeile %d: leere Zeile\n\
             empty value =\n",
        )
    }

    #[test]
    fn render_substitutes_positional_arguments() {
        let message = Message::new("line %d: invalid birth year '%s'")
            .arg(4usize)
            .arg("19x0");
        assert_eq!(render(&message, None), "line 4: invalid birth year '19x0'");
    }

    #[test]
    fn render_keeps_verbs_without_arguments() {
        let message = Message::new("100%% done, %s left");
        assert_eq!(render(&message, None), "100% done, %s left");
    }

    #[test]
    fn parse_strings_skips_comments_and_empty_values() {
        let strings = german();
        assert_eq!(strings.len(), 3);
        assert!(!strings.contains_key("empty value"));
    }

    #[test]
    fn translate_renders_nested_messages_recursively() {
        let mut catalog = Catalog::new();
        catalog.insert_language("de", german());

        let inner = Message::new("line %d: blank row found").arg(7usize);
        let outer = Message::new("could not store census: %w").arg(inner);

        assert_eq!(
            catalog.translate(&outer, "de-DE"),
            "Mitgliedermeldung konnte nicht gespeichert werden: Zeile 7: leere Zeile"
        );
        assert_eq!(
            catalog.translate(&outer, "fr"),
            "could not store census: line 7: blank row found"
        );
    }

    #[test]
    fn load_dir_reads_supported_languages() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut file =
            std::fs::File::create(dir.path().join("strings_de.ini")).expect("create file");
        writeln!(
            file,
            "cannot apply: current status is %s = Antrag kann nicht gestellt werden: Status ist %s"
        )
        .expect("write strings");

        let catalog = Catalog::load_dir(
            dir.path(),
            &["en".to_string(), "de".to_string(), "nl".to_string()],
        );
        let message = Message::new("cannot apply: current status is %s").arg("active");
        assert_eq!(
            catalog.translate(&message, "de"),
            "Antrag kann nicht gestellt werden: Status ist active"
        );
        assert!(catalog.strings_for("nl").is_none());
    }

    #[test]
    fn catalog_follows_configured_language_path() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(
            dir.path().join("strings_de.ini"),
            "validation link has expired = Der Bestätigungslink ist abgelaufen\n",
        )
        .expect("write strings");
        let path = dir.path().to_string_lossy().into_owned();
        let config = Config::from_lookup(|name| match name {
            "DATABASE_URL" => Some("postgres://localhost/dpv".to_string()),
            "LANGUAGES_PATH" => Some(path.clone()),
            "SUPPORTED_LANGUAGES" => Some("en,de".to_string()),
            _ => None,
        })
        .expect("config should load");

        let catalog = Catalog::from_config(&config);
        assert_eq!(
            catalog.translate(&Message::new("validation link has expired"), "de-DE"),
            "Der Bestätigungslink ist abgelaufen"
        );
    }
}
