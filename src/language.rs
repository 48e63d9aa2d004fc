use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Response language the model is asked to answer in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    English,
    Hindi,
    Malayalam,
    Tamil,
}

/// Returned when a selection is not one of the four supported languages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported language: {0:?}")]
pub struct InvalidSelection(pub String);

impl Language {
    /// Display order used by the dropdown.
    pub const ALL: [Language; 4] = [
        Language::English,
        Language::Hindi,
        Language::Malayalam,
        Language::Tamil,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Hindi => "Hindi",
            Language::Malayalam => "Malayalam",
            Language::Tamil => "Tamil",
        }
    }

    /// Instruction appended to every prompt sent in this language.
    pub fn instruction(self) -> &'static str {
        match self {
            Language::English => "Respond in English",
            Language::Hindi => "हिंदी में जवाब दें",
            Language::Malayalam => "മലയാളത്തിൽ മറുപടി നൽകുക",
            Language::Tamil => "தமிழில் பதிலளிக்கவும்",
        }
    }

    /// Exact label match, as the dropdown submits it.
    pub fn from_label(label: &str) -> Result<Self, InvalidSelection> {
        Language::ALL
            .into_iter()
            .find(|lang| lang.label() == label)
            .ok_or_else(|| InvalidSelection(label.to_string()))
    }

    /// Builds the text actually sent to the model for `prompt`.
    pub fn apply(self, prompt: &str) -> String {
        format!("{}\n\n{}", prompt, self.instruction())
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lenient parsing for typed input such as `--language tamil`.
impl FromStr for Language {
    type Err = InvalidSelection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Language::ALL
            .into_iter()
            .find(|lang| lang.label().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| InvalidSelection(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_labels() {
        assert_eq!("English".parse::<Language>(), Ok(Language::English));
        assert_eq!("hindi".parse::<Language>(), Ok(Language::Hindi));
        assert_eq!(" Malayalam ".parse::<Language>(), Ok(Language::Malayalam));
        assert_eq!("TAMIL".parse::<Language>(), Ok(Language::Tamil));
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!("French".parse::<Language>().is_err());
        assert!("".parse::<Language>().is_err());
        assert_eq!(
            "Klingon".parse::<Language>(),
            Err(InvalidSelection("Klingon".to_string()))
        );
    }

    #[test]
    fn test_from_label_is_exact() {
        assert_eq!(Language::from_label("Tamil"), Ok(Language::Tamil));
        assert_eq!(Language::from_label("Malayalam"), Ok(Language::Malayalam));
        assert!(Language::from_label("TAMIL").is_err());
        assert!(Language::from_label(" Hindi ").is_err());
        assert!(Language::from_label("english").is_err());
    }

    #[test]
    fn test_apply_appends_instruction() {
        assert_eq!(
            Language::English.apply("I feel anxious"),
            "I feel anxious\n\nRespond in English"
        );
        assert_eq!(
            Language::Tamil.apply("hello"),
            "hello\n\nதமிழில் பதிலளிக்கவும்"
        );
    }

    #[test]
    fn test_all_in_display_order() {
        let labels: Vec<_> = Language::ALL.iter().map(|l| l.label()).collect();
        assert_eq!(labels, ["English", "Hindi", "Malayalam", "Tamil"]);
    }
}
