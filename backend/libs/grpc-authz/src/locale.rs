//! Locale tags carried in the `culture` metadata entry
//!
//! Parsing is explicit and fallible: callers get a `Result` and decide what a
//! bad tag means for them. The propagator treats every failure as "leave the
//! locale unset".

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// ISO 639-1 languages recognised by default.
const KNOWN_LANGUAGES: &[&str] = &[
    "af", "am", "ar", "as", "az", "be", "bg", "bn", "bo", "bs", "ca", "cs", "cy", "da", "de",
    "dv", "el", "en", "es", "et", "eu", "fa", "fi", "fo", "fr", "fy", "ga", "gd", "gl", "gu",
    "ha", "he", "hi", "hr", "hu", "hy", "id", "ig", "is", "it", "ja", "ka", "kk", "kl", "km",
    "kn", "ko", "ky", "lb", "lo", "lt", "lv", "mi", "mk", "ml", "mn", "mr", "ms", "mt", "my",
    "nb", "ne", "nl", "nn", "no", "oc", "or", "pa", "pl", "ps", "pt", "rm", "ro", "ru", "rw",
    "sa", "si", "sk", "sl", "sq", "sr", "sv", "sw", "ta", "te", "tg", "th", "tk", "tr", "tt",
    "ug", "uk", "ur", "uz", "vi", "wo", "xh", "yo", "zh", "zu",
];

/// Reasons a locale tag cannot be used
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocaleError {
    #[error("Locale tag is empty")]
    Empty,

    #[error("Malformed locale tag: {0}")]
    Malformed(String),

    #[error("Unsupported locale: {0}")]
    Unsupported(String),
}

/// A validated `language[-Script][-REGION]` tag, stored in canonical case
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locale {
    language: String,
    script: Option<String>,
    region: Option<String>,
}

impl Locale {
    /// Parse a tag against the built-in language catalogue.
    ///
    /// Accepts `-` or `_` as separator. `"fr-FR"`, `"en_us"` and
    /// `"zh-Hant-TW"` parse; `"zzz-invalid"` does not.
    pub fn parse(tag: &str) -> Result<Self, LocaleError> {
        let locale = Self::parse_structure(tag)?;

        if !KNOWN_LANGUAGES.contains(&locale.language.as_str()) {
            return Err(LocaleError::Unsupported(tag.to_string()));
        }

        Ok(locale)
    }

    /// Parse a tag, additionally restricting the language to `allowed`.
    ///
    /// An empty `allowed` list means no extra restriction.
    pub fn parse_restricted(tag: &str, allowed: &[String]) -> Result<Self, LocaleError> {
        let locale = Self::parse(tag)?;

        if !allowed.is_empty()
            && !allowed
                .iter()
                .any(|lang| lang.eq_ignore_ascii_case(&locale.language))
        {
            return Err(LocaleError::Unsupported(tag.to_string()));
        }

        Ok(locale)
    }

    fn parse_structure(tag: &str) -> Result<Self, LocaleError> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(LocaleError::Empty);
        }

        let malformed = || LocaleError::Malformed(tag.to_string());
        let mut subtags = tag.split(['-', '_']);

        let language = subtags
            .next()
            .filter(|s| (2..=3).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_alphabetic()))
            .ok_or_else(malformed)?
            .to_ascii_lowercase();

        let mut script = None;
        let mut region = None;

        for subtag in subtags {
            if script.is_none()
                && region.is_none()
                && subtag.len() == 4
                && subtag.bytes().all(|b| b.is_ascii_alphabetic())
            {
                let mut canonical = subtag.to_ascii_lowercase();
                canonical[..1].make_ascii_uppercase();
                script = Some(canonical);
            } else if region.is_none() && is_region(subtag) {
                region = Some(subtag.to_ascii_uppercase());
            } else {
                return Err(malformed());
            }
        }

        Ok(Self {
            language,
            script,
            region,
        })
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn script(&self) -> Option<&str> {
        self.script.as_deref()
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }
}

fn is_region(subtag: &str) -> bool {
    (subtag.len() == 2 && subtag.bytes().all(|b| b.is_ascii_alphabetic()))
        || (subtag.len() == 3 && subtag.bytes().all(|b| b.is_ascii_digit()))
}

impl FromStr for Locale {
    type Err = LocaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.language)?;
        if let Some(script) = &self.script {
            write!(f, "-{}", script)?;
        }
        if let Some(region) = &self.region {
            write!(f, "-{}", region)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_language_and_region() {
        let locale = Locale::parse("fr-FR").expect("fr-FR should parse");
        assert_eq!(locale.language(), "fr");
        assert_eq!(locale.region(), Some("FR"));
        assert_eq!(locale.to_string(), "fr-FR");
    }

    #[test]
    fn test_parse_canonicalizes_case_and_separator() {
        let locale = Locale::parse("EN_us").expect("should parse");
        assert_eq!(locale.to_string(), "en-US");
    }

    #[test]
    fn test_parse_script() {
        let locale = Locale::parse("zh-hant-tw").expect("should parse");
        assert_eq!(locale.script(), Some("Hant"));
        assert_eq!(locale.to_string(), "zh-Hant-TW");
    }

    #[test]
    fn test_parse_numeric_region() {
        let locale = Locale::parse("es-419").expect("should parse");
        assert_eq!(locale.region(), Some("419"));
    }

    #[test]
    fn test_parse_invalid_tag() {
        assert_eq!(
            Locale::parse("zzz-invalid"),
            Err(LocaleError::Malformed("zzz-invalid".to_string()))
        );
    }

    #[test]
    fn test_parse_unknown_language() {
        assert_eq!(
            Locale::parse("zz-ZZ"),
            Err(LocaleError::Unsupported("zz-ZZ".to_string()))
        );
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(Locale::parse("  "), Err(LocaleError::Empty));
    }

    #[test]
    fn test_parse_rejects_trailing_subtags() {
        assert!(matches!(
            Locale::parse("en-US-x"),
            Err(LocaleError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_restricted() {
        let allowed = vec!["fr".to_string(), "nl".to_string()];
        assert!(Locale::parse_restricted("fr-BE", &allowed).is_ok());
        assert!(matches!(
            Locale::parse_restricted("de-DE", &allowed),
            Err(LocaleError::Unsupported(_))
        ));
        assert!(Locale::parse_restricted("de-DE", &[]).is_ok());
    }
}
