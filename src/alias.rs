use std::fmt;

/// Normalised registry key: trimmed and lowercased, so `" Sales "` and
/// `"SALES"` name the same database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Alias(String);

impl Alias {
    /// Normalise `raw` into an alias.
    ///
    /// # Panics
    ///
    /// Panics when `raw` is empty or whitespace only.
    pub fn new(raw: &str) -> Self {
        match Self::parse(raw) {
            Some(alias) => alias,
            None => panic!("database alias must not be blank"),
        }
    }

    /// Normalise `raw`, returning `None` when it is blank.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Alias {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_normalisation() {
        assert_eq!(Alias::new("  Sales "), Alias::new("SALES"));
        assert_eq!(Alias::new("Ünïcode").as_str(), "ünïcode");
        assert!(Alias::parse("   ").is_none());
        assert!(Alias::parse("").is_none());
    }

    #[test]
    #[should_panic(expected = "must not be blank")]
    fn test_blank_alias_panics() {
        Alias::new(" \t ");
    }
}
