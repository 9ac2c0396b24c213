use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Accent-insensitive search key: NFD, combining marks dropped, uppercased
/// and trimmed. `"  Uberlândia "` becomes `"UBERLANDIA"`.
pub fn normalize(s: &str) -> String {
    let folded: String = s
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_uppercase)
        // Some uppercase mappings emit a combining mark of their own
        .filter(|c| !is_combining_mark(*c))
        .collect();

    folded.trim().to_owned()
}

/// Target city for a collection run.
#[derive(Debug, Clone, PartialEq)]
pub struct CityFilter {
    raw: String,
    normalized: String,
}

impl CityFilter {
    /// Returns `None` for a blank filter, which means "any city".
    pub fn new(raw: &str) -> Option<CityFilter> {
        let normalized = normalize(raw);
        if normalized.is_empty() {
            return None;
        }
        Some(CityFilter { raw: raw.trim().to_owned(), normalized })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// Containment in either direction, ignoring case and accents, so that
    /// "Uberlandia" matches "Uberlândia" and "Uberlândia - MG" alike.
    pub fn matches(&self, city: &str) -> bool {
        let city = normalize(city);
        if city.is_empty() {
            return false;
        }
        city.contains(&self.normalized) || self.normalized.contains(&city)
    }

    /// Every non-empty substring of the normalized filter. A stored city is
    /// contained in the filter exactly when it is one of these.
    pub fn fragments(&self) -> Vec<String> {
        let chars: Vec<char> = self.normalized.chars().collect();
        let mut fragments = Vec::new();
        for start in 0..chars.len() {
            for end in start + 1..=chars.len() {
                let fragment: String = chars[start..end].iter().collect();
                if !fragments.contains(&fragment) {
                    fragments.push(fragment);
                }
            }
        }
        fragments
    }
}

pub fn optional_matches(filter: Option<&CityFilter>, city: &str) -> bool {
    filter.map_or(true, |f| f.matches(city))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_accents_and_uppercases() {
        assert_eq!(normalize("Uberlândia"), "UBERLANDIA");
        assert_eq!(normalize("São João del-Rei"), "SAO JOAO DEL-REI");
        assert_eq!(normalize("Avenida João Naves de Ávila"), "AVENIDA JOAO NAVES DE AVILA");
        assert_eq!(normalize("  Praça da Sé  "), "PRACA DA SE");
        assert_eq!(normalize("Açaí"), "ACAI");
    }

    #[test]
    fn test_normalize_handles_precomposed_and_decomposed_input() {
        let precomposed = "Goi\u{00E2}nia";
        let decomposed = "Goia\u{0302}nia";
        assert_eq!(normalize(precomposed), normalize(decomposed));
        assert_eq!(normalize(decomposed), "GOIANIA");
    }

    #[test]
    fn test_normalize_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let samples = [
            "Uberlândia",
            "Rua Padre Anchieta, nº 12",
            "straße",
            "ǰ",
            "ΐ",
            "Ñandú",
            "  Ribeirão Preto ",
            "",
        ];
        for sample in samples.iter() {
            let once = normalize(sample);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", sample);
        }
    }

    #[test]
    fn test_normalize_never_empties_visible_text() {
        for sample in ["é", "Rua", "Ã"].iter() {
            assert!(!normalize(sample).is_empty());
        }
    }

    #[test]
    fn test_city_filter_matches_both_directions() {
        let filter = CityFilter::new("Uberlandia").unwrap();
        assert!(filter.matches("Uberlândia"));
        assert!(filter.matches("UBERLANDIA - MG"));
        assert!(!filter.matches("Araguari"));

        let long_filter = CityFilter::new("Uberlândia MG").unwrap();
        assert!(long_filter.matches("Uberlandia"));
    }

    #[test]
    fn test_city_filter_rejects_empty_city() {
        let filter = CityFilter::new("Uberlandia").unwrap();
        assert!(!filter.matches(""));
        assert!(!filter.matches("  "));
    }

    #[test]
    fn test_blank_filter_is_none() {
        assert!(CityFilter::new("").is_none());
        assert!(CityFilter::new("   ").is_none());
        assert!(optional_matches(None, "Araguari"));
    }

    #[test]
    fn test_fragments() {
        let filter = CityFilter::new("aba").unwrap();
        let fragments = filter.fragments();
        assert_eq!(fragments, vec!["A", "AB", "ABA", "B", "BA"]);
    }
}
