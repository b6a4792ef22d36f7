//! Placeholder content generation
//!
//! Seeds a freshly provisioned site with dummy posts so the theme has
//! something to render. Purely functional: no I/O, no error modes.

use serde::Serialize;

/// One generated placeholder item
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlaceholderPost {
    pub title: String,
    pub body: String,
    pub language: String,
}

/// Generate `count` placeholder posts about `topic` in `language`
pub fn generate_placeholders(topic: &str, count: usize, language: &str) -> Vec<PlaceholderPost> {
    (1..=count)
        .map(|n| PlaceholderPost {
            title: format!("{} #{}", heading_for(language), n),
            body: format!(
                "{} \"{}\". {}",
                intro_for(language),
                topic,
                filler_for(language)
            ),
            language: language.to_string(),
        })
        .collect()
}

fn heading_for(language: &str) -> &'static str {
    match language {
        "sv" => "Utkast",
        "de" => "Entwurf",
        _ => "Draft",
    }
}

fn intro_for(language: &str) -> &'static str {
    match language {
        "sv" => "Ett platshållarinlägg om",
        "de" => "Ein Platzhalterbeitrag über",
        _ => "A placeholder post about",
    }
}

fn filler_for(language: &str) -> &'static str {
    match language {
        "sv" => "Ersätt den här texten med riktigt innehåll.",
        "de" => "Ersetzen Sie diesen Text durch echten Inhalt.",
        _ => "Replace this text with real content.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generates_requested_count() {
        assert_eq!(generate_placeholders("coffee", 3, "en").len(), 3);
        assert!(generate_placeholders("coffee", 0, "en").is_empty());
    }

    #[test]
    fn test_topic_and_language_flow_through() {
        let posts = generate_placeholders("coffee", 2, "sv");
        assert_eq!(posts[0].title, "Utkast #1");
        assert_eq!(posts[1].title, "Utkast #2");
        assert!(posts[0].body.contains("coffee"));
        assert_eq!(posts[0].language, "sv");
    }

    #[test]
    fn test_unknown_language_falls_back_to_english() {
        let posts = generate_placeholders("coffee", 1, "xx");
        assert!(posts[0].title.starts_with("Draft"));
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(
            generate_placeholders("tea", 2, "de"),
            generate_placeholders("tea", 2, "de")
        );
    }
}
