use serde::{Deserialize, Serialize};

/// The reaction that means "I want to join".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinMarker {
    name: String,
}

impl Default for JoinMarker {
    fn default() -> Self {
        Self::new("thumbsup")
    }
}

impl JoinMarker {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: canonical(&normalize_marker_token(&name.into())) }
    }

    /// Name passed to the chat platform when adding or removing the marker.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matches(&self, reaction: &str) -> bool {
        canonical(&normalize_marker_token(reaction)) == self.name
    }
}

pub fn normalize_marker_token(reaction: &str) -> String {
    reaction.trim().trim_matches(':').to_ascii_lowercase()
}

fn canonical(normalized: &str) -> String {
    match normalized {
        "👍" | "+1" | "thumbsup" | "thumbs_up" => "thumbsup".to_owned(),
        // skin tone variants arrive as `thumbsup::skin-tone-2`
        other => match other.split_once("::skin-tone-") {
            Some((base, _)) => canonical(base),
            None => other.to_owned(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_marker_token, JoinMarker};

    #[test]
    fn normalization_handles_spacing_colons_and_case() {
        assert_eq!(normalize_marker_token(" :THUMBSUP: "), "thumbsup");
    }

    #[test]
    fn default_marker_accepts_thumbs_up_aliases() {
        let marker = JoinMarker::default();
        assert_eq!(marker.name(), "thumbsup");
        for alias in ["👍", "+1", ":thumbsup:", "THUMBSUP", "thumbsup::skin-tone-3"] {
            assert!(marker.matches(alias), "expected `{alias}` to match");
        }
        assert!(!marker.matches("thumbsdown"));
        assert!(!marker.matches("rocket"));
    }

    #[test]
    fn custom_marker_is_matched_by_name() {
        let marker = JoinMarker::new(":video_game:");
        assert_eq!(marker.name(), "video_game");
        assert!(marker.matches("video_game"));
        assert!(!marker.matches("thumbsup"));
    }
}
