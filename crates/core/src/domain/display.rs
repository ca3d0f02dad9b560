use serde::Serialize;

pub const NOT_SPECIFIED: &str = "Not specified";

/// Zero-width space. Chat platforms reject empty field bodies.
pub const EMPTY_ROSTER_PLACEHOLDER: &str = "\u{200b}";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DisplayField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Display {
    pub title: String,
    pub fields: Vec<DisplayField>,
    pub fallback_text: String,
}

impl Display {
    pub fn field(&self, name: &str) -> Option<&DisplayField> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn roster_field(&self) -> Option<&DisplayField> {
        self.fields.iter().find(|field| field.name.starts_with("Joined ("))
    }
}

pub fn render(game: &str, capacity: u32, schedule: Option<&str>, joined: &[String]) -> Display {
    let roster = if joined.is_empty() {
        EMPTY_ROSTER_PLACEHOLDER.to_owned()
    } else {
        joined.join("\n")
    };

    Display {
        title: format!("Looking for players: {game}"),
        fields: vec![
            DisplayField {
                name: "Players needed".to_owned(),
                value: capacity.to_string(),
                inline: true,
            },
            DisplayField {
                name: "Time (optional)".to_owned(),
                value: schedule.unwrap_or(NOT_SPECIFIED).to_owned(),
                inline: true,
            },
            DisplayField { name: format!("Joined ({})", joined.len()), value: roster, inline: false },
        ],
        fallback_text: format!("Looking for players: {game} ({}/{capacity})", joined.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::{render, EMPTY_ROSTER_PLACEHOLDER, NOT_SPECIFIED};

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| (*value).to_owned()).collect()
    }

    #[test]
    fn renders_title_and_fields() {
        let display = render("Valorant", 5, Some("21:00 CET"), &names(&["A", "B"]));

        assert_eq!(display.title, "Looking for players: Valorant");
        assert_eq!(display.field("Players needed").map(|f| f.value.as_str()), Some("5"));
        assert_eq!(display.field("Time (optional)").map(|f| f.value.as_str()), Some("21:00 CET"));

        let roster = display.roster_field().expect("roster field");
        assert_eq!(roster.name, "Joined (2)");
        assert_eq!(roster.value, "A\nB");
        assert!(!roster.inline);
        assert_eq!(display.fallback_text, "Looking for players: Valorant (2/5)");
    }

    #[test]
    fn missing_schedule_and_empty_roster_use_placeholders() {
        let display = render("Chess", 2, None, &[]);

        assert_eq!(display.field("Time (optional)").map(|f| f.value.as_str()), Some(NOT_SPECIFIED));
        let roster = display.roster_field().expect("roster field");
        assert_eq!(roster.name, "Joined (0)");
        assert_eq!(roster.value, EMPTY_ROSTER_PLACEHOLDER);
        assert!(!roster.value.is_empty());
    }

    #[test]
    fn rendering_is_deterministic() {
        let joined = names(&["A", "B", "C"]);
        assert_eq!(render("Dota", 5, Some("now"), &joined), render("Dota", 5, Some("now"), &joined));
    }

    #[test]
    fn changing_capacity_only_changes_capacity_field_and_fallback() {
        let joined = names(&["A"]);
        let before = render("Dota", 5, None, &joined);
        let after = render("Dota", 6, None, &joined);

        assert_eq!(before.title, after.title);
        assert_ne!(before.fields[0], after.fields[0]);
        assert_eq!(before.fields[1..], after.fields[1..]);
    }

    #[test]
    fn changing_roster_only_changes_roster_field_and_fallback() {
        let before = render("Dota", 5, None, &names(&["A"]));
        let after = render("Dota", 5, None, &names(&["A", "B"]));

        assert_eq!(before.title, after.title);
        assert_eq!(before.fields[..2], after.fields[..2]);
        assert_ne!(before.fields[2], after.fields[2]);
    }
}
