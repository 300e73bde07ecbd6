//! Notification message templating.
//!
//! A template may contain `%key%` placeholders and the decorated form
//! `%prefix|KEY|suffix%`, where the prefix and suffix are included only
//! when KEY resolves. Unresolved placeholders are left literal. Keys are
//! case-insensitive.
//!
//! Standard keys (`applicationname`, the date/time family) are supplied on
//! every expansion; custom keys come from the notification that fires and
//! take precedence.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use chrono::Local;
use regex::Regex;

/// Message map key for the expanded title.
pub const MESSAGE_TITLE: &str = "title";
/// Message map key for the expanded body.
pub const MESSAGE_BODY: &str = "body";

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"%(?:([^|%]*)\|)?([A-Za-z0-9_#]+)(?:\|([^|%]*))?%").expect("placeholder regex")
    })
}

/// Expand every resolvable placeholder in `text`.
pub fn expand(text: &str, standard: &HashMap<String, String>, custom: &HashMap<String, String>) -> String {
    placeholder()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let key = caps[2].to_lowercase();
            match custom.get(&key).or_else(|| standard.get(&key)) {
                Some(value) => format!(
                    "{}{}{}",
                    caps.get(1).map_or("", |m| m.as_str()),
                    value,
                    caps.get(3).map_or("", |m| m.as_str())
                ),
                // unresolved keys keep their placeholder verbatim
                None => caps[0].to_owned(),
            }
        })
        .into_owned()
}

/// The standard key set, evaluated at expansion time.
pub fn standard_keys(application_name: &str) -> HashMap<String, String> {
    let now = Local::now();
    let mut keys = HashMap::new();
    keys.insert("applicationname".to_owned(), application_name.to_owned());
    keys.insert("datetime".to_owned(), now.format("%a %b %-d %H:%M:%S %Y").to_string());
    keys.insert("shortdatetime".to_owned(), now.format("%d/%m/%Y %H:%M").to_string());
    keys.insert("longdatetime".to_owned(), now.format("%A, %-d %B %Y %H:%M:%S").to_string());
    keys.insert("time".to_owned(), now.format("%H:%M:%S").to_string());
    keys.insert("shorttime".to_owned(), now.format("%H:%M").to_string());
    keys.insert("longtime".to_owned(), now.format("%H:%M:%S").to_string());
    keys.insert("date".to_owned(), now.format("%a %b %-d %Y").to_string());
    keys.insert("shortdate".to_owned(), now.format("%d/%m/%Y").to_string());
    keys.insert("longdate".to_owned(), now.format("%A, %-d %B %Y").to_string());
    keys
}

/// Build the message map handed to notifiers: expanded title and body plus
/// every custom key.
pub fn render(
    application_name: &str,
    title: &str,
    body: &str,
    custom: &HashMap<String, String>,
) -> BTreeMap<String, String> {
    let standard = standard_keys(application_name);
    let mut message = BTreeMap::new();
    message.insert(MESSAGE_TITLE.to_owned(), expand(title, &standard, custom));
    message.insert(MESSAGE_BODY.to_owned(), expand(body, &standard, custom));
    for (key, value) in custom {
        message.insert(key.clone(), value.clone());
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()
    }

    #[test]
    fn plain_key_expands() {
        let standard = standard_keys("hearth");
        let out = expand("hello %applicationname%!", &standard, &HashMap::new());
        assert_eq!(out, "hello hearth!");
    }

    #[test]
    fn keys_are_case_insensitive() {
        let standard = standard_keys("hearth");
        let out = expand("%ApplicationName%", &standard, &HashMap::new());
        assert_eq!(out, "hearth");
    }

    #[test]
    fn decorations_only_when_key_resolves() {
        let standard = HashMap::new();
        let data = custom(&[("tank", "27")]);
        assert_eq!(expand("%temp |tank| degrees%", &standard, &data), "temp 27 degrees");
        assert_eq!(expand("%temp |missing| degrees%", &standard, &data), "%temp |missing| degrees%");
    }

    #[test]
    fn unresolved_placeholder_left_literal() {
        let out = expand("value %unknown% here", &HashMap::new(), &HashMap::new());
        assert_eq!(out, "value %unknown% here");
    }

    #[test]
    fn custom_beats_standard() {
        let standard = standard_keys("hearth");
        let data = custom(&[("applicationname", "override")]);
        assert_eq!(expand("%applicationname%", &standard, &data), "override");
    }

    #[test]
    fn stray_percent_is_untouched() {
        let out = expand("humidity 100% at %event%", &HashMap::new(), &custom(&[("event", "start")]));
        assert_eq!(out, "humidity 100% at start");
    }

    #[test]
    fn render_includes_custom_keys() {
        let message = render("hearth", "t", "b %event%", &custom(&[("event", "stop")]));
        assert_eq!(message.get(MESSAGE_TITLE).unwrap(), "t");
        assert_eq!(message.get(MESSAGE_BODY).unwrap(), "b stop");
        assert_eq!(message.get("event").unwrap(), "stop");
    }
}
