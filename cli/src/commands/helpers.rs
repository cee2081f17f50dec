use anyhow::{Result, bail};
use serde::Serialize;
use std::process;

use hearth_core::Household;
use hearth_core::models::{IngredientInput, Profile};

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Report a missing target and exit with status 2.
pub(crate) fn not_found(message: &str, json: bool) -> ! {
    if json {
        println!("{}", json_error(message));
    } else {
        eprintln!("{message}");
    }
    process::exit(2);
}

/// Unwrap a household result, turning a missing target into exit status 2.
pub(crate) fn or_not_found<T>(result: hearth_core::Result<T>, json: bool) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_not_found() => not_found(&e.to_string(), json),
        Err(e) => Err(e.into()),
    }
}

/// Find a profile by id or case-insensitive name, defaulting to the current one.
pub(crate) fn resolve_profile(
    household: &Household,
    selector: Option<&str>,
    json: bool,
) -> Result<Profile> {
    let Some(selector) = selector.map(str::trim) else {
        return match household.current_profile() {
            Some(profile) => Ok(profile),
            None => bail!("No profiles yet. Add one with `hearth profile add <name>`"),
        };
    };
    let profiles = household.profiles();
    let by_id = selector
        .parse::<i64>()
        .ok()
        .and_then(|id| profiles.iter().find(|p| p.id == id));
    let found = by_id.or_else(|| {
        profiles
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(selector))
    });
    match found {
        Some(profile) => Ok(profile.clone()),
        None => not_found(&format!("No profile matches '{selector}'"), json),
    }
}

/// Parse `name:quantity` (quantity optional) into an ingredient.
pub(crate) fn parse_ingredient(s: &str) -> Result<IngredientInput> {
    let (name, quantity) = s.split_once(':').unwrap_or((s, ""));
    let name = name.trim();
    if name.is_empty() {
        bail!("Invalid ingredient '{s}'. Use 'name' or 'name:quantity'");
    }
    Ok(IngredientInput::new(name, quantity.trim()))
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

/// A `wa.me` link that opens a chat pre-filled with `text`.
pub(crate) fn share_link(text: &str) -> String {
    format!("https://wa.me/?text={}", percent_encode_component(text))
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn percent_encode_component(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len() * 3);
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push('%');
                encoded.push(char::from(HEX_CHARS[(byte >> 4) as usize]));
                encoded.push(char::from(HEX_CHARS[(byte & 0x0F) as usize]));
            }
        }
    }
    encoded
}

const HEX_CHARS: [u8; 16] = *b"0123456789ABCDEF";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ingredient() {
        assert_eq!(
            parse_ingredient("Flour: 200g").unwrap(),
            IngredientInput::new("Flour", "200g")
        );
        assert_eq!(
            parse_ingredient("Salt").unwrap(),
            IngredientInput::new("Salt", "")
        );
        assert_eq!(
            parse_ingredient("Ratio:1:2").unwrap(),
            IngredientInput::new("Ratio", "1:2")
        );
    }

    #[test]
    fn test_parse_ingredient_blank_name() {
        assert!(parse_ingredient(" :2").is_err());
        assert!(parse_ingredient("").is_err());
    }

    #[test]
    fn test_truncate_utf8() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("Crème fraîche", 10), "Crème f...");
    }

    #[test]
    fn test_share_link_encodes_text() {
        let link = share_link("*Shopping List*:\n\n- Bread & jam");
        assert_eq!(
            link,
            "https://wa.me/?text=%2AShopping%20List%2A%3A%0A%0A-%20Bread%20%26%20jam"
        );
    }

    #[test]
    fn test_percent_encode_utf8() {
        assert_eq!(percent_encode_component("café"), "caf%C3%A9");
    }

    #[test]
    fn test_json_error_escapes() {
        assert_eq!(json_error("bad \"id\""), r#"{"error":"bad \"id\""}"#);
    }
}
