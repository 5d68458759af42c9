//! Identifier casing shared by the passes.
use once_cell::sync::Lazy;
use regex::Regex;

// upper-run + lower tail ("HTTPServer" stays one word), plain lower runs, digits
static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Z]+[a-z0-9]*|[a-z0-9]+").expect("static word regex"));

pub fn words(s: &str) -> Vec<&str> {
    WORD.find_iter(s).map(|m| m.as_str()).collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn pascal_case(s: &str) -> String {
    words(s).into_iter().map(capitalize).collect()
}

pub fn camel_case(s: &str) -> String {
    let pascal = pascal_case(s);
    let mut chars = pascal.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Enum case identifier. A leading digit gets an `_` so the result is a
/// legal identifier in every target.
pub fn upper_snake_case(s: &str) -> String {
    let joined = words(s).iter().map(|w| w.to_uppercase()).collect::<Vec<_>>().join("_");
    match joined.chars().next() {
        None => "_".to_string(),
        Some(c) if c.is_ascii_digit() => format!("_{joined}"),
        Some(_) => joined,
    }
}

pub fn accessor(prefix: &str, name: &str) -> String {
    format!("{prefix}{}", pascal_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn casing() {
        assert_eq!(pascal_case("list_things"), "ListThings");
        assert_eq!(pascal_case("user_initiated"), "UserInitiated");
        assert_eq!(camel_case("order-id"), "orderId");
        assert_eq!(camel_case("system_initiated"), "systemInitiated");
        assert_eq!(pascal_case("abortData"), "AbortData");
    }

    #[test]
    fn enum_case_names() {
        assert_eq!(upper_snake_case("SpeciesA"), "SPECIES_A");
        assert_eq!(upper_snake_case("foo"), "FOO");
        assert_eq!(upper_snake_case("1337"), "_1337");
        assert_eq!(upper_snake_case("--"), "_");
    }

    #[test]
    fn accessors() {
        assert_eq!(accessor("get", "AbortData"), "getAbortData");
        assert_eq!(accessor("get", "with_reject"), "getWithReject");
    }
}
