//! # Prompt Variable Substitution
//!
//! Replaces placeholders in prompt text with per-call variable values before
//! the text is sent to the AI service. Two placeholder syntaxes are accepted,
//! `${name}` and `[name]`, because client prompt authors use both.
//!
//! Provider-supplied user-to-user variables arrive with a `uui_` key prefix;
//! templates may reference them with or without the prefix, so `${monto_deuda}`
//! resolves from the `uui_monto_deuda` variable.
//!
//! Unresolved placeholders are left verbatim. Replacement is a single
//! left-to-right pass over the template, so a substituted value is never
//! itself re-scanned for further placeholders.

use std::collections::HashMap;

/// Prefix carried by provider user-to-user variables.
const UUI_PREFIX: &str = "uui_";

/// Resolve a placeholder name against the variable map.
///
/// Tries the name directly, then with the `uui_` prefix added. Empty values
/// count as unresolved so an empty header never blanks out prompt text.
fn resolve<'a>(name: &str, variables: &'a HashMap<String, String>) -> Option<&'a str> {
    variables
        .get(name)
        .or_else(|| variables.get(&format!("{}{}", UUI_PREFIX, name)))
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

/// Replace `${name}` and `[name]` placeholders in `content` with values from
/// `variables`. Placeholders that do not resolve are left untouched.
pub fn replace_variables(content: &str, variables: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(content.len());
    let bytes = content.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        // ${name}
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            if let Some(end) = content[i + 2..].find('}') {
                let name = &content[i + 2..i + 2 + end];
                if let Some(value) = resolve(name, variables) {
                    out.push_str(value);
                    i += 2 + end + 1;
                    continue;
                }
            }
        }
        // [name]
        if bytes[i] == b'[' {
            if let Some(end) = content[i + 1..].find(']') {
                let name = &content[i + 1..i + 1 + end];
                if let Some(value) = resolve(name, variables) {
                    out.push_str(value);
                    i += 1 + end + 1;
                    continue;
                }
            }
        }

        // Advance one full character, not one byte.
        let ch = content[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_dollar_brace_syntax() {
        let variables = vars(&[("name", "Ana")]);
        assert_eq!(replace_variables("Hello ${name}", &variables), "Hello Ana");
    }

    #[test]
    fn test_bracket_syntax() {
        let variables = vars(&[("name", "Ana")]);
        assert_eq!(replace_variables("Hello [name]", &variables), "Hello Ana");
    }

    #[test]
    fn test_unresolved_left_verbatim() {
        let variables = vars(&[("name", "Ana")]);
        assert_eq!(
            replace_variables("Hi ${missing} and [also_missing]", &variables),
            "Hi ${missing} and [also_missing]"
        );
    }

    #[test]
    fn test_uui_prefix_stripping() {
        let variables = vars(&[("uui_monto_deuda", "1500")]);
        assert_eq!(
            replace_variables("Debe ${monto_deuda} y [monto_deuda]", &variables),
            "Debe 1500 y 1500"
        );
        // The prefixed form works too.
        assert_eq!(
            replace_variables("Debe ${uui_monto_deuda}", &variables),
            "Debe 1500"
        );
    }

    #[test]
    fn test_values_not_rescanned() {
        // A value containing placeholder syntax must come through literally.
        let variables = vars(&[("a", "${b}"), ("b", "X")]);
        assert_eq!(replace_variables("${a}", &variables), "${b}");
    }

    #[test]
    fn test_empty_value_counts_as_unresolved() {
        let variables = vars(&[("name", "")]);
        assert_eq!(replace_variables("Hello ${name}", &variables), "Hello ${name}");
    }

    #[test]
    fn test_multiple_replacements() {
        let variables = vars(&[("ani", "3001234567"), ("client_id", "keralty")]);
        assert_eq!(
            replace_variables("Caller [ani] for ${client_id}.", &variables),
            "Caller 3001234567 for keralty."
        );
    }
}
