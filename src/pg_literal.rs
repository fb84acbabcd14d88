//! Minimal SQL-literal quoting helpers: an escaped `e'...'` string literal,
//! a doubled-quote identifier, and a dollar-quote tag search that increments
//! until it finds a tag the value doesn't contain.

pub fn pg_quote(value: Option<&str>) -> String {
    let Some(value) = value else { return "null".to_string() };

    let mut out = String::with_capacity(value.len() + 3);
    out.push_str("e'");
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

pub fn pg_ident_quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Returns `$tagN$value$tagN$` for the smallest `N` (rendered as `""`,
/// `"0"`, `"1"`, ...) such that the resulting delimiter does not occur
/// inside `value`.
pub fn pg_dollar_quote(tag: &str, value: Option<&str>) -> String {
    let Some(value) = value else { return "null".to_string() };

    let mut i: i64 = -1;
    loop {
        i += 1;
        let full_tag = if i > 0 { format!("${}{}$", tag, i) } else { format!("${}$", tag) };

        if !value.contains(&full_tag) {
            return format!("{full_tag}{value}{full_tag}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_escapes_backslash_quote_and_newline() {
        assert_eq!(pg_quote(Some("it's\\a\ntest")), "e'it\\'s\\\\a\\ntest'");
    }

    #[test]
    fn quote_none_is_null() {
        assert_eq!(pg_quote(None), "null");
        assert_eq!(pg_dollar_quote("do", None), "null");
    }

    #[test]
    fn ident_quote_doubles_embedded_quotes() {
        assert_eq!(pg_ident_quote("weird\"name"), "\"weird\"\"name\"");
    }

    #[test]
    fn dollar_quote_escalates_tag_when_collision() {
        let value = "contains $do$ already";
        let quoted = pg_dollar_quote("do", Some(value));
        assert_eq!(quoted, format!("$do0${value}$do0$"));
        assert!(!value.contains("$do0$"));
    }

    #[test]
    fn dollar_quote_minimal_case_has_no_suffix() {
        assert_eq!(pg_dollar_quote("do", Some("plain")), "$do$plain$do$");
    }
}
