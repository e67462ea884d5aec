//! Property tests for command rendering.

use hacore_session::{shell_quote, CommandTable, CommandTemplate};
use proptest::prelude::*;

/// Undo POSIX single-quote quoting produced by `shell_quote`.
fn unquote(quoted: &str) -> String {
    let mut out = String::new();
    let mut in_quote = false;
    let mut chars = quoted.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' => in_quote = !in_quote,
            '\\' if !in_quote => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            other => out.push(other),
        }
    }
    out
}

proptest! {
    #[test]
    fn prop_quote_roundtrips(value in "\\PC{0,40}") {
        prop_assert_eq!(unquote(&shell_quote(&value)), value);
    }

    #[test]
    fn prop_quoted_value_has_no_bare_metachars(value in "[a-z ;|&$`<>]{1,20}") {
        let quoted = shell_quote(&value);
        if quoted != value {
            prop_assert!(quoted.starts_with('\''));
            prop_assert!(quoted.ends_with('\''));
        }
    }

    #[test]
    fn prop_render_is_deterministic(value in "\\PC{0,20}") {
        let mut table = CommandTable::new();
        table.insert("x", CommandTemplate::new("drbdadm up {volume}"));
        let a = table.render("x", &[("volume", value.as_str())]).unwrap();
        let b = table.render("x", &[("volume", value.as_str())]).unwrap();
        prop_assert_eq!(a, b);
    }
}
