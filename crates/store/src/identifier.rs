/// The single place in this crate allowed to validate a name before it is
/// spliced into SQL (schema names, discovered `*_events` table names).
///
/// Mirrors `chainidx_common::config::is_valid_identifier` exactly — both
/// enforce `^[A-Za-z_][A-Za-z0-9_]{0,62}$` — so a name accepted at config
/// load time is guaranteed to pass here too.
pub const MAX_IDENTIFIER_LEN: usize = 63;

pub fn is_valid_identifier(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_IDENTIFIER_LEN {
        return false;
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap();
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_names() {
        assert!(is_valid_identifier("accounts"));
        assert!(is_valid_identifier("generic_events"));
        assert!(is_valid_identifier("_events"));
    }

    #[test]
    fn rejects_sql_injection_attempts() {
        assert!(!is_valid_identifier("accounts; DROP TABLE _events;--"));
        assert!(!is_valid_identifier("accounts\" OR 1=1"));
        assert!(!is_valid_identifier("1accounts"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier(&"a".repeat(64)));
    }
}
