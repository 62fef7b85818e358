//! Command template parsing and substitution.
//!
//! Identifiers are written `$NAME` or `${NAME}` with charset `[A-Za-z_][A-Za-z0-9_]*`, and
//! substitution leaves unresolved placeholders intact rather than erroring. That exact leniency
//! is load-bearing here: `RUN_DIR` is always substituted, but a stray `$` elsewhere in a user's
//! command must survive verbatim.

use lazy_regex::regex;
use std::collections::{HashMap, HashSet};

/// The reserved identifier that always resolves to the guest-side volume mount path.
pub const RUN_DIR: &str = "RUN_DIR";

/// Every `$NAME` / `${NAME}` identifier referenced by `command`, in first-seen order of
/// appearance but deduplicated.
pub fn identifiers(command: &str) -> Vec<String> {
    let pattern = regex!(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)");

    let mut seen = HashSet::new();
    let mut ordered = Vec::new();

    for captures in pattern.captures_iter(command) {
        let name = captures
            .get(1)
            .or_else(|| captures.get(2))
            .expect("one of the two alternatives always matches")
            .as_str();

        if seen.insert(name.to_string()) {
            ordered.push(name.to_string());
        }
    }

    ordered
}

/// Replace every `$NAME`/`${NAME}` occurrence found in `values` with its mapped string.
/// Identifiers with no entry in `values` are left exactly as written in `command`.
pub fn safe_substitute(command: &str, values: &HashMap<String, String>) -> String {
    let pattern = regex!(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)");

    pattern
        .replace_all(command, |captures: &lazy_regex::Captures| {
            let name = captures
                .get(1)
                .or_else(|| captures.get(2))
                .expect("one of the two alternatives always matches")
                .as_str();

            match values.get(name) {
                Some(value) => value.clone(),
                None => captures[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_both_bracketed_and_bare_identifiers() {
        let ids = identifiers("nmap ${target} -oN $RUN_DIR/out.xml $target");
        assert_eq!(ids, vec!["target".to_string(), "RUN_DIR".to_string()]);
    }

    #[test]
    fn substitution_leaves_unknown_placeholders_verbatim() {
        let mut values = HashMap::new();
        values.insert("RUN_DIR".to_string(), "/workspace".to_string());

        let out = safe_substitute("echo $RUN_DIR $unknown cost=\\$5", &values);
        assert_eq!(out, "echo /workspace $unknown cost=\\$5");
    }

    #[test]
    fn substitutes_every_known_placeholder() {
        let mut values = HashMap::new();
        values.insert("target".to_string(), "1.1.1.1".to_string());

        let out = safe_substitute("nmap $target", &values);
        assert_eq!(out, "nmap 1.1.1.1");
    }
}
