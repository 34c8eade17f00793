//! `${VAR}` / `${VAR:-default}` expansion (§4.10, §6), generalized from the teacher's
//! `config/loader.rs::replace_placeholders` `@name` substitution into the spec's shell-style
//! placeholder syntax.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}").unwrap());

/// Expand every `${VAR}`/`${VAR:-default}` occurrence in `input` against the process
/// environment. An unset variable with no default expands to empty and emits a warning
/// (§4.10); one with a default silently substitutes it.
pub fn expand_env_placeholders(input: &str) -> String {
    PLACEHOLDER
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(3).map(|m| m.as_str());
            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => match default {
                    Some(d) => d.to_string(),
                    None => {
                        warn!(variable = %var_name, "unset ${{VAR}} placeholder with no default expands to empty");
                        String::new()
                    }
                },
            }
        })
        .into_owned()
}

/// Same expansion applied to raw bytes, used for rendered distribution config files and
/// patch directories (§4.4, §4.10).
pub fn expand_env_placeholders_bytes(input: &[u8]) -> Vec<u8> {
    expand_env_placeholders(&String::from_utf8_lossy(input)).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn substitutes_present_variable() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("KSAIL_TEST_VAR", "hello");
        assert_eq!(expand_env_placeholders("${KSAIL_TEST_VAR}/path"), "hello/path");
        env::remove_var("KSAIL_TEST_VAR");
    }

    #[test]
    fn falls_back_to_default_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var("KSAIL_TEST_UNSET");
        assert_eq!(
            expand_env_placeholders("${KSAIL_TEST_UNSET:-fallback}"),
            "fallback"
        );
    }

    #[test]
    fn unset_with_no_default_expands_to_empty() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var("KSAIL_TEST_UNSET_2");
        assert_eq!(expand_env_placeholders("x${KSAIL_TEST_UNSET_2}y"), "xy");
    }
}
