//! Environment variable loading.
//!
//! Keeps the fallback chains in one place so callers never repeat
//! `or_else` ladders.

use std::env;
use std::path::Path;

/// Load `.env` from the current directory into the process environment.
/// Variables that are already set win over the file.
pub fn load_dotenv() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let dir = env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));
        load_dotenv_from_dir(&dir);
    });
}

/// Load `<dir>/.env` without overriding existing variables.
pub fn load_dotenv_from_dir(dir: &Path) {
    let path = dir.join(".env");
    let Ok(content) = std::fs::read_to_string(&path) else {
        return;
    };
    for (key, value) in parse_dotenv(&content) {
        if env::var(&key).is_err() {
            env::set_var(key, value);
        }
    }
}

fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some(eq_pos) = line.find('=') else {
            continue;
        };
        let key = line[..eq_pos].trim();
        let mut value = line[eq_pos + 1..].trim();
        // Strip inline comment (# not inside quotes)
        if let Some(hash_pos) = value.find('#') {
            let before_hash = value[..hash_pos].trim_end();
            if !before_hash.contains('"') && !before_hash.contains('\'') {
                value = before_hash;
            }
        }
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            value = &value[1..value.len() - 1];
        }
        if !key.is_empty() {
            pairs.push((key.to_string(), value.to_string()));
        }
    }
    pairs
}

/// Read `primary` or the first set alias, falling back to `default`.
pub fn env_or<F>(primary: &str, aliases: &[&str], default: F) -> String
where
    F: FnOnce() -> String,
{
    env_optional(primary, aliases).unwrap_or_else(default)
}

/// Read `primary` or the first set alias. Empty values count as unset.
pub fn env_optional(primary: &str, aliases: &[&str]) -> Option<String> {
    env::var(primary)
        .ok()
        .or_else(|| aliases.iter().find_map(|a| env::var(a).ok()))
        .and_then(|s| {
            let s = s.trim().to_string();
            if s.is_empty() {
                None
            } else {
                Some(s)
            }
        })
}

/// Parse a boolean variable: 0/false/no/off are false, anything else true.
pub fn env_bool(primary: &str, aliases: &[&str], default: bool) -> bool {
    match env_optional(primary, aliases).as_deref() {
        Some(s) => !matches!(
            s.to_lowercase().as_str(),
            "0" | "false" | "no" | "off"
        ),
        None => default,
    }
}

/// Parse an unsigned integer variable; unparsable values fall back to `default`.
pub fn env_u64(primary: &str, aliases: &[&str], default: u64) -> u64 {
    match env_optional(primary, aliases) {
        Some(s) => s.parse::<u64>().unwrap_or_else(|_| {
            tracing::warn!("Ignoring non-numeric {}={}, using {}", primary, s, default);
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dotenv_quotes_and_comments() {
        let pairs = parse_dotenv(
            "# comment\nA=1\nexport B=\"two words\"\nC='x' \nD=value # trailing\n\nE=\n",
        );
        assert_eq!(
            pairs,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "two words".to_string()),
                ("C".to_string(), "x".to_string()),
                ("D".to_string(), "value".to_string()),
                ("E".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_env_optional_alias_and_empty() {
        env::set_var("SPLATKIT_TEST_LOADER_EMPTY", "  ");
        env::set_var("SPLATKIT_TEST_LOADER_ALIAS", "from-alias");
        assert_eq!(
            env_optional("SPLATKIT_TEST_LOADER_EMPTY", &[]),
            None
        );
        assert_eq!(
            env_optional("SPLATKIT_TEST_LOADER_MISSING", &["SPLATKIT_TEST_LOADER_ALIAS"]),
            Some("from-alias".to_string())
        );
    }

    #[test]
    fn test_env_bool_and_u64() {
        env::set_var("SPLATKIT_TEST_LOADER_BOOL", "off");
        env::set_var("SPLATKIT_TEST_LOADER_NUM", "abc");
        assert!(!env_bool("SPLATKIT_TEST_LOADER_BOOL", &[], true));
        assert!(env_bool("SPLATKIT_TEST_LOADER_BOOL_MISSING", &[], true));
        assert_eq!(env_u64("SPLATKIT_TEST_LOADER_NUM", &[], 7), 7);
    }

    #[test]
    fn test_load_dotenv_does_not_override() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "SPLATKIT_TEST_DOTENV_NEW=file\nSPLATKIT_TEST_DOTENV_SET=file\n",
        )
        .unwrap();
        env::set_var("SPLATKIT_TEST_DOTENV_SET", "process");
        load_dotenv_from_dir(dir.path());
        assert_eq!(env::var("SPLATKIT_TEST_DOTENV_NEW").unwrap(), "file");
        assert_eq!(env::var("SPLATKIT_TEST_DOTENV_SET").unwrap(), "process");
    }
}
