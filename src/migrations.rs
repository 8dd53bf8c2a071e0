//! One-time rewrite of scripts saved by older panel versions.
//!
//! Older scripts referred to `parameters` and to host helpers as free
//! identifiers. Those now live on `options` and `utils`.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

/// First version whose scripts use the current identifiers.
pub const CURRENT_SCRIPT_VERSION: &str = "1.8.0";

/// Script-bearing option keys.
const SCRIPT_KEYS: [&str; 2] = ["script", "onclick"];

/// Helpers that moved under `utils`.
const UTILS_MEMBERS: [&str; 5] = [
    "timeZone",
    "dayjs",
    "matchTimezone",
    "locationService",
    "getTemplateSrv",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Migration {
    pub options: Value,
    pub changed: bool,
    /// Version the options were migrated from, if known.
    pub from_version: Option<String>,
}

struct Rewrite {
    pattern: Regex,
    replacement: String,
}

/// Matches a bare identifier: not preceded by `.`, a word character or `$`.
fn bare_identifier(name: &str) -> Option<Regex> {
    Regex::new(&format!(r"(^|[^.\w$]){}\b", regex::escape(name))).ok()
}

fn rewrites() -> &'static [Rewrite] {
    static REWRITES: OnceLock<Vec<Rewrite>> = OnceLock::new();
    REWRITES.get_or_init(|| {
        let mut rules = Vec::new();
        if let Some(pattern) = bare_identifier("parameters") {
            rules.push(Rewrite {
                pattern,
                replacement: "${1}options".to_string(),
            });
        }
        for name in UTILS_MEMBERS {
            if let Some(pattern) = bare_identifier(name) {
                rules.push(Rewrite {
                    pattern,
                    replacement: format!("${{1}}utils.{name}"),
                });
            }
        }
        rules
    })
}

/// Rewrite legacy identifiers in one script.
pub fn migrate_script(script: &str) -> String {
    rewrites().iter().fold(script.to_string(), |text, rule| {
        rule.pattern
            .replace_all(&text, rule.replacement.as_str())
            .into_owned()
    })
}

fn parse_version(version: &str) -> Option<Vec<u64>> {
    let core = version.trim().trim_start_matches('v');
    let core = core.split(['-', '+']).next().unwrap_or_default();
    core.split('.').map(|part| part.parse().ok()).collect()
}

/// Whether options saved by `stored` need migrating. Missing or unparsable
/// versions are treated as old.
pub fn needs_migration(stored: Option<&str>) -> bool {
    let (Some(stored), Some(current)) = (
        stored.and_then(parse_version),
        parse_version(CURRENT_SCRIPT_VERSION),
    ) else {
        return true;
    };
    stored < current
}

/// Migrate a stored option bag.
pub fn migrate_options(mut options: Value, stored_version: Option<&str>) -> Migration {
    let from_version = stored_version.map(str::to_string);
    if !needs_migration(stored_version) {
        return Migration {
            options,
            changed: false,
            from_version,
        };
    }

    let mut changed = false;
    if let Value::Object(map) = &mut options {
        for key in SCRIPT_KEYS {
            if let Some(Value::String(script)) = map.get_mut(key) {
                let migrated = migrate_script(script);
                if migrated != *script {
                    log::info!("Migrated legacy identifiers in '{}'", key);
                    *script = migrated;
                    changed = true;
                }
            }
        }
    }

    Migration {
        options,
        changed,
        from_version,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rewrites_bare_identifiers() {
        let script = "let tz = timeZone;\nlet l = parameters.layout;\nmatchTimezone(x, tz);";
        assert_eq!(
            migrate_script(script),
            "let tz = utils.timeZone;\nlet l = options.layout;\nutils.matchTimezone(x, tz);"
        );
    }

    #[test]
    fn test_qualified_identifiers_untouched() {
        let script = "utils.timeZone + options.timeZoneName + my_dayjs";
        assert_eq!(migrate_script(script), script);
    }

    #[test]
    fn test_migration_is_idempotent() {
        let once = migrate_script("getTemplateSrv().replace(x)");
        assert_eq!(once, "utils.getTemplateSrv().replace(x)");
        assert_eq!(migrate_script(&once), once);
    }

    #[test]
    fn test_version_gate() {
        assert!(needs_migration(None));
        assert!(needs_migration(Some("1.7.2")));
        assert!(needs_migration(Some("garbage")));
        assert!(!needs_migration(Some("1.8.0")));
        assert!(!needs_migration(Some("v1.10.0-beta")));
    }

    #[test]
    fn test_migrate_options() {
        let options = json!({ "script": "return parameters;", "onclick": "", "title": "x" });
        let migration = migrate_options(options.clone(), Some("1.6.0"));
        assert!(migration.changed);
        assert_eq!(migration.options["script"], json!("return options;"));
        assert_eq!(migration.options["title"], json!("x"));

        let current = migrate_options(options.clone(), Some("1.8.1"));
        assert!(!current.changed);
        assert_eq!(current.options, options);
    }
}
