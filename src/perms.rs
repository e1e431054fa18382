//! Permission groups (`Groups`/`UserGroups`, spec §6), grounded on the
//! original's `perms.go` and supplemented with the wildcard-suffix matching
//! spec.md names but that file doesn't implement: a group's permission list
//! may contain an entry ending in `.*`, which grants every permission
//! sharing that prefix.

use crate::config::Config;

/// Permissions held by `name` under the group it's mapped to (or `default`
/// if unmapped). Returns an empty list for the anonymous (empty-name) case,
/// same as the original treating an un-named connection as permission-less.
pub fn perms(config: &Config, name: &str) -> Vec<String> {
    if name.is_empty() {
        return Vec::new();
    }

    let group = config
        .user_groups
        .get(name)
        .map(String::as_str)
        .unwrap_or("default");

    config.groups.get(group).cloned().unwrap_or_default()
}

fn grants(held: &str, wanted: &str) -> bool {
    if held == wanted {
        return true;
    }
    if let Some(prefix) = held.strip_suffix(".*") {
        return wanted == prefix || wanted.starts_with(&format!("{prefix}."));
    }
    false
}

pub fn has_perms(config: &Config, name: &str, want: &[&str]) -> bool {
    let held = perms(config, name);
    want.iter()
        .all(|w| held.iter().any(|h| grants(h, w)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(groups: &[(&str, &[&str])], user_groups: &[(&str, &str)]) -> Config {
        let mut config = Config::default();
        config.groups = groups
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect::<HashMap<_, _>>();
        config.user_groups = user_groups
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config
    }

    #[test]
    fn unmapped_user_gets_default_group() {
        let config = config_with(&[("default", &["fly"])], &[]);
        assert_eq!(perms(&config, "zed"), vec!["fly".to_string()]);
    }

    #[test]
    fn mapped_user_gets_their_group() {
        let config = config_with(
            &[("default", &["fly"]), ("admin", &["fly", "ban"])],
            &[("zed", "admin")],
        );
        assert!(has_perms(&config, "zed", &["fly", "ban"]));
        assert!(!has_perms(&config, "zed", &["noclip"]));
    }

    #[test]
    fn wildcard_suffix_grants_prefixed_perms() {
        let config = config_with(&[("admin", &["chat.*"])], &[("zed", "admin")]);
        assert!(has_perms(&config, "zed", &["chat.kick"]));
        assert!(has_perms(&config, "zed", &["chat"]));
        assert!(!has_perms(&config, "zed", &["fly"]));
    }

    #[test]
    fn anonymous_has_no_perms() {
        let config = config_with(&[("default", &["fly"])], &[]);
        assert!(perms(&config, "").is_empty());
    }
}
