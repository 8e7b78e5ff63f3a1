//! Prefix-based path rewriting for archive entries.
//!
//! Artifacts are built against a fixed install prefix; an ordered rule list
//! maps every archive-internal path onto the configured target filesystem.

use crate::config::{Paths, PROJECT_NAME};

/// The install prefix baked into artifact archives.
pub const ARTIFACT_PREFIX: &str = "usr/local/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOp {
    /// Substitute `target` for a leading `source`.
    Replace,
    /// Prepend `target` unless the path already starts with it.
    Prepend,
}

/// One ordered rewrite rule. Rule lists are built once per run from the
/// installation-mode configuration and applied read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteRule {
    pub source: String,
    pub target: String,
    pub op: RuleOp,
    /// Stop processing as soon as this rule fires.
    pub abort: bool,
}

impl RewriteRule {
    pub fn replace(source: &str, target: &str, abort: bool) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            op: RuleOp::Replace,
            abort,
        }
    }

    pub fn prepend(target: &str) -> Self {
        Self {
            source: String::new(),
            target: target.to_string(),
            op: RuleOp::Prepend,
            abort: false,
        }
    }
}

/// Apply `rules` in order to `path`.
///
/// A firing rule with `abort` stops processing immediately; otherwise
/// processing stops once the path has become absolute or starts with `./`.
pub fn apply_rules(path: &str, rules: &[RewriteRule]) -> String {
    let mut current = path.to_string();

    for rule in rules {
        let fired = match rule.op {
            RuleOp::Replace => {
                if let Some(rest) = current.strip_prefix(&rule.source) {
                    current = format!("{}{}", rule.target, rest);
                    true
                } else {
                    false
                }
            }
            RuleOp::Prepend => {
                if current.starts_with(&rule.target) {
                    false
                } else {
                    current = format!("{}{}", rule.target, current);
                    true
                }
            }
        };

        if fired && rule.abort {
            break;
        }
        if current.starts_with('/') || current.starts_with("./") {
            break;
        }
    }

    current
}

/// The standard rule list for an installation run: strip the artifact
/// prefix, redirect state subpaths to the configured roots, apply user-mode
/// integration redirects, then prepend the target directory as a catch-all.
pub fn default_rules(paths: &Paths) -> Vec<RewriteRule> {
    let mut rules = vec![RewriteRule::replace(ARTIFACT_PREFIX, "", false)];

    rules.push(RewriteRule::replace(
        &format!("var/lib/{PROJECT_NAME}/"),
        &format!("{}/", paths.lib_dir().display()),
        true,
    ));
    rules.push(RewriteRule::replace(
        &format!("var/cache/{PROJECT_NAME}/"),
        &format!("{}/", paths.cache_dir().display()),
        true,
    ));

    if paths.user {
        let target = paths.target_str();
        rules.push(RewriteRule::replace(
            "etc/systemd/user/",
            &format!("{target}/share/systemd/user/"),
            true,
        ));
        rules.push(RewriteRule::replace(
            "etc/profile.d/",
            &format!("{target}/share/profile.d/"),
            true,
        ));
        rules.push(RewriteRule::replace(
            "share/bash-completion/",
            &format!("{target}/share/bash-completion/"),
            true,
        ));
    }

    rules.push(RewriteRule::prepend(&format!("{}/", paths.target_str())));
    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_paths() -> Paths {
        let mut paths = Paths::system();
        paths.prefix = PathBuf::new();
        paths
    }

    #[test]
    fn replace_only_fires_on_prefix_match() {
        let rules = vec![RewriteRule::replace("usr/local/", "", false)];
        assert_eq!(apply_rules("opt/thing", &rules), "opt/thing");
        assert_eq!(apply_rules("usr/local/bin/jq", &rules), "bin/jq");
    }

    #[test]
    fn abort_rule_stops_processing() {
        let rules = vec![
            RewriteRule::replace("var/lib/", "/srv/lib/", true),
            RewriteRule::prepend("/usr/local/"),
        ];
        assert_eq!(apply_rules("var/lib/x", &rules), "/srv/lib/x");
    }

    #[test]
    fn absolute_result_stops_processing() {
        let rules = vec![
            RewriteRule::replace("usr/local/", "/opt/", false),
            RewriteRule::prepend("/usr/local/"),
        ];
        // First rule makes the path absolute, so the prepend never fires.
        assert_eq!(apply_rules("usr/local/bin/jq", &rules), "/opt/bin/jq");
    }

    #[test]
    fn prepend_skips_when_already_prefixed() {
        let rules = vec![RewriteRule::prepend("bin/")];
        assert_eq!(apply_rules("bin/jq", &rules), "bin/jq");
    }

    #[test]
    fn default_rules_route_binaries_to_target() {
        let rules = default_rules(&test_paths());
        assert_eq!(apply_rules("usr/local/bin/jq", &rules), "/usr/local/bin/jq");
    }

    #[test]
    fn default_rules_route_state_to_lib_root() {
        let rules = default_rules(&test_paths());
        assert_eq!(
            apply_rules("var/lib/toolpak/manifests/jq.txt", &rules),
            "/var/lib/toolpak/manifests/jq.txt"
        );
    }

    #[test]
    fn rewrite_is_deterministic() {
        let rules = default_rules(&test_paths());
        let a = apply_rules("usr/local/share/doc/jq/README", &rules);
        let b = apply_rules("usr/local/share/doc/jq/README", &rules);
        assert_eq!(a, b);
    }
}
