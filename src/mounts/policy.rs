use super::{MountAllowlist, MountDenied, MountPolicyError, MountRequest, ResolvedMount};
use crate::group::GroupIdentity;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Component names that are never mountable, whatever the allow rules say.
pub const DEFAULT_BLOCKED_PATTERNS: &[&str] = &[
    ".ssh",
    ".gnupg",
    ".gpg",
    ".aws",
    ".azure",
    ".gcloud",
    ".kube",
    ".docker",
    ".env",
    ".env.*",
    ".netrc",
    ".npmrc",
    ".pypirc",
    "id_rsa*",
    "id_ed25519*",
    "id_ecdsa*",
    "private_key*",
    "*.pem",
    "credentials*",
    ".secret*",
];

#[derive(Debug)]
struct CompiledRule {
    pattern: String,
    matcher: GlobSet,
    read_write: bool,
}

#[derive(Debug)]
struct CompiledRules {
    allow: Vec<CompiledRule>,
    deny: Vec<CompiledRule>,
    blocked_patterns: Vec<String>,
    blocked: GlobSet,
}

/// Decides which host paths an execution may see. Loaded once from a file
/// outside every mountable directory; [`MountPolicy::reload`] re-reads it.
#[derive(Debug)]
pub struct MountPolicy {
    allowlist_path: PathBuf,
    rules: Option<CompiledRules>,
}

impl MountPolicy {
    pub fn load(allowlist_path: &Path) -> Result<Self, MountPolicyError> {
        let rules = match MountAllowlist::load(allowlist_path)? {
            Some(allowlist) => Some(compile(&allowlist)?),
            None => None,
        };
        Ok(Self {
            allowlist_path: allowlist_path.to_path_buf(),
            rules,
        })
    }

    /// On failure the previously loaded rules stay in effect.
    pub fn reload(&mut self) -> Result<(), MountPolicyError> {
        let fresh = Self::load(&self.allowlist_path)?;
        self.rules = fresh.rules;
        Ok(())
    }

    pub fn allowlist_path(&self) -> &Path {
        &self.allowlist_path
    }

    pub fn has_allowlist(&self) -> bool {
        self.rules.is_some()
    }

    pub fn resolve(
        &self,
        group: &GroupIdentity,
        request: &MountRequest,
    ) -> Result<ResolvedMount, MountDenied> {
        let raw = request.host_path.trim();
        if has_parent_component(Path::new(raw)) {
            return Err(MountDenied::Traversal {
                path: raw.to_string(),
            });
        }
        let container_path = container_path_for(request)?;

        let Some(rules) = &self.rules else {
            return Err(MountDenied::NoAllowlist {
                path: self.allowlist_path.display().to_string(),
            });
        };

        let expanded = expand_home(raw);
        if !expanded.is_absolute() {
            return Err(MountDenied::RelativeHostPath {
                path: raw.to_string(),
            });
        }
        let real = fs::canonicalize(&expanded).map_err(|err| MountDenied::Unresolvable {
            path: raw.to_string(),
            reason: err.to_string(),
        })?;
        let real_display = real.display().to_string();

        if self.exposes_allowlist(&real) {
            return Err(MountDenied::ExposesAllowlist { path: real_display });
        }

        for component in real.components() {
            let Component::Normal(name) = component else {
                continue;
            };
            if let Some(index) = rules.blocked.matches(Path::new(name)).first() {
                return Err(MountDenied::Blocked {
                    path: real_display,
                    pattern: rules.blocked_patterns[*index].clone(),
                });
            }
        }

        if let Some(rule) = rules.deny.iter().find(|rule| rule.matcher.is_match(&real)) {
            return Err(MountDenied::DeniedByRule {
                path: real_display,
                pattern: rule.pattern.clone(),
            });
        }

        // Most specific allow rule decides read-write eligibility.
        let Some(rule) = rules
            .allow
            .iter()
            .filter(|rule| rule.matcher.is_match(&real))
            .max_by_key(|rule| rule.pattern.len())
        else {
            return Err(MountDenied::NotAllowed { path: real_display });
        };

        let read_write = !request.read_only && rule.read_write && group.is_privileged;
        Ok(ResolvedMount {
            host_path: real,
            container_path,
            read_only: !read_write,
        })
    }

    /// Resolves every request, logging and dropping the denied ones.
    pub fn resolve_all(&self, group: &GroupIdentity, requests: &[MountRequest]) -> Vec<ResolvedMount> {
        let mut approved = Vec::new();
        for request in requests {
            match self.resolve(group, request) {
                Ok(mount) => approved.push(mount),
                Err(denied) => tracing::warn!(
                    group = %group.folder,
                    host_path = %request.host_path,
                    reason = %denied,
                    "additional mount denied"
                ),
            }
        }
        approved
    }

    fn exposes_allowlist(&self, real: &Path) -> bool {
        let file = fs::canonicalize(&self.allowlist_path)
            .unwrap_or_else(|_| self.allowlist_path.clone());
        let dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
        real == file || dir.starts_with(real) || real.starts_with(&dir)
    }
}

fn compile(allowlist: &MountAllowlist) -> Result<CompiledRules, MountPolicyError> {
    let mut allow = Vec::new();
    let mut deny = Vec::new();
    for rule in &allowlist.rules {
        let compiled = CompiledRule {
            pattern: rule.path_pattern.clone(),
            matcher: build_rule_matcher(&rule.path_pattern)?,
            read_write: rule.read_write,
        };
        if rule.allowed {
            allow.push(compiled);
        } else {
            deny.push(compiled);
        }
    }

    let blocked_patterns: Vec<String> = DEFAULT_BLOCKED_PATTERNS
        .iter()
        .map(|p| p.to_string())
        .chain(allowlist.blocked_patterns.iter().cloned())
        .collect();
    let mut builder = GlobSetBuilder::new();
    for pattern in &blocked_patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .literal_separator(true)
            .build()
            .map_err(|err| pattern_error(pattern, err))?;
        builder.add(glob);
    }
    let blocked = builder
        .build()
        .map_err(|err| pattern_error("blockedPatterns", err))?;

    Ok(CompiledRules {
        allow,
        deny,
        blocked_patterns,
        blocked,
    })
}

/// A rule covers the path itself and everything beneath it.
fn build_rule_matcher(raw: &str) -> Result<GlobSet, MountPolicyError> {
    let base = rule_base(raw)?;
    let mut builder = GlobSetBuilder::new();
    for pattern in [base.clone(), format!("{}/**", base.trim_end_matches('/'))] {
        let glob = GlobBuilder::new(&pattern)
            .literal_separator(true)
            .build()
            .map_err(|err| pattern_error(raw, err))?;
        builder.add(glob);
    }
    builder.build().map_err(|err| pattern_error(raw, err))
}

fn rule_base(raw: &str) -> Result<String, MountPolicyError> {
    let expanded = expand_home(raw.trim());
    if !expanded.is_absolute() || has_parent_component(&expanded) {
        return Err(MountPolicyError::Pattern {
            pattern: raw.to_string(),
            reason: "rule patterns must be absolute paths without `..`".to_string(),
        });
    }
    let text = expanded.display().to_string();
    // Literal patterns are matched against canonical paths, so resolve them too.
    if !text.contains(['*', '?', '[', '{']) {
        if let Ok(real) = fs::canonicalize(&expanded) {
            return Ok(real.display().to_string());
        }
    }
    Ok(text)
}

fn container_path_for(request: &MountRequest) -> Result<String, MountDenied> {
    let raw = match &request.container_path {
        Some(path) => path.trim().to_string(),
        None => Path::new(request.host_path.trim())
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default(),
    };
    let invalid = |reason: &str| MountDenied::InvalidContainerPath {
        path: raw.clone(),
        reason: reason.to_string(),
    };
    if raw.is_empty() {
        return Err(invalid("must be non-empty"));
    }
    if raw.contains(':') {
        return Err(invalid("must not contain `:`"));
    }
    let path = Path::new(&raw);
    if path.is_absolute() || raw.starts_with('/') {
        return Err(invalid("must be relative to /workspace/extra"));
    }
    if has_parent_component(path) {
        return Err(MountDenied::Traversal { path: raw.clone() });
    }
    if !path
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
    {
        return Err(invalid("must contain only plain path segments"));
    }
    Ok(raw)
}

fn has_parent_component(path: &Path) -> bool {
    path.components()
        .any(|component| matches!(component, Component::ParentDir))
}

fn expand_home(raw: &str) -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    match (raw, home) {
        ("~", Some(home)) => home,
        (rest, Some(home)) if rest.starts_with("~/") => home.join(&rest[2..]),
        (other, _) => PathBuf::from(other),
    }
}

fn pattern_error(pattern: &str, err: globset::Error) -> MountPolicyError {
    MountPolicyError::Pattern {
        pattern: pattern.to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::ids::GroupFolder;
    use tempfile::tempdir;

    fn identity(folder: &str, is_privileged: bool) -> GroupIdentity {
        GroupIdentity {
            folder: GroupFolder::parse(folder).expect("folder"),
            is_privileged,
        }
    }

    fn request(path: &Path, read_only: bool) -> MountRequest {
        MountRequest {
            host_path: path.display().to_string(),
            container_path: None,
            read_only,
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        policy: MountPolicy,
    }

    fn fixture(extra_rules: &str) -> Fixture {
        let dir = tempdir().expect("tempdir");
        let root = fs::canonicalize(dir.path()).expect("canonical root");
        fs::create_dir_all(root.join("projects/app")).expect("projects");
        fs::create_dir_all(root.join("projects/private")).expect("private");
        fs::create_dir_all(root.join("home/.ssh")).expect("ssh");
        fs::create_dir_all(root.join("config")).expect("config dir");
        let allowlist = root.join("config/mount-allowlist.yaml");
        fs::write(
            &allowlist,
            format!(
                "rules:\n  - pathPattern: {root}/projects\n    allowed: true\n    readWrite: true\n  - pathPattern: {root}/projects/private\n    allowed: false\n  - pathPattern: {root}/home\n    allowed: true\n  - pathPattern: {root}/config\n    allowed: true\n{extra_rules}",
                root = root.display()
            ),
        )
        .expect("write allowlist");
        let policy = MountPolicy::load(&allowlist).expect("load policy");
        Fixture {
            _dir: dir,
            root,
            policy,
        }
    }

    #[test]
    fn allowed_path_resolves_with_default_container_path() {
        let fx = fixture("");
        let mount = fx
            .policy
            .resolve(&identity("main", true), &request(&fx.root.join("projects/app"), false))
            .expect("allowed");
        assert_eq!(mount.host_path, fx.root.join("projects/app"));
        assert_eq!(mount.container_path, "app");
        assert!(!mount.read_only);
    }

    #[test]
    fn parent_traversal_is_denied_even_under_an_allowed_root() {
        let fx = fixture("");
        let sneaky = format!("{}/projects/../../etc/passwd", fx.root.display());
        let denied = fx
            .policy
            .resolve(
                &identity("main", true),
                &MountRequest {
                    host_path: sneaky,
                    container_path: None,
                    read_only: true,
                },
            )
            .expect_err("traversal");
        assert!(matches!(denied, MountDenied::Traversal { .. }));

        let denied = fx
            .policy
            .resolve(
                &identity("main", true),
                &MountRequest {
                    host_path: "/workspace/../etc/passwd".to_string(),
                    container_path: None,
                    read_only: true,
                },
            )
            .expect_err("traversal");
        assert!(matches!(denied, MountDenied::Traversal { .. }));
    }

    #[test]
    fn deny_rules_win_over_broader_allow_rules() {
        let fx = fixture("");
        let denied = fx
            .policy
            .resolve(
                &identity("main", true),
                &request(&fx.root.join("projects/private"), true),
            )
            .expect_err("denied");
        assert!(matches!(denied, MountDenied::DeniedByRule { .. }));
    }

    #[test]
    fn sensitive_names_are_blocked_without_explicit_rules() {
        let fx = fixture("");
        let denied = fx
            .policy
            .resolve(&identity("main", true), &request(&fx.root.join("home/.ssh"), true))
            .expect_err("blocked");
        assert!(matches!(denied, MountDenied::Blocked { ref pattern, .. } if pattern == ".ssh"));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_checked_at_their_real_target() {
        let fx = fixture("");
        let link = fx.root.join("projects/innocent");
        std::os::unix::fs::symlink(fx.root.join("home/.ssh"), &link).expect("symlink");
        let denied = fx
            .policy
            .resolve(&identity("main", true), &request(&link, true))
            .expect_err("blocked via symlink");
        assert!(matches!(denied, MountDenied::Blocked { .. }));
    }

    #[test]
    fn non_privileged_groups_are_forced_read_only() {
        let fx = fixture("");
        let mount = fx
            .policy
            .resolve(
                &identity("family", false),
                &request(&fx.root.join("projects/app"), false),
            )
            .expect("allowed");
        assert!(mount.read_only);
    }

    #[test]
    fn read_write_requires_rule_permission() {
        let fx = fixture("");
        fs::create_dir_all(fx.root.join("home/notes")).expect("notes");
        let mount = fx
            .policy
            .resolve(&identity("main", true), &request(&fx.root.join("home/notes"), false))
            .expect("allowed");
        assert!(mount.read_only);
    }

    #[test]
    fn unlisted_and_missing_paths_are_denied() {
        let fx = fixture("");
        fs::create_dir_all(fx.root.join("elsewhere")).expect("elsewhere");
        assert!(matches!(
            fx.policy
                .resolve(&identity("main", true), &request(&fx.root.join("elsewhere"), true)),
            Err(MountDenied::NotAllowed { .. })
        ));
        assert!(matches!(
            fx.policy.resolve(
                &identity("main", true),
                &request(&fx.root.join("projects/missing"), true)
            ),
            Err(MountDenied::Unresolvable { .. })
        ));
    }

    #[test]
    fn allowlist_directory_is_never_mountable() {
        let fx = fixture("");
        assert!(matches!(
            fx.policy
                .resolve(&identity("main", true), &request(&fx.root.join("config"), true)),
            Err(MountDenied::ExposesAllowlist { .. })
        ));
        assert!(matches!(
            fx.policy.resolve(&identity("main", true), &request(&fx.root, true)),
            Err(MountDenied::ExposesAllowlist { .. }) | Err(MountDenied::NotAllowed { .. })
        ));
    }

    #[test]
    fn container_paths_must_be_relative_and_plain() {
        let fx = fixture("");
        for bad in ["/etc", "../up", "a/../../b", "", "x:y"] {
            let result = fx.policy.resolve(
                &identity("main", true),
                &MountRequest {
                    host_path: fx.root.join("projects/app").display().to_string(),
                    container_path: Some(bad.to_string()),
                    read_only: true,
                },
            );
            assert!(result.is_err(), "container path `{bad}` should be denied");
        }
    }

    #[test]
    fn missing_allowlist_denies_everything() {
        let dir = tempdir().expect("tempdir");
        let policy = MountPolicy::load(&dir.path().join("absent.yaml")).expect("load");
        assert!(!policy.has_allowlist());
        assert!(matches!(
            policy.resolve(&identity("main", true), &request(dir.path(), true)),
            Err(MountDenied::NoAllowlist { .. })
        ));
    }

    #[test]
    fn reload_picks_up_new_rules() {
        let fx = fixture("");
        fs::create_dir_all(fx.root.join("data")).expect("data");
        let mut policy = fx.policy;
        assert!(policy
            .resolve(&identity("main", true), &request(&fx.root.join("data"), true))
            .is_err());

        let path = policy.allowlist_path().to_path_buf();
        let mut body = fs::read_to_string(&path).expect("read");
        body.push_str(&format!(
            "  - pathPattern: {}/data\n    allowed: true\n",
            fx.root.display()
        ));
        fs::write(&path, body).expect("rewrite");
        policy.reload().expect("reload");
        assert!(policy
            .resolve(&identity("main", true), &request(&fx.root.join("data"), true))
            .is_ok());
    }
}
