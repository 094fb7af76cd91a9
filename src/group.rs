use crate::mounts::MountRequest;
use crate::shared::ids::GroupFolder;
use serde::{Deserialize, Serialize};

/// Who an execution or IPC request runs as. Derived from the registry and the
/// configured privileged folder, never from anything an agent writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupIdentity {
    pub folder: GroupFolder,
    pub is_privileged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredGroup {
    pub chat_target: String,
    pub name: String,
    pub folder: GroupFolder,
    pub trigger: String,
    #[serde(default = "default_requires_trigger")]
    pub requires_trigger: bool,
    #[serde(default)]
    pub additional_mounts: Vec<MountRequest>,
    pub added_at: i64,
}

fn default_requires_trigger() -> bool {
    true
}

/// Folder names that collide with shared directories under `groups/` or `ipc/`.
pub const RESERVED_FOLDERS: &[&str] = &["global", "errors"];

pub fn ensure_folder_not_reserved(folder: &GroupFolder) -> Result<(), String> {
    if RESERVED_FOLDERS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(folder.as_str()))
    {
        return Err(format!("group folder `{folder}` is reserved"));
    }
    Ok(())
}

impl RegisteredGroup {
    pub fn identity(&self, privileged: &GroupFolder) -> GroupIdentity {
        GroupIdentity {
            folder: self.folder.clone(),
            is_privileged: &self.folder == privileged,
        }
    }

    /// The privileged group always answers; other groups answer only when the
    /// trigger word appears, unless they opted out of it.
    pub fn should_respond(&self, is_privileged: bool, texts: &[&str]) -> bool {
        if is_privileged || !self.requires_trigger {
            return true;
        }
        let trigger = self.trigger.to_lowercase();
        texts
            .iter()
            .any(|text| contains_trigger(&text.to_lowercase(), &trigger))
    }
}

fn contains_trigger(text: &str, trigger: &str) -> bool {
    if trigger.is_empty() {
        return false;
    }
    text.match_indices(trigger).any(|(idx, _)| {
        text[idx + trigger.len()..]
            .chars()
            .next()
            .map_or(true, |ch| !ch.is_alphanumeric() && ch != '_')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(folder: &str, requires_trigger: bool) -> RegisteredGroup {
        RegisteredGroup {
            chat_target: format!("{folder}@chat"),
            name: folder.to_string(),
            folder: GroupFolder::parse(folder).expect("folder"),
            trigger: "@Andy".to_string(),
            requires_trigger,
            additional_mounts: Vec::new(),
            added_at: 0,
        }
    }

    #[test]
    fn identity_marks_only_the_configured_folder_privileged() {
        let main = GroupFolder::parse("main").expect("folder");
        assert!(group("main", true).identity(&main).is_privileged);
        assert!(!group("family", true).identity(&main).is_privileged);
    }

    #[test]
    fn trigger_matching_is_case_insensitive_and_word_bounded() {
        let family = group("family", true);
        assert!(family.should_respond(false, &["hey @andy what's up"]));
        assert!(family.should_respond(false, &["no", "@ANDY, ping"]));
        assert!(!family.should_respond(false, &["@andyx not me"]));
        assert!(!family.should_respond(false, &["hello there"]));
        assert!(family.should_respond(true, &["hello there"]));
        assert!(group("open", false).should_respond(false, &["anything"]));
    }

    #[test]
    fn shared_directory_names_are_reserved() {
        let global = GroupFolder::parse("Global").expect("folder");
        assert!(ensure_folder_not_reserved(&global).is_err());
        let family = GroupFolder::parse("family").expect("folder");
        assert!(ensure_folder_not_reserved(&family).is_ok());
    }
}
