use super::{sql, Store, StoreError};
use crate::group::{ensure_folder_not_reserved, RegisteredGroup};
use crate::mounts::MountRequest;
use crate::shared::ids::GroupFolder;
use rusqlite::{params, OptionalExtension, Row};

const GROUP_COLUMNS: &str =
    "chat_target, name, folder, trigger_word, requires_trigger, additional_mounts, added_at";

type RawGroup = (String, String, String, String, bool, String, i64);

fn raw_group(row: &Row<'_>) -> rusqlite::Result<RawGroup> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn into_group(raw: RawGroup) -> Result<RegisteredGroup, StoreError> {
    let (chat_target, name, folder, trigger, requires_trigger, mounts, added_at) = raw;
    let folder = GroupFolder::parse(&folder).map_err(|_| StoreError::Corrupt {
        column: "folder",
        value: folder.clone(),
    })?;
    let additional_mounts: Vec<MountRequest> =
        serde_json::from_str(&mounts).map_err(|_| StoreError::Corrupt {
            column: "additional_mounts",
            value: mounts.clone(),
        })?;
    Ok(RegisteredGroup {
        chat_target,
        name,
        folder,
        trigger,
        requires_trigger,
        additional_mounts,
        added_at,
    })
}

impl Store {
    /// Inserts or updates the registration for `group.chat_target`. A folder
    /// belongs to exactly one chat.
    pub fn register_group(&self, group: &RegisteredGroup) -> Result<(), StoreError> {
        ensure_folder_not_reserved(&group.folder).map_err(StoreError::InvalidGroup)?;
        if group.chat_target.trim().is_empty() {
            return Err(StoreError::InvalidGroup(
                "chat target must be non-empty".to_string(),
            ));
        }
        let mounts = serde_json::to_string(&group.additional_mounts).map_err(|source| {
            StoreError::Encode {
                what: "additional mounts",
                source,
            }
        })?;

        let mut connection = self.connect()?;
        let tx = connection.transaction().map_err(sql)?;
        let owner: Option<String> = tx
            .query_row(
                "SELECT chat_target FROM registered_groups WHERE folder = ?1",
                params![group.folder.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql)?;
        if let Some(owner) = owner.filter(|owner| owner != &group.chat_target) {
            return Err(StoreError::InvalidGroup(format!(
                "folder `{}` is already used by chat `{owner}`",
                group.folder
            )));
        }

        tx.execute(
            "
            INSERT INTO registered_groups (
                chat_target, name, folder, trigger_word, requires_trigger, additional_mounts, added_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(chat_target) DO UPDATE SET
                name = excluded.name,
                folder = excluded.folder,
                trigger_word = excluded.trigger_word,
                requires_trigger = excluded.requires_trigger,
                additional_mounts = excluded.additional_mounts
            ",
            params![
                group.chat_target,
                group.name,
                group.folder.as_str(),
                group.trigger,
                group.requires_trigger,
                mounts,
                group.added_at,
            ],
        )
        .map_err(sql)?;

        // Once tasks parked while this chat was unregistered become due again.
        let rearmed = tx
            .execute(
                "
                UPDATE scheduled_tasks SET next_run = ?3
                WHERE chat_target = ?1 AND group_folder = ?2
                  AND status = 'active' AND next_run IS NULL AND claimed_at IS NULL
                ",
                params![group.chat_target, group.folder.as_str(), group.added_at],
            )
            .map_err(sql)?;
        tx.commit().map_err(sql)?;
        if rearmed > 0 {
            tracing::info!(group = %group.folder, rearmed, "parked tasks re-armed");
        }
        Ok(())
    }

    pub fn group_by_chat(&self, chat_target: &str) -> Result<Option<RegisteredGroup>, StoreError> {
        self.query_group("chat_target", chat_target)
    }

    pub fn group_by_folder(
        &self,
        folder: &GroupFolder,
    ) -> Result<Option<RegisteredGroup>, StoreError> {
        self.query_group("folder", folder.as_str())
    }

    pub fn list_groups(&self) -> Result<Vec<RegisteredGroup>, StoreError> {
        let connection = self.connect()?;
        let mut statement = connection
            .prepare(&format!(
                "SELECT {GROUP_COLUMNS} FROM registered_groups ORDER BY added_at ASC, folder ASC"
            ))
            .map_err(sql)?;
        let rows = statement.query_map(params![], raw_group).map_err(sql)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(into_group(row.map_err(sql)?)?);
        }
        Ok(out)
    }

    pub fn session(&self, folder: &GroupFolder) -> Result<Option<String>, StoreError> {
        let connection = self.connect()?;
        connection
            .query_row(
                "SELECT session_id FROM sessions WHERE group_folder = ?1",
                params![folder.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql)
    }

    pub fn set_session(
        &self,
        folder: &GroupFolder,
        session_id: &str,
        now: i64,
    ) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection
            .execute(
                "
                INSERT INTO sessions (group_folder, session_id, updated_at) VALUES (?1, ?2, ?3)
                ON CONFLICT(group_folder) DO UPDATE SET
                    session_id = excluded.session_id,
                    updated_at = excluded.updated_at
                ",
                params![folder.as_str(), session_id, now],
            )
            .map_err(sql)?;
        Ok(())
    }

    fn query_group(
        &self,
        column: &'static str,
        value: &str,
    ) -> Result<Option<RegisteredGroup>, StoreError> {
        let connection = self.connect()?;
        let raw = connection
            .query_row(
                &format!("SELECT {GROUP_COLUMNS} FROM registered_groups WHERE {column} = ?1"),
                params![value],
                raw_group,
            )
            .optional()
            .map_err(sql)?;
        raw.map(into_group).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn group(chat: &str, folder: &str) -> RegisteredGroup {
        RegisteredGroup {
            chat_target: chat.to_string(),
            name: folder.to_string(),
            folder: GroupFolder::parse(folder).expect("folder"),
            trigger: "@Andy".to_string(),
            requires_trigger: true,
            additional_mounts: vec![MountRequest {
                host_path: "~/projects".to_string(),
                container_path: Some("projects".to_string()),
                read_only: true,
            }],
            added_at: 7,
        }
    }

    #[test]
    fn registration_round_trips_and_updates_in_place() {
        let dir = tempdir().expect("tempdir");
        let store = Store::open(&dir.path().join("db.sqlite")).expect("open");
        let mut family = group("family@chat", "family");
        store.register_group(&family).expect("register");
        assert_eq!(
            store.group_by_chat("family@chat").expect("by chat"),
            Some(family.clone())
        );

        family.name = "Family".to_string();
        family.requires_trigger = false;
        store.register_group(&family).expect("update");
        let listed = store.list_groups().expect("list");
        assert_eq!(listed, vec![family.clone()]);
        assert_eq!(
            store.group_by_folder(&family.folder).expect("by folder"),
            Some(family)
        );
    }

    #[test]
    fn folder_cannot_be_shared_or_reserved() {
        let dir = tempdir().expect("tempdir");
        let store = Store::open(&dir.path().join("db.sqlite")).expect("open");
        store
            .register_group(&group("family@chat", "family"))
            .expect("register");
        assert!(matches!(
            store.register_group(&group("other@chat", "family")),
            Err(StoreError::InvalidGroup(_))
        ));
        assert!(matches!(
            store.register_group(&group("g@chat", "global")),
            Err(StoreError::InvalidGroup(_))
        ));
    }

    #[test]
    fn sessions_are_replaced_per_folder() {
        let dir = tempdir().expect("tempdir");
        let store = Store::open(&dir.path().join("db.sqlite")).expect("open");
        let folder = GroupFolder::parse("family").expect("folder");
        assert_eq!(store.session(&folder).expect("empty"), None);
        store.set_session(&folder, "s1", 1).expect("set");
        store.set_session(&folder, "s2", 2).expect("replace");
        assert_eq!(store.session(&folder).expect("get").as_deref(), Some("s2"));
    }
}
