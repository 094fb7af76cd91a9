pub mod error;
pub mod load;
pub mod paths;
pub mod settings;

pub use error::ConfigError;
pub use load::{load_settings, EnvLookup};
pub use paths::{
    default_mount_allowlist_path, default_state_root, DEFAULT_STATE_ROOT_DIR,
    MOUNT_ALLOWLIST_FILE_NAME, SETTINGS_FILE_NAME,
};
pub use settings::{BackendConfig, Settings};
