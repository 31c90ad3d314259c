//! Core configuration management types.

mod builder;
mod document;
mod identity;
mod merged;
mod registry;
mod scheduler;
mod settings;

pub use builder::RegistryBuilder;
pub use document::{Content, Document, KvMap, parse_kv, split_lines};
pub use identity::ProcessIdentity;
pub use merged::MergedConfigView;
pub use registry::{ConfigRegistry, split_names};
pub use scheduler::Scheduler;
pub use settings::{
    CacheSettings, DEFAULT_BASE_PATH, DeploymentMode, ENV_PREFIX, Settings, StoreSettings,
    WatcherSettings,
};
