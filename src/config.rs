pub mod settings;

pub use settings::{
    get_config, get_config_from, ApplicationSettings, HealthSettings, LogStoreSettings, Settings,
    SyncSettings,
};
