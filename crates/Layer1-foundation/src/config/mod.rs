//! Config module

mod tally;

pub use tally::{
    HookConfig, HttpConfig, IndexConfig, OfficialRegistryConfig, TallyConfig, DATA_DIR_ENV,
    TALLY_CONFIG_FILE,
};
