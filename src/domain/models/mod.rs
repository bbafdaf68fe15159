pub mod config;
pub mod fetch;
pub mod key;
pub mod lifespan;
pub mod settings;
pub mod task;

pub use config::{
    CollectionConfig, Config, HttpClientConfig, LoggingConfig, SchedulerConfig, SchemeConfig,
};
pub use fetch::{FetchSchemeKind, Fetched, HttpMethod, RawResponse, RequestSpec};
pub use key::CacheKey;
pub use lifespan::{Lifespan, RefreshPolicy};
pub use settings::{CollectionSettings, SettingName, SettingValue};
pub use task::{TaskState, TaskTiming};
