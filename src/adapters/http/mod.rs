//! HTTP adapters: the reqwest request executor and the templated fetch
//! strategy built on top of it.

pub mod client;
pub mod fetcher;
pub mod template;

pub use client::ReqwestExecutor;
pub use fetcher::{
    json_array_translator, json_fetcher, json_field_translator, FetchOneParams, FetchOneScheme,
    FetchScheme, FetchSomeParams, FetchSomeScheme, FetcherConfig, HttpFetcher, Translator,
};
pub use template::{render_uri, PayloadTemplate, UriTemplate};
