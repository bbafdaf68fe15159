//! URI and payload templating for fetch schemes.

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::Value;

use crate::domain::errors::CacheResult;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":([a-zA-Z0-9]+)").expect("placeholder pattern is valid"));

/// Replace every `:name` in `template` with the JSON encoding of
/// `params[name]`. Placeholders without a matching parameter are kept.
///
/// ```
/// use refresh_cache::adapters::http::render_uri;
/// use serde_json::json;
///
/// let uri = render_uri("http://api:8080/users/:key", &json!({"key": 5}));
/// assert_eq!(uri, "http://api:8080/users/5");
/// ```
pub fn render_uri(template: &str, params: &Value) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match params.get(&caps[1]) {
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// How a scheme builds its request URI from the call parameters.
pub enum UriTemplate<P> {
    /// String with `:name` placeholders.
    Literal(String),
    /// Function of the parameters.
    Builder(Arc<dyn Fn(&P) -> String + Send + Sync>),
}

impl<P> UriTemplate<P> {
    pub fn builder(f: impl Fn(&P) -> String + Send + Sync + 'static) -> Self {
        Self::Builder(Arc::new(f))
    }
}

impl<P: Serialize> UriTemplate<P> {
    pub fn render(&self, params: &P) -> CacheResult<String> {
        match self {
            Self::Literal(template) => Ok(render_uri(template, &serde_json::to_value(params)?)),
            Self::Builder(build) => Ok(build(params)),
        }
    }
}

impl<P> Clone for UriTemplate<P> {
    fn clone(&self) -> Self {
        match self {
            Self::Literal(template) => Self::Literal(template.clone()),
            Self::Builder(build) => Self::Builder(Arc::clone(build)),
        }
    }
}

impl<P> fmt::Debug for UriTemplate<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(template) => f.debug_tuple("Literal").field(template).finish(),
            Self::Builder(_) => f.write_str("Builder(..)"),
        }
    }
}

impl<P> From<&str> for UriTemplate<P> {
    fn from(template: &str) -> Self {
        Self::Literal(template.to_string())
    }
}

impl<P> From<String> for UriTemplate<P> {
    fn from(template: String) -> Self {
        Self::Literal(template)
    }
}

/// How a scheme builds its request body.
pub enum PayloadTemplate<P> {
    /// Fixed JSON body, cloned for every request.
    Static(Value),
    /// Function of the parameters.
    Builder(Arc<dyn Fn(&P) -> Value + Send + Sync>),
}

impl<P> PayloadTemplate<P> {
    pub fn builder(f: impl Fn(&P) -> Value + Send + Sync + 'static) -> Self {
        Self::Builder(Arc::new(f))
    }

    pub fn build(&self, params: &P) -> Value {
        match self {
            Self::Static(body) => body.clone(),
            Self::Builder(build) => build(params),
        }
    }
}

impl<P> Clone for PayloadTemplate<P> {
    fn clone(&self) -> Self {
        match self {
            Self::Static(body) => Self::Static(body.clone()),
            Self::Builder(build) => Self::Builder(Arc::clone(build)),
        }
    }
}

impl<P> fmt::Debug for PayloadTemplate<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(body) => f.debug_tuple("Static").field(body).finish(),
            Self::Builder(_) => f.write_str("Builder(..)"),
        }
    }
}
