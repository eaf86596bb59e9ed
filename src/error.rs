use thiserror::Error;
use wasm_bindgen::JsValue;

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("model fetch failed: {0}")]
    Fetch(String),
    #[error("model fetch returned HTTP {0}")]
    Status(u16),
    #[error("model could not be parsed: {0}")]
    Parse(String),
    #[error("model has no drawable primitives")]
    EmptyModel,
    #[error("failed to create surface: {0}")]
    Surface(String),
    #[error("no suitable graphics adapter")]
    Adapter,
    #[error("failed to create device: {0}")]
    Device(String),
    #[error("dom error: {0}")]
    Dom(String),
    #[error("invalid viewer config: {0}")]
    Config(String),
}

impl ViewerError {
    /// Wraps a value thrown by a browser API.
    pub fn dom(value: JsValue) -> Self {
        ViewerError::Dom(describe_js(&value))
    }

    pub fn fetch(value: JsValue) -> Self {
        ViewerError::Fetch(describe_js(&value))
    }
}

fn describe_js(value: &JsValue) -> String {
    value.as_string().unwrap_or_else(|| format!("{value:?}"))
}

impl From<gltf::Error> for ViewerError {
    fn from(err: gltf::Error) -> Self {
        ViewerError::Parse(err.to_string())
    }
}

impl From<ViewerError> for JsValue {
    fn from(err: ViewerError) -> Self {
        JsValue::from_str(&err.to_string())
    }
}
