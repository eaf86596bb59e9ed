//! Fire-and-forget model download.

const MAX_PREALLOCATION: u64 = 64 << 20;

/// Byte counts for one download.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct DownloadProgress {
    expected: Option<u64>,
    received: u64,
}

impl DownloadProgress {
    /// `content_length` is the raw header value, if any.
    pub fn new(content_length: Option<&str>) -> Self {
        let expected = content_length.and_then(|v| v.trim().parse::<u64>().ok()).filter(|&n| n > 0);
        Self { expected, received: 0 }
    }

    pub fn record(&mut self, chunk_len: usize) {
        self.received = self.received.saturating_add(chunk_len as u64);
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Announced body length in bytes.
    pub fn expected(&self) -> Option<u64> {
        self.expected
    }

    /// Capacity to reserve for the body, capped so a bogus header cannot
    /// force a huge allocation up front.
    pub fn initial_capacity(&self) -> usize {
        self.expected.map_or(0, |n| n.min(MAX_PREALLOCATION) as usize)
    }

    /// `None` when the server sent no usable length.
    pub fn ratio(&self) -> Option<f32> {
        self.expected.map(|total| (self.received as f64 / total as f64).clamp(0.0, 1.0) as f32)
    }
}

#[cfg(target_arch = "wasm32")]
pub use self::web::spawn_fetch;

#[cfg(target_arch = "wasm32")]
mod web {
    use flume::Sender;
    use js_sys::{Reflect, Uint8Array};
    use wasm_bindgen::{JsCast, JsValue};
    use wasm_bindgen_futures::JsFuture;
    use web_sys::{AbortSignal, ReadableStreamDefaultReader, RequestInit, Response};

    use super::DownloadProgress;
    use crate::error::ViewerError;
    use crate::resources::{AssetMessage, ModelData};

    /// Starts the download on the browser event loop. Outcomes arrive on
    /// `tx`; a closed receiver (viewer unmounted) is not an error.
    pub fn spawn_fetch(url: String, signal: AbortSignal, tx: Sender<AssetMessage>) {
        wasm_bindgen_futures::spawn_local(async move {
            let message = match fetch_bytes(&url, &signal, &tx).await.and_then(|bytes| ModelData::from_glb(&bytes)) {
                Ok(model) => {
                    log::info!("model loaded from {url}: {} meshes, {} materials", model.meshes.len(), model.materials.len());
                    AssetMessage::Loaded(model)
                }
                Err(err) => {
                    log::error!("model load from {url} failed: {err}");
                    AssetMessage::Failed(err)
                }
            };
            let _ = tx.send(message);
        });
    }

    async fn fetch_bytes(url: &str, signal: &AbortSignal, tx: &Sender<AssetMessage>) -> Result<Vec<u8>, ViewerError> {
        let window = web_sys::window().ok_or_else(|| ViewerError::Dom("no window".into()))?;
        let init = RequestInit::new();
        init.set_signal(Some(signal));
        let response: Response = JsFuture::from(window.fetch_with_str_and_init(url, &init))
            .await
            .map_err(ViewerError::fetch)?
            .dyn_into()
            .map_err(ViewerError::fetch)?;
        if !response.ok() {
            return Err(ViewerError::Status(response.status()));
        }

        let length = response.headers().get("content-length").ok().flatten();
        let mut progress = DownloadProgress::new(length.as_deref());

        let Some(body) = response.body() else {
            let buffer = JsFuture::from(response.array_buffer().map_err(ViewerError::fetch)?)
                .await
                .map_err(ViewerError::fetch)?;
            return Ok(Uint8Array::new(&buffer).to_vec());
        };

        let reader: ReadableStreamDefaultReader = body.get_reader().unchecked_into();
        let mut bytes = Vec::with_capacity(progress.initial_capacity());
        loop {
            let chunk = JsFuture::from(reader.read()).await.map_err(ViewerError::fetch)?;
            let done = Reflect::get(&chunk, &JsValue::from_str("done")).map_err(ViewerError::fetch)?;
            if done.as_bool().unwrap_or(false) {
                break;
            }
            let value = Reflect::get(&chunk, &JsValue::from_str("value")).map_err(ViewerError::fetch)?;
            let part = Uint8Array::new(&value);
            let start = bytes.len();
            bytes.resize(start + part.length() as usize, 0);
            part.copy_to(&mut bytes[start..]);
            progress.record(part.length() as usize);
            if let Some(ratio) = progress.ratio() {
                let _ = tx.send(AssetMessage::Progress(ratio));
            }
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_tracks_received_bytes() {
        let mut progress = DownloadProgress::new(Some("1000"));
        assert_eq!(progress.ratio(), Some(0.0));
        progress.record(250);
        assert_eq!(progress.ratio(), Some(0.25));
        progress.record(750);
        assert_eq!(progress.ratio(), Some(1.0));
        progress.record(10);
        assert_eq!(progress.ratio(), Some(1.0));
        assert_eq!(progress.received(), 1010);
    }

    #[test]
    fn missing_or_bad_length_has_no_ratio() {
        for header in [None, Some(""), Some("abc"), Some("0"), Some("-5")] {
            let mut progress = DownloadProgress::new(header);
            progress.record(42);
            assert_eq!(progress.ratio(), None, "header {header:?}");
        }
        assert_eq!(DownloadProgress::new(Some(" 64 ")).ratio(), Some(0.0));
    }

    #[test]
    fn reserves_the_announced_length() {
        let progress = DownloadProgress::new(Some("3145728"));
        assert_eq!(progress.expected(), Some(3_145_728));
        assert_eq!(progress.initial_capacity(), 3_145_728);

        assert_eq!(DownloadProgress::new(None).initial_capacity(), 0);
        let huge = DownloadProgress::new(Some("99999999999999"));
        assert_eq!(huge.initial_capacity(), 64 << 20);
    }
}
