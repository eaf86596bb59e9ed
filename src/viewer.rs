use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;

use wasm_bindgen::prelude::*;
use web_sys::{AbortController, HtmlCanvasElement, HtmlElement};

use crate::config::ViewerConfig;
use crate::dom::{self, Attachments, MountedViewer};
use crate::error::ViewerError;
use crate::renderer::Renderer;
use crate::state::SceneState;
use crate::theme::{Theme, ThemePublisher};

static LOGGING: Once = Once::new();

fn init_logging() {
    LOGGING.call_once(|| {
        #[cfg(feature = "console_error_panic_hook")]
        std::panic::set_hook(Box::new(console_error_panic_hook::hook));
        let _ = console_log::init_with_level(log::Level::Info);
    });
}

/// Handle returned to the page. Dropping it (or calling `unmount`)
/// releases everything the mount created.
#[wasm_bindgen]
pub struct Viewer {
    theme: ThemePublisher,
    inner: Option<Rc<RefCell<MountedViewer>>>,
    attachments: Option<Attachments>,
    fetch: Option<AbortController>,
}

/// Mounts a viewer on `canvas` inside `container` and starts loading the
/// model. Resolves once the placeholder is on screen.
#[wasm_bindgen(js_name = "mountViewer")]
pub async fn mount_viewer(
    container: HtmlElement,
    canvas: HtmlCanvasElement,
    is_dark: bool,
    options_json: Option<String>,
) -> Result<Viewer, JsValue> {
    init_logging();
    let config = ViewerConfig::from_json(options_json.as_deref().unwrap_or_default())?;
    log::info!("mounting viewer for {}", config.model_url);

    let publisher = ThemePublisher::new(Theme::from_is_dark(is_dark));
    let bounds = dom::bounds_of(&container);
    dom::fit_canvas(&canvas, bounds);
    let is_mobile = bounds.width < config.mobile_breakpoint;
    let sample_count = config.sample_count;

    let state = SceneState::new(config, publisher.reader(), bounds);
    let renderer = Renderer::new(canvas.clone(), is_mobile, sample_count, state.placeholder_material()).await?;
    renderer.write_scene(&state);

    let inner = Rc::new(RefCell::new(MountedViewer::new(state, renderer, container.clone(), canvas.clone())));
    let attachments = dom::attach(&inner, &container, &canvas)?;
    let fetch = AbortController::new().map_err(ViewerError::dom)?;

    {
        let mut viewer = inner.borrow_mut();
        if let Some(url) = viewer.state.request_fetch() {
            crate::loader::spawn_fetch(url, fetch.signal(), viewer.state.asset_sender());
        }
        viewer.reflect();
    }

    Ok(Viewer { theme: publisher, inner: Some(inner), attachments: Some(attachments), fetch: Some(fetch) })
}

#[wasm_bindgen]
impl Viewer {
    /// Switches lights and materials right away instead of waiting for
    /// the next frame.
    #[wasm_bindgen(js_name = "setTheme")]
    pub fn set_theme(&self, is_dark: bool) {
        self.theme.publish(Theme::from_is_dark(is_dark));
        let Some(inner) = &self.inner else { return };
        if let Ok(mut guard) = inner.try_borrow_mut() {
            let viewer = &mut *guard;
            if viewer.state.sync_theme() {
                viewer.renderer.write_scene(&viewer.state);
            }
        }
    }

    /// `loading`, `ready` or `error`; `unmounted` after `unmount`.
    pub fn phase(&self) -> String {
        self.inner
            .as_ref()
            .map_or_else(|| "unmounted".to_string(), |inner| inner.borrow().state.phase().as_str().to_string())
    }

    pub fn progress(&self) -> f32 {
        self.inner.as_ref().map_or(0.0, |inner| inner.borrow().state.progress())
    }

    #[wasm_bindgen(getter, js_name = "isRotating")]
    pub fn is_rotating(&self) -> bool {
        self.inner.as_ref().is_some_and(|inner| inner.borrow().state.interaction().is_rotating)
    }

    pub fn unmount(&mut self) {
        if self.inner.is_none() {
            return;
        }
        self.attachments.take();
        if let Some(fetch) = self.fetch.take() {
            fetch.abort();
        }
        self.inner.take();
        log::info!("viewer unmounted");
    }
}

impl Drop for Viewer {
    fn drop(&mut self) {
        self.unmount();
    }
}
