//! Browser glue: frame loop, pointer listeners and the resize observer.
//! Everything attached here is detached again when [`Attachments`] drops.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use wasm_bindgen::closure::Closure;
use wasm_bindgen::JsCast;
use web_sys::{Element, Event, EventTarget, HtmlCanvasElement, HtmlElement, MouseEvent, ResizeObserver, TouchEvent};

use crate::error::ViewerError;
use crate::interaction::{Bounds, PointerSource};
use crate::lifecycle::ViewerPhase;
use crate::renderer::Renderer;
use crate::state::SceneState;

pub const STATE_ATTRIBUTE: &str = "data-viewer-state";
const HINT_SELECTOR: &str = "[data-viewer-hint]";

/// Scene, GPU and the elements of one mount.
pub struct MountedViewer {
    pub state: SceneState,
    pub renderer: Renderer,
    container: HtmlElement,
    canvas: HtmlCanvasElement,
    hint: Option<HtmlElement>,
    shown_phase: Option<ViewerPhase>,
    shown_hint_opacity: Option<f32>,
}

impl MountedViewer {
    pub fn new(state: SceneState, renderer: Renderer, container: HtmlElement, canvas: HtmlCanvasElement) -> Self {
        let hint = container
            .query_selector(HINT_SELECTOR)
            .ok()
            .flatten()
            .and_then(|el| el.dyn_into::<HtmlElement>().ok());
        Self { state, renderer, container, canvas, hint, shown_phase: None, shown_hint_opacity: None }
    }

    pub fn tick(&mut self, time_ms: f64) {
        let frame = self.state.update(time_ms);
        self.renderer.frame(&mut self.state, frame);
        self.reflect();
    }

    /// Mirrors phase and hint fade onto the page, touching the DOM only
    /// when a value changed.
    pub fn reflect(&mut self) {
        let phase = self.state.phase();
        if self.shown_phase != Some(phase) && phase != ViewerPhase::Initializing {
            if let Err(err) = self.container.set_attribute(STATE_ATTRIBUTE, phase.as_str()) {
                log::warn!("{}", ViewerError::dom(err));
            }
            self.shown_phase = Some(phase);
        }

        let opacity = self.state.hint_opacity();
        if let Some(hint) = &self.hint {
            if self.shown_hint_opacity != Some(opacity) {
                if let Err(err) = hint.style().set_property("opacity", &format!("{opacity:.3}")) {
                    log::warn!("{}", ViewerError::dom(err));
                }
                self.shown_hint_opacity = Some(opacity);
            }
        }
    }

    /// Matches canvas backing size to the container at device pixel ratio.
    pub fn resize(&mut self) {
        let bounds = bounds_of(&self.container);
        let (width, height) = fit_canvas(&self.canvas, bounds);
        self.renderer.resize(width, height);
        self.state.resize(bounds);
    }
}

pub fn bounds_of(element: &Element) -> Bounds {
    let rect = element.get_bounding_client_rect();
    Bounds::new(rect.left() as f32, rect.top() as f32, rect.width() as f32, rect.height() as f32)
}

/// Sets the canvas backing store size and returns it in device pixels.
pub fn fit_canvas(canvas: &HtmlCanvasElement, bounds: Bounds) -> (u32, u32) {
    let dpr = web_sys::window().map_or(1.0, |w| w.device_pixel_ratio()) as f32;
    let width = (bounds.width * dpr).round().max(1.0) as u32;
    let height = (bounds.height * dpr).round().max(1.0) as u32;
    if canvas.width() != width {
        canvas.set_width(width);
    }
    if canvas.height() != height {
        canvas.set_height(height);
    }
    (width, height)
}

/// Listeners only see mouse and touch events. `None` for mouse buttons
/// other than the primary one.
fn pointer_source(event: &Event) -> Option<PointerSource> {
    match event.dyn_ref::<MouseEvent>() {
        Some(mouse) => PointerSource::from_mouse_button(mouse.button()),
        None => Some(PointerSource::Touch),
    }
}

fn pointer_position(event: &Event) -> Option<(f32, f32)> {
    if let Some(mouse) = event.dyn_ref::<MouseEvent>() {
        return Some((mouse.client_x() as f32, mouse.client_y() as f32));
    }
    let touch = event.dyn_ref::<TouchEvent>()?;
    let point = touch.touches().get(0).or_else(|| touch.changed_touches().get(0))?;
    Some((point.client_x() as f32, point.client_y() as f32))
}

struct Listener {
    target: EventTarget,
    kind: &'static str,
    callback: Closure<dyn FnMut(Event)>,
}

impl Listener {
    fn add(target: &EventTarget, kind: &'static str, handler: impl FnMut(Event) + 'static) -> Result<Self, ViewerError> {
        let callback = Closure::wrap(Box::new(handler) as Box<dyn FnMut(Event)>);
        target
            .add_event_listener_with_callback(kind, callback.as_ref().unchecked_ref())
            .map_err(ViewerError::dom)?;
        Ok(Self { target: target.clone(), kind, callback })
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = self.target.remove_event_listener_with_callback(self.kind, self.callback.as_ref().unchecked_ref());
    }
}

type FrameCallback = Rc<RefCell<Option<Closure<dyn FnMut(f64)>>>>;

struct FrameLoop {
    pending: Rc<Cell<Option<i32>>>,
    callback: FrameCallback,
}

impl FrameLoop {
    fn start(viewer: Rc<RefCell<MountedViewer>>) -> Result<Self, ViewerError> {
        let pending = Rc::new(Cell::new(None));
        let callback: FrameCallback = Rc::new(RefCell::new(None));

        let next = Rc::clone(&callback);
        let next_pending = Rc::clone(&pending);
        *callback.borrow_mut() = Some(Closure::wrap(Box::new(move |time: f64| {
            next_pending.set(None);
            if let Ok(mut viewer) = viewer.try_borrow_mut() {
                viewer.tick(time);
            }
            if let Some(cb) = next.borrow().as_ref() {
                match request_frame(cb) {
                    Ok(id) => next_pending.set(Some(id)),
                    Err(err) => log::error!("frame loop stopped: {err}"),
                }
            }
        }) as Box<dyn FnMut(f64)>));

        if let Some(cb) = callback.borrow().as_ref() {
            pending.set(Some(request_frame(cb)?));
        }
        Ok(Self { pending, callback })
    }
}

impl Drop for FrameLoop {
    fn drop(&mut self) {
        if let (Some(id), Some(window)) = (self.pending.take(), web_sys::window()) {
            let _ = window.cancel_animation_frame(id);
        }
        // the closure holds a handle to itself; dropping it breaks the cycle
        self.callback.borrow_mut().take();
    }
}

fn request_frame(callback: &Closure<dyn FnMut(f64)>) -> Result<i32, ViewerError> {
    web_sys::window()
        .ok_or_else(|| ViewerError::Dom("no window".into()))?
        .request_animation_frame(callback.as_ref().unchecked_ref())
        .map_err(ViewerError::dom)
}

struct ResizeWatch {
    observer: ResizeObserver,
    _callback: Closure<dyn FnMut(js_sys::Array)>,
}

impl ResizeWatch {
    fn observe(target: &Element, viewer: Rc<RefCell<MountedViewer>>) -> Result<Self, ViewerError> {
        let callback = Closure::wrap(Box::new(move |_entries: js_sys::Array| {
            if let Ok(mut viewer) = viewer.try_borrow_mut() {
                viewer.resize();
            }
        }) as Box<dyn FnMut(js_sys::Array)>);
        let observer = ResizeObserver::new(callback.as_ref().unchecked_ref()).map_err(ViewerError::dom)?;
        observer.observe(target);
        Ok(Self { observer, _callback: callback })
    }
}

impl Drop for ResizeWatch {
    fn drop(&mut self) {
        self.observer.disconnect();
    }
}

/// Everything one mount hooked into the page.
pub struct Attachments {
    _frame_loop: FrameLoop,
    _resize: ResizeWatch,
    _listeners: Vec<Listener>,
}

pub fn attach(viewer: &Rc<RefCell<MountedViewer>>, container: &HtmlElement, canvas: &HtmlCanvasElement) -> Result<Attachments, ViewerError> {
    let window = web_sys::window().ok_or_else(|| ViewerError::Dom("no window".into()))?;
    let mut listeners = Vec::with_capacity(6);

    for kind in ["mousedown", "touchstart"] {
        let viewer = Rc::clone(viewer);
        let container = container.clone();
        listeners.push(Listener::add(canvas, kind, move |event| {
            let (Some(source), Some((x, y)), Ok(mut viewer)) = (pointer_source(&event), pointer_position(&event), viewer.try_borrow_mut()) else {
                return;
            };
            viewer.state.set_bounds(bounds_of(&container));
            viewer.state.pointer_down(source, x, y);
        })?);
    }

    for kind in ["mousemove", "touchmove"] {
        let viewer = Rc::clone(viewer);
        listeners.push(Listener::add(&window, kind, move |event| {
            let (Some((x, y)), Ok(mut viewer)) = (pointer_position(&event), viewer.try_borrow_mut()) else {
                return;
            };
            viewer.state.pointer_move(x, y);
        })?);
    }

    // on window so a release outside the canvas still ends the drag
    for kind in ["mouseup", "touchend"] {
        let viewer = Rc::clone(viewer);
        listeners.push(Listener::add(&window, kind, move |event| {
            let (Some(source), Ok(mut viewer)) = (pointer_source(&event), viewer.try_borrow_mut()) else {
                return;
            };
            viewer.state.pointer_up(source);
        })?);
    }

    Ok(Attachments {
        _frame_loop: FrameLoop::start(Rc::clone(viewer))?,
        _resize: ResizeWatch::observe(container, Rc::clone(viewer))?,
        _listeners: listeners,
    })
}
