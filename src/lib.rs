//! Hero model viewer for the marketing site.
//!
//! The browser build (`wasm32`) exports `mountViewer` and the `Viewer`
//! handle. The native build carries the asset route in [`server`]. Scene
//! logic lives in plain modules so it runs under `cargo test` on the host.

pub mod config;
pub mod error;
pub mod interaction;
pub mod lifecycle;
pub mod lighting;
pub mod loader;
pub mod material;
pub mod resources;
pub mod state;
pub mod theme;
pub mod uniforms;

#[cfg(target_arch = "wasm32")]
mod dom;
#[cfg(target_arch = "wasm32")]
mod gpu;
#[cfg(target_arch = "wasm32")]
mod renderer;
#[cfg(target_arch = "wasm32")]
mod viewer;

#[cfg(not(target_arch = "wasm32"))]
pub mod server;

#[cfg(target_arch = "wasm32")]
pub use viewer::{mount_viewer, Viewer};
