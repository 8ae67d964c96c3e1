pub mod device;
pub mod engine;
pub mod logging;
pub mod observe;
pub mod prefetch;
pub mod scroll;
pub mod split;
pub mod tween;
pub mod vitals;

#[cfg(target_arch = "wasm32")]
pub mod frontend;

#[cfg(not(target_arch = "wasm32"))]
pub mod backend;
