#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! # wayland-primer: a stepped tour of the Wayland client side
//!
//! This crate is a small library backing a series of standalone demo
//! binaries (under `src/bin/`), each of which opens a window on a Wayland
//! compositor and draws into it. Every binary performs the same overall
//! dance: connect, enumerate and bind globals, create a surface, give it a
//! shell role, answer the configure/ack handshake, present buffers, and
//! dispatch events until the compositor goes away. Each binary adds one
//! capability over the previous one:
//!
//! - `shm_window`: a toplevel window showing a single shared-memory frame.
//! - `animated_window`: frame callbacks and live resize.
//! - `pointer_window`: seat and pointer wiring on top of the above.
//! - `layer_bar`: an anchored layer-shell strip instead of a toplevel.
//!
//! ## Structure of the crate
//!
//! The recurring protocol exchange lives in the library so the binaries stay
//! readable:
//!
//! - [`globals`] enumerates and binds the advertised globals, enforcing the
//!   bind-once and version rules, and fails fast when a required global is
//!   missing after the initial roundtrip.
//! - [`shell`] owns the surface lifecycle: role attachment, the
//!   configure/acknowledge state machine, and the wm-base ping/pong.
//! - [`shm`] maps anonymous shared memory and hands out `wl_buffer`s with
//!   checked stride arithmetic.
//! - [`frame`] paces redraws with the one-outstanding-frame-callback rule.
//! - [`paint`] holds the trivial pixel fills the demos draw with.
//!
//! ## Logging
//!
//! The library logs through [`tracing`]; binaries install a subscriber via
//! [`init_logging`], honoring `RUST_LOG` when it is set.

pub mod frame;
pub mod globals;
pub mod paint;
pub mod shell;
pub mod shm;

/// Install the demo binaries' tracing subscriber.
///
/// Uses `RUST_LOG` when present, and a compact format either way.
pub fn init_logging() {
    if let Ok(env_filter) = tracing_subscriber::EnvFilter::try_from_default_env() {
        tracing_subscriber::fmt()
            .compact()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().compact().init();
    }
}
