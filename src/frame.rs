//! Frame pacing through `wl_surface.frame` callbacks.
//!
//! A frame callback is a one-shot "may render now" ticket. Exactly one is
//! outstanding per surface, and when it fires the next one must be
//! requested before any rendering work for the next frame starts, or a
//! frame of latency creeps back in. [`FrameClock`] tracks that rhythm and
//! turns violations into typed errors instead of silent pacing stalls.

use tracing::trace;
use wayland_client::protocol::{wl_callback::WlCallback, wl_surface::WlSurface};
use wayland_client::{Dispatch, QueueHandle};

/// The pacing contract was violated.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PacingError {
    /// A token was requested while one is still outstanding. The protocol
    /// allows it, but it defeats pacing.
    #[error("a frame callback is already outstanding for this surface")]
    TokenOutstanding,
    /// A callback fired that this clock never requested.
    #[error("no frame callback is outstanding for this surface")]
    NoTokenOutstanding,
}

/// Per-surface pacing state: at most one outstanding frame callback.
#[derive(Debug, Default)]
pub struct FrameClock {
    outstanding: bool,
}

impl FrameClock {
    /// A clock with no outstanding token.
    pub fn new() -> FrameClock {
        FrameClock::default()
    }

    /// Request the next frame callback on `surface`.
    ///
    /// Call this right when the previous callback fires, before producing
    /// the next buffer, and once before the commit that starts the
    /// animation.
    pub fn schedule<S>(&mut self, surface: &WlSurface, qh: &QueueHandle<S>) -> Result<(), PacingError>
    where
        S: Dispatch<WlCallback, ()> + 'static,
    {
        self.request()?;
        surface.frame(qh, ());
        Ok(())
    }

    /// Record a token request without touching the wire.
    pub fn request(&mut self) -> Result<(), PacingError> {
        if self.outstanding {
            return Err(PacingError::TokenOutstanding);
        }
        self.outstanding = true;
        trace!("frame callback requested");
        Ok(())
    }

    /// Record that the outstanding callback fired.
    pub fn fulfilled(&mut self) -> Result<(), PacingError> {
        if !self.outstanding {
            return Err(PacingError::NoTokenOutstanding);
        }
        self.outstanding = false;
        Ok(())
    }

    /// Whether a callback is currently outstanding.
    pub fn is_outstanding(&self) -> bool {
        self.outstanding
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_token_at_a_time() {
        let mut clock = FrameClock::new();
        clock.request().unwrap();
        assert_eq!(clock.request(), Err(PacingError::TokenOutstanding));

        clock.fulfilled().unwrap();
        clock.request().unwrap();
    }

    #[test]
    fn fulfilment_requires_an_outstanding_token() {
        let mut clock = FrameClock::new();
        assert_eq!(clock.fulfilled(), Err(PacingError::NoTokenOutstanding));
    }

    #[test]
    fn steady_state_order_is_fulfil_then_request() {
        // The redraw path on every callback: fulfil the fired token, request
        // the next one, then render. Doing it in this order must always be
        // accepted, indefinitely.
        let mut clock = FrameClock::new();
        clock.request().unwrap();
        for _ in 0..3 {
            clock.fulfilled().unwrap();
            clock.request().unwrap();
            assert!(clock.is_outstanding());
        }
    }
}
