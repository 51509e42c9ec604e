//! Surface lifecycle: role attachment and the configure/ack handshake.
//!
//! Every drawable surface in these demos goes through the same exchange
//! regardless of its shell: create the raw surface, attach exactly one
//! role, commit once without a buffer, then wait for the server's first
//! configure, acknowledge its serial, and only then present pixels. The
//! exchange is kept in [`SurfaceState`], a plain state machine with no
//! protocol objects inside, so the sequencing rules are enforced by type
//! and testable without a compositor. [`Window`] and [`Overlay`] wrap the
//! machine around the xdg-toplevel and wlr-layer roles respectively; the
//! two are separate types, so a second role can never reach a surface.

use tracing::{debug, trace};
use wayland_client::protocol::{wl_buffer::WlBuffer, wl_surface::WlSurface};
use wayland_client::{Dispatch, QueueHandle};
use wayland_protocols::xdg::shell::client::{
    xdg_surface::XdgSurface,
    xdg_toplevel::XdgToplevel,
    xdg_wm_base::XdgWmBase,
};
use wayland_protocols_wlr::layer_shell::v1::client::{
    zwlr_layer_shell_v1::Layer,
    zwlr_layer_surface_v1::{Anchor, ZwlrLayerSurfaceV1},
};

use crate::globals::{Globals, MissingGlobal};
use crate::shm::Dimensions;

/// Where a surface stands in the configure/ack exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Raw surface exists, no role yet.
    Created,
    /// A role is attached but the surface has not been committed.
    RoleAttached,
    /// Committed without a buffer; waiting for the server's configure.
    AwaitingConfigure,
    /// The latest configure is acknowledged; a buffer may be attached.
    Configured,
    /// A buffer is attached and committed.
    Presenting,
}

/// A configure event as delivered by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proposal {
    /// Serial to echo back in the acknowledgement.
    pub serial: u32,
    /// Proposed width in pixels; zero-area proposals are valid.
    pub width: u32,
    /// Proposed height in pixels.
    pub height: u32,
}

/// The outcome of acknowledging the latest configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledged {
    /// The serial that was echoed.
    pub serial: u32,
    /// The size to draw at, or `None` for a zero-area state in which no
    /// buffer should be produced.
    pub drawable: Option<(u32, u32)>,
}

/// A sequencing rule of the handshake was about to be violated.
///
/// These indicate client programming errors, not server misbehavior; the
/// wrappers in this module are structured so they do not come up.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StateError {
    /// The surface already carries a role.
    #[error("a role is already attached to this surface")]
    RoleAlreadyAttached,
    /// The event is not legal in the surface's current phase.
    #[error("{event} is not valid in the {phase:?} phase")]
    BadTransition {
        /// Phase the machine was in.
        phase: Phase,
        /// The rejected event.
        event: &'static str,
    },
}

/// Errors from shell-surface construction.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    /// A shell or compositor global needed for this role is missing.
    #[error(transparent)]
    MissingGlobal(#[from] MissingGlobal),
    /// The handshake sequencing was violated.
    #[error(transparent)]
    State(#[from] StateError),
}

/// The configure/ack state machine for one surface.
///
/// Coalesced configures are handled by keeping only the most recently
/// received proposal; acknowledging acks that latest serial, which the
/// shell protocols permit for a batch.
#[derive(Debug)]
pub struct SurfaceState {
    phase: Phase,
    pending: Option<Proposal>,
    drawable: Option<(u32, u32)>,
}

impl Default for SurfaceState {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfaceState {
    /// A fresh machine for a surface without a role.
    pub fn new() -> SurfaceState {
        SurfaceState {
            phase: Phase::Created,
            pending: None,
            drawable: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Attach the surface's single role.
    pub fn attach_role(&mut self) -> Result<(), StateError> {
        match self.phase {
            Phase::Created => {
                self.phase = Phase::RoleAttached;
                Ok(())
            }
            _ => Err(StateError::RoleAlreadyAttached),
        }
    }

    /// The initial commit without a buffer, asking for the first configure.
    pub fn initial_commit(&mut self) -> Result<(), StateError> {
        match self.phase {
            Phase::RoleAttached => {
                self.phase = Phase::AwaitingConfigure;
                Ok(())
            }
            phase => Err(StateError::BadTransition {
                phase,
                event: "initial commit",
            }),
        }
    }

    /// Record a configure from the server.
    ///
    /// Replaces any proposal that has not been acknowledged yet, and pulls
    /// a presenting surface back into the awaiting phase on resize. The
    /// current buffer stays attached server-side either way.
    pub fn configure(&mut self, proposal: Proposal) -> Result<(), StateError> {
        match self.phase {
            Phase::AwaitingConfigure | Phase::Configured | Phase::Presenting => {
                if let Some(stale) = self.pending.replace(proposal) {
                    trace!(stale = stale.serial, fresh = proposal.serial, "configure coalesced");
                }
                self.phase = Phase::AwaitingConfigure;
                Ok(())
            }
            phase => Err(StateError::BadTransition {
                phase,
                event: "configure",
            }),
        }
    }

    /// Acknowledge the latest pending configure.
    ///
    /// The caller must echo [`Acknowledged::serial`] on the wire before the
    /// next commit. A zero-area proposal is acknowledged like any other but
    /// yields no drawable size.
    pub fn acknowledge(&mut self) -> Result<Acknowledged, StateError> {
        match (self.phase, self.pending.take()) {
            (Phase::AwaitingConfigure, Some(proposal)) => {
                self.drawable = if proposal.width == 0 || proposal.height == 0 {
                    None
                } else {
                    Some((proposal.width, proposal.height))
                };
                self.phase = Phase::Configured;
                Ok(Acknowledged {
                    serial: proposal.serial,
                    drawable: self.drawable,
                })
            }
            (phase, pending) => {
                self.pending = pending;
                Err(StateError::BadTransition {
                    phase,
                    event: "ack_configure",
                })
            }
        }
    }

    /// A buffer of the acknowledged size is attached and committed.
    pub fn presented(&mut self) -> Result<(u32, u32), StateError> {
        match (self.phase, self.drawable) {
            (Phase::Configured, Some(size)) => {
                self.phase = Phase::Presenting;
                Ok(size)
            }
            (phase, _) => Err(StateError::BadTransition {
                phase,
                event: "present",
            }),
        }
    }
}

/// Echo a liveness probe from the windowing shell.
///
/// Must be wired up before any surface using the shell exists; an
/// unanswered ping gets the connection terminated.
pub fn answer_ping(wm_base: &XdgWmBase, serial: u32) {
    trace!(serial, "pong");
    wm_base.pong(serial);
}

/// A conventional resizable, titled window (xdg-toplevel role).
#[derive(Debug)]
pub struct Window {
    surface: WlSurface,
    xdg_surface: XdgSurface,
    toplevel: XdgToplevel,
    state: SurfaceState,
    proposed: Option<(u32, u32)>,
    size: (u32, u32),
}

impl Window {
    /// Create the surface, attach the toplevel role, set the title, and
    /// perform the initial commit.
    ///
    /// `default_size` is used whenever the compositor leaves an axis up to
    /// the client (an xdg configure of zero on that axis).
    pub fn new<S>(
        globals: &Globals,
        qh: &QueueHandle<S>,
        title: &str,
        default_size: (u32, u32),
    ) -> Result<Window, ShellError>
    where
        S: Dispatch<WlSurface, ()> + Dispatch<XdgSurface, ()> + Dispatch<XdgToplevel, ()> + 'static,
    {
        let compositor = globals.compositor()?;
        let wm_base = globals.wm_base()?;

        let mut state = SurfaceState::new();
        let surface = compositor.create_surface(qh, ());
        let xdg_surface = wm_base.get_xdg_surface(&surface, qh, ());
        let toplevel = xdg_surface.get_toplevel(qh, ());
        state.attach_role()?;

        toplevel.set_title(title.to_owned());
        surface.commit();
        state.initial_commit()?;
        debug!(title, "toplevel mapped, awaiting first configure");

        Ok(Window {
            surface,
            xdg_surface,
            toplevel,
            state,
            proposed: None,
            size: default_size,
        })
    }

    /// Record the size from an `xdg_toplevel.configure`.
    ///
    /// Zero on an axis means the compositor leaves that axis to us; the
    /// last known (or default) extent is substituted.
    pub fn propose_size(&mut self, width: i32, height: i32) {
        let width = if width > 0 { width as u32 } else { self.size.0 };
        let height = if height > 0 { height as u32 } else { self.size.1 };
        self.proposed = Some((width, height));
    }

    /// Record the serial from an `xdg_surface.configure`.
    pub fn on_configure(&mut self, serial: u32) -> Result<(), StateError> {
        let (width, height) = self.proposed.take().unwrap_or(self.size);
        self.state.configure(Proposal { serial, width, height })
    }

    /// Acknowledge the latest configure on the wire.
    ///
    /// Returns the size to draw at, or `None` when nothing should be
    /// produced for the acknowledged state.
    pub fn ack_pending(&mut self) -> Result<Option<Dimensions>, StateError> {
        let ack = self.state.acknowledge()?;
        self.xdg_surface.ack_configure(ack.serial);
        match ack.drawable {
            Some((width, height)) => {
                self.size = (width, height);
                Ok(Dimensions::new(width, height).ok())
            }
            None => Ok(None),
        }
    }

    /// Attach `buffer`, damage the full surface, and commit.
    pub fn present(&mut self, buffer: &WlBuffer) -> Result<(), StateError> {
        let (width, height) = self.state.presented()?;
        self.surface.attach(Some(buffer), 0, 0);
        self.surface.damage_buffer(0, 0, width as i32, height as i32);
        self.surface.commit();
        Ok(())
    }

    /// The underlying surface, for frame callbacks.
    pub fn wl_surface(&self) -> &WlSurface {
        &self.surface
    }

    /// Whether this window's xdg surface delivered the event.
    pub fn owns(&self, xdg_surface: &XdgSurface) -> bool {
        &self.xdg_surface == xdg_surface
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        // Roles go before the surface.
        self.toplevel.destroy();
        self.xdg_surface.destroy();
        self.surface.destroy();
    }
}

/// Margins between an overlay and the edges it is anchored to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Margin {
    /// Pixels from the top edge.
    pub top: i32,
    /// Pixels from the right edge.
    pub right: i32,
    /// Pixels from the bottom edge.
    pub bottom: i32,
    /// Pixels from the left edge.
    pub left: i32,
}

impl Margin {
    /// The same margin on all four edges.
    pub fn uniform(amount: i32) -> Margin {
        Margin {
            top: amount,
            right: amount,
            bottom: amount,
            left: amount,
        }
    }
}

/// What to ask of the layer shell before the first configure.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// Which rendering layer to live on.
    pub layer: Layer,
    /// Edges to anchor to.
    pub anchor: Anchor,
    /// Requested size; zero on an axis lets the server decide that axis.
    pub size: (u32, u32),
    /// Margins from the anchored edges.
    pub margin: Margin,
    /// Pixels of the anchored edge to reserve, or 0 for none.
    pub exclusive_zone: i32,
}

/// An anchored, undecorated strip (wlr-layer-surface role).
#[derive(Debug)]
pub struct Overlay {
    surface: WlSurface,
    layer_surface: ZwlrLayerSurfaceV1,
    state: SurfaceState,
}

impl Overlay {
    /// Create the surface, attach the layer role with `config`, and perform
    /// the initial commit.
    ///
    /// Anchors, size and margins must be set before the first configure, so
    /// they are taken here rather than as later setters.
    pub fn new<S>(
        globals: &Globals,
        qh: &QueueHandle<S>,
        namespace: &str,
        config: &OverlayConfig,
    ) -> Result<Overlay, ShellError>
    where
        S: Dispatch<WlSurface, ()> + Dispatch<ZwlrLayerSurfaceV1, ()> + 'static,
    {
        let compositor = globals.compositor()?;
        let layer_shell = globals.layer_shell()?;

        let mut state = SurfaceState::new();
        let surface = compositor.create_surface(qh, ());
        let layer_surface =
            layer_shell.get_layer_surface(&surface, None, config.layer, namespace.to_owned(), qh, ());
        state.attach_role()?;

        layer_surface.set_anchor(config.anchor);
        layer_surface.set_size(config.size.0, config.size.1);
        let margin = config.margin;
        layer_surface.set_margin(margin.top, margin.right, margin.bottom, margin.left);
        layer_surface.set_exclusive_zone(config.exclusive_zone);

        surface.commit();
        state.initial_commit()?;
        debug!(namespace, "layer surface mapped, awaiting first configure");

        Ok(Overlay {
            surface,
            layer_surface,
            state,
        })
    }

    /// Record a `zwlr_layer_surface_v1.configure`.
    ///
    /// Unlike the toplevel path, the server's size is authoritative here.
    pub fn on_configure(&mut self, serial: u32, width: u32, height: u32) -> Result<(), StateError> {
        self.state.configure(Proposal { serial, width, height })
    }

    /// Acknowledge the latest configure on the wire.
    pub fn ack_pending(&mut self) -> Result<Option<Dimensions>, StateError> {
        let ack = self.state.acknowledge()?;
        self.layer_surface.ack_configure(ack.serial);
        Ok(ack
            .drawable
            .and_then(|(width, height)| Dimensions::new(width, height).ok()))
    }

    /// Attach `buffer`, damage the full surface, and commit.
    pub fn present(&mut self, buffer: &WlBuffer) -> Result<(), StateError> {
        let (width, height) = self.state.presented()?;
        self.surface.attach(Some(buffer), 0, 0);
        self.surface.damage_buffer(0, 0, width as i32, height as i32);
        self.surface.commit();
        Ok(())
    }

    /// The underlying surface, for frame callbacks.
    pub fn wl_surface(&self) -> &WlSurface {
        &self.surface
    }
}

impl Drop for Overlay {
    fn drop(&mut self) {
        self.layer_surface.destroy();
        self.surface.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn awaiting() -> SurfaceState {
        let mut state = SurfaceState::new();
        state.attach_role().unwrap();
        state.initial_commit().unwrap();
        state
    }

    #[test]
    fn no_present_before_first_ack() {
        let mut state = awaiting();
        assert!(state.presented().is_err());

        state
            .configure(Proposal {
                serial: 1,
                width: 1920,
                height: 1080,
            })
            .unwrap();
        // Received but unacknowledged: still no buffer allowed.
        assert!(state.presented().is_err());

        let ack = state.acknowledge().unwrap();
        assert_eq!(ack.serial, 1);
        assert_eq!(ack.drawable, Some((1920, 1080)));
        assert_eq!(state.presented().unwrap(), (1920, 1080));
        assert_eq!(state.phase(), Phase::Presenting);
    }

    #[test]
    fn second_role_is_rejected() {
        let mut state = SurfaceState::new();
        state.attach_role().unwrap();
        assert_eq!(state.attach_role(), Err(StateError::RoleAlreadyAttached));
    }

    #[test]
    fn commit_before_role_is_rejected() {
        let mut state = SurfaceState::new();
        assert!(state.initial_commit().is_err());
    }

    #[test]
    fn configure_before_initial_commit_is_rejected() {
        let mut state = SurfaceState::new();
        state.attach_role().unwrap();
        assert!(state
            .configure(Proposal {
                serial: 1,
                width: 100,
                height: 100
            })
            .is_err());
    }

    #[test]
    fn coalesced_burst_acks_the_latest_serial() {
        let mut state = awaiting();
        state
            .configure(Proposal {
                serial: 1,
                width: 800,
                height: 600,
            })
            .unwrap();
        state
            .configure(Proposal {
                serial: 2,
                width: 0,
                height: 0,
            })
            .unwrap();

        let ack = state.acknowledge().unwrap();
        assert_eq!(ack.serial, 2);
        // Zero-area state: acknowledged, but nothing to draw.
        assert_eq!(ack.drawable, None);
        assert!(state.presented().is_err());

        // One acknowledgement per batch; a second has nothing to ack.
        assert!(state.acknowledge().is_err());
    }

    #[test]
    fn resize_loops_back_through_awaiting() {
        let mut state = awaiting();
        state
            .configure(Proposal {
                serial: 1,
                width: 640,
                height: 480,
            })
            .unwrap();
        state.acknowledge().unwrap();
        state.presented().unwrap();

        state
            .configure(Proposal {
                serial: 2,
                width: 1024,
                height: 768,
            })
            .unwrap();
        assert_eq!(state.phase(), Phase::AwaitingConfigure);
        // The new serial must be acknowledged before the next buffer.
        assert!(state.presented().is_err());
        let ack = state.acknowledge().unwrap();
        assert_eq!(ack.serial, 2);
        assert_eq!(state.presented().unwrap(), (1024, 768));
    }

    #[test]
    fn zero_area_then_real_size_recovers() {
        let mut state = awaiting();
        state
            .configure(Proposal {
                serial: 1,
                width: 0,
                height: 120,
            })
            .unwrap();
        assert_eq!(state.acknowledge().unwrap().drawable, None);

        state
            .configure(Proposal {
                serial: 2,
                width: 1280,
                height: 120,
            })
            .unwrap();
        assert_eq!(state.acknowledge().unwrap().drawable, Some((1280, 120)));
        assert!(state.presented().is_ok());
    }
}
