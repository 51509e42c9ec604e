//! Enumeration and binding of the compositor's advertised globals.
//!
//! On connection the server announces its globals through `wl_registry`;
//! the demos subscribe, then force a roundtrip so every announcement has
//! been delivered before any bound handle is touched. [`GlobalDirectory`]
//! records the announcements and the binding decisions (at most one bind
//! per recognized interface, at a version no higher than advertised);
//! [`Globals`] holds the resulting handles and surfaces a hard error when
//! a required global turned out to be missing after the roundtrip.

use tracing::{debug, trace};
use wayland_client::{
    protocol::{wl_compositor::WlCompositor, wl_registry::WlRegistry, wl_seat::WlSeat, wl_shm::WlShm},
    Dispatch, QueueHandle,
};
use wayland_protocols::xdg::shell::client::xdg_wm_base::XdgWmBase;
use wayland_protocols_wlr::layer_shell::v1::client::zwlr_layer_shell_v1::ZwlrLayerShellV1;

/// The globals this crate knows how to bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalKind {
    /// `wl_compositor`, the surface factory.
    Compositor,
    /// `wl_shm`, the shared-memory buffer allocator.
    Shm,
    /// `xdg_wm_base`, the desktop windowing shell.
    WmBase,
    /// `wl_seat`, the input device group.
    Seat,
    /// `zwlr_layer_shell_v1`, the anchored-overlay shell.
    LayerShell,
}

impl GlobalKind {
    /// Map an advertised interface name to a kind, if recognized.
    pub fn from_interface(interface: &str) -> Option<GlobalKind> {
        match interface {
            "wl_compositor" => Some(GlobalKind::Compositor),
            "wl_shm" => Some(GlobalKind::Shm),
            "xdg_wm_base" => Some(GlobalKind::WmBase),
            "wl_seat" => Some(GlobalKind::Seat),
            "zwlr_layer_shell_v1" => Some(GlobalKind::LayerShell),
            _ => None,
        }
    }

    /// The wire name of the interface behind this kind.
    pub fn interface(self) -> &'static str {
        match self {
            GlobalKind::Compositor => "wl_compositor",
            GlobalKind::Shm => "wl_shm",
            GlobalKind::WmBase => "xdg_wm_base",
            GlobalKind::Seat => "wl_seat",
            GlobalKind::LayerShell => "zwlr_layer_shell_v1",
        }
    }

    /// The highest version this crate makes use of.
    ///
    /// `wl_compositor` must be at least 4 for `wl_surface.damage_buffer`;
    /// everything else is used at its base revision.
    pub fn preferred_version(self) -> u32 {
        match self {
            GlobalKind::Compositor => 4,
            GlobalKind::Shm => 1,
            GlobalKind::WmBase => 1,
            GlobalKind::Seat => 4,
            GlobalKind::LayerShell => 1,
        }
    }
}

/// A binding decision produced by [`GlobalDirectory::announce`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindRequest {
    /// Which recognized global to bind.
    pub kind: GlobalKind,
    /// The numeric name carried by the announcement.
    pub name: u32,
    /// The version to request, never above the advertised one.
    pub version: u32,
}

#[derive(Debug, Clone, Copy)]
struct BindRecord {
    kind: GlobalKind,
    name: u32,
}

/// Pure record of registry announcements and the binds they triggered.
///
/// Separated from the actual protocol objects so the binding rules can be
/// exercised without a compositor on the other end.
#[derive(Debug, Default)]
pub struct GlobalDirectory {
    bound: Vec<BindRecord>,
}

impl GlobalDirectory {
    /// Decide what to do about one `wl_registry.global` announcement.
    ///
    /// Returns the bind to perform, or `None` when the interface is not
    /// recognized (ignored, not an error) or its kind is already bound.
    pub fn announce(&mut self, name: u32, interface: &str, version: u32) -> Option<BindRequest> {
        let kind = match GlobalKind::from_interface(interface) {
            Some(kind) => kind,
            None => {
                trace!(interface, name, "ignoring unrecognized global");
                return None;
            }
        };

        if self.is_bound(kind) {
            debug!(interface, name, "kind already bound, ignoring duplicate global");
            return None;
        }

        self.bound.push(BindRecord { kind, name });
        Some(BindRequest {
            kind,
            name,
            version: u32::min(kind.preferred_version(), version),
        })
    }

    /// Whether a global of this kind has been bound.
    pub fn is_bound(&self, kind: GlobalKind) -> bool {
        self.bound.iter().any(|record| record.kind == kind)
    }

    /// Forget the record for a name the server withdrew.
    pub fn withdraw(&mut self, name: u32) -> Option<GlobalKind> {
        let index = self.bound.iter().position(|record| record.name == name)?;
        Some(self.bound.swap_remove(index).kind)
    }
}

/// A global the demo depends on was never advertised.
///
/// Raised only after the initial roundtrip, at which point every
/// announcement has been delivered and the absence is final.
#[derive(Debug, thiserror::Error)]
#[error("compositor does not advertise {0}")]
pub struct MissingGlobal(pub &'static str);

/// The set of bound global handles, filled in during registry dispatch.
///
/// Handles are only meaningful once the post-subscription roundtrip has
/// completed; the accessors return [`MissingGlobal`] for anything the
/// server never announced.
#[derive(Debug, Default)]
pub struct Globals {
    directory: GlobalDirectory,
    compositor: Option<WlCompositor>,
    shm: Option<WlShm>,
    wm_base: Option<XdgWmBase>,
    seat: Option<WlSeat>,
    layer_shell: Option<ZwlrLayerShellV1>,
}

impl Globals {
    /// Handle one `wl_registry.global` event, binding recognized kinds.
    pub fn register<S>(
        &mut self,
        registry: &WlRegistry,
        qh: &QueueHandle<S>,
        name: u32,
        interface: &str,
        version: u32,
    ) where
        S: Dispatch<WlCompositor, ()>
            + Dispatch<WlShm, ()>
            + Dispatch<XdgWmBase, ()>
            + Dispatch<WlSeat, ()>
            + Dispatch<ZwlrLayerShellV1, ()>
            + 'static,
    {
        let request = match self.directory.announce(name, interface, version) {
            Some(request) => request,
            None => return,
        };

        debug!(
            interface,
            name,
            advertised = version,
            chosen = request.version,
            "binding global"
        );

        match request.kind {
            GlobalKind::Compositor => {
                self.compositor = Some(registry.bind(request.name, request.version, qh, ()));
            }
            GlobalKind::Shm => {
                self.shm = Some(registry.bind(request.name, request.version, qh, ()));
            }
            GlobalKind::WmBase => {
                self.wm_base = Some(registry.bind(request.name, request.version, qh, ()));
            }
            GlobalKind::Seat => {
                self.seat = Some(registry.bind(request.name, request.version, qh, ()));
            }
            GlobalKind::LayerShell => {
                self.layer_shell = Some(registry.bind(request.name, request.version, qh, ()));
            }
        }
    }

    /// Handle `wl_registry.global_remove`.
    ///
    /// The demos do not survive losing a bound global; the withdrawal is
    /// only recorded and logged.
    pub fn removed(&mut self, name: u32) {
        if let Some(kind) = self.directory.withdraw(name) {
            debug!(interface = kind.interface(), name, "server withdrew a bound global");
            // Drop the handle as well, so accessors report the global as
            // missing instead of handing out a dead proxy, and a later
            // re-announcement binds from a clean state.
            match kind {
                GlobalKind::Compositor => self.compositor = None,
                GlobalKind::Shm => self.shm = None,
                GlobalKind::WmBase => self.wm_base = None,
                GlobalKind::Seat => self.seat = None,
                GlobalKind::LayerShell => self.layer_shell = None,
            }
        }
    }

    /// The surface factory. Required by every demo.
    pub fn compositor(&self) -> Result<&WlCompositor, MissingGlobal> {
        self.compositor
            .as_ref()
            .ok_or(MissingGlobal(GlobalKind::Compositor.interface()))
    }

    /// The shared-memory allocator. Required by every demo.
    pub fn shm(&self) -> Result<&WlShm, MissingGlobal> {
        self.shm.as_ref().ok_or(MissingGlobal(GlobalKind::Shm.interface()))
    }

    /// The desktop windowing shell. Required by the toplevel demos.
    pub fn wm_base(&self) -> Result<&XdgWmBase, MissingGlobal> {
        self.wm_base
            .as_ref()
            .ok_or(MissingGlobal(GlobalKind::WmBase.interface()))
    }

    /// The input seat, if the server has one.
    pub fn seat(&self) -> Option<&WlSeat> {
        self.seat.as_ref()
    }

    /// The layer shell. Required by the overlay demo only.
    pub fn layer_shell(&self) -> Result<&ZwlrLayerShellV1, MissingGlobal> {
        self.layer_shell
            .as_ref()
            .ok_or(MissingGlobal(GlobalKind::LayerShell.interface()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognized_interfaces_are_ignored() {
        let mut directory = GlobalDirectory::default();
        assert_eq!(directory.announce(1, "wl_output", 3), None);
        assert_eq!(directory.announce(2, "zxdg_decoration_manager_v1", 1), None);
    }

    #[test]
    fn recognized_interfaces_bind_once() {
        let mut directory = GlobalDirectory::default();
        let first = directory.announce(7, "wl_seat", 7).expect("first seat binds");
        assert_eq!(first.kind, GlobalKind::Seat);
        assert_eq!(first.name, 7);

        // A second seat is a valid advertisement, but we only drive one.
        assert_eq!(directory.announce(8, "wl_seat", 7), None);
        assert!(directory.is_bound(GlobalKind::Seat));
    }

    #[test]
    fn version_never_exceeds_advertised() {
        let mut directory = GlobalDirectory::default();
        let request = directory.announce(3, "wl_compositor", 2).unwrap();
        assert_eq!(request.version, 2);

        let request = directory.announce(4, "xdg_wm_base", 6).unwrap();
        assert_eq!(request.version, GlobalKind::WmBase.preferred_version());
        assert!(request.version <= 6);
    }

    #[test]
    fn kinds_bind_independently() {
        let mut directory = GlobalDirectory::default();
        assert!(directory.announce(1, "xdg_wm_base", 1).is_some());
        assert!(directory.announce(2, "zwlr_layer_shell_v1", 4).is_some());
        assert!(directory.is_bound(GlobalKind::WmBase));
        assert!(directory.is_bound(GlobalKind::LayerShell));
    }

    #[test]
    fn withdrawal_frees_the_kind() {
        let mut directory = GlobalDirectory::default();
        directory.announce(5, "wl_shm", 1).unwrap();
        assert_eq!(directory.withdraw(5), Some(GlobalKind::Shm));
        assert!(!directory.is_bound(GlobalKind::Shm));
        assert_eq!(directory.withdraw(5), None);
    }

    #[test]
    fn withdrawn_kind_rebinds_under_a_new_name() {
        let mut directory = GlobalDirectory::default();
        directory.announce(5, "wl_shm", 1).unwrap();
        directory.withdraw(5).unwrap();

        let again = directory.announce(9, "wl_shm", 1).expect("fresh shm binds");
        assert_eq!(again.name, 9);
        assert!(directory.is_bound(GlobalKind::Shm));
    }

    #[test]
    fn removal_of_an_unbound_name_is_ignored() {
        let mut globals = Globals::default();
        globals.removed(42);
        assert!(globals.compositor().is_err());
        assert!(globals.seat().is_none());
    }
}
