//! Step 4: an overlay strip through the layer shell.
//!
//! Instead of an xdg toplevel, the surface gets the wlr-layer role: a bar
//! anchored to the top edge, stretched across the output (width left to
//! the server), 32 pixels tall, with a reserved exclusive zone so other
//! windows stay clear of it. The configure/ack exchange is the same as
//! for a toplevel; only the role object answering it differs.

use std::process;

use tracing::{debug, error, info};
use wayland_client::protocol::{
    wl_buffer::{self, WlBuffer},
    wl_compositor::WlCompositor,
    wl_registry::{self, WlRegistry},
    wl_seat::WlSeat,
    wl_shm::{self, WlShm},
    wl_shm_pool::WlShmPool,
    wl_surface::WlSurface,
};
use wayland_client::{Connection, Dispatch, QueueHandle};
use wayland_protocols::xdg::shell::client::xdg_wm_base::{self, XdgWmBase};
use wayland_protocols_wlr::layer_shell::v1::client::{
    zwlr_layer_shell_v1::{Layer, ZwlrLayerShellV1},
    zwlr_layer_surface_v1::{self, Anchor, ZwlrLayerSurfaceV1},
};

use wayland_primer::globals::Globals;
use wayland_primer::paint;
use wayland_primer::shell::{self, Margin, Overlay, OverlayConfig};
use wayland_primer::shm::{Dimensions, ShmPool};

const BAR_HEIGHT: u32 = 32;
const BAR_COLOR: u32 = 0xd0101010;

fn main() {
    wayland_primer::init_logging();
    if let Err(err) = run() {
        error!("fatal: {err}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let conn = Connection::connect_to_env()?;
    let display = conn.display();
    let mut event_queue = conn.new_event_queue();
    let qh = event_queue.handle();

    let mut app = App {
        globals: Globals::default(),
        overlay: None,
        pool: None,
        exit: false,
    };

    let _registry = display.get_registry(&qh, ());
    event_queue.roundtrip(&mut app)?;

    // A starter size; the pool grows to whatever the server configures.
    let pool = ShmPool::new(app.globals.shm()?, Dimensions::new(256, BAR_HEIGHT)?, &qh)?;
    let overlay = Overlay::new(
        &app.globals,
        &qh,
        "primer_bar",
        &OverlayConfig {
            layer: Layer::Top,
            anchor: Anchor::Top | Anchor::Left | Anchor::Right,
            // Zero width: the anchored axis is the server's call.
            size: (0, BAR_HEIGHT),
            margin: Margin::uniform(0),
            exclusive_zone: BAR_HEIGHT as i32,
        },
    )?;
    app.pool = Some(pool);
    app.overlay = Some(overlay);

    loop {
        if let Err(err) = event_queue.blocking_dispatch(&mut app) {
            info!("connection closed: {err}");
            break;
        }
        if app.exit {
            break;
        }
    }
    Ok(())
}

struct App {
    overlay: Option<Overlay>,
    pool: Option<ShmPool>,
    globals: Globals,
    exit: bool,
}

impl App {
    fn redraw(&mut self, qh: &QueueHandle<Self>) {
        let (Some(overlay), Some(pool)) = (self.overlay.as_mut(), self.pool.as_mut()) else {
            return;
        };

        match overlay.ack_pending() {
            Ok(Some(dim)) => {
                let (buffer, canvas) = match pool.buffer(dim, wl_shm::Format::Argb8888, qh) {
                    Ok(pair) => pair,
                    Err(err) => {
                        error!("buffer production failed: {err}");
                        return;
                    }
                };
                paint::solid(canvas, BAR_COLOR);
                if let Err(err) = overlay.present(&buffer) {
                    error!("present out of order: {err}");
                }
            }
            Ok(None) => debug!("zero-area configure, skipping the frame"),
            Err(err) => error!("configure out of order: {err}"),
        }
    }
}

impl Dispatch<WlRegistry, ()> for App {
    fn event(
        state: &mut Self,
        registry: &WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => state.globals.register(registry, qh, name, &interface, version),
            wl_registry::Event::GlobalRemove { name } => state.globals.removed(name),
            _ => {}
        }
    }
}

impl Dispatch<XdgWmBase, ()> for App {
    fn event(
        _: &mut Self,
        wm_base: &XdgWmBase,
        event: xdg_wm_base::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        // Bound but unused by this demo; the liveness probe still needs
        // answering while the binding exists.
        if let xdg_wm_base::Event::Ping { serial } = event {
            shell::answer_ping(wm_base, serial);
        }
    }
}

impl Dispatch<ZwlrLayerSurfaceV1, ()> for App {
    fn event(
        state: &mut Self,
        _: &ZwlrLayerSurfaceV1,
        event: zwlr_layer_surface_v1::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            zwlr_layer_surface_v1::Event::Configure {
                serial,
                width,
                height,
            } => {
                if let Some(overlay) = state.overlay.as_mut() {
                    if let Err(err) = overlay.on_configure(serial, width, height) {
                        error!("configure rejected: {err}");
                        return;
                    }
                }
                state.redraw(qh);
            }
            zwlr_layer_surface_v1::Event::Closed => {
                info!("layer surface closed by the server");
                state.exit = true;
            }
            _ => {}
        }
    }
}

impl Dispatch<WlBuffer, ()> for App {
    fn event(
        state: &mut Self,
        buffer: &WlBuffer,
        event: wl_buffer::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_buffer::Event::Release = event {
            if let Some(pool) = state.pool.as_mut() {
                pool.release(buffer);
            }
        }
    }
}

wayland_client::delegate_noop!(App: ignore WlCompositor);
wayland_client::delegate_noop!(App: ignore WlShm);
wayland_client::delegate_noop!(App: ignore WlShmPool);
wayland_client::delegate_noop!(App: ignore WlSurface);
wayland_client::delegate_noop!(App: ignore WlSeat);
wayland_client::delegate_noop!(App: ignore ZwlrLayerShellV1);
