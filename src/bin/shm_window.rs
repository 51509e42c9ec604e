//! Step 1: a toplevel window showing one shared-memory frame.
//!
//! Connects, binds the advertised globals, creates an xdg toplevel titled
//! "Example client", and on each acknowledged configure paints a red disc
//! on white into a freshly produced XRGB8888 buffer. No frame callbacks:
//! the content is static and only repainted when the compositor
//! reconfigures the window.

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
use wayland_protocols::xdg::shell::client::{
    xdg_surface::{self, XdgSurface},
    xdg_toplevel::{self, XdgToplevel},
    xdg_wm_base::{self, XdgWmBase},
};
use wayland_protocols_wlr::layer_shell::v1::client::zwlr_layer_shell_v1::ZwlrLayerShellV1;

use wayland_primer::globals::Globals;
use wayland_primer::paint;
use wayland_primer::shell::{self, Window};
use wayland_primer::shm::{Dimensions, ShmPool};

const TITLE: &str = "Example client";
const DEFAULT_SIZE: (u32, u32) = (1920, 1080);

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
        window: None,
        pool: None,
        exit: false,
    };

    let _registry = display.get_registry(&qh, ());
    // The barrier: every global announcement is in before we rely on one.
    event_queue.roundtrip(&mut app)?;

    let dim = Dimensions::new(DEFAULT_SIZE.0, DEFAULT_SIZE.1)?;
    let pool = ShmPool::new(app.globals.shm()?, dim, &qh)?;
    let window = Window::new(&app.globals, &qh, TITLE, DEFAULT_SIZE)?;
    app.pool = Some(pool);
    app.window = Some(window);

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
    window: Option<Window>,
    pool: Option<ShmPool>,
    globals: Globals,
    exit: bool,
}

impl App {
    /// Acknowledge the pending configure and, if it left us something to
    /// draw, produce and present a buffer at the configured size.
    fn redraw(&mut self, qh: &QueueHandle<Self>) {
        let (Some(window), Some(pool)) = (self.window.as_mut(), self.pool.as_mut()) else {
            return;
        };

        match window.ack_pending() {
            Ok(Some(dim)) => {
                let (buffer, canvas) = match pool.buffer(dim, wl_shm::Format::Xrgb8888, qh) {
                    Ok(pair) => pair,
                    Err(err) => {
                        error!("buffer production failed: {err}");
                        return;
                    }
                };
                paint::disc(canvas, dim, 150);
                if let Err(err) = window.present(&buffer) {
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
        if let xdg_wm_base::Event::Ping { serial } = event {
            shell::answer_ping(wm_base, serial);
        }
    }
}

impl Dispatch<XdgSurface, ()> for App {
    fn event(
        state: &mut Self,
        xdg_surface: &XdgSurface,
        event: xdg_surface::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        let xdg_surface::Event::Configure { serial } = event else {
            return;
        };
        if let Some(window) = state.window.as_mut() {
            if !window.owns(xdg_surface) {
                return;
            }
            if let Err(err) = window.on_configure(serial) {
                error!("configure rejected: {err}");
                return;
            }
        }
        state.redraw(qh);
    }
}

impl Dispatch<XdgToplevel, ()> for App {
    fn event(
        state: &mut Self,
        _: &XdgToplevel,
        event: xdg_toplevel::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            xdg_toplevel::Event::Configure { width, height, .. } => {
                if let Some(window) = state.window.as_mut() {
                    window.propose_size(width, height);
                }
            }
            xdg_toplevel::Event::Close => {
                info!("compositor asked us to close");
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
        // The server is done with these pixels; the slot can be repainted.
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
