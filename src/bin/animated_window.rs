//! Step 2: frame callbacks and live resize.
//!
//! Same skeleton as `shm_window`, plus pacing: every presented frame asks
//! for one frame callback, and each callback immediately requests the next
//! one before the frame is rendered, keeping the animation locked to the
//! compositor's refresh cadence. The content is a scrolling gradient that
//! re-renders at whatever size the latest acknowledged configure chose.

use std::process;

use tracing::{debug, error, info};
use wayland_client::protocol::{
    wl_buffer::{self, WlBuffer},
    wl_callback::{self, WlCallback},
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

use wayland_primer::frame::{FrameClock, PacingError};
use wayland_primer::globals::Globals;
use wayland_primer::paint;
use wayland_primer::shell::{self, Window};
use wayland_primer::shm::{Dimensions, ShmPool};

const TITLE: &str = "Example client (animated)";
const DEFAULT_SIZE: (u32, u32) = (640, 480);

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
        clock: FrameClock::new(),
        dim: None,
        shift: 0,
        exit: false,
    };

    let _registry = display.get_registry(&qh, ());
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
    clock: FrameClock,
    dim: Option<Dimensions>,
    shift: u32,
    exit: bool,
}

impl App {
    /// Ask for the next frame callback ahead of any rendering work.
    ///
    /// An already-outstanding token is fine: it means the pacing chain is
    /// unbroken (e.g. a resize arrived between frames).
    fn pace(&mut self, qh: &QueueHandle<Self>) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        match self.clock.schedule(window.wl_surface(), qh) {
            Ok(()) | Err(PacingError::TokenOutstanding) => {}
            Err(err) => error!("frame pacing broke: {err}"),
        }
    }

    /// Produce a buffer at the current size, paint the next animation
    /// frame, and commit it.
    fn render(&mut self, qh: &QueueHandle<Self>) {
        let (Some(window), Some(pool), Some(dim)) =
            (self.window.as_mut(), self.pool.as_mut(), self.dim)
        else {
            return;
        };

        let (buffer, canvas) = match pool.buffer(dim, wl_shm::Format::Xrgb8888, qh) {
            Ok(pair) => pair,
            Err(err) => {
                error!("buffer production failed: {err}");
                return;
            }
        };
        paint::gradient(canvas, dim, self.shift);
        self.shift = (self.shift + 1) % dim.width();

        if let Err(err) = window.present(&buffer) {
            error!("present out of order: {err}");
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
        let Some(window) = state.window.as_mut() else {
            return;
        };
        if !window.owns(xdg_surface) {
            return;
        }
        if let Err(err) = window.on_configure(serial) {
            error!("configure rejected: {err}");
            return;
        }
        match window.ack_pending() {
            Ok(Some(dim)) => {
                state.dim = Some(dim);
                state.pace(qh);
                state.render(qh);
            }
            Ok(None) => {
                debug!("zero-area configure, pausing the animation");
                state.dim = None;
            }
            Err(err) => error!("configure out of order: {err}"),
        }
    }
}

impl Dispatch<WlCallback, ()> for App {
    fn event(
        state: &mut Self,
        _: &WlCallback,
        event: wl_callback::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        let wl_callback::Event::Done { .. } = event else {
            return;
        };
        if let Err(err) = state.clock.fulfilled() {
            error!("stray frame callback: {err}");
            return;
        }
        if state.dim.is_some() {
            // Next token first, then the rendering work for this frame.
            state.pace(qh);
            state.render(qh);
        }
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
