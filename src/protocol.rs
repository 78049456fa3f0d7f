//! Server-side bindings for wlr-foreign-toplevel-management-unstable-v1.
//!
//! Generated from the bundled protocol XML. Version 4 extends the upstream
//! protocol with the gtk_shell1_surface_dbus_properties and
//! kde_application_menu events carried by patched compositors.

pub use bitflags;
pub use smithay::reexports::wayland_server;
pub use smithay::reexports::wayland_server::protocol::{wl_output, wl_seat, wl_surface};

pub mod __interfaces {
    use smithay::reexports::wayland_server::backend as wayland_backend;
    use smithay::reexports::wayland_server::protocol::__interfaces::*;
    wayland_scanner::generate_interfaces!("protocols/wlr-foreign-toplevel-management-unstable-v1.xml");
}
use self::__interfaces::*;

wayland_scanner::generate_server_code!("protocols/wlr-foreign-toplevel-management-unstable-v1.xml");
