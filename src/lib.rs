//! Server-side implementation of wlr-foreign-toplevel-management.
//!
//! The compositor owns a [`ForeignToplevelManagerState`] plus one
//! [`ForeignToplevelHandle`] per mapped window. Property changes fan out to
//! every bound client's handle, terminated by one batched done event per
//! event-loop turn. Client requests never mutate state directly; they reach
//! the compositor as intents through [`ForeignToplevelHandler`].

mod handle;
mod manager;
pub mod protocol;

pub use handle::{ForeignToplevelHandle, GtkShell1Properties, KdeAppMenu, ToplevelState};
pub use manager::{
    ForeignToplevelGlobalData, ForeignToplevelHandler, ForeignToplevelManagerState,
    on_output_bound, on_output_destroyed,
};
