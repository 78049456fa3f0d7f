use std::cell::RefCell;
use std::rc::Rc;

use smithay::input::{Seat, SeatHandler};
use smithay::output::Output;
use smithay::reexports::calloop::LoopHandle;
use smithay::reexports::wayland_server::backend::{ClientId, GlobalId};
use smithay::reexports::wayland_server::protocol::wl_output::WlOutput;
use smithay::reexports::wayland_server::protocol::wl_surface::WlSurface;
use smithay::reexports::wayland_server::{
    Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch, New, Resource,
};
use smithay::utils::{Logical, Rectangle};

use crate::ForeignToplevelHandle;
use crate::protocol::zwlr_foreign_toplevel_handle_v1::{self, ZwlrForeignToplevelHandleV1};
use crate::protocol::zwlr_foreign_toplevel_manager_v1::{self, ZwlrForeignToplevelManagerV1};

const VERSION: u32 = 4;

/// Registry of live toplevels and of the managers clients have bound.
///
/// Owned by the compositor state; created once at startup and torn down
/// with [`Self::destroy`] when the display shuts down.
pub struct ForeignToplevelManagerState<D> {
    display: DisplayHandle,
    loop_handle: LoopHandle<'static, D>,
    global: GlobalId,
    instances: Vec<ZwlrForeignToplevelManagerV1>,
    toplevels: Rc<RefCell<Vec<ForeignToplevelHandle<D>>>>,
}

pub struct ForeignToplevelGlobalData {
    filter: Box<dyn for<'c> Fn(&'c Client) -> bool + Send + Sync>,
}

/// Client requests relayed to the compositor.
///
/// Every method is an intent: the compositor decides whether to honor it
/// and, if so, reports the outcome back through the handle's setters.
pub trait ForeignToplevelHandler: SeatHandler + Sized {
    fn foreign_toplevel_manager_state(&mut self) -> &mut ForeignToplevelManagerState<Self>;

    fn activate(&mut self, toplevel: ForeignToplevelHandle<Self>, seat: Seat<Self>);
    fn close(&mut self, toplevel: ForeignToplevelHandle<Self>);
    fn set_maximized(&mut self, toplevel: ForeignToplevelHandle<Self>);
    fn unset_maximized(&mut self, toplevel: ForeignToplevelHandle<Self>);
    fn set_minimized(&mut self, toplevel: ForeignToplevelHandle<Self>);
    fn unset_minimized(&mut self, toplevel: ForeignToplevelHandle<Self>);
    fn set_fullscreen(&mut self, toplevel: ForeignToplevelHandle<Self>, output: Option<Output>);
    fn unset_fullscreen(&mut self, toplevel: ForeignToplevelHandle<Self>);
    fn set_rectangle(
        &mut self,
        toplevel: ForeignToplevelHandle<Self>,
        surface: WlSurface,
        rect: Rectangle<i32, Logical>,
    );
}

impl<D> ForeignToplevelManagerState<D> {
    pub fn new<F>(display: &DisplayHandle, loop_handle: LoopHandle<'static, D>, filter: F) -> Self
    where
        D: GlobalDispatch<ZwlrForeignToplevelManagerV1, ForeignToplevelGlobalData>,
        D: Dispatch<ZwlrForeignToplevelManagerV1, ()>,
        D: 'static,
        F: for<'c> Fn(&'c Client) -> bool + Send + Sync + 'static,
    {
        let global_data = ForeignToplevelGlobalData {
            filter: Box::new(filter),
        };
        let global =
            display.create_global::<D, ZwlrForeignToplevelManagerV1, _>(VERSION, global_data);

        Self {
            display: display.clone(),
            loop_handle,
            global,
            instances: Vec::new(),
            toplevels: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Register a new toplevel and announce it to every bound manager.
    ///
    /// The handle carries no properties yet; the caller fills them in with
    /// the setters, and the batched done event follows once the event loop
    /// goes idle.
    pub fn create_toplevel(&mut self) -> ForeignToplevelHandle<D>
    where
        D: Dispatch<ZwlrForeignToplevelHandleV1, ()> + 'static,
    {
        let toplevel =
            ForeignToplevelHandle::new(self.loop_handle.clone(), Rc::downgrade(&self.toplevels));
        for manager in &self.instances {
            if let Some(client) = manager.client() {
                toplevel.add_instance(&self.display, &client, manager);
            }
        }
        self.toplevels.borrow_mut().push(toplevel.clone());
        toplevel
    }

    /// Remove the manager global so no further binds can happen.
    /// Already-bound clients keep their objects until they disconnect.
    pub fn destroy(&mut self)
    where
        D: 'static,
    {
        self.display.remove_global::<D>(self.global.clone());
    }

    pub fn toplevels(&self) -> Vec<ForeignToplevelHandle<D>> {
        self.toplevels.borrow().iter().cloned().collect()
    }
}

/// A client bound a wl_output after toplevels already entered that output;
/// re-announce those memberships to it. Wire this up from
/// `OutputHandler::output_bound`.
pub fn on_output_bound<D>(state: &mut D, output: &Output, wl_output: &WlOutput)
where
    D: ForeignToplevelHandler + 'static,
{
    let Some(client) = wl_output.client() else {
        return;
    };

    let toplevels = state.foreign_toplevel_manager_state().toplevels();
    for toplevel in toplevels {
        toplevel.output_bound(&client, output, wl_output);
    }
}

/// An output is going away; every toplevel still on it leaves it first so
/// no membership ever names a destroyed output.
pub fn on_output_destroyed<D>(state: &mut D, output: &Output)
where
    D: ForeignToplevelHandler + 'static,
{
    let toplevels = state.foreign_toplevel_manager_state().toplevels();
    for toplevel in toplevels {
        toplevel.output_destroyed(output);
    }
}

impl<D> GlobalDispatch<ZwlrForeignToplevelManagerV1, ForeignToplevelGlobalData, D>
    for ForeignToplevelManagerState<D>
where
    D: GlobalDispatch<ZwlrForeignToplevelManagerV1, ForeignToplevelGlobalData>,
    D: Dispatch<ZwlrForeignToplevelManagerV1, ()>,
    D: Dispatch<ZwlrForeignToplevelHandleV1, ()>,
    D: ForeignToplevelHandler,
    D: 'static,
{
    fn bind(
        state: &mut D,
        handle: &DisplayHandle,
        client: &Client,
        resource: New<ZwlrForeignToplevelManagerV1>,
        _global_data: &ForeignToplevelGlobalData,
        data_init: &mut DataInit<'_, D>,
    ) {
        let manager = data_init.init(resource, ());

        let protocol_state = state.foreign_toplevel_manager_state();
        let toplevels = protocol_state.toplevels();

        // Two passes: first give this client a handle for every toplevel,
        // then send the details. A toplevel's parent may sit later in the
        // registry than the toplevel itself, so a single interleaved pass
        // could resolve a parent before the client has a handle for it.
        let mut created = Vec::with_capacity(toplevels.len());
        for toplevel in &toplevels {
            created.push(toplevel.add_instance(handle, client, &manager));
        }
        for (toplevel, instance) in toplevels.iter().zip(created) {
            if let Some(instance) = instance {
                toplevel.send_details(&instance);
            }
        }

        protocol_state.instances.push(manager);
    }

    fn can_view(client: Client, global_data: &ForeignToplevelGlobalData) -> bool {
        (global_data.filter)(&client)
    }
}

impl<D> Dispatch<ZwlrForeignToplevelManagerV1, (), D> for ForeignToplevelManagerState<D>
where
    D: Dispatch<ZwlrForeignToplevelManagerV1, ()>,
    D: ForeignToplevelHandler,
    D: 'static,
{
    fn request(
        state: &mut D,
        _client: &Client,
        resource: &ZwlrForeignToplevelManagerV1,
        request: <ZwlrForeignToplevelManagerV1 as Resource>::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
        if let zwlr_foreign_toplevel_manager_v1::Request::Stop = request {
            resource.finished();
            let protocol_state = state.foreign_toplevel_manager_state();
            protocol_state
                .instances
                .retain(|instance| instance != resource);
        }
    }

    fn destroyed(
        state: &mut D,
        _client: ClientId,
        resource: &ZwlrForeignToplevelManagerV1,
        _data: &(),
    ) {
        let protocol_state = state.foreign_toplevel_manager_state();
        protocol_state
            .instances
            .retain(|instance| instance != resource);
    }
}

impl<D> Dispatch<ZwlrForeignToplevelHandleV1, (), D> for ForeignToplevelManagerState<D>
where
    D: Dispatch<ZwlrForeignToplevelHandleV1, ()>,
    D: ForeignToplevelHandler,
    D: 'static,
{
    fn request(
        state: &mut D,
        _client: &Client,
        resource: &ZwlrForeignToplevelHandleV1,
        request: <ZwlrForeignToplevelHandleV1 as Resource>::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
        let toplevel = {
            let protocol_state = state.foreign_toplevel_manager_state();
            let toplevels = protocol_state.toplevels.borrow();
            toplevels
                .iter()
                .find(|toplevel| toplevel.has_instance(resource))
                .cloned()
        };

        // The toplevel may be gone while the client still holds its handle;
        // such requests are inert.
        let Some(toplevel) = toplevel else {
            return;
        };

        match request {
            zwlr_foreign_toplevel_handle_v1::Request::SetMaximized => state.set_maximized(toplevel),
            zwlr_foreign_toplevel_handle_v1::Request::UnsetMaximized => {
                state.unset_maximized(toplevel)
            }
            zwlr_foreign_toplevel_handle_v1::Request::SetMinimized => state.set_minimized(toplevel),
            zwlr_foreign_toplevel_handle_v1::Request::UnsetMinimized => {
                state.unset_minimized(toplevel)
            }
            zwlr_foreign_toplevel_handle_v1::Request::Activate { seat } => {
                if let Some(seat) = Seat::from_resource(&seat) {
                    state.activate(toplevel, seat);
                }
            }
            zwlr_foreign_toplevel_handle_v1::Request::Close => state.close(toplevel),
            zwlr_foreign_toplevel_handle_v1::Request::SetRectangle {
                surface,
                x,
                y,
                width,
                height,
            } => {
                if width < 0 || height < 0 {
                    resource.post_error(
                        zwlr_foreign_toplevel_handle_v1::Error::InvalidRectangle,
                        "invalid rectangle passed to set_rectangle: width/height < 0",
                    );
                    return;
                }
                state.set_rectangle(
                    toplevel,
                    surface,
                    Rectangle::new((x, y).into(), (width, height).into()),
                );
            }
            zwlr_foreign_toplevel_handle_v1::Request::SetFullscreen { output } => {
                let output = output.as_ref().and_then(Output::from_resource);
                state.set_fullscreen(toplevel, output);
            }
            zwlr_foreign_toplevel_handle_v1::Request::UnsetFullscreen => {
                state.unset_fullscreen(toplevel)
            }
            zwlr_foreign_toplevel_handle_v1::Request::Destroy => {}
            _ => {}
        }
    }

    fn destroyed(
        state: &mut D,
        _client: ClientId,
        resource: &ZwlrForeignToplevelHandleV1,
        _data: &(),
    ) {
        let protocol_state = state.foreign_toplevel_manager_state();
        let toplevels = protocol_state.toplevels();
        for toplevel in toplevels {
            toplevel.remove_instance(resource);
        }
    }
}

#[macro_export]
macro_rules! delegate_foreign_toplevel {
    ($(@<$( $lt:tt $( : $clt:tt $(+ $dlt:tt )* )? ),+>)? $ty: ty) => {
        smithay::reexports::wayland_server::delegate_global_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            $crate::protocol::zwlr_foreign_toplevel_manager_v1::ZwlrForeignToplevelManagerV1: $crate::ForeignToplevelGlobalData
        ] => $crate::ForeignToplevelManagerState<$ty>);
        smithay::reexports::wayland_server::delegate_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            $crate::protocol::zwlr_foreign_toplevel_manager_v1::ZwlrForeignToplevelManagerV1: ()
        ] => $crate::ForeignToplevelManagerState<$ty>);
        smithay::reexports::wayland_server::delegate_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            $crate::protocol::zwlr_foreign_toplevel_handle_v1::ZwlrForeignToplevelHandleV1: ()
        ] => $crate::ForeignToplevelManagerState<$ty>);
    };
}
