use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use smithay::output::Output;
use smithay::reexports::calloop::LoopHandle;
use smithay::reexports::wayland_server::protocol::wl_output::WlOutput;
use smithay::reexports::wayland_server::{Client, Dispatch, DisplayHandle, Resource};

use crate::protocol::zwlr_foreign_toplevel_handle_v1::{self, ZwlrForeignToplevelHandleV1};
use crate::protocol::zwlr_foreign_toplevel_manager_v1::ZwlrForeignToplevelManagerV1;

bitflags::bitflags! {
    /// State of a toplevel, mirrored to clients as an ordered array of
    /// zwlr_foreign_toplevel_handle_v1 state tokens.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ToplevelState: u32 {
        const MAXIMIZED = 1 << 0;
        const MINIMIZED = 1 << 1;
        const ACTIVATED = 1 << 2;
        const FULLSCREEN = 1 << 3;
    }
}

/// D-Bus properties a toplevel announces through gtk_shell1.
///
/// The group is present as a unit: setting it with every field `None`
/// clears it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GtkShell1Properties {
    pub application_id: Option<String>,
    pub app_menu_path: Option<String>,
    pub menubar_path: Option<String>,
    pub window_object_path: Option<String>,
    pub application_object_path: Option<String>,
    pub unique_bus_name: Option<String>,
}

impl GtkShell1Properties {
    fn is_unset(&self) -> bool {
        self.application_id.is_none()
            && self.app_menu_path.is_none()
            && self.menubar_path.is_none()
            && self.window_object_path.is_none()
            && self.application_object_path.is_none()
            && self.unique_bus_name.is_none()
    }
}

/// D-Bus application menu a toplevel announces through org_kde_kwin_appmenu.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KdeAppMenu {
    pub service_name: Option<String>,
    pub object_path: Option<String>,
}

impl KdeAppMenu {
    fn is_unset(&self) -> bool {
        self.service_name.is_none() && self.object_path.is_none()
    }
}

/// One toplevel as exposed to foreign-toplevel clients.
///
/// The compositor owns the handle and is the only writer; every setter is a
/// no-op when the value does not change, and otherwise broadcasts the
/// corresponding event to each client's handle before scheduling one done
/// event for the whole batch at the next idle point of the event loop.
pub struct ForeignToplevelHandle<D> {
    pub(crate) inner: Rc<RefCell<HandleInner<D>>>,
}

pub(crate) struct HandleInner<D> {
    loop_handle: LoopHandle<'static, D>,
    registry: Weak<RefCell<Vec<ForeignToplevelHandle<D>>>>,
    instances: Vec<ZwlrForeignToplevelHandleV1>,
    title: Option<String>,
    app_id: Option<String>,
    state: ToplevelState,
    gtk_shell1: Option<GtkShell1Properties>,
    kde_appmenu: Option<KdeAppMenu>,
    parent: Option<Weak<RefCell<HandleInner<D>>>>,
    outputs: Vec<Output>,
    pending_done: bool,
    closed: bool,
}

impl<D: 'static> ForeignToplevelHandle<D> {
    pub(crate) fn new(
        loop_handle: LoopHandle<'static, D>,
        registry: Weak<RefCell<Vec<ForeignToplevelHandle<D>>>>,
    ) -> Self {
        Self {
            inner: Rc::new(RefCell::new(HandleInner {
                loop_handle,
                registry,
                instances: Vec::new(),
                title: None,
                app_id: None,
                state: ToplevelState::empty(),
                gtk_shell1: None,
                kde_appmenu: None,
                parent: None,
                outputs: Vec::new(),
                pending_done: false,
                closed: false,
            })),
        }
    }

    pub fn title(&self) -> Option<String> {
        self.inner.borrow().title.clone()
    }

    pub fn app_id(&self) -> Option<String> {
        self.inner.borrow().app_id.clone()
    }

    pub fn state(&self) -> ToplevelState {
        self.inner.borrow().state
    }

    pub fn parent(&self) -> Option<ForeignToplevelHandle<D>> {
        self.inner
            .borrow()
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| ForeignToplevelHandle { inner })
    }

    pub fn outputs(&self) -> Vec<Output> {
        self.inner.borrow().outputs.clone()
    }

    pub fn set_title(&self, title: &str) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.title.as_deref() == Some(title) {
                return;
            }
            inner.title = Some(title.to_owned());
            for resource in &inner.instances {
                resource.title(title.to_owned());
            }
        }
        self.schedule_done();
    }

    pub fn set_app_id(&self, app_id: &str) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.app_id.as_deref() == Some(app_id) {
                return;
            }
            inner.app_id = Some(app_id.to_owned());
            for resource in &inner.instances {
                resource.app_id(app_id.to_owned());
            }
        }
        self.schedule_done();
    }

    pub fn set_maximized(&self, maximized: bool) {
        self.set_state_flag(ToplevelState::MAXIMIZED, maximized);
    }

    pub fn set_minimized(&self, minimized: bool) {
        self.set_state_flag(ToplevelState::MINIMIZED, minimized);
    }

    pub fn set_activated(&self, activated: bool) {
        self.set_state_flag(ToplevelState::ACTIVATED, activated);
    }

    pub fn set_fullscreen(&self, fullscreen: bool) {
        self.set_state_flag(ToplevelState::FULLSCREEN, fullscreen);
    }

    fn set_state_flag(&self, flag: ToplevelState, value: bool) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.state.contains(flag) == value {
                return;
            }
            inner.state.set(flag, value);
            // Always the full state, so a client can reconstruct it from the
            // latest event alone.
            let encoded = encode_state(inner.state);
            for resource in &inner.instances {
                resource.state(encoded.clone());
            }
        }
        self.schedule_done();
    }

    pub fn set_gtk_shell1_dbus_properties(&self, properties: GtkShell1Properties) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.gtk_shell1.is_none() && properties.is_unset() {
                return;
            }
            inner.gtk_shell1 = (!properties.is_unset()).then_some(properties);
            for resource in &inner.instances {
                if resource.version()
                    >= zwlr_foreign_toplevel_handle_v1::EVT_GTK_SHELL1_SURFACE_DBUS_PROPERTIES_SINCE
                {
                    send_gtk_shell1(resource, inner.gtk_shell1.as_ref());
                }
            }
        }
        self.schedule_done();
    }

    pub fn set_kde_application_menu(&self, menu: KdeAppMenu) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.kde_appmenu.is_none() && menu.is_unset() {
                return;
            }
            inner.kde_appmenu = (!menu.is_unset()).then_some(menu);
            for resource in &inner.instances {
                if resource.version()
                    >= zwlr_foreign_toplevel_handle_v1::EVT_KDE_APPLICATION_MENU_SINCE
                {
                    send_kde_application_menu(resource, inner.kde_appmenu.as_ref());
                }
            }
        }
        self.schedule_done();
    }

    pub fn set_parent(&self, parent: Option<&ForeignToplevelHandle<D>>) {
        if let Some(parent) = parent
            && Rc::ptr_eq(&self.inner, &parent.inner)
        {
            tracing::warn!("ignoring request to make a toplevel its own parent");
            return;
        }

        {
            let mut inner = self.inner.borrow_mut();
            let unchanged = match (&inner.parent, parent) {
                (None, None) => true,
                (Some(current), Some(new)) => current.as_ptr() == Rc::as_ptr(&new.inner),
                _ => false,
            };
            if unchanged {
                return;
            }
            inner.parent = parent.map(|parent| Rc::downgrade(&parent.inner));
            for resource in &inner.instances {
                send_parent_to(resource, parent.map(|parent| &parent.inner));
            }
        }
        self.schedule_done();
    }

    /// The toplevel is now visible on `output`. A no-op if it already was.
    pub fn output_enter(&self, output: &Output) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.outputs.iter().any(|member| member == output) {
                return;
            }
            inner.outputs.push(output.clone());
            for resource in &inner.instances {
                send_output_to_resource(resource, output, true);
            }
        }
        self.schedule_done();
    }

    /// The toplevel is no longer visible on `output`.
    pub fn output_leave(&self, output: &Output) {
        {
            let mut inner = self.inner.borrow_mut();
            let Some(index) = inner.outputs.iter().position(|member| member == output) else {
                tracing::warn!(
                    output = %output.name(),
                    "output_leave for an output the toplevel never entered"
                );
                return;
            };
            for resource in &inner.instances {
                send_output_to_resource(resource, output, false);
            }
            inner.outputs.remove(index);
        }
        self.schedule_done();
    }

    /// Send closed to every client and unlink the toplevel.
    ///
    /// Any toplevel that had this one as its parent has its link severed
    /// first, so no later bind can announce a dangling parent. A pending
    /// done flush is cancelled.
    pub fn destroy(&self) {
        let registry = {
            let mut inner = self.inner.borrow_mut();
            if inner.closed {
                tracing::warn!("foreign toplevel handle destroyed twice");
                return;
            }
            inner.closed = true;
            for resource in &inner.instances {
                resource.closed();
            }
            inner.instances.clear();
            inner.outputs.clear();
            inner.parent = None;
            inner.registry.upgrade()
        };

        let Some(registry) = registry else {
            return;
        };
        registry
            .borrow_mut()
            .retain(|candidate| !Rc::ptr_eq(&candidate.inner, &self.inner));

        let survivors: Vec<ForeignToplevelHandle<D>> = registry.borrow().iter().cloned().collect();
        for toplevel in survivors {
            let is_child = toplevel
                .inner
                .borrow()
                .parent
                .as_ref()
                .is_some_and(|parent| parent.as_ptr() == Rc::as_ptr(&self.inner));
            if is_child {
                toplevel.set_parent(None);
            }
        }
    }

    /// Create this toplevel's handle for one bound manager and announce it.
    /// Properties are not sent here; binds follow up with
    /// [`Self::send_details`], creations with the setters.
    pub(crate) fn add_instance(
        &self,
        display: &DisplayHandle,
        client: &Client,
        manager: &ZwlrForeignToplevelManagerV1,
    ) -> Option<ZwlrForeignToplevelHandleV1>
    where
        D: Dispatch<ZwlrForeignToplevelHandleV1, ()> + 'static,
    {
        let Ok(resource) = client.create_resource::<ZwlrForeignToplevelHandleV1, _, D>(
            display,
            manager.version(),
            (),
        ) else {
            // client already disconnected
            return None;
        };
        manager.toplevel(&resource);
        self.inner.borrow_mut().instances.push(resource.clone());
        Some(resource)
    }

    pub(crate) fn send_details(&self, resource: &ZwlrForeignToplevelHandleV1) {
        let inner = self.inner.borrow();
        if let Some(title) = &inner.title {
            resource.title(title.clone());
        }
        if let Some(app_id) = &inner.app_id {
            resource.app_id(app_id.clone());
        }
        if inner.gtk_shell1.is_some()
            && resource.version()
                >= zwlr_foreign_toplevel_handle_v1::EVT_GTK_SHELL1_SURFACE_DBUS_PROPERTIES_SINCE
        {
            send_gtk_shell1(resource, inner.gtk_shell1.as_ref());
        }
        if inner.kde_appmenu.is_some()
            && resource.version() >= zwlr_foreign_toplevel_handle_v1::EVT_KDE_APPLICATION_MENU_SINCE
        {
            send_kde_application_menu(resource, inner.kde_appmenu.as_ref());
        }
        for output in &inner.outputs {
            send_output_to_resource(resource, output, true);
        }
        resource.state(encode_state(inner.state));
        send_parent_to(resource, inner.parent.as_ref().and_then(Weak::upgrade).as_ref());
        resource.done();
    }

    pub(crate) fn has_instance(&self, resource: &ZwlrForeignToplevelHandleV1) -> bool {
        self.inner
            .borrow()
            .instances
            .iter()
            .any(|candidate| candidate == resource)
    }

    pub(crate) fn remove_instance(&self, resource: &ZwlrForeignToplevelHandleV1) {
        self.inner
            .borrow_mut()
            .instances
            .retain(|candidate| candidate != resource);
    }

    /// `client` just bound `wl_output`; re-announce the membership that
    /// predates the binding.
    pub(crate) fn output_bound(&self, client: &Client, output: &Output, wl_output: &WlOutput) {
        {
            let inner = self.inner.borrow();
            if !inner.outputs.iter().any(|member| member == output) {
                return;
            }
            for resource in &inner.instances {
                if resource.client().as_ref() == Some(client) {
                    resource.output_enter(wl_output);
                }
            }
        }
        self.schedule_done();
    }

    pub(crate) fn output_destroyed(&self, output: &Output) {
        let is_member = self
            .inner
            .borrow()
            .outputs
            .iter()
            .any(|member| member == output);
        if is_member {
            self.output_leave(output);
        }
    }

    /// Schedule one done event for the current batch of changes, sent once
    /// the event loop goes idle. Further changes before the flush runs do
    /// not schedule a second one.
    fn schedule_done(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.pending_done || inner.closed {
            return;
        }
        inner.pending_done = true;

        let weak = Rc::downgrade(&self.inner);
        let _ = inner.loop_handle.insert_idle(move |_| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut inner = inner.borrow_mut();
            inner.pending_done = false;
            if inner.closed {
                return;
            }
            for resource in &inner.instances {
                resource.done();
            }
        });
    }
}

impl<D> Clone for ForeignToplevelHandle<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D> PartialEq for ForeignToplevelHandle<D> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<D> Eq for ForeignToplevelHandle<D> {}

impl<D> fmt::Debug for ForeignToplevelHandle<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ForeignToplevelHandle")
            .field("title", &inner.title)
            .field("app_id", &inner.app_id)
            .field("state", &inner.state)
            .finish_non_exhaustive()
    }
}

fn encode_state(state: ToplevelState) -> Vec<u8> {
    use zwlr_foreign_toplevel_handle_v1::State;

    let mut tokens: Vec<u32> = Vec::with_capacity(4);
    if state.contains(ToplevelState::MAXIMIZED) {
        tokens.push(State::Maximized as u32);
    }
    if state.contains(ToplevelState::MINIMIZED) {
        tokens.push(State::Minimized as u32);
    }
    if state.contains(ToplevelState::ACTIVATED) {
        tokens.push(State::Activated as u32);
    }
    if state.contains(ToplevelState::FULLSCREEN) {
        tokens.push(State::Fullscreen as u32);
    }
    tokens.iter().flat_map(|token| token.to_ne_bytes()).collect()
}

fn send_output_to_resource(resource: &ZwlrForeignToplevelHandleV1, output: &Output, enter: bool) {
    let Some(client) = resource.client() else {
        return;
    };
    for wl_output in output.client_outputs(&client) {
        if enter {
            resource.output_enter(&wl_output);
        } else {
            resource.output_leave(&wl_output);
        }
    }
}

fn send_parent_to<D>(
    resource: &ZwlrForeignToplevelHandleV1,
    parent: Option<&Rc<RefCell<HandleInner<D>>>>,
) {
    if resource.version() < zwlr_foreign_toplevel_handle_v1::EVT_PARENT_SINCE {
        return;
    }
    match parent {
        None => resource.parent(None),
        Some(parent) => {
            let Some(client) = resource.client() else {
                return;
            };
            let parent = parent.borrow();
            if let Some(parent_resource) = parent
                .instances
                .iter()
                .find(|candidate| candidate.client().as_ref() == Some(&client))
            {
                resource.parent(Some(parent_resource));
            }
            // The client destroyed its handle for the parent: suppress the
            // event rather than name an object the client no longer has.
        }
    }
}

fn send_gtk_shell1(resource: &ZwlrForeignToplevelHandleV1, properties: Option<&GtkShell1Properties>) {
    let properties = properties.cloned().unwrap_or_default();
    resource.gtk_shell1_surface_dbus_properties(
        properties.application_id,
        properties.app_menu_path,
        properties.menubar_path,
        properties.window_object_path,
        properties.application_object_path,
        properties.unique_bus_name,
    );
}

fn send_kde_application_menu(resource: &ZwlrForeignToplevelHandleV1, menu: Option<&KdeAppMenu>) {
    let menu = menu.cloned().unwrap_or_default();
    resource.kde_application_menu(menu.service_name, menu.object_path);
}
