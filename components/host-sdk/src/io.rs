// Copyright 2025 The Drasi Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Event loops, bootstraps, resolvers and socket options.
//!
//! Thin owners over engine resources. Each wrapper binds its constructor and
//! destroy entry points on creation and records the resources it was built
//! from as parents of its [`ResourceHandle`].

use std::ffi::c_void;

use crate::binder::ForeignModule;
use crate::error::{BridgeError, Result};
use crate::handle::ResourceHandle;

pub const SYM_EVENT_LOOP_GROUP_NEW: &str = "crt_event_loop_group_new";
pub const SYM_EVENT_LOOP_GROUP_DESTROY: &str = "crt_event_loop_group_destroy";
pub const SYM_CLIENT_BOOTSTRAP_NEW: &str = "crt_client_bootstrap_new";
pub const SYM_CLIENT_BOOTSTRAP_DESTROY: &str = "crt_client_bootstrap_destroy";
pub const SYM_HOST_RESOLVER_NEW: &str = "crt_host_resolver_new_default";
pub const SYM_HOST_RESOLVER_DESTROY: &str = "crt_host_resolver_destroy";
pub const SYM_SOCKET_OPTIONS_NEW: &str = "crt_socket_options_new";
pub const SYM_SOCKET_OPTIONS_DESTROY: &str = "crt_socket_options_destroy";

pub const DEFAULT_MAX_HOSTS: i32 = 64;

pub(crate) type RawDestroyFn = unsafe extern "C" fn(*mut c_void);
type ElgNewFn = unsafe extern "C" fn(i32) -> *mut c_void;
type BootstrapNewFn = unsafe extern "C" fn(*mut c_void) -> *mut c_void;
type ResolverNewFn = unsafe extern "C" fn(*mut c_void, i32) -> *mut c_void;
type SocketOptionsNewFn = unsafe extern "C" fn() -> *mut c_void;

/// Bind `name` as a destroy operation for a [`ResourceHandle`].
pub(crate) fn bound_destroy(
    module: &ForeignModule,
    name: &str,
) -> Result<impl FnOnce(*mut c_void) -> Result<()> + Send + Sync + 'static> {
    // SAFETY: every destroy export takes the resource pointer and returns nothing.
    let destroy = unsafe { module.bind::<RawDestroyFn>(name)? };
    // SAFETY: a handle runs its destroy once, with the pointer it was built from.
    Ok(move |ptr: *mut c_void| unsafe { destroy.call((ptr,)) })
}

/// Pool of engine event-loop threads.
#[derive(Debug)]
pub struct EventLoopGroup {
    handle: ResourceHandle,
}

impl EventLoopGroup {
    pub fn new(module: &ForeignModule, threads: i32) -> Result<Self> {
        if threads < 0 {
            return Err(BridgeError::invalid_argument(format!(
                "event loop thread count must not be negative, got {threads}"
            )));
        }
        let create = unsafe { module.bind::<ElgNewFn>(SYM_EVENT_LOOP_GROUP_NEW)? };
        let destroy = bound_destroy(module, SYM_EVENT_LOOP_GROUP_DESTROY)?;
        let ptr = unsafe { create.call((threads,))? };
        Ok(Self {
            handle: ResourceHandle::new("event loop group", ptr, destroy)?,
        })
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    pub fn release(&self) -> Result<()> {
        self.handle.release()
    }
}

/// Connection factory bound to an [`EventLoopGroup`].
#[derive(Debug)]
pub struct ClientBootstrap {
    handle: ResourceHandle,
}

impl ClientBootstrap {
    pub fn new(module: &ForeignModule, event_loop_group: &EventLoopGroup) -> Result<Self> {
        let create = unsafe { module.bind::<BootstrapNewFn>(SYM_CLIENT_BOOTSTRAP_NEW)? };
        let destroy = bound_destroy(module, SYM_CLIENT_BOOTSTRAP_DESTROY)?;
        let elg = event_loop_group.handle();
        // SAFETY: `with_raw` holds the group live for the call.
        let ptr = elg.with_raw(|elg| unsafe { create.call((elg,)) })??;
        Ok(Self {
            handle: ResourceHandle::with_parents("client bootstrap", ptr, destroy, &[elg])?,
        })
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    pub fn release(&self) -> Result<()> {
        self.handle.release()
    }
}

/// Caching DNS resolver running on an [`EventLoopGroup`].
#[derive(Debug)]
pub struct DefaultHostResolver {
    handle: ResourceHandle,
}

impl DefaultHostResolver {
    pub fn new(
        module: &ForeignModule,
        event_loop_group: &EventLoopGroup,
        max_hosts: i32,
    ) -> Result<Self> {
        if max_hosts <= 0 {
            return Err(BridgeError::invalid_argument(format!(
                "max_hosts must be positive, got {max_hosts}"
            )));
        }
        let create = unsafe { module.bind::<ResolverNewFn>(SYM_HOST_RESOLVER_NEW)? };
        let destroy = bound_destroy(module, SYM_HOST_RESOLVER_DESTROY)?;
        let elg = event_loop_group.handle();
        let ptr = elg.with_raw(|elg| unsafe { create.call((elg, max_hosts)) })??;
        Ok(Self {
            handle: ResourceHandle::with_parents("host resolver", ptr, destroy, &[elg])?,
        })
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    pub fn release(&self) -> Result<()> {
        self.handle.release()
    }
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketDomain {
    IPv4 = 0,
    IPv6 = 1,
    Local = 2,
}

impl TryFrom<i32> for SocketDomain {
    type Error = BridgeError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(SocketDomain::IPv4),
            1 => Ok(SocketDomain::IPv6),
            2 => Ok(SocketDomain::Local),
            other => Err(BridgeError::invalid_argument(format!(
                "unknown socket domain {other}"
            ))),
        }
    }
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    Stream = 0,
    Dgram = 1,
}

impl TryFrom<i32> for SocketType {
    type Error = BridgeError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(SocketType::Stream),
            1 => Ok(SocketType::Dgram),
            other => Err(BridgeError::invalid_argument(format!(
                "unknown socket type {other}"
            ))),
        }
    }
}

/// Engine-side layout of socket options.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FfiSocketOptions {
    pub socket_type: i32,
    pub domain: i32,
    pub connect_timeout_ms: u32,
    pub keep_alive_interval_sec: u16,
    pub keep_alive_timeout_sec: u16,
    pub keepalive: bool,
}

/// Socket options owned by the engine. Accessors read and write the engine's
/// copy directly.
#[derive(Debug)]
pub struct SocketOptions {
    handle: ResourceHandle,
}

impl SocketOptions {
    pub fn new(module: &ForeignModule) -> Result<Self> {
        let create = unsafe { module.bind::<SocketOptionsNewFn>(SYM_SOCKET_OPTIONS_NEW)? };
        let destroy = bound_destroy(module, SYM_SOCKET_OPTIONS_DESTROY)?;
        let ptr = unsafe { create.call(())? };
        Ok(Self {
            handle: ResourceHandle::new("socket options", ptr, destroy)?,
        })
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    pub fn release(&self) -> Result<()> {
        self.handle.release()
    }

    /// Copy of the current options.
    pub fn get(&self) -> Result<FfiSocketOptions> {
        // SAFETY: the engine allocates an FfiSocketOptions for this handle.
        self.handle
            .with_raw(|ptr| unsafe { *(ptr as *const FfiSocketOptions) })
    }

    /// Modify the options in place.
    pub fn update<R>(&self, f: impl FnOnce(&mut FfiSocketOptions) -> R) -> Result<R> {
        // SAFETY: as in `get`; the handle's read lock keeps the pointer live.
        self.handle
            .with_raw(|ptr| f(unsafe { &mut *(ptr as *mut FfiSocketOptions) }))
    }

    pub fn domain(&self) -> Result<SocketDomain> {
        SocketDomain::try_from(self.get()?.domain)
    }

    pub fn set_domain(&self, domain: SocketDomain) -> Result<()> {
        self.update(|o| o.domain = domain as i32)
    }

    pub fn socket_type(&self) -> Result<SocketType> {
        SocketType::try_from(self.get()?.socket_type)
    }

    pub fn set_socket_type(&self, socket_type: SocketType) -> Result<()> {
        self.update(|o| o.socket_type = socket_type as i32)
    }

    pub fn connect_timeout_ms(&self) -> Result<u32> {
        Ok(self.get()?.connect_timeout_ms)
    }

    pub fn set_connect_timeout_ms(&self, timeout_ms: u32) -> Result<()> {
        self.update(|o| o.connect_timeout_ms = timeout_ms)
    }

    pub fn keep_alive(&self) -> Result<bool> {
        Ok(self.get()?.keepalive)
    }

    /// Enable TCP keep-alive with the given interval and timeout, in seconds.
    pub fn set_keep_alive(&self, interval_sec: u16, timeout_sec: u16) -> Result<()> {
        self.update(|o| {
            o.keepalive = true;
            o.keep_alive_interval_sec = interval_sec;
            o.keep_alive_timeout_sec = timeout_sec;
        })
    }

    pub fn disable_keep_alive(&self) -> Result<()> {
        self.update(|o| o.keepalive = false)
    }
}
