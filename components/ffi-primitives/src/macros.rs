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

//! Declarative macros for the typed call adapters and host callback tables.
//!
//! - [`impl_foreign_signature!`]: Instantiate `ForeignSignature` for one arity
//! - [`ffi_callback_table!`]: Generate `#[repr(C)]` tables of host callbacks

/// Implement [`ForeignSignature`](crate::ForeignSignature) for
/// `unsafe extern "C" fn(A1, .., An) -> R`.
///
/// Each argument is given as `binding: TypeParam`; the binding names are only
/// used to destructure the argument tuple.
///
/// ```ignore
/// impl_foreign_signature!(a1: A1, a2: A2);
/// ```
#[macro_export]
macro_rules! impl_foreign_signature {
    ($($arg:ident : $ty:ident),* $(,)?) => {
        impl<R: 'static $(, $ty: 'static)*> $crate::ForeignSignature
            for unsafe extern "C" fn($($ty),*) -> R
        {
            type Args = ($($ty,)*);
            type Output = R;

            fn arity() -> usize {
                let params: &[&str] = &[$(stringify!($ty)),*];
                params.len()
            }

            unsafe fn from_raw(ptr: ::std::ptr::NonNull<::std::ffi::c_void>) -> Self {
                let raw = ptr.as_ptr();
                ::std::mem::transmute_copy::<*mut ::std::ffi::c_void, Self>(&raw)
            }

            #[allow(clippy::unused_unit)]
            unsafe fn invoke(self, args: Self::Args) -> R {
                let ($($arg,)*) = args;
                (self)($($arg),*)
            }
        }
    };
}

/// Generate a `#[repr(C)]` table of host callbacks the foreign side calls
/// back into, with an opaque `ctx` pointer passed as the first argument of
/// every entry.
///
/// Every entry is an `Option` so the foreign side can detect a disabled
/// table by its null function pointers. `Send + Sync` are implemented, and
/// `disabled()` / `is_enabled()` are generated.
///
/// # Example
///
/// ```rust
/// use crt_ffi_primitives::*;
///
/// ffi_callback_table! {
///     /// Callbacks for a byte sink.
///     pub struct SinkTable {
///         fn write(ctx, data: *const u8, len: u64) -> bool,
///         fn flush(ctx),
///     }
/// }
///
/// assert!(!SinkTable::disabled().is_enabled());
/// ```
#[macro_export]
macro_rules! ffi_callback_table {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $(
                $(#[$fn_meta:meta])*
                fn $method:ident ( ctx $(, $param:ident : $param_ty:ty)* ) $(-> $ret:ty)?
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(C)]
        #[derive(Clone, Copy)]
        pub struct $name {
            pub ctx: *mut ::std::ffi::c_void,
            $(
                $(#[$fn_meta])*
                pub $method: ::std::option::Option<
                    unsafe extern "C" fn(
                        ctx: *mut ::std::ffi::c_void
                        $(, $param: $param_ty)*
                    ) $(-> $ret)?,
                >,
            )*
        }

        unsafe impl Send for $name {}
        unsafe impl Sync for $name {}

        impl $name {
            /// A table with a null context and every entry absent.
            pub const fn disabled() -> Self {
                Self {
                    ctx: ::std::ptr::null_mut(),
                    $($method: None,)*
                }
            }

            /// True when the context and every entry are present.
            pub fn is_enabled(&self) -> bool {
                !self.ctx.is_null() $(&& self.$method.is_some())*
            }
        }
    };
}
