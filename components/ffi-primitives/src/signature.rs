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

//! Typed adapters over raw foreign function pointers.
//!
//! Foreign entry points are resolved by name into untyped addresses. A
//! [`ForeignSignature`] is the fixed-arity function pointer type an address is
//! reinterpreted as; the supported set is closed (arities 0 through 12) and
//! instantiated by [`impl_foreign_signature!`](crate::impl_foreign_signature).

use std::ffi::c_void;
use std::ptr::NonNull;

/// A fixed foreign calling signature, `unsafe extern "C" fn(A1, .., An) -> R`.
///
/// Arguments are passed as a tuple in declaration order.
pub trait ForeignSignature: Copy + Send + Sync + 'static {
    /// Argument tuple, left to right.
    type Args;
    /// Raw return type (`()` for void functions).
    type Output;

    /// Number of parameters.
    fn arity() -> usize;

    /// Reinterpret a resolved symbol address as this signature.
    ///
    /// # Safety
    /// `ptr` must be the address of a foreign function whose real signature
    /// and calling convention are exactly `Self`.
    unsafe fn from_raw(ptr: NonNull<c_void>) -> Self;

    /// Call the function with `args`.
    ///
    /// # Safety
    /// The arguments must satisfy whatever contract the foreign function
    /// places on them (pointer validity, lifetimes of borrowed text).
    unsafe fn invoke(self, args: Self::Args) -> Self::Output;
}

crate::impl_foreign_signature!();
crate::impl_foreign_signature!(a1: A1);
crate::impl_foreign_signature!(a1: A1, a2: A2);
crate::impl_foreign_signature!(a1: A1, a2: A2, a3: A3);
crate::impl_foreign_signature!(a1: A1, a2: A2, a3: A3, a4: A4);
crate::impl_foreign_signature!(a1: A1, a2: A2, a3: A3, a4: A4, a5: A5);
crate::impl_foreign_signature!(a1: A1, a2: A2, a3: A3, a4: A4, a5: A5, a6: A6);
crate::impl_foreign_signature!(a1: A1, a2: A2, a3: A3, a4: A4, a5: A5, a6: A6, a7: A7);
crate::impl_foreign_signature!(a1: A1, a2: A2, a3: A3, a4: A4, a5: A5, a6: A6, a7: A7, a8: A8);
crate::impl_foreign_signature!(
    a1: A1, a2: A2, a3: A3, a4: A4, a5: A5, a6: A6, a7: A7, a8: A8, a9: A9
);
crate::impl_foreign_signature!(
    a1: A1, a2: A2, a3: A3, a4: A4, a5: A5, a6: A6, a7: A7, a8: A8, a9: A9, a10: A10
);
crate::impl_foreign_signature!(
    a1: A1, a2: A2, a3: A3, a4: A4, a5: A5, a6: A6, a7: A7, a8: A8, a9: A9, a10: A10,
    a11: A11
);
crate::impl_foreign_signature!(
    a1: A1, a2: A2, a3: A3, a4: A4, a5: A5, a6: A6, a7: A7, a8: A8, a9: A9, a10: A10,
    a11: A11, a12: A12
);
