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

//! Pull-based body streaming for the foreign engine.
//!
//! The engine drains a request body through a [`FfiStreamFunctionTable`] of
//! `read` / `seek` callbacks. [`StreamBridge`] backs that table with a
//! [`ByteSource`] and tracks position against the known length, so the engine
//! can rewind and read the same body more than once (digest, then send).
//! A bridge without a body hands out [`FfiStreamFunctionTable::disabled`].

use std::ffi::c_void;
use std::fmt;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex, MutexGuard};

use crt_ffi_primitives::{catch_panic_ffi, ffi_callback_table};

use crate::error::{BridgeError, Result};

/// Read progress reported back to the engine.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    InProgress = 0,
    Done = 1,
}

/// Seek origin. Values match the engine's numbering; relative seeks are not
/// part of the protocol.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekBasis {
    Begin = 0,
    End = 2,
}

impl TryFrom<i32> for SeekBasis {
    type Error = BridgeError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(SeekBasis::Begin),
            2 => Ok(SeekBasis::End),
            other => Err(BridgeError::invalid_argument(format!(
                "unsupported seek basis {other}"
            ))),
        }
    }
}

ffi_callback_table! {
    /// Body stream callbacks handed to the engine.
    pub struct FfiStreamFunctionTable {
        /// Fill up to `capacity` bytes; returns a [`StreamState`] value.
        fn read(ctx, buffer: *mut u8, capacity: u64, bytes_written: *mut u64) -> i32,
        /// Reposition; `basis` is a [`SeekBasis`] value.
        fn seek(ctx, offset: i64, basis: i32) -> bool,
    }
}

/// A body of known length.
pub trait ByteSource: Send {
    /// Total length in bytes.
    fn length(&self) -> u64;

    /// Current read position.
    fn position(&self) -> u64;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn can_seek(&self) -> bool {
        false
    }

    fn seek_to(&mut self, _position: u64) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "source is not seekable",
        ))
    }
}

/// [`ByteSource`] over any `Read + Seek`.
pub struct SeekableSource<R> {
    inner: R,
    length: u64,
    position: u64,
}

impl<R: Read + Seek + Send> SeekableSource<R> {
    /// Measure `inner` and keep its current position.
    pub fn new(mut inner: R) -> io::Result<Self> {
        let position = inner.stream_position()?;
        let length = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(position))?;
        Ok(Self {
            inner,
            length,
            position,
        })
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl SeekableSource<Cursor<Vec<u8>>> {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        Self {
            length: bytes.len() as u64,
            position: 0,
            inner: Cursor::new(bytes),
        }
    }
}

impl<R: Read + Seek + Send> ByteSource for SeekableSource<R> {
    fn length(&self) -> u64 {
        self.length
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn seek_to(&mut self, position: u64) -> io::Result<()> {
        self.position = self.inner.seek(SeekFrom::Start(position))?;
        Ok(())
    }
}

/// [`ByteSource`] over a plain reader. Cannot be replayed.
pub struct ForwardOnlySource<R> {
    inner: R,
    length: u64,
    position: u64,
}

impl<R: Read + Send> ForwardOnlySource<R> {
    pub fn new(inner: R, length: u64) -> Self {
        Self {
            inner,
            length,
            position: 0,
        }
    }
}

impl<R: Read + Send> ByteSource for ForwardOnlySource<R> {
    fn length(&self) -> u64 {
        self.length
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

/// Cloneable handle to one [`ByteSource`]. Clones read and seek the same
/// underlying body.
#[derive(Clone)]
pub struct SharedSource {
    inner: Arc<Mutex<Box<dyn ByteSource>>>,
}

impl SharedSource {
    pub fn new(source: impl ByteSource + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(source))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn ByteSource>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for SharedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = self.lock();
        f.debug_struct("SharedSource")
            .field("position", &source.position())
            .field("length", &source.length())
            .finish()
    }
}

impl ByteSource for SharedSource {
    fn length(&self) -> u64 {
        self.lock().length()
    }

    fn position(&self) -> u64 {
        self.lock().position()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.lock().read(buf)
    }

    fn can_seek(&self) -> bool {
        self.lock().can_seek()
    }

    fn seek_to(&mut self, position: u64) -> io::Result<()> {
        self.lock().seek_to(position)
    }
}

struct StreamSession {
    source: Box<dyn ByteSource>,
    position: u64,
    length: u64,
    error: Option<String>,
}

impl StreamSession {
    fn new(source: Box<dyn ByteSource>) -> Self {
        Self {
            position: source.position(),
            length: source.length(),
            source,
            error: None,
        }
    }

    fn read_into(&mut self, buf: &mut [u8]) -> (usize, StreamState) {
        let mut written = 0;
        while written < buf.len() && self.position < self.length {
            let remaining = (self.length - self.position).min((buf.len() - written) as u64);
            match self.source.read(&mut buf[written..written + remaining as usize]) {
                Ok(0) => {
                    log::warn!(
                        "Body ended at {} of {} declared bytes",
                        self.position,
                        self.length
                    );
                    self.length = self.position;
                }
                Ok(n) => {
                    written += n;
                    self.position += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    log::error!("Reading body failed at {}: {e}", self.position);
                    self.error = Some(e.to_string());
                    return (written, StreamState::Done);
                }
            }
        }

        let state = if self.position == self.length {
            StreamState::Done
        } else {
            StreamState::InProgress
        };
        (written, state)
    }

    fn seek(&mut self, offset: i64, basis: SeekBasis) -> bool {
        if !self.source.can_seek() {
            return false;
        }
        let base = match basis {
            SeekBasis::Begin => 0i128,
            SeekBasis::End => self.length as i128,
        };
        let target = base + offset as i128;
        if target < 0 || target > self.length as i128 {
            log::debug!("Rejecting seek to {target} in a {}-byte body", self.length);
            return false;
        }

        let target = target as u64;
        match self.source.seek_to(target) {
            Ok(()) => {
                self.position = target;
                true
            }
            Err(e) => {
                log::error!("Seeking body to {target} failed: {e}");
                false
            }
        }
    }
}

/// Owner of one body transfer. Must outlive every foreign use of the table it
/// hands out.
pub struct StreamBridge {
    session: Option<Box<Mutex<StreamSession>>>,
}

impl StreamBridge {
    pub fn new(source: Option<Box<dyn ByteSource>>) -> Self {
        Self {
            session: source.map(|s| Box::new(Mutex::new(StreamSession::new(s)))),
        }
    }

    pub fn empty() -> Self {
        Self { session: None }
    }

    pub fn has_body(&self) -> bool {
        self.session.is_some()
    }

    pub fn can_seek(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| lock(s).source.can_seek())
            .unwrap_or(false)
    }

    /// Move the body back to offset 0.
    pub fn rewind(&self) -> Result<()> {
        let Some(session) = &self.session else {
            return Ok(());
        };
        if lock(session).seek(0, SeekBasis::Begin) {
            Ok(())
        } else {
            Err(BridgeError::BodyNotSeekable)
        }
    }

    pub fn function_table(&self) -> FfiStreamFunctionTable {
        match &self.session {
            Some(session) => FfiStreamFunctionTable {
                ctx: &**session as *const Mutex<StreamSession> as *mut c_void,
                read: Some(stream_read),
                seek: Some(stream_seek),
            },
            None => FfiStreamFunctionTable::disabled(),
        }
    }

    /// The first I/O failure seen while the engine was reading, if any.
    pub fn take_error(&self) -> Option<BridgeError> {
        let session = self.session.as_ref()?;
        lock(session)
            .error
            .take()
            .map(|message| BridgeError::BodyStream { message })
    }

    pub fn into_source(self) -> Option<Box<dyn ByteSource>> {
        self.session.map(|s| {
            s.into_inner()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .source
        })
    }
}

impl fmt::Debug for StreamBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("StreamBridge");
        if let Some(session) = &self.session {
            let s = lock(session);
            d.field("position", &s.position).field("length", &s.length);
        }
        d.finish()
    }
}

fn lock(session: &Mutex<StreamSession>) -> MutexGuard<'_, StreamSession> {
    session
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

unsafe extern "C" fn stream_read(
    ctx: *mut c_void,
    buffer: *mut u8,
    capacity: u64,
    bytes_written: *mut u64,
) -> i32 {
    let outcome = catch_panic_ffi(|| {
        // SAFETY: ctx came from StreamBridge::function_table and the bridge
        // outlives the transfer; buffer is valid for `capacity` bytes.
        let session = unsafe { &*(ctx as *const Mutex<StreamSession>) };
        let capacity = usize::try_from(capacity).unwrap_or(usize::MAX);
        if buffer.is_null() || capacity == 0 {
            let s = lock(session);
            let state = if s.position == s.length {
                StreamState::Done
            } else {
                StreamState::InProgress
            };
            return (0, state);
        }
        let buf = unsafe { std::slice::from_raw_parts_mut(buffer, capacity) };
        lock(session).read_into(buf)
    });

    let (written, state) = match outcome {
        Ok(result) => result,
        Err(panic) => {
            log::error!("Panic in body read callback: {panic}");
            (0, StreamState::Done)
        }
    };
    if !bytes_written.is_null() {
        unsafe { *bytes_written = written as u64 };
    }
    state as i32
}

unsafe extern "C" fn stream_seek(ctx: *mut c_void, offset: i64, basis: i32) -> bool {
    let outcome = catch_panic_ffi(|| {
        let basis = match SeekBasis::try_from(basis) {
            Ok(basis) => basis,
            Err(e) => {
                log::warn!("Body seek rejected: {e}");
                return false;
            }
        };
        // SAFETY: see stream_read.
        let session = unsafe { &*(ctx as *const Mutex<StreamSession>) };
        lock(session).seek(offset, basis)
    });
    outcome.unwrap_or_else(|panic| {
        log::error!("Panic in body seek callback: {panic}");
        false
    })
}
