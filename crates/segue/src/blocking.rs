//! Synchronous adapter for consumers that expect `std::io::Read`.
//!
//! Each call blocks the current thread on the given runtime handle, so it must
//! not be used from inside an async context.

use std::io;

use tokio::runtime::Handle;
use url::Url;

use crate::{SegueError, SequentialReader, SessionHints};

pub struct BlockingReader<R> {
    handle: Handle,
    inner: R,
}

impl<R: SequentialReader> BlockingReader<R> {
    pub fn new(handle: Handle, inner: R) -> Self {
        Self { handle, inner }
    }

    pub fn open(&mut self, locator: Url, hints: SessionHints) -> Result<Option<u64>, SegueError> {
        self.handle.block_on(self.inner.open(locator, hints))
    }

    pub fn close(&mut self) {
        self.handle.block_on(self.inner.close());
    }

    pub fn active_uri(&self) -> Option<Url> {
        self.inner.active_uri()
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: SequentialReader> io::Read for BlockingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.handle
            .block_on(self.inner.read(buf))
            .map_err(io::Error::other)
    }
}
