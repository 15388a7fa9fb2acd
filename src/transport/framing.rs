//! Message boundary recovery for byte-stream transports.

use bytes::{Bytes, BytesMut};

use crate::protocol::{self, frame_len};

const INITIAL_CAPACITY: usize = 4096;

/// Per-connection receive buffer that cuts a byte stream into whole messages.
///
/// Bytes are appended as they arrive; [`StreamAssembler::next_message`]
/// yields each complete message once its declared length is buffered. A
/// buffer that starts with the wrong magic or declares an oversized message is
/// dropped in full, since the stream can no longer be trusted to be in sync.
#[derive(Debug)]
pub(crate) struct StreamAssembler {
    buf: BytesMut,
}

impl StreamAssembler {
    pub(crate) fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }

    pub(crate) fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete message, `Ok(None)` while more bytes are needed.
    pub(crate) fn next_message(&mut self) -> Result<Option<Bytes>, protocol::Error> {
        match frame_len(&self.buf) {
            Ok(Some(total)) => Ok(Some(self.buf.split_to(total).freeze())),
            Ok(None) => Ok(None),
            Err(err) => {
                self.buf.clear();
                Err(err)
            }
        }
    }

    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.buf.len()
    }
}
