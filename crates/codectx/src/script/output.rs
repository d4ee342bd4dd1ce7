//! Console output channel with scoped capture.
//!
//! Script `print` calls write to an [`OutputChannel`]. Outside of a capture
//! scope each line is forwarded to `tracing`; inside one it is buffered. A
//! [`CaptureGuard`] releases the capture when dropped, so every exit path of
//! an execution restores the channel.

use crate::error::ContextError;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::info;

#[derive(Clone, Default)]
pub struct OutputChannel {
    buffer: Rc<RefCell<Option<String>>>,
}

impl OutputChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_line(&self, line: &str) {
        match &mut *self.buffer.borrow_mut() {
            Some(buffer) => {
                buffer.push_str(line);
                buffer.push('\n');
            }
            None => info!(target: "codectx::script", "{line}"),
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.buffer.borrow().is_some()
    }

    /// Start capturing. Capture scopes do not nest.
    pub fn capture(&self) -> Result<CaptureGuard, ContextError> {
        let mut buffer = self.buffer.borrow_mut();
        if buffer.is_some() {
            return Err(ContextError::CaptureInProgress);
        }
        *buffer = Some(String::new());
        Ok(CaptureGuard {
            channel: self.clone(),
        })
    }
}

/// Active capture on an [`OutputChannel`]; released on drop.
pub struct CaptureGuard {
    channel: OutputChannel,
}

impl CaptureGuard {
    /// Output captured so far.
    pub fn contents(&self) -> String {
        self.channel.buffer.borrow().clone().unwrap_or_default()
    }

    /// Release the capture and return everything written during it.
    pub fn finish(self) -> String {
        self.channel.buffer.borrow_mut().take().unwrap_or_default()
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.channel.buffer.borrow_mut().take();
    }
}
