// In-memory transport for tests
//
// Clones share state, so a test keeps one handle while the registry owns another.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::protocol::Opcode;
use super::transport::Transport;

#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    rx: VecDeque<u8>,
    replies: VecDeque<Vec<u8>>,
    frames: Vec<Vec<u8>>,
    read_timeout: Option<Duration>,
    receive_flushes: usize,
    fail_writes: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue bytes the device sends back after the next sensor query frame
    pub fn queue_reply(&self, data: &[u8]) {
        self.state().replies.push_back(data.to_vec());
    }

    /// Put bytes in the receive buffer right away, as if left over from an earlier exchange
    pub fn inject_stale(&self, data: &[u8]) {
        self.state().rx.extend(data);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// Every frame written so far, one entry per write
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.state().frames.clone()
    }

    pub fn clear_frames(&self) {
        self.state().frames.clear();
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.state().read_timeout
    }

    pub fn receive_flushes(&self) -> usize {
        self.state().receive_flushes
    }
}

impl Transport for MockTransport {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock write failure"));
        }
        state.frames.push(data.to_vec());

        let is_query = matches!(
            data.first(),
            Some(&op) if op == Opcode::Sensors as u8 || op == Opcode::QueryList as u8
        );
        if is_query {
            if let Some(reply) = state.replies.pop_front() {
                state.rx.extend(reply);
            }
        }
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        let n = state.rx.len().min(buffer.len());
        for (slot, byte) in buffer.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.state().read_timeout = Some(timeout);
        Ok(())
    }

    fn flush_receive_buffer(&mut self) -> io::Result<()> {
        let mut state = self.state();
        state.rx.clear();
        state.receive_flushes += 1;
        Ok(())
    }
}
