/// Shared utilities: binary record encoding and wallet locking
///
/// Every persistent record in the wallet is a hand-rolled binary blob with
/// single-byte key prefixes and var-int lengths; `BinaryWriter` and
/// `BinaryReader` are the only two ways records get built or parsed.
use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};

use crate::error::{EncryptionError, SerializationError};

/// Incremental builder for on-disk records.
#[derive(Default)]
pub struct BinaryWriter {
    buf: Vec<u8>,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16_le(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32_le(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32_be(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u64_le(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Bitcoin-style variable length integer.
    pub fn put_var_int(&mut self, v: u64) {
        match v {
            0..=0xFC => self.put_u8(v as u8),
            0xFD..=0xFFFF => {
                self.put_u8(0xFD);
                self.put_u16_le(v as u16);
            }
            0x1_0000..=0xFFFF_FFFF => {
                self.put_u8(0xFE);
                self.put_u32_le(v as u32);
            }
            _ => {
                self.put_u8(0xFF);
                self.put_u64_le(v);
            }
        }
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Var-int length followed by the raw bytes.
    pub fn put_var_bytes(&mut self, bytes: &[u8]) {
        self.put_var_int(bytes.len() as u64);
        self.put_bytes(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

/// Cursor over a serialized record.
pub struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SerializationError> {
        if self.remaining() < n {
            return Err(SerializationError::Truncated {
                wanted: n,
                left: self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn get_u8(&mut self) -> Result<u8, SerializationError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16_le(&mut self) -> Result<u16, SerializationError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn get_u32_le(&mut self) -> Result<u32, SerializationError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u32_be(&mut self) -> Result<u32, SerializationError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64_le(&mut self) -> Result<u64, SerializationError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    pub fn get_var_int(&mut self) -> Result<u64, SerializationError> {
        match self.get_u8()? {
            0xFF => self.get_u64_le(),
            0xFE => Ok(self.get_u32_le()? as u64),
            0xFD => Ok(self.get_u16_le()? as u64),
            n => Ok(n as u64),
        }
    }

    pub fn get_bytes(&mut self, n: usize) -> Result<&'a [u8], SerializationError> {
        self.take(n)
    }

    pub fn get_var_bytes(&mut self) -> Result<Vec<u8>, SerializationError> {
        let len = self.get_var_int()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}

struct LockState {
    holder: Option<ThreadId>,
    depth: u32,
    exclusive: bool,
}

/// Mutex with same-thread reentry and fail-fast exclusive acquisition.
///
/// The holder's thread id is tracked so a thread re-entering its own lock
/// succeeds silently, while `acquire_exclusive` refuses to stack on top of
/// any frame the current thread already holds.
pub struct ReentrantLock {
    state: Mutex<LockState>,
    cv: Condvar,
}

impl Default for ReentrantLock {
    fn default() -> Self {
        Self::new()
    }
}

impl ReentrantLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState {
                holder: None,
                depth: 0,
                exclusive: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Take the lock, blocking if another thread holds it. Reentrant for
    /// the holding thread.
    pub fn acquire(&self) -> LockGuard<'_> {
        let me = thread::current().id();
        let mut state = self.state.lock().expect("lock poisoned");
        loop {
            match state.holder {
                Some(h) if h == me => {
                    if state.exclusive {
                        // The exclusive frame is non-reentrant by contract.
                        panic!("reentrant acquire inside an exclusive lock scope");
                    }
                    state.depth += 1;
                    return LockGuard { lock: self };
                }
                None => {
                    state.holder = Some(me);
                    state.depth = 1;
                    return LockGuard { lock: self };
                }
                Some(_) => {
                    state = self.cv.wait(state).expect("lock poisoned");
                }
            }
        }
    }

    /// Take the lock as the thread's only frame. Fails with `AlreadyLocked`
    /// if the current thread holds any frame; blocks out other threads.
    pub fn acquire_exclusive(&self) -> Result<ExclusiveGuard<'_>, EncryptionError> {
        let me = thread::current().id();
        let mut state = self.state.lock().expect("lock poisoned");
        loop {
            match state.holder {
                Some(h) if h == me => return Err(EncryptionError::AlreadyLocked),
                None => {
                    state.holder = Some(me);
                    state.depth = 1;
                    state.exclusive = true;
                    return Ok(ExclusiveGuard { lock: self });
                }
                Some(_) => {
                    state = self.cv.wait(state).expect("lock poisoned");
                }
            }
        }
    }

    /// True when the calling thread holds the outermost (and only) frame.
    pub fn held_by_current_thread(&self) -> bool {
        let state = self.state.lock().expect("lock poisoned");
        state.holder == Some(thread::current().id())
    }

    fn release(&self) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.depth -= 1;
        if state.depth == 0 {
            state.holder = None;
            state.exclusive = false;
            self.cv.notify_all();
        }
    }

    fn current_depth(&self) -> u32 {
        self.state.lock().expect("lock poisoned").depth
    }
}

/// Frame of a reentrant acquisition; releasing the outermost frame frees
/// the lock for other threads.
pub struct LockGuard<'a> {
    lock: &'a ReentrantLock,
}

impl LockGuard<'_> {
    /// True when dropping this guard will fully release the lock.
    pub fn is_outermost(&self) -> bool {
        self.lock.current_depth() == 1
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

/// Non-reentrant whole-lock acquisition used by master-key rotation.
pub struct ExclusiveGuard<'a> {
    lock: &'a ReentrantLock,
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_var_int_round_trip() {
        let values = [0u64, 0xFC, 0xFD, 0xFFFF, 0x1_0000, 0xFFFF_FFFF, u64::MAX];
        for v in values {
            let mut w = BinaryWriter::new();
            w.put_var_int(v);
            let bytes = w.into_vec();
            let mut r = BinaryReader::new(&bytes);
            assert_eq!(r.get_var_int().unwrap(), v);
            assert!(r.is_exhausted());
        }
    }

    #[test]
    fn test_truncated_read_fails() {
        let mut w = BinaryWriter::new();
        w.put_u32_le(42);
        let bytes = w.into_vec();
        let mut r = BinaryReader::new(&bytes[..2]);
        assert!(matches!(
            r.get_u32_le(),
            Err(SerializationError::Truncated { .. })
        ));
    }

    #[test]
    fn test_var_bytes_round_trip() {
        let payload = vec![7u8; 300];
        let mut w = BinaryWriter::new();
        w.put_var_bytes(&payload);
        let bytes = w.into_vec();
        let mut r = BinaryReader::new(&bytes);
        assert_eq!(r.get_var_bytes().unwrap(), payload);
    }

    #[test]
    fn test_reentrant_lock_same_thread() {
        let lock = ReentrantLock::new();
        let g1 = lock.acquire();
        let g2 = lock.acquire();
        assert!(!g2.is_outermost());
        drop(g2);
        assert!(g1.is_outermost());
    }

    #[test]
    fn test_exclusive_fails_when_held() {
        let lock = ReentrantLock::new();
        let _g = lock.acquire();
        assert!(matches!(
            lock.acquire_exclusive(),
            Err(EncryptionError::AlreadyLocked)
        ));
    }

    #[test]
    fn test_lock_blocks_other_thread() {
        let lock = Arc::new(ReentrantLock::new());
        let guard = lock.acquire();
        let lock2 = Arc::clone(&lock);
        let handle = std::thread::spawn(move || {
            let _g = lock2.acquire();
            true
        });
        // The spawned thread can only finish once we release.
        drop(guard);
        assert!(handle.join().unwrap());
    }
}
