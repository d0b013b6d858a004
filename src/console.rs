//! Synchronized console output shared by worker threads.
//!
//! Every write goes through a re-entrant lock so that a thread can print a
//! multi-line block (`lock()` + several prints) without other threads
//! interleaving, while single `print` calls made under that block still
//! succeed instead of deadlocking.
//!
//! Input is read one whitespace-delimited token at a time through [`Tokens`].

use std::collections::VecDeque;
use std::fmt::Display;
use std::io::{self, BufRead, Write};
use std::marker::PhantomData;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use tracing::warn;

/// Owner and recursion depth of a [`ReentrantLock`].
#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
}

/// A mutual-exclusion lock that its owning thread may acquire repeatedly.
///
/// The lock is released once `release` has been called as many times as
/// `acquire` was.
#[derive(Debug, Default)]
pub struct ReentrantLock {
    state: Mutex<LockState>,
    released: Condvar,
}

impl ReentrantLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the calling thread owns the lock.
    pub fn acquire(&self) {
        let me = thread::current().id();
        let mut state = self.state();

        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    return;
                }
                Some(owner) if owner == me => {
                    state.depth += 1;
                    return;
                }
                Some(_) => {
                    state = self
                        .released
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    /// Undo one `acquire` made by the calling thread.
    ///
    /// Releasing a lock the caller does not hold is ignored.
    pub fn release(&self) {
        let me = thread::current().id();
        let mut state = self.state();

        debug_assert_eq!(state.owner, Some(me), "lock released by a non-owner");
        if state.owner != Some(me) {
            return;
        }

        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            drop(state);
            self.released.notify_one();
        }
    }

    /// Current recursion depth held by the calling thread (0 if not held).
    #[cfg(test)]
    pub fn depth(&self) -> usize {
        let state = self.state();
        if state.owner == Some(thread::current().id()) {
            state.depth
        } else {
            0
        }
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Process-wide output sink shared by `Arc` between workers.
pub struct Console {
    lock: ReentrantLock,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl Console {
    /// Create a console writing to `sink`.
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            lock: ReentrantLock::new(),
            sink: Mutex::new(Box::new(sink)),
        }
    }

    /// Create a console writing to standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Write `value` and flush, atomically with respect to other threads.
    pub fn print(&self, value: impl Display) {
        self.lock.acquire();
        self.write(&value);
        self.lock.release();
    }

    /// Write `value` followed by a newline as one atomic unit.
    pub fn println(&self, value: impl Display) {
        self.lock.acquire();
        self.write(&value);
        self.write(&'\n');
        self.lock.release();
    }

    /// Hold the console until the returned guard is dropped.
    ///
    /// Other threads block on `print` in the meantime; the holder may keep
    /// calling `print` on the console directly or through the guard.
    pub fn lock(&self) -> ConsoleGuard<'_> {
        self.lock.acquire();
        ConsoleGuard {
            console: self,
            _not_send: PhantomData,
        }
    }

    fn write(&self, value: &dyn Display) {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        let result = write!(sink, "{value}").and_then(|()| sink.flush());
        if let Err(e) = result {
            warn!(error = %e, "Console write failed");
        }
    }
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console").field("lock", &self.lock).finish()
    }
}

/// Scoped hold on a [`Console`]; unlocks on drop.
///
/// Not `Send`: the lock is owned by the acquiring thread, so the guard
/// must be dropped there.
#[must_use = "the console is unlocked as soon as the guard is dropped"]
pub struct ConsoleGuard<'a> {
    console: &'a Console,
    _not_send: PhantomData<*const ()>,
}

impl ConsoleGuard<'_> {
    pub fn print(&self, value: impl Display) {
        self.console.print(value);
    }

    pub fn println(&self, value: impl Display) {
        self.console.println(value);
    }
}

impl Drop for ConsoleGuard<'_> {
    fn drop(&mut self) {
        self.console.lock.release();
    }
}

/// Reads whitespace-delimited tokens from a line-oriented input.
pub struct Tokens {
    input: Box<dyn BufRead + Send>,
    pending: VecDeque<String>,
}

impl Tokens {
    pub fn new(input: impl BufRead + Send + 'static) -> Self {
        Self {
            input: Box::new(input),
            pending: VecDeque::new(),
        }
    }

    /// Tokens from standard input.
    pub fn stdin() -> Self {
        Self::new(io::BufReader::new(io::stdin()))
    }

    /// Block until the next token is available; `None` at end of input.
    ///
    /// Bytes that are not UTF-8 are replaced rather than rejected, so one
    /// bad token never costs the rest of its line.
    pub fn next_token(&mut self) -> io::Result<Option<String>> {
        let mut line = Vec::new();
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Ok(Some(token));
            }

            line.clear();
            if self.input.read_until(b'\n', &mut line)? == 0 {
                return Ok(None);
            }
            self.pending.extend(
                String::from_utf8_lossy(&line)
                    .split_whitespace()
                    .map(str::to_owned),
            );
        }
    }
}

impl std::fmt::Debug for Tokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokens")
            .field("pending", &self.pending)
            .finish()
    }
}

/// In-memory sink for capturing console output in tests.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct Capture(std::sync::Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl Capture {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[cfg(test)]
impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_reentrant_acquire_release() {
        let lock = ReentrantLock::new();

        lock.acquire();
        lock.acquire();
        assert_eq!(lock.depth(), 2);

        lock.release();
        assert_eq!(lock.depth(), 1);
        lock.release();
        assert_eq!(lock.depth(), 0);

        // Fully released: another thread can take it.
        let lock = Arc::new(lock);
        let other = Arc::clone(&lock);
        thread::spawn(move || {
            other.acquire();
            other.release();
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_lock_blocks_other_threads() {
        let lock = Arc::new(ReentrantLock::new());
        lock.acquire();

        let other = Arc::clone(&lock);
        let (tx, rx) = std::sync::mpsc::channel();
        let handle = thread::spawn(move || {
            other.acquire();
            tx.send(()).unwrap();
            other.release();
        });

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        lock.release();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        handle.join().unwrap();
    }

    #[test]
    fn test_print_under_guard_does_not_deadlock() {
        let capture = Capture::default();
        let console = Console::new(capture.clone());

        {
            let guard = console.lock();
            guard.println("status");
            console.print("result");
            guard.print('\n');
        }

        assert_eq!(capture.contents(), "status\nresult\n");
    }

    #[test]
    fn test_tokens_split_on_whitespace() {
        let mut tokens = Tokens::new(io::Cursor::new("one two\n\n  three\t four\nfive"));

        let mut seen = Vec::new();
        while let Some(token) = tokens.next_token().unwrap() {
            seen.push(token);
        }
        assert_eq!(seen, ["one", "two", "three", "four", "five"]);
        assert_eq!(tokens.next_token().unwrap(), None);
    }

    #[test]
    fn test_tokens_survive_invalid_utf8() {
        // "Привет" in CP1251, followed by an ASCII token.
        let input: &[u8] = b"\xcf\xf0\xe8\xe2\xe5\xf2 hello\n";
        let mut tokens = Tokens::new(io::Cursor::new(input));

        let first = tokens.next_token().unwrap().unwrap();
        assert!(first.contains('\u{FFFD}'));
        assert_eq!(tokens.next_token().unwrap().as_deref(), Some("hello"));
        assert_eq!(tokens.next_token().unwrap(), None);
    }

    #[test]
    fn test_guard_holds_console_until_dropped_on_its_thread() {
        let capture = Capture::default();
        let console = Arc::new(Console::new(capture.clone()));

        let guard = console.lock();
        guard.print("held ");

        let other = Arc::clone(&console);
        let (tx, rx) = std::sync::mpsc::channel();
        let writer = thread::spawn(move || {
            other.println("other");
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        guard.println("block");
        drop(guard);

        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        writer.join().unwrap();
        assert_eq!(capture.contents(), "held block\nother\n");
        assert_eq!(console.lock.depth(), 0);
    }

    #[test]
    fn test_blocks_are_not_interleaved() {
        let capture = Capture::default();
        let console = Arc::new(Console::new(capture.clone()));

        let handles: Vec<_> = (0..4)
            .map(|id| {
                let console = Arc::clone(&console);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let guard = console.lock();
                        guard.print(format_args!("begin {id}\n"));
                        guard.print(format_args!("end {id}\n"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let output = capture.contents();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 400);
        for pair in lines.chunks(2) {
            let id = pair[0].strip_prefix("begin ").unwrap();
            assert_eq!(pair[1], format!("end {id}"));
        }
    }
}
