//! Process-wide tee of stdout/stderr into a [`LineSink`].
//!
//! On Unix, fds 1 and 2 are swapped for pipes. A pump thread per stream copies
//! each line to the original descriptor (kept as [`RealConsole`]) and then hands
//! it to the sink. Installed once at startup; it is never removed.

use crate::console::{ConsoleSource, LineSink};
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

static INSTALLED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Error)]
pub enum InterceptError {
    #[error("output interceptor is already installed")]
    AlreadyInstalled,
    #[error("output interception is not supported on this platform")]
    Unsupported,
    #[error("failed to redirect {stream}: {source}")]
    Redirect {
        stream: ConsoleSource,
        #[source]
        source: io::Error,
    },
}

/// Handle to an original, un-captured output descriptor.
///
/// Writing here reaches the terminal without being recorded by the sink.
#[derive(Debug, Clone)]
pub struct RealConsole(Arc<File>);

impl Write for RealConsole {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self.0).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (&*self.0).flush()
    }
}

pub struct OutputInterceptor {
    stdout: RealConsole,
    stderr: RealConsole,
}

impl OutputInterceptor {
    /// Redirect stdout and stderr into `sink`. Fails if called a second time.
    pub fn install(sink: Arc<dyn LineSink>) -> Result<Self, InterceptError> {
        if INSTALLED.swap(true, Ordering::SeqCst) {
            return Err(InterceptError::AlreadyInstalled);
        }
        let result = imp::install(sink);
        if result.is_err() {
            INSTALLED.store(false, Ordering::SeqCst);
        }
        result
    }

    pub fn is_installed() -> bool {
        INSTALLED.load(Ordering::SeqCst)
    }

    pub fn real_stdout(&self) -> RealConsole {
        self.stdout.clone()
    }

    pub fn real_stderr(&self) -> RealConsole {
        self.stderr.clone()
    }
}

/// Copy `reader` line by line to `passthrough` and `sink` until EOF.
///
/// The pass-through write happens before, and independently of, the sink
/// write, so a failing terminal never stops capture.
pub fn pump<R, W>(mut reader: R, mut passthrough: W, sink: &dyn LineSink, source: ConsoleSource) -> io::Result<()>
where
    R: BufRead,
    W: Write,
{
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
        let _ = passthrough.write_all(&buf).and_then(|_| passthrough.flush());
        sink.write_bytes(&buf, source);
    }
}

#[cfg(unix)]
mod imp {
    use super::{pump, InterceptError, OutputInterceptor, RealConsole};
    use crate::console::{ConsoleSource, LineSink};
    use std::fs::File;
    use std::io::{self, BufReader, Write};
    use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
    use std::sync::Arc;
    use std::thread;

    pub(super) fn install(sink: Arc<dyn LineSink>) -> Result<OutputInterceptor, InterceptError> {
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();
        let stdout = redirect(libc::STDOUT_FILENO, ConsoleSource::Stdout, Arc::clone(&sink))
            .map_err(|source| InterceptError::Redirect { stream: ConsoleSource::Stdout, source })?;
        let stderr = redirect(libc::STDERR_FILENO, ConsoleSource::Stderr, sink)
            .map_err(|source| InterceptError::Redirect { stream: ConsoleSource::Stderr, source })?;
        Ok(OutputInterceptor { stdout, stderr })
    }

    fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
        if ret == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(ret)
        }
    }

    fn redirect(fd: RawFd, source: ConsoleSource, sink: Arc<dyn LineSink>) -> io::Result<RealConsole> {
        // SAFETY: every descriptor below comes straight from a successful
        // dup/pipe call and is owned by exactly one File.
        let real = unsafe { File::from_raw_fd(cvt(libc::dup(fd))?) };
        let mut fds: [libc::c_int; 2] = [0; 2];
        cvt(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
        let (read_end, write_end) = unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) };

        cvt(unsafe { libc::dup2(write_end.as_raw_fd(), fd) })?;
        drop(write_end);

        let real = RealConsole(Arc::new(real));
        let passthrough = real.clone();
        let spawned = thread::Builder::new()
            .name(format!("{source}-pump"))
            .spawn(move || {
                if let Err(e) = pump(BufReader::new(read_end), passthrough, &*sink, source) {
                    tracing::warn!(stream = %source, error = %e, "console pump stopped");
                }
            });
        if let Err(e) = spawned {
            // put the original descriptor back so output is not lost
            unsafe { libc::dup2(real.0.as_raw_fd(), fd) };
            return Err(e);
        }
        Ok(real)
    }
}

#[cfg(not(unix))]
mod imp {
    use super::{InterceptError, OutputInterceptor};
    use crate::console::LineSink;
    use std::sync::Arc;

    pub(super) fn install(_sink: Arc<dyn LineSink>) -> Result<OutputInterceptor, InterceptError> {
        Err(InterceptError::Unsupported)
    }
}
