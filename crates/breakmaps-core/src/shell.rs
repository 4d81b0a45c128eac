//! Interactive runner.
//!
//! Reads one command per line, supports `<file`, `>file` and `2>file`
//! redirections, and runs each command in a forked child while the parent
//! waits. No pipelines, no job control, no background jobs.

use std::ffi::CString;
use std::io::{self, Read, Write};

use breakmaps_config::{log_shell_debug, log_shell_warn};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};

use crate::interrupt::Interrupt;
use crate::{Error, Result};

/// Status a child reports when its program could not be executed.
pub const EXEC_FAILED: i32 = 127;

/// Standard stream a redirection applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Input,
    Output,
    ErrorOutput,
}

impl Stream {
    /// Order in which markers are tried against a token.
    pub const ALL: [Stream; 3] = [Stream::Input, Stream::Output, Stream::ErrorOutput];

    pub fn marker(self) -> &'static str {
        match self {
            Stream::Input => "<",
            Stream::Output => ">",
            Stream::ErrorOutput => "2>",
        }
    }

    pub fn fd(self) -> libc::c_int {
        match self {
            Stream::Input => libc::STDIN_FILENO,
            Stream::Output => libc::STDOUT_FILENO,
            Stream::ErrorOutput => libc::STDERR_FILENO,
        }
    }

    fn open_flags(self) -> libc::c_int {
        match self {
            Stream::Input => libc::O_RDONLY,
            Stream::Output | Stream::ErrorOutput => libc::O_WRONLY | libc::O_TRUNC | libc::O_CREAT,
        }
    }

    fn index(self) -> usize {
        self.fd() as usize
    }
}

/// One parsed input line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLine {
    pub argv: Vec<String>,
    redirects: [Option<String>; 3],
}

impl CommandLine {
    /// Split on whitespace, pulling out redirection markers and their targets.
    ///
    /// A marker takes the rest of its token as the target or, when nothing
    /// follows it, the next token. A marker with no target at all is dropped.
    pub fn parse(line: &str) -> Self {
        let mut parsed = CommandLine::default();
        let mut tokens = line.split_whitespace();

        while let Some(token) = tokens.next() {
            let redirect = Stream::ALL
                .into_iter()
                .find_map(|stream| token.strip_prefix(stream.marker()).map(|rest| (stream, rest)));

            match redirect {
                Some((stream, rest)) => {
                    let target = if rest.is_empty() {
                        tokens.next()
                    } else {
                        Some(rest)
                    };
                    parsed.redirects[stream.index()] = target.map(str::to_string);
                }
                None => parsed.argv.push(token.to_string()),
            }
        }
        parsed
    }

    pub fn redirect(&self, stream: Stream) -> Option<&str> {
        self.redirects[stream.index()].as_deref()
    }

    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }
}

/// Line source for the runner.
///
/// Leading whitespace and blank lines are skipped, at most `max_line - 1`
/// bytes of a line are kept and the rest of that line is thrown away.
/// An interrupted read surfaces as `ErrorKind::Interrupted` with no input lost.
pub struct LineReader<R> {
    inner: R,
    chunk: Box<[u8; 512]>,
    /// Unconsumed part of `chunk`.
    start: usize,
    end: usize,
    /// Kept prefix of the current line; never longer than `max_line - 1`.
    line: Vec<u8>,
    max_line: usize,
    eof: bool,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R, max_line: usize) -> Self {
        let max_line = max_line.max(2);
        Self {
            inner,
            chunk: Box::new([0u8; 512]),
            start: 0,
            end: 0,
            line: Vec::with_capacity(max_line - 1),
            max_line,
            eof: false,
        }
    }

    pub fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            while self.start < self.end {
                let byte = self.chunk[self.start];
                self.start += 1;
                if byte == b'\n' {
                    if !self.line.is_empty() {
                        return Ok(Some(self.take_line()));
                    }
                    continue;
                }
                let leading = self.line.is_empty() && byte.is_ascii_whitespace();
                if !leading && self.line.len() < self.max_line - 1 {
                    self.line.push(byte);
                }
            }
            if self.eof {
                if self.line.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.take_line()));
            }
            self.fill()?;
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        let n = self.inner.read(&mut self.chunk[..])?;
        self.start = 0;
        self.end = n;
        if n == 0 {
            self.eof = true;
        }
        Ok(())
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.line).into_owned();
        self.line.clear();
        line
    }
}

/// Everything the child needs, built before fork so the child never allocates.
struct Prepared {
    argv: Vec<CString>,
    redirects: Vec<(Stream, CString, Vec<u8>)>,
}

impl Prepared {
    fn new(cmd: &CommandLine) -> Result<Self> {
        let cstring = |s: &str| CString::new(s).map_err(|_| Error::NulInCommand(s.to_string()));

        let argv = cmd
            .argv
            .iter()
            .map(|arg| cstring(arg.as_str()))
            .collect::<Result<Vec<_>>>()?;

        let mut redirects = Vec::new();
        for stream in Stream::ALL {
            if let Some(path) = cmd.redirect(stream) {
                let complaint = format!("could not open {}: ", path).into_bytes();
                redirects.push((stream, cstring(path)?, complaint));
            }
        }
        Ok(Self { argv, redirects })
    }
}

/// A running child started by [`spawn`].
#[derive(Debug)]
pub struct Child {
    pid: Pid,
}

impl Child {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Block until the child terminates.
    ///
    /// A pending interrupt is passed on to the child and the wait resumes,
    /// so the child is always reaped before the caller reacts to it.
    pub fn wait<I: Interrupt + ?Sized>(self, interrupt: &I) -> Result<WaitStatus> {
        loop {
            match waitpid(self.pid, None) {
                Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                    return Ok(status)
                }
                Ok(_) => continue,
                Err(Errno::EINTR) => {
                    if let Some(signal) = interrupt.pending(0) {
                        let _ = kill(self.pid, signal);
                    }
                }
                Err(source) => {
                    return Err(Error::Wait {
                        pid: self.pid,
                        source,
                    })
                }
            }
        }
    }
}

/// Fork a child that applies `cmd`'s redirections and execs its program via PATH.
pub fn spawn(cmd: &CommandLine) -> Result<Child> {
    let prepared = Prepared::new(cmd)?;
    let mut argv_ptrs: Vec<*const libc::c_char> =
        prepared.argv.iter().map(|arg| arg.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());

    // SAFETY: the child only calls async-signal-safe functions until exec or _exit.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => Ok(Child { pid: child }),
        Ok(ForkResult::Child) => unsafe { exec_child(&prepared, &argv_ptrs) },
        Err(e) => Err(Error::Fork(e)),
    }
}

unsafe fn exec_child(prepared: &Prepared, argv: &[*const libc::c_char]) -> ! {
    let mut opened: [libc::c_int; 3] = [-1; 3];

    for (stream, path, complaint) in &prepared.redirects {
        let fd = libc::open(path.as_ptr(), stream.open_flags(), 0o664 as libc::c_uint);
        if fd == -1 {
            let reason = Errno::last().desc().as_bytes();
            libc::write(libc::STDERR_FILENO, complaint.as_ptr().cast(), complaint.len());
            libc::write(libc::STDERR_FILENO, reason.as_ptr().cast(), reason.len());
            libc::write(libc::STDERR_FILENO, b"\n".as_ptr().cast(), 1);
        }
        opened[stream.index()] = fd;
    }

    for stream in Stream::ALL {
        let fd = opened[stream.index()];
        if fd != -1 && fd != stream.fd() {
            libc::dup2(fd, stream.fd());
            libc::close(fd);
        }
    }

    if let Some(program) = argv.first().copied().filter(|p| !p.is_null()) {
        libc::execvp(program, argv.as_ptr());
    }
    libc::_exit(EXEC_FAILED)
}

/// Why the interactive loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The user typed `exit`.
    Exit,
    EndOfInput,
    Interrupted(Signal),
    /// fork failed; the session ends but the run shuts down normally.
    ForkFailed,
}

/// Run commands from `reader` one at a time until exit, end of input or an interrupt.
pub fn run_session<R, I>(
    reader: &mut LineReader<R>,
    prompt: &mut dyn Write,
    interrupt: &I,
) -> SessionEnd
where
    R: Read,
    I: Interrupt + ?Sized,
{
    loop {
        if let Some(signal) = interrupt.pending(0) {
            return SessionEnd::Interrupted(signal);
        }

        let _ = prompt.write_all(b"$ ");
        let _ = prompt.flush();

        let line = match reader.next_line() {
            Ok(Some(line)) => line,
            Ok(None) => return SessionEnd::EndOfInput,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log_shell_warn!("could not read input", error = e.to_string());
                return SessionEnd::EndOfInput;
            }
        };
        if line.trim_end() == "exit" {
            return SessionEnd::Exit;
        }

        let cmd = CommandLine::parse(&line);
        if cmd.program().is_none() {
            log_shell_warn!("nothing to run", line = line.as_str());
            continue;
        }

        let child = match spawn(&cmd) {
            Ok(child) => child,
            Err(e @ Error::Fork(_)) => {
                log_shell_warn!("ending session", error = e.to_string());
                return SessionEnd::ForkFailed;
            }
            Err(e) => {
                log_shell_warn!("could not start command", error = e.to_string());
                continue;
            }
        };

        let pid = child.pid();
        match child.wait(interrupt) {
            Ok(status) => log_shell_debug!("child finished", status = format!("{:?}", status)),
            Err(e) => log_shell_warn!("lost track of child", pid = pid.as_raw(), error = e.to_string()),
        }
    }
}
