use std::io;
use std::os::unix::io::RawFd;

/// Operator commands accepted on the broker's standard input.
#[derive(Debug, Eq, PartialEq)]
pub enum AdminCommand {
    Exit,
    Unlisted(String),
}

impl AdminCommand {
    /// The first whitespace token decides the command; blank lines are
    /// skipped entirely.
    pub fn parse(line: &str) -> Option<AdminCommand> {
        match line.split_whitespace().next() {
            None => None,
            Some("exit") => Some(AdminCommand::Exit),
            Some(_) => Some(AdminCommand::Unlisted(line.trim().to_owned())),
        }
    }
}

/// Line-buffered reader over an already-polled descriptor. The descriptor
/// stays in blocking mode, so exactly one `read` is issued per readiness
/// event; complete lines are split off and a partial tail is kept for the
/// next event.
pub struct LineReader {
    fd: RawFd,
    pending: Vec<u8>,
}

impl LineReader {
    pub fn stdin() -> LineReader {
        LineReader {
            fd: libc::STDIN_FILENO,
            pending: Vec::new(),
        }
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Performs a single read and returns the lines it completed. End of
    /// input surfaces as `UnexpectedEof`.
    pub fn read_lines(&mut self) -> io::Result<Vec<String>> {
        let mut chunk = [0u8; 4096];

        let count = unsafe { libc::read(self.fd, chunk.as_mut_ptr() as *mut libc::c_void, chunk.len()) };

        if count < 0 {
            return Err(io::Error::last_os_error());
        }

        if count == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }

        self.pending.extend_from_slice(&chunk[..count as usize]);

        Ok(self.drain_lines())
    }

    fn drain_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();

        while let Some(newline) = self.pending.iter().position(|&byte| byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }

        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(reader: &mut LineReader, bytes: &[u8]) -> Vec<String> {
        reader.pending.extend_from_slice(bytes);
        reader.drain_lines()
    }

    #[test]
    fn test_parse_exit() {
        assert_eq!(AdminCommand::parse("exit\n"), Some(AdminCommand::Exit));
        assert_eq!(AdminCommand::parse("  exit"), Some(AdminCommand::Exit));
        assert_eq!(AdminCommand::parse("exit now"), Some(AdminCommand::Exit));
    }

    #[test]
    fn test_parse_unlisted() {
        assert_eq!(
            AdminCommand::parse("status\n"),
            Some(AdminCommand::Unlisted(String::from("status")))
        );
    }

    #[test]
    fn test_parse_blank() {
        assert_eq!(AdminCommand::parse(""), None);
        assert_eq!(AdminCommand::parse("   \n"), None);
    }

    #[test]
    fn test_lines_split_per_newline() {
        let mut reader = LineReader::stdin();

        let lines = feed(&mut reader, b"exit\nstatus\n");

        assert_eq!(lines.len(), 2);
        assert_eq!(AdminCommand::parse(&lines[0]), Some(AdminCommand::Exit));
        assert_eq!(
            AdminCommand::parse(&lines[1]),
            Some(AdminCommand::Unlisted(String::from("status")))
        );
    }

    #[test]
    fn test_partial_line_is_retained() {
        let mut reader = LineReader::stdin();

        assert!(feed(&mut reader, b"ex").is_empty());

        let lines = feed(&mut reader, b"it\n");

        assert_eq!(lines.len(), 1);
        assert_eq!(AdminCommand::parse(&lines[0]), Some(AdminCommand::Exit));
        assert!(reader.pending.is_empty());
    }
}
