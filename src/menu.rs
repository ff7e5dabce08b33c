//! The destination menu shown before a connection starts relaying.

use bytes::{Buf, BytesMut};

use crate::config::Directory;
use crate::net::PEER_CAPACITY;

pub const GREETING: &str = "Welcome to Lantern, a gateway to the following games:\r\n";
pub const PROMPT: &str = "\x1b[38;5;2mSelect a mud, or Q to quit\x1b[38;5;8m:\x1b[0m ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Quit,
    /// 1-based index into the directory.
    Select(usize),
    Invalid,
}

/// Greeting, numbered game list, then the prompt.
pub fn banner(directory: &Directory) -> Vec<u8> {
    let mut out = String::from(GREETING);
    for (i, dest) in directory.iter().enumerate() {
        out.push_str(&format!("{}. {}\r\n", i + 1, dest.name));
    }
    out.push_str(PROMPT);
    out.into_bytes()
}

/// Interpret one line of menu input against a directory of `count` entries.
pub fn parse_choice(line: &[u8], count: usize) -> Choice {
    let end = line
        .iter()
        .position(|b| *b == b'\r' || *b == b'\n')
        .unwrap_or(line.len());
    let line = trim(&line[..end]);

    match line.first() {
        Some(b'q') | Some(b'Q') => return Choice::Quit,
        None => return Choice::Invalid,
        _ => {}
    }

    // atoi-style: leading digits count, trailing junk is ignored.
    let digits = line.iter().take_while(|b| b.is_ascii_digit()).count();
    let number = match std::str::from_utf8(&line[..digits]).ok().and_then(|s| s.parse::<usize>().ok()) {
        Some(n) => n,
        None => return Choice::Invalid,
    };

    if number >= 1 && number <= count {
        Choice::Select(number)
    } else {
        Choice::Invalid
    }
}

fn trim(line: &[u8]) -> &[u8] {
    let start = line.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(line.len());
    let end = line.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &line[start..end]
}

/// Pull the next line of Telnet input out of `buf`.
///
/// `pending` is how many raw bytes are still waiting to be decoded into `buf`.
/// Returns `None` until a CR or LF arrives, unless the two together fill a
/// whole peer buffer. Whatever follows the first line is discarded.
pub fn take_line(buf: &mut BytesMut, pending: usize) -> Option<BytesMut> {
    // The LF of a CR LF split across reads.
    while buf.first() == Some(&b'\n') {
        buf.advance(1);
    }

    let has_line = buf.iter().any(|b| *b == b'\r' || *b == b'\n');
    if !has_line && buf.len() + pending < PEER_CAPACITY {
        return None;
    }
    Some(buf.split())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Destination;

    fn directory(n: usize) -> Directory {
        Directory::new(
            (1..=n)
                .map(|i| Destination {
                    name: format!("Game {}", i),
                    host: "127.0.0.1".to_string(),
                    port: 4000 + i as u16,
                })
                .collect(),
        )
    }

    #[test]
    fn banner_lists_games_in_order() {
        let text = String::from_utf8(banner(&directory(3))).unwrap();
        assert!(text.starts_with(GREETING));
        assert!(text.contains("1. Game 1\r\n2. Game 2\r\n3. Game 3\r\n"));
        assert!(text.ends_with(PROMPT));
    }

    #[test]
    fn numbers_select_by_position() {
        assert_eq!(parse_choice(b"2\r\n", 3), Choice::Select(2));
        assert_eq!(parse_choice(b"  3  ", 3), Choice::Select(3));
        assert_eq!(parse_choice(b"1abc", 3), Choice::Select(1));
        assert_eq!(parse_choice(b"2\r\n3\r\n", 3), Choice::Select(2));
    }

    #[test]
    fn bad_input_reprompts() {
        for input in [&b"0"[..], b"-1", b"abc", b"4", b"", b"\r\n", b"99999999999999999999999"] {
            assert_eq!(parse_choice(input, 3), Choice::Invalid, "{:?}", input);
        }
    }

    #[test]
    fn q_quits_in_either_case() {
        assert_eq!(parse_choice(b"q\r\n", 3), Choice::Quit);
        assert_eq!(parse_choice(b"Q", 3), Choice::Quit);
        assert_eq!(parse_choice(b"quit", 0), Choice::Quit);
    }

    #[test]
    fn lines_wait_for_a_terminator() {
        let mut buf = BytesMut::from(&b"1"[..]);
        assert_eq!(take_line(&mut buf, 0), None);
        buf.extend_from_slice(b"2\r\nextra");
        assert_eq!(&take_line(&mut buf, 0).unwrap()[..], b"12\r\nextra");
        assert!(buf.is_empty());
    }

    #[test]
    fn split_crlf_does_not_count_as_a_second_line() {
        let mut buf = BytesMut::from(&b"7\r"[..]);
        assert_eq!(&take_line(&mut buf, 0).unwrap()[..], b"7\r");
        buf.extend_from_slice(b"\n");
        assert_eq!(take_line(&mut buf, 0), None);
        assert!(buf.is_empty());

        buf.extend_from_slice(b"\n2\r\n");
        assert_eq!(&take_line(&mut buf, 0).unwrap()[..], b"2\r\n");
    }

    #[test]
    fn full_buffer_counts_undecoded_bytes() {
        let mut buf = BytesMut::from(&vec![b'x'; PEER_CAPACITY - 1][..]);
        assert_eq!(take_line(&mut buf, 0), None);
        // One IAC still waiting in the raw buffer leaves no room to read.
        let line = take_line(&mut buf, 1).unwrap();
        assert_eq!(line.len(), PEER_CAPACITY - 1);
        assert!(buf.is_empty());
    }
}
