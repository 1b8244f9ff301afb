//! Request and reply framing.
//!
//! A request is whatever arrives in the first read of a connection:
//!
//! ```text
//! s<id>,<command>   spawn <command> with the index variable set to <id>
//! c                 kill every tracked child
//! ```
//!
//! Trailing line terminators are ignored. Anything else is answered with
//! `nack`.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Spawn { id: u32, command: String },
    KillAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Nack,
}

impl Reply {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Reply::Ack => b"ack",
            Reply::Nack => b"nack",
        }
    }
}

impl Request {
    /// Parse one request; `None` means the peer gets a `nack`.
    pub fn parse(bytes: &[u8]) -> Option<Request> {
        let text = std::str::from_utf8(bytes).ok()?;
        let text = text.trim_end_matches(['\r', '\n']);
        if text == "c" {
            return Some(Request::KillAll);
        }
        let (id, command) = text.strip_prefix('s')?.split_once(',')?;
        let id = id.parse().ok()?;
        if command.trim().is_empty() {
            return None;
        }
        Some(Request::Spawn {
            id,
            command: command.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_spawn() {
        assert_eq!(
            Request::parse(b"s3,./sim --general/x=1\n"),
            Some(Request::Spawn {
                id: 3,
                command: "./sim --general/x=1".to_string()
            })
        );
        // Only the first comma separates.
        assert_eq!(
            Request::parse(b"s0,echo a,b"),
            Some(Request::Spawn {
                id: 0,
                command: "echo a,b".to_string()
            })
        );
    }

    #[test]
    fn parse_kill_all() {
        assert_eq!(Request::parse(b"c"), Some(Request::KillAll));
        assert_eq!(Request::parse(b"c\r\n"), Some(Request::KillAll));
    }

    #[test]
    fn malformed_requests() {
        let cases: [&[u8]; 10] = [
            b"x",
            b"",
            b"cc",
            b"s",
            b"s,cmd",
            b"s-1,cmd",
            b"sab,cmd",
            b"s1",
            b"s1,   ",
            b"\xff\xfe",
        ];
        for bad in cases {
            assert_eq!(Request::parse(bad), None, "{bad:?}");
        }
    }

    #[test]
    fn reply_bytes() {
        assert_eq!(Reply::Ack.as_bytes(), b"ack");
        assert_eq!(Reply::Nack.as_bytes(), b"nack");
    }
}
