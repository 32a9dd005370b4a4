//! Smart HTTP negotiation, client side.
//!
//! Parses the `info/refs` advertisement, builds the want/done request
//! for `git-upload-pack`, and strips the acknowledgment lines that
//! precede the pack in the response.
//! See: https://git-scm.com/docs/http-protocol

use crate::pktline::{self, PktLine};
use crate::{GitError, Result};
use kit_storage::ObjectId;

/// Service name for fetch/clone.
pub const UPLOAD_PACK: &str = "git-upload-pack";

/// Content type of the upload-pack request body.
pub const UPLOAD_PACK_REQUEST: &str = "application/x-git-upload-pack-request";

/// Pseudo-ref name an empty repository advertises.
const NO_REFS: &str = "capabilities^{}";

/// A reference advertisement line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ref {
    /// Object ID the ref points to.
    pub id: ObjectId,
    /// Reference name.
    pub name: String,
}

/// A parsed ref advertisement.
#[derive(Debug, Clone, Default)]
pub struct Advertisement {
    /// Refs in advertised order.
    pub refs: Vec<Ref>,
    /// Capabilities from the first ref line.
    pub capabilities: Vec<String>,
}

impl Advertisement {
    /// Returns the id `HEAD` points at, if advertised.
    pub fn head(&self) -> Option<ObjectId> {
        self.refs.iter().find(|r| r.name == "HEAD").map(|r| r.id)
    }

    /// Returns true if the server advertised `capability`.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c == capability || c.split_once('=').is_some_and(|(k, _)| k == capability))
    }
}

/// Parses an `info/refs?service=git-upload-pack` response body.
///
/// The service announcement and its flush are skipped, the capability
/// string after the first ref's NUL is split off, and one [`Ref`] is
/// produced per line up to the closing flush.
pub fn parse_advertisement(raw: &[u8]) -> Result<Advertisement> {
    let mut lines = pktline::decode(raw).peekable();

    let announced = matches!(
        lines.peek(),
        Some(Ok(PktLine::Data(first))) if first.starts_with(b"# service=")
    );
    if announced {
        lines.next();
        match lines.next().transpose()? {
            Some(PktLine::Flush) => {}
            other => {
                return Err(GitError::InvalidPktLine(format!(
                    "expected flush after service announcement, got {:?}",
                    other
                )))
            }
        }
    }

    let mut advertisement = Advertisement::default();
    let mut first_ref = true;
    for line in lines {
        let data = match line? {
            PktLine::Data(data) => data,
            PktLine::Flush => break,
            other => {
                return Err(GitError::InvalidPktLine(format!(
                    "unexpected {:?} in ref advertisement",
                    other
                )))
            }
        };

        let text = std::str::from_utf8(&data)
            .map_err(|_| GitError::InvalidPktLine("ref line is not utf-8".to_string()))?
            .trim_end_matches('\n');

        if text.starts_with("version ") {
            continue;
        }

        let text = if first_ref {
            first_ref = false;
            match text.split_once('\0') {
                Some((line, caps)) => {
                    advertisement.capabilities =
                        caps.split_whitespace().map(str::to_string).collect();
                    line
                }
                None => text,
            }
        } else {
            text
        };

        let (hex, name) = text
            .split_once(' ')
            .ok_or_else(|| GitError::InvalidPktLine(format!("malformed ref line: {:?}", text)))?;
        if name == NO_REFS {
            continue;
        }
        let id = ObjectId::from_hex(hex)
            .map_err(|_| GitError::InvalidPktLine(format!("bad object id in ref line: {:?}", hex)))?;

        advertisement.refs.push(Ref {
            id,
            name: name.to_string(),
        });
    }

    if advertisement.refs.is_empty() {
        return Err(GitError::NoRefsAdvertised);
    }

    tracing::debug!(
        refs = advertisement.refs.len(),
        capabilities = advertisement.capabilities.len(),
        "parsed ref advertisement"
    );
    Ok(advertisement)
}

/// Finds the ref named exactly `name`.
pub fn find_ref(refs: &[Ref], name: &str) -> Result<ObjectId> {
    refs.iter()
        .find(|r| r.name == name)
        .map(|r| r.id)
        .ok_or_else(|| GitError::RefNotFound(name.to_string()))
}

/// Builds the upload-pack request asking for a single commit.
pub fn build_want_request(id: &ObjectId) -> Vec<u8> {
    let mut body = pktline::encode(format!("want {}\n", id).as_bytes());
    body.extend_from_slice(&PktLine::Flush.encode());
    body.extend_from_slice(&pktline::encode(b"done\n"));
    body
}

/// Skips the `NAK`/`ACK` pkt-lines before the pack and returns the pack.
pub fn split_pack_response(body: &[u8]) -> Result<&[u8]> {
    let mut lines = pktline::decode(body);
    loop {
        let rest = lines.remaining();
        if rest.starts_with(b"PACK") {
            return Ok(rest);
        }
        match lines.next().transpose()? {
            Some(PktLine::Data(data)) => {
                if !(data.starts_with(b"NAK") || data.starts_with(b"ACK")) {
                    return Err(GitError::InvalidPack(format!(
                        "unexpected line before pack: {:?}",
                        String::from_utf8_lossy(&data)
                    )));
                }
                tracing::trace!(line = %String::from_utf8_lossy(&data).trim_end(), "negotiation response");
            }
            Some(_) => {}
            None => return Err(GitError::InvalidPack("response contains no pack".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "7217a7c7e582c46cec22a130adf4b9d7d950fba0";
    const DEV: &str = "b6fc4c620b67d95f953a5c1c1230aaab5db5a1b0";

    fn advertisement() -> Vec<u8> {
        let mut raw = pktline::encode(b"# service=git-upload-pack\n");
        raw.extend_from_slice(b"0000");
        raw.extend_from_slice(&pktline::encode(
            format!("{} HEAD\0multi_ack thin-pack side-band ofs-delta agent=git/2.40\n", MASTER)
                .as_bytes(),
        ));
        raw.extend_from_slice(&pktline::encode(format!("{} refs/heads/dev\n", DEV).as_bytes()));
        raw.extend_from_slice(&pktline::encode(
            format!("{} refs/heads/master\n", MASTER).as_bytes(),
        ));
        raw.extend_from_slice(b"0000");
        raw
    }

    #[test]
    fn test_parse_advertisement() {
        let adv = parse_advertisement(&advertisement()).unwrap();
        let names: Vec<_> = adv.refs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["HEAD", "refs/heads/dev", "refs/heads/master"]);
        assert_eq!(adv.head().unwrap().to_hex(), MASTER);
        assert!(adv.has_capability("ofs-delta"));
        assert!(adv.has_capability("agent"));
        assert!(!adv.has_capability("shallow"));
    }

    #[test]
    fn test_find_ref_exact_match() {
        let adv = parse_advertisement(&advertisement()).unwrap();
        assert_eq!(find_ref(&adv.refs, "refs/heads/master").unwrap().to_hex(), MASTER);
        assert_eq!(find_ref(&adv.refs, "refs/heads/dev").unwrap().to_hex(), DEV);
        assert!(matches!(
            find_ref(&adv.refs, "refs/heads/mast"),
            Err(GitError::RefNotFound(_))
        ));
    }

    #[test]
    fn test_empty_repository() {
        let mut raw = pktline::encode(b"# service=git-upload-pack\n");
        raw.extend_from_slice(b"0000");
        raw.extend_from_slice(&pktline::encode(
            format!("{} capabilities^{{}}\0report-status\n", "0".repeat(40)).as_bytes(),
        ));
        raw.extend_from_slice(b"0000");
        assert!(matches!(
            parse_advertisement(&raw),
            Err(GitError::NoRefsAdvertised)
        ));
    }

    #[test]
    fn test_empty_body() {
        assert!(matches!(
            parse_advertisement(b""),
            Err(GitError::NoRefsAdvertised)
        ));
    }

    #[test]
    fn test_first_ref_without_capabilities() {
        let raw = pktline::encode(format!("{} refs/heads/master\n", MASTER).as_bytes());
        let adv = parse_advertisement(&raw).unwrap();
        assert_eq!(adv.refs.len(), 1);
        assert!(adv.capabilities.is_empty());
    }

    #[test]
    fn test_malformed_ref_line() {
        let mut raw = pktline::encode(b"# service=git-upload-pack\n");
        raw.extend_from_slice(b"0000");
        raw.extend_from_slice(&pktline::encode(b"not-a-hash refs/heads/x\n"));
        assert!(matches!(
            parse_advertisement(&raw),
            Err(GitError::InvalidPktLine(_))
        ));
    }

    #[test]
    fn test_build_want_request_matches_wire() {
        let id = ObjectId::from_hex(MASTER).unwrap();
        let body = build_want_request(&id);
        let expected = format!("0032want {}\n00000009done\n", MASTER);
        assert_eq!(body, expected.as_bytes());
    }

    #[test]
    fn test_split_pack_response() {
        let mut body = b"0008NAK\n".to_vec();
        body.extend_from_slice(b"PACK\0\0\0\x02");
        assert_eq!(split_pack_response(&body).unwrap(), b"PACK\0\0\0\x02");
    }

    #[test]
    fn test_split_pack_response_without_pack() {
        assert!(matches!(
            split_pack_response(b"0008NAK\n"),
            Err(GitError::InvalidPack(_))
        ));
        assert!(matches!(
            split_pack_response(b"000eERR denied"),
            Err(GitError::InvalidPack(_))
        ));
    }
}
