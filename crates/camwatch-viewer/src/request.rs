use camwatch_types::playback::{Epoch, RequestToken};
use url::Url;

use crate::buffer::BufferRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTarget {
    Buffer(BufferRole),
    /// One-off fetch used only to capture a freeze-frame.
    Capture,
}

/// A frame request as issued by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRequest {
    pub token: RequestToken,
    pub epoch: Epoch,
    pub target: RequestTarget,
    pub url: Url,
}

/// Returns `base` with `param=token` appended. Other query parameters are
/// preserved; an existing `param` is replaced.
pub fn cache_busted(base: &Url, param: &str, token: RequestToken) -> Url {
    let retained: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(key, _)| key != param)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut url = base.clone();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (key, value) in &retained {
            pairs.append_pair(key, value);
        }
        pairs.append_pair(param, &token.to_string());
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_token_to_bare_url() {
        let base = Url::parse("http://cam.local/stream/a32be6e7").expect("url");
        let url = cache_busted(&base, "t", RequestToken(1700000000123));
        assert_eq!(url.as_str(), "http://cam.local/stream/a32be6e7?t=1700000000123");
    }

    #[test]
    fn keeps_existing_query_and_replaces_old_token() {
        let base = Url::parse("http://cam.local/frame?camera=7&t=5").expect("url");
        let url = cache_busted(&base, "t", RequestToken(6));
        assert_eq!(url.as_str(), "http://cam.local/frame?camera=7&t=6");
    }
}
