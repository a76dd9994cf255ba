//! Streaming HTML rewriter
//!
//! Incremental, allocation-light HTML scanning that passes every input byte
//! through unchanged and in order, splicing in at most two kinds of
//! fragments: a meta tag after the first `<head>` and a hidden input after
//! each same-origin POST `<form>`.
//!
//! The scanner is a small byte-level state machine rather than a full HTML
//! parser. It is deliberately tolerant: anything it cannot make sense of is
//! emitted verbatim, and an unterminated tag at end-of-stream is flushed
//! as-is. Tags may span chunk boundaries; the only state retained between
//! chunks is the partially buffered markup.

use bytes::Bytes;

/// Scanner position within the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Raw text between tags; emitted as slices of the input chunk.
    Text,
    /// Inside `<` ... `>`; bytes accumulate in the tag buffer.
    Markup,
}

/// One rewriter per response. Feed chunks with [`write`](Self::write) and
/// close the stream with [`finish`](Self::finish); after that both calls are
/// no-ops returning no output. Not reusable across responses.
pub struct HtmlRewriter {
    token: String,
    parameter_name: String,
    /// Meta tag name when meta injection is enabled.
    meta_name: Option<String>,
    /// Current request host, lowercased, without port. `None` means the host
    /// is unknown and absolute form actions cannot be proven same-origin.
    host: Option<String>,
    state: State,
    /// Partially buffered markup, including the leading `<`.
    tag: Vec<u8>,
    /// Open attribute-value quote within the current tag, if any.
    quote: Option<u8>,
    meta_injected: bool,
    closed: bool,
}

impl HtmlRewriter {
    /// Create a rewriter for one response.
    ///
    /// The token must already be resolved: it appears inline in every
    /// injected fragment.
    #[must_use]
    pub fn new(
        token: String,
        parameter_name: String,
        meta_name: Option<String>,
        host: Option<String>,
    ) -> Self {
        Self {
            token,
            parameter_name,
            meta_name,
            host: host.map(|h| h.to_ascii_lowercase()),
            state: State::Text,
            tag: Vec::new(),
            quote: None,
            meta_injected: false,
            closed: false,
        }
    }

    /// Process one chunk of the response body, returning zero or more output
    /// fragments. Every input byte appears in the output exactly once, in
    /// order; injected fragments are the only additions.
    pub fn write(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        if self.closed {
            return Vec::new();
        }

        let mut out = Vec::new();
        let mut i = 0;

        while i < chunk.len() {
            match self.state {
                State::Text => {
                    match chunk[i..].iter().position(|&b| b == b'<') {
                        Some(offset) => {
                            if offset > 0 {
                                out.push(Bytes::copy_from_slice(&chunk[i..i + offset]));
                            }
                            self.state = State::Markup;
                            self.quote = None;
                            self.tag.push(b'<');
                            i += offset + 1;
                        }
                        None => {
                            out.push(Bytes::copy_from_slice(&chunk[i..]));
                            i = chunk.len();
                        }
                    }
                }
                State::Markup => {
                    let b = chunk[i];
                    self.tag.push(b);
                    i += 1;

                    // Quotes only delimit attribute values inside element
                    // tags; comments and declarations (`<!`, `<?`) end at the
                    // first `>` so their free-form text cannot swallow the
                    // rest of the document.
                    let element = matches!(self.tag.get(1), Some(c) if c.is_ascii_alphabetic() || *c == b'/');
                    if element {
                        match self.quote {
                            Some(q) => {
                                if b == q {
                                    self.quote = None;
                                }
                                continue;
                            }
                            None => {
                                if b == b'"' || b == b'\'' {
                                    self.quote = Some(b);
                                    continue;
                                }
                            }
                        }
                    }

                    if b == b'>' {
                        self.state = State::Text;
                        self.quote = None;
                        let tag = std::mem::take(&mut self.tag);
                        let injection = self.inspect(&tag);
                        out.push(Bytes::from(tag));
                        if let Some(fragment) = injection {
                            out.push(Bytes::from(fragment));
                        }
                    }
                }
            }
        }

        out
    }

    /// Signal end-of-stream. Flushes any buffered partial tag verbatim and
    /// closes the rewriter.
    pub fn finish(&mut self) -> Vec<Bytes> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;
        self.state = State::Text;
        self.quote = None;

        if self.tag.is_empty() {
            Vec::new()
        } else {
            vec![Bytes::from(std::mem::take(&mut self.tag))]
        }
    }

    /// Decide whether a completed tag triggers an injection.
    fn inspect(&mut self, tag: &[u8]) -> Option<String> {
        let name = tag_name(tag)?;

        if name.eq_ignore_ascii_case("head") {
            let meta_name = self.meta_name.as_deref()?;
            if self.meta_injected {
                return None;
            }
            self.meta_injected = true;
            return Some(format!(
                r#"<meta name="{}" content="{}"/>"#,
                meta_name, self.token
            ));
        }

        if name.eq_ignore_ascii_case("form") {
            let attrs = parse_attributes(tag);
            let method = attribute(&attrs, "method")?;
            if !method.eq_ignore_ascii_case("post") {
                return None;
            }
            if self.same_origin(attribute(&attrs, "action")) {
                return Some(format!(
                    r#"<input type="hidden" name="{}" value="{}" />"#,
                    self.parameter_name, self.token
                ));
            }
        }

        None
    }

    /// Same-origin check for a form action.
    ///
    /// Only `http://` and `https://` absolute URLs are inspected; a missing
    /// or relative action is same-origin by definition. Protocol-relative
    /// (`//host/...`) actions fall through the absolute-URL match and are
    /// treated as same-origin — a known gap, preserved intentionally.
    fn same_origin(&self, action: Option<&str>) -> bool {
        let Some(action) = action else { return true };

        let rest = if starts_with_ignore_case(action, "http://") {
            &action["http://".len()..]
        } else if starts_with_ignore_case(action, "https://") {
            &action["https://".len()..]
        } else {
            return true;
        };

        let end = rest
            .find(|c| matches!(c, '/' | '?' | '#'))
            .unwrap_or(rest.len());
        let mut authority = &rest[..end];
        if let Some(at) = authority.rfind('@') {
            authority = &authority[at + 1..];
        }
        let host = authority.split(':').next().unwrap_or(authority);

        match &self.host {
            Some(own) => host.eq_ignore_ascii_case(own),
            // Unknown request host: cannot prove same-origin, do not leak.
            None => false,
        }
    }
}

impl std::fmt::Debug for HtmlRewriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HtmlRewriter")
            .field("state", &self.state)
            .field("buffered", &self.tag.len())
            .field("meta_injected", &self.meta_injected)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Element name of a start tag, or `None` for end tags, comments,
/// declarations, and anything that does not begin with a letter.
fn tag_name(tag: &[u8]) -> Option<&str> {
    let first = *tag.get(1)?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    let end = tag[1..]
        .iter()
        .position(|b| !b.is_ascii_alphanumeric())
        .map_or(tag.len() - 1, |p| p)
        + 1;
    std::str::from_utf8(&tag[1..end]).ok()
}

/// Scan the attributes of a completed tag.
///
/// Tolerates bare attributes, single-, double-, and unquoted values, and
/// arbitrary whitespace. Names are lowercased; values keep their original
/// case. First occurrence of a name wins.
fn parse_attributes(tag: &[u8]) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut i = 1;

    // Skip the element name.
    while i < tag.len() && tag[i].is_ascii_alphanumeric() {
        i += 1;
    }

    loop {
        while i < tag.len() && (tag[i].is_ascii_whitespace() || tag[i] == b'/') {
            i += 1;
        }
        if i >= tag.len() || tag[i] == b'>' {
            break;
        }

        let name_start = i;
        while i < tag.len() && !tag[i].is_ascii_whitespace() && !matches!(tag[i], b'=' | b'>' | b'/') {
            i += 1;
        }
        let name = String::from_utf8_lossy(&tag[name_start..i]).to_ascii_lowercase();

        while i < tag.len() && tag[i].is_ascii_whitespace() {
            i += 1;
        }

        let value = if i < tag.len() && tag[i] == b'=' {
            i += 1;
            while i < tag.len() && tag[i].is_ascii_whitespace() {
                i += 1;
            }
            if i < tag.len() && (tag[i] == b'"' || tag[i] == b'\'') {
                let quote = tag[i];
                i += 1;
                let value_start = i;
                while i < tag.len() && tag[i] != quote {
                    i += 1;
                }
                let value = String::from_utf8_lossy(&tag[value_start..i]).into_owned();
                if i < tag.len() {
                    i += 1; // closing quote
                }
                value
            } else {
                let value_start = i;
                while i < tag.len() && !tag[i].is_ascii_whitespace() && tag[i] != b'>' {
                    i += 1;
                }
                String::from_utf8_lossy(&tag[value_start..i]).into_owned()
            }
        } else {
            String::new()
        };

        if !name.is_empty() && !attrs.iter().any(|(n, _)| *n == name) {
            attrs.push((name, value));
        }
    }

    attrs
}

fn attribute<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}
