//! Buffered response shared by every dispatch of one request.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

use crate::session::cookie::SessionCookie;
use crate::webapp::error::{EngineError, ServiceError};

/// Status and message recorded by [`WebResponse::send_error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorStatus {
    pub status: u16,
    pub message: Option<String>,
}

/// A fully buffered response.
///
/// The body is written to the transport only after the outermost dispatch
/// returns. While an include is in progress (`include_depth > 0`) status and
/// header mutations are ignored; only the body is appended.
#[derive(Debug)]
pub struct WebResponse {
    status: u16,
    headers: HeaderMap,
    body: Vec<u8>,
    committed: bool,
    closed: bool,
    output_discarded: bool,
    include_depth: usize,
    error: Option<ErrorStatus>,
}

impl Default for WebResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl WebResponse {
    pub fn new() -> Self {
        Self {
            status: 200,
            headers: HeaderMap::new(),
            body: Vec::new(),
            committed: false,
            closed: false,
            output_discarded: false,
            include_depth: 0,
            error: None,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) {
        if self.include_depth > 0 || self.committed {
            return;
        }
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Replace a header value. Ignored inside an include.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), ServiceError> {
        if self.include_depth > 0 || self.committed {
            return Ok(());
        }
        let (name, value) = parse_header(name, value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Append a header value. Ignored inside an include.
    pub fn add_header(&mut self, name: &str, value: &str) -> Result<(), ServiceError> {
        if self.include_depth > 0 || self.committed {
            return Ok(());
        }
        let (name, value) = parse_header(name, value)?;
        self.headers.append(name, value);
        Ok(())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn set_content_type(&mut self, content_type: &str) -> Result<(), ServiceError> {
        self.set_header(header::CONTENT_TYPE.as_str(), content_type)
    }

    /// Emit a `Set-Cookie` header for `cookie`. Ignored inside an include.
    pub fn add_cookie(&mut self, cookie: &SessionCookie) -> Result<(), ServiceError> {
        self.add_header(header::SET_COOKIE.as_str(), &cookie.to_header_value())
    }

    /// Emit the session tracking cookie, even inside an include or after commit.
    ///
    /// The body reaches the transport only after the outermost dispatch, so a
    /// session created by an included resource can still be tracked.
    pub(crate) fn add_session_cookie(&mut self, cookie: &SessionCookie) -> Result<(), ServiceError> {
        let (name, value) = parse_header(header::SET_COOKIE.as_str(), &cookie.to_header_value())?;
        self.headers.append(name, value);
        Ok(())
    }

    /// Append to the body. Ignored once a forward has completed the response.
    pub fn write(&mut self, bytes: &[u8]) {
        if self.closed {
            return;
        }
        self.body.extend_from_slice(bytes);
    }

    pub fn write_str(&mut self, text: &str) {
        self.write(text.as_bytes());
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Discard buffered body output before a forward.
    pub fn reset_buffer(&mut self) {
        if !self.body.is_empty() {
            self.output_discarded = true;
            self.body.clear();
        }
    }

    /// Mark the response complete; later status and header changes are ignored.
    pub fn flush_buffer(&mut self) {
        self.committed = true;
    }

    /// Commit and stop accepting body output; used at the end of a forward.
    pub(crate) fn close(&mut self) {
        self.committed = true;
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// True when a forward dropped output written before it.
    pub fn is_output_discarded(&self) -> bool {
        self.output_discarded
    }

    pub fn include_depth(&self) -> usize {
        self.include_depth
    }

    pub(crate) fn enter_include(&mut self) {
        self.include_depth += 1;
    }

    pub(crate) fn exit_include(&mut self) {
        self.include_depth = self.include_depth.saturating_sub(1);
    }

    /// Request an error response; the front door routes it to an error page.
    pub fn send_error(&mut self, status: u16, message: Option<&str>) -> Result<(), EngineError> {
        if self.committed {
            return Err(EngineError::DispatchState(
                "cannot send an error after the response was committed".to_string(),
            ));
        }
        self.body.clear();
        self.status = status;
        self.error = Some(ErrorStatus {
            status,
            message: message.map(str::to_string),
        });
        Ok(())
    }

    pub fn error(&self) -> Option<&ErrorStatus> {
        self.error.as_ref()
    }

    pub(crate) fn take_error(&mut self) -> Option<ErrorStatus> {
        self.error.take()
    }

    /// Reset everything for an error dispatch, keeping cookies already issued.
    pub(crate) fn reset_for_error(&mut self, status: u16) {
        let cookies: Vec<HeaderValue> = self
            .headers
            .get_all(header::SET_COOKIE)
            .iter()
            .cloned()
            .collect();
        self.headers.clear();
        for cookie in cookies {
            self.headers.append(header::SET_COOKIE, cookie);
        }
        self.body.clear();
        self.committed = false;
        self.closed = false;
        self.include_depth = 0;
        self.status = status;
    }

    /// Split into status, headers and body for the transport.
    pub fn into_parts(self) -> (u16, HeaderMap, Vec<u8>) {
        (self.status, self.headers, self.body)
    }
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), ServiceError> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| ServiceError::Failed(format!("invalid header name '{}': {}", name, e)))?;
    let value = HeaderValue::from_str(value)
        .map_err(|e| ServiceError::Failed(format!("invalid header value: {}", e)))?;
    Ok((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_include_ignores_status_and_headers() {
        let mut resp = WebResponse::new();
        resp.enter_include();
        resp.set_status(404);
        resp.set_header("x-test", "1").unwrap();
        resp.write_str("body");
        resp.exit_include();

        assert_eq!(resp.status(), 200);
        assert!(resp.header("x-test").is_none());
        assert_eq!(resp.body_text(), "body");
    }

    #[test]
    fn test_session_cookie_survives_include_and_commit() {
        let config = crate::session::cookie::SessionCookieConfig::default();
        let cookie = config.cookie_for("abc", "/app");
        let mut resp = WebResponse::new();
        resp.enter_include();
        resp.add_cookie(&cookie).unwrap();
        assert!(resp.header("set-cookie").is_none());

        resp.add_session_cookie(&cookie).unwrap();
        resp.exit_include();
        resp.flush_buffer();
        resp.add_session_cookie(&config.cookie_for("def", "/app")).unwrap();
        assert_eq!(resp.headers().get_all("set-cookie").iter().count(), 2);
    }

    #[test]
    fn test_reset_buffer_marks_discarded() {
        let mut resp = WebResponse::new();
        resp.reset_buffer();
        assert!(!resp.is_output_discarded());

        resp.write_str("early");
        resp.reset_buffer();
        assert!(resp.is_output_discarded());
        assert!(resp.body().is_empty());
    }

    #[test]
    fn test_writes_ignored_after_close() {
        let mut resp = WebResponse::new();
        resp.write_str("forwarded");
        resp.close();
        resp.write_str(" trailing");
        assert_eq!(resp.body_text(), "forwarded");
        assert!(resp.is_committed());
    }

    #[test]
    fn test_send_error_after_commit_fails() {
        let mut resp = WebResponse::new();
        resp.flush_buffer();
        assert!(resp.send_error(500, None).is_err());
    }

    #[test]
    fn test_reset_for_error_keeps_cookies() {
        let mut resp = WebResponse::new();
        resp.add_header("set-cookie", "JSESSIONID=a").unwrap();
        resp.set_header("x-other", "1").unwrap();
        resp.write_str("partial");
        resp.reset_for_error(500);

        assert_eq!(resp.status(), 500);
        assert_eq!(resp.header("set-cookie"), Some("JSESSIONID=a"));
        assert!(resp.header("x-other").is_none());
        assert!(resp.body().is_empty());
    }

    #[test]
    fn test_invalid_header_is_error() {
        let mut resp = WebResponse::new();
        assert!(resp.set_header("bad header", "v").is_err());
    }
}
