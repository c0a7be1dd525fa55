use crate::common::data::{Body, Request, Response};
use bytes::{BufMut, Bytes, BytesMut};
use percent_encoding::percent_decode_str;
use std::{collections::HashMap, io, net::SocketAddr};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound for a single request line, header line or chunk-size line.
pub(crate) const MAX_LINE_LENGTH: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),
    #[error("malformed chunked body: {0}")]
    ChunkFormat(String),
    #[error("line exceeds {} bytes", MAX_LINE_LENGTH)]
    LineTooLong,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Everything up to (and including) the blank line that ends the header block.
#[derive(Debug)]
pub(crate) struct RequestHead {
    pub method: String,
    pub path: String,
    pub version: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
}

impl RequestHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// `true` if the client waits for an interim `100 Continue` before it sends the body.
    pub fn expects_continue(&self) -> bool {
        self.header("expect")
            .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
            && self.framing() != BodyFraming::Empty
    }

    fn framing(&self) -> BodyFraming {
        framing(&self.headers)
    }
}

fn framing(headers: &HashMap<String, String>) -> BodyFraming {
    if let Some(length) = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
    {
        return BodyFraming::Length(length);
    }

    match headers.get("transfer-encoding") {
        Some(v) if v.eq_ignore_ascii_case("chunked") => BodyFraming::Chunked,
        _ => BodyFraming::Empty,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFraming {
    Length(usize),
    Chunked,
    Empty,
}

/// Reads one complete request from `reader`.
pub(crate) async fn decode_request<R>(
    reader: &mut R,
    remote_addr: Option<SocketAddr>,
) -> Result<Request, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let head = read_head(reader).await?;
    read_body(reader, head, remote_addr).await
}

pub(crate) async fn read_head<R>(reader: &mut R) -> Result<RequestHead, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line(reader)
        .await?
        .ok_or(ProtocolError::ConnectionClosed)?;

    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 3 {
        return Err(ProtocolError::MalformedRequestLine(line));
    }

    let (path, query) = match tokens[1].split_once('?') {
        Some((path, query)) => (path, parse_query(query)),
        None => (tokens[1], HashMap::new()),
    };

    let mut headers = HashMap::new();
    for (name, value) in read_header_block(reader).await? {
        headers.insert(name, value);
    }

    Ok(RequestHead {
        method: tokens[0].to_string(),
        path: path.to_string(),
        version: tokens[2].to_string(),
        query,
        headers,
    })
}

pub(crate) async fn read_body<R>(
    reader: &mut R,
    head: RequestHead,
    remote_addr: Option<SocketAddr>,
) -> Result<Request, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let RequestHead {
        method,
        path,
        version,
        query,
        mut headers,
    } = head;

    let body = match framing(&headers) {
        BodyFraming::Length(length) => read_exact_body(reader, length).await?,
        BodyFraming::Chunked => {
            let (body, footers) = read_chunked_body(reader).await?;
            for (name, value) in footers {
                headers.entry(name).or_insert(value);
            }
            body
        }
        BodyFraming::Empty => Bytes::new(),
    };

    Ok(Request {
        method,
        path,
        version,
        query,
        headers,
        body,
        remote_addr,
    })
}

async fn read_exact_body<R>(reader: &mut R, length: usize) -> Result<Bytes, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::with_capacity(length.min(MAX_LINE_LENGTH));
    (&mut *reader)
        .take(length as u64)
        .read_to_end(&mut body)
        .await?;

    if body.len() != length {
        return Err(ProtocolError::ConnectionClosed);
    }

    Ok(Bytes::from(body))
}

async fn read_chunked_body<R>(
    reader: &mut R,
) -> Result<(Bytes, Vec<(String, String)>), ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();

    loop {
        let line = read_line(reader)
            .await?
            .ok_or(ProtocolError::ConnectionClosed)?;

        let size = match line.split_once(';') {
            Some((size, _extension)) => size,
            None => line.as_str(),
        };
        let size = usize::from_str_radix(size.trim(), 16)
            .map_err(|_| ProtocolError::ChunkFormat(format!("invalid chunk size {:?}", line)))?;

        if size == 0 {
            break;
        }

        let start = body.len();
        (&mut *reader)
            .take(size as u64)
            .read_to_end(&mut body)
            .await?;
        if body.len() - start != size {
            return Err(ProtocolError::ConnectionClosed);
        }

        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await?;
        if &crlf != b"\r\n" {
            return Err(ProtocolError::ChunkFormat(
                "chunk data is not followed by CRLF".to_string(),
            ));
        }
    }

    let footers = read_header_block(reader).await?;
    Ok((Bytes::from(body), footers))
}

/// Reads header lines up to the terminating blank line. Names are lowercased and values
/// trimmed. Lines without a colon are skipped.
async fn read_header_block<R>(reader: &mut R) -> Result<Vec<(String, String)>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut headers = Vec::new();

    loop {
        let line = read_line(reader)
            .await?
            .ok_or(ProtocolError::ConnectionClosed)?;
        if line.is_empty() {
            return Ok(headers);
        }

        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }
}

/// Reads a single line terminated by LF (optionally preceded by CR) and returns it without
/// the line ending. Returns `None` on a clean EOF before any byte was read.
async fn read_line<R>(reader: &mut R) -> Result<Option<String>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(MAX_LINE_LENGTH as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;

    if read == 0 {
        return Ok(None);
    }

    if buf.last() != Some(&b'\n') {
        if buf.len() > MAX_LINE_LENGTH {
            return Err(ProtocolError::LineTooLong);
        }
        return Err(ProtocolError::ConnectionClosed);
    }

    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }

    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| (percent_decode(name), percent_decode(value)))
        .collect()
}

/// Decodes `%XX` escapes. Malformed escapes are kept as they are. If the decoded bytes are not
/// UTF-8 the raw text is kept instead.
fn percent_decode(value: &str) -> String {
    match percent_decode_str(value).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => value.to_string(),
    }
}

/// Writes `response` and reports whether the connection may be reused for another request.
///
/// Keep-alive is only granted when the client asked for it and the body length is known.
/// Response headers are written verbatim after the server computed ones.
pub(crate) async fn write_response<W>(
    writer: &mut W,
    response: &Response,
    keep_alive_requested: bool,
) -> io::Result<bool>
where
    W: AsyncWrite + Unpin,
{
    let content_length = response.content_length();
    let keep_alive = keep_alive_requested && content_length.is_some();

    let mut head = BytesMut::with_capacity(256);
    head.put_slice(format!("HTTP/1.1 {} {}\r\n", response.status, response.reason).as_bytes());
    if let Some(length) = content_length {
        head.put_slice(format!("Content-Length: {}\r\n", length).as_bytes());
    }
    if keep_alive {
        head.put_slice(b"Connection: keep-alive\r\n");
    }
    for (name, value) in &response.headers {
        head.put_slice(name.as_bytes());
        head.put_slice(b": ");
        head.put_slice(value.as_bytes());
        head.put_slice(b"\r\n");
    }
    head.put_slice(b"\r\n");

    match &response.body {
        Body::Full(body) => {
            head.put_slice(body);
            writer.write_all(&head).await?;
        }
        Body::Streaming(chunks) => {
            writer.write_all(&head).await?;
            for chunk in chunks {
                writer.write_all(chunk).await?;
                writer.flush().await?;
            }
        }
    }
    writer.flush().await?;

    Ok(keep_alive)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    async fn decode(raw: &[u8]) -> Result<Request, ProtocolError> {
        let mut reader = raw;
        decode_request(&mut reader, None).await
    }

    async fn encode(response: &Response, keep_alive: bool) -> (String, bool) {
        let mut out: Vec<u8> = Vec::new();
        let keep = write_response(&mut out, response, keep_alive).await.unwrap();
        (String::from_utf8(out).unwrap(), keep)
    }

    #[tokio::test]
    async fn decodes_request_with_query_headers_and_body() {
        let req = decode(
            b"POST /foo/bar?a=1&b=2 HTTP/1.1\r\nX-Eka: eka\r\nX-Toka:  toka \r\nContent-Length: 20\r\n\r\ni used to be with it",
        )
        .await
        .unwrap();

        assert_eq!(req.method(), "POST");
        assert_eq!(req.path(), "/foo/bar");
        assert_eq!(req.version(), "HTTP/1.1");
        assert_eq!(req.query_param("a"), Some("1"));
        assert_eq!(req.query_param("b"), Some("2"));
        assert_eq!(req.header("x-eka"), Some("eka"));
        assert_eq!(req.header("X-Toka"), Some("toka"));
        assert_eq!(req.body().as_ref(), b"i used to be with it");
        assert_eq!(req.endpoint(), "POST /foo/bar");
    }

    #[tokio::test]
    async fn request_line_needs_three_tokens() {
        let err = decode(b"GET /\r\n\r\n").await.unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedRequestLine(_)));
    }

    #[tokio::test]
    async fn empty_stream_is_a_closed_connection() {
        let err = decode(b"").await.unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
    }

    #[tokio::test]
    async fn query_pairs_are_decoded_and_last_duplicate_wins() {
        let req = decode(b"GET /q?name=J%C3%BCrgen&flag&x=1&x=2&bad=100%zz&e=a=b HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        assert_eq!(req.query_param("name"), Some("Jürgen"));
        assert_eq!(req.query_param("flag"), None);
        assert_eq!(req.query_param("x"), Some("2"));
        assert_eq!(req.query_param("bad"), Some("100%zz"));
        assert_eq!(req.query_param("e"), Some("a=b"));
        assert_eq!(req.query().len(), 4);
    }

    #[tokio::test]
    async fn query_escapes_of_non_utf8_bytes_stay_raw() {
        let req = decode(b"GET /q?latin1=Gr%FC%DFe&mixed=%E2%9C%93%FF HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        assert_eq!(req.query_param("latin1"), Some("Gr%FC%DFe"));
        assert_eq!(req.query_param("mixed"), Some("%E2%9C%93%FF"));
    }

    #[tokio::test]
    async fn later_headers_overwrite_earlier_ones() {
        let req = decode(b"GET / HTTP/1.1\r\nX-A: 1\r\nx-a: 2\r\nnocolon\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(req.header("x-a"), Some("2"));
        assert_eq!(req.headers().len(), 1);
    }

    #[tokio::test]
    async fn accepts_bare_lf_line_endings() {
        let req = decode(b"GET /lf HTTP/1.1\nHost: x\n\n").await.unwrap();
        assert_eq!(req.path(), "/lf");
        assert_eq!(req.header("host"), Some("x"));
    }

    #[tokio::test]
    async fn missing_content_length_means_empty_body() {
        let mut reader: &[u8] = b"POST /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        let first = decode_request(&mut reader, None).await.unwrap();
        let second = decode_request(&mut reader, None).await.unwrap();
        assert!(first.body().is_empty());
        assert_eq!(second.path(), "/b");
    }

    #[tokio::test]
    async fn non_numeric_content_length_is_ignored() {
        let req = decode(b"POST / HTTP/1.1\r\nContent-Length: lots\r\n\r\n")
            .await
            .unwrap();
        assert!(req.body().is_empty());
    }

    #[tokio::test]
    async fn truncated_body_fails() {
        let err = decode(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc")
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
    }

    #[tokio::test]
    async fn decodes_chunked_body_with_extensions() {
        let req = decode(
            b"POST /up HTTP/1.1\r\nTransfer-Encoding: Chunked\r\n\r\n4;name=x\r\nWiki\r\n5\r\npedia\r\nE\r\n in\r\n\r\nchunks.\r\n0;done\r\n\r\n",
        )
        .await
        .unwrap();
        assert_eq!(req.body().as_ref(), b"Wikipedia in\r\n\r\nchunks.");
    }

    #[tokio::test]
    async fn footers_do_not_overwrite_existing_headers() {
        let req = decode(
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\nX-Sum: original\r\n\r\n3\r\nabc\r\n0\r\nX-Sum: footer\r\nX-Extra: more\r\n\r\n",
        )
        .await
        .unwrap();
        assert_eq!(req.body().as_ref(), b"abc");
        assert_eq!(req.header("x-sum"), Some("original"));
        assert_eq!(req.header("x-extra"), Some("more"));
        assert_eq!(req.header("transfer-encoding"), Some("chunked"));
    }

    #[tokio::test]
    async fn chunk_without_trailing_crlf_fails() {
        let err = decode(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabcXY0\r\n\r\n")
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ChunkFormat(_)));
    }

    #[tokio::test]
    async fn invalid_chunk_size_fails() {
        let err = decode(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n")
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ChunkFormat(_)));
    }

    #[tokio::test]
    async fn content_length_takes_precedence_over_chunked() {
        let req = decode(
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\nContent-Length: 3\r\n\r\nabc",
        )
        .await
        .unwrap();
        assert_eq!(req.body().as_ref(), b"abc");
    }

    #[tokio::test]
    async fn overlong_line_is_rejected() {
        let mut raw = b"GET /".to_vec();
        raw.extend(std::iter::repeat(b'a').take(MAX_LINE_LENGTH + 10));
        raw.extend_from_slice(b" HTTP/1.1\r\n\r\n");
        let err = decode(&raw).await.unwrap_err();
        assert!(matches!(err, ProtocolError::LineTooLong));
    }

    #[tokio::test]
    async fn head_reports_expect_continue_only_with_body() {
        let mut reader: &[u8] =
            b"POST / HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 2\r\n\r\n";
        assert!(read_head(&mut reader).await.unwrap().expects_continue());

        let mut reader: &[u8] = b"GET / HTTP/1.1\r\nExpect: 100-continue\r\n\r\n";
        assert!(!read_head(&mut reader).await.unwrap().expects_continue());
    }

    #[tokio::test]
    async fn encodes_known_length_response_with_keep_alive() {
        let mut response = Response::new(201);
        response.headers.push(("X-Custom".into(), "yes".into()));
        response.body = Body::Full(Bytes::from_static(b"hello"));

        let (wire, keep_alive) = encode(&response, true).await;
        assert!(keep_alive);
        assert_eq!(
            wire,
            "HTTP/1.1 201 Created\r\nContent-Length: 5\r\nConnection: keep-alive\r\nX-Custom: yes\r\n\r\nhello"
        );
    }

    #[tokio::test]
    async fn never_writes_connection_close() {
        let (wire, keep_alive) = encode(&Response::new(204), false).await;
        assert!(!keep_alive);
        assert_eq!(wire, "HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n");
    }

    #[tokio::test]
    async fn streaming_body_refuses_keep_alive() {
        let mut response = Response::new(200);
        response.body = Body::Streaming(vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")]);

        let (wire, keep_alive) = encode(&response, true).await;
        assert!(!keep_alive);
        assert_eq!(wire, "HTTP/1.1 200 OK\r\n\r\nabcd");
    }

    #[tokio::test]
    async fn explicit_headers_are_written_verbatim_and_in_order() {
        let mut response = Response::new(200);
        response.delay = Duration::from_millis(1);
        for (name, value) in [
            ("Server", "custom"),
            ("Date", "yesterday"),
            ("Connection", "close"),
            ("set-cookie", "a=1"),
            ("set-cookie", "b=2"),
        ] {
            response.headers.push((name.into(), value.into()));
        }

        let (wire, _) = encode(&response, false).await;
        assert!(wire.ends_with(
            "Server: custom\r\nDate: yesterday\r\nConnection: close\r\nset-cookie: a=1\r\nset-cookie: b=2\r\n\r\n"
        ));
    }
}
