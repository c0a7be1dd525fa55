use crate::{
    common::data::Request,
    server::{
        codec::{self, ProtocolError},
        handler::Handler,
    },
};
use std::{io, net::SocketAddr, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::oneshot,
};

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Serves requests on one connection until the client goes away, a request cannot be decoded,
/// or a response ends the connection.
pub(crate) async fn serve_connection<S, H>(
    stream: S,
    remote_addr: Option<SocketAddr>,
    handler: Arc<H>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    H: Handler + Send + Sync + 'static,
{
    tracing::trace!("New TCP connection from {:?}", remote_addr);
    let mut stream = BufReader::new(stream);

    loop {
        match exchange(&mut stream, remote_addr, &handler).await {
            Ok(true) => continue,
            Ok(false) => break,
            Err(ProtocolError::ConnectionClosed) => {
                tracing::trace!("Connection from {:?} closed by peer", remote_addr);
                break;
            }
            Err(err) => {
                tracing::debug!("Dropping connection from {:?}: {}", remote_addr, err);
                break;
            }
        }
    }

    if let Err(err) = stream.shutdown().await {
        tracing::trace!("Cannot shut down connection from {:?}: {}", remote_addr, err);
    }
}

/// Runs one request/response exchange. Returns `true` if the connection stays open.
async fn exchange<S, H>(
    stream: &mut BufReader<S>,
    remote_addr: Option<SocketAddr>,
    handler: &Arc<H>,
) -> Result<bool, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    H: Handler + Send + Sync + 'static,
{
    let head = codec::read_head(stream).await?;
    if head.expects_continue() {
        stream.write_all(CONTINUE).await?;
        stream.flush().await?;
    }

    let req = Arc::new(codec::read_body(stream, head, remote_addr).await?);
    tracing::trace!("Decoded request {}", req);

    let keep_alive = wants_keep_alive(&req);
    handler.record(&req);

    let (sender, receiver) = oneshot::channel();
    let job_handler = handler.clone();
    tokio::spawn(async move {
        let response = job_handler.handle(req).await;
        let _ = sender.send(response);
    });

    let response = receiver
        .await
        .map_err(|_| io::Error::other("response job ended without a response"))?;

    Ok(codec::write_response(stream, &response, keep_alive).await?)
}

/// `Connection: close` always ends the connection and `Connection: keep-alive` always asks to
/// keep it. Without either token HTTP/1.1 connections are persistent and older ones are not.
fn wants_keep_alive(req: &Request) -> bool {
    if let Some(connection) = req.header("connection") {
        let mut tokens = connection.split(',').map(str::trim);
        if tokens.clone().any(|t| t.eq_ignore_ascii_case("close")) {
            return false;
        }
        if tokens.any(|t| t.eq_ignore_ascii_case("keep-alive")) {
            return true;
        }
    }

    req.version.eq_ignore_ascii_case("HTTP/1.1")
}
