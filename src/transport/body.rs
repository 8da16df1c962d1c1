use std::convert::Infallible;
use std::error::Error as StdError;
use std::path::Path;

use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream};
use http::{HeaderMap, Method, Request, Uri};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;

use crate::request::ProgressHook;
use crate::transport::Progress;
use crate::wire::WireBody;

type BoxBodyError = Box<dyn StdError + Send + Sync>;
pub(crate) type ReqBody = BoxBody<Bytes, BoxBodyError>;

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

fn map_infallible_to_box_error(never: Infallible) -> BoxBodyError {
    match never {}
}

pub(crate) fn empty_req_body() -> ReqBody {
    Full::new(Bytes::new())
        .map_err(map_infallible_to_box_error)
        .boxed()
}

pub(crate) fn buffered_req_body(body: Bytes) -> ReqBody {
    Full::new(body).map_err(map_infallible_to_box_error).boxed()
}

pub(crate) fn stream_req_body<S, E>(stream: S) -> ReqBody
where
    S: Stream<Item = Result<Bytes, E>> + Send + Sync + 'static,
    E: StdError + Send + Sync + 'static,
{
    BodyExt::boxed(StreamBody::new(stream.map(|item| {
        item.map(Frame::data)
            .map_err(|error| Box::new(error) as BoxBodyError)
    })))
}

/// Reports cumulative upload progress as chunks are handed to the connection.
fn with_upload_progress<S, E>(
    chunks: S,
    total: u64,
    hook: Option<ProgressHook>,
) -> impl Stream<Item = Result<Bytes, E>> + Send + Sync + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    let mut sent = 0_u64;
    chunks.map(move |chunk| {
        if let (Ok(data), Some(hook)) = (&chunk, &hook) {
            sent = sent.saturating_add(data.len() as u64);
            hook.emit(Progress {
                completed: sent,
                total: Some(total),
            });
        }
        chunk
    })
}

pub(crate) async fn wire_req_body(
    body: WireBody,
    upload_progress: Option<ProgressHook>,
) -> std::io::Result<ReqBody> {
    match body {
        WireBody::Empty => Ok(empty_req_body()),
        WireBody::Buffered(body) if upload_progress.is_none() => Ok(buffered_req_body(body)),
        WireBody::Buffered(body) => {
            let total = body.len() as u64;
            let chunks: Vec<Result<Bytes, std::io::Error>> = (0..body.len())
                .step_by(UPLOAD_CHUNK_SIZE)
                .map(|start| Ok(body.slice(start..(start + UPLOAD_CHUNK_SIZE).min(body.len()))))
                .collect();
            Ok(stream_req_body(with_upload_progress(
                stream::iter(chunks),
                total,
                upload_progress,
            )))
        }
        WireBody::File { path, len } => {
            let reader = open_file_body(&path, len).await?;
            let chunks = ReaderStream::with_capacity(reader, UPLOAD_CHUNK_SIZE);
            Ok(stream_req_body(with_upload_progress(
                chunks,
                len,
                upload_progress,
            )))
        }
    }
}

async fn open_file_body(path: &Path, len: u64) -> std::io::Result<tokio::io::Take<tokio::fs::File>> {
    let file = tokio::fs::File::open(path).await?;
    Ok(file.take(len))
}

pub(crate) fn build_http_request(
    method: Method,
    uri: Uri,
    headers: &HeaderMap,
    body: ReqBody,
) -> Result<Request<ReqBody>, http::Error> {
    let mut request_builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        request_builder = request_builder.header(name, value);
    }
    request_builder.body(body)
}

pub(crate) async fn read_all_body(
    mut body: Incoming,
    total: Option<u64>,
    download_progress: Option<&ProgressHook>,
) -> Result<Bytes, hyper::Error> {
    let mut collected = Vec::with_capacity(total.unwrap_or(0).min(1 << 20) as usize);

    while let Some(frame) = body.frame().await {
        let frame = frame?;
        if let Some(data) = frame.data_ref() {
            collected.extend_from_slice(data);
            if let Some(hook) = download_progress {
                hook.emit(Progress {
                    completed: collected.len() as u64,
                    total,
                });
            }
        }
    }

    Ok(Bytes::from(collected))
}
