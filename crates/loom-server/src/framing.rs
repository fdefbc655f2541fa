//! Line framing on top of `WebSocket` frames.
//!
//! Frame boundaries carry no meaning: text and binary frames are concatenated
//! into one byte stream which is split on `\n`. A line may therefore span
//! several frames and a frame may carry several lines. Lines stay raw bytes;
//! whether they hold valid UTF-8 JSON is decided per line by the dispatcher.

use std::io;

use axum::extract::ws::Message as WsMessage;
use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tokio_util::io::StreamReader;

/// Stream of raw lines over a stream of frame payloads.
pub type LineReader<S> = FramedRead<StreamReader<S, Bytes>, AnyDelimiterCodec>;

/// Split a stream of frame payloads into lines of at most `max_line_bytes`.
///
/// Lines are yielded without the `\n`. A line longer than the limit yields
/// `AnyDelimiterCodecError::MaxChunkLengthExceeded`. Data left without a
/// trailing newline when the stream ends is still yielded.
pub fn line_reader<S>(frames: S, max_line_bytes: usize) -> LineReader<S>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    FramedRead::new(
        StreamReader::new(frames),
        AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), b"\n".to_vec(), max_line_bytes),
    )
}

/// Map an axum `WebSocket` receive stream to frame payloads.
///
/// Ping and pong frames are skipped, a close frame ends the stream, and
/// transport errors surface as `io::Error`.
pub fn websocket_frames<S>(socket: S) -> impl Stream<Item = io::Result<Bytes>>
where
    S: Stream<Item = Result<WsMessage, axum::Error>> + Unpin,
{
    stream::unfold(socket, |mut socket| async move {
        loop {
            let payload = match socket.next().await? {
                Ok(WsMessage::Text(text)) => Ok(Bytes::copy_from_slice(text.as_str().as_bytes())),
                Ok(WsMessage::Binary(data)) => Ok(data),
                Ok(WsMessage::Ping(_) | WsMessage::Pong(_)) => continue,
                Ok(WsMessage::Close(_)) => return None,
                Err(e) => Err(io::Error::other(e)),
            };
            return Some((payload, socket));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::codec::AnyDelimiterCodecError;

    fn frames(chunks: &[&'static str]) -> impl Stream<Item = io::Result<Bytes>> + Unpin {
        stream::iter(
            chunks
                .iter()
                .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    async fn collect_lines<S>(reader: LineReader<S>) -> Vec<String>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
    {
        reader
            .map(|line| String::from_utf8(line.unwrap().to_vec()).unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn one_line_per_frame() {
        let reader = line_reader(frames(&["{\"id\":\"1\"}\n", "{\"id\":\"2\"}\n"]), 1024);
        assert_eq!(collect_lines(reader).await, vec!["{\"id\":\"1\"}", "{\"id\":\"2\"}"]);
    }

    #[tokio::test]
    async fn several_lines_in_one_frame() {
        let reader = line_reader(frames(&["a\nb\nc\n"]), 1024);
        assert_eq!(collect_lines(reader).await, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn line_split_across_frames() {
        let reader = line_reader(frames(&["{\"id\":", "\"7\",\"method\"", ":\"x\"}\n"]), 1024);
        assert_eq!(collect_lines(reader).await, vec!["{\"id\":\"7\",\"method\":\"x\"}"]);
    }

    #[tokio::test]
    async fn trailing_data_without_newline_is_flushed() {
        let reader = line_reader(frames(&["first\nsecond"]), 1024);
        assert_eq!(collect_lines(reader).await, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn carriage_returns_are_left_for_the_decoder() {
        let reader = line_reader(frames(&["x\r\n"]), 1024);
        assert_eq!(collect_lines(reader).await, vec!["x\r"]);
    }

    #[tokio::test]
    async fn invalid_utf8_line_does_not_stop_the_stream() {
        let input = stream::iter(vec![
            Ok(Bytes::from_static(b"\xff\xfe\n")),
            Ok(Bytes::from_static(b"{\"id\":\"1\"}\n")),
        ]);
        let mut reader = line_reader(input, 1024);
        assert_eq!(reader.next().await.unwrap().unwrap(), Bytes::from_static(b"\xff\xfe"));
        assert_eq!(
            reader.next().await.unwrap().unwrap(),
            Bytes::from_static(b"{\"id\":\"1\"}")
        );
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn overlong_line_is_an_error() {
        let mut reader = line_reader(frames(&["aaaaaaaaaaaaaaaa\n"]), 8);
        let first = reader.next().await.unwrap();
        assert!(matches!(first, Err(AnyDelimiterCodecError::MaxChunkLengthExceeded)));
    }

    #[tokio::test]
    async fn websocket_frames_skip_control_and_stop_at_close() {
        let input = stream::iter(vec![
            Ok(WsMessage::Text("a\n".into())),
            Ok(WsMessage::Ping(Bytes::new())),
            Ok(WsMessage::Binary(Bytes::from_static(b"b\n"))),
            Ok(WsMessage::Pong(Bytes::new())),
            Ok(WsMessage::Close(None)),
            Ok(WsMessage::Text("after close\n".into())),
        ]);
        let reader = line_reader(Box::pin(websocket_frames(input)), 1024);
        assert_eq!(collect_lines(reader).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn websocket_transport_error_surfaces_as_io() {
        let input = stream::iter(vec![Err(axum::Error::new(io::Error::other("reset")))]);
        let mut reader = line_reader(Box::pin(websocket_frames(input)), 1024);
        let first = reader.next().await.unwrap();
        assert!(matches!(first, Err(AnyDelimiterCodecError::Io(_))));
    }
}
