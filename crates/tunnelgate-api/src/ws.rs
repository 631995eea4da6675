//! Adapts axum WebSocket messages to tunnel frames

use axum::extract::ws::{close_code, CloseFrame, Message};
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tunnelgate_control::{Frame, TransportError};

pub fn frame_from_message(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text.to_string()),
        Message::Binary(data) => Frame::Binary(data.to_vec()),
        Message::Ping(data) => Frame::Ping(data.to_vec()),
        Message::Pong(data) => Frame::Pong(data.to_vec()),
        Message::Close(frame) => Frame::Close(frame.map(|f| f.reason.to_string())),
    }
}

pub fn message_from_frame(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data.into()),
        Frame::Ping(data) => Message::Ping(data.into()),
        Frame::Pong(data) => Message::Pong(data.into()),
        Frame::Close(reason) => Message::Close(reason.map(|reason| CloseFrame {
            code: close_code::NORMAL,
            reason: reason.into(),
        })),
    }
}

/// Read half of an upgraded socket as a stream of frames
pub fn inbound_frames<S>(stream: S) -> impl Stream<Item = Result<Frame, TransportError>> + Unpin + Send
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
{
    stream.map(|message| {
        message
            .map(frame_from_message)
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    })
}

/// Write half of an upgraded socket as a sink of frames
pub fn outbound_frames<S>(sink: S) -> impl Sink<Frame, Error = TransportError> + Unpin + Send + 'static
where
    S: Sink<Message, Error = axum::Error> + Unpin + Send + 'static,
{
    sink.sink_map_err(|e| TransportError::WebSocket(e.to_string()))
        .with(|frame: Frame| future::ready(Ok::<_, TransportError>(message_from_frame(frame))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_and_binary_frames() {
        assert_eq!(
            frame_from_message(Message::Text("{\"a\":1}".into())),
            Frame::Text("{\"a\":1}".to_string())
        );
        assert_eq!(
            frame_from_message(Message::Binary(vec![1u8, 2, 3].into())),
            Frame::Binary(vec![1, 2, 3])
        );
    }

    #[test]
    fn test_close_frame_keeps_reason() {
        let message = message_from_frame(Frame::Close(Some("bye".to_string())));
        match message {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, close_code::NORMAL);
                assert_eq!(frame.reason.as_str(), "bye");
            }
            other => panic!("Expected close frame, got {:?}", other),
        }

        assert_eq!(frame_from_message(Message::Close(None)), Frame::Close(None));
    }

    #[tokio::test]
    async fn test_inbound_stream_maps_errors() {
        let messages = futures::stream::iter(vec![
            Ok(Message::Text("hello".into())),
            Err(axum::Error::new(std::io::Error::other("reset"))),
        ]);
        let mut frames = inbound_frames(messages);

        assert_eq!(
            frames.next().await.unwrap().unwrap(),
            Frame::Text("hello".to_string())
        );
        assert!(matches!(
            frames.next().await.unwrap(),
            Err(TransportError::WebSocket(_))
        ));
        assert!(frames.next().await.is_none());
    }
}
