//! Adapts tungstenite messages to tunnel frames

use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tunnelgate_control::{Frame, TransportError};

pub fn frame_from_message(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text),
        Message::Binary(data) => Frame::Binary(data),
        Message::Ping(data) => Frame::Ping(data),
        Message::Pong(data) => Frame::Pong(data),
        Message::Close(frame) => Frame::Close(frame.map(|f| f.reason.into_owned())),
        Message::Frame(frame) => Frame::Binary(frame.into_data()),
    }
}

pub fn message_from_frame(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data),
        Frame::Ping(data) => Message::Ping(data),
        Frame::Pong(data) => Message::Pong(data),
        Frame::Close(reason) => Message::Close(reason.map(|reason| CloseFrame {
            code: CloseCode::Normal,
            reason: reason.into(),
        })),
    }
}

pub fn inbound_frames<S>(stream: S) -> impl Stream<Item = Result<Frame, TransportError>> + Unpin + Send
where
    S: Stream<Item = Result<Message, WsError>> + Unpin + Send,
{
    stream.map(|message| {
        message
            .map(frame_from_message)
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    })
}

pub fn outbound_frames<S>(sink: S) -> impl Sink<Frame, Error = TransportError> + Unpin + Send + 'static
where
    S: Sink<Message, Error = WsError> + Unpin + Send + 'static,
{
    sink.sink_map_err(|e| TransportError::WebSocket(e.to_string()))
        .with(|frame: Frame| future::ready(Ok::<_, TransportError>(message_from_frame(frame))))
}
