#![allow(dead_code)]
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use ws_supervisor::*;

/// Client end of an in-memory connection.
pub struct Peer {
    pub reader: FrameReader<ReadHalf<DuplexStream>>,
    pub writer: WriteHalf<DuplexStream>,
}

impl Peer {
    pub async fn send(&mut self, frame: Frame) {
        let mut bytes = vec![];
        frame.encode(Role::Client, &mut bytes);
        self.writer.write_all(&bytes).await.unwrap();
    }

    /// Write a frame the way a server would, i.e. without masking it.
    pub async fn send_unmasked(&mut self, frame: Frame) {
        let mut bytes = vec![];
        frame.encode(Role::Server, &mut bytes);
        self.writer.write_all(&bytes).await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    pub async fn recv(&mut self) -> Frame {
        self.reader.read_frame().await.unwrap()
    }

    pub async fn recv_close(&mut self) -> Option<u16> {
        let frame = self.recv().await;
        assert_eq!(frame.opcode(), Opcode::Close);
        frame.close_status()
    }

    /// Whether the server has shut its side of the transport down.
    pub async fn is_disconnected(&mut self) -> bool {
        matches!(self.reader.read_frame().await, Err(err) if err.is_transport())
    }
}

pub fn connect_with(registry: &Registry, config: Config) -> (Arc<Websocket>, Incoming, Peer) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (ws, incoming) = Websocket::serve_with(server, config, registry);
    let (reader, writer) = tokio::io::split(client);
    let peer = Peer {
        reader: FrameReader::new(reader, Role::Client),
        writer,
    };
    (ws, incoming, peer)
}

pub fn connect(registry: &Registry) -> (Arc<Websocket>, Incoming, Peer) {
    connect_with(registry, Config::default())
}
