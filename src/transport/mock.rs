//! Scripted in-memory printer.
//!
//! Every frame written to a [`MockTransport`] is decoded and handed to a
//! responder closure; whatever frames the responder returns are queued for
//! the next `receive`. An empty queue times out immediately, so tests of
//! deadline handling run without waiting.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Transport, TransportKind};
use crate::error::EtiquetaError;
use crate::protocol::commands::{Command, PrintStatus, STATUS_OK};
use crate::protocol::packet::{self, Packet, PacketReader};

/// Maps one received request to the raw frames sent back.
pub type Responder = Box<dyn FnMut(&Packet) -> Vec<Vec<u8>> + Send>;

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    selector: Option<String>,
    connects: usize,
    disconnects: usize,
    sends: Vec<Vec<u8>>,
    packets: Vec<Packet>,
    inbox: VecDeque<Vec<u8>>,
    drop_after_sends: Option<usize>,
    refuse_connect: bool,
}

/// Frame a response with the given command id.
pub fn frame(command: u8, payload: &[u8]) -> Vec<u8> {
    // Mock payloads are short; an oversized one is a broken test script.
    packet::encode(command, payload).unwrap_or_default()
}

/// Ack `command` with status OK (or an idle status for PrintStatus).
pub fn ack(command: Command) -> Vec<u8> {
    match command {
        Command::PrintStatus => frame(command.ack_id(), &PrintStatus::idle_payload(1)),
        _ => frame(command.ack_id(), &[STATUS_OK]),
    }
}

pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    responder: Responder,
    reader: PacketReader,
}

impl MockTransport {
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&Packet) -> Vec<Vec<u8>> + Send + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            responder: Box::new(responder),
            reader: PacketReader::new(),
        }
    }

    /// A printer that acknowledges every known command.
    pub fn acking() -> Self {
        Self::with_responder(|packet| match Command::from_id(packet.command) {
            Some(command) => vec![ack(command)],
            None => Vec::new(),
        })
    }

    /// A printer that never answers.
    pub fn silent() -> Self {
        Self::with_responder(|_| Vec::new())
    }

    /// Fail every send after the first `sends` with an I/O error, as if the
    /// link dropped.
    pub fn drop_link_after(self, sends: usize) -> Self {
        self.state.lock().drop_after_sends = Some(sends);
        self
    }

    /// Fail `connect` with a connection error.
    pub fn refuse_connect(self) -> Self {
        self.state.lock().refuse_connect = true;
        self
    }

    /// Inspection handle that stays valid after the transport is moved.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: self.state.clone(),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self, selector: &str) -> Result<(), EtiquetaError> {
        let mut state = self.state.lock();
        if state.refuse_connect {
            return Err(EtiquetaError::Connection(format!(
                "mock device '{}' refused the connection",
                selector
            )));
        }
        if !state.connected {
            state.connected = true;
            state.connects += 1;
            state.selector = Some(selector.to_string());
        }
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), EtiquetaError> {
        {
            let mut state = self.state.lock();
            if !state.connected {
                return Err(EtiquetaError::Connection("mock is not connected".to_string()));
            }
            if state.drop_after_sends.is_some_and(|n| state.sends.len() >= n) {
                state.connected = false;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock link dropped").into());
            }
            state.sends.push(data.to_vec());
        }

        self.reader.push(data);
        loop {
            match self.reader.next_packet() {
                Ok(Some(packet)) => {
                    let replies = (self.responder)(&packet);
                    let mut state = self.state.lock();
                    state.packets.push(packet);
                    state.inbox.extend(replies);
                }
                Ok(None) => break,
                Err(e) => tracing::warn!("Mock received a bad frame: {}", e),
            }
        }
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, EtiquetaError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(EtiquetaError::Connection("mock is not connected".to_string()));
        }
        state
            .inbox
            .pop_front()
            .ok_or_else(|| EtiquetaError::timeout(timeout, "mock response"))
    }

    async fn disconnect(&mut self) {
        let mut state = self.state.lock();
        if state.connected {
            state.connected = false;
            state.disconnects += 1;
        }
        state.inbox.clear();
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Mock
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }
}

/// Read-only view of a [`MockTransport`]'s activity.
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    /// Every request frame received, decoded.
    pub fn sent_packets(&self) -> Vec<Packet> {
        self.state.lock().packets.clone()
    }

    /// Every request received, as commands. Unknown opcodes are skipped.
    pub fn sent_commands(&self) -> Vec<Command> {
        self.state
            .lock()
            .packets
            .iter()
            .filter_map(|p| Command::from_id(p.command))
            .collect()
    }

    /// Raw buffers passed to `send`, in order.
    pub fn sent_bytes(&self) -> Vec<Vec<u8>> {
        self.state.lock().sends.clone()
    }

    pub fn send_count(&self) -> usize {
        self.state.lock().sends.len()
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.lock().disconnects
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn selector(&self) -> Option<String> {
        self.state.lock().selector.clone()
    }

    /// Queue unsolicited bytes for the next `receive`.
    pub fn push_response(&self, bytes: Vec<u8>) {
        self.state.lock().inbox.push_back(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::commands;

    #[tokio::test]
    async fn test_acking_mock_answers_each_request() {
        let mut mock = MockTransport::acking();
        let handle = mock.handle();
        mock.connect("mock").await.unwrap();

        mock.send(&commands::set_density(3).encode().unwrap())
            .await
            .unwrap();
        let reply = mock.receive(Duration::from_millis(1)).await.unwrap();

        let (packet, _) = packet::decode(&reply).unwrap();
        assert_eq!(packet.command, Command::SetDensity.ack_id());
        assert_eq!(handle.sent_commands(), vec![Command::SetDensity]);
    }

    #[tokio::test]
    async fn test_split_frames_are_reassembled() {
        let mut mock = MockTransport::acking();
        let handle = mock.handle();
        mock.connect("mock").await.unwrap();

        let frame = commands::end_print().encode().unwrap();
        mock.send(&frame[..3]).await.unwrap();
        assert!(handle.sent_packets().is_empty());
        mock.send(&frame[3..]).await.unwrap();
        assert_eq!(handle.sent_commands(), vec![Command::EndPrint]);
        assert_eq!(handle.send_count(), 2);
    }

    #[tokio::test]
    async fn test_silent_mock_times_out() {
        let mut mock = MockTransport::silent();
        mock.connect("mock").await.unwrap();
        mock.send(&commands::print_status().encode().unwrap())
            .await
            .unwrap();

        let err = mock.receive(Duration::from_secs(3)).await.unwrap_err();
        assert!(matches!(err, EtiquetaError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_drop_link_after() {
        let mut mock = MockTransport::acking().drop_link_after(1);
        let handle = mock.handle();
        mock.connect("mock").await.unwrap();

        let frame = commands::print_status().encode().unwrap();
        mock.send(&frame).await.unwrap();
        assert!(matches!(mock.send(&frame).await, Err(EtiquetaError::Io(_))));
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_counts_once() {
        let mut mock = MockTransport::acking();
        let handle = mock.handle();
        mock.connect("mock").await.unwrap();

        mock.disconnect().await;
        mock.disconnect().await;
        assert_eq!(handle.disconnect_count(), 1);
        assert_eq!(handle.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_refuse_connect() {
        let mut mock = MockTransport::acking().refuse_connect();
        assert!(matches!(
            mock.connect("nowhere").await,
            Err(EtiquetaError::Connection(_))
        ));
    }
}
