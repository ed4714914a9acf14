//! End-to-end session behaviour against the mock printer.

use pretty_assertions::assert_eq;

use etiqueta::config::SessionConfig;
use etiqueta::error::{ErrorKind, EtiquetaError, ProtocolError};
use etiqueta::protocol::Command;
use etiqueta::protocol::packet::{self, Packet};
use etiqueta::raster::RasterImage;
use etiqueta::session::{PrinterSession, SessionState};
use etiqueta::transport::MockTransport;
use etiqueta::transport::mock::{ack, frame};

fn fast_polls() -> SessionConfig {
    SessionConfig {
        status_poll_initial_ms: 1,
        status_poll_max_ms: 4,
        ..SessionConfig::default()
    }
}

fn stripes() -> RasterImage {
    RasterImage::from_fn(64, 472, |x, y| (100..300).contains(&y) && x % 2 == 0)
}

fn row_packets(packets: &[Packet]) -> Vec<&Packet> {
    packets
        .iter()
        .filter(|p| p.command == Command::PrintRow.id())
        .collect()
}

#[tokio::test]
async fn test_full_print_sends_expected_sequence() {
    let mock = MockTransport::acking();
    let handle = mock.handle();
    let mut session = PrinterSession::new(fast_polls());

    session.connect(Box::new(mock), "D11_H-mock").await.unwrap();
    session.calibrate("d11_h", 3).await.unwrap();
    session.print_image(&stripes(), 3).await.unwrap();
    assert_eq!(*session.state(), SessionState::Completed);
    session.disconnect().await;

    assert_eq!(
        handle.sent_commands(),
        vec![
            Command::SetDensity,
            Command::SetLabelType,
            Command::StartPrint,
            Command::StartPagePrint,
            Command::PrintRow,
            Command::PrintRow,
            Command::PrintRow,
            Command::EndPagePrint,
            Command::EndPrint,
            Command::PrintStatus,
        ]
    );

    // Rows are contiguous and cover the whole image.
    let packets = handle.sent_packets();
    let mut next_row = 0u16;
    for row in row_packets(&packets) {
        let start = u16::from_be_bytes([row.payload[0], row.payload[1]]);
        assert_eq!(start, next_row);
        next_row += row.payload[2] as u16;
        // 136 dot printhead
        assert_eq!(row.payload.len(), 3 + 17);
    }
    assert_eq!(next_row, 472);
    assert_eq!(handle.disconnect_count(), 1);
}

#[tokio::test]
async fn test_blank_image_costs_ceil_rows_over_255_commands() {
    let mock = MockTransport::acking();
    let handle = mock.handle();
    let mut session = PrinterSession::new(fast_polls());

    session.connect(Box::new(mock), "mock").await.unwrap();
    session.calibrate("b1", 3).await.unwrap();
    session
        .print_image(&RasterImage::blank(384, 1000), 3)
        .await
        .unwrap();

    let packets = handle.sent_packets();
    let repeats: Vec<u8> = row_packets(&packets).iter().map(|p| p.payload[2]).collect();
    assert_eq!(repeats, vec![255, 255, 255, 235]);
}

#[tokio::test]
async fn test_silent_printer_exhausts_retries() {
    let mock = MockTransport::silent();
    let handle = mock.handle();
    let mut session = PrinterSession::new(fast_polls());

    session.connect(Box::new(mock), "mock").await.unwrap();
    let err = session.calibrate("d11", 2).await.unwrap_err();

    match &err {
        EtiquetaError::Protocol(ProtocolError::RetriesExhausted {
            command,
            attempts,
            last,
        }) => {
            assert_eq!(*command, Command::SetDensity);
            assert_eq!(*attempts, 3);
            assert_eq!(last.kind(), ErrorKind::Timeout);
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(handle.sent_commands(), vec![Command::SetDensity; 3]);
    assert_eq!(*session.state(), SessionState::Failed(ErrorKind::Protocol));
    assert!(!handle.is_connected());
}

#[tokio::test]
async fn test_retry_count_follows_config() {
    let mock = MockTransport::silent();
    let handle = mock.handle();
    let mut session = PrinterSession::new(SessionConfig {
        max_retries: 0,
        ..fast_polls()
    });

    session.connect(Box::new(mock), "mock").await.unwrap();
    assert!(session.calibrate("d11", 2).await.is_err());
    assert_eq!(handle.send_count(), 1);
}

#[tokio::test]
async fn test_send_row_before_start_is_rejected_without_io() {
    let mock = MockTransport::acking();
    let handle = mock.handle();
    let mut session = PrinterSession::new(fast_polls());
    session.connect(Box::new(mock), "mock").await.unwrap();

    let err = session.send_row(&[0xFF], 1).await.unwrap_err();

    assert!(err.to_string().contains("InvalidState"));
    assert_eq!(*session.state(), SessionState::Connected);
    assert_eq!(handle.send_count(), 0);
}

#[tokio::test]
async fn test_disconnect_twice_sends_nothing() {
    let mock = MockTransport::acking();
    let handle = mock.handle();
    let mut session = PrinterSession::new(fast_polls());
    session.connect(Box::new(mock), "mock").await.unwrap();
    session.calibrate("d110", 2).await.unwrap();
    let sent = handle.send_count();

    session.disconnect().await;
    session.disconnect().await;

    assert_eq!(handle.send_count(), sent);
    assert_eq!(handle.disconnect_count(), 1);
}

#[tokio::test]
async fn test_disconnect_on_fresh_session() {
    let mut session = PrinterSession::new(fast_polls());
    session.disconnect().await;
    assert_eq!(*session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_cancel_mid_print() {
    let mock = MockTransport::acking();
    let handle = mock.handle();
    let mut session = PrinterSession::new(fast_polls());
    session.connect(Box::new(mock), "mock").await.unwrap();
    session.calibrate("d11_h", 3).await.unwrap();

    session.start_print_job(472).await.unwrap();
    session.send_row(&[0x00], 100).await.unwrap();
    session.cancel_handle().cancel();
    let err = session.send_row(&[0xAA], 200).await.unwrap_err();

    assert!(matches!(err, EtiquetaError::UserCancelled));
    assert_eq!(
        *session.state(),
        SessionState::Failed(ErrorKind::UserCancelled)
    );
    assert_eq!(
        handle.sent_commands(),
        vec![
            Command::SetDensity,
            Command::SetLabelType,
            Command::StartPrint,
            Command::StartPagePrint,
            Command::PrintRow,
            Command::EndPagePrint,
            Command::EndPrint,
        ]
    );
    assert!(!handle.is_connected());
}

#[tokio::test]
async fn test_disconnect_mid_print_ends_job() {
    let mock = MockTransport::acking();
    let handle = mock.handle();
    let mut session = PrinterSession::new(fast_polls());
    session.connect(Box::new(mock), "mock").await.unwrap();
    session.calibrate("d11", 2).await.unwrap();
    session.start_print_job(10).await.unwrap();
    session.send_row(&[0xF0], 1).await.unwrap();

    session.disconnect().await;

    assert_eq!(
        *session.state(),
        SessionState::Failed(ErrorKind::UserCancelled)
    );
    assert_eq!(
        handle.sent_commands(),
        vec![
            Command::SetDensity,
            Command::SetLabelType,
            Command::StartPrint,
            Command::StartPagePrint,
            Command::PrintRow,
            Command::EndPagePrint,
            Command::EndPrint,
        ]
    );
    assert_eq!(handle.disconnect_count(), 1);
}

#[tokio::test]
async fn test_cancel_before_calibrate_sends_nothing() {
    let mock = MockTransport::acking();
    let handle = mock.handle();
    let mut session = PrinterSession::new(fast_polls());
    session.connect(Box::new(mock), "mock").await.unwrap();

    session.cancel_handle().cancel();
    let err = session.calibrate("d11", 2).await.unwrap_err();

    assert!(matches!(err, EtiquetaError::UserCancelled));
    assert_eq!(
        *session.state(),
        SessionState::Failed(ErrorKind::UserCancelled)
    );
    assert_eq!(handle.send_count(), 0);
    assert!(!handle.is_connected());
}

#[tokio::test]
async fn test_cancel_while_polling_status() {
    let mut session = PrinterSession::new(fast_polls());
    let cancel = session.cancel_handle();
    let mock = MockTransport::with_responder(move |p| {
        let command = Command::from_id(p.command).unwrap();
        if command == Command::PrintStatus {
            // Still printing when the user gives up.
            cancel.cancel();
            return vec![frame(command.ack_id(), &[0, 0, 30, 0])];
        }
        vec![ack(command)]
    });
    let handle = mock.handle();
    session.connect(Box::new(mock), "mock").await.unwrap();
    session.calibrate("d11", 2).await.unwrap();

    let err = session
        .print_image(&RasterImage::blank(96, 2), 2)
        .await
        .unwrap_err();

    assert!(matches!(err, EtiquetaError::UserCancelled));
    let commands = handle.sent_commands();
    assert_eq!(
        &commands[commands.len() - 3..],
        &[Command::EndPagePrint, Command::EndPrint, Command::PrintStatus]
    );
    assert_eq!(
        *session.state(),
        SessionState::Failed(ErrorKind::UserCancelled)
    );
}

#[tokio::test]
async fn test_cancel_with_dead_link_still_terminates() {
    // 4 setup commands go through, then the link is gone.
    let mock = MockTransport::acking().drop_link_after(4);
    let mut session = PrinterSession::new(fast_polls());
    session.connect(Box::new(mock), "mock").await.unwrap();
    session.calibrate("d11", 2).await.unwrap();
    session.start_print_job(10).await.unwrap();

    session.cancel_handle().cancel();
    let err = session.send_row(&[0xFF], 1).await.unwrap_err();

    assert!(matches!(err, EtiquetaError::UserCancelled));
    assert_eq!(
        *session.state(),
        SessionState::Failed(ErrorKind::UserCancelled)
    );
}

#[tokio::test]
async fn test_link_drop_mid_print_fails_with_io() {
    // Setup (4) plus two rows succeed.
    let mock = MockTransport::acking().drop_link_after(6);
    let handle = mock.handle();
    let mut session = PrinterSession::new(fast_polls());
    session.connect(Box::new(mock), "mock").await.unwrap();
    session.calibrate("d11", 2).await.unwrap();

    let image = RasterImage::from_fn(96, 8, |x, y| (x + y) % 2 == 0);
    let err = session.print_image(&image, 2).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(*session.state(), SessionState::Failed(ErrorKind::Io));
    assert_eq!(handle.send_count(), 6);
}

#[tokio::test]
async fn test_mismatched_ack_is_protocol_error() {
    let mock = MockTransport::with_responder(|p| {
        let command = Command::from_id(p.command).unwrap();
        if command == Command::SetLabelType {
            // Answer with an ack for a command that was never sent.
            return vec![ack(Command::StartPrint)];
        }
        vec![ack(command)]
    });
    let handle = mock.handle();
    let mut session = PrinterSession::new(fast_polls());
    session.connect(Box::new(mock), "mock").await.unwrap();

    let err = session.calibrate("d11", 2).await.unwrap_err();

    assert!(matches!(
        err,
        EtiquetaError::Protocol(ProtocolError::UnexpectedAck {
            command: Command::SetLabelType,
            expected: 0x33,
            actual: 0x02,
        })
    ));
    assert_eq!(handle.sent_commands().len(), 2);
    assert_eq!(*session.state(), SessionState::Failed(ErrorKind::Protocol));
}

#[tokio::test]
async fn test_late_duplicate_ack_after_retry_is_ignored() {
    // The first SetDensity goes unanswered; its ack shows up late, next to
    // the ack for the retry.
    let mut density_requests = 0;
    let mock = MockTransport::with_responder(move |p| {
        let command = Command::from_id(p.command).unwrap();
        if command == Command::SetDensity {
            density_requests += 1;
            return match density_requests {
                1 => Vec::new(),
                _ => vec![ack(command), ack(command)],
            };
        }
        vec![ack(command)]
    });
    let handle = mock.handle();
    let mut session = PrinterSession::new(fast_polls());
    session.connect(Box::new(mock), "mock").await.unwrap();

    session.calibrate("d11", 2).await.unwrap();
    assert_eq!(*session.state(), SessionState::Calibrated);
    session
        .print_image(&RasterImage::blank(96, 4), 2)
        .await
        .unwrap();

    assert_eq!(*session.state(), SessionState::Completed);
    assert_eq!(
        &handle.sent_commands()[..3],
        &[Command::SetDensity, Command::SetDensity, Command::SetLabelType]
    );
}

#[tokio::test]
async fn test_corrupted_ack_is_retried() {
    let mut corrupt_next = true;
    let mock = MockTransport::with_responder(move |p| {
        let command = Command::from_id(p.command).unwrap();
        let mut reply = ack(command);
        if corrupt_next {
            corrupt_next = false;
            // flip a payload bit so the checksum no longer matches
            reply[4] ^= 0x40;
        }
        vec![reply]
    });
    let handle = mock.handle();
    let mut session = PrinterSession::new(fast_polls());
    session.connect(Box::new(mock), "mock").await.unwrap();

    session.calibrate("d11", 2).await.unwrap();
    assert_eq!(
        handle.sent_commands(),
        vec![Command::SetDensity, Command::SetDensity, Command::SetLabelType]
    );
}

#[tokio::test]
async fn test_ack_split_across_reads() {
    let mock = MockTransport::with_responder(|p| {
        let command = Command::from_id(p.command).unwrap();
        let reply = ack(command);
        let (head, tail) = reply.split_at(3);
        vec![head.to_vec(), tail.to_vec()]
    });
    let mut session = PrinterSession::new(fast_polls());
    session.connect(Box::new(mock), "mock").await.unwrap();

    session.calibrate("d11", 2).await.unwrap();
    session
        .print_image(&RasterImage::blank(96, 3), 2)
        .await
        .unwrap();
    assert_eq!(*session.state(), SessionState::Completed);
}

#[tokio::test]
async fn test_completed_session_is_terminal() {
    let mut session = PrinterSession::new(fast_polls());
    session
        .connect(Box::new(MockTransport::acking()), "mock")
        .await
        .unwrap();
    session.calibrate("d11", 2).await.unwrap();
    session
        .print_image(&RasterImage::blank(96, 3), 2)
        .await
        .unwrap();

    let err = session
        .connect(Box::new(MockTransport::acking()), "mock")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EtiquetaError::Protocol(ProtocolError::InvalidState { .. })
    ));
}

#[test]
fn test_frame_helper_matches_codec() {
    let reply = frame(0x31, &[0x01]);
    let (packet, used) = packet::decode(&reply).unwrap();
    assert_eq!(used, reply.len());
    assert_eq!(packet.payload, vec![0x01]);
}
