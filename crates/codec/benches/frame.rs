use criterion::{Criterion, criterion_group, criterion_main};

use adb_remote_codec::{
    COMMAND_ADB_TRANSPORT,
    frame::TransportFrame,
    payload::{ConnectRoomPayload, ErrorPayload},
};

fn criterion_benchmark(c: &mut Criterion) {
    let payload = [0x5A_u8; 4120];

    c.bench_function("encode_adb_transport_frame", |b| {
        let mut frame = TransportFrame::new();
        b.iter(|| {
            frame.set_direct_command(COMMAND_ADB_TRANSPORT);
            frame.set_payload(&payload).unwrap();
        })
    });

    c.bench_function("verify_frame_crc", |b| {
        let mut frame = TransportFrame::new();
        frame.set_direct_command(COMMAND_ADB_TRANSPORT);
        frame.set_payload(&payload).unwrap();
        b.iter(|| frame.verify_payload_crc().unwrap())
    });

    c.bench_function("encode_decode_typed_payload", |b| {
        let mut frame = TransportFrame::new();
        b.iter(|| {
            frame
                .set_connect_room(&ConnectRoomPayload {
                    room_id: "EFGH5678".to_string(),
                    client_id: "IJKL9012".to_string(),
                })
                .unwrap();
            frame.get_connect_room().unwrap()
        })
    });

    c.bench_function("encode_error_payload", |b| {
        let mut frame = TransportFrame::new();
        b.iter(|| {
            frame
                .set_error(&ErrorPayload {
                    error_code: 5,
                    error_message: "You are in an empty room".to_string(),
                })
                .unwrap();
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
