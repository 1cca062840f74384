//! Command/reply exchange benchmarks over an in-memory stream.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use skymax_client::{exchange, Framing, FramingOptions};
use skymax_core::QueryKind;
use skymax_protocol::{crc16, Command};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Runtime;

fn reply_frame(payload: &str) -> Vec<u8> {
    let mut frame = format!("({}", payload).into_bytes();
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame.push(b'\r');
    frame
}

fn sample_payload(kind: QueryKind) -> String {
    match kind {
        QueryKind::Mode => "L".to_string(),
        QueryKind::GeneralStatus => "230.0 50.0 230.0 50.0 0161 0119 003 460 57.50 012 100 0069 0014 103.8 57.49 00000 00110110 00 00 00856 010".to_string(),
        QueryKind::RatedInfo => "230.0 21.7 230.0 50.0 21.7 5000 4000 48.0 46.0 42.0 56.4 54.0 0 10 010 1 0 0 6 01 0 0 54.0 0 1".to_string(),
        QueryKind::Warnings => "0".repeat(32),
    }
}

fn bench_exchange(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("exchange");

    for framing in [Framing::Terminator, Framing::FixedLength] {
        let options = FramingOptions {
            framing,
            read_timeout: Duration::from_secs(1),
            capacity: 256,
        };

        for kind in QueryKind::ALL {
            let command = Command::new(kind.command()).unwrap();
            let reply = reply_frame(&sample_payload(kind));
            let boundary = options.boundary_for(Some(kind));

            let id = BenchmarkId::new(format!("{:?}", framing), kind.command());
            let command = &command;
            let options = &options;
            group.bench_with_input(id, &reply, |b, reply| {
                b.to_async(&rt).iter(move || async move {
                    let (mut device, mut host) = tokio::io::duplex(512);
                    device.write_all(reply).await.unwrap();
                    let reply = exchange(&mut host, command, boundary, options)
                        .await
                        .unwrap();
                    black_box(reply)
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_exchange);
criterion_main!(benches);
