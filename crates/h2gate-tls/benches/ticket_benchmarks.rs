use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use h2gate_tls::{decode_key_set, encode_key_set, TicketCipher, TicketKeyRotator};
use std::time::Duration;

fn build_key_set(cipher: TicketCipher, count: usize) -> h2gate_tls::TicketKeySet {
    let mut rotator = TicketKeyRotator::new(cipher, Duration::from_secs(count as u64 * 3600));
    let mut set = rotator.rotate().expect("Failed to generate ticket key");
    for _ in 1..count {
        set = rotator.rotate().expect("Failed to generate ticket key");
    }
    (*set).clone()
}

fn bench_rotation(c: &mut Criterion) {
    let mut group = c.benchmark_group("ticket_key_rotation");

    for retention in [1usize, 12].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(retention),
            retention,
            |b, &retention| {
                let mut rotator = TicketKeyRotator::new(
                    TicketCipher::Aes128Cbc,
                    Duration::from_secs(retention as u64 * 3600),
                );
                b.iter(|| rotator.rotate().expect("Failed to generate ticket key"));
            },
        );
    }

    group.finish();
}

fn bench_wire_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("ticket_key_encode");

    for count in [1usize, 12].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let set = build_key_set(TicketCipher::Aes256Cbc, count);
            b.iter(|| encode_key_set(black_box(&set)));
        });
    }

    group.finish();
}

fn bench_wire_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("ticket_key_decode");

    for count in [1usize, 12].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let set = build_key_set(TicketCipher::Aes256Cbc, count);
            let payload = encode_key_set(&set);
            b.iter(|| {
                decode_key_set(black_box(&payload), TicketCipher::Aes256Cbc)
                    .expect("Failed to decode ticket keys")
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_rotation, bench_wire_encode, bench_wire_decode);
criterion_main!(benches);
