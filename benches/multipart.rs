use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use netclient::{MultipartBody, MultipartPart};

fn body_with_payload(payload_len: usize) -> MultipartBody {
    MultipartBody::with_boundary("netclient.benchmarkboundary")
        .part(MultipartPart::string("benchmark upload", "title"))
        .part(MultipartPart::data(vec![0x5A_u8; payload_len], "payload").filename("payload.bin"))
}

fn bench_encode_to_bytes(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("multipart_encode_to_bytes");
    for payload_len in [1024_usize, 64 * 1024, 1024 * 1024] {
        let body = body_with_payload(payload_len);
        group.throughput(Throughput::Bytes(body.encoded_len()));
        group.bench_with_input(
            BenchmarkId::from_parameter(payload_len),
            &body,
            |bencher, body| {
                bencher.iter(|| {
                    let encoded = body.encode_to_bytes().expect("encode multipart body");
                    black_box(encoded.len())
                });
            },
        );
    }
    group.finish();
}

fn bench_encode_to_temp_file(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("multipart_encode_to_temp_file");
    group.sample_size(20);
    for payload_len in [1024 * 1024_usize, 8 * 1024 * 1024] {
        let body = body_with_payload(payload_len);
        group.throughput(Throughput::Bytes(body.encoded_len()));
        group.bench_with_input(
            BenchmarkId::from_parameter(payload_len),
            &body,
            |bencher, body| {
                bencher.iter(|| {
                    let encoded = body
                        .encode_to_temp_file()
                        .expect("encode multipart body to file");
                    let len = encoded.len;
                    encoded.path.close().expect("remove encoded file");
                    black_box(len)
                });
            },
        );
    }
    group.finish();
}

fn bench_encoded_len(criterion: &mut Criterion) {
    let body = (0..64).fold(MultipartBody::new(), |body, index| {
        body.part(MultipartPart::string("field value", format!("field_{index}")))
    });
    criterion.bench_function("multipart_encoded_len_64_parts", |bencher| {
        bencher.iter(|| black_box(body.encoded_len()));
    });
}

criterion_group!(
    benches,
    bench_encode_to_bytes,
    bench_encode_to_temp_file,
    bench_encoded_len
);
criterion_main!(benches);
