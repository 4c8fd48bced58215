use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, SamplingMode, Throughput};
use rand::{rngs::StdRng, Rng, SeedableRng};
use bigdecimal::num_bigint::BigInt;
use bigdecimal::BigDecimal;

use pgproxy::types::{ColumnType, FormatCode, Numeric, TypeRegistry, Value};

fn gen_decimals(n: usize, seed: u64) -> Vec<Value> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let mantissa = rng.gen_range(-1_000_000_000_000i64..1_000_000_000_000i64);
            let scale: i64 = rng.gen_range(0..24);
            Value::Numeric(Numeric::Finite(BigDecimal::new(BigInt::from(mantissa) * BigInt::from(rng.gen::<u32>()), scale)))
        })
        .collect()
}

fn gen_text_arrays(n: usize, seed: u64) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let len = rng.gen_range(1..16);
            let items: Vec<String> = (0..len).map(|i| format!("\"item {}\\\"{}\"", i, rng.gen::<u16>())).collect();
            format!("{{{}}}", items.join(","))
        })
        .collect()
}

fn bench_numeric(c: &mut Criterion) {
    let codec = TypeRegistry::global().codec_for_type(ColumnType::Numeric).unwrap();
    let mut group = c.benchmark_group("numeric_codec");
    group.sampling_mode(SamplingMode::Flat);
    group.sample_size(20);

    for &n in &[1_000usize, 100_000usize] {
        let values = gen_decimals(n, 0xBEEF_CAFE);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("encode_binary", n.to_string()), &n, |b, &n| {
            b.iter(|| {
                let mut buf = Vec::with_capacity(n * 16);
                for v in &values {
                    codec.write(&mut buf, v).unwrap();
                }
                criterion::black_box(&buf);
            });
        });

        let encoded: Vec<Vec<u8>> = values.iter().filter_map(|v| codec.encode_cell(v, FormatCode::Binary).unwrap()).collect();
        group.bench_with_input(BenchmarkId::new("decode_binary", n.to_string()), &n, |b, _| {
            b.iter(|| {
                for bytes in &encoded {
                    criterion::black_box(codec.decode(bytes).unwrap());
                }
            });
        });
    }
    group.finish();
}

fn bench_array_text(c: &mut Criterion) {
    let codec = TypeRegistry::global().codec_for_type(ColumnType::TextArray).unwrap();
    let literals = gen_text_arrays(10_000, 0xDEAD_BEEF);
    let mut group = c.benchmark_group("array_text");
    group.sample_size(20);
    group.throughput(Throughput::Elements(literals.len() as u64));
    group.bench_function("parse", |b| {
        b.iter(|| {
            for lit in &literals {
                criterion::black_box(codec.parse_text(lit).unwrap());
            }
        });
    });
    group.finish();
}

criterion_group!(benches, bench_numeric, bench_array_text);
criterion_main!(benches);
