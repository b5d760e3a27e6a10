//! Compares reading an image in legacy scan mode and in 2.0 bulk mode.
//!
//! Run with: cargo bench -p indigo-protocol --bench blob_transfer

use std::hint::black_box;
use std::io::Cursor;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use indigo_protocol::{
    BlobValue, Item, ItemValue, Message, Parser, ParserOptions, Property, PropertyKind, Version,
};

fn image_message(size: usize, version: Version) -> Vec<u8> {
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    let blob = BlobValue {
        format: ".fits".to_string(),
        size,
        data: Some(data),
        ..Default::default()
    };
    let message = Message::Update {
        property: Property::new(PropertyKind::Blob, "CCD Imager Simulator", "CCD_IMAGE")
            .with_item(Item::new("IMAGE", ItemValue::Blob(blob))),
        message: None,
    };
    let mut out = Vec::with_capacity(size * 4 / 3 + 256);
    message
        .write_to(&mut out, version)
        .expect("Writing to vector shouldn't fail");
    out
}

fn read_image(input: &[u8], version: Version) -> Message {
    let mut parser = Parser::new(Cursor::new(input), ParserOptions::default());
    parser.set_version(version);
    parser
        .next_message()
        .expect("Input is valid")
        .expect("Input contains a message")
}

fn blob_transfer(c: &mut Criterion) {
    let mut group = c.benchmark_group("blob_transfer");
    for size in [64 * 1024, 4 * 1024 * 1024] {
        group.throughput(Throughput::Bytes(size as u64));
        for (mode, version) in [("scan", Version::LEGACY), ("bulk", Version::V2_0)] {
            let input = image_message(size, version);
            group.bench_with_input(BenchmarkId::new(mode, size), &input, |b, input| {
                b.iter(|| read_image(black_box(input), version))
            });
        }
    }
    group.finish();
}

criterion_group!(benches, blob_transfer);
criterion_main!(benches);
