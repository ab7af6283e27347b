use std::io::Cursor;

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hex_literal::hex;
use rpc_runtime::{read_frame, write_frame, Decode, Encode, Reader, Writer};

#[derive(Clone)]
struct Point {
    x: i32,
    y: i32,
    label: String,
}

impl Encode for Point {
    fn encode_into(&self, w: &mut Writer) {
        self.x.encode_into(w);
        self.y.encode_into(w);
        self.label.encode_into(w);
    }
}

impl Decode for Point {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, rpc_runtime::Error> {
        Ok(Point {
            x: i32::decode_from(r)?,
            y: i32::decode_from(r)?,
            label: String::decode_from(r)?,
        })
    }
}

pub fn codec(c: &mut Criterion) {
    c.bench_function("encode_record", |b| {
        let p = Point {
            x: 42,
            y: -42,
            label: "benchmark".to_string(),
        };

        b.iter(|| {
            let mut w = Writer::with_capacity(32);
            p.encode_into(&mut w);
            black_box(w)
        })
    });

    c.bench_function("decode_record", |b| {
        let mut w = Writer::new();
        Point {
            x: 42,
            y: -42,
            label: "benchmark".to_string(),
        }
        .encode_into(&mut w);
        let raw = w.into_vec();

        b.iter(|| {
            let mut r = Reader::new(&raw);
            black_box(Point::decode_from(&mut r).unwrap())
        })
    });

    c.bench_function("decode_sequence_of_records", |b| {
        let mut w = Writer::new();
        let points: Vec<Point> = (0..64)
            .map(|i| Point {
                x: i,
                y: -i,
                label: format!("point-{i}"),
            })
            .collect();
        points.encode_into(&mut w);
        let raw = w.into_vec();

        b.iter(|| {
            let mut r = Reader::new(&raw);
            black_box(Vec::<Point>::decode_from(&mut r).unwrap())
        })
    });
}

pub fn frame(c: &mut Criterion) {
    c.bench_function("write_frame", |b| {
        let payload = hex!(
            "000003e8000000000000001f4300004d1a436f6c452240ea4c70a1b52d7f97418e66
            01a10e02009cf2d59c"
        );
        let mut cursor = Cursor::new(Vec::new());

        b.iter(|| {
            cursor.set_position(0);
            write_frame(&mut cursor, &payload).expect("failed to write frame");
            black_box(&cursor);
        })
    });

    c.bench_function("read_frame", |b| {
        let payload = hex!(
            "000003e8000000000000001f4300004d1a436f6c452240ea4c70a1b52d7f97418e66
            01a10e02009cf2d59c"
        );
        let mut framed = Vec::new();
        write_frame(&mut framed, &payload).unwrap();

        b.iter(|| {
            let mut cursor = Cursor::new(framed.as_slice());
            black_box(read_frame(&mut cursor, rpc_runtime::DEFAULT_MAX_FRAME_SIZE).unwrap())
        })
    });

    c.bench_function("clone_broadcast_frame", |b| {
        // A pre-built push frame, shared across tracked clients via `Bytes`
        // rather than re-copied per send (`SPEC_FULL.md` §2/§4.5).
        let payload = hex!("000003e900000000");
        let mut framed = Vec::new();
        write_frame(&mut framed, &payload).unwrap();
        let shared = Bytes::from(framed);

        b.iter(|| black_box(shared.clone()))
    });
}

criterion_group!(benches, codec, frame);
criterion_main!(benches);
