/*
    fdc765
    NEC uPD765 floppy disk controller emulator

    Copyright 2025 The fdc765 Authors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    benches::surface_bench.rs

    Benchmarks for disk surface encoding and track traversal.

*/

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fdc765_core::{
    device_types::disk::DiskDescription,
    surface::{Encoding, Surface},
};

pub fn surface_bench(c: &mut Criterion) {
    let desc = DiskDescription::uniform(1, 40, 9, 2, 1, 0xE5);

    c.bench_function("surface_bench_encode_40_tracks", |b| {
        b.iter(|| Surface::encode(black_box(&desc)));
    });

    c.bench_function("surface_bench_decode_40_tracks", |b| {
        let surface = Surface::encode(&desc).unwrap();
        b.iter(|| black_box(&surface).decode());
    });

    c.bench_function("surface_bench_traverse_track", |b| {
        let surface = Surface::encode(&desc).unwrap();
        let track = surface.track(20, 0).unwrap();
        b.iter(|| {
            // One revolution: every byte, its clock flag, and any address mark found there.
            let mut marks = 0;
            let mut sum = 0u32;
            for o in 0..track.bytes_per_track() {
                sum = sum.wrapping_add(track.read(o) as u32);
                if track.mark_at(o).is_some() {
                    marks += 1;
                }
            }
            black_box((sum, marks))
        });
    });

    c.bench_function("surface_bench_find_sector_crc", |b| {
        let surface = Surface::encode(&desc).unwrap();
        let track = surface.track(20, 0).unwrap();
        assert_eq!(track.encoding(), Encoding::Mfm);
        b.iter(|| {
            track
                .sectors()
                .iter()
                .filter(|s| track.crc_valid(s.id_field.start, s.id_field.len))
                .count()
        });
    });
}

criterion_group!(benches, surface_bench);
criterion_main!(benches);
