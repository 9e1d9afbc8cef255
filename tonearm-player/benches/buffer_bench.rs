//! Frame Buffer Performance Benchmark
//!
//! Measures frame buffer store/serve throughput and PCM frame writing, the
//! two hot paths every decoded chunk passes through.
//!
//! **Goal:** One 20ms frame round trip well under a microsecond
//! **Target:** >1000x realtime for PCM writing

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::thread;
use tonearm_common::{AudioFormat, Frame};
use tonearm_player::playback::{FrameBuffer, PcmFrameWriter, PlayerResources, ProcessingContext};

const FORMAT: AudioFormat = AudioFormat::COMMON_PCM_S16_LE;

fn pcm_frame(timecode: u64) -> Frame {
    Frame::new(timecode, 100, FORMAT, vec![0x55; FORMAT.maximum_chunk_size()])
}

fn bench_frame_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_buffer");
    group.throughput(Throughput::Elements(1));

    group.bench_function("consume_provide_round_trip", |b| {
        let buffer = FrameBuffer::new(5000, FORMAT);
        let frame = pcm_frame(0);
        let mut target = Frame::with_capacity(FORMAT, FORMAT.maximum_chunk_size());

        b.iter(|| {
            buffer.consume(black_box(&frame)).unwrap();
            black_box(buffer.provide_into(&mut target));
        });
    });

    group.bench_function("provide_empty", |b| {
        let buffer = FrameBuffer::new(5000, FORMAT);
        let mut target = Frame::with_capacity(FORMAT, FORMAT.maximum_chunk_size());

        b.iter(|| black_box(buffer.provide_into(&mut target)));
    });

    group.finish();
}

fn bench_threaded_transfer(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_buffer_threaded");

    for frames in [250u64, 1000] {
        group.throughput(Throughput::Elements(frames));
        group.bench_with_input(BenchmarkId::from_parameter(frames), &frames, |b, &frames| {
            b.iter(|| {
                // 200ms buffer keeps the producer blocking on a full ring
                let buffer = Arc::new(FrameBuffer::new(200, FORMAT));
                let producer = {
                    let buffer = Arc::clone(&buffer);
                    thread::spawn(move || {
                        for i in 0..frames {
                            buffer.consume(&pcm_frame(i * 20)).unwrap();
                        }
                        buffer.set_terminate_on_empty();
                    })
                };

                let mut target = Frame::with_capacity(FORMAT, FORMAT.maximum_chunk_size());
                let mut received = 0u64;
                loop {
                    buffer
                        .provide_into_timeout(&mut target, std::time::Duration::from_secs(5))
                        .unwrap();
                    if target.is_terminator() {
                        break;
                    }
                    received += 1;
                }

                producer.join().unwrap();
                black_box(received)
            });
        });
    }

    group.finish();
}

fn bench_pcm_writer(c: &mut Criterion) {
    let mut group = c.benchmark_group("pcm_writer");

    // 1s of stereo audio at 48kHz
    let samples: Vec<i16> = (0..96_000).map(|i| ((i % 200) as i16 - 100) * 100).collect();
    group.throughput(Throughput::Elements(samples.len() as u64));

    for volume in [100u16, 40] {
        group.bench_with_input(BenchmarkId::new("write_1s", volume), &volume, |b, &volume| {
            let resources = Arc::new(PlayerResources::new());
            resources.set_volume(volume);
            let buffer = Arc::new(FrameBuffer::new(2000, FORMAT));
            let context = ProcessingContext::new(FORMAT, Arc::clone(&buffer), resources);

            b.iter(|| {
                let mut writer = PcmFrameWriter::new(&context).unwrap();
                writer.write(&context, black_box(&samples)).unwrap();
                writer.flush(&context).unwrap();
                buffer.clear();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_frame_buffer, bench_threaded_transfer, bench_pcm_writer);
criterion_main!(benches);
