//! Voice pipeline integration tests
//!
//! Tests voice components without requiring audio hardware

use std::sync::{Arc, Mutex};

use newscast::Result;
use newscast::podcast::pcm_to_wav;
use newscast::voice::codec::{
    bytes_to_transport_text, decode_fragment, float_to_pcm16, pcm16_to_float,
};
use newscast::voice::{
    FrameAssembler, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE, OutputSink, PlaybackScheduler,
    ScheduledQueue, TransportUnit,
};

mod common;

/// Generate sine wave audio samples
fn generate_sine_samples(sample_rate: u32, frequency: f32, duration_secs: f32) -> Vec<f32> {
    let num_samples = (sample_rate as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            0.5 * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Output sink that renders into a [`ScheduledQueue`] on demand
struct QueueSink {
    queue: Mutex<ScheduledQueue>,
}

impl QueueSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(ScheduledQueue::new()),
        })
    }

    fn render(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames];
        self.queue.lock().unwrap().render(&mut out, 1);
        out
    }
}

impl OutputSink for QueueSink {
    fn sample_rate(&self) -> u32 {
        OUTPUT_SAMPLE_RATE
    }

    fn now(&self) -> u64 {
        self.queue.lock().unwrap().now()
    }

    fn schedule(&self, start: u64, samples: Vec<f32>) -> Result<u64> {
        Ok(self.queue.lock().unwrap().push(start, samples))
    }

    fn clear(&self) {
        self.queue.lock().unwrap().clear();
    }

    fn close(&self) {}
}

#[test]
fn test_one_second_of_capture_frames() {
    let audio = generate_sine_samples(INPUT_SAMPLE_RATE, 440.0, 1.0);
    let mut assembler = FrameAssembler::new(4096);

    // Device callbacks deliver uneven buffers
    let mut frames = Vec::new();
    for chunk in audio.chunks(441) {
        frames.extend(assembler.push(chunk));
    }
    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|f| f.len() == 4096));

    let tail = assembler.flush().unwrap();
    assert_eq!(tail.len(), 16000 - 3 * 4096);

    // Frames preserve the captured samples in order
    let rejoined: Vec<f32> = frames
        .iter()
        .chain(std::iter::once(&tail))
        .flat_map(|f| f.samples().iter().copied())
        .collect();
    assert_eq!(rejoined, audio);
}

#[test]
fn test_transport_unit_is_two_bytes_per_sample() {
    let audio = generate_sine_samples(INPUT_SAMPLE_RATE, 440.0, 1.0);
    let mut assembler = FrameAssembler::new(4096);
    let frame = assembler.push(&audio).remove(0);

    let unit = TransportUnit::from_frame(&frame);
    assert_eq!(unit.data().len(), 8192);
    assert_eq!(unit.sample_count(), 4096);
    assert_eq!(unit.mime_type(), "audio/pcm;rate=16000");
}

#[test]
fn test_pcm_conversion_error_bounded() {
    let audio = generate_sine_samples(INPUT_SAMPLE_RATE, 1000.0, 0.1);
    let restored = pcm16_to_float(&float_to_pcm16(&audio));

    assert_eq!(restored.len(), audio.len());
    for (a, b) in audio.iter().zip(&restored) {
        assert!((a - b).abs() <= 1.0 / 32768.0 + f32::EPSILON);
    }
}

#[test]
fn test_streamed_fragments_render_without_gaps() {
    let speech = generate_sine_samples(OUTPUT_SAMPLE_RATE, 220.0, 0.5);
    let sink = QueueSink::new();
    let mut scheduler = PlaybackScheduler::new(sink.clone(), 0);

    // The remote sends uneven fragments
    let mut offset = 0;
    for size in [1000, 2400, 17, 4000, 4583] {
        let fragment = bytes_to_transport_text(&float_to_pcm16(&speech[offset..offset + size]));
        scheduler.schedule_fragment(&fragment).unwrap();
        offset += size;
    }
    assert_eq!(offset, speech.len());
    assert_eq!(scheduler.cursor(), speech.len() as u64);

    let rendered = sink.render(speech.len());
    let expected = decode_fragment(&bytes_to_transport_text(&float_to_pcm16(&speech))).unwrap();
    assert_eq!(rendered, expected);
}

#[test]
fn test_fragment_arriving_mid_playback_follows_previous() {
    let sink = QueueSink::new();
    let mut scheduler = PlaybackScheduler::new(sink.clone(), 0);

    let first = bytes_to_transport_text(&float_to_pcm16(&[0.5; 100]));
    let second = bytes_to_transport_text(&float_to_pcm16(&[-0.5; 100]));

    scheduler.schedule_fragment(&first).unwrap();
    let head = sink.render(60);
    let placed = scheduler.schedule_fragment(&second).unwrap();

    assert_eq!(placed.start, 100);
    let rest = sink.render(140);
    assert!(head.iter().chain(&rest[..40]).all(|&s| s == 0.5));
    assert!(rest[40..].iter().all(|&s| s == -0.5));
}

#[test]
fn test_barge_in_drops_pending_audio_and_resumes_immediately() {
    let sink = QueueSink::new();
    let mut scheduler = PlaybackScheduler::new(sink.clone(), 0);

    let reply = bytes_to_transport_text(&float_to_pcm16(&[0.5; 1000]));
    scheduler.schedule_fragment(&reply).unwrap();
    sink.render(100);

    scheduler.interrupt();
    let cursor = scheduler.cursor();
    assert!(sink.now() >= cursor);

    let next = bytes_to_transport_text(&float_to_pcm16(&[0.25; 10]));
    let placed = scheduler.schedule_fragment(&next).unwrap();
    assert_eq!(placed.start, sink.now());
    assert!(placed.start >= cursor);
    assert_eq!(sink.render(10), vec![0.25; 10]);
}

#[test]
fn test_synthesized_speech_to_wav() {
    let speech = generate_sine_samples(OUTPUT_SAMPLE_RATE, 220.0, 0.25);
    let pcm = float_to_pcm16(&speech);
    let wav = pcm_to_wav(&pcm, OUTPUT_SAMPLE_RATE).unwrap();

    let mut reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
    assert_eq!(reader.spec().sample_rate, OUTPUT_SAMPLE_RATE);
    let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(samples.len(), speech.len());
    assert_eq!(samples[1].to_le_bytes(), [pcm[2], pcm[3]]);
}
