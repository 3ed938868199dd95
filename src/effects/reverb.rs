//! Freeverb-style reverb: eight parallel damped combs into four series allpasses.
//!
//! Each channel gets its own network; channels after the first are detuned by
//! a small spread so stereo sources decorrelate. The tail is truncated at the
//! input length, so the buffer duration never changes.

use crate::audio::buffer::AudioBuffer;

// Tunings in samples at 44.1 kHz
const COMB_TUNINGS: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNINGS: [usize; 4] = [556, 441, 341, 225];
const STEREO_SPREAD: usize = 23;

const FIXED_GAIN: f64 = 0.015;
const SCALE_WET: f64 = 3.0;
const SCALE_DAMPING: f64 = 0.4;
const SCALE_ROOM: f64 = 0.28;
const OFFSET_ROOM: f64 = 0.7;

struct CombFilter {
    buffer: Vec<f64>,
    index: usize,
    filter_store: f64,
    damp1: f64,
    damp2: f64,
    feedback: f64,
}

impl CombFilter {
    fn new(size: usize, feedback: f64, damping: f64) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
            filter_store: 0.0,
            damp1: damping,
            damp2: 1.0 - damping,
            feedback,
        }
    }

    fn process(&mut self, input: f64) -> f64 {
        let output = self.buffer[self.index];
        self.filter_store = output * self.damp2 + self.filter_store * self.damp1;
        self.buffer[self.index] = input + self.filter_store * self.feedback;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }
}

struct AllpassFilter {
    buffer: Vec<f64>,
    index: usize,
}

impl AllpassFilter {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
        }
    }

    fn process(&mut self, input: f64) -> f64 {
        let buffered = self.buffer[self.index];
        let output = buffered - input;
        self.buffer[self.index] = input + buffered * 0.5;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }
}

struct Network {
    combs: Vec<CombFilter>,
    allpasses: Vec<AllpassFilter>,
}

impl Network {
    fn new(sample_rate: f64, spread: usize, room_size: f64, damping: f64) -> Self {
        let scale = sample_rate / 44100.0;
        let feedback = room_size * SCALE_ROOM + OFFSET_ROOM;
        let damp = damping * SCALE_DAMPING;
        Self {
            combs: COMB_TUNINGS
                .iter()
                .map(|&size| CombFilter::new(((size + spread) as f64 * scale) as usize, feedback, damp))
                .collect(),
            allpasses: ALLPASS_TUNINGS
                .iter()
                .map(|&size| AllpassFilter::new(((size + spread) as f64 * scale) as usize))
                .collect(),
        }
    }

    fn process(&mut self, input: f64) -> f64 {
        let mut out: f64 = self.combs.iter_mut().map(|c| c.process(input)).sum();
        for allpass in &mut self.allpasses {
            out = allpass.process(out);
        }
        out
    }
}

pub fn reverb(audio: &AudioBuffer, room_size: f32, damping: f32, wet_level: f32) -> AudioBuffer {
    let room_size = (room_size as f64).clamp(0.0, 1.0);
    let damping = (damping as f64).clamp(0.0, 1.0);
    let wet = (wet_level as f64).clamp(0.0, 1.0);
    let dry = 1.0 - wet;
    let wet_gain = wet * SCALE_WET;
    let sample_rate = audio.sample_rate() as f64;

    let channels = audio
        .channels()
        .iter()
        .enumerate()
        .map(|(idx, channel)| {
            let mut network = Network::new(sample_rate, idx * STEREO_SPREAD, room_size, damping);
            channel
                .iter()
                .map(|&s| {
                    let x = s as f64;
                    // Freeverb sums two inputs before the fixed gain.
                    let tail = network.process(x * 2.0 * FIXED_GAIN);
                    (tail * wet_gain + x * dry) as f32
                })
                .collect()
        })
        .collect();

    audio.with_channels(channels)
}
