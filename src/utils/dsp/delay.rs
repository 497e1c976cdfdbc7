//! Delay lines and the comb/allpass building blocks of the reverb network.

// -------------------------------------------------------------------------------------------------

/// Mono delay line buffer with fractional delay time support.
#[derive(Debug, Default, Clone)]
pub struct DelayLine {
    buffer: Vec<f32>,
    buffer_mask: usize,
    write_pos: usize,
}

impl DelayLine {
    /// Create a new delay buffer with the given max delay time in sample frames.
    pub fn new(max_delay_frames: usize) -> Self {
        let buffer_frames = (max_delay_frames + 2).next_power_of_two();
        Self {
            buffer: vec![0.0; buffer_frames],
            buffer_mask: buffer_frames - 1,
            write_pos: 0,
        }
    }

    /// Max possible delay in frames.
    pub fn max_delay(&self) -> usize {
        self.buffer.len() - 2
    }

    /// Reset the delay buffer and write position.
    pub fn flush(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }

    /// Write a new sample and return the sample delayed by `delay_pos` frames, linearly
    /// interpolated. Feedback is added to the written sample.
    #[inline]
    pub fn process_sample(&mut self, input: f32, feedback: f32, delay_pos: f32) -> f32 {
        let delay_pos = delay_pos.clamp(0.0, self.max_delay() as f32);
        let read_pos = self.write_pos as f32 + self.buffer.len() as f32 - delay_pos;
        let read_pos_floor = read_pos.floor();
        let fraction = read_pos - read_pos_floor;

        let index1 = read_pos_floor as usize & self.buffer_mask;
        let index2 = (index1 + 1) & self.buffer_mask;
        let value1 = self.buffer[index1];
        let value2 = self.buffer[index2];
        let output = value1 + (value2 - value1) * fraction;

        self.buffer[self.write_pos] = input + output * feedback;
        self.write_pos = (self.write_pos + 1) & self.buffer_mask;
        output
    }
}

// -------------------------------------------------------------------------------------------------

/// Feedback comb filter with a one-pole lowpass damping filter in its feedback path.
#[derive(Debug, Clone)]
pub struct CombFilter {
    buffer: Vec<f32>,
    pos: usize,
    feedback: f32,
    damp1: f32,
    damp2: f32,
    filter_store: f32,
}

impl CombFilter {
    pub fn new(length: usize) -> Self {
        Self {
            buffer: vec![0.0; length.max(1)],
            pos: 0,
            feedback: 0.0,
            damp1: 0.0,
            damp2: 1.0,
            filter_store: 0.0,
        }
    }

    pub fn set_feedback(&mut self, feedback: f32) {
        self.feedback = feedback;
    }

    /// Set damping amount in range 0..=1 (0 = no damping).
    pub fn set_damp(&mut self, damp: f32) {
        self.damp1 = damp;
        self.damp2 = 1.0 - damp;
    }

    pub fn flush(&mut self) {
        self.buffer.fill(0.0);
        self.filter_store = 0.0;
        self.pos = 0;
    }

    /// Process `input` and add the comb output to `output`.
    #[inline]
    pub fn process_add(&mut self, input: &[f32], output: &mut [f32]) {
        let length = self.buffer.len();
        for (i, o) in input.iter().zip(output.iter_mut()) {
            let delayed = self.buffer[self.pos];
            self.filter_store = delayed * self.damp2 + self.filter_store * self.damp1;
            self.buffer[self.pos] = *i + self.filter_store * self.feedback;
            self.pos += 1;
            if self.pos == length {
                self.pos = 0;
            }
            *o += delayed;
        }
        if self.filter_store.abs() < 1.0e-20 {
            self.filter_store = 0.0;
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Schroeder allpass filter with a fixed delay length.
#[derive(Debug, Clone)]
pub struct AllpassFilter {
    buffer: Vec<f32>,
    pos: usize,
    feedback: f32,
}

impl AllpassFilter {
    pub fn new(length: usize, feedback: f32) -> Self {
        Self {
            buffer: vec![0.0; length.max(1)],
            pos: 0,
            feedback,
        }
    }

    pub fn flush(&mut self) {
        self.buffer.fill(0.0);
        self.pos = 0;
    }

    /// Process the given buffer in place.
    #[inline]
    pub fn process(&mut self, buffer: &mut [f32]) {
        let length = self.buffer.len();
        for sample in buffer.iter_mut() {
            let delayed = self.buffer[self.pos];
            let input = *sample;
            self.buffer[self.pos] = input + delayed * self.feedback;
            self.pos += 1;
            if self.pos == length {
                self.pos = 0;
            }
            *sample = delayed - input;
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_line_delays() {
        let mut delay = DelayLine::new(8);
        let mut output = Vec::new();
        for i in 0..12 {
            let input = if i == 0 { 1.0 } else { 0.0 };
            output.push(delay.process_sample(input, 0.0, 4.0));
        }
        assert_eq!(output[4], 1.0);
        assert_eq!(output.iter().filter(|v| **v != 0.0).count(), 1);
    }

    #[test]
    fn comb_filter_repeats() {
        let mut comb = CombFilter::new(4);
        comb.set_feedback(0.5);
        comb.set_damp(0.0);
        let mut input = vec![0.0; 12];
        input[0] = 1.0;
        let mut output = vec![0.0; 12];
        comb.process_add(&input, &mut output);
        assert_eq!(output[4], 1.0);
        assert_eq!(output[8], 0.5);
    }

    #[test]
    fn allpass_impulse_response() {
        let mut allpass = AllpassFilter::new(7, 0.5);
        let mut buffer = vec![0.0; 32];
        buffer[0] = 1.0;
        allpass.process(&mut buffer);
        assert_eq!(buffer[0], -1.0);
        assert_eq!(buffer[7], 1.0);
        assert_eq!(buffer[14], 0.5);
        assert_eq!(buffer[21], 0.25);
    }
}
