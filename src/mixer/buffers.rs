use crate::utils::buffer::{add_buffers, clear_buffer, is_silent};

// -------------------------------------------------------------------------------------------------

/// One set of per block accumulation buses: stereo and mono dry, and the mono reverb (effect 1)
/// and chorus (effect 2) sends.
#[derive(Clone, Debug)]
pub struct BusBuffers {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub mono: Vec<f32>,
    pub effect1: Vec<f32>,
    pub effect2: Vec<f32>,
}

impl BusBuffers {
    fn new(frames: usize) -> Self {
        Self {
            left: vec![0.0; frames],
            right: vec![0.0; frames],
            mono: vec![0.0; frames],
            effect1: vec![0.0; frames],
            effect2: vec![0.0; frames],
        }
    }

    fn buffers_mut(&mut self) -> [&mut Vec<f32>; 5] {
        [
            &mut self.left,
            &mut self.right,
            &mut self.mono,
            &mut self.effect1,
            &mut self.effect2,
        ]
    }

    pub fn clear(&mut self) {
        for buffer in self.buffers_mut() {
            clear_buffer(buffer);
        }
    }

    /// Add all buses of `other` to ours.
    pub fn add(&mut self, other: &BusBuffers) {
        add_buffers(&mut self.left, &other.left);
        add_buffers(&mut self.right, &other.right);
        add_buffers(&mut self.mono, &other.mono);
        add_buffers(&mut self.effect1, &other.effect1);
        add_buffers(&mut self.effect2, &other.effect2);
    }

    pub fn is_silent(&self) -> bool {
        is_silent(&self.left)
            && is_silent(&self.right)
            && is_silent(&self.mono)
            && is_silent(&self.effect1)
            && is_silent(&self.effect2)
    }
}

// -------------------------------------------------------------------------------------------------

/// Accumulation buffers of a mixing bus for one audio block.
///
/// Voices starting within a block (sub-block note onsets) render their first, partial block into
/// the `delayed` buses at their onset offset, all other rendering goes into `main`. The bus adds
/// the delayed buses to the main ones after all lines rendered.
#[derive(Clone, Debug)]
pub struct MixBuffers {
    frames: usize,
    pub main: BusBuffers,
    pub delayed: BusBuffers,
    delayed_used: bool,
}

impl MixBuffers {
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            main: BusBuffers::new(frames),
            delayed: BusBuffers::new(frames),
            delayed_used: false,
        }
    }

    /// Block size in frames.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Buses to render into for a voice starting at frame `delay` of the block.
    pub fn target(&mut self, delay: usize) -> &mut BusBuffers {
        if delay > 0 {
            self.delayed_used = true;
            &mut self.delayed
        } else {
            &mut self.main
        }
    }

    pub fn clear(&mut self) {
        self.main.clear();
        if self.delayed_used {
            self.delayed.clear();
            self.delayed_used = false;
        }
    }

    /// Merge delayed buses into the main ones and clear them.
    pub fn merge_delayed(&mut self) {
        if self.delayed_used {
            self.main.add(&self.delayed);
            self.delayed.clear();
            self.delayed_used = false;
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delayed_buses_merge() {
        let mut buffers = MixBuffers::new(8);
        buffers.target(0).left[0] = 1.0;
        buffers.target(4).left[4] = 0.5;
        buffers.target(4).effect1[5] = 0.25;
        buffers.merge_delayed();
        assert_eq!(buffers.main.left[0], 1.0);
        assert_eq!(buffers.main.left[4], 0.5);
        assert_eq!(buffers.main.effect1[5], 0.25);
        assert!(buffers.delayed.is_silent());
        buffers.clear();
        assert!(buffers.main.is_silent());
    }
}
