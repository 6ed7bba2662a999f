/// The sample rate of a running engine, in hertz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRate(pub f64);

impl SampleRate {
    pub fn new(hz: f64) -> Self {
        Self(hz)
    }

    pub fn as_f64(&self) -> f64 {
        self.0
    }

    pub fn as_u32(&self) -> u32 {
        self.0.round() as u32
    }
}

impl Default for SampleRate {
    fn default() -> Self {
        Self(44_100.0)
    }
}
