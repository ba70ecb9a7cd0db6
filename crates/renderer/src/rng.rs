//! PCG-based RNG for deterministic brush jitter.

/// PCG32 default multiplier.
const PCG_MULT: u64 = 6364136223846793005;
/// PCG32 default increment base.
const PCG_INIT: u64 = 0x853c49e6748fea9b;

/// Small PCG32 stream keyed by a per-dab index and a stroke seed, so the same
/// seed, path and config always draw the same jitter sequence.
pub(crate) struct Pcg32 {
    state: u64,
    inc: u64,
}

impl Pcg32 {
    pub(crate) fn new(dab_index: u64, seed: u64) -> Self {
        let mut rng = Self {
            state: 0,
            inc: ((dab_index + 1) << 1) | 1,
        };
        rng.next_u32();
        rng.state = rng.state.wrapping_add(PCG_INIT.wrapping_add(seed));
        rng.next_u32();
        rng
    }

    pub(crate) fn next_u32(&mut self) -> u32 {
        let old = self.state;
        self.state = old.wrapping_mul(PCG_MULT).wrapping_add(self.inc | 1);
        let xorshifted = (((old >> 18) ^ old) >> 27) as u32;
        let rot = (old >> 59) as u32;
        xorshifted.rotate_right(rot)
    }

    /// Uniform float in [0, 1).
    pub(crate) fn next_f32(&mut self) -> f32 {
        let bits = (self.next_u32() >> 9) | 0x3f800000;
        f32::from_bits(bits) - 1.0
    }

    /// Uniform float in [-1, 1).
    pub(crate) fn next_signed_f32(&mut self) -> f32 {
        self.next_f32() * 2.0 - 1.0
    }
}
