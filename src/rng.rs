//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::util::cold_path;

// State initialization constant ("expand 32-byte k")
const CONST: [u32; 4] = [0x_6170_7865, 0x_3320_646e, 0x_7962_2d32, 0x_6b20_6574];

const STATE_WORDS: usize = 16;

/// ChaCha based random number generator.
///
/// Blocks of 16 words are generated on demand and consumed one word at a time,
/// so the sequence only depends on the seed and the number of values drawn.
pub struct Rng {
	state: [u32; STATE_WORDS],
	block: [u32; STATE_WORDS],
	block_pos: usize,
	spare_normal: Option<f64>,
}

#[rustfmt::skip]
const DEFAULT_SEED: [u8; 48] = [
	0x0a, 0x69, 0xee, 0x79, 0xfb, 0x23, 0x8e, 0x49,
	0x9b, 0xf9, 0xa0, 0x72, 0x00, 0xda, 0xbd, 0x56,
	0x04, 0x20, 0xfb, 0x57, 0x7d, 0x06, 0x2d, 0xe2,
	0x2b, 0x40, 0x41, 0x31, 0x4e, 0xd7, 0xe5, 0x69,
	0x1a, 0xda, 0xb1, 0x4a, 0x4c, 0x3d, 0x51, 0xfd,
	0x5c, 0x3f, 0x2a, 0x7e, 0x1f, 0x2b, 0x6b, 0x8c,
];

impl Default for Rng {
	fn default() -> Self {
		Self::new(&DEFAULT_SEED)
	}
}

#[allow(clippy::indexing_slicing)]
impl Rng {
	pub fn new(seed: &[u8; 48]) -> Self {
		let C0 = CONST[0];
		let C1 = CONST[1];
		let C2 = CONST[2];
		let C3 = CONST[3];
		let word = |i: usize| {
			u32::from_le_bytes([seed[4 * i], seed[4 * i + 1], seed[4 * i + 2], seed[4 * i + 3]])
		};
		let k0 = word(0);
		let k1 = word(1);
		let k2 = word(2);
		let k3 = word(3);
		let k4 = word(4);
		let k5 = word(5);
		let k6 = word(6);
		let k7 = word(7);
		let v0 = word(8);
		let v1 = word(9);
		let v2 = word(10);
		let v3 = word(11);
		#[rustfmt::skip]
		let state = [
			C0, C1, C2, C3,
			k0, k1, k2, k3,
			k4, k5, k6, k7,
			v0, v1, v2, v3,
		];
		Self {
			state,
			block: [0; STATE_WORDS],
			block_pos: STATE_WORDS,
			spare_normal: None,
		}
	}

	/// Derives the 48 byte key from a single number by mixing it into the default key.
	pub fn from_seed(seed: u64) -> Self {
		let mut key = [0_u8; 48];
		let mut rng = Self::default();
		let bytes = seed.to_le_bytes();
		for (i, k) in key.iter_mut().enumerate() {
			let b = rng.next_u32().to_le_bytes()[i % 4];
			*k = b ^ bytes[i % 8];
		}
		Self::new(&key)
	}

	// generates a block of random numbers
	#[inline(never)]
	fn get_block(&mut self) -> [u32; STATE_WORDS] {
		let mut result = self.state;

		// do 7 double rounds, i.e. 14 rounds
		for _ in 0..7 {
			Self::quarter_round(0, 4, 8, 12, &mut result);
			Self::quarter_round(1, 5, 9, 13, &mut result);
			Self::quarter_round(2, 6, 10, 14, &mut result);
			Self::quarter_round(3, 7, 11, 15, &mut result);

			Self::quarter_round(0, 5, 10, 15, &mut result);
			Self::quarter_round(1, 6, 11, 12, &mut result);
			Self::quarter_round(2, 7, 8, 13, &mut result);
			Self::quarter_round(3, 4, 9, 14, &mut result);
		}

		// add original state
		#[allow(clippy::needless_range_loop)]
		for i in 0..STATE_WORDS {
			result[i] = result[i].wrapping_add(self.state[i]);
		}

		// increment counter
		let (t, c) = self.state[12].overflowing_add(1);
		self.state[12] = t;
		self.state[13] = self.state[13].wrapping_add(u32::from(c));

		result
	}

	// internal function used by get_block()
	#[inline(always)]
	fn quarter_round(a: usize, b: usize, c: usize, d: usize, state: &mut [u32; STATE_WORDS]) {
		state[a] = state[a].wrapping_add(state[b]);
		state[d] ^= state[a];
		state[d] = state[d].rotate_left(16);

		state[c] = state[c].wrapping_add(state[d]);
		state[b] ^= state[c];
		state[b] = state[b].rotate_left(12);

		state[a] = state[a].wrapping_add(state[b]);
		state[d] ^= state[a];
		state[d] = state[d].rotate_left(8);

		state[c] = state[c].wrapping_add(state[d]);
		state[b] ^= state[c];
		state[b] = state[b].rotate_left(7);
	}

	pub fn next_u32(&mut self) -> u32 {
		if self.block_pos >= STATE_WORDS {
			self.block = self.get_block();
			self.block_pos = 0;
		}
		let v = self.block[self.block_pos];
		self.block_pos += 1;
		v
	}

	/// Uniform in [0.0, 1.0)
	pub fn uniform(&mut self) -> f64 {
		let v: f64 = self.next_u32().into();
		v * (1.0 / 4_294_967_296.0)
	}

	/// Uniform in [low, high)
	pub fn uniform_range(&mut self, low: f64, high: f64) -> f64 {
		low + (high - low) * self.uniform()
	}

	/// Returns 1.0 with probability `p` and 0.0 otherwise.
	pub fn bernoulli(&mut self, p: f64) -> f64 {
		if self.uniform() < p { 1.0 } else { 0.0 }
	}

	/// Generates a float with normal distribution with mean 0 and variance 1.
	/// The generated values are guaranteed to be in the range (-10.0, 10.0)
	pub fn normal(&mut self) -> f64 {
		let result = if let Some(z1) = self.spare_normal.take() {
			z1
		} else {
			let x = 1.0 - self.uniform(); // (0.0, 1.0]
			let y = self.uniform(); // [0.0, 1.0)

			// box mueller transform
			let r = (-2.0 * x.ln()).sqrt();
			let theta = std::f64::consts::TAU * y;
			self.spare_normal = Some(r * theta.sin());
			r * theta.cos()
		};

		if result.abs() > 10.0 {
			cold_path();
			log::warn!("Rng::normal(): clamping {result} to (-10.0, 10.0)");
			return 0.0;
		}

		result
	}
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn same_seed_same_sequence() {
		let mut a = Rng::from_seed(42);
		let mut b = Rng::from_seed(42);
		let mut c = Rng::from_seed(43);
		let xa: Vec<u32> = (0..40).map(|_| a.next_u32()).collect();
		let xb: Vec<u32> = (0..40).map(|_| b.next_u32()).collect();
		let xc: Vec<u32> = (0..40).map(|_| c.next_u32()).collect();
		assert_eq!(xa, xb);
		assert_ne!(xa, xc);
	}

	#[test]
	fn uniform_and_bernoulli_stats() {
		let mut rng = Rng::from_seed(7);
		let n = 20_000;
		let mut sum = 0.0;
		let mut ones = 0.0;
		for _ in 0..n {
			let u = rng.uniform();
			assert!((0.0..1.0).contains(&u));
			sum += u;
			ones += rng.bernoulli(0.25);
		}
		let n = f64::from(n);
		assert!((sum / n - 0.5).abs() < 0.02);
		assert!((ones / n - 0.25).abs() < 0.02);
	}

	#[test]
	fn normal_stats() {
		let mut rng = Rng::from_seed(11);
		let n = 20_000;
		let samples: Vec<f64> = (0..n).map(|_| rng.normal()).collect();
		let n = f64::from(n);
		let mean = samples.iter().sum::<f64>() / n;
		let var = samples.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
		assert!(mean.abs() < 0.05);
		assert!((var - 1.0).abs() < 0.05);
	}
}
