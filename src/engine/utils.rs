pub mod dropper;
pub mod ringbuffer;

use std::any::Any;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU32, Ordering};

/// Find smallest power of 2 that is greater than or equal to `x`
pub fn smallest_pow2(x: f64) -> usize {
    2usize.pow(x.log2().ceil() as u32)
}

/// Extract the message of a caught panic, if there is one.
pub fn panic_msg(e: Box<dyn Any + Send>) -> String {
    match e.downcast_ref::<&'static str>() {
        Some(s) => (*s).to_owned(),
        None => match e.downcast_ref::<String>() {
            Some(s) => s.clone(),
            None => "Unknown error".to_owned(),
        },
    }
}

/// Atomic supporting storing and loading of an f32, via the raw bits of a u32.
pub struct AtomicF32 {
    inner: AtomicU32,
}
impl AtomicF32 {
    pub fn new(v: f32) -> Self {
        Self {
            inner: AtomicU32::new(v.to_bits()),
        }
    }

    pub fn store(&self, val: f32, order: Ordering) {
        self.inner.store(val.to_bits(), order);
    }

    pub fn load(&self, order: Ordering) -> f32 {
        f32::from_bits(self.inner.load(order))
    }
}
impl Debug for AtomicF32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.load(Ordering::SeqCst), f)
    }
}

/// Calculates simple moving average with an internal history buffer.
#[derive(Debug)]
pub struct MovingAverage {
    average: f64,
    history: CircularArray<f32>,
}
impl MovingAverage {
    pub fn new(initial: f32, window_size: usize) -> Self {
        Self {
            average: initial.into(),
            history: CircularArray::new(initial, window_size),
        }
    }

    pub fn push(&mut self, new_value: f32) {
        let removed_value = self.history.push_pop(new_value);

        // Storing the average as an f64 ensures far greater accuracy.
        let window_size = self.history.len() as f64;
        let delta = f64::from(new_value - removed_value) / window_size;
        self.average += delta;
    }

    pub fn average(&self) -> f32 {
        self.average as f32
    }
}

/// Moving root-mean-square of a signal.
#[derive(Debug)]
pub struct Rms {
    mean_squared: MovingAverage,
}
impl Rms {
    pub fn new(window_size: usize) -> Self {
        Self {
            mean_squared: MovingAverage::new(0.0, window_size),
        }
    }

    pub fn push(&mut self, sample: f32) {
        self.mean_squared.push(sample * sample);
    }

    pub fn get(&self) -> f32 {
        self.mean_squared.average().max(0.0).sqrt()
    }
}

/// A ringbuffer-like queue, where the length is always the same, i.e. it only has one pointer.
// Please correct me if this has a better name.
pub struct CircularArray<T> {
    position: usize,
    buffer: Vec<T>,
}
impl<T: Clone> CircularArray<T> {
    /// Create an array of the given size, filled with the `initial` value.
    pub fn new(initial: T, size: usize) -> Self {
        Self {
            position: 0,
            buffer: vec![initial; size],
        }
    }

    /// Inserts the value at the back of the queue, and returns the value removed from the front.
    pub fn push_pop(&mut self, value: T) -> T {
        let removed = std::mem::replace(&mut self.buffer[self.position], value);

        self.position += 1;
        self.position %= self.len();

        removed
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Iterate from the oldest to the newest element.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let first_part = &self.buffer[self.position..];
        let last_part = &self.buffer[..self.position];
        first_part.iter().chain(last_part)
    }
}
impl<T: Clone + Debug> Debug for CircularArray<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircularArray")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Just a surface-level test, no concurrency or anything.
    #[test]
    fn atomic_f32() {
        let a_f32 = AtomicF32::new(0.0);

        a_f32.store(3.0, Ordering::Relaxed);

        let result = a_f32.load(Ordering::Relaxed);
        assert_eq!(result, 3.0);
    }

    #[test]
    fn smallest_pow2_of_pow2() {
        assert_eq!(smallest_pow2(64.0), 64);
    }

    #[test]
    fn smallest_pow2_of_odd() {
        assert_eq!(smallest_pow2(65.0), 128);
    }

    #[test]
    fn moving_average() {
        let mut ma = MovingAverage::new(1.0, 10);

        for _ in 0..5 {
            ma.push(3.0);
        }

        assert_eq!(ma.average(), 2.0);
    }

    #[test]
    fn rms_of_constant() {
        let mut rms = Rms::new(4);

        for _ in 0..4 {
            rms.push(-0.5);
        }

        assert!((rms.get() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn circular_array() {
        let mut ca = CircularArray::new(1, 5);
        let mut output = [0; 6];

        for number in &mut output {
            *number = ca.push_pop(2);
        }

        // Observe that all initial values are pushed through, plus a single of the supplied ones.
        let expected_output = [1, 1, 1, 1, 1, 2];
        assert_eq!(output, expected_output);
    }
}
