use std::sync::atomic::{ AtomicUsize, Ordering };

/// Hook the encoder and decoder call once per node they visit.
///
/// `()` ignores every step. An `AtomicUsize` counts them, which is what
/// benchmarks comparing traversal work want.
pub trait StepCounter {
    fn step(&self, _depth: u8) {}
}

impl StepCounter for () {}

impl StepCounter for AtomicUsize {
    #[inline]
    fn step(&self, _depth: u8) {
        self.fetch_add(1, Ordering::Relaxed);
    }
}

impl<T: StepCounter + ?Sized> StepCounter for &T {
    #[inline]
    fn step(&self, depth: u8) {
        (**self).step(depth)
    }
}

#[test]
fn atomic_counter_counts() {
    let counter = AtomicUsize::new(0);
    let by_ref = &counter;
    by_ref.step(0);
    counter.step(3);
    ().step(1);
    assert_eq!(counter.load(Ordering::Relaxed), 2);
}
